pub mod config;
pub mod errors;
pub mod http;
pub mod metrics_defs;
pub mod round_tripper;
pub mod sharding;
pub mod tenant;
pub mod tracepb;

#[cfg(test)]
mod testutils;

use crate::errors::FrontendError;
use crate::metrics_defs::{ALL_METRICS, REQUEST_DURATION, REQUESTS_INFLIGHT};
use crate::round_tripper::{RoundTripper, UpstreamRoundTripper};
use crate::sharding::ShardingMiddleware;
use crate::sharding::keyspace::KeyRange;
use http_body_util::{BodyExt, Full, combinators::BoxBody};
use hyper::body::{Bytes, Incoming};
use hyper::service::Service;
use hyper::{Request, Response};
use serde::Serialize;
use shared::admin_service::AdminService;
use shared::http::{make_text_response, run_http_service};
use shared::metrics_defs::describe_all;
use shared::{gauge, histogram};
use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub async fn run(config: config::Config) -> Result<(), FrontendError> {
    config.validate()?;
    describe_all(ALL_METRICS);

    let querier = Arc::new(UpstreamRoundTripper::new(
        config.querier.url.clone(),
        Duration::from_secs(config.querier.timeout_secs),
    ));
    let middleware = Arc::new(ShardingMiddleware::new(
        querier,
        config.sharding.clone(),
        &config.querier.path_prefix,
    )?);
    tracing::info!(
        querier = %config.querier.url,
        query_shards = config.sharding.query_shards,
        max_failed_blocks = config.sharding.max_failed_blocks,
        "Trace lookups will be sharded"
    );

    let shards_page = shards_page(&middleware.block_ranges())?;
    let admin_service = AdminService::<_, FrontendError>::new(|| true).with_page(
        "/shards",
        "application/json",
        shards_page,
    );
    let frontend_service = FrontendService::new(middleware, config.tenant.default_org_id.clone());

    let frontend_task = run_http_service(
        &config.listener.host,
        config.listener.port,
        frontend_service,
    );
    let admin_task = run_http_service(
        &config.admin_listener.host,
        config.admin_listener.port,
        admin_service,
    );

    tokio::try_join!(frontend_task, admin_task)?;
    Ok(())
}

#[derive(Serialize)]
struct ShardRange {
    start: String,
    end: String,
}

/// JSON list of the block ranges, in the order shards are sent.
fn shards_page(ranges: &[KeyRange]) -> Result<Bytes, FrontendError> {
    let ranges: Vec<ShardRange> = ranges
        .iter()
        .map(|range| ShardRange {
            start: range.start.to_hex(),
            end: range.end.to_hex(),
        })
        .collect();

    serde_json::to_vec(&ranges)
        .map(Bytes::from)
        .map_err(|e| FrontendError::InternalError(format!("Failed to render shards page: {e}")))
}

/// Decrements the in-flight gauge even if the connection goes away mid-request.
struct InflightGuard;

impl InflightGuard {
    fn new() -> Self {
        gauge!(REQUESTS_INFLIGHT).increment(1);
        Self
    }
}

impl Drop for InflightGuard {
    fn drop(&mut self) {
        gauge!(REQUESTS_INFLIGHT).decrement(1);
    }
}

struct FrontendService {
    middleware: Arc<ShardingMiddleware>,
    default_org_id: Option<Arc<str>>,
}

impl FrontendService {
    fn new(middleware: Arc<ShardingMiddleware>, default_org_id: Option<String>) -> Self {
        Self {
            middleware,
            default_org_id: default_org_id.map(Arc::from),
        }
    }
}

impl Service<Request<Incoming>> for FrontendService {
    type Response = Response<BoxBody<Bytes, Infallible>>;
    type Error = FrontendError;
    type Future =
        Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send + 'static>>;

    fn call(&self, req: Request<Incoming>) -> Self::Future {
        let middleware = self.middleware.clone();
        let default_org_id = self.default_org_id.clone();
        let handler = if middleware.is_trace_lookup(req.uri().path()) {
            "trace_by_id"
        } else {
            "passthrough"
        };

        Box::pin(async move {
            let _inflight = InflightGuard::new();
            let start = Instant::now();

            let response = handle(middleware.as_ref(), default_org_id.as_deref(), req)
                .await
                .unwrap_or_else(|e| error_response(&e));

            histogram!(
                REQUEST_DURATION,
                "status" => response.status().as_str().to_string(),
                "handler" => handler
            )
            .record(start.elapsed().as_secs_f64());

            Ok(response.map(|body| Full::new(body).boxed()))
        })
    }
}

async fn handle<B>(
    next: &dyn RoundTripper,
    default_org_id: Option<&str>,
    req: Request<B>,
) -> Result<Response<Bytes>, FrontendError>
where
    B: hyper::body::Body,
    B::Error: std::fmt::Display,
{
    let (parts, body) = req.into_parts();
    let body = body
        .collect()
        .await
        .map_err(|e| FrontendError::RequestBodyError(e.to_string()))?
        .to_bytes();

    let mut request = Request::from_parts(parts, body);
    tenant::ensure_org_id(&mut request, default_org_id)?;

    next.round_trip(request).await
}

fn error_response(error: &FrontendError) -> Response<Bytes> {
    let status = error.status_code();
    if status.is_server_error() {
        tracing::error!(error = %error, "Request failed");
    } else {
        tracing::warn!(error = %error, "Request rejected");
    }
    make_text_response(status, &error.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharding::ShardingConfig;
    use crate::sharding::keyspace::{KeyBoundary, boundaries, ranges};
    use crate::testutils::{Reply, ScriptedQuerier};
    use hyper::StatusCode;

    fn middleware(querier: Arc<ScriptedQuerier>) -> ShardingMiddleware {
        let config = ShardingConfig {
            query_shards: 2,
            max_failed_blocks: 0,
        };
        ShardingMiddleware::new(querier, config, "/querier").unwrap()
    }

    fn request(path: &str, org_id: Option<&str>) -> Request<Full<Bytes>> {
        let mut builder = Request::builder().uri(path);
        if let Some(org_id) = org_id {
            builder = builder.header(tenant::ORG_ID_HEADER, org_id);
        }
        builder.body(Full::new(Bytes::new())).unwrap()
    }

    #[test]
    fn test_shards_page() {
        let page = shards_page(&ranges(&boundaries(2).unwrap())).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&page).unwrap();

        let expected = serde_json::json!([
            {
                "start": KeyBoundary::MIN.to_hex(),
                "end": format!("7f{}", "00".repeat(15)),
            },
            {
                "start": format!("7f{}", "00".repeat(15)),
                "end": KeyBoundary::MAX.to_hex(),
            },
        ]);
        assert_eq!(parsed, expected);
    }

    #[tokio::test]
    async fn test_default_org_id_applied() {
        let querier = Arc::new(ScriptedQuerier::new(Reply::status(404), Reply::status(404)));
        let middleware = middleware(querier.clone());

        let response = handle(&middleware, Some("fallback"), request("/api/traces/12", None))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(querier.calls().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_tenant_is_unauthorized() {
        let querier = Arc::new(ScriptedQuerier::new(Reply::status(404), Reply::status(404)));
        let middleware = middleware(querier.clone());

        let err = handle(&middleware, None, request("/api/traces/12", None))
            .await
            .unwrap_err();
        let response = error_response(&err);

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.body().as_ref(), b"no org id\n");
        assert!(querier.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failed_lookup_message_returned_verbatim() {
        let querier = Arc::new(ScriptedQuerier::new(
            Reply::status(200),
            Reply::Fail("connection reset".into()),
        ));
        let middleware = middleware(querier);

        let err = handle(&middleware, None, request("/api/traces/12", Some("blerg")))
            .await
            .unwrap_err();
        let response = error_response(&err);

        assert_eq!(response.status(), StatusCode::BAD_GATEWAY);
        assert_eq!(
            response.body().as_ref(),
            b"Upstream request failed for querier: connection reset\n"
        );
    }
}
