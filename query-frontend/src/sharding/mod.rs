//! Trace-by-id sharding.
//!
//! A lookup for one trace is split into one request for live data and one
//! request per slice of the block id space. All of them go to the querier in
//! parallel and their answers are folded back into a single response.

pub mod executor;
pub mod keyspace;
pub mod merger;
pub mod reconciler;
pub mod splitter;

use crate::errors::{ConfigurationError, FrontendError};
use crate::round_tripper::RoundTripper;
use crate::tenant::extract_org_id;
use crate::tracepb::{TraceByIdMetrics, TraceByIdResponse};
use async_trait::async_trait;
use executor::ShardExecutor;
use http::HeaderValue;
use http::header::CONTENT_TYPE;
use hyper::body::Bytes;
use hyper::{Request, Response, StatusCode};
use keyspace::{KeyBoundary, KeyRange, boundaries, ranges};
use prost::Message;
use reconciler::{Reconciled, reconcile};
use serde::Deserialize;
use shared::http::make_text_response;
use shared::routing::PathPattern;
use splitter::ShardRequestBuilder;
use std::sync::Arc;

pub const TRACE_BY_ID_PATH: &str = "/api/traces/{traceID}";
pub const PROTOBUF_CONTENT_TYPE: &str = "application/protobuf";

/// The live request counts as a shard, so 1 would leave no block range to search.
pub const MIN_QUERY_SHARDS: usize = 2;
/// Block ranges are cut on the first id byte, so more shards would repeat ranges.
pub const MAX_QUERY_SHARDS: usize = 256;

/// Maximum length of a trace id in hex characters.
const TRACE_ID_HEX_LEN: usize = 32;

fn default_query_shards() -> usize {
    20
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct ShardingConfig {
    /// Total number of querier requests per lookup, the live one included.
    #[serde(default = "default_query_shards")]
    pub query_shards: usize,
    /// Failed block queries tolerated before a lookup is rejected.
    #[serde(default)]
    pub max_failed_blocks: u32,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            query_shards: default_query_shards(),
            max_failed_blocks: 0,
        }
    }
}

impl ShardingConfig {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if !(MIN_QUERY_SHARDS..=MAX_QUERY_SHARDS).contains(&self.query_shards) {
            return Err(ConfigurationError::QueryShardsOutOfRange {
                actual: self.query_shards,
                min: MIN_QUERY_SHARDS,
                max: MAX_QUERY_SHARDS,
            });
        }
        Ok(())
    }
}

/// Shards trace-by-id lookups and passes every other request through.
pub struct ShardingMiddleware {
    next: Arc<dyn RoundTripper>,
    config: ShardingConfig,
    route: PathPattern,
    builder: ShardRequestBuilder,
    executor: ShardExecutor,
    boundaries: Vec<KeyBoundary>,
}

impl ShardingMiddleware {
    pub fn new(
        next: Arc<dyn RoundTripper>,
        config: ShardingConfig,
        path_prefix: &str,
    ) -> Result<Self, ConfigurationError> {
        config.validate()?;
        // One shard is the live request, the rest split the block id space
        let boundaries = boundaries(config.query_shards - 1)?;

        Ok(Self {
            executor: ShardExecutor::new(next.clone()),
            next,
            config,
            route: PathPattern::parse(TRACE_BY_ID_PATH),
            builder: ShardRequestBuilder::new(path_prefix),
            boundaries,
        })
    }

    /// Block ranges every lookup is split into, in shard order.
    pub fn block_ranges(&self) -> Vec<KeyRange> {
        ranges(&self.boundaries)
    }

    pub fn is_trace_lookup(&self, path: &str) -> bool {
        self.route.is_match(path)
    }

    fn trace_id<'a>(&self, request: &'a Request<Bytes>) -> Option<&'a str> {
        self.route
            .captures(request.uri().path())
            .and_then(|captures| captures.get("traceID").copied())
    }

    async fn lookup(&self, request: Request<Bytes>) -> Result<Response<Bytes>, FrontendError> {
        let org_id = extract_org_id(&request)?;
        tracing::debug!(
            org_id,
            path = request.uri().path(),
            query_shards = self.config.query_shards,
            "Sharding trace lookup"
        );

        let shards = self.builder.build(&request, &self.boundaries)?;
        let outcomes = self.executor.execute(shards).await;

        match reconcile(outcomes, self.config.max_failed_blocks) {
            Ok(reconciled) => encode_reconciled(reconciled),
            Err(e) => {
                tracing::error!(error = %e, "Trace lookup failed");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl RoundTripper for ShardingMiddleware {
    async fn round_trip(&self, request: Request<Bytes>) -> Result<Response<Bytes>, FrontendError> {
        let Some(trace_id) = self.trace_id(&request) else {
            return self.next.round_trip(request).await;
        };
        validate_trace_id(trace_id)?;

        self.lookup(request).await
    }
}

fn validate_trace_id(trace_id: &str) -> Result<(), FrontendError> {
    let valid = !trace_id.is_empty()
        && trace_id.len() <= TRACE_ID_HEX_LEN
        && trace_id.bytes().all(|b| b.is_ascii_hexdigit());
    if valid {
        Ok(())
    } else {
        Err(FrontendError::InvalidTraceId(trace_id.to_string()))
    }
}

fn encode_reconciled(reconciled: Reconciled) -> Result<Response<Bytes>, FrontendError> {
    match reconciled {
        Reconciled::Found(trace, failed_blocks) => {
            let body = TraceByIdResponse {
                trace: Some(trace),
                metrics: Some(TraceByIdMetrics { failed_blocks }),
            }
            .encode_to_vec();

            let mut response = Response::new(Bytes::from(body));
            response
                .headers_mut()
                .insert(CONTENT_TYPE, HeaderValue::from_static(PROTOBUF_CONTENT_TYPE));
            Ok(response)
        }
        Reconciled::NotFound => Ok(make_text_response(StatusCode::NOT_FOUND, "trace not found")),
        Reconciled::Degraded(message) => {
            Ok(make_text_response(StatusCode::INTERNAL_SERVER_ERROR, &message))
        }
    }
}
