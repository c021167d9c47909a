use crate::errors::FrontendError;
use crate::http::send_to_upstream;
use async_trait::async_trait;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::{Request, Response};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;

/// Executes one fully buffered request and returns the fully buffered response.
///
/// Middleware implement this trait and wrap another implementation, so a stack
/// of them is used exactly like the innermost transport.
#[async_trait]
pub trait RoundTripper: Send + Sync {
    async fn round_trip(&self, request: Request<Bytes>) -> Result<Response<Bytes>, FrontendError>;
}

/// Sends requests to a querier over HTTP.
#[derive(Clone)]
pub struct UpstreamRoundTripper {
    client: Client<HttpConnector, Full<Bytes>>,
    upstream_url: url::Url,
    request_timeout: Duration,
}

impl UpstreamRoundTripper {
    pub fn new(upstream_url: url::Url, request_timeout: Duration) -> Self {
        let client = Client::builder(TokioExecutor::new()).build(HttpConnector::new());
        Self {
            client,
            upstream_url,
            request_timeout,
        }
    }
}

#[async_trait]
impl RoundTripper for UpstreamRoundTripper {
    async fn round_trip(&self, request: Request<Bytes>) -> Result<Response<Bytes>, FrontendError> {
        send_to_upstream(
            &self.client,
            &self.upstream_url,
            request,
            self.request_timeout,
        )
        .await
    }
}
