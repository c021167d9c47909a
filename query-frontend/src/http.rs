use http_body_util::{BodyExt, Full};
use hyper::body::Bytes;
use hyper::{Request, Response};
use hyper_util::client::legacy::Client;
use hyper_util::client::legacy::connect::Connect;
use shared::http::{add_via_header, filter_hop_by_hop};
use std::time::Duration;
use tokio::time::timeout;

use crate::errors::FrontendError;

/// Send a request to a single upstream and collect the whole response.
///
/// The upstream base URL supplies scheme and authority; path and query come
/// from the request. Hop-by-hop headers are filtered in both directions and a
/// `Via` header is appended.
///
/// # Timeout Behavior
///
/// `request_timeout` covers the entire exchange, including collecting the
/// response body. Not suitable for streaming responses.
pub async fn send_to_upstream<C>(
    client: &Client<C, Full<Bytes>>,
    upstream_url: &url::Url,
    request: Request<Bytes>,
    request_timeout: Duration,
) -> Result<Response<Bytes>, FrontendError>
where
    C: Connect + Clone + Send + Sync + 'static,
{
    let upstream_identifier = upstream_url.host_str().unwrap_or(upstream_url.as_str());

    let path_and_query = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .ok_or_else(|| {
            FrontendError::InternalError("Request URI missing path and query".to_string())
        })?;

    let mut url = upstream_url.clone();
    match path_and_query.split_once('?') {
        Some((path, query)) => {
            url.set_path(path);
            url.set_query(Some(query));
        }
        None => url.set_path(path_and_query),
    }
    let upstream_uri = url.to_string();

    let (mut parts, body) = request.into_parts();
    let request_version = parts.version;
    filter_hop_by_hop(&mut parts.headers, request_version);
    add_via_header(&mut parts.headers, request_version);

    let mut req_builder = Request::builder()
        .method(parts.method)
        .uri(&upstream_uri)
        .version(parts.version);
    for (name, value) in parts.headers.iter() {
        req_builder = req_builder.header(name, value);
    }

    let upstream_request = req_builder
        .body(Full::new(body))
        .map_err(|e| FrontendError::InternalError(format!("Failed to build request: {e}")))?;

    tracing::debug!(uri = %upstream_uri, "Sending upstream request");

    let exchange = async {
        let response = client.request(upstream_request).await.map_err(|e| {
            FrontendError::UpstreamRequestFailed(upstream_identifier.to_string(), e.to_string())
        })?;

        let (mut parts, body) = response.into_parts();
        let response_version = parts.version;
        filter_hop_by_hop(&mut parts.headers, response_version);
        add_via_header(&mut parts.headers, response_version);

        let body_bytes = body
            .collect()
            .await
            .map(|collected| collected.to_bytes())
            .map_err(|e| FrontendError::ResponseBodyError(e.to_string()))?;

        Ok::<_, FrontendError>((parts, body_bytes))
    };

    // The deadline covers headers and body alike
    let (parts, body_bytes) = timeout(request_timeout, exchange)
        .await
        .map_err(|_| FrontendError::UpstreamTimeout(upstream_identifier.to_string()))??;

    Ok(Response::from_parts(parts, body_bytes))
}
