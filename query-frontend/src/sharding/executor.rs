//! Concurrent execution of shard requests.

use crate::errors::FrontendError;
use crate::metrics_defs::SHARD_REQUESTS;
use crate::round_tripper::RoundTripper;
use crate::sharding::splitter::{ShardKind, ShardRequest};
use crate::tracepb::TraceByIdResponse;
use hyper::body::Bytes;
use hyper::{Response, StatusCode};
use prost::Message;
use shared::counter;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::task::JoinSet;

/// A querier response with its body decoded as far as the status allows.
#[derive(Debug, Clone)]
pub struct ShardResponse {
    pub status: StatusCode,
    /// Decoded body of a 200 response. `None` when the shard found nothing.
    pub payload: Option<TraceByIdResponse>,
    /// Body of any other response, kept for error reporting.
    pub message: String,
}

impl ShardResponse {
    fn from_response(kind: ShardKind, response: Response<Bytes>) -> Result<Self, FrontendError> {
        let status = response.status();
        let body = response.into_body();

        if status != StatusCode::OK {
            return Ok(Self {
                status,
                payload: None,
                message: String::from_utf8_lossy(&body).trim().to_string(),
            });
        }

        let payload = if body.is_empty() {
            None
        } else {
            let decoded =
                TraceByIdResponse::decode(body).map_err(|source| FrontendError::ShardDecode {
                    shard: kind.to_string(),
                    source,
                })?;
            Some(decoded)
        };

        Ok(Self {
            status,
            payload,
            message: String::new(),
        })
    }

    pub fn failed_blocks(&self) -> u32 {
        self.payload
            .as_ref()
            .and_then(|payload| payload.metrics.as_ref())
            .map_or(0, |metrics| metrics.failed_blocks)
    }
}

/// The result of running one shard. A failed `result` means no usable response arrived.
#[derive(Debug)]
pub struct ShardOutcome {
    pub kind: ShardKind,
    pub result: Result<ShardResponse, FrontendError>,
}

/// Sends every shard request at once through the wrapped round tripper.
///
/// Each shard runs on its own task; there is no limit beyond the number of
/// shards. Outcomes come back in request order regardless of completion order.
/// Dropping the future returned by [`ShardExecutor::execute`] aborts every
/// shard still in flight.
#[derive(Clone)]
pub struct ShardExecutor {
    next: Arc<dyn RoundTripper>,
}

impl ShardExecutor {
    pub fn new(next: Arc<dyn RoundTripper>) -> Self {
        Self { next }
    }

    pub async fn execute(&self, requests: Vec<ShardRequest>) -> Vec<ShardOutcome> {
        let kinds: Vec<ShardKind> = requests.iter().map(|shard| shard.kind).collect();
        let mut join_set = JoinSet::new();
        let mut task_index = HashMap::new();

        for (index, ShardRequest { kind, request }) in requests.into_iter().enumerate() {
            let next = self.next.clone();
            let abort_handle = join_set.spawn(async move {
                let result = next
                    .round_trip(request)
                    .await
                    .and_then(|response| ShardResponse::from_response(kind, response));
                (index, result)
            });
            task_index.insert(abort_handle.id(), index);
        }

        let mut slots: Vec<Option<Result<ShardResponse, FrontendError>>> =
            kinds.iter().map(|_| None).collect();

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => {
                    tracing::error!(error = %e, "Shard task failed");
                    if let Some(&index) = task_index.get(&e.id()) {
                        slots[index] = Some(Err(FrontendError::ShardTaskFailed(
                            kinds[index].to_string(),
                            e.to_string(),
                        )));
                    }
                }
            }
        }

        kinds
            .into_iter()
            .zip(slots)
            .map(|(kind, slot)| {
                let result = slot.unwrap_or_else(|| {
                    Err(FrontendError::ShardTaskFailed(
                        kind.to_string(),
                        "no result collected".to_string(),
                    ))
                });
                record_outcome(kind, &result);
                ShardOutcome { kind, result }
            })
            .collect()
    }
}

fn record_outcome(kind: ShardKind, result: &Result<ShardResponse, FrontendError>) {
    let outcome = match result {
        Ok(response) => {
            tracing::debug!(
                shard = %kind,
                status = response.status.as_u16(),
                found = response.payload.is_some(),
                failed_blocks = response.failed_blocks(),
                "Shard responded"
            );
            match response.status {
                StatusCode::OK => "found",
                StatusCode::NOT_FOUND => "not_found",
                _ => "degraded",
            }
        }
        Err(e) => {
            tracing::warn!(shard = %kind, error = %e, "Shard request failed");
            "failed"
        }
    };
    counter!(SHARD_REQUESTS, "kind" => kind.as_str(), "outcome" => outcome).increment(1);
}
