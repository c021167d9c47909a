use crate::errors::FrontendError;
use crate::round_tripper::RoundTripper;
use crate::sharding::splitter::{MODE_BLOCKS, MODE_INGESTERS};
use crate::tracepb::{
    AnyValue, InstrumentationScope, KeyValue, Resource, ResourceSpans, ScopeSpans, Span, Trace,
    TraceByIdMetrics, TraceByIdResponse,
};
use async_trait::async_trait;
use hyper::body::Bytes;
use hyper::{Request, Response, StatusCode};
use prost::Message;
use std::sync::Mutex;

/// Builds a trace with `batches` resource batches, each holding a few spans with unique ids.
pub fn make_trace(batches: usize, trace_id: &[u8]) -> Trace {
    let batches = (0..batches)
        .map(|i| {
            let spans = (0..=(i % 3))
                .map(|j| Span {
                    trace_id: trace_id.to_vec(),
                    span_id: vec![i as u8, j as u8, 0, 0, 0, 0, 0, 1],
                    parent_span_id: Vec::new(),
                    name: format!("op-{i}-{j}"),
                    kind: 1,
                    start_time_unix_nano: 1_000 + (i * 10 + j) as u64,
                    end_time_unix_nano: 2_000 + (i * 10 + j) as u64,
                })
                .collect();

            ResourceSpans {
                resource: Some(Resource {
                    attributes: vec![KeyValue {
                        key: "service.name".into(),
                        value: Some(AnyValue {
                            string_value: format!("svc-{i}"),
                        }),
                    }],
                }),
                scope_spans: vec![ScopeSpans {
                    scope: Some(InstrumentationScope {
                        name: "test".into(),
                        version: "1".into(),
                    }),
                    spans,
                }],
            }
        })
        .collect();

    Trace { batches }
}

/// Splits a trace by batch: the first `at` batches, and the rest.
pub fn split_trace(trace: &Trace, at: usize) -> (Trace, Trace) {
    let at = at.min(trace.batches.len());
    let (head, tail) = trace.batches.split_at(at);
    (
        Trace {
            batches: head.to_vec(),
        },
        Trace {
            batches: tail.to_vec(),
        },
    )
}

pub fn encode_response(trace: &Trace, failed_blocks: u32) -> Bytes {
    TraceByIdResponse {
        trace: Some(trace.clone()),
        metrics: Some(TraceByIdMetrics { failed_blocks }),
    }
    .encode_to_vec()
    .into()
}

/// What a scripted querier answers for one kind of shard.
#[derive(Clone, Debug)]
pub enum Reply {
    Status {
        status: u16,
        trace: Option<Trace>,
        failed_blocks: u32,
    },
    Fail(String),
}

impl Reply {
    pub fn status(status: u16) -> Self {
        Reply::Status {
            status,
            trace: None,
            failed_blocks: 0,
        }
    }

    pub fn trace(status: u16, trace: Trace, failed_blocks: u32) -> Self {
        Reply::Status {
            status,
            trace: Some(trace),
            failed_blocks,
        }
    }

    fn respond(&self) -> Result<Response<Bytes>, FrontendError> {
        match self {
            Reply::Fail(message) => Err(FrontendError::UpstreamRequestFailed(
                "querier".into(),
                message.clone(),
            )),
            Reply::Status {
                status,
                trace,
                failed_blocks,
            } => {
                let body = match trace {
                    Some(trace) => encode_response(trace, *failed_blocks),
                    None => Bytes::new(),
                };
                let mut response = Response::new(body);
                *response.status_mut() = StatusCode::from_u16(*status).unwrap();
                Ok(response)
            }
        }
    }
}

/// Querier stand-in that answers by shard mode and records every request URI.
pub struct ScriptedQuerier {
    pub live: Reply,
    pub blocks: Reply,
    /// Answer for requests that carry no shard mode.
    pub passthrough: Reply,
    pub calls: Mutex<Vec<String>>,
}

impl ScriptedQuerier {
    pub fn new(live: Reply, blocks: Reply) -> Self {
        Self {
            live,
            blocks,
            passthrough: Reply::status(200),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl RoundTripper for ScriptedQuerier {
    async fn round_trip(&self, request: Request<Bytes>) -> Result<Response<Bytes>, FrontendError> {
        let uri = request.uri().to_string();
        self.calls.lock().unwrap().push(uri.clone());

        let query = request.uri().query().unwrap_or_default();
        if query.contains(&format!("mode={MODE_INGESTERS}")) {
            self.live.respond()
        } else if query.contains(&format!("mode={MODE_BLOCKS}")) {
            self.blocks.respond()
        } else {
            self.passthrough.respond()
        }
    }
}
