//! Folds per-shard outcomes into the answer for the whole lookup.

use crate::errors::FrontendError;
use crate::metrics_defs::{FAILED_BLOCK_LIMIT_EXCEEDED, SHARD_FAILED_BLOCKS};
use crate::sharding::executor::ShardOutcome;
use crate::sharding::merger::merge_traces;
use crate::tracepb::Trace;
use hyper::StatusCode;
use shared::{counter, histogram};

/// Final state of a sharded trace lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum Reconciled {
    /// At least one shard found data. Carries the merged trace and the
    /// number of blocks the block shards failed to read.
    Found(Trace, u32),
    /// Every shard answered 404.
    NotFound,
    /// Some shard answered with a status other than 200 or 404.
    Degraded(String),
}

/// Applies shard results in precedence order.
///
/// 1. A shard with no response fails the lookup; the first in shard order wins.
/// 2. Any status other than 200 or 404 degrades the lookup. The message is the
///    body of the first such shard.
/// 3. If every shard answered 404 the trace is not found.
/// 4. Otherwise the 200 fragments are merged. Failed blocks reported by the
///    block shards are summed and must not exceed `max_failed_blocks`.
pub fn reconcile(
    outcomes: Vec<ShardOutcome>,
    max_failed_blocks: u32,
) -> Result<Reconciled, FrontendError> {
    let mut responses = Vec::with_capacity(outcomes.len());
    for outcome in outcomes {
        responses.push((outcome.kind, outcome.result?));
    }

    if let Some((kind, degraded)) = responses
        .iter()
        .find(|(_, response)| !matches!(response.status, StatusCode::OK | StatusCode::NOT_FOUND))
    {
        tracing::warn!(
            shard = %kind,
            status = degraded.status.as_u16(),
            "Shard returned an unexpected status"
        );
        return Ok(Reconciled::Degraded(degraded.message.clone()));
    }

    if responses
        .iter()
        .all(|(_, response)| response.status == StatusCode::NOT_FOUND)
    {
        return Ok(Reconciled::NotFound);
    }

    let mut failed_blocks: u32 = 0;
    let mut fragments = Vec::new();
    for (kind, response) in responses {
        if response.status != StatusCode::OK {
            continue;
        }

        let reported = response.failed_blocks();
        if kind.is_block_range() {
            failed_blocks = failed_blocks.saturating_add(reported);
        } else if reported > 0 {
            tracing::debug!(
                failed_blocks = reported,
                "Ignoring failed blocks reported by live shard"
            );
        }

        if let Some(trace) = response.payload.and_then(|payload| payload.trace) {
            fragments.push(trace);
        }
    }

    histogram!(SHARD_FAILED_BLOCKS).record(failed_blocks as f64);
    if failed_blocks > max_failed_blocks {
        counter!(FAILED_BLOCK_LIMIT_EXCEEDED).increment(1);
        return Err(FrontendError::TooManyFailedBlocks {
            observed: failed_blocks,
            max: max_failed_blocks,
        });
    }

    Ok(Reconciled::Found(merge_traces(fragments), failed_blocks))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sharding::executor::ShardResponse;
    use crate::sharding::keyspace::{KeyBoundary, KeyRange};
    use crate::sharding::merger::sort_trace;
    use crate::sharding::splitter::ShardKind;
    use crate::testutils::{make_trace, split_trace};
    use crate::tracepb::{TraceByIdMetrics, TraceByIdResponse};

    fn block_kind() -> ShardKind {
        ShardKind::BlockRange(KeyRange::new(KeyBoundary::MIN, KeyBoundary::MAX))
    }

    fn ok(kind: ShardKind, status: u16, trace: Option<Trace>, failed_blocks: u32) -> ShardOutcome {
        let payload = trace.map(|trace| TraceByIdResponse {
            trace: Some(trace),
            metrics: Some(TraceByIdMetrics { failed_blocks }),
        });
        ShardOutcome {
            kind,
            result: Ok(ShardResponse {
                status: StatusCode::from_u16(status).unwrap(),
                payload,
                message: if status == 200 {
                    String::new()
                } else {
                    format!("status {status}")
                },
            }),
        }
    }

    fn failed(kind: ShardKind, message: &str) -> ShardOutcome {
        ShardOutcome {
            kind,
            result: Err(FrontendError::UpstreamRequestFailed(
                "querier".into(),
                message.into(),
            )),
        }
    }

    fn pair(
        first: (u16, Option<Trace>),
        second: (u16, Option<Trace>),
    ) -> Vec<ShardOutcome> {
        vec![
            ok(ShardKind::Live, first.0, first.1, 0),
            ok(block_kind(), second.0, second.1, 0),
        ]
    }

    #[test]
    fn test_status_table() {
        let trace = make_trace(6, &[0x12, 0x34]);
        let (first, _) = split_trace(&trace, 3);

        let cases: Vec<(&str, Vec<ShardOutcome>, &str)> = vec![
            ("empty returns", pair((200, None), (200, None)), "found"),
            ("404", pair((404, None), (404, None)), "not_found"),
            ("400", pair((400, None), (400, None)), "degraded"),
            ("500+404", pair((500, None), (404, None)), "degraded"),
            ("404+500", pair((404, None), (500, None)), "degraded"),
            ("500+200", pair((500, None), (200, Some(first.clone()))), "degraded"),
            ("200+500", pair((200, Some(first.clone())), (500, None)), "degraded"),
            ("503+200", pair((503, None), (200, Some(first.clone()))), "degraded"),
            ("200+503", pair((200, Some(first.clone())), (503, None)), "degraded"),
            ("200+404", pair((200, Some(first.clone())), (404, None)), "found"),
            ("404+200", pair((404, None), (200, Some(first.clone()))), "found"),
        ];

        for (name, outcomes, expected) in cases {
            let actual = match reconcile(outcomes, 0).unwrap() {
                Reconciled::Found(..) => "found",
                Reconciled::NotFound => "not_found",
                Reconciled::Degraded(_) => "degraded",
            };
            assert_eq!(actual, expected, "case {name}");
        }
    }

    #[test]
    fn test_empty_returns_give_empty_trace() {
        let reconciled = reconcile(pair((200, None), (200, None)), 0).unwrap();
        assert_eq!(reconciled, Reconciled::Found(Trace::default(), 0));
    }

    #[test]
    fn test_single_found_fragment_is_the_trace() {
        let trace = make_trace(3, &[0x01]);
        let reconciled = reconcile(pair((404, None), (200, Some(trace.clone()))), 0).unwrap();

        let mut expected = trace;
        sort_trace(&mut expected);
        assert_eq!(reconciled, Reconciled::Found(expected, 0));
    }

    #[test]
    fn test_fragments_are_merged() {
        let trace = make_trace(8, &[0x01, 0x02]);
        let (a, b) = split_trace(&trace, 4);

        let reconciled = reconcile(pair((200, Some(a)), (200, Some(b))), 0).unwrap();

        let mut expected = trace;
        sort_trace(&mut expected);
        assert_eq!(reconciled, Reconciled::Found(expected, 0));
    }

    #[test]
    fn test_degraded_message_from_first_degraded_shard() {
        let outcomes = vec![
            ok(ShardKind::Live, 200, None, 0),
            ok(block_kind(), 503, None, 0),
            ok(block_kind(), 500, None, 0),
        ];
        assert_eq!(
            reconcile(outcomes, 0).unwrap(),
            Reconciled::Degraded("status 503".into())
        );
    }

    #[test]
    fn test_transport_error_beats_everything() {
        let trace = make_trace(2, &[0x01]);

        let outcomes = vec![
            ok(ShardKind::Live, 200, Some(trace.clone()), 0),
            failed(block_kind(), "booo"),
        ];
        let err = reconcile(outcomes, 0).unwrap_err();
        assert_eq!(err.to_string(), "Upstream request failed for querier: booo");

        let outcomes = vec![failed(ShardKind::Live, "booo"), ok(block_kind(), 200, Some(trace), 0)];
        assert!(matches!(
            reconcile(outcomes, 0),
            Err(FrontendError::UpstreamRequestFailed(_, msg)) if msg == "booo"
        ));

        let outcomes = vec![ok(ShardKind::Live, 500, None, 0), failed(block_kind(), "booo")];
        assert!(matches!(
            reconcile(outcomes, 0),
            Err(FrontendError::UpstreamRequestFailed(..))
        ));
    }

    #[test]
    fn test_first_failure_in_shard_order_wins() {
        let outcomes = vec![
            ok(ShardKind::Live, 200, None, 0),
            failed(block_kind(), "first"),
            failed(block_kind(), "second"),
        ];
        assert!(matches!(
            reconcile(outcomes, 0),
            Err(FrontendError::UpstreamRequestFailed(_, msg)) if msg == "first"
        ));
    }

    #[test]
    fn test_failed_blocks_within_limit() {
        let trace = make_trace(4, &[0x01]);
        let (a, b) = split_trace(&trace, 2);
        let outcomes = vec![
            ok(ShardKind::Live, 200, Some(a), 1),
            ok(block_kind(), 200, Some(b), 1),
        ];

        match reconcile(outcomes, 2).unwrap() {
            Reconciled::Found(merged, failed_blocks) => {
                assert_eq!(failed_blocks, 1);
                assert_eq!(merged.span_count(), trace.span_count());
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_failed_blocks_at_limit_is_accepted() {
        let trace = make_trace(2, &[0x01]);
        let outcomes = vec![
            ok(ShardKind::Live, 404, None, 0),
            ok(block_kind(), 200, Some(trace.clone()), 1),
            ok(block_kind(), 200, Some(trace), 1),
        ];
        assert!(matches!(
            reconcile(outcomes, 2).unwrap(),
            Reconciled::Found(_, 2)
        ));
    }

    #[test]
    fn test_too_many_failed_blocks() {
        let trace = make_trace(2, &[0x01]);
        let outcomes = vec![
            ok(ShardKind::Live, 200, Some(trace.clone()), 10),
            ok(block_kind(), 200, Some(trace), 10),
        ];

        let err = reconcile(outcomes, 2).unwrap_err();
        assert_eq!(err.to_string(), "too many failed block queries 10 (max 2)");
    }

    #[test]
    fn test_live_failed_blocks_ignored() {
        let trace = make_trace(2, &[0x01]);
        let outcomes = vec![
            ok(ShardKind::Live, 200, Some(trace), 50),
            ok(block_kind(), 404, None, 0),
        ];
        assert!(matches!(
            reconcile(outcomes, 0).unwrap(),
            Reconciled::Found(_, 0)
        ));
    }
}
