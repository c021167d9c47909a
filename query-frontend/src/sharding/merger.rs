//! Combines trace fragments returned by different shards.
//!
//! The merged trace depends only on the spans it contains, never on how the
//! fragments were grouped or ordered. Spans are regrouped under their resource
//! and scope (compared by encoding), a repeated span id keeps the copy with the
//! smallest (span, resource, scope) encoding, and the result is put into a
//! canonical order: spans by start time, then span id, then encoded bytes;
//! scopes and batches by their first span, then encoded bytes.

use crate::tracepb::{InstrumentationScope, Resource, ResourceSpans, ScopeSpans, Span, Trace};
use prost::Message;
use std::collections::{BTreeMap, HashMap};

type SortKey = (u64, Vec<u8>, Vec<u8>);

/// Encoding of an optional message. `None` sorts before any present message.
type ContainerKey = Option<Vec<u8>>;

/// Identifies one copy of a span: its own encoding plus where it lives.
type CopyKey = (Vec<u8>, ContainerKey, ContainerKey);

struct SpanCopy {
    resource: Option<Resource>,
    scope: Option<InstrumentationScope>,
    span: Span,
    key: CopyKey,
}

/// Merges fragments into one canonically ordered trace without duplicate spans.
///
/// Spans are identified by span id. When an id shows up more than once, the
/// copy with the smallest key survives, so the choice does not depend on the
/// other spans around it. Spans without an id are never deduplicated.
pub fn merge_traces<I>(fragments: I) -> Trace
where
    I: IntoIterator<Item = Trace>,
{
    let mut by_id: HashMap<Vec<u8>, SpanCopy> = HashMap::new();
    let mut anonymous = Vec::new();

    for batch in fragments.into_iter().flat_map(|fragment| fragment.batches) {
        for scope_spans in batch.scope_spans {
            for span in scope_spans.spans {
                let copy = span_copy(&batch.resource, &scope_spans.scope, span);
                if copy.span.span_id.is_empty() {
                    anonymous.push(copy);
                    continue;
                }
                let replace = by_id
                    .get(&copy.span.span_id)
                    .is_none_or(|kept| copy.key < kept.key);
                if replace {
                    by_id.insert(copy.span.span_id.clone(), copy);
                }
            }
        }
    }

    let mut trace = regroup(by_id.into_values().chain(anonymous));
    sort_trace(&mut trace);
    trace
}

fn span_copy(
    resource: &Option<Resource>,
    scope: &Option<InstrumentationScope>,
    span: Span,
) -> SpanCopy {
    let key = (
        span.encode_to_vec(),
        resource.as_ref().map(|resource| resource.encode_to_vec()),
        scope.as_ref().map(|scope| scope.encode_to_vec()),
    );
    SpanCopy {
        resource: resource.clone(),
        scope: scope.clone(),
        span,
        key,
    }
}

/// Builds one batch per distinct resource and one scope per distinct scope within it.
fn regroup(copies: impl Iterator<Item = SpanCopy>) -> Trace {
    type Scopes = BTreeMap<ContainerKey, (Option<InstrumentationScope>, Vec<Span>)>;
    let mut batches: BTreeMap<ContainerKey, (Option<Resource>, Scopes)> = BTreeMap::new();

    for SpanCopy {
        resource,
        scope,
        span,
        key: (_, resource_key, scope_key),
    } in copies
    {
        let (_, scopes) = batches
            .entry(resource_key)
            .or_insert_with(|| (resource, BTreeMap::new()));
        let (_, spans) = scopes
            .entry(scope_key)
            .or_insert_with(|| (scope, Vec::new()));
        spans.push(span);
    }

    Trace {
        batches: batches
            .into_values()
            .map(|(resource, scopes)| ResourceSpans {
                resource,
                scope_spans: scopes
                    .into_values()
                    .map(|(scope, spans)| ScopeSpans { scope, spans })
                    .collect(),
            })
            .collect(),
    }
}

/// Puts a trace into canonical order in place.
pub fn sort_trace(trace: &mut Trace) {
    for batch in &mut trace.batches {
        for scope in &mut batch.scope_spans {
            scope.spans.sort_by_cached_key(span_key);
        }
        batch.scope_spans.sort_by_cached_key(scope_key);
    }
    trace.batches.sort_by_cached_key(batch_key);
}

fn span_key(span: &Span) -> SortKey {
    (
        span.start_time_unix_nano,
        span.span_id.clone(),
        span.encode_to_vec(),
    )
}

fn scope_key(scope: &ScopeSpans) -> SortKey {
    let first = scope.spans.first();
    (
        first.map_or(0, |span| span.start_time_unix_nano),
        first.map(|span| span.span_id.clone()).unwrap_or_default(),
        scope.encode_to_vec(),
    )
}

fn batch_key(batch: &ResourceSpans) -> SortKey {
    let first = batch.scope_spans.first().and_then(|scope| scope.spans.first());
    (
        first.map_or(0, |span| span.start_time_unix_nano),
        first.map(|span| span.span_id.clone()).unwrap_or_default(),
        batch.encode_to_vec(),
    )
}
