//! Builds the per-shard querier requests for one trace lookup.

use crate::errors::{ConfigurationError, FrontendError};
use crate::sharding::keyspace::{KeyBoundary, KeyRange};
use http::Uri;
use hyper::Request;
use hyper::body::Bytes;
use std::fmt;
use url::form_urlencoded;

pub const MODE_PARAM: &str = "mode";
pub const MODE_INGESTERS: &str = "ingesters";
pub const MODE_BLOCKS: &str = "blocks";
pub const BLOCK_START_PARAM: &str = "blockStart";
pub const BLOCK_END_PARAM: &str = "blockEnd";

/// What a shard asks the querier to search.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShardKind {
    /// Recently ingested data still held by ingesters.
    Live,
    /// Persisted blocks whose id range intersects the given range.
    BlockRange(KeyRange),
}

impl ShardKind {
    /// Low-cardinality name, suitable for metric labels.
    pub fn as_str(&self) -> &'static str {
        match self {
            ShardKind::Live => "live",
            ShardKind::BlockRange(_) => "blocks",
        }
    }

    pub fn is_block_range(&self) -> bool {
        matches!(self, ShardKind::BlockRange(_))
    }
}

impl fmt::Display for ShardKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardKind::Live => f.write_str("live"),
            ShardKind::BlockRange(range) => write!(f, "blocks[{range}]"),
        }
    }
}

/// A request bound for the querier, tagged with the shard it serves.
#[derive(Debug)]
pub struct ShardRequest {
    pub kind: ShardKind,
    pub request: Request<Bytes>,
}

/// Derives shard requests from an inbound trace lookup.
///
/// The inbound request is only read. Every shard gets a fresh request with the
/// same method, headers (tenant included) and body, a path under the querier
/// prefix, and the shard's mode parameters merged into the original query.
#[derive(Clone, Debug)]
pub struct ShardRequestBuilder {
    path_prefix: String,
}

impl ShardRequestBuilder {
    pub fn new(path_prefix: impl Into<String>) -> Self {
        let path_prefix = path_prefix.into();
        Self {
            path_prefix: path_prefix.trim_end_matches('/').to_string(),
        }
    }

    /// Returns one live shard followed by one block-range shard per adjacent boundary pair.
    pub fn build(
        &self,
        inbound: &Request<Bytes>,
        bounds: &[KeyBoundary],
    ) -> Result<Vec<ShardRequest>, FrontendError> {
        if bounds.is_empty() {
            return Err(ConfigurationError::EmptyBoundaries.into());
        }

        let mut shards = Vec::with_capacity(bounds.len());
        shards.push(self.build_one(inbound, ShardKind::Live)?);
        for pair in bounds.windows(2) {
            let kind = ShardKind::BlockRange(KeyRange::new(pair[0], pair[1]));
            shards.push(self.build_one(inbound, kind)?);
        }

        Ok(shards)
    }

    fn build_one(
        &self,
        inbound: &Request<Bytes>,
        kind: ShardKind,
    ) -> Result<ShardRequest, FrontendError> {
        let shard_params: Vec<(&str, String)> = match kind {
            ShardKind::Live => vec![(MODE_PARAM, MODE_INGESTERS.to_string())],
            ShardKind::BlockRange(range) => vec![
                (BLOCK_START_PARAM, range.start.to_hex()),
                (BLOCK_END_PARAM, range.end.to_hex()),
                (MODE_PARAM, MODE_BLOCKS.to_string()),
            ],
        };

        let uri = self.shard_uri(inbound.uri(), &shard_params)?;

        let mut builder = Request::builder()
            .method(inbound.method())
            .uri(uri)
            .version(inbound.version());
        for (name, value) in inbound.headers() {
            builder = builder.header(name, value);
        }

        let request = builder.body(inbound.body().clone()).map_err(|e| {
            FrontendError::InternalError(format!("Failed to build {kind} shard request: {e}"))
        })?;

        Ok(ShardRequest { kind, request })
    }

    fn shard_uri(
        &self,
        inbound: &Uri,
        shard_params: &[(&str, String)],
    ) -> Result<Uri, FrontendError> {
        let mut params: Vec<(String, String)> = inbound
            .query()
            .map(|q| form_urlencoded::parse(q.as_bytes()).into_owned().collect())
            .unwrap_or_default();
        params.retain(|(key, _)| !shard_params.iter().any(|(name, _)| name == key));
        params.extend(
            shard_params
                .iter()
                .map(|(name, value)| (name.to_string(), value.clone())),
        );
        // Stable sort keeps repeated keys in their original order
        params.sort_by(|a, b| a.0.cmp(&b.0));

        let query = form_urlencoded::Serializer::new(String::new())
            .extend_pairs(params)
            .finish();
        let path_and_query = format!("{}{}?{}", self.path_prefix, inbound.path(), query);

        let mut builder = Uri::builder();
        if let Some(scheme) = inbound.scheme() {
            builder = builder.scheme(scheme.clone());
        }
        if let Some(authority) = inbound.authority() {
            builder = builder.authority(authority.clone());
        }
        builder
            .path_and_query(path_and_query)
            .build()
            .map_err(|e| FrontendError::InternalError(format!("Invalid shard uri: {e}")))
    }
}
