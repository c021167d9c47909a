use crate::config::ValidationError;
use http::StatusCode;
use thiserror::Error;

/// Invalid sharding setup. Only ever raised while constructing the middleware.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigurationError {
    #[error("shard count must be at least 1")]
    ZeroShards,

    #[error("cannot build shard requests from an empty boundary list")]
    EmptyBoundaries,

    #[error("query shards must be between {min} and {max}, got {actual}")]
    QueryShardsOutOfRange {
        actual: usize,
        min: usize,
        max: usize,
    },
}

/// Errors that can occur while serving a query-frontend request
#[derive(Error, Debug)]
pub enum FrontendError {
    #[error("Failed to read request body: {0}")]
    RequestBodyError(String),

    #[error("Failed to read response body: {0}")]
    ResponseBodyError(String),

    #[error("Upstream request failed for {0}: {1}")]
    UpstreamRequestFailed(String, String),

    #[error("Upstream timeout for {0}")]
    UpstreamTimeout(String),

    #[error("failed to decode {shard} shard response: {source}")]
    ShardDecode {
        shard: String,
        #[source]
        source: prost::DecodeError,
    },

    #[error("{0} shard task failed: {1}")]
    ShardTaskFailed(String, String),

    #[error("too many failed block queries {observed} (max {max})")]
    TooManyFailedBlocks { observed: u32, max: u32 },

    #[error("no org id")]
    MissingTenant,

    #[error("invalid trace id: {0}")]
    InvalidTraceId(String),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigurationError),

    #[error("invalid config: {0}")]
    InvalidConfig(#[from] ValidationError),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl FrontendError {
    /// Status code used when this error reaches the HTTP edge.
    pub fn status_code(&self) -> StatusCode {
        match self {
            FrontendError::MissingTenant => StatusCode::UNAUTHORIZED,
            FrontendError::InvalidTraceId(_) | FrontendError::RequestBodyError(_) => {
                StatusCode::BAD_REQUEST
            }
            FrontendError::UpstreamRequestFailed(..) | FrontendError::ResponseBodyError(_) => {
                StatusCode::BAD_GATEWAY
            }
            FrontendError::UpstreamTimeout(_) => StatusCode::GATEWAY_TIMEOUT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
