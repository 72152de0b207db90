use crate::codec::FormatError;
use std::io;

/// Every failure the cache can hit internally.
///
/// None of these cross the public surface: cache operations map all of
/// them to a miss or a `false` result, and transient ones are logged.
#[derive(thiserror::Error, Debug)]
pub enum CacheError {
    #[error("asset not found")]
    NotFound,
    #[error("bad record format: {source}")]
    BadFormat {
        #[from]
        source: FormatError,
    },
    #[error("IO error: {source}")]
    Io {
        #[from]
        source: io::Error,
    },
    #[error("write already in progress")]
    Contention,
    #[error("upstream fetch failed: {source}")]
    Upstream {
        #[from]
        source: anyhow::Error,
    },
}

pub type Result<T> = std::result::Result<T, CacheError>;
