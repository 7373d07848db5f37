//! Error taxonomy shared by the service layer and the HTTP API.
//!
//! The pure catalog functions never fail; every variant here originates in a
//! collaborator (record store, media origin) or in request validation.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CatalogError {
    /// The referenced record id does not exist (or no longer exists).
    #[error("video {id} not found")]
    NotFound { id: String },

    /// Missing or blank metadata; rejected before reaching the record store.
    #[error("{0}")]
    Validation(String),

    #[error("video is {size} bytes, the limit is {limit} bytes")]
    TooLarge { size: u64, limit: u64 },

    #[error("unsupported video container; expected mp4, mov, webm, mkv or avi")]
    UnsupportedFormat,

    /// The record store or media origin failed or is unreachable.
    #[error("upstream failure: {0}")]
    Upstream(String),
}

impl CatalogError {
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound { id: id.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Wraps a collaborator failure, keeping the full context chain.
    pub fn upstream(err: impl Into<anyhow::Error>) -> Self {
        let err: anyhow::Error = err.into();
        Self::Upstream(format!("{err:#}"))
    }
}

pub type CatalogResult<T> = Result<T, CatalogError>;

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn upstream_keeps_context_chain() {
        let err: anyhow::Result<()> = Err(anyhow::anyhow!("connection refused"));
        let err = err.context("listing videos").unwrap_err();
        let wrapped = CatalogError::upstream(err);
        assert_eq!(
            wrapped.to_string(),
            "upstream failure: listing videos: connection refused"
        );
    }

    #[test]
    fn too_large_reports_both_sizes() {
        let err = CatalogError::TooLarge {
            size: 2048,
            limit: 1024,
        };
        assert!(err.to_string().contains("2048"));
        assert!(err.to_string().contains("1024"));
    }
}
