//! Error taxonomy for ingestion and generation.
//!
//! Every stage of the pipeline maps its failure into exactly one
//! [`ChatError`] variant at the point where the stage is invoked. Provider
//! transport code returns `anyhow::Result` and carries the detailed context
//! chain; the variant records which stage failed and the rendered chain.
//!
//! | Variant | Stage | `code()` |
//! |---------|-------|----------|
//! | [`ChatError::Config`] | configuration / provider construction | `config` |
//! | [`ChatError::SourceFetch`] | Document Source Loader | `source_fetch` |
//! | [`ChatError::Upload`] | Remote File Uploader | `upload` |
//! | [`ChatError::ProcessingFailed`] | Processing-State Poller (FAILED) | `processing_failed` |
//! | [`ChatError::ProcessingTimedOut`] | Processing-State Poller (policy bound) | `processing_timed_out` |
//! | [`ChatError::CacheCreation`] | Context Cache Builder | `cache_creation` |
//! | [`ChatError::Generation`] | Generation Request Cycle | `generation` |
//! | [`ChatError::Remote`] | failure relayed by a remote server | the server's code |

use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to load source document: {0}")]
    SourceFetch(String),

    #[error("file upload failed: {0}")]
    Upload(String),

    #[error("file {name} failed processing: {reason}")]
    ProcessingFailed { name: String, reason: String },

    #[error("file {name} still processing after {attempts} status queries ({elapsed:?})")]
    ProcessingTimedOut {
        name: String,
        attempts: u32,
        elapsed: Duration,
    },

    #[error("context cache creation failed: {0}")]
    CacheCreation(String),

    #[error("generation failed: {0}")]
    Generation(String),

    /// A remote cache-chat server reported a failure of its own.
    #[error("server reported {code}: {message}")]
    Remote { code: String, message: String },
}

impl ChatError {
    /// Machine-readable code used in JSON error bodies.
    pub fn code(&self) -> &str {
        match self {
            ChatError::Config(_) => "config",
            ChatError::SourceFetch(_) => "source_fetch",
            ChatError::Upload(_) => "upload",
            ChatError::ProcessingFailed { .. } => "processing_failed",
            ChatError::ProcessingTimedOut { .. } => "processing_timed_out",
            ChatError::CacheCreation(_) => "cache_creation",
            ChatError::Generation(_) => "generation",
            ChatError::Remote { code, .. } => code,
        }
    }

    pub(crate) fn source_fetch(err: anyhow::Error) -> Self {
        ChatError::SourceFetch(format!("{:#}", err))
    }

    pub(crate) fn upload(err: anyhow::Error) -> Self {
        ChatError::Upload(format!("{:#}", err))
    }

    pub(crate) fn cache_creation(err: anyhow::Error) -> Self {
        ChatError::CacheCreation(format!("{:#}", err))
    }

    pub(crate) fn generation(err: anyhow::Error) -> Self {
        ChatError::Generation(format!("{:#}", err))
    }
}

pub type ChatResult<T> = Result<T, ChatError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable() {
        assert_eq!(ChatError::Upload("x".into()).code(), "upload");
        assert_eq!(
            ChatError::ProcessingTimedOut {
                name: "files/a".into(),
                attempts: 3,
                elapsed: Duration::from_secs(4),
            }
            .code(),
            "processing_timed_out"
        );
    }

    #[test]
    fn stage_constructors_keep_context_chain() {
        let err = anyhow::anyhow!("connection refused").context("POST /upload/v1beta/files");
        let msg = ChatError::upload(err).to_string();
        assert!(msg.contains("POST /upload/v1beta/files"));
        assert!(msg.contains("connection refused"));
    }
}
