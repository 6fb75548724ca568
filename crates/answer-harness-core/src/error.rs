//! Error taxonomy for the answering pipeline.
//!
//! Only [`AnswerError::UpstreamCompletion`], [`AnswerError::Cancelled`], and
//! [`AnswerError::InvalidRequest`] are ever returned as `Err` from the
//! orchestrator. Search and embedding failures are downgraded where they
//! happen (empty list, ungrounded verdict) and are only logged. The refusal
//! kinds describe terminal states of a successful [`Answer`](crate::orchestrator::Answer).

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnswerError {
    #[error("unsafe input refused")]
    UnsafeInput,

    #[error("prompt injection attempt detected")]
    PromptInjectionDetected,

    #[error("no evidence found for the question")]
    NoEvidenceFound,

    #[error("{strategy} search failed: {message}")]
    UpstreamSearch { strategy: String, message: String },

    #[error("embedding service failed: {0}")]
    UpstreamEmbedding(String),

    #[error("completion service failed: {0}")]
    UpstreamCompletion(String),

    #[error("answer is not grounded in the retrieved evidence")]
    UngroundedOutput,

    #[error("request cancelled before the completion finished")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl AnswerError {
    /// Machine-readable code used by the HTTP error contract.
    pub fn code(&self) -> &'static str {
        match self {
            AnswerError::UnsafeInput => "unsafe_input",
            AnswerError::PromptInjectionDetected => "prompt_injection",
            AnswerError::NoEvidenceFound => "no_evidence",
            AnswerError::UpstreamSearch { .. } => "search_failed",
            AnswerError::UpstreamEmbedding(_) => "embedding_failed",
            AnswerError::UpstreamCompletion(_) => "completion_failed",
            AnswerError::UngroundedOutput => "ungrounded_output",
            AnswerError::Cancelled => "cancelled",
            AnswerError::InvalidRequest(_) => "bad_request",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_includes_strategy() {
        let err = AnswerError::UpstreamSearch {
            strategy: "keyword".to_string(),
            message: "connection refused".to_string(),
        };
        assert_eq!(err.to_string(), "keyword search failed: connection refused");
        assert_eq!(err.code(), "search_failed");
    }
}
