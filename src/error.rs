use thiserror::Error;

/// Error taxonomy for the indexing and search core.
///
/// Only [`CoreError::Configuration`] is fatal, and only at startup. Index and
/// embedding failures are absorbed inside the pipeline (retry, degrade,
/// dead-letter) and never surface as query-time errors.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Retryable failure against the vector or lexical index (network,
    /// timeout, poisoned writer).
    #[error("transient index error: {0}")]
    TransientIndex(String),

    /// The embedding model could not be loaded or reached. Retryable;
    /// degrades semantic capability while it persists.
    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    /// Input exceeds the embedding budget beyond what truncation covers.
    /// Non-retryable; the job is dropped with a recorded reason.
    #[error("input too large: {chars} chars exceeds budget of {budget}")]
    InputTooLarge { chars: usize, budget: usize },

    /// An in-flight write was superseded by a newer content version. This is
    /// an expected concurrency outcome, not a failure.
    #[error("write superseded by a newer content version")]
    StaleWrite,

    /// Invalid or missing configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl CoreError {
    /// Whether the pipeline should retry the job that produced this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CoreError::TransientIndex(_) | CoreError::ModelUnavailable(_)
        )
    }
}
