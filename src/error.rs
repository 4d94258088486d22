use std::time::Duration;
use thiserror::Error;

/// Per-item evaluation failures, caught at the item boundary and turned
/// into a failed `ItemResult` so the batch keeps going. Fatal problems
/// (settings, prompt files, report persistence) stay on the `anyhow`
/// path at the binary boundary instead.
#[derive(Debug, Error)]
pub enum EvalError {
    /// The bot failed to produce a usable response for this prompt.
    #[error("response generation failed: {0}")]
    Generation(String),

    /// The judge model did not answer within the per-call timeout.
    #[error("judge model call timed out after {0:?}")]
    GradingTimeout(Duration),

    /// Transient network failure while reaching the judge model.
    #[error("judge model request failed: {0}")]
    GradingTransport(String),

    /// The judge model answered, but not in the expected verdict shape.
    #[error("judge model returned an unusable verdict: {0}")]
    Grading(String),
}

impl EvalError {
    /// Whether the batch runner should retry this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EvalError::GradingTimeout(_) | EvalError::GradingTransport(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_and_transport_are_retryable() {
        assert!(EvalError::GradingTimeout(Duration::from_secs(15)).is_retryable());
        assert!(EvalError::GradingTransport("connection reset".to_string()).is_retryable());
    }

    #[test]
    fn shape_and_generation_errors_are_not_retryable() {
        assert!(!EvalError::Grading("missing score field".to_string()).is_retryable());
        assert!(!EvalError::Generation("empty completion".to_string()).is_retryable());
    }
}
