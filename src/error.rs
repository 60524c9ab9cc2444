use index::RepositoryError;
use thiserror::Error;

/// Batch-wide failures of [`ProcessingPipeline::process_photos`].
///
/// Per-photo and per-face problems never show up here; they are counted in
/// the [`ProcessingResult`] instead.
///
/// [`ProcessingPipeline::process_photos`]: crate::ProcessingPipeline::process_photos
/// [`ProcessingResult`]: crate::ProcessingResult
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Another batch for the same event is still running. Retry later.
    #[error("event {event_id} is already being processed")]
    AlreadyProcessing { event_id: String },

    #[error("event {event_id} not found")]
    EventNotFound { event_id: String },

    /// Event or participant lookup failed; the run cannot proceed.
    #[error("repository failure: {0}")]
    Repository(#[from] RepositoryError),

    #[error("processing of event {event_id} timed out after {secs}s")]
    TimedOut { event_id: String, secs: u64 },

    #[error("invalid pipeline config: {0}")]
    InvalidConfig(String),
}

impl PipelineError {
    /// Whether the caller may simply retry the same request later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PipelineError::AlreadyProcessing { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_already_processing_is_retryable() {
        assert!(PipelineError::AlreadyProcessing {
            event_id: "e".into()
        }
        .is_retryable());
        assert!(!PipelineError::EventNotFound {
            event_id: "e".into()
        }
        .is_retryable());
        assert!(!PipelineError::Repository(RepositoryError::backend("down")).is_retryable());
    }

    #[test]
    fn messages_name_the_event() {
        let err = PipelineError::TimedOut {
            event_id: "evt-9".into(),
            secs: 30,
        };
        assert_eq!(
            err.to_string(),
            "processing of event evt-9 timed out after 30s"
        );
    }
}
