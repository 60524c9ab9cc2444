//! Workspace umbrella crate for event-scoped face matching.
//!
//! This crate drives the matching engine from the `index` and `matcher`
//! crates through whole photo batches: encode each photo's faces, match them
//! against the event's enrolled participants, persist the best match per
//! face, and notify every matched user once.
//!
//! ```no_run
//! use std::sync::Arc;
//! use facematch::{
//!     build_pipeline, FaceMatchConfig, LogTransport, PhotoUpload, PrecomputedVectorEncoder,
//! };
//! use index::InMemoryRepository;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = FaceMatchConfig::from_file("facematch.yaml")?;
//! let repository = Arc::new(InMemoryRepository::new());
//! let encoder = Arc::new(PrecomputedVectorEncoder::new(config.dimension()));
//! let pipeline = build_pipeline(&config, repository, encoder, Arc::new(LogTransport))?;
//!
//! let photos = vec![PhotoUpload::new("IMG_0001.jpg", Vec::new())];
//! let result = pipeline.process_photos("event-1", photos).await?;
//! println!("{} users matched", result.users_with_matches);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod encoder;
pub mod error;
pub mod notify;
pub mod pipeline;
pub mod runs;

use std::sync::Arc;

use index::{IndexCache, Repository};
use matcher::MatchingService;

pub use crate::config::{ConfigLoadError, FaceMatchConfig};
pub use crate::encoder::{EncoderError, FaceEncoder, PrecomputedVectorEncoder};
pub use crate::error::PipelineError;
pub use crate::notify::{
    DispatchFailure, DispatchReport, LogTransport, NotificationDispatcher, NotificationError,
    NotificationTransport, PhotoNotice, UserMatches,
};
pub use crate::pipeline::{
    FailureKind, PhotoFailure, PhotoUpload, PipelineConfig, ProcessingPipeline, ProcessingResult,
};
pub use crate::runs::{RunGuard, RunRegistry, RunStatus};

/// Wire a cache, matching service, and pipeline from one configuration.
pub fn build_pipeline(
    config: &FaceMatchConfig,
    repository: Arc<dyn Repository>,
    encoder: Arc<dyn FaceEncoder>,
    transport: Arc<dyn NotificationTransport>,
) -> Result<ProcessingPipeline, PipelineError> {
    let cache = Arc::new(IndexCache::new(
        repository,
        config.dimension(),
        config.ann_config(),
        config.cache_capacity(),
    ));
    let matcher = MatchingService::new(cache, config.match_config())
        .map_err(|err| PipelineError::InvalidConfig(err.to_string()))?;
    ProcessingPipeline::new(
        Arc::new(matcher),
        encoder,
        transport,
        config.pipeline_config(),
    )
}
