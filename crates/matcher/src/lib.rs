//! # Face Matcher (`matcher`)
//!
//! ## Purpose
//!
//! `matcher` sits on top of the index layer (`index`). It turns one probe
//! vector from an uploaded photo into the enrolled users it most likely
//! belongs to, applying the similarity threshold and confidence tiers.
//!
//! The cached per-event index is an optimization only. When an event has
//! fewer than two valid participants, or the index cannot answer, the
//! [`MatchingService`] compares the probe against every participant fetched
//! from the repository. [`IndexLookup`] makes that branch explicit so both
//! paths are tested directly.
//!
//! ## Core Types
//!
//! - [`MatchConfig`]: dimension, default and high-confidence thresholds,
//!   and the number of candidates inspected per probe.
//! - [`MatchResult`]: user id, rounded similarity, [`ConfidenceTier`], and
//!   the contributing participant.
//! - [`FaceMatch`]: a result tagged with the face it came from.
//!
//! ## Example Usage
//!
//! ```
//! use std::sync::Arc;
//! use index::{AnnConfig, IndexCache, InMemoryRepository, ParticipantRecord};
//! use matcher::{ConfidenceTier, MatchConfig, MatchingService};
//!
//! let repo = Arc::new(InMemoryRepository::new());
//! repo.enroll("evt", ParticipantRecord::new("alice", vec![1.0, 0.0])).unwrap();
//! repo.enroll("evt", ParticipantRecord::new("bob", vec![0.0, 1.0])).unwrap();
//!
//! let cache = Arc::new(IndexCache::new(repo, 2, AnnConfig::default(), 10));
//! let service = MatchingService::new(cache, MatchConfig::default().with_dimension(2)).unwrap();
//!
//! let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! let hits = rt.block_on(service.match_face("evt", &[0.99, 0.05], None)).unwrap();
//! assert_eq!(hits[0].user_id, "alice");
//! assert_eq!(hits[0].confidence, ConfidenceTier::High);
//! ```
//!
//! ## Observability
//!
//! Pass a [`MatchMetrics`] implementation to
//! [`MatchingService::with_metrics`] to record per-probe latency, hit counts,
//! and fallbacks.

pub mod engine;
pub mod metrics;
pub mod types;

pub use crate::engine::{round_similarity, MatchingService};
pub use crate::metrics::MatchMetrics;
pub use crate::types::{
    ConfidenceTier, FaceMatch, IndexLookup, MatchConfig, MatchError, MatchPath, MatchResult,
};
