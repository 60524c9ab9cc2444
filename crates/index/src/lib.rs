//! # Face Index
//!
//! Per-event nearest-neighbor lookup over enrolled reference vectors.
//!
//! ## Core Pieces
//!
//! - [`Participant`]: a validated enrollment. Raw repository rows
//!   ([`ParticipantRecord`]) are checked once at this boundary, so missing
//!   fields or malformed vectors never reach matching code.
//! - [`Repository`]: the storage collaborator for events, participants,
//!   photos, and match records. [`InMemoryRepository`] backs tests and demos.
//! - [`SimilarityIndex`]: an immutable per-event index. Small events are
//!   scanned exactly; large ones use HNSW (cosine) to narrow candidates.
//!   Returned similarities are always exact.
//! - [`IndexCache`]: a bounded map from event id to index that evicts the
//!   least-recently-used half when full and never caches a failed build.
//!
//! ## Example Usage
//!
//! ```
//! use std::sync::Arc;
//! use index::{AnnConfig, IndexCache, InMemoryRepository, ParticipantRecord};
//!
//! let repo = Arc::new(InMemoryRepository::new());
//! repo.enroll("evt-1", ParticipantRecord::new("alice", vec![1.0, 0.0, 0.0])).unwrap();
//! repo.enroll("evt-1", ParticipantRecord::new("bob", vec![0.0, 1.0, 0.0])).unwrap();
//!
//! let cache = IndexCache::new(repo, 3, AnnConfig::default(), 10);
//! let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
//! let index = rt.block_on(cache.get_or_build("evt-1")).unwrap().unwrap();
//!
//! let nearest = index.find_nearest(&[0.9, 0.1, 0.0], 1).unwrap();
//! assert_eq!(nearest[0].participant.user_id, "alice");
//! ```

pub mod ann;
mod backend;
mod cache;
mod error;
mod participant;

pub use crate::ann::{AnnConfig, Candidate, SimilarityIndex, MIN_PARTICIPANTS};
pub use crate::backend::{
    EventInfo, InMemoryRepository, MatchRecord, NewPhoto, Repository, StoredPhoto,
};
pub use crate::cache::{CacheStats, CachedEventStats, IndexCache, DEFAULT_CACHE_CAPACITY};
pub use crate::error::{IndexError, ParticipantError, RepositoryError};
pub use crate::participant::{resolve_participants, Participant, ParticipantRecord};
