//! Per-event nearest-neighbor search over enrolled reference vectors.
//!
//! A [`SimilarityIndex`] is built once from one event's participants and is
//! immutable afterwards, so it can be shared behind an `Arc` while the cache
//! evicts or replaces it. By default every lookup scans all participants
//! exactly. With [`AnnConfig::enabled`] set, events at or above
//! [`AnnConfig::min_vectors_for_ann`] use an HNSW graph (cosine metric) to
//! narrow candidates first.
//!
//! The graph only narrows. Every returned candidate is re-scored
//! with the exact cosine similarity against the participant's original
//! reference vector, so threshold decisions never depend on approximate
//! graph distances. The narrowed set itself is approximate, though: a
//! neighbour the graph misses is never scored. The exact scan is the only
//! mode whose candidate lists always equal a brute-force comparison.

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use hnsw_rs::prelude::*;
use tracing::debug;
use vector::{cosine_similarity, normalize, validate_vector};

use crate::{IndexError, Participant};

/// Smallest graph hnsw_rs handles reliably; below it the exact scan is used.
const MIN_HNSW_ELEMENTS: usize = 10;

/// Minimum number of valid participants a built index needs.
pub const MIN_PARTICIPANTS: usize = 2;

/// Configuration for index construction and search.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnConfig {
    /// Number of neighbors per node (higher = better recall, slower build).
    /// Default: 16
    pub m: usize,
    /// Size of dynamic candidate list during construction.
    /// Default: 200
    pub ef_construction: usize,
    /// Size of dynamic candidate list during search. Raised to `k` when smaller.
    /// Default: 50
    pub ef_search: usize,
    /// Whether to use HNSW at all or always scan exactly. HNSW trades exact
    /// parity with brute force for lookup speed on very large events.
    /// Default: false
    pub enabled: bool,
    /// Minimum number of participants before HNSW is used.
    /// Default: 1000
    pub min_vectors_for_ann: usize,
}

impl Default for AnnConfig {
    fn default() -> Self {
        Self {
            m: 16,
            ef_construction: 200,
            ef_search: 50,
            enabled: false,
            min_vectors_for_ann: 1000,
        }
    }
}

impl AnnConfig {
    pub fn with_m(mut self, m: usize) -> Self {
        self.m = m;
        self
    }

    pub fn with_ef_construction(mut self, ef: usize) -> Self {
        self.ef_construction = ef;
        self
    }

    pub fn with_ef_search(mut self, ef: usize) -> Self {
        self.ef_search = ef;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_min_vectors_for_ann(mut self, min: usize) -> Self {
        self.min_vectors_for_ann = min;
        self
    }

    /// Check if HNSW should be used given the number of indexed vectors.
    pub fn should_use_ann(&self, num_vectors: usize) -> bool {
        self.enabled && num_vectors >= self.min_vectors_for_ann.max(MIN_HNSW_ELEMENTS)
    }
}

/// One candidate returned by [`SimilarityIndex::find_nearest`].
#[derive(Debug, Clone)]
pub struct Candidate {
    /// Enrollment position inside the index; lower wins ties.
    pub position: usize,
    /// Exact cosine similarity between the probe and the reference vector.
    pub similarity: f32,
    pub participant: Arc<Participant>,
}

/// Nearest-neighbor structure over one event's reference vectors.
pub struct SimilarityIndex {
    event_id: String,
    dimension: usize,
    participants: Vec<Arc<Participant>>,
    hnsw: Option<Hnsw<'static, f32, DistCosine>>,
    config: AnnConfig,
    built_at: DateTime<Utc>,
    built: bool,
}

impl SimilarityIndex {
    /// Build from already validated participants.
    ///
    /// Each vector is normalized independently; any that still fails (wrong
    /// length, zero norm) is excluded. With fewer than [`MIN_PARTICIPANTS`]
    /// survivors the returned index reports `is_built() == false`.
    pub fn build(
        event_id: &str,
        participants: Vec<Participant>,
        dimension: usize,
        config: AnnConfig,
    ) -> Self {
        let mut kept = Vec::with_capacity(participants.len());
        let mut normalized = Vec::with_capacity(participants.len());

        for participant in participants {
            let reference = participant.reference.as_slice();
            match validate_vector(reference, dimension).and_then(|_| normalize(reference)) {
                Ok(unit) => {
                    normalized.push(unit);
                    kept.push(Arc::new(participant));
                }
                Err(err) => {
                    debug!(
                        event_id = %event_id,
                        user_id = %participant.user_id,
                        error = %err,
                        "index_participant_excluded"
                    );
                }
            }
        }

        let built = kept.len() >= MIN_PARTICIPANTS;
        let hnsw = if built && config.should_use_ann(normalized.len()) {
            Some(build_hnsw(&normalized, &config))
        } else {
            None
        };

        Self {
            event_id: event_id.to_string(),
            dimension,
            participants: kept,
            hnsw,
            config,
            built_at: Utc::now(),
            built,
        }
    }

    /// Return up to `k` candidates ordered by descending exact similarity.
    ///
    /// Ties break by enrollment order.
    pub fn find_nearest(&self, probe: &[f32], k: usize) -> Result<Vec<Candidate>, IndexError> {
        if !self.built {
            return Err(IndexError::NotBuilt {
                event_id: self.event_id.clone(),
            });
        }
        validate_vector(probe, self.dimension)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let positions = match &self.hnsw {
            Some(hnsw) => self.hnsw_positions(hnsw, &normalize(probe)?, k),
            None => (0..self.participants.len()).collect(),
        };

        let mut candidates = Vec::with_capacity(positions.len());
        for position in positions {
            let participant = &self.participants[position];
            let similarity = cosine_similarity(probe, participant.reference.as_slice())?;
            candidates.push(Candidate {
                position,
                similarity,
                participant: Arc::clone(participant),
            });
        }

        candidates.sort_by(compare_candidates);
        candidates.truncate(k);
        Ok(candidates)
    }

    fn hnsw_positions(
        &self,
        hnsw: &Hnsw<'static, f32, DistCosine>,
        unit_probe: &[f32],
        k: usize,
    ) -> Vec<usize> {
        // A full search beam, not just k; exact re-scoring picks the top k.
        let knn = self.config.ef_search.max(k).min(self.participants.len());
        let ef = self.config.ef_search.max(knn);
        let mut positions: Vec<usize> = hnsw
            .search(unit_probe, knn, ef)
            .into_iter()
            .map(|neighbour| neighbour.get_origin_id())
            .filter(|position| *position < self.participants.len())
            .collect();
        positions.sort_unstable();
        positions.dedup();
        positions
    }

    pub fn event_id(&self) -> &str {
        &self.event_id
    }

    pub fn participants(&self) -> &[Arc<Participant>] {
        &self.participants
    }

    /// Number of indexed participants.
    pub fn len(&self) -> usize {
        self.participants.len()
    }

    pub fn is_empty(&self) -> bool {
        self.participants.is_empty()
    }

    pub fn is_built(&self) -> bool {
        self.built
    }

    /// Whether lookups go through the HNSW graph rather than an exact scan.
    pub fn uses_ann(&self) -> bool {
        self.hnsw.is_some()
    }

    pub fn built_at(&self) -> DateTime<Utc> {
        self.built_at
    }

    pub fn config(&self) -> &AnnConfig {
        &self.config
    }
}

impl std::fmt::Debug for SimilarityIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SimilarityIndex")
            .field("event_id", &self.event_id)
            .field("dimension", &self.dimension)
            .field("participants", &self.participants.len())
            .field("uses_ann", &self.hnsw.is_some())
            .field("built", &self.built)
            .finish()
    }
}

fn build_hnsw(normalized: &[Vec<f32>], config: &AnnConfig) -> Hnsw<'static, f32, DistCosine> {
    let nb_elem = normalized.len();
    let nb_layer = 16.min((nb_elem as f32).ln().trunc() as usize).max(1);

    let hnsw = Hnsw::<f32, DistCosine>::new(
        config.m,
        nb_elem,
        nb_layer,
        config.ef_construction,
        DistCosine {},
    );

    // The origin id of every point is its enrollment position.
    let data_for_insertion: Vec<(&Vec<f32>, usize)> = normalized
        .iter()
        .enumerate()
        .map(|(idx, vec)| (vec, idx))
        .collect();
    hnsw.parallel_insert(&data_for_insertion);
    hnsw
}

fn compare_candidates(a: &Candidate, b: &Candidate) -> Ordering {
    b.similarity
        .partial_cmp(&a.similarity)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.position.cmp(&b.position))
}
