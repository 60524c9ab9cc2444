use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Instant;

use index::{resolve_participants, IndexCache, IndexError, Participant, Repository};
use tracing::{debug, warn};
use vector::{cosine_similarity, validate_vector, FeatureVector};

use crate::metrics::MatchMetrics;
use crate::types::{
    validate_threshold, ConfidenceTier, FaceMatch, IndexLookup, MatchConfig, MatchError,
    MatchPath, MatchResult,
};


/// Resolves probe vectors to enrolled users of one event.
///
/// The cached [`index::SimilarityIndex`] is tried first. When it is not
/// built or cannot answer, the service falls back to comparing the probe
/// against every participant fetched fresh from the repository. Both paths
/// validate participants, score and round similarities, and truncate
/// candidates the same way, so they accept and reject identically.
pub struct MatchingService {
    cache: Arc<IndexCache>,
    repository: Arc<dyn Repository>,
    config: MatchConfig,
    metrics: Option<Arc<dyn MatchMetrics>>,
}

impl MatchingService {
    /// Construct a service over a shared cache; the repository is the cache's.
    pub fn new(cache: Arc<IndexCache>, config: MatchConfig) -> Result<Self, MatchError> {
        config.validate()?;
        if cache.dimension() != config.dimension {
            return Err(MatchError::InvalidConfig(format!(
                "cache dimension {} does not match config dimension {}",
                cache.dimension(),
                config.dimension
            )));
        }
        let repository = Arc::clone(cache.repository());
        Ok(Self {
            cache,
            repository,
            config,
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MatchMetrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn config(&self) -> &MatchConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<IndexCache> {
        &self.cache
    }

    /// Accepted matches for one probe, most similar first.
    ///
    /// `threshold` defaults to [`MatchConfig::default_threshold`]. A probe
    /// with the wrong length or zero norm yields no matches. Index failures
    /// never surface here; only a failed brute-force fetch does.
    pub async fn match_face(
        &self,
        event_id: &str,
        probe: &[f32],
        threshold: Option<f32>,
    ) -> Result<Vec<MatchResult>, MatchError> {
        let threshold = threshold.unwrap_or(self.config.default_threshold);
        validate_threshold("threshold", threshold)?;

        if let Err(err) = validate_vector(probe, self.config.dimension) {
            warn!(event_id = %event_id, error = %err, "probe_rejected");
            return Ok(Vec::new());
        }

        let start = Instant::now();
        let (path, results) = match self.match_indexed(event_id, probe, threshold).await {
            IndexLookup::Found(results) => (MatchPath::Indexed, results),
            IndexLookup::NotBuilt => {
                debug!(event_id = %event_id, "index_fallback_not_built");
                self.note_fallback(event_id, "not_built");
                let results = self.match_brute_force(event_id, probe, threshold).await?;
                (MatchPath::BruteForce, results)
            }
            IndexLookup::Error(reason) => {
                warn!(event_id = %event_id, reason = %reason, "index_fallback_error");
                self.note_fallback(event_id, &reason);
                let results = self.match_brute_force(event_id, probe, threshold).await?;
                (MatchPath::BruteForce, results)
            }
        };

        let latency = start.elapsed();
        debug!(
            event_id = %event_id,
            path = ?path,
            hits = results.len(),
            elapsed_micros = latency.as_micros() as u64,
            "match_face_completed"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_match(event_id, path, latency, results.len());
        }
        Ok(results)
    }

    /// Match every detected face of one photo, tagging results with their face index.
    pub async fn match_faces(
        &self,
        event_id: &str,
        faces: &[FeatureVector],
        threshold: Option<f32>,
    ) -> Result<Vec<FaceMatch>, MatchError> {
        let mut matches = Vec::new();
        for (face_index, face) in faces.iter().enumerate() {
            let results = self
                .match_face(event_id, face.as_slice(), threshold)
                .await?;
            matches.extend(
                results
                    .into_iter()
                    .map(|result| FaceMatch { face_index, result }),
            );
        }
        Ok(matches)
    }

    /// Try the cached index only. Never falls back and never errors.
    pub async fn match_indexed(&self, event_id: &str, probe: &[f32], threshold: f32) -> IndexLookup {
        let index = match self.cache.get_or_build(event_id).await {
            Ok(Some(index)) => index,
            Ok(None) => return IndexLookup::NotBuilt,
            Err(err) => return IndexLookup::Error(err.to_string()),
        };

        match index.find_nearest(probe, self.config.max_candidates) {
            Ok(candidates) => IndexLookup::Found(
                self.accept(
                    candidates
                        .into_iter()
                        .map(|c| (c.similarity, c.participant)),
                    threshold,
                ),
            ),
            Err(IndexError::NotBuilt { .. }) => IndexLookup::NotBuilt,
            Err(err) => IndexLookup::Error(err.to_string()),
        }
    }

    /// Compare the probe against every participant fetched fresh from the repository.
    pub async fn match_brute_force(
        &self,
        event_id: &str,
        probe: &[f32],
        threshold: f32,
    ) -> Result<Vec<MatchResult>, MatchError> {
        let records = self.repository.get_participant_vectors(event_id).await?;
        let participants = resolve_participants(event_id, records, self.config.dimension);

        let mut scored: Vec<(usize, f32, Arc<Participant>)> = Vec::with_capacity(participants.len());
        for (position, participant) in participants.into_iter().enumerate() {
            match cosine_similarity(probe, participant.reference.as_slice()) {
                Ok(similarity) => scored.push((position, similarity, Arc::new(participant))),
                Err(err) => {
                    debug!(
                        event_id = %event_id,
                        user_id = %participant.user_id,
                        error = %err,
                        "brute_force_comparison_skipped"
                    );
                }
            }
        }

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        scored.truncate(self.config.max_candidates);

        Ok(self.accept(
            scored
                .into_iter()
                .map(|(_, similarity, participant)| (similarity, participant)),
            threshold,
        ))
    }

    /// Drop the event's cached index so the next probe rebuilds it.
    pub fn invalidate_event(&self, event_id: &str) -> bool {
        self.cache.invalidate(event_id)
    }

    /// Threshold and tier candidates already in final order.
    ///
    /// Both decisions use the raw similarity; only the reported value is rounded.
    fn accept<I>(&self, candidates: I, threshold: f32) -> Vec<MatchResult>
    where
        I: IntoIterator<Item = (f32, Arc<Participant>)>,
    {
        candidates
            .into_iter()
            .filter_map(|(similarity, participant)| {
                if similarity < threshold {
                    return None;
                }
                Some(MatchResult {
                    user_id: participant.user_id.clone(),
                    name: participant.name.clone(),
                    similarity: round_similarity(similarity),
                    confidence: ConfidenceTier::for_similarity(
                        similarity,
                        self.config.high_confidence_threshold,
                    ),
                    participant,
                })
            })
            .collect()
    }

    fn note_fallback(&self, event_id: &str, reason: &str) {
        if let Some(metrics) = &self.metrics {
            metrics.record_fallback(event_id, reason);
        }
    }
}

impl std::fmt::Debug for MatchingService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MatchingService")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .field("metrics", &self.metrics.is_some())
            .finish()
    }
}

/// Round a similarity to four decimal places.
pub fn round_similarity(similarity: f32) -> f32 {
    ((similarity as f64 * 10_000.0).round() / 10_000.0) as f32
}
