//! Batch processing of one event's uploaded photos.
//!
//! A run claims its event in the [`RunRegistry`], resolves the enrolled
//! participants, then walks the photos in sub-batches of
//! `cleanup_interval`. Within a sub-batch up to `max_workers` photos are in
//! flight at once; results are consumed in upload order. Each photo goes
//! through encoding, matching, and persistence, and any failure there is
//! recorded against that photo alone. When every photo is done, matches are
//! grouped by user and handed to the [`NotificationDispatcher`].

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use chrono::Utc;
use futures::stream::{self, StreamExt};
use index::{
    MatchRecord, NewPhoto, Participant, Repository, StoredPhoto, resolve_participants,
};
use matcher::{MatchResult, MatchingService};
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, info, info_span, warn};
use vector::FeatureVector;

use crate::encoder::FaceEncoder;
use crate::error::PipelineError;
use crate::notify::{NotificationDispatcher, NotificationTransport, UserMatches};
use crate::runs::{RunGuard, RunRegistry, RunStatus};

/// Tuning for [`ProcessingPipeline`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Minimum similarity for a face to count as a match.
    pub similarity_threshold: f32,
    /// Photos in flight at once within one run.
    pub max_workers: usize,
    /// Encoder calls in flight at once across all runs.
    pub encoder_concurrency: usize,
    /// Photos per sub-batch; encoder buffers are released after each.
    pub cleanup_interval: usize,
    /// Upper bound on a whole run. `None` waits indefinitely.
    pub run_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: 0.93,
            max_workers: 4,
            encoder_concurrency: 4,
            cleanup_interval: 10,
            run_timeout: None,
        }
    }
}

impl PipelineConfig {
    pub fn with_similarity_threshold(mut self, threshold: f32) -> Self {
        self.similarity_threshold = threshold;
        self
    }

    pub fn with_max_workers(mut self, max_workers: usize) -> Self {
        self.max_workers = max_workers;
        self
    }

    pub fn with_encoder_concurrency(mut self, concurrency: usize) -> Self {
        self.encoder_concurrency = concurrency;
        self
    }

    pub fn with_cleanup_interval(mut self, interval: usize) -> Self {
        self.cleanup_interval = interval;
        self
    }

    pub fn with_run_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.run_timeout = timeout;
        self
    }

    pub fn validate(&self) -> Result<(), PipelineError> {
        if !self.similarity_threshold.is_finite()
            || !(-1.0..=1.0).contains(&self.similarity_threshold)
        {
            return Err(PipelineError::InvalidConfig(
                "similarity_threshold must be within [-1.0, 1.0]".into(),
            ));
        }
        if self.max_workers == 0 {
            return Err(PipelineError::InvalidConfig(
                "max_workers must be >= 1".into(),
            ));
        }
        if self.encoder_concurrency == 0 {
            return Err(PipelineError::InvalidConfig(
                "encoder_concurrency must be >= 1".into(),
            ));
        }
        if self.cleanup_interval == 0 {
            return Err(PipelineError::InvalidConfig(
                "cleanup_interval must be >= 1".into(),
            ));
        }
        if self.run_timeout.is_some_and(|t| t.is_zero()) {
            return Err(PipelineError::InvalidConfig(
                "run_timeout must be greater than zero".into(),
            ));
        }
        Ok(())
    }
}

/// One uploaded photo.
#[derive(Debug, Clone)]
pub struct PhotoUpload {
    /// Name the photo is stored and deduplicated under within its event.
    pub file_name: String,
    pub data: Bytes,
    pub uploaded_by: String,
}

impl PhotoUpload {
    pub fn new<S: Into<String>, B: Into<Bytes>>(file_name: S, data: B) -> Self {
        Self {
            file_name: file_name.into(),
            data: data.into(),
            uploaded_by: "system".to_string(),
        }
    }

    pub fn with_uploader<S: Into<String>>(mut self, uploaded_by: S) -> Self {
        self.uploaded_by = uploaded_by.into();
        self
    }
}

/// Stage at which a photo failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Encoder,
    Matching,
    Persistence,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhotoFailure {
    pub file_name: String,
    pub kind: FailureKind,
    pub reason: String,
}

/// Aggregate outcome of one run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProcessingResult {
    pub event_id: String,
    pub photos_total: usize,
    /// Photos that went through every stage, with or without faces.
    pub photos_processed: usize,
    pub photos_failed: usize,
    pub faces_detected: usize,
    /// Faces whose best candidate passed the threshold. A failed photo adds
    /// only the matches it wrote before failing.
    pub matches_found: usize,
    pub users_with_matches: usize,
    pub notifications_sent: usize,
    pub notification_failures: usize,
    pub failed_addresses: Vec<String>,
    pub failures: Vec<PhotoFailure>,
    /// Per-user matches in enrollment order.
    pub matched_users: Vec<UserMatches>,
    pub elapsed_time: Duration,
}

impl ProcessingResult {
    fn empty(event_id: &str, photos_total: usize) -> Self {
        Self {
            event_id: event_id.to_string(),
            photos_total,
            photos_processed: 0,
            photos_failed: 0,
            faces_detected: 0,
            matches_found: 0,
            users_with_matches: 0,
            notifications_sent: 0,
            notification_failures: 0,
            failed_addresses: Vec::new(),
            failures: Vec::new(),
            matched_users: Vec::new(),
            elapsed_time: Duration::ZERO,
        }
    }
}

enum PhotoOutcome {
    Done {
        file_name: String,
        faces: usize,
        /// Best accepted match of each face that had one.
        matches: Vec<MatchResult>,
    },
    Failed {
        failure: PhotoFailure,
        /// Faces detected before the failure.
        faces: usize,
        /// Matches already written when the failure hit.
        persisted: Vec<MatchResult>,
    },
}

impl PhotoOutcome {
    fn failed(file_name: &str, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self::failed_after(file_name, kind, reason, 0, Vec::new())
    }

    fn failed_after(
        file_name: &str,
        kind: FailureKind,
        reason: impl Into<String>,
        faces: usize,
        persisted: Vec<MatchResult>,
    ) -> Self {
        PhotoOutcome::Failed {
            failure: PhotoFailure {
                file_name: file_name.to_string(),
                kind,
                reason: reason.into(),
            },
            faces,
            persisted,
        }
    }
}

/// Orchestrates photo batches, at most one in flight per event.
pub struct ProcessingPipeline {
    repository: Arc<dyn Repository>,
    matcher: Arc<MatchingService>,
    encoder: Arc<dyn FaceEncoder>,
    dispatcher: NotificationDispatcher,
    config: PipelineConfig,
    runs: RunRegistry,
    encoder_permits: Arc<Semaphore>,
}

impl ProcessingPipeline {
    pub fn new(
        matcher: Arc<MatchingService>,
        encoder: Arc<dyn FaceEncoder>,
        transport: Arc<dyn NotificationTransport>,
        config: PipelineConfig,
    ) -> Result<Self, PipelineError> {
        config.validate()?;
        let repository = Arc::clone(matcher.cache().repository());
        let encoder_permits = Arc::new(Semaphore::new(config.encoder_concurrency));
        Ok(Self {
            repository,
            matcher,
            encoder,
            dispatcher: NotificationDispatcher::new(transport),
            config,
            runs: RunRegistry::new(),
            encoder_permits,
        })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn matcher(&self) -> &Arc<MatchingService> {
        &self.matcher
    }

    /// Progress of the event's active run, or `None` when it is idle.
    pub fn processing_status(&self, event_id: &str) -> Option<RunStatus> {
        self.runs.status(event_id)
    }

    pub fn is_processing(&self, event_id: &str) -> bool {
        self.runs.is_active(event_id)
    }

    pub fn active_events(&self) -> Vec<String> {
        self.runs.active_events()
    }

    /// Process a batch of photos for one event.
    ///
    /// Fails with [`PipelineError::AlreadyProcessing`] while another batch
    /// for the event is running. The event is released on every exit path.
    pub async fn process_photos(
        &self,
        event_id: &str,
        photos: Vec<PhotoUpload>,
    ) -> Result<ProcessingResult, PipelineError> {
        let Some(guard) = self.runs.try_start(event_id, photos.len()) else {
            warn!(event_id = %event_id, "processing_rejected_already_active");
            return Err(PipelineError::AlreadyProcessing {
                event_id: event_id.to_string(),
            });
        };

        let span = info_span!("pipeline.run", event_id = %event_id, photos = photos.len());
        let run = self.run(&guard, photos).instrument(span);
        let outcome = match self.config.run_timeout {
            Some(limit) => match tokio::time::timeout(limit, run).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    warn!(
                        event_id = %event_id,
                        completed = guard.completed(),
                        timeout_secs = limit.as_secs(),
                        "processing_timed_out"
                    );
                    Err(PipelineError::TimedOut {
                        event_id: event_id.to_string(),
                        secs: limit.as_secs(),
                    })
                }
            },
            None => run.await,
        };

        drop(guard);
        outcome
    }

    async fn run(
        &self,
        guard: &RunGuard<'_>,
        photos: Vec<PhotoUpload>,
    ) -> Result<ProcessingResult, PipelineError> {
        let started = Instant::now();
        let event_id = guard.event_id();
        let mut result = ProcessingResult::empty(event_id, photos.len());

        let event = self.repository.get_event(event_id).await?.ok_or_else(|| {
            PipelineError::EventNotFound {
                event_id: event_id.to_string(),
            }
        })?;

        let records = self.repository.get_participant_vectors(event_id).await?;
        let participants =
            resolve_participants(event_id, records, self.matcher.config().dimension);
        if participants.is_empty() {
            info!(event_id = %event_id, "processing_skipped_no_participants");
            result.elapsed_time = started.elapsed();
            return Ok(result);
        }
        info!(
            event_id = %event_id,
            participants = participants.len(),
            photos = photos.len(),
            "processing_started"
        );

        let mut aggregate = MatchAggregate::new(&participants);
        let mut remaining = photos.into_iter().peekable();
        while remaining.peek().is_some() {
            let chunk: Vec<PhotoUpload> =
                remaining.by_ref().take(self.config.cleanup_interval).collect();

            let outcomes: Vec<PhotoOutcome> = stream::iter(chunk)
                .map(|photo| self.process_photo(guard, photo))
                .buffered(self.config.max_workers)
                .collect()
                .await;

            for outcome in outcomes {
                match outcome {
                    PhotoOutcome::Done {
                        file_name,
                        faces,
                        matches,
                    } => {
                        result.photos_processed += 1;
                        result.faces_detected += faces;
                        result.matches_found += matches.len();
                        aggregate.add(&file_name, &matches);
                    }
                    PhotoOutcome::Failed {
                        failure,
                        faces,
                        persisted,
                    } => {
                        result.photos_failed += 1;
                        result.faces_detected += faces;
                        result.matches_found += persisted.len();
                        aggregate.add(&failure.file_name, &persisted);
                        result.failures.push(failure);
                    }
                }
            }

            self.encoder.release_buffers();
            debug!(
                event_id = %event_id,
                completed = result.photos_processed + result.photos_failed,
                "encoder_buffers_released"
            );
        }

        let users = aggregate.into_users();
        result.users_with_matches = users.len();

        let report = self.dispatcher.dispatch(&event, &users).await;
        result.notifications_sent = report.sent_count;
        result.notification_failures = report.failure_count();
        result.failed_addresses = report
            .failed_addresses()
            .into_iter()
            .map(str::to_string)
            .collect();
        result.matched_users = users;
        result.elapsed_time = started.elapsed();

        info!(
            event_id = %event_id,
            processed = result.photos_processed,
            failed = result.photos_failed,
            faces = result.faces_detected,
            matches = result.matches_found,
            users = result.users_with_matches,
            notified = result.notifications_sent,
            elapsed_ms = result.elapsed_time.as_millis() as u64,
            "processing_completed"
        );
        Ok(result)
    }

    async fn process_photo(&self, guard: &RunGuard<'_>, photo: PhotoUpload) -> PhotoOutcome {
        let outcome = self.process_photo_inner(guard.event_id(), photo).await;
        let done = guard.advance();
        if let PhotoOutcome::Failed { failure, .. } = &outcome {
            warn!(
                event_id = %guard.event_id(),
                file_name = %failure.file_name,
                kind = ?failure.kind,
                reason = %failure.reason,
                photo = done,
                "photo_failed"
            );
        }
        outcome
    }

    async fn process_photo_inner(&self, event_id: &str, photo: PhotoUpload) -> PhotoOutcome {
        let faces = match self.encode(photo.data.clone()).await {
            Ok(faces) => faces,
            Err(reason) => return PhotoOutcome::failed(&photo.file_name, FailureKind::Encoder, reason),
        };
        if faces.is_empty() {
            debug!(event_id = %event_id, file_name = %photo.file_name, "photo_no_faces");
            return PhotoOutcome::Done {
                file_name: photo.file_name,
                faces: 0,
                matches: Vec::new(),
            };
        }

        let mut best_per_face: Vec<(usize, MatchResult)> = Vec::new();
        for (face_index, face) in faces.iter().enumerate() {
            match self
                .matcher
                .match_face(event_id, face.as_slice(), Some(self.config.similarity_threshold))
                .await
            {
                Ok(results) => {
                    if let Some(best) = results.into_iter().next() {
                        best_per_face.push((face_index, best));
                    }
                }
                Err(err) => {
                    return PhotoOutcome::failed_after(
                        &photo.file_name,
                        FailureKind::Matching,
                        err.to_string(),
                        faces.len(),
                        Vec::new(),
                    );
                }
            }
        }

        let stored = match self.resolve_photo(event_id, &photo).await {
            Ok(stored) => stored,
            Err(reason) => {
                return PhotoOutcome::failed_after(
                    &photo.file_name,
                    FailureKind::Persistence,
                    reason,
                    faces.len(),
                    Vec::new(),
                );
            }
        };

        let mut persisted = Vec::new();
        if let Err(reason) = self
            .save_matches(event_id, &stored, &best_per_face, &mut persisted)
            .await
        {
            return PhotoOutcome::failed_after(
                &photo.file_name,
                FailureKind::Persistence,
                reason,
                faces.len(),
                persisted,
            );
        }

        PhotoOutcome::Done {
            file_name: photo.file_name,
            faces: faces.len(),
            matches: best_per_face.into_iter().map(|(_, best)| best).collect(),
        }
    }

    async fn encode(&self, data: Bytes) -> Result<Vec<FeatureVector>, String> {
        // The blocking task owns the permit, so a dropped run cannot free it early.
        let permit = Arc::clone(&self.encoder_permits)
            .acquire_owned()
            .await
            .map_err(|err| err.to_string())?;
        let encoder = Arc::clone(&self.encoder);
        tokio::task::spawn_blocking(move || {
            let _permit = permit;
            encoder.extract_faces(&data)
        })
            .await
            .map_err(|err| format!("encoder task failed: {err}"))?
            .map_err(|err| err.to_string())
    }

    /// Reuse the stored photo with this file name, or create it.
    async fn resolve_photo(
        &self,
        event_id: &str,
        photo: &PhotoUpload,
    ) -> Result<StoredPhoto, String> {
        let existing = self
            .repository
            .find_photo(event_id, &photo.file_name)
            .await
            .map_err(|err| err.to_string())?;
        if let Some(stored) = existing {
            debug!(event_id = %event_id, photo_id = %stored.photo_id, "photo_reused");
            return Ok(stored);
        }
        self.repository
            .save_photo(NewPhoto {
                event_id: event_id.to_string(),
                file_name: photo.file_name.clone(),
                size_bytes: photo.data.len(),
                uploaded_by: photo.uploaded_by.clone(),
            })
            .await
            .map_err(|err| err.to_string())
    }

    /// Upsert one record per matched user, keeping the user's strongest face.
    async fn save_matches(
        &self,
        event_id: &str,
        stored: &StoredPhoto,
        best_per_face: &[(usize, MatchResult)],
        persisted: &mut Vec<MatchResult>,
    ) -> Result<(), String> {
        let mut strongest: Vec<(usize, &MatchResult)> = Vec::new();
        for (face_index, best) in best_per_face {
            match strongest.iter_mut().find(|(_, m)| m.user_id == best.user_id) {
                Some(slot) if best.similarity > slot.1.similarity => *slot = (*face_index, best),
                Some(_) => {}
                None => strongest.push((*face_index, best)),
            }
        }

        for (face_index, best) in strongest {
            self.repository
                .save_match(MatchRecord {
                    user_id: best.user_id.clone(),
                    event_id: event_id.to_string(),
                    photo_id: stored.photo_id.clone(),
                    similarity: best.similarity,
                    face_index,
                    matched_at: Utc::now(),
                })
                .await
                .map_err(|err| err.to_string())?;
            persisted.push(best.clone());
        }
        Ok(())
    }
}

/// Photos per matched user, remembered in enrollment order.
struct MatchAggregate {
    order: HashMap<String, usize>,
    users: HashMap<String, UserMatches>,
}

impl MatchAggregate {
    fn new(participants: &[Participant]) -> Self {
        let order = participants
            .iter()
            .enumerate()
            .map(|(position, p)| (p.user_id.clone(), position))
            .collect();
        Self {
            order,
            users: HashMap::new(),
        }
    }

    fn add(&mut self, file_name: &str, matches: &[MatchResult]) {
        for matched in matches {
            let entry = self
                .users
                .entry(matched.user_id.clone())
                .or_insert_with(|| UserMatches {
                    user_id: matched.user_id.clone(),
                    name: matched.participant.name.clone(),
                    email: matched.participant.email.clone(),
                    photos: Vec::new(),
                });
            if !entry.photos.iter().any(|p| p == file_name) {
                entry.photos.push(file_name.to_string());
            }
        }
    }

    fn into_users(self) -> Vec<UserMatches> {
        let order = self.order;
        let mut users: Vec<UserMatches> = self.users.into_values().collect();
        users.sort_by_key(|u| order.get(&u.user_id).copied().unwrap_or(usize::MAX));
        users
    }
}
