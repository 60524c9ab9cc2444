use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{ParticipantRecord, RepositoryError};

/// Event metadata needed to address notifications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventInfo {
    pub event_id: String,
    pub name: String,
    pub event_code: String,
}

/// Photo metadata submitted for storage. Blob bytes live elsewhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewPhoto {
    pub event_id: String,
    pub file_name: String,
    pub size_bytes: usize,
    pub uploaded_by: String,
}

/// A persisted event photo.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPhoto {
    pub photo_id: String,
    pub event_id: String,
    pub file_name: String,
    pub size_bytes: usize,
    pub uploaded_by: String,
    pub uploaded_at: DateTime<Utc>,
}

/// A stored face match. Unique per `(event_id, photo_id, user_id)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchRecord {
    pub user_id: String,
    pub event_id: String,
    pub photo_id: String,
    pub similarity: f32,
    pub face_index: usize,
    pub matched_at: DateTime<Utc>,
}

/// Persistent store for events, participants, photos, and matches.
///
/// Shared across concurrently processed events, so implementations must be
/// `Send + Sync`. Every call is a suspension point for the caller.
#[async_trait]
pub trait Repository: Send + Sync {
    async fn get_event(&self, event_id: &str) -> Result<Option<EventInfo>, RepositoryError>;

    /// Enrolled participants with their reference vectors, in enrollment order.
    async fn get_participant_vectors(
        &self,
        event_id: &str,
    ) -> Result<Vec<ParticipantRecord>, RepositoryError>;

    /// Look up an already stored photo by its file name within an event.
    async fn find_photo(
        &self,
        event_id: &str,
        file_name: &str,
    ) -> Result<Option<StoredPhoto>, RepositoryError>;

    async fn save_photo(&self, photo: NewPhoto) -> Result<StoredPhoto, RepositoryError>;

    /// Idempotent upsert keyed by `(event_id, photo_id, user_id)`.
    async fn save_match(&self, record: MatchRecord) -> Result<(), RepositoryError>;

    async fn matches_for_user(
        &self,
        event_id: &str,
        user_id: &str,
    ) -> Result<Vec<MatchRecord>, RepositoryError>;
}

#[derive(Default)]
struct Tables {
    events: HashMap<String, EventInfo>,
    participants: HashMap<String, Vec<ParticipantRecord>>,
    photos: HashMap<String, StoredPhoto>,
    photo_names: HashMap<(String, String), String>,
    matches: HashMap<(String, String, String), MatchRecord>,
}

/// An in-memory repository using a `RwLock` around plain maps.
///
/// Useful for tests, demos, and single-process deployments.
#[derive(Default)]
pub struct InMemoryRepository {
    tables: RwLock<Tables>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> Result<std::sync::RwLockReadGuard<'_, Tables>, RepositoryError> {
        self.tables
            .read()
            .map_err(|_| RepositoryError::backend("poisoned lock"))
    }

    fn write(&self) -> Result<std::sync::RwLockWriteGuard<'_, Tables>, RepositoryError> {
        self.tables
            .write()
            .map_err(|_| RepositoryError::backend("poisoned lock"))
    }

    pub fn add_event(&self, event: EventInfo) -> Result<(), RepositoryError> {
        self.write()?.events.insert(event.event_id.clone(), event);
        Ok(())
    }

    /// Enroll a participant, superseding any earlier reference for the same user.
    ///
    /// Callers holding a cached index for the event must invalidate it.
    pub fn enroll(&self, event_id: &str, record: ParticipantRecord) -> Result<(), RepositoryError> {
        let mut tables = self.write()?;
        let rows = tables.participants.entry(event_id.to_string()).or_default();
        match rows.iter_mut().find(|row| row.user_id == record.user_id) {
            Some(existing) => *existing = record,
            None => rows.push(record),
        }
        Ok(())
    }

    pub fn match_count(&self) -> Result<usize, RepositoryError> {
        Ok(self.read()?.matches.len())
    }

    pub fn photo_count(&self) -> Result<usize, RepositoryError> {
        Ok(self.read()?.photos.len())
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    async fn get_event(&self, event_id: &str) -> Result<Option<EventInfo>, RepositoryError> {
        Ok(self.read()?.events.get(event_id).cloned())
    }

    async fn get_participant_vectors(
        &self,
        event_id: &str,
    ) -> Result<Vec<ParticipantRecord>, RepositoryError> {
        Ok(self
            .read()?
            .participants
            .get(event_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn find_photo(
        &self,
        event_id: &str,
        file_name: &str,
    ) -> Result<Option<StoredPhoto>, RepositoryError> {
        let tables = self.read()?;
        let key = (event_id.to_string(), file_name.to_string());
        Ok(tables
            .photo_names
            .get(&key)
            .and_then(|photo_id| tables.photos.get(photo_id))
            .cloned())
    }

    async fn save_photo(&self, photo: NewPhoto) -> Result<StoredPhoto, RepositoryError> {
        let mut tables = self.write()?;
        let key = (photo.event_id.clone(), photo.file_name.clone());
        if let Some(existing) = tables
            .photo_names
            .get(&key)
            .and_then(|photo_id| tables.photos.get(photo_id))
        {
            return Ok(existing.clone());
        }

        let stored = StoredPhoto {
            photo_id: uuid::Uuid::new_v4().to_string(),
            event_id: photo.event_id,
            file_name: photo.file_name,
            size_bytes: photo.size_bytes,
            uploaded_by: photo.uploaded_by,
            uploaded_at: Utc::now(),
        };
        tables.photo_names.insert(key, stored.photo_id.clone());
        tables
            .photos
            .insert(stored.photo_id.clone(), stored.clone());
        Ok(stored)
    }

    async fn save_match(&self, record: MatchRecord) -> Result<(), RepositoryError> {
        let mut tables = self.write()?;
        if !tables.photos.contains_key(&record.photo_id) {
            return Err(RepositoryError::NotFound(format!(
                "photo {}",
                record.photo_id
            )));
        }
        let key = (
            record.event_id.clone(),
            record.photo_id.clone(),
            record.user_id.clone(),
        );
        tables.matches.insert(key, record);
        Ok(())
    }

    async fn matches_for_user(
        &self,
        event_id: &str,
        user_id: &str,
    ) -> Result<Vec<MatchRecord>, RepositoryError> {
        let tables = self.read()?;
        let mut records: Vec<MatchRecord> = tables
            .matches
            .values()
            .filter(|m| m.event_id == event_id && m.user_id == user_id)
            .cloned()
            .collect();
        records.sort_by(|a, b| {
            a.matched_at
                .cmp(&b.matched_at)
                .then_with(|| a.photo_id.cmp(&b.photo_id))
        });
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_photo(name: &str) -> NewPhoto {
        NewPhoto {
            event_id: "evt".into(),
            file_name: name.into(),
            size_bytes: 42,
            uploaded_by: "tester".into(),
        }
    }

    fn match_record(photo_id: &str, user_id: &str, similarity: f32) -> MatchRecord {
        MatchRecord {
            user_id: user_id.into(),
            event_id: "evt".into(),
            photo_id: photo_id.into(),
            similarity,
            face_index: 0,
            matched_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn enroll_supersedes_existing_reference() {
        let repo = InMemoryRepository::new();
        repo.enroll("evt", ParticipantRecord::new("u1", vec![1.0, 0.0]))
            .unwrap();
        repo.enroll("evt", ParticipantRecord::new("u2", vec![0.0, 1.0]))
            .unwrap();
        repo.enroll("evt", ParticipantRecord::new("u1", vec![0.6, 0.8]))
            .unwrap();

        let rows = repo.get_participant_vectors("evt").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].user_id, "u1");
        assert_eq!(rows[0].face_encoding, vec![0.6, 0.8]);
        assert!(repo.get_participant_vectors("other").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn save_photo_dedups_by_file_name() {
        let repo = InMemoryRepository::new();
        let first = repo.save_photo(new_photo("a.jpg")).await.unwrap();
        let again = repo.save_photo(new_photo("a.jpg")).await.unwrap();
        assert_eq!(first.photo_id, again.photo_id);
        assert_eq!(repo.photo_count().unwrap(), 1);

        let found = repo.find_photo("evt", "a.jpg").await.unwrap().unwrap();
        assert_eq!(found.photo_id, first.photo_id);
        assert!(repo.find_photo("evt", "b.jpg").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn save_match_is_an_upsert() {
        let repo = InMemoryRepository::new();
        let photo = repo.save_photo(new_photo("a.jpg")).await.unwrap();

        repo.save_match(match_record(&photo.photo_id, "u1", 0.93))
            .await
            .unwrap();
        repo.save_match(match_record(&photo.photo_id, "u1", 0.97))
            .await
            .unwrap();

        assert_eq!(repo.match_count().unwrap(), 1);
        let stored = repo.matches_for_user("evt", "u1").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!((stored[0].similarity - 0.97).abs() < 1e-6);
    }

    #[tokio::test]
    async fn save_match_requires_known_photo() {
        let repo = InMemoryRepository::new();
        let err = repo
            .save_match(match_record("missing", "u1", 0.99))
            .await
            .unwrap_err();
        assert!(matches!(err, RepositoryError::NotFound(_)));
    }
}
