use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::warn;
use vector::FeatureVector;

use crate::ParticipantError;

/// Participant row as a repository hands it over, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParticipantRecord {
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub face_encoding: Vec<f32>,
}

impl ParticipantRecord {
    pub fn new<U: Into<String>>(user_id: U, face_encoding: Vec<f32>) -> Self {
        Self {
            user_id: user_id.into(),
            name: None,
            email: None,
            face_encoding,
        }
    }

    pub fn with_name<S: Into<String>>(mut self, name: S) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_email<S: Into<String>>(mut self, email: S) -> Self {
        self.email = Some(email.into());
        self
    }
}

/// A user enrolled in one event with a valid reference vector.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Participant {
    pub user_id: String,
    pub name: String,
    pub email: Option<String>,
    pub reference: FeatureVector,
}

impl Participant {
    /// Validate a raw record against the deployment dimensionality.
    pub fn from_record(
        record: ParticipantRecord,
        dimension: usize,
    ) -> Result<Self, ParticipantError> {
        let user_id = record.user_id.trim().to_string();
        if user_id.is_empty() {
            return Err(ParticipantError::MissingUserId);
        }
        if record.face_encoding.is_empty() {
            return Err(ParticipantError::MissingVector { user_id });
        }

        let reference = FeatureVector::new(record.face_encoding);
        if let Err(source) = reference.validate(dimension) {
            return Err(ParticipantError::InvalidVector { user_id, source });
        }

        let name = record
            .name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| format!("User {user_id}"));
        let email = record
            .email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());

        Ok(Self {
            user_id,
            name,
            email,
            reference,
        })
    }

    /// Address notifications go to, if the user left one.
    pub fn contact_address(&self) -> Option<&str> {
        self.email.as_deref()
    }
}

/// Validate a batch of records, dropping the ones that fail.
///
/// Enrollment order is preserved; a repeated `user_id` keeps its first row.
pub fn resolve_participants(
    event_id: &str,
    records: Vec<ParticipantRecord>,
    dimension: usize,
) -> Vec<Participant> {
    let mut seen = HashSet::new();
    let mut participants = Vec::with_capacity(records.len());

    for record in records {
        match Participant::from_record(record, dimension) {
            Ok(participant) => {
                if seen.insert(participant.user_id.clone()) {
                    participants.push(participant);
                } else {
                    warn!(
                        event_id = %event_id,
                        user_id = %participant.user_id,
                        "participant_duplicate"
                    );
                }
            }
            Err(err) => {
                warn!(event_id = %event_id, error = %err, "participant_rejected");
            }
        }
    }

    participants
}
