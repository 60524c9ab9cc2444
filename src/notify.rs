//! Per-user notification dispatch.
//!
//! The pipeline aggregates matched photos by user and hands them to a
//! [`NotificationDispatcher`]. Users without an address or without photos are
//! skipped. Everyone else gets exactly one send attempt; attempts run
//! concurrently and one user's failure never affects another's.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use index::EventInfo;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum NotificationError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("invalid address: {0}")]
    InvalidAddress(String),
}

/// Template data for one "you appear in new photos" message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PhotoNotice {
    pub user_id: String,
    pub user_name: String,
    pub event_id: String,
    pub event_name: String,
    pub event_code: String,
    pub photo_count: usize,
    pub photo_names: Vec<String>,
}

/// Outbound delivery of a [`PhotoNotice`].
///
/// `Ok(false)` is a delivery the transport refused; it counts as a failure
/// just like an error does.
#[async_trait]
pub trait NotificationTransport: Send + Sync {
    async fn send(&self, address: &str, notice: &PhotoNotice) -> Result<bool, NotificationError>;
}

/// Everything one user matched during a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserMatches {
    pub user_id: String,
    pub name: String,
    pub email: Option<String>,
    /// File names of matched photos, in processing order, without repeats.
    pub photos: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchFailure {
    pub user_id: String,
    pub address: String,
    pub reason: String,
}

/// Outcome of one dispatch round.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DispatchReport {
    pub sent_count: usize,
    pub failures: Vec<DispatchFailure>,
    /// Users skipped for lacking an address or photos.
    pub skipped: Vec<String>,
}

impl DispatchReport {
    pub fn failed_addresses(&self) -> Vec<&str> {
        self.failures.iter().map(|f| f.address.as_str()).collect()
    }

    pub fn failure_count(&self) -> usize {
        self.failures.len()
    }
}

pub struct NotificationDispatcher {
    transport: Arc<dyn NotificationTransport>,
}

impl NotificationDispatcher {
    pub fn new(transport: Arc<dyn NotificationTransport>) -> Self {
        Self { transport }
    }

    pub async fn dispatch(&self, event: &EventInfo, users: &[UserMatches]) -> DispatchReport {
        let mut report = DispatchReport::default();
        let mut attempts = Vec::new();

        for user in users {
            let address = user
                .email
                .as_deref()
                .map(str::trim)
                .filter(|a| !a.is_empty());
            let Some(address) = address else {
                debug!(event_id = %event.event_id, user_id = %user.user_id, "notification_skipped_no_address");
                report.skipped.push(user.user_id.clone());
                continue;
            };
            if user.photos.is_empty() {
                debug!(event_id = %event.event_id, user_id = %user.user_id, "notification_skipped_no_photos");
                report.skipped.push(user.user_id.clone());
                continue;
            }

            let notice = PhotoNotice {
                user_id: user.user_id.clone(),
                user_name: user.name.clone(),
                event_id: event.event_id.clone(),
                event_name: event.name.clone(),
                event_code: event.event_code.clone(),
                photo_count: user.photos.len(),
                photo_names: user.photos.clone(),
            };
            attempts.push(self.attempt(address.to_string(), notice));
        }

        for outcome in join_all(attempts).await {
            match outcome {
                Ok(()) => report.sent_count += 1,
                Err(failure) => report.failures.push(failure),
            }
        }

        info!(
            event_id = %event.event_id,
            sent = report.sent_count,
            failed = report.failures.len(),
            skipped = report.skipped.len(),
            "notifications_dispatched"
        );
        report
    }

    async fn attempt(&self, address: String, notice: PhotoNotice) -> Result<(), DispatchFailure> {
        let reason = match self.transport.send(&address, &notice).await {
            Ok(true) => return Ok(()),
            Ok(false) => "transport declined delivery".to_string(),
            Err(err) => err.to_string(),
        };
        warn!(
            event_id = %notice.event_id,
            user_id = %notice.user_id,
            address = %address,
            reason = %reason,
            "notification_failed"
        );
        Err(DispatchFailure {
            user_id: notice.user_id,
            address,
            reason,
        })
    }
}

/// Transport that only logs, for demos and dry runs.
#[derive(Debug, Clone, Default)]
pub struct LogTransport;

#[async_trait]
impl NotificationTransport for LogTransport {
    async fn send(&self, address: &str, notice: &PhotoNotice) -> Result<bool, NotificationError> {
        if !address.contains('@') {
            return Err(NotificationError::InvalidAddress(address.to_string()));
        }
        let data = serde_json::to_string(notice)
            .map_err(|err| NotificationError::Transport(err.to_string()))?;
        info!(address = %address, notice = %data, "notification_logged");
        Ok(true)
    }
}
