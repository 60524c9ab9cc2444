#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use facematch::{
    EncoderError, FaceEncoder, NotificationError, NotificationTransport, PhotoNotice, PhotoUpload,
    PipelineConfig, PrecomputedVectorEncoder, ProcessingPipeline,
};
use index::{AnnConfig, EventInfo, InMemoryRepository, IndexCache, ParticipantRecord};
use matcher::{MatchConfig, MatchingService};
use vector::FeatureVector;

pub const DIM: usize = 8;
pub const EVENT: &str = "evt-1";

/// Unit vector along `axis`; participant `i` is enrolled at `basis(i)`.
pub fn basis(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0; DIM];
    v[axis % DIM] = 1.0;
    v
}

/// A face close to `basis(axis)`; similarity is `1 / sqrt(1 + jitter^2)`.
pub fn near(axis: usize, jitter: f32) -> Vec<f32> {
    let mut v = basis(axis);
    v[(axis + 1) % DIM] = jitter;
    v
}

/// Event `EVENT` with one participant per entry, enrolled at `basis(i)`.
pub fn seeded_repo(users: &[(&str, Option<&str>)]) -> Arc<InMemoryRepository> {
    let repo = Arc::new(InMemoryRepository::new());
    add_event(&repo, EVENT);
    for (i, (user_id, email)) in users.iter().enumerate() {
        let mut record = ParticipantRecord::new(*user_id, basis(i));
        if let Some(email) = email {
            record = record.with_email(*email);
        }
        repo.enroll(EVENT, record).unwrap();
    }
    repo
}

pub fn add_event(repo: &InMemoryRepository, event_id: &str) {
    repo.add_event(EventInfo {
        event_id: event_id.to_string(),
        name: format!("Event {event_id}"),
        event_code: event_id.to_uppercase(),
    })
    .unwrap();
}

/// Photo whose faces sit almost exactly on the given participants.
pub fn photo_of(name: &str, axes: &[usize]) -> PhotoUpload {
    let faces: Vec<Vec<f32>> = axes.iter().map(|axis| near(*axis, 0.05)).collect();
    PhotoUpload::new(name, PrecomputedVectorEncoder::encode_payload(&faces))
}

pub fn photo_with_faces(name: &str, faces: &[Vec<f32>]) -> PhotoUpload {
    PhotoUpload::new(name, PrecomputedVectorEncoder::encode_payload(faces))
}

/// Payload the encoder cannot decode.
pub fn corrupt_photo(name: &str) -> PhotoUpload {
    PhotoUpload::new(name, vec![0u8; 7])
}

pub fn pipeline_with(
    repo: Arc<InMemoryRepository>,
    encoder: Arc<dyn FaceEncoder>,
    transport: Arc<dyn NotificationTransport>,
    config: PipelineConfig,
) -> ProcessingPipeline {
    let cache = Arc::new(IndexCache::new(repo, DIM, AnnConfig::default(), 10));
    let matcher = MatchingService::new(cache, MatchConfig::default().with_dimension(DIM)).unwrap();
    ProcessingPipeline::new(Arc::new(matcher), encoder, transport, config).unwrap()
}

pub fn default_pipeline(
    repo: Arc<InMemoryRepository>,
    transport: Arc<RecordingTransport>,
) -> ProcessingPipeline {
    pipeline_with(
        repo,
        Arc::new(PrecomputedVectorEncoder::new(DIM)),
        transport,
        PipelineConfig::default(),
    )
}

/// Records every send; fails for the listed addresses.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<(String, PhotoNotice)>>,
    failing: Vec<String>,
}

impl RecordingTransport {
    pub fn failing_for(addresses: &[&str]) -> Self {
        Self {
            sent: Mutex::new(Vec::new()),
            failing: addresses.iter().map(|a| a.to_string()).collect(),
        }
    }

    pub fn sent(&self) -> Vec<(String, PhotoNotice)> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationTransport for RecordingTransport {
    async fn send(&self, address: &str, notice: &PhotoNotice) -> Result<bool, NotificationError> {
        self.sent
            .lock()
            .unwrap()
            .push((address.to_string(), notice.clone()));
        if self.failing.iter().any(|a| a == address) {
            return Err(NotificationError::Transport("mailbox unavailable".into()));
        }
        Ok(true)
    }
}

/// A latch that blocks encoder threads until opened.
#[derive(Default)]
pub struct Gate {
    open: Mutex<bool>,
    cv: Condvar,
}

impl Gate {
    pub fn open(&self) {
        *self.open.lock().unwrap() = true;
        self.cv.notify_all();
    }

    fn wait(&self) {
        let mut open = self.open.lock().unwrap();
        while !*open {
            open = self.cv.wait(open).unwrap();
        }
    }
}

/// Wraps the precomputed encoder, blocking each call on a gate.
pub struct GatedEncoder {
    inner: PrecomputedVectorEncoder,
    pub gate: Arc<Gate>,
    pub calls: AtomicUsize,
}

impl GatedEncoder {
    pub fn new() -> Self {
        Self {
            inner: PrecomputedVectorEncoder::new(DIM),
            gate: Arc::new(Gate::default()),
            calls: AtomicUsize::new(0),
        }
    }
}

impl FaceEncoder for GatedEncoder {
    fn extract_faces(&self, image: &[u8]) -> Result<Vec<FeatureVector>, EncoderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.gate.wait();
        self.inner.extract_faces(image)
    }
}

/// Tracks peak concurrency and buffer releases; can panic on a marker payload.
pub struct InstrumentedEncoder {
    inner: PrecomputedVectorEncoder,
    in_flight: AtomicUsize,
    pub peak: AtomicUsize,
    pub releases: AtomicUsize,
    delay: Duration,
}

/// Payload that makes [`InstrumentedEncoder`] panic.
pub const PANIC_PAYLOAD: &[u8] = b"boom";

impl InstrumentedEncoder {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: PrecomputedVectorEncoder::new(DIM),
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
            delay,
        }
    }
}

impl FaceEncoder for InstrumentedEncoder {
    fn extract_faces(&self, image: &[u8]) -> Result<Vec<FeatureVector>, EncoderError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        std::thread::sleep(self.delay);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        if image == PANIC_PAYLOAD {
            panic!("encoder crashed");
        }
        self.inner.extract_faces(image)
    }

    fn release_buffers(&self) {
        self.releases.fetch_add(1, Ordering::SeqCst);
    }
}
