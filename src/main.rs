//! Demo binary: processes a synthetic photo batch against an in-memory store.
//!
//! Usage: `facematch [config.yaml]`. Set `RUST_LOG` to adjust verbosity and
//! `FACEMATCH_LOG_JSON=1` for JSON log lines.

use std::sync::Arc;

use anyhow::Context;
use facematch::{
    build_pipeline, FaceMatchConfig, LogTransport, PhotoUpload, PrecomputedVectorEncoder,
};
use index::{EventInfo, InMemoryRepository, ParticipantRecord};
use tracing_subscriber::EnvFilter;

const EVENT_ID: &str = "demo-event";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = match std::env::args().nth(1) {
        Some(path) => FaceMatchConfig::from_file(&path)
            .with_context(|| format!("loading config from {path}"))?,
        None => FaceMatchConfig::default(),
    };
    let dimension = config.dimension();

    let repository = Arc::new(InMemoryRepository::new());
    repository.add_event(EventInfo {
        event_id: EVENT_ID.to_string(),
        name: "Demo Meetup".to_string(),
        event_code: "DEMO01".to_string(),
    })?;

    let people = ["ana", "ben", "chloe", "dev"];
    for (seed, user_id) in people.iter().enumerate() {
        let mut record = ParticipantRecord::new(*user_id, synthetic_vector(seed, dimension, 0.0))
            .with_name(user_id.to_uppercase());
        if *user_id != "dev" {
            record = record.with_email(format!("{user_id}@example.com"));
        }
        repository.enroll(EVENT_ID, record)?;
    }

    let photos = vec![
        photo("group.jpg", &[(0, 0.01), (1, 0.02)], dimension),
        photo("stage.jpg", &[(2, 0.015)], dimension),
        photo("crowd.jpg", &[(0, 0.02), (3, 0.01), (99, 0.0)], dimension),
        PhotoUpload::new("landscape.jpg", Vec::new()),
        PhotoUpload::new("corrupt.jpg", vec![1u8, 2, 3]),
    ];

    let encoder = Arc::new(PrecomputedVectorEncoder::new(dimension));
    let pipeline = build_pipeline(&config, repository, encoder, Arc::new(LogTransport))?;

    let result = pipeline.process_photos(EVENT_ID, photos).await?;
    println!("{}", serde_json::to_string_pretty(&result)?);
    println!(
        "{}",
        serde_json::to_string_pretty(&pipeline.matcher().cache().stats())?
    );
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("FACEMATCH_LOG_JSON").is_ok_and(|v| v == "1");
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Deterministic pseudo-embedding; `jitter` nudges it off the reference.
fn synthetic_vector(seed: usize, dimension: usize, jitter: f32) -> Vec<f32> {
    (0..dimension)
        .map(|i| {
            let phase = (seed as f32 + 1.0) * 12.9898 + i as f32 * 78.233;
            phase.sin() + jitter * (i as f32 * 0.37).cos()
        })
        .collect()
}

fn photo(name: &str, faces: &[(usize, f32)], dimension: usize) -> PhotoUpload {
    let vectors: Vec<Vec<f32>> = faces
        .iter()
        .map(|(seed, jitter)| synthetic_vector(*seed, dimension, *jitter))
        .collect();
    PhotoUpload::new(name, PrecomputedVectorEncoder::encode_payload(&vectors))
        .with_uploader("demo-photographer")
}
