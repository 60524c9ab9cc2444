//! YAML configuration for the face matching service.
//!
//! Every section and field is optional; omitted values take the defaults
//! shown below.
//!
//! ```yaml
//! version: "1.0"
//! name: "production"
//!
//! vector:
//!   dimension: 128
//!
//! matching:
//!   default_threshold: 0.92
//!   high_confidence_threshold: 0.95
//!   max_candidates: 5
//!
//! cache:
//!   capacity: 10
//!
//! ann:
//!   enabled: false
//!   m: 16
//!   ef_construction: 200
//!   ef_search: 50
//!   min_vectors_for_ann: 1000
//!
//! pipeline:
//!   similarity_threshold: 0.93
//!   max_workers: 4
//!   encoder_concurrency: 4
//!   cleanup_interval: 10
//!   run_timeout_secs: 600
//! ```

use std::fs;
use std::path::Path;
use std::time::Duration;

use index::AnnConfig;
use matcher::MatchConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::PipelineConfig;

/// Errors that can occur when loading YAML configuration files
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),
}

/// Top-level YAML configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct FaceMatchConfig {
    /// Configuration format version
    #[serde(default = "default_config_version")]
    pub version: String,

    /// Optional configuration name/description
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub vector: VectorYamlConfig,

    #[serde(default)]
    pub matching: MatchingYamlConfig,

    #[serde(default)]
    pub cache: CacheYamlConfig,

    #[serde(default)]
    pub ann: AnnYamlConfig,

    #[serde(default)]
    pub pipeline: PipelineYamlConfig,
}

impl FaceMatchConfig {
    /// Load a YAML configuration file from the given path
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse YAML configuration from a string
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: FaceMatchConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        if self.vector.dimension == 0 {
            return Err(ConfigLoadError::Validation(
                "vector.dimension must be >= 1".to_string(),
            ));
        }
        if self.cache.capacity == 0 {
            return Err(ConfigLoadError::Validation(
                "cache.capacity must be >= 1".to_string(),
            ));
        }
        self.ann.validate()?;
        self.match_config()
            .validate()
            .map_err(|err| ConfigLoadError::Validation(format!("matching: {err}")))?;
        self.pipeline_config()
            .validate()
            .map_err(|err| ConfigLoadError::Validation(format!("pipeline: {err}")))?;
        Ok(())
    }

    pub fn dimension(&self) -> usize {
        self.vector.dimension
    }

    pub fn cache_capacity(&self) -> usize {
        self.cache.capacity
    }

    pub fn ann_config(&self) -> AnnConfig {
        AnnConfig::default()
            .with_enabled(self.ann.enabled)
            .with_m(self.ann.m)
            .with_ef_construction(self.ann.ef_construction)
            .with_ef_search(self.ann.ef_search)
            .with_min_vectors_for_ann(self.ann.min_vectors_for_ann)
    }

    pub fn match_config(&self) -> MatchConfig {
        MatchConfig::default()
            .with_dimension(self.vector.dimension)
            .with_default_threshold(self.matching.default_threshold)
            .with_high_confidence_threshold(self.matching.high_confidence_threshold)
            .with_max_candidates(self.matching.max_candidates)
    }

    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig::default()
            .with_similarity_threshold(self.pipeline.similarity_threshold)
            .with_max_workers(self.pipeline.max_workers)
            .with_encoder_concurrency(self.pipeline.encoder_concurrency)
            .with_cleanup_interval(self.pipeline.cleanup_interval)
            .with_run_timeout(self.pipeline.run_timeout_secs.map(Duration::from_secs))
    }
}

impl Default for FaceMatchConfig {
    fn default() -> Self {
        Self {
            version: default_config_version(),
            name: None,
            vector: VectorYamlConfig::default(),
            matching: MatchingYamlConfig::default(),
            cache: CacheYamlConfig::default(),
            ann: AnnYamlConfig::default(),
            pipeline: PipelineYamlConfig::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorYamlConfig {
    #[serde(default = "default_dimension")]
    pub dimension: usize,
}

impl Default for VectorYamlConfig {
    fn default() -> Self {
        Self {
            dimension: default_dimension(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchingYamlConfig {
    #[serde(default = "default_threshold")]
    pub default_threshold: f32,

    #[serde(default = "default_high_confidence")]
    pub high_confidence_threshold: f32,

    #[serde(default = "default_max_candidates")]
    pub max_candidates: usize,
}

impl Default for MatchingYamlConfig {
    fn default() -> Self {
        Self {
            default_threshold: default_threshold(),
            high_confidence_threshold: default_high_confidence(),
            max_candidates: default_max_candidates(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheYamlConfig {
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
}

impl Default for CacheYamlConfig {
    fn default() -> Self {
        Self {
            capacity: default_cache_capacity(),
        }
    }
}

/// HNSW tuning; the graph is only used for events with many participants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnnYamlConfig {
    /// Off by default: only the exact scan matches brute force result for result.
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_m")]
    pub m: usize,

    #[serde(default = "default_ef_construction")]
    pub ef_construction: usize,

    #[serde(default = "default_ef_search")]
    pub ef_search: usize,

    #[serde(default = "default_min_vectors_for_ann")]
    pub min_vectors_for_ann: usize,
}

impl AnnYamlConfig {
    fn validate(&self) -> Result<(), ConfigLoadError> {
        if self.m == 0 {
            return Err(ConfigLoadError::Validation(
                "ann.m must be >= 1".to_string(),
            ));
        }
        if self.ef_construction == 0 || self.ef_search == 0 {
            return Err(ConfigLoadError::Validation(
                "ann.ef_construction and ann.ef_search must be >= 1".to_string(),
            ));
        }
        Ok(())
    }
}

impl Default for AnnYamlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            m: default_m(),
            ef_construction: default_ef_construction(),
            ef_search: default_ef_search(),
            min_vectors_for_ann: default_min_vectors_for_ann(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineYamlConfig {
    #[serde(default = "default_similarity_threshold")]
    pub similarity_threshold: f32,

    #[serde(default = "default_workers")]
    pub max_workers: usize,

    #[serde(default = "default_workers")]
    pub encoder_concurrency: usize,

    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval: usize,

    #[serde(default)]
    pub run_timeout_secs: Option<u64>,
}

impl Default for PipelineYamlConfig {
    fn default() -> Self {
        Self {
            similarity_threshold: default_similarity_threshold(),
            max_workers: default_workers(),
            encoder_concurrency: default_workers(),
            cleanup_interval: default_cleanup_interval(),
            run_timeout_secs: None,
        }
    }
}

fn default_config_version() -> String {
    "1.0".to_string()
}
fn default_dimension() -> usize {
    128
}
fn default_threshold() -> f32 {
    0.92
}
fn default_high_confidence() -> f32 {
    0.95
}
fn default_max_candidates() -> usize {
    5
}
fn default_cache_capacity() -> usize {
    index::DEFAULT_CACHE_CAPACITY
}
fn default_m() -> usize {
    16
}
fn default_ef_construction() -> usize {
    200
}
fn default_ef_search() -> usize {
    50
}
fn default_min_vectors_for_ann() -> usize {
    1000
}
fn default_similarity_threshold() -> f32 {
    0.93
}
fn default_workers() -> usize {
    4
}
fn default_cleanup_interval() -> usize {
    10
}
