use std::{fs, path::Path};

use serde::Deserialize;

use crate::core::error::TriageError;
use crate::core::report::Location;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_pass_threshold")]
    pub pass_threshold: f64,
    #[serde(default = "default_true")]
    pub enable_feedback: bool,
    #[serde(default = "default_true")]
    pub enable_ai_validation: bool,
    /// Clock-skew allowance for report timestamps, in minutes.
    #[serde(default = "default_future_tolerance")]
    pub future_tolerance_minutes: i64,
    #[serde(default = "default_min_description_len")]
    pub min_description_len: usize,
    #[serde(default = "default_max_description_len")]
    pub max_description_len: usize,
    #[serde(default)]
    pub geofence: Geofence,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub imaging: ImagingConfig,
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct Geofence {
    pub min_lat: f64,
    pub max_lat: f64,
    pub min_lng: f64,
    pub max_lng: f64,
}

impl Geofence {
    pub fn contains(&self, loc: &Location) -> bool {
        loc.lat >= self.min_lat
            && loc.lat <= self.max_lat
            && loc.lng >= self.min_lng
            && loc.lng <= self.max_lng
    }
}

impl Default for Geofence {
    // Addis Ababa service area bounding box.
    fn default() -> Self {
        Self {
            min_lat: 8.5,
            max_lat: 9.5,
            min_lng: 38.3,
            max_lng: 39.3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    pub base_url: String,
    pub model: String,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434/v1".to_string(),
            model: "llama3.1".to_string(),
            api_key: None,
            timeout_ms: default_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ImagingConfig {
    pub base_url: String,
    /// Hostname that delivery URLs must live on for a report image to count
    /// as ours.
    pub media_host: String,
    pub cloud_name: String,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for ImagingConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.cloudinary.com/v1_1/demo".to_string(),
            media_host: "res.cloudinary.com".to_string(),
            cloud_name: "demo".to_string(),
            timeout_ms: default_timeout_ms(),
        }
    }
}

pub fn load_config(path: Option<&str>) -> Result<AppConfig, TriageError> {
    let default_path = Path::new("config/triage.toml");
    let path = path.map(Path::new).unwrap_or(default_path);

    if !path.exists() {
        return Ok(default_config());
    }

    let content = fs::read_to_string(path).map_err(|e| TriageError::Config(e.to_string()))?;
    let cfg: AppConfig =
        toml::from_str(&content).map_err(|e| TriageError::Config(e.to_string()))?;
    validate(&cfg)?;
    Ok(cfg)
}

fn validate(cfg: &AppConfig) -> Result<(), TriageError> {
    if !(1..=10).contains(&cfg.max_attempts) {
        return Err(TriageError::Config(format!(
            "max_attempts must be in 1..=10, got {}",
            cfg.max_attempts
        )));
    }
    if !(0.0..=100.0).contains(&cfg.pass_threshold) {
        return Err(TriageError::Config(format!(
            "pass_threshold must be in 0..=100, got {}",
            cfg.pass_threshold
        )));
    }
    if cfg.geofence.min_lat >= cfg.geofence.max_lat
        || cfg.geofence.min_lng >= cfg.geofence.max_lng
    {
        return Err(TriageError::Config("geofence bounds are inverted".into()));
    }
    Ok(())
}

pub fn default_config() -> AppConfig {
    AppConfig {
        max_attempts: default_max_attempts(),
        pass_threshold: default_pass_threshold(),
        enable_feedback: true,
        enable_ai_validation: true,
        future_tolerance_minutes: default_future_tolerance(),
        min_description_len: default_min_description_len(),
        max_description_len: default_max_description_len(),
        geofence: Geofence::default(),
        scoring: ScoringConfig::default(),
        imaging: ImagingConfig::default(),
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_pass_threshold() -> f64 {
    70.0
}

fn default_true() -> bool {
    true
}

fn default_future_tolerance() -> i64 {
    10
}

fn default_min_description_len() -> usize {
    10
}

fn default_max_description_len() -> usize {
    2_000
}

fn default_timeout_ms() -> u64 {
    15_000
}
