use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A citizen submission as it arrives from the caller. Everything the
/// pipeline derives (status, attempts, history) lives on [`ReportRecord`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub id: String,
    pub incident_type: IncidentType,
    pub description: String,
    pub location: Location,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub image_url: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum IncidentType {
    Accident,
    Traffic,
    Crime,
    Fire,
    Medical,
    Disaster,
    Other,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ReportStatus {
    New,
    Rejected,
    Accepted,
    ForwardedToAdmin,
}

impl ReportStatus {
    /// Terminal reports are never validated again by the pipeline.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ReportStatus::Accepted | ReportStatus::ForwardedToAdmin)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ReportStatus::New => "new",
            ReportStatus::Rejected => "rejected",
            ReportStatus::Accepted => "accepted",
            ReportStatus::ForwardedToAdmin => "forwarded_to_admin",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "new" => Some(ReportStatus::New),
            "rejected" => Some(ReportStatus::Rejected),
            "accepted" => Some(ReportStatus::Accepted),
            "forwarded_to_admin" => Some(ReportStatus::ForwardedToAdmin),
            _ => None,
        }
    }
}

/// The per-report document held by the store. `attempts` always equals
/// `validation_history.len()` after a successful write; the latest-attempt
/// summary fields are overwritten each attempt, never deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportRecord {
    pub id: String,
    pub incident_type: IncidentType,
    pub description: String,
    pub location: Location,
    pub timestamp: DateTime<Utc>,
    #[serde(default)]
    pub image_url: Option<String>,
    pub status: ReportStatus,
    pub attempts: u32,
    #[serde(default)]
    pub validation_history: Vec<ValidationAttempt>,
    #[serde(default)]
    pub last_validation_attempt: Option<ValidationAttempt>,
    #[serde(default)]
    pub quality_score: Option<f64>,
    #[serde(default)]
    pub ai_confidence: Option<f64>,
    #[serde(default)]
    pub ai_reason: Option<String>,
    #[serde(default)]
    pub score_breakdown: Option<serde_json::Value>,
    #[serde(default)]
    pub image_analysis: Option<ImageAnalysis>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ReportRecord {
    pub fn from_submission(report: &Report, now: DateTime<Utc>) -> Self {
        Self {
            id: report.id.clone(),
            incident_type: report.incident_type,
            description: report.description.clone(),
            location: report.location,
            timestamp: report.timestamp,
            image_url: report.image_url.clone(),
            status: ReportStatus::New,
            attempts: 0,
            validation_history: Vec::new(),
            last_validation_attempt: None,
            quality_score: None,
            ai_confidence: None,
            ai_reason: None,
            score_breakdown: None,
            image_analysis: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// One scoring cycle. `attempt_number` and `timestamp` are assigned by the
/// store at write time, never by the caller.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ValidationAttempt {
    pub attempt_number: u32,
    pub score: f64,
    pub reason: String,
    pub confidence: f64,
    #[serde(default)]
    pub suggestions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

/// Score fields for a new ledger entry, before the store assigns the
/// attempt number and write timestamp.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewAttempt {
    pub score: f64,
    pub reason: String,
    pub confidence: f64,
    #[serde(default)]
    pub suggestions: Vec<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ImageQuality {
    High,
    Medium,
    Low,
    Unknown,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ContentKind {
    Incident,
    Traffic,
    Urban,
    General,
}

/// Snapshot of what the image oracle said about an attached photo. Always
/// present as a value, never as an error: a failed analysis carries
/// `quality = Unknown`, empty lists, and the failure in `error`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImageAnalysis {
    pub public_id: String,
    #[serde(default)]
    pub width: Option<u32>,
    #[serde(default)]
    pub height: Option<u32>,
    #[serde(default)]
    pub bytes: Option<u64>,
    #[serde(default)]
    pub faces: u32,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub moderation: Vec<String>,
    pub quality: ImageQuality,
    pub content_kind: ContentKind,
    #[serde(default)]
    pub error: Option<String>,
}
