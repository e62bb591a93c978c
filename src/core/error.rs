use std::io;

#[derive(thiserror::Error, Debug)]
pub enum TriageError {
    #[error("invalid report: {0}")]
    Shape(String),
    #[error("location outside service area: lat={lat}, lng={lng}")]
    Geofence { lat: f64, lng: f64 },
    #[error("timestamp rejected: {0}")]
    Time(String),
    #[error("scoring oracle reply malformed: {0}")]
    OracleMalformed(String),
    #[error("store error: {0}")]
    Store(String),
    #[error("report not found: {0}")]
    NotFound(String),
    #[error("concurrent validation for report {0}, retry the call")]
    Conflict(String),
    #[error("escalation failed for report {id}: {reason}")]
    Escalation { id: String, reason: String },
    #[error("config error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

impl TriageError {
    /// True when the caller may resubmit the identical request.
    /// Shape, geofence, and time errors need a changed report, not a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TriageError::OracleMalformed(_)
                | TriageError::Store(_)
                | TriageError::Conflict(_)
                | TriageError::Escalation { .. }
        )
    }
}

impl From<rusqlite::Error> for TriageError {
    fn from(err: rusqlite::Error) -> Self {
        TriageError::Store(err.to_string())
    }
}

impl From<serde_json::Error> for TriageError {
    fn from(err: serde_json::Error) -> Self {
        TriageError::Store(err.to_string())
    }
}
