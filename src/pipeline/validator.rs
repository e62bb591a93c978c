use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::config::AppConfig;
use crate::core::error::TriageError;
use crate::core::report::{NewAttempt, Report, ReportRecord, ReportStatus};
use crate::core::store::ReportStore;
use crate::oracle::imaging::ImageOracle;
use crate::oracle::scorer::{ScoreOracle, ScoreOutcome};
use crate::pipeline::shape;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TriageAction {
    Accepted,
    Rejected,
    ForwardedToAdmin,
    Error,
}

/// What the caller gets back from every validation call. Always a value,
/// never an exception across the public boundary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriageOutcome {
    pub success: bool,
    pub action: TriageAction,
    pub score: Option<f64>,
    pub attempts: Option<u32>,
    pub can_retry: bool,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl TriageOutcome {
    fn failure(err: &TriageError) -> Self {
        Self {
            success: false,
            action: TriageAction::Error,
            score: None,
            attempts: None,
            can_retry: err.is_retryable(),
            suggestions: Vec::new(),
            error: Some(err.to_string()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// The validation state machine. Stateless between calls; all mutable state
/// lives in the store. Collaborators are injected so tests can substitute
/// doubles.
pub struct ReportValidator {
    store: Arc<ReportStore>,
    scorer: Arc<dyn ScoreOracle>,
    imaging: Arc<dyn ImageOracle>,
    config: AppConfig,
    // Serializes calls per report id; distinct ids run fully in parallel.
    // Entries are evicted when the last call for an id finishes.
    locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl ReportValidator {
    pub fn new(
        store: Arc<ReportStore>,
        scorer: Arc<dyn ScoreOracle>,
        imaging: Arc<dyn ImageOracle>,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            scorer,
            imaging,
            config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub async fn validate(&self, report: Report) -> TriageOutcome {
        if let Err(err) = shape::check_submission(&report, &self.config, self.imaging.as_ref()) {
            tracing::info!("report {} rejected at shape stage: {err}", report.id);
            return TriageOutcome::failure(&err);
        }

        let lock = match self.lock_for(&report.id) {
            Ok(lock) => lock,
            Err(err) => return TriageOutcome::failure(&err),
        };
        let outcome = {
            let _guard = lock.lock().await;
            self.run_validation(&report).await
        };
        self.evict_lock(&report.id, &lock);
        outcome
    }

    async fn run_validation(&self, report: &Report) -> TriageOutcome {
        let record = match self.store.upsert_submission(report) {
            Ok(record) => record,
            Err(err) => return TriageOutcome::failure(&err),
        };
        if record.status.is_terminal() {
            return terminal_outcome(&record);
        }

        let attempt_number = record.attempts + 1;

        // Image context is best-effort: a degraded analysis is logged and
        // scoring proceeds without blocking.
        let image_context = match &report.image_url {
            Some(url) => match self.imaging.extract_public_id(url) {
                Some(public_id) => {
                    let analysis = self.imaging.analyze(&public_id).await;
                    if let Some(err) = &analysis.error {
                        tracing::warn!("image analysis degraded for {}: {err}", report.id);
                    }
                    Some(analysis)
                }
                None => None,
            },
            None => None,
        };

        let outcome = if self.config.enable_ai_validation {
            match self
                .scorer
                .score(report, attempt_number, image_context.as_ref())
                .await
            {
                Ok(outcome) => outcome,
                // Malformed oracle reply: hard error, no attempt consumed.
                Err(err) => {
                    tracing::warn!("scoring failed for {}: {err}", report.id);
                    return TriageOutcome::failure(&err);
                }
            }
        } else {
            ScoreOutcome::fixed(self.config.pass_threshold)
        };

        let passed = outcome.score >= self.config.pass_threshold;
        let escalating = !passed && attempt_number >= self.config.max_attempts;

        let new_status = if passed {
            ReportStatus::Accepted
        } else {
            ReportStatus::Rejected
        };
        let mut patch = serde_json::Map::new();
        patch.insert("status".into(), serde_json::json!(new_status));
        patch.insert("quality_score".into(), serde_json::json!(outcome.score));
        patch.insert("ai_confidence".into(), serde_json::json!(outcome.confidence));
        patch.insert("ai_reason".into(), serde_json::json!(outcome.reason));
        if let Some(breakdown) = &outcome.breakdown {
            patch.insert("score_breakdown".into(), breakdown.clone());
        }
        if let Some(analysis) = &image_context {
            patch.insert("image_analysis".into(), serde_json::json!(analysis));
        }

        // Attempt and verdict commit together; a store fault here leaves the
        // report exactly as it was, so can_retry stays honest.
        let attempt = match self.store.append_attempt(
            &report.id,
            record.attempts,
            &NewAttempt {
                score: outcome.score,
                reason: outcome.reason.clone(),
                confidence: outcome.confidence,
                suggestions: outcome.suggestions.clone(),
            },
            &serde_json::Value::Object(patch),
        ) {
            Ok(attempt) => attempt,
            Err(err) => return TriageOutcome::failure(&err),
        };

        if escalating {
            if let Err(err) = self.store.escalate(&report.id) {
                let err = TriageError::Escalation {
                    id: report.id.clone(),
                    reason: err.to_string(),
                };
                tracing::error!("{err}");
                return TriageOutcome::failure(&err);
            }
            tracing::info!(
                "report {} forwarded to admin after {} attempts",
                report.id,
                attempt.attempt_number
            );
            return TriageOutcome {
                success: false,
                action: TriageAction::ForwardedToAdmin,
                score: Some(outcome.score),
                attempts: Some(attempt.attempt_number),
                can_retry: false,
                suggestions: Vec::new(),
                error: None,
            };
        }

        if passed {
            tracing::info!(
                "report {} accepted with score {} on attempt {}",
                report.id,
                outcome.score,
                attempt.attempt_number
            );
            TriageOutcome {
                success: true,
                action: TriageAction::Accepted,
                score: Some(outcome.score),
                attempts: Some(attempt.attempt_number),
                can_retry: false,
                suggestions: Vec::new(),
                error: None,
            }
        } else {
            let suggestions = if self.config.enable_feedback {
                outcome.suggestions
            } else {
                Vec::new()
            };
            TriageOutcome {
                success: false,
                action: TriageAction::Rejected,
                score: Some(outcome.score),
                attempts: Some(attempt.attempt_number),
                can_retry: true,
                suggestions,
                error: None,
            }
        }
    }

    /// Healthy needs the scorer, the imaging oracle, and a store read to all
    /// succeed. Imaging is optional context, so losing only it degrades
    /// rather than fails.
    pub async fn health(&self) -> HealthStatus {
        let scorer_ok = self.scorer.health().await;
        let imaging_ok = self.imaging.health().await;
        let store_ok = self.store.stats().is_ok();

        if scorer_ok && imaging_ok && store_ok {
            HealthStatus::Healthy
        } else if scorer_ok && store_ok {
            HealthStatus::Degraded
        } else {
            HealthStatus::Unhealthy
        }
    }

    fn lock_for(&self, id: &str) -> Result<Arc<tokio::sync::Mutex<()>>, TriageError> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| TriageError::Store("lock map poisoned".into()))?;
        Ok(locks
            .entry(id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }

    /// Drop the map entry once no other call holds a handle. The strong-count
    /// check runs under the map lock, so a concurrent `lock_for` cannot race
    /// the removal; a count above two means another call is still queued.
    fn evict_lock(&self, id: &str, handle: &Arc<tokio::sync::Mutex<()>>) {
        let Ok(mut locks) = self.locks.lock() else {
            return;
        };
        if let Some(entry) = locks.get(id) {
            if Arc::ptr_eq(entry, handle) && Arc::strong_count(handle) == 2 {
                locks.remove(id);
            }
        }
    }
}

/// Terminal reports are never re-validated; the stored decision is replayed.
fn terminal_outcome(record: &ReportRecord) -> TriageOutcome {
    let accepted = record.status == ReportStatus::Accepted;
    TriageOutcome {
        success: accepted,
        action: if accepted {
            TriageAction::Accepted
        } else {
            TriageAction::ForwardedToAdmin
        },
        score: record.quality_score,
        attempts: Some(record.attempts),
        can_retry: false,
        suggestions: Vec::new(),
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_config;
    use crate::core::report::{ContentKind, ImageAnalysis, ImageQuality, IncidentType, Location};
    use crate::core::time::now_utc;

    struct PassingScorer;

    #[async_trait::async_trait]
    impl ScoreOracle for PassingScorer {
        async fn score(
            &self,
            _report: &Report,
            _attempt_number: u32,
            _image_context: Option<&ImageAnalysis>,
        ) -> Result<ScoreOutcome, TriageError> {
            Ok(ScoreOutcome::fixed(90.0))
        }

        async fn health(&self) -> bool {
            true
        }
    }

    struct NoopImaging;

    #[async_trait::async_trait]
    impl ImageOracle for NoopImaging {
        fn is_owned_url(&self, _url: &str) -> bool {
            true
        }

        fn extract_public_id(&self, _url: &str) -> Option<String> {
            None
        }

        async fn analyze(&self, public_id: &str) -> ImageAnalysis {
            ImageAnalysis {
                public_id: public_id.to_string(),
                width: None,
                height: None,
                bytes: None,
                faces: 0,
                tags: Vec::new(),
                moderation: Vec::new(),
                quality: ImageQuality::Unknown,
                content_kind: ContentKind::General,
                error: None,
            }
        }

        async fn health(&self) -> bool {
            true
        }
    }

    fn submission(id: &str) -> Report {
        Report {
            id: id.to_string(),
            incident_type: IncidentType::Traffic,
            description: "Stalled truck blocking both lanes at the junction.".to_string(),
            location: Location {
                lat: 9.02,
                lng: 38.75,
            },
            timestamp: now_utc(),
            image_url: None,
        }
    }

    fn validator() -> ReportValidator {
        let store = Arc::new(ReportStore::open_in_memory().unwrap());
        ReportValidator::new(
            store,
            Arc::new(PassingScorer),
            Arc::new(NoopImaging),
            default_config(),
        )
    }

    #[tokio::test]
    async fn lock_map_is_emptied_after_each_call() {
        let validator = validator();

        let outcome = validator.validate(submission("lk-1")).await;
        assert_eq!(outcome.action, TriageAction::Accepted);
        assert!(validator.locks.lock().unwrap().is_empty());

        // A terminal replay takes and releases the lock the same way.
        let replay = validator.validate(submission("lk-1")).await;
        assert_eq!(replay.action, TriageAction::Accepted);
        assert!(validator.locks.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn distinct_reports_do_not_share_lock_entries() {
        let validator = Arc::new(validator());

        let mut handles = Vec::new();
        for n in 0..4 {
            let validator = validator.clone();
            handles.push(tokio::spawn(async move {
                validator.validate(submission(&format!("lk-{n}"))).await
            }));
        }
        for handle in handles {
            assert_eq!(handle.await.unwrap().action, TriageAction::Accepted);
        }
        assert!(validator.locks.lock().unwrap().is_empty());
    }
}
