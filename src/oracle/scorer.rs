use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ScoringConfig;
use crate::core::error::TriageError;
use crate::core::report::{ImageAnalysis, IncidentType, Location, Report};

/// Neutral score handed out when the oracle is unreachable. The attempt is
/// still recorded so the report keeps moving through the state machine.
const FALLBACK_SCORE: f64 = 50.0;
const FALLBACK_CONFIDENCE: f64 = 0.5;

/// Normalized scoring reply. `fallback` marks the transport-failure path,
/// which the health probe treats as a miss.
#[derive(Debug, Clone)]
pub struct ScoreOutcome {
    pub score: f64,
    pub reason: String,
    pub confidence: f64,
    pub suggestions: Vec<String>,
    pub breakdown: Option<serde_json::Value>,
    pub fallback: bool,
}

impl ScoreOutcome {
    /// Synthetic passing outcome for the AI-disabled configuration.
    pub fn fixed(score: f64) -> Self {
        Self {
            score,
            reason: "Automated scoring disabled; report passed by policy.".to_string(),
            confidence: 1.0,
            suggestions: Vec::new(),
            breakdown: None,
            fallback: false,
        }
    }

    fn unavailable() -> Self {
        Self {
            score: FALLBACK_SCORE,
            reason: "Scoring service unavailable; neutral score applied.".to_string(),
            confidence: FALLBACK_CONFIDENCE,
            suggestions: vec![
                "Resubmit later or add more detail to the description.".to_string()
            ],
            breakdown: None,
            fallback: true,
        }
    }
}

/// Seam between the pipeline and the LLM scorer. Transport failures come
/// back as `Ok` with a neutral fallback outcome; a malformed structured
/// reply is the only `Err` and aborts the current attempt.
#[async_trait]
pub trait ScoreOracle: Send + Sync {
    async fn score(
        &self,
        report: &Report,
        attempt_number: u32,
        image_context: Option<&ImageAnalysis>,
    ) -> Result<ScoreOutcome, TriageError>;

    async fn health(&self) -> bool;
}

/// Scorer over an OpenAI-compatible chat-completions endpoint.
pub struct HttpScoreOracle {
    client: reqwest::Client,
    base_url: String,
    model: String,
    api_key: Option<String>,
}

impl HttpScoreOracle {
    pub fn new(cfg: &ScoringConfig) -> Result<Self, TriageError> {
        let client = reqwest::Client::builder()
            .user_agent("report-triage/1.0")
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| TriageError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            model: cfg.model.clone(),
            api_key: cfg.api_key.clone(),
        })
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatReply,
}

#[derive(Deserialize)]
struct ChatReply {
    content: String,
}

const SYSTEM_PROMPT: &str = "You are a moderation scorer for citizen-submitted \
safety incident reports. Judge whether the report is specific, plausible, \
safe to publish, and useful to other citizens. Reply with raw JSON only, no \
prose and no code fences: {\"score\": 0-100, \"reason\": string, \
\"confidence\": 0-1, \"suggestions\": [string], \"breakdown\": object?}";

#[async_trait]
impl ScoreOracle for HttpScoreOracle {
    async fn score(
        &self,
        report: &Report,
        attempt_number: u32,
        image_context: Option<&ImageAnalysis>,
    ) -> Result<ScoreOutcome, TriageError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: build_prompt(report, attempt_number, image_context),
                },
            ],
            temperature: 0.2,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = match builder.send().await {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!("scoring oracle unreachable: {err}");
                return Ok(ScoreOutcome::unavailable());
            }
        };
        if !response.status().is_success() {
            // Rate limits and server errors downgrade to the neutral path.
            tracing::warn!("scoring oracle returned {}", response.status());
            return Ok(ScoreOutcome::unavailable());
        }

        let body: ChatResponse = response
            .json()
            .await
            .map_err(|e| TriageError::OracleMalformed(format!("bad envelope: {e}")))?;
        let content = body
            .choices
            .first()
            .map(|choice| choice.message.content.as_str())
            .ok_or_else(|| TriageError::OracleMalformed("empty choices".into()))?;

        normalize_reply(content)
    }

    async fn health(&self) -> bool {
        let probe = synthetic_report();
        match self.score(&probe, 1, None).await {
            Ok(outcome) => !outcome.fallback,
            Err(_) => false,
        }
    }
}

fn build_prompt(
    report: &Report,
    attempt_number: u32,
    image_context: Option<&ImageAnalysis>,
) -> String {
    let framing = if attempt_number <= 1 {
        "This is the report's first submission. Score it on its own merits."
            .to_string()
    } else {
        format!(
            "This is attempt {attempt_number}: a resubmission of a previously \
rejected report. Earlier feedback should have been addressed; be stricter \
about unresolved problems."
        )
    };

    let payload = serde_json::json!({
        "id": report.id,
        "incidentType": report.incident_type,
        "description": report.description,
        "location": report.location,
        "timestamp": report.timestamp.to_rfc3339(),
        "imageUrl": report.image_url,
    });

    let mut prompt = format!("{framing}\n\nReport:\n{payload:#}");
    if let Some(analysis) = image_context {
        prompt.push_str(&format!(
            "\n\nAttached image analysis:\n{:#}",
            serde_json::json!({
                "quality": analysis.quality,
                "contentKind": analysis.content_kind,
                "tags": analysis.tags,
                "faces": analysis.faces,
                "moderation": analysis.moderation,
            })
        ));
    }
    prompt
}

/// Strip prose/code-fence wrapping, parse the JSON payload, and apply the
/// schema rules: bad `score` or `reason` is a hard error, bad `confidence`
/// or `suggestions` is auto-corrected.
fn normalize_reply(content: &str) -> Result<ScoreOutcome, TriageError> {
    let start = content
        .find('{')
        .ok_or_else(|| TriageError::OracleMalformed("no JSON object in reply".into()))?;
    let end = content
        .rfind('}')
        .ok_or_else(|| TriageError::OracleMalformed("no JSON object in reply".into()))?;
    if end < start {
        return Err(TriageError::OracleMalformed("no JSON object in reply".into()));
    }
    let value: serde_json::Value = serde_json::from_str(&content[start..=end])
        .map_err(|e| TriageError::OracleMalformed(format!("invalid JSON payload: {e}")))?;

    let score = value
        .get("score")
        .and_then(serde_json::Value::as_f64)
        .ok_or_else(|| TriageError::OracleMalformed("score missing or not a number".into()))?;
    if !(0.0..=100.0).contains(&score) {
        return Err(TriageError::OracleMalformed(format!(
            "score {score} outside 0..=100"
        )));
    }

    let reason = value
        .get("reason")
        .and_then(serde_json::Value::as_str)
        .map(str::trim)
        .filter(|reason| !reason.is_empty())
        .ok_or_else(|| TriageError::OracleMalformed("reason missing or empty".into()))?
        .to_string();

    let confidence = value
        .get("confidence")
        .and_then(serde_json::Value::as_f64)
        .filter(|confidence| (0.0..=1.0).contains(confidence))
        .unwrap_or(FALLBACK_CONFIDENCE);

    let suggestions = value
        .get("suggestions")
        .or_else(|| value.get("recommendations"))
        .and_then(serde_json::Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.as_str().map(String::from))
                .collect()
        })
        .unwrap_or_default();

    let breakdown = value.get("breakdown").filter(|b| !b.is_null()).cloned();

    Ok(ScoreOutcome {
        score,
        reason,
        confidence,
        suggestions,
        breakdown,
        fallback: false,
    })
}

fn synthetic_report() -> Report {
    Report {
        id: "health-probe".to_string(),
        incident_type: IncidentType::Other,
        description: "Synthetic health-probe report; score normally.".to_string(),
        location: Location {
            lat: 9.01,
            lng: 38.76,
        },
        timestamp: crate::core::time::now_utc(),
        image_url: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_fenced_reply() {
        let reply = "Here is my verdict:\n```json\n{\"score\": 82, \"reason\": \"clear\", \"confidence\": 0.9, \"suggestions\": []}\n```";
        let outcome = normalize_reply(reply).unwrap();
        assert_eq!(outcome.score, 82.0);
        assert_eq!(outcome.reason, "clear");
        assert_eq!(outcome.confidence, 0.9);
        assert!(!outcome.fallback);
    }

    #[test]
    fn corrupt_confidence_defaults_to_half() {
        let reply = r#"{"score": 60, "reason": "ok", "confidence": 3.5}"#;
        let outcome = normalize_reply(reply).unwrap();
        assert_eq!(outcome.confidence, 0.5);
        assert!(outcome.suggestions.is_empty());
    }

    #[test]
    fn accepts_recommendations_alias() {
        let reply = r#"{"score": 40, "reason": "vague", "recommendations": ["add a street name"]}"#;
        let outcome = normalize_reply(reply).unwrap();
        assert_eq!(outcome.suggestions, vec!["add a street name".to_string()]);
    }

    #[test]
    fn out_of_range_score_is_hard_error() {
        let reply = r#"{"score": 150, "reason": "broken"}"#;
        assert!(matches!(
            normalize_reply(reply),
            Err(TriageError::OracleMalformed(_))
        ));
    }

    #[test]
    fn empty_reason_is_hard_error() {
        let reply = r#"{"score": 80, "reason": "  "}"#;
        assert!(matches!(
            normalize_reply(reply),
            Err(TriageError::OracleMalformed(_))
        ));
    }

    #[test]
    fn prose_without_json_is_hard_error() {
        assert!(matches!(
            normalize_reply("I cannot score this report."),
            Err(TriageError::OracleMalformed(_))
        ));
    }

    #[test]
    fn resubmission_prompt_mentions_attempt() {
        let prompt = build_prompt(&synthetic_report(), 3, None);
        assert!(prompt.contains("attempt 3"));
        assert!(prompt.contains("resubmission"));
    }
}
