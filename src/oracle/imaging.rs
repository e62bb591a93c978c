use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use url::Url;

use crate::config::ImagingConfig;
use crate::core::error::TriageError;
use crate::core::report::{ContentKind, ImageAnalysis, ImageQuality};

/// Seam to the media host's admin API. `analyze` is infallible by contract:
/// image context is optional for the pipeline, so failures come back inside
/// the result, never as an error.
#[async_trait]
pub trait ImageOracle: Send + Sync {
    fn is_owned_url(&self, url: &str) -> bool;
    fn extract_public_id(&self, url: &str) -> Option<String>;
    async fn analyze(&self, public_id: &str) -> ImageAnalysis;
    async fn health(&self) -> bool;
}

pub struct HttpImageOracle {
    client: reqwest::Client,
    base_url: String,
    media_host: String,
    cloud_name: String,
}

impl HttpImageOracle {
    pub fn new(cfg: &ImagingConfig) -> Result<Self, TriageError> {
        let client = reqwest::Client::builder()
            .user_agent("report-triage/1.0")
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .map_err(|e| TriageError::Config(e.to_string()))?;
        Ok(Self {
            client,
            base_url: cfg.base_url.trim_end_matches('/').to_string(),
            media_host: cfg.media_host.clone(),
            cloud_name: cfg.cloud_name.clone(),
        })
    }
}

#[derive(Deserialize)]
struct ResourceResponse {
    #[serde(default)]
    width: Option<u32>,
    #[serde(default)]
    height: Option<u32>,
    #[serde(default)]
    bytes: Option<u64>,
    #[serde(default)]
    faces: u32,
    #[serde(default)]
    moderation: Vec<String>,
}

#[derive(Deserialize)]
struct TagsResponse {
    #[serde(default)]
    tags: Vec<String>,
}

#[async_trait]
impl ImageOracle for HttpImageOracle {
    fn is_owned_url(&self, url: &str) -> bool {
        match Url::parse(url) {
            Ok(parsed) => parsed.host_str() == Some(self.media_host.as_str()),
            Err(_) => false,
        }
    }

    /// Delivery URLs look like
    /// `https://<host>/<cloud>/image/upload/v123/folder/name.jpg`; the
    /// public id is `folder/name`. Returns `None` for foreign or unparsable
    /// URLs.
    fn extract_public_id(&self, url: &str) -> Option<String> {
        if !self.is_owned_url(url) {
            return None;
        }
        let parsed = Url::parse(url).ok()?;
        let segments: Vec<&str> = parsed.path_segments()?.filter(|s| !s.is_empty()).collect();

        let mut rest = segments.as_slice();
        if rest.first() == Some(&self.cloud_name.as_str()) {
            rest = &rest[1..];
        }
        match rest {
            ["image", "upload", tail @ ..] if !tail.is_empty() => {
                let mut tail = tail;
                if is_version_segment(tail[0]) {
                    tail = &tail[1..];
                }
                if tail.is_empty() {
                    return None;
                }
                let joined = tail.join("/");
                let id = match joined.rsplit_once('.') {
                    Some((stem, _ext)) if !stem.is_empty() => stem.to_string(),
                    _ => joined.clone(),
                };
                if id.is_empty() {
                    None
                } else {
                    Some(id)
                }
            }
            _ => None,
        }
    }

    async fn analyze(&self, public_id: &str) -> ImageAnalysis {
        let resource_url = format!("{}/resources/image/upload/{public_id}", self.base_url);
        let tags_url = format!("{}/resources/image/upload/{public_id}/tags", self.base_url);

        let (resource, tags) = tokio::join!(
            fetch_json::<ResourceResponse>(&self.client, &resource_url),
            fetch_json::<TagsResponse>(&self.client, &tags_url),
        );

        let mut analysis = ImageAnalysis {
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
        };

        match resource {
            Ok(resource) => {
                analysis.width = resource.width;
                analysis.height = resource.height;
                analysis.bytes = resource.bytes;
                analysis.faces = resource.faces;
                analysis.moderation = resource.moderation;
                analysis.quality =
                    classify_quality(resource.width, resource.height, resource.bytes);
            }
            Err(err) => {
                tracing::warn!("image metadata fetch failed for {public_id}: {err}");
                analysis.error = Some(err);
                return analysis;
            }
        }

        match tags {
            Ok(tags) => {
                analysis.content_kind = classify_content(&tags.tags);
                analysis.tags = tags.tags;
            }
            Err(err) => {
                tracing::warn!("image tag fetch failed for {public_id}: {err}");
                analysis.error = Some(err);
            }
        }

        analysis
    }

    async fn health(&self) -> bool {
        let url = format!("{}/ping", self.base_url);
        match self.client.get(url).send().await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }
}

async fn fetch_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
) -> Result<T, String> {
    let response = client.get(url).send().await.map_err(|e| e.to_string())?;
    if !response.status().is_success() {
        return Err(format!("status {}", response.status()));
    }
    response.json::<T>().await.map_err(|e| e.to_string())
}

fn is_version_segment(segment: &str) -> bool {
    segment.len() > 1
        && segment.starts_with('v')
        && segment[1..].chars().all(|c| c.is_ascii_digit())
}

/// Fixed resolution/file-size rule from the moderation guidelines.
fn classify_quality(
    width: Option<u32>,
    height: Option<u32>,
    bytes: Option<u64>,
) -> ImageQuality {
    let (Some(width), Some(height)) = (width, height) else {
        return ImageQuality::Unknown;
    };
    let resolution = width as u64 * height as u64;
    let bytes = bytes.unwrap_or(u64::MAX);
    if resolution > 1_000_000 && bytes < 5_000_000 {
        ImageQuality::High
    } else if resolution > 500_000 {
        ImageQuality::Medium
    } else {
        ImageQuality::Low
    }
}

const INCIDENT_KEYWORDS: &[&str] = &[
    "accident", "crash", "collision", "fire", "smoke", "emergency", "injury", "damage", "flood",
];
const TRAFFIC_KEYWORDS: &[&str] = &[
    "car", "vehicle", "road", "traffic", "street", "highway", "intersection",
];
const URBAN_KEYWORDS: &[&str] = &["building", "city", "urban", "construction", "sidewalk"];

fn classify_content(tags: &[String]) -> ContentKind {
    let matches_any = |keywords: &[&str]| {
        tags.iter()
            .any(|tag| keywords.iter().any(|kw| tag.to_lowercase().contains(kw)))
    };
    if matches_any(INCIDENT_KEYWORDS) {
        ContentKind::Incident
    } else if matches_any(TRAFFIC_KEYWORDS) {
        ContentKind::Traffic
    } else if matches_any(URBAN_KEYWORDS) {
        ContentKind::Urban
    } else {
        ContentKind::General
    }
}
