use chrono::Duration;

use crate::config::AppConfig;
use crate::core::error::TriageError;
use crate::core::report::Report;
use crate::core::time::now_utc;
use crate::oracle::imaging::ImageOracle;

/// Input validation run before any external call. A violation means no
/// attempt is recorded and no oracle is contacted.
pub fn check_submission(
    report: &Report,
    cfg: &AppConfig,
    imaging: &dyn ImageOracle,
) -> Result<(), TriageError> {
    if report.id.trim().is_empty() {
        return Err(TriageError::Shape("id must not be empty".into()));
    }

    let description = report.description.trim();
    if description.len() < cfg.min_description_len {
        return Err(TriageError::Shape(format!(
            "description shorter than {} characters",
            cfg.min_description_len
        )));
    }
    if description.len() > cfg.max_description_len {
        return Err(TriageError::Shape(format!(
            "description longer than {} characters",
            cfg.max_description_len
        )));
    }

    let loc = &report.location;
    if !loc.lat.is_finite() || !loc.lng.is_finite() {
        return Err(TriageError::Shape("location coordinates must be finite".into()));
    }
    if !cfg.geofence.contains(loc) {
        return Err(TriageError::Geofence {
            lat: loc.lat,
            lng: loc.lng,
        });
    }

    let horizon = now_utc() + Duration::minutes(cfg.future_tolerance_minutes);
    if report.timestamp > horizon {
        return Err(TriageError::Time(format!(
            "occurrence time {} is beyond the {}-minute clock-skew allowance",
            report.timestamp.to_rfc3339(),
            cfg.future_tolerance_minutes
        )));
    }

    if let Some(url) = &report.image_url {
        if !imaging.is_owned_url(url) {
            return Err(TriageError::Shape(format!(
                "image_url must be a valid URL on the configured media host: {url}"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_config;
    use crate::core::report::{IncidentType, Location};
    use crate::oracle::imaging::HttpImageOracle;

    fn report() -> Report {
        Report {
            id: "r-1".to_string(),
            incident_type: IncidentType::Accident,
            description: "Two cars collided near the stadium entrance.".to_string(),
            location: Location {
                lat: 9.01,
                lng: 38.76,
            },
            timestamp: now_utc(),
            image_url: None,
        }
    }

    fn imaging() -> HttpImageOracle {
        HttpImageOracle::new(&default_config().imaging).unwrap()
    }

    #[test]
    fn valid_report_passes() {
        assert!(check_submission(&report(), &default_config(), &imaging()).is_ok());
    }

    #[test]
    fn null_island_fails_geofence() {
        let mut report = report();
        report.location = Location { lat: 0.0, lng: 0.0 };
        assert!(matches!(
            check_submission(&report, &default_config(), &imaging()),
            Err(TriageError::Geofence { .. })
        ));
    }

    #[test]
    fn future_timestamp_beyond_tolerance_fails() {
        let mut report = report();
        report.timestamp = now_utc() + Duration::hours(2);
        assert!(matches!(
            check_submission(&report, &default_config(), &imaging()),
            Err(TriageError::Time(_))
        ));
    }

    #[test]
    fn slight_clock_skew_is_tolerated() {
        let mut report = report();
        report.timestamp = now_utc() + Duration::minutes(5);
        assert!(check_submission(&report, &default_config(), &imaging()).is_ok());
    }

    #[test]
    fn short_description_fails_shape() {
        let mut report = report();
        report.description = "short".to_string();
        assert!(matches!(
            check_submission(&report, &default_config(), &imaging()),
            Err(TriageError::Shape(_))
        ));
    }

    #[test]
    fn foreign_image_url_fails_shape() {
        let mut report = report();
        report.image_url = Some("https://evil.example.com/image/upload/a.jpg".to_string());
        assert!(matches!(
            check_submission(&report, &default_config(), &imaging()),
            Err(TriageError::Shape(_))
        ));
    }
}
