use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::{debug, warn};

use crate::models::{NormalizedStudentRecord, StudentRecord};

static NUMERIC_AGO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\d+)\s*(minute|hour|day|week|month|year)s?\s+ago").unwrap());
static SINGULAR_AGO: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\ban?\s+(minute|hour|day|week|month|year)\s+ago").unwrap());

/// Resolves an English relative-time label ("3 days ago", "a month ago") to
/// an absolute timestamp, using the fixed approximations month = 30 days and
/// year = 365 days.
///
/// Empty input (and the extractor's "N/A" sentinel) is no data and maps to
/// `None`. A present-but-unparseable label instead reports "happened now":
/// the student did log in, the portal just phrased it in a form we do not
/// recognize.
pub fn normalize_relative_time(label: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let label = label.trim().to_lowercase();
    if label.is_empty() || label == "n/a" {
        return None;
    }

    if let Some(caps) = NUMERIC_AGO.captures(&label) {
        let count: i64 = caps[1].parse().ok()?;
        return Some(now - unit_offset(&caps[2], count));
    }
    if let Some(caps) = SINGULAR_AGO.captures(&label) {
        return Some(now - unit_offset(&caps[1], 1));
    }

    warn!(%label, "unparseable relative time, treating as just now");
    Some(now)
}

fn unit_offset(unit: &str, count: i64) -> Duration {
    match unit {
        "minute" => Duration::minutes(count),
        "hour" => Duration::hours(count),
        "day" => Duration::days(count),
        "week" => Duration::weeks(count),
        "month" => Duration::days(count * 30),
        "year" => Duration::days(count * 365),
        _ => unreachable!("unit constrained by regex"),
    }
}

/// Maps a scraped season label onto the canonical name stored in the backend.
///
/// The portal emits one generic "Season 03 Software Engineer" label for three
/// distinct database seasons; the language keyword embedded in the label
/// picks the variant. A keywordless label is passed through unchanged so the
/// caller fails the lookup loudly instead of guessing. "Onboarding" is
/// intentionally excluded from progress tracking and maps to `None`.
pub fn normalize_season_name(label: &str) -> Option<String> {
    let label = label.trim();
    if label == "Onboarding" {
        return None;
    }

    if label
        .to_lowercase()
        .starts_with("season 03 software engineer")
    {
        if label.contains("Cpp") {
            return Some("Season 03 Software Engineer Cpp".to_string());
        }
        if label.contains("Rust") {
            return Some("Season 03 Software Engineer Rust".to_string());
        }
        if label.contains("Golang") || label.contains("Go") {
            return Some("Season 03 Software Engineer Go".to_string());
        }
        warn!(label, "season label has no language variant keyword");
        return Some(label.to_string());
    }

    Some(label.to_string())
}

/// Parses a progress-bar percentage label. The "Unknown" sentinel and any
/// garbage coerce to zero.
pub fn parse_percent(label: &str) -> f64 {
    let label = label.trim();
    let label = label.strip_suffix('%').unwrap_or(label);
    label.trim().parse::<f64>().unwrap_or(0.0)
}

/// Normalizes a scraped batch: last-login labels become timestamps, season
/// keys become canonical names. Excluded seasons are dropped here; unresolved
/// names survive so the planner can warn about them against the lookup tables.
pub fn normalize_records(
    records: Vec<StudentRecord>,
    now: DateTime<Utc>,
) -> Vec<NormalizedStudentRecord> {
    records
        .into_iter()
        .map(|record| {
            let last_login = record
                .last_log_in
                .as_deref()
                .and_then(|label| normalize_relative_time(label, now));

            let seasons = record
                .seasons
                .into_iter()
                .filter_map(|(label, percent)| match normalize_season_name(&label) {
                    Some(canonical) => Some((canonical, percent)),
                    None => {
                        debug!(student = %record.name, %label, "season excluded from tracking");
                        None
                    }
                })
                .collect();

            NormalizedStudentRecord {
                name: record.name,
                img: record.img,
                last_login,
                ongoing_projects: record.ongoing_projects,
                completed_projects: record.completed_projects,
                seasons,
                exercises_completed: record.exercises_completed,
                points: record.points,
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> DateTime<Utc> {
        "2026-08-24T12:00:00Z".parse().unwrap()
    }

    #[test]
    fn numeric_units_subtract_fixed_offsets() {
        let now = now();
        assert_eq!(
            normalize_relative_time("3 days ago", now),
            Some(now - Duration::days(3))
        );
        assert_eq!(
            normalize_relative_time("2 weeks ago", now),
            Some(now - Duration::weeks(2))
        );
        assert_eq!(
            normalize_relative_time("4 months ago", now),
            Some(now - Duration::days(120))
        );
        assert_eq!(
            normalize_relative_time("2 years ago", now),
            Some(now - Duration::days(730))
        );
        assert_eq!(
            normalize_relative_time("7 hours ago", now),
            Some(now - Duration::hours(7))
        );
    }

    #[test]
    fn singular_articles_mean_one_unit() {
        let now = now();
        assert_eq!(
            normalize_relative_time("a day ago", now),
            Some(now - Duration::days(1))
        );
        assert_eq!(
            normalize_relative_time("an hour ago", now),
            Some(now - Duration::hours(1))
        );
        assert_eq!(
            normalize_relative_time("a month ago", now),
            Some(now - Duration::days(30))
        );
        assert_eq!(
            normalize_relative_time("a year ago", now),
            Some(now - Duration::days(365))
        );
    }

    #[test]
    fn empty_is_no_data_but_garbage_is_just_now() {
        let now = now();
        assert_eq!(normalize_relative_time("", now), None);
        assert_eq!(normalize_relative_time("  ", now), None);
        assert_eq!(normalize_relative_time("N/A", now), None);
        // A label that exists but matches no unit means a login did happen.
        assert_eq!(normalize_relative_time("banana", now), Some(now));
    }

    #[test]
    fn season_03_language_variants() {
        assert_eq!(
            normalize_season_name("Season 03 Software Engineer Cpp").as_deref(),
            Some("Season 03 Software Engineer Cpp")
        );
        assert_eq!(
            normalize_season_name("Season 03 Software Engineer Rust").as_deref(),
            Some("Season 03 Software Engineer Rust")
        );
        assert_eq!(
            normalize_season_name("Season 03 Software Engineer Golang").as_deref(),
            Some("Season 03 Software Engineer Go")
        );
    }

    #[test]
    fn keywordless_season_03_passes_through_unchanged() {
        assert_eq!(
            normalize_season_name("Season 03 Software Engineer").as_deref(),
            Some("Season 03 Software Engineer")
        );
    }

    #[test]
    fn onboarding_is_excluded() {
        assert_eq!(normalize_season_name("Onboarding"), None);
    }

    #[test]
    fn canonical_names_are_identity() {
        assert_eq!(
            normalize_season_name("Preseason Data").as_deref(),
            Some("Preseason Data")
        );
        assert_eq!(
            normalize_season_name("Season 02 Data Science").as_deref(),
            Some("Season 02 Data Science")
        );
    }

    #[test]
    fn percent_labels_coerce_to_zero_on_garbage() {
        assert_eq!(parse_percent("75%"), 75.0);
        assert_eq!(parse_percent("100%"), 100.0);
        assert_eq!(parse_percent("33.5"), 33.5);
        assert_eq!(parse_percent("Unknown"), 0.0);
        assert_eq!(parse_percent(""), 0.0);
        assert_eq!(parse_percent("n/a"), 0.0);
    }

    #[test]
    fn normalization_drops_excluded_seasons_only() {
        let record = StudentRecord {
            name: "moreira_t".to_string(),
            img: None,
            last_log_in: Some("3 days ago".to_string()),
            ongoing_projects: vec![],
            completed_projects: vec![],
            seasons: [
                ("Onboarding".to_string(), "100%".to_string()),
                ("Season 01".to_string(), "42%".to_string()),
            ]
            .into(),
            exercises_completed: None,
            points: None,
        };

        let normalized = normalize_records(vec![record], now());
        assert_eq!(normalized.len(), 1);
        assert_eq!(normalized[0].last_login, Some(now() - Duration::days(3)));
        assert!(!normalized[0].seasons.contains_key("Onboarding"));
        assert_eq!(
            normalized[0].seasons.get("Season 01").map(String::as_str),
            Some("42%")
        );
    }
}
