use std::collections::HashMap;
use std::path::Path;

use anyhow::Context;
use serde::Deserialize;
use tracing::warn;

pub const WORKSHOP_POINTS: i32 = 3;
pub const MENTORING_POINTS: i32 = 3;
pub const STANDUP_POINTS: i32 = 1;

/// One row of the attendance form export.
#[derive(Debug, Deserialize)]
pub struct AttendanceRow {
    pub email: String,
    #[serde(default)]
    pub session_date: String,
    pub session_type: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    Workshop,
    Mentoring,
    Standup,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct AttendanceCounts {
    pub workshops: i32,
    pub mentoring: i32,
    pub standups: i32,
}

pub fn load_responses(path: &Path) -> anyhow::Result<Vec<AttendanceRow>> {
    let mut reader = csv::Reader::from_path(path)
        .with_context(|| format!("failed to open attendance export {}", path.display()))?;

    let mut rows = Vec::new();
    for result in reader.deserialize::<AttendanceRow>() {
        rows.push(result.context("malformed attendance row")?);
    }
    Ok(rows)
}

/// Resolves free-text session labels by substring matching over a small
/// synonym table. Anything unmatched is dropped by the caller.
pub fn parse_session_type(label: &str) -> Option<SessionKind> {
    let label = label.to_lowercase();
    // "workshop" also covers "workshops"; order matters for "stand up".
    if label.contains("workshop") {
        Some(SessionKind::Workshop)
    } else if label.contains("mentoring") {
        Some(SessionKind::Mentoring)
    } else if label.contains("standup") || label.contains("stand-up") || label.contains("stand up")
    {
        Some(SessionKind::Standup)
    } else {
        None
    }
}

/// Aggregates form rows into per-email counts of the three session
/// categories. Rows without an email or with an unrecognized session type are
/// skipped with a warning.
pub fn aggregate(rows: &[AttendanceRow]) -> HashMap<String, AttendanceCounts> {
    let mut attendance: HashMap<String, AttendanceCounts> = HashMap::new();
    let mut skipped = 0usize;

    for row in rows {
        let email = row.email.trim().to_lowercase();
        if email.is_empty() {
            skipped += 1;
            continue;
        }

        let Some(kind) = parse_session_type(&row.session_type) else {
            warn!(session_type = %row.session_type, "unknown session type, row skipped");
            skipped += 1;
            continue;
        };

        let counts = attendance.entry(email).or_default();
        match kind {
            SessionKind::Workshop => counts.workshops += 1,
            SessionKind::Mentoring => counts.mentoring += 1,
            SessionKind::Standup => counts.standups += 1,
        }
    }

    if skipped > 0 {
        warn!(skipped, "attendance rows dropped");
    }
    attendance
}

pub fn points_for(counts: &AttendanceCounts) -> i32 {
    counts.workshops * WORKSHOP_POINTS
        + counts.mentoring * MENTORING_POINTS
        + counts.standups * STANDUP_POINTS
}
