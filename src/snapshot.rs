use std::path::Path;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::StudentRecord;

/// Trailing metadata object appended after the student records.
#[derive(Debug, Serialize, Deserialize)]
struct SnapshotMeta {
    last_modified: String,
    total_students: usize,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum SnapshotEntry {
    Student(StudentRecord),
    Meta(SnapshotMeta),
}

/// Reads the snapshot file, dropping the metadata entry. Used as substitute
/// input when live scraping fails entirely.
pub fn load(path: &Path) -> anyhow::Result<Vec<StudentRecord>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read snapshot {}", path.display()))?;
    let entries: Vec<SnapshotEntry> = serde_json::from_str(&raw)
        .with_context(|| format!("snapshot {} is not valid JSON", path.display()))?;

    Ok(entries
        .into_iter()
        .filter_map(|entry| match entry {
            SnapshotEntry::Student(record) => Some(record),
            SnapshotEntry::Meta(_) => None,
        })
        .collect())
}

/// Writes the scrape output plus a trailing `{last_modified, total_students}`
/// metadata object.
pub fn save(path: &Path, records: &[StudentRecord], now: DateTime<Utc>) -> anyhow::Result<()> {
    let mut entries: Vec<SnapshotEntry> = records
        .iter()
        .cloned()
        .map(SnapshotEntry::Student)
        .collect();
    entries.push(SnapshotEntry::Meta(SnapshotMeta {
        last_modified: now.format("%Y-%m-%d %H:%M:%S").to_string(),
        total_students: records.len(),
    }));

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(&entries)?;
    std::fs::write(path, json)
        .with_context(|| format!("failed to write snapshot {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn load_filters_out_the_metadata_entry() {
        let json = r#"[
            {
                "name": "moreira_t",
                "img": "https://cdn.example/a.png",
                "last_log_in": "3 days ago",
                "ongoing_projects": ["My Ls"],
                "completed_projects": [],
                "seasons": {"Season 01": "42%"},
                "exercises_completed": "128",
                "points": "950"
            },
            {"last_modified": "2026-08-24 12:00:00", "total_students": 1}
        ]"#;
        let entries: Vec<SnapshotEntry> = serde_json::from_str(json).unwrap();
        let records: Vec<StudentRecord> = entries
            .into_iter()
            .filter_map(|entry| match entry {
                SnapshotEntry::Student(record) => Some(record),
                SnapshotEntry::Meta(_) => None,
            })
            .collect();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].name, "moreira_t");
        assert_eq!(records[0].ongoing_projects, vec!["My Ls"]);
        assert_eq!(
            records[0].seasons.get("Season 01").map(String::as_str),
            Some("42%")
        );
    }

    #[test]
    fn save_appends_metadata_with_count() {
        let dir = std::env::temp_dir().join("progress-sync-snapshot-test");
        let path = dir.join("student_grades.json");
        let now: DateTime<Utc> = "2026-08-24T12:00:00Z".parse().unwrap();

        let record = StudentRecord {
            name: "moreira_t".to_string(),
            img: None,
            last_log_in: Some("N/A".to_string()),
            ongoing_projects: vec![],
            completed_projects: vec![],
            seasons: Default::default(),
            exercises_completed: None,
            points: None,
        };

        save(&path, &[record], now).unwrap();
        let raw = std::fs::read_to_string(&path).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        let entries = value.as_array().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1]["last_modified"], "2026-08-24 12:00:00");
        assert_eq!(entries[1]["total_students"], 1);

        let loaded = load(&path).unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name, "moreira_t");

        std::fs::remove_dir_all(&dir).ok();
    }
}
