use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Session credentials obtained from the CAS login handshake.
/// Valid for one scrape run; refreshed once if the portal expires them mid-run.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub user_id: String,
    pub session_id: String,
}

/// One student's scraped profile, as extracted from the portal HTML.
/// Field names match the snapshot JSON schema.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudentRecord {
    pub name: String,
    pub img: Option<String>,
    pub last_log_in: Option<String>,
    #[serde(default)]
    pub ongoing_projects: Vec<String>,
    #[serde(default)]
    pub completed_projects: Vec<String>,
    #[serde(default)]
    pub seasons: BTreeMap<String, String>,
    pub exercises_completed: Option<String>,
    pub points: Option<String>,
}

/// A [`StudentRecord`] after label reconciliation: the last-login label is
/// resolved to an absolute timestamp and season keys are canonical names.
#[derive(Debug, Clone)]
pub struct NormalizedStudentRecord {
    pub name: String,
    pub img: Option<String>,
    pub last_login: Option<DateTime<Utc>>,
    pub ongoing_projects: Vec<String>,
    pub completed_projects: Vec<String>,
    pub seasons: BTreeMap<String, String>,
    pub exercises_completed: Option<String>,
    pub points: Option<String>,
}

/// Name-to-ID lookup tables, read fully into memory once per run.
#[derive(Debug, Default, Clone)]
pub struct IdLookups {
    pub students: HashMap<String, Uuid>,
    pub projects: HashMap<String, Uuid>,
    pub student_programs: HashMap<Uuid, Uuid>,
    pub seasons_by_program: HashMap<Uuid, HashMap<String, Uuid>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StudentUpdate {
    pub student_id: Uuid,
    pub last_login: Option<DateTime<Utc>>,
    pub img_url: Option<String>,
    pub points: Option<i32>,
    pub exercises_completed: Option<i32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeasonProgressRecord {
    pub student_id: Uuid,
    pub season_id: Uuid,
    pub progress_percentage: f64,
    pub is_completed: bool,
    pub completion_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProjectCompletionRecord {
    pub student_id: Uuid,
    pub project_id: Uuid,
    pub is_completed: bool,
    pub completion_date: Option<NaiveDate>,
}

/// The three independent table batches produced by the planner.
#[derive(Debug, Default, Clone)]
pub struct UpsertBatch {
    pub students: Vec<StudentUpdate>,
    pub season_progress: Vec<SeasonProgressRecord>,
    pub project_completion: Vec<ProjectCompletionRecord>,
}

/// Per-run scrape outcome: how many profiles were captured and which
/// students were skipped, with the reason.
#[derive(Debug, Default)]
pub struct RunReport {
    pub scraped: usize,
    pub skipped: Vec<(String, String)>,
}

impl RunReport {
    pub fn skip(&mut self, username: &str, reason: impl ToString) {
        self.skipped.push((username.to_string(), reason.to_string()));
    }
}
