use std::collections::HashMap;

use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::models::{
    IdLookups, NormalizedStudentRecord, ProjectCompletionRecord, SeasonProgressRecord,
    StudentUpdate, UpsertBatch,
};
use crate::normalize::parse_percent;

/// Turns a normalized batch into upsert-ready records for the three target
/// tables. Students missing from the lookup tables are skipped; within one
/// batch every composite key appears at most once.
pub fn plan(
    records: &[NormalizedStudentRecord],
    lookups: &IdLookups,
    now: DateTime<Utc>,
) -> UpsertBatch {
    let mut batch = UpsertBatch::default();
    let mut completion: HashMap<(Uuid, Uuid), ProjectCompletionRecord> = HashMap::new();

    for record in records {
        let Some(&student_id) = lookups.students.get(&record.name) else {
            warn!(student = %record.name, "scraped student not found in backend, skipping");
            continue;
        };

        if let Some(update) = plan_student_update(student_id, record) {
            batch.students.push(update);
        }
        plan_season_progress(student_id, record, lookups, now, &mut batch.season_progress);
        plan_project_completion(student_id, record, lookups, now, &mut completion);
    }

    batch.project_completion = completion.into_values().collect();
    batch
        .project_completion
        .sort_by_key(|r| (r.student_id, r.project_id));
    batch
}

fn plan_student_update(
    student_id: Uuid,
    record: &NormalizedStudentRecord,
) -> Option<StudentUpdate> {
    let update = StudentUpdate {
        student_id,
        last_login: record.last_login,
        img_url: record.img.clone(),
        points: parse_count(record.points.as_deref(), &record.name, "points"),
        exercises_completed: parse_count(
            record.exercises_completed.as_deref(),
            &record.name,
            "exercises_completed",
        ),
    };

    let has_data = update.last_login.is_some()
        || update.img_url.is_some()
        || update.points.is_some()
        || update.exercises_completed.is_some();
    has_data.then_some(update)
}

fn parse_count(label: Option<&str>, student: &str, field: &str) -> Option<i32> {
    let label = label?.trim();
    match label.parse::<i32>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!(student, field, label, "non-numeric count, field dropped");
            None
        }
    }
}

/// Seasons are scoped per program: the same canonical name maps to different
/// IDs under different programs, so a season is only matched inside the
/// student's own program's season set. Anything else is dropped loudly.
fn plan_season_progress(
    student_id: Uuid,
    record: &NormalizedStudentRecord,
    lookups: &IdLookups,
    now: DateTime<Utc>,
    out: &mut Vec<SeasonProgressRecord>,
) {
    let Some(program_id) = lookups.student_programs.get(&student_id) else {
        warn!(student = %record.name, "no program for student, season progress skipped");
        return;
    };
    let Some(program_seasons) = lookups.seasons_by_program.get(program_id) else {
        warn!(student = %record.name, %program_id, "program has no seasons");
        return;
    };

    for (season_name, percent_label) in &record.seasons {
        let Some(&season_id) = program_seasons.get(season_name) else {
            warn!(
                student = %record.name,
                season = %season_name,
                %program_id,
                "season not in student's program, dropped"
            );
            continue;
        };

        let percentage = parse_percent(percent_label);
        let is_completed = percentage >= 100.0;
        out.push(SeasonProgressRecord {
            student_id,
            season_id,
            progress_percentage: percentage,
            is_completed,
            completion_date: is_completed.then(|| now.date_naive()),
        });
    }
}

/// The completed list is authoritative: a project appearing in both lists is
/// recorded once, as completed.
fn plan_project_completion(
    student_id: Uuid,
    record: &NormalizedStudentRecord,
    lookups: &IdLookups,
    now: DateTime<Utc>,
    out: &mut HashMap<(Uuid, Uuid), ProjectCompletionRecord>,
) {
    for project_name in &record.completed_projects {
        let Some(&project_id) = lookups.projects.get(project_name) else {
            debug!(student = %record.name, project = %project_name, "unknown project name");
            continue;
        };
        out.insert(
            (student_id, project_id),
            ProjectCompletionRecord {
                student_id,
                project_id,
                is_completed: true,
                completion_date: Some(now.date_naive()),
            },
        );
    }

    for project_name in &record.ongoing_projects {
        let Some(&project_id) = lookups.projects.get(project_name) else {
            debug!(student = %record.name, project = %project_name, "unknown project name");
            continue;
        };
        out.entry((student_id, project_id))
            .or_insert(ProjectCompletionRecord {
                student_id,
                project_id,
                is_completed: false,
                completion_date: None,
            });
    }
}
