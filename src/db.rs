use std::collections::HashMap;

use anyhow::Context;
use chrono::NaiveDate;
use sqlx::{PgPool, Row};
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::attendance::{self, AttendanceCounts};
use crate::models::{
    IdLookups, ProjectCompletionRecord, SeasonProgressRecord, StudentUpdate, UpsertBatch,
};

pub async fn fetch_student_usernames(
    pool: &PgPool,
    limit: Option<i64>,
    include_inactive: bool,
) -> anyhow::Result<Vec<String>> {
    let mut query = String::from("SELECT username FROM students WHERE username IS NOT NULL");
    if !include_inactive {
        query.push_str(" AND is_active IS DISTINCT FROM FALSE");
    }
    query.push_str(" ORDER BY username");
    if limit.is_some() {
        query.push_str(" LIMIT $1");
    }

    let mut rows = sqlx::query(&query);
    if let Some(limit) = limit {
        rows = rows.bind(limit);
    }

    let records = rows.fetch_all(pool).await.context("failed to list students")?;
    Ok(records
        .iter()
        .map(|row| row.get::<String, _>("username"))
        .filter(|username| !username.trim().is_empty())
        .collect())
}

/// Loads every name-to-ID table into memory once, before processing begins.
pub async fn load_lookups(pool: &PgPool) -> anyhow::Result<IdLookups> {
    let mut lookups = IdLookups::default();

    let students = sqlx::query("SELECT id, username, program_id FROM students")
        .fetch_all(pool)
        .await
        .context("failed to load student lookup")?;
    for row in students {
        let id: Uuid = row.get("id");
        let username: Option<String> = row.get("username");
        if let Some(username) = username {
            lookups.students.insert(username, id);
        }
        if let Some(program_id) = row.get::<Option<Uuid>, _>("program_id") {
            lookups.student_programs.insert(id, program_id);
        }
    }

    let projects = sqlx::query("SELECT id, name FROM projects")
        .fetch_all(pool)
        .await
        .context("failed to load project lookup")?;
    for row in projects {
        lookups
            .projects
            .insert(row.get("name"), row.get::<Uuid, _>("id"));
    }

    let seasons = sqlx::query("SELECT id, name, program_id FROM seasons")
        .fetch_all(pool)
        .await
        .context("failed to load season lookup")?;
    for row in seasons {
        let program_id: Uuid = row.get("program_id");
        lookups
            .seasons_by_program
            .entry(program_id)
            .or_default()
            .insert(row.get("name"), row.get::<Uuid, _>("id"));
    }

    Ok(lookups)
}

pub async fn update_students(pool: &PgPool, updates: &[StudentUpdate]) -> anyhow::Result<usize> {
    for update in updates {
        sqlx::query(
            r#"
            UPDATE students SET
                last_login = COALESCE($2, last_login),
                img_url = COALESCE($3, img_url),
                points = COALESCE($4, points),
                exercises_completed = COALESCE($5, exercises_completed)
            WHERE id = $1
            "#,
        )
        .bind(update.student_id)
        .bind(update.last_login)
        .bind(&update.img_url)
        .bind(update.points)
        .bind(update.exercises_completed)
        .execute(pool)
        .await?;
    }
    Ok(updates.len())
}

pub async fn upsert_season_progress(
    pool: &PgPool,
    records: &[SeasonProgressRecord],
) -> anyhow::Result<usize> {
    for record in records {
        sqlx::query(
            r#"
            INSERT INTO student_season_progress
            (id, student_id, season_id, progress_percentage, is_completed, completion_date, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, NOW())
            ON CONFLICT (student_id, season_id) DO UPDATE
            SET progress_percentage = EXCLUDED.progress_percentage,
                is_completed = EXCLUDED.is_completed,
                completion_date = EXCLUDED.completion_date,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.student_id)
        .bind(record.season_id)
        .bind(record.progress_percentage)
        .bind(record.is_completed)
        .bind(record.completion_date)
        .execute(pool)
        .await?;
    }
    Ok(records.len())
}

pub async fn upsert_project_completion(
    pool: &PgPool,
    records: &[ProjectCompletionRecord],
) -> anyhow::Result<usize> {
    for record in records {
        sqlx::query(
            r#"
            INSERT INTO student_project_completion
            (id, student_id, project_id, is_completed, completion_date)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (student_id, project_id) DO UPDATE
            SET is_completed = EXCLUDED.is_completed,
                completion_date = EXCLUDED.completion_date
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.student_id)
        .bind(record.project_id)
        .bind(record.is_completed)
        .bind(record.completion_date)
        .execute(pool)
        .await?;
    }
    Ok(records.len())
}

/// Applies the selected table batches. Each table is independent: a failure
/// in one is logged and the others are still attempted.
pub async fn apply_batch(
    pool: &PgPool,
    batch: &UpsertBatch,
    students: bool,
    progress: bool,
    projects: bool,
) -> anyhow::Result<()> {
    let mut failed = Vec::new();

    if students {
        match update_students(pool, &batch.students).await {
            Ok(count) => println!("Updated {count} student records."),
            Err(err) => {
                error!(error = %err, "student batch failed");
                failed.push("students");
            }
        }
    }
    if progress {
        match upsert_season_progress(pool, &batch.season_progress).await {
            Ok(count) => println!("Upserted {count} season progress records."),
            Err(err) => {
                error!(error = %err, "season progress batch failed");
                failed.push("student_season_progress");
            }
        }
    }
    if projects {
        match upsert_project_completion(pool, &batch.project_completion).await {
            Ok(count) => println!("Upserted {count} project completion records."),
            Err(err) => {
                error!(error = %err, "project completion batch failed");
                failed.push("student_project_completion");
            }
        }
    }

    if failed.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("upsert failed for: {}", failed.join(", "))
    }
}

/// Deletes season-progress rows whose student and season belong to different
/// programs. Idempotent; heals data written before the program-scoping rule
/// existed or through other paths.
pub async fn cleanup_cross_program(pool: &PgPool) -> anyhow::Result<usize> {
    let rows = sqlx::query(
        r#"
        SELECT p.id, st.program_id AS student_program, se.program_id AS season_program
        FROM student_season_progress p
        JOIN students st ON st.id = p.student_id
        JOIN seasons se ON se.id = p.season_id
        WHERE st.program_id IS DISTINCT FROM se.program_id
        "#,
    )
    .fetch_all(pool)
    .await
    .context("failed to scan season progress for cross-program rows")?;

    for row in &rows {
        let id: Uuid = row.get("id");
        let student_program: Option<Uuid> = row.get("student_program");
        let season_program: Option<Uuid> = row.get("season_program");
        warn!(
            %id,
            ?student_program,
            ?season_program,
            "deleting cross-program season progress row"
        );
        sqlx::query("DELETE FROM student_season_progress WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
    }

    Ok(rows.len())
}

/// Replaces the three attendance counters for every student matched by email.
/// Returns the number updated and the emails with no matching student.
pub async fn update_attendance(
    pool: &PgPool,
    counts: &HashMap<String, AttendanceCounts>,
) -> anyhow::Result<(usize, Vec<String>)> {
    let rows = sqlx::query("SELECT id, email FROM students WHERE email IS NOT NULL")
        .fetch_all(pool)
        .await
        .context("failed to load student emails")?;
    let students: HashMap<String, Uuid> = rows
        .iter()
        .map(|row| {
            (
                row.get::<String, _>("email").to_lowercase(),
                row.get::<Uuid, _>("id"),
            )
        })
        .collect();

    let mut updated = 0usize;
    let mut not_found = Vec::new();

    for (email, counts) in counts {
        let Some(&student_id) = students.get(email) else {
            not_found.push(email.clone());
            continue;
        };

        sqlx::query(
            r#"
            UPDATE students SET
                workshops_attended = $2,
                mentoring_attended = $3,
                standup_attended = $4
            WHERE id = $1
            "#,
        )
        .bind(student_id)
        .bind(counts.workshops)
        .bind(counts.mentoring)
        .bind(counts.standups)
        .execute(pool)
        .await?;
        updated += 1;
    }

    Ok((updated, not_found))
}

/// Recomputes `points_assigned` for every student from the attendance
/// counters already stored on the row.
pub async fn update_points_assigned(pool: &PgPool) -> anyhow::Result<usize> {
    let rows = sqlx::query(
        "SELECT id, workshops_attended, mentoring_attended, standup_attended FROM students",
    )
    .fetch_all(pool)
    .await
    .context("failed to load attendance counters")?;

    let mut updated = 0usize;
    for row in rows {
        let student_id: Uuid = row.get("id");
        let counts = AttendanceCounts {
            workshops: row.get::<Option<i32>, _>("workshops_attended").unwrap_or(0),
            mentoring: row.get::<Option<i32>, _>("mentoring_attended").unwrap_or(0),
            standups: row.get::<Option<i32>, _>("standup_attended").unwrap_or(0),
        };

        sqlx::query("UPDATE students SET points_assigned = $2 WHERE id = $1")
            .bind(student_id)
            .bind(attendance::points_for(&counts))
            .execute(pool)
            .await?;
        updated += 1;
    }

    Ok(updated)
}

/// Invokes the backend routine that derives student status from season
/// progress.
pub async fn refresh_student_status(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::query("SELECT update_student_status_based_on_season_progress()")
        .execute(pool)
        .await
        .context("status derivation routine failed")?;
    Ok(())
}

/// One entry of a cohort's season schedule for a program.
pub struct SeasonWindow {
    pub season_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

/// Picks the season whose window covers `today`. Bounds are inclusive; when
/// schedules overlap, the first covering window wins.
pub fn expected_season_for(windows: &[SeasonWindow], today: NaiveDate) -> Option<Uuid> {
    windows
        .iter()
        .find(|window| window.start_date <= today && today <= window.end_date)
        .map(|window| window.season_id)
}

/// Sets `expected_season_id` for every student from their cohort's season
/// schedule. Students without a cohort or program are left untouched; the
/// status derivation routine reports those as Unknown until they are filled
/// in.
pub async fn assign_expected_seasons(pool: &PgPool, today: NaiveDate) -> anyhow::Result<usize> {
    let students = sqlx::query("SELECT id, cohort_id, program_id FROM students")
        .fetch_all(pool)
        .await
        .context("failed to load students for season assignment")?;

    let mut updated = 0usize;
    for row in &students {
        let student_id: Uuid = row.get("id");
        let cohort_id: Option<Uuid> = row.get("cohort_id");
        let program_id: Option<Uuid> = row.get("program_id");
        let (Some(cohort_id), Some(program_id)) = (cohort_id, program_id) else {
            debug!(%student_id, "no cohort or program, expected season left unset");
            continue;
        };

        let rows = sqlx::query(
            r#"
            SELECT season_id, start_date, end_date
            FROM program_cohort_seasons
            WHERE cohort_id = $1 AND program_id = $2
            "#,
        )
        .bind(cohort_id)
        .bind(program_id)
        .fetch_all(pool)
        .await
        .context("failed to load cohort season windows")?;

        let windows: Vec<SeasonWindow> = rows
            .iter()
            .map(|row| SeasonWindow {
                season_id: row.get("season_id"),
                start_date: row.get("start_date"),
                end_date: row.get("end_date"),
            })
            .collect();

        match expected_season_for(&windows, today) {
            Some(season_id) => {
                sqlx::query("UPDATE students SET expected_season_id = $2 WHERE id = $1")
                    .bind(student_id)
                    .bind(season_id)
                    .execute(pool)
                    .await?;
                updated += 1;
            }
            None => warn!(%student_id, %cohort_id, "no season window covers today"),
        }
    }

    Ok(updated)
}

/// Point-in-time counts of the status distribution.
#[derive(Debug)]
pub struct StatusTally {
    pub total: i64,
    pub on_track: i64,
    pub behind: i64,
    pub ahead: i64,
}

/// Tallies the current status distribution and inserts it as a row of
/// `progress_snapshots`.
pub async fn record_progress_snapshot(pool: &PgPool) -> anyhow::Result<StatusTally> {
    let row = sqlx::query(
        r#"
        SELECT COUNT(*) AS total,
               COUNT(*) FILTER (WHERE status = 'On Track') AS on_track,
               COUNT(*) FILTER (WHERE status = 'Behind') AS behind,
               COUNT(*) FILTER (WHERE status = 'Ahead') AS ahead
        FROM students
        "#,
    )
    .fetch_one(pool)
    .await
    .context("failed to tally student statuses")?;

    let tally = StatusTally {
        total: row.get("total"),
        on_track: row.get("on_track"),
        behind: row.get("behind"),
        ahead: row.get("ahead"),
    };

    sqlx::query(
        r#"
        INSERT INTO progress_snapshots (total_students, on_track, behind, ahead)
        VALUES ($1, $2, $3, $4)
        "#,
    )
    .bind(tally.total)
    .bind(tally.on_track)
    .bind(tally.behind)
    .bind(tally.ahead)
    .execute(pool)
    .await
    .context("failed to insert progress snapshot")?;

    Ok(tally)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn window(season_id: Uuid, start: &str, end: &str) -> SeasonWindow {
        SeasonWindow {
            season_id,
            start_date: start.parse().unwrap(),
            end_date: end.parse().unwrap(),
        }
    }

    #[test]
    fn season_window_covering_today_is_selected() {
        let winter = Uuid::new_v4();
        let spring = Uuid::new_v4();
        let windows = vec![
            window(winter, "2026-01-05", "2026-03-27"),
            window(spring, "2026-03-30", "2026-06-19"),
        ];

        assert_eq!(
            expected_season_for(&windows, "2026-04-15".parse().unwrap()),
            Some(spring)
        );
    }

    #[test]
    fn window_bounds_are_inclusive() {
        let season = Uuid::new_v4();
        let windows = vec![window(season, "2026-01-05", "2026-03-27")];

        assert_eq!(
            expected_season_for(&windows, "2026-01-05".parse().unwrap()),
            Some(season)
        );
        assert_eq!(
            expected_season_for(&windows, "2026-03-27".parse().unwrap()),
            Some(season)
        );
        assert_eq!(expected_season_for(&windows, "2026-03-28".parse().unwrap()), None);
        assert_eq!(expected_season_for(&windows, "2026-01-04".parse().unwrap()), None);
    }

    #[test]
    fn first_window_wins_when_schedules_overlap() {
        let first = Uuid::new_v4();
        let second = Uuid::new_v4();
        let windows = vec![
            window(first, "2026-01-05", "2026-04-03"),
            window(second, "2026-03-30", "2026-06-19"),
        ];

        assert_eq!(
            expected_season_for(&windows, "2026-04-01".parse().unwrap()),
            Some(first)
        );
    }
}
