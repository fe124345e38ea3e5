use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::warn;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod attendance;
mod auth;
mod config;
mod db;
mod error;
mod extract;
mod fetch;
mod models;
mod normalize;
mod plan;
mod snapshot;

use auth::PortalClient;
use config::ScrapeConfig;
use models::StudentRecord;

#[derive(Parser)]
#[command(name = "progress-sync")]
#[command(about = "Scrapes the learning portal and syncs student progress into the backend", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Scrape every student profile and write the snapshot file
    Scrape {
        /// Scrape only the first N students (for testing)
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        include_inactive: bool,
        /// Politeness delay between profile requests
        #[arg(long, default_value_t = 500)]
        delay_ms: u64,
        #[arg(long, default_value = "public/student_grades.json")]
        snapshot: PathBuf,
    },
    /// Normalize scraped records and upsert them into the backend tables
    Sync {
        /// Scrape fresh data instead of reading the snapshot file
        #[arg(long)]
        scrape: bool,
        /// Update student attributes (last login, avatar, points)
        #[arg(long)]
        students: bool,
        /// Upsert project completion records
        #[arg(long)]
        projects: bool,
        /// Upsert season progress records
        #[arg(long)]
        progress: bool,
        /// Also remove cross-program season progress rows
        #[arg(long)]
        cleanup: bool,
        /// Run every operation
        #[arg(long)]
        all: bool,
        #[arg(long)]
        limit: Option<i64>,
        #[arg(long)]
        include_inactive: bool,
        #[arg(long, default_value_t = 500)]
        delay_ms: u64,
        #[arg(long, default_value = "public/student_grades.json")]
        snapshot: PathBuf,
    },
    /// Remove season progress rows whose season belongs to another program
    Cleanup,
    /// Import attendance counts from a spreadsheet export
    Attendance {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Recompute points_assigned from the attendance counters
    Points,
    /// Assign each student's expected season from their cohort's schedule
    ExpectedSeasons,
    /// Run the backend student-status derivation routine
    Status {
        /// Also record the status distribution into progress_snapshots
        #[arg(long)]
        snapshot: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "upskill_progress_sync=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to the backend Postgres instance")?;

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::Scrape {
            limit,
            include_inactive,
            delay_ms,
            snapshot,
        } => {
            let records = scrape_live(&pool, limit, include_inactive, delay_ms, &snapshot).await?;
            println!("Scrape complete: {} students captured.", records.len());
        }
        Commands::Sync {
            scrape,
            students,
            projects,
            progress,
            cleanup,
            all,
            limit,
            include_inactive,
            delay_ms,
            snapshot,
        } => {
            let (students, projects, progress, cleanup) = if all {
                (true, true, true, true)
            } else {
                (students, projects, progress, cleanup)
            };
            anyhow::ensure!(
                students || projects || progress || cleanup,
                "select at least one of --students/--projects/--progress/--cleanup, or --all"
            );

            let records = if scrape {
                scrape_with_fallback(&pool, limit, include_inactive, delay_ms, &snapshot).await?
            } else {
                snapshot::load(&snapshot)?
            };
            anyhow::ensure!(!records.is_empty(), "no student records to process");

            let now = Utc::now();
            let normalized = normalize::normalize_records(records, now);
            let lookups = db::load_lookups(&pool).await?;
            let batch = plan::plan(&normalized, &lookups, now);

            db::apply_batch(&pool, &batch, students, progress, projects).await?;
            if cleanup {
                let removed = db::cleanup_cross_program(&pool).await?;
                println!("Removed {removed} cross-program season progress rows.");
            }
        }
        Commands::Cleanup => {
            let removed = db::cleanup_cross_program(&pool).await?;
            println!("Removed {removed} cross-program season progress rows.");
        }
        Commands::Attendance { csv } => {
            let rows = attendance::load_responses(&csv)?;
            println!("Read {} form responses from {}.", rows.len(), csv.display());

            let counts = attendance::aggregate(&rows);
            anyhow::ensure!(!counts.is_empty(), "no valid attendance rows to process");

            let (updated, not_found) = db::update_attendance(&pool, &counts).await?;
            println!("Updated attendance for {updated} students.");
            if !not_found.is_empty() {
                println!("{} emails had no matching student:", not_found.len());
                for email in not_found.iter().take(10) {
                    println!("- {email}");
                }
            }
        }
        Commands::Points => {
            let updated = db::update_points_assigned(&pool).await?;
            println!("Recomputed points_assigned for {updated} students.");
        }
        Commands::ExpectedSeasons => {
            let updated = db::assign_expected_seasons(&pool, Utc::now().date_naive()).await?;
            println!("Assigned expected seasons for {updated} students.");
        }
        Commands::Status { snapshot } => {
            db::refresh_student_status(&pool).await?;
            println!("Student statuses refreshed.");
            if snapshot {
                let tally = db::record_progress_snapshot(&pool).await?;
                println!(
                    "Snapshot recorded: {} students ({} ahead, {} on track, {} behind).",
                    tally.total, tally.ahead, tally.on_track, tally.behind
                );
            }
        }
    }

    Ok(())
}

/// Scrapes the portal and writes the snapshot. Authentication failure or an
/// empty result is an error; the caller decides whether a fallback applies.
async fn scrape_live(
    pool: &PgPool,
    limit: Option<i64>,
    include_inactive: bool,
    delay_ms: u64,
    snapshot_path: &Path,
) -> anyhow::Result<Vec<StudentRecord>> {
    let usernames = db::fetch_student_usernames(pool, limit, include_inactive).await?;
    anyhow::ensure!(!usernames.is_empty(), "no student usernames in the backend");

    let config = ScrapeConfig::from_env()?.with_delay_ms(delay_ms);
    let client = PortalClient::new(config)?;
    let (records, report) = client.scrape_students(&usernames).await?;

    println!(
        "Scraped {} / {} students.",
        report.scraped,
        usernames.len()
    );
    for (username, reason) in &report.skipped {
        println!("- skipped {username}: {reason}");
    }
    anyhow::ensure!(!records.is_empty(), "scrape produced zero student records");

    snapshot::save(snapshot_path, &records, Utc::now())?;
    println!("Snapshot written to {}.", snapshot_path.display());
    Ok(records)
}

/// A run that cannot scrape at all falls back to the last snapshot; only if
/// that also fails does the run report total failure.
async fn scrape_with_fallback(
    pool: &PgPool,
    limit: Option<i64>,
    include_inactive: bool,
    delay_ms: u64,
    snapshot_path: &Path,
) -> anyhow::Result<Vec<StudentRecord>> {
    match scrape_live(pool, limit, include_inactive, delay_ms, snapshot_path).await {
        Ok(records) => Ok(records),
        Err(err) => {
            warn!(error = %err, "live scrape failed, falling back to snapshot");
            snapshot::load(snapshot_path)
                .context("scrape failed and the snapshot fallback is unusable")
        }
    }
}
