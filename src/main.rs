use std::path::PathBuf;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{ArgGroup, Parser, Subcommand, ValueEnum};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

mod config;
mod db;
mod engine;
mod error;
mod models;
mod report;
mod risk;

#[derive(Parser)]
#[command(name = "sentinelle")]
#[command(about = "Student risk detection for school administrators and parents", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Markdown,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load a demo school with students, grades and attendance
    Seed,
    /// Import attendance or grades from a CSV file
    #[command(group(
        ArgGroup::new("source")
            .args(["attendance", "grades"])
            .required(true)
            .multiple(false)
    ))]
    Import {
        #[arg(long)]
        attendance: Option<PathBuf>,
        #[arg(long)]
        grades: Option<PathBuf>,
    },
    /// List at-risk students of a school, most absences first
    School {
        #[arg(long)]
        school: Option<Uuid>,
        /// Evaluation time (RFC 3339), defaults to now
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
        format: OutputFormat,
        #[arg(long, default_value_t = 25)]
        limit: usize,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Assess a single student
    Student {
        #[arg(long)]
        student: Option<Uuid>,
        /// Restrict the lookup to this school
        #[arg(long)]
        school: Option<Uuid>,
        #[arg(long)]
        as_of: Option<DateTime<Utc>>,
        #[arg(long, value_enum, default_value_t = OutputFormat::Markdown)]
        format: OutputFormat,
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn emit(output: String, out: Option<PathBuf>) -> anyhow::Result<()> {
    match out {
        Some(path) => {
            std::fs::write(&path, output)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Report written to {}.", path.display());
        }
        None => print!("{output}"),
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(config::DEFAULT_LOG_FILTER)),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = config::AppConfig::from_env()?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.connect_timeout)
        .connect(&config.database_url)
        .await
        .context("failed to connect to Postgres")?;

    match cli.command {
        Commands::InitDb => {
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let school_id = db::seed(&pool).await?;
            println!("Seed data inserted for school {school_id}.");
        }
        Commands::Import { attendance, grades } => {
            if let Some(csv) = attendance {
                let inserted = db::import_attendance_csv(&pool, &csv).await?;
                println!("Inserted {inserted} attendance records from {}.", csv.display());
            }
            if let Some(csv) = grades {
                let inserted = db::import_grades_csv(&pool, &csv).await?;
                println!("Inserted {inserted} grades from {}.", csv.display());
            }
        }
        Commands::School {
            school,
            as_of,
            format,
            limit,
            out,
        } => {
            let now = as_of.unwrap_or_else(Utc::now);
            let source = db::PgRecordSource::new(pool.clone());
            let reports = engine::produce_school_risk_report(&source, school, now).await?;

            let output = match format {
                OutputFormat::Json => report::to_json(&reports)?,
                OutputFormat::Markdown => {
                    let mut label = String::new();
                    if let Some(school_id) = school {
                        let name = db::fetch_school_name(&pool, school_id).await?;
                        label = report::school_label(school_id, name.as_deref());
                    }
                    report::build_school_report(&label, now, &reports, limit)
                }
            };
            emit(output, out)?;
        }
        Commands::Student {
            student,
            school,
            as_of,
            format,
            out,
        } => {
            let now = as_of.unwrap_or_else(Utc::now);
            let scope = engine::RiskScope::resolve(school, student)?;
            let source = db::PgRecordSource::new(pool.clone());

            let Some(student_report) =
                engine::produce_student_risk_report(&source, scope, now).await?
            else {
                println!("No matching student found.");
                return Ok(());
            };

            let output = match format {
                OutputFormat::Json => report::to_json(&student_report)?,
                OutputFormat::Markdown => report::build_student_summary(&student_report),
            };
            emit(output, out)?;
        }
    }

    Ok(())
}
