use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use chrono::{NaiveDate, Utc};
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use uuid::Uuid;

mod config;
mod extract;
mod grades;
mod html;
mod literal;
mod login;
mod max_marks;
mod models;
mod pacing;
mod report;
mod roster;

use config::AppConfig;
use extract::ChartRecordExtractor;
use grades::GradeEngine;
use login::FormLoginClient;
use models::{
    AttendanceRecord, Credentials, RawMarksTable, ScrapeSnapshot, SemesterSummary, TargetAnalysis,
};

#[derive(Parser)]
#[command(name = "cie-tracker")]
#[command(about = "Attendance and CIE marks tracker for the student portal", long_about = None)]
struct Cli {
    /// JSON config file (defaults to $CIE_TRACKER_CONFIG, then built-ins)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Log in as one student and print attendance, marks and SGPA
    Fetch {
        #[arg(long)]
        id: String,
        /// Date of birth, YYYY-MM-DD
        #[arg(long)]
        dob: NaiveDate,
        #[arg(long)]
        name: String,
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Fetch every student in a roster CSV, one snapshot each
    Batch {
        #[arg(long)]
        roster: PathBuf,
        #[arg(long)]
        out_dir: PathBuf,
        /// Seconds between logins (overrides config)
        #[arg(long)]
        delay_secs: Option<u64>,
    },
    /// Print the semester summary of a snapshot
    Grades {
        #[arg(long)]
        snapshot: PathBuf,
    },
    /// Work out what the remaining exams need for a target SGPA
    Target {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        sgpa: f64,
    },
    /// Combine semester summaries into a CGPA
    Cgpa {
        #[arg(long)]
        semesters: PathBuf,
    },
    /// Generate a markdown report
    Report {
        #[arg(long)]
        snapshot: PathBuf,
        #[arg(long)]
        target: Option<f64>,
        #[arg(long, default_value = "report.md")]
        out: PathBuf,
    },
}

/// Everything needed to turn a login into a snapshot.
struct Scraper {
    client: FormLoginClient,
    extractor: ChartRecordExtractor,
    engine: GradeEngine,
}

impl Scraper {
    fn new(config: &AppConfig) -> Self {
        Self {
            client: FormLoginClient::new(config.portal.clone()),
            extractor: ChartRecordExtractor::new(&config.portal),
            engine: GradeEngine::new(config.grading.clone()),
        }
    }

    async fn scrape(&self, credentials: &Credentials) -> Option<ScrapeSnapshot> {
        let page = self.client.authenticate(credentials).await?;

        let attendance = self.extractor.extract_attendance(&page.html);
        let marks = self.extractor.extract_marks(&page.html);
        if attendance.is_none() {
            warn!(identifier = %credentials.identifier, "no attendance chart on dashboard");
        }
        if marks.is_none() {
            warn!(identifier = %credentials.identifier, "no marks chart on dashboard");
        }
        let semester = marks.as_ref().map(|table| self.engine.sgpa(table));

        Some(ScrapeSnapshot {
            id: Uuid::new_v4(),
            scraped_at: Utc::now(),
            identifier: credentials.identifier.clone(),
            full_name: credentials.expected_full_name.clone(),
            attendance,
            marks,
            semester,
        })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = AppConfig::load(cli.config.as_deref()).context("failed to load configuration")?;

    match cli.command {
        Commands::Fetch { id, dob, name, out } => {
            let credentials = Credentials::new(id, dob, name);
            let scraper = Scraper::new(&config);
            let snapshot = scraper
                .scrape(&credentials)
                .await
                .with_context(|| format!("login failed for {}", credentials.identifier))?;

            print_attendance(snapshot.attendance.as_deref());
            print_marks(snapshot.marks.as_ref());
            if let Some(summary) = &snapshot.semester {
                print_summary(summary);
            }
            if let Some(out) = out {
                roster::write_snapshot(&out, &snapshot)?;
                println!("Snapshot written to {}.", out.display());
            }
        }
        Commands::Batch {
            roster: roster_path,
            out_dir,
            delay_secs,
        } => {
            let entries = roster::read_roster(&roster_path)?;
            let delay = Duration::from_secs(delay_secs.unwrap_or(config.batch.delay_secs));
            let scraper = Scraper::new(&config);
            let mut pacer = pacing::Pacer::new(delay);
            let mut succeeded = 0usize;
            let mut failed = Vec::new();

            info!(students = entries.len(), delay_secs = delay.as_secs(), "starting batch");
            for entry in &entries {
                pacer.wait().await;
                let credentials = Credentials::from(entry);
                match scraper.scrape(&credentials).await {
                    Some(snapshot) => {
                        let path = roster::snapshot_path(&out_dir, &entry.identifier);
                        match roster::write_snapshot(&path, &snapshot) {
                            Ok(()) => {
                                succeeded += 1;
                                println!("- {} ({}) saved", entry.full_name, entry.identifier);
                            }
                            Err(err) => {
                                let reason = format!("{err:#}");
                                warn!(identifier = %entry.identifier, error = %reason, "could not save snapshot");
                                failed.push(entry.identifier.clone());
                            }
                        }
                    }
                    None => {
                        println!("- {} ({}) failed", entry.full_name, entry.identifier);
                        failed.push(entry.identifier.clone());
                    }
                }
            }

            println!(
                "Fetched {succeeded} of {} students into {}.",
                entries.len(),
                out_dir.display()
            );
            if !failed.is_empty() {
                println!("Failed: {}", failed.join(", "));
            }
        }
        Commands::Grades { snapshot } => {
            let snapshot = roster::read_snapshot(&snapshot)?;
            let engine = GradeEngine::new(config.grading.clone());
            let summary = engine.sgpa(require_marks(&snapshot)?);
            print_summary(&summary);
        }
        Commands::Target { snapshot, sgpa } => {
            let snapshot = roster::read_snapshot(&snapshot)?;
            let engine = GradeEngine::new(config.grading.clone());
            let analysis = engine.target_analysis(require_marks(&snapshot)?, sgpa);
            print_target(&analysis);
        }
        Commands::Cgpa { semesters } => {
            let semesters = roster::read_semesters(&semesters)?;
            let summary = grades::cgpa(&semesters);

            if summary.semesters.is_empty() {
                println!("No semesters given.");
                return Ok(());
            }
            for semester in &summary.semesters {
                println!(
                    "- Semester {}: SGPA {:.2} over {} credits",
                    semester.semester, semester.sgpa, semester.credits
                );
            }
            println!(
                "CGPA {:.2} ({} grade points over {} credits)",
                summary.cgpa, summary.total_grade_points, summary.total_credits
            );
        }
        Commands::Report {
            snapshot,
            target,
            out,
        } => {
            let mut snapshot = roster::read_snapshot(&snapshot)?;
            let engine = GradeEngine::new(config.grading.clone());
            snapshot.semester = snapshot.marks.as_ref().map(|table| engine.sgpa(table));
            let analysis = match (target, snapshot.marks.as_ref()) {
                (Some(sgpa), Some(table)) => Some(engine.target_analysis(table, sgpa)),
                (Some(_), None) => {
                    warn!("snapshot has no marks, skipping target analysis");
                    None
                }
                _ => None,
            };
            let report = report::build_report(&snapshot, analysis.as_ref());
            std::fs::write(&out, report)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!("Report written to {}.", out.display());
        }
    }

    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn require_marks(snapshot: &ScrapeSnapshot) -> anyhow::Result<&RawMarksTable> {
    snapshot.marks.as_ref().with_context(|| {
        format!(
            "snapshot for {} has no marks; the marks chart was not found",
            snapshot.identifier
        )
    })
}

fn print_attendance(records: Option<&[AttendanceRecord]>) {
    match records {
        None => println!("Attendance: not found on dashboard."),
        Some([]) => println!("Attendance: none recorded yet."),
        Some(records) => {
            println!("Attendance:");
            for record in records {
                println!("- {}: {}%", record.subject_code, record.percentage);
            }
        }
    }
}

fn print_marks(table: Option<&RawMarksTable>) {
    let Some(table) = table else {
        println!("Marks: not found on dashboard.");
        return;
    };
    if table.is_empty() {
        println!("Marks: none recorded yet.");
        return;
    }
    println!("Marks:");
    for (subject, exams) in table {
        let cells: Vec<String> = exams
            .iter()
            .map(|(exam, mark)| format!("{exam} {mark}"))
            .collect();
        println!("- {}: {}", subject, cells.join(", "));
    }
}

fn print_summary(summary: &SemesterSummary) {
    if summary.subjects.is_empty() {
        println!("No graded subjects yet.");
        return;
    }
    println!("Subjects:");
    for subject in &summary.subjects {
        println!(
            "- {} ({}) {}/{} ({:.2}%) grade {} ({} credits)",
            subject.name,
            subject.code,
            subject.marks,
            subject.max_marks,
            subject.percentage,
            subject.grade,
            subject.credits
        );
    }
    println!(
        "SGPA {:.2} over {} credits ({})",
        summary.sgpa,
        summary.total_credits,
        grades::grade_remark(summary.sgpa)
    );
}

fn print_target(analysis: &TargetAnalysis) {
    println!(
        "Current SGPA {:.2}, target {:.2}: {}",
        analysis.current_sgpa,
        analysis.target_sgpa,
        if analysis.achievable {
            "achievable"
        } else {
            "not achievable"
        }
    );
    if let Some(needed) = analysis.needed_grade_points {
        println!("Grade points still needed: {needed:.2}");
    }
    if let Some(avg) = analysis.avg_grade_point_needed {
        println!("Average grade point needed per remaining credit: {avg:.2}");
    }
    for rec in &analysis.recommendations {
        println!(
            "- {} ({}, {} credits): at least {:.0}% for grade {}; pending {}",
            rec.name,
            rec.code,
            rec.credits,
            rec.minimum_marks_needed,
            rec.grade_needed,
            if rec.missing_exams.is_empty() {
                "nothing".to_string()
            } else {
                rec.missing_exams.join(", ")
            }
        );
    }
}
