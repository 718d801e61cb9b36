use std::fmt::Write;

use crate::grades::grade_remark;
use crate::models::{ScrapeSnapshot, TargetAnalysis, TargetOutcome};

pub fn build_report(snapshot: &ScrapeSnapshot, target: Option<&TargetAnalysis>) -> String {
    let mut output = String::new();

    let _ = writeln!(output, "# Academic Report");
    let _ = writeln!(
        output,
        "Generated for {} ({}) from data scraped {}",
        snapshot.full_name,
        snapshot.identifier,
        snapshot.scraped_at.format("%Y-%m-%d %H:%M UTC")
    );
    let _ = writeln!(output);
    let _ = writeln!(output, "## Attendance");

    match &snapshot.attendance {
        None => {
            let _ = writeln!(output, "Attendance chart was not found on the dashboard.");
        }
        Some(records) if records.is_empty() => {
            let _ = writeln!(output, "No attendance recorded yet.");
        }
        Some(records) => {
            for record in records {
                let _ = writeln!(output, "- {}: {}%", record.subject_code, record.percentage);
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## CIE Marks");

    match &snapshot.marks {
        None => {
            let _ = writeln!(output, "Marks chart was not found on the dashboard.");
        }
        Some(table) if table.is_empty() => {
            let _ = writeln!(output, "No marks recorded yet.");
        }
        Some(table) => {
            for (subject, exams) in table {
                let cells: Vec<String> = exams
                    .iter()
                    .map(|(exam, mark)| format!("{exam} {mark}"))
                    .collect();
                let _ = writeln!(output, "- {}: {}", subject, cells.join(", "));
            }
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Semester Summary");

    match &snapshot.semester {
        Some(summary) if !summary.subjects.is_empty() => {
            let _ = writeln!(
                output,
                "SGPA {:.2} over {} credits ({})",
                summary.sgpa,
                summary.total_credits,
                grade_remark(summary.sgpa)
            );
            let _ = writeln!(output);
            for subject in &summary.subjects {
                let _ = writeln!(
                    output,
                    "- {} ({}): {}/{} ({:.2}%) grade {} [{} GP x {} credits]",
                    subject.name,
                    subject.code,
                    subject.marks,
                    subject.max_marks,
                    subject.percentage,
                    subject.grade,
                    subject.grade_point,
                    subject.credits
                );
            }
            let mix: Vec<String> = summary
                .grade_distribution
                .iter()
                .rev()
                .map(|(letter, count)| format!("{letter} x{count}"))
                .collect();
            let _ = writeln!(output);
            let _ = writeln!(output, "Grade mix: {}", mix.join(", "));
        }
        _ => {
            let _ = writeln!(output, "No graded subjects yet.");
        }
    }

    if let Some(analysis) = target {
        let _ = writeln!(output);
        let _ = writeln!(output, "## Target SGPA {:.2}", analysis.target_sgpa);
        write_target(&mut output, analysis);
    }

    output
}

fn write_target(output: &mut String, analysis: &TargetAnalysis) {
    match analysis.outcome {
        TargetOutcome::AllComplete => {
            let verdict = if analysis.achievable { "met" } else { "missed" };
            let _ = writeln!(
                output,
                "All subjects are graded; current SGPA {:.2}, target {}.",
                analysis.current_sgpa, verdict
            );
            return;
        }
        TargetOutcome::NoIncompleteCredits => {
            let _ = writeln!(
                output,
                "Remaining subjects carry no credits, so the target cannot move."
            );
            return;
        }
        TargetOutcome::Achievable | TargetOutcome::Unreachable => {}
    }

    if let Some(avg) = analysis.avg_grade_point_needed {
        let _ = writeln!(
            output,
            "Needs an average of {:.2} grade points across incomplete subjects ({}).",
            avg,
            if analysis.achievable {
                "achievable"
            } else {
                "not achievable"
            }
        );
    }
    for rec in &analysis.recommendations {
        let missing = if rec.missing_exams.is_empty() {
            String::new()
        } else {
            format!("; pending {}", rec.missing_exams.join(", "))
        };
        let _ = writeln!(
            output,
            "- {} ({}): at least {:.0}% for grade {}{}",
            rec.name, rec.code, rec.minimum_marks_needed, rec.grade_needed, missing
        );
    }
}
