use std::collections::BTreeMap;

use crate::config::GradingConfig;
use crate::max_marks::MaxMarksResolver;
use crate::models::{
    CumulativeSummary, GradeLetter, GradeResult, IncompleteSubject, RawMarksTable,
    SemesterBreakdown, SemesterSummary, SubjectGrade, SubjectMarks, SubjectRecommendation,
    SubjectTotal, TargetAnalysis, TargetOutcome,
};

/// Lower percentage bound of each band, highest first. Every percentage
/// falls in exactly one band.
pub const GRADE_BANDS: [(f64, u32, GradeLetter); 8] = [
    (85.0, 10, GradeLetter::O),
    (80.0, 9, GradeLetter::APlus),
    (70.0, 8, GradeLetter::A),
    (60.0, 7, GradeLetter::BPlus),
    (50.0, 6, GradeLetter::B),
    (45.0, 5, GradeLetter::C),
    (40.0, 4, GradeLetter::P),
    (0.0, 0, GradeLetter::F),
];

const FAIL: GradeResult = GradeResult {
    grade_point: 0,
    letter: GradeLetter::F,
};

pub fn grade_point(marks: f64, max_marks: f64) -> GradeResult {
    if !(marks >= 0.0) || !(max_marks > 0.0) {
        return FAIL;
    }
    let percentage = marks * 100.0 / max_marks;
    GRADE_BANDS
        .iter()
        .find(|(lower, _, _)| percentage >= *lower)
        .map(|&(_, grade_point, letter)| GradeResult {
            grade_point,
            letter,
        })
        .unwrap_or(FAIL)
}

pub fn grade_remark(grade_point: f64) -> &'static str {
    match grade_point {
        gp if gp >= 9.0 => "Excellent",
        gp if gp >= 8.0 => "Very good",
        gp if gp >= 7.0 => "Good",
        gp if gp >= 6.0 => "Above average",
        gp if gp >= 5.0 => "Average",
        _ => "Needs improvement",
    }
}

/// Credit-weighted average of already summarised semesters.
pub fn cgpa(semesters: &[SemesterSummary]) -> CumulativeSummary {
    let mut total_points = 0u32;
    let mut total_credits = 0u32;
    let mut breakdown = Vec::with_capacity(semesters.len());

    for (index, semester) in semesters.iter().enumerate() {
        total_points += semester.total_grade_points;
        total_credits += semester.total_credits;
        breakdown.push(SemesterBreakdown {
            semester: index + 1,
            sgpa: semester.sgpa,
            credits: semester.total_credits,
        });
    }

    CumulativeSummary {
        cgpa: weighted_average(total_points, total_credits),
        total_credits,
        total_grade_points: total_points,
        semesters: breakdown,
    }
}

fn weighted_average(points: u32, credits: u32) -> f64 {
    if credits == 0 {
        0.0
    } else {
        f64::from(points) / f64::from(credits)
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubjectKind {
    Theory,
    Lab,
    Project,
    Skill,
}

#[derive(Debug, Clone)]
pub struct GradeEngine {
    config: GradingConfig,
    resolver: MaxMarksResolver,
}

impl GradeEngine {
    pub fn new(config: GradingConfig) -> Self {
        let resolver = MaxMarksResolver::new(config.max_marks_overrides.clone());
        Self { config, resolver }
    }

    pub fn kind(&self, subject_code: &str) -> SubjectKind {
        let has_prefix =
            |prefixes: &[String]| prefixes.iter().any(|p| subject_code.starts_with(p.as_str()));
        if has_prefix(self.config.lab_prefixes.as_slice()) {
            SubjectKind::Lab
        } else if has_prefix(self.config.project_prefixes.as_slice()) {
            SubjectKind::Project
        } else if !self.config.skill_marker.is_empty()
            && subject_code
                .to_uppercase()
                .contains(&self.config.skill_marker.to_uppercase())
        {
            SubjectKind::Skill
        } else {
            SubjectKind::Theory
        }
    }

    pub fn credits(&self, subject_code: &str) -> u32 {
        if let Some(credits) = self.config.subject_credits.get(subject_code) {
            return *credits;
        }
        let defaults = &self.config.credit_defaults;
        match self.kind(subject_code) {
            SubjectKind::Lab => defaults.lab,
            SubjectKind::Project => defaults.project,
            SubjectKind::Skill => defaults.skill,
            SubjectKind::Theory => defaults.theory,
        }
    }

    /// Sum of the numeric components and of their maxima. `None` when
    /// nothing has been marked yet, which is not the same as scoring zero.
    pub fn subject_total(&self, marks: &SubjectMarks, subject_code: &str) -> Option<SubjectTotal> {
        let mut total = 0.0;
        let mut max_total = 0.0;
        let mut has_marks = false;

        for (exam_type, mark) in marks {
            let Some(value) = mark.score() else {
                continue;
            };
            total += value;
            max_total += self.resolver.resolve(subject_code, exam_type, value);
            has_marks = true;
        }

        has_marks.then_some(SubjectTotal { total, max_total })
    }

    pub fn sgpa(&self, table: &RawMarksTable) -> SemesterSummary {
        let mut total_points = 0u32;
        let mut total_credits = 0u32;
        let mut subjects = Vec::new();
        let mut grade_distribution = BTreeMap::new();

        for (code, marks) in table {
            let Some(subject) = self.subject_total(marks, code) else {
                continue;
            };
            let grade = grade_point(subject.total, subject.max_total);
            let credits = self.credits(code);

            total_points += grade.grade_point * credits;
            total_credits += credits;
            *grade_distribution.entry(grade.letter).or_insert(0) += 1;

            subjects.push(SubjectGrade {
                code: code.clone(),
                name: self.config.subject_name(code).to_string(),
                credits,
                marks: subject.total,
                max_marks: subject.max_total,
                percentage: round2(subject.percentage()),
                grade_point: grade.grade_point,
                grade: grade.letter,
            });
        }

        SemesterSummary {
            sgpa: weighted_average(total_points, total_credits),
            total_credits,
            total_grade_points: total_points,
            subjects,
            grade_distribution,
        }
    }

    fn missing_exams(&self, subject_code: &str, marks: &SubjectMarks) -> Vec<String> {
        let required = match self.kind(subject_code) {
            SubjectKind::Theory => &self.config.theory_components,
            SubjectKind::Lab => &self.config.lab_components,
            SubjectKind::Project | SubjectKind::Skill => return Vec::new(),
        };
        required
            .iter()
            .filter(|exam| marks.get(exam.as_str()).and_then(|m| m.score()).is_none())
            .cloned()
            .collect()
    }

    /// What the remaining subjects need for the semester to reach
    /// `target_sgpa`. Every incomplete subject is asked for the same
    /// average grade point.
    pub fn target_analysis(&self, table: &RawMarksTable, target_sgpa: f64) -> TargetAnalysis {
        let current_sgpa = self.sgpa(table).sgpa;

        let mut earned_points = 0.0;
        let mut complete_credits = 0u32;
        let mut incomplete = Vec::new();

        for (code, marks) in table {
            let credits = self.credits(code);
            match self.subject_total(marks, code) {
                Some(subject) => {
                    // scored against 100, as if the marks were a percentage
                    let grade = grade_point(subject.total, 100.0);
                    earned_points += f64::from(grade.grade_point * credits);
                    complete_credits += credits;
                }
                None => incomplete.push(IncompleteSubject {
                    code: code.clone(),
                    name: self.config.subject_name(code).to_string(),
                    credits,
                    missing_exams: self.missing_exams(code, marks),
                }),
            }
        }

        let mut analysis = TargetAnalysis {
            achievable: current_sgpa >= target_sgpa,
            outcome: TargetOutcome::AllComplete,
            current_sgpa,
            target_sgpa,
            needed_grade_points: None,
            avg_grade_point_needed: None,
            incomplete_subjects: Vec::new(),
            recommendations: Vec::new(),
        };
        if incomplete.is_empty() {
            return analysis;
        }

        let incomplete_credits: u32 = incomplete.iter().map(|s| s.credits).sum();
        let all_credits = complete_credits + incomplete_credits;
        let needed_points = target_sgpa * f64::from(all_credits) - earned_points;
        analysis.needed_grade_points = Some(needed_points);

        if incomplete_credits == 0 {
            analysis.achievable = false;
            analysis.outcome = TargetOutcome::NoIncompleteCredits;
            analysis.incomplete_subjects = incomplete;
            return analysis;
        }

        let avg_needed = needed_points / f64::from(incomplete_credits);
        let (minimum_marks, grade_needed) = lowest_band_reaching(avg_needed);

        analysis.recommendations = incomplete
            .iter()
            .map(|subject| SubjectRecommendation {
                code: subject.code.clone(),
                name: subject.name.clone(),
                credits: subject.credits,
                grade_point_needed: avg_needed,
                minimum_marks_needed: minimum_marks,
                grade_needed,
                missing_exams: subject.missing_exams.clone(),
            })
            .collect();
        analysis.achievable = avg_needed <= 10.0;
        analysis.outcome = if analysis.achievable {
            TargetOutcome::Achievable
        } else {
            TargetOutcome::Unreachable
        };
        analysis.avg_grade_point_needed = Some(avg_needed);
        analysis.incomplete_subjects = incomplete;
        analysis
    }
}

/// Lower percentage bound and letter of the easiest band worth at least
/// `grade_point`; the top band when none is.
// Scans upward: stopping at the first band from the top would ask for O
// whatever the target.
fn lowest_band_reaching(grade_point: f64) -> (f64, GradeLetter) {
    GRADE_BANDS
        .iter()
        .rev()
        .find(|(_, gp, _)| f64::from(*gp) >= grade_point)
        .or_else(|| GRADE_BANDS.first())
        .map(|&(lower, _, letter)| (lower, letter))
        .unwrap_or((85.0, GradeLetter::O))
}
