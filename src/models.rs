use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Login details for one student. The portal's password is the date of
/// birth, so it is kept as a real date rather than loose day/month/year.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub identifier: String,
    pub date_of_birth: NaiveDate,
    pub expected_full_name: String,
}

impl Credentials {
    pub fn new(
        identifier: impl Into<String>,
        date_of_birth: NaiveDate,
        expected_full_name: impl Into<String>,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            date_of_birth,
            expected_full_name: expected_full_name.into(),
        }
    }

    pub fn day(&self) -> String {
        format!("{:02}", self.date_of_birth.day())
    }

    pub fn month(&self) -> String {
        format!("{:02}", self.date_of_birth.month())
    }

    pub fn year(&self) -> String {
        format!("{:04}", self.date_of_birth.year())
    }

    /// `YYYY-MM-DD`, the value the portal expects in its password field.
    pub fn password(&self) -> String {
        self.date_of_birth.format("%Y-%m-%d").to_string()
    }
}

/// A logged-in session and the page the portal returned after login.
#[derive(Debug, Clone)]
pub struct AuthenticatedPage {
    pub session: reqwest::Client,
    pub html: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRecord {
    pub subject_code: String,
    pub percentage: u8,
}

/// One cell of the marks chart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MarkValue {
    Score(f64),
    Raw(String),
    /// The exam has not happened yet.
    Missing,
}

impl MarkValue {
    pub fn score(&self) -> Option<f64> {
        match self {
            MarkValue::Score(value) => Some(*value),
            _ => None,
        }
    }
}

impl fmt::Display for MarkValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarkValue::Score(value) => write!(f, "{value}"),
            MarkValue::Raw(token) => write!(f, "{token}"),
            MarkValue::Missing => write!(f, "N/A"),
        }
    }
}

/// Exam type -> mark for a single subject.
pub type SubjectMarks = BTreeMap<String, MarkValue>;

/// Subject code -> exam type -> mark, exactly as the chart declared it.
pub type RawMarksTable = BTreeMap<String, SubjectMarks>;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SubjectTotal {
    pub total: f64,
    pub max_total: f64,
}

impl SubjectTotal {
    pub fn percentage(&self) -> f64 {
        if self.max_total > 0.0 {
            self.total * 100.0 / self.max_total
        } else {
            0.0
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum GradeLetter {
    F,
    P,
    C,
    B,
    #[serde(rename = "B+")]
    BPlus,
    A,
    #[serde(rename = "A+")]
    APlus,
    O,
}

impl GradeLetter {
    pub fn as_str(&self) -> &'static str {
        match self {
            GradeLetter::F => "F",
            GradeLetter::P => "P",
            GradeLetter::C => "C",
            GradeLetter::B => "B",
            GradeLetter::BPlus => "B+",
            GradeLetter::A => "A",
            GradeLetter::APlus => "A+",
            GradeLetter::O => "O",
        }
    }
}

impl fmt::Display for GradeLetter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GradeResult {
    pub grade_point: u32,
    pub letter: GradeLetter,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectGrade {
    pub code: String,
    pub name: String,
    pub credits: u32,
    pub marks: f64,
    pub max_marks: f64,
    pub percentage: f64,
    pub grade_point: u32,
    pub grade: GradeLetter,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SemesterSummary {
    pub sgpa: f64,
    pub total_credits: u32,
    pub total_grade_points: u32,
    #[serde(default)]
    pub subjects: Vec<SubjectGrade>,
    #[serde(default)]
    pub grade_distribution: BTreeMap<GradeLetter, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SemesterBreakdown {
    pub semester: usize,
    pub sgpa: f64,
    pub credits: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CumulativeSummary {
    pub cgpa: f64,
    pub total_credits: u32,
    pub total_grade_points: u32,
    pub semesters: Vec<SemesterBreakdown>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IncompleteSubject {
    pub code: String,
    pub name: String,
    pub credits: u32,
    pub missing_exams: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectRecommendation {
    pub code: String,
    pub name: String,
    pub credits: u32,
    pub grade_point_needed: f64,
    pub minimum_marks_needed: f64,
    pub grade_needed: GradeLetter,
    pub missing_exams: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetOutcome {
    AllComplete,
    NoIncompleteCredits,
    Achievable,
    Unreachable,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetAnalysis {
    pub achievable: bool,
    pub outcome: TargetOutcome,
    pub current_sgpa: f64,
    pub target_sgpa: f64,
    pub needed_grade_points: Option<f64>,
    pub avg_grade_point_needed: Option<f64>,
    pub incomplete_subjects: Vec<IncompleteSubject>,
    pub recommendations: Vec<SubjectRecommendation>,
}

/// Everything recovered from one login, as written to disk by `fetch` and
/// `batch`. `None` means extraction failed, not that the data was empty.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeSnapshot {
    pub id: Uuid,
    pub scraped_at: DateTime<Utc>,
    pub identifier: String,
    pub full_name: String,
    pub attendance: Option<Vec<AttendanceRecord>>,
    pub marks: Option<RawMarksTable>,
    pub semester: Option<SemesterSummary>,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RosterEntry {
    pub identifier: String,
    pub full_name: String,
    pub date_of_birth: NaiveDate,
}

impl From<&RosterEntry> for Credentials {
    fn from(entry: &RosterEntry) -> Self {
        Credentials::new(&entry.identifier, entry.date_of_birth, &entry.full_name)
    }
}
