use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

pub const CONFIG_ENV_VAR: &str = "CIE_TRACKER_CONFIG";

const DEFAULT_LOGIN_URL: &str = "https://crce-students.contineo.in/parents/index.php?option=com_studentdashboard&controller=studentdashboard&task=dashboard";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub portal: PortalConfig,
    pub grading: GradingConfig,
    pub batch: BatchConfig,
}

impl AppConfig {
    /// Reads the config from `path`, or from `$CIE_TRACKER_CONFIG`, falling
    /// back to the built-in defaults when neither is given.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let path = path
            .map(Path::to_path_buf)
            .or_else(|| std::env::var_os(CONFIG_ENV_VAR).map(PathBuf::from));

        let config = match path {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.portal.validate()?;
        self.grading.validate()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct FieldNames {
    pub identifier: String,
    pub day: String,
    pub month: String,
    pub year: String,
    pub password: String,
}

impl Default for FieldNames {
    fn default() -> Self {
        Self {
            identifier: "username".to_string(),
            day: "dd".to_string(),
            month: "mm".to_string(),
            year: "yyyy".to_string(),
            password: "passwd".to_string(),
        }
    }
}

impl FieldNames {
    pub fn contains(&self, name: &str) -> bool {
        [
            &self.identifier,
            &self.day,
            &self.month,
            &self.year,
            &self.password,
        ]
        .iter()
        .any(|field| field.as_str() == name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PortalConfig {
    pub login_url: String,
    pub form_action_fallback: String,
    pub login_form_id: String,
    pub fields: FieldNames,
    pub attendance_chart_id: String,
    pub marks_chart_id: String,
    pub invalid_credentials_phrase: String,
    pub request_timeout_secs: u64,
    pub user_agent: String,
    /// Honour `HTTP_PROXY` and friends from the environment.
    pub use_system_proxy: bool,
}

impl Default for PortalConfig {
    fn default() -> Self {
        Self {
            login_url: DEFAULT_LOGIN_URL.to_string(),
            form_action_fallback: DEFAULT_LOGIN_URL.to_string(),
            login_form_id: "login-form".to_string(),
            fields: FieldNames::default(),
            attendance_chart_id: "gaugeTypeMulti".to_string(),
            marks_chart_id: "stackedBarChart_1".to_string(),
            invalid_credentials_phrase: "invalid username or password".to_string(),
            request_timeout_secs: 20,
            user_agent: "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/98.0.4758.102 Safari/537.36".to_string(),
            use_system_proxy: true,
        }
    }
}

impl PortalConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.login_url.trim().is_empty() {
            return Err(ConfigError::Invalid("portal.login_url is empty".into()));
        }
        if self.login_form_id.trim().is_empty() {
            return Err(ConfigError::Invalid("portal.login_form_id is empty".into()));
        }
        let fields = &self.fields;
        for (key, value) in [
            ("identifier", &fields.identifier),
            ("day", &fields.day),
            ("month", &fields.month),
            ("year", &fields.year),
            ("password", &fields.password),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "portal.fields.{key} is empty"
                )));
            }
        }
        if self.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid(
                "portal.request_timeout_secs must be positive".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct CreditDefaults {
    pub theory: u32,
    pub lab: u32,
    pub project: u32,
    pub skill: u32,
}

impl Default for CreditDefaults {
    fn default() -> Self {
        Self {
            theory: 4,
            lab: 2,
            project: 4,
            skill: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct GradingConfig {
    pub subject_names: BTreeMap<String, String>,
    pub subject_credits: BTreeMap<String, u32>,
    pub credit_defaults: CreditDefaults,
    pub lab_prefixes: Vec<String>,
    pub project_prefixes: Vec<String>,
    /// Matched case-insensitively anywhere in the subject code.
    pub skill_marker: String,
    pub theory_components: Vec<String>,
    pub lab_components: Vec<String>,
    /// Subject code -> exam type -> known maximum marks.
    pub max_marks_overrides: BTreeMap<String, BTreeMap<String, f64>>,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            subject_names: default_subject_names(),
            subject_credits: default_subject_credits(),
            credit_defaults: CreditDefaults::default(),
            lab_prefixes: strings(&["CSL", "CSDL", "MEL", "25PECL"]),
            project_prefixes: strings(&["CSM", "CSP"]),
            skill_marker: "SKILL".to_string(),
            theory_components: strings(&["MSE", "TH-ISE1", "TH-ISE2", "ESE"]),
            lab_components: strings(&["PR-ISE1", "PR-ISE2"]),
            max_marks_overrides: BTreeMap::new(),
        }
    }
}

impl GradingConfig {
    pub fn subject_name<'a>(&'a self, code: &'a str) -> &'a str {
        self.subject_names
            .get(code)
            .map(String::as_str)
            .unwrap_or(code)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if let Some((code, _)) = self.subject_credits.iter().find(|(_, c)| **c == 0) {
            return Err(ConfigError::Invalid(format!(
                "grading.subject_credits.{code} must be at least 1"
            )));
        }
        let defaults = &self.credit_defaults;
        if [defaults.theory, defaults.lab, defaults.project, defaults.skill].contains(&0) {
            return Err(ConfigError::Invalid(
                "grading.credit_defaults must all be at least 1".into(),
            ));
        }
        for (code, exams) in &self.max_marks_overrides {
            for (exam, max) in exams {
                if !(*max > 0.0) {
                    return Err(ConfigError::Invalid(format!(
                        "grading.max_marks_overrides.{code}.{exam} must be positive"
                    )));
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    pub delay_secs: u64,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { delay_secs: 7 }
    }
}

fn strings(values: &[&str]) -> Vec<String> {
    values.iter().map(|v| v.to_string()).collect()
}

fn default_subject_names() -> BTreeMap<String, String> {
    [
        ("CSC601", "SPCC (System Programming & Compiler Construction)"),
        ("CSC602", "CSS (Cryptography and System Security)"),
        ("CSC603", "MC (Mobile Computing)"),
        ("CSC604", "AI (Artificial Intelligence)"),
        ("CSL601", "SPCC Lab"),
        ("CSL602", "CSS Lab"),
        ("CSL603", "MC Lab"),
        ("CSL604", "AI Lab"),
        ("CSL605", "Skill-Based Lab"),
        ("CSM601", "Mini Project 2B"),
        ("CSDL06013", "QA (Quantitative Analysis)"),
        ("CSC701", "ML"),
        ("CSC702", "BDA"),
        ("CSDC7013", "NLP"),
        ("CSDC7023", "IR"),
        ("CSDC7022", "Blockchain"),
        ("CSL701", "ML Lab"),
        ("CSL702", "BDA Lab"),
        ("CSDL7013", "NLP Lab"),
        ("CSDL7023", "IR Lab"),
        ("CSDL7022", "Blockchain Lab"),
        ("CSP701", "Major Project"),
        ("MEC701", "Design of Mechanical System"),
        ("MEC702", "Logistics & Supply Chain Management"),
        ("MEL701", "Design of Mechanical System Lab"),
        ("MEL702", "Maintenance Engineering"),
        ("MEL703", "Industrial Skills"),
        ("MEDLO7032", "Renewable Energy System"),
        ("MEDLO7041", "Machinery Diagnostics"),
        ("ILO7017", "Disaster Management and Mitigation Measures"),
        ("25PCC13CE11", "Computer Network"),
        ("25PCC13CE12", "TCS"),
        ("25PCC13CE13", "OS"),
        ("25PCC13CE14", "DWM"),
        ("25PEC13CE16", "HMI"),
        ("25MDM42", "Emotional And Spiritual Intelligence"),
        ("25PECL13CE14", "Innovative Product Development Lab Phase 1"),
        ("25OE13CE43", "Supply Chain Management"),
        ("25BSC12CE05", "DSGT"),
        ("25PCC12CE05", "COA"),
        ("25PCC12CE06", "Data Structures"),
        ("25PCC12CE07", "Object Oriented Programming"),
        ("25VEC12CE01", "Human Values And Professional Ethics"),
        ("25AEC12CE021", "Sanskrit"),
        ("25MDMBM1", "Financial Accounting"),
        ("25OE13CE12", "Financial Planning Taxation And Investment"),
        ("25MDMBM2", "Economics For Business"),
    ]
    .into_iter()
    .map(|(code, name)| (code.to_string(), name.to_string()))
    .collect()
}

fn default_subject_credits() -> BTreeMap<String, u32> {
    [
        ("CSC601", 4),
        ("CSC602", 4),
        ("CSC603", 4),
        ("CSC604", 4),
        ("CSC701", 4),
        ("CSC702", 4),
        ("CSDC7013", 3),
        ("CSDC7023", 3),
        ("CSDC7022", 3),
        ("CSL601", 2),
        ("CSL602", 2),
        ("CSL603", 2),
        ("CSL604", 2),
        ("CSL701", 2),
        ("CSL702", 2),
        ("CSDL7013", 1),
        ("CSDL7023", 1),
        ("CSDL7022", 1),
        ("CSL605", 1),
        ("CSM601", 4),
        ("CSP701", 8),
        ("CSDL06013", 3),
        ("MEC701", 4),
        ("MEC702", 3),
        ("MEL701", 1),
        ("MEL702", 1),
        ("MEL703", 1),
        ("MEDLO7032", 3),
        ("MEDLO7041", 3),
        ("ILO7017", 2),
        ("25PCC13CE11", 4),
        ("25PCC13CE12", 4),
        ("25PCC13CE13", 4),
        ("25PCC13CE14", 4),
        ("25PEC13CE16", 3),
        ("25MDM42", 2),
        ("25PECL13CE14", 2),
        ("25OE13CE43", 3),
        ("25BSC12CE05", 4),
        ("25PCC12CE05", 4),
        ("25PCC12CE06", 4),
        ("25PCC12CE07", 4),
        ("25VEC12CE01", 2),
        ("25AEC12CE021", 1),
        ("25MDMBM1", 2),
        ("25OE13CE12", 3),
        ("25MDMBM2", 2),
    ]
    .into_iter()
    .map(|(code, credits)| (code.to_string(), credits))
    .collect()
}
