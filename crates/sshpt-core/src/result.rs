use crate::job::{Action, Job};
use chrono::{DateTime, Local};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.6f";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum Outcome {
    Success,
    Failed,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Success => write!(f, "SUCCESS"),
            Outcome::Failed => write!(f, "FAILED"),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum OutputFormat {
    #[default]
    Csv,
    Json,
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputFormat::Csv => write!(f, "csv"),
            OutputFormat::Json => write!(f, "json"),
        }
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "csv" => Ok(OutputFormat::Csv),
            "json" => Ok(OutputFormat::Json),
            other => Err(format!("unknown output format '{}'", other)),
        }
    }
}

/// The outcome of one job. Written exactly once by the result sink.
#[derive(Debug, Clone)]
pub struct HostResult {
    pub host: String,
    pub timestamp: DateTime<Local>,
    pub outcome: Outcome,
    pub commands: String,
    pub output: String,
}

#[derive(Serialize)]
struct JsonRecord<'a> {
    host: &'a str,
    connection_result: Outcome,
    timestamp: String,
    commands: &'a str,
    command_output: &'a str,
}

impl HostResult {
    pub fn success(job: &Job, output: String) -> Self {
        Self::build(job.host.clone(), describe_commands(job), Outcome::Success, output)
    }

    pub fn failed(job: &Job, reason: String) -> Self {
        Self::build(job.host.clone(), describe_commands(job), Outcome::Failed, reason)
    }

    pub fn build(host: String, commands: String, outcome: Outcome, output: String) -> Self {
        Self {
            host,
            timestamp: Local::now(),
            outcome,
            commands,
            output,
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    fn timestamp_string(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }

    /// One CSV row, every field quoted.
    pub fn to_csv(&self) -> String {
        [
            self.host.as_str(),
            &self.outcome.to_string(),
            &self.timestamp_string(),
            self.commands.as_str(),
            self.output.as_str(),
        ]
        .iter()
        .map(|field| format!("\"{}\"", escape_csv_field(field)))
        .collect::<Vec<_>>()
        .join(",")
    }

    fn json_record(&self) -> JsonRecord<'_> {
        JsonRecord {
            host: &self.host,
            connection_result: self.outcome,
            timestamp: self.timestamp_string(),
            commands: &self.commands,
            command_output: &self.output,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(&self.json_record())
    }

    pub fn to_json_pretty(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.json_record())
    }

    /// Render as a single-line record.
    pub fn render(&self, format: OutputFormat) -> Result<String, serde_json::Error> {
        match format {
            OutputFormat::Csv => Ok(self.to_csv()),
            OutputFormat::Json => self.to_json(),
        }
    }
}

/// Human-readable description of what a job ran. Never contains secrets.
pub fn describe_commands(job: &Job) -> String {
    match &job.action {
        Action::Transfer(t) => format!(
            "sshpt: sftp.put {} {}:{}",
            t.local_path.display(),
            job.host,
            t.remote_path
        ),
        Action::Commands(commands) => {
            let prefix = job
                .escalation
                .as_ref()
                .map(|e| format!("sudo -u {} ", e.run_as))
                .unwrap_or_default();
            let rendered: Vec<String> = commands
                .iter()
                .map(|c| format!("{}{}", prefix, c))
                .collect();
            number_if_many(&rendered)
        }
    }
}

/// Join command outputs, numbering them when more than one command ran.
pub fn render_output(fragments: &[String]) -> String {
    number_if_many(fragments)
}

fn number_if_many(items: &[String]) -> String {
    if items.len() > 1 {
        items
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{}: {}", i, item))
            .collect::<Vec<_>>()
            .join("\n")
    } else {
        items.concat()
    }
}

/// Unify newlines and strip surrounding whitespace.
pub fn normalize_output(raw: &str) -> String {
    raw.replace("\r\n", "\n").replace('\r', "\n").trim().to_string()
}

pub fn escape_csv_field(field: &str) -> String {
    field.replace('"', "\"\"")
}
