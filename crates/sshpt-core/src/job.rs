use crate::error::RunnerError;
use crate::secret::Secret;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Command run when a job is given neither commands nor a file to transfer.
pub const CONNECTION_TEST_COMMAND: &str = "echo CONNECTION TEST";

/// Fallback remote file name when the local path has none.
const TEMP_FILE_NAME: &str = "sshpt_temp";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct JobId(pub String);

impl JobId {
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

/// How a job authenticates. Exactly one per job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    Password(Secret),
    KeyFile {
        path: PathBuf,
        passphrase: Option<Secret>,
    },
    /// Keys served by a running ssh-agent.
    Agent,
}

impl Credential {
    /// The secret handed to `sudo` on stdin, if any.
    pub fn escalation_secret(&self) -> Option<&Secret> {
        match self {
            Credential::Password(secret) => Some(secret),
            _ => None,
        }
    }
}

/// A file to upload before execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transfer {
    pub local_path: PathBuf,
    /// Destination directory on the remote host.
    pub remote_path: String,
    pub make_executable: bool,
    pub remove_after: bool,
}

impl Transfer {
    pub fn file_name(&self) -> String {
        self.local_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .filter(|n| !n.is_empty())
            .unwrap_or_else(|| TEMP_FILE_NAME.to_string())
    }

    /// Full remote path of the uploaded file.
    pub fn remote_target(&self) -> String {
        format!("{}/{}", self.remote_path.trim_end_matches('/'), self.file_name())
    }

    /// World-writable location used when the upload has to be moved into
    /// place with sudo afterwards.
    pub fn staging_path(&self) -> String {
        format!("/tmp/{}", self.file_name())
    }

    pub fn local_path(&self) -> &Path {
        &self.local_path
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Escalation {
    pub run_as: String,
}

/// What a job does once connected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Commands(Vec<String>),
    Transfer(Transfer),
}

/// Unvalidated job fields, as assembled from run parameters and a host record.
#[derive(Debug, Clone)]
pub struct JobSpec {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
    pub timeout: Duration,
    pub commands: Vec<String>,
    pub transfer: Option<Transfer>,
    pub escalation: Option<Escalation>,
    /// Password given to sudo when it differs from the login credential,
    /// e.g. key-file login with password sudo.
    pub sudo_password: Option<Secret>,
}

/// One unit of work against one host. Immutable once built.
#[derive(Debug, Clone)]
pub struct Job {
    pub id: JobId,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub credential: Credential,
    pub timeout: Duration,
    pub action: Action,
    pub escalation: Option<Escalation>,
    pub sudo_password: Option<Secret>,
}

impl Job {
    /// Validate the request and pick its execution plan.
    pub fn new(spec: JobSpec) -> Result<Self, RunnerError> {
        let host = spec.host.trim().to_string();
        if host.is_empty() {
            return Err(RunnerError::Config("job has an empty host".into()));
        }

        let action = match (spec.transfer, spec.commands.is_empty()) {
            (Some(_), false) => {
                return Err(RunnerError::Config(format!(
                    "{}: commands and a file transfer cannot be combined",
                    host
                )))
            }
            (Some(transfer), true) => Action::Transfer(transfer),
            (None, true) => Action::Commands(vec![CONNECTION_TEST_COMMAND.to_string()]),
            (None, false) => Action::Commands(spec.commands),
        };

        Ok(Self {
            id: JobId::new(),
            host,
            port: spec.port,
            username: spec.username,
            credential: spec.credential,
            timeout: spec.timeout,
            action,
            escalation: spec.escalation,
            sudo_password: spec.sudo_password,
        })
    }

    pub fn transfer(&self) -> Option<&Transfer> {
        match &self.action {
            Action::Transfer(t) => Some(t),
            Action::Commands(_) => None,
        }
    }

    /// The secret written to sudo's stdin: an explicit sudo password first,
    /// then the login password.
    pub fn escalation_secret(&self) -> Option<&Secret> {
        self.sudo_password
            .as_ref()
            .or_else(|| self.credential.escalation_secret())
    }

    /// `host:port` as used for the TCP connect.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
