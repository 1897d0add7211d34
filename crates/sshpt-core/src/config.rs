use crate::error::RunnerError;
use crate::hosts::HostRecord;
use crate::job::{Credential, Escalation, Job, JobSpec, Transfer};
use crate::result::OutputFormat;
use crate::secret::Secret;
use crate::sink::SinkSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Defaults file, loaded from ~/.config/sshpt/config.yaml when present.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub defaults: Defaults,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Defaults {
    #[serde(default = "default_max_threads")]
    pub max_threads: usize,
    /// Connection timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout: u64,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default = "default_remote_path")]
    pub remote_path: String,
    #[serde(default)]
    pub output_format: OutputFormat,
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            max_threads: default_max_threads(),
            timeout: default_timeout(),
            port: default_port(),
            username: None,
            remote_path: default_remote_path(),
            output_format: OutputFormat::default(),
        }
    }
}

fn default_max_threads() -> usize {
    10
}

fn default_timeout() -> u64 {
    30
}

fn default_port() -> u16 {
    22
}

fn default_remote_path() -> String {
    "/tmp/".to_string()
}

impl Config {
    /// Load config from the default path, or built-in defaults if it is missing.
    pub fn load_default() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&contents)?;
        Ok(config)
    }

    /// Default config file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("sshpt")
            .join("config.yaml")
    }
}

/// Fully resolved parameters for one run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub max_threads: usize,
    pub timeout: Duration,
    pub port: u16,
    pub username: String,
    pub password: Option<Secret>,
    pub key_file: Option<PathBuf>,
    pub key_passphrase: Option<Secret>,
    /// Authenticate through ssh-agent when no password or key is given.
    pub passwordless: bool,
    pub commands: Vec<String>,
    pub copy_file: Option<PathBuf>,
    pub remote_path: String,
    pub execute: bool,
    pub remove: bool,
    /// Run as this user through sudo.
    pub sudo: Option<String>,
    pub outfile: Option<PathBuf>,
    pub verbose: bool,
    pub output_format: OutputFormat,
}

impl RunConfig {
    /// Run parameters seeded from a defaults file.
    pub fn from_defaults(defaults: &Defaults) -> Self {
        Self {
            max_threads: defaults.max_threads,
            timeout: Duration::from_secs(defaults.timeout),
            port: defaults.port,
            username: defaults.username.clone().unwrap_or_default(),
            password: None,
            key_file: None,
            key_passphrase: None,
            passwordless: false,
            commands: Vec::new(),
            copy_file: None,
            remote_path: defaults.remote_path.clone(),
            execute: false,
            remove: false,
            sudo: None,
            outfile: None,
            verbose: true,
            output_format: defaults.output_format,
        }
    }

    /// Reject combinations that make the run meaningless. Nothing has been
    /// dispatched when this fails.
    pub fn validate(&self) -> Result<(), RunnerError> {
        if self.outfile.is_none() && !self.verbose {
            return Err(RunnerError::Config(
                "no mechanism to output results: quiet mode needs an output file".into(),
            ));
        }
        if self.max_threads == 0 {
            return Err(RunnerError::Config("thread count must be at least 1".into()));
        }
        if self.copy_file.is_some() && !self.commands.is_empty() {
            return Err(RunnerError::Config(
                "commands and a file to copy cannot be given together".into(),
            ));
        }
        if self.copy_file.is_none() && (self.execute || self.remove) {
            return Err(RunnerError::Config(
                "execute and remove only apply to a copied file".into(),
            ));
        }
        if let Some(path) = &self.copy_file {
            if !path.is_file() {
                return Err(RunnerError::Config(format!(
                    "file to copy not found: {}",
                    path.display()
                )));
            }
        }
        Ok(())
    }

    pub fn sink_settings(&self) -> SinkSettings {
        SinkSettings {
            format: self.output_format,
            echo: self.verbose,
            outfile: self.outfile.clone(),
        }
    }

    fn transfer(&self) -> Option<Transfer> {
        self.copy_file.as_ref().map(|local| Transfer {
            local_path: local.clone(),
            remote_path: self.remote_path.clone(),
            make_executable: self.execute,
            remove_after: self.remove,
        })
    }

    /// Credential for one host. Host-specific values win over run-wide ones.
    fn credential_for(&self, record: &HostRecord) -> Result<Credential, RunnerError> {
        if let Some(password) = &record.password {
            return Ok(Credential::Password(password.clone()));
        }
        if let Some(path) = &record.keyfile {
            return Ok(Credential::KeyFile {
                path: path.clone(),
                passphrase: self.key_passphrase.clone(),
            });
        }
        if let Some(path) = &self.key_file {
            return Ok(Credential::KeyFile {
                path: path.clone(),
                passphrase: self.key_passphrase.clone(),
            });
        }
        if let Some(password) = &self.password {
            return Ok(Credential::Password(password.clone()));
        }
        if self.passwordless {
            return Ok(Credential::Agent);
        }
        Err(RunnerError::Config(format!(
            "{}: no password, key file or passwordless mode given",
            record.host
        )))
    }

    /// One job per non-blank host record.
    pub fn build_jobs(&self, hosts: &[HostRecord]) -> Result<Vec<Job>, RunnerError> {
        let transfer = self.transfer();
        hosts
            .iter()
            .filter(|record| !record.host.trim().is_empty())
            .map(|record| {
                let escalation = record
                    .sudo
                    .as_ref()
                    .map(|s| s.run_as())
                    .unwrap_or_else(|| self.sudo.clone())
                    .map(|run_as| Escalation { run_as });

                Job::new(JobSpec {
                    host: record.host.clone(),
                    port: record.port.unwrap_or(self.port),
                    username: record
                        .username
                        .clone()
                        .unwrap_or_else(|| self.username.clone()),
                    credential: self.credential_for(record)?,
                    timeout: self.timeout,
                    commands: self.commands.clone(),
                    transfer: transfer.clone(),
                    escalation,
                    sudo_password: record.password.clone().or_else(|| self.password.clone()),
                })
            })
            .collect()
    }
}
