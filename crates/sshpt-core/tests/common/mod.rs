//! Recording fake transport shared by the integration tests.
#![allow(dead_code)]

use sshpt_core::job::{Credential, Escalation, Job, JobSpec, Transfer};
use sshpt_core::{RemoteSession, RunnerError, Secret, Transport};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Every call the executor made, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Connect(String),
    Upload { local: PathBuf, remote: String },
    Exec { command: String, stdin: Option<String> },
    Close(String),
}

#[derive(Clone, Default)]
pub struct FakeTransport {
    pub calls: Arc<Mutex<Vec<Call>>>,
    unreachable: HashSet<String>,
    upload_error: Option<String>,
    failing_command: Option<String>,
    delay: Duration,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Connections to `host` fail.
    pub fn unreachable(mut self, host: &str) -> Self {
        self.unreachable.insert(host.to_string());
        self
    }

    pub fn failing_upload(mut self, message: &str) -> Self {
        self.upload_error = Some(message.to_string());
        self
    }

    /// Exec of any command containing `needle` returns a channel error.
    pub fn failing_command(mut self, needle: &str) -> Self {
        self.failing_command = Some(needle.to_string());
        self
    }

    /// Each exec sleeps this long, to keep sessions in flight.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn execs(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Exec { command, .. } => Some(command),
                _ => None,
            })
            .collect()
    }

    pub fn connects(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Connect(_)))
            .count()
    }
}

impl Transport for FakeTransport {
    fn connect(&self, job: &Job) -> Result<Box<dyn RemoteSession>, RunnerError> {
        self.calls.lock().unwrap().push(Call::Connect(job.host.clone()));
        if self.unreachable.contains(&job.host) {
            return Err(RunnerError::Connection(format!(
                "TCP connect to {}: Connection refused",
                job.address()
            )));
        }
        Ok(Box::new(FakeSession {
            host: job.host.clone(),
            transport: self.clone(),
        }))
    }
}

struct FakeSession {
    host: String,
    transport: FakeTransport,
}

impl RemoteSession for FakeSession {
    fn exec(&mut self, command: &str, stdin: Option<&Secret>) -> Result<String, RunnerError> {
        self.transport.calls.lock().unwrap().push(Call::Exec {
            command: command.to_string(),
            stdin: stdin.map(|s| s.expose().to_string()),
        });
        if !self.transport.delay.is_zero() {
            std::thread::sleep(self.transport.delay);
        }
        if let Some(needle) = &self.transport.failing_command {
            if command.contains(needle.as_str()) {
                return Err(RunnerError::Command(format!("channel closed running '{}'", command)));
            }
        }
        Ok(fake_output(command))
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<(), RunnerError> {
        self.transport.calls.lock().unwrap().push(Call::Upload {
            local: local.to_path_buf(),
            remote: remote.to_string(),
        });
        match &self.transport.upload_error {
            Some(message) => Err(RunnerError::Transfer(message.clone())),
            None => Ok(()),
        }
    }

    fn close(&mut self) -> Result<(), RunnerError> {
        self.transport.calls.lock().unwrap().push(Call::Close(self.host.clone()));
        Ok(())
    }
}

/// `echo X` prints X with a CRLF, `ls -l F` prints a listing, anything else
/// prints nothing. Commands wrapped in `sudo ... sh -c '<cmd>'` answer as
/// the inner command would.
fn fake_output(command: &str) -> String {
    let command = unwrap_sudo(command);
    let command = command.as_str();
    if let Some(text) = command.strip_prefix("echo ") {
        format!("{}\r\n", text)
    } else if let Some(path) = command.strip_prefix("ls -l ") {
        format!("-rwxr-xr-x 1 ops ops 42 Jan  1 00:00 {}\n", path)
    } else {
        String::new()
    }
}

fn unwrap_sudo(command: &str) -> String {
    match command.split_once(" sh -c '") {
        Some((prefix, quoted)) if prefix.starts_with("sudo ") => quoted
            .strip_suffix('\'')
            .unwrap_or(quoted)
            .replace("'\\''", "'"),
        _ => command.to_string(),
    }
}

pub fn command_job(host: &str, commands: &[&str]) -> Job {
    Job::new(JobSpec {
        host: host.to_string(),
        port: 22,
        username: "ops".to_string(),
        credential: Credential::Password(Secret::new("s3cret")),
        timeout: Duration::from_secs(5),
        commands: commands.iter().map(|c| c.to_string()).collect(),
        transfer: None,
        escalation: None,
        sudo_password: None,
    })
    .unwrap()
}

pub fn transfer_job(host: &str, execute: bool, remove: bool, run_as: Option<&str>) -> Job {
    Job::new(JobSpec {
        host: host.to_string(),
        port: 22,
        username: "ops".to_string(),
        credential: Credential::Password(Secret::new("s3cret")),
        timeout: Duration::from_secs(5),
        commands: Vec::new(),
        transfer: Some(Transfer {
            local_path: PathBuf::from("/srv/deploy/patch.sh"),
            remote_path: "/opt/tools/".to_string(),
            make_executable: execute,
            remove_after: remove,
        }),
        escalation: run_as.map(|u| Escalation {
            run_as: u.to_string(),
        }),
        sudo_password: None,
    })
    .unwrap()
}

pub fn many_jobs(count: usize, commands: &[&str]) -> Vec<Job> {
    (0..count)
        .map(|i| command_job(&format!("host-{:02}", i), commands))
        .collect()
}
