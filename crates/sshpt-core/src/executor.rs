use crate::error::RunnerError;
use crate::job::{Action, Job, Transfer};
use crate::result::{normalize_output, render_output, HostResult};
use crate::secret::Secret;
use crate::transport::{RemoteSession, Transport};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Steps of the per-host protocol, logged as the executor moves through them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Authenticated,
    Transferring,
    Executing,
    Cleanup,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "connecting"),
            SessionState::Authenticated => write!(f, "authenticated"),
            SessionState::Transferring => write!(f, "transferring"),
            SessionState::Executing => write!(f, "executing"),
            SessionState::Cleanup => write!(f, "cleanup"),
            SessionState::Closed => write!(f, "closed"),
        }
    }
}

/// Runs one job against one host: connect, optional upload, execute,
/// optional cleanup. Always yields a [`HostResult`].
#[derive(Clone)]
pub struct SessionExecutor {
    transport: Arc<dyn Transport>,
}

impl SessionExecutor {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub fn run(&self, job: &Job) -> HostResult {
        enter(job, SessionState::Connecting);
        let mut session = match self.transport.connect(job) {
            Ok(session) => session,
            Err(e) => {
                warn!("{}: {}", job.host, e);
                enter(job, SessionState::Closed);
                return HostResult::failed(job, e.to_string());
            }
        };
        enter(job, SessionState::Authenticated);

        let mut fragments = Vec::new();
        let outcome = drive(session.as_mut(), job, &mut fragments);

        if let Err(e) = session.close() {
            debug!("{}: close failed: {}", job.host, e);
        }
        enter(job, SessionState::Closed);

        match outcome {
            Ok(cleanup_error) => {
                let normalized: Vec<String> =
                    fragments.iter().map(|f| normalize_output(f)).collect();
                let mut output = render_output(&normalized);
                // cleanup is not a numbered command
                if let Some(e) = cleanup_error {
                    if !output.is_empty() {
                        output.push('\n');
                    }
                    output.push_str(&e);
                }
                HostResult::success(job, output)
            }
            Err(e) => {
                warn!("{}: FAILED: {}", job.host, e);
                HostResult::failed(job, e.to_string())
            }
        }
    }
}

fn enter(job: &Job, state: SessionState) {
    debug!(job_id = %job.id, host = %job.host, state = %state, "session state");
}

/// Everything after a successful connect. Transfer failures are folded into
/// `fragments` and a cleanup failure is handed back separately; a command
/// that cannot be run at all aborts.
fn drive(
    session: &mut dyn RemoteSession,
    job: &Job,
    fragments: &mut Vec<String>,
) -> Result<Option<String>, RunnerError> {
    let plan = match &job.action {
        Action::Commands(commands) => commands.clone(),
        Action::Transfer(transfer) => {
            enter(job, SessionState::Transferring);
            if let Err(e) = upload(session, job, transfer, fragments) {
                warn!("{}: transfer failed: {}", job.host, e);
                fragments.push(e.to_string());
            }

            let target = transfer.remote_target();
            if transfer.make_executable {
                // a+x in case the file is run as another user through sudo
                run_escalated(session, job, &format!("chmod a+x {}", target))?;
                vec![target]
            } else {
                vec![format!("ls -l {}", target)]
            }
        }
    };

    enter(job, SessionState::Executing);
    for command in &plan {
        fragments.push(run_escalated(session, job, command)?);
    }

    if let Some(transfer) = job.transfer().filter(|t| t.remove_after) {
        enter(job, SessionState::Cleanup);
        let rm = format!("rm -f {}", transfer.remote_target());
        if let Err(e) = run_escalated(session, job, &rm) {
            warn!("{}: cleanup failed: {}", job.host, e);
            return Ok(Some(e.to_string()));
        }
    }

    Ok(None)
}

fn upload(
    session: &mut dyn RemoteSession,
    job: &Job,
    transfer: &Transfer,
    fragments: &mut Vec<String>,
) -> Result<(), RunnerError> {
    let target = transfer.remote_target();
    if job.escalation.is_some() {
        // SFTP cannot sudo; stage the file and move it into place.
        let staging = transfer.staging_path();
        session.upload(transfer.local_path(), &staging)?;
        let output = run_escalated(session, job, &format!("mv {} {}", staging, target))?;
        fragments.push(output);
    } else {
        session.upload(transfer.local_path(), &target)?;
    }
    Ok(())
}

fn run_escalated(
    session: &mut dyn RemoteSession,
    job: &Job,
    command: &str,
) -> Result<String, RunnerError> {
    let (wrapped, stdin) = escalate(job, command);
    debug!(job_id = %job.id, host = %job.host, "remote exec: {}", command);
    session.exec(&wrapped, stdin)
}

/// Wrap `command` for the job's escalation setting. With a password on hand
/// sudo reads it from stdin (`-S`) with an empty prompt; otherwise sudo is
/// told never to prompt.
pub fn escalate<'a>(job: &'a Job, command: &str) -> (String, Option<&'a Secret>) {
    match &job.escalation {
        None => (command.to_string(), None),
        Some(escalation) => match job.escalation_secret() {
            Some(secret) => (
                format!(
                    "sudo -S -p '' -u {} sh -c {}",
                    escalation.run_as,
                    shell_escape(command)
                ),
                Some(secret),
            ),
            None => (
                format!(
                    "sudo -n -u {} sh -c {}",
                    escalation.run_as,
                    shell_escape(command)
                ),
                None,
            ),
        },
    }
}

/// Shell-escape a string for safe use in remote commands.
pub fn shell_escape(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}
