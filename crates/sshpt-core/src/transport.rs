use crate::error::RunnerError;
use crate::job::Job;
use crate::secret::Secret;
use std::path::Path;

/// Opens authenticated sessions. Implementations block; the dispatch queue
/// runs them on tokio's blocking pool.
pub trait Transport: Send + Sync {
    /// Connect to `job.host:job.port` within `job.timeout` and authenticate
    /// with the job's credential.
    fn connect(&self, job: &Job) -> Result<Box<dyn RemoteSession>, RunnerError>;
}

/// One authenticated connection to a host.
pub trait RemoteSession: Send {
    /// Run `command` on a fresh channel and return its full stdout.
    /// When `stdin` is given it is written to the channel followed by a newline.
    fn exec(&mut self, command: &str, stdin: Option<&Secret>) -> Result<String, RunnerError>;

    /// Upload a local file to `remote` over SFTP.
    fn upload(&mut self, local: &Path, remote: &str) -> Result<(), RunnerError>;

    fn close(&mut self) -> Result<(), RunnerError>;
}
