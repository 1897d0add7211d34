use ssh2::{ExtendedData, Session};
use sshpt_core::job::{Credential, Job};
use sshpt_core::{RemoteSession, RunnerError, Secret, Transport};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::path::Path;
use std::time::Duration;
use tracing::{debug, info};

/// SSH transport backed by libssh2. Host keys are accepted without checking,
/// since the tool targets hosts with no pre-shared trust.
#[derive(Debug, Clone, Default)]
pub struct SshTransport;

impl SshTransport {
    pub fn new() -> Self {
        Self
    }

    fn open_tcp(&self, job: &Job) -> Result<TcpStream, RunnerError> {
        let addrs: Vec<SocketAddr> = (job.host.as_str(), job.port)
            .to_socket_addrs()
            .map_err(|e| RunnerError::Connection(format!("resolve {}: {}", job.address(), e)))?
            .collect();

        let mut last_error = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, job.timeout) {
                Ok(tcp) => return Ok(tcp),
                Err(e) => last_error = Some(e),
            }
        }

        Err(RunnerError::Connection(match last_error {
            Some(e) => format!("TCP connect to {}: {}", job.address(), e),
            None => format!("{} resolved to no addresses", job.address()),
        }))
    }

    fn authenticate(&self, sess: &Session, job: &Job) -> Result<(), RunnerError> {
        let user = job.username.as_str();
        match &job.credential {
            Credential::KeyFile { path, passphrase } => sess
                .userauth_pubkey_file(user, None, path, passphrase.as_ref().map(Secret::expose))
                .map_err(|e| RunnerError::Auth(format!("Pubkey auth: {}", e)))?,
            Credential::Password(password) => sess
                .userauth_password(user, password.expose())
                .map_err(|e| RunnerError::Auth(format!("Password auth: {}", e)))?,
            Credential::Agent => sess
                .userauth_agent(user)
                .map_err(|e| RunnerError::Auth(format!("Agent auth: {}", e)))?,
        }

        if !sess.authenticated() {
            return Err(RunnerError::Auth("Authentication failed".into()));
        }
        Ok(())
    }
}

impl Transport for SshTransport {
    fn connect(&self, job: &Job) -> Result<Box<dyn RemoteSession>, RunnerError> {
        debug!("Connecting to {}@{}", job.username, job.address());
        let tcp = self.open_tcp(job)?;

        let mut sess = Session::new()
            .map_err(|e| RunnerError::Connection(format!("Session::new: {}", e)))?;
        sess.set_tcp_stream(tcp);
        // Bound the handshake and auth by the job timeout only; remote
        // commands may legitimately run longer.
        sess.set_timeout(timeout_millis(job.timeout));
        sess.handshake()
            .map_err(|e| RunnerError::Connection(format!("Handshake: {}", e)))?;
        self.authenticate(&sess, job)?;
        sess.set_timeout(0);

        info!("SSH connected to {}@{}", job.username, job.address());
        Ok(Box::new(SshSession {
            host: job.host.clone(),
            sess,
        }))
    }
}

fn timeout_millis(timeout: Duration) -> u32 {
    u32::try_from(timeout.as_millis()).unwrap_or(u32::MAX)
}

/// An authenticated libssh2 session to one host.
pub struct SshSession {
    host: String,
    sess: Session,
}

impl RemoteSession for SshSession {
    fn exec(&mut self, command: &str, stdin: Option<&Secret>) -> Result<String, RunnerError> {
        let mut channel = self
            .sess
            .channel_session()
            .map_err(|e| RunnerError::Command(format!("Channel: {}", e)))?;
        // stderr shares the channel window with stdout; left unread it can
        // stall a chatty command forever
        channel
            .handle_extended_data(ExtendedData::Ignore)
            .map_err(|e| RunnerError::Command(format!("Channel: {}", e)))?;
        channel
            .exec(command)
            .map_err(|e| RunnerError::Command(format!("Exec '{}': {}", command, e)))?;

        if let Some(secret) = stdin {
            channel
                .write_all(format!("{}\n", secret.expose()).as_bytes())
                .and_then(|_| channel.flush())
                .map_err(|e| RunnerError::Command(format!("Write stdin: {}", e)))?;
        }
        channel
            .send_eof()
            .map_err(|e| RunnerError::Command(format!("Send EOF: {}", e)))?;

        let mut output = String::new();
        channel
            .read_to_string(&mut output)
            .map_err(|e| RunnerError::Command(format!("Read output: {}", e)))?;

        channel.wait_close().ok();
        let exit_status = channel.exit_status().unwrap_or(-1);

        if exit_status != 0 {
            debug!("{}: remote command exited {}", self.host, exit_status);
        }

        Ok(output)
    }

    fn upload(&mut self, local: &Path, remote: &str) -> Result<(), RunnerError> {
        debug!("{}: sftp put {} -> {}", self.host, local.display(), remote);
        let sftp = self
            .sess
            .sftp()
            .map_err(|e| RunnerError::Transfer(format!("SFTP: {}", e)))?;

        let mut source = std::fs::File::open(local)
            .map_err(|e| RunnerError::Transfer(format!("{}: {}", local.display(), e)))?;
        let mut dest = sftp
            .create(Path::new(remote))
            .map_err(|e| RunnerError::Transfer(format!("{}: {}", remote, e)))?;

        std::io::copy(&mut source, &mut dest)
            .map_err(|e| RunnerError::Transfer(format!("{}: {}", remote, e)))?;
        Ok(())
    }

    fn close(&mut self) -> Result<(), RunnerError> {
        self.sess
            .disconnect(None, "sshpt done", None)
            .map_err(|e| RunnerError::Connection(format!("Disconnect: {}", e)))
    }
}
