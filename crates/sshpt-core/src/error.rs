use thiserror::Error;

#[derive(Error, Debug)]
pub enum RunnerError {
    #[error("SSH connection failed: {0}")]
    Connection(String),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("File transfer failed: {0}")]
    Transfer(String),

    #[error("Remote command failed: {0}")]
    Command(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Host file error: {0}")]
    HostFile(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl RunnerError {
    /// Errors that must abort the whole run before anything is dispatched.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            RunnerError::Config(_)
                | RunnerError::HostFile(_)
                | RunnerError::Json(_)
                | RunnerError::Yaml(_)
        )
    }
}
