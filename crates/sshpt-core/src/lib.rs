pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod hosts;
pub mod job;
pub mod lifecycle;
pub mod result;
pub mod secret;
pub mod sink;
pub mod transport;

pub use config::{Config, RunConfig};
pub use dispatch::DispatchQueue;
pub use error::RunnerError;
pub use executor::SessionExecutor;
pub use hosts::HostRecord;
pub use job::{Action, Credential, Escalation, Job, JobId, JobSpec, Transfer};
pub use lifecycle::{RunReport, RunStatus, Runner};
pub use result::{HostResult, Outcome, OutputFormat};
pub use secret::Secret;
pub use sink::{ResultSink, SinkHandle, SinkSettings, SinkStats};
pub use transport::{RemoteSession, Transport};
