use crate::dispatch::{DispatchQueue, DEFAULT_WORKERS};
use crate::executor::SessionExecutor;
use crate::job::Job;
use crate::result::HostResult;
use crate::sink::{ResultSink, SinkSettings, SinkStats};
use crate::transport::Transport;
use std::fmt;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Completed,
    Cancelled,
}

impl RunStatus {
    /// Process exit code for this status.
    pub fn exit_code(&self) -> u8 {
        match self {
            RunStatus::Completed => 0,
            RunStatus::Cancelled => 1,
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunStatus::Completed => write!(f, "completed"),
            RunStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunReport {
    pub status: RunStatus,
    /// Jobs handed to the dispatch queue.
    pub submitted: usize,
    pub stats: SinkStats,
}

/// Wires the dispatch queue and result sink together for one run.
pub struct Runner {
    workers: usize,
    sink: SinkSettings,
    transport: Arc<dyn Transport>,
    console: Option<Box<dyn Write + Send>>,
    results: Option<mpsc::UnboundedSender<HostResult>>,
}

impl Runner {
    pub fn new(workers: usize, sink: SinkSettings, transport: Arc<dyn Transport>) -> Self {
        Self {
            workers: if workers == 0 { DEFAULT_WORKERS } else { workers },
            sink,
            transport,
            console: None,
            results: None,
        }
    }

    /// Echo records somewhere other than stdout.
    pub fn with_console(mut self, console: Box<dyn Write + Send>) -> Self {
        self.console = Some(console);
        self
    }

    /// Also deliver every per-host result to `results`, in write order. The
    /// sender is dropped when the run ends.
    pub fn with_results(mut self, results: mpsc::UnboundedSender<HostResult>) -> Self {
        self.results = Some(results);
        self
    }

    /// Process every job, or stop early once `shutdown` is cancelled.
    /// In-flight sessions always finish and their results are written.
    pub async fn run(self, jobs: Vec<Job>, shutdown: CancellationToken) -> RunReport {
        let console = self
            .console
            .unwrap_or_else(|| Box::new(std::io::stdout()));
        let sink = match self.results {
            Some(results) => ResultSink::start_with_results(self.sink, console, results),
            None => ResultSink::start_with_console(self.sink, console),
        };
        let queue = DispatchQueue::start(
            self.workers,
            SessionExecutor::new(self.transport),
            sink.handle(),
            shutdown.child_token(),
        );

        let total = jobs.len();
        let mut submitted = 0;
        let mut status = RunStatus::Completed;

        for job in jobs {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    status = RunStatus::Cancelled;
                    break;
                }
                _ = queue.wait_for_capacity() => {}
            }
            queue.submit(job);
            submitted += 1;
        }

        if status == RunStatus::Completed {
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => status = RunStatus::Cancelled,
                _ = queue.drain() => {}
            }
        }

        match status {
            RunStatus::Completed => queue.close(),
            RunStatus::Cancelled => {
                warn!(
                    "interrupted: {} of {} hosts dispatched, waiting for in-flight sessions",
                    submitted, total
                );
                queue.cancel();
            }
        }
        queue.join().await;

        sink.drain().await;
        let stats = sink.stop().await;
        info!(
            "run {}: {} written, {} succeeded, {} failed",
            status, stats.written, stats.succeeded, stats.failed
        );

        RunReport {
            status,
            submitted,
            stats,
        }
    }
}
