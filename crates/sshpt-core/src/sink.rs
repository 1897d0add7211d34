use crate::result::{HostResult, OutputFormat};
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error};

/// Where and how results are written.
#[derive(Debug, Clone, Default)]
pub struct SinkSettings {
    pub format: OutputFormat,
    /// Print each record to the console.
    pub echo: bool,
    /// Append each record to this file.
    pub outfile: Option<PathBuf>,
}

/// Totals reported when the sink stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SinkStats {
    pub written: usize,
    pub succeeded: usize,
    pub failed: usize,
}

enum SinkMessage {
    Record(HostResult),
    Flush(oneshot::Sender<()>),
    Stop,
}

/// Cloneable producer side of the sink. Workers only ever enqueue here.
#[derive(Clone)]
pub struct SinkHandle {
    tx: mpsc::UnboundedSender<SinkMessage>,
}

impl SinkHandle {
    pub fn send(&self, result: HostResult) {
        if self.tx.send(SinkMessage::Record(result)).is_err() {
            error!("result sink is gone; dropping a result");
        }
    }
}

pub type Console = Box<dyn Write + Send>;

/// Single consumer that serializes results to the console and/or an
/// append-only file, in arrival order.
pub struct ResultSink {
    handle: SinkHandle,
    task: JoinHandle<SinkStats>,
}

impl ResultSink {
    /// Start the consumer, echoing to `console` when enabled.
    pub fn start_with_console(settings: SinkSettings, console: Console) -> Self {
        Self::spawn(settings, console, None)
    }

    /// Like [`ResultSink::start_with_console`], and also hand every record to
    /// `results` after it has been written.
    pub fn start_with_results(
        settings: SinkSettings,
        console: Console,
        results: mpsc::UnboundedSender<HostResult>,
    ) -> Self {
        Self::spawn(settings, console, Some(results))
    }

    fn spawn(
        settings: SinkSettings,
        console: Console,
        results: Option<mpsc::UnboundedSender<HostResult>>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(consume(settings, console, results, rx));
        Self {
            handle: SinkHandle { tx },
            task,
        }
    }

    pub fn handle(&self) -> SinkHandle {
        self.handle.clone()
    }

    /// Resolves once every result enqueued before this call has been written.
    pub async fn drain(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.handle.tx.send(SinkMessage::Flush(ack_tx)).is_err() {
            return;
        }
        let _ = ack_rx.await;
    }

    /// Stop the consumer after anything already queued and return the totals.
    pub async fn stop(self) -> SinkStats {
        let _ = self.handle.tx.send(SinkMessage::Stop);
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                error!("result sink task failed: {}", e);
                SinkStats::default()
            }
        }
    }
}

async fn consume(
    settings: SinkSettings,
    mut console: Console,
    mut results: Option<mpsc::UnboundedSender<HostResult>>,
    mut rx: mpsc::UnboundedReceiver<SinkMessage>,
) -> SinkStats {
    let mut stats = SinkStats::default();

    while let Some(message) = rx.recv().await {
        match message {
            SinkMessage::Record(result) => {
                write_record(&settings, &mut console, &result).await;
                stats.written += 1;
                if result.is_success() {
                    stats.succeeded += 1;
                } else {
                    stats.failed += 1;
                }
                if let Some(tx) = &results {
                    if tx.send(result).is_err() {
                        debug!("result receiver dropped; no longer forwarding");
                        results = None;
                    }
                }
            }
            SinkMessage::Flush(ack) => {
                let _ = ack.send(());
            }
            SinkMessage::Stop => break,
        }
    }

    debug!("result sink stopped after {} records", stats.written);
    stats
}

async fn write_record(settings: &SinkSettings, console: &mut Console, result: &HostResult) {
    let line = match result.render(settings.format) {
        Ok(line) => line,
        Err(e) => {
            error!("{}: could not render result: {}", result.host, e);
            return;
        }
    };

    if settings.echo {
        let shown = match settings.format {
            OutputFormat::Json => result.to_json_pretty().unwrap_or_else(|_| line.clone()),
            OutputFormat::Csv => line.clone(),
        };
        if let Err(e) = writeln!(console, "{}", shown).and_then(|_| console.flush()) {
            error!("could not write result to console: {}", e);
        }
    }

    if let Some(path) = &settings.outfile {
        if let Err(e) = append_line(path, &line).await {
            error!("could not append to {}: {}", path.display(), e);
        }
    }
}

/// Open, append one line, flush and close, so a killed run keeps every
/// record written so far and the file can be tailed.
async fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    let mut file = tokio::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await?;
    file.write_all(format!("{}\n", line).as_bytes()).await?;
    file.flush().await?;
    Ok(())
}
