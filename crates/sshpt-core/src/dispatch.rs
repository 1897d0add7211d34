use crate::executor::SessionExecutor;
use crate::job::Job;
use crate::result::{describe_commands, HostResult, Outcome};
use crate::sink::SinkHandle;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Default number of concurrent sessions.
pub const DEFAULT_WORKERS: usize = 10;

enum WorkItem {
    Job(Box<Job>),
    /// Sentinel: the worker that dequeues it exits.
    Stop,
}

/// Counters shared between the queue owner and its workers.
#[derive(Default)]
struct Counters {
    /// Submitted but not yet completed.
    pending: AtomicUsize,
    /// Submitted but not yet dequeued.
    queued: AtomicUsize,
    completed: AtomicUsize,
    /// Signalled when `pending` reaches zero.
    drained: Notify,
    /// Signalled whenever a worker dequeues a job.
    dequeued: Notify,
}

/// Fixed pool of workers pulling jobs from an unbounded queue.
pub struct DispatchQueue {
    tx: mpsc::UnboundedSender<WorkItem>,
    counters: Arc<Counters>,
    workers: Vec<JoinHandle<()>>,
    stop: CancellationToken,
}

impl DispatchQueue {
    /// Spawn `workers` workers. Each sends its results to `sink`.
    pub fn start(
        workers: usize,
        executor: SessionExecutor,
        sink: SinkHandle,
        stop: CancellationToken,
    ) -> Self {
        let workers = workers.max(1);
        let (tx, rx) = mpsc::unbounded_channel();
        let rx = Arc::new(Mutex::new(rx));
        let counters = Arc::new(Counters::default());

        let handles = (0..workers)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    rx.clone(),
                    executor.clone(),
                    sink.clone(),
                    counters.clone(),
                    stop.clone(),
                ))
            })
            .collect();

        debug!("dispatch queue started with {} workers", workers);
        Self {
            tx,
            counters,
            workers: handles,
            stop,
        }
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    /// Enqueue a job. The queue never rejects work.
    pub fn submit(&self, job: Job) {
        self.counters.pending.fetch_add(1, Ordering::SeqCst);
        self.counters.queued.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(WorkItem::Job(Box::new(job))).is_err() {
            // every worker is gone; nobody will ever complete it
            self.counters.queued.fetch_sub(1, Ordering::SeqCst);
            mark_complete(&self.counters);
            error!("dispatch queue closed; job dropped");
        }
    }

    /// Jobs submitted but not yet picked up by a worker.
    pub fn depth(&self) -> usize {
        self.counters.queued.load(Ordering::SeqCst)
    }

    pub fn completed(&self) -> usize {
        self.counters.completed.load(Ordering::SeqCst)
    }

    /// Resolves once fewer jobs are waiting than there are workers.
    pub async fn wait_for_capacity(&self) {
        loop {
            let notified = self.counters.dequeued.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.depth() < self.size() {
                return;
            }
            notified.await;
        }
    }

    /// Resolves once every submitted job has been dequeued and completed.
    pub async fn drain(&self) {
        loop {
            let notified = self.counters.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.counters.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    /// Graceful stop: workers exit after the jobs already queued.
    pub fn close(&self) {
        for _ in 0..self.workers.len() {
            let _ = self.tx.send(WorkItem::Stop);
        }
    }

    /// Cooperative cancel: idle workers exit now, busy workers exit after
    /// their current job. Queued jobs are abandoned.
    pub fn cancel(&self) {
        self.stop.cancel();
    }

    /// Wait for every worker to exit.
    pub async fn join(self) {
        for handle in self.workers {
            if let Err(e) = handle.await {
                error!("dispatch worker failed: {}", e);
            }
        }
    }
}

fn mark_complete(counters: &Counters) {
    counters.completed.fetch_add(1, Ordering::SeqCst);
    if counters.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
        counters.drained.notify_waiters();
    }
}

async fn worker_loop(
    id: usize,
    rx: Arc<Mutex<mpsc::UnboundedReceiver<WorkItem>>>,
    executor: SessionExecutor,
    sink: SinkHandle,
    counters: Arc<Counters>,
    stop: CancellationToken,
) {
    loop {
        if stop.is_cancelled() {
            break;
        }

        let item = tokio::select! {
            biased;
            _ = stop.cancelled() => break,
            item = next_item(&rx) => item,
        };

        let job = match item {
            Some(WorkItem::Job(job)) => *job,
            Some(WorkItem::Stop) | None => break,
        };
        counters.queued.fetch_sub(1, Ordering::SeqCst);
        counters.dequeued.notify_waiters();

        debug!(worker = id, job_id = %job.id, "picked up {}", job.host);
        let result = run_job(&executor, job).await;
        sink.send(result);
        mark_complete(&counters);
    }
    debug!(worker = id, "worker exiting");
}

async fn next_item(rx: &Mutex<mpsc::UnboundedReceiver<WorkItem>>) -> Option<WorkItem> {
    rx.lock().await.recv().await
}

/// Run the blocking session protocol off the async workers. A panic inside
/// the executor still produces a result for the host.
async fn run_job(executor: &SessionExecutor, job: Job) -> HostResult {
    let host = job.host.clone();
    let commands = describe_commands(&job);
    let executor = executor.clone();

    match tokio::task::spawn_blocking(move || executor.run(&job)).await {
        Ok(result) => {
            info!("{} finished: {}", result.host, result.outcome);
            result
        }
        Err(e) => {
            error!("{}: executor aborted: {}", host, e);
            HostResult::build(host, commands, Outcome::Failed, format!("executor aborted: {}", e))
        }
    }
}
