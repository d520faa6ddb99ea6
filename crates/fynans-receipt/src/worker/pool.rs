use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures_util::FutureExt;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, info_span, warn, Instrument};

use super::job::JobRecord;
use super::processor::{JobFailure, JobHandler, JobProgressReporter};
use super::queue::ReceiptJobQueue;
use crate::config::WorkerConfig;
use crate::pipeline::ProgressReporter;

/// Idle workers never sleep for less than this.
const MIN_IDLE_WAIT: Duration = Duration::from_millis(10);

pub struct WorkerPool {
    workers: Vec<JoinHandle<()>>,
    shutdown: Arc<AtomicBool>,
    stop: Arc<Notify>,
}

impl WorkerPool {
    /// Spawns `config.count` workers and a janitor on the current runtime.
    pub fn spawn(
        queue: Arc<ReceiptJobQueue>,
        handler: Arc<dyn JobHandler>,
        config: &WorkerConfig,
    ) -> Self {
        let worker_count = config.count.max(1);
        let poll_interval = Duration::from_millis(config.poll_interval_ms).max(MIN_IDLE_WAIT);
        let janitor_interval = Duration::from_secs(config.janitor_interval_secs.max(1));
        let shutdown = Arc::new(AtomicBool::new(false));
        let stop = Arc::new(Notify::new());

        let mut workers = Vec::with_capacity(worker_count + 1);
        for worker_id in 0..worker_count {
            let worker = Worker {
                id: worker_id,
                queue: Arc::clone(&queue),
                handler: Arc::clone(&handler),
                shutdown: Arc::clone(&shutdown),
                stop: Arc::clone(&stop),
                poll_interval,
            };
            workers.push(tokio::spawn(worker.run()));
        }

        workers.push(tokio::spawn(run_janitor(
            Arc::clone(&queue),
            Arc::clone(&shutdown),
            Arc::clone(&stop),
            janitor_interval,
        )));

        info!(workers = worker_count, "Started receipt workers");

        Self {
            workers,
            shutdown,
            stop,
        }
    }

    pub fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::SeqCst)
    }

    /// Stops accepting work and waits for running jobs to finish.
    pub async fn shutdown(self) {
        info!("Shutting down receipt workers...");
        self.shutdown.store(true, Ordering::SeqCst);
        self.stop.notify_waiters();

        for (i, handle) in self.workers.into_iter().enumerate() {
            if let Err(e) = handle.await {
                error!("Worker task {} panicked: {}", i, e);
            } else {
                debug!("Worker task {} finished", i);
            }
        }

        info!("All receipt workers have stopped");
    }
}

struct Worker {
    id: usize,
    queue: Arc<ReceiptJobQueue>,
    handler: Arc<dyn JobHandler>,
    shutdown: Arc<AtomicBool>,
    stop: Arc<Notify>,
    poll_interval: Duration,
}

impl Worker {
    async fn run(self) {
        debug!(worker_id = self.id, "Receipt worker started");
        let wake = self.queue.notifier();

        loop {
            // Registered before the checks below so no wake-up is missed.
            let woken = wake.notified();
            let stopped = self.stop.notified();
            tokio::pin!(woken, stopped);
            woken.as_mut().enable();
            stopped.as_mut().enable();

            if self.shutdown.load(Ordering::SeqCst) {
                break;
            }

            match self.queue.claim() {
                Ok(Some(job)) => {
                    self.process(job).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => error!(worker_id = self.id, error = %e, "Failed to claim receipt job"),
            }

            let wait = self.idle_wait();
            tokio::select! {
                _ = &mut woken => {}
                _ = &mut stopped => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }

        debug!(worker_id = self.id, "Receipt worker stopped");
    }

    async fn process(&self, job: JobRecord) {
        let span = info_span!("receipt_job", job_id = %job.id, attempt = job.attempts_made);
        async {
            info!(worker_id = self.id, "Processing receipt job");
            let reporter: Arc<dyn ProgressReporter> =
                Arc::new(JobProgressReporter::new(Arc::clone(&self.queue), &job.id));

            let outcome = AssertUnwindSafe(self.handler.handle(&job, reporter))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    let reason = format!("Job handler panicked: {}", panic_message(&*panic));
                    error!(error = %reason, "Receipt job handler panicked");
                    Err(JobFailure::retryable(reason))
                });

            let recorded = match outcome {
                Ok(data) => self.queue.complete(&job.id, data),
                Err(failure) => self
                    .queue
                    .fail(&job.id, &failure.reason, failure.retryable)
                    .map(|_| ()),
            };
            if let Err(e) = recorded {
                error!(error = %e, "Failed to record receipt job outcome");
            }
        }
        .instrument(span)
        .await
    }

    /// Until the earliest scheduled job, capped at the poll interval.
    fn idle_wait(&self) -> Duration {
        match self.queue.next_run_at() {
            Ok(Some(at)) => (at - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
                .clamp(MIN_IDLE_WAIT, self.poll_interval),
            Ok(None) => self.poll_interval,
            Err(e) => {
                warn!(worker_id = self.id, error = %e, "Failed to read next job schedule");
                self.poll_interval
            }
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&str>() {
        *message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic"
    }
}

async fn run_janitor(
    queue: Arc<ReceiptJobQueue>,
    shutdown: Arc<AtomicBool>,
    stop: Arc<Notify>,
    interval: Duration,
) {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let stopped = stop.notified();
        tokio::pin!(stopped);
        stopped.as_mut().enable();

        if shutdown.load(Ordering::SeqCst) {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = queue.purge_finished() {
                    warn!(error = %e, "Failed to purge finished receipt jobs");
                }
            }
            _ = &mut stopped => {}
        }
    }
}
