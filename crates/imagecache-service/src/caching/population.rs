use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::path::PathBuf;
use std::pin::pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::future::BoxFuture;
use tokio::runtime::Handle;
use tokio::sync::{Notify, Semaphore, mpsc};

use crate::config::PopulationConfig;
use crate::error::ImageError;

/// The outcome of [`PopulationQueue::submit`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Submission {
    /// The job was queued and will run.
    Scheduled,
    /// A job for the same cache path is already queued or running.
    Deduplicated,
    /// The queue is full, or shutting down.
    Dropped,
}

/// Writes cache entries in the background.
///
/// Jobs are queued in a bounded channel and executed by a fixed number of workers. There is at
/// most one queued or running job per cache path. Job results are only logged and reported as
/// metrics.
#[derive(Clone)]
pub struct PopulationQueue {
    sender: mpsc::Sender<PopulationJob>,
    /// Cache paths of the currently queued or running jobs.
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

impl fmt::Debug for PopulationQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PopulationQueue")
            .field("pending", &self.pending.load(Ordering::Relaxed))
            .field("capacity", &self.sender.max_capacity())
            .finish()
    }
}

impl PopulationQueue {
    /// Creates the queue and spawns its dispatcher on `runtime`.
    pub fn new(config: &PopulationConfig, runtime: Handle) -> Self {
        let (sender, mut receiver) = mpsc::channel::<PopulationJob>(config.queue_size.max(1));
        let workers = Arc::new(Semaphore::new(config.workers.max(1)));

        let spawner = runtime.clone();
        runtime.spawn(async move {
            while let Some(job) = receiver.recv().await {
                let Ok(permit) = Arc::clone(&workers).acquire_owned().await else {
                    break;
                };
                spawner.spawn(async move {
                    job.run().await;
                    drop(permit);
                });
            }
        });

        Self {
            sender,
            in_flight: Default::default(),
            pending: Default::default(),
            idle: Default::default(),
        }
    }

    /// Queues `task`, which populates the cache entry at `path`.
    ///
    /// This never waits. If a job for `path` is already in flight, or the queue is full, `task`
    /// is dropped without being polled.
    pub fn submit<F>(&self, source: &'static str, path: PathBuf, task: F) -> Submission
    where
        F: Future<Output = Result<u64, ImageError>> + Send + 'static,
    {
        let mut in_flight = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        if in_flight.contains(&path) {
            metric!(counter("population.deduplicated") += 1, "source" => source);
            tracing::trace!(path = %path.display(), "Population already in flight");
            return Submission::Deduplicated;
        }
        in_flight.insert(path.clone());
        drop(in_flight);

        self.pending.fetch_add(1, Ordering::AcqRel);
        let job = PopulationJob {
            source,
            task: Box::pin(task),
            done: InFlightToken {
                path: path.clone(),
                queue: self.clone_state(),
            },
        };

        match self.sender.try_send(job) {
            Ok(()) => {
                metric!(counter("population.scheduled") += 1, "source" => source);
                Submission::Scheduled
            }
            // Dropping the returned job releases the path again.
            Err(_) => {
                metric!(counter("population.dropped") += 1, "source" => source);
                tracing::warn!(path = %path.display(), "Population queue is full, skipping");
                Submission::Dropped
            }
        }
    }

    /// The number of queued and running jobs.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    /// Waits until no job is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            let mut notified = pin!(self.idle.notified());
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn clone_state(&self) -> QueueState {
        QueueState {
            in_flight: Arc::clone(&self.in_flight),
            pending: Arc::clone(&self.pending),
            idle: Arc::clone(&self.idle),
        }
    }
}

struct QueueState {
    in_flight: Arc<Mutex<HashSet<PathBuf>>>,
    pending: Arc<AtomicUsize>,
    idle: Arc<Notify>,
}

/// Releases the cache path of a job once it finished, or was dropped.
struct InFlightToken {
    path: PathBuf,
    queue: QueueState,
}

impl Drop for InFlightToken {
    fn drop(&mut self) {
        self.queue
            .in_flight
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.path);
        if self.queue.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.queue.idle.notify_waiters();
        }
    }
}

struct PopulationJob {
    source: &'static str,
    task: BoxFuture<'static, Result<u64, ImageError>>,
    done: InFlightToken,
}

impl PopulationJob {
    async fn run(self) {
        let path = self.done.path.display().to_string();
        let start = Instant::now();

        match self.task.await {
            Ok(size) => {
                metric!(counter("population.success") += 1, "source" => self.source);
                metric!(time_raw("population.size") = size, "source" => self.source);
                tracing::debug!(path = %path, size, "Populated cache entry");
            }
            Err(error) => {
                metric!(counter("population.failure") += 1, "source" => self.source);
                tracing::warn!(path = %path, error = ?error, "Failed to populate cache entry");
            }
        }

        metric!(timer("population.duration") = start.elapsed(), "source" => self.source);
    }
}
