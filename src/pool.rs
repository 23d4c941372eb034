//! Bounded worker pool for fingerprint generation.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, SyncSender, TrySendError};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};

use crate::budget::{Budget, BudgetExceeded};
use crate::config::PoolConfig;
use crate::error::PoolError;
use crate::fingerprint::AudioFingerprinter;
use crate::models::{AudioBuffer, Fingerprint};

/// Longest single wait before re-checking the cancellation flag.
const POLL_INTERVAL: Duration = Duration::from_millis(20);

type JobResult = Result<Vec<Fingerprint>, PoolError>;

struct Job {
    buffer: AudioBuffer,
    budget: Budget,
    reply: mpsc::Sender<JobResult>,
}

/// A submitted job whose fingerprints have not been collected yet.
pub struct PendingFingerprints {
    reply: Receiver<JobResult>,
    budget: Budget,
}

impl PendingFingerprints {
    /// Blocks until the job finishes or its budget runs out.
    pub fn wait(self) -> JobResult {
        loop {
            let slice = match self.budget.remaining() {
                Some(left) => left.min(POLL_INTERVAL),
                None => POLL_INTERVAL,
            };
            match self.reply.recv_timeout(slice) {
                Ok(result) => return result,
                Err(RecvTimeoutError::Disconnected) => return Err(PoolError::Disconnected),
                Err(RecvTimeoutError::Timeout) => {
                    if let Err(exceeded) = self.budget.check() {
                        return Err(budget_error(exceeded));
                    }
                }
            }
        }
    }
}

fn budget_error(exceeded: BudgetExceeded) -> PoolError {
    match exceeded {
        BudgetExceeded::TimedOut => PoolError::TimedOut,
        BudgetExceeded::Cancelled => PoolError::Cancelled,
    }
}

/// Fixed set of threads sharing one fingerprinter, fed through a bounded
/// queue. A full queue refuses new work instead of growing.
pub struct FingerprintPool {
    sender: Option<SyncSender<Job>>,
    workers: Vec<JoinHandle<()>>,
    capacity: usize,
}

impl FingerprintPool {
    pub fn new(
        fingerprinter: Arc<AudioFingerprinter>,
        config: &PoolConfig,
    ) -> Result<Self, PoolError> {
        let capacity = config.queue_capacity.max(1);
        let (sender, receiver) = mpsc::sync_channel::<Job>(capacity);
        let receiver = Arc::new(Mutex::new(receiver));

        let count = config.worker_count();
        let mut workers = Vec::with_capacity(count);
        for id in 0..count {
            let receiver = Arc::clone(&receiver);
            let fingerprinter = Arc::clone(&fingerprinter);
            let handle = thread::Builder::new()
                .name(format!("songprint-fp-{id}"))
                .spawn(move || worker_loop(id, &receiver, &fingerprinter))
                .map_err(PoolError::Spawn)?;
            workers.push(handle);
        }
        debug!(workers = count, capacity, "Started fingerprint pool");

        Ok(Self {
            sender: Some(sender),
            workers,
            capacity,
        })
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn workers(&self) -> usize {
        self.workers.len()
    }

    /// Queues a job, failing fast with [`PoolError::Saturated`] when the
    /// queue is full.
    pub fn submit(
        &self,
        buffer: AudioBuffer,
        budget: Budget,
    ) -> Result<PendingFingerprints, PoolError> {
        let sender = self.sender.as_ref().ok_or(PoolError::Disconnected)?;
        let (reply, pending) = mpsc::channel();
        let job = Job {
            buffer,
            budget: budget.clone(),
            reply,
        };
        match sender.try_send(job) {
            Ok(()) => Ok(PendingFingerprints {
                reply: pending,
                budget,
            }),
            Err(TrySendError::Full(_)) => {
                warn!(capacity = self.capacity, "Fingerprint queue saturated");
                Err(PoolError::Saturated {
                    capacity: self.capacity,
                })
            }
            Err(TrySendError::Disconnected(_)) => Err(PoolError::Disconnected),
        }
    }

    /// Queues a job and waits for its fingerprints.
    pub fn generate(&self, buffer: AudioBuffer, budget: Budget) -> JobResult {
        self.submit(buffer, budget)?.wait()
    }

    /// Fingerprints every buffer, one result per input in input order.
    ///
    /// Unlike [`submit`](Self::submit) this waits for queue space, so a large
    /// batch flows through the pool instead of being refused. One failed
    /// item does not stop the rest.
    pub fn generate_batch(&self, buffers: Vec<AudioBuffer>, budget: &Budget) -> Vec<JobResult> {
        let Some(sender) = self.sender.as_ref() else {
            return buffers.iter().map(|_| Err(PoolError::Disconnected)).collect();
        };
        let total = buffers.len();
        let mut pending = Vec::with_capacity(total);
        for buffer in buffers {
            let (reply, rx) = mpsc::channel();
            let job = Job {
                buffer,
                budget: budget.clone(),
                reply,
            };
            pending.push(match sender.send(job) {
                Ok(()) => Ok(PendingFingerprints {
                    reply: rx,
                    budget: budget.clone(),
                }),
                Err(_) => Err(PoolError::Disconnected),
            });
        }
        let results: Vec<JobResult> = pending
            .into_iter()
            .map(|p| p.and_then(PendingFingerprints::wait))
            .collect();
        let failed = results.iter().filter(|r| r.is_err()).count();
        debug!(total, failed, "Fingerprint batch finished");
        results
    }
}

impl Drop for FingerprintPool {
    fn drop(&mut self) {
        self.sender.take();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                warn!("Fingerprint worker panicked");
            }
        }
    }
}

fn worker_loop(id: usize, receiver: &Mutex<Receiver<Job>>, fingerprinter: &AudioFingerprinter) {
    loop {
        let job = {
            let Ok(guard) = receiver.lock() else {
                break;
            };
            guard.recv()
        };
        let Ok(job) = job else {
            break;
        };
        // Jobs that waited out their budget in the queue are not started.
        let result = match job.budget.check() {
            Err(exceeded) => Err(budget_error(exceeded)),
            Ok(()) => fingerprinter.generate(&job.buffer).map_err(PoolError::from),
        };
        // The submitter may have given up already.
        let _ = job.reply.send(result);
    }
    debug!(worker = id, "Fingerprint worker stopped");
}
