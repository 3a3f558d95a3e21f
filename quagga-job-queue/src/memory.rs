//! The in-process reference job queue.
//!
//! All queue state lives behind one mutex, so every mutation is a
//! single-writer critical section: two consumers can never claim the same
//! job, and completion against an already-settled job is a no-op. Expired
//! leases are swept lazily, inside the same critical section as the claim or
//! ping that observes them.

use std::{
    collections::BTreeMap,
    sync::Mutex,
    time::Duration,
};

use futures::{future, FutureExt};
use tokio::{
    sync::{broadcast, oneshot},
    time::Instant,
};

use crate::{
    constants::NEW_JOB_CHANNEL_CAPACITY,
    job::{Job, JobError, JobId, JobRequest, JobResponse},
    queue::{JobHandle, JobQueue, WorkerId},
    Config,
};

/// A lease: one worker's time-bounded claim on one job.
#[derive(Clone, Copy, Debug)]
struct Lease {
    /// The claiming worker.
    holder: WorkerId,
    /// When the claim lapses unless renewed.
    expires_at: Instant,
}

impl Lease {
    fn is_expired(&self, now: Instant) -> bool {
        self.expires_at <= now
    }
}

/// A job that has been enqueued and not yet settled.
struct QueuedJob {
    request: JobRequest,

    /// The current claim, if any. `None` means pending.
    lease: Option<Lease>,

    /// Resolves the producer's handle; consumed by the first completion.
    completion: oneshot::Sender<Result<JobResponse, JobError>>,
}

/// Queue state, mutated only inside the critical section.
#[derive(Default)]
struct Inner {
    /// Unsettled jobs in id order, which is enqueue order. Claiming scans in
    /// order, so reclaimed jobs keep their original position.
    jobs: BTreeMap<JobId, QueuedJob>,

    /// The next job id. Monotonic; ids are never reused.
    next_job_id: u64,

    /// The next worker id.
    next_worker_id: u64,
}

/// The reference [`JobQueue`]: a single-process, in-memory queue.
pub struct MemoryJobQueue {
    inner: Mutex<Inner>,

    /// New-job wake-up hints.
    new_jobs: broadcast::Sender<()>,

    /// How long claims last without renewal.
    lease_duration: Duration,
}

impl std::fmt::Debug for MemoryJobQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryJobQueue")
            .field("pending_jobs", &self.pending_jobs())
            .field("lease_duration", &self.lease_duration)
            .finish()
    }
}

impl MemoryJobQueue {
    /// Creates an empty queue using `config`'s lease duration.
    pub fn new(config: &Config) -> Self {
        let (new_jobs, _) = broadcast::channel(NEW_JOB_CHANNEL_CAPACITY);

        Self {
            inner: Mutex::new(Inner::default()),
            new_jobs,
            lease_duration: config.lease_duration,
        }
    }

    /// The number of unsettled jobs, claimed or not.
    pub fn pending_jobs(&self) -> usize {
        self.lock().jobs.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner
            .lock()
            .expect("previous task panicked inside the job queue critical section")
    }
}

impl JobQueue for MemoryJobQueue {
    fn enqueue(&self, request: JobRequest) -> future::BoxFuture<'_, JobHandle> {
        let (completion, result) = oneshot::channel();

        let id = {
            let mut inner = self.lock();

            let id = JobId(inner.next_job_id);
            inner.next_job_id += 1;

            inner.jobs.insert(
                id,
                QueuedJob {
                    request,
                    lease: None,
                    completion,
                },
            );

            id
        };

        tracing::debug!(%id, "enqueued job");
        metrics::counter!("jobqueue.jobs.enqueued").increment(1);

        // A send error just means no consumer is subscribed right now; the
        // job stays queued for the next one that polls.
        let _ = self.new_jobs.send(());

        future::ready(JobHandle { id, result }).boxed()
    }

    fn get_job(&self, worker: WorkerId) -> future::BoxFuture<'_, Option<Job>> {
        let now = Instant::now();
        let mut inner = self.lock();

        let claimed = inner.jobs.iter_mut().find_map(|(id, job)| {
            match job.lease {
                None => {}
                Some(lease) if lease.is_expired(now) => {
                    tracing::warn!(
                        %id,
                        holder = %lease.holder,
                        "lease expired without completion; reclaiming job"
                    );
                    metrics::counter!("jobqueue.leases.expired").increment(1);
                }
                Some(_live) => return None,
            }

            job.lease = Some(Lease {
                holder: worker,
                expires_at: now + self.lease_duration,
            });

            Some(Job {
                id: *id,
                request: job.request.clone(),
            })
        });

        if let Some(job) = &claimed {
            tracing::debug!(id = %job.id, %worker, "claimed job");
            metrics::counter!("jobqueue.jobs.claimed").increment(1);
        }

        future::ready(claimed).boxed()
    }

    fn ping(&self, worker: WorkerId, job: JobId) -> future::BoxFuture<'_, Option<JobId>> {
        let now = Instant::now();
        let mut inner = self.lock();

        let renewed = inner.jobs.get_mut(&job).and_then(|queued| match queued.lease {
            Some(lease) if lease.holder == worker && !lease.is_expired(now) => {
                queued.lease = Some(Lease {
                    holder: worker,
                    expires_at: now + self.lease_duration,
                });
                Some(job)
            }
            _ => None,
        });

        future::ready(renewed).boxed()
    }

    fn complete_job(
        &self,
        worker: WorkerId,
        job: JobId,
        result: Result<JobResponse, JobError>,
    ) -> future::BoxFuture<'_, ()> {
        let now = Instant::now();
        let mut inner = self.lock();

        match inner.jobs.remove(&job) {
            Some(queued) => {
                // Accept the completion even when the lease has lapsed or
                // moved on: the first terminal result wins, a lost lease only
                // means a duplicate might arrive later and be dropped above.
                let stale = match queued.lease {
                    Some(lease) => lease.holder != worker || lease.is_expired(now),
                    None => true,
                };
                if stale {
                    tracing::warn!(%job, %worker, "accepting completion from a stale lease holder");
                    metrics::counter!("jobqueue.jobs.stale_completions").increment(1);
                }

                match &result {
                    Ok(_) => metrics::counter!("jobqueue.jobs.completed").increment(1),
                    Err(error) => {
                        tracing::debug!(%job, %error, "job completed with an error result");
                        metrics::counter!("jobqueue.jobs.failed").increment(1);
                    }
                }

                // The producer may have dropped its handle; that is its
                // business, not an error here.
                let _ = queued.completion.send(result);
            }

            None => {
                tracing::warn!(
                    %job,
                    %worker,
                    "dropping duplicate completion for an already settled job"
                );
                metrics::counter!("jobqueue.jobs.duplicate_completions").increment(1);
            }
        }

        future::ready(()).boxed()
    }

    fn register_worker(&self) -> WorkerId {
        let mut inner = self.lock();
        let id = WorkerId(inner.next_worker_id);
        inner.next_worker_id += 1;
        id
    }

    fn subscribe(&self) -> broadcast::Receiver<()> {
        self.new_jobs.subscribe()
    }
}
