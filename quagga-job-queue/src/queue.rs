//! The abstract job queue contract.
//!
//! A job queue decouples producers (callers that need a primitive computed)
//! from consumers (workers with spare execution contexts), across a process
//! boundary if need be. Claims are protected by renewable leases so that a
//! worker failure never strands a job: when the lease lapses, the job becomes
//! claimable again.
//!
//! The queue is an explicit dependency, created and destroyed by the
//! embedder and passed by reference to every worker; there is no ambient
//! process-global queue.

use futures::future::BoxFuture;
use tokio::sync::{broadcast, oneshot};

use crate::job::{Job, JobError, JobId, JobRequest, JobResponse};

/// An opaque identity for one queue consumer.
///
/// Used as the lease holder, so the queue can tell a live renewal from a
/// stale one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct WorkerId(pub(crate) u64);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker {}", self.0)
    }
}

/// A producer's handle to an enqueued job.
///
/// Resolves once some worker reports the job's terminal result. Producers
/// never see lease or heartbeat mechanics, only the result (or a queue
/// shutdown).
#[derive(Debug)]
pub struct JobHandle {
    pub(crate) id: JobId,
    pub(crate) result: oneshot::Receiver<Result<JobResponse, JobError>>,
}

impl JobHandle {
    /// The id the queue assigned to this job.
    pub fn id(&self) -> JobId {
        self.id
    }

    /// Waits for the job's terminal result.
    ///
    /// Any caller-visible timeout is the caller's own to implement; the
    /// queue's lease machinery bounds worker liveness, not job latency.
    pub async fn wait(self) -> Result<JobResponse, JobError> {
        match self.result.await {
            Ok(result) => result,
            Err(_recv_error) => Err(JobError::new(
                "job queue was shut down before the job completed",
            )),
        }
    }
}

/// The shared, lease-based queue of pending primitive invocations.
///
/// Each job is executed by at most one worker at a time: `get_job` creates a
/// lease, `ping` renews it, and `complete_job` settles it. A lease that
/// lapses without renewal makes its job claimable again.
pub trait JobQueue: Send + Sync + 'static {
    /// Submits a job, returning a handle that resolves to its terminal
    /// result.
    ///
    /// Enqueuing emits a wake-up hint to all subscribed consumers.
    fn enqueue(&self, request: JobRequest) -> BoxFuture<'_, JobHandle>;

    /// Claims the oldest claimable job for `worker`, creating a lease.
    ///
    /// Returns `None` if nothing is claimable. A job whose previous lease has
    /// lapsed counts as claimable, in its original queue position.
    fn get_job(&self, worker: WorkerId) -> BoxFuture<'_, Option<Job>>;

    /// Renews `worker`'s lease on `job`.
    ///
    /// Returns the job id if the lease was still held by `worker` and has
    /// been extended; `None` means the lease is lost and the worker should
    /// stop renewing (the computation itself is allowed to finish).
    fn ping(&self, worker: WorkerId, job: JobId) -> BoxFuture<'_, Option<JobId>>;

    /// Reports the terminal result for `job` and settles its lease.
    ///
    /// The first terminal result wins; a later completion for the same job
    /// (for instance from the original holder after a reclaim) is dropped.
    fn complete_job(
        &self,
        worker: WorkerId,
        job: JobId,
        result: Result<JobResponse, JobError>,
    ) -> BoxFuture<'_, ()>;

    /// Allocates an identity for a new consumer.
    fn register_worker(&self) -> WorkerId;

    /// Subscribes to new-job wake-up hints.
    ///
    /// Hints carry no payload and promise nothing: a woken consumer must
    /// still call [`JobQueue::get_job`] and may find that another consumer
    /// got there first.
    fn subscribe(&self) -> broadcast::Receiver<()>;
}
