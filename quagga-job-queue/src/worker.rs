//! The job queue worker: a consumer loop that turns queue jobs into
//! execution context calls.
//!
//! Each worker processes one job at a time. While a job is running, a
//! heartbeat task renews the lease on a fixed interval; if the queue reports
//! the lease lost, the heartbeat simply stops — the in-flight computation is
//! never forcibly aborted, its eventual completion just might be dropped as
//! stale. Primitive failures become job error results, not worker failures:
//! the loop is always ready for the next job.

use std::sync::Arc;

use color_eyre::eyre::{eyre, Report};
use tokio::{sync::watch, task::JoinHandle};
use tracing::Instrument;

use quagga_compute::{
    primitives::{
        hash::Hasher, msm::MultiScalarMul, notes::NoteDecryptor, transform::Transform,
    },
    ComputeError, ComputeModule, SharedContext, WorkerPool,
};

use crate::{
    job::{
        HasherRequest, Job, JobError, JobRequest, JobResponse, MultiScalarMulRequest,
        NoteDecryptorRequest, TransformRequest,
    },
    queue::{JobQueue, WorkerId},
    Config,
};

/// Executes claimed jobs against local execution contexts.
///
/// Dispatch is an exhaustive match over the closed request union, so adding a
/// primitive operation without handling it here is a compile error.
#[derive(Clone)]
pub struct JobRunner<M: ComputeModule> {
    note_decryptor: NoteDecryptor<M>,
    hasher: Hasher<M>,
    msm: MultiScalarMul<M>,
    transform: Transform<M>,
}

impl<M: ComputeModule> JobRunner<M> {
    /// A runner that fans batches out across `pool`.
    pub fn pooled(pool: Arc<WorkerPool<M>>) -> Self {
        Self {
            note_decryptor: NoteDecryptor::with_pool(pool.clone()),
            hasher: Hasher::with_pool(pool.clone()),
            msm: MultiScalarMul::with_pool(pool.clone()),
            transform: Transform::with_pool(pool),
        }
    }

    /// A runner bound to one execution context, for hosts with no parallelism
    /// to spare.
    pub fn single(context: SharedContext<M>) -> Self {
        Self {
            note_decryptor: NoteDecryptor::with_context(context.clone()),
            hasher: Hasher::with_context(context.clone()),
            msm: MultiScalarMul::with_context(context.clone()),
            transform: Transform::with_context(context),
        }
    }

    /// Runs one job request to completion.
    pub async fn run(&self, request: &JobRequest) -> Result<JobResponse, ComputeError> {
        match request {
            JobRequest::NoteDecryptor(NoteDecryptorRequest::TrialDecrypt {
                viewing_key,
                ciphertexts,
            }) => Ok(JobResponse::DecryptedNotes(
                self.note_decryptor
                    .trial_decrypt(viewing_key, ciphertexts)
                    .await?,
            )),

            JobRequest::Hasher(HasherRequest::HashMany { inputs }) => {
                Ok(JobResponse::Digests(self.hasher.hash_many(inputs).await?))
            }

            JobRequest::MultiScalarMul(MultiScalarMulRequest::Msm { points, scalars }) => {
                Ok(JobResponse::MsmResult(self.msm.msm(points, scalars).await?))
            }

            JobRequest::Transform(TransformRequest::TransformMany { polynomials }) => Ok(
                JobResponse::Transformed(self.transform.transform_many(polynomials).await?),
            ),
        }
    }
}

/// A spawned job queue consumer.
///
/// Dropping the handle stops the loop between jobs; [`JobQueueWorker::stop`]
/// waits for the in-flight job to finish first.
#[derive(Debug)]
pub struct JobQueueWorker {
    worker_id: WorkerId,
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<Result<(), Report>>,
}

impl JobQueueWorker {
    /// Registers with `queue`, subscribes to its wake-up hints, and spawns
    /// the consumer loop.
    pub fn spawn<M: ComputeModule>(
        queue: Arc<dyn JobQueue>,
        runner: JobRunner<M>,
        config: Config,
    ) -> Self {
        let worker_id = queue.register_worker();
        let (shutdown, shutdown_rx) = watch::channel(false);

        let span = tracing::info_span!("job queue worker", worker = %worker_id);
        let worker_loop = WorkerLoop {
            queue,
            runner,
            config,
            worker_id,
            shutdown: shutdown_rx,
        };
        let handle = tokio::spawn(worker_loop.run().instrument(span));

        Self {
            worker_id,
            shutdown,
            handle,
        }
    }

    /// This worker's queue identity.
    pub fn id(&self) -> WorkerId {
        self.worker_id
    }

    /// Unsubscribes and waits for any in-flight job to finish.
    ///
    /// This is a graceful drain, not a cancellation: a job being processed
    /// runs to completion and is reported before the worker exits.
    pub async fn stop(self) -> Result<(), Report> {
        let _ = self.shutdown.send(true);

        match self.handle.await {
            Ok(result) => result,
            Err(join_error) => Err(eyre!("job queue worker task failed: {join_error}")),
        }
    }
}

/// The state owned by the spawned consumer loop.
struct WorkerLoop<M: ComputeModule> {
    queue: Arc<dyn JobQueue>,
    runner: JobRunner<M>,
    config: Config,
    worker_id: WorkerId,
    shutdown: watch::Receiver<bool>,
}

impl<M: ComputeModule> WorkerLoop<M> {
    async fn run(mut self) -> Result<(), Report> {
        let mut new_jobs = self.queue.subscribe();

        tracing::debug!("job queue worker started");

        loop {
            // Work off anything already queued, then sleep until a hint.
            self.drain_backlog().await;

            tokio::select! {
                biased;

                // Both a send and a dropped sender mean "stop": either the
                // owner asked, or the owner is gone.
                _ = self.shutdown.changed() => {
                    tracing::debug!("job queue worker stopping");
                    return Ok(());
                }

                hint = new_jobs.recv() => match hint {
                    Ok(()) => {}

                    // Missed hints are harmless: the drain pass re-polls the
                    // queue until it is empty anyway.
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::debug!(missed, "job hint channel lagged");
                    }

                    Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                        tracing::debug!("job queue dropped; worker stopping");
                        return Ok(());
                    }
                },
            }
        }
    }

    /// Claims and processes jobs until the queue has none left for us.
    async fn drain_backlog(&mut self) {
        // Soft priority: backgrounded consumers leave foreground consumers a
        // head start on freshly queued work.
        if let Some(delay) = self.config.backgrounded_claim_delay {
            tokio::time::sleep(delay).await;
        }

        loop {
            if *self.shutdown.borrow() {
                return;
            }

            let Some(job) = self.queue.get_job(self.worker_id).await else {
                return;
            };

            self.process_job(job).await;
        }
    }

    /// Runs one job and reports its terminal result.
    ///
    /// Never returns an error: primitive failures are converted into job
    /// error results, so one bad job cannot take the worker down.
    async fn process_job(&self, job: Job) {
        let job_id = job.id;

        tracing::debug!(
            id = %job_id,
            target = ?job.request.target(),
            operation = job.request.operation(),
            "processing job"
        );

        let heartbeat = self.spawn_heartbeat(job_id);

        let result = self
            .runner
            .run(&job.request)
            .await
            .map_err(|error| JobError::new(error.to_string()));

        if let Err(error) = &result {
            tracing::debug!(id = %job_id, %error, "job failed; reporting error result");
        }

        self.queue.complete_job(self.worker_id, job_id, result).await;

        // The job is settled; there is no lease left to renew.
        heartbeat.abort();
    }

    /// Starts the lease renewal task for `job_id`.
    ///
    /// The task re-arms itself only while the queue confirms this worker
    /// still holds the lease. On a lost lease it stops silently: the
    /// computation is left to finish, and its completion may be dropped as
    /// stale.
    fn spawn_heartbeat(&self, job_id: crate::job::JobId) -> JoinHandle<()> {
        let queue = self.queue.clone();
        let worker_id = self.worker_id;
        let interval = self.config.heartbeat_interval;

        let heartbeat = async move {
            let mut ticks = tokio::time::interval(interval);
            ticks.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // The first tick fires immediately; the lease is fresh then.
            ticks.tick().await;

            loop {
                ticks.tick().await;

                if queue.ping(worker_id, job_id).await.is_none() {
                    tracing::warn!(
                        id = %job_id,
                        "lease lost; letting the computation finish without renewal"
                    );
                    metrics::counter!("jobqueue.leases.lost").increment(1);
                    return;
                }
            }
        };

        tokio::spawn(heartbeat.in_current_span())
    }
}
