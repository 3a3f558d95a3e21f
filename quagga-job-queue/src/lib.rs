//! The lease-based job queue for Quagga compute jobs.
//!
//! Producers enqueue primitive invocations and get back a handle that
//! resolves to the result; consumers claim jobs one at a time under a
//! renewable lease and execute them against local [execution
//! contexts](quagga_compute). The lease protects liveness, not latency: if a
//! consumer dies mid-job, its lease lapses and another consumer picks the
//! job up.
//!
//! The pieces:
//!
//! - [`job`]: the typed request/response model. Dispatch is a closed union
//!   per target primitive, checked for exhaustiveness at compile time.
//! - [`client`]: the producer-side primitive surface, one method per
//!   operation, identical in shape to the in-process adapters.
//! - [`queue`]: the abstract [`JobQueue`] contract shared by producers and
//!   consumers.
//! - [`memory`]: the single-process reference queue, one critical section
//!   around all queue state.
//! - [`worker`]: the consumer loop, heartbeat renewal, and the
//!   [`JobRunner`](worker::JobRunner) that maps requests onto the primitive
//!   adapters.

pub mod client;
pub mod config;
pub mod constants;
pub mod job;
pub mod memory;
pub mod queue;
pub mod worker;

pub use client::JobQueueClient;
pub use config::Config;
pub use job::{Job, JobError, JobId, JobRequest, JobResponse, Target};
pub use memory::MemoryJobQueue;
pub use queue::{JobHandle, JobQueue, WorkerId};
pub use worker::{JobQueueWorker, JobRunner};
