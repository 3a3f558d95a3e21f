//! Pooled execution contexts for the Quagga compute module.
//!
//! The compute module is a precompiled, single-threaded native module that
//! implements the expensive cryptographic primitives: note trial decryption,
//! additive-hash commitments, multi-scalar multiplication, and polynomial
//! transforms. This crate provides the concurrency machinery around it:
//!
//! - the [suspendable call bridge](bridge), which lets one call into the
//!   module perform asynchronous host work without real threads, by capturing
//!   and replaying the module's call stack;
//! - [execution contexts](context), one loaded module instance each, the unit
//!   of parallelism;
//! - the [worker pool](pool), which runs several contexts side by side and
//!   multiplexes primitive operations across them;
//! - the [primitive adapters](primitives), each available bound to a single
//!   context or fanned out across the pool, with identical signatures.
//!
//! There is no shared mutable state between execution contexts; all inputs
//! and outputs are copied across the module boundary.

pub mod bridge;
pub mod context;
pub mod error;
pub mod module;
pub mod pool;
pub mod primitives;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use bridge::{wrap_import, BridgePhase, CallBridge, HostImport};
pub use context::{ExecutionContext, SharedContext};
pub use error::{BoxError, BridgeError, ComputeError, ModuleError};
pub use module::{CallOutcome, ComputeModule, ImportOutcome, Memory, ModuleLoader, ScratchRegion};
pub use pool::WorkerPool;
