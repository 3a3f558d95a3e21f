//! Errors that can occur while calling into the compute module.
//!
//! The variants follow the failure taxonomy of the call path: bridge protocol
//! faults are fatal to the owning execution context and must not be retried on
//! it, module computation failures leave the context usable, and host
//! operation failures are whatever the embedder's async work reported.

use thiserror::Error;

use crate::bridge::BridgePhase;

/// Error type alias to make working with tower traits easier.
///
/// Note: the 'static lifetime bound means that the *type* cannot have any
/// non-'static lifetimes, (e.g., when a type contains a borrow and is
/// parameterized by 'a), *not* that the object itself has 'static lifetime.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// A suspendable call bridge protocol fault.
///
/// These errors mean the bridge stack or its state machine can no longer be
/// trusted. They are fatal to the owning [`ExecutionContext`](crate::context::ExecutionContext):
/// callers must discard the context rather than retry on it.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum BridgeError {
    #[error("bridge was not initialized before the first call")]
    NotInitialized,

    #[error("bridge was already initialized for this context")]
    AlreadyInitialized,

    #[error("a previous call on this context was abandoned in phase {phase:?}")]
    Busy {
        /// The phase the abandoned call left behind.
        phase: BridgePhase,
    },

    #[error("module suspended without a pending host operation")]
    MissingHostOperation,

    #[error("a host operation is already outstanding on this context")]
    OutstandingHostOperation,

    #[error("module resumed without a stored host result")]
    MissingHostResult,

    #[error("unknown host import: {0}")]
    UnknownImport(String),

    #[error("import invoked while the bridge was mid-suspension, in phase {phase:?}")]
    ImportDuringSuspend {
        /// The phase the bridge was in when the import was invoked.
        phase: BridgePhase,
    },

    #[error("module suspended while the bridge was in phase {phase:?}")]
    UnexpectedSuspension {
        /// The phase the bridge was in when the module suspended.
        phase: BridgePhase,
    },

    #[error("module completed while a suspension was still pending, in phase {phase:?}")]
    DanglingSuspension {
        /// The phase the bridge was left in at completion.
        phase: BridgePhase,
    },

    #[error("module completed without consuming the rewound host result")]
    UnconsumedHostResult,

    #[error("stack control export failed in phase {phase:?}: {error}")]
    ControlFault {
        /// The phase the bridge was in when the control export failed.
        phase: BridgePhase,
        /// The module's failure, typically bridge stack exhaustion.
        error: ModuleError,
    },
}

/// An error reported by the compute module itself.
///
/// Unlike [`BridgeError`]s, these leave the execution context usable: the
/// bridge state is reset and the next call may proceed.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum ModuleError {
    #[error("unknown module export: {0}")]
    UnknownExport(String),

    #[error("invalid argument for {operation}: {reason}")]
    InvalidArgument {
        /// The export that rejected its arguments.
        operation: String,
        /// The module's description of the problem.
        reason: String,
    },

    #[error("module returned a malformed result for {operation}: {reason}")]
    MalformedResult {
        /// The export that produced the result.
        operation: String,
        /// Why the result buffer could not be interpreted.
        reason: String,
    },

    #[error("module memory access out of bounds: {ptr}..{ptr}+{len}")]
    MemoryOutOfBounds {
        /// Start of the rejected access.
        ptr: u32,
        /// Length of the rejected access.
        len: u32,
    },

    #[error("module allocator is out of memory")]
    OutOfMemory,

    #[error("module trap: {0}")]
    Trap(String),
}

impl ModuleError {
    /// Constructs an [`ModuleError::InvalidArgument`] for `operation`.
    pub fn invalid_argument(operation: &str, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }

    /// Constructs a [`ModuleError::MalformedResult`] for `operation`.
    pub fn malformed_result(operation: &str, reason: impl Into<String>) -> Self {
        Self::MalformedResult {
            operation: operation.to_string(),
            reason: reason.into(),
        }
    }
}

/// Any failure of a call into an execution context.
#[derive(Error, Debug)]
pub enum ComputeError {
    /// A suspendable call bridge protocol fault, fatal to the owning context.
    #[error("suspendable call bridge fault: {0}")]
    Bridge(#[from] BridgeError),

    /// A computation failure reported by the module; the context remains usable.
    #[error("module computation failed: {0}")]
    Module(#[from] ModuleError),

    /// The asynchronous host operation awaited by a suspended call failed.
    #[error("host operation failed: {0}")]
    Host(BoxError),
}

impl ComputeError {
    /// Returns true if the owning execution context must be discarded.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ComputeError::Bridge(_))
    }
}
