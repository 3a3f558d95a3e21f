//! The suspendable call bridge.
//!
//! A call into the compute module looks synchronous to the module's own code,
//! but some of its host imports are asynchronous. The bridge makes the two
//! meet without real threads: when a wrapped import starts async host work,
//! the module unwinds its call stack into a reserved region of its own linear
//! memory (the bridge stack) and returns control to the host. The bridge
//! awaits the host operation, tells the module to replay the captured stack,
//! and re-invokes the export; the wrapped import then hands the module the
//! stored result and execution proceeds from where it left off. A single
//! call may go through any number of these suspension cycles.
//!
//! The bridge is an explicit state machine rather than a nest of futures:
//!
//! ```text
//! Idle -> Unwinding -> AwaitingHost -> Rewinding -> Idle
//! ```
//!
//! driven by two module control exports (`begin_unwind`, `begin_rewind`) and
//! the import dispatch in [`CallBridge::invoke_import`]. The state is not
//! re-entrant: one logical call per context at a time, and only one
//! outstanding host operation per call.

use std::collections::HashMap;

use futures::{future::BoxFuture, FutureExt};

use crate::{
    error::{BoxError, BridgeError, ComputeError},
    module::{CallOutcome, ComputeModule, ImportOutcome, ScratchRegion},
};

/// The size of the bridge stack reserved inside module memory.
///
/// Deep module call stacks at the moment of suspension need more room; this
/// matches the module's documented worst case with headroom.
pub const BRIDGE_STACK_BYTES: u32 = 64 * 1024;

/// The phase of the suspendable call bridge state machine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BridgePhase {
    /// No suspension in progress.
    Idle,

    /// A wrapped import started host work; the module is unwinding its stack.
    Unwinding,

    /// The stack is captured and the host operation is being awaited.
    AwaitingHost,

    /// The stack is being replayed; the next import invocation is the
    /// continuation and consumes the stored host result.
    Rewinding,
}

/// The future produced by a wrapped host import.
pub type HostFuture = BoxFuture<'static, Result<Vec<u8>, BoxError>>;

/// An asynchronous host function adapted for synchronous invocation from
/// module code.
///
/// Build one with [`wrap_import`].
pub struct HostImport {
    start: Box<dyn FnMut(&[Vec<u8>]) -> HostFuture + Send>,
}

impl std::fmt::Debug for HostImport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostImport").finish_non_exhaustive()
    }
}

/// Adapts an asynchronous host function into a [`HostImport`].
///
/// The module invokes the import synchronously. On the first (non-
/// continuation) invocation the bridge starts `host_fn`'s async work and
/// begins the suspension; on the replay invocation it ends the rewind and
/// returns the stored result to the module.
pub fn wrap_import<F, Fut, E>(mut host_fn: F) -> HostImport
where
    F: FnMut(Vec<Vec<u8>>) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = Result<Vec<u8>, E>> + Send + 'static,
    E: Into<BoxError>,
{
    HostImport {
        start: Box::new(move |args: &[Vec<u8>]| {
            let fut = host_fn(args.to_vec());
            async move { fut.await.map_err(Into::into) }.boxed()
        }),
    }
}

/// The suspendable call bridge state for one execution context.
pub struct CallBridge {
    /// Current phase of the suspension state machine.
    phase: BridgePhase,

    /// The in-flight host operation, if a wrapped import has started one.
    pending: Option<HostFuture>,

    /// The resolved host result, waiting to be consumed by the continuation
    /// invocation of the import that suspended.
    resumed: Option<Vec<u8>>,

    /// Host imports callable from module code, by name.
    imports: HashMap<String, HostImport>,

    /// The bridge stack, once allocated inside module memory.
    stack: Option<ScratchRegion>,

    /// The bridge stack size used at initialization.
    stack_bytes: u32,
}

impl std::fmt::Debug for CallBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallBridge")
            .field("phase", &self.phase)
            .field("pending", &self.pending.is_some())
            .field("resumed", &self.resumed.is_some())
            .field("imports", &self.imports.keys().collect::<Vec<_>>())
            .field("stack", &self.stack)
            .finish()
    }
}

impl Default for CallBridge {
    fn default() -> Self {
        Self::new()
    }
}

impl CallBridge {
    /// Creates an uninitialized bridge with the default stack size.
    pub fn new() -> Self {
        Self::with_stack_bytes(BRIDGE_STACK_BYTES)
    }

    /// Creates an uninitialized bridge with a custom stack size.
    pub fn with_stack_bytes(stack_bytes: u32) -> Self {
        Self {
            phase: BridgePhase::Idle,
            pending: None,
            resumed: None,
            imports: HashMap::new(),
            stack: None,
            stack_bytes,
        }
    }

    /// Registers a host import under `name`.
    ///
    /// Registering a name twice replaces the previous import.
    pub fn register_import(&mut self, name: impl Into<String>, import: HostImport) {
        self.imports.insert(name.into(), import);
    }

    /// Allocates the bridge stack inside `module`'s linear memory.
    ///
    /// Must be called exactly once per execution context, before any call.
    pub fn initialize<M: ComputeModule>(&mut self, module: &mut M) -> Result<(), ComputeError> {
        if self.stack.is_some() {
            return Err(BridgeError::AlreadyInitialized.into());
        }

        let ptr = module.alloc(self.stack_bytes)?;
        self.stack = Some(ScratchRegion {
            ptr,
            len: self.stack_bytes,
        });

        tracing::debug!(stack = ?self.stack, "initialized suspendable call bridge");

        Ok(())
    }

    /// Releases the bridge stack.
    ///
    /// Must be called before the owning execution context is discarded.
    pub fn teardown<M: ComputeModule>(&mut self, module: &mut M) -> Result<(), ComputeError> {
        if let Some(stack) = self.stack.take() {
            module.free(stack.ptr)?;
        }

        Ok(())
    }

    /// The current phase of the suspension state machine.
    pub fn phase(&self) -> BridgePhase {
        self.phase
    }

    /// Invokes the named export and drives it through any suspension cycles.
    ///
    /// Resolves with the export's final return buffer once no further
    /// suspension occurs. If the awaited host operation fails, the failure
    /// propagates to the caller and the bridge state is reset to idle, so the
    /// next call on this context starts clean.
    pub async fn call<M: ComputeModule>(
        &mut self,
        module: &mut M,
        operation: &str,
        args: &[Vec<u8>],
    ) -> Result<Vec<u8>, ComputeError> {
        let stack = match self.stack {
            Some(stack) => stack,
            None => return Err(BridgeError::NotInitialized.into()),
        };

        // A previous call that was dropped mid-suspension leaves the captured
        // stack unusable: fail fast instead of corrupting it.
        if self.phase != BridgePhase::Idle || self.pending.is_some() || self.resumed.is_some() {
            return Err(BridgeError::Busy { phase: self.phase }.into());
        }

        loop {
            let outcome = match module.call(self, operation, args) {
                Ok(outcome) => outcome,
                Err(error) => {
                    self.reset();
                    return Err(error);
                }
            };

            match outcome {
                CallOutcome::Complete(result) => {
                    if self.phase != BridgePhase::Idle || self.pending.is_some() {
                        let phase = self.phase;
                        self.reset();
                        return Err(BridgeError::DanglingSuspension { phase }.into());
                    }
                    if self.resumed.is_some() {
                        self.reset();
                        return Err(BridgeError::UnconsumedHostResult.into());
                    }

                    return Ok(result);
                }

                CallOutcome::Suspended => {
                    if self.phase != BridgePhase::Unwinding {
                        let phase = self.phase;
                        self.reset();
                        return Err(BridgeError::UnexpectedSuspension { phase }.into());
                    }

                    if let Err(error) = module.begin_unwind(stack) {
                        // Covers bridge stack exhaustion: the captured stack
                        // is lost, so the fault is fatal to this context.
                        let phase = self.phase;
                        self.reset();
                        return Err(BridgeError::ControlFault { phase, error }.into());
                    }
                    self.phase = BridgePhase::AwaitingHost;

                    let pending = match self.pending.take() {
                        Some(pending) => pending,
                        None => {
                            self.reset();
                            return Err(BridgeError::MissingHostOperation.into());
                        }
                    };

                    tracing::trace!(operation, "awaiting host operation");

                    let value = match pending.await {
                        Ok(value) => value,
                        Err(error) => {
                            // Leave the bridge clean so the next call works.
                            self.reset();
                            return Err(ComputeError::Host(error));
                        }
                    };

                    if let Err(error) = module.begin_rewind(stack) {
                        let phase = self.phase;
                        self.reset();
                        return Err(BridgeError::ControlFault { phase, error }.into());
                    }
                    self.resumed = Some(value);
                    self.phase = BridgePhase::Rewinding;

                    tracing::trace!(operation, "replaying module call stack");
                }
            }
        }
    }

    /// Import dispatch, called synchronously from module code.
    ///
    /// On the first invocation of an import this starts its async work and
    /// signals the module to suspend; on the continuation invocation after a
    /// rewind it ends the rewind and returns the stored host result.
    pub fn invoke_import(
        &mut self,
        name: &str,
        args: &[Vec<u8>],
    ) -> Result<ImportOutcome, BridgeError> {
        match self.phase {
            BridgePhase::Rewinding => {
                let value = self
                    .resumed
                    .take()
                    .ok_or(BridgeError::MissingHostResult)?;

                // Rewind complete: later imports in the same call may suspend
                // again.
                self.phase = BridgePhase::Idle;

                Ok(ImportOutcome::Value(value))
            }

            BridgePhase::Idle => {
                if self.pending.is_some() {
                    return Err(BridgeError::OutstandingHostOperation);
                }

                let import = self
                    .imports
                    .get_mut(name)
                    .ok_or_else(|| BridgeError::UnknownImport(name.to_string()))?;

                self.pending = Some((import.start)(args));
                self.phase = BridgePhase::Unwinding;

                Ok(ImportOutcome::Suspend)
            }

            BridgePhase::Unwinding | BridgePhase::AwaitingHost => {
                Err(BridgeError::ImportDuringSuspend { phase: self.phase })
            }
        }
    }

    /// Resets the state machine to idle, dropping any pending host work.
    fn reset(&mut self) {
        self.phase = BridgePhase::Idle;
        self.pending = None;
        self.resumed = None;
    }
}
