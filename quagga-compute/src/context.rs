//! Execution contexts: one loaded module instance plus its bridge state.

use std::sync::Arc;

use crate::{
    bridge::CallBridge,
    error::ComputeError,
    module::{ComputeModule, Memory, ModuleLoader},
};

/// An execution context shared between an owner and in-flight calls.
///
/// The mutex serializes calls: the bridge state is not re-entrant, so at most
/// one logical call may be in flight per context at any time.
pub type SharedContext<M> = Arc<tokio::sync::Mutex<ExecutionContext<M>>>;

/// One loaded instance of the compute module and its suspendable call bridge.
///
/// Contexts are expensive to create (module instantiation dominates) and are
/// only created at pool start-up and destroyed at pool shutdown, never
/// recreated mid-job.
pub struct ExecutionContext<M: ComputeModule> {
    /// The loaded module instance.
    module: M,

    /// This context's bridge state and bridge stack.
    bridge: CallBridge,

    /// A handle to the module's linear memory, for marshalling buffers.
    memory: Memory,
}

impl<M: ComputeModule> std::fmt::Debug for ExecutionContext<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("bridge", &self.bridge)
            .finish_non_exhaustive()
    }
}

impl<M: ComputeModule> ExecutionContext<M> {
    /// Loads a fresh module instance and initializes its bridge.
    pub async fn create<L>(loader: &L) -> Result<Self, ComputeError>
    where
        L: ModuleLoader<Module = M> + ?Sized,
    {
        let mut module = loader.load().await?;
        let memory = module.memory();

        let mut bridge = CallBridge::new();
        for (name, import) in loader.imports() {
            bridge.register_import(name, import);
        }
        bridge.initialize(&mut module)?;

        Ok(Self {
            module,
            bridge,
            memory,
        })
    }

    /// Invokes the named module export, driving any suspension cycles.
    ///
    /// Calls on one context are strictly serialized. A context whose previous
    /// call was abandoned mid-suspension fails fast with a fatal bridge error
    /// rather than corrupting the captured stack.
    pub async fn call(
        &mut self,
        operation: &str,
        args: &[Vec<u8>],
    ) -> Result<Vec<u8>, ComputeError> {
        self.bridge.call(&mut self.module, operation, args).await
    }

    /// A handle to the module's linear memory.
    pub fn memory(&self) -> &Memory {
        &self.memory
    }

    /// Releases the bridge stack and discards the module instance.
    pub async fn destroy(mut self) -> Result<(), ComputeError> {
        self.bridge.teardown(&mut self.module)
    }

    /// Wraps this context for sharing with in-flight calls.
    pub fn into_shared(self) -> SharedContext<M> {
        Arc::new(tokio::sync::Mutex::new(self))
    }
}
