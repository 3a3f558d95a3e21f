//! The host-visible boundary of the precompiled compute module.
//!
//! One [`ComputeModule`] value is one loaded instance of the module: its
//! exports, its allocator, and a handle to its linear memory. The module is
//! internally single threaded, so instances are the unit of parallelism; the
//! worker pool owns several of them side by side.
//!
//! The trait deliberately exposes only what the suspendable call bridge and
//! the primitive adapters need: the `call` data export, the two stack-control
//! exports driven by the bridge, and enough of the allocator to place the
//! bridge stack inside module memory.

use std::sync::{Arc, Mutex};

use crate::{
    bridge::CallBridge,
    error::{ComputeError, ModuleError},
};

/// A handle to the module's linear memory.
///
/// Cheap to clone. All reads and writes are copies across the module
/// boundary; no host code ever holds a live reference into module memory.
#[derive(Clone, Debug, Default)]
pub struct Memory {
    bytes: Arc<Mutex<Vec<u8>>>,
}

impl Memory {
    /// Creates a zeroed memory of `len` bytes.
    pub fn new(len: usize) -> Self {
        Self {
            bytes: Arc::new(Mutex::new(vec![0; len])),
        }
    }

    /// The current memory size in bytes.
    pub fn len(&self) -> usize {
        self.bytes
            .lock()
            .expect("previous panic while holding module memory")
            .len()
    }

    /// Returns true if the memory is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies `len` bytes out of memory, starting at `ptr`.
    pub fn read(&self, ptr: u32, len: u32) -> Result<Vec<u8>, ModuleError> {
        let bytes = self
            .bytes
            .lock()
            .expect("previous panic while holding module memory");

        let start = ptr as usize;
        let end = start.checked_add(len as usize).filter(|end| *end <= bytes.len());

        match end {
            Some(end) => Ok(bytes[start..end].to_vec()),
            None => Err(ModuleError::MemoryOutOfBounds { ptr, len }),
        }
    }

    /// Copies `data` into memory, starting at `ptr`.
    pub fn write(&self, ptr: u32, data: &[u8]) -> Result<(), ModuleError> {
        let mut bytes = self
            .bytes
            .lock()
            .expect("previous panic while holding module memory");

        let start = ptr as usize;
        let end = start.checked_add(data.len()).filter(|end| *end <= bytes.len());

        match end {
            Some(end) => {
                bytes[start..end].copy_from_slice(data);
                Ok(())
            }
            None => Err(ModuleError::MemoryOutOfBounds {
                ptr,
                len: data.len() as u32,
            }),
        }
    }
}

/// A region of module linear memory reserved for the bridge stack.
///
/// The suspendable call bridge allocates one of these per execution context,
/// and the module unwinds its call stack into it when a wrapped import starts
/// asynchronous host work.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScratchRegion {
    /// Offset of the region inside module memory.
    pub ptr: u32,
    /// Length of the region in bytes.
    pub len: u32,
}

/// The result of invoking the module's `call` export.
#[derive(Debug)]
pub enum CallOutcome {
    /// The export ran to completion and returned this buffer.
    Complete(Vec<u8>),

    /// A wrapped import started asynchronous host work.
    ///
    /// The module has stopped executing and control is back with the bridge,
    /// which will tell the module to unwind its call stack, await the host
    /// operation, and replay the stack before re-invoking the export.
    Suspended,
}

/// The value a module sees when it invokes one of its host imports.
#[derive(Debug)]
pub enum ImportOutcome {
    /// Continuation phase: the completed host operation's result.
    Value(Vec<u8>),

    /// The import started asynchronous host work.
    ///
    /// The module must stop executing and return [`CallOutcome::Suspended`]
    /// from the active `call` export without doing any further work.
    Suspend,
}

/// One loaded instance of the precompiled compute module.
///
/// Implementations wrap whatever actually executes the module code; the
/// primitive math behind each export is not this crate's concern. What the
/// trait pins down is the control surface the bridge depends on: `call` may
/// suspend, and `begin_unwind`/`begin_rewind` move the module's captured call
/// stack in and out of the bridge stack.
pub trait ComputeModule: Send + 'static {
    /// A handle to this instance's linear memory.
    fn memory(&self) -> Memory;

    /// Allocates `len` bytes inside module memory and returns the offset.
    fn alloc(&mut self, len: u32) -> Result<u32, ModuleError>;

    /// Releases an allocation previously returned by [`ComputeModule::alloc`].
    fn free(&mut self, ptr: u32) -> Result<(), ModuleError>;

    /// Invokes the module's `call` export.
    ///
    /// `host` is the window through which the module reaches its wrapped
    /// imports; see [`CallBridge::invoke_import`]. When an import reports
    /// [`ImportOutcome::Suspend`], the module must return
    /// [`CallOutcome::Suspended`] without doing further work.
    fn call(
        &mut self,
        host: &mut CallBridge,
        operation: &str,
        args: &[Vec<u8>],
    ) -> Result<CallOutcome, ComputeError>;

    /// Control export: capture the suspended call stack into `stack`.
    ///
    /// Called by the bridge exactly once per suspension, after `call` returned
    /// [`CallOutcome::Suspended`].
    fn begin_unwind(&mut self, stack: ScratchRegion) -> Result<(), ModuleError>;

    /// Control export: restore the call stack captured in `stack`.
    ///
    /// Called by the bridge exactly once per suspension, after the pending
    /// host operation resolved and before the export is re-invoked.
    fn begin_rewind(&mut self, stack: ScratchRegion) -> Result<(), ModuleError>;
}

/// Loads fresh instances of the compute module.
///
/// Instantiation is the expensive part of execution context creation, so
/// loaders are invoked once per context at pool start-up and never again
/// mid-job.
pub trait ModuleLoader: Send + Sync {
    /// The module type this loader produces.
    type Module: ComputeModule;

    /// Loads one fresh module instance.
    fn load(&self) -> futures::future::BoxFuture<'_, Result<Self::Module, ModuleError>>;

    /// The host imports to expose to each loaded instance.
    ///
    /// Every context created from this loader gets the same import surface.
    fn imports(&self) -> Vec<(String, crate::bridge::HostImport)> {
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn memory_round_trips_in_bounds_access() {
        let memory = Memory::new(64);

        memory.write(8, &[1, 2, 3]).expect("in-bounds write");
        assert_eq!(memory.read(8, 3).expect("in-bounds read"), vec![1, 2, 3]);
    }

    #[test]
    fn memory_rejects_out_of_bounds_access() {
        let memory = Memory::new(16);

        assert_eq!(
            memory.read(8, 9),
            Err(ModuleError::MemoryOutOfBounds { ptr: 8, len: 9 })
        );
        assert_eq!(
            memory.write(u32::MAX, &[0]),
            Err(ModuleError::MemoryOutOfBounds {
                ptr: u32::MAX,
                len: 1
            })
        );
    }
}
