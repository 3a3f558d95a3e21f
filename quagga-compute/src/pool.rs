//! A pool of execution contexts, and the fan-out machinery on top of it.
//!
//! The pool owns a fixed set of contexts created at start-up. Pooled
//! primitive operations partition their input batch into contiguous chunks,
//! dispatch every chunk concurrently onto its own context, and reassemble the
//! results in input order regardless of completion order. Each context is
//! guarded by its own lock, so concurrent pooled calls never share a context
//! mid-call; they queue on its lock instead.

use futures::future;
use tokio::sync::Mutex;

use crate::{
    context::ExecutionContext,
    error::ComputeError,
    module::{ComputeModule, ModuleLoader},
};

/// The largest default pool size.
///
/// Module instantiation costs memory as well as time, so the default stops
/// growing past this bound even on machines with many cores. Callers that
/// want more contexts can pass an explicit size.
pub const MAX_DEFAULT_CONTEXTS: usize = 8;

/// Returns the default pool size: available hardware concurrency, bounded by
/// [`MAX_DEFAULT_CONTEXTS`].
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism()
        .map(|cores| cores.get())
        .unwrap_or(1)
        .clamp(1, MAX_DEFAULT_CONTEXTS)
}

/// A fixed-size pool of execution contexts.
pub struct WorkerPool<M: ComputeModule> {
    /// The context slots. Each lock serializes calls on its context.
    contexts: Vec<Mutex<ExecutionContext<M>>>,
}

impl<M: ComputeModule> std::fmt::Debug for WorkerPool<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.contexts.len())
            .finish()
    }
}

impl<M: ComputeModule> WorkerPool<M> {
    /// Creates a pool of `size` execution contexts, each independently
    /// initialized with its own suspendable call bridge.
    ///
    /// If `size` is `None`, uses [`default_pool_size`]. Context creation is
    /// the expensive part of pool start-up, so all contexts are instantiated
    /// concurrently.
    pub async fn create<L>(
        loader: &L,
        size: impl Into<Option<usize>>,
    ) -> Result<Self, ComputeError>
    where
        L: ModuleLoader<Module = M> + ?Sized,
    {
        let size = size.into().unwrap_or_else(default_pool_size).max(1);

        tracing::info!(size, "creating compute worker pool");

        let contexts =
            future::try_join_all((0..size).map(|_| ExecutionContext::create(loader))).await?;

        Ok(Self {
            contexts: contexts.into_iter().map(Mutex::new).collect(),
        })
    }

    /// The number of execution contexts in this pool.
    pub fn size(&self) -> usize {
        self.contexts.len()
    }

    /// Runs `operation` on the context in slot `lane`, with exclusive access
    /// to that context for the duration of the call.
    pub async fn call_on(
        &self,
        lane: usize,
        operation: &str,
        args: &[Vec<u8>],
    ) -> Result<Vec<u8>, ComputeError> {
        let context = self
            .contexts
            .get(lane)
            .expect("pooled operations only dispatch to lanes inside the pool");

        let mut context = context.lock().await;
        context.call(operation, args).await
    }

    /// Tears down every context.
    ///
    /// Taking the pool by value means no pooled call can still be in flight;
    /// suspended calls are never forcibly cancelled, they must have completed
    /// or been abandoned before the owner gives the pool up.
    pub async fn destroy(self) -> Result<(), ComputeError> {
        for slot in self.contexts {
            slot.into_inner().destroy().await?;
        }

        Ok(())
    }
}

/// Splits `len` items into at most `lanes` contiguous chunks of
/// as-equal-as-possible length, skipping empty chunks.
///
/// Concatenating the ranges in order always reproduces `0..len`, which is
/// what lets pooled operations reassemble chunk results in input order.
pub(crate) fn chunk_bounds(len: usize, lanes: usize) -> Vec<std::ops::Range<usize>> {
    assert!(lanes > 0, "a pool always has at least one context");

    let lanes = lanes.min(len);
    let mut bounds = Vec::with_capacity(lanes);

    let base = len / lanes.max(1);
    let extra = len % lanes.max(1);

    let mut start = 0;
    for lane in 0..lanes {
        // The first `extra` chunks are one item longer.
        let chunk = base + usize::from(lane < extra);
        bounds.push(start..start + chunk);
        start += chunk;
    }

    bounds
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::chunk_bounds;

    #[test]
    fn chunks_cover_small_batches() {
        assert_eq!(chunk_bounds(0, 4), vec![]);
        assert_eq!(chunk_bounds(1, 4), vec![0..1]);
        assert_eq!(chunk_bounds(3, 4), vec![0..1, 1..2, 2..3]);
        assert_eq!(chunk_bounds(4, 4), vec![0..1, 1..2, 2..3, 3..4]);
        assert_eq!(chunk_bounds(5, 4), vec![0..2, 2..3, 3..4, 4..5]);
        assert_eq!(chunk_bounds(10, 3), vec![0..4, 4..7, 7..10]);
    }

    proptest! {
        #[test]
        fn chunks_partition_any_batch(len in 0usize..500, lanes in 1usize..17) {
            let bounds = chunk_bounds(len, lanes);

            // Contiguous cover of 0..len, in order.
            let mut expected_start = 0;
            for range in &bounds {
                prop_assert_eq!(range.start, expected_start);
                prop_assert!(range.end > range.start);
                expected_start = range.end;
            }
            prop_assert_eq!(expected_start, len);

            // As equal as possible: chunk lengths differ by at most one.
            if let (Some(max), Some(min)) = (
                bounds.iter().map(|range| range.len()).max(),
                bounds.iter().map(|range| range.len()).min(),
            ) {
                prop_assert!(max - min <= 1);
            }
        }
    }
}
