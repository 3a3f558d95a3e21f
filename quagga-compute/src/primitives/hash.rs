//! The additive-hash commitment adapter.

use std::sync::Arc;

use futures::future;

use crate::{
    context::SharedContext,
    error::{ComputeError, ModuleError},
    module::ComputeModule,
    pool::WorkerPool,
    primitives::{ops, Backend, Digest, HashInput, DIGEST_BYTES},
};

/// Hashes batches of independent inputs on the compute module.
#[derive(Clone)]
pub struct Hasher<M: ComputeModule> {
    backend: Backend<M>,
}

impl<M: ComputeModule> Hasher<M> {
    /// A hasher bound to one execution context.
    pub fn with_context(context: SharedContext<M>) -> Self {
        Self {
            backend: Backend::Single(context),
        }
    }

    /// A hasher that fans batches out across `pool`.
    pub fn with_pool(pool: Arc<WorkerPool<M>>) -> Self {
        Self {
            backend: Backend::Pool(pool),
        }
    }

    /// Hashes each input to a digest, preserving input order.
    ///
    /// Inputs are independent, so the pooled flavor splits them into
    /// contiguous chunks and hashes every chunk on its own context. If any
    /// chunk fails, the whole batch fails.
    pub async fn hash_many(&self, inputs: &[HashInput]) -> Result<Vec<Digest>, ComputeError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = self.backend.chunks(inputs.len());
        let calls = chunks.into_iter().enumerate().map(|(lane, range)| {
            let args: Vec<Vec<u8>> = inputs[range].iter().map(|input| input.0.clone()).collect();
            self.backend.call_lane(lane, ops::HASH_MANY, args)
        });

        let outputs = future::try_join_all(calls).await?;

        let mut digests = Vec::with_capacity(inputs.len());
        for output in outputs {
            digests.extend(split_digests(&output)?);
        }

        Ok(digests)
    }
}

/// Splits a result buffer into fixed-size digests.
fn split_digests(output: &[u8]) -> Result<Vec<Digest>, ComputeError> {
    if output.len() % DIGEST_BYTES != 0 {
        return Err(ModuleError::malformed_result(
            ops::HASH_MANY,
            format!("result length {} is not a whole number of digests", output.len()),
        )
        .into());
    }

    Ok(output
        .chunks_exact(DIGEST_BYTES)
        .map(|chunk| {
            let mut digest = [0; DIGEST_BYTES];
            digest.copy_from_slice(chunk);
            Digest(digest)
        })
        .collect())
}
