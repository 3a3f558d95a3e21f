//! The polynomial transform adapter.

use std::sync::Arc;

use futures::future;

use crate::{
    context::SharedContext,
    error::{ComputeError, ModuleError},
    module::ComputeModule,
    pool::WorkerPool,
    primitives::{ops, Backend, Polynomial, Scalar, SCALAR_BYTES},
};

/// Applies the module's polynomial transform to batches of polynomials.
#[derive(Clone)]
pub struct Transform<M: ComputeModule> {
    backend: Backend<M>,
}

impl<M: ComputeModule> Transform<M> {
    /// An adapter bound to one execution context.
    pub fn with_context(context: SharedContext<M>) -> Self {
        Self {
            backend: Backend::Single(context),
        }
    }

    /// An adapter that fans batches out across `pool`.
    pub fn with_pool(pool: Arc<WorkerPool<M>>) -> Self {
        Self {
            backend: Backend::Pool(pool),
        }
    }

    /// Transforms each polynomial, preserving input order.
    ///
    /// The transform maps a polynomial to one of the same degree, so every
    /// output polynomial has the same length as its input.
    pub async fn transform_many(
        &self,
        polynomials: &[Polynomial],
    ) -> Result<Vec<Polynomial>, ComputeError> {
        if polynomials.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = self.backend.chunks(polynomials.len());
        let calls = chunks.clone().into_iter().enumerate().map(|(lane, range)| {
            let args: Vec<Vec<u8>> = polynomials[range].iter().map(pack_polynomial).collect();
            self.backend.call_lane(lane, ops::TRANSFORM_MANY, args)
        });

        let outputs = future::try_join_all(calls).await?;

        let mut transformed = Vec::with_capacity(polynomials.len());
        for (range, output) in chunks.into_iter().zip(outputs) {
            transformed.extend(split_polynomials(&polynomials[range], &output)?);
        }

        Ok(transformed)
    }
}

/// Packs a polynomial's coefficients into one argument buffer.
fn pack_polynomial(polynomial: &Polynomial) -> Vec<u8> {
    let mut packed = Vec::with_capacity(polynomial.0.len() * SCALAR_BYTES);
    for coefficient in &polynomial.0 {
        packed.extend_from_slice(&coefficient.0);
    }
    packed
}

/// Splits a chunk's result buffer back into polynomials, using the input
/// polynomials' lengths as the frame boundaries.
fn split_polynomials(
    inputs: &[Polynomial],
    output: &[u8],
) -> Result<Vec<Polynomial>, ComputeError> {
    let expected: usize = inputs.iter().map(|poly| poly.0.len() * SCALAR_BYTES).sum();
    if output.len() != expected {
        return Err(ModuleError::malformed_result(
            ops::TRANSFORM_MANY,
            format!("result length {} but inputs total {expected}", output.len()),
        )
        .into());
    }

    let mut polynomials = Vec::with_capacity(inputs.len());
    let mut offset = 0;
    for input in inputs {
        let len = input.0.len() * SCALAR_BYTES;
        let coefficients = output[offset..offset + len]
            .chunks_exact(SCALAR_BYTES)
            .map(|chunk| {
                let mut scalar = [0; SCALAR_BYTES];
                scalar.copy_from_slice(chunk);
                Scalar(scalar)
            })
            .collect();
        polynomials.push(Polynomial(coefficients));
        offset += len;
    }

    Ok(polynomials)
}
