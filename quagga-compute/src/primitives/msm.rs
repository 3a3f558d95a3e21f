//! The multi-scalar multiplication adapter.

use std::sync::Arc;

use futures::future;

use crate::{
    context::SharedContext,
    error::{ComputeError, ModuleError},
    module::ComputeModule,
    pool::WorkerPool,
    primitives::{ops, Backend, CurvePoint, Scalar, CURVE_POINT_BYTES},
};

/// Multi-scalar multiplication on the compute module.
///
/// A single multi-scalar multiplication is not a batch of independent inputs,
/// so the pooled flavor *stripes* it instead: the point/scalar set is
/// partitioned, each context computes a partial product, and the partials are
/// combined by one final reduction call once they have all resolved.
#[derive(Clone)]
pub struct MultiScalarMul<M: ComputeModule> {
    backend: Backend<M>,
}

impl<M: ComputeModule> MultiScalarMul<M> {
    /// An adapter bound to one execution context.
    pub fn with_context(context: SharedContext<M>) -> Self {
        Self {
            backend: Backend::Single(context),
        }
    }

    /// An adapter that stripes each multiplication across `pool`.
    pub fn with_pool(pool: Arc<WorkerPool<M>>) -> Self {
        Self {
            backend: Backend::Pool(pool),
        }
    }

    /// Computes the multi-scalar multiplication of `points` by `scalars`.
    pub async fn msm(
        &self,
        points: &[CurvePoint],
        scalars: &[Scalar],
    ) -> Result<CurvePoint, ComputeError> {
        if points.len() != scalars.len() {
            return Err(ModuleError::invalid_argument(
                ops::MSM,
                format!("{} points but {} scalars", points.len(), scalars.len()),
            )
            .into());
        }
        if points.is_empty() {
            return Err(ModuleError::invalid_argument(ops::MSM, "empty point set").into());
        }

        let chunks = self.backend.chunks(points.len());
        let calls = chunks.into_iter().enumerate().map(|(lane, range)| {
            let args = vec![
                pack_points(&points[range.clone()]),
                pack_scalars(&scalars[range]),
            ];
            self.backend.call_lane(lane, ops::MSM, args)
        });

        let mut partials = future::try_join_all(calls).await?;

        let combined = if partials.len() == 1 {
            partials.remove(0)
        } else {
            // Combining partial products is still group arithmetic, so it
            // goes back through the module rather than being done host-side.
            let packed = partials.concat();
            self.backend
                .call_lane(0, ops::MSM_REDUCE, vec![packed])
                .await?
        };

        parse_point(ops::MSM, &combined)
    }
}

/// Packs points into the module's concatenated wire form.
fn pack_points(points: &[CurvePoint]) -> Vec<u8> {
    let mut packed = Vec::with_capacity(points.len() * CURVE_POINT_BYTES);
    for point in points {
        packed.extend_from_slice(&point.to_bytes());
    }
    packed
}

/// Packs scalars into the module's concatenated wire form.
fn pack_scalars(scalars: &[Scalar]) -> Vec<u8> {
    let mut packed = Vec::with_capacity(scalars.len() * 32);
    for scalar in scalars {
        packed.extend_from_slice(&scalar.0);
    }
    packed
}

/// Parses a single point out of a result buffer.
fn parse_point(operation: &str, output: &[u8]) -> Result<CurvePoint, ComputeError> {
    CurvePoint::from_bytes(output).ok_or_else(|| {
        ModuleError::malformed_result(
            operation,
            format!("result length {} is not one curve point", output.len()),
        )
        .into()
    })
}
