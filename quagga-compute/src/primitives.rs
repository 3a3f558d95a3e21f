//! The primitive adapters backed by the compute module.
//!
//! Each primitive is exposed in two flavors with identical signatures: a
//! *single* flavor bound to one execution context, and a *pooled* flavor that
//! fans a batch out across a [`WorkerPool`](crate::pool::WorkerPool) and
//! reassembles results in input order. Callers use the same method surface
//! either way, so they stay agnostic to the deployment topology.

pub mod hash;
pub mod msm;
pub mod notes;
pub mod transform;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{
    context::SharedContext,
    error::ComputeError,
    module::ComputeModule,
    pool::{chunk_bounds, WorkerPool},
};

/// The byte length of a digest.
pub const DIGEST_BYTES: usize = 32;

/// The byte length of a scalar field element.
pub const SCALAR_BYTES: usize = 32;

/// The byte length of an affine curve point (two coordinates).
pub const CURVE_POINT_BYTES: usize = 64;

/// The byte length of a note ciphertext.
pub const NOTE_CIPHERTEXT_BYTES: usize = 580;

/// The byte length of a decrypted note plaintext.
pub const NOTE_PLAINTEXT_BYTES: usize = 564;

/// The byte length of an incoming viewing key.
pub const VIEWING_KEY_BYTES: usize = 32;

/// The module export names the primitive adapters invoke.
pub mod ops {
    /// Trial-decrypts a batch of note ciphertexts against a viewing key.
    pub const NOTES_TRIAL_DECRYPT: &str = "notes_trial_decrypt";

    /// Hashes each input buffer to a digest.
    pub const HASH_MANY: &str = "hash_many";

    /// Multi-scalar multiplication over one point/scalar slice.
    pub const MSM: &str = "msm";

    /// Combines partial multi-scalar multiplication results.
    pub const MSM_REDUCE: &str = "msm_reduce";

    /// Applies the polynomial transform to each input polynomial.
    pub const TRANSFORM_MANY: &str = "transform_many";
}

/// A 32-byte digest produced by the module's hasher.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Digest(pub [u8; DIGEST_BYTES]);

/// A scalar field element, in the module's canonical 32-byte encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scalar(pub [u8; SCALAR_BYTES]);

/// An affine curve point, in the module's canonical coordinate encoding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurvePoint {
    /// The x coordinate.
    pub x: [u8; 32],
    /// The y coordinate.
    pub y: [u8; 32],
}

impl CurvePoint {
    /// Encodes this point as the module's 64-byte wire form.
    pub fn to_bytes(self) -> [u8; CURVE_POINT_BYTES] {
        let mut bytes = [0; CURVE_POINT_BYTES];
        bytes[..32].copy_from_slice(&self.x);
        bytes[32..].copy_from_slice(&self.y);
        bytes
    }

    /// Decodes a point from the module's 64-byte wire form.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() != CURVE_POINT_BYTES {
            return None;
        }

        let mut x = [0; 32];
        let mut y = [0; 32];
        x.copy_from_slice(&bytes[..32]);
        y.copy_from_slice(&bytes[32..]);

        Some(Self { x, y })
    }
}

/// An incoming viewing key used for trial decryption.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewingKey(pub [u8; VIEWING_KEY_BYTES]);

/// An arbitrary-length buffer to be hashed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashInput(pub Vec<u8>);

/// An encrypted note, always [`NOTE_CIPHERTEXT_BYTES`] long.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NoteCiphertext(pub Vec<u8>);

/// A decrypted note plaintext, always [`NOTE_PLAINTEXT_BYTES`] long.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotePlaintext(pub Vec<u8>);

/// A polynomial as a coefficient vector.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Polynomial(pub Vec<Scalar>);

/// Where a primitive adapter runs its module calls.
pub(crate) enum Backend<M: ComputeModule> {
    /// A dedicated execution context; every call uses lane 0.
    Single(SharedContext<M>),

    /// A worker pool; batches fan out across its contexts.
    Pool(Arc<WorkerPool<M>>),
}

impl<M: ComputeModule> Clone for Backend<M> {
    fn clone(&self) -> Self {
        match self {
            Backend::Single(context) => Backend::Single(context.clone()),
            Backend::Pool(pool) => Backend::Pool(pool.clone()),
        }
    }
}

impl<M: ComputeModule> Backend<M> {
    /// How many contexts a batch may fan out across.
    pub(crate) fn lanes(&self) -> usize {
        match self {
            Backend::Single(_) => 1,
            Backend::Pool(pool) => pool.size(),
        }
    }

    /// Runs `operation` on the context in slot `lane`.
    pub(crate) async fn call_lane(
        &self,
        lane: usize,
        operation: &str,
        args: Vec<Vec<u8>>,
    ) -> Result<Vec<u8>, ComputeError> {
        match self {
            Backend::Single(context) => {
                debug_assert_eq!(lane, 0, "single contexts have exactly one lane");
                let mut context = context.lock().await;
                context.call(operation, &args).await
            }
            Backend::Pool(pool) => pool.call_on(lane, operation, &args).await,
        }
    }

    /// Splits `len` batch items into one contiguous chunk per usable lane.
    pub(crate) fn chunks(&self, len: usize) -> Vec<std::ops::Range<usize>> {
        chunk_bounds(len, self.lanes())
    }
}
