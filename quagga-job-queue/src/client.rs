//! The producer-side primitive surface, backed by the job queue.
//!
//! [`JobQueueClient`] exposes the same method surface as the in-process
//! primitive adapters, but each call becomes an enqueued job executed by
//! whichever worker claims it. Callers see only the result or a job error;
//! leases, heartbeats, and reclaim are invisible to them.

use std::sync::Arc;

use quagga_compute::primitives::{
    CurvePoint, Digest, HashInput, NoteCiphertext, NotePlaintext, Polynomial, Scalar, ViewingKey,
};

use crate::{
    job::{
        HasherRequest, JobError, JobRequest, JobResponse, MultiScalarMulRequest,
        NoteDecryptorRequest, TransformRequest,
    },
    queue::JobQueue,
};

/// Dispatches primitive invocations through a job queue.
#[derive(Clone)]
pub struct JobQueueClient {
    queue: Arc<dyn JobQueue>,
}

impl JobQueueClient {
    /// A client submitting to `queue`.
    pub fn new(queue: Arc<dyn JobQueue>) -> Self {
        Self { queue }
    }

    /// Trial-decrypts each ciphertext with `viewing_key`, preserving input
    /// order.
    pub async fn trial_decrypt(
        &self,
        viewing_key: ViewingKey,
        ciphertexts: Vec<NoteCiphertext>,
    ) -> Result<Vec<Option<NotePlaintext>>, JobError> {
        let request = JobRequest::NoteDecryptor(NoteDecryptorRequest::TrialDecrypt {
            viewing_key,
            ciphertexts,
        });

        match self.queue.enqueue(request).await.wait().await? {
            JobResponse::DecryptedNotes(notes) => Ok(notes),
            response => Err(mismatched_response(&response)),
        }
    }

    /// Hashes each input to a digest, preserving input order.
    pub async fn hash_many(&self, inputs: Vec<HashInput>) -> Result<Vec<Digest>, JobError> {
        let request = JobRequest::Hasher(HasherRequest::HashMany { inputs });

        match self.queue.enqueue(request).await.wait().await? {
            JobResponse::Digests(digests) => Ok(digests),
            response => Err(mismatched_response(&response)),
        }
    }

    /// Computes the multi-scalar multiplication of `points` by `scalars`.
    pub async fn msm(
        &self,
        points: Vec<CurvePoint>,
        scalars: Vec<Scalar>,
    ) -> Result<CurvePoint, JobError> {
        let request = JobRequest::MultiScalarMul(MultiScalarMulRequest::Msm { points, scalars });

        match self.queue.enqueue(request).await.wait().await? {
            JobResponse::MsmResult(point) => Ok(point),
            response => Err(mismatched_response(&response)),
        }
    }

    /// Transforms each polynomial, preserving input order.
    pub async fn transform_many(
        &self,
        polynomials: Vec<Polynomial>,
    ) -> Result<Vec<Polynomial>, JobError> {
        let request = JobRequest::Transform(TransformRequest::TransformMany { polynomials });

        match self.queue.enqueue(request).await.wait().await? {
            JobResponse::Transformed(polynomials) => Ok(polynomials),
            response => Err(mismatched_response(&response)),
        }
    }
}

/// A worker answered with the wrong response variant for the request.
fn mismatched_response(response: &JobResponse) -> JobError {
    let variant = match response {
        JobResponse::DecryptedNotes(_) => "DecryptedNotes",
        JobResponse::Digests(_) => "Digests",
        JobResponse::MsmResult(_) => "MsmResult",
        JobResponse::Transformed(_) => "Transformed",
    };

    JobError::new(format!("job completed with a mismatched response: {variant}"))
}
