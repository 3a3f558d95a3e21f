//! Job request and response types.
//!
//! A job is one unit of requested computation: a target primitive, an
//! operation on it, and the operation's arguments. The source of truth for
//! dispatch is the closed [`JobRequest`] union — each target carries a fixed,
//! typed operation set, so a queue worker matching on it is checked for
//! exhaustiveness at compile time, instead of looking methods up by name at
//! run time.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use quagga_compute::primitives::{
    CurvePoint, Digest, HashInput, NoteCiphertext, NotePlaintext, Polynomial, Scalar, ViewingKey,
};

/// A unique, monotonically increasing job id. Ids are never reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct JobId(pub u64);

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job {}", self.0)
    }
}

/// The primitive a job is addressed to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Target {
    /// The note trial-decryption primitive.
    NoteDecryptor,
    /// The additive-hash commitment primitive.
    Hasher,
    /// The multi-scalar multiplication primitive.
    MultiScalarMul,
    /// The polynomial transform primitive.
    Transform,
}

/// Operations on the note decryptor.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoteDecryptorRequest {
    /// Trial-decrypt each ciphertext with the viewing key.
    TrialDecrypt {
        /// The incoming viewing key to try.
        viewing_key: ViewingKey,
        /// The note ciphertexts, in output order.
        ciphertexts: Vec<NoteCiphertext>,
    },
}

/// Operations on the hasher.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum HasherRequest {
    /// Hash each input to a digest.
    HashMany {
        /// The inputs, in output order.
        inputs: Vec<HashInput>,
    },
}

/// Operations on the multi-scalar multiplication primitive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MultiScalarMulRequest {
    /// One multi-scalar multiplication over paired points and scalars.
    Msm {
        /// The curve points.
        points: Vec<CurvePoint>,
        /// One scalar per point.
        scalars: Vec<Scalar>,
    },
}

/// Operations on the polynomial transform primitive.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransformRequest {
    /// Transform each polynomial independently.
    TransformMany {
        /// The polynomials, in output order.
        polynomials: Vec<Polynomial>,
    },
}

/// A primitive invocation, addressed to one target.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobRequest {
    /// A note decryptor operation.
    NoteDecryptor(NoteDecryptorRequest),
    /// A hasher operation.
    Hasher(HasherRequest),
    /// A multi-scalar multiplication operation.
    MultiScalarMul(MultiScalarMulRequest),
    /// A polynomial transform operation.
    Transform(TransformRequest),
}

impl JobRequest {
    /// The primitive this request is addressed to.
    pub fn target(&self) -> Target {
        match self {
            JobRequest::NoteDecryptor(_) => Target::NoteDecryptor,
            JobRequest::Hasher(_) => Target::Hasher,
            JobRequest::MultiScalarMul(_) => Target::MultiScalarMul,
            JobRequest::Transform(_) => Target::Transform,
        }
    }

    /// The operation name, for logs.
    pub fn operation(&self) -> &'static str {
        match self {
            JobRequest::NoteDecryptor(NoteDecryptorRequest::TrialDecrypt { .. }) => {
                "trial_decrypt"
            }
            JobRequest::Hasher(HasherRequest::HashMany { .. }) => "hash_many",
            JobRequest::MultiScalarMul(MultiScalarMulRequest::Msm { .. }) => "msm",
            JobRequest::Transform(TransformRequest::TransformMany { .. }) => "transform_many",
        }
    }
}

/// The result data of a completed job.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobResponse {
    /// Per-ciphertext trial decryption outcomes, in request order.
    DecryptedNotes(Vec<Option<NotePlaintext>>),
    /// Digests, in request order.
    Digests(Vec<Digest>),
    /// The multi-scalar multiplication product.
    MsmResult(CurvePoint),
    /// Transformed polynomials, in request order.
    Transformed(Vec<Polynomial>),
}

/// A terminal job failure, as reported through the queue.
///
/// The message is the primitive error rendered to text: job errors cross a
/// process boundary, so they do not carry the error structure with them.
#[derive(Clone, Debug, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{message}")]
pub struct JobError {
    /// A human-readable description of the failure.
    pub message: String,
}

impl JobError {
    /// Creates a job error with `message`.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// One claimed unit of work: an id and the request to execute.
///
/// Jobs are immutable once enqueued.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    /// The queue-assigned id.
    pub id: JobId,
    /// The primitive invocation to perform.
    pub request: JobRequest,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn requests_know_their_target() {
        let request = JobRequest::Hasher(HasherRequest::HashMany { inputs: vec![] });
        assert_eq!(request.target(), Target::Hasher);
        assert_eq!(request.operation(), "hash_many");

        let request = JobRequest::MultiScalarMul(MultiScalarMulRequest::Msm {
            points: vec![],
            scalars: vec![],
        });
        assert_eq!(request.target(), Target::MultiScalarMul);
        assert_eq!(request.operation(), "msm");
    }

    #[test]
    fn jobs_cross_a_serialization_boundary() {
        let job = Job {
            id: JobId(7),
            request: JobRequest::NoteDecryptor(NoteDecryptorRequest::TrialDecrypt {
                viewing_key: ViewingKey([3; 32]),
                ciphertexts: vec![NoteCiphertext(vec![0; 580])],
            }),
        };

        let serialized = serde_json::to_vec(&job).expect("jobs serialize");
        let parsed: Job = serde_json::from_slice(&serialized).expect("jobs parse");

        assert_eq!(parsed, job);
    }
}
