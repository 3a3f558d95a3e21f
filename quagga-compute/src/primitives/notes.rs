//! The note trial-decryption adapter.

use std::sync::Arc;

use futures::future;

use crate::{
    context::SharedContext,
    error::{ComputeError, ModuleError},
    module::ComputeModule,
    pool::WorkerPool,
    primitives::{
        ops, Backend, NoteCiphertext, NotePlaintext, ViewingKey, NOTE_CIPHERTEXT_BYTES,
        NOTE_PLAINTEXT_BYTES,
    },
};

/// The per-ciphertext stride in the module's trial-decryption result buffer:
/// one success flag byte, then the plaintext slot.
const RESULT_STRIDE: usize = 1 + NOTE_PLAINTEXT_BYTES;

/// Trial-decrypts batches of note ciphertexts on the compute module.
#[derive(Clone)]
pub struct NoteDecryptor<M: ComputeModule> {
    backend: Backend<M>,
}

impl<M: ComputeModule> NoteDecryptor<M> {
    /// A decryptor bound to one execution context.
    pub fn with_context(context: SharedContext<M>) -> Self {
        Self {
            backend: Backend::Single(context),
        }
    }

    /// A decryptor that fans batches out across `pool`.
    pub fn with_pool(pool: Arc<WorkerPool<M>>) -> Self {
        Self {
            backend: Backend::Pool(pool),
        }
    }

    /// Trial-decrypts each ciphertext with `viewing_key`, preserving input
    /// order.
    ///
    /// Returns one entry per ciphertext: the note plaintext if the key
    /// decrypted it, or `None` if the note is not addressed to this key.
    pub async fn trial_decrypt(
        &self,
        viewing_key: &ViewingKey,
        ciphertexts: &[NoteCiphertext],
    ) -> Result<Vec<Option<NotePlaintext>>, ComputeError> {
        for ciphertext in ciphertexts {
            if ciphertext.0.len() != NOTE_CIPHERTEXT_BYTES {
                return Err(ModuleError::invalid_argument(
                    ops::NOTES_TRIAL_DECRYPT,
                    format!(
                        "ciphertext length {} is not {NOTE_CIPHERTEXT_BYTES}",
                        ciphertext.0.len()
                    ),
                )
                .into());
            }
        }

        if ciphertexts.is_empty() {
            return Ok(Vec::new());
        }

        let chunks = self.backend.chunks(ciphertexts.len());
        let calls = chunks.into_iter().enumerate().map(|(lane, range)| {
            // Every chunk carries the key as its first argument.
            let mut args: Vec<Vec<u8>> = Vec::with_capacity(1 + range.len());
            args.push(viewing_key.0.to_vec());
            args.extend(ciphertexts[range].iter().map(|ciphertext| ciphertext.0.clone()));
            self.backend.call_lane(lane, ops::NOTES_TRIAL_DECRYPT, args)
        });

        let outputs = future::try_join_all(calls).await?;

        let mut notes = Vec::with_capacity(ciphertexts.len());
        for output in outputs {
            notes.extend(split_results(&output)?);
        }

        Ok(notes)
    }
}

/// Splits a trial-decryption result buffer into per-ciphertext outcomes.
fn split_results(output: &[u8]) -> Result<Vec<Option<NotePlaintext>>, ComputeError> {
    if output.len() % RESULT_STRIDE != 0 {
        return Err(ModuleError::malformed_result(
            ops::NOTES_TRIAL_DECRYPT,
            format!(
                "result length {} is not a whole number of note slots",
                output.len()
            ),
        )
        .into());
    }

    output
        .chunks_exact(RESULT_STRIDE)
        .map(|slot| match slot[0] {
            0 => Ok(None),
            1 => Ok(Some(NotePlaintext(slot[1..].to_vec()))),
            flag => Err(ModuleError::malformed_result(
                ops::NOTES_TRIAL_DECRYPT,
                format!("unknown decryption flag {flag}"),
            )
            .into()),
        })
        .collect()
}
