//! Worker pool fan-out, ordering, and failure tests.

use std::{sync::Arc, time::Duration};

use quagga_compute::{
    primitives::{
        hash::Hasher, msm::MultiScalarMul, notes::NoteDecryptor, transform::Transform,
        CurvePoint, HashInput, NoteCiphertext, Polynomial, Scalar, ViewingKey,
        NOTE_CIPHERTEXT_BYTES,
    },
    testing::{self, ScriptedLoader},
    ComputeError, ExecutionContext, ModuleError, WorkerPool,
};

async fn pool_of(size: usize, latencies: Vec<Option<Duration>>) -> Arc<WorkerPool<testing::ScriptedModule>> {
    let loader = ScriptedLoader::new().with_lane_latencies(latencies);
    Arc::new(
        WorkerPool::create(&loader, size)
            .await
            .expect("pool creation succeeds"),
    )
}

fn hash_inputs(count: usize) -> Vec<HashInput> {
    (0..count)
        .map(|i| HashInput(vec![i as u8; 3 + i % 5]))
        .collect()
}

/// Batched pooled output order equals input order, even when the last context
/// is much slower than the first.
#[tokio::test(flavor = "multi_thread")]
async fn pooled_hashing_preserves_input_order() {
    quagga_test::init();

    // Context 1 finishes long after context 0.
    let pool = pool_of(2, vec![None, Some(Duration::from_millis(80))]).await;
    let hasher = Hasher::with_pool(pool);

    let inputs = hash_inputs(9);
    let digests = hasher.hash_many(&inputs).await.expect("hashing succeeds");

    assert_eq!(digests.len(), inputs.len());
    for (input, digest) in inputs.iter().zip(&digests) {
        assert_eq!(digest.0, testing::digest(&input.0));
    }
}

/// The pooled flavor computes exactly what the single-context flavor does.
#[tokio::test(flavor = "multi_thread")]
async fn pooled_and_single_hashing_agree() {
    quagga_test::init();

    let pool = pool_of(3, vec![]).await;
    let pooled = Hasher::with_pool(pool);

    let loader = ScriptedLoader::new();
    let context = ExecutionContext::create(&loader)
        .await
        .expect("context creation succeeds")
        .into_shared();
    let single = Hasher::with_context(context);

    let inputs = hash_inputs(10);
    assert_eq!(
        pooled.hash_many(&inputs).await.expect("pooled hashing succeeds"),
        single.hash_many(&inputs).await.expect("single hashing succeeds"),
    );
}

/// An empty batch is a no-op in either flavor.
#[tokio::test(flavor = "multi_thread")]
async fn empty_batches_short_circuit() {
    quagga_test::init();

    let pool = pool_of(2, vec![]).await;
    let hasher = Hasher::with_pool(pool.clone());
    let transform = Transform::with_pool(pool);

    assert!(hasher.hash_many(&[]).await.expect("empty hash batch").is_empty());
    assert!(transform
        .transform_many(&[])
        .await
        .expect("empty transform batch")
        .is_empty());
}

/// One failing chunk rejects the whole pooled operation.
#[tokio::test(flavor = "multi_thread")]
async fn pooled_failure_rejects_whole_batch() {
    quagga_test::init();

    let pool = pool_of(2, vec![]).await;
    let hasher = Hasher::with_pool(pool);

    // The empty input lands in the second chunk; the module rejects it.
    let mut inputs = hash_inputs(6);
    inputs[5] = HashInput(Vec::new());

    let error = hasher
        .hash_many(&inputs)
        .await
        .expect_err("the batch fails as a whole");

    assert!(matches!(
        error,
        ComputeError::Module(ModuleError::InvalidArgument { .. })
    ));
}

/// A striped multi-scalar multiplication matches the unstriped product.
#[tokio::test(flavor = "multi_thread")]
async fn striped_msm_matches_single_context() {
    quagga_test::init();

    let points: Vec<CurvePoint> = (0..7)
        .map(|i| CurvePoint {
            x: [i as u8 + 1; 32],
            y: [i as u8 + 101; 32],
        })
        .collect();
    let scalars: Vec<Scalar> = (0..7).map(|i| Scalar([i as u8 + 51; 32])).collect();

    let pool = pool_of(3, vec![]).await;
    let striped = MultiScalarMul::with_pool(pool);

    let loader = ScriptedLoader::new();
    let context = ExecutionContext::create(&loader)
        .await
        .expect("context creation succeeds")
        .into_shared();
    let single = MultiScalarMul::with_context(context);

    assert_eq!(
        striped.msm(&points, &scalars).await.expect("striped msm succeeds"),
        single.msm(&points, &scalars).await.expect("single msm succeeds"),
    );
}

/// Mismatched and empty multi-scalar multiplications are rejected up front.
#[tokio::test(flavor = "multi_thread")]
async fn msm_rejects_bad_shapes() {
    quagga_test::init();

    let pool = pool_of(2, vec![]).await;
    let msm = MultiScalarMul::with_pool(pool);

    let point = CurvePoint {
        x: [1; 32],
        y: [2; 32],
    };

    let error = msm
        .msm(&[point], &[])
        .await
        .expect_err("mismatched lengths are rejected");
    assert!(matches!(
        error,
        ComputeError::Module(ModuleError::InvalidArgument { .. })
    ));

    let error = msm.msm(&[], &[]).await.expect_err("empty sets are rejected");
    assert!(matches!(
        error,
        ComputeError::Module(ModuleError::InvalidArgument { .. })
    ));
}

/// Trial decryption returns per-ciphertext outcomes in input order.
#[tokio::test(flavor = "multi_thread")]
async fn pooled_trial_decryption_preserves_order_and_flags() {
    quagga_test::init();

    let pool = pool_of(2, vec![None, Some(Duration::from_millis(50))]).await;
    let decryptor = NoteDecryptor::with_pool(pool);

    let viewing_key = ViewingKey([4; 32]);

    // Even first byte: decrypts for an even key byte. Odd: does not.
    let ciphertexts: Vec<NoteCiphertext> = (0..6)
        .map(|i| NoteCiphertext(vec![i as u8; NOTE_CIPHERTEXT_BYTES]))
        .collect();

    let notes = decryptor
        .trial_decrypt(&viewing_key, &ciphertexts)
        .await
        .expect("trial decryption succeeds");

    assert_eq!(notes.len(), ciphertexts.len());
    for (i, note) in notes.iter().enumerate() {
        if i % 2 == 0 {
            let note = note.as_ref().expect("even ciphertexts decrypt");
            // The scripted module xors the plaintext with the key.
            assert!(note.0.iter().all(|byte| *byte == (i as u8) ^ 4));
        } else {
            assert!(note.is_none(), "odd ciphertexts must not decrypt");
        }
    }
}

/// A ciphertext of the wrong length is rejected before any module call.
#[tokio::test(flavor = "multi_thread")]
async fn trial_decryption_rejects_bad_ciphertext_length() {
    quagga_test::init();

    let pool = pool_of(2, vec![]).await;
    let decryptor = NoteDecryptor::with_pool(pool);

    let error = decryptor
        .trial_decrypt(&ViewingKey([0; 32]), &[NoteCiphertext(vec![1, 2, 3])])
        .await
        .expect_err("short ciphertexts are rejected");

    assert!(matches!(
        error,
        ComputeError::Module(ModuleError::InvalidArgument { .. })
    ));
}

/// Pooled polynomial transforms preserve order and per-polynomial lengths.
#[tokio::test(flavor = "multi_thread")]
async fn pooled_transform_preserves_order_and_lengths() {
    quagga_test::init();

    let pool = pool_of(3, vec![None, Some(Duration::from_millis(40)), None]).await;
    let pooled = Transform::with_pool(pool);

    let loader = ScriptedLoader::new();
    let context = ExecutionContext::create(&loader)
        .await
        .expect("context creation succeeds")
        .into_shared();
    let single = Transform::with_context(context);

    // Polynomials of different degrees, so frame boundaries matter.
    let polynomials: Vec<Polynomial> = (1..8)
        .map(|degree| Polynomial((0..degree).map(|c| Scalar([c as u8; 32])).collect()))
        .collect();

    let pooled_out = pooled
        .transform_many(&polynomials)
        .await
        .expect("pooled transform succeeds");
    let single_out = single
        .transform_many(&polynomials)
        .await
        .expect("single transform succeeds");

    assert_eq!(pooled_out, single_out);
    for (input, output) in polynomials.iter().zip(&pooled_out) {
        assert_eq!(input.0.len(), output.0.len());
    }
}

/// Destroying a pool tears down every context.
#[tokio::test(flavor = "multi_thread")]
async fn pool_destroy_tears_down_contexts() {
    quagga_test::init();

    let loader = ScriptedLoader::new();
    let pool = WorkerPool::create(&loader, 4)
        .await
        .expect("pool creation succeeds");

    assert_eq!(pool.size(), 4);
    pool.destroy().await.expect("pool teardown succeeds");
}
