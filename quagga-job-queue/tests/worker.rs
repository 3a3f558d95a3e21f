//! End-to-end tests: queue, worker, and pool together.

use std::{sync::Arc, time::Duration};

use quagga_compute::{
    primitives::{hash::Hasher, HashInput},
    testing::{digest, ScriptedLoader, ScriptedModule},
    WorkerPool,
};
use quagga_job_queue::{
    job::HasherRequest, Config, JobQueue, JobQueueClient, JobQueueWorker, JobRequest,
    JobResponse, JobRunner, MemoryJobQueue,
};

/// A config with short intervals so tests finish quickly.
fn test_config() -> Config {
    Config {
        lease_duration: Duration::from_millis(500),
        heartbeat_interval: Duration::from_millis(100),
        backgrounded_claim_delay: None,
    }
}

async fn test_pool(size: usize) -> Arc<WorkerPool<ScriptedModule>> {
    let loader = ScriptedLoader::new();
    Arc::new(
        WorkerPool::create(&loader, size)
            .await
            .expect("pool creation succeeds"),
    )
}

fn hash_request(inputs: &[&[u8]]) -> JobRequest {
    JobRequest::Hasher(HasherRequest::HashMany {
        inputs: inputs.iter().map(|input| HashInput(input.to_vec())).collect(),
    })
}

/// A producer's handle resolves with the same digests a direct pooled call
/// computes.
#[tokio::test(flavor = "multi_thread")]
async fn worker_processes_an_enqueued_job() {
    quagga_test::init();

    let pool = test_pool(2).await;
    let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new(&test_config()));
    let worker = JobQueueWorker::spawn(queue.clone(), JobRunner::pooled(pool.clone()), test_config());

    let inputs: Vec<&[u8]> = vec![b"first", b"second", b"third"];
    let handle = queue.enqueue(hash_request(&inputs)).await;

    let response = handle.wait().await.expect("the job succeeds");
    let JobResponse::Digests(digests) = response else {
        panic!("a hash job must produce digests");
    };

    assert_eq!(digests.len(), inputs.len());
    for (input, result) in inputs.iter().zip(&digests) {
        assert_eq!(result.0, digest(input));
    }

    // And it matches the direct adapter call.
    let direct = Hasher::with_pool(pool)
        .hash_many(&inputs.iter().map(|input| HashInput(input.to_vec())).collect::<Vec<_>>())
        .await
        .expect("direct hashing succeeds");
    assert_eq!(digests, direct);

    worker.stop().await.expect("the worker stops cleanly");
}

/// A primitive failure on job A is reported as A's error result and does not
/// impair processing of job B.
#[tokio::test(flavor = "multi_thread")]
async fn failing_job_does_not_impair_the_next_one() {
    quagga_test::init();

    let pool = test_pool(2).await;
    let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new(&test_config()));
    let worker = JobQueueWorker::spawn(queue.clone(), JobRunner::pooled(pool), test_config());

    // The scripted module rejects empty hash inputs.
    let failing = queue.enqueue(hash_request(&[b""])).await;
    let healthy = queue.enqueue(hash_request(&[b"fine"])).await;

    let error = failing.wait().await.expect_err("the empty input job fails");
    assert!(
        error.message.contains("empty input"),
        "the primitive failure reaches the producer: {error}"
    );

    let response = healthy.wait().await.expect("the next job still succeeds");
    assert!(matches!(response, JobResponse::Digests(digests) if digests.len() == 1));

    worker.stop().await.expect("the worker stops cleanly");
}

/// A worker with a single-context runner behaves identically to a pooled one.
#[tokio::test(flavor = "multi_thread")]
async fn single_context_worker_processes_jobs() {
    quagga_test::init();

    let loader = ScriptedLoader::new();
    let context = quagga_compute::ExecutionContext::create(&loader)
        .await
        .expect("context creation succeeds")
        .into_shared();

    let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new(&test_config()));
    let worker = JobQueueWorker::spawn(queue.clone(), JobRunner::single(context), test_config());

    let handle = queue.enqueue(hash_request(&[b"solo"])).await;
    let response = handle.wait().await.expect("the job succeeds");

    let JobResponse::Digests(digests) = response else {
        panic!("a hash job must produce digests");
    };
    assert_eq!(digests[0].0, digest(b"solo"));

    worker.stop().await.expect("the worker stops cleanly");
}

/// Jobs enqueued before the worker starts are drained without any hint.
#[tokio::test(flavor = "multi_thread")]
async fn worker_drains_preexisting_backlog() {
    quagga_test::init();

    let pool = test_pool(2).await;
    let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new(&test_config()));

    let first = queue.enqueue(hash_request(&[b"one"])).await;
    let second = queue.enqueue(hash_request(&[b"two"])).await;

    let worker = JobQueueWorker::spawn(queue.clone(), JobRunner::pooled(pool), test_config());

    first.wait().await.expect("backlog job one completes");
    second.wait().await.expect("backlog job two completes");

    worker.stop().await.expect("the worker stops cleanly");
}

/// The heartbeat keeps a long job's lease alive past the original window, so
/// no other worker reclaims it.
#[tokio::test(flavor = "multi_thread")]
async fn heartbeat_holds_the_lease_through_a_long_job() {
    quagga_test::init();

    // One slow lane: the job takes well over the lease window.
    let loader = ScriptedLoader::new()
        .with_lane_latencies(vec![Some(Duration::from_millis(1200))]);
    let pool = Arc::new(
        WorkerPool::create(&loader, 1)
            .await
            .expect("pool creation succeeds"),
    );

    let queue = Arc::new(MemoryJobQueue::new(&test_config()));
    let queue_dyn: Arc<dyn JobQueue> = queue.clone();
    let worker = JobQueueWorker::spawn(queue_dyn.clone(), JobRunner::pooled(pool), test_config());

    let handle = queue_dyn.enqueue(hash_request(&[b"slow"])).await;

    // A rival consumer polling mid-job must find nothing claimable.
    let rival = queue_dyn.register_worker();
    tokio::time::sleep(Duration::from_millis(700)).await;
    assert!(
        queue_dyn.get_job(rival).await.is_none(),
        "the heartbeat must keep the lease held past the original window"
    );

    handle.wait().await.expect("the slow job completes");
    assert_eq!(queue.pending_jobs(), 0);

    worker.stop().await.expect("the worker stops cleanly");
}

/// Stopping an idle worker returns promptly and leaves the queue usable.
#[tokio::test(flavor = "multi_thread")]
async fn idle_worker_stops_cleanly() {
    quagga_test::init();

    let pool = test_pool(1).await;
    let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new(&test_config()));
    let worker = JobQueueWorker::spawn(queue.clone(), JobRunner::pooled(pool), test_config());

    worker.stop().await.expect("an idle worker stops cleanly");

    // The queue survives its worker.
    let _handle = queue.enqueue(hash_request(&[b"later"])).await;
}

/// The client's method surface matches the in-process adapters: the same
/// call produces the same digests, with the queue in between.
#[tokio::test(flavor = "multi_thread")]
async fn client_calls_match_direct_adapter_calls() {
    quagga_test::init();

    let pool = test_pool(2).await;
    let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new(&test_config()));
    let worker = JobQueueWorker::spawn(queue.clone(), JobRunner::pooled(pool.clone()), test_config());

    let client = JobQueueClient::new(queue);

    let inputs: Vec<HashInput> = (0..5).map(|i| HashInput(vec![i; 4])).collect();
    let remote = client
        .hash_many(inputs.clone())
        .await
        .expect("the queued job succeeds");
    let direct = Hasher::with_pool(pool)
        .hash_many(&inputs)
        .await
        .expect("the direct call succeeds");

    assert_eq!(remote, direct);

    worker.stop().await.expect("the worker stops cleanly");
}

/// A backgrounded worker still processes jobs, after its claim delay.
#[tokio::test(flavor = "multi_thread")]
async fn backgrounded_worker_claims_after_the_delay() {
    quagga_test::init();

    let pool = test_pool(1).await;
    let queue: Arc<dyn JobQueue> = Arc::new(MemoryJobQueue::new(&test_config()));

    let config = Config {
        backgrounded_claim_delay: Some(Duration::from_millis(50)),
        ..test_config()
    };
    let worker = JobQueueWorker::spawn(queue.clone(), JobRunner::pooled(pool), config);

    let handle = queue.enqueue(hash_request(&[b"patient"])).await;
    handle.wait().await.expect("the job completes after the delay");

    worker.stop().await.expect("the worker stops cleanly");
}
