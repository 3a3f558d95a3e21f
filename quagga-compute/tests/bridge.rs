//! Suspendable call bridge round-trip and failure tests.

use std::time::Duration;

use quagga_compute::{
    testing::{self, test_ops, ScriptedLoader, ScriptedModule},
    BridgeError, CallBridge, ComputeError, ExecutionContext, ModuleError, ModuleLoader,
};

/// A call that triggers no host import resolves synchronously.
#[tokio::test]
async fn call_without_suspension_resolves() {
    quagga_test::init();

    let loader = ScriptedLoader::new();
    let mut context = ExecutionContext::create(&loader)
        .await
        .expect("context creation succeeds");

    let input = vec![5u8; 40];
    let output = context
        .call(quagga_compute::primitives::ops::HASH_MANY, &[input.clone()])
        .await
        .expect("hashing succeeds");

    assert_eq!(output, testing::digest(&input).to_vec());
}

/// One suspension cycle: the call resolves with exactly the value the host
/// import produced.
#[tokio::test]
async fn call_with_one_suspension_returns_host_result() {
    quagga_test::init();

    let loader = ScriptedLoader::new();
    let mut context = ExecutionContext::create(&loader)
        .await
        .expect("context creation succeeds");

    let output = context
        .call(test_ops::HOST_ROUNDTRIP, &[vec![1, 2, 3]])
        .await
        .expect("round trip succeeds");

    // `host_transform` reverses its argument.
    assert_eq!(output, vec![3, 2, 1]);
}

/// Five sequential suspension cycles inside one call.
#[tokio::test]
async fn call_with_five_suspensions_resumes_each_time() {
    quagga_test::init();

    let loader = ScriptedLoader::new();
    let mut context = ExecutionContext::create(&loader)
        .await
        .expect("context creation succeeds");

    let output = context
        .call(test_ops::HOST_CHAIN, &[vec![5]])
        .await
        .expect("chained imports succeed");

    // `host_step` maps step `b` to `b * 3 + 1`.
    assert_eq!(output, vec![1, 4, 7, 10, 13]);
}

/// A rejected host operation propagates to the caller, and the bridge is left
/// clean enough for the next call to succeed.
#[tokio::test]
async fn host_failure_propagates_and_leaves_context_usable() {
    quagga_test::init();

    let loader = ScriptedLoader::new();
    let mut context = ExecutionContext::create(&loader)
        .await
        .expect("context creation succeeds");

    let error = context
        .call(test_ops::HOST_FAILING, &[])
        .await
        .expect_err("the failing import rejects the call");
    assert!(matches!(error, ComputeError::Host(_)));
    assert!(!error.is_fatal());

    let input = vec![9u8; 16];
    let output = context
        .call(quagga_compute::primitives::ops::HASH_MANY, &[input.clone()])
        .await
        .expect("the context still works after a host failure");
    assert_eq!(output, testing::digest(&input).to_vec());
}

/// Abandoning a suspended call poisons the context: the next call fails fast
/// with a fatal bridge error instead of replaying a corrupt stack.
#[tokio::test]
async fn abandoned_suspended_call_fails_fast() {
    quagga_test::init();

    // One lane, slow enough that the call is still suspended when dropped.
    let loader =
        ScriptedLoader::new().with_lane_latencies(vec![Some(Duration::from_secs(60))]);
    let mut context = ExecutionContext::create(&loader)
        .await
        .expect("context creation succeeds");

    {
        let args = [vec![1]];
        let mut call = Box::pin(context.call(test_ops::HOST_ROUNDTRIP, &args));
        assert!(
            futures::poll!(call.as_mut()).is_pending(),
            "the call suspends on the delay import"
        );
        // Dropped mid-suspension.
    }

    let error = context
        .call(test_ops::HOST_ROUNDTRIP, &[vec![1]])
        .await
        .expect_err("the second call must not reuse the abandoned bridge state");

    assert!(matches!(
        error,
        ComputeError::Bridge(BridgeError::Busy { .. })
    ));
    assert!(error.is_fatal());
}

/// Calling an export the module does not have is a module error, not a bridge
/// fault.
#[tokio::test]
async fn unknown_export_is_not_fatal() {
    quagga_test::init();

    let loader = ScriptedLoader::new();
    let mut context = ExecutionContext::create(&loader)
        .await
        .expect("context creation succeeds");

    let error = context
        .call("no_such_export", &[])
        .await
        .expect_err("unknown exports are rejected");

    assert!(matches!(
        error,
        ComputeError::Module(ModuleError::UnknownExport(_))
    ));
    assert!(!error.is_fatal());
}

/// An import the bridge has no registration for is a fatal protocol error.
#[tokio::test]
async fn unknown_import_is_fatal() {
    quagga_test::init();

    let mut module = ScriptedModule::new(1 << 16, None);
    let mut bridge = CallBridge::new();
    // No imports registered.
    bridge
        .initialize(&mut module)
        .expect("bridge initialization succeeds");

    let error = bridge
        .call(&mut module, test_ops::HOST_ROUNDTRIP, &[vec![1]])
        .await
        .expect_err("the unregistered import is rejected");

    assert!(matches!(
        error,
        ComputeError::Bridge(BridgeError::UnknownImport(_))
    ));
    assert!(error.is_fatal());
}

/// A bridge stack too small for the captured frame is a fatal control fault.
#[tokio::test]
async fn bridge_stack_exhaustion_is_fatal() {
    quagga_test::init();

    let loader = ScriptedLoader::new();
    let mut module = loader.load().await.expect("module loads");
    let mut bridge = CallBridge::with_stack_bytes(8);
    for (name, import) in loader.imports() {
        bridge.register_import(name, import);
    }
    bridge
        .initialize(&mut module)
        .expect("bridge initialization succeeds");

    let error = bridge
        .call(&mut module, test_ops::HOST_ROUNDTRIP, &[vec![1, 2, 3]])
        .await
        .expect_err("the frame cannot fit in an 8 byte stack");

    assert!(matches!(
        error,
        ComputeError::Bridge(BridgeError::ControlFault { .. })
    ));
    assert!(error.is_fatal());
}

/// Calling before `initialize` is rejected.
#[tokio::test]
async fn uninitialized_bridge_rejects_calls() {
    quagga_test::init();

    let mut module = ScriptedModule::new(1 << 16, None);
    let mut bridge = CallBridge::new();

    let error = bridge
        .call(&mut module, test_ops::HOST_ROUNDTRIP, &[vec![1]])
        .await
        .expect_err("uninitialized bridges reject calls");

    assert!(matches!(
        error,
        ComputeError::Bridge(BridgeError::NotInitialized)
    ));
}
