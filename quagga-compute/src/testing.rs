//! A scripted in-process compute module for tests.
//!
//! [`ScriptedModule`] implements the full module contract — the `call`
//! export, the unwind/rewind control exports, a bump allocator, and linear
//! memory — with deterministic stand-in arithmetic behind each primitive
//! export. The point is to exercise the bridge, pool, and queue machinery
//! honestly: a suspended call really does lose its in-module state unless the
//! bridge moves it through the bridge stack, and the striped multi-scalar
//! multiplication really is only correct if partials are reduced.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use serde::{Deserialize, Serialize};

use crate::{
    bridge::{wrap_import, CallBridge, HostImport},
    error::{BoxError, ComputeError, ModuleError},
    module::{CallOutcome, ComputeModule, ImportOutcome, Memory, ModuleLoader, ScratchRegion},
    primitives::{
        ops, DIGEST_BYTES, NOTE_CIPHERTEXT_BYTES, NOTE_PLAINTEXT_BYTES, SCALAR_BYTES,
        VIEWING_KEY_BYTES,
    },
};

/// Extra module exports only the tests call.
pub mod test_ops {
    /// Passes its argument through the `host_transform` import and returns
    /// the import's result: exactly one suspension cycle.
    pub const HOST_ROUNDTRIP: &str = "host_roundtrip";

    /// Performs `args[0][0]` sequential `host_step` import calls and returns
    /// their concatenated results: one suspension cycle per step.
    pub const HOST_CHAIN: &str = "host_chain";

    /// Invokes the always-failing `host_fail` import.
    pub const HOST_FAILING: &str = "host_failing";
}

/// Import names the scripted loader provides.
pub mod test_imports {
    /// Reverses its argument.
    pub const HOST_TRANSFORM: &str = "host_transform";

    /// Maps a one-byte argument `b` to `[b * 3 + 1]` (wrapping).
    pub const HOST_STEP: &str = "host_step";

    /// Sleeps for the little-endian millisecond count in its argument.
    pub const HOST_DELAY: &str = "host_delay";

    /// Always fails.
    pub const HOST_FAIL: &str = "host_fail";
}

/// The default scripted module memory size.
const DEFAULT_MEMORY_BYTES: usize = 1 << 20;

/// The in-module state of a call that has not yet completed.
///
/// Moved into the bridge stack by `begin_unwind` and restored by
/// `begin_rewind`; a module with no frame cannot resume.
#[derive(Debug, Serialize, Deserialize)]
struct Frame {
    /// Index of the next import in the call's import plan.
    next_import: usize,

    /// Results of the imports performed so far.
    gathered: Vec<Vec<u8>>,
}

/// A deterministic, scriptable [`ComputeModule`] implementation.
pub struct ScriptedModule {
    memory: Memory,
    /// Bump allocator watermark.
    memory_top: u32,
    /// When set, every export performs a `host_delay` import first, making
    /// this instance artificially slow.
    latency: Option<Duration>,
    /// The suspended call's state, when not parked in the bridge stack.
    frame: Option<Frame>,
}

impl ScriptedModule {
    /// Creates a module with the given memory size and artificial latency.
    pub fn new(memory_bytes: usize, latency: Option<Duration>) -> Self {
        Self {
            memory: Memory::new(memory_bytes),
            memory_top: 0,
            latency,
            frame: None,
        }
    }

    /// The sequence of (import, argument) calls `operation` performs.
    fn plan(&self, operation: &str, args: &[Vec<u8>]) -> Result<Vec<(String, Vec<u8>)>, ModuleError> {
        let mut plan = Vec::new();

        if let Some(latency) = self.latency {
            let millis = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX);
            plan.push((test_imports::HOST_DELAY.to_string(), millis.to_le_bytes().to_vec()));
        }

        match operation {
            test_ops::HOST_ROUNDTRIP => {
                let arg = args.first().ok_or_else(|| {
                    ModuleError::invalid_argument(operation, "missing input buffer")
                })?;
                plan.push((test_imports::HOST_TRANSFORM.to_string(), arg.clone()));
            }

            test_ops::HOST_CHAIN => {
                let steps = args
                    .first()
                    .and_then(|arg| arg.first())
                    .copied()
                    .ok_or_else(|| {
                        ModuleError::invalid_argument(operation, "missing step count")
                    })?;
                for step in 0..steps {
                    plan.push((test_imports::HOST_STEP.to_string(), vec![step]));
                }
            }

            test_ops::HOST_FAILING => {
                plan.push((test_imports::HOST_FAIL.to_string(), Vec::new()));
            }

            // The primitive exports perform no host work of their own.
            _ => {}
        }

        Ok(plan)
    }

    /// Computes an export's result once its import plan has run.
    fn execute(
        &self,
        operation: &str,
        args: &[Vec<u8>],
        host_results: &[Vec<u8>],
    ) -> Result<Vec<u8>, ModuleError> {
        match operation {
            ops::HASH_MANY => {
                let mut output = Vec::with_capacity(args.len() * DIGEST_BYTES);
                for input in args {
                    if input.is_empty() {
                        return Err(ModuleError::invalid_argument(operation, "empty input"));
                    }
                    output.extend_from_slice(&digest(input));
                }
                Ok(output)
            }

            ops::NOTES_TRIAL_DECRYPT => {
                let (key, ciphertexts) = args.split_first().ok_or_else(|| {
                    ModuleError::invalid_argument(operation, "missing viewing key")
                })?;
                if key.len() != VIEWING_KEY_BYTES {
                    return Err(ModuleError::invalid_argument(operation, "bad viewing key"));
                }

                let mut output =
                    Vec::with_capacity(ciphertexts.len() * (1 + NOTE_PLAINTEXT_BYTES));
                for ciphertext in ciphertexts {
                    if ciphertext.len() != NOTE_CIPHERTEXT_BYTES {
                        return Err(ModuleError::invalid_argument(operation, "bad ciphertext"));
                    }

                    // A note decrypts when the ciphertext parity matches the
                    // key parity: half of random inputs, deterministically.
                    if ciphertext[0] & 1 == key[0] & 1 {
                        output.push(1);
                        output.extend(
                            ciphertext[..NOTE_PLAINTEXT_BYTES]
                                .iter()
                                .enumerate()
                                .map(|(i, byte)| byte ^ key[i % VIEWING_KEY_BYTES]),
                        );
                    } else {
                        output.push(0);
                        output.extend(std::iter::repeat(0).take(NOTE_PLAINTEXT_BYTES));
                    }
                }
                Ok(output)
            }

            ops::MSM => {
                let [points, scalars] = args else {
                    return Err(ModuleError::invalid_argument(
                        operation,
                        "expected a point buffer and a scalar buffer",
                    ));
                };
                if points.is_empty()
                    || points.len() % 64 != 0
                    || scalars.len() % SCALAR_BYTES != 0
                    || points.len() / 64 != scalars.len() / SCALAR_BYTES
                {
                    return Err(ModuleError::invalid_argument(
                        operation,
                        "mismatched point and scalar buffers",
                    ));
                }

                // XOR stands in for the group operation: associative and
                // commutative, so striping plus reduction matches the
                // unstriped product.
                let mut acc = [0u8; 64];
                for pair in 0..points.len() / 64 {
                    for byte in 0..64 {
                        acc[byte] ^=
                            points[pair * 64 + byte] ^ scalars[pair * SCALAR_BYTES + byte % SCALAR_BYTES];
                    }
                }
                Ok(acc.to_vec())
            }

            ops::MSM_REDUCE => {
                let [partials] = args else {
                    return Err(ModuleError::invalid_argument(
                        operation,
                        "expected one partial-product buffer",
                    ));
                };
                if partials.is_empty() || partials.len() % 64 != 0 {
                    return Err(ModuleError::invalid_argument(
                        operation,
                        "partial products must be whole curve points",
                    ));
                }

                let mut acc = [0u8; 64];
                for partial in partials.chunks_exact(64) {
                    for byte in 0..64 {
                        acc[byte] ^= partial[byte];
                    }
                }
                Ok(acc.to_vec())
            }

            ops::TRANSFORM_MANY => {
                let mut output = Vec::new();
                for polynomial in args {
                    if polynomial.len() % SCALAR_BYTES != 0 {
                        return Err(ModuleError::invalid_argument(
                            operation,
                            "polynomial is not whole coefficients",
                        ));
                    }
                    for coefficient in polynomial.chunks_exact(SCALAR_BYTES) {
                        output.extend(coefficient.iter().rev());
                    }
                }
                Ok(output)
            }

            test_ops::HOST_ROUNDTRIP | test_ops::HOST_FAILING => host_results
                .first()
                .cloned()
                .ok_or_else(|| ModuleError::Trap("import plan ran but gathered nothing".into())),

            test_ops::HOST_CHAIN => Ok(host_results.concat()),

            _ => Err(ModuleError::UnknownExport(operation.to_string())),
        }
    }
}

impl ComputeModule for ScriptedModule {
    fn memory(&self) -> Memory {
        self.memory.clone()
    }

    fn alloc(&mut self, len: u32) -> Result<u32, ModuleError> {
        let ptr = self.memory_top;
        let top = ptr
            .checked_add(len)
            .filter(|top| *top as usize <= self.memory.len());

        match top {
            Some(top) => {
                self.memory_top = top;
                Ok(ptr)
            }
            None => Err(ModuleError::OutOfMemory),
        }
    }

    fn free(&mut self, _ptr: u32) -> Result<(), ModuleError> {
        // The bump allocator never reuses memory; real modules reclaim here.
        Ok(())
    }

    fn call(
        &mut self,
        host: &mut CallBridge,
        operation: &str,
        args: &[Vec<u8>],
    ) -> Result<CallOutcome, ComputeError> {
        let plan = self.plan(operation, args)?;

        if self.frame.is_none() {
            self.frame = Some(Frame {
                next_import: 0,
                gathered: Vec::new(),
            });
        }

        loop {
            let frame = self
                .frame
                .as_mut()
                .expect("frame is created above and only taken on completion");
            if frame.next_import >= plan.len() {
                break;
            }

            let (import, arg) = &plan[frame.next_import];
            match host.invoke_import(import, std::slice::from_ref(arg))? {
                ImportOutcome::Value(value) => {
                    frame.gathered.push(value);
                    frame.next_import += 1;
                }
                ImportOutcome::Suspend => return Ok(CallOutcome::Suspended),
            }
        }

        let frame = self
            .frame
            .take()
            .expect("frame is present until the call completes");

        // Results of the latency import are not part of any export's output.
        let skip = usize::from(self.latency.is_some());
        let result = self.execute(operation, args, &frame.gathered[skip..])?;

        Ok(CallOutcome::Complete(result))
    }

    fn begin_unwind(&mut self, stack: ScratchRegion) -> Result<(), ModuleError> {
        let frame = self
            .frame
            .take()
            .ok_or_else(|| ModuleError::Trap("no suspended call to unwind".into()))?;

        let bytes = serde_json::to_vec(&frame)
            .map_err(|error| ModuleError::Trap(format!("frame capture failed: {error}")))?;

        let needed = 4 + bytes.len();
        if needed > stack.len as usize {
            return Err(ModuleError::MemoryOutOfBounds {
                ptr: stack.ptr,
                len: needed as u32,
            });
        }

        let len = u32::try_from(bytes.len()).expect("frame fits in the bridge stack");
        self.memory.write(stack.ptr, &len.to_le_bytes())?;
        self.memory.write(stack.ptr + 4, &bytes)?;

        Ok(())
    }

    fn begin_rewind(&mut self, stack: ScratchRegion) -> Result<(), ModuleError> {
        let len_bytes = self.memory.read(stack.ptr, 4)?;
        let len = u32::from_le_bytes(
            len_bytes
                .try_into()
                .expect("read returns exactly the requested length"),
        );

        let bytes = self.memory.read(stack.ptr + 4, len)?;
        let frame = serde_json::from_slice(&bytes)
            .map_err(|error| ModuleError::Trap(format!("frame replay failed: {error}")))?;

        self.frame = Some(frame);

        Ok(())
    }
}

/// A [`ModuleLoader`] producing [`ScriptedModule`] instances.
pub struct ScriptedLoader {
    memory_bytes: usize,
    /// Artificial latency per loaded instance, in load order.
    lane_latencies: Vec<Option<Duration>>,
    next_lane: AtomicUsize,
}

impl Default for ScriptedLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl ScriptedLoader {
    /// A loader with default memory and no artificial latency.
    pub fn new() -> Self {
        Self {
            memory_bytes: DEFAULT_MEMORY_BYTES,
            lane_latencies: Vec::new(),
            next_lane: AtomicUsize::new(0),
        }
    }

    /// Gives the n-th loaded instance the n-th latency.
    ///
    /// Used to make one pool context artificially slower than the others.
    pub fn with_lane_latencies(mut self, latencies: Vec<Option<Duration>>) -> Self {
        self.lane_latencies = latencies;
        self
    }

    /// Overrides the module memory size.
    pub fn with_memory_bytes(mut self, memory_bytes: usize) -> Self {
        self.memory_bytes = memory_bytes;
        self
    }
}

impl ModuleLoader for ScriptedLoader {
    type Module = ScriptedModule;

    fn load(&self) -> futures::future::BoxFuture<'_, Result<Self::Module, ModuleError>> {
        let lane = self.next_lane.fetch_add(1, Ordering::Relaxed);
        let latency = self.lane_latencies.get(lane).copied().flatten();
        let module = ScriptedModule::new(self.memory_bytes, latency);

        async move { Ok(module) }.boxed()
    }

    fn imports(&self) -> Vec<(String, HostImport)> {
        vec![
            (
                test_imports::HOST_TRANSFORM.to_string(),
                wrap_import(|args: Vec<Vec<u8>>| async move {
                    let mut value = args.first().cloned().unwrap_or_default();
                    value.reverse();
                    Ok::<_, BoxError>(value)
                }),
            ),
            (
                test_imports::HOST_STEP.to_string(),
                wrap_import(|args: Vec<Vec<u8>>| async move {
                    let byte = args.first().and_then(|arg| arg.first()).copied().unwrap_or(0);
                    Ok::<_, BoxError>(vec![byte.wrapping_mul(3).wrapping_add(1)])
                }),
            ),
            (
                test_imports::HOST_DELAY.to_string(),
                wrap_import(|args: Vec<Vec<u8>>| async move {
                    let mut millis = [0u8; 8];
                    if let Some(arg) = args.first() {
                        let len = arg.len().min(8);
                        millis[..len].copy_from_slice(&arg[..len]);
                    }
                    tokio::time::sleep(Duration::from_millis(u64::from_le_bytes(millis))).await;
                    Ok::<_, BoxError>(Vec::new())
                }),
            ),
            (
                test_imports::HOST_FAIL.to_string(),
                wrap_import(|_args: Vec<Vec<u8>>| async move {
                    Err::<Vec<u8>, BoxError>("host import failed by request".into())
                }),
            ),
        ]
    }
}

/// Computes the scripted module's stand-in digest of `bytes`.
///
/// Tests compare pooled results against this reference directly.
pub fn digest(bytes: &[u8]) -> [u8; DIGEST_BYTES] {
    let mut digest = [0u8; DIGEST_BYTES];
    for (i, byte) in bytes.iter().enumerate() {
        let slot = i % DIGEST_BYTES;
        digest[slot] = digest[slot].wrapping_mul(31).wrapping_add(*byte);
    }
    digest[0] ^= bytes.len() as u8;
    digest
}
