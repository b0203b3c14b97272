use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use rayon::prelude::*;
use smallvec::SmallVec;

use crate::compile::fusion::{PixelLimits, PixelProcedure, ProcedureScratch};
use crate::compile::operation::{EvalCtx, Operation, OperationCore};
use crate::compile::pixel::{PixelOperation, PixelOperationBase, image_domain};
use crate::foundation::core::{Domain, InstanceKey, Precision, Value};
use crate::render::cpu::run_procedure;
use crate::result::buffer_pool::PixelBuffer;
use crate::result::store::ResultView;

/// Kernel cache key: source identity plus precision.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct KernelKey {
    /// xxh3 of the kernel source text.
    pub identity: u64,
    /// Precision the kernel was generated for.
    pub precision: Precision,
}

/// A kernel compiled by a [`GpuDevice`].
#[derive(Debug)]
pub struct GpuKernel {
    /// Cache key.
    pub key: KernelKey,
    /// Source the kernel was compiled from.
    pub source: String,
    /// Device-specific handle.
    pub handle: u64,
    /// The program, for devices that interpret it.
    pub procedure: Arc<PixelProcedure>,
}

/// A compute device able to run fused pixel kernels.
pub trait GpuDevice: Send + Sync {
    /// Per-kernel binding limits.
    fn limits(&self) -> PixelLimits {
        PixelLimits::default()
    }

    /// Compile `source` and return a device handle.
    fn compile_kernel(&self, source: &str, procedure: &PixelProcedure) -> u64;

    /// Run `kernel` over `domain`, writing one buffer per entry of `outputs`
    /// (`(procedure output index, buffer)`). Writes may be deferred until
    /// [`GpuDevice::memory_barrier`].
    fn dispatch(
        &self,
        kernel: &GpuKernel,
        inputs: &[ResultView],
        domain: Domain,
        outputs: &mut [(usize, PixelBuffer)],
    );

    /// Make prior dispatch writes visible to later reads.
    fn memory_barrier(&self);
}

/// Compiled kernels keyed by [`KernelKey`], shared across evaluations.
#[derive(Debug, Default)]
pub struct KernelCache {
    kernels: Mutex<HashMap<KernelKey, Arc<GpuKernel>>>,
}

impl KernelCache {
    /// Return the cached kernel for `procedure`, compiling it on first use.
    pub fn get_or_compile(
        &self,
        device: &dyn GpuDevice,
        procedure: &PixelProcedure,
        precision: Precision,
    ) -> Arc<GpuKernel> {
        let key = procedure.kernel_key(precision);
        let mut kernels = self.kernels.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(k) = kernels.get(&key) {
            return Arc::clone(k);
        }
        let source = procedure.source(precision);
        let handle = device.compile_kernel(&source, procedure);
        tracing::debug!(identity = key.identity, handle, "compiled pixel kernel");
        let kernel = Arc::new(GpuKernel {
            key,
            source,
            handle,
            procedure: Arc::new(procedure.clone()),
        });
        kernels.insert(key, Arc::clone(&kernel));
        kernel
    }

    /// Number of cached kernels.
    pub fn len(&self) -> usize {
        self.kernels
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether nothing is cached.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Counters of a [`SoftwareDevice`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DeviceStats {
    /// Kernels compiled.
    pub compiles: u64,
    /// Dispatches issued.
    pub dispatches: u64,
    /// Barriers issued.
    pub barriers: u64,
}

/// Device that interprets kernels on the CPU. Used for tests and `--gpu-emulation`.
#[derive(Debug, Default)]
pub struct SoftwareDevice {
    limits: Option<PixelLimits>,
    compiles: AtomicU64,
    dispatches: AtomicU64,
    barriers: AtomicU64,
}

impl SoftwareDevice {
    /// Device with default limits.
    pub fn new() -> Self {
        Self::default()
    }

    /// Device reporting `limits`.
    pub fn with_limits(limits: PixelLimits) -> Self {
        Self {
            limits: Some(limits),
            ..Self::default()
        }
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> DeviceStats {
        DeviceStats {
            compiles: self.compiles.load(Ordering::Relaxed),
            dispatches: self.dispatches.load(Ordering::Relaxed),
            barriers: self.barriers.load(Ordering::Relaxed),
        }
    }
}

impl GpuDevice for SoftwareDevice {
    fn limits(&self) -> PixelLimits {
        self.limits.unwrap_or_default()
    }

    fn compile_kernel(&self, _source: &str, _procedure: &PixelProcedure) -> u64 {
        self.compiles.fetch_add(1, Ordering::Relaxed)
    }

    fn dispatch(
        &self,
        kernel: &GpuKernel,
        inputs: &[ResultView],
        domain: Domain,
        outputs: &mut [(usize, PixelBuffer)],
    ) {
        self.dispatches.fetch_add(1, Ordering::Relaxed);
        let procedure = &*kernel.procedure;
        let out_types: Vec<_> = procedure.outputs().iter().map(|o| o.ty).collect();
        let width = domain.width as usize;
        let results: Vec<SmallVec<[Value; 4]>> = (0..domain.pixel_count())
            .into_par_iter()
            .map_init(
                || {
                    (
                        ProcedureScratch::new(procedure),
                        Vec::with_capacity(inputs.len()),
                        out_types.iter().map(|t| Value::zero(*t)).collect::<Vec<_>>(),
                    )
                },
                |(scratch, ins, values), i| {
                    let (x, y) = ((i % width) as u32, (i / width) as u32);
                    ins.clear();
                    ins.extend(inputs.iter().map(|v| v.sample(x, y)));
                    procedure.evaluate(ins, scratch, values);
                    values.iter().copied().collect()
                },
            )
            .collect();
        for (idx, buf) in outputs.iter_mut() {
            let ch = out_types[*idx].channels();
            for (px, values) in buf.data_mut().chunks_exact_mut(ch).zip(&results) {
                values[*idx].write_channels(px);
            }
        }
    }

    fn memory_barrier(&self) {
        self.barriers.fetch_add(1, Ordering::Relaxed);
    }
}

/// Pixel unit evaluated through the context's [`GpuDevice`].
pub struct GpuPixelOperation {
    base: PixelOperationBase,
}

impl GpuPixelOperation {
    /// Wrap a prepared base.
    pub fn new(base: PixelOperationBase) -> Self {
        Self { base }
    }
}

impl Operation for GpuPixelOperation {
    fn core(&self) -> &OperationCore {
        self.base.core()
    }

    fn core_mut(&mut self) -> &mut OperationCore {
        self.base.core_mut()
    }

    #[tracing::instrument(level = "debug", skip_all, fields(nodes = self.base.node_count()))]
    fn execute(&mut self, cx: &mut EvalCtx<'_>) {
        let views = self.base.input_views(cx.results);
        let outputs = self.base.needed_outputs(cx.results);
        if outputs.is_empty() {
            return;
        }
        let (Some(device), Some(domain)) = (cx.context.gpu_device(), image_domain(&views)) else {
            run_procedure(cx, self.base.procedure(), &views, &outputs, false);
            return;
        };

        let kernel =
            cx.context
                .kernel_cache()
                .get_or_compile(device, self.base.procedure(), cx.context.precision());
        let mut buffers: Vec<(usize, PixelBuffer)> = outputs
            .iter()
            .map(|(idx, _)| {
                let ty = self.base.procedure().outputs()[*idx].ty;
                (*idx, cx.results.acquire_buffer(domain, ty))
            })
            .collect();
        device.dispatch(&kernel, &views, domain, &mut buffers);
        device.memory_barrier();
        for ((_, id), (_, buf)) in outputs.iter().zip(buffers) {
            cx.results.allocate_image(*id, buf);
        }
    }

    fn compute_preview(&mut self, cx: &mut EvalCtx<'_>) {
        self.base.compute_preview(cx);
    }

    fn profiled_keys(&self) -> SmallVec<[InstanceKey; 4]> {
        self.base.profiled_keys()
    }
}

impl PixelOperation for GpuPixelOperation {
    fn base(&self) -> &PixelOperationBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut PixelOperationBase {
        &mut self.base
    }
}

#[cfg(test)]
#[path = "../../tests/unit/render/gpu.rs"]
mod tests;
