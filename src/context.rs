use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use crate::compile::fusion::{FusionPredicate, PixelLimits, SingleValueCompatible};
use crate::compile::schedule::{DepthFirstScheduler, Scheduler};
use crate::foundation::core::{InstanceKey, Precision};
use crate::foundation::error::{CompositorError, CompositorResult};
use crate::profile::Profiler;
use crate::render::gpu::{GpuDevice, KernelCache};
use crate::result::buffer_pool::{BufferPool, BufferPoolOpts, SharedBufferPool};
use crate::result::store::ResultView;

static DEFAULT_SCHEDULER: DepthFirstScheduler = DepthFirstScheduler;
static DEFAULT_FUSION: SingleValueCompatible = SingleValueCompatible;

/// What a viewer node last wrote.
#[derive(Clone, Debug)]
pub struct ViewerOutput {
    /// Occurrence of the viewer node that wrote it.
    pub instance_key: InstanceKey,
    /// The viewed data.
    pub view: ResultView,
}

/// Host services consumed by the compiler and by operations.
///
/// Everything except the buffer pool and kernel cache has a default, so a host only needs to
/// supply the stateful parts.
pub trait Context {
    /// The GPU device, if this evaluation targets one.
    fn gpu_device(&self) -> Option<&dyn GpuDevice> {
        None
    }

    /// Whether pixel units may be compiled for the GPU backend.
    fn use_gpu(&self) -> bool {
        self.gpu_device().is_some()
    }

    /// Current frame.
    fn frame_number(&self) -> i64 {
        0
    }

    /// Active render view name.
    fn view_name(&self) -> &str {
        ""
    }

    /// Polled once per scheduled node.
    fn is_canceled(&self) -> bool {
        false
    }

    /// Precision for allocated results and compiled kernels.
    fn precision(&self) -> Precision {
        Precision::Full
    }

    /// Pool backing image results.
    fn buffer_pool(&self) -> &SharedBufferPool;

    /// Compiled GPU kernels, shared across evaluations.
    fn kernel_cache(&self) -> &KernelCache;

    /// Per-unit external input and output caps.
    fn pixel_limits(&self) -> PixelLimits {
        self.gpu_device()
            .map(|d| d.limits())
            .unwrap_or_default()
    }

    /// Whether adjacent pixel nodes are fused into pixel operations.
    fn fusion_enabled(&self) -> bool {
        true
    }

    /// Decides when the open pixel unit must be closed before the next node joins.
    fn fusion_predicate(&self) -> &dyn FusionPredicate {
        &DEFAULT_FUSION
    }

    /// Orders the nodes of each tree instance.
    fn scheduler(&self) -> &dyn Scheduler {
        &DEFAULT_SCHEDULER
    }

    /// Per-node timing sink, if profiling is on.
    fn profiler(&self) -> Option<&Profiler> {
        None
    }

    /// Pool used for parallel CPU work. `None` uses the global rayon pool.
    fn thread_pool(&self) -> Option<&rayon::ThreadPool> {
        None
    }

    /// Store what a viewer node produced.
    fn write_viewer(&self, _output: ViewerOutput) {}
}

/// Ready-made [`Context`] configured through [`ContextBuilder`].
pub struct StandardContext {
    gpu: Option<Arc<dyn GpuDevice>>,
    frame: i64,
    view: String,
    canceled: Arc<AtomicBool>,
    precision: Precision,
    pool: SharedBufferPool,
    kernels: KernelCache,
    limits: Option<PixelLimits>,
    fusion: bool,
    predicate: Option<Box<dyn FusionPredicate>>,
    scheduler: Option<Box<dyn Scheduler>>,
    profiler: Option<Profiler>,
    threads: Option<rayon::ThreadPool>,
    viewer: Mutex<Option<ViewerOutput>>,
}

impl StandardContext {
    /// Start configuring a context.
    pub fn builder() -> ContextBuilder {
        ContextBuilder::default()
    }

    /// Flag shared with other threads; storing `true` cancels the running evaluation.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.canceled)
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.canceled.store(true, Ordering::Relaxed);
    }

    /// Take the last viewer output.
    pub fn take_viewer(&self) -> Option<ViewerOutput> {
        self.viewer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }

    /// Update the frame for the next evaluation.
    pub fn set_frame_number(&mut self, frame: i64) {
        self.frame = frame;
    }
}

impl Context for StandardContext {
    fn gpu_device(&self) -> Option<&dyn GpuDevice> {
        self.gpu.as_deref()
    }

    fn frame_number(&self) -> i64 {
        self.frame
    }

    fn view_name(&self) -> &str {
        &self.view
    }

    fn is_canceled(&self) -> bool {
        self.canceled.load(Ordering::Relaxed)
    }

    fn precision(&self) -> Precision {
        self.precision
    }

    fn buffer_pool(&self) -> &SharedBufferPool {
        &self.pool
    }

    fn kernel_cache(&self) -> &KernelCache {
        &self.kernels
    }

    fn pixel_limits(&self) -> PixelLimits {
        match (self.limits, &self.gpu) {
            (Some(l), _) => l,
            (None, Some(d)) => d.limits(),
            (None, None) => PixelLimits::default(),
        }
    }

    fn fusion_enabled(&self) -> bool {
        self.fusion
    }

    fn fusion_predicate(&self) -> &dyn FusionPredicate {
        self.predicate.as_deref().unwrap_or(&DEFAULT_FUSION)
    }

    fn scheduler(&self) -> &dyn Scheduler {
        self.scheduler.as_deref().unwrap_or(&DEFAULT_SCHEDULER)
    }

    fn profiler(&self) -> Option<&Profiler> {
        self.profiler.as_ref()
    }

    fn thread_pool(&self) -> Option<&rayon::ThreadPool> {
        self.threads.as_ref()
    }

    fn write_viewer(&self, output: ViewerOutput) {
        *self.viewer.lock().unwrap_or_else(PoisonError::into_inner) = Some(output);
    }
}

/// Builder for [`StandardContext`].
#[derive(Default)]
pub struct ContextBuilder {
    gpu: Option<Arc<dyn GpuDevice>>,
    frame: i64,
    view: String,
    precision: Precision,
    pool_opts: BufferPoolOpts,
    limits: Option<PixelLimits>,
    disable_fusion: bool,
    predicate: Option<Box<dyn FusionPredicate>>,
    scheduler: Option<Box<dyn Scheduler>>,
    profile: bool,
    threads: Option<usize>,
    cancel: Option<Arc<AtomicBool>>,
}

impl ContextBuilder {
    /// Target a GPU device.
    pub fn gpu(mut self, device: Arc<dyn GpuDevice>) -> Self {
        self.gpu = Some(device);
        self
    }

    /// Frame number.
    pub fn frame(mut self, frame: i64) -> Self {
        self.frame = frame;
        self
    }

    /// Render view name.
    pub fn view(mut self, view: impl Into<String>) -> Self {
        self.view = view.into();
        self
    }

    /// Result precision.
    pub fn precision(mut self, precision: Precision) -> Self {
        self.precision = precision;
        self
    }

    /// Buffer pool caps.
    pub fn buffer_pool(mut self, opts: BufferPoolOpts) -> Self {
        self.pool_opts = opts;
        self
    }

    /// Override the device's pixel unit limits.
    pub fn pixel_limits(mut self, limits: PixelLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    /// Compile every pixel node as its own standalone operation.
    pub fn disable_fusion(mut self) -> Self {
        self.disable_fusion = true;
        self
    }

    /// Custom fusion predicate.
    pub fn fusion_predicate(mut self, predicate: Box<dyn FusionPredicate>) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Custom scheduler.
    pub fn scheduler(mut self, scheduler: Box<dyn Scheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Collect per-node execution times.
    pub fn profile(mut self, on: bool) -> Self {
        self.profile = on;
        self
    }

    /// Dedicated worker count for CPU pixel work.
    pub fn threads(mut self, threads: usize) -> Self {
        self.threads = Some(threads);
        self
    }

    /// Share an existing cancellation flag.
    pub fn cancel_flag(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    /// Finish configuration.
    pub fn build(self) -> CompositorResult<StandardContext> {
        if let Some(l) = self.limits
            && (l.max_inputs == 0 || l.max_outputs == 0)
        {
            return Err(CompositorError::validation(
                "pixel limits must allow at least one input and one output",
            ));
        }
        let threads = match self.threads {
            Some(n) => Some(build_thread_pool(n)?),
            None => None,
        };
        Ok(StandardContext {
            gpu: self.gpu,
            frame: self.frame,
            view: self.view,
            canceled: self.cancel.unwrap_or_default(),
            precision: self.precision,
            pool: Arc::new(Mutex::new(BufferPool::new(self.pool_opts))),
            kernels: KernelCache::default(),
            limits: self.limits,
            fusion: !self.disable_fusion,
            predicate: self.predicate,
            scheduler: self.scheduler,
            profiler: self.profile.then(Profiler::default),
            threads,
            viewer: Mutex::new(None),
        })
    }
}

fn build_thread_pool(threads: usize) -> CompositorResult<rayon::ThreadPool> {
    if threads == 0 {
        return Err(CompositorError::validation("thread count must be >= 1"));
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| CompositorError::evaluation(format!("build rayon thread pool: {e}")))
}

#[cfg(test)]
#[path = "../tests/unit/context.rs"]
mod tests;
