use super::*;
use crate::render::gpu::SoftwareDevice;

#[test]
fn defaults_target_cpu_with_default_limits() {
    let cx = StandardContext::builder().build().unwrap();
    assert!(!cx.use_gpu());
    assert!(cx.fusion_enabled());
    assert!(cx.profiler().is_none());
    assert!(cx.thread_pool().is_none());
    assert_eq!(cx.pixel_limits(), PixelLimits::default());
    assert_eq!(cx.precision(), Precision::Full);
}

#[test]
fn device_limits_apply_unless_overridden() {
    let device_limits = PixelLimits {
        max_inputs: 4,
        max_outputs: 2,
    };
    let cx = StandardContext::builder()
        .gpu(Arc::new(SoftwareDevice::with_limits(device_limits)))
        .build()
        .unwrap();
    assert!(cx.use_gpu());
    assert_eq!(cx.pixel_limits(), device_limits);

    let own = PixelLimits {
        max_inputs: 2,
        max_outputs: 1,
    };
    let cx = StandardContext::builder()
        .gpu(Arc::new(SoftwareDevice::with_limits(device_limits)))
        .pixel_limits(own)
        .build()
        .unwrap();
    assert_eq!(cx.pixel_limits(), own);
}

#[test]
fn zero_limits_and_zero_threads_are_rejected() {
    let err = StandardContext::builder()
        .pixel_limits(PixelLimits {
            max_inputs: 0,
            max_outputs: 1,
        })
        .build()
        .err()
        .unwrap();
    assert!(err.to_string().contains("pixel limits"));

    let err = StandardContext::builder().threads(0).build().err().unwrap();
    assert!(err.to_string().contains("thread count"));
}

#[test]
fn dedicated_thread_pool() {
    let cx = StandardContext::builder().threads(2).build().unwrap();
    assert_eq!(cx.thread_pool().unwrap().current_num_threads(), 2);
}

#[test]
fn cancellation_is_shared_through_the_flag() {
    let flag = Arc::new(AtomicBool::new(false));
    let cx = StandardContext::builder()
        .cancel_flag(Arc::clone(&flag))
        .build()
        .unwrap();
    assert!(!cx.is_canceled());
    flag.store(true, Ordering::Relaxed);
    assert!(cx.is_canceled());

    let cx = StandardContext::builder().build().unwrap();
    cx.cancel_handle().store(true, Ordering::Relaxed);
    assert!(cx.is_canceled());
}

#[test]
fn viewer_slot_keeps_last_write() {
    let mut cx = StandardContext::builder().frame(3).view("left").build().unwrap();
    assert_eq!(cx.frame_number(), 3);
    assert_eq!(cx.view_name(), "left");
    cx.set_frame_number(4);
    assert_eq!(cx.frame_number(), 4);

    assert!(cx.take_viewer().is_none());
    for k in [InstanceKey::ROOT, InstanceKey::ROOT.child("v")] {
        cx.write_viewer(ViewerOutput {
            instance_key: k,
            view: ResultView::Uniform(crate::foundation::core::Value::Float(1.0)),
        });
    }
    let last = cx.take_viewer().unwrap();
    assert_eq!(last.instance_key, InstanceKey::ROOT.child("v"));
    assert!(cx.take_viewer().is_none());
}

struct Minimal {
    pool: SharedBufferPool,
    kernels: KernelCache,
}

impl Context for Minimal {
    fn buffer_pool(&self) -> &SharedBufferPool {
        &self.pool
    }

    fn kernel_cache(&self) -> &KernelCache {
        &self.kernels
    }
}

#[test]
fn minimal_host_gets_trait_defaults() {
    let cx = Minimal {
        pool: Arc::new(Mutex::new(BufferPool::default())),
        kernels: KernelCache::default(),
    };
    assert!(!cx.use_gpu());
    assert!(!cx.is_canceled());
    assert_eq!(cx.frame_number(), 0);
    assert_eq!(cx.pixel_limits(), PixelLimits::default());
    assert!(cx.fusion_enabled());
}
