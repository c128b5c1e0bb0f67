//! End-to-end tests over the null backend: device services, frame loop,
//! render-target caching, uniform streaming and query recycling.

use std::sync::Arc;

use cinder_rhi::context::{GLOBAL_UNIFORM_SLOT, LOCAL_UNIFORM_SLOT};
use cinder_rhi::deferred::FRAMES_IN_FLIGHT;
use cinder_rhi::types::{
    BufferDescriptor, BufferUsage, TextureDescriptor, TextureFormat, TextureSubresource,
    TextureUsage,
};
use cinder_rhi::{
    BackendKind, Binding, CommandContext, CompiledShader, ContextState, Device, GpuResource,
    RenderThread, ShaderCache, ShaderStage,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn test_device() -> Arc<Device> {
    init_logging();
    Device::new(BackendKind::None).unwrap()
}

#[test]
fn test_buffer_write_and_read_back() {
    let device = test_device();
    let buffer = device
        .create_buffer(
            BufferDescriptor::new(256, BufferUsage::COPY_DST | BufferUsage::MAP_READ)
                .with_label("staging"),
        )
        .unwrap();

    buffer.write(16, &[7u8; 32]);
    assert_eq!(buffer.read(16, 32), vec![7u8; 32]);
    assert_eq!(buffer.read(0, 8), vec![0u8; 8]);
}

#[test]
fn test_released_buffer_outlives_frames_in_flight() {
    let device = test_device();
    let buffer = device
        .create_buffer(BufferDescriptor::new(64, BufferUsage::UNIFORM))
        .unwrap();

    let probe = Arc::downgrade(&buffer.gpu().unwrap());
    buffer.release();

    // The backend handle stays alive until enough frames have retired.
    assert!(buffer.gpu().is_none());
    assert!(probe.upgrade().is_some());

    for _ in 0..FRAMES_IN_FLIGHT {
        device.deferred().advance_frame();
    }
    assert!(probe.upgrade().is_none());
}

#[test]
fn test_render_target_cache_reuses_entries() {
    let device = test_device();
    let texture = device
        .create_texture(TextureDescriptor::new_2d(
            64,
            64,
            TextureFormat::Rgba8Unorm,
            TextureUsage::RENDER_ATTACHMENT,
        ))
        .unwrap();
    let rtv = device
        .create_render_target_view(&texture, TextureSubresource::default())
        .unwrap();

    let mut context = CommandContext::new(device.clone());
    context.begin().unwrap();

    context.bind_render_targets(&[Some(&rtv)], None).unwrap();
    assert_eq!(device.render_targets().len(), 1);

    context.unbind_render_targets();
    context.bind_render_targets(&[Some(&rtv)], None).unwrap();
    assert_eq!(device.render_targets().len(), 1);

    let handle = context.end().unwrap();
    context.execute(&handle).unwrap();
    context.advance_frame().unwrap();

    // Destroying the last attachment view tears the cached entry down.
    rtv.release();
    assert_eq!(device.render_targets().len(), 0);
}

#[test]
fn test_global_uniform_stack_restores_previous_binding() {
    let device = test_device();
    let mut context = CommandContext::new(device);
    context.begin().unwrap();

    context.push_globals_value(&[1.0f32; 4]).unwrap();
    let outer = context.binding(GLOBAL_UNIFORM_SLOT).unwrap();
    assert!(matches!(outer, Binding::PoolUniform { .. }));

    context.push_globals_value(&[2.0f32; 4]).unwrap();
    let inner = context.binding(GLOBAL_UNIFORM_SLOT).unwrap();
    assert_ne!(outer, inner);

    context.pop_globals();
    assert_eq!(context.binding(GLOBAL_UNIFORM_SLOT), Some(outer));

    context.pop_globals();
    assert_eq!(context.binding(GLOBAL_UNIFORM_SLOT), None);
}

#[test]
fn test_scalar_uniforms_flush_before_each_draw() {
    let device = test_device();
    let mut context = CommandContext::new(device);
    context.begin().unwrap();

    context.update_scalar_value(&41u32, 0);
    context.draw(3, 0).unwrap();
    let Some(Binding::PoolUniform { offset: first, .. }) = context.binding(LOCAL_UNIFORM_SLOT)
    else {
        panic!("draw did not flush per-draw uniforms");
    };

    context.update_scalar_value(&42u32, 0);
    context.draw(3, 0).unwrap();
    let Some(Binding::PoolUniform { offset: second, .. }) = context.binding(LOCAL_UNIFORM_SLOT)
    else {
        panic!("second draw did not flush per-draw uniforms");
    };

    // Each flush claims a fresh aligned slice of the ring.
    assert_eq!(second, first + 256);
}

#[test]
fn test_finished_commands_replay_on_resubmit() {
    let device = test_device();
    let mut context = CommandContext::new(device);
    context.begin().unwrap();
    context.draw(3, 0).unwrap();
    let handle = context.end().unwrap();

    context.execute(&handle).unwrap();
    context.execute(&handle).unwrap();
    assert_eq!(handle.gpu().submit_count(), 2);
}

#[test]
fn test_frame_advance_returns_context_to_idle() {
    let device = test_device();
    let mut context = CommandContext::new(device);

    for _ in 0..3 {
        context.begin().unwrap();
        assert_eq!(context.state(), ContextState::Recording);
        let handle = context.end().unwrap();
        context.execute(&handle).unwrap();
        context.advance_frame().unwrap();
        assert_eq!(context.state(), ContextState::Idle);
    }
    assert_eq!(context.frame(), 3);
}

#[test]
fn test_timestamp_slots_recycle_after_release() {
    let device = test_device();

    let first = device.create_timestamp().unwrap();
    assert!(!device.timestamp_available(first));

    device.complete_timestamp(first, 500);
    assert!(device.timestamp_available(first));
    assert_eq!(device.timestamp_value(first), Some(500));

    let index = first.index();
    device.release_timestamp(first);

    // Freed slots are reused lowest-first and come back cleared.
    let second = device.create_timestamp().unwrap();
    assert_eq!(second.index(), index);
    assert!(!device.timestamp_available(second));
    device.release_timestamp(second);
}

#[test]
fn test_timer_reports_elapsed_ticks() {
    let device = test_device();

    let timer = device.create_timer().unwrap();
    assert_eq!(device.timer_elapsed(&timer), None);

    device.complete_timestamp(timer.begin, 1_000);
    assert_eq!(device.timer_elapsed(&timer), None);

    device.complete_timestamp(timer.end, 1_450);
    assert_eq!(device.timer_elapsed(&timer), Some(450));

    device.release_timer(timer);
}

#[test]
fn test_statistics_query_round_trip() {
    let device = test_device();

    let stats = device.create_statistics().unwrap();
    assert_eq!(device.statistics_value(stats), None);

    device.complete_statistics(stats, 12_345);
    assert_eq!(device.statistics_value(stats), Some(12_345));

    device.release_statistics(stats);
}

#[test]
fn test_render_thread_records_a_frame() {
    let device = test_device();
    let thread = RenderThread::spawn(device).unwrap();

    let submits = thread
        .run_blocking(|context| {
            context.begin().unwrap();
            context.draw(3, 0).unwrap();
            let handle = context.end().unwrap();
            context.execute(&handle).unwrap();
            let submits = handle.gpu().submit_count();
            context.advance_frame().unwrap();
            submits
        })
        .unwrap();

    assert_eq!(submits, 1);
    thread.shutdown();
}

#[test]
fn test_shader_cache_survives_device_restart() {
    init_logging();
    let dir = tempfile::tempdir().unwrap();

    let mut shader = CompiledShader::default();
    shader.set_stage(ShaderStage::Vertex, vec![0xAA; 128]);
    shader.set_stage(ShaderStage::Fragment, vec![0xBB; 64]);

    {
        let cache = ShaderCache::new(dir.path(), BackendKind::None);
        cache.store("fx/post/tonemap", &shader).unwrap();
    }

    let cache = ShaderCache::new(dir.path(), BackendKind::None);
    let loaded = cache.load("fx/post/tonemap").unwrap();
    assert_eq!(loaded, shader);
    assert_eq!(loaded.stage(ShaderStage::Vertex).len(), 128);

    // Another backend's cache directory never sees the entry.
    let other = ShaderCache::new(dir.path(), BackendKind::Vulkan);
    assert!(other.load("fx/post/tonemap").is_none());
}
