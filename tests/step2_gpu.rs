//! Hardware-dependent GPU layer checks: device creation, texture
//! creation, and the dual-device shared-surface handshake. Requires a
//! machine with a discrete GPU exposing a D3D11 video processor.

use gpu_encode_pipeline::gpu::device::{DevicePair, GpuDevice};
use gpu_encode_pipeline::gpu::texture::{create_bgra_texture, create_nv12_texture, SharedNv12Texture};

#[test]
fn creates_gpu_device_on_default_adapter() {
    let gpu = GpuDevice::new().expect("failed to create GPU device");
    let _ = &gpu.device;
    let _ = &gpu.context;
    let _ = &gpu.dxgi_device;
}

#[test]
fn creates_bgra_and_nv12_textures() {
    let gpu = GpuDevice::new().expect("failed to create GPU device");
    let _bgra = create_bgra_texture(&gpu.device, 1920, 1080).expect("bgra texture");
    let _nv12 = create_nv12_texture(&gpu.device, 1920, 1080).expect("nv12 texture");
}

#[test]
fn opens_capture_and_encoder_devices_on_the_same_adapter() {
    let pair = DevicePair::open().expect("failed to open device pair");
    let capture_adapter = pair.capture.adapter().expect("capture adapter");
    let encoder_adapter = pair.encoder.adapter().expect("encoder adapter");

    let describe = |a: &windows::Win32::Graphics::Dxgi::IDXGIAdapter| unsafe {
        a.GetDesc().map(|d| d.AdapterLuid)
    };
    assert_eq!(
        describe(&capture_adapter).unwrap().LowPart,
        describe(&encoder_adapter).unwrap().LowPart,
        "capture and encoder devices must share one physical adapter"
    );
}

#[test]
fn reports_video_processor_support() {
    let gpu = GpuDevice::new().expect("failed to create GPU device");
    // Every adapter this pipeline targets exposes a video processor
    // (fatal to the session otherwise); a discrete NVENC-capable GPU
    // always does.
    assert!(gpu.has_video_processor_support());
}

#[test]
fn shares_an_nv12_allocation_across_two_devices() {
    let pair = DevicePair::open().expect("failed to open device pair");
    let shared = SharedNv12Texture::create(&pair.capture.device, &pair.encoder.device, 1920, 1080)
        .expect("failed to create shared NV12 surface");

    // Key handshake: capture side acquires key 0 first, since that's
    // the allocation's initial keyed-mutex state.
    unsafe {
        shared.capture_mutex.AcquireSync(0, 100).expect("acquire key 0 on capture side");
        shared.capture_mutex.ReleaseSync(1).expect("release to key 1");
        shared.encoder_mutex.AcquireSync(1, 100).expect("acquire key 1 on encoder side");
        shared.encoder_mutex.ReleaseSync(0).expect("release back to key 0");
    }
}
