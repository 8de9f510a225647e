//! Hardware-dependent encoder session checks: NVENC session open,
//! submission, sequence header export, and flush. Requires a machine
//! with a discrete NVENC-capable GPU.

use std::sync::Arc;

use windows::Win32::Graphics::Direct3D11::{D3D11_BOX, D3D11_TEXTURE2D_DESC};
use windows::Win32::Graphics::Dxgi::Common::{DXGI_FORMAT_B8G8R8A8_UNORM, DXGI_SAMPLE_DESC};

use gpu_encode_pipeline::config::{EncoderConfig, QualityPreset};
use gpu_encode_pipeline::encode::session::EncoderSession;
use gpu_encode_pipeline::gpu::converter::Converter;
use gpu_encode_pipeline::gpu::device::DevicePair;
use gpu_encode_pipeline::timestamp::calculate_timestamp;

fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

fn make_bgra_source(
    device: &windows::Win32::Graphics::Direct3D11::ID3D11Device,
    width: u32,
    height: u32,
) -> windows::Win32::Graphics::Direct3D11::ID3D11Texture2D {
    use windows::Win32::Graphics::Direct3D11::*;

    let desc = D3D11_TEXTURE2D_DESC {
        Width: width,
        Height: height,
        MipLevels: 1,
        ArraySize: 1,
        Format: DXGI_FORMAT_B8G8R8A8_UNORM,
        SampleDesc: DXGI_SAMPLE_DESC { Count: 1, Quality: 0 },
        Usage: D3D11_USAGE_DEFAULT,
        BindFlags: (D3D11_BIND_RENDER_TARGET.0 | D3D11_BIND_SHADER_RESOURCE.0) as u32,
        CPUAccessFlags: 0,
        MiscFlags: 0,
    };
    let mut texture = None;
    unsafe {
        device
            .CreateTexture2D(&desc, None, Some(&mut texture))
            .expect("create bgra source texture");
    }
    texture.unwrap()
}

#[test]
fn opens_a_session_and_submits_frames_to_hardware() {
    init_tracing();
    let config = EncoderConfig {
        width: 1280,
        height: 720,
        fps: 30,
        bitrate: 2_000_000,
        quality: QualityPreset::Medium,
    };

    let devices = DevicePair::open().expect("open device pair");
    let width = config.even_width();
    let height = config.even_height();

    let converter = Converter::new(
        &devices.capture.device,
        &devices.capture.context,
        width,
        height,
        config.fps,
    )
    .expect("create converter");

    let bgra_source = make_bgra_source(&devices.capture.device, width, height);

    unsafe {
        let dst_box = D3D11_BOX { left: 0, top: 0, front: 0, right: width, bottom: height, back: 1 };
        let pixels = vec![0x80u8; (width * height * 4) as usize];
        devices.capture.context.UpdateSubresource(
            &bgra_source,
            0,
            Some(&dst_box),
            pixels.as_ptr().cast(),
            width * 4,
            0,
        );
    }

    let session = Arc::new(
        EncoderSession::<8>::open(
            &devices.capture.device,
            devices.capture.context.clone(),
            &devices.encoder.device,
            config.clone(),
        )
        .expect("open encoder session"),
    );

    let header = session.get_sequence_header().expect("sequence header");
    assert!(!header.is_empty(), "sequence header must carry SPS/PPS/VPS");

    let mut accepted = 0;
    for n in 0..16u64 {
        let nv12_frame = converter.convert(&bgra_source).expect("convert frame");
        let timestamp = calculate_timestamp(n, config.fps);
        if session.submit(nv12_frame, timestamp).expect("submit") {
            accepted += 1;
        }
    }

    assert!(accepted > 0, "at least some of 16 submissions into an 8-slot ring must succeed");
    session.flush().expect("flush");
}

#[test]
fn pipeline_full_back_pressure_rejects_after_ring_saturates() {
    init_tracing();
    // Submit 8 frames with no drain progress: the 9th is rejected and
    // pending_count stays at 8.
    let config = EncoderConfig {
        width: 640,
        height: 360,
        fps: 30,
        bitrate: 1_000_000,
        quality: QualityPreset::Low,
    };

    let devices = DevicePair::open().expect("open device pair");
    let width = config.even_width();
    let height = config.even_height();

    let converter = Converter::new(
        &devices.capture.device,
        &devices.capture.context,
        width,
        height,
        config.fps,
    )
    .expect("create converter");

    let bgra_source = make_bgra_source(&devices.capture.device, width, height);
    let nv12_frame = converter.convert(&bgra_source).expect("convert frame");

    let session = EncoderSession::<8>::open(
        &devices.capture.device,
        devices.capture.context.clone(),
        &devices.encoder.device,
        config.clone(),
    )
    .expect("open encoder session");

    for n in 0..8u64 {
        let accepted = session
            .submit(nv12_frame, calculate_timestamp(n, config.fps))
            .expect("submit");
        assert!(accepted, "submissions 0..8 must be accepted into an empty 8-slot ring");
    }

    let ninth = session
        .submit(nv12_frame, calculate_timestamp(8, config.fps))
        .expect("submit");
    assert!(!ninth, "9th submission with no drain progress must be rejected");
    assert_eq!(session.ring().pending_count(), 8);
}
