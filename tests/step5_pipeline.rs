//! End-to-end pipeline checks: `PipelineSession` from raw BGRA bytes
//! through to delivered `EncodedFrame`s, teardown timing, and hardware
//! availability. Requires a machine with a discrete NVENC-capable GPU.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use gpu_encode_pipeline::config::{EncoderConfig, QualityPreset};
use gpu_encode_pipeline::pipeline::PipelineSession;

#[test]
fn reports_hardware_availability() {
    // Whatever the answer on this machine, the probe itself must not
    // allocate a session.
    let _ = PipelineSession::<8>::is_available();
}

#[test]
fn submits_bgra_frames_and_delivers_encoded_output() {
    let config = EncoderConfig {
        width: 1280,
        height: 720,
        fps: 30,
        bitrate: 2_000_000,
        quality: QualityPreset::Medium,
    };

    let frames = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&frames);

    let mut session = PipelineSession::<8>::create(
        config.clone(),
        Box::new(move |frame| sink.lock().unwrap().push(frame)),
    )
    .expect("create pipeline session");

    let width = config.even_width();
    let height = config.even_height();
    let row_pitch = width * 4;
    let pixels = vec![0x40u8; (row_pitch * height) as usize];

    let mut accepted = 0;
    for _ in 0..32 {
        if session
            .submit_bgra(&pixels, row_pitch)
            .expect("submit_bgra")
        {
            accepted += 1;
        }
    }
    assert!(accepted > 0, "at least some of 32 submissions must be accepted");

    session.flush().expect("flush");

    // Give the drain worker time to empty the ring naturally after flush
    // (DESIGN.md's Flush open-question decision).
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if frames.lock().unwrap().len() >= accepted || Instant::now() >= deadline {
            break;
        }
        std::thread::sleep(Duration::from_millis(50));
    }

    let delivered = frames.lock().unwrap();
    assert!(!delivered.is_empty(), "drain must deliver at least one encoded frame");
    assert!(delivered[0].is_keyframe, "first delivered frame must be a keyframe (forced IDR at frame 0)");

    // Ordering invariant: timestamps strictly increase in delivery
    // order.
    for pair in delivered.windows(2) {
        assert!(pair[1].timestamp > pair[0].timestamp);
    }
}

#[test]
fn teardown_completes_within_the_five_second_cap() {
    let config = EncoderConfig {
        width: 640,
        height: 360,
        fps: 30,
        bitrate: 1_000_000,
        quality: QualityPreset::Low,
    };

    let session = PipelineSession::<8>::create(config, Box::new(|_frame| {}))
        .expect("create pipeline session");

    let start = Instant::now();
    drop(session);
    assert!(start.elapsed() < Duration::from_secs(6), "teardown must honor the 5s join cap");
}
