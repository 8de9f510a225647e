//! Hardware-dependent shared-surface pool checks: the cross-device
//! allocation plus NVENC registration for every ring slot, and clean
//! teardown. Requires a machine with a discrete NVENC-capable GPU.

use std::sync::Arc;

use gpu_encode_pipeline::encode::nvenc::NvencLibrary;
use gpu_encode_pipeline::gpu::device::DevicePair;
use gpu_encode_pipeline::pool::SharedSurfacePool;

#[test]
fn builds_and_registers_every_slot_in_the_ring() {
    let devices = DevicePair::open().expect("open device pair");
    let nvenc = Arc::new(NvencLibrary::open(&devices.encoder.device).expect("open nvenc session"));

    let pool = SharedSurfacePool::<8>::new(
        &devices.capture.device,
        &devices.encoder.device,
        Arc::clone(&nvenc),
        1920,
        1080,
    )
    .expect("build shared surface pool");

    assert_eq!(pool.ring.capacity(), 8);
    assert_eq!(pool.ring.pending_count(), 0);

    // Every slot starts with the capture side owning key 0 and no
    // mapped input registered.
    for slot in pool.ring.slots() {
        assert!(slot.mapped_input().is_none());
    }
}

#[test]
fn teardown_releases_every_slot_without_panicking() {
    let devices = DevicePair::open().expect("open device pair");
    let nvenc = Arc::new(NvencLibrary::open(&devices.encoder.device).expect("open nvenc session"));

    let pool = SharedSurfacePool::<4>::new(
        &devices.capture.device,
        &devices.encoder.device,
        Arc::clone(&nvenc),
        1280,
        720,
    )
    .expect("build shared surface pool");

    drop(pool);
    drop(nvenc);
}
