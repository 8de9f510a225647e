//! One Shared Surface Slot: two device views of one NV12 allocation,
//! the keyed-mutex handoff, and the NVENC registration/mapping tokens
//! that ride alongside it.

use std::ffi::c_void;
use std::ptr;
use std::sync::atomic::{AtomicI64, AtomicPtr, Ordering};

use windows::Win32::Foundation::HANDLE;
use windows::Win32::Graphics::Direct3D11::ID3D11Texture2D;
use windows::Win32::Graphics::Dxgi::{IDXGIKeyedMutex, DXGI_ERROR_WAIT_TIMEOUT};

use nvidia_video_codec_sdk::sys::nvEncodeAPI::{
    NV_ENC_INPUT_PTR, NV_ENC_OUTPUT_PTR, NV_ENC_REGISTERED_PTR,
};

use crate::error::{PipelineError, Result};
use crate::gpu::texture::SharedNv12Texture;

/// Keyed-mutex acquire/release timeout.
pub const MUTEX_TIMEOUT_MS: u32 = 100;

/// Key values of the capture/encoder handoff: 0 means the capture side
/// owns the surface, 1 means the encoder side owns it. No other key
/// value is legal.
pub const KEY_CAPTURE_OWNS: u64 = 0;
pub const KEY_ENCODER_OWNS: u64 = 1;

/// `mapped_input` and `timestamp` are mutated by the submitter and read
/// (and cleared) by the drain worker — both sides only ever touch the
/// slot at the index `pending_count` currently guarantees is theirs, so
/// plain atomics are enough; no lock is needed.
pub struct SurfaceSlot {
    pub capture_view: ID3D11Texture2D,
    pub capture_mutex: IDXGIKeyedMutex,
    pub encoder_view: ID3D11Texture2D,
    pub encoder_mutex: IDXGIKeyedMutex,
    pub registered_resource: NV_ENC_REGISTERED_PTR,
    mapped_input: AtomicPtr<c_void>,
    pub output_buffer: NV_ENC_OUTPUT_PTR,
    pub event: HANDLE,
    timestamp: AtomicI64,
}

impl SurfaceSlot {
    pub fn new(
        shared: SharedNv12Texture,
        registered_resource: NV_ENC_REGISTERED_PTR,
        output_buffer: NV_ENC_OUTPUT_PTR,
        event: HANDLE,
    ) -> Self {
        Self {
            capture_view: shared.capture_view,
            capture_mutex: shared.capture_mutex,
            encoder_view: shared.encoder_view,
            encoder_mutex: shared.encoder_mutex,
            registered_resource,
            mapped_input: AtomicPtr::new(ptr::null_mut()),
            output_buffer,
            event,
            timestamp: AtomicI64::new(0),
        }
    }

    /// Acquire the capture-side mutex expecting `key`, with the standard
    /// 100 ms timeout. `Ok(false)` on timeout (non-fatal); `Err` for any
    /// other failure.
    pub fn acquire_capture(&self, key: u64) -> Result<bool> {
        acquire(&self.capture_mutex, key)
    }

    pub fn release_capture(&self, key: u64) -> Result<()> {
        unsafe { self.capture_mutex.ReleaseSync(key)? };
        Ok(())
    }

    pub fn acquire_encoder(&self, key: u64) -> Result<bool> {
        acquire(&self.encoder_mutex, key)
    }

    pub fn release_encoder(&self, key: u64) -> Result<()> {
        unsafe { self.encoder_mutex.ReleaseSync(key)? };
        Ok(())
    }

    pub fn timestamp(&self) -> i64 {
        self.timestamp.load(Ordering::Acquire)
    }

    pub fn timestamp_store(&self, value: i64) {
        self.timestamp.store(value, Ordering::Release);
    }

    pub fn mapped_input(&self) -> Option<NV_ENC_INPUT_PTR> {
        let ptr = self.mapped_input.load(Ordering::Acquire);
        if ptr.is_null() {
            None
        } else {
            Some(ptr as NV_ENC_INPUT_PTR)
        }
    }

    pub fn mapped_input_store(&self, value: NV_ENC_INPUT_PTR) {
        self.mapped_input.store(value as *mut c_void, Ordering::Release);
    }

    pub fn mapped_input_clear(&self) {
        self.mapped_input.store(ptr::null_mut(), Ordering::Release);
    }
}

fn acquire(mutex: &IDXGIKeyedMutex, key: u64) -> Result<bool> {
    match unsafe { mutex.AcquireSync(key, MUTEX_TIMEOUT_MS) } {
        Ok(()) => Ok(true),
        Err(err) if err.code() == DXGI_ERROR_WAIT_TIMEOUT => Ok(false),
        Err(err) => Err(PipelineError::from(err)),
    }
}
