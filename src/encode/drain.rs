//! Output Drain: a dedicated worker that turns completion events into
//! delivered `EncodedFrame` values, in submission order.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use windows::Win32::System::Threading::{SetEvent, WaitForSingleObject, WAIT_OBJECT_0};

use nvidia_video_codec_sdk::sys::nvEncodeAPI::NV_ENC_PIC_TYPE;

use crate::diagnostics::RateLimited;
use crate::encode::session::EncoderSession;
use crate::pool::ring::SlotRing;
use crate::pool::slot::{SurfaceSlot, KEY_CAPTURE_OWNS};

/// Wait timeout for each completion-event poll; re-checks `stop` on
/// every timeout.
const WAIT_TIMEOUT_MS: u32 = 100;

/// One decoded access unit, ready for delivery to the caller's callback
/// Ownership transfers to the callback; the
/// pipeline does not retain it.
pub struct EncodedFrame {
    pub data: Vec<u8>,
    pub timestamp: i64,
    pub duration: i64,
    pub is_keyframe: bool,
}

pub type FrameCallback = Box<dyn FnMut(EncodedFrame) + Send>;

/// Owns the drain thread and the flag that stops it.
pub struct Drain {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Drain {
    /// Spawn the drain worker. `frame_duration` is the configured
    /// `10_000_000 / fps` duration stamped onto every delivered frame.
    /// Takes the encoder session itself (rather than its nvenc handle and
    /// ring separately) since `EncoderSession` already owns both behind a
    /// single `Arc`.
    pub fn spawn<const N: usize>(
        encoder: Arc<EncoderSession<N>>,
        frame_duration: i64,
        mut callback: FrameCallback,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let worker_stop = Arc::clone(&stop);
        let lock_fail_diag = RateLimited::new("drain-lock-failure");

        let handle = std::thread::spawn(move || {
            run(&encoder, frame_duration, &worker_stop, &lock_fail_diag, &mut callback)
        });

        Self {
            stop,
            handle: Some(handle),
        }
    }

    /// Stop the worker, unblock its current wait, and join with the
    /// standard 5-second cap. A worker that doesn't exit within the cap
    /// is abandoned rather than blocking teardown forever.
    pub fn shutdown<const N: usize>(&mut self, ring: &SlotRing<SurfaceSlot, N>) {
        self.stop.store(true, Ordering::Release);
        for slot in ring.slots() {
            unsafe {
                let _ = SetEvent(slot.event);
            }
        }
        if let Some(handle) = self.handle.take() {
            join_with_timeout(handle, Duration::from_secs(5));
        }
    }
}

/// `JoinHandle::join` has no timeout in `std`; bound it by waiting on a
/// channel a wrapper thread signals once the real join completes.
fn join_with_timeout(handle: JoinHandle<()>, timeout: Duration) {
    let (tx, rx) = std::sync::mpsc::channel();
    std::thread::spawn(move || {
        let _ = handle.join();
        let _ = tx.send(());
    });
    if rx.recv_timeout(timeout).is_err() {
        tracing::warn!("drain worker did not exit within the teardown deadline");
    }
}

fn run<const N: usize>(
    encoder: &EncoderSession<N>,
    frame_duration: i64,
    stop: &AtomicBool,
    lock_fail_diag: &RateLimited,
    callback: &mut FrameCallback,
) {
    let nvenc = encoder.nvenc().as_ref();
    let ring = encoder.ring();
    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }

        let i = ring.retrieve_index();
        let slot = &ring.slots()[i];

        let wait = unsafe { WaitForSingleObject(slot.event, WAIT_TIMEOUT_MS) };
        if wait != WAIT_OBJECT_0 {
            continue;
        }
        if stop.load(Ordering::Acquire) {
            break;
        }

        match nvenc.lock_bitstream(slot.output_buffer) {
            Ok(locked) => {
                let len = locked.bitstreamSizeInBytes as usize;
                let mut data = vec![0u8; len];
                unsafe {
                    std::ptr::copy_nonoverlapping(locked.bitstreamBufferPtr.cast(), data.as_mut_ptr(), len);
                }
                let is_keyframe = locked.pictureType == NV_ENC_PIC_TYPE::NV_ENC_PIC_TYPE_IDR;

                let _ = nvenc.unlock_bitstream(slot.output_buffer);

                if let Some(mapped) = slot.mapped_input() {
                    let _ = nvenc.unmap_input_resource(mapped);
                    slot.mapped_input_clear();
                }
                let _ = slot.release_encoder(KEY_CAPTURE_OWNS);

                callback(EncodedFrame {
                    data,
                    timestamp: slot.timestamp(),
                    duration: frame_duration,
                    is_keyframe,
                });
            }
            Err(_) => {
                // The slot is lost but the ring must not stall.
                lock_fail_diag.record();
                if let Some(mapped) = slot.mapped_input() {
                    let _ = nvenc.unmap_input_resource(mapped);
                    slot.mapped_input_clear();
                }
                let _ = slot.release_encoder(KEY_CAPTURE_OWNS);
            }
        }

        ring.advance_retrieve();
    }
}

impl Drop for Drain {
    fn drop(&mut self) {
        if self.handle.is_some() {
            self.stop.store(true, Ordering::Release);
            if let Some(handle) = self.handle.take() {
                join_with_timeout(handle, Duration::from_secs(5));
            }
        }
    }
}
