//! Shared-Surface Pool: N slots, each a cross-device NV12 allocation
//! registered with the encoder.

use std::sync::Arc;

use windows::core::Interface;
use windows::Win32::Graphics::Direct3D11::ID3D11Device;
use windows::Win32::System::Threading::CreateEventW;

use nvidia_video_codec_sdk::sys::nvEncodeAPI::{NV_ENC_BUFFER_FORMAT, NV_ENC_INPUT_RESOURCE_TYPE};

use crate::encode::nvenc::NvencLibrary;
use crate::error::Result;
use crate::gpu::texture::SharedNv12Texture;
use crate::pool::ring::SlotRing;
use crate::pool::slot::SurfaceSlot;

/// Minimum ring size the encoder requires: at least 4 plus the max
/// B-frame count, and B-frames are always disabled here.
pub const MIN_SLOTS: usize = 4;

/// N-slot ring: each slot allocates a shared-keyed-mutex NV12 surface,
/// opens it on the encoder device, and registers the encoder-side view
/// as an NVENC input resource.
pub struct SharedSurfacePool<const N: usize> {
    pub ring: SlotRing<SurfaceSlot, N>,
    nvenc: Arc<NvencLibrary>,
}

impl<const N: usize> SharedSurfacePool<N> {
    pub fn new(
        capture_device: &ID3D11Device,
        encoder_device: &ID3D11Device,
        nvenc: Arc<NvencLibrary>,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        assert!(N >= MIN_SLOTS, "ring must have at least {MIN_SLOTS} slots");

        let ring = SlotRing::try_new(|_| {
            build_slot(capture_device, encoder_device, &nvenc, width, height)
        })?;

        Ok(Self { ring, nvenc })
    }
}

fn build_slot(
    capture_device: &ID3D11Device,
    encoder_device: &ID3D11Device,
    nvenc: &NvencLibrary,
    width: u32,
    height: u32,
) -> Result<SurfaceSlot> {
    let shared = SharedNv12Texture::create(capture_device, encoder_device, width, height)?;

    let resource_ptr = unsafe { shared.encoder_view.as_raw() };
    let registered_resource = nvenc.register_resource(
        resource_ptr,
        NV_ENC_INPUT_RESOURCE_TYPE::NV_ENC_INPUT_RESOURCE_TYPE_DIRECTX,
        width,
        height,
        NV_ENC_BUFFER_FORMAT::NV_ENC_BUFFER_FORMAT_NV12,
    )?;

    let output_buffer = nvenc.create_bitstream_buffer()?;
    let event = unsafe { CreateEventW(None, true, false, None)? };

    Ok(SurfaceSlot::new(shared, registered_resource, output_buffer, event))
}

impl<const N: usize> Drop for SharedSurfacePool<N> {
    fn drop(&mut self) {
        // Teardown order: unmap any still-mapped input, unregister the
        // encoder resource, release encoder mutex and surface, release
        // capture mutex and surface, discard handle.
        // (Surface/mutex release itself happens when `SurfaceSlot`'s
        // COM handles drop along with `self.ring`, right after this.)
        for slot in self.ring.slots() {
            if let Some(mapped) = slot.mapped_input() {
                let _ = self.nvenc.unmap_input_resource(mapped);
            }
            self.nvenc.unregister_resource(slot.registered_resource);
            self.nvenc.destroy_bitstream_buffer(slot.output_buffer);
            unsafe {
                let _ = windows::Win32::Foundation::CloseHandle(slot.event);
            }
        }
    }
}
