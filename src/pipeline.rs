//! Top-level pipeline session: ties the GPU devices, the converter, the
//! encoder, and the drain worker into one RAII handle exposing
//! create/submit/get_sequence_header/flush/drop.

use std::sync::Arc;

use windows::Win32::Graphics::Direct3D11::{ID3D11Texture2D, D3D11_BOX};

use crate::config::EncoderConfig;
use crate::encode::drain::FrameCallback;
use crate::encode::{Drain, EncoderSession};
use crate::error::{PipelineError, Result};
use crate::gpu::converter::Converter;
use crate::gpu::device::DevicePair;
use crate::gpu::texture::create_bgra_texture;
use crate::timestamp::calculate_timestamp;

/// Default slot ring size.
pub const DEFAULT_SLOTS: usize = 8;

/// Owns the whole GPU-to-encoder pipeline. Dropping it stops the drain,
/// then lets the encoder session and device pair release their own
/// handles in field order.
pub struct PipelineSession<const N: usize = DEFAULT_SLOTS> {
    devices: DevicePair,
    converter: Converter,
    bgra_staging: ID3D11Texture2D,
    encoder: Arc<EncoderSession<N>>,
    drain: Drain,
    config: EncoderConfig,
    frame_number: u64,
}

impl<const N: usize> PipelineSession<N> {
    /// Opens both devices, builds the converter and encoder, and starts
    /// the drain thread with `callback` installed before the first frame
    /// can possibly complete.
    pub fn create(config: EncoderConfig, callback: FrameCallback) -> Result<Self> {
        if !crate::encode::nvenc::is_available() {
            return Err(PipelineError::HardwareUnavailable(
                "nvEncodeAPI64.dll not found".into(),
            ));
        }

        let devices = DevicePair::open()?;
        if !devices.capture.has_video_processor_support() {
            return Err(PipelineError::HardwareUnavailable(
                "no D3D11 video processor on this adapter".into(),
            ));
        }

        let width = config.even_width();
        let height = config.even_height();

        let converter = Converter::new(
            &devices.capture.device,
            &devices.capture.context,
            width,
            height,
            config.fps,
        )?;

        let bgra_staging = create_bgra_texture(&devices.capture.device, width, height)?;

        let encoder = Arc::new(EncoderSession::<N>::open(
            &devices.capture.device,
            devices.capture.context.clone(),
            &devices.encoder.device,
            config.clone(),
        )?);

        let drain = Drain::spawn(
            Arc::clone(&encoder),
            config.frame_duration_100ns(),
            callback,
        );

        Ok(Self {
            devices,
            converter,
            bgra_staging,
            encoder,
            drain,
            config,
            frame_number: 0,
        })
    }

    /// Upload BGRA pixels, convert to NV12, and submit for encoding.
    /// Returns `false` for any non-fatal rejection.
    pub fn submit_bgra(&mut self, data: &[u8], row_pitch: u32) -> Result<bool> {
        let width = self.config.even_width();
        let height = self.config.even_height();

        unsafe {
            let dst_box = D3D11_BOX {
                left: 0,
                top: 0,
                front: 0,
                right: width,
                bottom: height,
                back: 1,
            };
            self.devices.capture.context.UpdateSubresource(
                &self.bgra_staging,
                0,
                Some(&dst_box),
                data.as_ptr().cast(),
                row_pitch,
                0,
            );
        }

        let nv12_frame = self.converter.convert(&self.bgra_staging)?;

        let timestamp = calculate_timestamp(self.frame_number, self.config.fps);
        self.frame_number += 1;

        self.encoder.submit(nv12_frame, timestamp)
    }

    pub fn get_sequence_header(&self) -> Result<Vec<u8>> {
        self.encoder.get_sequence_header()
    }

    /// Send end-of-stream and stop accepting new submissions; the drain
    /// keeps running until the ring empties naturally (see DESIGN.md's
    /// flush open-question decision).
    pub fn flush(&self) -> Result<()> {
        self.encoder.flush()
    }

    pub fn is_available() -> bool {
        crate::encode::nvenc::is_available()
    }
}

impl<const N: usize> Drop for PipelineSession<N> {
    fn drop(&mut self) {
        self.drain.shutdown(self.encoder.ring());
    }
}
