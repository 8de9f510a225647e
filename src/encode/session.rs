//! Encoder Session: owns the NVENC handle, the slot ring, and the
//! submission path.

use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use windows::Win32::Graphics::Direct3D11::{ID3D11Device, ID3D11DeviceContext, ID3D11Texture2D};

use nvidia_video_codec_sdk::sys::nvEncodeAPI::{
    NV_ENC_BUFFER_FORMAT, NV_ENC_CODEC_CONFIG, NV_ENC_CONFIG, NV_ENC_CONFIG_HEVC,
    NV_ENC_INITIALIZE_PARAMS, NV_ENC_MULTI_PASS, NV_ENC_PARAMS_RC_MODE, NV_ENC_PIC_PARAMS,
    NV_ENC_PIC_STRUCT, NV_ENC_QP, NV_ENC_RC_PARAMS, NV_ENC_TUNING_INFO,
};

use crate::config::EncoderConfig;
use crate::diagnostics::RateLimited;
use crate::encode::nvenc::{NvencLibrary, CONFIG_VER, PIC_FLAG_EOS, PIC_FLAG_FORCEIDR};
use crate::error::{PipelineError, Result};
use crate::pool::ring::SlotRing;
use crate::pool::shared_pool::SharedSurfacePool;
use crate::pool::slot::{SurfaceSlot, KEY_CAPTURE_OWNS, KEY_ENCODER_OWNS};

pub struct EncoderSession<const N: usize> {
    nvenc: Arc<NvencLibrary>,
    pool: SharedSurfacePool<N>,
    capture_context: ID3D11DeviceContext,
    config: EncoderConfig,
    frame_number: AtomicU64,
    submit_lock: Mutex<()>,
    flushed: AtomicBool,
    full_diag: RateLimited,
    timeout_diag: RateLimited,
}

impl<const N: usize> EncoderSession<N> {
    pub fn open(
        capture_device: &ID3D11Device,
        capture_context: ID3D11DeviceContext,
        encoder_device: &ID3D11Device,
        config: EncoderConfig,
    ) -> Result<Self> {
        let nvenc = Arc::new(NvencLibrary::open(encoder_device)?);

        let mut hevc_config: NV_ENC_CONFIG_HEVC = unsafe { MaybeUninit::zeroed().assume_init() };
        hevc_config.idrPeriod = config.gop_length();
        // Fixed reference-window size; the driver's own default exceeds
        // this and would grow latency if left unset.
        hevc_config.maxNumRefFramesInDPB = 2;

        let mut codec_config: NV_ENC_CODEC_CONFIG = unsafe { MaybeUninit::zeroed().assume_init() };
        codec_config.hevcConfig = hevc_config;

        let mut rc_params: NV_ENC_RC_PARAMS = unsafe { MaybeUninit::zeroed().assume_init() };
        rc_params.rateControlMode = NV_ENC_PARAMS_RC_MODE::NV_ENC_PARAMS_RC_CONSTQP;
        rc_params.constQP = NV_ENC_QP {
            qpIntra: config.quality.qp_intra(),
            qpInterP: config.quality.qp_inter(),
            qpInterB: config.quality.qp_inter(),
        };
        // Temporal filter, adaptive quant, look-ahead and multi-pass all
        // add buffering latency; wired off explicitly rather than relying
        // on zero-init to keep matching the driver's defaults.
        rc_params.enableAQ = 0;
        rc_params.enableTemporalAQ = 0;
        rc_params.enableLookahead = 0;
        rc_params.lookaheadDepth = 0;
        rc_params.multiPass = NV_ENC_MULTI_PASS::NV_ENC_MULTI_PASS_DISABLED;

        let mut encode_config: NV_ENC_CONFIG = unsafe { MaybeUninit::zeroed().assume_init() };
        encode_config.version = CONFIG_VER;
        encode_config.gopLength = config.gop_length();
        encode_config.frameIntervalP = 1;
        encode_config.rcParams = rc_params;
        encode_config.encodeCodecConfig = codec_config;

        let mut init_params: NV_ENC_INITIALIZE_PARAMS = unsafe { MaybeUninit::zeroed().assume_init() };
        init_params.encodeGUID = NvencLibrary::hevc_codec_guid();
        init_params.presetGUID = NvencLibrary::p1_preset_guid();
        init_params.tuningInfo = NV_ENC_TUNING_INFO::NV_ENC_TUNING_INFO_ULTRA_LOW_LATENCY;
        init_params.encodeWidth = config.even_width();
        init_params.encodeHeight = config.even_height();
        init_params.darWidth = config.even_width();
        init_params.darHeight = config.even_height();
        init_params.frameRateNum = config.fps;
        init_params.frameRateDen = 1;
        init_params.enablePTD = 1;
        init_params.maxEncodeWidth = config.even_width();
        init_params.maxEncodeHeight = config.even_height();
        init_params.encodeConfig = &mut encode_config;
        init_params.enableEncodeAsync = 1;

        if nvenc.initialize_encoder(&mut init_params).is_err() {
            // Async failure is retried once in synchronous mode at the
            // encoder-negotiation level, but the drain worker this
            // session owns only has a contract for async completion
            // delivery — refuse rather than guess at an in-line sync
            // drain (see DESIGN.md's open-question decision).
            init_params.enableEncodeAsync = 0;
            nvenc.initialize_encoder(&mut init_params)?;
            return Err(PipelineError::ConfigRejected(
                "device does not support asynchronous encoding".into(),
            ));
        }

        let pool = SharedSurfacePool::<N>::new(
            capture_device,
            encoder_device,
            Arc::clone(&nvenc),
            config.even_width(),
            config.even_height(),
        )?;

        Ok(Self {
            nvenc,
            pool,
            capture_context,
            config,
            frame_number: AtomicU64::new(0),
            submit_lock: Mutex::new(()),
            flushed: AtomicBool::new(false),
            full_diag: RateLimited::new("pipeline-full"),
            timeout_diag: RateLimited::new("mutex-timeout"),
        })
    }

    pub fn nvenc(&self) -> &Arc<NvencLibrary> {
        &self.nvenc
    }

    pub fn ring(&self) -> &SlotRing<SurfaceSlot, N> {
        &self.pool.ring
    }

    pub fn config(&self) -> &EncoderConfig {
        &self.config
    }

    /// Submit one NV12 frame for encoding. Returns `true` if
    /// accepted, `false` for any non-fatal rejection (pipeline full,
    /// mutex timeout, map/encode failure) — never `Err` for those.
    pub fn submit(&self, nv12_source: &ID3D11Texture2D, timestamp: i64) -> Result<bool> {
        if self.flushed.load(Ordering::Acquire) {
            // Once flushed, the session stops accepting submissions; the
            // drain keeps running to empty what's already in flight (see
            // DESIGN.md's open-question decision).
            return Ok(false);
        }

        let _guard = self.submit_lock.lock();
        let ring = self.ring();

        if ring.is_full() {
            self.full_diag.record();
            return Ok(false);
        }

        let slot = ring.submit_slot();

        if !slot.acquire_capture(KEY_CAPTURE_OWNS)? {
            self.timeout_diag.record();
            return Ok(false);
        }

        unsafe {
            self.capture_context
                .CopyResource(&slot.capture_view, nv12_source);
        }

        slot.release_capture(KEY_ENCODER_OWNS)?;

        if !slot.acquire_encoder(KEY_ENCODER_OWNS)? {
            // Recovery: hand ownership back to the capture side.
            slot.release_capture(KEY_CAPTURE_OWNS)?;
            self.timeout_diag.record();
            return Ok(false);
        }

        let mapped = match self.nvenc.map_input_resource(slot.registered_resource) {
            Ok(mapped) => mapped,
            Err(_) => {
                slot.release_encoder(KEY_CAPTURE_OWNS)?;
                return Ok(false);
            }
        };

        let frame_number = self.frame_number.fetch_add(1, Ordering::AcqRel);

        let mut pic_params: NV_ENC_PIC_PARAMS = unsafe { MaybeUninit::zeroed().assume_init() };
        pic_params.inputBuffer = mapped;
        pic_params.bufferFmt = NV_ENC_BUFFER_FORMAT::NV_ENC_BUFFER_FORMAT_NV12;
        pic_params.pictureStruct = NV_ENC_PIC_STRUCT::NV_ENC_PIC_STRUCT_FRAME;
        pic_params.inputWidth = self.config.even_width();
        pic_params.inputHeight = self.config.even_height();
        pic_params.inputPitch = 0;
        pic_params.outputBitstream = slot.output_buffer;
        pic_params.completionEvent = slot.event.0 as *mut std::ffi::c_void;
        pic_params.inputTimeStamp = timestamp as u64;
        pic_params.inputDuration = self.config.frame_duration_100ns() as u32;
        if self.config.is_forced_idr(frame_number) {
            pic_params.encodePicFlags = PIC_FLAG_FORCEIDR;
        }

        if let Err(e) = self.nvenc.encode_picture(&mut pic_params) {
            let _ = self.nvenc.unmap_input_resource(mapped);
            slot.release_encoder(KEY_CAPTURE_OWNS)?;
            tracing::debug!(error = %e, "encode_picture rejected frame");
            return Ok(false);
        }

        slot.mapped_input_store(mapped);
        slot.timestamp_store(timestamp);
        ring.advance_submit();
        Ok(true)
    }

    pub fn get_sequence_header(&self) -> Result<Vec<u8>> {
        self.nvenc.sequence_params()
    }

    /// Send an end-of-stream picture; the drain delivers any remaining
    /// bitstream naturally. No further submissions are accepted after
    /// this call.
    pub fn flush(&self) -> Result<()> {
        self.flushed.store(true, Ordering::Release);
        let mut pic_params: NV_ENC_PIC_PARAMS = unsafe { MaybeUninit::zeroed().assume_init() };
        pic_params.encodePicFlags = PIC_FLAG_EOS;
        self.nvenc.encode_picture(&mut pic_params).map_err(|e| {
            PipelineError::Encode(format!("flush failed: {e}"))
        })
    }
}
