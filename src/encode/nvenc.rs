//! Low-level NVENC function-list FFI: library load, session open/close,
//! and the register/map/encode/lock call shapes.
//!
//! Only the raw `sys::nvEncodeAPI` struct/GUID/constant definitions from
//! `nvidia-video-codec-sdk` are used here — its safe `Session`/`Buffer`
//! wrappers assume a CUDA device pointer, which this crate's D3D11
//! resources are not.

use std::ffi::c_void;
use std::mem::MaybeUninit;
use std::ptr::NonNull;

use libloading::Library;
use windows::core::Interface;
use nvidia_video_codec_sdk::sys::nvEncodeAPI::{
    GUID, NV_ENCODE_API_FUNCTION_LIST, NV_ENCODE_API_FUNCTION_LIST_VER, NV_ENC_BUFFER_FORMAT,
    NV_ENC_CODEC_HEVC_GUID, NV_ENC_CONFIG_VER, NV_ENC_CREATE_BITSTREAM_BUFFER,
    NV_ENC_CREATE_BITSTREAM_BUFFER_VER, NV_ENC_DEVICE_TYPE, NV_ENC_INITIALIZE_PARAMS,
    NV_ENC_INITIALIZE_PARAMS_VER, NV_ENC_INPUT_PTR, NV_ENC_INPUT_RESOURCE_TYPE,
    NV_ENC_LOCK_BITSTREAM, NV_ENC_LOCK_BITSTREAM_VER, NV_ENC_MAP_INPUT_RESOURCE,
    NV_ENC_MAP_INPUT_RESOURCE_VER, NV_ENC_OPEN_ENCODE_SESSION_EX_PARAMS,
    NV_ENC_OPEN_ENCODE_SESSION_EX_PARAMS_VER, NV_ENC_OUTPUT_PTR, NV_ENC_PIC_PARAMS,
    NV_ENC_PIC_PARAMS_VER, NV_ENC_PRESET_P1_GUID, NV_ENC_REGISTERED_PTR, NV_ENC_REGISTER_RESOURCE,
    NV_ENC_REGISTER_RESOURCE_VER, NV_ENC_SEQUENCE_PARAM_PAYLOAD, NV_ENC_SEQUENCE_PARAM_PAYLOAD_VER,
};

use crate::error::{PipelineError, Result};

/// `NV_ENC_PIC_FLAG_FORCEIDR` / `NV_ENC_PIC_FLAG_EOS` bit values from the
/// NVENC API — forces the next picture to IDR, or marks an end-of-stream
/// picture that carries no pixel data.
pub const PIC_FLAG_FORCEIDR: u32 = 0x1;
pub const PIC_FLAG_EOS: u32 = 0x4;

/// `NVENCSTATUS::NV_ENC_ERR_NEED_MORE_INPUT` — returned by
/// `nvEncEncodePicture` while the encoder is still buffering reference
/// frames before it has anything to output. Not a failure: the caller
/// should keep submitting.
const STATUS_NEED_MORE_INPUT: i32 = 17;

type CreateInstanceFn =
    unsafe extern "C" fn(*mut NV_ENCODE_API_FUNCTION_LIST) -> std::os::raw::c_int;

/// Loaded NVENC entry points plus the open session handle they operate
/// on. Dropping this closes the session.
pub struct NvencLibrary {
    _library: Library,
    functions: NV_ENCODE_API_FUNCTION_LIST,
    session: NonNull<c_void>,
}

unsafe impl Send for NvencLibrary {}
unsafe impl Sync for NvencLibrary {}

impl NvencLibrary {
    /// Load `nvEncodeAPI64.dll`, open a session against `device` (a
    /// D3D11 device), and return the loaded function table + session
    /// handle.
    pub fn open(device: &windows::Win32::Graphics::Direct3D11::ID3D11Device) -> Result<Self> {
        let library = unsafe { Library::new("nvEncodeAPI64.dll")? };

        let create_instance: libloading::Symbol<CreateInstanceFn> =
            unsafe { library.get(b"NvEncodeAPICreateInstance\0")? };

        let mut functions: NV_ENCODE_API_FUNCTION_LIST = unsafe { MaybeUninit::zeroed().assume_init() };
        functions.version = NV_ENCODE_API_FUNCTION_LIST_VER;

        let status = unsafe { create_instance(&mut functions) };
        if status != 0 {
            return Err(PipelineError::HardwareUnavailable(format!(
                "NvEncodeAPICreateInstance failed: {status}"
            )));
        }

        let open_fn = functions
            .nvEncOpenEncodeSessionEx
            .ok_or_else(|| PipelineError::HardwareUnavailable("missing entry point".into()))?;

        let mut open_params: NV_ENC_OPEN_ENCODE_SESSION_EX_PARAMS =
            unsafe { MaybeUninit::zeroed().assume_init() };
        open_params.version = NV_ENC_OPEN_ENCODE_SESSION_EX_PARAMS_VER;
        open_params.deviceType = NV_ENC_DEVICE_TYPE::NV_ENC_DEVICE_TYPE_DIRECTX;
        open_params.device = device.as_raw() as *mut c_void;
        open_params.apiVersion = nvidia_video_codec_sdk::sys::nvEncodeAPI::NVENCAPI_VERSION;

        let mut session_ptr: *mut c_void = std::ptr::null_mut();
        let status = unsafe { (open_fn)(&mut open_params, &mut session_ptr) };
        if status != 0 {
            return Err(PipelineError::HardwareUnavailable(format!(
                "nvEncOpenEncodeSessionEx failed: {status}"
            )));
        }
        let session = NonNull::new(session_ptr)
            .ok_or_else(|| PipelineError::HardwareUnavailable("null session".into()))?;

        Ok(Self {
            _library: library,
            functions,
            session,
        })
    }

    pub fn hevc_codec_guid() -> GUID {
        NV_ENC_CODEC_HEVC_GUID
    }

    pub fn p1_preset_guid() -> GUID {
        NV_ENC_PRESET_P1_GUID
    }

    pub fn session(&self) -> NonNull<c_void> {
        self.session
    }

    pub fn initialize_encoder(&self, params: &mut NV_ENC_INITIALIZE_PARAMS) -> Result<()> {
        params.version = NV_ENC_INITIALIZE_PARAMS_VER;
        let f = self
            .functions
            .nvEncInitializeEncoder
            .ok_or_else(|| PipelineError::Encode("missing nvEncInitializeEncoder".into()))?;
        let status = unsafe { f(self.session.as_ptr(), params) };
        check(status, "nvEncInitializeEncoder")
    }

    pub fn register_resource(
        &self,
        resource: *mut c_void,
        resource_type: NV_ENC_INPUT_RESOURCE_TYPE,
        width: u32,
        height: u32,
        buffer_format: NV_ENC_BUFFER_FORMAT,
    ) -> Result<NV_ENC_REGISTERED_PTR> {
        let mut params: NV_ENC_REGISTER_RESOURCE = unsafe { MaybeUninit::zeroed().assume_init() };
        params.version = NV_ENC_REGISTER_RESOURCE_VER;
        params.resourceType = resource_type;
        params.resourceToRegister = resource;
        params.width = width;
        params.height = height;
        params.bufferFormat = buffer_format;

        let f = self
            .functions
            .nvEncRegisterResource
            .ok_or_else(|| PipelineError::Encode("missing nvEncRegisterResource".into()))?;
        let status = unsafe { f(self.session.as_ptr(), &mut params) };
        check(status, "nvEncRegisterResource")?;
        Ok(params.registeredResource)
    }

    pub fn unregister_resource(&self, resource: NV_ENC_REGISTERED_PTR) {
        if let Some(f) = self.functions.nvEncUnregisterResource {
            unsafe {
                let _ = f(self.session.as_ptr(), resource);
            }
        }
    }

    pub fn map_input_resource(&self, registered: NV_ENC_REGISTERED_PTR) -> Result<NV_ENC_INPUT_PTR> {
        let mut params: NV_ENC_MAP_INPUT_RESOURCE = unsafe { MaybeUninit::zeroed().assume_init() };
        params.version = NV_ENC_MAP_INPUT_RESOURCE_VER;
        params.registeredResource = registered;

        let f = self
            .functions
            .nvEncMapInputResource
            .ok_or_else(|| PipelineError::Encode("missing nvEncMapInputResource".into()))?;
        let status = unsafe { f(self.session.as_ptr(), &mut params) };
        check(status, "nvEncMapInputResource")?;
        Ok(params.mappedResource)
    }

    pub fn unmap_input_resource(&self, mapped: NV_ENC_INPUT_PTR) -> Result<()> {
        let f = self
            .functions
            .nvEncUnmapInputResource
            .ok_or_else(|| PipelineError::Encode("missing nvEncUnmapInputResource".into()))?;
        let status = unsafe { f(self.session.as_ptr(), mapped) };
        check(status, "nvEncUnmapInputResource")
    }

    pub fn encode_picture(&self, params: &mut NV_ENC_PIC_PARAMS) -> Result<()> {
        params.version = NV_ENC_PIC_PARAMS_VER;
        let f = self
            .functions
            .nvEncEncodePicture
            .ok_or_else(|| PipelineError::Encode("missing nvEncEncodePicture".into()))?;
        let status = unsafe { f(self.session.as_ptr(), params) };
        if status == STATUS_NEED_MORE_INPUT {
            return Ok(());
        }
        check(status, "nvEncEncodePicture")
    }

    pub fn lock_bitstream(&self, output: NV_ENC_OUTPUT_PTR) -> Result<NV_ENC_LOCK_BITSTREAM> {
        let mut params: NV_ENC_LOCK_BITSTREAM = unsafe { MaybeUninit::zeroed().assume_init() };
        params.version = NV_ENC_LOCK_BITSTREAM_VER;
        params.outputBitstream = output;

        let f = self
            .functions
            .nvEncLockBitstream
            .ok_or_else(|| PipelineError::Encode("missing nvEncLockBitstream".into()))?;
        let status = unsafe { f(self.session.as_ptr(), &mut params) };
        check(status, "nvEncLockBitstream")?;
        Ok(params)
    }

    pub fn unlock_bitstream(&self, output: NV_ENC_OUTPUT_PTR) -> Result<()> {
        let f = self
            .functions
            .nvEncUnlockBitstream
            .ok_or_else(|| PipelineError::Encode("missing nvEncUnlockBitstream".into()))?;
        let status = unsafe { f(self.session.as_ptr(), output) };
        check(status, "nvEncUnlockBitstream")
    }

    pub fn sequence_params(&self) -> Result<Vec<u8>> {
        let mut buffer = vec![0u8; 1024];
        let mut bytes_written: u32 = 0;
        let mut params: NV_ENC_SEQUENCE_PARAM_PAYLOAD = unsafe { MaybeUninit::zeroed().assume_init() };
        params.version = NV_ENC_SEQUENCE_PARAM_PAYLOAD_VER;
        params.inBufferSize = buffer.len() as u32;
        params.spsppsBuffer = buffer.as_mut_ptr().cast();
        params.outSPSPPSPayloadSize = &mut bytes_written;

        let f = self
            .functions
            .nvEncGetSequenceParams
            .ok_or_else(|| PipelineError::Encode("missing nvEncGetSequenceParams".into()))?;
        let status = unsafe { f(self.session.as_ptr(), &mut params) };
        check(status, "nvEncGetSequenceParams")?;

        buffer.truncate(bytes_written as usize);
        Ok(buffer)
    }

    /// Allocate one output bitstream buffer (one per ring slot).
    pub fn create_bitstream_buffer(&self) -> Result<NV_ENC_OUTPUT_PTR> {
        let mut params: NV_ENC_CREATE_BITSTREAM_BUFFER =
            unsafe { MaybeUninit::zeroed().assume_init() };
        params.version = NV_ENC_CREATE_BITSTREAM_BUFFER_VER;

        let f = self
            .functions
            .nvEncCreateBitstreamBuffer
            .ok_or_else(|| PipelineError::Encode("missing nvEncCreateBitstreamBuffer".into()))?;
        let status = unsafe { f(self.session.as_ptr(), &mut params) };
        check(status, "nvEncCreateBitstreamBuffer")?;
        Ok(params.bitstreamBuffer)
    }

    pub fn destroy_bitstream_buffer(&self, buffer: NV_ENC_OUTPUT_PTR) {
        if let Some(f) = self.functions.nvEncDestroyBitstreamBuffer {
            unsafe {
                let _ = f(self.session.as_ptr(), buffer);
            }
        }
    }
}

/// Probe for the NVENC library without opening a session.
pub fn is_available() -> bool {
    unsafe { Library::new("nvEncodeAPI64.dll").is_ok() }
}

impl Drop for NvencLibrary {
    fn drop(&mut self) {
        if let Some(f) = self.functions.nvEncDestroyEncoder {
            unsafe {
                let _ = f(self.session.as_ptr());
            }
        }
    }
}

fn check(status: i32, call: &'static str) -> Result<()> {
    if status == 0 {
        Ok(())
    } else {
        Err(PipelineError::Encode(format!("{call} failed: status {status}")))
    }
}

pub use nvidia_video_codec_sdk::sys::nvEncodeAPI::{
    NV_ENC_BUFFER_FORMAT as BufferFormat, NV_ENC_CONFIG as EncodeConfig,
    NV_ENC_INPUT_RESOURCE_TYPE as InputResourceType, NV_ENC_PARAMS_RC_MODE as RcMode,
    NV_ENC_PIC_TYPE as PicType,
};

pub const CONFIG_VER: u32 = NV_ENC_CONFIG_VER;
