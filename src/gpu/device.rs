use windows::core::Interface;
use windows::Win32::Foundation::HMODULE;
use windows::Win32::Graphics::Direct3D::*;
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::*;

use crate::error::{PipelineError, Result};

/// A Direct3D11 device + immediate context, multithread-protected.
///
/// Two independent device contexts are opened on the same physical
/// adapter — one owned by capture, one by the encoder — so capture and
/// encode never serialize against a shared immediate context.
/// [`GpuDevice::new`] opens the default adapter; [`GpuDevice::on_adapter`]
/// opens a second device against a specific adapter so the pair shares
/// one physical GPU.
pub struct GpuDevice {
    pub device: ID3D11Device,
    pub context: ID3D11DeviceContext,
    pub dxgi_device: IDXGIDevice,
}

impl GpuDevice {
    /// Create a device on the default hardware adapter.
    pub fn new() -> Result<Self> {
        Self::create(None)
    }

    /// Create a device on a specific adapter, so it shares a physical GPU
    /// with another `GpuDevice`.
    pub fn on_adapter(adapter: &IDXGIAdapter) -> Result<Self> {
        Self::create(Some(adapter))
    }

    /// The adapter this device was created against, for opening a paired
    /// device with [`GpuDevice::on_adapter`].
    pub fn adapter(&self) -> Result<IDXGIAdapter> {
        Ok(unsafe { self.dxgi_device.GetAdapter()? })
    }

    fn create(adapter: Option<&IDXGIAdapter>) -> Result<Self> {
        let feature_levels = [D3D_FEATURE_LEVEL_11_1, D3D_FEATURE_LEVEL_11_0];
        let flags = D3D11_CREATE_DEVICE_BGRA_SUPPORT | D3D11_CREATE_DEVICE_VIDEO_SUPPORT;
        let driver_type = if adapter.is_some() {
            D3D_DRIVER_TYPE_UNKNOWN
        } else {
            D3D_DRIVER_TYPE_HARDWARE
        };

        let mut device = None;
        let mut context = None;

        unsafe {
            D3D11CreateDevice(
                adapter,
                driver_type,
                HMODULE::default(),
                flags,
                Some(&feature_levels),
                D3D11_SDK_VERSION,
                Some(&mut device),
                None,
                Some(&mut context),
            )?;
        }

        let device = device.ok_or(PipelineError::GpuDeviceCreation)?;
        let context = context.ok_or(PipelineError::GpuDeviceCreation)?;

        unsafe {
            let multithread: ID3D11Multithread = device.cast()?;
            let _ = multithread.SetMultithreadProtected(true);
        }

        let dxgi_device: IDXGIDevice = device.cast()?;

        Ok(Self {
            device,
            context,
            dxgi_device,
        })
    }

    /// Whether this device's adapter exposes the D3D11 video processor.
    /// Reported at init; fatal to the session if absent.
    pub fn has_video_processor_support(&self) -> bool {
        self.device.cast::<ID3D11VideoDevice>().is_ok()
    }
}

/// Opens the capture-side and encoder-side devices on the same physical
/// adapter. The capture device is opened first against the
/// default adapter; the encoder device is then opened explicitly against
/// that same adapter so both contexts share one GPU.
pub struct DevicePair {
    pub capture: GpuDevice,
    pub encoder: GpuDevice,
}

impl DevicePair {
    pub fn open() -> Result<Self> {
        let capture = GpuDevice::new()?;
        let adapter = capture.adapter()?;
        let encoder = GpuDevice::on_adapter(&adapter)?;
        Ok(Self { capture, encoder })
    }
}
