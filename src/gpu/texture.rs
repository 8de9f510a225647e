use windows::core::Interface;
use windows::Win32::Graphics::Direct3D11::*;
use windows::Win32::Graphics::Dxgi::Common::*;
use windows::Win32::Graphics::Dxgi::*;

use crate::error::{PipelineError, Result};

/// Create an NV12 texture (video processor output / encoder input), not
/// shared across devices.
pub fn create_nv12_texture(
    device: &ID3D11Device,
    width: u32,
    height: u32,
) -> Result<ID3D11Texture2D> {
    create_nv12_texture_with_misc(device, width, height, 0)
}

/// Create a BGRA texture (screen capture output / color conversion input),
/// not shared across devices.
pub fn create_bgra_texture(
    device: &ID3D11Device,
    width: u32,
    height: u32,
) -> Result<ID3D11Texture2D> {
    let desc = D3D11_TEXTURE2D_DESC {
        Width: width,
        Height: height,
        MipLevels: 1,
        ArraySize: 1,
        Format: DXGI_FORMAT_B8G8R8A8_UNORM,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Usage: D3D11_USAGE_DEFAULT,
        BindFlags: D3D11_BIND_RENDER_TARGET.0 as u32,
        CPUAccessFlags: 0,
        MiscFlags: 0,
    };

    let mut texture = None;
    unsafe {
        device.CreateTexture2D(&desc, None, Some(&mut texture))?;
    }
    texture.ok_or(PipelineError::TextureCreation)
}

fn create_nv12_texture_with_misc(
    device: &ID3D11Device,
    width: u32,
    height: u32,
    misc_flags: u32,
) -> Result<ID3D11Texture2D> {
    let desc = D3D11_TEXTURE2D_DESC {
        Width: width,
        Height: height,
        MipLevels: 1,
        ArraySize: 1,
        Format: DXGI_FORMAT_NV12,
        SampleDesc: DXGI_SAMPLE_DESC {
            Count: 1,
            Quality: 0,
        },
        Usage: D3D11_USAGE_DEFAULT,
        BindFlags: (D3D11_BIND_RENDER_TARGET.0 | D3D11_BIND_VIDEO_ENCODER.0) as u32,
        CPUAccessFlags: 0,
        MiscFlags: misc_flags,
    };

    let mut texture = None;
    unsafe {
        device.CreateTexture2D(&desc, None, Some(&mut texture))?;
    }
    texture.ok_or(PipelineError::TextureCreation)
}

/// One allocation backing both sides of the capture→encode handoff: an
/// NV12 texture created with `D3D11_RESOURCE_MISC_SHARED_KEYEDMUTEX` on
/// the capture-side device, plus the same allocation opened on the
/// encoder-side device via a shared NT handle. Both handles reference
/// one physical allocation; the keyed mutex is the only valid
/// synchronization between them.
pub struct SharedNv12Texture {
    pub capture_view: ID3D11Texture2D,
    pub capture_mutex: IDXGIKeyedMutex,
    pub encoder_view: ID3D11Texture2D,
    pub encoder_mutex: IDXGIKeyedMutex,
}

impl SharedNv12Texture {
    pub fn create(
        capture_device: &ID3D11Device,
        encoder_device: &ID3D11Device,
        width: u32,
        height: u32,
    ) -> Result<Self> {
        let capture_view = create_nv12_texture_with_misc(
            capture_device,
            width,
            height,
            D3D11_RESOURCE_MISC_SHARED_KEYEDMUTEX.0 as u32,
        )?;

        let shared_handle = unsafe {
            let resource: IDXGIResource1 = capture_view.cast()?;
            resource.CreateSharedHandle(
                None,
                (DXGI_SHARED_RESOURCE_READ | DXGI_SHARED_RESOURCE_WRITE).0,
                None,
            )?
        };

        let encoder_view: ID3D11Texture2D = unsafe {
            let device1: ID3D11Device1 = encoder_device.cast()?;
            let view = device1.OpenSharedResource1(shared_handle)?;
            let _ = windows::Win32::Foundation::CloseHandle(shared_handle);
            view
        };

        let capture_mutex: IDXGIKeyedMutex = capture_view.cast()?;
        let encoder_mutex: IDXGIKeyedMutex = encoder_view.cast()?;

        Ok(Self {
            capture_view,
            capture_mutex,
            encoder_view,
            encoder_mutex,
        })
    }
}
