use thiserror::Error;

/// Errors surfaced by the GPU-to-encoder pipeline core.
///
/// Per-frame failures (mutex timeouts, map/encode failures) are not
/// represented here — they are absorbed locally and surfaced as `false`
/// return values plus rate-limited diagnostics. Only init-time and
/// teardown-time failures propagate as `Err`.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("failed to create GPU device")]
    GpuDeviceCreation,

    #[error("failed to create texture")]
    TextureCreation,

    #[error("hardware unavailable: {0}")]
    HardwareUnavailable(String),

    #[error("encoder rejected configuration: {0}")]
    ConfigRejected(String),

    #[error("windows API error: {0}")]
    Windows(#[from] windows::core::Error),

    #[error("failed to load NVENC library: {0}")]
    LibraryLoad(#[from] libloading::Error),

    #[error("converter error: {0}")]
    Convert(String),

    #[error("encode error: {0}")]
    Encode(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;
