//! GPU-to-hardware-encoder pipeline core for a low-latency HEVC screen
//! recorder: dual D3D11 devices, a cross-device shared NV12 ring, and an
//! NVENC session drained on its own thread.

pub mod config;
pub mod diagnostics;
pub mod encode;
pub mod error;
pub mod gpu;
pub mod pipeline;
pub mod pool;
pub mod timestamp;

pub use config::{EncoderConfig, QualityPreset, DEFAULT_RING_SIZE, MIN_RING_SIZE};
pub use encode::{EncodedFrame, FrameCallback};
pub use error::{PipelineError, Result};
pub use pipeline::{PipelineSession, DEFAULT_SLOTS};
