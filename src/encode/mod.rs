pub mod drain;
pub mod nvenc;
pub mod session;

pub use drain::{Drain, EncodedFrame, FrameCallback};
pub use session::EncoderSession;
