pub mod ring;
pub mod shared_pool;
pub mod slot;

pub use ring::SlotRing;
pub use shared_pool::SharedSurfacePool;
pub use slot::{SurfaceSlot, KEY_CAPTURE_OWNS, KEY_ENCODER_OWNS};
