pub mod converter;
pub mod device;
pub mod texture;
