pub mod decode;
pub mod encode;
pub mod packets;

pub use decode::{default_registry, register_all};
pub use packets::*;
