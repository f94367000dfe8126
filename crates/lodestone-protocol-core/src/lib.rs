pub mod buffer;
pub mod framing;
pub mod registry;
pub mod state;
pub mod version;

pub use buffer::*;
pub use framing::*;
pub use registry::*;
pub use state::*;
pub use version::*;
