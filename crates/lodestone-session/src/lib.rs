pub mod channel;
pub mod connection;
pub mod error;
pub mod handshake;
pub mod session;

pub use channel::{ChannelManager, SessionChannels};
pub use connection::{Connection, FrameReader, FrameWriter};
pub use error::SessionError;
pub use handshake::{login, status_ping, LoginCrypto, StatusPing};
pub use session::{Session, SessionHandle, SessionHandler, WorldSink};
