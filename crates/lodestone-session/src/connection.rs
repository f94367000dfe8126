use crate::error::SessionError;
use aes::cipher::{BlockEncrypt, KeyInit};
use aes::Aes128;
use bytes::BytesMut;
use lodestone_protocol_core::{
    ConnectionStateMachine, LengthFramer, PacketRegistry, Version,
};
use lodestone_protocol_packets::Packet;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

/// Manual AES-128-CFB8 cipher that supports streaming (byte-at-a-time).
/// The protocol requires cipher state to carry across every
/// encrypt/decrypt call on the stream; key == IV == shared secret.
struct Cfb8Cipher {
    cipher: Aes128,
    iv: [u8; 16],
}

impl Cfb8Cipher {
    fn new(key: &[u8; 16]) -> Self {
        Self {
            cipher: Aes128::new(key.into()),
            iv: *key,
        }
    }

    fn encrypt(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            let mut block = aes::Block::from(self.iv);
            self.cipher.encrypt_block(&mut block);
            *byte ^= block[0];
            self.iv.copy_within(1.., 0);
            self.iv[15] = *byte;
        }
    }

    fn decrypt(&mut self, data: &mut [u8]) {
        for byte in data.iter_mut() {
            let mut block = aes::Block::from(self.iv);
            self.cipher.encrypt_block(&mut block);
            let ciphertext = *byte;
            *byte ^= block[0];
            self.iv.copy_within(1.., 0);
            self.iv[15] = ciphertext;
        }
    }
}

/// Inbound half: socket bytes through the optional cipher into the framer.
pub struct FrameReader<R> {
    stream: R,
    framer: LengthFramer,
    decryptor: Option<Cfb8Cipher>,
    read_timeout: Duration,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(stream: R, read_timeout: Duration) -> Self {
        Self {
            stream,
            framer: LengthFramer::new(),
            decryptor: None,
            read_timeout,
        }
    }

    pub fn enable_compression(&mut self, threshold: i32) {
        self.framer.enable_compression(threshold);
    }

    pub fn enable_encryption(&mut self, shared_secret: &[u8; 16]) {
        self.decryptor = Some(Cfb8Cipher::new(shared_secret));
    }

    /// Pull the next complete frame, reading from the socket as needed.
    /// An idle socket trips the read timeout and tears the connection down.
    pub async fn read_frame(&mut self, max_len: usize) -> Result<BytesMut, SessionError> {
        loop {
            if let Some(frame) = self.framer.next_frame(max_len)? {
                return Ok(frame);
            }
            let mut tmp = [0u8; 4096];
            let n = timeout(self.read_timeout, self.stream.read(&mut tmp))
                .await
                .map_err(|_| SessionError::Timeout)??;
            if n == 0 {
                return Err(SessionError::Closed);
            }
            let data = &mut tmp[..n];
            if let Some(decryptor) = &mut self.decryptor {
                decryptor.decrypt(data);
            }
            self.framer.feed(data);
        }
    }
}

/// Outbound half: payloads through the framer and optional cipher onto the
/// socket. Only ever driven by one caller at a time; concurrent senders
/// queue behind the session's writer task.
pub struct FrameWriter<W> {
    stream: W,
    framer: LengthFramer,
    encryptor: Option<Cfb8Cipher>,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(stream: W) -> Self {
        Self {
            stream,
            framer: LengthFramer::new(),
            encryptor: None,
        }
    }

    pub fn enable_compression(&mut self, threshold: i32) {
        self.framer.enable_compression(threshold);
    }

    pub fn enable_encryption(&mut self, shared_secret: &[u8; 16]) {
        self.encryptor = Some(Cfb8Cipher::new(shared_secret));
    }

    pub async fn write_frame(&mut self, payload: &[u8]) -> Result<(), SessionError> {
        let mut frame = self.framer.encode_frame(payload);
        if let Some(encryptor) = &mut self.encryptor {
            encryptor.encrypt(&mut frame);
        }
        self.stream.write_all(&frame).await?;
        Ok(())
    }
}

/// One protocol connection: framed reader/writer halves plus the state
/// machine, negotiated version and packet registry shared with the rest of
/// the session. Used directly for the sequential pre-play exchanges, then
/// split into tasks once play starts.
pub struct Connection<S> {
    pub reader: FrameReader<ReadHalf<S>>,
    pub writer: FrameWriter<WriteHalf<S>>,
    pub state: Arc<ConnectionStateMachine>,
    pub version: Arc<Version>,
    pub registry: Arc<PacketRegistry<Packet>>,
}

impl Connection<TcpStream> {
    pub async fn connect(
        address: &str,
        port: u16,
        version: Arc<Version>,
        registry: Arc<PacketRegistry<Packet>>,
        read_timeout: Duration,
    ) -> Result<Self, SessionError> {
        let stream = TcpStream::connect((address, port)).await?;
        stream.set_nodelay(true)?;
        debug!("connected to {}:{} speaking {}", address, port, version);
        Ok(Self::new(stream, version, registry, read_timeout))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Connection<S> {
    pub fn new(
        stream: S,
        version: Arc<Version>,
        registry: Arc<PacketRegistry<Packet>>,
        read_timeout: Duration,
    ) -> Self {
        let (read_half, write_half) = tokio::io::split(stream);
        Self {
            reader: FrameReader::new(read_half, read_timeout),
            writer: FrameWriter::new(write_half),
            state: Arc::new(ConnectionStateMachine::new()),
            version,
            registry,
        }
    }

    /// Enable zlib compression in both directions. Called when the server
    /// negotiates a threshold during login.
    pub fn enable_compression(&mut self, threshold: i32) {
        self.reader.enable_compression(threshold);
        self.writer.enable_compression(threshold);
    }

    /// Enable AES-CFB8 stream encryption in both directions.
    pub fn enable_encryption(&mut self, shared_secret: &[u8; 16]) {
        self.reader.enable_encryption(shared_secret);
        self.writer.enable_encryption(shared_secret);
    }

    /// Read and decode the next packet for the current state. Unknown ids
    /// are dropped and the read continues; malformed bodies are fatal.
    pub async fn read_packet(&mut self) -> Result<Packet, SessionError> {
        loop {
            let state = self.state.current();
            let frame = self.reader.read_frame(state.max_frame_len()).await?;
            if frame.is_empty() {
                trace!("no-op frame");
                continue;
            }
            match self
                .registry
                .decode(state, self.version.version_id, frame)
            {
                Ok(packet) => return Ok(packet),
                Err(error) if error.is_recoverable() => {
                    debug!("{}, dropping frame", error);
                }
                Err(error) => {
                    self.state.force_disconnect();
                    return Err(SessionError::Protocol(error.to_string()));
                }
            }
        }
    }

    /// Encode and write one packet, gated on the packet's legal state.
    /// A wrong-state send fails before any bytes reach the socket.
    pub async fn send(&mut self, packet: &Packet) -> Result<(), SessionError> {
        self.state.expect(packet.legal_state())?;
        let payload = packet.encode(self.version.version_id).map_err(|e| {
            SessionError::Protocol(format!("cannot encode {}: {}", packet.name(), e))
        })?;
        self.writer.write_frame(&payload).await
    }

    /// Split into the halves the session tasks take over.
    pub fn into_split(
        self,
    ) -> (
        FrameReader<ReadHalf<S>>,
        FrameWriter<WriteHalf<S>>,
        Arc<ConnectionStateMachine>,
        Arc<Version>,
        Arc<PacketRegistry<Packet>>,
    ) {
        (self.reader, self.writer, self.state, self.version, self.registry)
    }
}
