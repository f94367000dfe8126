use crate::channel::ChannelManager;
use crate::connection::Connection;
use crate::error::SessionError;
use lodestone_protocol_core::ProtocolState;
use lodestone_protocol_packets::Packet;
use lodestone_types::GameProfile;
use rand::RngCore;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Opaque login crypto collaborator. The session core never inspects key
/// material; sealing the shared secret and verifying server signatures are
/// somebody else's problem.
pub trait LoginCrypto: Send + Sync {
    /// Seal `data` for the server. `public_key` is the key delivered in
    /// the encryption request.
    fn sign(&self, public_key: &[u8], data: &[u8]) -> Vec<u8>;
    /// Verify a server-provided signature over `data`.
    fn verify(&self, data: &[u8], signature: &[u8]) -> bool;
}

/// Result of a server list ping.
#[derive(Debug)]
pub struct StatusPing {
    pub json: String,
    pub latency: Duration,
}

/// Run the handshake → status exchange on a fresh connection. The server
/// closes after the pong, so the connection ends Disconnected.
pub async fn status_ping<S: AsyncRead + AsyncWrite + Unpin>(
    conn: &mut Connection<S>,
    address: &str,
    port: u16,
) -> Result<StatusPing, SessionError> {
    conn.send(&Packet::Handshake {
        protocol_id: conn.version.protocol_id,
        server_address: address.to_string(),
        server_port: port,
        next_state: 1,
    })
    .await?;
    conn.state.transition(ProtocolState::Status)?;
    conn.send(&Packet::StatusRequest).await?;

    let mut json = None;
    let mut ping_payload = 0;
    let mut pinged_at = Instant::now();
    loop {
        match conn.read_packet().await? {
            Packet::StatusResponse { json: body } => {
                json = Some(body);
                ping_payload = rand::random();
                pinged_at = Instant::now();
                conn.send(&Packet::Ping {
                    payload: ping_payload,
                })
                .await?;
            }
            Packet::Pong { payload } => {
                let latency = pinged_at.elapsed();
                if payload != ping_payload {
                    warn!("pong payload mismatch: {} != {}", payload, ping_payload);
                }
                let Some(json) = json else {
                    conn.state.force_disconnect();
                    return Err(SessionError::Protocol("pong before status response".into()));
                };
                // One status exchange per connection; the server hangs up.
                conn.state.transition(ProtocolState::Disconnected)?;
                return Ok(StatusPing { json, latency });
            }
            other => {
                debug!("ignoring {} during status", other.name());
            }
        }
    }
}

/// Drive handshake → login until the server reports success, negotiating
/// compression and encryption along the way. Returns the authenticated
/// profile with the connection in play state.
pub async fn login<S: AsyncRead + AsyncWrite + Unpin>(
    conn: &mut Connection<S>,
    address: &str,
    port: u16,
    username: &str,
    uuid: Option<Uuid>,
    crypto: &dyn LoginCrypto,
    login_channels: &mut ChannelManager,
) -> Result<GameProfile, SessionError> {
    conn.send(&Packet::Handshake {
        protocol_id: conn.version.protocol_id,
        server_address: address.to_string(),
        server_port: port,
        next_state: 2,
    })
    .await?;
    conn.state.transition(ProtocolState::Login)?;
    conn.send(&Packet::LoginStart {
        name: username.to_string(),
        uuid,
    })
    .await?;

    loop {
        match conn.read_packet().await? {
            Packet::EncryptionRequest {
                server_id: _,
                public_key,
                verify_token,
            } => {
                let mut shared_secret = [0u8; 16];
                rand::thread_rng().fill_bytes(&mut shared_secret);
                conn.send(&Packet::EncryptionResponse {
                    shared_secret: crypto.sign(&public_key, &shared_secret),
                    verify_token: crypto.sign(&public_key, &verify_token),
                })
                .await?;
                // The server flips to the cipher after our response; so do we.
                conn.enable_encryption(&shared_secret);
                debug!("stream encryption enabled");
            }
            Packet::SetCompression { threshold } => {
                conn.enable_compression(threshold);
                debug!("compression enabled, threshold {}", threshold);
            }
            Packet::LoginChannelRequest {
                message_id,
                channel,
                data,
            } => {
                if let Some(reject) = login_channels.handle(message_id, &channel, &data) {
                    conn.send(&reject).await?;
                }
            }
            Packet::LoginSuccess { profile } => {
                conn.state.transition(ProtocolState::Play)?;
                info!("logged in as {} ({})", profile.name, profile.uuid);
                return Ok(profile);
            }
            Packet::LoginDisconnect { reason } => {
                conn.state.force_disconnect();
                return Err(SessionError::Disconnected { reason });
            }
            other => {
                debug!("ignoring {} during login", other.name());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{FrameReader, FrameWriter};
    use lodestone_protocol_core::{PacketReader, Version, VersionId};
    use lodestone_protocol_packets::default_registry;
    use lodestone_types::TextComponent;
    use std::sync::Arc;
    use tokio::io::{DuplexStream, ReadHalf, WriteHalf};

    const VERSION_ID: VersionId = 460;

    fn test_version() -> Arc<Version> {
        Arc::new(Version {
            name: "1.21.1".into(),
            version_id: VERSION_ID,
            protocol_id: 767,
        })
    }

    fn client(stream: DuplexStream) -> Connection<DuplexStream> {
        Connection::new(
            stream,
            test_version(),
            default_registry(),
            Duration::from_secs(2),
        )
    }

    struct FakeServer {
        reader: FrameReader<ReadHalf<DuplexStream>>,
        writer: FrameWriter<WriteHalf<DuplexStream>>,
    }

    impl FakeServer {
        fn new(stream: DuplexStream) -> Self {
            let (read_half, write_half) = tokio::io::split(stream);
            Self {
                reader: FrameReader::new(read_half, Duration::from_secs(2)),
                writer: FrameWriter::new(write_half),
            }
        }

        async fn read(&mut self) -> PacketReader {
            let frame = self.reader.read_frame(1 << 21).await.unwrap();
            PacketReader::new(frame, VERSION_ID)
        }

        async fn send(&mut self, packet: &Packet) {
            let payload = packet.encode(VERSION_ID).unwrap();
            self.writer.write_frame(&payload).await.unwrap();
        }
    }

    /// Crypto stub: "sealing" is the identity, so the fake server reads
    /// the shared secret straight off the wire.
    struct PlainCrypto;

    impl LoginCrypto for PlainCrypto {
        fn sign(&self, _public_key: &[u8], data: &[u8]) -> Vec<u8> {
            data.to_vec()
        }

        fn verify(&self, _data: &[u8], _signature: &[u8]) -> bool {
            true
        }
    }

    #[tokio::test]
    async fn test_status_ping_exchange() {
        let (near, far) = tokio::io::duplex(1 << 16);
        let mut server = FakeServer::new(far);

        let server_task = tokio::spawn(async move {
            // Handshake: id, protocol, address, port, next = 1.
            let mut handshake = server.read().await;
            assert_eq!(handshake.read_varint().unwrap(), 0x00);
            assert_eq!(handshake.read_varint().unwrap(), 767);
            assert_eq!(handshake.read_string(255).unwrap(), "localhost");
            assert_eq!(handshake.read_u16().unwrap(), 25565);
            assert_eq!(handshake.read_varint().unwrap(), 1);

            let mut request = server.read().await;
            assert_eq!(request.read_varint().unwrap(), 0x00);

            server
                .send(&Packet::StatusResponse {
                    json: r#"{"description":{"text":"hi"}}"#.into(),
                })
                .await;

            let mut ping = server.read().await;
            assert_eq!(ping.read_varint().unwrap(), 0x01);
            let payload = ping.read_i64().unwrap();
            server.send(&Packet::Pong { payload }).await;
        });

        let mut conn = client(near);
        let status = status_ping(&mut conn, "localhost", 25565).await.unwrap();
        assert_eq!(status.json, r#"{"description":{"text":"hi"}}"#);
        assert!(conn.state.is_disconnected());
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_login_with_encryption_and_compression() {
        let (near, far) = tokio::io::duplex(1 << 16);
        let mut server = FakeServer::new(far);

        let server_task = tokio::spawn(async move {
            let mut handshake = server.read().await;
            assert_eq!(handshake.read_varint().unwrap(), 0x00);
            let _ = handshake.read_varint().unwrap();
            let _ = handshake.read_string(255).unwrap();
            let _ = handshake.read_u16().unwrap();
            assert_eq!(handshake.read_varint().unwrap(), 2);

            let mut login_start = server.read().await;
            assert_eq!(login_start.read_varint().unwrap(), 0x00);
            assert_eq!(login_start.read_string(16).unwrap(), "Steve");

            // Ask a channel question first; the client has no handler and
            // must reject it by message id.
            server
                .send(&Packet::LoginChannelRequest {
                    message_id: 13,
                    channel: lodestone_types::Identifier::new("lodestone", "probe"),
                    data: vec![1],
                })
                .await;
            let mut reply = server.read().await;
            assert_eq!(reply.read_varint().unwrap(), 0x02);
            assert_eq!(reply.read_varint().unwrap(), 13);
            assert!(!reply.read_bool().unwrap());

            server
                .send(&Packet::EncryptionRequest {
                    server_id: "".into(),
                    public_key: b"rsa-der-bytes".to_vec(),
                    verify_token: vec![9, 8, 7, 6],
                })
                .await;

            let mut response = server.read().await;
            assert_eq!(response.read_varint().unwrap(), 0x01);
            let shared_secret: [u8; 16] =
                response.read_byte_array().unwrap().try_into().unwrap();
            let token = response.read_byte_array().unwrap();
            assert_eq!(token, vec![9, 8, 7, 6]);

            server.reader.enable_encryption(&shared_secret);
            server.writer.enable_encryption(&shared_secret);

            server.send(&Packet::SetCompression { threshold: 64 }).await;
            server.reader.enable_compression(64);
            server.writer.enable_compression(64);

            server
                .send(&Packet::LoginSuccess {
                    profile: GameProfile {
                        uuid: Uuid::from_u128(0xDEAD_BEEF),
                        name: "Steve".into(),
                        properties: vec![],
                    },
                })
                .await;
        });

        let mut conn = client(near);
        let mut channels = ChannelManager::new();
        let profile = login(
            &mut conn,
            "localhost",
            25565,
            "Steve",
            Some(Uuid::from_u128(0xDEAD_BEEF)),
            &PlainCrypto,
            &mut channels,
        )
        .await
        .unwrap();

        assert_eq!(profile.name, "Steve");
        assert_eq!(conn.state.current(), ProtocolState::Play);
        server_task.await.unwrap();
    }

    #[tokio::test]
    async fn test_login_disconnect_surfaces_reason() {
        let (near, far) = tokio::io::duplex(1 << 16);
        let mut server = FakeServer::new(far);

        let server_task = tokio::spawn(async move {
            let _handshake = server.read().await;
            let _login_start = server.read().await;
            server
                .send(&Packet::LoginDisconnect {
                    reason: TextComponent::plain("You are banned"),
                })
                .await;
        });

        let mut conn = client(near);
        let mut channels = ChannelManager::new();
        let err = login(
            &mut conn,
            "localhost",
            25565,
            "Steve",
            Some(Uuid::from_u128(1)),
            &PlainCrypto,
            &mut channels,
        )
        .await
        .unwrap_err();

        match err {
            SessionError::Disconnected { reason } => {
                assert_eq!(reason.to_plain(), "You are banned");
            }
            other => panic!("expected disconnect, got {}", other),
        }
        assert!(conn.state.is_disconnected());
        server_task.await.unwrap();
    }
}
