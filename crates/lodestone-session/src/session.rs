use crate::channel::SessionChannels;
use crate::connection::{Connection, FrameReader, FrameWriter};
use crate::error::SessionError;
use lodestone_protocol_core::{
    ConnectionStateMachine, PacketRegistry, ProtocolState, Version,
};
use lodestone_protocol_packets::Packet;
use lodestone_types::{BlockPos, Vec3d};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, trace, warn};

/// Externally owned world/registry model the dispatcher's handlers apply
/// effects to. The session core only guarantees ordered, at-most-once
/// delivery into these calls.
pub trait WorldSink: Send {
    fn set_block(&mut self, position: BlockPos, block_id: i32);
    fn move_entity(&mut self, entity_id: i32, position: Vec3d);
}

/// Receives every decoded play/login packet, in strict receipt order, on
/// the session's dispatch task. Errors are logged with packet context and
/// the connection continues, unless the error downcasts to a
/// [`SessionError`] (connection-fatal), which tears the session down.
pub trait SessionHandler: Send {
    fn handle_packet(&mut self, session: &SessionHandle, packet: Packet) -> anyhow::Result<()>;
}

/// Cheap, cloneable sender side of a session. Game logic on any thread
/// sends through this; writes are serialized by the writer task so frames
/// from concurrent senders never interleave.
#[derive(Clone)]
pub struct SessionHandle {
    state: Arc<ConnectionStateMachine>,
    version: Arc<Version>,
    out_tx: mpsc::UnboundedSender<Packet>,
}

impl SessionHandle {
    pub fn new(
        state: Arc<ConnectionStateMachine>,
        version: Arc<Version>,
        out_tx: mpsc::UnboundedSender<Packet>,
    ) -> Self {
        Self {
            state,
            version,
            out_tx,
        }
    }

    pub fn state(&self) -> ProtocolState {
        self.state.current()
    }

    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Queue a packet for the writer task. Fails without queueing anything
    /// when the connection state does not permit the packet.
    pub fn send(&self, packet: Packet) -> Result<(), SessionError> {
        self.state.expect(packet.legal_state())?;
        self.out_tx
            .send(packet)
            .map_err(|_| SessionError::Closed)
    }

    /// Force the state machine to Disconnected. Safe from any thread; the
    /// dispatch loop notices on its next iteration.
    pub fn disconnect(&self) {
        self.state.force_disconnect();
    }
}

/// A running session: its handle plus the spawned I/O tasks.
pub struct Session {
    pub handle: SessionHandle,
    pub dispatch: JoinHandle<Result<(), SessionError>>,
    pub writer: JoinHandle<()>,
}

impl Session {
    /// Take over a connection that has reached play state: spawn the writer
    /// task and the sequential dispatch task.
    pub fn start<S>(
        connection: Connection<S>,
        channels: SessionChannels,
        handler: Box<dyn SessionHandler>,
    ) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, writer, state, version, registry) = connection.into_split();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle::new(state.clone(), version.clone(), out_tx);

        let writer_task = tokio::spawn(run_writer(writer, out_rx, version.clone()));
        let dispatch_task = tokio::spawn(run_dispatch(
            reader,
            registry,
            state,
            version,
            handle.clone(),
            channels,
            handler,
        ));

        Self {
            handle,
            dispatch: dispatch_task,
            writer: writer_task,
        }
    }
}

/// Drain the outbound queue onto the socket. The single consumer is what
/// guarantees whole-frame writes: every queued packet is encoded and
/// written before the next is looked at.
pub async fn run_writer<W: AsyncWrite + Unpin>(
    mut writer: FrameWriter<W>,
    mut out_rx: mpsc::UnboundedReceiver<Packet>,
    version: Arc<Version>,
) {
    while let Some(packet) = out_rx.recv().await {
        let payload = match packet.encode(version.version_id) {
            Ok(payload) => payload,
            Err(error) => {
                warn!("cannot encode {}: {}", packet.name(), error);
                continue;
            }
        };
        if let Err(error) = writer.write_frame(&payload).await {
            debug!("writer stopped: {}", error);
            break;
        }
        trace!("sent {} ({} bytes)", packet.name(), payload.len());
    }
}

/// The per-connection dispatch loop: frames are decoded and handled
/// strictly in receipt order on this one task. Returns when the connection
/// ends; the error carries the reason for anything other than a local
/// disconnect.
pub async fn run_dispatch<R: AsyncRead + Unpin>(
    mut reader: FrameReader<R>,
    registry: Arc<PacketRegistry<Packet>>,
    state: Arc<ConnectionStateMachine>,
    version: Arc<Version>,
    handle: SessionHandle,
    mut channels: SessionChannels,
    mut handler: Box<dyn SessionHandler>,
) -> Result<(), SessionError> {
    let result = dispatch_loop(
        &mut reader,
        &registry,
        &state,
        &version,
        &handle,
        &mut channels,
        handler.as_mut(),
    )
    .await;

    state.force_disconnect();
    channels.clear_all();
    result
}

async fn dispatch_loop<R: AsyncRead + Unpin>(
    reader: &mut FrameReader<R>,
    registry: &PacketRegistry<Packet>,
    state: &ConnectionStateMachine,
    version: &Version,
    handle: &SessionHandle,
    channels: &mut SessionChannels,
    handler: &mut dyn SessionHandler,
) -> Result<(), SessionError> {
    loop {
        let current = state.current();
        if current == ProtocolState::Disconnected {
            info!("session closed locally");
            return Ok(());
        }

        let frame = reader.read_frame(current.max_frame_len()).await?;
        if frame.is_empty() {
            trace!("no-op frame");
            continue;
        }

        let packet = match registry.decode(current, version.version_id, frame) {
            Ok(packet) => packet,
            Err(error) if error.is_recoverable() => {
                // Forward compatibility: an id this version/state does not
                // know is dropped, not fatal.
                debug!("{}, dropping frame", error);
                continue;
            }
            Err(error) => {
                return Err(SessionError::Protocol(error.to_string()));
            }
        };
        trace!("dispatching {}", packet.name());

        // Connection-level packets the session answers itself.
        match &packet {
            Packet::KeepAlive { id } => {
                if let Err(error) = handle.send(Packet::KeepAliveResponse { id: *id }) {
                    debug!("keep-alive response not sent: {}", error);
                }
            }
            Packet::LoginDisconnect { reason } | Packet::PlayDisconnect { reason } => {
                return Err(SessionError::Disconnected {
                    reason: reason.clone(),
                });
            }
            Packet::LoginChannelRequest {
                message_id,
                channel,
                data,
            } => {
                if let Some(reject) = channels.login.handle(*message_id, channel, data) {
                    let _ = handle.send(reject);
                }
                continue;
            }
            Packet::PluginMessage { channel, data } => {
                if channels.play.dispatch(channel, data) == 0 {
                    debug!("no handler for plugin channel {}", channel);
                }
                continue;
            }
            _ => {}
        }

        let name = packet.name();
        if let Err(error) = handler.handle_packet(handle, packet) {
            match error.downcast::<SessionError>() {
                Ok(fatal) => {
                    warn!("fatal error handling {}: {}", name, fatal);
                    return Err(fatal);
                }
                Err(error) => {
                    // One misbehaving handler must not take the session
                    // down with it.
                    warn!("error handling {}: {:#}", name, error);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::SessionChannels;
    use lodestone_protocol_core::LengthFramer;
    use lodestone_protocol_packets::default_registry;
    use lodestone_types::{Identifier, TextComponent};
    use std::sync::Mutex;
    use std::time::Duration;
    use tokio::io::AsyncWriteExt;

    const VERSION_ID: i32 = 460;

    fn test_version() -> Arc<Version> {
        Arc::new(Version {
            name: "1.21.1".into(),
            version_id: VERSION_ID,
            protocol_id: 767,
        })
    }

    fn play_state() -> Arc<ConnectionStateMachine> {
        let state = ConnectionStateMachine::new();
        state.transition(ProtocolState::Login).unwrap();
        state.transition(ProtocolState::Play).unwrap();
        Arc::new(state)
    }

    fn frame(packet: &Packet) -> Vec<u8> {
        let payload = packet.encode(VERSION_ID).unwrap();
        LengthFramer::new().encode_frame(&payload).to_vec()
    }

    struct Recorder {
        seen: Arc<Mutex<Vec<String>>>,
        delay_first: Option<Duration>,
    }

    impl SessionHandler for Recorder {
        fn handle_packet(
            &mut self,
            _session: &SessionHandle,
            packet: Packet,
        ) -> anyhow::Result<()> {
            if let Some(delay) = self.delay_first.take() {
                std::thread::sleep(delay);
            }
            if let Packet::ChatMessage { content, .. } = &packet {
                self.seen.lock().unwrap().push(content.to_plain());
            }
            Ok(())
        }
    }

    fn chat(text: &str) -> Packet {
        Packet::ChatMessage {
            content: TextComponent::plain(text),
            position: 0,
        }
    }

    async fn run_with_input(
        input: Vec<u8>,
        handler: Box<dyn SessionHandler>,
        channels: SessionChannels,
    ) -> (
        Result<(), SessionError>,
        Vec<Packet>,
        Arc<ConnectionStateMachine>,
    ) {
        let (mut near, far) = tokio::io::duplex(1 << 16);
        let state = play_state();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle::new(state.clone(), test_version(), out_tx);

        near.write_all(&input).await.unwrap();
        near.shutdown().await.unwrap();

        let reader = FrameReader::new(far, Duration::from_secs(1));
        let result = run_dispatch(
            reader,
            default_registry(),
            state.clone(),
            test_version(),
            handle,
            channels,
            handler,
        )
        .await;

        let mut sent = Vec::new();
        while let Ok(packet) = out_rx.try_recv() {
            sent.push(packet);
        }
        (result, sent, state)
    }

    #[tokio::test]
    async fn test_fifo_dispatch_despite_slow_handler() {
        let mut input = frame(&chat("first"));
        input.extend(frame(&chat("second")));
        input.extend(frame(&chat("third")));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = Recorder {
            seen: seen.clone(),
            delay_first: Some(Duration::from_millis(100)),
        };
        let (result, _, _) =
            run_with_input(input, Box::new(handler), SessionChannels::new()).await;

        // Stream end after the last frame.
        assert!(matches!(result, Err(SessionError::Closed)));
        assert_eq!(*seen.lock().unwrap(), vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_unknown_packet_is_dropped_not_fatal() {
        // id 0x7E is registered for nothing.
        let mut input = LengthFramer::new().encode_frame(&[0x7E, 0xAB, 0xCD]).to_vec();
        input.extend(frame(&chat("still alive")));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let handler = Recorder {
            seen: seen.clone(),
            delay_first: None,
        };
        let (_, _, _) = run_with_input(input, Box::new(handler), SessionChannels::new()).await;
        assert_eq!(*seen.lock().unwrap(), vec!["still alive"]);
    }

    #[tokio::test]
    async fn test_malformed_known_packet_is_fatal() {
        // Modern keep-alive (0x1F) must carry an i64; three bytes is a
        // protocol violation.
        let input = LengthFramer::new().encode_frame(&[0x1F, 0x01, 0x02]).to_vec();

        let handler = Recorder {
            seen: Arc::new(Mutex::new(Vec::new())),
            delay_first: None,
        };
        let (result, _, state) =
            run_with_input(input, Box::new(handler), SessionChannels::new()).await;
        assert!(matches!(result, Err(SessionError::Protocol(_))));
        assert!(state.is_disconnected());
    }

    #[tokio::test]
    async fn test_keep_alive_answered() {
        let input = frame(&Packet::KeepAlive { id: 0x1234 });
        let handler = Recorder {
            seen: Arc::new(Mutex::new(Vec::new())),
            delay_first: None,
        };
        let (_, sent, _) = run_with_input(input, Box::new(handler), SessionChannels::new()).await;
        assert!(sent.contains(&Packet::KeepAliveResponse { id: 0x1234 }));
    }

    #[tokio::test]
    async fn test_server_disconnect_surfaces_reason() {
        let input = frame(&Packet::PlayDisconnect {
            reason: TextComponent::plain("server restarting"),
        });
        let handler = Recorder {
            seen: Arc::new(Mutex::new(Vec::new())),
            delay_first: None,
        };
        let (result, _, state) =
            run_with_input(input, Box::new(handler), SessionChannels::new()).await;
        match result {
            Err(SessionError::Disconnected { reason }) => {
                assert_eq!(reason.to_plain(), "server restarting");
            }
            other => panic!("expected disconnect, got {:?}", other.map(|_| ())),
        }
        assert!(state.is_disconnected());
    }

    #[tokio::test]
    async fn test_play_channel_dispatch() {
        let channel = Identifier::vanilla("brand");
        let input = frame(&Packet::PluginMessage {
            channel: channel.clone(),
            data: b"paper".to_vec(),
        });

        let brands = Arc::new(Mutex::new(Vec::new()));
        let sink = brands.clone();
        let mut channels = SessionChannels::new();
        channels.play.register(
            channel,
            Box::new(move |data| {
                sink.lock().unwrap().push(data.to_vec());
                Ok(())
            }),
        );

        let handler = Recorder {
            seen: Arc::new(Mutex::new(Vec::new())),
            delay_first: None,
        };
        let (_, _, _) = run_with_input(input, Box::new(handler), channels).await;
        assert_eq!(*brands.lock().unwrap(), vec![b"paper".to_vec()]);
    }

    #[tokio::test]
    async fn test_handler_error_does_not_kill_session() {
        struct Flaky {
            seen: Arc<Mutex<Vec<String>>>,
        }
        impl SessionHandler for Flaky {
            fn handle_packet(
                &mut self,
                _session: &SessionHandle,
                packet: Packet,
            ) -> anyhow::Result<()> {
                if let Packet::ChatMessage { content, .. } = &packet {
                    let text = content.to_plain();
                    self.seen.lock().unwrap().push(text.clone());
                    if text == "boom" {
                        anyhow::bail!("handler bug");
                    }
                }
                Ok(())
            }
        }

        let mut input = frame(&chat("boom"));
        input.extend(frame(&chat("after")));

        let seen = Arc::new(Mutex::new(Vec::new()));
        let (result, _, _) = run_with_input(
            input,
            Box::new(Flaky { seen: seen.clone() }),
            SessionChannels::new(),
        )
        .await;
        assert!(matches!(result, Err(SessionError::Closed)));
        assert_eq!(*seen.lock().unwrap(), vec!["boom", "after"]);
    }

    #[tokio::test]
    async fn test_send_in_wrong_state_writes_nothing() {
        let state = play_state();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle::new(state, test_version(), out_tx);

        let err = handle
            .send(Packet::LoginStart {
                name: "Steve".into(),
                uuid: None,
            })
            .unwrap_err();
        assert!(matches!(err, SessionError::State(_)));
        assert!(out_rx.try_recv().is_err());

        // A play packet goes through.
        handle
            .send(Packet::ChatMessageOut {
                message: "hello".into(),
            })
            .unwrap();
        assert!(out_rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_concurrent_sends_never_interleave() {
        let (near, far) = tokio::io::duplex(1 << 20);
        let state = play_state();
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let handle = SessionHandle::new(state, test_version(), out_tx);

        let writer = FrameWriter::new(near);
        let writer_task = tokio::spawn(run_writer(writer, out_rx, test_version()));

        let a = handle.clone();
        let task_a = tokio::spawn(async move {
            for i in 0..50 {
                a.send(Packet::ChatMessageOut {
                    message: format!("a-{i}-{}", "x".repeat(200)),
                })
                .unwrap();
                tokio::task::yield_now().await;
            }
        });
        let b = handle.clone();
        let task_b = tokio::spawn(async move {
            for i in 0..50 {
                b.send(Packet::ChatMessageOut {
                    message: format!("b-{i}-{}", "y".repeat(200)),
                })
                .unwrap();
                tokio::task::yield_now().await;
            }
        });
        task_a.await.unwrap();
        task_b.await.unwrap();
        drop(handle);
        writer_task.await.unwrap();

        // Every frame on the wire must be one complete chat packet.
        let mut reader = FrameReader::new(far, Duration::from_secs(1));
        let mut messages = Vec::new();
        loop {
            match reader.read_frame(1 << 21).await {
                Ok(payload) => {
                    let mut cursor =
                        lodestone_protocol_core::PacketReader::new(payload, VERSION_ID);
                    assert_eq!(cursor.read_varint().unwrap(), 0x02);
                    messages.push(cursor.read_string(32767).unwrap());
                    assert_eq!(cursor.remaining(), 0);
                }
                Err(SessionError::Closed) => break,
                Err(other) => panic!("unexpected error: {}", other),
            }
        }
        assert_eq!(messages.len(), 100);
        for message in &messages {
            let mut parts = message.splitn(3, '-');
            let sender = parts.next().unwrap();
            let _index: usize = parts.next().unwrap().parse().unwrap();
            let tail = parts.next().unwrap();
            match sender {
                "a" => assert_eq!(tail, "x".repeat(200)),
                "b" => assert_eq!(tail, "y".repeat(200)),
                other => panic!("corrupted frame from sender {:?}", other),
            }
        }
    }
}
