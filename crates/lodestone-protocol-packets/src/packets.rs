use lodestone_protocol_core::ProtocolState;
use lodestone_types::{BlockPos, GameMode, GameProfile, Identifier, TextComponent, Vec3d};
use uuid::Uuid;

/// Version-independent packet representation. The decode tables and the
/// encode functions convert between this and the wire layouts; anything
/// version-specific stays there.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    // === Handshake (outgoing) ===
    Handshake {
        protocol_id: i32,
        server_address: String,
        server_port: u16,
        next_state: i32,
    },

    // === Status ===
    StatusRequest,
    StatusResponse {
        json: String,
    },
    Ping {
        payload: i64,
    },
    Pong {
        payload: i64,
    },

    // === Login (outgoing) ===
    LoginStart {
        name: String,
        uuid: Option<Uuid>,
    },
    EncryptionResponse {
        shared_secret: Vec<u8>,
        verify_token: Vec<u8>,
    },
    /// Reply on a login plugin channel. `None` data rejects the request.
    LoginChannelResponse {
        message_id: i32,
        data: Option<Vec<u8>>,
    },

    // === Login (incoming) ===
    LoginDisconnect {
        reason: TextComponent,
    },
    EncryptionRequest {
        server_id: String,
        public_key: Vec<u8>,
        verify_token: Vec<u8>,
    },
    LoginSuccess {
        profile: GameProfile,
    },
    SetCompression {
        threshold: i32,
    },
    LoginChannelRequest {
        message_id: i32,
        channel: Identifier,
        data: Vec<u8>,
    },

    // === Play (incoming) ===
    KeepAlive {
        id: i64,
    },
    JoinGame {
        entity_id: i32,
        hardcore: bool,
        game_mode: GameMode,
    },
    ChatMessage {
        content: TextComponent,
        /// 0 = chat box, 1 = system, 2 = above hotbar.
        position: i8,
    },
    BlockUpdate {
        position: BlockPos,
        block_id: i32,
    },
    EntityTeleport {
        entity_id: i32,
        position: Vec3d,
        yaw: f32,
        pitch: f32,
        on_ground: bool,
    },
    PlayDisconnect {
        reason: TextComponent,
    },
    /// Named-channel payload, both directions.
    PluginMessage {
        channel: Identifier,
        data: Vec<u8>,
    },

    // === Play (outgoing) ===
    KeepAliveResponse {
        id: i64,
    },
    ChatMessageOut {
        message: String,
    },
    PlayerPosition {
        position: Vec3d,
        on_ground: bool,
    },
    PluginMessageOut {
        channel: Identifier,
        data: Vec<u8>,
    },
}

impl Packet {
    pub fn name(&self) -> &'static str {
        match self {
            Packet::Handshake { .. } => "handshake",
            Packet::StatusRequest => "status_request",
            Packet::StatusResponse { .. } => "status_response",
            Packet::Ping { .. } => "ping",
            Packet::Pong { .. } => "pong",
            Packet::LoginStart { .. } => "login_start",
            Packet::EncryptionResponse { .. } => "encryption_response",
            Packet::LoginChannelResponse { .. } => "login_channel_response",
            Packet::LoginDisconnect { .. } => "login_disconnect",
            Packet::EncryptionRequest { .. } => "encryption_request",
            Packet::LoginSuccess { .. } => "login_success",
            Packet::SetCompression { .. } => "set_compression",
            Packet::LoginChannelRequest { .. } => "login_channel_request",
            Packet::KeepAlive { .. } => "keep_alive",
            Packet::JoinGame { .. } => "join_game",
            Packet::ChatMessage { .. } => "chat_message",
            Packet::BlockUpdate { .. } => "block_update",
            Packet::EntityTeleport { .. } => "entity_teleport",
            Packet::PlayDisconnect { .. } => "play_disconnect",
            Packet::PluginMessage { .. } => "plugin_message",
            Packet::KeepAliveResponse { .. } => "keep_alive_response",
            Packet::ChatMessageOut { .. } => "chat_message_out",
            Packet::PlayerPosition { .. } => "player_position",
            Packet::PluginMessageOut { .. } => "plugin_message_out",
        }
    }

    /// The protocol state this packet belongs to. Sending or receiving it
    /// in any other state is a protocol violation.
    pub fn legal_state(&self) -> ProtocolState {
        match self {
            Packet::Handshake { .. } => ProtocolState::Handshake,
            Packet::StatusRequest
            | Packet::StatusResponse { .. }
            | Packet::Ping { .. }
            | Packet::Pong { .. } => ProtocolState::Status,
            Packet::LoginStart { .. }
            | Packet::EncryptionResponse { .. }
            | Packet::LoginChannelResponse { .. }
            | Packet::LoginDisconnect { .. }
            | Packet::EncryptionRequest { .. }
            | Packet::LoginSuccess { .. }
            | Packet::SetCompression { .. }
            | Packet::LoginChannelRequest { .. } => ProtocolState::Login,
            _ => ProtocolState::Play,
        }
    }
}
