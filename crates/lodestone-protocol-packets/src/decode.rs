use crate::packets::Packet;
use lodestone_protocol_core::{
    CodecError, CodecResult, PacketReader, PacketRegistry, ProtocolState, VersionId, V_14W04A,
    V_14W25B, V_15W31A, V_1_12_2, V_1_16_PRE1, V_1_19,
};
use lodestone_types::{GameMode, GameProfile, Identifier, ProfileProperty, TextComponent};
use std::str::FromStr;
use std::sync::Arc;
use uuid::Uuid;

const V_OLDEST: VersionId = 0;
const V_NEWEST: VersionId = i32::MAX;

/// Populate `registry` with every clientbound packet the client understands.
///
/// Ids are reused across protocol history (e.g. 0x23 is the legacy block
/// update and the modern join game); the disjoint version ranges keep the
/// table unambiguous, and any overlap introduced here panics at startup.
pub fn register_all(registry: &mut PacketRegistry<Packet>) {
    use ProtocolState::*;

    // Status
    registry.register(Status, 0x00, V_OLDEST, V_NEWEST, "status_response", decode_status_response);
    registry.register(Status, 0x01, V_OLDEST, V_NEWEST, "pong", decode_pong);

    // Login
    registry.register(Login, 0x00, V_OLDEST, V_NEWEST, "login_disconnect", decode_login_disconnect);
    registry.register(Login, 0x01, V_OLDEST, V_NEWEST, "encryption_request", decode_encryption_request);
    registry.register(Login, 0x02, V_OLDEST, V_NEWEST, "login_success", decode_login_success);
    registry.register(Login, 0x03, V_OLDEST, V_NEWEST, "set_compression", decode_set_compression);
    registry.register(Login, 0x04, V_OLDEST, V_NEWEST, "login_channel_request", decode_login_channel_request);

    // Play, pre-15w31a id table
    registry.register(Play, 0x00, V_OLDEST, V_15W31A - 1, "keep_alive", decode_keep_alive);
    registry.register(Play, 0x01, V_OLDEST, V_15W31A - 1, "join_game", decode_join_game);
    registry.register(Play, 0x02, V_OLDEST, V_15W31A - 1, "chat_message", decode_chat_message);
    registry.register(Play, 0x23, V_14W04A, V_15W31A - 1, "block_update", decode_block_update);
    registry.register(Play, 0x18, V_OLDEST, V_15W31A - 1, "entity_teleport", decode_entity_teleport);
    registry.register(Play, 0x40, V_OLDEST, V_15W31A - 1, "play_disconnect", decode_play_disconnect);
    registry.register(Play, 0x3F, V_OLDEST, V_15W31A - 1, "plugin_message", decode_plugin_message);

    // Play, 15w31a and newer
    registry.register(Play, 0x1F, V_15W31A, V_NEWEST, "keep_alive", decode_keep_alive);
    registry.register(Play, 0x23, V_15W31A, V_NEWEST, "join_game", decode_join_game);
    registry.register(Play, 0x0F, V_15W31A, V_NEWEST, "chat_message", decode_chat_message);
    registry.register(Play, 0x0B, V_15W31A, V_NEWEST, "block_update", decode_block_update);
    registry.register(Play, 0x56, V_15W31A, V_NEWEST, "entity_teleport", decode_entity_teleport);
    registry.register(Play, 0x1A, V_15W31A, V_NEWEST, "play_disconnect", decode_play_disconnect);
    registry.register(Play, 0x18, V_15W31A, V_NEWEST, "plugin_message", decode_plugin_message);
}

/// The registry every session shares, built once.
pub fn default_registry() -> Arc<PacketRegistry<Packet>> {
    let mut registry = PacketRegistry::new();
    register_all(&mut registry);
    Arc::new(registry)
}

fn decode_status_response(reader: &mut PacketReader) -> CodecResult<Packet> {
    Ok(Packet::StatusResponse {
        json: reader.read_string(32767)?,
    })
}

fn decode_pong(reader: &mut PacketReader) -> CodecResult<Packet> {
    Ok(Packet::Pong {
        payload: reader.read_i64()?,
    })
}

fn decode_login_disconnect(reader: &mut PacketReader) -> CodecResult<Packet> {
    Ok(Packet::LoginDisconnect {
        reason: TextComponent::from_json(&reader.read_string(262144)?),
    })
}

fn decode_encryption_request(reader: &mut PacketReader) -> CodecResult<Packet> {
    let server_id = reader.read_string(20)?;
    let (public_key, verify_token) = if reader.version() >= V_14W04A {
        (reader.read_byte_array()?, reader.read_byte_array()?)
    } else {
        (read_short_array(reader)?, read_short_array(reader)?)
    };
    Ok(Packet::EncryptionRequest {
        server_id,
        public_key,
        verify_token,
    })
}

// Pre-14w04a arrays use an i16 length prefix.
fn read_short_array(reader: &mut PacketReader) -> CodecResult<Vec<u8>> {
    let len = reader.read_i16()?;
    if len < 0 {
        return Err(CodecError::NegativeLength(len as i32));
    }
    let mut out = Vec::with_capacity(len as usize);
    for _ in 0..len {
        out.push(reader.read_u8()?);
    }
    Ok(out)
}

fn decode_login_success(reader: &mut PacketReader) -> CodecResult<Packet> {
    let uuid = if reader.version() >= V_1_16_PRE1 {
        reader.read_uuid()?
    } else {
        Uuid::parse_str(&reader.read_string(36)?).map_err(|_| CodecError::InvalidValue("uuid"))?
    };
    let name = reader.read_string(16)?;
    let properties = if reader.version() >= V_1_19 {
        reader.read_array(|r| {
            Ok(ProfileProperty {
                name: r.read_string(64)?,
                value: r.read_string(32767)?,
                signature: r.read_option(|r| r.read_string(1024))?,
            })
        })?
    } else {
        Vec::new()
    };
    Ok(Packet::LoginSuccess {
        profile: GameProfile {
            uuid,
            name,
            properties,
        },
    })
}

fn decode_set_compression(reader: &mut PacketReader) -> CodecResult<Packet> {
    Ok(Packet::SetCompression {
        threshold: reader.read_varint()?,
    })
}

fn decode_login_channel_request(reader: &mut PacketReader) -> CodecResult<Packet> {
    let message_id = reader.read_varint()?;
    let channel = Identifier::from_str(&reader.read_string(32767)?)
        .map_err(|_| CodecError::InvalidValue("channel identifier"))?;
    Ok(Packet::LoginChannelRequest {
        message_id,
        channel,
        data: reader.read_rest(),
    })
}

fn decode_keep_alive(reader: &mut PacketReader) -> CodecResult<Packet> {
    let id = if reader.version() >= V_1_12_2 {
        reader.read_i64()?
    } else if reader.version() >= V_14W04A {
        reader.read_varint()? as i64
    } else {
        reader.read_i32()? as i64
    };
    Ok(Packet::KeepAlive { id })
}

fn decode_join_game(reader: &mut PacketReader) -> CodecResult<Packet> {
    let entity_id = reader.read_i32()?;
    let (hardcore, mode_id) = if reader.version() >= V_1_16_PRE1 {
        (reader.read_bool()?, reader.read_u8()?)
    } else {
        let raw = reader.read_u8()?;
        (raw & 0x08 != 0, raw & 0x03)
    };
    let game_mode =
        GameMode::from_id(mode_id).ok_or(CodecError::InvalidValue("game mode"))?;
    // Dimension data, seeds and registry payloads follow; the session core
    // has no consumer for them.
    let _ = reader.read_rest();
    Ok(Packet::JoinGame {
        entity_id,
        hardcore,
        game_mode,
    })
}

fn decode_chat_message(reader: &mut PacketReader) -> CodecResult<Packet> {
    let content = TextComponent::from_json(&reader.read_string(262144)?);
    let position = if reader.version() >= V_14W04A {
        reader.read_i8()?
    } else {
        0
    };
    let _ = reader.read_rest();
    Ok(Packet::ChatMessage { content, position })
}

fn decode_block_update(reader: &mut PacketReader) -> CodecResult<Packet> {
    Ok(Packet::BlockUpdate {
        position: reader.read_block_pos()?,
        block_id: reader.read_varint()?,
    })
}

fn decode_entity_teleport(reader: &mut PacketReader) -> CodecResult<Packet> {
    let entity_id = reader.read_entity_id()?;
    let position = if reader.version() >= V_15W31A {
        lodestone_types::Vec3d::new(reader.read_f64()?, reader.read_f64()?, reader.read_f64()?)
    } else {
        // Fixed-point 1/32 block units.
        lodestone_types::Vec3d::new(
            reader.read_i32()? as f64 / 32.0,
            reader.read_i32()? as f64 / 32.0,
            reader.read_i32()? as f64 / 32.0,
        )
    };
    let yaw = reader.read_angle()?;
    let pitch = reader.read_angle()?;
    let on_ground = if reader.version() >= V_14W25B {
        reader.read_bool()?
    } else {
        false
    };
    Ok(Packet::EntityTeleport {
        entity_id,
        position,
        yaw,
        pitch,
        on_ground,
    })
}

fn decode_play_disconnect(reader: &mut PacketReader) -> CodecResult<Packet> {
    Ok(Packet::PlayDisconnect {
        reason: TextComponent::from_json(&reader.read_string(262144)?),
    })
}

fn decode_plugin_message(reader: &mut PacketReader) -> CodecResult<Packet> {
    let channel = Identifier::from_str(&reader.read_string(32767)?)
        .map_err(|_| CodecError::InvalidValue("channel identifier"))?;
    Ok(Packet::PluginMessage {
        channel,
        data: reader.read_rest(),
    })
}
