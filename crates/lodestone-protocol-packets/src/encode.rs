use crate::packets::Packet;
use bytes::BytesMut;
use lodestone_protocol_core::{
    CodecError, CodecResult, PacketWriter, VersionId, V_14W04A, V_14W25B, V_15W31A, V_1_12_2,
    V_1_16_PRE1, V_1_19, V_1_20_2,
};

impl Packet {
    /// Serialize to frame payload form: id varint followed by the body,
    /// laid out for `version`. Symmetric with the decode tables.
    pub fn encode(&self, version: VersionId) -> CodecResult<BytesMut> {
        let mut writer = PacketWriter::new(version);
        writer.write_varint(self.wire_id(version));
        self.encode_body(&mut writer)?;
        Ok(writer.into_bytes())
    }

    /// The numeric id on the wire. Ids were reshuffled in 15w31a; this
    /// mirrors the decode registration tables exactly.
    pub fn wire_id(&self, version: VersionId) -> i32 {
        let modern = version >= V_15W31A;
        match self {
            Packet::Handshake { .. } => 0x00,

            Packet::StatusRequest => 0x00,
            Packet::StatusResponse { .. } => 0x00,
            Packet::Ping { .. } => 0x01,
            Packet::Pong { .. } => 0x01,

            Packet::LoginStart { .. } => 0x00,
            Packet::EncryptionResponse { .. } => 0x01,
            Packet::LoginChannelResponse { .. } => 0x02,
            Packet::LoginDisconnect { .. } => 0x00,
            Packet::EncryptionRequest { .. } => 0x01,
            Packet::LoginSuccess { .. } => 0x02,
            Packet::SetCompression { .. } => 0x03,
            Packet::LoginChannelRequest { .. } => 0x04,

            Packet::KeepAlive { .. } => {
                if modern {
                    0x1F
                } else {
                    0x00
                }
            }
            Packet::JoinGame { .. } => {
                if modern {
                    0x23
                } else {
                    0x01
                }
            }
            Packet::ChatMessage { .. } => {
                if modern {
                    0x0F
                } else {
                    0x02
                }
            }
            Packet::BlockUpdate { .. } => {
                if modern {
                    0x0B
                } else {
                    0x23
                }
            }
            Packet::EntityTeleport { .. } => {
                if modern {
                    0x56
                } else {
                    0x18
                }
            }
            Packet::PlayDisconnect { .. } => {
                if modern {
                    0x1A
                } else {
                    0x40
                }
            }
            Packet::PluginMessage { .. } => {
                if modern {
                    0x18
                } else {
                    0x3F
                }
            }

            Packet::KeepAliveResponse { .. } => {
                if modern {
                    0x0B
                } else {
                    0x00
                }
            }
            Packet::ChatMessageOut { .. } => {
                if modern {
                    0x02
                } else {
                    0x01
                }
            }
            Packet::PlayerPosition { .. } => {
                if modern {
                    0x0C
                } else {
                    0x04
                }
            }
            Packet::PluginMessageOut { .. } => {
                if modern {
                    0x09
                } else {
                    0x17
                }
            }
        }
    }

    fn encode_body(&self, w: &mut PacketWriter) -> CodecResult<()> {
        let version = w.version();
        match self {
            Packet::Handshake {
                protocol_id,
                server_address,
                server_port,
                next_state,
            } => {
                w.write_varint(*protocol_id);
                w.write_string(server_address);
                w.write_u16(*server_port);
                w.write_varint(*next_state);
            }

            Packet::StatusRequest => {}
            Packet::StatusResponse { json } => w.write_string(json),
            Packet::Ping { payload } | Packet::Pong { payload } => w.write_i64(*payload),

            Packet::LoginStart { name, uuid } => {
                w.write_string(name);
                if version >= V_1_20_2 {
                    let uuid = uuid.ok_or(CodecError::InvalidValue("login uuid"))?;
                    w.write_uuid(&uuid);
                }
            }
            Packet::EncryptionResponse {
                shared_secret,
                verify_token,
            } => {
                if version >= V_14W04A {
                    w.write_byte_array(shared_secret);
                    w.write_byte_array(verify_token);
                } else {
                    write_short_array(w, shared_secret);
                    write_short_array(w, verify_token);
                }
            }
            Packet::EncryptionRequest {
                server_id,
                public_key,
                verify_token,
            } => {
                w.write_string(server_id);
                if version >= V_14W04A {
                    w.write_byte_array(public_key);
                    w.write_byte_array(verify_token);
                } else {
                    write_short_array(w, public_key);
                    write_short_array(w, verify_token);
                }
            }
            Packet::LoginChannelResponse { message_id, data } => {
                w.write_varint(*message_id);
                match data {
                    Some(data) => {
                        w.write_bool(true);
                        w.write_bytes(data);
                    }
                    None => w.write_bool(false),
                }
            }

            Packet::LoginDisconnect { reason } => w.write_string(&reason.to_json()),
            Packet::LoginSuccess { profile } => {
                if version >= V_1_16_PRE1 {
                    w.write_uuid(&profile.uuid);
                } else {
                    w.write_string(&profile.uuid.hyphenated().to_string());
                }
                w.write_string(&profile.name);
                if version >= V_1_19 {
                    w.write_varint(profile.properties.len() as i32);
                    for property in &profile.properties {
                        w.write_string(&property.name);
                        w.write_string(&property.value);
                        w.write_option(property.signature.as_ref(), |w, s| w.write_string(s));
                    }
                }
            }
            Packet::SetCompression { threshold } => w.write_varint(*threshold),
            Packet::LoginChannelRequest {
                message_id,
                channel,
                data,
            } => {
                w.write_varint(*message_id);
                w.write_string(&channel.to_string());
                w.write_bytes(data);
            }

            Packet::KeepAlive { id } | Packet::KeepAliveResponse { id } => {
                if version >= V_1_12_2 {
                    w.write_i64(*id);
                } else if version >= V_14W04A {
                    w.write_varint(*id as i32);
                } else {
                    w.write_i32(*id as i32);
                }
            }
            Packet::JoinGame {
                entity_id,
                hardcore,
                game_mode,
            } => {
                w.write_i32(*entity_id);
                if version >= V_1_16_PRE1 {
                    w.write_bool(*hardcore);
                    w.write_u8(game_mode.id());
                } else {
                    let mut raw = game_mode.id();
                    if *hardcore {
                        raw |= 0x08;
                    }
                    w.write_u8(raw);
                }
            }
            Packet::ChatMessage { content, position } => {
                w.write_string(&content.to_json());
                if version >= V_14W04A {
                    w.write_i8(*position);
                }
            }
            Packet::BlockUpdate { position, block_id } => {
                w.write_block_pos(position);
                w.write_varint(*block_id);
            }
            Packet::EntityTeleport {
                entity_id,
                position,
                yaw,
                pitch,
                on_ground,
            } => {
                w.write_entity_id(*entity_id);
                if version >= V_15W31A {
                    w.write_f64(position.x);
                    w.write_f64(position.y);
                    w.write_f64(position.z);
                } else {
                    w.write_i32((position.x * 32.0) as i32);
                    w.write_i32((position.y * 32.0) as i32);
                    w.write_i32((position.z * 32.0) as i32);
                }
                w.write_angle(*yaw);
                w.write_angle(*pitch);
                if version >= V_14W25B {
                    w.write_bool(*on_ground);
                }
            }
            Packet::PlayDisconnect { reason } => w.write_string(&reason.to_json()),
            Packet::PluginMessage { channel, data }
            | Packet::PluginMessageOut { channel, data } => {
                w.write_string(&channel.to_string());
                w.write_bytes(data);
            }

            Packet::ChatMessageOut { message } => w.write_string(message),
            Packet::PlayerPosition {
                position,
                on_ground,
            } => {
                w.write_f64(position.x);
                w.write_f64(position.y);
                w.write_f64(position.z);
                w.write_bool(*on_ground);
            }
        }
        Ok(())
    }
}

fn write_short_array(w: &mut PacketWriter, data: &[u8]) {
    w.write_i16(data.len() as i16);
    w.write_bytes(data);
}
