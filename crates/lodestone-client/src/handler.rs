use lodestone_protocol_packets::Packet;
use lodestone_session::{SessionHandle, SessionHandler, WorldSink};
use lodestone_types::{BlockPos, Vec3d};
use tracing::{debug, info};

/// Default play-state handler: applies world effects to the sink and logs
/// the rest. Everything it ignores was already decoded and ordered by the
/// dispatch loop.
pub struct ClientHandler<W> {
    world: W,
}

impl<W: WorldSink> ClientHandler<W> {
    pub fn new(world: W) -> Self {
        Self { world }
    }
}

impl<W: WorldSink> SessionHandler for ClientHandler<W> {
    fn handle_packet(&mut self, _session: &SessionHandle, packet: Packet) -> anyhow::Result<()> {
        match packet {
            Packet::JoinGame {
                entity_id,
                hardcore,
                game_mode,
            } => {
                info!(
                    "joined as entity {} ({:?}{})",
                    entity_id,
                    game_mode,
                    if hardcore { ", hardcore" } else { "" }
                );
            }
            Packet::ChatMessage { content, .. } => {
                info!("[chat] {}", content.to_plain());
            }
            Packet::BlockUpdate { position, block_id } => {
                self.world.set_block(position, block_id);
            }
            Packet::EntityTeleport {
                entity_id,
                position,
                ..
            } => {
                self.world.move_entity(entity_id, position);
            }
            other => {
                debug!("unhandled {}", other.name());
            }
        }
        Ok(())
    }
}

/// World sink for a headless session: effects are logged, not stored.
pub struct LoggingWorld;

impl WorldSink for LoggingWorld {
    fn set_block(&mut self, position: BlockPos, block_id: i32) {
        debug!(
            "block ({}, {}, {}) -> {}",
            position.x, position.y, position.z, block_id
        );
    }

    fn move_entity(&mut self, entity_id: i32, position: Vec3d) {
        debug!(
            "entity {} -> ({:.2}, {:.2}, {:.2})",
            entity_id, position.x, position.y, position.z
        );
    }
}
