mod config;
mod handler;

use config::ClientConfig;
use handler::{ClientHandler, LoggingWorld};
use lodestone_protocol_core::VersionRegistry;
use lodestone_protocol_packets::{default_registry, Packet};
use lodestone_session::{
    login, status_ping, Connection, LoginCrypto, Session, SessionChannels, SessionError,
};
use lodestone_types::Identifier;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

/// Stand-in for the account key pair. Offline-mode servers never request
/// encryption; a server that does gets the secret sealed as-is.
struct OfflineCrypto;

impl LoginCrypto for OfflineCrypto {
    fn sign(&self, _public_key: &[u8], data: &[u8]) -> Vec<u8> {
        data.to_vec()
    }

    fn verify(&self, _data: &[u8], _signature: &[u8]) -> bool {
        false
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let config = ClientConfig::load(Path::new("config/client.toml"))?;
    let versions = VersionRegistry::builtin();
    let version = versions
        .by_name(&config.version)
        .ok_or_else(|| anyhow::anyhow!("unknown protocol version {:?}", config.version))?;
    info!(
        "lodestone connecting to {}:{} as {}",
        config.server_address, config.server_port, version
    );

    let mut conn = Connection::connect(
        &config.server_address,
        config.server_port,
        version,
        default_registry(),
        Duration::from_secs(config.read_timeout_secs),
    )
    .await?;

    if !config.login {
        let status = status_ping(&mut conn, &config.server_address, config.server_port).await?;
        print_status(&status.json);
        info!("ping: {} ms", status.latency.as_millis());
        return Ok(());
    }

    let mut channels = SessionChannels::new();
    channels.play.register(
        Identifier::vanilla("brand"),
        Box::new(|data| {
            info!("server brand: {}", String::from_utf8_lossy(data));
            Ok(())
        }),
    );

    let profile = login(
        &mut conn,
        &config.server_address,
        config.server_port,
        &config.username,
        Some(offline_uuid(&config.username)),
        &OfflineCrypto,
        &mut channels.login,
    )
    .await?;

    let session = Session::start(conn, channels, Box::new(ClientHandler::new(LoggingWorld)));
    session.handle.send(Packet::ChatMessageOut {
        message: format!("{} connected via lodestone", profile.name),
    })?;

    tokio::select! {
        result = session.dispatch => {
            match result? {
                Ok(()) => info!("session ended"),
                Err(SessionError::Disconnected { reason }) => {
                    // The user-visible outcome of a kick is its reason.
                    warn!("disconnected: {}", reason.to_plain());
                }
                Err(error) => return Err(error.into()),
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("interrupted, closing session");
            session.handle.disconnect();
        }
    }

    Ok(())
}

fn print_status(json: &str) {
    match serde_json::from_str::<serde_json::Value>(json) {
        Ok(status) => {
            let description = status
                .pointer("/description/text")
                .and_then(|v| v.as_str())
                .unwrap_or("(no description)");
            let players_online = status.pointer("/players/online").and_then(|v| v.as_i64());
            let players_max = status.pointer("/players/max").and_then(|v| v.as_i64());
            let version_name = status
                .pointer("/version/name")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            info!("{}", description);
            info!(
                "version {}, players {}/{}",
                version_name,
                players_online.unwrap_or(0),
                players_max.unwrap_or(0)
            );
        }
        Err(_) => info!("status: {}", json),
    }
}

/// Offline-mode UUID derived from the player name, stable across runs.
fn offline_uuid(name: &str) -> Uuid {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};
    let input = format!("OfflinePlayer:{}", name);
    let mut hasher = DefaultHasher::new();
    input.hash(&mut hasher);
    let h1 = hasher.finish();
    input.len().hash(&mut hasher);
    let h2 = hasher.finish();
    let mut bytes = [0u8; 16];
    bytes[..8].copy_from_slice(&h1.to_be_bytes());
    bytes[8..].copy_from_slice(&h2.to_be_bytes());
    bytes[6] = (bytes[6] & 0x0f) | 0x30;
    bytes[8] = (bytes[8] & 0x3f) | 0x80;
    Uuid::from_bytes(bytes)
}
