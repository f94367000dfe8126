use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_server_address")]
    pub server_address: String,
    #[serde(default = "default_server_port")]
    pub server_port: u16,
    #[serde(default = "default_username")]
    pub username: String,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default = "default_read_timeout_secs")]
    pub read_timeout_secs: u64,
    /// false: server list ping only. true: full login into play state.
    #[serde(default)]
    pub login: bool,
}

fn default_server_address() -> String {
    "localhost".into()
}

fn default_server_port() -> u16 {
    25565
}

fn default_username() -> String {
    "Player".into()
}

fn default_version() -> String {
    "1.21.1".into()
}

fn default_read_timeout_secs() -> u64 {
    30
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            server_address: default_server_address(),
            server_port: default_server_port(),
            username: default_username(),
            version: default_version(),
            read_timeout_secs: default_read_timeout_secs(),
            login: false,
        }
    }
}

impl ClientConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            let config: ClientConfig = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::info!("No config file found at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }
}
