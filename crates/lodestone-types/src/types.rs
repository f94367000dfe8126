use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A namespaced resource identifier (e.g., "minecraft:brand").
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identifier {
    pub namespace: String,
    pub path: String,
}

impl Identifier {
    pub fn new(namespace: impl Into<String>, path: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            path: path.into(),
        }
    }

    pub fn vanilla(path: impl Into<String>) -> Self {
        Self::new("minecraft", path)
    }
}

impl std::fmt::Display for Identifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.namespace, self.path)
    }
}

impl std::str::FromStr for Identifier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if let Some((ns, path)) = s.split_once(':') {
            Ok(Self::new(ns, path))
        } else {
            Ok(Self::vanilla(s))
        }
    }
}

/// A block position in the world (x, y, z integers).
///
/// The wire encoding is version-dependent and lives in the protocol buffer,
/// not here.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }
}

/// A 3D position with double precision.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Vec3d {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3d {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }
}

/// A player's game profile (UUID + name + properties).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GameProfile {
    pub uuid: Uuid,
    pub name: String,
    pub properties: Vec<ProfileProperty>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProfileProperty {
    pub name: String,
    pub value: String,
    pub signature: Option<String>,
}

/// Text component for chat and disconnect reasons (simplified JSON text).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextComponent {
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bold: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub italic: Option<bool>,
    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub extra: Vec<TextComponent>,
}

impl TextComponent {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            color: None,
            bold: None,
            italic: None,
            extra: Vec::new(),
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| r#"{"text":""}"#.to_string())
    }

    pub fn from_json(json: &str) -> Self {
        match serde_json::from_str::<TextComponent>(json) {
            Ok(component) => component,
            // Servers may send a bare JSON string instead of an object.
            Err(_) => match serde_json::from_str::<String>(json) {
                Ok(text) => TextComponent::plain(text),
                Err(_) => TextComponent::plain(json),
            },
        }
    }

    /// Flatten this component and its children into plain text.
    pub fn to_plain(&self) -> String {
        let mut out = self.text.clone();
        for child in &self.extra {
            out.push_str(&child.to_plain());
        }
        out
    }
}

/// Game mode enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum GameMode {
    Survival = 0,
    Creative = 1,
    Adventure = 2,
    Spectator = 3,
}

impl GameMode {
    pub fn id(self) -> u8 {
        self as u8
    }

    pub fn from_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(GameMode::Survival),
            1 => Some(GameMode::Creative),
            2 => Some(GameMode::Adventure),
            3 => Some(GameMode::Spectator),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_identifier_parse() {
        let id = Identifier::from_str("lodestone:login_demo").unwrap();
        assert_eq!(id.namespace, "lodestone");
        assert_eq!(id.path, "login_demo");

        let bare = Identifier::from_str("brand").unwrap();
        assert_eq!(bare.namespace, "minecraft");
        assert_eq!(bare.to_string(), "minecraft:brand");
    }

    #[test]
    fn test_text_component_fallbacks() {
        let obj = TextComponent::from_json(r#"{"text":"kicked","extra":[{"text":" out"}]}"#);
        assert_eq!(obj.to_plain(), "kicked out");

        let bare = TextComponent::from_json(r#""outdated server""#);
        assert_eq!(bare.text, "outdated server");
    }

    #[test]
    fn test_game_mode_ids() {
        assert_eq!(GameMode::from_id(1), Some(GameMode::Creative));
        assert_eq!(GameMode::from_id(7), None);
        assert_eq!(GameMode::Spectator.id(), 3);
    }
}
