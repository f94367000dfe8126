use std::collections::HashMap;
use std::sync::Arc;

/// Internal monotonic revision number. All version-conditional wire logic
/// compares against this, never against the wire protocol id (which is not
/// monotonic across snapshots).
pub type VersionId = i32;

// Wire-format change thresholds, named after the release that shipped the
// change. Only referenced from buffer accessors and per-packet codecs.

/// Entity ids and several counters switch from fixed-width ints to varints.
pub const V_14W04A: VersionId = 14;
/// Movement packets gain the trailing on-ground flag.
pub const V_14W25B: VersionId = 33;
/// Entity coordinates switch from fixed-point ints to doubles; most play
/// packet ids are reshuffled.
pub const V_15W31A: VersionId = 82;
/// Keep-alive ids widen from varint to i64.
pub const V_1_12_2: VersionId = 190;
/// Block positions switch to the x/z/y bit layout.
pub const V_18W43A: VersionId = 230;
/// Login success carries a binary UUID instead of its string form.
pub const V_1_16_PRE1: VersionId = 300;
/// Login success gains the profile property list.
pub const V_1_19: VersionId = 370;
/// Login start carries the player UUID; network NBT roots lose their name.
pub const V_1_20_2: VersionId = 420;

/// A protocol revision: human-readable name, internal monotonic id and the
/// wire protocol number sent in the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Version {
    pub name: String,
    pub version_id: VersionId,
    pub protocol_id: i32,
}

impl Version {
    fn new(name: &str, version_id: VersionId, protocol_id: i32) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            version_id,
            protocol_id,
        })
    }
}

impl std::fmt::Display for Version {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} (protocol {})", self.name, self.protocol_id)
    }
}

/// All versions the client speaks. Built once at startup and shared by
/// reference across sessions; immutable thereafter.
pub struct VersionRegistry {
    by_name: HashMap<String, Arc<Version>>,
    by_protocol: HashMap<i32, Arc<Version>>,
    latest: Arc<Version>,
}

impl VersionRegistry {
    pub fn builtin() -> Arc<Self> {
        let versions = vec![
            Version::new("1.7.10", 5, 5),
            Version::new("1.8.9", 60, 47),
            Version::new("1.12.2", V_1_12_2, 340),
            Version::new("1.14.4", 260, 498),
            Version::new("1.16.5", 310, 754),
            Version::new("1.19.4", 390, 762),
            Version::new("1.20.2", V_1_20_2, 764),
            Version::new("1.21.1", 460, 767),
        ];
        let latest = versions.last().expect("version table is empty").clone();
        let mut by_name = HashMap::new();
        let mut by_protocol = HashMap::new();
        for version in versions {
            by_name.insert(version.name.clone(), version.clone());
            by_protocol.insert(version.protocol_id, version);
        }
        Arc::new(Self {
            by_name,
            by_protocol,
            latest,
        })
    }

    pub fn by_name(&self, name: &str) -> Option<Arc<Version>> {
        self.by_name.get(name).cloned()
    }

    pub fn by_protocol(&self, protocol_id: i32) -> Option<Arc<Version>> {
        self.by_protocol.get(&protocol_id).cloned()
    }

    pub fn latest(&self) -> Arc<Version> {
        self.latest.clone()
    }
}
