use crate::buffer::{CodecError, PacketReader};
use crate::state::ProtocolState;
use crate::version::VersionId;
use bytes::BytesMut;
use std::collections::HashMap;
use thiserror::Error;
use tracing::trace;

/// Decodes one packet body. The id varint has already been consumed; the
/// reader holds the remaining frame bytes, bound to the session version.
pub type DecodeFn<P> = fn(&mut PacketReader) -> Result<P, CodecError>;

#[derive(Debug, Error)]
pub enum DecodeError {
    /// No descriptor for this (state, id, version). Recoverable: the frame
    /// is dropped and the connection continues.
    #[error("unknown packet id 0x{id:02X} in {state:?} for version {version}")]
    UnknownPacket {
        state: ProtocolState,
        id: i32,
        version: VersionId,
    },
    /// A registered decoder rejected the body. The peer is speaking the
    /// protocol wrong; treated as fatal.
    #[error("malformed {packet} packet: {source}")]
    Malformed {
        packet: &'static str,
        source: CodecError,
    },
}

impl DecodeError {
    pub fn is_recoverable(&self) -> bool {
        matches!(self, DecodeError::UnknownPacket { .. })
    }
}

/// One registration: a decode function valid for a half-open slice of
/// protocol history.
struct Descriptor<P> {
    name: &'static str,
    min_version: VersionId,
    max_version: VersionId,
    decode: DecodeFn<P>,
}

/// Maps (protocol state, packet id, version) to a decode function.
///
/// Built once by static registration code at startup; the same numeric id
/// may be registered several times with disjoint version ranges. Lookups
/// never mutate, so the registry is shared freely once built.
pub struct PacketRegistry<P> {
    descriptors: HashMap<(ProtocolState, i32), Vec<Descriptor<P>>>,
}

impl<P> PacketRegistry<P> {
    pub fn new() -> Self {
        Self {
            descriptors: HashMap::new(),
        }
    }

    /// Register a decoder for `id` in `state`, valid for versions in
    /// `min_version..=max_version`.
    ///
    /// Panics when the range overlaps an existing registration for the same
    /// (state, id): that is a bug in the registration tables, not a runtime
    /// condition.
    pub fn register(
        &mut self,
        state: ProtocolState,
        id: i32,
        min_version: VersionId,
        max_version: VersionId,
        name: &'static str,
        decode: DecodeFn<P>,
    ) {
        assert!(
            min_version <= max_version,
            "{name}: empty version range {min_version}..={max_version}"
        );
        let entries = self.descriptors.entry((state, id)).or_default();
        for existing in entries.iter() {
            if min_version <= existing.max_version && existing.min_version <= max_version {
                panic!(
                    "packet id 0x{id:02X} in {state:?}: {name} \
                     ({min_version}..={max_version}) overlaps {} \
                     ({}..={})",
                    existing.name, existing.min_version, existing.max_version
                );
            }
        }
        entries.push(Descriptor {
            name,
            min_version,
            max_version,
            decode,
        });
    }

    /// Decode a complete frame: id varint first, then the body through the
    /// matching descriptor. Deterministic for identical inputs.
    pub fn decode(
        &self,
        state: ProtocolState,
        version: VersionId,
        frame: BytesMut,
    ) -> Result<P, DecodeError> {
        let mut reader = PacketReader::new(frame, version);
        let id = reader
            .read_varint()
            .map_err(|source| DecodeError::Malformed {
                packet: "frame header",
                source,
            })?;

        let descriptor = self
            .descriptors
            .get(&(state, id))
            .and_then(|entries| {
                entries
                    .iter()
                    .find(|d| version >= d.min_version && version <= d.max_version)
            })
            .ok_or(DecodeError::UnknownPacket { state, id, version })?;

        trace!(
            "decode {} id=0x{:02X} len={}",
            descriptor.name,
            id,
            reader.remaining()
        );
        (descriptor.decode)(&mut reader).map_err(|source| DecodeError::Malformed {
            packet: descriptor.name,
            source,
        })
    }

    /// Descriptor name for diagnostics, if one matches.
    pub fn name_of(&self, state: ProtocolState, id: i32, version: VersionId) -> Option<&'static str> {
        self.descriptors.get(&(state, id)).and_then(|entries| {
            entries
                .iter()
                .find(|d| version >= d.min_version && version <= d.max_version)
                .map(|d| d.name)
        })
    }
}

impl<P> Default for PacketRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}
