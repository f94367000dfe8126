use crate::version::{VersionId, V_14W04A, V_18W43A, V_1_20_2};
use bytes::{Buf, BufMut, BytesMut};
use lodestone_nbt::{NbtError, NbtValue};
use lodestone_types::BlockPos;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("read past end of buffer")]
    OutOfBounds,
    #[error("VarInt too big")]
    VarIntTooBig,
    #[error("string too long: {0} > {1}")]
    StringTooLong(usize, usize),
    #[error("negative length {0}")]
    NegativeLength(i32),
    #[error("invalid {0}")]
    InvalidValue(&'static str),
    #[error("NBT: {0}")]
    Nbt(#[from] NbtError),
}

pub type CodecResult<T> = Result<T, CodecError>;

/// Cursor-based reader over one packet's bytes, bound to the session's
/// protocol version. Every accessor advances the cursor by exactly the
/// bytes it consumes; version-dependent layouts branch here and nowhere
/// else. Single-owner, no internal locking.
pub struct PacketReader {
    buf: BytesMut,
    version: VersionId,
}

impl PacketReader {
    pub fn new(buf: BytesMut, version: VersionId) -> Self {
        Self { buf, version }
    }

    pub fn version(&self) -> VersionId {
        self.version
    }

    pub fn remaining(&self) -> usize {
        self.buf.remaining()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    fn check(&self, needed: usize) -> CodecResult<()> {
        if self.buf.remaining() < needed {
            return Err(CodecError::OutOfBounds);
        }
        Ok(())
    }

    pub fn read_u8(&mut self) -> CodecResult<u8> {
        self.check(1)?;
        Ok(self.buf.get_u8())
    }

    pub fn read_i8(&mut self) -> CodecResult<i8> {
        self.check(1)?;
        Ok(self.buf.get_i8())
    }

    pub fn read_bool(&mut self) -> CodecResult<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_u16(&mut self) -> CodecResult<u16> {
        self.check(2)?;
        Ok(self.buf.get_u16())
    }

    pub fn read_i16(&mut self) -> CodecResult<i16> {
        self.check(2)?;
        Ok(self.buf.get_i16())
    }

    pub fn read_i32(&mut self) -> CodecResult<i32> {
        self.check(4)?;
        Ok(self.buf.get_i32())
    }

    pub fn read_i64(&mut self) -> CodecResult<i64> {
        self.check(8)?;
        Ok(self.buf.get_i64())
    }

    pub fn read_f32(&mut self) -> CodecResult<f32> {
        self.check(4)?;
        Ok(self.buf.get_f32())
    }

    pub fn read_f64(&mut self) -> CodecResult<f64> {
        self.check(8)?;
        Ok(self.buf.get_f64())
    }

    pub fn read_varint(&mut self) -> CodecResult<i32> {
        let mut result: i32 = 0;
        let mut shift: u32 = 0;
        loop {
            if !self.buf.has_remaining() {
                return Err(CodecError::OutOfBounds);
            }
            let byte = self.buf.get_u8();
            result |= ((byte & 0x7F) as i32) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift >= 32 {
                return Err(CodecError::VarIntTooBig);
            }
        }
    }

    pub fn read_varlong(&mut self) -> CodecResult<i64> {
        let mut result: i64 = 0;
        let mut shift: u32 = 0;
        loop {
            if !self.buf.has_remaining() {
                return Err(CodecError::OutOfBounds);
            }
            let byte = self.buf.get_u8();
            result |= ((byte & 0x7F) as i64) << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
            if shift >= 64 {
                return Err(CodecError::VarIntTooBig);
            }
        }
    }

    /// Read a varint-prefixed UTF-8 string. `max_chars` is the semantic
    /// character cap; the wire cap is four bytes per character.
    pub fn read_string(&mut self, max_chars: usize) -> CodecResult<String> {
        let len = self.read_varint()?;
        if len < 0 {
            return Err(CodecError::NegativeLength(len));
        }
        let len = len as usize;
        if len > max_chars * 4 {
            return Err(CodecError::StringTooLong(len, max_chars));
        }
        self.check(len)?;
        let bytes = self.buf.split_to(len);
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    pub fn read_uuid(&mut self) -> CodecResult<Uuid> {
        self.check(16)?;
        let mut bytes = [0u8; 16];
        self.buf.copy_to_slice(&mut bytes);
        Ok(Uuid::from_bytes(bytes))
    }

    /// Entity ids are varints since 14w04a, fixed i32 before.
    pub fn read_entity_id(&mut self) -> CodecResult<i32> {
        if self.version >= V_14W04A {
            self.read_varint()
        } else {
            self.read_i32()
        }
    }

    /// Rotation angle in 256ths of a full turn.
    pub fn read_angle(&mut self) -> CodecResult<f32> {
        Ok(self.read_u8()? as f32 * (360.0 / 256.0))
    }

    /// Block positions pack into one i64. The bit layout flipped in 18w43a:
    /// x26/y12/z26 before, x26/z26/y12 after.
    pub fn read_block_pos(&mut self) -> CodecResult<BlockPos> {
        let raw = self.read_i64()? as u64;
        let pos = if self.version >= V_18W43A {
            let x = unpack_signed((raw >> 38) & 0x3FF_FFFF, 26);
            let z = unpack_signed((raw >> 12) & 0x3FF_FFFF, 26);
            let y = unpack_signed(raw & 0xFFF, 12);
            BlockPos::new(x, y, z)
        } else {
            let x = unpack_signed((raw >> 38) & 0x3FF_FFFF, 26);
            let y = unpack_signed((raw >> 26) & 0xFFF, 12);
            let z = unpack_signed(raw & 0x3FF_FFFF, 26);
            BlockPos::new(x, y, z)
        };
        Ok(pos)
    }

    /// Varint-prefixed byte array.
    pub fn read_byte_array(&mut self) -> CodecResult<Vec<u8>> {
        let len = self.read_varint()?;
        if len < 0 {
            return Err(CodecError::NegativeLength(len));
        }
        self.check(len as usize)?;
        Ok(self.buf.split_to(len as usize).to_vec())
    }

    /// Consume everything left in the packet.
    pub fn read_rest(&mut self) -> Vec<u8> {
        let len = self.buf.len();
        self.buf.split_to(len).to_vec()
    }

    /// Varint-counted array of i64 words, lowest bit first.
    pub fn read_bitset(&mut self) -> CodecResult<Vec<u64>> {
        let count = self.read_varint()?;
        if count < 0 {
            return Err(CodecError::NegativeLength(count));
        }
        let mut words = Vec::with_capacity((count as usize).min(1024));
        for _ in 0..count {
            words.push(self.read_i64()? as u64);
        }
        Ok(words)
    }

    /// Bool-prefixed optional value.
    pub fn read_option<T>(
        &mut self,
        read: impl FnOnce(&mut Self) -> CodecResult<T>,
    ) -> CodecResult<Option<T>> {
        if self.read_bool()? {
            Ok(Some(read(self)?))
        } else {
            Ok(None)
        }
    }

    /// Varint-counted array of values.
    pub fn read_array<T>(
        &mut self,
        mut read: impl FnMut(&mut Self) -> CodecResult<T>,
    ) -> CodecResult<Vec<T>> {
        let count = self.read_varint()?;
        if count < 0 {
            return Err(CodecError::NegativeLength(count));
        }
        let mut out = Vec::with_capacity((count as usize).min(4096));
        for _ in 0..count {
            out.push(read(self)?);
        }
        Ok(out)
    }

    /// NBT root: unnamed network form since 1.20.2, named root before.
    pub fn read_nbt(&mut self) -> CodecResult<NbtValue> {
        let value = if self.version >= V_1_20_2 {
            NbtValue::read_root_network(&mut self.buf)?
        } else {
            NbtValue::read_root_named(&mut self.buf)?
        };
        Ok(value)
    }
}

fn unpack_signed(raw: u64, bits: u32) -> i32 {
    let mut value = raw as i64;
    if value >= 1 << (bits - 1) {
        value -= 1 << bits;
    }
    value as i32
}

/// Write-side counterpart of [`PacketReader`]. Appends to an owned buffer;
/// the version governs the same layout branches as the reader.
pub struct PacketWriter {
    buf: BytesMut,
    version: VersionId,
}

impl PacketWriter {
    pub fn new(version: VersionId) -> Self {
        Self {
            buf: BytesMut::new(),
            version,
        }
    }

    pub fn version(&self) -> VersionId {
        self.version
    }

    pub fn into_bytes(self) -> BytesMut {
        self.buf
    }

    pub fn write_u8(&mut self, value: u8) {
        self.buf.put_u8(value);
    }

    pub fn write_i8(&mut self, value: i8) {
        self.buf.put_i8(value);
    }

    pub fn write_bool(&mut self, value: bool) {
        self.buf.put_u8(value as u8);
    }

    pub fn write_u16(&mut self, value: u16) {
        self.buf.put_u16(value);
    }

    pub fn write_i16(&mut self, value: i16) {
        self.buf.put_i16(value);
    }

    pub fn write_i32(&mut self, value: i32) {
        self.buf.put_i32(value);
    }

    pub fn write_i64(&mut self, value: i64) {
        self.buf.put_i64(value);
    }

    pub fn write_f32(&mut self, value: f32) {
        self.buf.put_f32(value);
    }

    pub fn write_f64(&mut self, value: f64) {
        self.buf.put_f64(value);
    }

    pub fn write_varint(&mut self, mut value: i32) {
        loop {
            let mut byte = (value & 0x7F) as u8;
            value = ((value as u32) >> 7) as i32;
            if value != 0 {
                byte |= 0x80;
            }
            self.buf.put_u8(byte);
            if value == 0 {
                break;
            }
        }
    }

    pub fn write_varlong(&mut self, mut value: i64) {
        loop {
            let mut byte = (value & 0x7F) as u8;
            value = ((value as u64) >> 7) as i64;
            if value != 0 {
                byte |= 0x80;
            }
            self.buf.put_u8(byte);
            if value == 0 {
                break;
            }
        }
    }

    pub fn write_string(&mut self, value: &str) {
        self.write_varint(value.len() as i32);
        self.buf.put_slice(value.as_bytes());
    }

    pub fn write_uuid(&mut self, value: &Uuid) {
        self.buf.put_slice(value.as_bytes());
    }

    pub fn write_entity_id(&mut self, value: i32) {
        if self.version >= V_14W04A {
            self.write_varint(value);
        } else {
            self.write_i32(value);
        }
    }

    pub fn write_angle(&mut self, degrees: f32) {
        self.write_u8((degrees * (256.0 / 360.0)) as u8);
    }

    pub fn write_block_pos(&mut self, pos: &BlockPos) {
        let raw = if self.version >= V_18W43A {
            ((pos.x as u64 & 0x3FF_FFFF) << 38)
                | ((pos.z as u64 & 0x3FF_FFFF) << 12)
                | (pos.y as u64 & 0xFFF)
        } else {
            ((pos.x as u64 & 0x3FF_FFFF) << 38)
                | ((pos.y as u64 & 0xFFF) << 26)
                | (pos.z as u64 & 0x3FF_FFFF)
        };
        self.buf.put_u64(raw);
    }

    pub fn write_byte_array(&mut self, data: &[u8]) {
        self.write_varint(data.len() as i32);
        self.buf.put_slice(data);
    }

    pub fn write_bytes(&mut self, data: &[u8]) {
        self.buf.put_slice(data);
    }

    pub fn write_bitset(&mut self, words: &[u64]) {
        self.write_varint(words.len() as i32);
        for word in words {
            self.buf.put_i64(*word as i64);
        }
    }

    pub fn write_option<T>(
        &mut self,
        value: Option<&T>,
        write: impl FnOnce(&mut Self, &T),
    ) {
        match value {
            Some(value) => {
                self.write_bool(true);
                write(self, value);
            }
            None => self.write_bool(false),
        }
    }

    pub fn write_nbt(&mut self, value: &NbtValue) {
        if self.version >= V_1_20_2 {
            value.write_root_network(&mut self.buf);
        } else {
            value.write_root_named("", &mut self.buf);
        }
    }
}

/// Calculate the byte length of a varint without writing it.
pub fn varint_len(value: i32) -> usize {
    let mut val = value as u32;
    let mut len = 0;
    loop {
        len += 1;
        val >>= 7;
        if val == 0 {
            break;
        }
    }
    len
}
