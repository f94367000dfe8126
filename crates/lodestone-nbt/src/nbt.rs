use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;

/// NBT tag type IDs.
pub const TAG_END: u8 = 0;
pub const TAG_BYTE: u8 = 1;
pub const TAG_SHORT: u8 = 2;
pub const TAG_INT: u8 = 3;
pub const TAG_LONG: u8 = 4;
pub const TAG_FLOAT: u8 = 5;
pub const TAG_DOUBLE: u8 = 6;
pub const TAG_BYTE_ARRAY: u8 = 7;
pub const TAG_STRING: u8 = 8;
pub const TAG_LIST: u8 = 9;
pub const TAG_COMPOUND: u8 = 10;
pub const TAG_INT_ARRAY: u8 = 11;
pub const TAG_LONG_ARRAY: u8 = 12;

/// Nesting limit when parsing untrusted server data.
const MAX_DEPTH: u32 = 128;

#[derive(Debug, Error)]
pub enum NbtError {
    #[error("unknown NBT tag id {0}")]
    UnknownTag(u8),
    #[error("not enough data")]
    NotEnoughData,
    #[error("NBT nested deeper than {MAX_DEPTH}")]
    TooDeep,
    #[error("negative length {0}")]
    NegativeLength(i32),
}

/// An NBT value.
#[derive(Debug, Clone, PartialEq)]
pub enum NbtValue {
    Byte(i8),
    Short(i16),
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    ByteArray(Vec<i8>),
    String(String),
    List(Vec<NbtValue>),
    Compound(Vec<(String, NbtValue)>),
    IntArray(Vec<i32>),
    LongArray(Vec<i64>),
}

impl NbtValue {
    pub fn tag_id(&self) -> u8 {
        match self {
            NbtValue::Byte(_) => TAG_BYTE,
            NbtValue::Short(_) => TAG_SHORT,
            NbtValue::Int(_) => TAG_INT,
            NbtValue::Long(_) => TAG_LONG,
            NbtValue::Float(_) => TAG_FLOAT,
            NbtValue::Double(_) => TAG_DOUBLE,
            NbtValue::ByteArray(_) => TAG_BYTE_ARRAY,
            NbtValue::String(_) => TAG_STRING,
            NbtValue::List(_) => TAG_LIST,
            NbtValue::Compound(_) => TAG_COMPOUND,
            NbtValue::IntArray(_) => TAG_INT_ARRAY,
            NbtValue::LongArray(_) => TAG_LONG_ARRAY,
        }
    }

    /// Look up a compound entry by name.
    pub fn get(&self, name: &str) -> Option<&NbtValue> {
        match self {
            NbtValue::Compound(entries) => entries
                .iter()
                .find(|(key, _)| key == name)
                .map(|(_, value)| value),
            _ => None,
        }
    }

    /// Write this value as a root compound tag (with empty name) for network protocol.
    pub fn write_root_network(&self, buf: &mut BytesMut) {
        // Network NBT since 1.20.2: root tag type byte, but NO name
        buf.put_u8(self.tag_id());
        self.write_payload(buf);
    }

    /// Write this value as a full named root tag (pre-1.20.2 network form).
    pub fn write_root_named(&self, name: &str, buf: &mut BytesMut) {
        buf.put_u8(self.tag_id());
        put_string(name, buf);
        self.write_payload(buf);
    }

    /// Write just the payload (no tag type or name).
    pub fn write_payload(&self, buf: &mut BytesMut) {
        match self {
            NbtValue::Byte(value) => buf.put_i8(*value),
            NbtValue::Short(value) => buf.put_i16(*value),
            NbtValue::Int(value) => buf.put_i32(*value),
            NbtValue::Long(value) => buf.put_i64(*value),
            NbtValue::Float(value) => buf.put_f32(*value),
            NbtValue::Double(value) => buf.put_f64(*value),
            NbtValue::ByteArray(values) => {
                buf.put_i32(values.len() as i32);
                buf.extend(values.iter().map(|b| *b as u8));
            }
            NbtValue::String(value) => put_string(value, buf),
            NbtValue::List(items) => {
                // The element tag of an empty list is TAG_END by convention.
                let item_tag = items.first().map_or(TAG_END, NbtValue::tag_id);
                buf.put_u8(item_tag);
                buf.put_i32(items.len() as i32);
                for item in items {
                    item.write_payload(buf);
                }
            }
            NbtValue::Compound(entries) => {
                for (name, value) in entries {
                    buf.put_u8(value.tag_id());
                    put_string(name, buf);
                    value.write_payload(buf);
                }
                buf.put_u8(TAG_END);
            }
            NbtValue::IntArray(values) => {
                buf.put_i32(values.len() as i32);
                for value in values {
                    buf.put_i32(*value);
                }
            }
            NbtValue::LongArray(values) => {
                buf.put_i32(values.len() as i32);
                for value in values {
                    buf.put_i64(*value);
                }
            }
        }
    }

    /// Read a root tag in network form (type byte, unnamed).
    pub fn read_root_network(buf: &mut BytesMut) -> Result<NbtValue, NbtError> {
        let tag = read_u8(buf)?;
        Self::read_payload(tag, buf, 0)
    }

    /// Read a named root tag (type byte + name), discarding the name.
    pub fn read_root_named(buf: &mut BytesMut) -> Result<NbtValue, NbtError> {
        let tag = read_u8(buf)?;
        let _name = take_string(buf)?;
        Self::read_payload(tag, buf, 0)
    }

    fn read_payload(tag: u8, buf: &mut BytesMut, depth: u32) -> Result<NbtValue, NbtError> {
        if depth > MAX_DEPTH {
            return Err(NbtError::TooDeep);
        }
        let value = match tag {
            TAG_BYTE => NbtValue::Byte(read_i8(buf)?),
            TAG_SHORT => {
                check_remaining(buf, 2)?;
                NbtValue::Short(buf.get_i16())
            }
            TAG_INT => {
                check_remaining(buf, 4)?;
                NbtValue::Int(buf.get_i32())
            }
            TAG_LONG => {
                check_remaining(buf, 8)?;
                NbtValue::Long(buf.get_i64())
            }
            TAG_FLOAT => {
                check_remaining(buf, 4)?;
                NbtValue::Float(buf.get_f32())
            }
            TAG_DOUBLE => {
                check_remaining(buf, 8)?;
                NbtValue::Double(buf.get_f64())
            }
            TAG_BYTE_ARRAY => {
                let len = read_len(buf)?;
                check_remaining(buf, len)?;
                let mut out = Vec::with_capacity(len);
                for _ in 0..len {
                    out.push(buf.get_i8());
                }
                NbtValue::ByteArray(out)
            }
            TAG_STRING => NbtValue::String(take_string(buf)?),
            TAG_LIST => {
                let item_tag = read_u8(buf)?;
                let len = read_len(buf)?;
                if item_tag == TAG_END && len > 0 {
                    return Err(NbtError::UnknownTag(TAG_END));
                }
                let mut out = Vec::with_capacity(len.min(4096));
                for _ in 0..len {
                    out.push(Self::read_payload(item_tag, buf, depth + 1)?);
                }
                NbtValue::List(out)
            }
            TAG_COMPOUND => {
                let mut entries = Vec::new();
                loop {
                    let entry_tag = read_u8(buf)?;
                    if entry_tag == TAG_END {
                        break;
                    }
                    let name = take_string(buf)?;
                    entries.push((name, Self::read_payload(entry_tag, buf, depth + 1)?));
                }
                NbtValue::Compound(entries)
            }
            TAG_INT_ARRAY => {
                let len = read_len(buf)?;
                check_remaining(buf, len * 4)?;
                let mut out = Vec::with_capacity(len);
                for _ in 0..len {
                    out.push(buf.get_i32());
                }
                NbtValue::IntArray(out)
            }
            TAG_LONG_ARRAY => {
                let len = read_len(buf)?;
                check_remaining(buf, len * 8)?;
                let mut out = Vec::with_capacity(len);
                for _ in 0..len {
                    out.push(buf.get_i64());
                }
                NbtValue::LongArray(out)
            }
            other => return Err(NbtError::UnknownTag(other)),
        };
        Ok(value)
    }
}

fn put_string(s: &str, buf: &mut BytesMut) {
    let bytes = s.as_bytes();
    buf.put_u16(bytes.len() as u16);
    buf.put_slice(bytes);
}

fn take_string(buf: &mut BytesMut) -> Result<String, NbtError> {
    check_remaining(buf, 2)?;
    let len = buf.get_u16() as usize;
    check_remaining(buf, len)?;
    let bytes = buf.split_to(len);
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

fn read_u8(buf: &mut BytesMut) -> Result<u8, NbtError> {
    check_remaining(buf, 1)?;
    Ok(buf.get_u8())
}

fn read_i8(buf: &mut BytesMut) -> Result<i8, NbtError> {
    check_remaining(buf, 1)?;
    Ok(buf.get_i8())
}

fn read_len(buf: &mut BytesMut) -> Result<usize, NbtError> {
    check_remaining(buf, 4)?;
    let len = buf.get_i32();
    if len < 0 {
        return Err(NbtError::NegativeLength(len));
    }
    Ok(len as usize)
}

fn check_remaining(buf: &BytesMut, needed: usize) -> Result<(), NbtError> {
    if buf.remaining() < needed {
        return Err(NbtError::NotEnoughData);
    }
    Ok(())
}

/// Helper macro for building compound tags.
#[macro_export]
macro_rules! nbt_compound {
    ($($key:expr => $val:expr),* $(,)?) => {
        $crate::NbtValue::Compound(vec![
            $(($key.into(), $val)),*
        ])
    };
}

/// Helper macro for building list tags.
#[macro_export]
macro_rules! nbt_list {
    ($($val:expr),* $(,)?) => {
        $crate::NbtValue::List(vec![$($val),*])
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_network_roundtrip() {
        let nbt = nbt_compound! {
            "dimension" => NbtValue::String("minecraft:overworld".into()),
            "sections" => nbt_list![NbtValue::Int(4), NbtValue::Int(9)],
            "motion_blocking" => NbtValue::LongArray(vec![-1, 0, 37]),
        };
        let mut buf = BytesMut::new();
        nbt.write_root_network(&mut buf);
        let parsed = NbtValue::read_root_network(&mut buf).unwrap();
        assert_eq!(parsed, nbt);
        assert!(buf.is_empty());
    }

    #[test]
    fn test_named_roundtrip_discards_name() {
        let nbt = nbt_compound! { "hp" => NbtValue::Float(20.0) };
        let mut buf = BytesMut::new();
        nbt.write_root_named("hearts", &mut buf);
        let parsed = NbtValue::read_root_named(&mut buf).unwrap();
        assert_eq!(parsed.get("hp"), Some(&NbtValue::Float(20.0)));
    }

    #[test]
    fn test_truncated_input() {
        let nbt = NbtValue::LongArray(vec![1, 2, 3]);
        let mut buf = BytesMut::new();
        buf.put_u8(nbt.tag_id());
        nbt.write_payload(&mut buf);
        buf.truncate(buf.len() - 1);
        assert!(matches!(
            NbtValue::read_root_network(&mut buf),
            Err(NbtError::NotEnoughData)
        ));
    }

    #[test]
    fn test_unknown_tag() {
        let mut buf = BytesMut::from(&[42u8][..]);
        assert!(matches!(
            NbtValue::read_root_network(&mut buf),
            Err(NbtError::UnknownTag(42))
        ));
    }
}
