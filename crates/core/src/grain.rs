//! Grain identity and its binary key encoding.
//!
//! A grain reference is one of four logical key shapes. The binary encoding
//! is a tagged, variable-length blob: a distinct tag byte per shape followed
//! by the key material, so encodings are unambiguous and round-trippable.
//! The zero integer key gets its own compact tags so that the common
//! "singleton grain" case is a single byte.

use crate::error::{Error, Result};
use uuid::Uuid;

/// Tag bytes for the grain key encoding. The split between the zero and
/// non-zero integer shapes is part of the wire format and must not change.
const TAG_ZERO: u8 = 0;
const TAG_ZERO_EXT: u8 = 1;
const TAG_INTEGER: u8 = 2;
const TAG_INTEGER_EXT: u8 = 3;
const TAG_GUID: u8 = 4;
const TAG_GUID_EXT: u8 = 5;

/// A reference to a grain, by its primary key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GrainRef {
    /// 64-bit integer key.
    Integer(i64),
    /// 64-bit integer key with a string key extension.
    IntegerWithExt(i64, String),
    /// 128-bit GUID key.
    Guid(Uuid),
    /// 128-bit GUID key with a string key extension.
    GuidWithExt(Uuid, String),
}

impl GrainRef {
    /// Encode this reference as a tagged binary key.
    pub fn encode(&self) -> Vec<u8> {
        match self {
            GrainRef::Integer(0) => vec![TAG_ZERO],
            GrainRef::IntegerWithExt(0, ext) => {
                let mut out = Vec::with_capacity(1 + ext.len());
                out.push(TAG_ZERO_EXT);
                out.extend_from_slice(ext.as_bytes());
                out
            }
            GrainRef::Integer(pk) => {
                let mut out = Vec::with_capacity(9);
                out.push(TAG_INTEGER);
                out.extend_from_slice(&pk.to_le_bytes());
                out
            }
            GrainRef::IntegerWithExt(pk, ext) => {
                let mut out = Vec::with_capacity(9 + ext.len());
                out.push(TAG_INTEGER_EXT);
                out.extend_from_slice(&pk.to_le_bytes());
                out.extend_from_slice(ext.as_bytes());
                out
            }
            GrainRef::Guid(pk) => {
                let mut out = Vec::with_capacity(17);
                out.push(TAG_GUID);
                out.extend_from_slice(pk.as_bytes());
                out
            }
            GrainRef::GuidWithExt(pk, ext) => {
                let mut out = Vec::with_capacity(17 + ext.len());
                out.push(TAG_GUID_EXT);
                out.extend_from_slice(pk.as_bytes());
                out.extend_from_slice(ext.as_bytes());
                out
            }
        }
    }

    /// Decode a tagged binary key back into a reference.
    ///
    /// Exact inverse of [`encode`](Self::encode). Fails on an empty buffer,
    /// an unknown tag, truncated key material, or a non-UTF-8 extension.
    pub fn decode(data: &[u8]) -> Result<Self> {
        let (&tag, rest) = data
            .split_first()
            .ok_or_else(|| Error::InvalidGrainKey("empty key blob".to_string()))?;

        match tag {
            TAG_ZERO if rest.is_empty() => Ok(GrainRef::Integer(0)),
            TAG_ZERO => Err(Error::InvalidGrainKey(format!(
                "zero-key tag followed by {} trailing bytes",
                rest.len()
            ))),
            TAG_ZERO_EXT => Ok(GrainRef::IntegerWithExt(0, decode_ext(rest)?)),
            TAG_INTEGER => Ok(GrainRef::Integer(decode_i64(rest, true)?)),
            TAG_INTEGER_EXT => {
                let pk = decode_i64(rest, false)?;
                Ok(GrainRef::IntegerWithExt(pk, decode_ext(&rest[8..])?))
            }
            TAG_GUID => Ok(GrainRef::Guid(decode_uuid(rest, true)?)),
            TAG_GUID_EXT => {
                let pk = decode_uuid(rest, false)?;
                Ok(GrainRef::GuidWithExt(pk, decode_ext(&rest[16..])?))
            }
            other => Err(Error::InvalidGrainKey(format!("unknown tag byte {other}"))),
        }
    }

    /// The key extension, if this shape carries one.
    pub fn key_ext(&self) -> Option<&str> {
        match self {
            GrainRef::IntegerWithExt(_, ext) | GrainRef::GuidWithExt(_, ext) => Some(ext),
            _ => None,
        }
    }
}

impl std::fmt::Display for GrainRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            GrainRef::Integer(pk) => write!(f, "grain/{pk}"),
            GrainRef::IntegerWithExt(pk, ext) => write!(f, "grain/{pk}+{ext}"),
            GrainRef::Guid(pk) => write!(f, "grain/{pk}"),
            GrainRef::GuidWithExt(pk, ext) => write!(f, "grain/{pk}+{ext}"),
        }
    }
}

fn decode_ext(data: &[u8]) -> Result<String> {
    String::from_utf8(data.to_vec())
        .map_err(|e| Error::InvalidGrainKey(format!("key extension is not UTF-8: {e}")))
}

fn decode_i64(data: &[u8], exact: bool) -> Result<i64> {
    if data.len() < 8 || (exact && data.len() != 8) {
        return Err(Error::InvalidGrainKey(format!(
            "expected 8-byte integer key, got {} bytes",
            data.len()
        )));
    }
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&data[..8]);
    Ok(i64::from_le_bytes(bytes))
}

fn decode_uuid(data: &[u8], exact: bool) -> Result<Uuid> {
    if data.len() < 16 || (exact && data.len() != 16) {
        return Err(Error::InvalidGrainKey(format!(
            "expected 16-byte GUID key, got {} bytes",
            data.len()
        )));
    }
    let mut bytes = [0u8; 16];
    bytes.copy_from_slice(&data[..16]);
    Ok(Uuid::from_bytes(bytes))
}
