//! Versioned binary record format for on-disk assets.
//!
//! Little-endian, one record per file: a magic/version header, three
//! length-prefixed strings, the fixed metadata fields, the payload, and
//! the raw uuid bytes at the tail. Every variable-width field is capped
//! on the way in; anything out of shape is a [`FormatError`], never a
//! panic.

use crate::asset::Asset;
use thiserror::Error;
use uuid::Uuid;

pub const MAGIC: u32 = 0x4641_4348;
pub const VERSION: u32 = 1;

/// Caps on variable-width fields, taken from the config clamps.
#[derive(Clone, Copy, Debug)]
pub struct Limits {
    pub max_string_bytes: usize,
    pub max_data_bytes: usize,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatError {
    #[error("bad magic {0:#010x}")]
    BadMagic(u32),
    #[error("unsupported version {0}")]
    UnsupportedVersion(u32),
    #[error("negative field length")]
    NegativeLength,
    #[error("string field of {len} bytes exceeds the {max} byte limit")]
    StringTooLong { len: usize, max: usize },
    #[error("payload of {len} bytes exceeds the {max} byte limit")]
    DataTooLarge { len: usize, max: usize },
    #[error("string field is not valid utf-8")]
    BadUtf8,
    #[error("record truncated")]
    Truncated,
}

pub fn encode(asset: &Asset) -> Vec<u8> {
    let mut out = Vec::with_capacity(
        4 + 4
            + 4 * 3
            + asset.id.len()
            + asset.name.len()
            + asset.description.len()
            + 1
            + 4
            + 4
            + asset.data.len()
            + 1
            + 1
            + 16,
    );
    out.extend_from_slice(&MAGIC.to_le_bytes());
    out.extend_from_slice(&VERSION.to_le_bytes());
    put_string(&mut out, &asset.id);
    put_string(&mut out, &asset.name);
    put_string(&mut out, &asset.description);
    out.push(asset.kind as u8);
    out.extend_from_slice(&asset.flags.to_le_bytes());
    out.extend_from_slice(&(asset.data.len() as u32).to_le_bytes());
    out.extend_from_slice(&asset.data);
    out.push(asset.local as u8);
    out.push(asset.temporary as u8);
    out.extend_from_slice(asset.uuid.as_bytes());
    out
}

pub fn decode(bytes: &[u8], limits: Limits) -> Result<Asset, FormatError> {
    let mut r = Reader { buf: bytes, pos: 0 };

    let magic = r.u32()?;
    if magic != MAGIC {
        return Err(FormatError::BadMagic(magic));
    }
    let version = r.u32()?;
    if version != VERSION {
        return Err(FormatError::UnsupportedVersion(version));
    }

    let id = r.string(limits.max_string_bytes)?;
    let name = r.string(limits.max_string_bytes)?;
    let description = r.string(limits.max_string_bytes)?;
    let kind = r.u8()? as i8;
    let flags = r.u32()?;

    let data_len = r.i32()?;
    if data_len < 0 {
        return Err(FormatError::NegativeLength);
    }
    let data_len = data_len as usize;
    if data_len > limits.max_data_bytes {
        return Err(FormatError::DataTooLarge {
            len: data_len,
            max: limits.max_data_bytes,
        });
    }
    let data = r.take(data_len)?.to_vec();

    let local = r.u8()? != 0;
    let temporary = r.u8()? != 0;

    let mut raw = [0u8; 16];
    raw.copy_from_slice(r.take(16)?);
    let uuid = Uuid::from_bytes(raw);

    Ok(Asset {
        id,
        uuid,
        name,
        description,
        kind,
        flags,
        data,
        local,
        temporary,
    })
}

fn put_string(out: &mut Vec<u8>, s: &str) {
    out.extend_from_slice(&(s.len() as u32).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
}

struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, len: usize) -> Result<&'a [u8], FormatError> {
        let end = self.pos.checked_add(len).ok_or(FormatError::Truncated)?;
        let slice = self.buf.get(self.pos..end).ok_or(FormatError::Truncated)?;
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, FormatError> {
        Ok(self.take(1)?[0])
    }

    fn u32(&mut self) -> Result<u32, FormatError> {
        let raw = self.take(4)?;
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn i32(&mut self) -> Result<i32, FormatError> {
        let raw = self.take(4)?;
        Ok(i32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
    }

    fn string(&mut self, max: usize) -> Result<String, FormatError> {
        let len = self.i32()?;
        if len < 0 {
            return Err(FormatError::NegativeLength);
        }
        let len = len as usize;
        if len > max {
            return Err(FormatError::StringTooLong { len, max });
        }
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| FormatError::BadUtf8)
    }
}
