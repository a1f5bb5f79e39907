//! Bag Record Framing
//!
//! Every record in a bag (and every record inside a decompressed chunk) has
//! the same framing:
//!
//! ```text
//! ┌───────────────────┬──────────────────────────┬─────────────────┬──────────┐
//! │ header_len (u32)  │ header fields            │ data_len (u32)  │ data     │
//! └───────────────────┴──────────────────────────┴─────────────────┴──────────┘
//!
//! header field:
//! ┌───────────────────┬──────────────────────────┐
//! │ field_len (u32)   │ name '=' value           │
//! └───────────────────┴──────────────────────────┘
//! ```
//!
//! All integers are little-endian. Field values are raw bytes whose meaning
//! depends on the field: `op` is a single byte, `conn`/`count`/`size` are
//! u32, `index_pos`/`chunk_pos` are u64, times are 8-byte [`Time`]s, and
//! `topic`/`compression`/`type` are text.
//!
//! The same name/value encoding is reused for the data section of
//! connection records, which carries the connection's type, md5sum, and
//! message definition.

use bytes::{Buf, BufMut, Bytes};
use std::collections::HashMap;

use crate::error::{Error, Result};
use crate::time::Time;

/// Record op codes
pub mod op {
    pub const MESSAGE_DATA: u8 = 0x02;
    pub const BAG_HEADER: u8 = 0x03;
    pub const INDEX_DATA: u8 = 0x04;
    pub const CHUNK: u8 = 0x05;
    pub const CHUNK_INFO: u8 = 0x06;
    pub const CONNECTION: u8 = 0x07;
}

/// Parsed header fields of a single record
#[derive(Debug, Clone, Default)]
pub struct RecordHeader {
    fields: HashMap<String, Bytes>,
}

impl RecordHeader {
    /// Parse a sequence of `len | name=value` fields.
    pub fn parse(data: Bytes) -> Result<Self> {
        let mut fields = HashMap::new();
        let mut cursor = data;

        while cursor.has_remaining() {
            if cursor.remaining() < 4 {
                return Err(Error::InvalidRecord(
                    "Truncated header field length".to_string(),
                ));
            }
            let field_len = cursor.get_u32_le() as usize;
            if cursor.remaining() < field_len {
                return Err(Error::InvalidRecord(format!(
                    "Header field length {} exceeds remaining {} bytes",
                    field_len,
                    cursor.remaining()
                )));
            }
            let field = cursor.split_to(field_len);
            let separator = field.iter().position(|b| *b == b'=').ok_or_else(|| {
                Error::InvalidRecord("Header field has no '=' separator".to_string())
            })?;
            let name = String::from_utf8_lossy(&field[..separator]).into_owned();
            fields.insert(name, field.slice(separator + 1..));
        }

        Ok(Self { fields })
    }

    pub fn get(&self, name: &str) -> Option<&Bytes> {
        self.fields.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn op(&self) -> Result<u8> {
        let value = self.get("op").ok_or(Error::MissingField("op"))?;
        value
            .first()
            .copied()
            .ok_or_else(|| Error::InvalidRecord("Empty op field".to_string()))
    }

    pub fn u32(&self, name: &'static str) -> Result<u32> {
        let value = self.fixed::<4>(name)?;
        Ok(u32::from_le_bytes(value))
    }

    pub fn u64(&self, name: &'static str) -> Result<u64> {
        let value = self.fixed::<8>(name)?;
        Ok(u64::from_le_bytes(value))
    }

    pub fn time(&self, name: &'static str) -> Result<Time> {
        let value = self.fixed::<8>(name)?;
        Time::from_le_bytes(value).ok_or_else(|| {
            Error::InvalidRecord(format!("Field '{}' has nanoseconds out of range", name))
        })
    }

    pub fn string(&self, name: &'static str) -> Result<String> {
        self.opt_string(name).ok_or(Error::MissingField(name))
    }

    /// Text value of a field, if present.
    pub fn opt_string(&self, name: &str) -> Option<String> {
        self.get(name)
            .map(|value| String::from_utf8_lossy(value).into_owned())
    }

    fn fixed<const N: usize>(&self, name: &'static str) -> Result<[u8; N]> {
        let value = self.get(name).ok_or(Error::MissingField(name))?;
        <[u8; N]>::try_from(&value[..]).map_err(|_| {
            Error::InvalidRecord(format!(
                "Field '{}' has {} bytes, expected {}",
                name,
                value.len(),
                N
            ))
        })
    }
}

/// One framed record: parsed header plus its (still encoded) data section
#[derive(Debug, Clone)]
pub struct RawRecord {
    pub header: RecordHeader,
    pub data: Bytes,
}

impl RawRecord {
    /// Decode one record from the front of `buf`.
    ///
    /// Returns the record and the number of bytes it occupied.
    pub fn decode(buf: &Bytes) -> Result<(Self, usize)> {
        let mut cursor = buf.clone();

        let header_len = read_len(&mut cursor, "header")?;
        let header = RecordHeader::parse(cursor.split_to(header_len))?;

        let data_len = read_len(&mut cursor, "data")?;
        let data = cursor.split_to(data_len);

        let consumed = 4 + header_len + 4 + data_len;
        Ok((Self { header, data }, consumed))
    }
}

fn read_len(cursor: &mut Bytes, section: &str) -> Result<usize> {
    if cursor.remaining() < 4 {
        return Err(Error::InvalidRecord(format!(
            "Unexpected end of record reading {} length",
            section
        )));
    }
    let len = cursor.get_u32_le() as usize;
    if cursor.remaining() < len {
        return Err(Error::InvalidRecord(format!(
            "Record {} length {} exceeds remaining {} bytes",
            section,
            len,
            cursor.remaining()
        )));
    }
    Ok(len)
}

/// Iterates over consecutive records in a buffer (e.g. a decompressed chunk)
pub struct RecordIter {
    remaining: Bytes,
    failed: bool,
}

impl RecordIter {
    pub fn new(data: Bytes) -> Self {
        Self {
            remaining: data,
            failed: false,
        }
    }
}

impl Iterator for RecordIter {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.remaining.is_empty() {
            return None;
        }
        match RawRecord::decode(&self.remaining) {
            Ok((record, consumed)) => {
                self.remaining.advance(consumed);
                Some(Ok(record))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

/// Encode header fields as `len | name=value` entries.
pub fn encode_fields(fields: &[(&str, &[u8])]) -> Vec<u8> {
    let mut out = Vec::new();
    for (name, value) in fields {
        out.put_u32_le((name.len() + 1 + value.len()) as u32);
        out.put_slice(name.as_bytes());
        out.put_u8(b'=');
        out.put_slice(value);
    }
    out
}

/// Append a framed record to `out`.
pub fn write_record(out: &mut impl BufMut, fields: &[(&str, &[u8])], data: &[u8]) {
    let header = encode_fields(fields);
    out.put_u32_le(header.len() as u32);
    out.put_slice(&header);
    out.put_u32_le(data.len() as u32);
    out.put_slice(data);
}
