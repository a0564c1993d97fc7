//! Atom tree and low-level writing primitives.
//!
//! A QuickTime movie is a sequence of nested atoms. Each atom has:
//! - 4-byte big-endian size (includes header)
//! - 4-byte ASCII type (e.g. "ftyp", "moov", "mdat")
//! - an optional 8-byte extended size when the size field is 1
//!
//! The metadata tree (`moov`) is built in memory as [`Atom`] values whose
//! sizes are computed bottom-up on construction, then streamed out in one
//! pass. Only `mdat`, whose length is unknown while samples are still being
//! appended, uses seek-back patching.

use std::io::{Seek, SeekFrom, Write};
use std::time::{SystemTime, UNIX_EPOCH};

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};

use crate::error::MuxResult;

/// Movie-level timescale (1000 = millisecond precision).
pub const MOVIE_TIMESCALE: u32 = 1000;

/// Seconds between 1904-01-01 (QuickTime epoch) and 1970-01-01 (Unix epoch).
pub const MAC_EPOCH_OFFSET: u64 = 2_082_844_800;

const HEADER_LEN: u64 = 8;
const LARGE_HEADER_LEN: u64 = 16;

/// One node of the atom tree: raw payload bytes or child atoms.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AtomBody {
    Data(Vec<u8>),
    Children(Vec<Atom>),
}

/// An atom with its total encoded size (header included) fixed at construction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Atom {
    kind: [u8; 4],
    size: u64,
    body: AtomBody,
}

impl Atom {
    /// An atom holding raw payload bytes.
    pub fn leaf(kind: &[u8; 4], data: Vec<u8>) -> Self {
        let size = with_header(data.len() as u64);
        Self {
            kind: *kind,
            size,
            body: AtomBody::Data(data),
        }
    }

    /// A container atom. Its size is the header plus the children's sizes.
    pub fn parent(kind: &[u8; 4], children: Vec<Atom>) -> Self {
        let size = with_header(children.iter().map(Atom::size).sum());
        Self {
            kind: *kind,
            size,
            body: AtomBody::Children(children),
        }
    }

    pub fn kind(&self) -> &[u8; 4] {
        &self.kind
    }

    pub fn body(&self) -> &AtomBody {
        &self.body
    }

    /// Total encoded length, header included.
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Header length: 8, or 16 when the size needs the 64-bit field.
    pub fn header_len(&self) -> u64 {
        if self.size > u64::from(u32::MAX) {
            LARGE_HEADER_LEN
        } else {
            HEADER_LEN
        }
    }

    /// First direct child of the given type.
    pub fn child(&self, kind: &[u8; 4]) -> Option<&Atom> {
        match &self.body {
            AtomBody::Children(children) => children.iter().find(|c| &c.kind == kind),
            AtomBody::Data(_) => None,
        }
    }

    /// Serialize this atom and everything below it.
    pub fn write_to<W: Write>(&self, writer: &mut W) -> MuxResult<()> {
        if self.header_len() == LARGE_HEADER_LEN {
            write_large_box_header(writer, &self.kind, self.size)?;
        } else {
            write_box_header(writer, &self.kind, self.size as u32)?;
        }
        match &self.body {
            AtomBody::Data(data) => writer.write_all(data)?,
            AtomBody::Children(children) => {
                for child in children {
                    child.write_to(writer)?;
                }
            }
        }
        Ok(())
    }
}

fn with_header(body_len: u64) -> u64 {
    if body_len + HEADER_LEN > u64::from(u32::MAX) {
        body_len + LARGE_HEADER_LEN
    } else {
        body_len + HEADER_LEN
    }
}

/// Big-endian payload builder for leaf atoms.
#[derive(Clone, Debug, Default)]
pub struct Payload(Vec<u8>);

impl Payload {
    pub fn new() -> Self {
        Self(Vec::new())
    }

    /// Start a "full atom" payload: 1-byte version + 3-byte flags.
    pub fn full(version: u8, flags: u32) -> Self {
        let mut payload = Self::new();
        payload.u32((u32::from(version) << 24) | (flags & 0x00FF_FFFF));
        payload
    }

    pub fn u8(&mut self, value: u8) -> &mut Self {
        self.0.push(value);
        self
    }

    pub fn u16(&mut self, value: u16) -> &mut Self {
        let mut buf = [0u8; 2];
        BigEndian::write_u16(&mut buf, value);
        self.bytes(&buf)
    }

    pub fn i16(&mut self, value: i16) -> &mut Self {
        let mut buf = [0u8; 2];
        BigEndian::write_i16(&mut buf, value);
        self.bytes(&buf)
    }

    pub fn u32(&mut self, value: u32) -> &mut Self {
        let mut buf = [0u8; 4];
        BigEndian::write_u32(&mut buf, value);
        self.bytes(&buf)
    }

    pub fn i32(&mut self, value: i32) -> &mut Self {
        let mut buf = [0u8; 4];
        BigEndian::write_i32(&mut buf, value);
        self.bytes(&buf)
    }

    pub fn u64(&mut self, value: u64) -> &mut Self {
        let mut buf = [0u8; 8];
        BigEndian::write_u64(&mut buf, value);
        self.bytes(&buf)
    }

    /// Fixed-point 16.16 number.
    pub fn fixed16_16(&mut self, value: f64) -> &mut Self {
        self.i32((value * 65536.0).round() as i32)
    }

    /// Fixed-point 8.8 number.
    pub fn fixed8_8(&mut self, value: f64) -> &mut Self {
        self.i16((value * 256.0).round() as i16)
    }

    pub fn bytes(&mut self, data: &[u8]) -> &mut Self {
        self.0.extend_from_slice(data);
        self
    }

    pub fn zeros(&mut self, count: usize) -> &mut Self {
        self.0.resize(self.0.len() + count, 0);
        self
    }

    /// Length-prefixed string padded with zeros to `len` bytes in total.
    pub fn pascal_string(&mut self, s: &str, len: usize) -> &mut Self {
        if len == 0 {
            return self;
        }
        let max = len.saturating_sub(1).min(255);
        let text = &s.as_bytes()[..s.len().min(max)];
        self.u8(text.len() as u8).bytes(text);
        self.zeros(len - 1 - text.len())
    }

    /// Unity transformation matrix (identity in 16.16, w in 2.30).
    pub fn unity_matrix(&mut self) -> &mut Self {
        self.fixed16_16(1.0).fixed16_16(0.0).u32(0);
        self.fixed16_16(0.0).fixed16_16(1.0).u32(0);
        self.fixed16_16(0.0).fixed16_16(0.0).u32(0x4000_0000)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn into_atom(self, kind: &[u8; 4]) -> Atom {
        Atom::leaf(kind, self.0)
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.0
    }
}

/// Write a standard atom header: 4-byte size + 4-byte type.
pub fn write_box_header<W: Write>(writer: &mut W, box_type: &[u8; 4], size: u32) -> MuxResult<()> {
    writer.write_u32::<BigEndian>(size)?;
    writer.write_all(box_type)?;
    Ok(())
}

/// Write a 64-bit atom header (size == 1 signals the extended size).
pub fn write_large_box_header<W: Write>(
    writer: &mut W,
    box_type: &[u8; 4],
    large_size: u64,
) -> MuxResult<()> {
    writer.write_u32::<BigEndian>(1)?;
    writer.write_all(box_type)?;
    writer.write_u64::<BigEndian>(large_size)?;
    Ok(())
}

/// Write a 64-bit atom header with a zero placeholder and return the
/// position of the extended size field.
pub fn large_box_size_placeholder<W: Write + Seek>(
    writer: &mut W,
    box_type: &[u8; 4],
) -> MuxResult<u64> {
    writer.write_u32::<BigEndian>(1)?;
    writer.write_all(box_type)?;
    let size_pos = writer.stream_position()?;
    writer.write_u64::<BigEndian>(0)?;
    Ok(size_pos)
}

/// Patch a 64-bit extended size. `size_pos` points at the 8-byte field that
/// follows the 8-byte standard header. Returns the patched size.
pub fn fill_large_box_size<W: Write + Seek>(writer: &mut W, size_pos: u64) -> MuxResult<u64> {
    let current = writer.stream_position()?;
    let total_size = current - (size_pos - HEADER_LEN);
    writer.seek(SeekFrom::Start(size_pos))?;
    writer.write_u64::<BigEndian>(total_size)?;
    writer.seek(SeekFrom::Start(current))?;
    Ok(total_size)
}

/// Convert `value` from one timescale to another (truncating).
pub fn rescale(value: u64, from: u32, to: u32) -> u64 {
    if from == 0 {
        return 0;
    }
    (u128::from(value) * u128::from(to) / u128::from(from)) as u64
}

/// Current time as QuickTime creation time (seconds since 1904).
pub fn mac_time_now() -> u32 {
    let unix = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default();
    (unix + MAC_EPOCH_OFFSET) as u32
}
