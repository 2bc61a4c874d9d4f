use serde::Serialize;
use std::io::{self, Read, Write};

/// Archive layout:
/// - header (12 bytes):
///   - [u32 format_version]    `(major << 16) | (minor << 8) | patch`
///   - [u32 entry_count]
///   - [u32 data_start_offset] `HEADER_LEN + entry_count * RECORD_LEN`
/// - index, `entry_count` records (16 bytes each):
///   - [u64 id]
///   - [u32 start]             relative to data_start_offset
///   - [u32 size]
/// - data: raw file bytes, concatenated in index order
///
/// All integers are little-endian regardless of host. Older 0.1.0 writers used
/// host byte order, so archives they produced on big-endian hosts differ from
/// ours; little-endian hosts produce identical bytes.
pub const HEADER_LEN: u32 = 4 + 4 + 4; // version + count + data start
pub const RECORD_LEN: u32 = 8 + 4 + 4; // id + start + size

/// Default extension of the archive written next to a manifest.
pub const ARCHIVE_EXTENSION: &str = "apkg.bin";

/// Pack a `major.minor.patch` triple into the header's version word.
pub const fn pack_version(major: u8, minor: u8, patch: u8) -> u32 {
    ((major as u32) << 16) | ((minor as u32) << 8) | patch as u32
}

/// Split a version word back into `(major, minor, patch)`.
pub const fn unpack_version(v: u32) -> (u8, u8, u8) {
    ((v >> 16) as u8, (v >> 8) as u8, v as u8)
}

pub const FORMAT_VERSION: u32 = pack_version(0, 1, 0);

/// Offset of the first data byte for an archive holding `entry_count` records.
/// `None` if it does not fit the header's 32-bit field.
pub fn data_start_for(entry_count: u32) -> Option<u32> {
    entry_count.checked_mul(RECORD_LEN)?.checked_add(HEADER_LEN)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct ArchiveHeader {
    pub format_version: u32,
    pub entry_count: u32,
    pub data_start_offset: u32,
}

impl ArchiveHeader {
    /// Header for a fresh archive of `entry_count` records at the current format version.
    pub fn new(entry_count: u32) -> Option<Self> {
        Some(Self {
            format_version: FORMAT_VERSION,
            entry_count,
            data_start_offset: data_start_for(entry_count)?,
        })
    }

    pub fn to_bytes(&self) -> [u8; HEADER_LEN as usize] {
        let mut buf = [0u8; HEADER_LEN as usize];
        buf[0..4].copy_from_slice(&self.format_version.to_le_bytes());
        buf[4..8].copy_from_slice(&self.entry_count.to_le_bytes());
        buf[8..12].copy_from_slice(&self.data_start_offset.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; HEADER_LEN as usize]) -> Self {
        Self {
            format_version: le_u32(&buf[0..4]),
            entry_count: le_u32(&buf[4..8]),
            data_start_offset: le_u32(&buf[8..12]),
        }
    }

    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.to_bytes())
    }

    pub fn read_from<R: Read + ?Sized>(r: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; HEADER_LEN as usize];
        r.read_exact(&mut buf)?;
        Ok(Self::from_bytes(&buf))
    }

    /// Human-readable `major.minor.patch` of `format_version`.
    pub fn version_string(&self) -> String {
        let (major, minor, patch) = unpack_version(self.format_version);
        format!("{major}.{minor}.{patch}")
    }
}

/// One entry of the index table.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct IndexRecord {
    pub id: u64,
    pub start: u32, // relative to the data segment
    pub size: u32,
}

impl IndexRecord {
    pub fn to_bytes(&self) -> [u8; RECORD_LEN as usize] {
        let mut buf = [0u8; RECORD_LEN as usize];
        buf[0..8].copy_from_slice(&self.id.to_le_bytes());
        buf[8..12].copy_from_slice(&self.start.to_le_bytes());
        buf[12..16].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; RECORD_LEN as usize]) -> Self {
        let mut id8 = [0u8; 8];
        id8.copy_from_slice(&buf[0..8]);
        Self { id: u64::from_le_bytes(id8), start: le_u32(&buf[8..12]), size: le_u32(&buf[12..16]) }
    }

    pub fn write_to<W: Write + ?Sized>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&self.to_bytes())
    }

    pub fn read_from<R: Read + ?Sized>(r: &mut R) -> io::Result<Self> {
        let mut buf = [0u8; RECORD_LEN as usize];
        r.read_exact(&mut buf)?;
        Ok(Self::from_bytes(&buf))
    }

    /// One past the last data-relative byte of this record.
    pub fn end(&self) -> u64 {
        self.start as u64 + self.size as u64
    }
}

fn le_u32(b: &[u8]) -> u32 {
    let mut b4 = [0u8; 4];
    b4.copy_from_slice(b);
    u32::from_le_bytes(b4)
}
