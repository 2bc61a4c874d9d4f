use serde::Serialize;
use std::fs::File;
use std::io::{self, BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::format::{ArchiveHeader, IndexRecord, HEADER_LEN, RECORD_LEN};

#[derive(Debug, Error)]
pub enum InspectError {
    #[error("cannot open archive {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("archive {path:?} is truncated or unreadable: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("archive {path:?} declares {count} entries but is only {file_len} bytes long")]
    IndexTruncated { path: PathBuf, count: u32, file_len: u64 },

    #[error("entry {index} ({start}..{end}) lies past the end of the {file_len}-byte archive")]
    EntryOutOfBounds { index: usize, start: u64, end: u64, file_len: u64 },

    #[error("entry {index} out of range ({count} entries)")]
    NoSuchEntry { index: usize, count: usize },
}

/// Decoded header and index of an archive on disk.
#[derive(Clone, Debug, Serialize)]
pub struct ArchiveLayout {
    pub header: ArchiveHeader,
    pub records: Vec<IndexRecord>,
    /// Length of the archive file in bytes.
    pub file_len: u64,
}

/// A broken layout invariant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LayoutIssue {
    DataStartMismatch { declared: u32, expected: u64 },
    StartMismatch { index: usize, declared: u32, expected: u64 },
    LengthMismatch { file_len: u64, expected: u64 },
}

impl std::fmt::Display for LayoutIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LayoutIssue::DataStartMismatch { declared, expected } => {
                write!(f, "data start is {declared}, expected {expected}")
            }
            LayoutIssue::StartMismatch { index, declared, expected } => {
                write!(f, "entry {index} starts at {declared}, expected {expected}")
            }
            LayoutIssue::LengthMismatch { file_len, expected } => {
                write!(f, "archive is {file_len} bytes, expected {expected}")
            }
        }
    }
}

impl ArchiveLayout {
    /// Sum of all record sizes.
    pub fn data_len(&self) -> u64 {
        self.records.iter().map(|r| r.size as u64).sum()
    }

    /// Check offsets and lengths against each other and the file size.
    pub fn check(&self) -> Vec<LayoutIssue> {
        let mut issues = Vec::new();
        let expected_start =
            HEADER_LEN as u64 + RECORD_LEN as u64 * self.header.entry_count as u64;
        if self.header.data_start_offset as u64 != expected_start {
            issues.push(LayoutIssue::DataStartMismatch {
                declared: self.header.data_start_offset,
                expected: expected_start,
            });
        }
        let mut pos = 0u64;
        for (index, r) in self.records.iter().enumerate() {
            if r.start as u64 != pos {
                issues.push(LayoutIssue::StartMismatch { index, declared: r.start, expected: pos });
            }
            pos += r.size as u64;
        }
        let expected = expected_start + pos;
        if self.file_len != expected {
            issues.push(LayoutIssue::LengthMismatch { file_len: self.file_len, expected });
        }
        issues
    }
}

/// Read header and index of the archive at `path`.
pub fn read_layout(path: &Path) -> Result<ArchiveLayout, InspectError> {
    let f = File::open(path)
        .map_err(|source| InspectError::Open { path: path.to_path_buf(), source })?;
    let rerr = |source| InspectError::Read { path: path.to_path_buf(), source };
    let file_len = f.metadata().map_err(rerr)?.len();
    let mut r = BufReader::new(f);
    let header = ArchiveHeader::read_from(&mut r).map_err(rerr)?;
    // Header fields are untrusted: size the index by what the file can hold.
    let index_len = RECORD_LEN as u64 * header.entry_count as u64;
    if index_len > file_len.saturating_sub(HEADER_LEN as u64) {
        return Err(InspectError::IndexTruncated {
            path: path.to_path_buf(),
            count: header.entry_count,
            file_len,
        });
    }
    let mut records = Vec::with_capacity(header.entry_count as usize);
    for _ in 0..header.entry_count {
        records.push(IndexRecord::read_from(&mut r).map_err(rerr)?);
    }
    Ok(ArchiveLayout { header, records, file_len })
}

/// Bytes of entry `index`, located through `layout`.
pub fn read_entry(path: &Path, layout: &ArchiveLayout, index: usize) -> Result<Vec<u8>, InspectError> {
    let rec = layout
        .records
        .get(index)
        .ok_or(InspectError::NoSuchEntry { index, count: layout.records.len() })?;
    let start = layout.header.data_start_offset as u64 + rec.start as u64;
    let end = start + rec.size as u64;
    if end > layout.file_len {
        return Err(InspectError::EntryOutOfBounds { index, start, end, file_len: layout.file_len });
    }
    let mut f = File::open(path)
        .map_err(|source| InspectError::Open { path: path.to_path_buf(), source })?;
    let rerr = |source| InspectError::Read { path: path.to_path_buf(), source };
    f.seek(SeekFrom::Start(start)).map_err(rerr)?;
    let mut buf = vec![0u8; rec.size as usize];
    f.read_exact(&mut buf).map_err(rerr)?;
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layout(data_start: u32, recs: &[(u64, u32, u32)], file_len: u64) -> ArchiveLayout {
        ArchiveLayout {
            header: ArchiveHeader {
                format_version: crate::format::FORMAT_VERSION,
                entry_count: recs.len() as u32,
                data_start_offset: data_start,
            },
            records: recs.iter().map(|&(id, start, size)| IndexRecord { id, start, size }).collect(),
            file_len,
        }
    }

    #[test]
    fn consistent_layout_has_no_issues() {
        let l = layout(44, &[(1, 0, 3), (2, 3, 5)], 52);
        assert!(l.check().is_empty());
        assert_eq!(l.data_len(), 8);
    }

    #[test]
    fn detects_gaps_and_truncation() {
        let l = layout(40, &[(1, 0, 3), (2, 4, 5)], 50);
        let issues = l.check();
        assert!(issues.contains(&LayoutIssue::DataStartMismatch { declared: 40, expected: 44 }));
        assert!(issues.contains(&LayoutIssue::StartMismatch { index: 1, declared: 4, expected: 3 }));
        assert!(issues.contains(&LayoutIssue::LengthMismatch { file_len: 50, expected: 52 }));
    }

    #[test]
    fn entry_past_end_is_refused_before_reading() {
        let l = layout(28, &[(1, 0, u32::MAX)], 30);
        let err = read_entry(Path::new("/nonexistent/never-opened.bin"), &l, 0).unwrap_err();
        assert!(matches!(err, InspectError::EntryOutOfBounds { index: 0, start: 28, file_len: 30, .. }), "{err:?}");
    }

    #[test]
    fn huge_entry_count_in_tiny_file_is_refused() {
        let td = tempfile::tempdir().unwrap();
        let p = td.path().join("corrupt.bin");
        let header = ArchiveHeader { format_version: 0x100, entry_count: u32::MAX, data_start_offset: 12 };
        std::fs::write(&p, header.to_bytes()).unwrap();
        let err = read_layout(&p).unwrap_err();
        assert!(matches!(err, InspectError::IndexTruncated { count: u32::MAX, file_len: 12, .. }), "{err:?}");
    }
}
