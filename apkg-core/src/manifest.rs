use std::collections::HashMap;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

const DELIMITER: char = ' ';

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("cannot open manifest {path:?}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("reading manifest {file:?} at line {line}: {source}")]
    Read {
        file: String,
        line: usize,
        #[source]
        source: io::Error,
    },

    #[error("parsing file {file:?} at line {line}: cannot find space ( ) delimiter")]
    MissingDelimiter { file: String, line: usize },

    #[error("parsing file {file:?} at line {line}: asset id {token:?} is not a valid u64")]
    InvalidId { file: String, line: usize, token: String },
}

impl ManifestError {
    /// 1-based manifest line the error points at, if any.
    pub fn line(&self) -> Option<usize> {
        match self {
            ManifestError::Open { .. } => None,
            ManifestError::Read { line, .. }
            | ManifestError::MissingDelimiter { line, .. }
            | ManifestError::InvalidId { line, .. } => Some(*line),
        }
    }
}

/// One `<id> <relative path>` line of a manifest.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AssetEntry {
    pub id: u64,
    pub rel_path: String,
    /// 1-based line in the manifest this entry was read from.
    pub line: usize,
}

/// Ordered list of assets, in manifest line order.
#[derive(Clone, Debug, Default)]
pub struct AssetManifest {
    pub source: PathBuf,
    pub entries: Vec<AssetEntry>,
}

impl AssetManifest {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, AssetEntry> {
        self.entries.iter()
    }

    /// Directory relative paths resolve against: the manifest's parent.
    pub fn base_dir(&self) -> &Path {
        match self.source.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        }
    }
}

impl<'a> IntoIterator for &'a AssetManifest {
    type Item = &'a AssetEntry;
    type IntoIter = std::slice::Iter<'a, AssetEntry>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.iter()
    }
}

/// Read and parse a manifest file. Any malformed line aborts the whole parse.
pub fn parse(path: &Path) -> Result<AssetManifest, ManifestError> {
    let f = File::open(path)
        .map_err(|source| ManifestError::Open { path: path.to_path_buf(), source })?;
    let mut acc = Accumulator::new(display_name(path));
    for (i, line) in BufReader::new(f).lines().enumerate() {
        let line = line.map_err(|source| ManifestError::Read {
            file: acc.file.clone(),
            line: i + 1,
            source,
        })?;
        acc.push_line(i + 1, &line)?;
    }
    Ok(acc.finish(path.to_path_buf()))
}

/// Parse manifest text already in memory. `name` only appears in diagnostics;
/// the returned manifest's `source` is `name` as a path.
pub fn parse_str(name: &str, text: &str) -> Result<AssetManifest, ManifestError> {
    let mut acc = Accumulator::new(display_name(Path::new(name)));
    for (i, line) in text.lines().enumerate() {
        acc.push_line(i + 1, line)?;
    }
    Ok(acc.finish(PathBuf::from(name)))
}

/// Parse one manifest line. `Ok(None)` for a blank line.
pub fn parse_line(file: &str, line_no: usize, line: &str) -> Result<Option<AssetEntry>, ManifestError> {
    let line = line.strip_suffix('\r').unwrap_or(line);
    if line.is_empty() {
        return Ok(None);
    }
    let Some((token, rel_path)) = line.split_once(DELIMITER) else {
        return Err(ManifestError::MissingDelimiter { file: file.to_string(), line: line_no });
    };
    let id: u64 = token.parse().map_err(|_| ManifestError::InvalidId {
        file: file.to_string(),
        line: line_no,
        token: token.to_string(),
    })?;
    Ok(Some(AssetEntry { id, rel_path: rel_path.to_string(), line: line_no }))
}

struct Accumulator {
    file: String,
    entries: Vec<AssetEntry>,
    seen: HashMap<u64, usize>,
}

impl Accumulator {
    fn new(file: String) -> Self {
        Self { file, entries: Vec::new(), seen: HashMap::new() }
    }

    fn push_line(&mut self, line_no: usize, line: &str) -> Result<(), ManifestError> {
        let Some(entry) = parse_line(&self.file, line_no, line)? else {
            return Ok(());
        };
        if let Some(first) = self.seen.insert(entry.id, line_no) {
            warn!(file = %self.file, id = entry.id, first, line = line_no, "duplicate asset id");
        }
        if entry.rel_path.is_empty() {
            warn!(file = %self.file, line = line_no, "empty asset path");
        }
        self.entries.push(entry);
        Ok(())
    }

    fn finish(self, source: PathBuf) -> AssetManifest {
        debug!(file = %self.file, entries = self.entries.len(), "manifest parsed");
        AssetManifest { source, entries: self.entries }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name().unwrap_or(path.as_os_str()).to_string_lossy().into_owned()
}
