use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::format::{ArchiveHeader, IndexRecord, ARCHIVE_EXTENSION};
use crate::manifest::AssetManifest;
use crate::path_safety::{self, PathPolicy, UnsafePath};

const COPY_BUF: usize = 64 * 1024;

#[derive(Clone, Copy, Debug, Default)]
pub struct BuildOptions {
    pub policy: PathPolicy,
}

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("{0}")]
    Io(#[from] io::Error),
    #[error("not a regular file")]
    NotAFile,
    #[error("{0} bytes does not fit a 32-bit size")]
    TooLarge(u64),
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("{0} entries do not fit a 32-bit index")]
    TooManyEntries(usize),

    #[error("manifest line {line}: {source}")]
    UnsafePath {
        line: usize,
        #[source]
        source: UnsafePath,
    },

    #[error("unable to get file size from file: {path:?}, at line: {line} ({source})")]
    Probe {
        path: PathBuf,
        line: usize,
        #[source]
        source: ProbeError,
    },

    #[error("data segment exceeds 4 GiB at file: {path:?}, at line: {line}")]
    DataTooLarge { path: PathBuf, line: usize },

    #[error("cannot create archive {path:?}: {source}")]
    Create {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("unable to read data from file: {path:?} ({source})")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("file {path:?} changed size during build: indexed {expected} bytes, copied {actual}")]
    SizeChanged { path: PathBuf, expected: u32, actual: u64 },

    #[error("cannot write archive {path:?}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl BuildError {
    /// Manifest line of the offending entry, for errors raised while indexing.
    pub fn line(&self) -> Option<usize> {
        match self {
            BuildError::UnsafePath { line, .. }
            | BuildError::Probe { line, .. }
            | BuildError::DataTooLarge { line, .. } => Some(*line),
            _ => None,
        }
    }
}

/// Size of the file at `path` from its metadata, without reading it.
pub fn probe_size(path: &Path) -> Result<u32, ProbeError> {
    let md = fs::metadata(path)?;
    if !md.is_file() {
        return Err(ProbeError::NotAFile);
    }
    u32::try_from(md.len()).map_err(|_| ProbeError::TooLarge(md.len()))
}

/// Default archive path for a manifest: its extension replaced by `apkg.bin`.
pub fn default_output_path(manifest_path: &Path) -> PathBuf {
    manifest_path.with_extension(ARCHIVE_EXTENSION)
}

/// Header, index and resolved source files of an archive, before any byte is written.
#[derive(Clone, Debug)]
pub struct ArchivePlan {
    pub header: ArchiveHeader,
    pub records: Vec<IndexRecord>,
    pub sources: Vec<PathBuf>,
}

impl ArchivePlan {
    pub fn data_len(&self) -> u64 {
        self.records.last().map_or(0, IndexRecord::end)
    }

    pub fn archive_len(&self) -> u64 {
        self.header.data_start_offset as u64 + self.data_len()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BuildReport {
    pub entries: usize,
    pub data_bytes: u64,
    pub archive_bytes: u64,
}

/// Resolve every entry against `base_dir` and lay out the index.
/// Records follow manifest order; each starts where the previous one ends.
pub fn plan(
    manifest: &AssetManifest,
    base_dir: &Path,
    opts: &BuildOptions,
) -> Result<ArchivePlan, BuildError> {
    let count = u32::try_from(manifest.len())
        .map_err(|_| BuildError::TooManyEntries(manifest.len()))?;
    let header =
        ArchiveHeader::new(count).ok_or(BuildError::TooManyEntries(manifest.len()))?;

    let mut records = Vec::with_capacity(manifest.len());
    let mut sources = Vec::with_capacity(manifest.len());
    let mut end_pos: u32 = 0;
    for entry in manifest {
        let path = path_safety::resolve(base_dir, &entry.rel_path, opts.policy)
            .map_err(|source| BuildError::UnsafePath { line: entry.line, source })?;
        let size = probe_size(&path).map_err(|source| BuildError::Probe {
            path: path.clone(),
            line: entry.line,
            source,
        })?;
        debug!(id = entry.id, start = end_pos, size, path = %path.display(), "indexed");
        records.push(IndexRecord { id: entry.id, start: end_pos, size });
        end_pos = end_pos
            .checked_add(size)
            .ok_or_else(|| BuildError::DataTooLarge { path: path.clone(), line: entry.line })?;
        sources.push(path);
    }
    Ok(ArchivePlan { header, records, sources })
}

/// Build the archive for `manifest` at `output`, resolving asset paths against `base_dir`.
pub fn build(manifest: &AssetManifest, base_dir: &Path, output: &Path) -> Result<BuildReport, BuildError> {
    build_with_options(manifest, base_dir, output, &BuildOptions::default())
}

pub fn build_with_options(
    manifest: &AssetManifest,
    base_dir: &Path,
    output: &Path,
    opts: &BuildOptions,
) -> Result<BuildReport, BuildError> {
    info!(entries = manifest.len(), output = %output.display(), "building archive");
    // Truncate first: a failed build must not leave an earlier archive behind.
    let out = create_output(output)?;
    let plan = plan(manifest, base_dir, opts)?;
    write_into(&plan, out, output)?;
    let report = BuildReport {
        entries: plan.records.len(),
        data_bytes: plan.data_len(),
        archive_bytes: plan.archive_len(),
    };
    info!(entries = report.entries, bytes = report.archive_bytes, "archive written");
    Ok(report)
}

/// Write header, index, then every source file's bytes in index order.
pub fn write_archive(plan: &ArchivePlan, output: &Path) -> Result<(), BuildError> {
    let out = create_output(output)?;
    write_into(plan, out, output)
}

fn create_output(output: &Path) -> Result<File, BuildError> {
    File::create(output).map_err(|source| BuildError::Create { path: output.to_path_buf(), source })
}

fn write_into(plan: &ArchivePlan, f: File, output: &Path) -> Result<(), BuildError> {
    let mut out = BufWriter::new(f);
    let werr = |source| BuildError::Write { path: output.to_path_buf(), source };

    plan.header.write_to(&mut out).map_err(werr)?;
    for rec in &plan.records {
        rec.write_to(&mut out).map_err(werr)?;
    }

    let mut buf = vec![0u8; COPY_BUF];
    for (rec, src) in plan.records.iter().zip(&plan.sources) {
        let copied = copy_file(src, &mut out, &mut buf, output)?;
        if copied != rec.size as u64 {
            return Err(BuildError::SizeChanged {
                path: src.clone(),
                expected: rec.size,
                actual: copied,
            });
        }
    }
    out.flush().map_err(werr)?;
    Ok(())
}

fn copy_file(
    src: &Path,
    out: &mut impl Write,
    buf: &mut [u8],
    output: &Path,
) -> Result<u64, BuildError> {
    let rerr = |source| BuildError::Read { path: src.to_path_buf(), source };
    let mut f = File::open(src).map_err(rerr)?;
    let mut copied = 0u64;
    loop {
        let n = match f.read(buf) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(rerr(e)),
        };
        out.write_all(&buf[..n])
            .map_err(|source| BuildError::Write { path: output.to_path_buf(), source })?;
        copied += n as u64;
    }
    Ok(copied)
}
