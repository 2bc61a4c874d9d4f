use anyhow::{bail, Context, Result};
use clap::{ArgAction, CommandFactory, Parser, Subcommand};
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use apkg_core::inspect::{self, ArchiveLayout, LayoutIssue};
use apkg_core::path_safety::PathPolicy;
use apkg_core::{manifest, BuildOptions};

#[derive(Parser)]
#[command(
    name = "asset-bundler",
    version,
    about = "Pack the files listed in an asset pack manifest into a single archive",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    #[command(subcommand)]
    cmd: Option<Cmd>,
    /// Asset pack manifest: one `<id> <relative path>` per line
    manifest: Option<PathBuf>,
    /// Output archive [default: manifest path with extension `apkg.bin`]
    output: Option<PathBuf>,
    /// Reject absolute paths and `..` components in the manifest
    #[arg(long, default_value_t = false)]
    confine: bool,
    /// More log output on stderr (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
}

#[derive(Subcommand)]
enum Cmd {
    /// Print header and index of a built archive, checking its layout
    Inspect {
        archive: PathBuf,
        /// Emit JSON instead of tables
        #[arg(long, default_value_t = false)]
        json: bool,
        /// Write the raw bytes of entry N (0-based) to stdout
        #[arg(long, value_name = "N")]
        dump: Option<usize>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    match cli.cmd {
        Some(Cmd::Inspect { archive, json, dump }) => inspect_archive(&archive, json, dump),
        None => match cli.manifest {
            Some(manifest) => bundle(&manifest, cli.output.as_deref(), cli.confine),
            None => {
                Cli::command().print_help()?;
                Ok(())
            }
        },
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn bundle(manifest_path: &Path, output: Option<&Path>, confine: bool) -> Result<()> {
    if !manifest_path.exists() {
        bail!("asset pack file does not exist: {}", manifest_path.display());
    }
    let mf = manifest::parse(manifest_path)?;
    let output = match output {
        Some(p) => p.to_path_buf(),
        None => apkg_core::default_output_path(manifest_path),
    };
    let opts = BuildOptions { policy: PathPolicy { confine } };
    let report = apkg_core::build_with_options(&mf, mf.base_dir(), &output, &opts)
        .with_context(|| format!("bundling {}", manifest_path.display()))?;
    tracing::info!(entries = report.entries, bytes = report.archive_bytes, output = %output.display(), "done");
    println!("Assets bundled successfully!");
    Ok(())
}

#[derive(Serialize)]
struct InspectJson<'a> {
    version: String,
    #[serde(flatten)]
    layout: &'a ArchiveLayout,
    issues: Vec<String>,
}

fn inspect_archive(archive: &Path, json: bool, dump: Option<usize>) -> Result<()> {
    let layout = inspect::read_layout(archive)?;
    let issues = layout.check();
    if let Some(i) = dump {
        // Offsets of an inconsistent archive cannot be trusted.
        if !issues.is_empty() {
            report_issues(archive, &issues);
            bail!("refusing to dump entry {i} from an inconsistent archive");
        }
        let data = inspect::read_entry(archive, &layout, i)?;
        let mut out = std::io::stdout().lock();
        out.write_all(&data)?;
        out.flush()?;
        return Ok(());
    }
    if json {
        let doc = InspectJson {
            version: layout.header.version_string(),
            layout: &layout,
            issues: issues.iter().map(LayoutIssue::to_string).collect(),
        };
        println!("{}", serde_json::to_string_pretty(&doc)?);
    } else {
        println!("File Version        {}", layout.header.version_string());
        println!("Asset Index Count   {}", layout.header.entry_count);
        println!("Data Start Position {}", layout.header.data_start_offset);
        println!();
        println!("{:>6}  {:>20}  {:>10}  {:>10}", "Index", "ID", "Start", "Size");
        for (i, r) in layout.records.iter().enumerate() {
            println!("{:>6}  {:>20}  {:>10}  {:>10}", i, r.id, r.start, r.size);
        }
    }
    if !issues.is_empty() {
        report_issues(archive, &issues);
        bail!("archive layout is inconsistent ({} issue(s))", issues.len());
    }
    Ok(())
}

fn report_issues(archive: &Path, issues: &[LayoutIssue]) {
    for issue in issues {
        eprintln!("{}: {}", archive.display(), issue);
    }
}
