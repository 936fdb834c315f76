//! duosync: Diagnostics for snapshots and staging
//!
//! Local tooling over duosync-core:
//! - Scan a directory into a snapshot tree
//! - Validate a serialized snapshot
//! - Stage files, resolve staged content, wipe staging roots
//! - Clean up stale agent installs

mod debug_log;

use std::fs::File;
use std::path::{Path, PathBuf};

use clap::builder::styling::{AnsiColor, Effects};
use clap::{Parser, Subcommand, ValueEnum, builder::Styles};
use color_eyre::Result;
use color_eyre::eyre::WrapErr as _;
use tracing::{debug, info};

use duosync_core::{
    DuosyncConfig, Entry, HashingReader, Provider, RawEntry, Scanner, Side, Sink, Sinker, StagingCoordinator,
    Version, entry, housekeeping, paths,
};

const STYLES: Styles = Styles::styled()
    .header(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .usage(AnsiColor::Green.on_default().effects(Effects::BOLD))
    .literal(AnsiColor::Cyan.on_default().effects(Effects::BOLD))
    .placeholder(AnsiColor::Cyan.on_default())
    .valid(AnsiColor::Green.on_default())
    .invalid(AnsiColor::Red.on_default());

#[derive(Parser)]
#[command(name = "duosync")]
#[command(version)]
#[command(styles = STYLES)]
#[command(about = "Inspect duosync snapshots and staging storage")]
#[command(long_about = r#"
duosync inspects the local state of a two-way file sync.

Examples:
  duosync scan ./project                     Summarize a snapshot
  duosync scan ./project -f json > snap.json Serialize a snapshot
  duosync validate snap.json                 Check snapshot invariants
  duosync stage a.txt b.bin --session s1     Stage files for session s1
  duosync wipe --session s1                  Remove staged content
"#)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Also write a detailed trace log to the data directory
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Summary,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan a path and print its snapshot
    Scan {
        /// Path to scan
        path: PathBuf,

        /// Output format
        #[arg(short, long, value_enum, default_value = "summary")]
        format: Format,

        /// Session version selecting the digest (defaults to config)
        #[arg(long)]
        digest_version: Option<Version>,
    },

    /// Validate a JSON snapshot
    Validate {
        /// Snapshot file
        snapshot: PathBuf,
    },

    /// Stage files as if they had been received
    Stage {
        /// Files to stage
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Session identifier (a new one is generated if omitted)
        #[arg(short, long)]
        session: Option<String>,

        /// Endpoint side
        #[arg(long, default_value = "alpha")]
        side: Side,
    },

    /// Resolve staged content for a digest
    Provide {
        /// Session identifier
        #[arg(short, long)]
        session: String,

        /// Endpoint side
        #[arg(long, default_value = "alpha")]
        side: Side,

        /// Content digest (hex)
        #[arg(short, long)]
        digest: String,

        /// Mark the provided file executable
        #[arg(short = 'x', long)]
        executable: bool,
    },

    /// Remove all staged content for a session side
    Wipe {
        /// Session identifier
        #[arg(short, long)]
        session: String,

        /// Endpoint side
        #[arg(long, default_value = "alpha")]
        side: Side,
    },

    /// Remove agent installs that haven't been used recently
    Housekeep,

    /// Show version and build info
    Version,
}

fn main() -> Result<()> {
    color_eyre::install()?;

    let cli = Cli::parse();

    let data_dir = paths::data_dir()?;
    let log_dir = if cli.log_file {
        Some(paths::logs_dir()?)
    } else {
        None
    };
    let log_file = debug_log::init(cli.verbose, log_dir)?;
    if let Some(log_file) = &log_file {
        debug!("Writing trace log to {}", log_file.path.display());
    }

    let config = DuosyncConfig::load(&data_dir)?;

    match cli.command {
        Commands::Version => {
            eprintln!("duosync {}", env!("CARGO_PKG_VERSION"));
            eprintln!("Built with Rust {}", env!("CARGO_PKG_RUST_VERSION"));
        }
        Commands::Scan {
            path,
            format,
            digest_version,
        } => {
            scan_command(&path, format, digest_version.unwrap_or(config.version))?;
        }
        Commands::Validate { snapshot } => {
            validate_command(&snapshot)?;
        }
        Commands::Stage {
            files,
            session,
            side,
        } => {
            let session = session.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            stage_command(&files, &session, side, config.version)?;
        }
        Commands::Provide {
            session,
            side,
            digest,
            executable,
        } => {
            provide_command(&session, side, &digest, executable, config.version)?;
        }
        Commands::Wipe { session, side } => {
            let mut coordinator = StagingCoordinator::new(&session, config.version, side)?;
            coordinator.wipe()?;
            info!("Wiped {}", coordinator.root().display());
        }
        Commands::Housekeep => {
            let removed = housekeeping::housekeep(&paths::agents_dir()?, config.agent_idle_period());
            if removed.is_empty() {
                info!("No stale agents");
            }
            for version in removed {
                info!("Removed agent {version}");
            }
        }
    }

    drop(log_file);
    Ok(())
}

fn scan_command(path: &Path, format: Format, version: Version) -> Result<()> {
    info!("Scanning {}...", path.display());

    let snapshot = Scanner::new(path).scan(version)?;

    match format {
        Format::Json => {
            let json = serde_json::to_string_pretty(&snapshot)?;
            println!("{json}");
        }
        Format::Summary => {
            let Some(snapshot) = snapshot else {
                println!("(nothing at {})", path.display());
                return Ok(());
            };
            for (name, entry) in snapshot.flatten() {
                let name = if name.is_empty() { "." } else { name.as_str() };
                match entry {
                    Entry::Directory { .. } => println!("d  {name}/"),
                    Entry::File { executable, digest } => {
                        let marker = if executable { 'x' } else { 'f' };
                        let hex = hex::encode(&digest);
                        println!("{marker}  {name}  {}", hex.get(..16).unwrap_or(&hex));
                    }
                    Entry::Symlink { target } => println!("l  {name} -> {target}"),
                }
            }
            println!("\nTotal: {} entries (digest version {version})", snapshot.count());
        }
    }

    Ok(())
}

fn validate_command(snapshot: &Path) -> Result<()> {
    let file = File::open(snapshot).wrap_err_with(|| format!("unable to open {}", snapshot.display()))?;
    let raw: Option<RawEntry> =
        serde_json::from_reader(std::io::BufReader::new(file)).wrap_err("unable to parse snapshot")?;

    let snapshot = raw.map(Entry::try_from).transpose()?;
    entry::ensure_valid(snapshot.as_ref())?;
    println!("valid: {} entries", entry::count(snapshot.as_ref()));
    Ok(())
}

fn stage_command(files: &[PathBuf], session: &str, side: Side, version: Version) -> Result<()> {
    let mut coordinator = StagingCoordinator::new(session, version, side)?;
    info!("Staging into {} (session {session})", coordinator.root().display());

    for path in files {
        let name = path.to_string_lossy();

        let source = File::open(path).wrap_err_with(|| format!("unable to open {name}"))?;
        let mut source = HashingReader::new(source, version);
        let mut sink = coordinator.sink(&name)?;
        // A failed copy drops the sink, discarding the partial content.
        std::io::copy(&mut source, &mut sink).wrap_err_with(|| format!("unable to stage {name}"))?;
        sink.close()?;

        // Digest of exactly the bytes staged, even if the file changed since.
        let entry = Entry::file(source.finalize(), false);
        let staged = coordinator.provide(&name, &entry)?;
        println!("{}  {}", hex::encode(entry.digest()), staged.display());
    }

    Ok(())
}

fn provide_command(
    session: &str,
    side: Side,
    digest: &str,
    executable: bool,
    version: Version,
) -> Result<()> {
    let digest = hex::decode(digest.trim()).wrap_err("digest must be hex")?;
    let coordinator = StagingCoordinator::new(session, version, side)?;

    let entry = Entry::file(digest, executable);
    entry.ensure_valid()?;
    let path = coordinator.provide(&hex::encode(entry.digest()), &entry)?;
    println!("{}", path.display());
    Ok(())
}
