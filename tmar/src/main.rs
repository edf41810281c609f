mod output;

use anyhow::{Context, Result};
use clap::error::ErrorKind as ClapErrorKind;
use clap::{Parser, Subcommand};
use output::{ListOutput, OutputWriter, PackOutput, UnpackOutput, result_code};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tmar_core::{ArchiveConfig, Archiver, Engine, PackOutcome, TracingLogger};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;

/// tmar - A deduplicating file archiver
#[derive(Parser)]
#[command(name = "tmar")]
#[command(about = "Deduplicating file archiver using BLAKE3 and zstd", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to TMAR_CONFIG env var, then built-in defaults)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Bytes per streaming step
    #[arg(long, global = true)]
    chunk_size: Option<usize>,

    /// zstd compression level
    #[arg(long, global = true, allow_negative_numbers = true)]
    level: Option<i32>,

    /// Skip digest verification of restored files
    #[arg(long, global = true)]
    no_verify: bool,

    /// Output results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Log debug messages
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pack a directory into an archive
    Pack {
        /// Directory to archive
        input_folder: PathBuf,

        /// Archive to create
        archive_path: PathBuf,
    },

    /// Restore an archive into a directory
    Unpack {
        /// Archive to read
        archive_path: PathBuf,

        /// Directory to restore into
        output_folder: PathBuf,
    },

    /// List the files stored in an archive
    List {
        /// Archive to read
        archive_path: PathBuf,
    },
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => match e.kind() {
            // Incomplete invocations show usage without failing
            ClapErrorKind::MissingRequiredArgument
            | ClapErrorKind::MissingSubcommand
            | ClapErrorKind::DisplayHelpOnMissingArgumentOrSubcommand => {
                let _ = e.print();
                return ExitCode::SUCCESS;
            }
            _ => e.exit(),
        },
    };

    init_tracing(cli.verbose);

    let output = OutputWriter::new(cli.json);
    match run(cli, &output) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let code = result_code(&e);
            output.write_error(&e, code);
            ExitCode::from(code)
        }
    }
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::WARN
    };
    let env_filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .without_time()
        .init();
}

/// Resolve configuration: CLI flags > config file (CLI arg > TMAR_CONFIG) > defaults.
fn load_config(cli: &Cli) -> Result<ArchiveConfig> {
    let path = cli
        .config
        .clone()
        .or_else(|| std::env::var_os("TMAR_CONFIG").map(PathBuf::from));

    let mut config = match path {
        Some(path) => ArchiveConfig::load(&path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => ArchiveConfig::default(),
    };

    if let Some(chunk_size) = cli.chunk_size {
        config = config.with_chunk_size(chunk_size);
    }
    if let Some(level) = cli.level {
        config = config.with_level(level);
    }
    if cli.no_verify {
        config = config.with_verify(false);
    }
    tracing::debug!(?config, "resolved configuration");
    Ok(config)
}

fn run(cli: Cli, output: &OutputWriter) -> Result<()> {
    let config = load_config(&cli)?;
    let engine = Engine::new(config, Arc::new(TracingLogger)).context("Invalid configuration")?;

    match cli.command {
        Commands::Pack {
            input_folder,
            archive_path,
        } => cmd_pack(engine, &input_folder, &archive_path, output),
        Commands::Unpack {
            archive_path,
            output_folder,
        } => cmd_unpack(engine, &archive_path, &output_folder, output),
        Commands::List { archive_path } => cmd_list(&engine, &archive_path, output),
    }
}

/// Run `job` on a worker thread and wait for it.
fn on_worker<T, F>(job: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    std::thread::spawn(job)
        .join()
        .map_err(|_| anyhow::anyhow!("Worker thread panicked"))?
}

fn cmd_pack(engine: Engine, input: &Path, archive: &Path, output: &OutputWriter) -> Result<()> {
    let (input_owned, archive_owned) = (input.to_path_buf(), archive.to_path_buf());
    let outcome = on_worker(move || {
        engine.pack(&input_owned, &archive_owned).with_context(|| {
            format!(
                "Failed to pack {} into {}",
                input_owned.display(),
                archive_owned.display()
            )
        })
    })?;

    let text = match &outcome {
        PackOutcome::NothingToDo => {
            format!("No files under {}, nothing to do\n", input.display())
        }
        PackOutcome::Packed(stats) => format!(
            "Packed {} files ({} unique blobs) into {}\n{} bytes in, {} bytes out\n",
            stats.files,
            stats.blobs,
            archive.display(),
            stats.bytes_in,
            stats.bytes_out
        ),
    };

    let data = PackOutput {
        success: true,
        result_code: 0,
        source: input.display().to_string(),
        archive: archive.display().to_string(),
        outcome,
    };
    output.write(&data, || text)
}

fn cmd_unpack(engine: Engine, archive: &Path, dest: &Path, output: &OutputWriter) -> Result<()> {
    let (archive_owned, dest_owned) = (archive.to_path_buf(), dest.to_path_buf());
    let stats = on_worker(move || {
        engine.unpack(&archive_owned, &dest_owned).with_context(|| {
            format!(
                "Failed to unpack {} into {}",
                archive_owned.display(),
                dest_owned.display()
            )
        })
    })?;

    let data = UnpackOutput {
        success: true,
        result_code: 0,
        archive: archive.display().to_string(),
        destination: dest.display().to_string(),
        files: stats.files,
        bytes: stats.bytes,
    };
    output.write(&data, || {
        format!(
            "Restored {} files ({} bytes) into {}\n",
            stats.files,
            stats.bytes,
            dest.display()
        )
    })
}

fn cmd_list(engine: &Engine, archive: &Path, output: &OutputWriter) -> Result<()> {
    let listing = engine
        .list(archive)
        .with_context(|| format!("Failed to read archive {}", archive.display()))?;

    let data = ListOutput::new(archive.display().to_string(), listing);
    output.write(&data, || data.to_text())
}
