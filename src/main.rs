//! Command-line interface for objfs
//!
//! # Usage Examples
//!
//! ```bash
//! # List a bucket directory
//! objfs --protocol s3 ls my-bucket/data --long
//!
//! # Read byte ranges from several files
//! objfs --protocol s3 cat-ranges \
//!   --path my-bucket/a.bin --start 0 --end 16 \
//!   --path my-bucket/b.bin --start 100 --end 132
//!
//! # Copy a local file up and back down
//! objfs --protocol file --config fs.toml put ./report.csv data/report.csv
//! objfs --protocol file --config fs.toml get data/report.csv ./copy.csv
//! ```
//!
//! Records are printed as JSON. Set `RUST_LOG=objfs=debug` to see the
//! backend calls.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use objfs::store::DefaultBackendFactory;
use objfs::{FsConfig, ObjectFs};

#[derive(Parser)]
#[command(name = "objfs")]
#[command(about = "Filesystem-style access to object stores")]
#[command(long_about = None)]
struct Cli {
    /// Protocol to serve (s3, file, memory, http, https)
    #[arg(long, global = true, env = "OBJFS_PROTOCOL")]
    protocol: Option<String>,

    /// TOML configuration file
    #[arg(long, global = true, env = "OBJFS_CONFIG")]
    config: Option<PathBuf>,

    /// Number of bucket handles kept alive
    #[arg(long, global = true)]
    max_cache_size: Option<usize>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List the immediate children of a directory
    Ls {
        path: String,

        /// Print full records instead of names
        #[arg(long, short)]
        long: bool,
    },
    /// Show metadata for a file or directory
    Info { path: String },
    /// Print file contents
    Cat {
        paths: Vec<String>,

        /// Include every file below directories
        #[arg(long, short)]
        recursive: bool,
    },
    /// Read byte ranges; one --start/--end pair per --path, or a single pair for all
    CatRanges {
        #[arg(long = "path", required = true)]
        paths: Vec<String>,

        #[arg(long = "start", required = true)]
        starts: Vec<u64>,

        #[arg(long = "end", required = true)]
        ends: Vec<u64>,
    },
    /// Write text to a file
    Pipe { path: String, text: String },
    /// Upload a local file
    Put { local: PathBuf, remote: String },
    /// Download to a local file
    Get { remote: String, local: PathBuf },
    /// Copy within a bucket
    Cp {
        src: String,
        dst: String,

        #[arg(long, short)]
        recursive: bool,
    },
    /// Delete files
    Rm {
        paths: Vec<String>,

        #[arg(long, short)]
        recursive: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if let Err(e) = run().await {
        eprintln!("Error: {e:#}");
        std::process::exit(1);
    }
    Ok(())
}

async fn run() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    tracing::debug!("Using protocol '{}'", config.protocol);

    let fs = ObjectFs::new(&config, Arc::new(DefaultBackendFactory::new()))
        .context("Failed to set up filesystem")?;

    match cli.command {
        Commands::Ls { path, long } => {
            if long {
                print_json(&fs.ls(&path).await?)?;
            } else {
                for name in fs.ls_names(&path).await? {
                    println!("{name}");
                }
            }
        }
        Commands::Info { path } => print_json(&fs.info(&path).await?)?,
        Commands::Cat { paths, recursive } => {
            let contents = fs.cat(&paths, recursive).await?;
            let mut stdout = std::io::stdout().lock();
            for data in contents.values() {
                stdout.write_all(data)?;
            }
            stdout.flush()?;
        }
        Commands::CatRanges {
            paths,
            starts,
            ends,
        } => {
            let starts = broadcast(starts);
            let ends = broadcast(ends);
            let buffers = fs.cat_ranges(&paths, starts, ends).await?;
            let shown: Vec<String> = buffers
                .iter()
                .map(|b| String::from_utf8_lossy(b).into_owned())
                .collect();
            print_json(&shown)?;
        }
        Commands::Pipe { path, text } => {
            let result = fs.pipe(&path, text.into_bytes()).await?;
            tracing::info!("Wrote '{}' (e_tag: {:?})", path, result.e_tag);
        }
        Commands::Put { local, remote } => {
            fs.put_file(&local, &remote)
                .await
                .with_context(|| format!("Failed to upload {}", local.display()))?;
        }
        Commands::Get { remote, local } => {
            fs.get_file(&remote, &local)
                .await
                .with_context(|| format!("Failed to download {remote}"))?;
        }
        Commands::Cp {
            src,
            dst,
            recursive,
        } => fs.cp(&src, &dst, recursive).await?,
        Commands::Rm { paths, recursive } => fs.rm(&paths, recursive).await?,
    }

    Ok(())
}

/// Config file first, then command-line overrides.
fn load_config(cli: &Cli) -> anyhow::Result<FsConfig> {
    let mut config = match &cli.config {
        Some(path) => FsConfig::from_file(path)?,
        None => {
            let protocol = cli
                .protocol
                .clone()
                .context("Either --protocol or --config is required")?;
            FsConfig::new(protocol)
        }
    };
    if let Some(protocol) = &cli.protocol {
        config.protocol = protocol.clone();
    }
    if let Some(size) = cli.max_cache_size {
        config.max_cache_size = size;
    }
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

/// A single value stands for every path.
fn broadcast(values: Vec<u64>) -> objfs::Offsets {
    match values.as_slice() {
        [single] => objfs::Offsets::All(*single),
        _ => objfs::Offsets::Each(values),
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string_pretty(value).context("Failed to encode output")?;
    println!("{json}");
    Ok(())
}
