//! CLI for the s3xfer transfer engine.

mod commands;
mod target;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use s3xfer_core::config::{self, ClientConfig};
use std::path::PathBuf;

use commands::{run_completions, run_config, run_get, run_put};
pub use target::ObjectTarget;

/// Top-level CLI for s3xfer.
#[derive(Debug, Parser)]
#[command(name = "s3xfer")]
#[command(about = "s3xfer: parallel ranged S3 GET and multipart PUT", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub overrides: Overrides,

    #[command(subcommand)]
    pub command: CliCommand,
}

/// Per-invocation overrides of config.toml.
#[derive(Debug, Clone, Default, Args)]
pub struct Overrides {
    /// Region of the bucket (e.g. us-west-2).
    #[arg(long, global = true)]
    pub region: Option<String>,

    /// Bytes per part.
    #[arg(long, global = true, value_name = "BYTES")]
    pub part_size: Option<u64>,

    /// Bound on in-flight parts.
    #[arg(long, global = true, value_name = "N")]
    pub max_concurrency: Option<usize>,

    /// Use plain HTTP instead of HTTPS.
    #[arg(long, global = true)]
    pub insecure: bool,

    /// Custom endpoint (host[:port]); objects are addressed path-style.
    #[arg(long, global = true, value_name = "HOST")]
    pub host: Option<String>,

    /// Print the completion summary as JSON.
    #[arg(long, global = true)]
    pub json: bool,
}

impl Overrides {
    pub fn apply(&self, cfg: &mut ClientConfig) {
        if let Some(region) = &self.region {
            cfg.region = region.clone();
        }
        if let Some(part_size) = self.part_size {
            cfg.part_size = part_size;
        }
        if let Some(n) = self.max_concurrency {
            cfg.max_concurrency = n;
        }
        if self.insecure {
            cfg.secure = false;
        }
    }
}

#[derive(Debug, Subcommand)]
pub enum CliCommand {
    /// Download an object.
    Get {
        bucket: String,
        key: String,
        /// Output file (default: last path segment of the key).
        #[arg(short, long, value_name = "FILE")]
        output: Option<PathBuf>,
    },

    /// Upload a file as an object.
    Put {
        bucket: String,
        key: String,
        /// File to upload.
        file: PathBuf,
    },

    /// Show the config file location and effective values.
    Config,

    /// Print shell completions.
    Completions {
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl CliCommand {
    pub async fn run_from_args() -> Result<()> {
        let cli = Cli::parse();
        if let CliCommand::Completions { shell } = &cli.command {
            run_completions(*shell);
            return Ok(());
        }

        let mut cfg = config::load_or_init()?;
        cli.overrides.apply(&mut cfg);
        tracing::debug!("effective config: {:?}", cfg);

        match cli.command {
            CliCommand::Get {
                bucket,
                key,
                output,
            } => {
                let target = ObjectTarget::resolve(&bucket, &key, &cfg, cli.overrides.host.as_deref());
                run_get(&cfg, &target, output, cli.overrides.json).await?;
            }
            CliCommand::Put { bucket, key, file } => {
                let target = ObjectTarget::resolve(&bucket, &key, &cfg, cli.overrides.host.as_deref());
                run_put(&cfg, &target, &file, cli.overrides.json).await?;
            }
            CliCommand::Config => run_config(&cfg)?,
            CliCommand::Completions { .. } => {}
        }
        Ok(())
    }
}
