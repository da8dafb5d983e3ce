//! # Main — CLI Entry Point
//!
//! Routes subcommands to the batch runner, the exporter, and the verifier.
//!
//! ## Subcommands
//!
//! - `generate`: every key in a TOML batch file (or the built-in presets).
//! - `single`: one key given on the command line.
//! - `verify`: re-check a PEM key on disk against a target key id.
//! - `presets`: list the built-in key groups.
//!
//! ## Global Options
//!
//! - `--threads`: Rayon thread pool size (default: all cores). With one
//!   thread keys are generated strictly in order.
//! - `--max-attempts`, `--max-partner-draws`, `--mr-rounds`: search tuning;
//!   override the batch file's `[search]` table.
//!
//! Logging goes to stderr; `LOG_FORMAT=json` switches to JSON lines and
//! `RUST_LOG` sets the filter (default `info`).

mod cli;

use anyhow::Result;
use clap::{Parser, Subcommand};
use keyid_forge::key_spec::parse_target;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[derive(Parser)]
#[command(
    name = "keyid-forge",
    about = "Generate RSA keys whose modulus matches a 32-bit key id"
)]
struct Cli {
    /// Number of rayon worker threads (defaults to all logical cores)
    #[arg(long, env = "KEYID_FORGE_THREADS")]
    threads: Option<usize>,

    /// Anchor primes to draw per key before giving up
    #[arg(long, env = "KEYID_FORGE_MAX_ATTEMPTS")]
    max_attempts: Option<u64>,

    /// Partner candidates to test per anchor prime
    #[arg(long, env = "KEYID_FORGE_MAX_PARTNER_DRAWS")]
    max_partner_draws: Option<u64>,

    /// Miller-Rabin rounds for primality testing
    #[arg(long, env = "KEYID_FORGE_MR_ROUNDS")]
    mr_rounds: Option<u32>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate every key in a batch file (built-in presets if none given)
    Generate {
        /// TOML batch file with [search] and [[key]] tables
        #[arg(long)]
        config: Option<PathBuf>,
        /// Directory for <name>.pem and <name>.pem.pub
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
        /// Continue past exhausted searches instead of stopping the batch
        #[arg(long)]
        keep_going: bool,
        /// Write a JSON report of every key's outcome
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Generate one key given on the command line
    Single {
        /// Key name (used for output file names)
        #[arg(long)]
        name: String,
        /// 32-bit key id, hex (0x...) or decimal
        #[arg(long, value_parser = parse_target)]
        target: u32,
        /// Modulus bit length
        #[arg(long)]
        bits: u32,
        /// Public exponent
        #[arg(long, default_value_t = 3)]
        exponent: u32,
        /// Directory for <name>.pem and <name>.pem.pub
        #[arg(long, default_value = ".")]
        out_dir: PathBuf,
    },
    /// Re-check a PEM key's modulus against a key id
    Verify {
        /// PEM file (public or private key)
        #[arg(long)]
        key: PathBuf,
        /// 32-bit key id, hex (0x...) or decimal
        #[arg(long, value_parser = parse_target)]
        target: u32,
    },
    /// List the built-in key groups
    Presets,
}

fn main() -> Result<()> {
    let _ = dotenvy::dotenv();

    // LOG_FORMAT=json for log shipping, human-readable otherwise
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_default();
    if log_format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .with_target(false)
            .init();
    }

    let cli = Cli::parse();
    cli::configure_rayon(cli.threads);

    match &cli.command {
        Commands::Generate {
            config,
            out_dir,
            keep_going,
            report,
        } => cli::run_generate(&cli, config.as_deref(), out_dir, *keep_going, report.as_deref()),
        Commands::Single {
            name,
            target,
            bits,
            exponent,
            out_dir,
        } => cli::run_single(&cli, name, *target, *bits, *exponent, out_dir),
        Commands::Verify { key, target } => cli::run_verify(key, *target),
        Commands::Presets => cli::run_presets(),
    }
}
