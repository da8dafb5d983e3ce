//! # CLI Execution Functions
//!
//! Extracted from `main.rs` to keep the entry point slim. Contains the
//! execution logic for each subcommand: batch generation, single keys,
//! verification, preset listing, and rayon configuration.

use anyhow::Result;
use keyid_forge::batch::{self, BatchConfig, BatchOptions, BatchSummary, Delivered};
use keyid_forge::key_spec::{self, KeySpec};
use keyid_forge::progress::Progress;
use keyid_forge::{export, verify, KeyMaterial, SearchConfig};
use std::path::Path;
use tracing::{info, warn};

use super::Cli;

// ── Subcommands ─────────────────────────────────────────────────

/// Generate every key from a batch file, or the built-in presets.
pub fn run_generate(
    cli: &Cli,
    config_path: Option<&Path>,
    out_dir: &Path,
    keep_going: bool,
    report: Option<&Path>,
) -> Result<()> {
    let mut config = match config_path {
        Some(path) => batch::parse_toml_file(path)?,
        None => BatchConfig::presets(SearchConfig::default()),
    };
    apply_overrides(cli, &mut config.search);
    batch::validate_config(&config)?;
    run_specs(&config, out_dir, keep_going, report)
}

/// Generate a single key described on the command line.
pub fn run_single(
    cli: &Cli,
    name: &str,
    target: u32,
    bits: u32,
    exponent: u32,
    out_dir: &Path,
) -> Result<()> {
    let mut config = BatchConfig {
        search: SearchConfig::default(),
        keys: vec![KeySpec::new(name, target, bits, exponent)],
    };
    apply_overrides(cli, &mut config.search);
    batch::validate_config(&config)?;
    run_specs(&config, out_dir, false, None)
}

/// Re-check a key file on disk. Fails on mismatch.
pub fn run_verify(key: &Path, target: u32) -> Result<()> {
    let report = verify::verify_key_file(key, target)?;
    println!("{}: {}", key.display(), report);
    if !report.passed {
        anyhow::bail!("key id check failed for {}", key.display());
    }
    Ok(())
}

pub fn run_presets() -> Result<()> {
    for spec in key_spec::presets() {
        println!("{}", spec);
    }
    Ok(())
}

// ── Shared Execution ────────────────────────────────────────────

fn apply_overrides(cli: &Cli, search: &mut SearchConfig) {
    if let Some(v) = cli.max_attempts {
        search.max_attempts = v;
    }
    if let Some(v) = cli.max_partner_draws {
        search.max_partner_draws = v;
    }
    if let Some(v) = cli.mr_rounds {
        search.mr_rounds = v;
    }
}

fn run_specs(
    config: &BatchConfig,
    out_dir: &Path,
    keep_going: bool,
    report: Option<&Path>,
) -> Result<()> {
    let threads = rayon::current_num_threads();
    info!(
        keys = config.keys.len(),
        threads,
        max_attempts = config.search.max_attempts,
        mr_rounds = config.search.mr_rounds,
        out_dir = %out_dir.display(),
        "keyid-forge starting"
    );

    let progress = Progress::new();
    let reporter = progress.start_reporter();
    let options = BatchOptions {
        keep_going,
        parallel: threads > 1 && config.keys.len() > 1,
    };

    let summary = batch::run_batch(config, &options, &progress, |spec, material| {
        export_and_verify(out_dir, spec, material)
    });

    progress.stop();
    let _ = reporter.join();
    progress.print_status();

    print_summary(&summary);
    if let Some(path) = report {
        summary.write_report(path)?;
        info!(path = %path.display(), "report written");
    }

    if !summary.all_succeeded() {
        let failed = summary.outcomes.iter().filter(|o| !o.succeeded()).count();
        anyhow::bail!("{} of {} keys were not generated", failed, summary.outcomes.len());
    }
    Ok(())
}

/// Write the PEM files, then read the public key back and re-check its
/// residue before trusting it.
fn export_and_verify(out_dir: &Path, spec: &KeySpec, material: &KeyMaterial) -> Result<Delivered> {
    let exported = export::write_key_files(out_dir, &spec.name, material)?;
    let report = verify::verify_key_file(&exported.public_path, spec.target)?;
    if !report.passed {
        anyhow::bail!(
            "{} failed re-verification: {}",
            exported.public_path.display(),
            report
        );
    }
    info!(%report, "public key re-verified from disk");
    Ok(Delivered {
        files: vec![exported.private_path, exported.public_path],
        fingerprint: Some(exported.fingerprint),
    })
}

fn print_summary(summary: &BatchSummary) {
    for outcome in &summary.outcomes {
        let detail = match (&outcome.delivered, &outcome.error) {
            (Some(d), _) => d
                .fingerprint
                .as_deref()
                .map(|f| format!("sha256:{}", f))
                .unwrap_or_default(),
            (None, Some(e)) => e.clone(),
            (None, None) => String::new(),
        };
        println!(
            "{:<20} {:<20} {} {:>5} bits  {}",
            outcome.name,
            format!("{:?}", outcome.status),
            outcome.target,
            outcome.bits,
            detail
        );
    }
    println!(
        "{} generated, {} failed, {} skipped in {:.1}s",
        summary.count(batch::OutcomeStatus::Generated),
        summary
            .outcomes
            .iter()
            .filter(|o| !o.succeeded() && o.status != batch::OutcomeStatus::Skipped)
            .count(),
        summary.count(batch::OutcomeStatus::Skipped),
        summary.elapsed_secs
    );
}

// ── Rayon Configuration ─────────────────────────────────────────

/// Size the global rayon pool. `None` or 0 keeps rayon's default (all cores).
pub fn configure_rayon(threads: Option<usize>) {
    let num_threads = threads.unwrap_or(0);
    if num_threads > 0 {
        if let Err(e) = rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build_global()
        {
            warn!(error = %e, "Could not configure rayon thread pool");
        } else {
            info!(threads = num_threads, "Rayon thread pool configured");
        }
    }
}
