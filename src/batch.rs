//! # Batch — Running a List of Key Specs
//!
//! A batch file names the keys to generate and optionally tunes the search:
//!
//! ```toml
//! [search]
//! max_attempts = 100000
//!
//! [[key]]
//! name = "haven-rom-prod"
//! target = 0xaa66150f
//! bits = 3072
//! exponent = 3
//! ```
//!
//! Specs are independent, so with more than one rayon thread they run in
//! parallel, each drawing from `OsRng`. Every generated key is handed to a
//! sink (the CLI exports and re-verifies it there).
//!
//! ## Abort Policy
//!
//! By default the first failure stops the batch: keys not yet started are
//! reported as skipped. `keep_going` continues past exhausted searches and
//! sink failures, but an invalid spec or a broken invariant always stops it.

use anyhow::Result;
use rand::rngs::OsRng;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;
use tracing::{error, info, info_span, warn};

use crate::error::KeygenError;
use crate::key::KeyMaterial;
use crate::key_spec::{self, KeySpec};
use crate::progress::Progress;
use crate::search::{ConstrainedKeySearch, SearchConfig, SearchStats};

// ── TOML Configuration ──────────────────────────────────────────

/// Top-level batch file: an optional `[search]` table and `[[key]]` entries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchConfig {
    #[serde(default)]
    pub search: SearchConfig,
    #[serde(rename = "key", default)]
    pub keys: Vec<KeySpec>,
}

impl BatchConfig {
    /// The built-in key groups with the given search tuning.
    pub fn presets(search: SearchConfig) -> Self {
        BatchConfig {
            search,
            keys: key_spec::presets(),
        }
    }
}

/// Parse a batch configuration from a TOML string.
pub fn parse_toml(content: &str) -> Result<BatchConfig> {
    let config: BatchConfig = toml::from_str(content)?;
    validate_config(&config)?;
    Ok(config)
}

/// Parse a batch configuration from a TOML file path.
pub fn parse_toml_file(path: &Path) -> Result<BatchConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_toml(&content)
}

/// Validate a batch for logical consistency before any key is searched.
pub fn validate_config(config: &BatchConfig) -> Result<()> {
    if config.keys.is_empty() {
        anyhow::bail!("batch defines no [[key]] entries");
    }
    if config.search.max_attempts == 0 {
        anyhow::bail!("search.max_attempts must be at least 1");
    }
    if config.search.max_partner_draws == 0 {
        anyhow::bail!("search.max_partner_draws must be at least 1");
    }
    if config.search.mr_rounds == 0 {
        anyhow::bail!("search.mr_rounds must be at least 1");
    }

    let mut names = HashSet::new();
    for spec in &config.keys {
        validate_name(&spec.name)?;
        if !names.insert(spec.name.as_str()) {
            anyhow::bail!("duplicate key name '{}'", spec.name);
        }
        spec.validate()?;
    }
    Ok(())
}

/// Key names become file names, so keep them to a safe alphabet.
fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        anyhow::bail!("key name must not be empty");
    }
    if name.starts_with('.') {
        anyhow::bail!("key name '{}' must not start with '.'", name);
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
    {
        anyhow::bail!("key name '{}' contains '{}'", name, bad);
    }
    Ok(())
}

// ── Outcomes ────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Generated,
    InvalidSpec,
    SearchExhausted,
    InvariantViolation,
    SinkFailed,
    Skipped,
}

/// What the sink produced for a generated key.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Delivered {
    pub files: Vec<PathBuf>,
    pub fingerprint: Option<String>,
}

/// Per-key line of a batch report.
#[derive(Debug, Clone, Serialize)]
pub struct KeyOutcome {
    pub name: String,
    pub target: String,
    pub bits: u32,
    pub exponent: u32,
    pub status: OutcomeStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub low_word: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub delivered: Option<Delivered>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<SearchStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_secs: f64,
}

impl KeyOutcome {
    fn new(spec: &KeySpec, status: OutcomeStatus) -> Self {
        KeyOutcome {
            name: spec.name.clone(),
            target: format!("{:#010x}", spec.target),
            bits: spec.bits,
            exponent: spec.exponent,
            status,
            low_word: None,
            delivered: None,
            stats: None,
            error: None,
            elapsed_secs: 0.0,
        }
    }

    fn from_error(spec: &KeySpec, err: &KeygenError) -> Self {
        let status = match err {
            KeygenError::InvalidSpec { .. } => OutcomeStatus::InvalidSpec,
            KeygenError::SearchExhausted { .. } => OutcomeStatus::SearchExhausted,
            KeygenError::InternalInvariantViolation { .. } => OutcomeStatus::InvariantViolation,
        };
        let mut outcome = KeyOutcome::new(spec, status);
        outcome.error = Some(err.to_string());
        outcome
    }

    pub fn succeeded(&self) -> bool {
        self.status == OutcomeStatus::Generated
    }

    /// Whether this outcome stops keys that have not started yet.
    fn stops_batch(&self, keep_going: bool) -> bool {
        match self.status {
            OutcomeStatus::Generated | OutcomeStatus::Skipped => false,
            OutcomeStatus::InvalidSpec | OutcomeStatus::InvariantViolation => true,
            OutcomeStatus::SearchExhausted | OutcomeStatus::SinkFailed => !keep_going,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary {
    pub outcomes: Vec<KeyOutcome>,
    pub elapsed_secs: f64,
}

impl BatchSummary {
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(KeyOutcome::succeeded)
    }

    pub fn count(&self, status: OutcomeStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }

    /// Write the summary as pretty JSON.
    pub fn write_report(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

// ── Execution ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, Default)]
pub struct BatchOptions {
    pub keep_going: bool,
    pub parallel: bool,
}

/// Run every spec in `config`, handing each generated key to `sink`.
pub fn run_batch<F>(
    config: &BatchConfig,
    options: &BatchOptions,
    progress: &Progress,
    sink: F,
) -> BatchSummary
where
    F: Fn(&KeySpec, &KeyMaterial) -> Result<Delivered> + Sync,
{
    drive(config, options, |spec| {
        run_one(spec, &config.search, progress, &sink)
    })
}

/// Apply the abort policy around a per-key runner.
fn drive<G>(config: &BatchConfig, options: &BatchOptions, run_key: G) -> BatchSummary
where
    G: Fn(&KeySpec) -> KeyOutcome + Sync,
{
    let start = Instant::now();
    let stop = AtomicBool::new(false);

    let run = |spec: &KeySpec| -> KeyOutcome {
        if stop.load(Ordering::Relaxed) {
            return KeyOutcome::new(spec, OutcomeStatus::Skipped);
        }
        let outcome = run_key(spec);
        if outcome.stops_batch(options.keep_going) {
            stop.store(true, Ordering::Relaxed);
        }
        outcome
    };

    let outcomes: Vec<KeyOutcome> = if options.parallel {
        config.keys.par_iter().map(&run).collect()
    } else {
        config.keys.iter().map(&run).collect()
    };

    BatchSummary {
        outcomes,
        elapsed_secs: start.elapsed().as_secs_f64(),
    }
}

fn run_one<F>(spec: &KeySpec, search: &SearchConfig, progress: &Progress, sink: &F) -> KeyOutcome
where
    F: Fn(&KeySpec, &KeyMaterial) -> Result<Delivered> + Sync,
{
    let span = info_span!("key", name = %spec.name);
    let _enter = span.enter();
    let start = Instant::now();
    progress.set_current(&spec.name);
    info!(
        key_id = format_args!("{:#010x}", spec.target),
        bits = spec.bits,
        exponent = spec.exponent,
        "generating key"
    );

    let mut searcher = match ConstrainedKeySearch::new(spec, search) {
        Ok(s) => s.with_progress(progress),
        Err(e) => {
            error!(error = %e, "invalid key spec");
            progress.keys_failed.fetch_add(1, Ordering::Relaxed);
            return KeyOutcome::from_error(spec, &e);
        }
    };

    let result = searcher.run(&mut OsRng);
    let mut outcome = match result {
        Ok(material) => {
            let mut outcome = KeyOutcome::new(spec, OutcomeStatus::Generated);
            outcome.low_word = Some(format!("{:#010x}", material.low_word()));
            match sink(spec, &material) {
                Ok(delivered) => outcome.delivered = Some(delivered),
                Err(e) => {
                    error!(error = %e, "key generated but not delivered");
                    outcome.status = OutcomeStatus::SinkFailed;
                    outcome.error = Some(format!("{:#}", e));
                }
            }
            outcome
        }
        Err(e) => {
            if e.aborts_batch() {
                error!(error = %e, "key search failed");
            } else {
                warn!(error = %e, "key search failed");
            }
            KeyOutcome::from_error(spec, &e)
        }
    };

    outcome.stats = Some(searcher.stats().clone());
    outcome.elapsed_secs = start.elapsed().as_secs_f64();
    if outcome.succeeded() {
        progress.keys_done.fetch_add(1, Ordering::Relaxed);
        info!(
            anchors = searcher.stats().anchors,
            partner_draws = searcher.stats().partner_draws,
            elapsed = format_args!("{:.2}s", outcome.elapsed_secs),
            "key generated"
        );
    } else {
        progress.keys_failed.fetch_add(1, Ordering::Relaxed);
    }
    outcome
}
