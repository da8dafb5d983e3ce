//! # Search — Constrained-Modulus Key Search
//!
//! Finds `p, q, d` for a [`KeySpec`] such that `n = p*q` has exactly
//! `spec.bits` bits, passes the truncated key-id check for `spec.target`, and
//! admits a private exponent for `spec.exponent`.
//!
//! ## Algorithm
//!
//! 1. Draw a uniform prime anchor `q` of `bits/2` bits.
//! 2. Force the partner residue `p0 = r * (q mod 2^32)^-1 (mod 2^32)`.
//! 3. Bound the multiples `k` keeping `p = p0 + k*2^32` at `bits/2` bits.
//! 4. Draw `k` uniformly until `p` is prime (same anchor throughout).
//! 5. Accept when `n` has full length and `gcd(e, φ(n)) = 1`.
//!
//! ## Restart Scopes
//!
//! Every rejection is a named [`Resample`] with a [`RestartScope`]. Only a
//! composite partner keeps the anchor; everything else draws a new anchor.
//! The residue multiplier `r` is solved once per search and never redrawn.
//!
//! ## Budgets
//!
//! `max_attempts` caps anchor draws and turns a pathological search into
//! [`KeygenError::SearchExhausted`]. `max_partner_draws` caps `k` draws per
//! anchor. When the whole `k` interval fits in that cap each `k` is tried at
//! most once, so a one-element interval with a composite candidate moves on
//! to a new anchor instead of spinning, and an interval holding a prime
//! always yields it.

use rand::{CryptoRng, RngCore};
use rug::Integer;
use serde::{Deserialize, Serialize};
use std::sync::atomic::Ordering;
use tracing::{debug, debug_span, error, trace, warn};

use crate::error::KeygenError;
use crate::key::KeyMaterial;
use crate::key_spec::KeySpec;
use crate::progress::Progress;
use crate::residue::{self, MultipleRange, ResidueSolver};
use crate::sampling::{self, OffsetShuffle};

/// Tuning knobs for one search. Loaded from the `[search]` table of a batch
/// file or from CLI flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Anchor primes drawn before giving up.
    pub max_attempts: u64,
    /// Partner candidates tested per anchor, before the interval-size cap.
    pub max_partner_draws: u64,
    /// Miller-Rabin rounds for every primality decision.
    pub mr_rounds: u32,
}

impl Default for SearchConfig {
    fn default() -> Self {
        SearchConfig {
            max_attempts: 100_000,
            max_partner_draws: 100_000,
            mr_rounds: 25,
        }
    }
}

/// How much state a rejection throws away.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartScope {
    /// Draw a new anchor prime `q`.
    Anchor,
    /// Keep `q`, draw a new multiple `k` for the partner.
    Multiple,
}

/// Why a candidate was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resample {
    /// `q mod 2^32` is even and has no inverse.
    EvenAnchorResidue,
    /// No multiple of 2^32 puts the partner at half length.
    EmptyMultipleRange,
    /// The partner candidate failed the primality test.
    CompositePartner,
    /// The per-anchor partner budget ran out.
    PartnerBudgetSpent,
    /// `p*q` came out one bit short.
    ShortModulus,
    /// `gcd(e, φ(n)) != 1`.
    ExponentNotInvertible,
}

impl Resample {
    pub fn scope(&self) -> RestartScope {
        match self {
            Resample::CompositePartner => RestartScope::Multiple,
            Resample::EvenAnchorResidue
            | Resample::EmptyMultipleRange
            | Resample::PartnerBudgetSpent
            | Resample::ShortModulus
            | Resample::ExponentNotInvertible => RestartScope::Anchor,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Resample::EvenAnchorResidue => "even_anchor_residue",
            Resample::EmptyMultipleRange => "empty_multiple_range",
            Resample::CompositePartner => "composite_partner",
            Resample::PartnerBudgetSpent => "partner_budget_spent",
            Resample::ShortModulus => "short_modulus",
            Resample::ExponentNotInvertible => "exponent_not_invertible",
        }
    }
}

/// Per-search telemetry. Reported at debug level and in batch reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SearchStats {
    pub anchors: u64,
    pub partner_draws: u64,
    pub even_anchor_residue: u64,
    pub empty_multiple_range: u64,
    pub composite_partner: u64,
    pub partner_budget_spent: u64,
    pub short_modulus: u64,
    pub exponent_not_invertible: u64,
}

impl SearchStats {
    fn record(&mut self, cause: Resample) {
        let slot = match cause {
            Resample::EvenAnchorResidue => &mut self.even_anchor_residue,
            Resample::EmptyMultipleRange => &mut self.empty_multiple_range,
            Resample::CompositePartner => &mut self.composite_partner,
            Resample::PartnerBudgetSpent => &mut self.partner_budget_spent,
            Resample::ShortModulus => &mut self.short_modulus,
            Resample::ExponentNotInvertible => &mut self.exponent_not_invertible,
        };
        *slot += 1;
    }

    /// Rejections that discarded an anchor.
    pub fn anchor_restarts(&self) -> u64 {
        self.even_anchor_residue
            + self.empty_multiple_range
            + self.partner_budget_spent
            + self.short_modulus
            + self.exponent_not_invertible
    }
}

/// Randomized search for one key spec.
pub struct ConstrainedKeySearch<'a> {
    spec: &'a KeySpec,
    config: &'a SearchConfig,
    solver: ResidueSolver,
    stats: SearchStats,
    progress: Option<&'a Progress>,
}

impl<'a> ConstrainedKeySearch<'a> {
    /// Validate the spec and solve its residue multiplier. Fails with
    /// [`KeygenError::InvalidSpec`] before any randomness is drawn.
    pub fn new(spec: &'a KeySpec, config: &'a SearchConfig) -> Result<Self, KeygenError> {
        let solver = spec.solver()?;
        Ok(ConstrainedKeySearch {
            spec,
            config,
            solver,
            stats: SearchStats::default(),
            progress: None,
        })
    }

    /// Mirror counters into a shared [`Progress`].
    pub fn with_progress(mut self, progress: &'a Progress) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn stats(&self) -> &SearchStats {
        &self.stats
    }

    pub fn multiplier(&self) -> u32 {
        self.solver.multiplier()
    }

    /// Run until a key is found, the attempt budget is spent, or the
    /// constructed key fails its final check.
    pub fn run<R>(&mut self, rng: &mut R) -> Result<KeyMaterial, KeygenError>
    where
        R: RngCore + CryptoRng + ?Sized,
    {
        let span = debug_span!("search", key = %self.spec.name, bits = self.spec.bits);
        let _enter = span.enter();

        while self.stats.anchors < self.config.max_attempts {
            match self.attempt(rng) {
                Ok(material) => return self.finish(material),
                Err(cause) => self.resample(cause),
            }
        }

        warn!(
            key = %self.spec.name,
            attempts = self.stats.anchors,
            "attempt budget exhausted"
        );
        Err(KeygenError::SearchExhausted {
            name: self.spec.name.clone(),
            attempts: self.stats.anchors,
        })
    }

    /// One anchor prime, carried as far as it goes.
    fn attempt<R>(&mut self, rng: &mut R) -> Result<KeyMaterial, Resample>
    where
        R: RngCore + CryptoRng + ?Sized,
    {
        self.stats.anchors += 1;
        if let Some(progress) = self.progress {
            progress.anchors.fetch_add(1, Ordering::Relaxed);
        }

        let half = self.spec.half_bits();
        let q = sampling::random_prime(half, self.config.mr_rounds, rng);
        let p0 = self
            .solver
            .partner_residue(q.to_u32_wrapping())
            .ok_or(Resample::EvenAnchorResidue)?;
        let range = residue::multiple_range(half, p0).ok_or(Resample::EmptyMultipleRange)?;
        let p = self.find_partner(&range, rng)?;

        let n = Integer::from(&p * &q);
        if n.significant_bits() != self.spec.bits {
            return Err(Resample::ShortModulus);
        }

        let phi = Integer::from(&p - 1u32) * Integer::from(&q - 1u32);
        let e = Integer::from(self.spec.exponent);
        let d = e
            .clone()
            .invert(&phi)
            .map_err(|_| Resample::ExponentNotInvertible)?;

        Ok(KeyMaterial { n, e, d, p, q })
    }

    /// Draw multiples for a fixed anchor until the partner is prime.
    ///
    /// An interval no larger than the budget is walked in random order
    /// without repeats, so the anchor is only given up when none of its
    /// candidates is prime. Larger intervals are sampled with replacement.
    fn find_partner<R>(&mut self, range: &MultipleRange, rng: &mut R) -> Result<Integer, Resample>
    where
        R: RngCore + CryptoRng + ?Sized,
    {
        let span = range.span();
        let budget = self.config.max_partner_draws;
        match span.to_u64().filter(|&len| len <= budget) {
            Some(len) => {
                let mut offsets = OffsetShuffle::new(len);
                while let Some(offset) = offsets.draw(rng) {
                    if let Some(p) = self.test_partner(range, &Integer::from(offset)) {
                        return Ok(p);
                    }
                }
            }
            None => {
                for _ in 0..budget {
                    let offset = sampling::random_below(&span, rng);
                    if let Some(p) = self.test_partner(range, &offset) {
                        return Ok(p);
                    }
                }
            }
        }
        Err(Resample::PartnerBudgetSpent)
    }

    fn test_partner(&mut self, range: &MultipleRange, offset: &Integer) -> Option<Integer> {
        self.stats.partner_draws += 1;
        if let Some(progress) = self.progress {
            progress.partner_draws.fetch_add(1, Ordering::Relaxed);
        }
        let candidate = range.candidate(offset);
        if sampling::is_probable_prime(&candidate, self.config.mr_rounds) {
            return Some(candidate);
        }
        self.stats.record(Resample::CompositePartner);
        None
    }

    fn resample(&mut self, cause: Resample) {
        debug_assert_eq!(cause.scope(), RestartScope::Anchor);
        self.stats.record(cause);
        if let Some(progress) = self.progress {
            progress.resamples.fetch_add(1, Ordering::Relaxed);
        }
        trace!(cause = cause.label(), anchors = self.stats.anchors, "resample");
    }

    /// Post-construction check. A failure here is an arithmetic defect.
    fn finish(&self, material: KeyMaterial) -> Result<KeyMaterial, KeygenError> {
        if let Err(detail) = material.check(self.spec, self.config.mr_rounds) {
            error!(key = %self.spec.name, %detail, "constructed key failed its final check");
            return Err(KeygenError::InternalInvariantViolation {
                name: self.spec.name.clone(),
                detail,
            });
        }
        debug!(
            anchors = self.stats.anchors,
            partner_draws = self.stats.partner_draws,
            short_modulus = self.stats.short_modulus,
            exponent_not_invertible = self.stats.exponent_not_invertible,
            low_word = format_args!("{:#010x}", material.low_word()),
            "key found"
        );
        Ok(material)
    }
}

/// Validate `spec` and search for a key with default telemetry.
pub fn generate<R>(
    spec: &KeySpec,
    config: &SearchConfig,
    rng: &mut R,
) -> Result<KeyMaterial, KeygenError>
where
    R: RngCore + CryptoRng + ?Sized,
{
    ConstrainedKeySearch::new(spec, config)?.run(rng)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    #[test]
    fn only_composite_partner_keeps_the_anchor() {
        assert_eq!(Resample::CompositePartner.scope(), RestartScope::Multiple);
        for cause in [
            Resample::EvenAnchorResidue,
            Resample::EmptyMultipleRange,
            Resample::PartnerBudgetSpent,
            Resample::ShortModulus,
            Resample::ExponentNotInvertible,
        ] {
            assert_eq!(cause.scope(), RestartScope::Anchor, "{}", cause.label());
        }
    }

    #[test]
    fn stats_record_each_cause_separately() {
        let mut stats = SearchStats::default();
        stats.record(Resample::ShortModulus);
        stats.record(Resample::ShortModulus);
        stats.record(Resample::ExponentNotInvertible);
        stats.record(Resample::CompositePartner);
        assert_eq!(stats.short_modulus, 2);
        assert_eq!(stats.exponent_not_invertible, 1);
        assert_eq!(stats.composite_partner, 1);
        assert_eq!(stats.anchor_restarts(), 3);
    }

    #[test]
    fn small_key_satisfies_every_invariant() {
        let spec = KeySpec::new("small", 0x3716_ee6b, 128, 3);
        let config = SearchConfig::default();
        let mut rng = StdRng::seed_from_u64(7);
        let mut search = ConstrainedKeySearch::new(&spec, &config).unwrap();
        let key = search.run(&mut rng).unwrap();

        assert_eq!(key.n.significant_bits(), 128);
        assert_eq!(key.p.significant_bits(), 64);
        assert_eq!(key.q.significant_bits(), 64);
        assert_eq!(key.key_id_residue(spec.target), u32::MAX);
        assert_eq!(key.low_word(), search.multiplier());
        assert_eq!(key.check(&spec, 25), Ok(()));
        assert!(search.stats().anchors >= 1);
        assert!(search.stats().partner_draws >= 1);
    }

    #[test]
    fn attempt_budget_turns_into_exhaustion() {
        // A 16-bit modulus needs an 8-bit partner inside a 2^32 residue
        // class, which almost never exists.
        let spec = KeySpec::new("tiny", 0x3716_ee6b, 16, 3);
        let config = SearchConfig {
            max_attempts: 40,
            ..SearchConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(11);
        let mut search = ConstrainedKeySearch::new(&spec, &config).unwrap();
        match search.run(&mut rng) {
            Err(KeygenError::SearchExhausted { name, attempts }) => {
                assert_eq!(name, "tiny");
                assert_eq!(attempts, 40);
            }
            other => panic!("expected SearchExhausted, got {:?}", other),
        }
        assert_eq!(search.stats().anchors, 40);
        assert_eq!(search.stats().empty_multiple_range, 40);
        assert_eq!(search.stats().partner_draws, 0);
    }

    #[test]
    fn zero_partner_budget_spends_every_anchor() {
        let spec = KeySpec::new("starved", 0x3716_ee6b, 128, 3);
        let config = SearchConfig {
            max_attempts: 5,
            max_partner_draws: 0,
            mr_rounds: 25,
        };
        let mut rng = StdRng::seed_from_u64(12);
        let mut search = ConstrainedKeySearch::new(&spec, &config).unwrap();
        assert!(matches!(
            search.run(&mut rng),
            Err(KeygenError::SearchExhausted { attempts: 5, .. })
        ));
        assert_eq!(search.stats().partner_budget_spent, 5);
    }

    #[test]
    fn progress_mirrors_stats() {
        let spec = KeySpec::new("mirrored", 0x87b7_3b67, 96, 3);
        let config = SearchConfig::default();
        let progress = Progress::new();
        let mut rng = StdRng::seed_from_u64(13);
        let mut search = ConstrainedKeySearch::new(&spec, &config)
            .unwrap()
            .with_progress(&progress);
        search.run(&mut rng).unwrap();
        let stats = search.stats();
        assert_eq!(progress.anchors.load(Ordering::Relaxed), stats.anchors);
        assert_eq!(
            progress.partner_draws.load(Ordering::Relaxed),
            stats.partner_draws
        );
        assert_eq!(
            progress.resamples.load(Ordering::Relaxed),
            stats.anchor_restarts()
        );
    }

    /// A range of `len` multiples above 2^32 with exactly `primes` prime
    /// candidates, found by scanning odd residues.
    fn range_with_primes(len: u64, primes: usize) -> (MultipleRange, Vec<Integer>) {
        let mut residue = 1u32;
        loop {
            let range = MultipleRange {
                residue,
                kmin: Integer::from(1u32),
                kmax: Integer::from(len),
            };
            let found: Vec<Integer> = (0..len)
                .map(|offset| range.candidate(&Integer::from(offset)))
                .filter(|c| sampling::is_probable_prime(c, 25))
                .collect();
            if found.len() == primes {
                return (range, found);
            }
            residue += 2;
        }
    }

    #[test]
    fn small_range_always_yields_its_only_prime() {
        let (range, primes) = range_with_primes(8, 1);
        let spec = KeySpec::new("lone", 0x3716_ee6b, 70, 3);
        let config = SearchConfig::default();
        for seed in 0..64 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut search = ConstrainedKeySearch::new(&spec, &config).unwrap();
            assert_eq!(search.find_partner(&range, &mut rng), Ok(primes[0].clone()));
            assert!(search.stats().partner_draws <= 8);
        }
    }

    #[test]
    fn prime_free_range_tries_each_candidate_once() {
        let (range, _) = range_with_primes(8, 0);
        let spec = KeySpec::new("barren", 0x3716_ee6b, 70, 3);
        let config = SearchConfig::default();
        let mut rng = StdRng::seed_from_u64(3);
        let mut search = ConstrainedKeySearch::new(&spec, &config).unwrap();
        assert_eq!(
            search.find_partner(&range, &mut rng),
            Err(Resample::PartnerBudgetSpent)
        );
        assert_eq!(search.stats().partner_draws, 8);
        assert_eq!(search.stats().composite_partner, 8);
    }

    #[test]
    fn range_wider_than_budget_stops_at_budget() {
        let (range, _) = range_with_primes(8, 0);
        let spec = KeySpec::new("capped", 0x3716_ee6b, 70, 3);
        let config = SearchConfig {
            max_partner_draws: 5,
            ..SearchConfig::default()
        };
        let mut rng = StdRng::seed_from_u64(4);
        let mut search = ConstrainedKeySearch::new(&spec, &config).unwrap();
        assert_eq!(
            search.find_partner(&range, &mut rng),
            Err(Resample::PartnerBudgetSpent)
        );
        assert_eq!(search.stats().partner_draws, 5);
    }

    #[test]
    fn tampered_material_is_an_invariant_violation() {
        let spec = KeySpec::new("tampered", 0x3716_ee6b, 128, 3);
        let config = SearchConfig::default();
        let mut material = generate(&spec, &config, &mut StdRng::seed_from_u64(7)).unwrap();
        material.n += 2u32;

        let search = ConstrainedKeySearch::new(&spec, &config).unwrap();
        let err = search.finish(material).unwrap_err();
        match &err {
            KeygenError::InternalInvariantViolation { name, detail } => {
                assert_eq!(name, "tampered");
                assert!(detail.contains("mod 2^32"), "{}", detail);
            }
            other => panic!("expected InternalInvariantViolation, got {:?}", other),
        }
        assert!(err.aborts_batch());
    }

    #[test]
    fn wrong_private_exponent_is_an_invariant_violation() {
        let spec = KeySpec::new("bad-d", 0x87b7_3b67, 128, 3);
        let config = SearchConfig::default();
        let mut material = generate(&spec, &config, &mut StdRng::seed_from_u64(8)).unwrap();
        material.d += 1u32;

        let search = ConstrainedKeySearch::new(&spec, &config).unwrap();
        assert!(matches!(
            search.finish(material),
            Err(KeygenError::InternalInvariantViolation { .. })
        ));
    }

    #[test]
    fn invalid_spec_fails_before_search() {
        let spec = KeySpec::new("even", 0x0000_0002, 2048, 3);
        let config = SearchConfig::default();
        assert!(matches!(
            ConstrainedKeySearch::new(&spec, &config),
            Err(KeygenError::InvalidSpec { .. })
        ));
    }

    #[test]
    fn config_defaults_fill_missing_toml_fields() {
        let config: SearchConfig = toml::from_str("mr_rounds = 40").unwrap();
        assert_eq!(config.mr_rounds, 40);
        assert_eq!(config.max_attempts, SearchConfig::default().max_attempts);
    }
}
