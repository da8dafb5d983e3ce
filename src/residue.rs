//! # Residue — Key-Id Residue Arithmetic Modulo 2^32
//!
//! Pure arithmetic behind the key-id constraint. A verifier that only looks at
//! the low 32 bits of an RSA modulus accepts `n` when
//! `n * target ≡ -1 (mod 2^32)`. Writing `M = 2^32`, that holds exactly when
//! `n ≡ r (mod M)` with `r = (-target)^-1 mod M`.
//!
//! Given an anchor prime `q` with low word `q0`, the partner prime `p` is
//! therefore forced into the residue class `p0 = r * q0^-1 (mod M)`, and every
//! partner candidate has the shape `p = p0 + k*M`. This module computes `r`,
//! `p0`, and the interval of multiples `k` that keep `p` at the requested bit
//! length.
//!
//! All inverses are taken modulo a power of two, so a value is invertible iff
//! it is odd. Inversion uses Hensel lifting (Newton iteration), the same trick
//! the Montgomery setup uses for `n^-1 mod 2^64`.

use rug::ops::DivRounding;
use rug::Integer;

/// Width of the key-id residue, in bits.
pub const MODULUS_BITS: u32 = 32;

/// Value `(n * target) mod 2^32` takes on every accepted modulus.
pub const REQUIRED_RESIDUE: u32 = u32::MAX;

/// Inverse of `a` modulo 2^32, or `None` when `a` is even.
///
/// Hensel lifting: `inv ≡ a^-1 (mod 2)` holds for `inv = 1` and each step
/// doubles the number of correct low bits (2, 4, 8, 16, 32).
pub fn inverse_mod_2_32(a: u32) -> Option<u32> {
    if a & 1 == 0 {
        return None;
    }
    let mut inv: u32 = 1;
    for _ in 0..5 {
        inv = inv.wrapping_mul(2u32.wrapping_sub(a.wrapping_mul(inv)));
    }
    Some(inv)
}

/// `(n * target) mod 2^32`, the value an external key-id check inspects.
pub fn key_id_residue(n: &Integer, target: u32) -> u32 {
    n.to_u32_wrapping().wrapping_mul(target)
}

/// True when `n` passes the truncated key-id check for `target`.
pub fn satisfies_key_id(n: &Integer, target: u32) -> bool {
    key_id_residue(n, target) == REQUIRED_RESIDUE
}

/// Fixed multiplier tying the two primes' low words together for one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResidueSolver {
    target: u32,
    multiplier: u32,
}

impl ResidueSolver {
    /// Solve `r * ((-target) mod 2^32) ≡ 1 (mod 2^32)`.
    ///
    /// Returns `None` for an even target, which has no usable key.
    pub fn new(target: u32) -> Option<Self> {
        let multiplier = inverse_mod_2_32(target.wrapping_neg())?;
        Some(ResidueSolver { target, multiplier })
    }

    pub fn target(&self) -> u32 {
        self.target
    }

    /// The required low word `r` of every accepted modulus.
    pub fn multiplier(&self) -> u32 {
        self.multiplier
    }

    /// Low word the partner prime must have, given the anchor's low word.
    /// `None` when the anchor residue is even (not invertible).
    pub fn partner_residue(&self, anchor_residue: u32) -> Option<u32> {
        let anchor_inv = inverse_mod_2_32(anchor_residue)?;
        Some(self.multiplier.wrapping_mul(anchor_inv))
    }
}

/// Admissible multiples `k ∈ [kmin, kmax]` such that
/// `p = residue + k * 2^32` has exactly `half_bits` bits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MultipleRange {
    pub residue: u32,
    pub kmin: Integer,
    pub kmax: Integer,
}

impl MultipleRange {
    /// Number of admissible multiples (always ≥ 1).
    pub fn span(&self) -> Integer {
        Integer::from(&self.kmax - &self.kmin) + 1u32
    }

    /// Partner candidate for the multiple `kmin + offset`.
    pub fn candidate(&self, offset: &Integer) -> Integer {
        let k = Integer::from(&self.kmin + offset);
        (k << MODULUS_BITS) + self.residue
    }
}

/// Interval of multiples placing `residue + k * 2^32` inside
/// `[2^(half_bits-1), 2^half_bits - 1]`.
///
/// Returns `None` when the interval is empty, which is routine for
/// `half_bits ≤ 32`. At `half_bits == 32` the interval is either empty or the
/// single multiple `k = 0`.
pub fn multiple_range(half_bits: u32, residue: u32) -> Option<MultipleRange> {
    debug_assert!(half_bits >= 1);
    let modulus = Integer::from(1u64 << MODULUS_BITS);
    let lo = Integer::from(1u32) << (half_bits - 1);
    let hi = (Integer::from(1u32) << half_bits) - 1u32;

    let kmin = (lo - residue).div_ceil(&modulus);
    let kmax = (hi - residue).div_floor(&modulus);
    if kmax < kmin {
        return None;
    }
    Some(MultipleRange {
        residue,
        kmin,
        kmax,
    })
}
