//! Uniform sampling of big integers and primes from a cryptographic RNG.
//!
//! Every draw goes through `RngCore + CryptoRng`; production callers pass
//! `rand::rngs::OsRng`, tests pass a seeded `StdRng` for reproducibility.
//! Sampling is by rejection, so draws are exactly uniform over their range.
//!
//! Primality decisions run trial division by the primes below 256 first and
//! then Miller-Rabin. Two cheap rounds reject almost every composite, so the
//! full round count is only paid by candidates that are very likely prime.

use rand::{CryptoRng, RngCore};
use rug::integer::{IsPrime, Order};
use rug::Integer;
use std::collections::HashMap;

/// Every prime below 256.
const TRIAL_DIVISORS: [u32; 54] = [
    2, 3, 5, 7, 11, 13, 17, 19, 23, 29, 31, 37, 41, 43, 47, 53, 59, 61, 67, 71, 73, 79, 83, 89, 97,
    101, 103, 107, 109, 113, 127, 131, 137, 139, 149, 151, 157, 163, 167, 173, 179, 181, 191, 193,
    197, 199, 211, 223, 227, 229, 233, 239, 241, 251,
];

/// Miller-Rabin rounds run before the full count.
const SCREEN_ROUNDS: u32 = 2;

/// True when `n` is a proper multiple of a prime below 256. The divisor
/// itself is not flagged.
pub fn has_small_factor(n: &Integer) -> bool {
    TRIAL_DIVISORS
        .iter()
        .find(|&&d| n.is_divisible_u(d))
        .is_some_and(|&d| *n != d)
}

/// Miller-Rabin with a short screening pass. Returns the verdict of the full
/// `mr_rounds` test for candidates that survive the screen.
pub fn screened_miller_rabin(candidate: &Integer, mr_rounds: u32) -> IsPrime {
    if mr_rounds > SCREEN_ROUNDS && candidate.is_probably_prime(SCREEN_ROUNDS) == IsPrime::No {
        return IsPrime::No;
    }
    candidate.is_probably_prime(mr_rounds)
}

/// True when `candidate` survives trial division and Miller-Rabin.
pub fn is_probable_prime(candidate: &Integer, mr_rounds: u32) -> bool {
    !has_small_factor(candidate) && screened_miller_rabin(candidate, mr_rounds) != IsPrime::No
}

/// Uniform integer in `[0, 2^bits)`.
pub fn random_bits<R>(bits: u32, rng: &mut R) -> Integer
where
    R: RngCore + CryptoRng + ?Sized,
{
    let len = bits.div_ceil(8) as usize;
    let mut buf = vec![0u8; len];
    rng.fill_bytes(&mut buf);
    let excess = len as u32 * 8 - bits;
    if excess > 0 {
        buf[0] &= 0xff >> excess;
    }
    Integer::from_digits(&buf, Order::Msf)
}

/// Uniform integer in `[0, bound)`. `bound` must be positive.
pub fn random_below<R>(bound: &Integer, rng: &mut R) -> Integer
where
    R: RngCore + CryptoRng + ?Sized,
{
    debug_assert!(*bound > 0, "random_below requires a positive bound");
    let bits = bound.significant_bits();
    loop {
        let candidate = random_bits(bits, rng);
        if &candidate < bound {
            return candidate;
        }
    }
}

/// Uniformly random prime with exactly `bits` bits (`bits >= 2`).
///
/// Draws odd candidates with the top bit forced and rejects composites, so
/// every prime of that length is equally likely.
pub fn random_prime<R>(bits: u32, mr_rounds: u32, rng: &mut R) -> Integer
where
    R: RngCore + CryptoRng + ?Sized,
{
    debug_assert!(bits >= 2);
    loop {
        let mut candidate = random_bits(bits, rng);
        candidate.set_bit(bits - 1, true);
        candidate.set_bit(0, true);
        if is_probable_prime(&candidate, mr_rounds) {
            return candidate;
        }
    }
}

/// The offsets `0..len` in uniformly random order, produced one at a time.
///
/// Sparse Fisher-Yates: only displaced positions are stored, so memory grows
/// with the number of draws rather than with `len`.
#[derive(Debug, Clone)]
pub struct OffsetShuffle {
    len: u64,
    drawn: u64,
    displaced: HashMap<u64, u64>,
}

impl OffsetShuffle {
    pub fn new(len: u64) -> Self {
        OffsetShuffle {
            len,
            drawn: 0,
            displaced: HashMap::new(),
        }
    }

    pub fn remaining(&self) -> u64 {
        self.len - self.drawn
    }

    /// Next offset not yet drawn, or `None` once all `len` are used up.
    pub fn draw<R>(&mut self, rng: &mut R) -> Option<u64>
    where
        R: RngCore + CryptoRng + ?Sized,
    {
        if self.drawn == self.len {
            return None;
        }
        let i = self.drawn;
        let j = i + random_below(&Integer::from(self.len - i), rng).to_u64_wrapping();
        let at_i = self.displaced.remove(&i).unwrap_or(i);
        let picked = if j == i {
            at_i
        } else {
            let at_j = self.displaced.get(&j).copied().unwrap_or(j);
            self.displaced.insert(j, at_i);
            at_j
        };
        self.drawn += 1;
        Some(picked)
    }
}
