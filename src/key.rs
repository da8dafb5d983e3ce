//! # Key — Constructed RSA Key Material
//!
//! `KeyMaterial` is the terminal product of a successful search. It is
//! assembled once and never mutated. [`KeyMaterial::check`] re-derives every
//! invariant from the raw integers, so a caller can re-verify material it did
//! not construct itself (the search runs it unconditionally before returning).

use rug::integer::IsPrime;
use rug::Integer;

use crate::key_spec::KeySpec;
use crate::residue;

/// RSA key components `n, e, d, p, q`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub n: Integer,
    pub e: Integer,
    pub d: Integer,
    pub p: Integer,
    pub q: Integer,
}

impl KeyMaterial {
    /// Euler's totient `(p-1)(q-1)`.
    pub fn phi(&self) -> Integer {
        Integer::from(&self.p - 1u32) * Integer::from(&self.q - 1u32)
    }

    /// `(n * target) mod 2^32`.
    pub fn key_id_residue(&self, target: u32) -> u32 {
        residue::key_id_residue(&self.n, target)
    }

    /// Low 32 bits of the modulus, as printed in reports.
    pub fn low_word(&self) -> u32 {
        self.n.to_u32_wrapping()
    }

    /// Check every invariant against `spec`. Returns a description of the
    /// first violation found.
    ///
    /// The residue, product, and exponent checks are exact; the primality
    /// checks use `mr_rounds` Miller-Rabin rounds.
    pub fn check(&self, spec: &KeySpec, mr_rounds: u32) -> Result<(), String> {
        let residue = self.key_id_residue(spec.target);
        if residue != residue::REQUIRED_RESIDUE {
            return Err(format!(
                "(n * {:#010x}) mod 2^32 = {:#010x}, expected {:#010x}",
                spec.target,
                residue,
                residue::REQUIRED_RESIDUE
            ));
        }
        if Integer::from(&self.p * &self.q) != self.n {
            return Err("n != p * q".to_string());
        }
        if self.n.significant_bits() != spec.bits {
            return Err(format!(
                "modulus has {} bits, expected {}",
                self.n.significant_bits(),
                spec.bits
            ));
        }
        let half = spec.half_bits();
        for (label, factor) in [("p", &self.p), ("q", &self.q)] {
            if factor.significant_bits() != half {
                return Err(format!(
                    "{} has {} bits, expected {}",
                    label,
                    factor.significant_bits(),
                    half
                ));
            }
            if factor.is_probably_prime(mr_rounds) == IsPrime::No {
                return Err(format!("{} is composite", label));
            }
        }
        if self.e != spec.exponent {
            return Err(format!("e = {}, expected {}", self.e, spec.exponent));
        }
        let phi = self.phi();
        let ed = Integer::from(&self.e * &self.d) % &phi;
        if ed != 1u32 {
            return Err(format!("e * d mod phi = {}, expected 1", ed));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// The textbook 61 * 53 key, with a target chosen to fit its modulus.
    fn toy() -> (KeyMaterial, KeySpec) {
        let p = Integer::from(61u32);
        let q = Integer::from(53u32);
        let n = Integer::from(&p * &q);
        let e = Integer::from(17u32);
        let d = Integer::from(2753u32);
        // n = 3233 (odd); target = -(n^-1) makes n * target ≡ -1.
        let n_inv = residue::inverse_mod_2_32(3233).unwrap();
        let target = n_inv.wrapping_neg();
        let spec = KeySpec::new("toy", target, 12, 17);
        (KeyMaterial { n, e, d, p, q }, spec)
    }

    #[test]
    fn toy_key_passes_every_check() {
        let (key, spec) = toy();
        assert_eq!(key.check(&spec, 25), Ok(()));
        assert_eq!(key.key_id_residue(spec.target), u32::MAX);
        assert_eq!(key.phi(), 3120);
        assert_eq!(key.low_word(), 3233);
    }

    #[test]
    fn wrong_target_is_reported_first() {
        let (key, mut spec) = toy();
        spec.target = spec.target.wrapping_add(2);
        let err = key.check(&spec, 25).unwrap_err();
        assert!(err.contains("mod 2^32"), "{}", err);
    }

    #[test]
    fn bad_private_exponent_is_reported() {
        let (mut key, spec) = toy();
        key.d += 1u32;
        let err = key.check(&spec, 25).unwrap_err();
        assert!(err.contains("e * d"), "{}", err);
    }

    #[test]
    fn wrong_length_is_reported() {
        let (key, mut spec) = toy();
        spec.bits = 14;
        let err = key.check(&spec, 25).unwrap_err();
        assert!(err.contains("modulus has 12 bits"), "{}", err);
    }

    #[test]
    fn composite_factor_is_reported() {
        // 63 = 7 * 9 stands in for p.
        let p = Integer::from(63u32);
        let q = Integer::from(53u32);
        let n = Integer::from(&p * &q);
        let target = residue::inverse_mod_2_32(n.to_u32_wrapping())
            .unwrap()
            .wrapping_neg();
        let spec = KeySpec::new("composite", target, 12, 17);
        let key = KeyMaterial {
            n,
            e: Integer::from(17u32),
            d: Integer::from(1u32),
            p,
            q,
        };
        let err = key.check(&spec, 25).unwrap_err();
        assert!(err.contains("p is composite"), "{}", err);
    }
}
