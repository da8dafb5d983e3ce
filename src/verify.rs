//! Independent re-verification of the key-id residue.
//!
//! Works from the public modulus alone, so it can check keys read back from
//! disk as well as freshly generated material. The check is exact integer
//! arithmetic and gives the same answer every time.

use anyhow::Result;
use rug::Integer;
use serde::Serialize;
use std::path::Path;

use crate::export;
use crate::residue::{self, REQUIRED_RESIDUE};

/// Outcome of checking one modulus against one target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResidueReport {
    pub target: u32,
    pub residue: u32,
    pub modulus_bits: u32,
    pub passed: bool,
}

impl std::fmt::Display for ResidueReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "(n * {:#010x}) mod 2^32 = {:#010x}, expected {:#010x}: {} ({}-bit modulus)",
            self.target,
            self.residue,
            REQUIRED_RESIDUE,
            if self.passed { "ok" } else { "MISMATCH" },
            self.modulus_bits
        )
    }
}

pub fn check_modulus(n: &Integer, target: u32) -> ResidueReport {
    let residue = residue::key_id_residue(n, target);
    ResidueReport {
        target,
        residue,
        modulus_bits: n.significant_bits(),
        passed: residue == REQUIRED_RESIDUE,
    }
}

/// Read a PEM key from `path` and check its modulus against `target`.
pub fn verify_key_file(path: &Path, target: u32) -> Result<ResidueReport> {
    let n = export::read_modulus(path)?;
    Ok(check_modulus(&n, target))
}
