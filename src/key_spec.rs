//! Key specifications: what to generate, and which specs are usable at all.

use serde::{Deserialize, Serialize};

use crate::error::KeygenError;
use crate::residue::ResidueSolver;

/// Smallest modulus for which the construction is defined.
pub const MIN_MODULUS_BITS: u32 = 16;

/// One named key to generate.
///
/// In TOML the target is usually written as a hex literal
/// (`target = 0xaa66150f`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySpec {
    pub name: String,
    pub target: u32,
    pub bits: u32,
    #[serde(default = "default_exponent")]
    pub exponent: u32,
}

fn default_exponent() -> u32 {
    3
}

impl KeySpec {
    pub fn new(name: impl Into<String>, target: u32, bits: u32, exponent: u32) -> Self {
        KeySpec {
            name: name.into(),
            target,
            bits,
            exponent,
        }
    }

    /// Bit length of each prime factor.
    pub fn half_bits(&self) -> u32 {
        self.bits / 2
    }

    /// Reject specs that can never yield a key. Consumes no randomness.
    pub fn validate(&self) -> Result<(), KeygenError> {
        self.solver().map(|_| ())
    }

    /// Validate and solve the residue multiplier in one step.
    pub(crate) fn solver(&self) -> Result<ResidueSolver, KeygenError> {
        if self.bits < MIN_MODULUS_BITS || self.bits % 2 != 0 {
            return Err(KeygenError::invalid_spec(
                &self.name,
                format!(
                    "bit length {} must be even and at least {}",
                    self.bits, MIN_MODULUS_BITS
                ),
            ));
        }
        if self.exponent < 3 || self.exponent % 2 == 0 {
            return Err(KeygenError::invalid_spec(
                &self.name,
                format!("public exponent {} must be odd and at least 3", self.exponent),
            ));
        }
        ResidueSolver::new(self.target).ok_or_else(|| {
            KeygenError::invalid_spec(
                &self.name,
                format!("target {:#010x} is even and has no inverse mod 2^32", self.target),
            )
        })
    }
}

impl std::fmt::Display for KeySpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} (target {:#010x}, {} bits, e={})",
            self.name, self.target, self.bits, self.exponent
        )
    }
}

/// Built-in key groups: one entry per key id the boot ROM and RW firmware
/// accept.
pub fn presets() -> Vec<KeySpec> {
    vec![
        // RO 0.0.9 and older
        KeySpec::new("haven-rom-prod", 0xaa66_150f, 3072, 3),
        // RO 0.0.10 and newer
        KeySpec::new("haven-rom-dev", 0x3716_ee6b, 2048, 3),
        KeySpec::new("cr50-rw-b2-prod", 0x87b7_3b67, 2048, 3),
        KeySpec::new("cr50-rw-b1-prod", 0xde88_588d, 2048, 3),
        KeySpec::new("cr50-rw-b1-dev", 0xb93d_6539, 2048, 3),
    ]
}

/// Parse a target given as `0x`-prefixed hex or plain decimal.
pub fn parse_target(s: &str) -> Result<u32, String> {
    let s = s.trim();
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u32::from_str_radix(&hex.replace('_', ""), 16),
        None => s.replace('_', "").parse::<u32>(),
    };
    parsed.map_err(|e| format!("invalid 32-bit target '{}': {}", s, e))
}
