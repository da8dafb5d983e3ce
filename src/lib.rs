//! # keyid-forge
//!
//! RSA key generation where the modulus is pinned to a 32-bit key-id residue:
//! `n * target ≡ -1 (mod 2^32)`. A verifier that only inspects the low word of
//! the modulus accepts the key, while the key itself is a full-length RSA key.
//!
//! - [`residue`]: the modular arithmetic tying both primes to the target.
//! - [`search`]: the randomized constrained-modulus search.
//! - [`batch`], [`export`], [`verify`]: the tool around it (batch runs, PEM
//!   files, independent re-verification).

pub mod batch;
pub mod error;
pub mod export;
pub mod key;
pub mod key_spec;
pub mod progress;
pub mod residue;
pub mod sampling;
pub mod search;
pub mod verify;

pub use error::KeygenError;
pub use key::KeyMaterial;
pub use key_spec::KeySpec;
pub use search::{generate, ConstrainedKeySearch, SearchConfig};
