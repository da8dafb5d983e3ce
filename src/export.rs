//! # Export — PEM Encoding and Key Files
//!
//! Hands [`KeyMaterial`] to the `rsa` crate for encoding. The private key is
//! written as PKCS#1 (`RSA PRIVATE KEY`) to `<name>.pem` and the public key as
//! SPKI (`PUBLIC KEY`) to `<name>.pem.pub`. CRT parameters are derived by
//! `rsa` from `n, e, d, p, q`.
//!
//! ## Atomic Writes
//!
//! Each file is written to a `.tmp` sibling and renamed into place, so a
//! crash never leaves a truncated key behind. On Unix the private key is
//! created with mode 0600.

use anyhow::{Context, Result};
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey, EncodeRsaPrivateKey};
use rsa::pkcs8::{DecodePublicKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{BigUint, RsaPrivateKey, RsaPublicKey};
use rug::integer::Order;
use rug::Integer;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::key::KeyMaterial;

/// Files written for one key.
#[derive(Debug, Clone)]
pub struct ExportedKey {
    pub private_path: PathBuf,
    pub public_path: PathBuf,
    pub fingerprint: String,
}

pub fn to_biguint(x: &Integer) -> BigUint {
    BigUint::from_bytes_be(&x.to_digits::<u8>(Order::Msf))
}

pub fn from_biguint(x: &BigUint) -> Integer {
    Integer::from_digits(&x.to_bytes_be(), Order::Msf)
}

/// Build and validate an `rsa` private key from raw components.
pub fn to_private_key(material: &KeyMaterial) -> Result<RsaPrivateKey> {
    let key = RsaPrivateKey::from_components(
        to_biguint(&material.n),
        to_biguint(&material.e),
        to_biguint(&material.d),
        vec![to_biguint(&material.p), to_biguint(&material.q)],
    )
    .context("assembling RSA private key")?;
    key.validate().context("validating RSA private key")?;
    Ok(key)
}

/// SHA-256 of the SPKI DER encoding, lower-case hex.
pub fn public_fingerprint(public: &RsaPublicKey) -> Result<String> {
    let der = public.to_public_key_der()?;
    let mut hasher = Sha256::new();
    hasher.update(der.as_bytes());
    Ok(format!("{:x}", hasher.finalize()))
}

/// `<dir>/<name>.pem` and `<dir>/<name>.pem.pub`.
pub fn key_paths(dir: &Path, name: &str) -> (PathBuf, PathBuf) {
    (
        dir.join(format!("{}.pem", name)),
        dir.join(format!("{}.pem.pub", name)),
    )
}

/// Encode `material` and write both PEM files into `dir`.
pub fn write_key_files(dir: &Path, name: &str, material: &KeyMaterial) -> Result<ExportedKey> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let private = to_private_key(material)?;
    let public = RsaPublicKey::from(&private);
    let private_pem = private.to_pkcs1_pem(LineEnding::LF)?;
    let public_pem = public.to_public_key_pem(LineEnding::LF)?;
    let fingerprint = public_fingerprint(&public)?;

    let (private_path, public_path) = key_paths(dir, name);
    write_atomic(&private_path, private_pem.as_bytes(), true)?;
    write_atomic(&public_path, public_pem.as_bytes(), false)?;

    info!(
        private = %private_path.display(),
        public = %public_path.display(),
        fingerprint = %fingerprint,
        "key files written"
    );
    Ok(ExportedKey {
        private_path,
        public_path,
        fingerprint,
    })
}

/// Modulus of a PEM key on disk. Accepts SPKI or PKCS#1 public keys and
/// PKCS#1 private keys.
pub fn read_modulus(path: &Path) -> Result<Integer> {
    let pem = fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    let public = if let Ok(key) = RsaPublicKey::from_public_key_pem(&pem) {
        key
    } else if let Ok(key) = RsaPublicKey::from_pkcs1_pem(&pem) {
        key
    } else {
        let private = RsaPrivateKey::from_pkcs1_pem(&pem)
            .with_context(|| format!("{} is not a PEM RSA key", path.display()))?;
        RsaPublicKey::from(&private)
    };
    Ok(from_biguint(public.n()))
}

fn write_atomic(path: &Path, contents: &[u8], private: bool) -> Result<()> {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, contents).with_context(|| format!("writing {}", tmp.display()))?;
    if private {
        restrict_permissions(&tmp)?;
    }
    fs::rename(&tmp, path).with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))?;
    Ok(())
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> Result<()> {
    Ok(())
}
