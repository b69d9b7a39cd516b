//! Password hashing and verification.
//!
//! Hashes are Argon2id in the explicit six-part encoding
//! `$argon2id$v=19$m=65536,t=2,p=4$<salt>$<digest>` with base64 (no padding)
//! for the binary segments. Verification re-derives with the parameters
//! *stored in the hash*, so parameter upgrades only affect new hashes, and
//! compares in constant time. A malformed hash is a parse error, never a
//! "wrong password".

use argon2::{Algorithm, Argon2, Params, Version};
use base64::{Engine as _, engine::general_purpose::STANDARD_NO_PAD};
use rand::prelude::RngExt;
use rand::rng;
use subtle::ConstantTimeEq;
use thiserror::Error;

/// Argon2id parameters for newly created hashes.
const MEMORY_KIB: u32 = 64 * 1024;
const ITERATIONS: u32 = 2;
const PARALLELISM: u32 = 4;
const KEY_LEN: usize = 32;
const SALT_LEN: usize = 16;

/// Errors from hashing or from parsing a stored hash. Distinct from a failed
/// verification: a `false` match result only ever comes out of a hash that
/// parsed cleanly.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum HashError {
    #[error("hash must have exactly six '$'-delimited components")]
    Format,
    #[error("unsupported algorithm variant")]
    Algorithm,
    #[error("unparseable version field")]
    Version,
    #[error("unparseable parameter field")]
    Params,
    #[error("salt is not valid base64")]
    Salt,
    #[error("digest is not valid base64")]
    Digest,
    #[error("key derivation failed: {0}")]
    Derive(String),
}

/// Hash a password with a fresh random 128-bit salt.
pub fn hash(password: &str) -> Result<String, HashError> {
    let mut salt = [0u8; SALT_LEN];
    rng().fill(&mut salt);

    let params =
        Params::new(MEMORY_KIB, ITERATIONS, PARALLELISM, Some(KEY_LEN)).map_err(|e| HashError::Derive(e.to_string()))?;

    let mut key = [0u8; KEY_LEN];
    Argon2::new(Algorithm::Argon2id, Version::V0x13, params)
        .hash_password_into(password.as_bytes(), &salt, &mut key)
        .map_err(|e| HashError::Derive(e.to_string()))?;

    Ok(format!(
        "$argon2id$v={}$m={},t={},p={}${}${}",
        Version::V0x13 as u32,
        MEMORY_KIB,
        ITERATIONS,
        PARALLELISM,
        STANDARD_NO_PAD.encode(salt),
        STANDARD_NO_PAD.encode(key),
    ))
}

/// Verify a password against a stored hash.
///
/// Returns a match result only when the hash parsed; any structural problem
/// is surfaced as an error so corrupt credential data cannot silently
/// authenticate (or silently reject) anyone.
pub fn verify(encoded: &str, password: &str) -> Result<bool, HashError> {
    let parsed = parse(encoded)?;

    let params = Params::new(
        parsed.memory_kib,
        parsed.iterations,
        parsed.parallelism,
        Some(parsed.digest.len()),
    )
    .map_err(|_| HashError::Params)?;

    let mut derived = vec![0u8; parsed.digest.len()];
    Argon2::new(Algorithm::Argon2id, parsed.version, params)
        .hash_password_into(password.as_bytes(), &parsed.salt, &mut derived)
        .map_err(|e| HashError::Derive(e.to_string()))?;

    Ok(bool::from(derived.ct_eq(&parsed.digest)))
}

struct ParsedHash {
    version: Version,
    memory_kib: u32,
    iterations: u32,
    parallelism: u32,
    salt: Vec<u8>,
    digest: Vec<u8>,
}

fn parse(encoded: &str) -> Result<ParsedHash, HashError> {
    let parts: Vec<&str> = encoded.split('$').collect();
    if parts.len() != 6 || !parts[0].is_empty() {
        return Err(HashError::Format);
    }

    if parts[1] != "argon2id" {
        return Err(HashError::Algorithm);
    }

    let version_raw: u32 = parts[2]
        .strip_prefix("v=")
        .ok_or(HashError::Version)?
        .parse()
        .map_err(|_| HashError::Version)?;
    let version = Version::try_from(version_raw).map_err(|_| HashError::Version)?;

    let mut fields = parts[3].split(',');
    let memory_kib = param_field(fields.next(), "m=")?;
    let iterations = param_field(fields.next(), "t=")?;
    let parallelism = param_field(fields.next(), "p=")?;
    if fields.next().is_some() {
        return Err(HashError::Params);
    }

    let salt = STANDARD_NO_PAD.decode(parts[4]).map_err(|_| HashError::Salt)?;
    let digest = STANDARD_NO_PAD.decode(parts[5]).map_err(|_| HashError::Digest)?;

    Ok(ParsedHash {
        version,
        memory_kib,
        iterations,
        parallelism,
        salt,
        digest,
    })
}

fn param_field(field: Option<&str>, prefix: &str) -> Result<u32, HashError> {
    field
        .and_then(|f| f.strip_prefix(prefix))
        .ok_or(HashError::Params)?
        .parse()
        .map_err(|_| HashError::Params)
}
