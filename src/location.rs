//! Proof-of-work location function.
//!
//! Placement in the address ring is self-certified: a peer's location is
//! `sha1(identity ++ nonce)` for a nonce it had to search for, so minting a
//! valid identity costs CPU proportional to the configured target difficulty.
//! This is the anti-sybil gate; it needs no transport or signature check.

use std::cmp::Ordering;

use crate::common::{hash_concat, le_cmp, Id, Nonce, ID_SIZE};

#[derive(thiserror::Error, Debug)]
pub enum LocationError {
    /// The target must be the same length as the hash output so the two can
    /// be compared as equal-width little-endian integers.
    #[error("Target length {0} does not match hash length {ID_SIZE}")]
    TargetLength(usize),
}

/// Search for a nonce such that `sha1(identity ++ nonce)`, read as a
/// little-endian unsigned integer, is `<= target`. Returns the resulting
/// digest as the ring location alongside the satisfying nonce.
///
/// The search seeds from a random nonce and increments little-endian. A target
/// of all `0xFF` bytes accepts the first candidate (difficulty disabled).
pub fn derive_location(identity: &Id, target: &[u8]) -> Result<(Id, Nonce), LocationError> {
    check_target(target)?;

    let mut nonce = Nonce::random();

    loop {
        let digest = hash_concat(identity, &nonce);

        if le_cmp(&digest, target) != Ordering::Greater {
            return Ok((Id(digest), nonce));
        }

        nonce.increment_le();
    }
}

/// Recompute the digest for `(identity, nonce)` and check it satisfies
/// `target`. The engine runs this on every incoming peer hold request before
/// admission.
pub fn verify_location(identity: &Id, nonce: &Nonce, target: &[u8]) -> Result<bool, LocationError> {
    check_target(target)?;

    let digest = hash_concat(identity, nonce);

    Ok(le_cmp(&digest, target) != Ordering::Greater)
}

/// The ring location an already-verified `(identity, nonce)` pair maps to.
pub fn location_of(identity: &Id, nonce: &Nonce) -> Id {
    Id(hash_concat(identity, nonce))
}

pub(crate) fn check_target(target: &[u8]) -> Result<(), LocationError> {
    if target.len() != ID_SIZE {
        return Err(LocationError::TargetLength(target.len()));
    }

    Ok(())
}

/// A target accepting any nonce. Used in tests and networks that do not need
/// the proof-of-work gate.
pub fn permissive_target() -> Vec<u8> {
    vec![0xff; ID_SIZE]
}

/// A mild default difficulty: roughly one in sixteen candidate nonces passes.
///
/// Little-endian comparison makes the last byte the most significant one.
pub(crate) fn default_target() -> Vec<u8> {
    let mut target = vec![0xff; ID_SIZE];
    target[ID_SIZE - 1] = 0x0f;
    target
}
