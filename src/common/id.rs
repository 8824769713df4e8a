//! Identity hashes, ring locations, and proof-of-work nonces.

use rand::Rng;
use std::fmt::{self, Debug, Display, Formatter};

use sha1_smol::Sha1;

/// The size of identity hashes and ring locations in bytes.
pub const ID_SIZE: usize = 20;

/// The size of proof-of-work nonces in bytes.
pub const NONCE_SIZE: usize = 8;

#[derive(thiserror::Error, Debug)]
#[error("Expected {ID_SIZE} bytes, got {0}")]
/// Returned when constructing an [Id] from a byte string of the wrong length.
pub struct InvalidIdSize(pub usize);

#[derive(Clone, Copy, PartialEq, Eq, Hash, Ord, PartialOrd)]
/// An identity hash, or a ring location derived from one.
pub struct Id(pub(crate) [u8; ID_SIZE]);

impl Id {
    pub fn random() -> Id {
        let mut rng = rand::thread_rng();
        let random_bytes: [u8; ID_SIZE] = rng.gen();

        Id(random_bytes)
    }

    /// Create a new Id from some bytes. Returns Err if `bytes` is not of length
    /// [ID_SIZE].
    pub fn from_bytes<T: AsRef<[u8]>>(bytes: T) -> Result<Id, InvalidIdSize> {
        let bytes = bytes.as_ref();
        if bytes.len() != ID_SIZE {
            return Err(InvalidIdSize(bytes.len()));
        }

        let mut tmp: [u8; ID_SIZE] = [0; ID_SIZE];
        tmp[..ID_SIZE].clone_from_slice(&bytes[..ID_SIZE]);

        Ok(Id(tmp))
    }

    pub fn as_bytes(&self) -> &[u8; ID_SIZE] {
        &self.0
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.0.to_vec()
    }
}

impl Display for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl Debug for Id {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Id({})", self)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
/// A proof-of-work nonce, incremented as a little-endian big number during the
/// location search.
pub struct Nonce(pub(crate) [u8; NONCE_SIZE]);

impl Nonce {
    pub fn random() -> Nonce {
        let mut rng = rand::thread_rng();

        Nonce(rng.gen())
    }

    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Nonce {
        Nonce(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; NONCE_SIZE] {
        &self.0
    }

    /// Add one, least significant byte first, wrapping on overflow.
    pub(crate) fn increment_le(&mut self) {
        for byte in self.0.iter_mut() {
            let (next, overflowed) = byte.overflowing_add(1);
            *byte = next;
            if !overflowed {
                break;
            }
        }
    }
}

impl Debug for Nonce {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "Nonce({:x?})", &self.0)
    }
}

/// Hash `identity ++ nonce` into a ring location digest.
pub(crate) fn hash_concat(identity: &Id, nonce: &Nonce) -> [u8; ID_SIZE] {
    let mut hasher = Sha1::new();
    hasher.update(&identity.0);
    hasher.update(&nonce.0);

    hasher.digest().bytes()
}

/// Compare two equal-length byte strings as little-endian unsigned integers.
///
/// The most significant byte is the last one, so comparison walks backwards.
pub(crate) fn le_cmp(a: &[u8], b: &[u8]) -> std::cmp::Ordering {
    debug_assert_eq!(a.len(), b.len());

    for (x, y) in a.iter().rev().zip(b.iter().rev()) {
        match x.cmp(y) {
            std::cmp::Ordering::Equal => continue,
            other => return other,
        }
    }

    std::cmp::Ordering::Equal
}
