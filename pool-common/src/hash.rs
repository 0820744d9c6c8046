//! Fixed-size 32-byte hash and target types.
//!
//! Grounded in `tos_common::crypto::hash::Hash`'s shape (newtype over a
//! `[u8; 32]`, `Display`/`FromStr`/hex round-trip, `Serialize`/`Deserialize`
//! via hex strings) but computing the pool's native double-SHA-256 via the
//! `bitcoin_hashes` crate instead of blake3, per spec.md §1's non-goal on
//! supporting any algorithm other than double-SHA-256.

use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

use bitcoin_hashes::{sha256d, Hash as HashesHash};
use serde::{de::Error as SerdeError, Deserialize, Deserializer, Serialize, Serializer};

use crate::error::DecodeError;

pub const HASH_SIZE: usize = 32;

/// A 32-byte hash, displayed and parsed as big-endian hex (the conventional
/// "block explorer" byte order for block/tx hashes), matching how ckpool logs
/// and persists header hashes.
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Hash, Debug, Default)]
pub struct Hash([u8; HASH_SIZE]);

impl Hash {
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Hash(bytes)
    }

    pub const fn zero() -> Self {
        Hash([0u8; HASH_SIZE])
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Interpret the hash as a big-endian 256-bit number for target
    /// comparisons (spec.md §4.3 step 3: "network/target comparisons are
    /// word-wise little-endian after `le32toh`" refers to the header's wire
    /// layout; once decoded to a byte array, comparison is plain big-endian).
    pub fn as_u256_be(&self) -> [u8; HASH_SIZE] {
        self.0
    }
}

/// Double-SHA-256 over an arbitrary byte slice: coinbase hashing, merkle
/// folding, and header hashing all go through this one function.
pub fn double_sha256(data: &[u8]) -> Hash {
    let digest = sha256d::Hash::hash(data);
    Hash(*digest.as_ref())
}

impl FromStr for Hash {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| DecodeError::InvalidHex)?;
        let arr: [u8; HASH_SIZE] = bytes
            .try_into()
            .map_err(|v: Vec<u8>| DecodeError::WrongLength {
                expected: HASH_SIZE,
                got: v.len(),
            })?;
        Ok(Hash(arr))
    }
}

impl Display for Hash {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Hash::from_str(&s).map_err(SerdeError::custom)
    }
}

/// The 32-byte network target a header hash must be at-or-below to be a
/// valid (or block-winning) solution. Stored big-endian like [`Hash`].
#[derive(Eq, PartialEq, PartialOrd, Ord, Clone, Copy, Debug)]
pub struct Target([u8; HASH_SIZE]);

impl Target {
    pub const fn new(bytes: [u8; HASH_SIZE]) -> Self {
        Target(bytes)
    }

    pub const fn max() -> Self {
        Target([0xffu8; HASH_SIZE])
    }

    pub fn as_bytes(&self) -> &[u8; HASH_SIZE] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// A hash "beats" a target when it is numerically at or below it,
    /// comparing both as big-endian 256-bit integers.
    pub fn is_met_by(&self, hash: &Hash) -> bool {
        hash.as_u256_be() <= self.0
    }
}

impl Display for Target {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}
