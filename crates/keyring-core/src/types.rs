//! Keyring data model
//!
//! A key entry is an opaque secret buffer whose first [`NAME_LEN`] bytes are
//! its name. Identity is the name alone: two entries with equal names are the
//! same logical key regardless of the trailing key material.

use crate::error::{Error, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of the name prefix that identifies a key entry.
pub const NAME_LEN: usize = 16;

// =============================================================================
// KEY NAME
// =============================================================================

/// 16-byte key name (the identity prefix of a key entry)
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KeyName(pub [u8; NAME_LEN]);

impl KeyName {
    /// Parse a name from a buffer of exactly [`NAME_LEN`] bytes
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let name: [u8; NAME_LEN] = bytes.try_into().ok()?;
        Some(Self(name))
    }

    /// Get as bytes
    pub fn as_bytes(&self) -> &[u8; NAME_LEN] {
        &self.0
    }
}

impl fmt::Display for KeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for KeyName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KeyName({})", self)
    }
}

// =============================================================================
// SECRET KEY
// =============================================================================

/// Secret key entry: name prefix followed by key material.
///
/// The backing buffer is overwritten with zeros when the entry is dropped, so
/// every copy handed out (snapshots included) cleans up after itself.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey(Vec<u8>);

impl SecretKey {
    /// Wrap a buffer, rejecting anything shorter than a key name.
    pub fn new(mut bytes: Vec<u8>) -> Result<Self> {
        if bytes.len() < NAME_LEN {
            let len = bytes.len();
            bytes.zeroize();
            return Err(Error::KeyTooShort(len));
        }
        Ok(Self(bytes))
    }

    /// Copy an entry out of a borrowed buffer
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        Self::new(bytes.to_vec())
    }

    /// The entry's identity
    pub fn name(&self) -> KeyName {
        let mut name = [0u8; NAME_LEN];
        name.copy_from_slice(&self.0[..NAME_LEN]);
        KeyName(name)
    }

    /// Whether this entry carries the given name
    pub fn has_name(&self, name: &KeyName) -> bool {
        self.0[..NAME_LEN] == name.0
    }

    /// Full entry bytes (name and material)
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Overwrite the entry with zeros in place, keeping its length.
    pub fn wipe(&mut self) {
        self.0.as_mut_slice().zeroize();
    }

    /// True once every byte has been overwritten
    pub fn is_wiped(&self) -> bool {
        self.0.iter().all(|b| *b == 0)
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // never print key material
        write!(f, "SecretKey({}, {} bytes)", self.name(), self.0.len())
    }
}

// Entries travel as byte strings, not as lists of integers.
impl Serialize for SecretKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serde_bytes::serialize(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for SecretKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let bytes: Vec<u8> = serde_bytes::deserialize(deserializer)?;
        SecretKey::new(bytes).map_err(serde::de::Error::custom)
    }
}

// =============================================================================
// SNAPSHOT
// =============================================================================

/// Point-in-time copy of a keyring
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Snapshot {
    /// Name of the default entry, if any
    pub default: Option<KeyName>,
    /// Every entry, name and material
    pub keys: Vec<SecretKey>,
}

impl Snapshot {
    pub fn new(default: Option<KeyName>, keys: Vec<SecretKey>) -> Self {
        Self { default, keys }
    }

    /// Names of all entries, in snapshot order
    pub fn key_names(&self) -> Vec<KeyName> {
        self.keys.iter().map(SecretKey::name).collect()
    }

    /// Check whether an entry with this name is present
    pub fn contains(&self, name: &KeyName) -> bool {
        self.keys.iter().any(|k| k.has_name(name))
    }

    /// Clear a default that names no entry in this snapshot.
    ///
    /// Returns the name that was dropped, if any.
    pub fn drop_unresolved_default(&mut self) -> Option<KeyName> {
        let name = self.default?;
        if self.contains(&name) {
            return None;
        }
        self.default = None;
        Some(name)
    }
}

// =============================================================================
// MUTATION OUTCOME
// =============================================================================

/// Result of applying a mutation to a keyring.
///
/// Misses are expected conditions, not errors: the keyring is left unchanged
/// and processing continues.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationOutcome {
    /// The keyring changed
    Applied,
    /// Install of a name that is already present
    AlreadyPresent,
    /// Remove or set-default of a name that is not present
    NotFound,
}

impl MutationOutcome {
    pub fn is_miss(&self) -> bool {
        !matches!(self, MutationOutcome::Applied)
    }
}
