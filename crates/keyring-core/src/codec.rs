//! Snapshot wire codec
//!
//! A snapshot travels as a MessagePack map with two named fields, in this
//! order:
//! - `Default`: byte string, empty or exactly [`NAME_LEN`] bytes
//! - `Keys`: list of byte strings, each at least [`NAME_LEN`] bytes
//!
//! Byte strings are written as `bin`. On decode, `str` byte strings and
//! `nil` fields (an absent default, an empty key list) are accepted too.

use crate::error::{Error, Result};
use crate::types::*;
use serde::{Deserialize, Serialize};
use serde_bytes::Bytes;
use zeroize::Zeroizing;

#[derive(Serialize)]
struct WireSnapshotRef<'a> {
    #[serde(rename = "Default")]
    default: &'a Bytes,
    #[serde(rename = "Keys")]
    keys: &'a [SecretKey],
}

#[derive(Deserialize)]
struct WireSnapshot {
    #[serde(rename = "Default", default, with = "serde_bytes")]
    default: Option<Vec<u8>>,
    #[serde(rename = "Keys", default)]
    keys: Option<Vec<SecretKey>>,
}

/// Encode a snapshot to its wire form.
///
/// The encoding carries key material and is zeroed on drop.
pub fn encode_snapshot(snapshot: &Snapshot) -> Result<Zeroizing<Vec<u8>>> {
    let default: &[u8] = match &snapshot.default {
        Some(name) => name.as_bytes(),
        None => &[],
    };
    let wire = WireSnapshotRef {
        default: Bytes::new(default),
        keys: &snapshot.keys,
    };
    Ok(Zeroizing::new(rmp_serde::to_vec_named(&wire)?))
}

/// Decode a snapshot from its wire form.
///
/// The default name is returned as sent; it is not checked against the keys.
pub fn decode_snapshot(bytes: &[u8]) -> Result<Snapshot> {
    let wire: WireSnapshot = rmp_serde::from_slice(bytes)?;
    let raw_default = wire.default.unwrap_or_default();

    let default = match raw_default.len() {
        0 => None,
        NAME_LEN => KeyName::from_slice(&raw_default),
        len => return Err(Error::InvalidDefaultLength(len)),
    };

    Ok(Snapshot {
        default,
        keys: wire.keys.unwrap_or_default(),
    })
}
