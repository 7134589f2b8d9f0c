//! Keyring Core Library
//!
//! This crate provides the keyring data model, the mutation state machine and
//! the snapshot wire codec shared by keyringd and its transports.
//!
//! # Modules
//!
//! - [`types`]: Key names, secret key entries, snapshots
//! - [`keyset`]: The keyring state machine (install, remove, default, wipe)
//! - [`mutation`]: Decoding of prefixed key lifecycle events
//! - [`codec`]: Snapshot wire encoding
//! - [`error`]: Error types

pub mod codec;
pub mod error;
pub mod keyset;
pub mod mutation;
pub mod types;

pub use codec::{decode_snapshot, encode_snapshot};
pub use error::{Error, Result};
pub use keyset::KeySet;
pub use mutation::{Decoded, Mutation, MutationDecoder, MutationKind};
pub use types::*;
