//! Mutation event decoding
//!
//! Key lifecycle events share the event bus with unrelated traffic, so only
//! names carrying the configured prefix are interpreted. Payload length rules
//! are checked here, once, before anything is relayed or applied.

use crate::error::{Error, Result};
use crate::types::{KeyName, SecretKey, NAME_LEN};
use tracing::warn;

pub const INSTALL_KEY_EVENT: &str = "install-key";
pub const REMOVE_KEY_EVENT: &str = "remove-key";
pub const SET_DEFAULT_KEY_EVENT: &str = "set-default-key";
pub const WIPE_KEYS_EVENT: &str = "wipe-keys";

/// Query answered with an encoded keyring snapshot
pub const RETRIEVE_KEYS_QUERY: &str = "retrieve-keys";

/// Recognised event kinds
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MutationKind {
    InstallKey,
    RemoveKey,
    SetDefaultKey,
    WipeKeys,
}

impl MutationKind {
    pub fn from_suffix(suffix: &str) -> Option<Self> {
        match suffix {
            INSTALL_KEY_EVENT => Some(Self::InstallKey),
            REMOVE_KEY_EVENT => Some(Self::RemoveKey),
            SET_DEFAULT_KEY_EVENT => Some(Self::SetDefaultKey),
            WIPE_KEYS_EVENT => Some(Self::WipeKeys),
            _ => None,
        }
    }
}

/// A validated keyring mutation
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Mutation {
    Install(SecretKey),
    Remove(KeyName),
    SetDefault(KeyName),
    Wipe,
}

impl Mutation {
    pub fn kind(&self) -> MutationKind {
        match self {
            Self::Install(_) => MutationKind::InstallKey,
            Self::Remove(_) => MutationKind::RemoveKey,
            Self::SetDefault(_) => MutationKind::SetDefaultKey,
            Self::Wipe => MutationKind::WipeKeys,
        }
    }

    /// Name of the key this mutation targets (none for wipe)
    pub fn key_name(&self) -> Option<KeyName> {
        match self {
            Self::Install(key) => Some(key.name()),
            Self::Remove(name) | Self::SetDefault(name) => Some(*name),
            Self::Wipe => None,
        }
    }
}

/// Interpretation of one inbound event
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Decoded {
    /// Name lacks the prefix; not ours
    Foreign,
    /// Prefixed, but not a mutation this engine knows
    Unrecognised,
    /// Prefixed and well-formed
    Mutation(Mutation),
}

impl Decoded {
    /// Whether the event belongs on the other tier
    pub fn should_relay(&self) -> bool {
        !matches!(self, Decoded::Foreign)
    }
}

/// Decoder bound to a name prefix
#[derive(Clone, Debug)]
pub struct MutationDecoder {
    prefix: String,
}

impl MutationDecoder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Full name of the keyring retrieval query
    pub fn retrieve_query_name(&self) -> String {
        format!("{}{}", self.prefix, RETRIEVE_KEYS_QUERY)
    }

    /// Check whether a query name is the keyring retrieval query
    pub fn is_retrieve_query(&self, name: &str) -> bool {
        name.strip_prefix(self.prefix.as_str()) == Some(RETRIEVE_KEYS_QUERY)
    }

    /// Decode an event name and payload.
    ///
    /// A payload length violation for install, remove or set-default is a
    /// fatal [`Error::MalformedPayload`].
    pub fn decode(&self, name: &str, payload: &[u8]) -> Result<Decoded> {
        let Some(suffix) = name.strip_prefix(self.prefix.as_str()) else {
            return Ok(Decoded::Foreign);
        };
        let Some(kind) = MutationKind::from_suffix(suffix) else {
            return Ok(Decoded::Unrecognised);
        };

        let malformed = || Error::MalformedPayload {
            event: name.to_string(),
            len: payload.len(),
        };

        let mutation = match kind {
            MutationKind::InstallKey => {
                if payload.len() <= NAME_LEN {
                    return Err(malformed());
                }
                Mutation::Install(SecretKey::from_slice(payload)?)
            }
            MutationKind::RemoveKey => {
                Mutation::Remove(KeyName::from_slice(payload).ok_or_else(malformed)?)
            }
            MutationKind::SetDefaultKey => {
                Mutation::SetDefault(KeyName::from_slice(payload).ok_or_else(malformed)?)
            }
            MutationKind::WipeKeys => {
                if !payload.is_empty() {
                    warn!("invalid {} event payload: {} bytes", name, payload.len());
                }
                Mutation::Wipe
            }
        };

        Ok(Decoded::Mutation(mutation))
    }
}
