//! Error types for keyring operations

use thiserror::Error;

/// Result type alias using our Error
pub type Result<T> = std::result::Result<T, Error>;

/// Protocol errors.
///
/// Every variant here is fatal: the input cannot be interpreted safely and
/// applying it could corrupt a keyring that is then relayed to another tier.
#[derive(Debug, Error)]
pub enum Error {
    /// Snapshot could not be encoded
    #[error("encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    /// Snapshot bytes are not a valid record
    #[error("decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),

    /// Mutation event payload has the wrong length for its kind
    #[error("invalid {event} payload: {len} bytes")]
    MalformedPayload { event: String, len: usize },

    /// Snapshot default field is neither empty nor a full key name
    #[error("invalid default key size: {0} bytes")]
    InvalidDefaultLength(usize),

    /// Snapshot key is shorter than a key name
    #[error("key entry too short: {0} bytes")]
    KeyTooShort(usize),
}
