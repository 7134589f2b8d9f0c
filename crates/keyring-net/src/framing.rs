//! Message framing for the agent RPC protocol
//!
//! The agent speaks a plain stream of MessagePack values. Every request is a
//! `{Command, Seq}` header map followed by a body map; every response starts
//! with a `{Seq, Error}` header map. Whether a body follows a response header
//! depends on the request it answers, so the codec only splits the stream
//! into whole values and the client pairs them up.

use crate::tier::{NodeResponse, QueryId, QueryRequest, UserEvent};
use bytes::{Bytes, BytesMut};
use serde::de::IgnoredAny;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::io;
use thiserror::Error;
use tokio_util::codec::{Decoder, Encoder};
use zeroize::Zeroizing;

/// Largest value the codec will buffer (16 MB)
const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Protocol version offered in the handshake
pub const IPC_VERSION: i32 = 1;

/// Stream subscription types
pub const STREAM_USER: &str = "user";
pub const STREAM_QUERY: &str = "query";

/// Query response record types
pub const RECORD_ACK: &str = "ack";
pub const RECORD_RESPONSE: &str = "response";
pub const RECORD_DONE: &str = "done";

/// Framing errors
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("Message too large: {0} bytes buffered (max {MAX_FRAME_SIZE})")]
    TooLarge(usize),
    #[error("IO error: {0}")]
    Io(#[from] io::Error),
    #[error("Encode error: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("Decode error: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Agent commands used by keyringd
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Handshake,
    Auth,
    Event,
    Stream,
    Respond,
    Query,
}

impl Command {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Handshake => "handshake",
            Self::Auth => "auth",
            Self::Event => "event",
            Self::Stream => "stream",
            Self::Respond => "respond",
            Self::Query => "query",
        }
    }
}

// =============================================================================
// REQUESTS
// =============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestHeader {
    pub command: &'static str,
    pub seq: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct HandshakeRequest {
    pub version: i32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct AuthRequest<'a> {
    pub auth_key: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EventRequest<'a> {
    pub name: &'a str,
    pub payload: &'a serde_bytes::Bytes,
    pub coalesce: bool,
}

#[derive(Debug, Serialize)]
pub struct StreamRequest<'a> {
    #[serde(rename = "Type")]
    pub kind: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RespondRequest<'a> {
    #[serde(rename = "ID")]
    pub id: u64,
    pub payload: &'a serde_bytes::Bytes,
}

/// Body of a `query` request
#[derive(Debug, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryCommand<'a> {
    pub filter_nodes: Vec<String>,
    pub filter_tags: BTreeMap<String, String>,
    pub request_ack: bool,
    pub relay_factor: u8,
    /// Nanoseconds; zero lets the agent pick its default
    pub timeout: i64,
    pub name: &'a str,
    pub payload: &'a serde_bytes::Bytes,
}

/// Encode a request header and its body
pub fn encode_request<T: Serialize + ?Sized>(
    command: Command,
    seq: u64,
    body: &T,
) -> Result<Bytes, FrameError> {
    let header = RequestHeader {
        command: command.as_str(),
        seq,
    };
    let mut buf = Vec::new();
    rmp_serde::encode::write_named(&mut buf, &header)?;
    rmp_serde::encode::write_named(&mut buf, body)?;
    Ok(Bytes::from(buf))
}

// =============================================================================
// RESPONSES AND RECORDS
// =============================================================================

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseHeader {
    pub seq: u64,
    #[serde(default)]
    pub error: String,
}

/// Query identifier as it arrives on the wire.
///
/// Depending on the sender's encoder the same identifier may be written as an
/// unsigned or a signed integer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum WireQueryId {
    Unsigned(u64),
    Signed(i64),
}

impl From<WireQueryId> for QueryId {
    fn from(id: WireQueryId) -> Self {
        match id {
            WireQueryId::Unsigned(id) => QueryId::from(id),
            WireQueryId::Signed(id) => QueryId::from(id),
        }
    }
}

/// User event delivered on a `user` stream
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserEventRecord {
    pub name: String,
    #[serde(default, with = "serde_bytes")]
    pub payload: Option<Vec<u8>>,
    pub coalesce: bool,
}

impl From<UserEventRecord> for UserEvent {
    fn from(record: UserEventRecord) -> Self {
        Self {
            name: record.name,
            payload: Zeroizing::new(record.payload.unwrap_or_default()),
            coalesce: record.coalesce,
        }
    }
}

/// Inbound query delivered on a `query` stream
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryEventRecord {
    #[serde(rename = "ID")]
    pub id: WireQueryId,
    pub name: String,
}

impl From<QueryEventRecord> for QueryRequest {
    fn from(record: QueryEventRecord) -> Self {
        Self {
            id: record.id.into(),
            name: record.name,
        }
    }
}

/// Progress of an outbound query: an ack, a response, or the end
#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueryResponseRecord {
    #[serde(rename = "Type")]
    pub kind: String,
    #[serde(default)]
    pub from: String,
    #[serde(default, with = "serde_bytes")]
    pub payload: Option<Vec<u8>>,
}

impl QueryResponseRecord {
    pub fn is_done(&self) -> bool {
        self.kind == RECORD_DONE
    }

    /// The member response this record carries, if it is one
    pub fn into_response(self) -> Option<NodeResponse> {
        if self.kind != RECORD_RESPONSE {
            return None;
        }
        Some(NodeResponse {
            from: self.from,
            payload: Zeroizing::new(self.payload.unwrap_or_default()),
        })
    }
}

/// Decode one message value
pub fn decode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T, FrameError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

// =============================================================================
// CODEC
// =============================================================================

/// Splits a byte stream into whole MessagePack values
#[derive(Debug, Default)]
pub struct MsgpackCodec;

impl MsgpackCodec {
    pub fn new() -> Self {
        Self
    }
}

/// Length of the first complete value in `buf`
fn value_len(buf: &[u8]) -> Result<usize, rmp_serde::decode::Error> {
    let mut rest = buf;
    IgnoredAny::deserialize(&mut rmp_serde::Deserializer::new(&mut rest))?;
    Ok(buf.len() - rest.len())
}

fn is_truncated(err: &rmp_serde::decode::Error) -> bool {
    use rmp_serde::decode::Error;
    match err {
        Error::InvalidMarkerRead(e) | Error::InvalidDataRead(e) => {
            e.kind() == io::ErrorKind::UnexpectedEof
        }
        _ => false,
    }
}

impl Decoder for MsgpackCodec {
    type Item = Bytes;
    type Error = FrameError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        match value_len(src) {
            Ok(len) => Ok(Some(src.split_to(len).freeze())),
            Err(e) if is_truncated(&e) => {
                if src.len() > MAX_FRAME_SIZE {
                    return Err(FrameError::TooLarge(src.len()));
                }
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

impl Encoder<Bytes> for MsgpackCodec {
    type Error = FrameError;

    fn encode(&mut self, item: Bytes, dst: &mut BytesMut) -> Result<(), Self::Error> {
        dst.extend_from_slice(&item);
        Ok(())
    }
}
