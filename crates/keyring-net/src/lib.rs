//! Tier transports for keyringd
//!
//! This crate provides:
//! - The [`Tier`] abstraction over one event/query network
//! - A client for a tier agent's MessagePack RPC protocol
//! - An in-process tier for local runs and tests

pub mod framing;
pub mod memory;
pub mod rpc;
pub mod tier;

pub use framing::FrameError;
pub use memory::MemoryTier;
pub use rpc::{RpcConfig, RpcTier};
pub use tier::{
    EventStream, NodeResponse, QueryId, QueryParams, QueryRequest, QueryStream, ResponseStream,
    Tier, TransportError, UserEvent,
};
