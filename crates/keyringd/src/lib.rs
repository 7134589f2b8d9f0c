//! keyringd - Keyring Relay Daemon
//!
//! This daemon provides:
//! - An in-memory keyring (key entries plus a default key)
//! - Relay of key lifecycle events from the WAN tier to the LAN tier
//! - Keyring snapshots served to LAN queries
//! - One-shot bootstrap of the keyring from the WAN tier

pub mod bootstrap;
pub mod config;
pub mod relay;
pub mod responder;
pub mod server;
pub mod store;

pub use bootstrap::Bootstrapper;
pub use config::Config;
pub use relay::EventRelay;
pub use responder::QueryResponder;
pub use server::Server;
pub use store::Keyring;
