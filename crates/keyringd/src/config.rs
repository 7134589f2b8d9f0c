//! Configuration for keyringd

use clap::Parser;
use keyring_net::RpcConfig;
use std::time::Duration;

/// keyringd - Keyring relay between WAN and LAN gossip tiers
#[derive(Parser, Debug, Clone)]
#[command(name = "keyringd")]
#[command(about = "Keyring relay between WAN and LAN gossip tiers")]
pub struct Config {
    /// WAN agent RPC address
    #[arg(long, default_value = "127.0.0.1:7374")]
    pub wan_addr: String,

    /// WAN agent RPC auth key
    #[arg(long, env = "KEYRINGD_WAN_AUTH", default_value = "")]
    pub wan_auth: String,

    /// WAN RPC timeout in seconds (0 = none)
    #[arg(long, default_value = "0")]
    pub wan_timeout_secs: u64,

    /// LAN agent RPC address
    #[arg(long, default_value = "127.0.0.1:7373")]
    pub lan_addr: String,

    /// LAN agent RPC auth key
    #[arg(long, env = "KEYRINGD_LAN_AUTH", default_value = "")]
    pub lan_auth: String,

    /// LAN RPC timeout in seconds (0 = none)
    #[arg(long, default_value = "0")]
    pub lan_timeout_secs: u64,

    /// Prefix of every event and query name keyringd handles
    #[arg(long, default_value = "ether:")]
    pub prefix: String,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Log format (json or pretty)
    #[arg(long, default_value = "pretty")]
    pub log_format: String,
}

impl Config {
    /// Validate configuration
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.prefix.is_empty() {
            anyhow::bail!("Event prefix cannot be empty");
        }
        if self.wan_addr == self.lan_addr {
            anyhow::bail!("WAN and LAN agents must differ (got {} twice)", self.wan_addr);
        }
        if !matches!(self.log_format.as_str(), "json" | "pretty") {
            anyhow::bail!("Unknown log format: {}", self.log_format);
        }
        Ok(())
    }

    /// Connection settings for the WAN tier
    pub fn wan(&self) -> RpcConfig {
        RpcConfig {
            addr: self.wan_addr.clone(),
            auth_key: self.wan_auth.clone(),
            timeout: timeout(self.wan_timeout_secs),
        }
    }

    /// Connection settings for the LAN tier
    pub fn lan(&self) -> RpcConfig {
        RpcConfig {
            addr: self.lan_addr.clone(),
            auth_key: self.lan_auth.clone(),
            timeout: timeout(self.lan_timeout_secs),
        }
    }
}

fn timeout(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}
