//! Environment-driven configuration.
//!
//! Every knob has a default suitable for local development; production
//! deployments override through the environment (or a `.env` file loaded by
//! the worker binary).

use std::env;
use std::time::Duration;

/// Top-level application configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    /// Source material for the key-encrypting key. Falls back to the JWT
    /// secret so test deployments need only one secret.
    pub kek_secret: String,
    pub jwt_secret: String,
    pub scheduler: SchedulerSettings,
    pub chains: Vec<ChainSettings>,
    /// Scanner window bound per tick
    pub max_scan_blocks: u64,
}

/// Per-chain connection settings
#[derive(Debug, Clone)]
pub struct ChainSettings {
    pub name: String,
    pub rpc_url: String,
    pub chain_id: i64,
    pub confirmations: u32,
    /// Consolidation / outbound hot wallet address, injected rather than
    /// discovered (the signing key lives under the platform user).
    pub hot_wallet: String,
    /// Extra credential for chains that need one (bitcoind user:pass,
    /// TronGrid API key)
    pub credential: String,
}

/// Driver tick intervals
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub deposit_scan_interval: Duration,
    pub confirmation_interval: Duration,
    pub withdrawal_interval: Duration,
    pub notification_interval: Duration,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            deposit_scan_interval: Duration::from_secs(30),
            confirmation_interval: Duration::from_secs(15),
            withdrawal_interval: Duration::from_secs(10),
            notification_interval: Duration::from_secs(5),
        }
    }
}

impl SchedulerSettings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            deposit_scan_interval: env_duration("SCHED_DEPOSIT_SCAN_SECS")
                .unwrap_or(defaults.deposit_scan_interval),
            confirmation_interval: env_duration("SCHED_CONFIRMATION_SECS")
                .unwrap_or(defaults.confirmation_interval),
            withdrawal_interval: env_duration("SCHED_WITHDRAWAL_SECS")
                .unwrap_or(defaults.withdrawal_interval),
            notification_interval: env_duration("SCHED_NOTIFICATION_SECS")
                .unwrap_or(defaults.notification_interval),
        }
    }
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let jwt_secret =
            env::var("JWT_SECRET").unwrap_or_else(|_| "change-me-in-production".to_string());
        let kek_secret = env::var("KEK_SECRET").unwrap_or_else(|_| jwt_secret.clone());

        Self {
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "custodia.db".to_string()),
            kek_secret,
            jwt_secret,
            scheduler: SchedulerSettings::from_env(),
            chains: load_chain_settings(),
            max_scan_blocks: env::var("MAX_SCAN_BLOCKS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(200),
        }
    }
}

fn load_chain_settings() -> Vec<ChainSettings> {
    let mut chains = Vec::new();

    if let Ok(rpc_url) = env::var("ETH_RPC_URL") {
        chains.push(ChainSettings {
            name: "ethereum".to_string(),
            rpc_url,
            chain_id: env_i64("ETH_CHAIN_ID", 1),
            confirmations: env_u32("ETH_CONFIRMATIONS", 12),
            hot_wallet: env::var("ETH_HOT_WALLET").unwrap_or_default(),
            credential: String::new(),
        });
    }
    if let Ok(rpc_url) = env::var("BSC_RPC_URL") {
        chains.push(ChainSettings {
            name: "bsc".to_string(),
            rpc_url,
            chain_id: env_i64("BSC_CHAIN_ID", 56),
            confirmations: env_u32("BSC_CONFIRMATIONS", 15),
            hot_wallet: env::var("BSC_HOT_WALLET").unwrap_or_default(),
            credential: String::new(),
        });
    }
    if let Ok(rpc_url) = env::var("POLYGON_RPC_URL") {
        chains.push(ChainSettings {
            name: "polygon".to_string(),
            rpc_url,
            chain_id: env_i64("POLYGON_CHAIN_ID", 137),
            confirmations: env_u32("POLYGON_CONFIRMATIONS", 128),
            hot_wallet: env::var("POLYGON_HOT_WALLET").unwrap_or_default(),
            credential: String::new(),
        });
    }
    if let Ok(rpc_url) = env::var("TRON_RPC_URL") {
        chains.push(ChainSettings {
            name: "tron".to_string(),
            rpc_url,
            chain_id: 0,
            confirmations: env_u32("TRON_CONFIRMATIONS", 19),
            hot_wallet: env::var("TRON_HOT_WALLET").unwrap_or_default(),
            credential: env::var("TRON_API_KEY").unwrap_or_default(),
        });
    }
    if let Ok(rpc_url) = env::var("BTC_RPC_URL") {
        chains.push(ChainSettings {
            name: "bitcoin".to_string(),
            rpc_url,
            chain_id: 0,
            confirmations: env_u32("BTC_CONFIRMATIONS", 6),
            hot_wallet: env::var("BTC_HOT_WALLET").unwrap_or_default(),
            credential: env::var("BTC_RPC_AUTH").unwrap_or_default(),
        });
    }

    chains
}

fn env_i64(key: &str, default: i64) -> i64 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_duration(key: &str) -> Option<Duration> {
    env::var(key).ok().and_then(|v| v.parse().ok()).map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheduler_defaults() {
        let s = SchedulerSettings::default();
        assert_eq!(s.deposit_scan_interval, Duration::from_secs(30));
        assert_eq!(s.confirmation_interval, Duration::from_secs(15));
        assert_eq!(s.withdrawal_interval, Duration::from_secs(10));
        assert_eq!(s.notification_interval, Duration::from_secs(5));
    }

    #[test]
    fn test_kek_falls_back_to_jwt_secret() {
        std::env::remove_var("KEK_SECRET");
        std::env::set_var("JWT_SECRET", "shared-secret");
        let config = Config::from_env();
        assert_eq!(config.kek_secret, "shared-secret");
        std::env::remove_var("JWT_SECRET");
    }
}
