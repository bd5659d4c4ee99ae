/// Wallet configuration from environment variables
///
/// Controls the Esplora endpoints per network, the per-host request
/// throttle and transaction arrangement.
use std::env;
use std::time::Duration;

use crate::network::BitcoinNetwork;

const DEFAULT_MAX_REQUESTS_PER_HOST: usize = 5;
const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

#[derive(Clone, Debug)]
pub struct WalletConfig {
    /// Esplora API base URL for mainnet
    pub mainnet_url: String,
    /// Esplora API base URL for testnet
    pub testnet_url: String,
    /// Concurrent in-flight requests allowed per host, 0 = unconstrained
    pub max_requests_per_host: usize,
    pub request_timeout: Duration,
    /// Shuffle inputs and outputs of built transactions. When disabled they
    /// are arranged deterministically (inputs by outpoint, target first).
    pub shuffle_transactions: bool,
}

impl WalletConfig {
    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - `ESPLORA_MAINNET_URL`: mainnet Esplora endpoint
    /// - `ESPLORA_TESTNET_URL`: testnet Esplora endpoint
    /// - `ESPLORA_MAX_REQUESTS_PER_HOST`: throttle, 0 disables it
    /// - `ESPLORA_REQUEST_TIMEOUT_SECS`: per-request timeout
    /// - `WALLET_SHUFFLE_TRANSACTIONS`: "true" (default) or "false"
    ///
    /// A `.env` file is loaded first when present.
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let mainnet_url = lookup("ESPLORA_MAINNET_URL").unwrap_or(defaults.mainnet_url);
        let testnet_url = lookup("ESPLORA_TESTNET_URL").unwrap_or(defaults.testnet_url);
        log::info!("📡 Esplora mainnet URL: {}", mainnet_url);
        log::info!("📡 Esplora testnet URL: {}", testnet_url);

        let max_requests_per_host = parse_or_default(
            &lookup,
            "ESPLORA_MAX_REQUESTS_PER_HOST",
            defaults.max_requests_per_host,
        );
        if max_requests_per_host == 0 {
            log::info!("Request throttle disabled");
        } else {
            log::info!("Request throttle: {} per host", max_requests_per_host);
        }

        let timeout_secs = parse_or_default(
            &lookup,
            "ESPLORA_REQUEST_TIMEOUT_SECS",
            DEFAULT_REQUEST_TIMEOUT_SECS,
        );

        let shuffle_transactions = parse_or_default(
            &lookup,
            "WALLET_SHUFFLE_TRANSACTIONS",
            defaults.shuffle_transactions,
        );

        Self {
            mainnet_url,
            testnet_url,
            max_requests_per_host,
            request_timeout: Duration::from_secs(timeout_secs),
            shuffle_transactions,
        }
    }

    pub fn esplora_url(&self, network: BitcoinNetwork) -> &str {
        match network {
            BitcoinNetwork::Mainnet => &self.mainnet_url,
            BitcoinNetwork::Testnet => &self.testnet_url,
        }
    }
}

impl Default for WalletConfig {
    fn default() -> Self {
        Self {
            mainnet_url: BitcoinNetwork::Mainnet.default_esplora_url().to_string(),
            testnet_url: BitcoinNetwork::Testnet.default_esplora_url().to_string(),
            max_requests_per_host: DEFAULT_MAX_REQUESTS_PER_HOST,
            request_timeout: Duration::from_secs(DEFAULT_REQUEST_TIMEOUT_SECS),
            shuffle_transactions: true,
        }
    }
}

fn parse_or_default<F, T>(lookup: &F, key: &str, default: T) -> T
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr + std::fmt::Display,
{
    match lookup(key) {
        None => default,
        Some(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                log::warn!("⚠️  Invalid {}='{}', using {}", key, raw, default);
                default
            }
        },
    }
}
