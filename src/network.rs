//! Bitcoin network selection
//!
//! Callers address a network through its chain identifier string. Parsing
//! happens before any request is issued so an unknown identifier never
//! reaches the transport.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{WalletError, WalletResult};

pub const BITCOIN_MAINNET: &str = "bitcoin_mainnet";
pub const BITCOIN_TESTNET: &str = "bitcoin_testnet";

/// Fee rate used when the remote returns no usable estimate (sat/vB)
const MAINNET_FALLBACK_FEE_RATE: f64 = 20.0;
const TESTNET_FALLBACK_FEE_RATE: f64 = 1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BitcoinNetwork {
    Mainnet,
    Testnet,
}

impl BitcoinNetwork {
    pub fn from_chain_id(chain_id: &str) -> WalletResult<Self> {
        match chain_id {
            BITCOIN_MAINNET => Ok(Self::Mainnet),
            BITCOIN_TESTNET => Ok(Self::Testnet),
            other => Err(WalletError::invalid_argument(format!(
                "unsupported chain id '{}'",
                other
            ))),
        }
    }

    pub fn chain_id(&self) -> &'static str {
        match self {
            Self::Mainnet => BITCOIN_MAINNET,
            Self::Testnet => BITCOIN_TESTNET,
        }
    }

    /// Network type for the `bitcoin` crate
    pub fn to_bitcoin(&self) -> bitcoin::Network {
        match self {
            Self::Mainnet => bitcoin::Network::Bitcoin,
            Self::Testnet => bitcoin::Network::Testnet,
        }
    }

    /// BIP44 coin type
    pub fn coin_type(&self) -> u32 {
        match self {
            Self::Mainnet => 0,
            Self::Testnet => 1,
        }
    }

    pub fn fallback_fee_rate(&self) -> f64 {
        match self {
            Self::Mainnet => MAINNET_FALLBACK_FEE_RATE,
            Self::Testnet => TESTNET_FALLBACK_FEE_RATE,
        }
    }

    pub fn default_esplora_url(&self) -> &'static str {
        match self {
            Self::Mainnet => "https://mempool.space/api",
            Self::Testnet => "https://mempool.space/testnet/api",
        }
    }
}

impl FromStr for BitcoinNetwork {
    type Err = WalletError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mainnet" | "bitcoin" | BITCOIN_MAINNET => Ok(Self::Mainnet),
            "testnet" | BITCOIN_TESTNET => Ok(Self::Testnet),
            other => Err(WalletError::invalid_argument(format!(
                "unknown network '{}'",
                other
            ))),
        }
    }
}

impl fmt::Display for BitcoinNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.chain_id())
    }
}
