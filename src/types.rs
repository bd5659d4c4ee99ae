//! Chain data model
//!
//! Value types shared by the transport, the discovery engine and the
//! coordinator. Wire types deserialize from Esplora responses after numeric
//! leaves have been rewritten to decimal strings, so every integer here is
//! parsed with exact string-to-integer conversion.

use bitcoin::Txid;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Derivation sub-path of an HD account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyChain {
    Receive,
    Change,
}

impl KeyChain {
    /// Child number of this chain below the account key
    pub fn index(&self) -> u32 {
        match self {
            Self::Receive => 0,
            Self::Change => 1,
        }
    }
}

/// One address slot in an account
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DerivationKey {
    pub chain: KeyChain,
    pub index: u32,
}

impl DerivationKey {
    pub fn new(chain: KeyChain, index: u32) -> Self {
        Self { chain, index }
    }

    pub fn receive(index: u32) -> Self {
        Self::new(KeyChain::Receive, index)
    }

    pub fn change(index: u32) -> Self {
        Self::new(KeyChain::Change, index)
    }

    /// Following slot on the same chain
    pub fn next(&self) -> Option<Self> {
        self.index.checked_add(1).map(|index| Self::new(self.chain, index))
    }
}

impl fmt::Display for DerivationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.chain.index(), self.index)
    }
}

/// Funded/spent totals for one address, either confirmed or in mempool
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
pub struct TxoStats {
    #[serde(deserialize_with = "decimal::deserialize_u64")]
    pub funded_txo_sum: u64,
    #[serde(deserialize_with = "decimal::deserialize_u64")]
    pub spent_txo_sum: u64,
    #[serde(deserialize_with = "decimal::deserialize_u64")]
    pub tx_count: u64,
}

/// Response of `GET /address/{address}`
///
/// `funded >= spent` is not guaranteed by the remote.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct AddressStats {
    pub address: String,
    pub chain_stats: TxoStats,
    pub mempool_stats: TxoStats,
}

impl AddressStats {
    /// An address is transacted once it appears in any transaction
    pub fn is_transacted(&self) -> bool {
        self.chain_stats.tx_count > 0 || self.mempool_stats.tx_count > 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct TxStatus {
    pub confirmed: bool,
    #[serde(default, deserialize_with = "decimal::deserialize_opt_u32")]
    pub block_height: Option<u32>,
}

/// One element of `GET /address/{address}/utxo`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct UnspentOutput {
    pub txid: Txid,
    #[serde(deserialize_with = "decimal::deserialize_u32")]
    pub vout: u32,
    /// Satoshis
    #[serde(deserialize_with = "decimal::deserialize_u64")]
    pub value: u64,
    pub status: TxStatus,
}

impl UnspentOutput {
    pub fn is_confirmed(&self) -> bool {
        self.status.confirmed
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransactionOutputInfo {
    #[serde(deserialize_with = "decimal::deserialize_u64")]
    pub value: u64,
    #[serde(default)]
    pub scriptpubkey_address: Option<String>,
}

/// Response of `GET /tx/{txid}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TransactionInfo {
    pub txid: Txid,
    pub status: TxStatus,
    #[serde(default)]
    pub vout: Vec<TransactionOutputInfo>,
}

/// Unspent outputs grouped by owning address
pub type UtxoMap = BTreeMap<String, Vec<UnspentOutput>>;

/// Exact decimal-string integer parsing
pub(crate) mod decimal {
    use serde::de::{Deserialize, Deserializer, Error};

    /// Digits only; rejects signs, whitespace and fractions
    pub fn parse_u64(s: &str) -> Option<u64> {
        if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        s.parse().ok()
    }

    pub fn parse_u32(s: &str) -> Option<u32> {
        parse_u64(s).and_then(|v| u32::try_from(v).ok())
    }

    pub fn deserialize_u64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_u64(&s).ok_or_else(|| D::Error::custom(format!("invalid decimal amount '{}'", s)))
    }

    pub fn deserialize_u32<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u32, D::Error> {
        let s = String::deserialize(deserializer)?;
        parse_u32(&s).ok_or_else(|| D::Error::custom(format!("invalid decimal index '{}'", s)))
    }

    pub fn deserialize_opt_u32<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<u32>, D::Error> {
        match Option::<String>::deserialize(deserializer)? {
            None => Ok(None),
            Some(s) => parse_u32(&s)
                .map(Some)
                .ok_or_else(|| D::Error::custom(format!("invalid decimal index '{}'", s))),
        }
    }
}
