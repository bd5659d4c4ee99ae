/// Esplora API response types
///
/// These types match the Esplora API format so clients can consume them transparently.
use serde::{Deserialize, Serialize};

/// Funded/spent counters from /address/{address}
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsResponse {
    pub funded_txo_count: u64,
    pub funded_txo_sum: u64,
    pub spent_txo_count: u64,
    pub spent_txo_sum: u64,
    pub tx_count: u64,
}

/// Address summary from /address/{address}
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressResponse {
    pub address: String,
    pub chain_stats: StatsResponse,
    pub mempool_stats: StatsResponse,
}

/// UTXO response from /address/{address}/utxo
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoResponse {
    pub txid: String,
    pub vout: u32,
    pub value: u64,
    pub status: TxStatusResponse,
}

/// Confirmation status shared by transactions and UTXOs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxStatusResponse {
    pub confirmed: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_height: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub block_hash: Option<String>,
}

/// Transaction response from /tx/{txid}
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TxResponse {
    pub txid: String,
    pub version: i32,
    pub locktime: u32,
    pub vout: Vec<TxOutput>,
    pub status: TxStatusResponse,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub scriptpubkey: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scriptpubkey_address: Option<String>,
    pub value: u64,
}
