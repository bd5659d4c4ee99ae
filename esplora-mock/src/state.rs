/// In-memory chain state served by the mock
use bitcoin::Transaction;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};

use crate::types::*;

/// Shared application state
pub type AppState = Arc<Mutex<MockChain>>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockAddress {
    #[serde(default)]
    pub chain_stats: StatsResponse,
    #[serde(default)]
    pub mempool_stats: StatsResponse,
    #[serde(default)]
    pub utxos: Vec<UtxoResponse>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockTransaction {
    pub hex: String,
    #[serde(default)]
    pub status: TxStatusResponse,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MockChain {
    #[serde(default)]
    pub tip_height: u64,
    /// Confirmation target (blocks) -> sat/vB
    #[serde(default)]
    pub fee_estimates: BTreeMap<String, f64>,
    #[serde(default)]
    pub addresses: HashMap<String, MockAddress>,
    #[serde(default)]
    pub transactions: HashMap<String, MockTransaction>,
    /// Request path -> HTTP status to answer with instead
    #[serde(default)]
    pub failures: HashMap<String, u16>,
    /// Hex of every accepted broadcast, in arrival order
    #[serde(skip)]
    pub broadcasts: Vec<String>,
    /// Path of every request, in arrival order
    #[serde(skip)]
    pub requests: Vec<String>,
}

impl MockChain {
    pub fn new(tip_height: u64) -> Self {
        Self {
            tip_height,
            ..Default::default()
        }
    }

    pub fn into_state(self) -> AppState {
        Arc::new(Mutex::new(self))
    }

    pub fn set_fee_estimate(&mut self, target_blocks: u32, sat_per_vb: f64) {
        self.fee_estimates.insert(target_blocks.to_string(), sat_per_vb);
    }

    /// Add a confirmed UTXO to `address`, updating its chain stats
    pub fn fund_address(&mut self, address: &str, txid: &str, vout: u32, value: u64) {
        let entry = self.addresses.entry(address.to_string()).or_default();
        entry.chain_stats.funded_txo_count += 1;
        entry.chain_stats.funded_txo_sum += value;
        entry.chain_stats.tx_count += 1;
        entry.utxos.push(UtxoResponse {
            txid: txid.to_string(),
            vout,
            value,
            status: TxStatusResponse {
                confirmed: true,
                block_height: Some(self.tip_height),
                block_hash: None,
            },
        });
    }

    /// Overwrite the stats of `address` without touching its UTXOs
    pub fn set_address_stats(&mut self, address: &str, chain_stats: StatsResponse, mempool_stats: StatsResponse) {
        let entry = self.addresses.entry(address.to_string()).or_default();
        entry.chain_stats = chain_stats;
        entry.mempool_stats = mempool_stats;
    }

    /// Store a raw transaction and return its txid
    pub fn add_transaction(&mut self, hex: &str, confirmed: bool) -> anyhow::Result<String> {
        let tx = decode_transaction(hex)?;
        let txid = tx.compute_txid().to_string();
        let status = TxStatusResponse {
            confirmed,
            block_height: confirmed.then_some(self.tip_height),
            block_hash: None,
        };
        self.transactions.insert(
            txid.clone(),
            MockTransaction {
                hex: hex.to_string(),
                status,
            },
        );
        Ok(txid)
    }

    /// Answer every request for `path` with `status`
    pub fn fail_path(&mut self, path: &str, status: u16) {
        self.failures.insert(path.to_string(), status);
    }

    pub fn address_response(&self, address: &str) -> AddressResponse {
        let entry = self.addresses.get(address).cloned().unwrap_or_default();
        AddressResponse {
            address: address.to_string(),
            chain_stats: entry.chain_stats,
            mempool_stats: entry.mempool_stats,
        }
    }

    pub fn transaction_response(&self, txid: &str) -> Option<TxResponse> {
        let stored = self.transactions.get(txid)?;
        let tx = decode_transaction(&stored.hex).ok()?;
        Some(TxResponse {
            txid: txid.to_string(),
            version: tx.version.0,
            locktime: tx.lock_time.to_consensus_u32(),
            vout: tx
                .output
                .iter()
                .map(|out| TxOutput {
                    scriptpubkey: hex::encode(out.script_pubkey.as_bytes()),
                    scriptpubkey_address: None,
                    value: out.value.to_sat(),
                })
                .collect(),
            status: stored.status.clone(),
        })
    }
}

/// Decode a hex-encoded consensus transaction
pub fn decode_transaction(hex: &str) -> anyhow::Result<Transaction> {
    let bytes = hex::decode(hex.trim())?;
    Ok(bitcoin::consensus::encode::deserialize(&bytes)?)
}
