//! Batch retrieval of raw transactions
//!
//! Each distinct txid is fetched once, concurrently. Results are placed by
//! request position, not completion order, and repeated txids in the input
//! receive the same bytes.

use bitcoin::Txid;
use futures::stream::{FuturesUnordered, StreamExt};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{WalletError, WalletResult};
use crate::network::BitcoinNetwork;
use crate::rpc::BitcoinRpc;

pub struct FetchRawTransactionsTask {
    rpc: Arc<BitcoinRpc>,
    chain_id: String,
    txids: Vec<Txid>,
}

impl FetchRawTransactionsTask {
    pub fn new(rpc: Arc<BitcoinRpc>, chain_id: impl Into<String>, txids: Vec<Txid>) -> Self {
        Self {
            rpc,
            chain_id: chain_id.into(),
            txids,
        }
    }

    /// Raw bytes per requested txid, in request order
    ///
    /// Fails with the first error any fetch reports; the other fetches are
    /// dropped and their results never surface.
    pub async fn run(self) -> WalletResult<Vec<Vec<u8>>> {
        BitcoinNetwork::from_chain_id(&self.chain_id)?;

        let mut unique: Vec<Txid> = Vec::new();
        let mut slot_of: HashMap<Txid, usize> = HashMap::new();
        for txid in &self.txids {
            slot_of.entry(*txid).or_insert_with(|| {
                unique.push(*txid);
                unique.len() - 1
            });
        }

        let mut fetched: Vec<Option<Vec<u8>>> = vec![None; unique.len()];
        let mut in_flight: FuturesUnordered<_> = unique
            .iter()
            .enumerate()
            .map(|(slot, txid)| {
                let rpc = Arc::clone(&self.rpc);
                let chain_id = self.chain_id.clone();
                let txid = txid.to_string();
                async move { (slot, rpc.get_transaction_raw(&chain_id, &txid).await) }
            })
            .collect();

        while let Some((slot, response)) = in_flight.next().await {
            fetched[slot] = Some(response?);
        }
        log::debug!("Fetched {} raw transaction(s)", unique.len());

        self.txids
            .iter()
            .map(|txid| {
                slot_of
                    .get(txid)
                    .and_then(|slot| fetched[*slot].clone())
                    .ok_or_else(|| WalletError::internal(format!("missing raw transaction {}", txid)))
            })
            .collect()
    }
}
