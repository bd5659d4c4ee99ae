//! Unspent outputs over an account's known addresses

use futures::stream::{FuturesUnordered, StreamExt};
use rand::seq::SliceRandom;
use std::sync::Arc;

use crate::error::WalletResult;
use crate::keyring::AccountAddress;
use crate::rpc::BitcoinRpc;
use crate::types::UtxoMap;

pub struct GetUtxosTask {
    rpc: Arc<BitcoinRpc>,
    chain_id: String,
    addresses: Vec<AccountAddress>,
}

impl GetUtxosTask {
    pub fn new(rpc: Arc<BitcoinRpc>, chain_id: impl Into<String>, mut addresses: Vec<AccountAddress>) -> Self {
        addresses.shuffle(&mut rand::thread_rng());
        Self {
            rpc,
            chain_id: chain_id.into(),
            addresses,
        }
    }

    pub async fn run(self) -> WalletResult<UtxoMap> {
        let mut in_flight: FuturesUnordered<_> = self
            .addresses
            .into_iter()
            .map(|account_address| {
                let rpc = Arc::clone(&self.rpc);
                let chain_id = self.chain_id.clone();
                async move {
                    let utxos = rpc.get_utxo_list(&chain_id, &account_address.address).await;
                    (account_address.address, utxos)
                }
            })
            .collect();

        let mut utxo_map = UtxoMap::new();
        while let Some((address, utxos)) = in_flight.next().await {
            utxo_map.insert(address, utxos?);
        }
        Ok(utxo_map)
    }
}
