//! Balance over an account's known addresses

use futures::stream::{FuturesUnordered, StreamExt};
use rand::seq::SliceRandom;
use std::sync::Arc;

use crate::balance::{update_balance, WalletBalance};
use crate::error::WalletResult;
use crate::keyring::AccountAddress;
use crate::rpc::BitcoinRpc;

pub struct GetBalanceTask {
    rpc: Arc<BitcoinRpc>,
    chain_id: String,
    addresses: Vec<AccountAddress>,
}

impl GetBalanceTask {
    /// `addresses` are shuffled so request order reveals nothing about
    /// derivation order
    pub fn new(rpc: Arc<BitcoinRpc>, chain_id: impl Into<String>, mut addresses: Vec<AccountAddress>) -> Self {
        addresses.shuffle(&mut rand::thread_rng());
        Self {
            rpc,
            chain_id: chain_id.into(),
            addresses,
        }
    }

    pub async fn run(self) -> WalletResult<WalletBalance> {
        let mut in_flight: FuturesUnordered<_> = self
            .addresses
            .into_iter()
            .map(|account_address| {
                let rpc = Arc::clone(&self.rpc);
                let chain_id = self.chain_id.clone();
                async move {
                    let stats = rpc.get_address_stats(&chain_id, &account_address.address).await;
                    (account_address.address, stats)
                }
            })
            .collect();

        let mut balance = WalletBalance::default();
        while let Some((address, stats)) = in_flight.next().await {
            update_balance(&mut balance, &address, &stats?)?;
        }
        Ok(balance)
    }
}
