//! Forward scan for the first unused address on one chain

use std::sync::Arc;

use crate::address_source::AddressSource;
use crate::error::{WalletError, WalletResult};
use crate::keyring::AccountAddress;
use crate::rpc::BitcoinRpc;
use crate::types::DerivationKey;

/// Walks one address at a time from `start` until an address with no chain
/// or mempool transactions is found
pub struct DiscoverNextUnusedAddressTask<S> {
    rpc: Arc<BitcoinRpc>,
    chain_id: String,
    source: S,
    start: DerivationKey,
}

impl<S: AddressSource> DiscoverNextUnusedAddressTask<S> {
    pub fn new(rpc: Arc<BitcoinRpc>, chain_id: impl Into<String>, source: S, start: DerivationKey) -> Self {
        Self {
            rpc,
            chain_id: chain_id.into(),
            source,
            start,
        }
    }

    pub async fn run(self) -> WalletResult<AccountAddress> {
        let mut key = self.start;
        loop {
            let address = self
                .source
                .address_for(&key)
                .ok_or_else(|| WalletError::internal(format!("no address for key {}", key)))?;

            let stats = self.rpc.get_address_stats(&self.chain_id, &address).await?;
            if !stats.is_transacted() {
                log::debug!("Next unused address {} at {}", address, key);
                return Ok(AccountAddress { address, key });
            }

            key = key
                .next()
                .ok_or_else(|| WalletError::internal("derivation index exhausted"))?;
        }
    }
}
