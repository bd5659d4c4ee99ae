//! Gap-limit account discovery
//!
//! Scans the receive chain and, once the receive chain has shown activity,
//! the change chain. Each chain keeps requesting address stats until
//! [`GAP_LIMIT`] consecutive indices past its last transacted index have
//! been requested. Every response is folded into the running balance,
//! whether or not the address was used.

use futures::future::BoxFuture;
use futures::stream::{FuturesUnordered, StreamExt};
use futures::FutureExt;
use serde::Serialize;
use std::sync::Arc;

use crate::address_source::AddressSource;
use crate::balance::{update_balance, WalletBalance};
use crate::error::{WalletError, WalletResult};
use crate::rpc::BitcoinRpc;
use crate::types::{AddressStats, DerivationKey, KeyChain};

/// Consecutive unused indices that end a chain scan
pub const GAP_LIMIT: u32 = 20;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredAccount {
    pub next_unused_receive_index: u32,
    pub next_unused_change_index: u32,
    pub balance: WalletBalance,
}

/// Scan position on one chain
#[derive(Debug, Clone, Copy, Default)]
struct ChainCursor {
    last_transacted_index: Option<u32>,
    /// Lowest index not requested yet
    next_request_index: u32,
}

impl ChainCursor {
    fn next_unused_index(&self) -> u32 {
        self.last_transacted_index.map_or(0, |i| i.saturating_add(1))
    }

    /// Exclusive upper bound of indices to request
    fn scan_end(&self) -> u32 {
        self.next_unused_index().saturating_add(GAP_LIMIT)
    }

    fn take_next(&mut self) -> Option<u32> {
        if self.next_request_index >= self.scan_end() {
            return None;
        }
        let index = self.next_request_index;
        self.next_request_index += 1;
        Some(index)
    }

    fn mark_transacted(&mut self, index: u32) {
        if self.last_transacted_index.map_or(true, |last| index > last) {
            self.last_transacted_index = Some(index);
        }
    }
}

type StatsResponse = (DerivationKey, String, WalletResult<AddressStats>);

pub struct DiscoverAccountTask<S> {
    rpc: Arc<BitcoinRpc>,
    chain_id: String,
    source: S,
    receive: ChainCursor,
    change: ChainCursor,
    balance: WalletBalance,
}

impl<S: AddressSource> DiscoverAccountTask<S> {
    pub fn new(rpc: Arc<BitcoinRpc>, chain_id: impl Into<String>, source: S) -> Self {
        Self {
            rpc,
            chain_id: chain_id.into(),
            source,
            receive: ChainCursor::default(),
            change: ChainCursor::default(),
            balance: WalletBalance::default(),
        }
    }

    /// Run to completion
    ///
    /// The first failed request ends the scan with its error. Requests still
    /// in flight at that point are dropped with the task.
    pub async fn run(mut self) -> WalletResult<DiscoveredAccount> {
        log::debug!("Starting account discovery on {}", self.chain_id);
        let mut in_flight: FuturesUnordered<BoxFuture<'static, StatsResponse>> = FuturesUnordered::new();

        loop {
            self.schedule(&mut in_flight)?;

            let Some((key, address, response)) = in_flight.next().await else {
                break;
            };
            let stats = response?;
            self.on_address_stats(key, &address, &stats)?;
        }

        let discovered = DiscoveredAccount {
            next_unused_receive_index: self.receive.next_unused_index(),
            next_unused_change_index: self.change.next_unused_index(),
            balance: self.balance,
        };
        log::info!(
            "🔍 Discovery on {} done: next receive {}, next change {}, total {} sats",
            self.chain_id,
            discovered.next_unused_receive_index,
            discovered.next_unused_change_index,
            discovered.balance.total_balance
        );
        Ok(discovered)
    }

    fn schedule(&mut self, in_flight: &mut FuturesUnordered<BoxFuture<'static, StatsResponse>>) -> WalletResult<()> {
        while let Some(index) = self.receive.take_next() {
            in_flight.push(self.request(DerivationKey::receive(index))?);
        }
        // a fresh account has no change activity
        if self.receive.last_transacted_index.is_some() {
            while let Some(index) = self.change.take_next() {
                in_flight.push(self.request(DerivationKey::change(index))?);
            }
        }
        Ok(())
    }

    fn request(&self, key: DerivationKey) -> WalletResult<BoxFuture<'static, StatsResponse>> {
        let address = self
            .source
            .address_for(&key)
            .ok_or_else(|| WalletError::internal(format!("no address for key {}", key)))?;
        let rpc = Arc::clone(&self.rpc);
        let chain_id = self.chain_id.clone();

        Ok(async move {
            let response = rpc.get_address_stats(&chain_id, &address).await;
            (key, address, response)
        }
        .boxed())
    }

    fn on_address_stats(&mut self, key: DerivationKey, address: &str, stats: &AddressStats) -> WalletResult<()> {
        update_balance(&mut self.balance, address, stats)?;

        if stats.is_transacted() {
            log::debug!("Address {} at {} is transacted", address, key);
            match key.chain {
                KeyChain::Receive => self.receive.mark_transacted(key.index),
                KeyChain::Change => self.change.mark_transacted(key.index),
            }
        }
        Ok(())
    }
}
