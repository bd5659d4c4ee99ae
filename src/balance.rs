//! Wallet balance aggregation
//!
//! Folds per-address chain and mempool statistics into a [`WalletBalance`].
//! Each address contributes once: folding the same address again replaces
//! its previous contribution, and totals are always the sum over addresses,
//! so the result does not depend on fold order.

use serde::Serialize;
use std::collections::BTreeMap;

use crate::error::{WalletError, WalletResult};
use crate::types::AddressStats;

/// Aggregate balance of an account
///
/// `pending_balance` is the signed net mempool delta: unconfirmed outgoing
/// spends larger than unconfirmed incoming funds make it negative.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WalletBalance {
    /// Addresses with a non-zero total; zero-total addresses are omitted
    pub balances: BTreeMap<String, u64>,
    pub total_balance: u64,
    pub available_balance: u64,
    pub pending_balance: i64,
    #[serde(skip)]
    contributions: BTreeMap<String, AddressContribution>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct AddressContribution {
    total: u64,
    available: u64,
    pending: i64,
}

impl AddressContribution {
    fn from_stats(stats: &AddressStats) -> WalletResult<Self> {
        let chain = &stats.chain_stats;
        let mempool = &stats.mempool_stats;

        let funded = chain
            .funded_txo_sum
            .checked_add(mempool.funded_txo_sum)
            .ok_or_else(|| overflow(&stats.address))?;
        let spent = chain
            .spent_txo_sum
            .checked_add(mempool.spent_txo_sum)
            .ok_or_else(|| overflow(&stats.address))?;

        let pending = i64::try_from(i128::from(mempool.funded_txo_sum) - i128::from(mempool.spent_txo_sum))
            .map_err(|_| overflow(&stats.address))?;

        Ok(Self {
            total: funded.saturating_sub(spent),
            // unconfirmed incoming is not yet available, unconfirmed outgoing already is not
            available: chain.funded_txo_sum.saturating_sub(spent),
            pending,
        })
    }
}

impl WalletBalance {
    pub fn is_empty(&self) -> bool {
        self.contributions.is_empty()
    }

    /// Number of addresses folded in, including zero-total ones
    pub fn address_count(&self) -> usize {
        self.contributions.len()
    }
}

/// Fold one address's stats into `balance`
///
/// On error `balance` is left unchanged.
pub fn update_balance(balance: &mut WalletBalance, address: &str, stats: &AddressStats) -> WalletResult<()> {
    let contribution = AddressContribution::from_stats(stats)?;
    let previous = balance.contributions.get(address).copied().unwrap_or_default();

    let total = balance
        .total_balance
        .checked_sub(previous.total)
        .and_then(|t| t.checked_add(contribution.total))
        .ok_or_else(|| overflow(address))?;
    let available = balance
        .available_balance
        .checked_sub(previous.available)
        .and_then(|a| a.checked_add(contribution.available))
        .ok_or_else(|| overflow(address))?;
    let pending = i128::from(balance.pending_balance) - i128::from(previous.pending) + i128::from(contribution.pending);
    let pending = i64::try_from(pending).map_err(|_| overflow(address))?;

    if contribution.total != 0 {
        balance.balances.insert(address.to_string(), contribution.total);
    } else {
        balance.balances.remove(address);
    }
    balance.total_balance = total;
    balance.available_balance = available;
    balance.pending_balance = pending;
    balance.contributions.insert(address.to_string(), contribution);
    Ok(())
}

fn overflow(address: &str) -> WalletError {
    WalletError::parsing(format!("balance of {} out of range", address))
}
