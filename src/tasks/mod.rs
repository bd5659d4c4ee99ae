//! Multi-request operations
//!
//! Each task owns its accumulators and drives [`BitcoinRpc`] on its own;
//! the wallet service spawns them into a [`TaskArena`] per kind.
//!
//! [`BitcoinRpc`]: crate::rpc::BitcoinRpc

pub mod arena;
pub mod create_transaction;
pub mod discover_account;
pub mod fetch_raw_transactions;
pub mod get_balance;
pub mod get_utxos;
pub mod next_unused_address;

pub use arena::{TaskArena, TaskCompletion, TaskId};
pub use discover_account::{DiscoverAccountTask, DiscoveredAccount, GAP_LIMIT};
pub use fetch_raw_transactions::FetchRawTransactionsTask;
pub use get_balance::GetBalanceTask;
pub use get_utxos::GetUtxosTask;
pub use next_unused_address::DiscoverNextUnusedAddressTask;
