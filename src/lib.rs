//! Esplora Wallet: Bitcoin wallet backend over an Esplora API
//!
//! Discovers which addresses of an HD account have been used, aggregates
//! their balances and unspent outputs, and builds, signs (through an
//! external keyring) and broadcasts transactions.
//!
//! # Architecture
//!
//! - **BitcoinRpc**: throttled Esplora client, the only component doing I/O
//! - **Tasks**: discovery, batch raw-transaction fetch, balance, UTXO and
//!   transaction-build operations, each fanning requests out and latching
//!   the first error
//! - **BitcoinWalletService**: owns the tasks and talks to the keyring
//!
//! # Example
//!
//! ```ignore
//! use esplora_wallet::{AccountId, AccountKind, BitcoinNetwork, BitcoinWalletService, WalletConfig};
//!
//! let service = BitcoinWalletService::new(WalletConfig::from_env(), keyring)?;
//! let account = AccountId::new(BitcoinNetwork::Testnet, AccountKind::Software, 0);
//!
//! let discovered = service.discover_wallet_account(&account).await?;
//! println!("total: {} sats", discovered.balance.total_balance);
//!
//! let tx = service.create_transaction(&account, "tb1q...", 10_000, false).await?;
//! let posted = service.sign_and_post_transaction(&account, tx).await?;
//! ```

pub mod address_source;
pub mod balance;
pub mod config;
pub mod error;
pub mod keyring;
pub mod network;
pub mod rpc;
pub mod service;
pub mod tasks;
pub mod transaction;
pub mod types;

pub use address_source::{AddressSource, ExtendedKeyAddressSource, KeyringAddressSource};
pub use balance::{update_balance, WalletBalance};
pub use config::WalletConfig;
pub use error::{WalletError, WalletResult};
pub use keyring::{AccountAddress, AccountId, AccountInfo, AccountKind, BitcoinKeyring};
pub use network::{BitcoinNetwork, BITCOIN_MAINNET, BITCOIN_TESTNET};
pub use rpc::{BitcoinRpc, HttpClient, HttpMethod, HttpRequest, HttpResponse, ReqwestHttpClient};
pub use service::{BitcoinWalletService, HwSignData, HwSignInput, PostedTransaction};
pub use tasks::{DiscoveredAccount, GAP_LIMIT};
pub use transaction::{BitcoinTransaction, TransactionBuilder, TxInput, TxOutput, TxOutputKind};
pub use types::{AddressStats, DerivationKey, KeyChain, TransactionInfo, TxStatus, TxoStats, UnspentOutput, UtxoMap};
