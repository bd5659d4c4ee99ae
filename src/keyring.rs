//! External signer and derivation capability
//!
//! The wallet core never holds key material. Address derivation, public
//! keys and signatures come from a [`BitcoinKeyring`], which also tracks the
//! next unused receive/change index of each account.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::network::BitcoinNetwork;
use crate::types::DerivationKey;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    /// Keys live in the local keyring
    Software,
    /// Keys live on an external device, which needs the raw transactions
    /// being spent to sign
    Hardware,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountId {
    pub network: BitcoinNetwork,
    pub kind: AccountKind,
    pub account_index: u32,
}

impl AccountId {
    pub fn new(network: BitcoinNetwork, kind: AccountKind, account_index: u32) -> Self {
        Self {
            network,
            kind,
            account_index,
        }
    }

    pub fn chain_id(&self) -> &'static str {
        self.network.chain_id()
    }

    pub fn is_hardware(&self) -> bool {
        self.kind == AccountKind::Hardware
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{:?}/{}", self.network, self.kind, self.account_index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AccountAddress {
    pub address: String,
    pub key: DerivationKey,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountInfo {
    pub next_receive_address: AccountAddress,
    pub next_change_address: AccountAddress,
}

/// Per-account key operations, implemented outside this crate
///
/// Methods return `None` for unknown accounts or keys.
pub trait BitcoinKeyring: Send + Sync {
    /// Addresses the account has handed out so far, both chains
    fn account_addresses(&self, account: &AccountId) -> Option<Vec<AccountAddress>>;

    fn account_info(&self, account: &AccountId) -> Option<AccountInfo>;

    fn address_for(&self, account: &AccountId, key: &DerivationKey) -> Option<String>;

    /// Compressed SEC1 public key
    fn public_key_for(&self, account: &AccountId, key: &DerivationKey) -> Option<Vec<u8>>;

    /// DER-encoded ECDSA signature over a 32-byte sighash
    fn sign_digest(&self, account: &AccountId, key: &DerivationKey, digest: &[u8; 32]) -> Option<Vec<u8>>;

    /// Record newly discovered next-unused indices; `None` leaves a chain as is
    fn update_next_unused_indices(&self, account: &AccountId, next_receive: Option<u32>, next_change: Option<u32>);
}
