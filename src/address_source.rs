//! Address sources for discovery
//!
//! Discovery only needs to turn a [`DerivationKey`] into an address. Wallet
//! accounts delegate to the keyring; watch-only scans derive P2WPKH
//! addresses from an extended public key.

use bitcoin::bip32::{ChildNumber, Xpub};
use bitcoin::key::CompressedPublicKey;
use bitcoin::secp256k1::{Secp256k1, VerifyOnly};
use bitcoin::{Address, NetworkKind};
use std::str::FromStr;
use std::sync::Arc;

use crate::error::{WalletError, WalletResult};
use crate::keyring::{AccountId, BitcoinKeyring};
use crate::network::BitcoinNetwork;
use crate::types::DerivationKey;

pub trait AddressSource: Send + Sync {
    fn address_for(&self, key: &DerivationKey) -> Option<String>;
}

/// Addresses of a keyring-managed account
pub struct KeyringAddressSource {
    keyring: Arc<dyn BitcoinKeyring>,
    account: AccountId,
}

impl KeyringAddressSource {
    pub fn new(keyring: Arc<dyn BitcoinKeyring>, account: AccountId) -> Self {
        Self { keyring, account }
    }
}

impl AddressSource for KeyringAddressSource {
    fn address_for(&self, key: &DerivationKey) -> Option<String> {
        self.keyring.address_for(&self.account, key)
    }
}

/// P2WPKH addresses below an account-level extended public key
pub struct ExtendedKeyAddressSource {
    xpub: Xpub,
    network: BitcoinNetwork,
    secp: Secp256k1<VerifyOnly>,
}

impl ExtendedKeyAddressSource {
    /// Accepts a bare xpub/tpub or a descriptor containing one,
    /// e.g. `wpkh([fp/84'/1'/0']tpub.../0/*)`
    pub fn new(extended_key: &str, network: BitcoinNetwork) -> WalletResult<Self> {
        let xpub = extract_xpub(extended_key)?;

        let expected = NetworkKind::from(network.to_bitcoin());
        if xpub.network != expected {
            return Err(WalletError::invalid_argument(format!(
                "extended key does not belong to {}",
                network
            )));
        }

        Ok(Self {
            xpub,
            network,
            secp: Secp256k1::verification_only(),
        })
    }

    pub fn derive_address(&self, key: &DerivationKey) -> WalletResult<Address> {
        let chain = ChildNumber::from_normal_idx(key.chain.index())
            .map_err(|e| WalletError::invalid_argument(e.to_string()))?;
        let index = ChildNumber::from_normal_idx(key.index)
            .map_err(|e| WalletError::invalid_argument(e.to_string()))?;

        let derived = self
            .xpub
            .derive_pub(&self.secp, &[chain, index])
            .map_err(|e| WalletError::internal(format!("derivation failed at {}: {}", key, e)))?;

        Ok(Address::p2wpkh(
            &CompressedPublicKey(derived.public_key),
            self.network.to_bitcoin(),
        ))
    }
}

impl AddressSource for ExtendedKeyAddressSource {
    fn address_for(&self, key: &DerivationKey) -> Option<String> {
        match self.derive_address(key) {
            Ok(address) => Some(address.to_string()),
            Err(e) => {
                log::warn!("⚠️  {}", e);
                None
            }
        }
    }
}

fn extract_xpub(extended_key: &str) -> WalletResult<Xpub> {
    let start = extended_key
        .find("tpub")
        .or_else(|| extended_key.find("xpub"))
        .ok_or_else(|| WalletError::invalid_argument("no xpub/tpub found in extended key"))?;

    let end = extended_key[start..]
        .find(|c: char| !c.is_ascii_alphanumeric())
        .map(|i| start + i)
        .unwrap_or(extended_key.len());

    Xpub::from_str(&extended_key[start..end])
        .map_err(|e| WalletError::invalid_argument(format!("invalid extended key: {}", e)))
}
