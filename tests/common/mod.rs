//! Shared fixtures for integration tests
//!
//! - `ScriptedHttpClient`: in-process HTTP stand-in with per-path responses,
//!   delays and an in-flight counter
//! - `HdKeyring`: deterministic BIP84 software keyring
//! - `NamedAddressSource`: readable fake addresses for discovery tests

#![allow(dead_code)]

use async_trait::async_trait;
use bitcoin::bip32::{ChildNumber, DerivationPath, Xpriv, Xpub};
use bitcoin::key::CompressedPublicKey;
use bitcoin::secp256k1::{All, Message, Secp256k1, SecretKey};
use bitcoin::Address;
use esplora_wallet::{
    AccountAddress, AccountId, AccountInfo, AddressSource, BitcoinKeyring, DerivationKey, HttpClient,
    HttpRequest, HttpResponse, KeyChain, WalletConfig, WalletError, WalletResult,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const MAINNET_URL: &str = "http://mainnet.test";
pub const TESTNET_URL: &str = "http://testnet.test";

/// Initialize logger (only once, subsequent calls are no-ops)
pub fn init_logging() {
    let _ = env_logger::builder()
        .is_test(true)
        .filter_level(log::LevelFilter::Info)
        .try_init();
}

/// Config pointing both networks at the scripted client's fake hosts
pub fn test_config(max_requests_per_host: usize) -> WalletConfig {
    WalletConfig {
        mainnet_url: MAINNET_URL.to_string(),
        testnet_url: TESTNET_URL.to_string(),
        max_requests_per_host,
        request_timeout: Duration::from_secs(5),
        shuffle_transactions: false,
    }
}

/// Config for a wallet talking to a running esplora-mock
pub fn mock_config(testnet_url: String) -> WalletConfig {
    WalletConfig {
        testnet_url,
        ..test_config(5)
    }
}

/// Esplora address document with all-zero stats
pub fn empty_stats_json(address: &str) -> String {
    stats_json(address, (0, 0, 0), (0, 0, 0))
}

/// `(funded_txo_sum, spent_txo_sum, tx_count)` for chain and mempool
pub fn stats_json(address: &str, chain: (u64, u64, u64), mempool: (u64, u64, u64)) -> String {
    format!(
        r#"{{"address":"{}","chain_stats":{{"funded_txo_count":0,"funded_txo_sum":{},"spent_txo_count":0,"spent_txo_sum":{},"tx_count":{}}},"mempool_stats":{{"funded_txo_count":0,"funded_txo_sum":{},"spent_txo_count":0,"spent_txo_sum":{},"tx_count":{}}}}}"#,
        address, chain.0, chain.1, chain.2, mempool.0, mempool.1, mempool.2
    )
}

// ============================================================================
// Scripted HTTP client
// ============================================================================

#[derive(Clone)]
enum Reply {
    Status { status: u16, body: String },
    TransportError(String),
}

#[derive(Clone)]
struct Route {
    reply: Reply,
    delay: Duration,
}

/// Answers by URL path. Unknown `/address/{a}` paths report an unused
/// address, unknown `/address/{a}/utxo` paths an empty list, anything else 404.
#[derive(Default)]
pub struct ScriptedHttpClient {
    routes: Mutex<HashMap<String, Route>>,
    default_delay: Mutex<Duration>,
    requests: Mutex<Vec<String>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

struct InFlightGuard<'a>(&'a AtomicUsize);

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl ScriptedHttpClient {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn respond(&self, path: &str, status: u16, body: impl Into<String>) {
        self.respond_after(path, status, body, Duration::ZERO);
    }

    pub fn respond_after(&self, path: &str, status: u16, body: impl Into<String>, delay: Duration) {
        let route = Route {
            reply: Reply::Status {
                status,
                body: body.into(),
            },
            delay,
        };
        self.routes.lock().unwrap().insert(path.to_string(), route);
    }

    /// Fail `path` without producing any HTTP response
    pub fn fail_transport(&self, path: &str, message: &str, delay: Duration) {
        let route = Route {
            reply: Reply::TransportError(message.to_string()),
            delay,
        };
        self.routes.lock().unwrap().insert(path.to_string(), route);
    }

    /// Delay applied to paths without an explicit route
    pub fn set_default_delay(&self, delay: Duration) {
        *self.default_delay.lock().unwrap() = delay;
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn requests_with_prefix(&self, prefix: &str) -> usize {
        self.requests().iter().filter(|p| p.starts_with(prefix)).count()
    }

    pub fn in_flight(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn route_for(&self, path: &str) -> Route {
        if let Some(route) = self.routes.lock().unwrap().get(path) {
            return route.clone();
        }
        let delay = *self.default_delay.lock().unwrap();
        let reply = match path.strip_prefix("/address/") {
            Some(rest) if rest.ends_with("/utxo") => Reply::Status {
                status: 200,
                body: "[]".to_string(),
            },
            Some(address) => Reply::Status {
                status: 200,
                body: empty_stats_json(address),
            },
            None => Reply::Status {
                status: 404,
                body: "not found".to_string(),
            },
        };
        Route { reply, delay }
    }
}

#[async_trait]
impl HttpClient for ScriptedHttpClient {
    async fn send(&self, request: HttpRequest) -> WalletResult<HttpResponse> {
        let path = request.url.path().to_string();
        self.requests.lock().unwrap().push(path.clone());

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let _guard = InFlightGuard(&self.in_flight);

        let route = self.route_for(&path);
        if !route.delay.is_zero() {
            tokio::time::sleep(route.delay).await;
        }

        match route.reply {
            Reply::Status { status, body } => Ok(HttpResponse {
                status,
                body: body.into_bytes(),
            }),
            Reply::TransportError(message) => Err(WalletError::Network(message)),
        }
    }
}

// ============================================================================
// Address sources and keyring
// ============================================================================

/// `receive{i}` / `change{i}`
pub struct NamedAddressSource;

impl NamedAddressSource {
    pub fn name(key: &DerivationKey) -> String {
        match key.chain {
            KeyChain::Receive => format!("receive{}", key.index),
            KeyChain::Change => format!("change{}", key.index),
        }
    }
}

impl AddressSource for NamedAddressSource {
    fn address_for(&self, key: &DerivationKey) -> Option<String> {
        Some(Self::name(key))
    }
}

const KEYRING_SEED: [u8; 32] = [0x42; 32];

#[derive(Debug, Clone, Copy, Default)]
struct AccountState {
    next_receive: u32,
    next_change: u32,
}

/// BIP84 keys below a fixed seed: m/84'/coin'/account'/chain/index
pub struct HdKeyring {
    secp: Secp256k1<All>,
    accounts: Mutex<HashMap<AccountId, AccountState>>,
}

impl HdKeyring {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            secp: Secp256k1::new(),
            accounts: Mutex::new(HashMap::new()),
        })
    }

    pub fn add_account(&self, account: AccountId) {
        self.accounts.lock().unwrap().entry(account).or_default();
    }

    /// `(next_receive, next_change)`
    pub fn next_indices(&self, account: &AccountId) -> Option<(u32, u32)> {
        self.accounts
            .lock()
            .unwrap()
            .get(account)
            .map(|s| (s.next_receive, s.next_change))
    }

    pub fn account_xpub(&self, account: &AccountId) -> String {
        Xpub::from_priv(&self.secp, &self.account_xpriv(account)).to_string()
    }

    /// Address for `key`, whether or not the account was added
    pub fn address(&self, account: &AccountId, key: DerivationKey) -> String {
        let public_key = self.secret_key(account, &key).public_key(&self.secp);
        Address::p2wpkh(&CompressedPublicKey(public_key), account.network.to_bitcoin()).to_string()
    }

    fn account_xpriv(&self, account: &AccountId) -> Xpriv {
        let master = Xpriv::new_master(account.network.to_bitcoin(), &KEYRING_SEED).unwrap();
        let path = DerivationPath::from(vec![
            ChildNumber::from_hardened_idx(84).unwrap(),
            ChildNumber::from_hardened_idx(account.network.coin_type()).unwrap(),
            ChildNumber::from_hardened_idx(account.account_index).unwrap(),
        ]);
        master.derive_priv(&self.secp, &path).unwrap()
    }

    fn secret_key(&self, account: &AccountId, key: &DerivationKey) -> SecretKey {
        let path = [
            ChildNumber::from_normal_idx(key.chain.index()).unwrap(),
            ChildNumber::from_normal_idx(key.index).unwrap(),
        ];
        self.account_xpriv(account)
            .derive_priv(&self.secp, &path)
            .unwrap()
            .private_key
    }

    fn known(&self, account: &AccountId) -> Option<AccountState> {
        self.accounts.lock().unwrap().get(account).copied()
    }
}

impl BitcoinKeyring for HdKeyring {
    fn account_addresses(&self, account: &AccountId) -> Option<Vec<AccountAddress>> {
        let state = self.known(account)?;
        let receive = (0..=state.next_receive).map(DerivationKey::receive);
        let change = (0..=state.next_change).map(DerivationKey::change);
        Some(
            receive
                .chain(change)
                .map(|key| AccountAddress {
                    address: self.address(account, key),
                    key,
                })
                .collect(),
        )
    }

    fn account_info(&self, account: &AccountId) -> Option<AccountInfo> {
        let state = self.known(account)?;
        let receive = DerivationKey::receive(state.next_receive);
        let change = DerivationKey::change(state.next_change);
        Some(AccountInfo {
            next_receive_address: AccountAddress {
                address: self.address(account, receive),
                key: receive,
            },
            next_change_address: AccountAddress {
                address: self.address(account, change),
                key: change,
            },
        })
    }

    fn address_for(&self, account: &AccountId, key: &DerivationKey) -> Option<String> {
        self.known(account)?;
        Some(self.address(account, *key))
    }

    fn public_key_for(&self, account: &AccountId, key: &DerivationKey) -> Option<Vec<u8>> {
        self.known(account)?;
        let public_key = self.secret_key(account, key).public_key(&self.secp);
        Some(public_key.serialize().to_vec())
    }

    fn sign_digest(&self, account: &AccountId, key: &DerivationKey, digest: &[u8; 32]) -> Option<Vec<u8>> {
        self.known(account)?;
        let message = Message::from_digest(*digest);
        let signature = self.secp.sign_ecdsa(&message, &self.secret_key(account, key));
        Some(signature.serialize_der().to_vec())
    }

    fn update_next_unused_indices(&self, account: &AccountId, next_receive: Option<u32>, next_change: Option<u32>) {
        let mut accounts = self.accounts.lock().unwrap();
        let state = accounts.entry(*account).or_default();
        if let Some(index) = next_receive {
            state.next_receive = index;
        }
        if let Some(index) = next_change {
            state.next_change = index;
        }
    }
}
