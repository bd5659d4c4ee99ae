//! Wallet service
//!
//! Entry point for the rest of the system. Every public operation validates
//! its arguments up front, then runs as a task in the arena for its kind.
//! Tasks only hold weak handles back to the service, and dropping the
//! service aborts all of them.

use bitcoin::sighash::EcdsaSighashType;
use bitcoin::Txid;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use crate::address_source::{AddressSource, ExtendedKeyAddressSource, KeyringAddressSource};
use crate::balance::WalletBalance;
use crate::config::WalletConfig;
use crate::error::{WalletError, WalletResult};
use crate::keyring::{AccountAddress, AccountId, AccountInfo, BitcoinKeyring};
use crate::network::BitcoinNetwork;
use crate::rpc::{BitcoinRpc, HttpClient, ReqwestHttpClient};
use crate::tasks::create_transaction::CreateTransactionTask;
use crate::tasks::{
    DiscoverAccountTask, DiscoverNextUnusedAddressTask, DiscoveredAccount, FetchRawTransactionsTask,
    GetBalanceTask, GetUtxosTask, TaskArena, TaskCompletion,
};
use crate::transaction::{address_to_script_pubkey, ensure_not_dust, BitcoinTransaction};
use crate::types::{DerivationKey, KeyChain, UtxoMap};

/// A broadcast transaction and the id the remote assigned it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostedTransaction {
    pub txid: String,
    pub transaction: BitcoinTransaction,
}

/// One input as a hardware device needs it to sign
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwSignInput {
    /// Raw transaction holding the spent output
    pub tx_bytes: Vec<u8>,
    pub output_index: u32,
    /// `84'/{coin}'/{account}'/{chain}/{index}`
    pub associated_path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HwSignData {
    pub inputs: Vec<HwSignInput>,
    pub output_script: Vec<u8>,
    pub change_path: Option<String>,
    pub lock_time: u32,
}

pub struct BitcoinWalletService {
    inner: Arc<ServiceInner>,
}

pub(crate) struct ServiceInner {
    config: WalletConfig,
    rpc: Arc<BitcoinRpc>,
    keyring: Arc<dyn BitcoinKeyring>,
    get_balance_tasks: TaskArena,
    get_utxos_tasks: TaskArena,
    discover_account_tasks: TaskArena,
    discover_next_unused_address_tasks: TaskArena,
    fetch_raw_transactions_tasks: TaskArena,
    create_transaction_tasks: TaskArena,
}

impl BitcoinWalletService {
    pub fn new(config: WalletConfig, keyring: Arc<dyn BitcoinKeyring>) -> WalletResult<Self> {
        let http = Arc::new(ReqwestHttpClient::new(config.request_timeout)?);
        Self::with_http_client(config, keyring, http)
    }

    pub fn with_http_client(
        config: WalletConfig,
        keyring: Arc<dyn BitcoinKeyring>,
        http: Arc<dyn HttpClient>,
    ) -> WalletResult<Self> {
        let rpc = Arc::new(BitcoinRpc::new(&config, http)?);
        Ok(Self {
            inner: Arc::new(ServiceInner {
                config,
                rpc,
                keyring,
                get_balance_tasks: TaskArena::new("get_balance"),
                get_utxos_tasks: TaskArena::new("get_utxos"),
                discover_account_tasks: TaskArena::new("discover_account"),
                discover_next_unused_address_tasks: TaskArena::new("discover_next_unused_address"),
                fetch_raw_transactions_tasks: TaskArena::new("fetch_raw_transactions"),
                create_transaction_tasks: TaskArena::new("create_transaction"),
            }),
        })
    }

    pub fn rpc(&self) -> &BitcoinRpc {
        &self.inner.rpc
    }

    /// Balance over the addresses the account has handed out
    pub async fn get_balance(&self, account: &AccountId) -> WalletResult<WalletBalance> {
        self.inner.get_balance(account)?.wait().await
    }

    pub async fn get_utxos(&self, account: &AccountId) -> WalletResult<UtxoMap> {
        self.inner.get_utxos(account)?.wait().await
    }

    /// Next receive and change addresses of a keyring account
    pub fn account_info(&self, account: &AccountId) -> WalletResult<AccountInfo> {
        self.inner.account_info(account)
    }

    /// Gap-limit scan of a keyring account
    pub async fn discover_wallet_account(&self, account: &AccountId) -> WalletResult<DiscoveredAccount> {
        self.inner.account_info(account)?;
        let source = KeyringAddressSource::new(Arc::clone(&self.inner.keyring), *account);
        self.inner.discover_account(account.chain_id(), source).wait().await
    }

    /// Gap-limit scan of an account-level extended public key
    pub async fn discover_extended_key_account(
        &self,
        chain_id: &str,
        extended_key: &str,
    ) -> WalletResult<DiscoveredAccount> {
        let network = BitcoinNetwork::from_chain_id(chain_id)?;
        let source = ExtendedKeyAddressSource::new(extended_key, network)?;
        self.inner.discover_account(chain_id, source).wait().await
    }

    pub async fn get_extended_key_account_balance(
        &self,
        chain_id: &str,
        extended_key: &str,
    ) -> WalletResult<WalletBalance> {
        let discovered = self.discover_extended_key_account(chain_id, extended_key).await?;
        Ok(discovered.balance)
    }

    /// First unused address on `chain` at or after the keyring's next index
    pub async fn discover_next_unused_address(
        &self,
        account: &AccountId,
        chain: KeyChain,
    ) -> WalletResult<AccountAddress> {
        self.inner.discover_next_unused_address(account, chain)?.wait().await
    }

    /// Like [`Self::discover_next_unused_address`], then records the found
    /// index in the keyring
    pub async fn run_discovery(&self, account: &AccountId, chain: KeyChain) -> WalletResult<AccountAddress> {
        self.inner.run_discovery(account, chain)?.wait().await
    }

    /// Discover newly added accounts in the background and store their next
    /// unused indices in the keyring
    ///
    /// Must be called from within a Tokio runtime.
    pub fn accounts_added(&self, accounts: &[AccountId]) {
        for account in accounts {
            self.inner.discover_and_update(*account);
        }
    }

    /// Build an unsigned transaction paying `amount` (or everything, when
    /// `sending_max_amount` is set) to `to`
    pub async fn create_transaction(
        &self,
        account: &AccountId,
        to: &str,
        amount: u64,
        sending_max_amount: bool,
    ) -> WalletResult<BitcoinTransaction> {
        ServiceInner::create_transaction(&self.inner, account, to, amount, sending_max_amount)?
            .wait()
            .await
    }

    /// Sign every input with the keyring and broadcast
    pub async fn sign_and_post_transaction(
        &self,
        account: &AccountId,
        mut transaction: BitcoinTransaction,
    ) -> WalletResult<PostedTransaction> {
        self.inner.sign_inputs(account, &mut transaction)?;
        self.inner.post(account, transaction).await
    }

    /// Broadcast a transaction signed on a hardware device; `witnesses`
    /// holds one witness stack per input
    pub async fn post_hw_signed_transaction(
        &self,
        account: &AccountId,
        mut transaction: BitcoinTransaction,
        witnesses: Vec<Vec<Vec<u8>>>,
    ) -> WalletResult<PostedTransaction> {
        if witnesses.len() != transaction.inputs.len() || witnesses.iter().any(|w| w.is_empty()) {
            return Err(WalletError::invalid_argument(format!(
                "expected {} witness stacks, got {}",
                transaction.inputs.len(),
                witnesses.len()
            )));
        }
        for (input, witness) in transaction.inputs.iter_mut().zip(witnesses) {
            input.witness = witness;
        }
        self.inner.post(account, transaction).await
    }

    /// Everything a hardware device needs to sign `transaction`
    ///
    /// The transaction must come from [`Self::create_transaction`] for a
    /// hardware account, so every input carries its raw outpoint transaction.
    pub fn hardware_sign_data(
        &self,
        account: &AccountId,
        transaction: &BitcoinTransaction,
    ) -> WalletResult<HwSignData> {
        if !account.is_hardware() {
            return Err(WalletError::internal(format!("{} is not a hardware account", account)));
        }
        let keys = self.inner.address_keys(account)?;
        let key_of = |address: &str| {
            keys.get(address)
                .copied()
                .ok_or_else(|| WalletError::internal(format!("{} is not an address of {}", address, account)))
        };

        let inputs = transaction
            .inputs
            .iter()
            .map(|input| -> WalletResult<HwSignInput> {
                let tx_bytes = input.raw_outpoint_tx.clone().ok_or_else(|| {
                    WalletError::internal(format!("no raw transaction for input {}", input.utxo_outpoint))
                })?;
                Ok(HwSignInput {
                    tx_bytes,
                    output_index: input.utxo_outpoint.vout,
                    associated_path: hardware_path(account, &key_of(input.utxo_address.as_str())?),
                })
            })
            .collect::<WalletResult<Vec<_>>>()?;

        let change_path = transaction
            .change_output()
            .map(|change| key_of(change.address.as_str()).map(|key| hardware_path(account, &key)))
            .transpose()?;

        Ok(HwSignData {
            inputs,
            output_script: transaction.serialize_outputs(),
            change_path,
            lock_time: transaction.locktime,
        })
    }

    /// Whether a transaction is confirmed
    pub async fn get_transaction_status(&self, chain_id: &str, txid: &str) -> WalletResult<bool> {
        let expected = Txid::from_str(txid)
            .map_err(|e| WalletError::invalid_argument(format!("invalid txid '{}': {}", txid, e)))?;
        let info = self.inner.rpc.get_transaction(chain_id, txid).await?;
        if info.txid != expected {
            return Err(WalletError::internal(format!(
                "requested {} but received {}",
                expected, info.txid
            )));
        }
        Ok(info.status.confirmed)
    }

    /// Raw transactions in the order of `txids`
    pub async fn fetch_raw_transactions(&self, chain_id: &str, txids: &[Txid]) -> WalletResult<Vec<Vec<u8>>> {
        self.inner.fetch_raw_transactions(chain_id, txids.to_vec())?.wait().await
    }

    /// Tasks currently tracked across all arenas
    pub fn active_task_count(&self) -> usize {
        let inner = &self.inner;
        inner.get_balance_tasks.len()
            + inner.get_utxos_tasks.len()
            + inner.discover_account_tasks.len()
            + inner.discover_next_unused_address_tasks.len()
            + inner.fetch_raw_transactions_tasks.len()
            + inner.create_transaction_tasks.len()
    }
}

impl ServiceInner {
    fn account_info(&self, account: &AccountId) -> WalletResult<AccountInfo> {
        self.keyring
            .account_info(account)
            .ok_or_else(|| WalletError::internal(format!("unknown account {}", account)))
    }

    fn known_addresses(&self, account: &AccountId) -> WalletResult<Vec<AccountAddress>> {
        self.keyring
            .account_addresses(account)
            .ok_or_else(|| WalletError::internal(format!("no addresses for account {}", account)))
    }

    fn address_keys(&self, account: &AccountId) -> WalletResult<HashMap<String, DerivationKey>> {
        Ok(self
            .known_addresses(account)?
            .into_iter()
            .map(|a| (a.address, a.key))
            .collect())
    }

    fn get_balance(&self, account: &AccountId) -> WalletResult<TaskCompletion<WalletBalance>> {
        let task = GetBalanceTask::new(Arc::clone(&self.rpc), account.chain_id(), self.known_addresses(account)?);
        Ok(self.get_balance_tasks.spawn(task.run()))
    }

    pub(crate) fn get_utxos(&self, account: &AccountId) -> WalletResult<TaskCompletion<UtxoMap>> {
        let task = GetUtxosTask::new(Arc::clone(&self.rpc), account.chain_id(), self.known_addresses(account)?);
        Ok(self.get_utxos_tasks.spawn(task.run()))
    }

    fn discover_account<S>(&self, chain_id: &str, source: S) -> TaskCompletion<DiscoveredAccount>
    where
        S: AddressSource + 'static,
    {
        let task = DiscoverAccountTask::new(Arc::clone(&self.rpc), chain_id, source);
        self.discover_account_tasks.spawn(task.run())
    }

    fn next_unused_address_task(
        &self,
        account: &AccountId,
        chain: KeyChain,
    ) -> WalletResult<DiscoverNextUnusedAddressTask<KeyringAddressSource>> {
        let info = self.account_info(account)?;
        let start = match chain {
            KeyChain::Receive => info.next_receive_address.key,
            KeyChain::Change => info.next_change_address.key,
        };
        let source = KeyringAddressSource::new(Arc::clone(&self.keyring), *account);
        Ok(DiscoverNextUnusedAddressTask::new(
            Arc::clone(&self.rpc),
            account.chain_id(),
            source,
            start,
        ))
    }

    fn discover_next_unused_address(
        &self,
        account: &AccountId,
        chain: KeyChain,
    ) -> WalletResult<TaskCompletion<AccountAddress>> {
        let task = self.next_unused_address_task(account, chain)?;
        Ok(self.discover_next_unused_address_tasks.spawn(task.run()))
    }

    pub(crate) fn run_discovery(&self, account: &AccountId, chain: KeyChain) -> WalletResult<TaskCompletion<AccountAddress>> {
        let task = self.next_unused_address_task(account, chain)?;
        let keyring = Arc::clone(&self.keyring);
        let account = *account;

        Ok(self.discover_next_unused_address_tasks.spawn(async move {
            let found = task.run().await?;
            match chain {
                KeyChain::Receive => keyring.update_next_unused_indices(&account, Some(found.key.index), None),
                KeyChain::Change => keyring.update_next_unused_indices(&account, None, Some(found.key.index)),
            }
            Ok(found)
        }))
    }

    fn discover_and_update(&self, account: AccountId) {
        let keyring = Arc::clone(&self.keyring);
        let source = KeyringAddressSource::new(Arc::clone(&keyring), account);
        let task = DiscoverAccountTask::new(Arc::clone(&self.rpc), account.chain_id(), source);

        // nobody awaits the result; the task still lives in the arena
        let _ = self.discover_account_tasks.spawn(async move {
            match task.run().await {
                Ok(discovered) => {
                    keyring.update_next_unused_indices(
                        &account,
                        Some(discovered.next_unused_receive_index),
                        Some(discovered.next_unused_change_index),
                    );
                    Ok(())
                }
                Err(e) => {
                    log::warn!("⚠️  Discovery for {} failed: {}", account, e);
                    Err(e)
                }
            }
        });
    }

    pub(crate) fn fetch_raw_transactions(
        &self,
        chain_id: &str,
        txids: Vec<Txid>,
    ) -> WalletResult<TaskCompletion<Vec<Vec<u8>>>> {
        BitcoinNetwork::from_chain_id(chain_id)?;
        let task = FetchRawTransactionsTask::new(Arc::clone(&self.rpc), chain_id, txids);
        Ok(self.fetch_raw_transactions_tasks.spawn(task.run()))
    }

    fn create_transaction(
        this: &Arc<Self>,
        account: &AccountId,
        to: &str,
        amount: u64,
        sending_max_amount: bool,
    ) -> WalletResult<TaskCompletion<BitcoinTransaction>> {
        this.account_info(account)?;
        address_to_script_pubkey(to, account.network)?;
        if !sending_max_amount {
            ensure_not_dust(amount)?;
        }

        let task = CreateTransactionTask::new(
            Arc::downgrade(this),
            Arc::clone(&this.rpc),
            *account,
            to.to_string(),
            amount,
            sending_max_amount,
            this.config.shuffle_transactions,
        );
        Ok(this.create_transaction_tasks.spawn(task.run()))
    }

    fn sign_inputs(&self, account: &AccountId, transaction: &mut BitcoinTransaction) -> WalletResult<()> {
        let keys = self.address_keys(account)?;
        let sighashes = transaction.signature_hashes()?;

        for (input, sighash) in transaction.inputs.iter_mut().zip(sighashes.iter()) {
            let key = keys
                .get(&input.utxo_address)
                .copied()
                .ok_or_else(|| WalletError::Signing(format!("no key for address {}", input.utxo_address)))?;

            let mut signature = self
                .keyring
                .sign_digest(account, &key, sighash)
                .ok_or_else(|| WalletError::Signing(format!("keyring refused to sign with {}", key)))?;
            signature.push(EcdsaSighashType::All.to_u32() as u8);

            let public_key = self
                .keyring
                .public_key_for(account, &key)
                .ok_or_else(|| WalletError::Signing(format!("no public key for {}", key)))?;

            input.witness = vec![signature, public_key];
        }
        Ok(())
    }

    async fn post(&self, account: &AccountId, transaction: BitcoinTransaction) -> WalletResult<PostedTransaction> {
        if !transaction.is_signed() {
            return Err(WalletError::invalid_argument("transaction is not fully signed"));
        }

        let txid = self.rpc.post_transaction(account.chain_id(), &transaction.serialize()).await?;
        log::info!("📡 Broadcast {} for {}", txid, account);
        Ok(PostedTransaction { txid, transaction })
    }
}

fn hardware_path(account: &AccountId, key: &DerivationKey) -> String {
    format!(
        "84'/{}'/{}'/{}/{}",
        account.network.coin_type(),
        account.account_index,
        key.chain.index(),
        key.index
    )
}
