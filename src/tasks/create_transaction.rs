//! Transaction building
//!
//! Runs as a sequence: chain height (used as locktime), the account's
//! UTXOs, a fresh change address, fee estimates, coin selection, then
//! arrangement. Hardware accounts additionally get the raw transactions
//! their inputs spend. Sub-operations run as their own tasks on the
//! service, which this task reaches through a weak handle.

use bitcoin::Txid;
use std::sync::{Arc, Weak};

use crate::error::{WalletError, WalletResult};
use crate::keyring::AccountId;
use crate::rpc::BitcoinRpc;
use crate::service::ServiceInner;
use crate::transaction::{inputs_from_utxo_map, select_fee_rate, BitcoinTransaction, TransactionBuilder};
use crate::types::KeyChain;

pub(crate) struct CreateTransactionTask {
    service: Weak<ServiceInner>,
    rpc: Arc<BitcoinRpc>,
    account: AccountId,
    to: String,
    amount: u64,
    sending_max_amount: bool,
    shuffle: bool,
}

impl CreateTransactionTask {
    pub(crate) fn new(
        service: Weak<ServiceInner>,
        rpc: Arc<BitcoinRpc>,
        account: AccountId,
        to: String,
        amount: u64,
        sending_max_amount: bool,
        shuffle: bool,
    ) -> Self {
        Self {
            service,
            rpc,
            account,
            to,
            amount,
            sending_max_amount,
            shuffle,
        }
    }

    pub async fn run(self) -> WalletResult<BitcoinTransaction> {
        let chain_id = self.account.chain_id();
        let network = self.account.network;

        let chain_height = self.rpc.get_chain_height(chain_id).await?;

        let pending = self.service()?.get_utxos(&self.account)?;
        let utxos = pending.wait().await?;

        let change_address = if self.sending_max_amount {
            None
        } else {
            let pending = self.service()?.run_discovery(&self.account, KeyChain::Change)?;
            Some(pending.wait().await?)
        };

        let estimates = self.rpc.get_fee_estimates(chain_id).await?;
        let fee_rate = select_fee_rate(&estimates, network);
        log::debug!("Building transaction at {} sat/vB, locktime {}", fee_rate, chain_height);

        let builder = TransactionBuilder::new(network, fee_rate);
        let candidates = inputs_from_utxo_map(&utxos, network)?;
        let mut tx = match &change_address {
            Some(change) => builder.build_send(&self.to, self.amount, candidates, change, chain_height)?,
            None => builder.build_send_max(&self.to, candidates, chain_height)?,
        };

        if self.shuffle {
            tx.shuffle(&mut rand::thread_rng());
        } else {
            tx.arrange();
        }

        if self.account.is_hardware() {
            let txids: Vec<Txid> = tx.inputs.iter().map(|i| i.utxo_outpoint.txid).collect();
            let pending = self.service()?.fetch_raw_transactions(chain_id, txids)?;
            let raw_transactions = pending.wait().await?;
            for (input, raw) in tx.inputs.iter_mut().zip(raw_transactions) {
                input.raw_outpoint_tx = Some(raw);
            }
        }

        log::info!(
            "🔨 Built transaction for {}: {} input(s), {} output(s), fee {} sats",
            self.account,
            tx.inputs.len(),
            tx.outputs.len(),
            tx.effective_fee_amount()
        );
        Ok(tx)
    }

    fn service(&self) -> WalletResult<Arc<ServiceInner>> {
        self.service
            .upgrade()
            .ok_or_else(|| WalletError::internal("wallet service shut down"))
    }
}
