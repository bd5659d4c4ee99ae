//! Unsigned transaction model, fee policy and coin selection
//!
//! Transactions are built over P2WPKH inputs. Coin selection is
//! largest-first with ties broken by outpoint, so the same UTXO set always
//! selects the same inputs.

use bitcoin::blockdata::script::ScriptBuf;
use bitcoin::hashes::Hash;
use bitcoin::sighash::{EcdsaSighashType, SighashCache};
use bitcoin::transaction::{OutPoint, Sequence, Transaction, TxIn, TxOut, Version};
use bitcoin::{absolute, Address, Amount, Txid, Witness};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::BTreeMap;
use std::str::FromStr;

use crate::error::{WalletError, WalletResult};
use crate::keyring::AccountAddress;
use crate::network::BitcoinNetwork;
use crate::types::{UnspentOutput, UtxoMap};

/// Minimum relay fee rate used for dust and as a fee floor (sat/vB)
pub const DUST_RELAY_FEE_RATE: f64 = 3.0;
pub const HIGH_PRIORITY_TARGET_BLOCKS: u32 = 1;
pub const MEDIUM_PRIORITY_TARGET_BLOCKS: u32 = 4;

const TX_OVERHEAD_VBYTES: u64 = 10;
const INPUT_VBYTES: u64 = 68;
const OUTPUT_VBYTES: u64 = 34;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum TxOutputKind {
    Target,
    Change,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInput {
    pub utxo_address: String,
    pub utxo_outpoint: OutPoint,
    pub utxo_value: u64,
    pub script_pubkey: ScriptBuf,
    /// Transaction that created the spent output, needed by hardware signers
    pub raw_outpoint_tx: Option<Vec<u8>>,
    pub witness: Vec<Vec<u8>>,
}

impl TxInput {
    pub fn from_utxo(address: &str, utxo: &UnspentOutput, network: BitcoinNetwork) -> WalletResult<Self> {
        Ok(Self {
            utxo_address: address.to_string(),
            utxo_outpoint: OutPoint::new(utxo.txid, utxo.vout),
            utxo_value: utxo.value,
            script_pubkey: address_to_script_pubkey(address, network)?,
            raw_outpoint_tx: None,
            witness: Vec::new(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxOutput {
    pub kind: TxOutputKind,
    pub address: String,
    pub script_pubkey: ScriptBuf,
    pub amount: u64,
}

/// A transaction built for the external signer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BitcoinTransaction {
    pub to: String,
    pub amount: u64,
    pub sending_max_amount: bool,
    pub locktime: u32,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl BitcoinTransaction {
    pub fn total_inputs_amount(&self) -> u64 {
        self.inputs.iter().map(|i| i.utxo_value).sum()
    }

    pub fn total_outputs_amount(&self) -> u64 {
        self.outputs.iter().map(|o| o.amount).sum()
    }

    pub fn effective_fee_amount(&self) -> u64 {
        self.total_inputs_amount().saturating_sub(self.total_outputs_amount())
    }

    pub fn target_output(&self) -> Option<&TxOutput> {
        self.outputs.iter().find(|o| o.kind == TxOutputKind::Target)
    }

    pub fn change_output(&self) -> Option<&TxOutput> {
        self.outputs.iter().find(|o| o.kind == TxOutputKind::Change)
    }

    pub fn is_signed(&self) -> bool {
        !self.inputs.is_empty() && self.inputs.iter().all(|i| !i.witness.is_empty())
    }

    /// Randomize input and output order
    pub fn shuffle<R: Rng + ?Sized>(&mut self, rng: &mut R) {
        self.inputs.shuffle(rng);
        self.outputs.shuffle(rng);
    }

    /// Deterministic order: inputs by outpoint, target output first
    pub fn arrange(&mut self) {
        self.inputs.sort_by_key(|i| i.utxo_outpoint);
        self.outputs.sort_by_key(|o| o.kind);
    }

    pub fn to_bitcoin_transaction(&self) -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: absolute::LockTime::from_consensus(self.locktime),
            input: self
                .inputs
                .iter()
                .map(|input| TxIn {
                    previous_output: input.utxo_outpoint,
                    script_sig: ScriptBuf::new(),
                    sequence: Sequence::ENABLE_LOCKTIME_NO_RBF,
                    witness: Witness::from_slice(input.witness.as_slice()),
                })
                .collect(),
            output: self
                .outputs
                .iter()
                .map(|output| TxOut {
                    value: Amount::from_sat(output.amount),
                    script_pubkey: output.script_pubkey.clone(),
                })
                .collect(),
        }
    }

    /// BIP143 `SIGHASH_ALL` digest per input
    pub fn signature_hashes(&self) -> WalletResult<Vec<[u8; 32]>> {
        let tx = self.to_bitcoin_transaction();
        let mut cache = SighashCache::new(&tx);

        self.inputs
            .iter()
            .enumerate()
            .map(|(index, input)| {
                cache
                    .p2wpkh_signature_hash(
                        index,
                        &input.script_pubkey,
                        Amount::from_sat(input.utxo_value),
                        EcdsaSighashType::All,
                    )
                    .map(|sighash| sighash.to_byte_array())
                    .map_err(|e| WalletError::Signing(format!("sighash for input {}: {}", index, e)))
            })
            .collect()
    }

    /// Consensus encoding including witnesses
    pub fn serialize(&self) -> Vec<u8> {
        bitcoin::consensus::encode::serialize(&self.to_bitcoin_transaction())
    }

    /// Output count followed by each output's amount and script, as
    /// hardware devices expect them
    pub fn serialize_outputs(&self) -> Vec<u8> {
        bitcoin::consensus::encode::serialize(&self.to_bitcoin_transaction().output)
    }

    pub fn txid(&self) -> Txid {
        self.to_bitcoin_transaction().compute_txid()
    }
}

pub fn address_to_script_pubkey(address: &str, network: BitcoinNetwork) -> WalletResult<ScriptBuf> {
    let address = Address::from_str(address)
        .map_err(|e| WalletError::invalid_argument(format!("invalid address '{}': {}", address, e)))?
        .require_network(network.to_bitcoin())
        .map_err(|e| WalletError::invalid_argument(format!("address not valid for {}: {}", network, e)))?;
    Ok(address.script_pubkey())
}

/// Fee rate in sat/vB: medium-priority estimate, else high-priority, else
/// the network fallback; never below the dust relay rate
pub fn select_fee_rate(estimates: &BTreeMap<u32, f64>, network: BitcoinNetwork) -> f64 {
    let rate = estimates
        .get(&MEDIUM_PRIORITY_TARGET_BLOCKS)
        .or_else(|| estimates.get(&HIGH_PRIORITY_TARGET_BLOCKS))
        .copied()
        .unwrap_or_else(|| network.fallback_fee_rate());
    rate.max(DUST_RELAY_FEE_RATE)
}

/// Estimate transaction size in virtual bytes
pub fn estimate_vbytes(num_inputs: usize, num_outputs: usize) -> u64 {
    TX_OVERHEAD_VBYTES + num_inputs as u64 * INPUT_VBYTES + num_outputs as u64 * OUTPUT_VBYTES
}

fn apply_fee_rate(fee_rate: f64, vbytes: u64) -> WalletResult<u64> {
    let fee = (fee_rate * vbytes as f64).ceil();
    if !fee.is_finite() || fee < 0.0 || fee >= u64::MAX as f64 {
        return Err(WalletError::internal(format!("fee out of range for rate {}", fee_rate)));
    }
    Ok(fee as u64)
}

/// Smallest output value worth relaying
pub fn dust_threshold() -> u64 {
    (DUST_RELAY_FEE_RATE * OUTPUT_VBYTES as f64).ceil() as u64
}

pub fn ensure_not_dust(amount: u64) -> WalletResult<()> {
    let dust = dust_threshold();
    if amount < dust {
        return Err(WalletError::AmountTooSmall(format!(
            "{} sats is below the dust threshold of {} sats",
            amount, dust
        )));
    }
    Ok(())
}

/// Flatten a UTXO map into spendable inputs
pub fn inputs_from_utxo_map(utxos: &UtxoMap, network: BitcoinNetwork) -> WalletResult<Vec<TxInput>> {
    utxos
        .iter()
        .flat_map(|(address, list)| list.iter().map(move |utxo| (address, utxo)))
        .map(|(address, utxo)| TxInput::from_utxo(address, utxo, network))
        .collect()
}

pub struct TransactionBuilder {
    network: BitcoinNetwork,
    fee_rate: f64,
}

impl TransactionBuilder {
    /// `fee_rate` is in sat/vB
    pub fn new(network: BitcoinNetwork, fee_rate: f64) -> Self {
        Self { network, fee_rate }
    }

    /// Pay `amount` to `to`, returning change to `change_address`
    ///
    /// Inputs are added largest first until they cover the amount and fee.
    /// Change below the dust threshold is left to the fee instead of
    /// creating an output.
    pub fn build_send(
        &self,
        to: &str,
        amount: u64,
        candidates: Vec<TxInput>,
        change_address: &AccountAddress,
        locktime: u32,
    ) -> WalletResult<BitcoinTransaction> {
        ensure_not_dust(amount)?;
        let target = self.output(TxOutputKind::Target, to, amount)?;
        let change_script = address_to_script_pubkey(&change_address.address, self.network)?;

        if candidates.is_empty() {
            return Err(WalletError::InsufficientFunds("no unspent outputs available".into()));
        }

        let dust = dust_threshold();
        let mut selected = Vec::new();
        let mut total = 0u64;

        for input in sorted_largest_first(candidates) {
            total = total
                .checked_add(input.utxo_value)
                .ok_or_else(|| WalletError::internal("input total out of range"))?;
            selected.push(input);

            let remainder = total.checked_sub(amount);

            let fee_with_change = self.fee_for(selected.len(), 2)?;
            if let Some(change) = remainder.and_then(|r| r.checked_sub(fee_with_change)) {
                if change >= dust {
                    let change_output = TxOutput {
                        kind: TxOutputKind::Change,
                        address: change_address.address.clone(),
                        script_pubkey: change_script,
                        amount: change,
                    };
                    return Ok(self.transaction(to, amount, false, locktime, selected, vec![target, change_output]));
                }
            }

            let fee_without_change = self.fee_for(selected.len(), 1)?;
            if remainder.map_or(false, |r| r >= fee_without_change) {
                return Ok(self.transaction(to, amount, false, locktime, selected, vec![target]));
            }
        }

        let fee = self.fee_for(selected.len(), 1)?;
        Err(WalletError::InsufficientFunds(format!(
            "Need {} sats (amount + fee), but only have {} sats",
            amount.saturating_add(fee),
            total
        )))
    }

    /// Spend every candidate to `to`, minus the fee
    pub fn build_send_max(&self, to: &str, candidates: Vec<TxInput>, locktime: u32) -> WalletResult<BitcoinTransaction> {
        if candidates.is_empty() {
            return Err(WalletError::InsufficientFunds("no unspent outputs available".into()));
        }

        let inputs = sorted_largest_first(candidates);
        let total = inputs
            .iter()
            .try_fold(0u64, |acc, i| acc.checked_add(i.utxo_value))
            .ok_or_else(|| WalletError::internal("input total out of range"))?;
        let fee = self.fee_for(inputs.len(), 1)?;

        let amount = total.checked_sub(fee).filter(|a| *a > 0).ok_or_else(|| {
            WalletError::InsufficientFunds(format!(
                "Balance ({} sats) is not enough to cover fee ({} sats)",
                total, fee
            ))
        })?;
        ensure_not_dust(amount)?;

        let target = self.output(TxOutputKind::Target, to, amount)?;
        Ok(self.transaction(to, amount, true, locktime, inputs, vec![target]))
    }

    fn fee_for(&self, num_inputs: usize, num_outputs: usize) -> WalletResult<u64> {
        apply_fee_rate(self.fee_rate, estimate_vbytes(num_inputs, num_outputs))
    }

    fn output(&self, kind: TxOutputKind, address: &str, amount: u64) -> WalletResult<TxOutput> {
        Ok(TxOutput {
            kind,
            address: address.to_string(),
            script_pubkey: address_to_script_pubkey(address, self.network)?,
            amount,
        })
    }

    fn transaction(
        &self,
        to: &str,
        amount: u64,
        sending_max_amount: bool,
        locktime: u32,
        inputs: Vec<TxInput>,
        outputs: Vec<TxOutput>,
    ) -> BitcoinTransaction {
        BitcoinTransaction {
            to: to.to_string(),
            amount,
            sending_max_amount,
            locktime,
            inputs,
            outputs,
        }
    }
}

fn sorted_largest_first(mut inputs: Vec<TxInput>) -> Vec<TxInput> {
    inputs.sort_by(|a, b| {
        b.utxo_value
            .cmp(&a.utxo_value)
            .then_with(|| a.utxo_outpoint.cmp(&b.utxo_outpoint))
    });
    inputs
}
