//! Wallet service end-to-end tests
//!
//! Runs `BitcoinWalletService` over real HTTP against the in-memory
//! esplora-mock server, with a deterministic BIP84 keyring.
//!
//! Run with: cargo test --test service_test -- --nocapture

mod common;

use bitcoin::absolute::LockTime;
use bitcoin::secp256k1::{ecdsa::Signature, Message, PublicKey, Secp256k1};
use bitcoin::transaction::{Transaction, TxIn, TxOut, Version};
use bitcoin::{Address, Amount};
use common::{init_logging, mock_config, test_config, HdKeyring, ScriptedHttpClient};
use esplora_mock::{spawn_server, MockChain, MockServer};
use esplora_wallet::{
    AccountId, AccountKind, BitcoinKeyring, BitcoinNetwork, BitcoinWalletService, DerivationKey, KeyChain,
    TxOutputKind, WalletError, BITCOIN_TESTNET,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

const TIP_HEIGHT: u64 = 2_500_000;
const FUNDING: u64 = 100_000;

struct TestWallet {
    server: MockServer,
    keyring: Arc<HdKeyring>,
    service: BitcoinWalletService,
    account: AccountId,
    funding_hex: String,
    funding_txid: String,
}

fn testnet_software(index: u32) -> AccountId {
    AccountId::new(BitcoinNetwork::Testnet, AccountKind::Software, index)
}

/// An address outside any account under test
fn foreign_address(keyring: &HdKeyring) -> String {
    keyring.address(&testnet_software(7), DerivationKey::receive(0))
}

/// One-output transaction paying `value` to `address`
fn funding_transaction(address: &str, value: u64) -> String {
    let script_pubkey = Address::from_str(address).unwrap().assume_checked().script_pubkey();
    let tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn::default()],
        output: vec![TxOut {
            value: Amount::from_sat(value),
            script_pubkey,
        }],
    };
    hex::encode(bitcoin::consensus::encode::serialize(&tx))
}

/// Wallet whose receive 0 address holds one confirmed output of [`FUNDING`]
async fn setup(account: AccountId) -> TestWallet {
    init_logging();
    let keyring = HdKeyring::new();
    keyring.add_account(account);
    let receive0 = keyring.address(&account, DerivationKey::receive(0));

    let mut chain = MockChain::new(TIP_HEIGHT);
    chain.set_fee_estimate(4, 5.0);
    chain.set_fee_estimate(1, 9.0);
    let funding_hex = funding_transaction(&receive0, FUNDING);
    let funding_txid = chain.add_transaction(&funding_hex, true).unwrap();
    chain.fund_address(&receive0, &funding_txid, 0, FUNDING);

    let server = spawn_server(chain.into_state()).await.unwrap();
    let service = BitcoinWalletService::new(mock_config(server.url()), Arc::clone(&keyring) as _).unwrap();

    TestWallet {
        server,
        keyring,
        service,
        account,
        funding_hex,
        funding_txid,
    }
}

async fn wait_until<F: Fn() -> bool>(condition: F) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

// ============================================================================
// Balances and UTXOs
// ============================================================================

#[tokio::test]
async fn test_balance_and_utxos_of_known_addresses() {
    let wallet = setup(testnet_software(0)).await;
    let receive0 = wallet.keyring.address(&wallet.account, DerivationKey::receive(0));

    let balance = wallet.service.get_balance(&wallet.account).await.unwrap();
    assert_eq!(balance.total_balance, FUNDING);
    assert_eq!(balance.available_balance, FUNDING);
    assert_eq!(balance.pending_balance, 0);
    assert_eq!(balance.balances.get(&receive0), Some(&FUNDING));

    let utxos = wallet.service.get_utxos(&wallet.account).await.unwrap();
    assert_eq!(utxos[&receive0].len(), 1);
    assert_eq!(utxos[&receive0][0].value, FUNDING);
    assert_eq!(utxos[&receive0][0].txid.to_string(), wallet.funding_txid);
    assert_eq!(utxos[&receive0][0].status.block_height, Some(TIP_HEIGHT as u32));

    assert_eq!(wallet.service.active_task_count(), 0);
}

#[tokio::test]
async fn test_unknown_account_is_internal_error() {
    let wallet = setup(testnet_software(0)).await;

    let err = wallet.service.get_balance(&testnet_software(9)).await.unwrap_err();
    assert!(matches!(err, WalletError::Internal(_)));
    assert!(wallet.server.state.lock().unwrap().requests.is_empty());
}

// ============================================================================
// Discovery
// ============================================================================

#[tokio::test]
async fn test_extended_key_discovery_matches_wallet_discovery() {
    let wallet = setup(testnet_software(0)).await;
    {
        let mut chain = wallet.server.state.lock().unwrap();
        let receive3 = wallet.keyring.address(&wallet.account, DerivationKey::receive(3));
        let change1 = wallet.keyring.address(&wallet.account, DerivationKey::change(1));
        chain.fund_address(&receive3, &"cd".repeat(32), 0, 20_000);
        chain.fund_address(&change1, &"ef".repeat(32), 1, 5_000);
    }

    let from_keyring = wallet.service.discover_wallet_account(&wallet.account).await.unwrap();
    assert_eq!(from_keyring.next_unused_receive_index, 4);
    assert_eq!(from_keyring.next_unused_change_index, 2);
    assert_eq!(from_keyring.balance.total_balance, FUNDING + 25_000);

    let xpub = wallet.keyring.account_xpub(&wallet.account);
    assert!(xpub.starts_with("tpub"));
    let from_xpub = wallet
        .service
        .discover_extended_key_account(BITCOIN_TESTNET, &xpub)
        .await
        .unwrap();
    assert_eq!(from_xpub, from_keyring);

    let balance = wallet
        .service
        .get_extended_key_account_balance(BITCOIN_TESTNET, &format!("wpkh([00000000/84'/1'/0']{}/0/*)", xpub))
        .await
        .unwrap();
    assert_eq!(balance.total_balance, FUNDING + 25_000);
}

#[tokio::test]
async fn test_extended_key_for_wrong_network_is_rejected() {
    let wallet = setup(testnet_software(0)).await;
    let xpub = wallet.keyring.account_xpub(&wallet.account);

    let err = wallet
        .service
        .discover_extended_key_account("bitcoin_mainnet", &xpub)
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InvalidArgument(_)));
}

#[tokio::test]
async fn test_run_discovery_records_next_unused_index() {
    let wallet = setup(testnet_software(0)).await;

    let found = wallet.service.run_discovery(&wallet.account, KeyChain::Receive).await.unwrap();
    assert_eq!(found.key, DerivationKey::receive(1));
    assert_eq!(wallet.keyring.next_indices(&wallet.account), Some((1, 0)));

    let change = wallet
        .service
        .discover_next_unused_address(&wallet.account, KeyChain::Change)
        .await
        .unwrap();
    assert_eq!(change.key, DerivationKey::change(0));
    assert_eq!(
        change.address,
        wallet.keyring.address(&wallet.account, DerivationKey::change(0))
    );
}

#[tokio::test]
async fn test_accounts_added_updates_keyring_in_background() {
    let wallet = setup(testnet_software(0)).await;
    let added = testnet_software(1);
    wallet.keyring.add_account(added);
    {
        let receive2 = wallet.keyring.address(&added, DerivationKey::receive(2));
        wallet
            .server
            .state
            .lock()
            .unwrap()
            .fund_address(&receive2, &"12".repeat(32), 0, 7_000);
    }

    wallet.service.accounts_added(&[added]);

    let keyring = Arc::clone(&wallet.keyring);
    assert!(wait_until(|| keyring.next_indices(&added) == Some((3, 0))).await);
    assert!(wait_until(|| wallet.service.active_task_count() == 0).await);
}

// ============================================================================
// Transactions
// ============================================================================

#[tokio::test]
async fn test_create_sign_and_post() {
    let wallet = setup(testnet_software(0)).await;
    let destination = foreign_address(&wallet.keyring);
    let change0 = wallet.keyring.address(&wallet.account, DerivationKey::change(0));

    let tx = wallet
        .service
        .create_transaction(&wallet.account, &destination, 30_000, false)
        .await
        .unwrap();

    // 1 input, 2 outputs at 5 sat/vB
    assert_eq!(tx.locktime, TIP_HEIGHT as u32);
    assert_eq!(tx.inputs.len(), 1);
    assert_eq!(tx.outputs.len(), 2);
    assert_eq!(tx.outputs[0].kind, TxOutputKind::Target);
    assert_eq!(tx.outputs[0].address, destination);
    assert_eq!(tx.outputs[0].amount, 30_000);
    let change = tx.change_output().unwrap();
    assert_eq!(change.address, change0);
    assert_eq!(change.amount, FUNDING - 30_000 - 730);
    assert_eq!(tx.effective_fee_amount(), 730);
    assert!(tx.inputs[0].raw_outpoint_tx.is_none());
    assert!(!tx.is_signed());

    let posted = wallet
        .service
        .sign_and_post_transaction(&wallet.account, tx)
        .await
        .unwrap();
    assert!(posted.transaction.is_signed());
    assert_eq!(posted.txid, posted.transaction.txid().to_string());

    // witness is [DER signature + SIGHASH_ALL, pubkey] and verifies
    let secp = Secp256k1::verification_only();
    let sighashes = posted.transaction.signature_hashes().unwrap();
    let witness = &posted.transaction.inputs[0].witness;
    let (sighash_type, der) = witness[0].split_last().unwrap();
    assert_eq!(*sighash_type, 0x01);
    secp.verify_ecdsa(
        &Message::from_digest(sighashes[0]),
        &Signature::from_der(der).unwrap(),
        &PublicKey::from_slice(&witness[1]).unwrap(),
    )
    .unwrap();

    {
        let chain = wallet.server.state.lock().unwrap();
        assert_eq!(chain.broadcasts, vec![hex::encode(posted.transaction.serialize())]);
    }

    let confirmed = wallet
        .service
        .get_transaction_status(BITCOIN_TESTNET, &posted.txid)
        .await
        .unwrap();
    assert!(!confirmed);
    assert_eq!(wallet.service.active_task_count(), 0);
}

#[tokio::test]
async fn test_post_rejected_with_http_500() {
    let wallet = setup(testnet_software(0)).await;
    let destination = foreign_address(&wallet.keyring);
    wallet.server.state.lock().unwrap().fail_path("/tx", 500);

    let tx = wallet
        .service
        .create_transaction(&wallet.account, &destination, 30_000, false)
        .await
        .unwrap();
    let err = wallet
        .service
        .sign_and_post_transaction(&wallet.account, tx)
        .await
        .unwrap_err();

    assert_eq!(err.to_string(), "unexpected HTTP result code 500");
    assert!(wallet.server.state.lock().unwrap().broadcasts.is_empty());
}

#[tokio::test]
async fn test_send_max_spends_everything() {
    let wallet = setup(testnet_software(0)).await;
    let destination = foreign_address(&wallet.keyring);

    let tx = wallet
        .service
        .create_transaction(&wallet.account, &destination, 0, true)
        .await
        .unwrap();

    assert!(tx.sending_max_amount);
    assert_eq!(tx.outputs.len(), 1);
    // 10 + 68 + 34 vbytes at 5 sat/vB
    assert_eq!(tx.outputs[0].amount, FUNDING - 560);
    assert!(tx.change_output().is_none());

    // no change address is looked up
    let requests = wallet.server.state.lock().unwrap().requests.clone();
    let change0 = wallet.keyring.address(&wallet.account, DerivationKey::change(0));
    assert!(!requests.contains(&format!("/address/{}", change0)));
}

#[tokio::test]
async fn test_rejected_transaction_requests() {
    let wallet = setup(testnet_software(0)).await;
    let destination = foreign_address(&wallet.keyring);
    let mainnet_destination = wallet
        .keyring
        .address(&AccountId::new(BitcoinNetwork::Mainnet, AccountKind::Software, 0), DerivationKey::receive(0));

    let dust = wallet
        .service
        .create_transaction(&wallet.account, &destination, 50, false)
        .await
        .unwrap_err();
    assert!(matches!(dust, WalletError::AmountTooSmall(_)));

    let wrong_network = wallet
        .service
        .create_transaction(&wallet.account, &mainnet_destination, 30_000, false)
        .await
        .unwrap_err();
    assert!(matches!(wrong_network, WalletError::InvalidArgument(_)));

    // argument checks happen before any request
    assert!(wallet.server.state.lock().unwrap().requests.is_empty());

    let too_much = wallet
        .service
        .create_transaction(&wallet.account, &destination, FUNDING, false)
        .await
        .unwrap_err();
    assert!(matches!(too_much, WalletError::InsufficientFunds(_)));
}

#[tokio::test]
async fn test_hardware_account_transaction() {
    let wallet = setup(AccountId::new(BitcoinNetwork::Testnet, AccountKind::Hardware, 0)).await;
    let destination = foreign_address(&wallet.keyring);

    let tx = wallet
        .service
        .create_transaction(&wallet.account, &destination, 40_000, false)
        .await
        .unwrap();
    assert_eq!(
        tx.inputs[0].raw_outpoint_tx,
        Some(hex::decode(&wallet.funding_hex).unwrap())
    );

    let sign_data = wallet.service.hardware_sign_data(&wallet.account, &tx).unwrap();
    assert_eq!(sign_data.inputs.len(), 1);
    assert_eq!(sign_data.inputs[0].tx_bytes, hex::decode(&wallet.funding_hex).unwrap());
    assert_eq!(sign_data.inputs[0].output_index, 0);
    assert_eq!(sign_data.inputs[0].associated_path, "84'/1'/0'/0/0");
    assert_eq!(sign_data.change_path.as_deref(), Some("84'/1'/0'/1/0"));
    assert_eq!(sign_data.lock_time, TIP_HEIGHT as u32);
    assert_eq!(sign_data.output_script, tx.serialize_outputs());
    // count byte, then 8-byte amount and 23-byte p2wpkh script per output
    assert_eq!(sign_data.output_script.len(), 1 + 2 * (8 + 23));

    let mut stripped = tx.clone();
    stripped.inputs[0].raw_outpoint_tx = None;
    let err = wallet.service.hardware_sign_data(&wallet.account, &stripped).unwrap_err();
    assert!(matches!(err, WalletError::Internal(_)));

    let err = wallet
        .service
        .post_hw_signed_transaction(&wallet.account, tx.clone(), vec![])
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InvalidArgument(_)));

    // the device signs the same digests the service would
    let witnesses: Vec<Vec<Vec<u8>>> = tx
        .signature_hashes()
        .unwrap()
        .iter()
        .zip(&tx.inputs)
        .map(|(sighash, _)| {
            let key = DerivationKey::receive(0);
            let mut signature = wallet.keyring.sign_digest(&wallet.account, &key, sighash).unwrap();
            signature.push(0x01);
            vec![signature, wallet.keyring.public_key_for(&wallet.account, &key).unwrap()]
        })
        .collect();

    let posted = wallet
        .service
        .post_hw_signed_transaction(&wallet.account, tx, witnesses)
        .await
        .unwrap();
    assert_eq!(wallet.server.state.lock().unwrap().broadcasts.len(), 1);

    let funding_confirmed = wallet
        .service
        .get_transaction_status(BITCOIN_TESTNET, &wallet.funding_txid)
        .await
        .unwrap();
    assert!(funding_confirmed);
    assert_ne!(posted.txid, wallet.funding_txid);
}

#[tokio::test]
async fn test_fetch_raw_transactions_through_service() -> anyhow::Result<()> {
    let wallet = setup(testnet_software(0)).await;
    let txid = bitcoin::Txid::from_str(&wallet.funding_txid)?;

    let raw = wallet
        .service
        .fetch_raw_transactions(BITCOIN_TESTNET, &[txid, txid])
        .await?;
    assert_eq!(raw.len(), 2);
    assert_eq!(raw[0], hex::decode(&wallet.funding_hex)?);
    assert_eq!(raw[0], raw[1]);

    let err = wallet
        .service
        .fetch_raw_transactions("dogecoin", &[txid])
        .await
        .unwrap_err();
    assert!(matches!(err, WalletError::InvalidArgument(_)));
    Ok(())
}

// ============================================================================
// Task lifetime
// ============================================================================

#[tokio::test]
async fn test_dropping_service_aborts_pending_tasks() {
    init_logging();
    let http = ScriptedHttpClient::new();
    http.set_default_delay(Duration::from_secs(5));
    let keyring = HdKeyring::new();
    let account = testnet_software(0);
    keyring.add_account(account);

    let service =
        BitcoinWalletService::with_http_client(test_config(5), Arc::clone(&keyring) as _, Arc::clone(&http) as _)
            .unwrap();

    let abandoned = tokio::time::timeout(Duration::from_millis(50), service.get_balance(&account)).await;
    assert!(abandoned.is_err());
    assert_eq!(service.active_task_count(), 1);
    assert!(http.in_flight() > 0);

    drop(service);
    assert!(wait_until(|| http.in_flight() == 0).await);
}

#[tokio::test]
async fn test_hardware_sign_data_requires_hardware_account() {
    let wallet = setup(testnet_software(0)).await;
    let destination = foreign_address(&wallet.keyring);

    let tx = wallet
        .service
        .create_transaction(&wallet.account, &destination, 40_000, false)
        .await
        .unwrap();
    assert!(tx.inputs.iter().all(|i| i.raw_outpoint_tx.is_none()));

    let err = wallet.service.hardware_sign_data(&wallet.account, &tx).unwrap_err();
    assert!(matches!(err, WalletError::Internal(_)));
}

#[tokio::test]
async fn test_account_info() {
    let wallet = setup(testnet_software(0)).await;

    let info = wallet.service.account_info(&wallet.account).unwrap();
    assert_eq!(info.next_receive_address.key, DerivationKey::receive(0));
    assert_eq!(
        info.next_change_address.address,
        wallet.keyring.address(&wallet.account, DerivationKey::change(0))
    );

    let err = wallet.service.account_info(&testnet_software(9)).unwrap_err();
    assert!(matches!(err, WalletError::Internal(_)));
}
