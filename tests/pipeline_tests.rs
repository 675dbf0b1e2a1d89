// End-to-end send attempts against a scripted wallet and gateway.

mod common;

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use coffee_wallet::{
    address_book::AddressBook,
    fee::{linear_fee, ChainTip},
    history::{HashOrigin, ModeTag, TxHistory, TxStatus},
    network::NetworkContext,
    storage::Store,
    submit::{AttemptState, ExecutionMode, PaymentService, SendRequest},
    utxo::InputReservations,
    PaymentError,
};
use common::*;

fn request(amount: &str) -> SendRequest {
    SendRequest { recipient: recipient(), amount_ada: amount.into() }
}

#[tokio::test]
async fn wallet_send_submits_balanced_transaction() {
    println!("🧪 Testing a full wallet-backed send...");
    let gateway = Arc::new(FakeGateway::new());
    let wallet = Arc::new(FakeWallet::new(0).with_outputs(&[10_000_000]));
    let svc = service(gateway.clone());
    let mode = ExecutionMode::WalletBacked(wallet.clone());

    let entry = svc.send(&mode, &request("1")).await.expect("send should succeed");

    let txs = gateway.submitted_txs();
    assert_eq!(txs.len(), 1);
    let draft = &txs[0].draft;
    assert_eq!(entry.hash, hex::encode(txs[0].tx_id()));
    assert_eq!(entry.hash_origin, HashOrigin::Gateway);
    assert_eq!(entry.status, TxStatus::Submitted);
    assert_eq!(entry.mode, ModeTag::Wallet);
    assert_eq!(entry.amount_ada, "1.000000");

    // Recipient first, change second, and value is conserved.
    assert_eq!(draft.outputs[0].value, 1_000_000);
    assert_eq!(draft.outputs[1].address, wallet.change);
    assert_eq!(draft.output_total().unwrap() + draft.fee, 10_000_000);
    assert_eq!(draft.ttl_slot, 70_000_000 + 3600);
    let expected_fee = linear_fee(&reference_params(), draft.unsigned_size()).unwrap() + 10_000;
    assert_eq!(draft.fee, expected_fee);
    assert!(draft.fee > 160_000 && draft.fee < 180_000, "fee was {}", draft.fee);

    let status = svc.status();
    assert_eq!(status.state, AttemptState::Recorded);
    assert_eq!(
        status.trail,
        vec![
            AttemptState::Refreshing,
            AttemptState::Building,
            AttemptState::AwaitingSignature,
            AttemptState::Submitting,
            AttemptState::Recorded,
        ]
    );
    assert_eq!(svc.history().latest().unwrap(), entry);
    assert!(!svc.is_sending());
    println!("  ✅ fee {} lovelace, hash {}", draft.fee, entry.hash);
}

#[tokio::test]
async fn balance_is_refreshed_after_submission() {
    let gateway = Arc::new(FakeGateway::new());
    let wallet = Arc::new(FakeWallet::new(0).with_outputs(&[10_000_000]));
    let svc = service(gateway);
    let mode = ExecutionMode::WalletBacked(wallet.clone());

    svc.send(&mode, &request("2.5")).await.unwrap();
    assert_eq!(svc.status().balance_lovelace, Some(10_000_000));

    wallet.set_balance(7_320_000);
    svc.settle_refresh().await;
    assert_eq!(svc.status().balance_lovelace, Some(7_320_000));
}

#[tokio::test]
async fn own_id_in_gateway_error_is_recorded_as_submitted() {
    let gateway = Arc::new(FakeGateway::new().respond(Err(PaymentError::Transport(
        "{\"error\":\"transaction {tx_id} is already known\"}".into(),
    ))));
    let wallet = Arc::new(FakeWallet::new(0).with_outputs(&[10_000_000]));
    let svc = service(gateway.clone());

    let entry = svc.send(&ExecutionMode::WalletBacked(wallet), &request("1")).await.unwrap();
    assert_eq!(entry.hash, hex::encode(gateway.submitted_txs()[0].tx_id()));
    assert_eq!(entry.hash_origin, HashOrigin::Recovered);
    assert!(entry.is_chain_hash());
    assert_eq!(entry.status, TxStatus::Submitted);
    assert_eq!(svc.status().state, AttemptState::Recorded);
    assert_eq!(svc.history().len(), 1);
}

#[tokio::test]
async fn foreign_hash_in_gateway_error_is_recorded_as_unverified() {
    // An input's transaction id quoted by a ledger rule failure.
    let input_id = "9f".repeat(32);
    let gateway = Arc::new(FakeGateway::new().respond(Err(PaymentError::Transport(format!(
        "{{\"error\":\"BadInputsUTxO (TxIn (TxId {{unTxId = {}}}) 0)\"}}",
        input_id
    )))));
    let wallet = Arc::new(FakeWallet::new(0).with_outputs(&[10_000_000]));
    let svc = service(gateway);

    let entry = svc.send(&ExecutionMode::WalletBacked(wallet), &request("1")).await.unwrap();
    assert_eq!(entry.hash, input_id);
    assert_eq!(entry.hash_origin, HashOrigin::Unverified);
    assert!(!entry.is_chain_hash());
    assert_eq!(entry.status, TxStatus::Submitted);
    assert!(entry.to_string().ends_with("(unverified)"));
}

#[tokio::test]
async fn duplicate_without_hash_is_not_recorded() {
    let gateway = Arc::new(
        FakeGateway::new().respond(Err(PaymentError::Transport("Transaction already submitted".into()))),
    );
    let wallet = Arc::new(FakeWallet::new(0).with_outputs(&[10_000_000]));
    let svc = service(gateway);

    let err = svc.send(&ExecutionMode::WalletBacked(wallet), &request("1")).await.unwrap_err();
    assert_eq!(err, PaymentError::DuplicateSubmission);
    assert!(svc.history().is_empty());

    let status = svc.status();
    assert_eq!(status.state, AttemptState::Failed);
    assert_eq!(status.error.as_deref(), Some(err.to_string().as_str()));
    // The outcome is unknown, so the inputs stay reserved.
    assert_eq!(svc.reserved_inputs(), 1);
}

#[tokio::test]
async fn rejected_submission_releases_inputs() {
    let gateway = Arc::new(
        FakeGateway::new().respond(Err(PaymentError::Transport("ValueNotConservedUTxO".into()))),
    );
    let wallet = Arc::new(FakeWallet::new(0).with_outputs(&[10_000_000]));
    let svc = service(gateway.clone());
    let mode = ExecutionMode::WalletBacked(wallet);

    let err = svc.send(&mode, &request("1")).await.unwrap_err();
    assert_eq!(err, PaymentError::Transport("ValueNotConservedUTxO".into()));
    assert_eq!(svc.reserved_inputs(), 0);
    assert!(svc.history().is_empty());

    // A fresh attempt may spend the same output again.
    svc.send(&mode, &request("1")).await.expect("retry should succeed");
    assert_eq!(gateway.submitted_txs().len(), 2);
}

#[tokio::test]
async fn empty_wallet_fails_before_building() {
    let gateway = Arc::new(FakeGateway::new());
    let wallet = Arc::new(FakeWallet::new(0));
    let svc = service(gateway.clone());

    let err = svc.send(&ExecutionMode::WalletBacked(wallet.clone()), &request("1")).await.unwrap_err();
    assert_eq!(err, PaymentError::NoFunds);
    assert_eq!(wallet.sign_calls.load(Ordering::SeqCst), 0);
    assert!(gateway.submitted.lock().unwrap().is_empty());
    assert_eq!(
        svc.status().trail,
        vec![AttemptState::Refreshing, AttemptState::Building, AttemptState::Failed]
    );
}

#[tokio::test]
async fn asset_bearing_outputs_are_not_spent() {
    let gateway = Arc::new(FakeGateway::new());
    let wallet = Arc::new(FakeWallet::new(0));
    wallet.set_utxos(vec![asset_utxo_bytes(0x40, 0, &wallet.change, 50_000_000)]);
    let svc = service(gateway);

    let err = svc.send(&ExecutionMode::WalletBacked(wallet), &request("1")).await.unwrap_err();
    assert_eq!(err, PaymentError::NoFunds);
}

#[tokio::test]
async fn production_wallet_is_refused_before_any_work() {
    let gateway = Arc::new(FakeGateway::new());
    let wallet = Arc::new(FakeWallet::new(1).with_outputs(&[10_000_000]));
    let svc = service(gateway.clone());

    let err = svc.send(&ExecutionMode::WalletBacked(wallet.clone()), &request("1")).await.unwrap_err();
    assert_eq!(err, PaymentError::UnsupportedNetwork(NetworkContext::Mainnet));
    assert_eq!(wallet.utxo_calls.load(Ordering::SeqCst), 0);
    assert!(gateway.submitted.lock().unwrap().is_empty());
    assert_eq!(svc.status().trail, vec![AttemptState::Refreshing, AttemptState::Failed]);
}

#[tokio::test]
async fn selection_mismatch_is_reported() {
    let gateway = Arc::new(FakeGateway::new());
    let wallet = Arc::new(FakeWallet::new(0).with_outputs(&[10_000_000]));
    let mut settings = settings();
    settings.selected = NetworkContext::Preview;
    let svc = PaymentService::new(gateway, Arc::new(TxHistory::in_memory()), settings);

    let err = svc.send(&ExecutionMode::WalletBacked(wallet), &request("1")).await.unwrap_err();
    assert_eq!(
        err,
        PaymentError::NetworkMismatch { wallet: NetworkContext::Preprod, selected: NetworkContext::Preview }
    );
    assert_eq!(svc.status().message, "Switch the wallet network, then try again");
}

#[tokio::test]
async fn insufficient_funds_is_reported_with_amounts() {
    let gateway = Arc::new(FakeGateway::new());
    let wallet = Arc::new(FakeWallet::new(0).with_outputs(&[1_100_000]));
    let svc = service(gateway);

    let err = svc.send(&ExecutionMode::WalletBacked(wallet.clone()), &request("1")).await.unwrap_err();
    assert_eq!(err, PaymentError::InsufficientFunds { required: 1_200_000, available: 1_100_000 });
    assert_eq!(wallet.sign_calls.load(Ordering::SeqCst), 0);
    assert_eq!(svc.reserved_inputs(), 0);
}

#[tokio::test]
async fn missing_tip_builds_without_ttl() {
    let gateway = Arc::new(FakeGateway::new().without_tip());
    let wallet = Arc::new(FakeWallet::new(0).with_outputs(&[10_000_000]));
    let svc = service(gateway.clone());

    svc.send(&ExecutionMode::WalletBacked(wallet), &request("1")).await.unwrap();
    assert_eq!(gateway.submitted_txs()[0].draft.ttl_slot, 0);
}

#[tokio::test]
async fn recorded_inputs_are_not_reused_until_wallet_drops_them() {
    let gateway = Arc::new(FakeGateway::new());
    let wallet = Arc::new(FakeWallet::new(0).with_outputs(&[10_000_000]));
    let svc = service(gateway.clone());
    let mode = ExecutionMode::WalletBacked(wallet.clone());

    svc.send(&mode, &request("1")).await.unwrap();
    assert_eq!(svc.reserved_inputs(), 1);

    // Wallet has not caught up: the only output is still in flight.
    let err = svc.send(&mode, &request("1")).await.unwrap_err();
    assert_eq!(err, PaymentError::NoFunds);

    // Wallet now reports the change output instead.
    wallet.set_utxos(vec![utxo_bytes(0x77, 1, &wallet.change, 8_800_000)]);
    svc.send(&mode, &request("1")).await.unwrap();
    let txs = gateway.submitted_txs();
    assert_eq!(txs.len(), 2);
    assert_eq!(txs[1].draft.inputs[0].tx_id, [0x77; 32]);
    assert_eq!(svc.reserved_inputs(), 1);
}

#[tokio::test]
async fn concurrent_attempt_is_rejected() {
    let gateway = Arc::new(FakeGateway::new());
    let mut wallet = FakeWallet::new(0).with_outputs(&[10_000_000, 5_000_000]);
    wallet.sign_delay = Some(Duration::from_millis(100));
    let wallet = Arc::new(wallet);
    let svc = service(gateway.clone());
    let mode = ExecutionMode::WalletBacked(wallet);

    let first_request = request("1");
    let (first, second) = tokio::join!(svc.send(&mode, &first_request), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        svc.send(&mode, &request("1")).await
    });
    assert!(first.is_ok());
    assert_eq!(second.unwrap_err(), PaymentError::AttemptInProgress);
    assert_eq!(gateway.submitted_txs().len(), 1);
    assert!(!svc.is_sending());
}

#[tokio::test]
async fn mock_mode_records_simulated_entry() {
    let gateway = Arc::new(FakeGateway::new());
    let svc = service(gateway.clone());

    let entry = svc.send(&ExecutionMode::Mock, &request("3.25")).await.unwrap();
    assert_eq!(entry.status, TxStatus::Simulated);
    assert_eq!(entry.mode, ModeTag::Mock);
    assert!(entry.hash.starts_with("mock-"));
    assert!(!entry.is_chain_hash());
    assert_eq!(entry.amount_ada, "3.250000");
    assert!(gateway.submitted.lock().unwrap().is_empty());

    let other = svc.send(&ExecutionMode::Mock, &request("3.25")).await.unwrap();
    assert_ne!(entry.id, other.id);
    assert_eq!(svc.history().entries()[0], other);
}

#[tokio::test]
async fn invalid_requests_fail_validation() {
    let svc = service(Arc::new(FakeGateway::new()));

    let err = svc.send(&ExecutionMode::Mock, &request("0")).await.unwrap_err();
    assert!(matches!(err, PaymentError::InvalidAmount(_)));
    assert_eq!(svc.status().trail, vec![AttemptState::Failed]);

    let err = svc.send(&ExecutionMode::Mock, &request("1.0000001")).await.unwrap_err();
    assert!(matches!(err, PaymentError::InvalidAmount(_)));

    let prod = SendRequest { recipient: mainnet_addr(0x22).to_bech32().unwrap(), amount_ada: "1".into() };
    let err = svc.send(&ExecutionMode::Mock, &prod).await.unwrap_err();
    assert!(matches!(err, PaymentError::InvalidAddress(_)));

    let junk = SendRequest { recipient: "addr_test1notreally".into(), amount_ada: "1".into() };
    assert!(matches!(svc.send(&ExecutionMode::Mock, &junk).await, Err(PaymentError::InvalidAddress(_))));
    assert!(svc.history().is_empty());
}

#[tokio::test]
async fn submitted_history_survives_restart() {
    let tmp = tempfile::tempdir().expect("Failed to create temp dir");
    let path = tmp.path().join("history_db");
    let path = path.to_str().unwrap();
    let hash;
    {
        let store = Arc::new(Store::open(path).expect("Failed to open store"));
        let history = Arc::new(TxHistory::open(store).unwrap());
        let svc = PaymentService::new(Arc::new(FakeGateway::new()), history, settings());
        let wallet = Arc::new(FakeWallet::new(0).with_outputs(&[10_000_000]));
        hash = svc.send(&ExecutionMode::WalletBacked(wallet), &request("1")).await.unwrap().hash;
        svc.send(&ExecutionMode::Mock, &request("2")).await.unwrap();
    }
    let store = Arc::new(Store::open(path).expect("Failed to reopen store"));
    let history = TxHistory::open(store).unwrap();
    let entries = history.entries();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[0].mode, ModeTag::Mock);
    assert_eq!(entries[1].hash, hash);
}

#[tokio::test]
async fn submitted_inputs_stay_reserved_across_restart() {
    let tmp = tempfile::tempdir().expect("Failed to create temp dir");
    let path = tmp.path().join("wallet_db");
    let path = path.to_str().unwrap();
    let open_service = |gateway: Arc<FakeGateway>| {
        let store = Arc::new(Store::open(path).expect("Failed to open store"));
        let history = Arc::new(TxHistory::open(store.clone()).unwrap());
        let reservations = InputReservations::open(store).unwrap();
        PaymentService::new(gateway, history, settings()).with_reservations(reservations)
    };
    let wallet = Arc::new(FakeWallet::new(0).with_outputs(&[10_000_000]));
    let mode = ExecutionMode::WalletBacked(wallet.clone());

    {
        let svc = open_service(Arc::new(FakeGateway::new()));
        svc.send(&mode, &request("1")).await.unwrap();
        assert_eq!(svc.reserved_inputs(), 1);
    }

    // The wallet still reports the spent output; the next run must not reuse it.
    let gateway = Arc::new(FakeGateway::new());
    {
        let svc = open_service(gateway.clone());
        assert_eq!(svc.reserved_inputs(), 1);
        let err = svc.send(&mode, &request("1")).await.unwrap_err();
        assert_eq!(err, PaymentError::NoFunds);
        assert!(gateway.submitted.lock().unwrap().is_empty());
        assert_eq!(wallet.sign_calls.load(Ordering::SeqCst), 1);

        // Once the wallet catches up the reservation is dropped for good.
        wallet.set_utxos(vec![utxo_bytes(0x77, 1, &wallet.change, 8_800_000)]);
        svc.send(&mode, &request("1")).await.unwrap();
    }

    let svc = open_service(Arc::new(FakeGateway::new()));
    assert_eq!(svc.reserved_inputs(), 1);
    assert_eq!(svc.history().len(), 2);
}

#[tokio::test]
async fn saved_label_resolves_on_selected_network() {
    let gateway = Arc::new(FakeGateway::new());
    let wallet = Arc::new(FakeWallet::new(0).with_outputs(&[10_000_000]));
    let mut book = AddressBook::new();
    book.insert(NetworkContext::Preprod, "Coffee shop", test_addr(0x22)).unwrap();
    book.insert(NetworkContext::Preview, "Roaster", test_addr(0x44)).unwrap();
    let svc = service(gateway.clone()).with_address_book(book);
    let mode = ExecutionMode::WalletBacked(wallet);

    let by_label = SendRequest { recipient: "coffee SHOP".into(), amount_ada: "1".into() };
    let entry = svc.send(&mode, &by_label).await.unwrap();
    assert_eq!(entry.recipient, recipient());
    assert_eq!(gateway.submitted_txs()[0].draft.outputs[0].address, test_addr(0x22));

    let other_network = SendRequest { recipient: "Roaster".into(), amount_ada: "1".into() };
    let err = svc.send(&ExecutionMode::Mock, &other_network).await.unwrap_err();
    assert!(matches!(err, PaymentError::InvalidAddress(_)));
    assert_eq!(svc.history().len(), 1);
}

#[tokio::test]
async fn truncated_hex_recipient_is_rejected() {
    let gateway = Arc::new(FakeGateway::new());
    let wallet = Arc::new(FakeWallet::new(0).with_outputs(&[10_000_000]));
    let svc = service(gateway.clone());
    let mode = ExecutionMode::WalletBacked(wallet.clone());

    let full = hex::encode(test_addr(0x22).as_bytes());
    for recipient in ["60".to_string(), full[..20].to_string()] {
        let req = SendRequest { recipient, amount_ada: "1".into() };
        let err = svc.send(&mode, &req).await.unwrap_err();
        assert!(matches!(err, PaymentError::InvalidAddress(_)), "{:?}", err);
    }
    assert_eq!(wallet.utxo_calls.load(Ordering::SeqCst), 0);
    assert!(gateway.submitted.lock().unwrap().is_empty());
}

#[tokio::test]
async fn tip_near_slot_limit_overflows() {
    let mut gateway = FakeGateway::new();
    gateway.tip = Some(ChainTip { slot: u64::MAX - 10 });
    let wallet = Arc::new(FakeWallet::new(0).with_outputs(&[10_000_000]));
    let svc = service(Arc::new(gateway));

    let err = svc.send(&ExecutionMode::WalletBacked(wallet), &request("1")).await.unwrap_err();
    assert!(matches!(err, PaymentError::Overflow(_)));
    assert_eq!(svc.reserved_inputs(), 0);
}
