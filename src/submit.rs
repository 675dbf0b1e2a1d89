//! Send pipeline and submission tracking.
//!
//! One attempt walks `Idle -> Refreshing -> Building -> AwaitingSignature ->
//! Submitting -> {Recorded, Failed}`. Nothing here retries: a failed attempt
//! is reported and a new one must be started by the caller.

use chrono::Utc;
use rand::RngCore;
use regex::Regex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::address::Address;
use crate::address_book::AddressBook;
use crate::amount::{format_ada, parse_ada};
use crate::config::Config;
use crate::error::{PaymentError, Result};
use crate::fee::{compute_fee, FeePolicy};
use crate::gateway::LedgerGateway;
use crate::history::{HashOrigin, ModeTag, TxHistory, TxHistoryEntry, TxStatus};
use crate::network::{resolve_wallet, NetworkContext};
use crate::tx::{assemble_with_ttl, ttl_for, unsigned_hex, SignedTransaction};
use crate::utxo::{aggregate, InputReservations, OutputRef};
use crate::wallet::{decode_balance, funding_address, spendable_outputs, WalletCapability};

/// How a send is carried out.
#[derive(Clone)]
pub enum ExecutionMode {
    /// No wallet: record a simulated entry, move no funds.
    Mock,
    WalletBacked(Arc<dyn WalletCapability>),
}

impl ExecutionMode {
    pub fn tag(&self) -> ModeTag {
        match self {
            ExecutionMode::Mock => ModeTag::Mock,
            ExecutionMode::WalletBacked(_) => ModeTag::Wallet,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttemptState {
    Idle,
    Refreshing,
    Building,
    AwaitingSignature,
    Submitting,
    Recorded,
    Failed,
}

/// What a user would see: the current stage, a message, the last error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusView {
    pub state: AttemptState,
    pub message: String,
    pub error: Option<String>,
    pub balance_lovelace: Option<u64>,
    pub network: Option<NetworkContext>,
    /// States entered by the most recent attempt, in order.
    pub trail: Vec<AttemptState>,
}

#[derive(Debug)]
pub struct StatusBoard {
    view: Mutex<StatusView>,
}

impl Default for StatusBoard {
    fn default() -> Self {
        StatusBoard {
            view: Mutex::new(StatusView {
                state: AttemptState::Idle,
                message: String::new(),
                error: None,
                balance_lovelace: None,
                network: None,
                trail: Vec::new(),
            }),
        }
    }
}

impl StatusBoard {
    pub fn new() -> Self {
        Self::default()
    }

    fn begin(&self) {
        let mut v = self.view.lock().unwrap();
        v.state = AttemptState::Idle;
        v.error = None;
        v.message.clear();
        v.trail.clear();
    }

    fn enter(&self, state: AttemptState, message: impl Into<String>) {
        let message = message.into();
        info!(?state, "{}", message);
        let mut v = self.view.lock().unwrap();
        v.state = state;
        v.message = message;
        v.trail.push(state);
    }

    fn fail(&self, e: &PaymentError) {
        error!(error = %e, retryable = e.is_retryable(), "send attempt failed");
        let mut v = self.view.lock().unwrap();
        v.state = AttemptState::Failed;
        v.error = Some(e.to_string());
        v.message = match e {
            PaymentError::DuplicateSubmission => "Already submitted, waiting for confirmation".into(),
            PaymentError::NetworkMismatch { .. } | PaymentError::UnsupportedNetwork(_) => {
                "Switch the wallet network, then try again".into()
            }
            _ => "Transaction failed".into(),
        };
        v.trail.push(AttemptState::Failed);
    }

    pub fn set_balance(&self, lovelace: u64) {
        self.view.lock().unwrap().balance_lovelace = Some(lovelace);
    }

    pub fn set_network(&self, network: NetworkContext) {
        self.view.lock().unwrap().network = Some(network);
    }

    pub fn snapshot(&self) -> StatusView {
        self.view.lock().unwrap().clone()
    }
}

/// Outcome of inspecting a gateway submission error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitErrorClass {
    /// The error body names a transaction hash; the ledger has it.
    Accepted(String),
    Duplicate,
    Fatal,
}

/// Compatibility shim for gateways that report errors for transactions they
/// already accepted. A structured duplicate signal from the gateway would
/// make this unnecessary.
#[derive(Debug, Clone)]
pub struct SubmitErrorClassifier {
    hash: Regex,
}

const DUPLICATE_MARKERS: [&str; 5] = [
    "duplicate",
    "already submitted",
    "already been submitted",
    "already exists",
    "already in the mempool",
];

impl Default for SubmitErrorClassifier {
    fn default() -> Self {
        SubmitErrorClassifier {
            hash: Regex::new(r"\b[0-9a-fA-F]{64}\b").expect("static hash pattern"),
        }
    }
}

impl SubmitErrorClassifier {
    pub fn classify(&self, message: &str) -> SubmitErrorClass {
        if let Some(m) = self.hash.find(message) {
            return SubmitErrorClass::Accepted(m.as_str().to_ascii_lowercase());
        }
        let lower = message.to_ascii_lowercase();
        if DUPLICATE_MARKERS.iter().any(|marker| lower.contains(marker)) {
            return SubmitErrorClass::Duplicate;
        }
        SubmitErrorClass::Fatal
    }
}

/// Everything an attempt reads from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineSettings {
    pub selected: NetworkContext,
    pub wallet_testnet: NetworkContext,
    pub fee_policy: FeePolicy,
    pub ttl_horizon_slots: u64,
    pub max_inputs: usize,
    pub partial_sign: bool,
    pub refresh_delay: Duration,
}

impl PipelineSettings {
    pub fn from_config(cfg: &Config) -> Self {
        PipelineSettings {
            selected: cfg.network.selected,
            wallet_testnet: cfg.network.wallet_testnet,
            fee_policy: cfg.pipeline.fee_policy(),
            ttl_horizon_slots: cfg.pipeline.ttl_horizon_slots,
            max_inputs: cfg.pipeline.max_inputs,
            partial_sign: cfg.wallet.partial_sign,
            refresh_delay: Duration::from_millis(cfg.pipeline.refresh_delay_ms),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    pub recipient: String,
    pub amount_ada: String,
}

/// Clears the in-flight flag when the attempt ends, including when the
/// attempt future is dropped mid-way.
struct SendingGuard<'a>(&'a AtomicBool);

impl<'a> SendingGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Result<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| PaymentError::AttemptInProgress)?;
        Ok(SendingGuard(flag))
    }
}

impl Drop for SendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Holds an attempt's inputs reserved; releases them on drop unless kept.
struct ReservationGuard<'a> {
    reservations: &'a InputReservations,
    refs: Vec<OutputRef>,
    keep: bool,
}

impl<'a> ReservationGuard<'a> {
    fn new(reservations: &'a InputReservations, refs: Vec<OutputRef>) -> Result<Self> {
        reservations.reserve(&refs)?;
        Ok(ReservationGuard { reservations, refs, keep: false })
    }

    fn keep(&mut self) {
        self.keep = true;
    }
}

impl Drop for ReservationGuard<'_> {
    fn drop(&mut self) {
        if !self.keep {
            self.reservations.release(&self.refs);
        }
    }
}

/// Wallet state read during `Refreshing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WalletSnapshot {
    pub network: NetworkContext,
    pub balance_lovelace: u64,
}

/// The payment pipeline, built once per session and shared by reference.
pub struct PaymentService {
    gateway: Arc<dyn LedgerGateway>,
    history: Arc<TxHistory>,
    board: Arc<StatusBoard>,
    reservations: InputReservations,
    address_book: AddressBook,
    sending: AtomicBool,
    classifier: SubmitErrorClassifier,
    settings: PipelineSettings,
    pending_refresh: Mutex<Option<JoinHandle<()>>>,
}

impl PaymentService {
    pub fn new(gateway: Arc<dyn LedgerGateway>, history: Arc<TxHistory>, settings: PipelineSettings) -> Self {
        PaymentService {
            gateway,
            history,
            board: Arc::new(StatusBoard::new()),
            reservations: InputReservations::new(),
            address_book: AddressBook::new(),
            sending: AtomicBool::new(false),
            classifier: SubmitErrorClassifier::default(),
            settings,
            pending_refresh: Mutex::new(None),
        }
    }

    /// Use `reservations` instead of a set private to this service, e.g. one
    /// backed by the store so it carries over to the next run.
    pub fn with_reservations(mut self, reservations: InputReservations) -> Self {
        self.reservations = reservations;
        self
    }

    pub fn with_address_book(mut self, book: AddressBook) -> Self {
        self.address_book = book;
        self
    }

    pub fn address_book(&self) -> &AddressBook {
        &self.address_book
    }

    pub fn status(&self) -> StatusView {
        self.board.snapshot()
    }

    pub fn history(&self) -> &TxHistory {
        &self.history
    }

    pub fn settings(&self) -> &PipelineSettings {
        &self.settings
    }

    pub fn is_sending(&self) -> bool {
        self.sending.load(Ordering::Acquire)
    }

    pub fn reserved_inputs(&self) -> usize {
        self.reservations.len()
    }

    /// Waits for the post-submission balance refresh, if one is scheduled.
    pub async fn settle_refresh(&self) {
        let handle = self.pending_refresh.lock().unwrap().take();
        if let Some(h) = handle {
            let _ = h.await;
        }
    }

    /// Resolve the wallet's network and read its balance.
    pub async fn refresh(&self, wallet: &dyn WalletCapability) -> Result<WalletSnapshot> {
        let network = resolve_wallet(wallet, self.settings.selected, self.settings.wallet_testnet).await?;
        self.board.set_network(network);
        let balance_lovelace = decode_balance(&wallet.get_balance().await?)?;
        self.board.set_balance(balance_lovelace);
        Ok(WalletSnapshot { network, balance_lovelace })
    }

    /// Run one send attempt. Only one attempt may be in flight at a time.
    pub async fn send(&self, mode: &ExecutionMode, request: &SendRequest) -> Result<TxHistoryEntry> {
        let _guard = SendingGuard::acquire(&self.sending)?;
        self.board.begin();
        match self.run(mode, request).await {
            Ok(entry) => Ok(entry),
            Err(e) => {
                self.board.fail(&e);
                Err(e)
            }
        }
    }

    fn validate(&self, request: &SendRequest) -> Result<(Address, u64)> {
        let amount = parse_ada(&request.amount_ada)?;
        let recipient = self.address_book.resolve_recipient(&request.recipient, self.settings.selected)?;
        let recipient = Address::parse(&recipient)?;
        if recipient.hrp().map_or(true, |hrp| hrp.starts_with("stake")) {
            return Err(PaymentError::InvalidAddress("recipient must be a payment address".into()));
        }
        let expected_tag = if self.settings.selected.is_testnet() { 0 } else { 1 };
        if recipient.network_tag() != expected_tag {
            return Err(PaymentError::InvalidAddress(format!(
                "recipient is not a {} address",
                self.settings.selected
            )));
        }
        Ok((recipient, amount))
    }

    async fn run(&self, mode: &ExecutionMode, request: &SendRequest) -> Result<TxHistoryEntry> {
        let (recipient, amount) = self.validate(request)?;
        match mode {
            ExecutionMode::Mock => self.simulate(&recipient, amount),
            ExecutionMode::WalletBacked(wallet) => self.submit_with_wallet(wallet, &recipient, amount).await,
        }
    }

    fn simulate(&self, recipient: &Address, amount: u64) -> Result<TxHistoryEntry> {
        let timestamp = Utc::now();
        let mut nonce = [0u8; 16];
        rand::thread_rng().fill_bytes(&mut nonce);
        let mut hasher = blake3::Hasher::new();
        hasher.update(recipient.as_bytes());
        hasher.update(&amount.to_le_bytes());
        hasher.update(&timestamp.timestamp_millis().to_le_bytes());
        hasher.update(&nonce);
        let id = format!("mock-{}", &hasher.finalize().to_hex()[..32]);

        let entry = TxHistoryEntry {
            id: id.clone(),
            recipient: recipient.to_string(),
            amount_ada: format_ada(amount),
            timestamp,
            status: TxStatus::Simulated,
            hash: id,
            mode: ModeTag::Mock,
            hash_origin: HashOrigin::Local,
        };
        self.history.record(entry.clone())?;
        self.board.enter(AttemptState::Recorded, "Simulated transaction recorded");
        Ok(entry)
    }

    async fn submit_with_wallet(
        &self,
        wallet: &Arc<dyn WalletCapability>,
        recipient: &Address,
        amount: u64,
    ) -> Result<TxHistoryEntry> {
        let settings = &self.settings;

        self.board.enter(AttemptState::Refreshing, "Refreshing wallet state");
        let snapshot = self.refresh(wallet.as_ref()).await?;
        let network = snapshot.network;

        self.board.enter(AttemptState::Building, "Building transaction");
        let change_address = funding_address(wallet.as_ref()).await?;
        let available = self
            .reservations
            .filter_available(spendable_outputs(wallet.as_ref(), settings.max_inputs).await?);
        let inputs = aggregate(available, settings.max_inputs)?;
        let mut reservation = ReservationGuard::new(&self.reservations, inputs.refs())?;

        let ledger = self.gateway.snapshot(network).await?;
        let ttl_slot = ttl_for(ledger.tip, settings.ttl_horizon_slots)?;
        let build = |change: u64, fee: u64| {
            assemble_with_ttl(&inputs, recipient, amount, &change_address, change, fee, ttl_slot)
        };
        let quote = compute_fee(inputs.total, amount, &ledger.params, settings.fee_policy, &build)?;
        let draft = build(quote.change, quote.fee)?;
        info!(
            inputs = draft.inputs.len(),
            total = inputs.total,
            fee = quote.fee,
            change = quote.change,
            ttl = draft.ttl_slot,
            "draft built"
        );

        self.board.enter(AttemptState::AwaitingSignature, "Waiting for wallet signature");
        let witness_set = wallet.sign_tx(&unsigned_hex(&draft), settings.partial_sign).await?;
        let signed = SignedTransaction::new(draft, witness_set)?;

        self.board.enter(AttemptState::Submitting, "Submitting transaction");
        let (hash, origin) = match self.gateway.submit_transaction(&signed.to_hex(), network).await {
            Ok(Some(hash)) => (hash, HashOrigin::Gateway),
            Ok(None) => {
                warn!("gateway accepted the transaction without a hash, using local id");
                (hex::encode(signed.tx_id()), HashOrigin::Local)
            }
            Err(e) => match self.classifier.classify(&e.to_string()) {
                SubmitErrorClass::Accepted(hash) => {
                    warn!(%hash, error = %e, "gateway error names a transaction hash, treating as submitted");
                    if hash == hex::encode(signed.tx_id()) {
                        (hash, HashOrigin::Recovered)
                    } else {
                        warn!(%hash, "hash in gateway error is not this transaction's id");
                        (hash, HashOrigin::Unverified)
                    }
                }
                SubmitErrorClass::Duplicate => {
                    // Outcome unknown: the inputs may be spent, keep them reserved.
                    reservation.keep();
                    return Err(PaymentError::DuplicateSubmission);
                }
                SubmitErrorClass::Fatal => return Err(e),
            },
        };

        let entry = TxHistoryEntry {
            id: hash.clone(),
            recipient: recipient.to_string(),
            amount_ada: format_ada(amount),
            timestamp: Utc::now(),
            status: TxStatus::Submitted,
            hash,
            mode: ModeTag::Wallet,
            hash_origin: origin,
        };
        self.history.record(entry.clone())?;
        reservation.keep();
        self.board.enter(AttemptState::Recorded, format!("Submitted {}", entry.hash));
        self.schedule_refresh(wallet.clone());
        Ok(entry)
    }

    /// Fire-and-forget balance refresh after a recorded submission.
    fn schedule_refresh(&self, wallet: Arc<dyn WalletCapability>) {
        let board = self.board.clone();
        let delay = self.settings.refresh_delay;
        let handle = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            match wallet.get_balance().await.and_then(|raw| decode_balance(&raw)) {
                Ok(lovelace) => {
                    info!(balance = %format_ada(lovelace), "balance refreshed");
                    board.set_balance(lovelace);
                }
                Err(e) => warn!(error = %e, "post-submit balance refresh failed"),
            }
        });
        *self.pending_refresh.lock().unwrap() = Some(handle);
    }
}
