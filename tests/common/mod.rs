// Shared fakes for the pipeline tests: a scripted wallet and gateway.
#![allow(dead_code)]

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use coffee_wallet::{
    cbor::Encoder,
    fee::{ChainTip, FeePolicy, ProtocolParameters},
    gateway::{AddressBalance, LedgerGateway},
    history::TxHistory,
    network::NetworkContext,
    submit::{PaymentService, PipelineSettings},
    tx::SignedTransaction,
    wallet::WalletCapability,
    Address, PaymentError, Result,
};

pub fn test_addr(fill: u8) -> Address {
    let mut bytes = vec![0x60];
    bytes.extend_from_slice(&[fill; 28]);
    Address::from_bytes(bytes).expect("enterprise address")
}

pub fn mainnet_addr(fill: u8) -> Address {
    let mut bytes = vec![0x61];
    bytes.extend_from_slice(&[fill; 28]);
    Address::from_bytes(bytes).expect("enterprise address")
}

pub fn recipient() -> String {
    test_addr(0x22).to_bech32().expect("bech32")
}

pub fn utxo_bytes(tx_byte: u8, index: u64, owner: &Address, value: u64) -> Vec<u8> {
    let mut e = Encoder::new();
    e.array(2)
        .array(2)
        .bytes(&[tx_byte; 32])
        .u64(index)
        .array(2)
        .bytes(owner.as_bytes())
        .u64(value);
    e.into_bytes()
}

pub fn asset_utxo_bytes(tx_byte: u8, index: u64, owner: &Address, value: u64) -> Vec<u8> {
    let mut e = Encoder::new();
    e.array(2)
        .array(2)
        .bytes(&[tx_byte; 32])
        .u64(index)
        .array(2)
        .bytes(owner.as_bytes())
        .array(2)
        .u64(value)
        .map(1)
        .bytes(&[0xab; 28])
        .map(1)
        .bytes(b"COFFEE")
        .u64(1);
    e.into_bytes()
}

fn coin_bytes(v: u64) -> Vec<u8> {
    let mut e = Encoder::new();
    e.u64(v);
    e.into_bytes()
}

fn witness_set() -> Vec<u8> {
    let mut e = Encoder::new();
    e.map(1).u64(0).array(1).array(2).bytes(&[0x01; 32]).bytes(&[0x02; 64]);
    e.into_bytes()
}

pub struct FakeWallet {
    pub network_id: u8,
    /// Simulates a wallet that will not report its network id.
    pub refuse_network_id: bool,
    pub change: Address,
    utxos: Mutex<Vec<Vec<u8>>>,
    balance: Mutex<u64>,
    pub sign_delay: Option<Duration>,
    pub utxo_calls: AtomicUsize,
    pub sign_calls: AtomicUsize,
}

impl FakeWallet {
    pub fn new(network_id: u8) -> Self {
        FakeWallet {
            network_id,
            refuse_network_id: false,
            change: test_addr(0x11),
            utxos: Mutex::new(Vec::new()),
            balance: Mutex::new(0),
            sign_delay: None,
            utxo_calls: AtomicUsize::new(0),
            sign_calls: AtomicUsize::new(0),
        }
    }

    /// One plain ada output per value, all at distinct references.
    pub fn with_outputs(self, values: &[u64]) -> Self {
        let owner = self.change.clone();
        let raw = values
            .iter()
            .enumerate()
            .map(|(i, v)| utxo_bytes(0x30 + i as u8, 0, &owner, *v))
            .collect();
        self.set_utxos(raw);
        self.set_balance(values.iter().sum());
        self
    }

    pub fn set_utxos(&self, raw: Vec<Vec<u8>>) {
        *self.utxos.lock().unwrap() = raw;
    }

    pub fn set_balance(&self, lovelace: u64) {
        *self.balance.lock().unwrap() = lovelace;
    }
}

#[async_trait]
impl WalletCapability for FakeWallet {
    async fn get_network_id(&self) -> Result<u8> {
        if self.refuse_network_id {
            return Err(PaymentError::Wallet("getNetworkId refused".into()));
        }
        Ok(self.network_id)
    }

    async fn get_used_addresses(&self) -> Result<Vec<Address>> {
        Ok(vec![self.change.clone()])
    }

    async fn get_change_address(&self) -> Result<Address> {
        Ok(self.change.clone())
    }

    async fn get_utxos(&self, limit: usize) -> Result<Vec<Vec<u8>>> {
        self.utxo_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.utxos.lock().unwrap().iter().take(limit).cloned().collect())
    }

    async fn get_balance(&self) -> Result<Vec<u8>> {
        Ok(coin_bytes(*self.balance.lock().unwrap()))
    }

    async fn sign_tx(&self, _tx_hex: &str, _partial_sign: bool) -> Result<Vec<u8>> {
        self.sign_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(d) = self.sign_delay {
            tokio::time::sleep(d).await;
        }
        Ok(witness_set())
    }
}

pub fn reference_params() -> ProtocolParameters {
    ProtocolParameters { min_fee_a: 44, min_fee_b: 155_381, max_tx_size: 16_384, max_value_size: 5_000 }
}

/// Scripted ledger gateway. Submissions pop the next scripted response; with
/// none left it accepts and answers the transaction's own id. A scripted
/// transport error may quote the submitted id through `{tx_id}`.
pub struct FakeGateway {
    pub params: ProtocolParameters,
    pub tip: Option<ChainTip>,
    responses: Mutex<VecDeque<Result<Option<String>>>>,
    pub submitted: Mutex<Vec<String>>,
}

impl FakeGateway {
    pub fn new() -> Self {
        FakeGateway {
            params: reference_params(),
            tip: Some(ChainTip { slot: 70_000_000 }),
            responses: Mutex::new(VecDeque::new()),
            submitted: Mutex::new(Vec::new()),
        }
    }

    pub fn without_tip(mut self) -> Self {
        self.tip = None;
        self
    }

    pub fn respond(self, r: Result<Option<String>>) -> Self {
        self.responses.lock().unwrap().push_back(r);
        self
    }

    pub fn submitted_txs(&self) -> Vec<SignedTransaction> {
        self.submitted
            .lock()
            .unwrap()
            .iter()
            .map(|h| SignedTransaction::from_bytes(&hex::decode(h).unwrap()).unwrap())
            .collect()
    }
}

#[async_trait]
impl LedgerGateway for FakeGateway {
    async fn protocol_parameters(&self, _network: NetworkContext) -> Result<ProtocolParameters> {
        Ok(self.params)
    }

    async fn chain_tip(&self, _network: NetworkContext) -> Result<ChainTip> {
        self.tip.ok_or_else(|| PaymentError::Transport("tip unavailable".into()))
    }

    async fn submit_transaction(&self, signed_hex: &str, _network: NetworkContext) -> Result<Option<String>> {
        self.submitted.lock().unwrap().push(signed_hex.to_string());
        let tx_id = hex::encode(SignedTransaction::from_bytes(&hex::decode(signed_hex).unwrap())?.tx_id());
        let scripted = self.responses.lock().unwrap().pop_front();
        match scripted {
            Some(Err(PaymentError::Transport(msg))) => Err(PaymentError::Transport(msg.replace("{tx_id}", &tx_id))),
            Some(r) => r,
            None => Ok(Some(tx_id)),
        }
    }

    async fn address_balance(&self, address: &str, _network: NetworkContext) -> Result<AddressBalance> {
        Ok(AddressBalance { address: address.to_string(), balance_ada: "0.000000".into(), assets: Vec::new() })
    }
}

pub fn settings() -> PipelineSettings {
    PipelineSettings {
        selected: NetworkContext::Preprod,
        wallet_testnet: NetworkContext::Preprod,
        fee_policy: FeePolicy::default(),
        ttl_horizon_slots: 3600,
        max_inputs: 50,
        partial_sign: true,
        refresh_delay: Duration::from_millis(5),
    }
}

pub fn service(gateway: Arc<FakeGateway>) -> PaymentService {
    PaymentService::new(gateway, Arc::new(TxHistory::in_memory()), settings())
}
