//! Ledger gateway: protocol parameters, chain tip and submission, reached
//! through the backend proxy that holds the ledger-data API credentials.

use async_trait::async_trait;
use serde::{de, Deserialize, Deserializer, Serialize};
use tracing::{debug, warn};

use crate::error::{PaymentError, Result};
use crate::fee::{ChainTip, ProtocolParameters};
use crate::network::NetworkContext;

/// Everything the fee and assembly stages need from the ledger for one
/// attempt. Never reused across attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSnapshot {
    pub params: ProtocolParameters,
    /// `None` when the tip could not be read; the draft then has no TTL.
    pub tip: Option<ChainTip>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct AddressBalance {
    pub address: String,
    pub balance_ada: String,
    #[serde(default)]
    pub assets: Vec<serde_json::Value>,
}

#[async_trait]
pub trait LedgerGateway: Send + Sync {
    async fn protocol_parameters(&self, network: NetworkContext) -> Result<ProtocolParameters>;
    async fn chain_tip(&self, network: NetworkContext) -> Result<ChainTip>;
    /// Returns the transaction hash, or `None` if the gateway accepted the
    /// bytes without reporting one.
    async fn submit_transaction(&self, signed_hex: &str, network: NetworkContext) -> Result<Option<String>>;
    async fn address_balance(&self, address: &str, network: NetworkContext) -> Result<AddressBalance>;

    /// Parameters are required; a missing tip only disables the TTL.
    async fn snapshot(&self, network: NetworkContext) -> Result<LedgerSnapshot> {
        let params = self.protocol_parameters(network).await?;
        let tip = match self.chain_tip(network).await {
            Ok(tip) => Some(tip),
            Err(e) => {
                warn!(error = %e, "chain tip unavailable, building without ttl");
                None
            }
        };
        Ok(LedgerSnapshot { params, tip })
    }
}

/// The proxy only serves the two test networks.
fn proxy_network(network: NetworkContext) -> Result<&'static str> {
    match network {
        NetworkContext::Preprod | NetworkContext::Preview => Ok(network.as_str()),
        NetworkContext::Mainnet => Err(PaymentError::UnsupportedNetwork(network)),
    }
}

// The ledger-data API mixes numbers and numeric strings.
fn lenient_u64<'de, D: Deserializer<'de>>(d: D) -> std::result::Result<u64, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum NumOrStr {
        Num(u64),
        Str(String),
    }
    match NumOrStr::deserialize(d)? {
        NumOrStr::Num(n) => Ok(n),
        NumOrStr::Str(s) => s.trim().parse().map_err(de::Error::custom),
    }
}

#[derive(Debug, Deserialize)]
struct RawParameters {
    #[serde(deserialize_with = "lenient_u64")]
    min_fee_a: u64,
    #[serde(deserialize_with = "lenient_u64")]
    min_fee_b: u64,
    #[serde(deserialize_with = "lenient_u64")]
    max_tx_size: u64,
    #[serde(deserialize_with = "lenient_u64")]
    max_val_size: u64,
}

#[derive(Debug, Deserialize)]
struct RawTip {
    #[serde(default)]
    slot: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ParametersResp {
    parameters: RawParameters,
    tip: Option<RawTip>,
}

#[derive(Debug, Deserialize)]
struct SubmitResp {
    #[serde(default)]
    hash: Option<String>,
}

#[derive(Serialize)]
struct SubmitReq<'a> {
    tx: &'a str,
    network: &'a str,
}

#[derive(Deserialize)]
struct ProxyError {
    error: String,
}

/// Turns a non-success proxy response into the error taxonomy. The proxy
/// answers 400 with a message naming the missing project id when it has no
/// credentials for the network.
pub fn classify_proxy_error(status: u16, body: &str) -> PaymentError {
    let msg = serde_json::from_str::<ProxyError>(body)
        .map(|e| e.error)
        .unwrap_or_else(|_| body.trim().to_string());
    let lower = msg.to_ascii_lowercase();
    if status == 400 && lower.contains("project") && lower.contains("missing") {
        return PaymentError::ConfigMissing(msg);
    }
    if msg.is_empty() {
        return PaymentError::Transport(format!("gateway returned HTTP {}", status));
    }
    PaymentError::Transport(msg)
}

fn parse_parameters(resp: ParametersResp) -> LedgerSnapshot {
    let p = resp.parameters;
    LedgerSnapshot {
        params: ProtocolParameters {
            min_fee_a: p.min_fee_a,
            min_fee_b: p.min_fee_b,
            max_tx_size: p.max_tx_size,
            max_value_size: p.max_val_size,
        },
        tip: resp.tip.and_then(|t| t.slot).map(|slot| ChainTip { slot }),
    }
}

pub struct HttpGateway {
    client: reqwest::Client,
    base_url: String,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpGateway { client: reqwest::Client::new(), base_url: base_url.into().trim_end_matches('/').to_string() }
    }

    async fn read<T: de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            return Err(classify_proxy_error(status.as_u16(), &body));
        }
        serde_json::from_str(&body).map_err(|e| PaymentError::Transport(format!("unexpected gateway response: {}", e)))
    }

    async fn fetch_snapshot(&self, network: NetworkContext) -> Result<LedgerSnapshot> {
        let net = proxy_network(network)?;
        let resp = self
            .client
            .get(format!("{}/wallet/protocol-parameters", self.base_url))
            .query(&[("network", net)])
            .send()
            .await?;
        let snapshot = parse_parameters(Self::read(resp).await?);
        debug!(network = net, ?snapshot, "ledger snapshot fetched");
        Ok(snapshot)
    }
}

#[async_trait]
impl LedgerGateway for HttpGateway {
    async fn protocol_parameters(&self, network: NetworkContext) -> Result<ProtocolParameters> {
        Ok(self.fetch_snapshot(network).await?.params)
    }

    async fn chain_tip(&self, network: NetworkContext) -> Result<ChainTip> {
        self.fetch_snapshot(network)
            .await?
            .tip
            .ok_or_else(|| PaymentError::Transport("gateway returned no tip slot".into()))
    }

    async fn submit_transaction(&self, signed_hex: &str, network: NetworkContext) -> Result<Option<String>> {
        let net = proxy_network(network)?;
        let resp = self
            .client
            .post(format!("{}/wallet/submit", self.base_url))
            .json(&SubmitReq { tx: signed_hex, network: net })
            .send()
            .await?;
        let body: SubmitResp = Self::read(resp).await?;
        Ok(body.hash.map(|h| h.trim().to_string()).filter(|h| !h.is_empty()))
    }

    async fn address_balance(&self, address: &str, network: NetworkContext) -> Result<AddressBalance> {
        let net = proxy_network(network)?;
        let resp = self
            .client
            .get(format!("{}/wallet/balance/{}", self.base_url, address))
            .query(&[("network", net)])
            .send()
            .await?;
        Self::read(resp).await
    }

    // One proxy call returns both halves.
    async fn snapshot(&self, network: NetworkContext) -> Result<LedgerSnapshot> {
        let snapshot = self.fetch_snapshot(network).await?;
        if snapshot.tip.is_none() {
            warn!(network = %network, "gateway returned no tip slot, building without ttl");
        }
        Ok(snapshot)
    }
}
