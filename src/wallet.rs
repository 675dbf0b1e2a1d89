//! Wallet capability interface and decoding of what wallets hand back.
//!
//! Wallets speak the browser-extension dialect: addresses as hex bytes,
//! unspent outputs as CBOR `[input, output]` pairs, balances as CBOR values.

use async_trait::async_trait;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, warn};

use crate::address::Address;
use crate::cbor::{has_next, Decoder};
use crate::error::{PaymentError, Result};
use crate::tx::decode_output_ref_fields;
use crate::utxo::SpendableOutput;

#[async_trait]
pub trait WalletCapability: Send + Sync {
    /// 0 for test networks, 1 for production.
    async fn get_network_id(&self) -> Result<u8>;
    async fn get_used_addresses(&self) -> Result<Vec<Address>>;
    async fn get_change_address(&self) -> Result<Address>;
    /// Serialized `TransactionUnspentOutput`s, at most `limit` of them.
    async fn get_utxos(&self, limit: usize) -> Result<Vec<Vec<u8>>>;
    /// Serialized value (coin, or `[coin, assets]`).
    async fn get_balance(&self) -> Result<Vec<u8>>;
    /// Returns a serialized witness set for `tx_hex`.
    async fn sign_tx(&self, tx_hex: &str, partial_sign: bool) -> Result<Vec<u8>>;
}

/// A decoded wallet output plus whether it also holds native assets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalletUtxo {
    pub output: SpendableOutput,
    pub carries_assets: bool,
}

/// Reads a value: either a bare coin, or `[coin, multiasset]`.
/// Returns the coin and whether the asset map is non-empty.
fn decode_value(dec: &mut Decoder<'_>) -> Result<(u64, bool)> {
    match dec.peek_major()? {
        0 => Ok((dec.u64()?, false)),
        4 => {
            if dec.array()? != Some(2) {
                return Err(PaymentError::Decode("multi-asset value must be [coin, assets]".into()));
            }
            let coin = dec.u64()?;
            let len = dec.map()?;
            let mut policies = 0;
            while has_next(dec, len, policies)? {
                policies += 1;
                dec.skip()?;
                dec.skip()?;
            }
            Ok((coin, policies > 0))
        }
        m => Err(PaymentError::Decode(format!("unexpected value major type {}", m))),
    }
}

pub fn decode_balance(bytes: &[u8]) -> Result<u64> {
    let mut dec = Decoder::new(bytes);
    let (coin, _) = decode_value(&mut dec)?;
    dec.finish()?;
    Ok(coin)
}

/// Decodes one `[[tx_id, index], output]` pair. The output may be the legacy
/// array form or the keyed map form.
pub fn decode_utxo(bytes: &[u8]) -> Result<WalletUtxo> {
    let mut dec = Decoder::new(bytes);
    if dec.array()? != Some(2) {
        return Err(PaymentError::Decode("unspent output must be [input, output]".into()));
    }
    if dec.array()? != Some(2) {
        return Err(PaymentError::Decode("input must be [tx_id, index]".into()));
    }
    let output_ref = decode_output_ref_fields(&mut dec)?;

    let (owner, value, carries_assets) = match dec.peek_major()? {
        4 => {
            let len = dec.array()?;
            let owner = Address::from_bytes(dec.bytes()?)?;
            let (value, assets) = decode_value(&mut dec)?;
            // Optional datum hash.
            let mut seen = 2;
            while has_next(&mut dec, len, seen)? {
                seen += 1;
                dec.skip()?;
            }
            (owner, value, assets)
        }
        5 => {
            let len = dec.map()?;
            let mut owner = None;
            let mut value = None;
            let mut seen = 0;
            while has_next(&mut dec, len, seen)? {
                seen += 1;
                match dec.u64()? {
                    0 => owner = Some(Address::from_bytes(dec.bytes()?)?),
                    1 => value = Some(decode_value(&mut dec)?),
                    _ => {
                        dec.skip()?;
                    }
                }
            }
            let owner = owner.ok_or_else(|| PaymentError::Decode("output has no address".into()))?;
            let (value, assets) = value.ok_or_else(|| PaymentError::Decode("output has no value".into()))?;
            (owner, value, assets)
        }
        m => return Err(PaymentError::Decode(format!("unexpected output major type {}", m))),
    };
    dec.finish()?;

    Ok(WalletUtxo { output: SpendableOutput { output_ref, owner, value }, carries_assets })
}

/// Reads the wallet's outputs that can fund an ada-only transfer. Outputs
/// holding native assets are left alone, since the change output would have
/// to carry those assets back.
pub async fn spendable_outputs(wallet: &dyn WalletCapability, limit: usize) -> Result<Vec<SpendableOutput>> {
    let raw = wallet.get_utxos(limit).await?;
    let mut outputs = Vec::with_capacity(raw.len());
    for bytes in raw {
        let utxo = decode_utxo(&bytes)?;
        if utxo.carries_assets {
            debug!(output = %utxo.output.output_ref, "skipping output with native assets");
            continue;
        }
        outputs.push(utxo.output);
    }
    Ok(outputs)
}

/// Where change goes: the wallet's change address, else its first used one.
pub async fn funding_address(wallet: &dyn WalletCapability) -> Result<Address> {
    match wallet.get_change_address().await {
        Ok(addr) => Ok(addr),
        Err(e) => {
            warn!(error = %e, "no change address from wallet, using first used address");
            wallet
                .get_used_addresses()
                .await?
                .into_iter()
                .next()
                .ok_or_else(|| PaymentError::Wallet("wallet reported no addresses".into()))
        }
    }
}

// ---------------------------------------------------------------------
// HTTP bridge
// ---------------------------------------------------------------------

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct NetworkIdResp {
    network_id: u8,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SignReq<'a> {
    tx: &'a str,
    partial_sign: bool,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignResp {
    witness_set: String,
}

#[derive(Deserialize)]
struct BridgeError {
    error: String,
}

/// Relays capability calls to a browser page holding the wallet extension.
pub struct HttpWallet {
    client: reqwest::Client,
    base_url: String,
}

impl HttpWallet {
    pub fn new(base_url: impl Into<String>) -> Self {
        HttpWallet { client: reqwest::Client::new(), base_url: base_url.into().trim_end_matches('/').to_string() }
    }

    async fn read<T: DeserializeOwned>(&self, resp: reqwest::Response) -> Result<T> {
        let status = resp.status();
        let body = resp.text().await?;
        if !status.is_success() {
            let msg = serde_json::from_str::<BridgeError>(&body).map(|e| e.error).unwrap_or(body);
            return Err(PaymentError::Wallet(format!("{} ({})", msg, status)));
        }
        serde_json::from_str(&body).map_err(|e| PaymentError::Wallet(format!("bad bridge response: {}", e)))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let resp = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .send()
            .await
            .map_err(|e| PaymentError::Wallet(e.to_string()))?;
        self.read(resp).await
    }
}

fn hex_bytes(s: &str) -> Result<Vec<u8>> {
    hex::decode(s.trim()).map_err(|e| PaymentError::Wallet(format!("bridge returned bad hex: {}", e)))
}

#[async_trait]
impl WalletCapability for HttpWallet {
    async fn get_network_id(&self) -> Result<u8> {
        Ok(self.get::<NetworkIdResp>("/network-id").await?.network_id)
    }

    async fn get_used_addresses(&self) -> Result<Vec<Address>> {
        let list: Vec<String> = self.get("/used-addresses").await?;
        list.iter().map(|h| Address::from_hex(h)).collect()
    }

    async fn get_change_address(&self) -> Result<Address> {
        let h: String = self.get("/change-address").await?;
        Address::from_hex(&h)
    }

    async fn get_utxos(&self, limit: usize) -> Result<Vec<Vec<u8>>> {
        let list: Vec<String> = self.get(&format!("/utxos?limit={}", limit)).await?;
        list.iter().map(|h| hex_bytes(h)).collect()
    }

    async fn get_balance(&self) -> Result<Vec<u8>> {
        let h: String = self.get("/balance").await?;
        hex_bytes(&h)
    }

    async fn sign_tx(&self, tx_hex: &str, partial_sign: bool) -> Result<Vec<u8>> {
        let resp = self
            .client
            .post(format!("{}/sign-tx", self.base_url))
            .json(&SignReq { tx: tx_hex, partial_sign })
            .send()
            .await
            .map_err(|e| PaymentError::Wallet(e.to_string()))?;
        let signed: SignResp = self.read(resp).await?;
        hex_bytes(&signed.witness_set)
    }
}
