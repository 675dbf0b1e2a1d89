use serde::Deserialize;
use std::{fs, path::Path};
use anyhow::{Context, Result};

use crate::address_book::SavedAddress;
use crate::fee::{FeePolicy, FLAT_FEE_ESTIMATE, WITNESS_MARGIN};
use crate::network::NetworkContext;
use crate::tx::TTL_HORIZON_SLOTS;
use crate::utxo::MAX_INPUTS;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub gateway: Gateway,
    #[serde(default)]
    pub network: Network,
    #[serde(default)]
    pub wallet: Wallet,
    #[serde(default)]
    pub pipeline: Pipeline,
    #[serde(default)]
    pub storage: Storage,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Gateway {
    /// Base URL of the backend proxy, e.g. http://localhost:5000
    pub base_url: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Network {
    /// Network selected in the UI.
    #[serde(default = "default_selected")]
    pub selected: NetworkContext,
    /// Which test network a wallet reporting id 0 is taken to be on.
    #[serde(default = "default_selected")]
    pub wallet_testnet: NetworkContext,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Wallet {
    /// Local bridge relaying calls to the browser wallet. Unset means mock mode.
    #[serde(default)]
    pub bridge_url: Option<String>,
    #[serde(default = "default_true")]
    pub partial_sign: bool,
    /// Recipients selectable by label, per network.
    #[serde(default)]
    pub saved_addresses: Vec<SavedAddress>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Pipeline {
    #[serde(default = "default_flat_fee")]
    pub flat_fee_estimate: u64,
    #[serde(default = "default_witness_margin")]
    pub witness_margin: u64,
    #[serde(default = "default_ttl")]
    pub ttl_horizon_slots: u64,
    #[serde(default = "default_max_inputs")]
    pub max_inputs: usize,
    /// Delay before the post-submission balance refresh.
    #[serde(default = "default_refresh")]
    pub refresh_delay_ms: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct Storage {
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_selected() -> NetworkContext { NetworkContext::Preprod }
fn default_true() -> bool { true }
fn default_flat_fee() -> u64 { FLAT_FEE_ESTIMATE }
fn default_witness_margin() -> u64 { WITNESS_MARGIN }
fn default_ttl() -> u64 { TTL_HORIZON_SLOTS }
fn default_max_inputs() -> usize { MAX_INPUTS }
fn default_refresh() -> u64 { 4_000 }
fn default_path() -> String { "coffee_wallet_data".into() }

impl Default for Network {
    fn default() -> Self {
        Network { selected: default_selected(), wallet_testnet: default_selected() }
    }
}

impl Default for Wallet {
    fn default() -> Self {
        Wallet { bridge_url: None, partial_sign: true, saved_addresses: Vec::new() }
    }
}

impl Default for Pipeline {
    fn default() -> Self {
        Pipeline {
            flat_fee_estimate: default_flat_fee(),
            witness_margin: default_witness_margin(),
            ttl_horizon_slots: default_ttl(),
            max_inputs: default_max_inputs(),
            refresh_delay_ms: default_refresh(),
        }
    }
}

impl Default for Storage {
    fn default() -> Self {
        Storage { path: default_path() }
    }
}

impl Pipeline {
    pub fn fee_policy(&self) -> FeePolicy {
        FeePolicy { flat_estimate: self.flat_fee_estimate, witness_margin: self.witness_margin }
    }
}

/// Read the TOML file at `p` and deserialize into `Config`.
/// *Adds context* so user errors print a friendlier message.
///
/// # Errors
/// * Returns an anyhow::Error if the file cannot be read or parsed.
pub fn load<P: AsRef<Path>>(p: P) -> Result<Config> {
    let text = fs::read_to_string(&p)
        .with_context(|| format!("🗂️  couldn’t read config file {}", p.as_ref().display()))?;
    load_from_str(&text)
}

pub fn load_from_str(text: &str) -> Result<Config> {
    toml::from_str(text)
        .with_context(|| "📝  invalid TOML in config file".to_string())
}
