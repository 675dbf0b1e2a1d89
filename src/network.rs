//! Network context resolution.
//!
//! A transfer may only proceed once the wallet's network and the network
//! selected in the UI are proven to be the same context. The wallet is asked
//! first; if it refuses to report an id the address prefix is used instead.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::address::{Address, HRP_PAYMENT, HRP_PAYMENT_TEST, HRP_STAKE, HRP_STAKE_TEST};
use crate::error::{PaymentError, Result};
use crate::wallet::WalletCapability;

/// Network id reported by wallets on any test network.
pub const WALLET_ID_TESTNET: u8 = 0;
/// Network id reported by wallets on the production network.
pub const WALLET_ID_MAINNET: u8 = 1;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum NetworkContext {
    /// test-network-A
    Preprod,
    /// test-network-B
    Preview,
    Mainnet,
}

impl NetworkContext {
    /// Name used by the ledger proxy (`?network=`).
    pub fn as_str(&self) -> &'static str {
        match self {
            NetworkContext::Preprod => "preprod",
            NetworkContext::Preview => "preview",
            NetworkContext::Mainnet => "mainnet",
        }
    }

    pub fn is_testnet(&self) -> bool {
        !matches!(self, NetworkContext::Mainnet)
    }
}

impl fmt::Display for NetworkContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NetworkContext {
    type Err = PaymentError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "preprod" | "test-network-a" => Ok(NetworkContext::Preprod),
            "preview" | "test-network-b" => Ok(NetworkContext::Preview),
            "mainnet" | "main-network" => Ok(NetworkContext::Mainnet),
            other => Err(PaymentError::UnknownNetwork(other.to_string())),
        }
    }
}

/// Maps the wallet-reported integer id to a context. Id 0 cannot tell the
/// two test networks apart, so it resolves to the configured `testnet`.
pub fn context_from_wallet_id(network_id: u8, testnet: NetworkContext) -> Result<NetworkContext> {
    match network_id {
        WALLET_ID_TESTNET => Ok(testnet),
        WALLET_ID_MAINNET => Ok(NetworkContext::Mainnet),
        other => Err(PaymentError::UnknownNetwork(format!("wallet network id {}", other))),
    }
}

/// Infers the context from an address's human-readable prefix.
pub fn context_from_address(address: &str, testnet: NetworkContext) -> Result<NetworkContext> {
    let text = address.trim();
    // Wallets hand over raw hex; render it so the prefix can be read.
    let rendered;
    let text = if text.starts_with(HRP_PAYMENT) || text.starts_with(HRP_STAKE) {
        text
    } else {
        rendered = Address::from_hex(text)?.to_string();
        rendered.as_str()
    };
    if text.starts_with(HRP_PAYMENT_TEST) || text.starts_with(HRP_STAKE_TEST) {
        Ok(testnet)
    } else if text.starts_with(HRP_PAYMENT) || text.starts_with(HRP_STAKE) {
        Ok(NetworkContext::Mainnet)
    } else {
        Err(PaymentError::UnknownNetwork(format!("cannot infer network from address {}", text)))
    }
}

/// Block-on-mismatch rule shared by every strategy.
fn enforce(wallet: NetworkContext, selected: NetworkContext) -> Result<NetworkContext> {
    if wallet == NetworkContext::Mainnet {
        return Err(PaymentError::UnsupportedNetwork(wallet));
    }
    if wallet != selected {
        return Err(PaymentError::NetworkMismatch { wallet, selected });
    }
    Ok(wallet)
}

/// `resolve(walletNetworkId, uiSelectedContext)`.
pub fn resolve(wallet_network_id: u8, selected: NetworkContext, testnet: NetworkContext) -> Result<NetworkContext> {
    enforce(context_from_wallet_id(wallet_network_id, testnet)?, selected)
}

/// How the wallet's context was determined.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetworkResolver {
    /// The wallet reported its network id.
    Capability { network_id: u8 },
    /// Best-effort fallback: the wallet would not say, read the address prefix.
    AddressPrefix { address: String },
}

impl NetworkResolver {
    pub fn wallet_context(&self, testnet: NetworkContext) -> Result<NetworkContext> {
        match self {
            NetworkResolver::Capability { network_id } => context_from_wallet_id(*network_id, testnet),
            NetworkResolver::AddressPrefix { address } => context_from_address(address, testnet),
        }
    }

    pub fn resolve(&self, selected: NetworkContext, testnet: NetworkContext) -> Result<NetworkContext> {
        enforce(self.wallet_context(testnet)?, selected)
    }

    /// Ask the wallet for its id, falling back to the address prefix when the
    /// capability call fails.
    pub async fn detect(wallet: &dyn WalletCapability) -> Result<Self> {
        match wallet.get_network_id().await {
            Ok(network_id) => Ok(NetworkResolver::Capability { network_id }),
            Err(e) => {
                warn!(error = %e, "wallet refused network id, inferring from address prefix");
                let address = match wallet.get_used_addresses().await {
                    Ok(used) if !used.is_empty() => used[0].to_string(),
                    _ => wallet.get_change_address().await?.to_string(),
                };
                Ok(NetworkResolver::AddressPrefix { address })
            }
        }
    }
}

/// Detect and enforce in one step; the usual entry point for an attempt.
pub async fn resolve_wallet(
    wallet: &dyn WalletCapability,
    selected: NetworkContext,
    testnet: NetworkContext,
) -> Result<NetworkContext> {
    let resolver = NetworkResolver::detect(wallet).await?;
    let ctx = resolver.resolve(selected, testnet)?;
    info!(network = %ctx, strategy = ?resolver, "wallet network resolved");
    Ok(ctx)
}
