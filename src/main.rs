use anyhow::Context;
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use coffee_wallet::{
    address::abbreviate,
    address_book::AddressBook,
    amount::format_ada,
    config,
    gateway::{HttpGateway, LedgerGateway},
    history::{HashOrigin, TxHistory},
    network::{NetworkContext, NetworkResolver},
    storage::Store,
    submit::{ExecutionMode, PaymentService, PipelineSettings, SendRequest},
    utxo::InputReservations,
    wallet::{HttpWallet, WalletCapability},
    PaymentError,
};

#[derive(Parser)]
#[command(author, version, about = "coffee wallet: build, sign and submit ADA payments")]
struct Cli {
    #[arg(short, long, default_value = "config.toml")]
    config: String,

    /// Override the selected network (preprod, preview)
    #[arg(short, long)]
    network: Option<String>,

    /// Only print warnings and errors from the pipeline
    #[arg(long, default_value_t = false)]
    quiet: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Send ADA to an address
    Send {
        /// Recipient address, or the label of a saved address
        #[arg(long)]
        to: String,
        /// Amount in ADA, up to six decimals
        #[arg(long)]
        amount: String,
        /// Record a simulated payment without touching the wallet
        #[arg(long)]
        mock: bool,
    },
    /// Show protocol parameters and chain tip for the selected network
    Params,
    /// Show the wallet balance, or any address's balance via the gateway
    Balance {
        #[arg(long)]
        address: Option<String>,
    },
    /// Detect the wallet's network and check it against the selection
    Resolve,
    /// List recorded transactions, newest first
    History,
    /// List saved recipient addresses for the selected network
    Saved,
}

const EMBEDDED_CONFIG: &str = include_str!("../config.toml");

fn load_config(path: &str) -> anyhow::Result<config::Config> {
    match config::load(path) {
        Ok(c) => Ok(c),
        Err(e) => {
            eprintln!("⚠️  Could not read config from '{}': {:#}. Using built-in defaults.", path, e);
            config::load_from_str(EMBEDDED_CONFIG)
        }
    }
}

fn bridge_wallet(cfg: &config::Config) -> anyhow::Result<Arc<dyn WalletCapability>> {
    let url = cfg
        .wallet
        .bridge_url
        .clone()
        .ok_or_else(|| anyhow::anyhow!("no wallet bridge configured; set [wallet].bridge_url"))?;
    Ok(Arc::new(HttpWallet::new(url)))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.quiet { "warn" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let mut cfg = load_config(&cli.config)?;
    if let Some(n) = &cli.network {
        cfg.network.selected = n.parse::<NetworkContext>()?;
    }

    // Relative storage paths live under ~/.coffee-wallet
    if std::path::Path::new(&cfg.storage.path).is_relative() {
        let home = std::env::var("HOME")
            .or_else(|_| std::env::var("USERPROFILE"))
            .unwrap_or_else(|_| ".".to_string());
        let abs = std::path::Path::new(&home).join(".coffee-wallet").join(&cfg.storage.path);
        cfg.storage.path = abs.to_string_lossy().into_owned();
    }

    let gateway: Arc<dyn LedgerGateway> = Arc::new(HttpGateway::new(cfg.gateway.base_url.clone()));
    let selected = cfg.network.selected;

    match cli.cmd {
        Cmd::Params => {
            let snap = gateway.snapshot(selected).await?;
            println!("📐 Protocol parameters ({})", selected);
            println!("   min_fee_a:      {}", snap.params.min_fee_a);
            println!("   min_fee_b:      {}", snap.params.min_fee_b);
            println!("   max_tx_size:    {}", snap.params.max_tx_size);
            println!("   max_value_size: {}", snap.params.max_value_size);
            match snap.tip {
                Some(tip) => println!("⛓️  Chain tip slot: {}", tip.slot),
                None => println!("⛓️  Chain tip unavailable"),
            }
        }
        Cmd::Balance { address: Some(addr) } => {
            let bal = gateway.address_balance(&addr, selected).await?;
            println!("💰 {} ₳ at {}", bal.balance_ada, abbreviate(&bal.address));
            if !bal.assets.is_empty() {
                println!("🎨 {} native asset(s) held", bal.assets.len());
            }
        }
        Cmd::Balance { address: None } => {
            let wallet = bridge_wallet(&cfg)?;
            let store = Arc::new(Store::open(&cfg.storage.path)?);
            let service = PaymentService::new(gateway, Arc::new(TxHistory::open(store)?), PipelineSettings::from_config(&cfg));
            let snap = service.refresh(wallet.as_ref()).await?;
            println!("💰 Wallet balance: {} ₳ on {}", format_ada(snap.balance_lovelace), snap.network);
        }
        Cmd::Resolve => {
            let wallet = bridge_wallet(&cfg)?;
            let resolver = NetworkResolver::detect(wallet.as_ref()).await?;
            match resolver.resolve(selected, cfg.network.wallet_testnet) {
                Ok(ctx) => println!("✅ Wallet is on {} ({:?})", ctx, resolver),
                Err(e @ PaymentError::UnsupportedNetwork(_)) => {
                    eprintln!("🚫 {}", e);
                    return Err(e.into());
                }
                Err(e) => {
                    eprintln!("❌ {}", e);
                    return Err(e.into());
                }
            }
        }
        Cmd::History => {
            let store = Arc::new(Store::open(&cfg.storage.path)?);
            let history = TxHistory::open(store)?;
            println!("📜 Transaction history:");
            let entries = history.entries();
            if entries.is_empty() {
                println!("  No transactions found");
            }
            for (i, entry) in entries.iter().enumerate() {
                println!("  {} {}", i + 1, entry);
            }
        }
        Cmd::Saved => {
            let book = AddressBook::from_saved(&cfg.wallet.saved_addresses)?;
            println!("📌 Saved addresses ({})", selected);
            let entries = book.entries(selected);
            if entries.is_empty() {
                println!("  None saved; add [[wallet.saved_addresses]] to the config");
            }
            for entry in entries {
                println!("  {:<20} {}", entry.label, entry.address);
            }
        }
        Cmd::Send { to, amount, mock } => {
            let mode = if mock || cfg.wallet.bridge_url.is_none() {
                if !mock {
                    println!("🧪 No wallet bridge configured, running in mock mode");
                }
                ExecutionMode::Mock
            } else {
                ExecutionMode::WalletBacked(bridge_wallet(&cfg)?)
            };

            let book = AddressBook::from_saved(&cfg.wallet.saved_addresses)?;
            let store = Arc::new(Store::open(&cfg.storage.path)?);
            let history = Arc::new(TxHistory::open(store.clone()).context("failed to load transaction history")?);
            let reservations = InputReservations::open(store).context("failed to load input reservations")?;
            let service = PaymentService::new(gateway, history, PipelineSettings::from_config(&cfg))
                .with_reservations(reservations)
                .with_address_book(book);

            println!("📤 Sending {} ₳ to {} on {}", amount, abbreviate(&to), selected);
            let request = SendRequest { recipient: to, amount_ada: amount };
            match service.send(&mode, &request).await {
                Ok(entry) => {
                    match entry.hash_origin {
                        HashOrigin::Gateway | HashOrigin::Recovered => println!("✅ Submitted: {}", entry.hash),
                        HashOrigin::Unverified => {
                            println!("⚠️  Submitted, but the gateway only quoted hash {}; check it on an explorer", entry.hash)
                        }
                        HashOrigin::Local => println!("✅ Recorded with local id {}", entry.hash),
                    }
                    if let ExecutionMode::WalletBacked(_) = mode {
                        println!("⏳ Waiting for balance refresh...");
                        service.settle_refresh().await;
                        if let Some(b) = service.status().balance_lovelace {
                            println!("💰 Wallet balance: {} ₳", format_ada(b));
                        }
                    }
                }
                Err(e) => {
                    let status = service.status();
                    eprintln!("❌ {}: {}", status.message, e);
                    return Err(e.into());
                }
            }
        }
    }

    Ok(())
}
