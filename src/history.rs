//! Append-only transaction history, newest first.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::address::abbreviate;
use crate::error::Result;
use crate::storage::{storage_err, Store, CF_HISTORY};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TxStatus {
    Simulated,
    Submitted,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ModeTag {
    Mock,
    Wallet,
}

/// Where an entry's hash came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HashOrigin {
    /// Returned by the gateway on success.
    Gateway,
    /// Scraped from a gateway error body; equals the local transaction id.
    Recovered,
    /// Computed or synthesized locally; not confirmed by the ledger.
    Local,
    /// Scraped from a gateway error body but differs from the local
    /// transaction id, so it may name some other transaction (e.g. an input).
    Unverified,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxHistoryEntry {
    pub id: String,
    pub recipient: String,
    pub amount_ada: String,
    pub timestamp: DateTime<Utc>,
    pub status: TxStatus,
    pub hash: String,
    pub mode: ModeTag,
    pub hash_origin: HashOrigin,
}

impl TxHistoryEntry {
    /// Whether `hash` is known to identify this transaction on the ledger.
    pub fn is_chain_hash(&self) -> bool {
        matches!(self.hash_origin, HashOrigin::Gateway | HashOrigin::Recovered)
    }
}

impl fmt::Display for TxHistoryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match self.status {
            TxStatus::Simulated => "simulated",
            TxStatus::Submitted => "submitted",
        };
        let mode = match self.mode {
            ModeTag::Mock => "mock",
            ModeTag::Wallet => "wallet",
        };
        write!(
            f,
            "{}  {} ₳ -> {}  [{} • {}]  {}{}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S"),
            self.amount_ada,
            abbreviate(&self.recipient),
            status,
            mode,
            self.hash,
            match self.hash_origin {
                HashOrigin::Gateway | HashOrigin::Recovered => "",
                HashOrigin::Local => " (local id)",
                HashOrigin::Unverified => " (unverified)",
            }
        )
    }
}

/// Newest-first sequence of entries, optionally persisted.
pub struct TxHistory {
    entries: RwLock<Vec<TxHistoryEntry>>,
    store: Option<Arc<Store>>,
}

// Inverted timestamp and sequence so a forward scan yields newest first.
fn history_key(entry: &TxHistoryEntry, seq: u64) -> [u8; 16] {
    let millis = entry.timestamp.timestamp_millis().max(0) as u64;
    let mut key = [0u8; 16];
    key[..8].copy_from_slice(&(u64::MAX - millis).to_be_bytes());
    key[8..].copy_from_slice(&(u64::MAX - seq).to_be_bytes());
    key
}

impl TxHistory {
    pub fn in_memory() -> Self {
        TxHistory { entries: RwLock::new(Vec::new()), store: None }
    }

    pub fn open(store: Arc<Store>) -> Result<Self> {
        let entries: Vec<TxHistoryEntry> = store.scan(CF_HISTORY).map_err(storage_err)?;
        Ok(TxHistory { entries: RwLock::new(entries), store: Some(store) })
    }

    /// Prepend an entry. Entries are never modified or removed afterwards.
    pub fn record(&self, entry: TxHistoryEntry) -> Result<()> {
        let mut entries = self.entries.write().unwrap();
        if let Some(store) = &self.store {
            let key = history_key(&entry, entries.len() as u64);
            store.put(CF_HISTORY, &key, &entry).map_err(storage_err)?;
        }
        entries.insert(0, entry);
        Ok(())
    }

    pub fn entries(&self) -> Vec<TxHistoryEntry> {
        self.entries.read().unwrap().clone()
    }

    pub fn latest(&self) -> Option<TxHistoryEntry> {
        self.entries.read().unwrap().first().cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
