//! Saved recipient addresses, one table per network.
//!
//! A send may name a saved label instead of an address. Labels only resolve
//! against the table of the selected network.

use serde::Deserialize;
use std::collections::HashMap;

use crate::address::Address;
use crate::error::{PaymentError, Result};
use crate::network::NetworkContext;

/// One `[[wallet.saved_addresses]]` entry as written in the config.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SavedAddress {
    /// Network name, matched case-insensitively (`Preview`, ` preprod`).
    pub network: String,
    pub label: String,
    pub address: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BookEntry {
    pub label: String,
    pub address: Address,
}

#[derive(Debug, Clone, Default)]
pub struct AddressBook {
    tables: HashMap<NetworkContext, Vec<BookEntry>>,
}

fn same_label(a: &str, b: &str) -> bool {
    a.trim().eq_ignore_ascii_case(b.trim())
}

impl AddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_saved(saved: &[SavedAddress]) -> Result<Self> {
        let mut book = AddressBook::new();
        for s in saved {
            let network: NetworkContext = s.network.parse()?;
            book.insert(network, &s.label, Address::parse(&s.address)?)?;
        }
        Ok(book)
    }

    /// Adds an entry. The address must belong to `network` and the label must
    /// be unique within that network's table.
    pub fn insert(&mut self, network: NetworkContext, label: &str, address: Address) -> Result<()> {
        let label = label.trim();
        if label.is_empty() {
            return Err(PaymentError::InvalidAddress("saved address needs a label".into()));
        }
        let expected_tag = if network.is_testnet() { 0 } else { 1 };
        if address.network_tag() != expected_tag {
            return Err(PaymentError::InvalidAddress(format!(
                "saved address '{}' is not a {} address",
                label, network
            )));
        }
        let table = self.tables.entry(network).or_default();
        if table.iter().any(|e| same_label(&e.label, label)) {
            return Err(PaymentError::InvalidAddress(format!("duplicate label '{}' for {}", label, network)));
        }
        table.push(BookEntry { label: label.to_string(), address });
        Ok(())
    }

    /// Entries for a network given by name, normalised the same way as the
    /// network selection.
    pub fn saved_for(&self, network: &str) -> Result<&[BookEntry]> {
        let network: NetworkContext = network.parse()?;
        Ok(self.entries(network))
    }

    pub fn entries(&self, network: NetworkContext) -> &[BookEntry] {
        self.tables.get(&network).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn lookup(&self, network: NetworkContext, label: &str) -> Option<&Address> {
        self.entries(network).iter().find(|e| same_label(&e.label, label)).map(|e| &e.address)
    }

    /// Maps a saved label to its address on `selected`; anything else is
    /// returned unchanged for address parsing. A label saved only for another
    /// network is an error rather than a silent cross-network send.
    pub fn resolve_recipient(&self, input: &str, selected: NetworkContext) -> Result<String> {
        if let Some(addr) = self.lookup(selected, input) {
            return Ok(addr.to_string());
        }
        if let Some((other, _)) = self
            .tables
            .iter()
            .find(|(net, table)| **net != selected && table.iter().any(|e| same_label(&e.label, input)))
        {
            return Err(PaymentError::InvalidAddress(format!(
                "'{}' is saved for {}, not {}",
                input.trim(),
                other,
                selected
            )));
        }
        Ok(input.to_string())
    }

    pub fn is_empty(&self) -> bool {
        self.tables.values().all(Vec::is_empty)
    }
}
