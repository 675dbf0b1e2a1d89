use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use crate::address::Address;
use crate::error::{PaymentError, Result};
use crate::storage::{storage_err, Store, CF_RESERVATIONS};

/// Upper bound on inputs per transaction; also the `getUtxos` page size.
pub const MAX_INPUTS: usize = 50;

/// Points at one output of a prior transaction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OutputRef {
    pub tx_id: [u8; 32],
    pub index: u32,
}

impl fmt::Display for OutputRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", hex::encode(self.tx_id), self.index)
    }
}

/// An unspent output the wallet can spend. Read-only to the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SpendableOutput {
    pub output_ref: OutputRef,
    pub owner: Address,
    pub value: u64,
}

/// Every eligible output, with their checked total.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputSet {
    pub total: u64,
    pub inputs: Vec<SpendableOutput>,
}

impl InputSet {
    pub fn refs(&self) -> Vec<OutputRef> {
        self.inputs.iter().map(|o| o.output_ref).collect()
    }
}

/// Checked sum of output values.
pub fn total_value<'a>(outputs: impl IntoIterator<Item = &'a SpendableOutput>) -> Result<u64> {
    outputs
        .into_iter()
        .try_fold(0u64, |acc, o| acc.checked_add(o.value))
        .ok_or(PaymentError::Overflow("input total"))
}

/// Turn the wallet's spendable outputs into the input set of a transaction.
///
/// There is no coin selection: every output (up to `max_inputs`) is spent
/// and the remainder comes back as change. This keeps the fee path simple at
/// the cost of consolidating the wallet on every send.
pub fn aggregate(mut outputs: Vec<SpendableOutput>, max_inputs: usize) -> Result<InputSet> {
    if outputs.is_empty() {
        return Err(PaymentError::NoFunds);
    }
    outputs.truncate(max_inputs.max(1));
    // Canonical order so the serialized body does not depend on wallet ordering.
    outputs.sort_by_key(|o| o.output_ref);
    outputs.dedup_by_key(|o| o.output_ref);
    let total = total_value(&outputs)?;
    Ok(InputSet { total, inputs: outputs })
}

/// Outputs claimed by an attempt that has not been seen spent yet.
///
/// An input is reserved when an attempt starts building, released if the
/// attempt fails, and kept after a recorded submission until the wallet stops
/// reporting it. With a store attached the set outlives the process, so a
/// later run will not spend inputs an earlier run already submitted.
#[derive(Default)]
pub struct InputReservations {
    reserved: Mutex<HashSet<OutputRef>>,
    store: Option<Arc<Store>>,
}

fn reservation_key(r: &OutputRef) -> [u8; 36] {
    let mut key = [0u8; 36];
    key[..32].copy_from_slice(&r.tx_id);
    key[32..].copy_from_slice(&r.index.to_be_bytes());
    key
}

impl InputReservations {
    /// Reservations for this process only.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reservations persisted in `store`, starting from what it holds.
    pub fn open(store: Arc<Store>) -> Result<Self> {
        let refs: Vec<OutputRef> = store.scan(CF_RESERVATIONS).map_err(storage_err)?;
        debug!(count = refs.len(), "loaded input reservations");
        Ok(InputReservations { reserved: Mutex::new(refs.into_iter().collect()), store: Some(store) })
    }

    pub fn reserve(&self, refs: &[OutputRef]) -> Result<()> {
        let mut set = self.reserved.lock().unwrap();
        if let Some(store) = &self.store {
            for r in refs {
                store.put(CF_RESERVATIONS, &reservation_key(r), r).map_err(storage_err)?;
            }
        }
        set.extend(refs.iter().copied());
        Ok(())
    }

    pub fn release(&self, refs: &[OutputRef]) {
        let mut set = self.reserved.lock().unwrap();
        for r in refs {
            set.remove(r);
        }
        self.forget(refs);
    }

    // A failed delete only leaves a stale row; it is pruned on the next load
    // once the wallet stops reporting the output.
    fn forget(&self, refs: &[OutputRef]) {
        if let Some(store) = &self.store {
            for r in refs {
                if let Err(e) = store.delete(CF_RESERVATIONS, &reservation_key(r)) {
                    warn!(output = %r, error = %e, "could not drop stored reservation");
                }
            }
        }
    }

    pub fn is_reserved(&self, r: &OutputRef) -> bool {
        self.reserved.lock().unwrap().contains(r)
    }

    pub fn len(&self) -> usize {
        self.reserved.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop reservations for outputs the wallet no longer reports (spent on
    /// chain), then return the outputs that are still free to spend.
    pub fn filter_available(&self, outputs: Vec<SpendableOutput>) -> Vec<SpendableOutput> {
        let mut set = self.reserved.lock().unwrap();
        let reported: HashSet<OutputRef> = outputs.iter().map(|o| o.output_ref).collect();
        let spent: Vec<OutputRef> = set.iter().filter(|r| !reported.contains(r)).copied().collect();
        for r in &spent {
            set.remove(r);
        }
        self.forget(&spent);
        outputs.into_iter().filter(|o| !set.contains(&o.output_ref)).collect()
    }
}
