//! Two-pass linear fee calculation.
//!
//! The fee depends on the transaction size, the size depends on the change
//! output, and the change depends on the fee. Pass 1 sizes a draft built with
//! a flat estimate; pass 2 prices that draft exactly and recomputes change.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PaymentError, Result};
use crate::tx::DraftTransaction;

/// Pass-1 fee assumption, in lovelace.
pub const FLAT_FEE_ESTIMATE: u64 = 200_000;

/// Added on top of the sized fee to pay for the witness bytes, which are not
/// present when the draft is sized. Heuristic, not a witness-size bound.
pub const WITNESS_MARGIN: u64 = 10_000;

/// Linear fee coefficients and size limits for the current epoch.
/// Fetched fresh for every attempt.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProtocolParameters {
    pub min_fee_a: u64,
    pub min_fee_b: u64,
    pub max_tx_size: u64,
    pub max_value_size: u64,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChainTip {
    pub slot: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeQuote {
    pub fee: u64,
    pub change: u64,
}

/// Knobs for the two passes; the defaults are the documented constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeePolicy {
    pub flat_estimate: u64,
    pub witness_margin: u64,
}

impl Default for FeePolicy {
    fn default() -> Self {
        FeePolicy { flat_estimate: FLAT_FEE_ESTIMATE, witness_margin: WITNESS_MARGIN }
    }
}

/// `fee = min_fee_a * size + min_fee_b`, checked.
pub fn linear_fee(params: &ProtocolParameters, size: u64) -> Result<u64> {
    params
        .min_fee_a
        .checked_mul(size)
        .and_then(|v| v.checked_add(params.min_fee_b))
        .ok_or(PaymentError::Overflow("linear fee"))
}

fn change_after(total_input: u64, send_amount: u64, fee: u64) -> Result<u64> {
    let required = send_amount.checked_add(fee).ok_or(PaymentError::Overflow("send amount plus fee"))?;
    total_input
        .checked_sub(required)
        .ok_or(PaymentError::InsufficientFunds { required, available: total_input })
}

/// `build_draft(change, fee)` must return the draft the caller would submit
/// with those values; only its size is used here.
pub fn compute_fee<F>(
    total_input: u64,
    send_amount: u64,
    params: &ProtocolParameters,
    policy: FeePolicy,
    build_draft: F,
) -> Result<FeeQuote>
where
    F: Fn(u64, u64) -> Result<DraftTransaction>,
{
    // Pass 1: flat estimate.
    let provisional_change = change_after(total_input, send_amount, policy.flat_estimate)?;
    let provisional = build_draft(provisional_change, policy.flat_estimate)?;

    // Pass 2: price the provisional draft.
    let size = provisional.unsigned_size();
    if params.max_tx_size > 0 && size > params.max_tx_size {
        return Err(PaymentError::TxTooLarge { size, max: params.max_tx_size });
    }
    let fee = linear_fee(params, size)?
        .checked_add(policy.witness_margin)
        .ok_or(PaymentError::Overflow("fee plus witness margin"))?;

    // Sufficient for the estimate does not imply sufficient for the exact fee.
    let change = change_after(total_input, send_amount, fee)?;
    debug!(size, fee, change, provisional_change, "fee converged");
    Ok(FeeQuote { fee, change })
}
