use crate::error::{PaymentError, Result};

pub const LOVELACE_PER_ADA: u64 = 1_000_000;
const DECIMALS: usize = 6;

/// Parse a user-entered ADA amount ("1", "2.5", "0.000001") into lovelace.
/// Zero, negative and over-precise amounts are rejected here so nothing
/// downstream ever sees them.
pub fn parse_ada(input: &str) -> Result<u64> {
    let s = input.trim();
    if s.is_empty() {
        return Err(PaymentError::InvalidAmount("amount is empty".into()));
    }
    if s.starts_with('-') {
        return Err(PaymentError::InvalidAmount(format!("{} is negative", s)));
    }
    let (whole, frac) = match s.split_once('.') {
        Some((w, f)) => (w, f),
        None => (s, ""),
    };
    if whole.is_empty() && frac.is_empty() {
        return Err(PaymentError::InvalidAmount(format!("'{}' is not a number", s)));
    }
    if !whole.chars().all(|c| c.is_ascii_digit()) || !frac.chars().all(|c| c.is_ascii_digit()) {
        return Err(PaymentError::InvalidAmount(format!("'{}' is not a number", s)));
    }
    if frac.len() > DECIMALS {
        return Err(PaymentError::InvalidAmount(format!("at most {} decimal places are allowed", DECIMALS)));
    }

    let whole: u64 = if whole.is_empty() {
        0
    } else {
        whole
            .parse()
            .map_err(|_| PaymentError::InvalidAmount(format!("{} is too large", s)))?
    };
    let mut frac_units: u64 = 0;
    if !frac.is_empty() {
        let padded = format!("{:0<width$}", frac, width = DECIMALS);
        frac_units = padded
            .parse()
            .map_err(|_| PaymentError::InvalidAmount(format!("'{}' is not a number", s)))?;
    }

    let lovelace = whole
        .checked_mul(LOVELACE_PER_ADA)
        .and_then(|v| v.checked_add(frac_units))
        .ok_or(PaymentError::Overflow("amount in lovelace"))?;
    if lovelace == 0 {
        return Err(PaymentError::InvalidAmount("amount must be greater than zero".into()));
    }
    Ok(lovelace)
}

/// Render lovelace as an ADA string with six decimals.
pub fn format_ada(lovelace: u64) -> String {
    format!("{}.{:06}", lovelace / LOVELACE_PER_ADA, lovelace % LOVELACE_PER_ADA)
}
