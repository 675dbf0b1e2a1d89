use bech32::{FromBase32, ToBase32, Variant};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::error::{PaymentError, Result};

pub const HRP_PAYMENT: &str = "addr";
pub const HRP_PAYMENT_TEST: &str = "addr_test";
pub const HRP_STAKE: &str = "stake";
pub const HRP_STAKE_TEST: &str = "stake_test";

/// A ledger address in its raw header+payload byte form.
///
/// The top nibble of the header byte is the address type; the low nibble is
/// the network tag (0 for test networks, 1 for the production network).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(try_from = "Vec<u8>")]
pub struct Address(Vec<u8>);

// Header byte plus one 28-byte credential hash.
const SINGLE_CREDENTIAL_LEN: usize = 29;
// Header byte plus payment and stake credential hashes.
const BASE_LEN: usize = 57;
// Single credential plus a chain pointer of at least three one-byte varints.
const POINTER_MIN_LEN: usize = 32;

impl Address {
    /// Checks the payload length against the header's address type.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self> {
        let header = *bytes
            .first()
            .ok_or_else(|| PaymentError::InvalidAddress("empty address".into()))?;
        let len = bytes.len();
        let fits = match header >> 4 {
            0..=3 => len == BASE_LEN,
            4 | 5 => len >= POINTER_MIN_LEN,
            6 | 7 | 14 | 15 => len == SINGLE_CREDENTIAL_LEN,
            // Legacy bootstrap addresses are CBOR with their own checksum.
            8 => len > 1,
            kind => {
                return Err(PaymentError::InvalidAddress(format!("unknown address type {}", kind)));
            }
        };
        if !fits {
            return Err(PaymentError::InvalidAddress(format!(
                "{} bytes is not a valid length for header {:#04x}",
                len, header
            )));
        }
        Ok(Address(bytes))
    }

    /// Wallets hand addresses over as hex-encoded bytes.
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s.trim())
            .map_err(|e| PaymentError::InvalidAddress(format!("bad hex: {}", e)))?;
        Self::from_bytes(bytes)
    }

    pub fn from_bech32(s: &str) -> Result<Self> {
        let (hrp, data, variant) = bech32::decode(s.trim())
            .map_err(|e| PaymentError::InvalidAddress(format!("{}: {}", s, e)))?;
        if variant != Variant::Bech32 {
            return Err(PaymentError::InvalidAddress(format!("{}: expected bech32, got bech32m", s)));
        }
        if !matches!(hrp.as_str(), HRP_PAYMENT | HRP_PAYMENT_TEST | HRP_STAKE | HRP_STAKE_TEST) {
            return Err(PaymentError::InvalidAddress(format!("unexpected prefix '{}'", hrp)));
        }
        let bytes = Vec::<u8>::from_base32(&data)
            .map_err(|e| PaymentError::InvalidAddress(format!("{}: {}", s, e)))?;
        let addr = Self::from_bytes(bytes)?;
        if addr.hrp() != Some(hrp.as_str()) {
            return Err(PaymentError::InvalidAddress(format!(
                "prefix '{}' does not match address header {:#04x}",
                hrp,
                addr.header()
            )));
        }
        Ok(addr)
    }

    /// Accepts either a bech32 string or raw hex, in that order.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.starts_with(HRP_PAYMENT) || s.starts_with(HRP_STAKE) {
            Self::from_bech32(s)
        } else {
            Self::from_hex(s)
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn header(&self) -> u8 {
        self.0[0]
    }

    pub fn kind(&self) -> u8 {
        self.header() >> 4
    }

    pub fn network_tag(&self) -> u8 {
        self.header() & 0x0f
    }

    /// Human-readable prefix used when rendering, `None` for legacy (Byron)
    /// addresses which are not bech32.
    pub fn hrp(&self) -> Option<&'static str> {
        let test = self.network_tag() == 0;
        match self.kind() {
            0..=7 => Some(if test { HRP_PAYMENT_TEST } else { HRP_PAYMENT }),
            14 | 15 => Some(if test { HRP_STAKE_TEST } else { HRP_STAKE }),
            _ => None,
        }
    }

    pub fn to_bech32(&self) -> Option<String> {
        let hrp = self.hrp()?;
        bech32::encode(hrp, self.0.to_base32(), Variant::Bech32).ok()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.to_bech32() {
            Some(s) => f.write_str(&s),
            None => f.write_str(&hex::encode(&self.0)),
        }
    }
}

impl TryFrom<Vec<u8>> for Address {
    type Error = PaymentError;

    fn try_from(bytes: Vec<u8>) -> Result<Self> {
        Address::from_bytes(bytes)
    }
}

/// Shortens a long address for display: `addr_test1qz...k3x9`.
/// Counts characters, so arbitrary user input is safe to pass.
pub fn abbreviate(addr: &str) -> String {
    let count = addr.chars().count();
    if count <= 20 {
        return addr.to_string();
    }
    let head: String = addr.chars().take(12).collect();
    let tail: String = addr.chars().skip(count - 6).collect();
    format!("{}...{}", head, tail)
}
