//! Transaction body assembly and its canonical encoding.
//!
//! Body layout (CBOR map, integer keys, ascending):
//!   0: [[tx_id, index], ...]   inputs
//!   1: [[address, coin], ...]  outputs
//!   2: fee
//!   3: ttl                     omitted when no tip was available
//!
//! A full transaction is `[body, witness_set, true, null]`.

use blake2::digest::consts::U32;
use blake2::{Blake2b, Digest};
use serde::{Deserialize, Serialize};

use crate::address::Address;
use crate::cbor::{has_next, Decoder, Encoder};
use crate::error::{PaymentError, Result};
use crate::fee::ChainTip;
use crate::utxo::{InputSet, OutputRef};

/// Validity window added to the current tip slot (about an hour).
pub const TTL_HORIZON_SLOTS: u64 = 3600;

const KEY_INPUTS: u64 = 0;
const KEY_OUTPUTS: u64 = 1;
const KEY_FEE: u64 = 2;
const KEY_TTL: u64 = 3;

// An empty witness set (0xa0), `true` and `null` around the body.
const UNSIGNED_ENVELOPE_BYTES: u64 = 4;

type Blake2b256 = Blake2b<U32>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxOutput {
    pub address: Address,
    pub value: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DraftTransaction {
    pub inputs: Vec<OutputRef>,
    pub outputs: Vec<TxOutput>,
    pub fee: u64,
    /// 0 means no expiry.
    pub ttl_slot: u64,
}

impl DraftTransaction {
    pub fn output_total(&self) -> Result<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.value))
            .ok_or(PaymentError::Overflow("output total"))
    }

    /// `sum(inputs) == sum(outputs) + fee`, exactly.
    pub fn check_balance(&self, input_total: u64) -> Result<()> {
        let outputs = self.output_total()?;
        let spent = outputs.checked_add(self.fee).ok_or(PaymentError::Overflow("outputs plus fee"))?;
        if spent != input_total {
            return Err(PaymentError::Unbalanced { inputs: input_total, outputs, fee: self.fee });
        }
        Ok(())
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        self.encode_body(&mut enc);
        enc.into_bytes()
    }

    fn encode_body(&self, enc: &mut Encoder) {
        enc.map(if self.ttl_slot > 0 { 4 } else { 3 });

        enc.u64(KEY_INPUTS).array(self.inputs.len() as u64);
        for input in &self.inputs {
            enc.array(2).bytes(&input.tx_id).u64(input.index as u64);
        }

        enc.u64(KEY_OUTPUTS).array(self.outputs.len() as u64);
        for output in &self.outputs {
            enc.array(2).bytes(output.address.as_bytes()).u64(output.value);
        }

        enc.u64(KEY_FEE).u64(self.fee);
        if self.ttl_slot > 0 {
            enc.u64(KEY_TTL).u64(self.ttl_slot);
        }
    }

    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        let draft = Self::decode_body(&mut dec)?;
        dec.finish()?;
        Ok(draft)
    }

    fn decode_body(dec: &mut Decoder<'_>) -> Result<Self> {
        let mut inputs = None;
        let mut outputs = None;
        let mut fee = None;
        let mut ttl_slot = 0;

        let len = dec.map()?;
        let mut seen = 0;
        while has_next(dec, len, seen)? {
            seen += 1;
            match dec.u64()? {
                KEY_INPUTS => inputs = Some(decode_inputs(dec)?),
                KEY_OUTPUTS => outputs = Some(decode_outputs(dec)?),
                KEY_FEE => fee = Some(dec.u64()?),
                KEY_TTL => ttl_slot = dec.u64()?,
                other => return Err(PaymentError::Decode(format!("unsupported body field {}", other))),
            }
        }

        Ok(DraftTransaction {
            inputs: inputs.ok_or_else(|| PaymentError::Decode("body has no inputs".into()))?,
            outputs: outputs.ok_or_else(|| PaymentError::Decode("body has no outputs".into()))?,
            fee: fee.ok_or_else(|| PaymentError::Decode("body has no fee".into()))?,
            ttl_slot,
        })
    }

    /// Size of the transaction as it will be sized for the fee, before any
    /// witness is attached.
    pub fn unsigned_size(&self) -> u64 {
        self.serialize().len() as u64 + UNSIGNED_ENVELOPE_BYTES
    }

    /// Transaction id: blake2b-256 of the body bytes.
    pub fn tx_id(&self) -> [u8; 32] {
        let mut hasher = Blake2b256::new();
        hasher.update(self.serialize());
        hasher.finalize().into()
    }
}

fn decode_inputs(dec: &mut Decoder<'_>) -> Result<Vec<OutputRef>> {
    dec.skip_tag()?;
    let len = dec.array()?;
    let mut out = Vec::new();
    let mut seen = 0;
    while has_next(dec, len, seen)? {
        seen += 1;
        if dec.array()? != Some(2) {
            return Err(PaymentError::Decode("input must be a 2-element array".into()));
        }
        out.push(decode_output_ref_fields(dec)?);
    }
    Ok(out)
}

/// The `tx_id, index` pair inside an already-opened input array.
pub(crate) fn decode_output_ref_fields(dec: &mut Decoder<'_>) -> Result<OutputRef> {
    let id = dec.bytes()?;
    let tx_id: [u8; 32] = id
        .as_slice()
        .try_into()
        .map_err(|_| PaymentError::Decode(format!("transaction id must be 32 bytes, got {}", id.len())))?;
    let index = u32::try_from(dec.u64()?).map_err(|_| PaymentError::Decode("output index out of range".into()))?;
    Ok(OutputRef { tx_id, index })
}

fn decode_outputs(dec: &mut Decoder<'_>) -> Result<Vec<TxOutput>> {
    let len = dec.array()?;
    let mut out = Vec::new();
    let mut seen = 0;
    while has_next(dec, len, seen)? {
        seen += 1;
        if dec.array()? != Some(2) {
            return Err(PaymentError::Decode("output must be a 2-element array".into()));
        }
        let address = Address::from_bytes(dec.bytes()?)?;
        let value = dec.u64()?;
        out.push(TxOutput { address, value });
    }
    Ok(out)
}

/// TTL for a draft built now: `tip + horizon`, or 0 (no expiry) without a tip.
pub fn ttl_for(tip: Option<ChainTip>, horizon: u64) -> Result<u64> {
    match tip {
        Some(t) => t.slot.checked_add(horizon).ok_or(PaymentError::Overflow("ttl slot")),
        None => Ok(0),
    }
}

/// Build the draft: recipient output first, change second, TTL one
/// `TTL_HORIZON_SLOTS` past the tip.
pub fn assemble(
    inputs: &InputSet,
    recipient: &Address,
    send_amount: u64,
    change_address: &Address,
    change_amount: u64,
    fee: u64,
    tip: Option<ChainTip>,
) -> Result<DraftTransaction> {
    let ttl_slot = ttl_for(tip, TTL_HORIZON_SLOTS)?;
    assemble_with_ttl(inputs, recipient, send_amount, change_address, change_amount, fee, ttl_slot)
}

/// Same as [`assemble`] with an explicit TTL slot.
///
/// A zero change output is left out, since the ledger rejects empty outputs;
/// the balance check still holds because it carries no value.
pub fn assemble_with_ttl(
    inputs: &InputSet,
    recipient: &Address,
    send_amount: u64,
    change_address: &Address,
    change_amount: u64,
    fee: u64,
    ttl_slot: u64,
) -> Result<DraftTransaction> {
    let mut outputs = vec![TxOutput { address: recipient.clone(), value: send_amount }];
    if change_amount > 0 {
        outputs.push(TxOutput { address: change_address.clone(), value: change_amount });
    }

    let draft = DraftTransaction { inputs: inputs.refs(), outputs, fee, ttl_slot };
    draft.check_balance(inputs.total)?;
    Ok(draft)
}

/// A draft with the wallet's witness set attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    pub draft: DraftTransaction,
    witness_set: Vec<u8>,
}

impl SignedTransaction {
    /// `witness_set` must be a single encoded CBOR item, as returned by the
    /// wallet's `signTx`.
    pub fn new(draft: DraftTransaction, witness_set: Vec<u8>) -> Result<Self> {
        let mut dec = Decoder::new(&witness_set);
        if dec.peek_major()? != 5 {
            return Err(PaymentError::Decode("witness set must be a CBOR map".into()));
        }
        dec.skip()?;
        dec.finish()?;
        Ok(SignedTransaction { draft, witness_set })
    }

    pub fn witness_set(&self) -> &[u8] {
        &self.witness_set
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut enc = Encoder::new();
        enc.array(4);
        self.draft.encode_body(&mut enc);
        enc.raw(&self.witness_set).bool(true).null();
        enc.into_bytes()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut dec = Decoder::new(bytes);
        if dec.array()? != Some(4) {
            return Err(PaymentError::Decode("transaction must be a 4-element array".into()));
        }
        let draft = DraftTransaction::decode_body(&mut dec)?;
        let witness_set = dec.skip()?.to_vec();
        dec.bool()?;
        dec.null()?;
        dec.finish()?;
        SignedTransaction::new(draft, witness_set)
    }

    pub fn tx_id(&self) -> [u8; 32] {
        self.draft.tx_id()
    }
}

/// Draft encoded with an empty witness set, the form handed to `signTx`.
pub fn unsigned_hex(draft: &DraftTransaction) -> String {
    let mut enc = Encoder::new();
    enc.array(4);
    draft.encode_body(&mut enc);
    enc.map(0).bool(true).null();
    hex::encode(enc.into_bytes())
}
