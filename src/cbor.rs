//! CBOR helpers over `minicbor` for the ledger's transaction and wallet
//! encodings. The encoder writes shortest-form heads only, so identical
//! structures encode to identical bytes.

use minicbor::encode;
use std::convert::Infallible;

use crate::error::{PaymentError, Result};

const MAJOR_TAG: u8 = 6;
const BYTES_INDEFINITE: u8 = 0x5f;
const BREAK: u8 = 0xff;

/// Chainable encoder over a growable buffer.
pub struct Encoder {
    inner: minicbor::Encoder<Vec<u8>>,
}

impl Default for Encoder {
    fn default() -> Self {
        Encoder { inner: minicbor::Encoder::new(Vec::new()) }
    }
}

// Writes go to a Vec, whose writer error type is uninhabited.
fn written<T>(r: std::result::Result<T, encode::Error<Infallible>>) {
    if let Err(e) = r {
        unreachable!("cbor write into Vec failed: {}", e);
    }
}

impl Encoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn u64(&mut self, v: u64) -> &mut Self {
        written(self.inner.u64(v));
        self
    }

    pub fn bytes(&mut self, b: &[u8]) -> &mut Self {
        written(self.inner.bytes(b));
        self
    }

    pub fn array(&mut self, len: u64) -> &mut Self {
        written(self.inner.array(len));
        self
    }

    pub fn map(&mut self, len: u64) -> &mut Self {
        written(self.inner.map(len));
        self
    }

    pub fn bool(&mut self, v: bool) -> &mut Self {
        written(self.inner.bool(v));
        self
    }

    pub fn null(&mut self) -> &mut Self {
        written(self.inner.null());
        self
    }

    /// Splice an already-encoded item (e.g. a wallet-produced witness set).
    pub fn raw(&mut self, item: &[u8]) -> &mut Self {
        self.inner.writer_mut().extend_from_slice(item);
        self
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.inner.into_writer()
    }
}

pub struct Decoder<'a> {
    inner: minicbor::Decoder<'a>,
}

impl<'a> Decoder<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Decoder { inner: minicbor::Decoder::new(data) }
    }

    pub fn position(&self) -> usize {
        self.inner.position()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.position() >= self.inner.input().len()
    }

    fn peek(&self) -> Result<u8> {
        self.inner
            .input()
            .get(self.inner.position())
            .copied()
            .ok_or_else(|| PaymentError::Decode("unexpected end of input".into()))
    }

    pub fn peek_major(&self) -> Result<u8> {
        Ok(self.peek()? >> 5)
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(self.inner.u64()?)
    }

    /// Byte string, definite or chunked.
    pub fn bytes(&mut self) -> Result<Vec<u8>> {
        if self.peek()? != BYTES_INDEFINITE {
            return Ok(self.inner.bytes()?.to_vec());
        }
        let mut out = Vec::new();
        for chunk in self.inner.bytes_iter()? {
            out.extend_from_slice(chunk?);
        }
        Ok(out)
    }

    /// Array header; `None` for an indefinite array terminated by a break.
    pub fn array(&mut self) -> Result<Option<u64>> {
        Ok(self.inner.array()?)
    }

    pub fn map(&mut self) -> Result<Option<u64>> {
        Ok(self.inner.map()?)
    }

    pub fn bool(&mut self) -> Result<bool> {
        Ok(self.inner.bool()?)
    }

    pub fn null(&mut self) -> Result<()> {
        Ok(self.inner.null()?)
    }

    /// Consumes a break marker if one is next.
    pub fn at_break(&mut self) -> Result<bool> {
        if self.peek()? == BREAK {
            let next = self.inner.position() + 1;
            self.inner.set_position(next);
            return Ok(true);
        }
        Ok(false)
    }

    /// Skips a tag if present (e.g. the 258 set tag some encoders emit).
    pub fn skip_tag(&mut self) -> Result<()> {
        if self.peek_major()? == MAJOR_TAG {
            self.inner.tag()?;
        }
        Ok(())
    }

    /// Skips one complete item and returns its raw encoding.
    pub fn skip(&mut self) -> Result<&'a [u8]> {
        let start = self.inner.position();
        self.inner.skip()?;
        Ok(&self.inner.input()[start..self.inner.position()])
    }

    pub fn finish(&self) -> Result<()> {
        if !self.is_empty() {
            let left = self.inner.input().len() - self.inner.position();
            return Err(PaymentError::Decode(format!("{} trailing bytes", left)));
        }
        Ok(())
    }
}

/// Iterate the items of an array or map whose header reported `len`.
/// Returns `false` once the container is exhausted.
pub fn has_next(dec: &mut Decoder<'_>, len: Option<u64>, seen: u64) -> Result<bool> {
    match len {
        Some(n) => Ok(seen < n),
        None => Ok(!dec.at_break()?),
    }
}
