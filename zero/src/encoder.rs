//! Payload encoding
//!
//! Servers and clients are generic over [`Encoder`]; both ends of a
//! connection must agree on it. [`MsgPackEncoder`] is the default.

use crate::{Error, Result, Value};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Turns values into payload bytes and back
pub trait Encoder: Clone + Default + Send + Sync + 'static {
    /// Encoding of the null value. An argument that encodes to this is sent
    /// as an empty payload, and an empty payload decodes as this.
    const NIL: &'static [u8];

    /// Encode a value
    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>>;

    /// Decode into the declared type, failing with [`Error::Validation`]
    /// when the bytes do not conform
    fn decode_type<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T>;

    /// Decode without a type hint
    fn decode(&self, data: &[u8]) -> Result<Value> {
        self.decode_type(data)
    }

    /// Cheap pre-check for a reserved error map in a response body. A
    /// `false` answer must be certain.
    fn may_be_fault(&self, _data: &[u8]) -> bool {
        true
    }
}

/// MessagePack via `rmp-serde`, records encoded as maps
#[derive(Debug, Clone, Copy, Default)]
pub struct MsgPackEncoder;

impl Encoder for MsgPackEncoder {
    const NIL: &'static [u8] = &[0xc0];

    fn encode<T: Serialize + ?Sized>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    fn decode_type<T: DeserializeOwned>(&self, data: &[u8]) -> Result<T> {
        rmp_serde::from_slice(data).map_err(|e| Error::validation(e.to_string()))
    }

    // Reserved error maps are always fixmaps with one entry
    fn may_be_fault(&self, data: &[u8]) -> bool {
        data.first() == Some(&0x81)
    }
}
