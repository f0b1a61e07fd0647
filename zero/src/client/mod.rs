//! Clients
//!
//! [`ZeroClient`] blocks the calling thread; [`AsyncZeroClient`] is for
//! tokio code. Both lazily open one connection per calling context, start
//! each with a `connect` handshake and turn the server's reserved error
//! maps into typed errors.

mod async_client;
mod pool;
mod sync_client;

pub use async_client::AsyncZeroClient;
pub use pool::{ConnectionPool, ContextKey};
pub use sync_client::ZeroClient;

use crate::config::{FUNCTION_NOT_FOUND, SERVER_EXCEPTION, VALIDATION_ERROR};
use crate::{Encoder, Error, Result, Value};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Encode a call argument; a null argument travels as an empty payload
pub(crate) fn encode_argument<A: Serialize + ?Sized, E: Encoder>(
    encoder: &E,
    arg: &A,
) -> Result<Bytes> {
    let encoded = encoder.encode(arg)?;
    if encoded == E::NIL {
        Ok(Bytes::new())
    } else {
        Ok(Bytes::from(encoded))
    }
}

/// Decode a response body, translating reserved error maps
pub(crate) fn check_response<R: DeserializeOwned, E: Encoder>(encoder: &E, body: &[u8]) -> Result<R> {
    if body.is_empty() {
        return Err(Error::protocol(
            "the server could not parse the request",
            None,
            None,
        ));
    }
    if encoder.may_be_fault(body) {
        if let Ok(Value::Map(entries)) = encoder.decode(body) {
            if let [(Value::Str(key), detail)] = entries.as_slice() {
                let detail = match detail {
                    Value::Str(s) => s.clone(),
                    other => other.to_string(),
                };
                match key.as_str() {
                    FUNCTION_NOT_FOUND => return Err(Error::method_not_found(detail)),
                    SERVER_EXCEPTION => return Err(Error::remote_exception(detail)),
                    VALIDATION_ERROR => return Err(Error::validation(detail)),
                    _ => {}
                }
            }
        }
    }
    encoder.decode_type(body)
}
