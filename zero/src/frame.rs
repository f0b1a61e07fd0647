//! Wire framing
//!
//! A request frame is `request_id[32] || function_name[80] || payload`, the
//! name right-padded with spaces. A response frame is
//! `request_id[32] || body`; an empty body means the worker could not make
//! sense of the request.

use crate::config::{FUNCTION_NAME_LEN, REQUEST_HEADER_LEN, REQUEST_ID_LEN};
use crate::{Error, Result};
use bytes::{BufMut, Bytes, BytesMut};
use std::fmt;

/// Correlates a response with its request
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestId([u8; REQUEST_ID_LEN]);

impl RequestId {
    /// Fresh id: the lower-case hex of a random UUID
    pub fn new() -> Self {
        let mut id = [0u8; REQUEST_ID_LEN];
        uuid::Uuid::new_v4()
            .simple()
            .encode_lower(&mut id);
        Self(id)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let id: [u8; REQUEST_ID_LEN] = bytes.try_into().map_err(|_| {
            Error::protocol(
                "request id has the wrong length",
                Some(REQUEST_ID_LEN.to_string()),
                Some(bytes.len().to_string()),
            )
        })?;
        if !id.is_ascii() {
            return Err(Error::protocol("request id is not ASCII", None, None));
        }
        Ok(Self(id))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn as_str(&self) -> &str {
        // ASCII is checked on construction
        std::str::from_utf8(&self.0).unwrap_or_default()
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self.as_str())
    }
}

/// A call as it travels from client to worker
#[derive(Debug, Clone, PartialEq)]
pub struct RequestFrame {
    pub request_id: RequestId,
    pub function_name: String,
    pub payload: Bytes,
}

impl RequestFrame {
    pub fn new(
        request_id: RequestId,
        function_name: impl Into<String>,
        payload: impl Into<Bytes>,
    ) -> Result<Self> {
        let function_name = function_name.into();
        if function_name.len() > FUNCTION_NAME_LEN {
            return Err(Error::protocol(
                format!("function name `{function_name}` is too long"),
                Some(format!("at most {FUNCTION_NAME_LEN} bytes")),
                Some(format!("{} bytes", function_name.len())),
            ));
        }
        Ok(Self {
            request_id,
            function_name,
            payload: payload.into(),
        })
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(REQUEST_HEADER_LEN + self.payload.len());
        buf.put_slice(self.request_id.as_bytes());
        buf.put_slice(self.function_name.as_bytes());
        buf.put_bytes(b' ', FUNCTION_NAME_LEN - self.function_name.len());
        buf.put_slice(&self.payload);
        buf.freeze()
    }

    pub fn parse(data: &Bytes) -> Result<Self> {
        if data.len() < REQUEST_HEADER_LEN {
            return Err(Error::protocol(
                "request frame is too short",
                Some(format!("at least {REQUEST_HEADER_LEN} bytes")),
                Some(format!("{} bytes", data.len())),
            ));
        }
        let request_id = RequestId::from_bytes(&data[..REQUEST_ID_LEN])?;
        let function_name = std::str::from_utf8(&data[REQUEST_ID_LEN..REQUEST_HEADER_LEN])
            .map_err(|_| Error::protocol("function name is not UTF-8", None, None))?
            .trim()
            .to_string();
        Ok(Self {
            request_id,
            function_name,
            payload: data.slice(REQUEST_HEADER_LEN..),
        })
    }
}

/// A reply as it travels from worker to client
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseFrame {
    pub request_id: RequestId,
    pub body: Bytes,
}

impl ResponseFrame {
    pub fn new(request_id: RequestId, body: impl Into<Bytes>) -> Self {
        Self {
            request_id,
            body: body.into(),
        }
    }

    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(REQUEST_ID_LEN + self.body.len());
        buf.put_slice(self.request_id.as_bytes());
        buf.put_slice(&self.body);
        buf.freeze()
    }

    pub fn parse(data: &Bytes) -> Result<Self> {
        if data.len() < REQUEST_ID_LEN {
            return Err(Error::protocol(
                "response frame is too short",
                Some(format!("at least {REQUEST_ID_LEN} bytes")),
                Some(format!("{} bytes", data.len())),
            ));
        }
        Ok(Self {
            request_id: RequestId::from_bytes(&data[..REQUEST_ID_LEN])?,
            body: data.slice(REQUEST_ID_LEN..),
        })
    }

    /// An empty body marks a request the worker could not parse
    pub fn is_empty(&self) -> bool {
        self.body.is_empty()
    }
}
