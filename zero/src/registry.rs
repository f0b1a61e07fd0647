//! Handler registry
//!
//! Each registered handler is stored as an [`RpcEntry`]: its declared input
//! and output types plus an [`Invoker`] that closes over the concrete Rust
//! types and performs decode, call and encode. Handlers have zero or one
//! argument and return `Result<R, E>` where `E: Display`; the error's
//! display text is what the client sees.

use crate::config::{FUNCTION_NAME_LEN, RESERVED_FUNCTIONS};
use crate::{Contract, Encoder, Error, Result, TypeDescriptor};
use bytes::Bytes;
use futures::future::BoxFuture;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

/// Why a handler produced no value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// The payload did not decode into the declared input type
    Validation(String),
    /// The handler failed, or its result could not be encoded
    Server(String),
}

pub type Outcome = std::result::Result<Bytes, Fault>;

/// Runs a synchronous handler: decode, call, encode
pub type SyncInvoker = Arc<dyn Fn(Bytes) -> Outcome + Send + Sync>;

/// Starts an asynchronous handler. Decoding happens before the future is
/// built, so validation failures never reach the async runner.
pub type AsyncInvoker = Arc<dyn Fn(Bytes) -> StartOutcome + Send + Sync>;

pub type StartOutcome = std::result::Result<BoxFuture<'static, Outcome>, Fault>;

#[derive(Clone)]
pub enum Invoker {
    Sync(SyncInvoker),
    Async(AsyncInvoker),
}

/// A registered handler
#[derive(Clone)]
pub struct RpcEntry {
    pub name: String,
    /// `None` when the handler takes no argument
    pub input: Option<TypeDescriptor>,
    pub output: TypeDescriptor,
    pub invoker: Invoker,
}

impl RpcEntry {
    pub fn is_async(&self) -> bool {
        matches!(self.invoker, Invoker::Async(_))
    }
}

impl std::fmt::Debug for RpcEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcEntry")
            .field("name", &self.name)
            .field("input", &self.input)
            .field("output", &self.output)
            .field("is_async", &self.is_async())
            .finish()
    }
}

/// A synchronous handler taking `Args`, either `()` or `(A,)`
pub trait SyncHandler<Args>: Send + Sync + 'static {
    fn input() -> Option<TypeDescriptor>;
    fn output() -> TypeDescriptor;
    fn into_invoker<E: Encoder>(self, encoder: E) -> SyncInvoker;
}

/// An asynchronous handler taking `Args`, either `()` or `(A,)`
pub trait AsyncHandler<Args>: Send + Sync + 'static {
    fn input() -> Option<TypeDescriptor>;
    fn output() -> TypeDescriptor;
    fn into_invoker<E: Encoder>(self, encoder: E) -> AsyncInvoker;
}

fn decode_arg<A: Contract, E: Encoder>(encoder: &E, payload: &[u8]) -> std::result::Result<A, Fault> {
    let payload = if payload.is_empty() { E::NIL } else { payload };
    encoder
        .decode_type(payload)
        .map_err(|e| Fault::Validation(remote_detail(e)))
}

fn encode_result<R: Contract, Er: Display, E: Encoder>(
    encoder: &E,
    result: std::result::Result<R, Er>,
) -> Outcome {
    let value = result.map_err(|e| Fault::Server(e.to_string()))?;
    encoder
        .encode(&value)
        .map(Bytes::from)
        .map_err(|e| Fault::Server(format!("failed to encode result: {e}")))
}

// Strip the local variant prefix; the client adds its own
fn remote_detail(err: Error) -> String {
    match err {
        Error::Validation { detail } => detail,
        other => other.to_string(),
    }
}

impl<F, R, Er> SyncHandler<()> for F
where
    F: Fn() -> std::result::Result<R, Er> + Send + Sync + 'static,
    R: Contract,
    Er: Display,
{
    fn input() -> Option<TypeDescriptor> {
        None
    }

    fn output() -> TypeDescriptor {
        R::descriptor()
    }

    fn into_invoker<E: Encoder>(self, encoder: E) -> SyncInvoker {
        Arc::new(move |_payload: Bytes| -> Outcome { encode_result(&encoder, self()) })
    }
}

impl<F, A, R, Er> SyncHandler<(A,)> for F
where
    F: Fn(A) -> std::result::Result<R, Er> + Send + Sync + 'static,
    A: Contract,
    R: Contract,
    Er: Display,
{
    fn input() -> Option<TypeDescriptor> {
        Some(A::descriptor())
    }

    fn output() -> TypeDescriptor {
        R::descriptor()
    }

    fn into_invoker<E: Encoder>(self, encoder: E) -> SyncInvoker {
        Arc::new(move |payload: Bytes| -> Outcome {
            let arg = decode_arg::<A, E>(&encoder, &payload)?;
            encode_result(&encoder, self(arg))
        })
    }
}

impl<F, Fut, R, Er> AsyncHandler<()> for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, Er>> + Send + 'static,
    R: Contract,
    Er: Display,
{
    fn input() -> Option<TypeDescriptor> {
        None
    }

    fn output() -> TypeDescriptor {
        R::descriptor()
    }

    fn into_invoker<E: Encoder>(self, encoder: E) -> AsyncInvoker {
        Arc::new(move |_payload: Bytes| -> StartOutcome {
            let encoder = encoder.clone();
            let fut = self();
            Ok(Box::pin(async move { encode_result(&encoder, fut.await) }))
        })
    }
}

impl<F, Fut, A, R, Er> AsyncHandler<(A,)> for F
where
    F: Fn(A) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = std::result::Result<R, Er>> + Send + 'static,
    A: Contract,
    R: Contract,
    Er: Display,
{
    fn input() -> Option<TypeDescriptor> {
        Some(A::descriptor())
    }

    fn output() -> TypeDescriptor {
        R::descriptor()
    }

    fn into_invoker<E: Encoder>(self, encoder: E) -> AsyncInvoker {
        Arc::new(move |payload: Bytes| -> StartOutcome {
            let arg = decode_arg::<A, E>(&encoder, &payload)?;
            let encoder = encoder.clone();
            let fut = self(arg);
            Ok(Box::pin(async move { encode_result(&encoder, fut.await) }))
        })
    }
}

/// Name-to-handler table. Read-only once the server starts.
#[derive(Debug, Clone, Default)]
pub struct RpcRegistry {
    entries: BTreeMap<String, RpcEntry>,
}

impl RpcRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate and insert an entry. On failure the registry is unchanged.
    pub fn insert(&mut self, entry: RpcEntry) -> Result<()> {
        validate_signature(&entry.name, entry.input.as_ref(), &entry.output)?;
        self.validate_name(&entry.name)?;
        tracing::debug!(
            "registered {} handler `{}` ({} -> {})",
            if entry.is_async() { "async" } else { "sync" },
            entry.name,
            entry
                .input
                .as_ref()
                .map_or_else(|| "()".to_string(), |t| t.to_string()),
            entry.output
        );
        self.entries.insert(entry.name.clone(), entry);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&RpcEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Entries in name order
    pub fn entries(&self) -> impl Iterator<Item = &RpcEntry> {
        self.entries.values()
    }

    fn validate_name(&self, name: &str) -> Result<()> {
        if name.is_empty() {
            return Err(Error::registration(name, "name must not be empty"));
        }
        if name.len() > FUNCTION_NAME_LEN {
            return Err(Error::registration(
                name,
                format!("name is longer than {FUNCTION_NAME_LEN} bytes"),
            ));
        }
        if RESERVED_FUNCTIONS.contains(&name) {
            return Err(Error::registration(name, "name is reserved"));
        }
        if self.entries.contains_key(name) {
            return Err(Error::registration(name, "a handler with this name is already registered"));
        }
        Ok(())
    }
}

fn validate_signature(
    name: &str,
    input: Option<&TypeDescriptor>,
    output: &TypeDescriptor,
) -> Result<()> {
    if let Some(input) = input {
        input
            .validate()
            .map_err(|reason| Error::registration(name, format!("invalid argument type: {reason}")))?;
    }
    if output.is_unit() {
        return Err(Error::registration(name, "handlers must return a value"));
    }
    if output.is_optional() {
        return Err(Error::registration(name, "return type must not be optional"));
    }
    output
        .validate()
        .map_err(|reason| Error::registration(name, format!("invalid return type: {reason}")))
}

/// Build the entry for a synchronous handler
pub fn sync_entry<H, Args, E>(name: impl Into<String>, handler: H, encoder: E) -> RpcEntry
where
    H: SyncHandler<Args>,
    E: Encoder,
{
    RpcEntry {
        name: name.into(),
        input: H::input(),
        output: H::output(),
        invoker: Invoker::Sync(handler.into_invoker(encoder)),
    }
}

/// Build the entry for an asynchronous handler
pub fn async_entry<H, Args, E>(name: impl Into<String>, handler: H, encoder: E) -> RpcEntry
where
    H: AsyncHandler<Args>,
    E: Encoder,
{
    RpcEntry {
        name: name.into(),
        input: H::input(),
        output: H::output(),
        invoker: Invoker::Async(handler.into_invoker(encoder)),
    }
}
