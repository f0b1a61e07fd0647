//! Workers
//!
//! A [`Worker`] connects a dealer socket to the broker's worker channel and
//! serves one request at a time. Each inbound message is
//! `[identity, request frame]`; the reply is `[identity, response frame]`.
//! What a request means is up to its [`FrameHandler`], normally a
//! [`Dispatcher`] over the server's handler registry.

use crate::broker::wait_closed;
use crate::codegen;
use crate::config::{
    CONNECT, CONNECTED, FAILED_TO_GENERATE_CLIENT_CODE, FUNCTION_NOT_FOUND, GET_RPC_CONTRACT,
    REQUEST_ID_LEN, SERVER_EXCEPTION, VALIDATION_ERROR,
};
use crate::frame::{RequestFrame, RequestId, ResponseFrame};
use crate::registry::{Fault, Invoker, Outcome, RpcRegistry};
use crate::transport::{DealerSocket, Multipart, Transport, ZmqTransport};
use crate::{Encoder, Error, MsgPackEncoder, Result, Value};
use async_trait::async_trait;
use bytes::Bytes;
use futures::future::BoxFuture;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

/// Turns a parsed request into a response body
#[async_trait]
pub trait FrameHandler: Send + Sync + 'static {
    async fn handle(&self, function_name: &str, payload: Bytes) -> Bytes;
}

/// Where a worker is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Init,
    Listening,
    Processing,
    Closed,
}

/// Dedicated runtime for async handlers, one per worker. The worker's own
/// loop awaits every handler to completion before reading the next frame.
pub struct AsyncRunner {
    runtime: Option<tokio::runtime::Runtime>,
}

impl AsyncRunner {
    pub fn new(name: &str) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(1)
            .thread_name(format!("{name}-async"))
            .enable_all()
            .build()?;
        Ok(Self {
            runtime: Some(runtime),
        })
    }

    /// Run a handler future to completion; a panic becomes a server fault
    pub async fn run(&self, fut: BoxFuture<'static, Outcome>) -> Outcome {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| Fault::Server("async runner is shut down".to_string()))?;
        match runtime.spawn(fut).await {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => Err(Fault::Server(panic_message(err.into_panic()))),
            Err(err) => Err(Fault::Server(err.to_string())),
        }
    }
}

impl Drop for AsyncRunner {
    fn drop(&mut self) {
        // Safe to call from inside another runtime
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

fn panic_message(panic: Box<dyn Any + Send>) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "handler panicked".to_string()
    }
}

/// Routes requests to registered handlers and answers the reserved methods
pub struct Dispatcher<E: Encoder = MsgPackEncoder> {
    registry: Arc<RpcRegistry>,
    encoder: E,
    runner: Option<AsyncRunner>,
}

impl<E: Encoder> Dispatcher<E> {
    /// The async runner is only started when the registry has async handlers
    pub fn new(name: &str, registry: Arc<RpcRegistry>, encoder: E) -> Result<Self> {
        let runner = if registry.entries().any(|e| e.is_async()) {
            Some(AsyncRunner::new(name)?)
        } else {
            None
        };
        Ok(Self {
            registry,
            encoder,
            runner,
        })
    }

    async fn invoke(&self, function_name: &str, payload: Bytes) -> Option<Outcome> {
        let entry = self.registry.get(function_name)?;
        let outcome = match &entry.invoker {
            Invoker::Sync(invoke) => {
                let invoke = invoke.clone();
                std::panic::catch_unwind(AssertUnwindSafe(move || invoke(payload)))
                    .unwrap_or_else(|panic| Err(Fault::Server(panic_message(panic))))
            }
            Invoker::Async(start) => match (start(payload), &self.runner) {
                (Ok(fut), Some(runner)) => runner.run(fut).await,
                (Ok(_), None) => Err(Fault::Server("no async runner".to_string())),
                (Err(fault), _) => Err(fault),
            },
        };
        Some(outcome)
    }

    fn rpc_contract(&self, payload: &[u8]) -> Bytes {
        let generated = self
            .encoder
            .decode_type::<(String, u16)>(payload)
            .map_err(|e| format!("expected [host, port]: {e}"))
            .and_then(|(host, port)| codegen::generate(&self.registry, &host, port));
        match generated {
            Ok(source) => self.encode_or_fault(&source),
            Err(detail) => {
                tracing::warn!("client code generation failed: {}", detail);
                self.fault(FAILED_TO_GENERATE_CLIENT_CODE, detail)
            }
        }
    }

    fn fault(&self, key: &str, detail: impl Into<String>) -> Bytes {
        self.encode_or_fault(&Value::single_entry(key, detail.into()))
    }

    fn encode_or_fault<T: serde::Serialize + ?Sized>(&self, value: &T) -> Bytes {
        match self.encoder.encode(value) {
            Ok(bytes) => Bytes::from(bytes),
            Err(e) => {
                tracing::error!("failed to encode response: {}", e);
                // A single-entry map of strings always encodes
                self.encoder
                    .encode(&Value::single_entry(SERVER_EXCEPTION, e.to_string()))
                    .map(Bytes::from)
                    .unwrap_or_default()
            }
        }
    }
}

#[async_trait]
impl<E: Encoder> FrameHandler for Dispatcher<E> {
    async fn handle(&self, function_name: &str, payload: Bytes) -> Bytes {
        match function_name {
            GET_RPC_CONTRACT => self.rpc_contract(&payload),
            CONNECT => self.encode_or_fault(CONNECTED),
            name => match self.invoke(name, payload).await {
                None => {
                    tracing::warn!("function `{}` not found", name);
                    self.fault(FUNCTION_NOT_FOUND, format!("Function `{name}` not found!"))
                }
                Some(Ok(body)) => body,
                Some(Err(Fault::Validation(detail))) => {
                    tracing::debug!("rejected arguments for `{}`: {}", name, detail);
                    self.fault(VALIDATION_ERROR, detail)
                }
                Some(Err(Fault::Server(detail))) => {
                    tracing::error!("handler `{}` failed: {}", name, detail);
                    self.fault(SERVER_EXCEPTION, detail)
                }
            },
        }
    }
}

/// Serves requests from the worker channel, one at a time
pub struct Worker<H> {
    id: usize,
    handler: H,
    state: WorkerState,
    shutdown: watch::Receiver<bool>,
}

impl<H: FrameHandler> Worker<H> {
    /// `shutdown` closes the worker once it reads `true`
    pub fn new(id: usize, handler: H, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            id,
            handler,
            state: WorkerState::Init,
            shutdown,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Serve until shutdown is signalled or the transport fails
    pub async fn listen<T: Transport>(&mut self, mut transport: T) -> Result<()> {
        self.state = WorkerState::Listening;
        tracing::info!("worker {} listening", self.id);

        let result = loop {
            let frames = tokio::select! {
                _ = wait_closed(&mut self.shutdown) => break Ok(()),
                received = transport.recv() => match received {
                    Ok(frames) => frames,
                    Err(e) => break Err(e),
                },
            };

            self.state = WorkerState::Processing;
            if let Some(reply) = self.process(frames).await {
                if let Err(e) = transport.send(reply).await {
                    break Err(e);
                }
            }
            self.state = WorkerState::Listening;
        };

        self.state = WorkerState::Closed;
        if let Err(e) = &result {
            tracing::error!("worker {} stopped: {}", self.id, e);
        } else {
            tracing::info!("worker {} closed", self.id);
        }
        transport.close().await?;
        result
    }

    async fn process(&self, frames: Multipart) -> Option<Multipart> {
        let [ident, data]: [Bytes; 2] = match frames.try_into() {
            Ok(pair) => pair,
            Err(frames) => {
                tracing::warn!(
                    "worker {} dropping message with {} frames",
                    self.id,
                    frames.len()
                );
                return None;
            }
        };

        match RequestFrame::parse(&data) {
            Ok(request) => {
                tracing::debug!(
                    "worker {} handling `{}` ({})",
                    self.id,
                    request.function_name,
                    request.request_id
                );
                let body = self
                    .handler
                    .handle(&request.function_name, request.payload)
                    .await;
                let response = ResponseFrame::new(request.request_id, body);
                Some(vec![ident, response.encode()])
            }
            Err(e) => {
                tracing::warn!("worker {} received a malformed frame: {}", self.id, e);
                // Answer with an empty body when the id is still readable
                let id = data
                    .get(..REQUEST_ID_LEN)
                    .and_then(|raw| RequestId::from_bytes(raw).ok())?;
                Some(vec![ident, ResponseFrame::new(id, Bytes::new()).encode()])
            }
        }
    }
}

/// Connect a worker socket, retrying until the broker is reachable or
/// `timeout` has passed
pub async fn connect_channel(channel: &str, timeout: Duration) -> Result<ZmqTransport<DealerSocket>> {
    let deadline = Instant::now() + timeout;
    let mut delay = Duration::from_millis(10);
    loop {
        match ZmqTransport::<DealerSocket>::connect(channel).await {
            Ok(transport) => return Ok(transport),
            Err(e) if Instant::now() + delay < deadline => {
                tracing::debug!("worker channel {} not ready: {}", channel, e);
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(Duration::from_millis(500));
            }
            Err(e) => {
                return Err(Error::connection(
                    format!("could not reach worker channel {channel}"),
                    e,
                ))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::REQUEST_HEADER_LEN;
    use crate::registry::{async_entry, sync_entry};
    use crate::transport::MockTransport;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    static ECHO_DICT_CALLS: AtomicUsize = AtomicUsize::new(0);

    fn echo(msg: String) -> Result<String> {
        Ok(msg)
    }

    fn echo_dict(msg: HashMap<i64, String>) -> Result<HashMap<i64, String>> {
        ECHO_DICT_CALLS.fetch_add(1, Ordering::SeqCst);
        Ok(msg)
    }

    fn explode(_msg: String) -> Result<String> {
        panic!("kaboom")
    }

    async fn square_root(n: f64) -> std::result::Result<f64, String> {
        if n < 0.0 {
            return Err("negative input".to_string());
        }
        Ok(n.sqrt())
    }

    fn dispatcher() -> Dispatcher {
        let encoder = MsgPackEncoder;
        let mut registry = RpcRegistry::new();
        registry.insert(sync_entry("echo", echo, encoder)).unwrap();
        registry.insert(sync_entry("echo_dict", echo_dict, encoder)).unwrap();
        registry.insert(sync_entry("explode", explode, encoder)).unwrap();
        registry
            .insert(async_entry("square_root", square_root, encoder))
            .unwrap();
        Dispatcher::new("test-worker", Arc::new(registry), encoder).unwrap()
    }

    fn fault_of(body: &[u8]) -> (String, String) {
        let value = MsgPackEncoder.decode(body).unwrap();
        let entries = value.as_map().unwrap();
        assert_eq!(entries.len(), 1);
        (
            entries[0].0.as_str().unwrap().to_string(),
            entries[0].1.as_str().unwrap().to_string(),
        )
    }

    #[tokio::test]
    async fn test_dispatch_reserved_methods() {
        let d = dispatcher();
        let body = d.handle(CONNECT, Bytes::new()).await;
        assert_eq!(MsgPackEncoder.decode_type::<String>(&body).unwrap(), CONNECTED);

        let arg = MsgPackEncoder.encode(&("localhost", 5559)).unwrap();
        let body = d.handle(GET_RPC_CONTRACT, Bytes::from(arg)).await;
        let source: String = MsgPackEncoder.decode_type(&body).unwrap();
        assert!(source.contains("pub fn echo(&self, msg: String) -> Result<String>"));

        let body = d.handle(GET_RPC_CONTRACT, Bytes::from_static(b"\xa3bad")).await;
        assert_eq!(fault_of(&body).0, FAILED_TO_GENERATE_CLIENT_CODE);
    }

    #[tokio::test]
    async fn test_dispatch_unknown_function() {
        let body = dispatcher().handle("necho", Bytes::new()).await;
        assert_eq!(
            fault_of(&body),
            (
                FUNCTION_NOT_FOUND.to_string(),
                "Function `necho` not found!".to_string()
            )
        );
    }

    #[tokio::test]
    async fn test_validation_failure_skips_handler() {
        let d = dispatcher();
        let mut input = HashMap::new();
        input.insert("a", "b");
        let payload = Bytes::from(MsgPackEncoder.encode(&input).unwrap());

        let before = ECHO_DICT_CALLS.load(Ordering::SeqCst);
        let body = d.handle("echo_dict", payload).await;
        assert_eq!(fault_of(&body).0, VALIDATION_ERROR);
        assert_eq!(ECHO_DICT_CALLS.load(Ordering::SeqCst), before);
    }

    #[tokio::test]
    async fn test_handler_panic_becomes_server_exception() {
        let payload = Bytes::from(MsgPackEncoder.encode("x").unwrap());
        let body = dispatcher().handle("explode", payload).await;
        assert_eq!(
            fault_of(&body),
            (SERVER_EXCEPTION.to_string(), "kaboom".to_string())
        );
    }

    #[tokio::test]
    async fn test_async_handler_runs_on_runner() {
        let d = dispatcher();
        let payload = Bytes::from(MsgPackEncoder.encode(&144.0).unwrap());
        let body = d.handle("square_root", payload).await;
        assert_eq!(MsgPackEncoder.decode_type::<f64>(&body).unwrap(), 12.0);

        let payload = Bytes::from(MsgPackEncoder.encode(&-1.0).unwrap());
        let body = d.handle("square_root", payload).await;
        assert_eq!(
            fault_of(&body),
            (SERVER_EXCEPTION.to_string(), "negative input".to_string())
        );
    }

    #[tokio::test]
    async fn test_worker_loop_over_mock_transport() {
        let (worker_end, mut broker_end) = MockTransport::pair();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut worker = Worker::new(0, dispatcher(), shutdown_rx);
        assert_eq!(worker.state(), WorkerState::Init);

        let task = tokio::spawn(async move {
            let result = worker.listen(worker_end).await;
            (result, worker.state())
        });

        let ident = Bytes::from_static(b"client-1");
        let id = RequestId::new();
        let payload = MsgPackEncoder.encode("hello").unwrap();
        let request = RequestFrame::new(id, "echo", payload).unwrap();
        broker_end
            .send(vec![ident.clone(), request.encode()])
            .await
            .unwrap();

        let reply = broker_end.recv().await.unwrap();
        assert_eq!(reply[0], ident);
        let response = ResponseFrame::parse(&reply[1]).unwrap();
        assert_eq!(response.request_id, id);
        assert_eq!(
            MsgPackEncoder.decode_type::<String>(&response.body).unwrap(),
            "hello"
        );

        // Truncated frame with a readable id gets an empty body back
        let mut truncated = request.encode().to_vec();
        truncated.truncate(REQUEST_HEADER_LEN - 1);
        broker_end
            .send(vec![ident.clone(), Bytes::from(truncated)])
            .await
            .unwrap();
        let reply = broker_end.recv().await.unwrap();
        let response = ResponseFrame::parse(&reply[1]).unwrap();
        assert_eq!(response.request_id, id);
        assert!(response.is_empty());

        shutdown_tx.send_replace(true);
        let (result, state) = task.await.unwrap();
        assert!(result.is_ok());
        assert_eq!(state, WorkerState::Closed);
    }
}
