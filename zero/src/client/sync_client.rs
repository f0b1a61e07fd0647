//! Blocking client

use super::pool::{ConnectionPool, ContextKey};
use super::{check_response, encode_argument};
use crate::config::{ClientConfig, CONNECT, CONNECTED};
use crate::frame::{RequestFrame, RequestId, ResponseFrame};
use crate::transport::{DealerSocket, Transport, ZmqTransport};
use crate::{Encoder, Error, MsgPackEncoder, Result};
use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One thread's connection: a socket driven by its own single-threaded
/// runtime
struct SyncConnection {
    // Dropped before the runtime
    socket: Mutex<ZmqTransport<DealerSocket>>,
    runtime: tokio::runtime::Runtime,
}

impl SyncConnection {
    fn open(address: &str, timeout: Duration) -> Result<Self> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        // The timer registers with the reactor, so it is built inside block_on
        let socket = runtime
            .block_on(async {
                tokio::time::timeout(timeout, ZmqTransport::<DealerSocket>::connect(address)).await
            })
            .map_err(|_| Error::connection_msg(format!("timed out connecting to {address}")))??;
        Ok(Self {
            socket: Mutex::new(socket),
            runtime,
        })
    }

    /// Send one request and wait for the response with the same id.
    /// Responses to earlier, abandoned requests are discarded.
    fn request(&self, method: &str, payload: Bytes, timeout: Duration) -> Result<Bytes> {
        let request_id = RequestId::new();
        let frame = RequestFrame::new(request_id, method, payload)?.encode();
        let mut socket = self
            .socket
            .lock()
            .map_err(|_| Error::runtime_msg("connection lock poisoned"))?;

        self.runtime.block_on(async {
            socket.send(vec![frame]).await?;
            let wait = async {
                loop {
                    let frames = socket.recv().await?;
                    let Some(data) = frames.last() else {
                        continue;
                    };
                    match ResponseFrame::parse(data) {
                        Ok(response) if response.request_id == request_id => {
                            return Ok::<_, Error>(response.body)
                        }
                        Ok(response) => {
                            tracing::debug!("discarding stale response {}", response.request_id)
                        }
                        Err(e) => tracing::warn!("discarding malformed response: {}", e),
                    }
                }
            };
            tokio::time::timeout(timeout, wait)
                .await
                .map_err(|_| Error::timeout(format!("call `{method}`"), timeout.as_millis() as u64))?
        })
    }

    fn close(&self) {
        if let Ok(mut socket) = self.socket.lock() {
            let _ = self.runtime.block_on(socket.close());
        }
    }
}

/// Blocking client
///
/// Must not be used from inside an async runtime; use
/// [`AsyncZeroClient`](super::AsyncZeroClient) there.
///
/// ```rust,ignore
/// let client = ZeroClient::new("localhost", 5559);
/// let reply: String = client.call("echo", "hello")?;
/// ```
pub struct ZeroClient<E: Encoder = MsgPackEncoder> {
    config: ClientConfig,
    encoder: E,
    pool: ConnectionPool<SyncConnection>,
}

impl ZeroClient<MsgPackEncoder> {
    /// Connections are opened lazily on first call
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_config(ClientConfig::new(host, port), MsgPackEncoder)
    }
}

impl<E: Encoder> ZeroClient<E> {
    pub fn with_config(config: ClientConfig, encoder: E) -> Self {
        Self {
            config,
            encoder,
            pool: ConnectionPool::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Call `method` with the default timeout. Use `R = Value` when the
    /// return type is not known.
    pub fn call<A, R>(&self, method: &str, arg: A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        self.call_with_timeout(method, arg, self.config.default_timeout)
    }

    pub fn call_with_timeout<A, R>(&self, method: &str, arg: A, timeout: Duration) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let payload = encode_argument(&self.encoder, &arg)?;
        let (key, connection) = self.connection()?;
        let body = connection
            .request(method, payload, timeout)
            .inspect_err(|e| self.evict_on_failure(key, e))?;
        check_response(&self.encoder, &body)
    }

    /// Close every pooled connection. Later calls reconnect.
    pub fn close(&self) {
        for connection in self.pool.drain() {
            connection.close();
        }
    }

    fn connection(&self) -> Result<(ContextKey, Arc<SyncConnection>)> {
        let key = ContextKey::thread();
        if let Some(connection) = self.pool.get(&key) {
            return Ok((key, connection));
        }

        let address = self.config.address();
        let connection = Arc::new(SyncConnection::open(&address, self.config.connect_timeout)?);
        let body = connection
            .request(CONNECT, Bytes::new(), self.config.connect_timeout)
            .map_err(|e| Error::connection(format!("handshake with {address} failed"), e))?;
        let reply: String = check_response(&self.encoder, &body)?;
        if reply != CONNECTED {
            return Err(Error::connection_msg(format!(
                "unexpected handshake reply from {address}: {reply}"
            )));
        }

        tracing::debug!("connected to {}", address);
        self.pool.insert(key, connection.clone());
        Ok((key, connection))
    }

    fn evict_on_failure(&self, key: ContextKey, err: &Error) {
        if matches!(err, Error::Transport { .. } | Error::Connection { .. }) {
            tracing::warn!("dropping connection after failure: {}", err);
            self.pool.remove(&key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ServerConfig, WorkerMode, ZeroServer};

    fn hello() -> Result<String> {
        Ok("hello world".to_string())
    }

    #[test]
    fn test_connects_from_a_plain_thread() {
        let mut server = ZeroServer::with_config(
            ServerConfig::new("127.0.0.1", 0)
                .with_workers(1)
                .with_worker_mode(WorkerMode::Thread),
        );
        server.register_rpc("hello", hello).unwrap();
        let handle = server.start().unwrap();

        let client = ZeroClient::new("127.0.0.1", handle.port());
        let reply: String = client.call("hello", ()).unwrap();
        assert_eq!(reply, "hello world");
        assert_eq!(client.pool.len(), 1);

        client.close();
        assert!(client.pool.is_empty());
        handle.shutdown();
    }

    #[test]
    fn test_open_fails_without_panicking() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let address = format!("tcp://127.0.0.1:{port}");
        if let Err(err) = SyncConnection::open(&address, Duration::from_millis(200)) {
            assert!(
                matches!(err, Error::Connection { .. } | Error::Transport { .. }),
                "got {err:?}"
            );
        }
    }
}
