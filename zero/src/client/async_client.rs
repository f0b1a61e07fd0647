//! Async client
//!
//! Every connection owns a driver task that writes outgoing frames and
//! demultiplexes responses by request id, so concurrent calls from one
//! context share a socket without waiting on each other.

use super::pool::{ConnectionPool, ContextKey};
use super::{check_response, encode_argument};
use crate::config::{ClientConfig, CONNECT, CONNECTED};
use crate::frame::{RequestFrame, RequestId, ResponseFrame};
use crate::transport::{DealerSocket, Multipart, Transport, ZmqTransport};
use crate::{Encoder, Error, MsgPackEncoder, Result};
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

type PendingMap = DashMap<RequestId, oneshot::Sender<Bytes>>;
type ConnectLock = Arc<tokio::sync::Mutex<()>>;

/// Removes a waiting caller however its call ends
struct PendingGuard<'a> {
    pending: &'a PendingMap,
    request_id: RequestId,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.remove(&self.request_id);
    }
}

struct AsyncConnection {
    outgoing: mpsc::UnboundedSender<Bytes>,
    pending: Arc<PendingMap>,
    alive: Arc<AtomicBool>,
    driver: JoinHandle<()>,
}

impl AsyncConnection {
    fn start<T: Transport>(transport: T) -> Self {
        let (outgoing, rx) = mpsc::unbounded_channel();
        let pending = Arc::new(PendingMap::new());
        let alive = Arc::new(AtomicBool::new(true));
        let driver = tokio::spawn(drive(transport, rx, pending.clone(), alive.clone()));
        Self {
            outgoing,
            pending,
            alive,
            driver,
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::Acquire)
    }

    async fn request(&self, method: &str, payload: Bytes, timeout: Duration) -> Result<Bytes> {
        let (tx, rx) = oneshot::channel();
        let mut request_id = RequestId::new();
        loop {
            match self.pending.entry(request_id) {
                Entry::Occupied(_) => request_id = RequestId::new(),
                Entry::Vacant(slot) => {
                    slot.insert(tx);
                    break;
                }
            }
        }
        let _guard = PendingGuard {
            pending: &self.pending,
            request_id,
        };
        // The driver may have cleared the table just before our insert
        if !self.is_alive() {
            return Err(Error::connection_msg("connection is closed"));
        }

        let frame = RequestFrame::new(request_id, method, payload)?.encode();
        self.outgoing
            .send(frame)
            .map_err(|_| Error::connection_msg("connection is closed"))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(body)) => Ok(body),
            Ok(Err(_)) => Err(Error::connection_msg(
                "connection closed before the response arrived",
            )),
            Err(_) => Err(Error::timeout(
                format!("call `{method}`"),
                timeout.as_millis() as u64,
            )),
        }
    }
}

impl Drop for AsyncConnection {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

async fn drive<T: Transport>(
    mut transport: T,
    mut outgoing: mpsc::UnboundedReceiver<Bytes>,
    pending: Arc<PendingMap>,
    alive: Arc<AtomicBool>,
) {
    let result = loop {
        tokio::select! {
            frame = outgoing.recv() => match frame {
                Some(frame) => {
                    if let Err(e) = transport.send(vec![frame]).await {
                        break Err(e);
                    }
                }
                None => break Ok(()),
            },
            received = transport.recv() => match received {
                Ok(frames) => deliver(&pending, frames),
                Err(e) => break Err(e),
            },
        }
    };

    alive.store(false, Ordering::Release);
    if let Err(e) = result {
        tracing::warn!("client connection failed: {}", e);
    }
    // Dropping the senders wakes every waiting caller
    pending.clear();
    let _ = transport.close().await;
}

fn deliver(pending: &PendingMap, frames: Multipart) {
    let Some(data) = frames.last() else {
        return;
    };
    match ResponseFrame::parse(data) {
        Ok(response) => match pending.remove(&response.request_id) {
            Some((_, waiter)) => {
                let _ = waiter.send(response.body);
            }
            None => tracing::debug!(
                "discarding response {} with no waiting caller",
                response.request_id
            ),
        },
        Err(e) => tracing::warn!("discarding malformed response: {}", e),
    }
}

/// Async client for use inside a tokio runtime
///
/// Calls made from the same task share one connection and may be in flight
/// together; different tasks get their own connections.
pub struct AsyncZeroClient<E: Encoder = MsgPackEncoder> {
    config: ClientConfig,
    encoder: E,
    pool: ConnectionPool<AsyncConnection>,
    // One lock per context while its connection is being opened
    connect_locks: DashMap<ContextKey, ConnectLock>,
}

impl AsyncZeroClient<MsgPackEncoder> {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_config(ClientConfig::new(host, port), MsgPackEncoder)
    }
}

impl<E: Encoder> AsyncZeroClient<E> {
    pub fn with_config(config: ClientConfig, encoder: E) -> Self {
        Self {
            config,
            encoder,
            pool: ConnectionPool::new(),
            connect_locks: DashMap::new(),
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub async fn call<A, R>(&self, method: &str, arg: A) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        self.call_with_timeout(method, arg, self.config.default_timeout)
            .await
    }

    pub async fn call_with_timeout<A, R>(&self, method: &str, arg: A, timeout: Duration) -> Result<R>
    where
        A: Serialize,
        R: DeserializeOwned,
    {
        let payload = encode_argument(&self.encoder, &arg)?;
        let (key, connection) = self.connection().await?;
        let body = match connection.request(method, payload, timeout).await {
            Ok(body) => body,
            Err(e) => {
                if !connection.is_alive() {
                    self.pool.remove(&key);
                }
                return Err(e);
            }
        };
        check_response(&self.encoder, &body)
    }

    /// Close every pooled connection. Later calls reconnect.
    pub fn close(&self) {
        let closed = self.pool.drain().len();
        tracing::debug!("closed {} client connections", closed);
    }

    async fn connection(&self) -> Result<(ContextKey, Arc<AsyncConnection>)> {
        let key = ContextKey::current();
        if let Some(connection) = self.live_connection(&key) {
            return Ok((key, connection));
        }

        let lock = self.connect_lock(key);
        let result = {
            let _held = lock.lock().await;
            match self.live_connection(&key) {
                Some(connection) => Ok(connection),
                None => self.open_connection(key).await,
            }
        };
        self.connect_locks.remove_if(&key, |_, current| Arc::ptr_eq(current, &lock));
        result.map(|connection| (key, connection))
    }

    fn connect_lock(&self, key: ContextKey) -> ConnectLock {
        self.connect_locks.entry(key).or_default().value().clone()
    }

    async fn open_connection(&self, key: ContextKey) -> Result<Arc<AsyncConnection>> {
        let address = self.config.address();
        let transport = tokio::time::timeout(
            self.config.connect_timeout,
            ZmqTransport::<DealerSocket>::connect(&address),
        )
        .await
        .map_err(|_| Error::connection_msg(format!("timed out connecting to {address}")))??;
        let connection = Arc::new(AsyncConnection::start(transport));

        let body = connection
            .request(CONNECT, Bytes::new(), self.config.connect_timeout)
            .await
            .map_err(|e| Error::connection(format!("handshake with {address} failed"), e))?;
        let reply: String = check_response(&self.encoder, &body)?;
        if reply != CONNECTED {
            return Err(Error::connection_msg(format!(
                "unexpected handshake reply from {address}: {reply}"
            )));
        }

        tracing::debug!("connected to {}", address);
        self.pool.insert(key, connection.clone());
        Ok(connection)
    }

    fn live_connection(&self, key: &ContextKey) -> Option<Arc<AsyncConnection>> {
        let connection = self.pool.get(key)?;
        if connection.is_alive() {
            Some(connection)
        } else {
            self.pool.remove(key);
            None
        }
    }
}
