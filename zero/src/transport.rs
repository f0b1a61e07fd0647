//! Transport layer - multipart message sockets
//!
//! The broker, workers and clients talk through [`Transport`], which moves
//! whole multipart messages. [`ZmqTransport`] implements it over `zeromq`
//! router and dealer sockets:
//!
//! - clients use a dealer that connects to the public endpoint;
//! - the broker frontend is a router bound to the public endpoint, so every
//!   inbound message is prefixed with the peer identity frame;
//! - the broker backend is a dealer bound to the worker channel, spreading
//!   messages round-robin over connected workers;
//! - workers use a dealer that connects to the worker channel and echo the
//!   identity frame back.

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use zeromq::{Endpoint, Socket, SocketRecv, SocketSend, ZmqMessage};

pub use zeromq::{DealerSocket, RouterSocket};

/// One message: an ordered list of frames
pub type Multipart = Vec<Bytes>;

/// Transport trait for abstracting communication
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a message
    async fn send(&mut self, frames: Multipart) -> Result<()>;

    /// Receive a message
    async fn recv(&mut self) -> Result<Multipart>;

    /// Close the transport; later sends and receives fail
    async fn close(&mut self) -> Result<()>;
}

/// A `zeromq` socket behind the [`Transport`] trait
pub struct ZmqTransport<S> {
    socket: Option<S>,
    endpoint: String,
    port: Option<u16>,
}

impl<S> ZmqTransport<S>
where
    S: Socket + SocketSend + SocketRecv + Send + 'static,
{
    /// Bind a new socket. A TCP port of 0 picks a free port, see [`Self::port`].
    pub async fn bind(endpoint: &str) -> Result<Self> {
        let mut socket = S::new();
        let bound = socket
            .bind(endpoint)
            .await
            .map_err(|e| Error::transport(format!("failed to bind {endpoint}"), e))?;
        let port = match &bound {
            Endpoint::Tcp(_, port) => Some(*port),
            _ => None,
        };
        tracing::debug!("bound socket to {}", bound);
        Ok(Self {
            socket: Some(socket),
            endpoint: bound.to_string(),
            port,
        })
    }

    /// Connect a new socket
    pub async fn connect(endpoint: &str) -> Result<Self> {
        let mut socket = S::new();
        socket
            .connect(endpoint)
            .await
            .map_err(|e| Error::connection(format!("failed to connect to {endpoint}"), e))?;
        tracing::debug!("connected socket to {}", endpoint);
        Ok(Self {
            socket: Some(socket),
            endpoint: endpoint.to_string(),
            port: None,
        })
    }

    /// The endpoint as resolved when binding or connecting
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// The TCP port actually bound, if any
    pub fn port(&self) -> Option<u16> {
        self.port
    }

    fn socket(&mut self) -> Result<&mut S> {
        self.socket
            .as_mut()
            .ok_or_else(|| Error::transport_msg(format!("socket for {} is closed", self.endpoint)))
    }
}

#[async_trait]
impl<S> Transport for ZmqTransport<S>
where
    S: Socket + SocketSend + SocketRecv + Send + 'static,
{
    async fn send(&mut self, frames: Multipart) -> Result<()> {
        let message = ZmqMessage::try_from(VecDeque::from(frames))
            .map_err(|e| Error::transport_msg(format!("cannot build message: {e}")))?;
        self.socket()?.send(message).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Multipart> {
        let message = self.socket()?.recv().await?;
        Ok(message.into_vec())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(socket) = self.socket.take() {
            for err in socket.close().await {
                tracing::debug!("error while closing {}: {}", self.endpoint, err);
            }
        }
        Ok(())
    }
}

/// Mock transport for testing: one end of an in-memory link
#[cfg(test)]
pub struct MockTransport {
    tx: tokio::sync::mpsc::UnboundedSender<Multipart>,
    rx: tokio::sync::mpsc::UnboundedReceiver<Multipart>,
    connected: std::sync::Arc<std::sync::atomic::AtomicBool>,
}

#[cfg(test)]
impl MockTransport {
    /// Two connected ends; what one sends the other receives
    pub fn pair() -> (Self, Self) {
        use std::sync::atomic::AtomicBool;
        use std::sync::Arc;

        let (tx1, rx1) = tokio::sync::mpsc::unbounded_channel();
        let (tx2, rx2) = tokio::sync::mpsc::unbounded_channel();
        (
            Self {
                tx: tx1,
                rx: rx2,
                connected: Arc::new(AtomicBool::new(true)),
            },
            Self {
                tx: tx2,
                rx: rx1,
                connected: Arc::new(AtomicBool::new(true)),
            },
        )
    }

    /// Switch controlling whether this end can send, like a dealer with or
    /// without peers
    pub fn connectivity(&self) -> std::sync::Arc<std::sync::atomic::AtomicBool> {
        self.connected.clone()
    }
}

#[cfg(test)]
#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, frames: Multipart) -> Result<()> {
        if !self.connected.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(Error::transport_msg("mock transport has no peers"));
        }
        self.tx
            .send(frames)
            .map_err(|_| Error::connection_msg("mock transport send failed"))
    }

    async fn recv(&mut self) -> Result<Multipart> {
        self.rx
            .recv()
            .await
            .ok_or(Error::connection_msg("mock transport recv failed"))
    }

    async fn close(&mut self) -> Result<()> {
        self.rx.close();
        Ok(())
    }
}
