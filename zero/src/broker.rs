//! Broker: the single public ingress
//!
//! A router socket faces the clients and a dealer socket faces the workers.
//! Requests flow frontend to backend, spread round-robin by the dealer;
//! replies flow backend to frontend and are routed by the identity frame the
//! router prepended. Frames are never parsed here.
//!
//! While no worker is connected, requests wait in memory up to the
//! high-water mark. Once that queue is full the frontend is not read
//! until workers drain it.

use crate::transport::{DealerSocket, Multipart, RouterSocket, Transport, ZmqTransport};
use crate::Result;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

const RETRY_INTERVAL: Duration = Duration::from_millis(10);

/// Resolve once `true` has been published, or the sender is gone
pub(crate) async fn wait_closed(shutdown: &mut watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|closed| *closed).await;
}

/// Closes a running broker. Cloneable; closing twice is a no-op.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    shutdown: Arc<watch::Sender<bool>>,
}

impl BrokerHandle {
    pub fn close(&self) {
        if !self.shutdown.send_replace(true) {
            tracing::info!("closing broker");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }
}

/// Forwards between the public frontend and the worker backend
pub struct Broker<F = ZmqTransport<RouterSocket>, B = ZmqTransport<DealerSocket>> {
    frontend: F,
    backend: B,
    pending: VecDeque<Multipart>,
    high_water_mark: usize,
    handle: BrokerHandle,
    shutdown: watch::Receiver<bool>,
}

impl Broker {
    /// Bind the public endpoint and the worker channel
    pub async fn bind(public: &str, worker_channel: &str, high_water_mark: usize) -> Result<Self> {
        let frontend = ZmqTransport::<RouterSocket>::bind(public).await?;
        let backend = ZmqTransport::<DealerSocket>::bind(worker_channel).await?;
        Ok(Self::with_transports(frontend, backend, high_water_mark))
    }

    /// The public endpoint as bound, with any wildcard port resolved
    pub fn public_endpoint(&self) -> &str {
        self.frontend.endpoint()
    }

    pub fn public_port(&self) -> Option<u16> {
        self.frontend.port()
    }

    pub fn worker_channel(&self) -> &str {
        self.backend.endpoint()
    }
}

impl<F: Transport, B: Transport> Broker<F, B> {
    pub fn with_transports(frontend: F, backend: B, high_water_mark: usize) -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            frontend,
            backend,
            pending: VecDeque::new(),
            high_water_mark: high_water_mark.max(1),
            handle: BrokerHandle {
                shutdown: Arc::new(tx),
            },
            shutdown: rx,
        }
    }

    pub fn handle(&self) -> BrokerHandle {
        self.handle.clone()
    }

    /// Forward until [`BrokerHandle::close`] is called or a socket fails
    pub async fn listen(mut self) -> Result<()> {
        tracing::info!("broker forwarding");
        let mut retry = tokio::time::interval(RETRY_INTERVAL);
        retry.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        let result = loop {
            let accepting = self.pending.len() < self.high_water_mark;
            tokio::select! {
                _ = wait_closed(&mut self.shutdown) => break Ok(()),
                received = self.frontend.recv(), if accepting => match received {
                    Ok(frames) => self.forward_to_workers(frames).await,
                    Err(e) => break Err(e),
                },
                received = self.backend.recv() => match received {
                    Ok(frames) => self.forward_to_client(frames).await,
                    Err(e) => break Err(e),
                },
                _ = retry.tick(), if !self.pending.is_empty() => self.flush_pending().await,
            }
        };

        if let Err(e) = &result {
            tracing::error!("broker stopped: {}", e);
        }
        if !self.pending.is_empty() {
            tracing::warn!("dropping {} queued requests", self.pending.len());
        }
        self.handle.close();
        self.frontend.close().await?;
        self.backend.close().await?;
        result
    }

    async fn forward_to_workers(&mut self, frames: Multipart) {
        if self.pending.is_empty() {
            if self.backend.send(frames.clone()).await.is_ok() {
                return;
            }
            tracing::debug!("no worker available, queueing request");
        }
        self.pending.push_back(frames);
        if self.pending.len() == self.high_water_mark {
            tracing::warn!(
                "request queue full ({}), pausing the frontend",
                self.high_water_mark
            );
        }
        self.flush_pending().await;
    }

    async fn flush_pending(&mut self) {
        while let Some(frames) = self.pending.pop_front() {
            if self.backend.send(frames.clone()).await.is_err() {
                self.pending.push_front(frames);
                return;
            }
        }
    }

    async fn forward_to_client(&mut self, frames: Multipart) {
        // The router rejects identities it no longer knows
        if let Err(e) = self.frontend.send(frames).await {
            tracing::debug!("dropping reply for departed client: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::MockTransport;
    use bytes::Bytes;
    use std::sync::atomic::Ordering;

    fn message(ident: &'static [u8], body: &'static [u8]) -> Multipart {
        vec![Bytes::from_static(ident), Bytes::from_static(body)]
    }

    #[tokio::test]
    async fn test_forwards_both_ways() {
        let (frontend, mut clients) = MockTransport::pair();
        let (backend, mut workers) = MockTransport::pair();
        let broker = Broker::with_transports(frontend, backend, 10);
        let handle = broker.handle();
        let task = tokio::spawn(broker.listen());

        clients.send(message(b"c1", b"request")).await.unwrap();
        assert_eq!(workers.recv().await.unwrap(), message(b"c1", b"request"));

        workers.send(message(b"c1", b"reply")).await.unwrap();
        assert_eq!(clients.recv().await.unwrap(), message(b"c1", b"reply"));

        handle.close();
        handle.close();
        assert!(handle.is_closed());
        assert!(task.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_queues_until_a_worker_appears() {
        let (frontend, mut clients) = MockTransport::pair();
        let (backend, mut workers) = MockTransport::pair();
        let connected = backend.connectivity();
        connected.store(false, Ordering::SeqCst);

        let broker = Broker::with_transports(frontend, backend, 2);
        let handle = broker.handle();
        let task = tokio::spawn(broker.listen());

        for body in ["one", "two", "three"] {
            clients
                .send(vec![Bytes::from_static(b"c1"), Bytes::from(body)])
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_millis(50)).await;

        connected.store(true, Ordering::SeqCst);
        for expected in ["one", "two", "three"] {
            let frames = tokio::time::timeout(Duration::from_secs(1), workers.recv())
                .await
                .unwrap()
                .unwrap();
            assert_eq!(frames[1], Bytes::from(expected));
        }

        handle.close();
        assert!(task.await.unwrap().is_ok());
    }
}
