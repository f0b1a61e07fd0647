//! Server facade
//!
//! [`ZeroServer`] collects handlers, then runs a broker on the public
//! endpoint and a pool of workers behind it. Workers are child processes
//! running the current executable (the default) or threads of this process.
//!
//! ```rust,ignore
//! fn echo(msg: String) -> zero::Result<String> {
//!     Ok(msg)
//! }
//!
//! fn main() -> zero::Result<()> {
//!     zero::logging::init();
//!     let mut server = ZeroServer::new("0.0.0.0", 5559);
//!     server.register_rpc("echo", echo)?;
//!     server.run()
//! }
//! ```
//!
//! In process mode every worker re-executes the binary with
//! [`WORKER_CHANNEL_ENV`] set, so `main` must register the same handlers
//! before calling [`ZeroServer::run`] unconditionally.

use crate::broker::{wait_closed, Broker, BrokerHandle};
use crate::config::{ServerConfig, WorkerMode, DEFAULT_WORKER_PORT, WORKER_CHANNEL_ENV, WORKER_ID_ENV};
use crate::registry::{async_entry, sync_entry, AsyncHandler, RpcRegistry, SyncHandler};
use crate::worker::{connect_channel, Dispatcher, Worker};
use crate::{Encoder, Error, MsgPackEncoder, Result};
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::sync::watch;

/// How long worker processes get to exit before they are killed
const WORKER_EXIT_GRACE: Duration = Duration::from_secs(1);

/// The internal channel between broker and workers
#[derive(Debug, Clone)]
struct WorkerChannel {
    endpoint: String,
    ipc_path: Option<PathBuf>,
}

impl WorkerChannel {
    #[cfg(unix)]
    fn ipc() -> Self {
        let path = std::env::temp_dir().join(format!(
            "zero-{}-{}.ipc",
            std::process::id(),
            uuid::Uuid::new_v4().simple()
        ));
        Self {
            endpoint: format!("ipc://{}", path.display()),
            ipc_path: Some(path),
        }
    }

    fn tcp() -> Result<Self> {
        let port = next_available_port(DEFAULT_WORKER_PORT)?;
        Ok(Self {
            endpoint: format!("tcp://127.0.0.1:{port}"),
            ipc_path: None,
        })
    }

    fn remove(&mut self) {
        if let Some(path) = self.ipc_path.take() {
            match std::fs::remove_file(&path) {
                Ok(()) => tracing::debug!("removed {}", path.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => tracing::warn!("failed to remove {}: {}", path.display(), e),
            }
        }
    }
}

fn next_available_port(start: u16) -> Result<u16> {
    (start..=u16::MAX)
        .find(|port| std::net::TcpListener::bind(("127.0.0.1", *port)).is_ok())
        .ok_or_else(|| {
            Error::configuration(
                format!("no free port for the worker channel from {start}"),
                None,
            )
        })
}

/// What the broker thread reports back once bound
type StartedBroker = (BrokerHandle, WorkerChannel, String, Option<u16>);

/// Bind the broker, preferring an IPC worker channel
async fn bind_broker(config: &ServerConfig) -> Result<(Broker, WorkerChannel)> {
    let public = config.address();

    #[cfg(unix)]
    {
        let mut channel = WorkerChannel::ipc();
        match Broker::bind(&public, &channel.endpoint, config.high_water_mark).await {
            Ok(broker) => return Ok((broker, channel)),
            Err(e) => {
                tracing::warn!("ipc worker channel unavailable ({}), using tcp", e);
                channel.remove();
            }
        }
    }

    let channel = WorkerChannel::tcp()?;
    let broker = Broker::bind(&public, &channel.endpoint, config.high_water_mark).await?;
    Ok((broker, channel))
}

/// Connect to the worker channel and serve until `shutdown` fires
async fn serve_worker<E: Encoder>(
    id: usize,
    channel: &str,
    registry: Arc<RpcRegistry>,
    encoder: E,
    mut shutdown: watch::Receiver<bool>,
    connect_timeout: Duration,
) -> Result<()> {
    let dispatcher = Dispatcher::new(&format!("zero-worker-{id}"), registry, encoder)?;
    let transport = tokio::select! {
        _ = wait_closed(&mut shutdown) => return Ok(()),
        connected = connect_channel(channel, connect_timeout) => connected?,
    };
    Worker::new(id, dispatcher, shutdown).listen(transport).await
}

/// Resolve on SIGINT, SIGTERM, SIGQUIT or SIGHUP
#[cfg(unix)]
pub async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = signal(SignalKind::interrupt())?;
    let mut terminate = signal(SignalKind::terminate())?;
    let mut quit = signal(SignalKind::quit())?;
    let mut hangup = signal(SignalKind::hangup())?;

    let name = tokio::select! {
        _ = interrupt.recv() => "SIGINT",
        _ = terminate.recv() => "SIGTERM",
        _ = quit.recv() => "SIGQUIT",
        _ = hangup.recv() => "SIGHUP",
    };
    tracing::info!("received {}, shutting down", name);
    Ok(())
}

/// Resolve on Ctrl-C or Ctrl-Break
#[cfg(windows)]
pub async fn wait_for_shutdown_signal() -> Result<()> {
    use tokio::signal::windows::{ctrl_break, ctrl_c};

    let mut ctrl_c = ctrl_c()?;
    let mut ctrl_break = ctrl_break()?;

    let name = tokio::select! {
        _ = ctrl_c.recv() => "Ctrl-C",
        _ = ctrl_break.recv() => "Ctrl-Break",
    };
    tracing::info!("received {}, shutting down", name);
    Ok(())
}

#[cfg(not(any(unix, windows)))]
pub async fn wait_for_shutdown_signal() -> Result<()> {
    tokio::signal::ctrl_c().await?;
    tracing::info!("received Ctrl-C, shutting down");
    Ok(())
}

/// RPC server
pub struct ZeroServer<E: Encoder = MsgPackEncoder> {
    config: ServerConfig,
    registry: RpcRegistry,
    encoder: E,
}

impl ZeroServer<MsgPackEncoder> {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self::with_config(ServerConfig::new(host, port))
    }

    pub fn with_config(config: ServerConfig) -> Self {
        Self::with_encoder(config, MsgPackEncoder)
    }
}

impl<E: Encoder> ZeroServer<E> {
    pub fn with_encoder(config: ServerConfig, encoder: E) -> Self {
        Self {
            config,
            registry: RpcRegistry::new(),
            encoder,
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ServerConfig {
        &mut self.config
    }

    pub fn registry(&self) -> &RpcRegistry {
        &self.registry
    }

    /// Register a blocking handler taking zero or one argument
    pub fn register_rpc<H, Args>(&mut self, name: impl Into<String>, handler: H) -> Result<()>
    where
        H: SyncHandler<Args>,
    {
        self.registry
            .insert(sync_entry(name, handler, self.encoder.clone()))
    }

    /// Register an async handler taking zero or one argument
    pub fn register_async_rpc<H, Args>(&mut self, name: impl Into<String>, handler: H) -> Result<()>
    where
        H: AsyncHandler<Args>,
    {
        self.registry
            .insert(async_entry(name, handler, self.encoder.clone()))
    }

    /// Start the broker and worker threads in the background, regardless of
    /// the configured worker mode. No signal handlers are installed.
    pub fn start(self) -> Result<ServerHandle> {
        self.config.validate()?;
        let workers = self.config.worker_count()?;
        let registry = Arc::new(self.registry);

        let (ready_tx, ready_rx) = std::sync::mpsc::channel::<Result<StartedBroker>>();
        let config = self.config.clone();
        let broker_thread = std::thread::Builder::new()
            .name("zero-broker".to_string())
            .spawn(move || {
                let runtime = match tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()
                {
                    Ok(runtime) => runtime,
                    Err(e) => {
                        let _ = ready_tx.send(Err(e.into()));
                        return;
                    }
                };
                runtime.block_on(async move {
                    match bind_broker(&config).await {
                        Ok((broker, channel)) => {
                            let started = (
                                broker.handle(),
                                channel,
                                broker.public_endpoint().to_string(),
                                broker.public_port(),
                            );
                            if ready_tx.send(Ok(started)).is_ok() {
                                // Errors are logged by the broker
                                let _ = broker.listen().await;
                            }
                        }
                        Err(e) => {
                            let _ = ready_tx.send(Err(e));
                        }
                    }
                });
            })?;

        let (broker, channel, address, port) = ready_rx
            .recv()
            .map_err(|_| Error::runtime_msg("broker thread exited during startup"))??;
        tracing::info!(
            "server listening on {} with {} worker threads (pid {})",
            address,
            workers,
            std::process::id()
        );

        let (shutdown, shutdown_rx) = watch::channel(false);
        let mut handle = ServerHandle {
            address,
            port: port.unwrap_or(self.config.port),
            broker,
            shutdown,
            threads: vec![broker_thread],
            channel,
        };

        for id in 0..workers {
            let registry = registry.clone();
            let encoder = self.encoder.clone();
            let shutdown = shutdown_rx.clone();
            let endpoint = handle.channel.endpoint.clone();
            let connect_timeout = self.config.worker_connect_timeout;
            let thread = std::thread::Builder::new()
                .name(format!("zero-worker-{id}"))
                .spawn(move || {
                    let result = tokio::runtime::Builder::new_current_thread()
                        .enable_all()
                        .build()
                        .map_err(Error::from)
                        .and_then(|runtime| {
                            runtime.block_on(serve_worker(
                                id,
                                &endpoint,
                                registry,
                                encoder,
                                shutdown,
                                connect_timeout,
                            ))
                        });
                    if let Err(e) = result {
                        tracing::error!("worker {} failed: {}", id, e);
                    }
                })?;
            handle.threads.push(thread);
        }

        Ok(handle)
    }

    /// Serve until a shutdown signal arrives.
    ///
    /// In a re-executed worker process this serves as that worker instead.
    pub fn run(self) -> Result<()> {
        if let Ok(channel) = std::env::var(WORKER_CHANNEL_ENV) {
            return self.run_worker_process(channel);
        }

        let mode = self.config.worker_mode;
        match mode {
            WorkerMode::Thread => {
                let handle = self.start()?;
                let runtime = tokio::runtime::Builder::new_current_thread()
                    .enable_all()
                    .build()?;
                let result = runtime.block_on(wait_for_shutdown_signal());
                handle.shutdown();
                result
            }
            WorkerMode::Process => {
                self.config.validate()?;
                let workers = self.config.worker_count()?;
                let runtime = tokio::runtime::Builder::new_multi_thread()
                    .thread_name("zero-broker")
                    .enable_all()
                    .build()?;
                runtime.block_on(self.supervise(workers))
            }
        }
    }

    fn run_worker_process(self, channel: String) -> Result<()> {
        let id = std::env::var(WORKER_ID_ENV)
            .ok()
            .and_then(|id| id.parse().ok())
            .unwrap_or(0);
        tracing::info!("worker {} started (pid {})", id, std::process::id());

        let registry = Arc::new(self.registry);
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(async move {
            let (shutdown, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if let Err(e) = wait_for_shutdown_signal().await {
                    tracing::warn!("worker {} cannot watch signals: {}", id, e);
                    std::future::pending::<()>().await;
                }
                shutdown.send_replace(true);
            });
            serve_worker(
                id,
                &channel,
                registry,
                self.encoder,
                shutdown_rx,
                self.config.worker_connect_timeout,
            )
            .await
        })
    }

    async fn supervise(self, workers: usize) -> Result<()> {
        let (broker, mut channel) = bind_broker(&self.config).await?;
        let broker_handle = broker.handle();
        tracing::info!(
            "server listening on {} with {} worker processes (pid {})",
            broker.public_endpoint(),
            workers,
            std::process::id()
        );

        let (stop, stop_rx) = watch::channel(false);
        let result = match spawn_workers(workers, &channel.endpoint, &stop_rx) {
            Ok(monitors) => {
                let mut broker_task = tokio::spawn(broker.listen());
                let (result, broker_finished) = tokio::select! {
                    signalled = wait_for_shutdown_signal() => (signalled, false),
                    finished = &mut broker_task => (finished.map_err(Error::from).and_then(|r| r), true),
                };

                broker_handle.close();
                stop.send_replace(true);
                futures::future::join_all(monitors).await;
                if !broker_finished {
                    if let Err(e) = broker_task.await {
                        tracing::warn!("broker task failed: {}", e);
                    }
                }
                result
            }
            Err(e) => Err(e),
        };

        channel.remove();
        tracing::info!("server stopped");
        result
    }
}

/// Spawn one child process per worker, each with a task that reaps it
fn spawn_workers(
    workers: usize,
    channel: &str,
    stop: &watch::Receiver<bool>,
) -> Result<Vec<tokio::task::JoinHandle<()>>> {
    let exe = std::env::current_exe()?;
    let mut monitors = Vec::with_capacity(workers);
    for id in 0..workers {
        let child = tokio::process::Command::new(&exe)
            .args(std::env::args_os().skip(1))
            .env(WORKER_CHANNEL_ENV, channel)
            .env(WORKER_ID_ENV, id.to_string())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| Error::runtime(format!("failed to spawn worker {id}"), e))?;
        tracing::debug!("spawned worker {} as pid {:?}", id, child.id());
        monitors.push(tokio::spawn(reap_worker(id, child, stop.clone())));
    }
    Ok(monitors)
}

async fn reap_worker(id: usize, mut child: tokio::process::Child, mut stop: watch::Receiver<bool>) {
    tokio::select! {
        status = child.wait() => match status {
            Ok(status) => tracing::error!("worker {} exited unexpectedly: {}", id, status),
            Err(e) => tracing::error!("lost track of worker {}: {}", id, e),
        },
        _ = wait_closed(&mut stop) => {
            match tokio::time::timeout(WORKER_EXIT_GRACE, child.wait()).await {
                Ok(Ok(status)) => tracing::debug!("worker {} exited: {}", id, status),
                Ok(Err(e)) => tracing::warn!("lost track of worker {}: {}", id, e),
                Err(_) => {
                    tracing::debug!("killing worker {}", id);
                    if let Err(e) = child.kill().await {
                        tracing::warn!("failed to kill worker {}: {}", id, e);
                    }
                }
            }
        }
    }
}

/// A server started with [`ZeroServer::start`]. Dropping it shuts the
/// server down.
pub struct ServerHandle {
    address: String,
    port: u16,
    broker: BrokerHandle,
    shutdown: watch::Sender<bool>,
    threads: Vec<JoinHandle<()>>,
    channel: WorkerChannel,
}

impl ServerHandle {
    /// The bound public endpoint, e.g. `tcp://127.0.0.1:5559`
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The bound public port, resolved when the configured port was 0
    pub fn port(&self) -> u16 {
        self.port
    }

    /// Close the broker, stop the workers and wait for their threads
    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        if self.threads.is_empty() {
            return;
        }
        self.broker.close();
        self.shutdown.send_replace(true);
        for thread in self.threads.drain(..) {
            if thread.join().is_err() {
                tracing::warn!("a server thread panicked");
            }
        }
        self.channel.remove();
        tracing::info!("server stopped");
    }
}

impl Drop for ServerHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

impl std::fmt::Debug for ServerHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerHandle")
            .field("address", &self.address)
            .field("port", &self.port)
            .field("running", &!self.threads.is_empty())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ping() -> Result<String> {
        Ok("pong".to_string())
    }

    #[test]
    fn test_registration_rules() {
        let mut server = ZeroServer::new("127.0.0.1", 0);
        server.register_rpc("ping", ping).unwrap();
        assert!(matches!(
            server.register_rpc("ping", ping),
            Err(Error::Registration { .. })
        ));
        assert!(matches!(
            server.register_rpc("connect", ping),
            Err(Error::Registration { .. })
        ));
        assert_eq!(server.registry().len(), 1);
    }

    #[test]
    fn test_start_rejects_zero_workers() {
        let server = ZeroServer::with_config(ServerConfig::new("127.0.0.1", 0).with_workers(0));
        assert!(matches!(server.start(), Err(Error::Configuration { .. })));
    }

    #[test]
    fn test_start_and_shutdown() {
        let server = ZeroServer::with_config(
            ServerConfig::new("127.0.0.1", 0)
                .with_workers(2)
                .with_worker_mode(WorkerMode::Thread),
        );
        let handle = server.start().unwrap();
        assert_ne!(handle.port(), 0);
        assert!(handle.address().starts_with("tcp://127.0.0.1:"));
        let ipc_path = handle.channel.ipc_path.clone();
        handle.shutdown();
        if let Some(path) = ipc_path {
            assert!(!path.exists());
        }
    }

    #[test]
    fn test_next_available_port_skips_taken_ports() {
        let taken = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = taken.local_addr().unwrap().port();
        let found = next_available_port(port).unwrap();
        assert!(found > port);
    }
}
