pub mod codec;
pub mod config;
pub mod error;
pub mod models;
pub mod notify;
pub mod storage;
pub mod transfer;

mod client;
mod server;

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use log::{debug, warn};
use tokio::{
    sync::{mpsc::UnboundedReceiver, Mutex},
    task::JoinHandle,
};

pub use crate::{
    config::Config,
    error::{ErrorKind, Result, SyncError},
    models::{BatchEntry, FileDescriptor, Role, TransferBatch, TransferOutcome},
    notify::{SyncEvent, TransferEvent},
};
use crate::{
    client::ClientWorker,
    codec::Limits,
    notify::EventNotifier,
    server::HostWorker,
    storage::DirectorySink,
};

pub const DEFAULT_PORT: u16 = 8988;
pub const CONNECT_TIMEOUT_SECS: u64 = 10;
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Session manager for both roles.
///
/// At most one Host accept loop and one outbound Client session exist at a
/// time. All of their events go to a single queue, claimed once through
/// [`SyncService::on_event`] or [`SyncService::subscribe`].
#[derive(Clone)]
pub struct SyncService {
    config: Arc<Config>,
    notifier: EventNotifier,
    events: Arc<std::sync::Mutex<Option<UnboundedReceiver<SyncEvent>>>>,
    host: Arc<Mutex<Option<HostWorker>>>,
    client: Arc<Mutex<Option<ClientWorker>>>,
}

impl SyncService {
    pub fn new(config: Config) -> Self {
        let (notifier, rx) = EventNotifier::channel();
        Self {
            config: Arc::new(config),
            notifier,
            events: Arc::new(std::sync::Mutex::new(Some(rx))),
            host: Default::default(),
            client: Default::default(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Hands every future event to `handler`, one at a time and in order.
    ///
    /// Returns `None` if the events were already claimed.
    pub fn on_event<F>(&self, handler: F) -> Option<JoinHandle<()>>
    where
        F: FnMut(SyncEvent) + Send + 'static,
    {
        self.subscribe().map(|rx| notify::dispatch(rx, handler))
    }

    /// Takes the event queue to drain it on the caller's own task.
    pub fn subscribe(&self) -> Option<UnboundedReceiver<SyncEvent>> {
        match self.events.lock() {
            Ok(mut events) => events.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Starts accepting batches on `bind_addr:port` into the configured download directory.
    ///
    /// Does nothing if the Host is already running.
    pub async fn start_host(&self, bind_addr: IpAddr, port: u16) -> Result<()> {
        let mut host = self.host.lock().await;
        if let Some(worker) = host.as_ref() {
            if !worker.is_finished() {
                warn!("Server is already running on {}", worker.local_addr());
                return Ok(());
            }
        }

        let sink = DirectorySink::new(&self.config.download_dir)
            .with_skip_existing(self.config.skip_existing);
        let limits = Limits {
            max_files: self.config.max_files,
            max_file_size: self.config.max_file_size,
        };
        let worker = HostWorker::spawn(
            SocketAddr::new(bind_addr, port),
            sink,
            limits,
            self.config.chunk_size,
            self.notifier.clone(),
        )?;

        *host = Some(worker);
        Ok(())
    }

    /// Closes the listener and ends any session in progress. Safe to call at any time.
    pub async fn stop_host(&self) {
        let mut host = self.host.lock().await;
        match host.take() {
            Some(worker) => worker.stop().await,
            None => debug!("stop_host: host not running"),
        }
    }

    pub async fn is_host_running(&self) -> bool {
        self.host
            .lock()
            .await
            .as_ref()
            .is_some_and(|worker| !worker.is_finished())
    }

    /// Address the Host listener is actually bound to.
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.host.lock().await.as_ref().map(HostWorker::local_addr)
    }

    /// Sends `batch` to `server_addr:port` in the background.
    ///
    /// A session already in flight is cancelled first, and its final event is
    /// delivered before the new session emits anything.
    pub async fn start_client(
        &self,
        server_addr: IpAddr,
        port: u16,
        batch: TransferBatch,
    ) -> Result<()> {
        batch.validate()?;

        let mut client = self.client.lock().await;
        if let Some(previous) = client.take() {
            debug!("cancelling previous client session");
            previous.cancel().await;
        }

        *client = Some(ClientWorker::spawn(
            SocketAddr::new(server_addr, port),
            batch,
            self.config.connect_timeout(),
            self.config.chunk_size,
            self.notifier.clone(),
        ));
        Ok(())
    }

    /// Waits for the current client session to end and returns its outcome.
    pub async fn wait_client(&self) -> Option<TransferOutcome> {
        let mut done = self.client.lock().await.as_ref()?.outcome();
        let outcome = done.wait_for(Option::is_some).await.ok()?.clone();
        outcome
    }
}
