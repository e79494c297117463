use std::{net::SocketAddr, time::Duration};

use log::{debug, error, info};
use tokio::{
    net::{TcpListener, TcpSocket},
    sync::watch,
    task::JoinHandle,
};

use crate::{
    codec::Limits,
    error::{Result, SyncError},
    models::Role,
    notify::EventNotifier,
    storage::FileSink,
    transfer::{cancelled, TransferSession},
};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Handle to the running accept loop. Dropping it without [`HostWorker::stop`]
/// leaves the loop running.
pub(crate) struct HostWorker {
    local_addr: SocketAddr,
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl HostWorker {
    pub(crate) fn spawn<S>(
        addr: SocketAddr,
        sink: S,
        limits: Limits,
        chunk_size: usize,
        notifier: EventNotifier,
    ) -> Result<Self>
    where
        S: FileSink + 'static,
    {
        let listener = bind(addr).map_err(|source| SyncError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;
        info!("Server started on {local_addr}");

        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(accept_loop(
            listener, sink, limits, chunk_size, notifier, stop_rx,
        ));

        Ok(Self {
            local_addr,
            stop_tx,
            handle,
        })
    }

    pub(crate) fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub(crate) fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Closes the listener and cancels any session in flight, then waits for the loop to exit.
    pub(crate) async fn stop(self) {
        let _ = self.stop_tx.send(true);
        if let Err(e) = self.handle.await {
            error!("host worker ended abnormally: {e}");
        }
        info!("Server stopped");
    }
}

fn bind(addr: SocketAddr) -> std::io::Result<TcpListener> {
    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()?
    } else {
        TcpSocket::new_v6()?
    };
    socket.set_reuseaddr(true)?;
    socket.bind(addr)?;
    socket.listen(1024)
}

// Sessions run one after another; the next connection waits in the backlog.
async fn accept_loop<S: FileSink>(
    listener: TcpListener,
    mut sink: S,
    limits: Limits,
    chunk_size: usize,
    notifier: EventNotifier,
    stop_rx: watch::Receiver<bool>,
) {
    loop {
        let accepted = tokio::select! {
            r = listener.accept() => r,
            _ = cancelled(stop_rx.clone()) => break,
        };

        let (stream, peer) = match accepted {
            Ok(conn) => conn,
            Err(e) => {
                error!("accept failed: {e}");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                continue;
            }
        };

        info!("Client connected: {peer}");
        let session = TransferSession::new(Role::Host, stream, peer.to_string(), notifier.clone())
            .chunk_size(chunk_size);
        let outcome = session.receive(&mut sink, limits, stop_rx.clone()).await;
        debug!("session with {peer} ended: {outcome:?}");

        if *stop_rx.borrow() {
            break;
        }
    }
    // listener dropped here, closing the port
}
