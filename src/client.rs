use std::{net::SocketAddr, time::Duration};

use log::{error, info};
use tokio::{net::TcpStream, sync::watch, task::JoinHandle};

use crate::{
    error::{Result, SyncError},
    models::{Role, TransferBatch, TransferOutcome},
    notify::{EventNotifier, TransferEvent},
    transfer::{cancelled, TransferSession},
};

/// Handle to one outbound session.
pub(crate) struct ClientWorker {
    cancel_tx: watch::Sender<bool>,
    done_rx: watch::Receiver<Option<TransferOutcome>>,
    handle: JoinHandle<()>,
}

impl ClientWorker {
    pub(crate) fn spawn(
        addr: SocketAddr,
        batch: TransferBatch,
        connect_timeout: Duration,
        chunk_size: usize,
        notifier: EventNotifier,
    ) -> Self {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        let (done_tx, done_rx) = watch::channel(None);

        let handle = tokio::spawn(async move {
            let outcome = run(addr, batch, connect_timeout, chunk_size, notifier, cancel_rx).await;
            let _ = done_tx.send(Some(outcome));
        });

        Self {
            cancel_tx,
            done_rx,
            handle,
        }
    }

    pub(crate) fn outcome(&self) -> watch::Receiver<Option<TransferOutcome>> {
        self.done_rx.clone()
    }

    /// Force-closes the session's socket and waits until its final event is out.
    pub(crate) async fn cancel(self) {
        let _ = self.cancel_tx.send(true);
        if let Err(e) = self.handle.await {
            error!("client worker ended abnormally: {e}");
        }
    }
}

async fn run(
    addr: SocketAddr,
    batch: TransferBatch,
    connect_timeout: Duration,
    chunk_size: usize,
    notifier: EventNotifier,
    cancel_rx: watch::Receiver<bool>,
) -> TransferOutcome {
    let connected = tokio::select! {
        r = connect(addr, connect_timeout) => r,
        _ = cancelled(cancel_rx.clone()) => Err(SyncError::Cancelled),
    };

    let stream = match connected {
        Ok(stream) => stream,
        Err(e) => {
            error!("Error sending files: {e}");
            let failure = TransferOutcome::Failed {
                reason: e.kind(),
                message: e.to_string(),
                partial_files_transferred: 0,
            };
            notifier.emit(
                Role::Client,
                TransferEvent::Failed {
                    kind: e.kind(),
                    message: e.to_string(),
                    files_done: 0,
                },
            );
            return failure;
        }
    };

    info!("Connected to server: {addr}");
    TransferSession::new(Role::Client, stream, addr.to_string(), notifier)
        .chunk_size(chunk_size)
        .send(batch, cancel_rx)
        .await
}

async fn connect(addr: SocketAddr, connect_timeout: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(connect_timeout, TcpStream::connect(addr)).await {
        Ok(Ok(stream)) => {
            stream.set_nodelay(true)?;
            Ok(stream)
        }
        Ok(Err(source)) => Err(SyncError::Connect { addr, source }),
        Err(_) => Err(SyncError::ConnectTimeout(addr)),
    }
}

#[cfg(test)]
mod tests {
    use tokio::net::TcpSocket;

    use super::*;
    use crate::{error::ErrorKind, CHUNK_SIZE};

    const SHORT_TIMEOUT: Duration = Duration::from_millis(200);

    /// Fills the accept queue of a listener that never accepts, so further SYNs go unanswered.
    async fn saturated_listener() -> (tokio::net::TcpListener, Vec<TcpStream>, SocketAddr) {
        let socket = TcpSocket::new_v4().unwrap();
        socket.bind("127.0.0.1:0".parse().unwrap()).unwrap();
        let listener = socket.listen(1).unwrap();
        let addr = listener.local_addr().unwrap();

        let mut held = Vec::new();
        for _ in 0..16 {
            match connect(addr, SHORT_TIMEOUT).await {
                Ok(stream) => held.push(stream),
                Err(SyncError::ConnectTimeout(timed_out)) => {
                    assert_eq!(timed_out, addr);
                    return (listener, held, addr);
                }
                Err(e) => panic!("unexpected connect error: {e}"),
            }
        }
        panic!("backlog of {addr} never filled");
    }

    #[tokio::test]
    async fn test_connect_timeout_is_reported_as_connect_failure() {
        let (_listener, _held, addr) = saturated_listener().await;
        let (notifier, mut events) = EventNotifier::channel();
        let (_cancel_tx, cancel_rx) = watch::channel(false);

        let mut batch = TransferBatch::new();
        batch.push_bytes("a.jpg", vec![1, 2, 3]);
        let outcome = run(addr, batch, SHORT_TIMEOUT, CHUNK_SIZE, notifier, cancel_rx).await;

        assert!(matches!(
            outcome,
            TransferOutcome::Failed {
                reason: ErrorKind::Connect,
                partial_files_transferred: 0,
                ..
            }
        ));
        let event = events.try_recv().unwrap();
        assert_eq!(event.role, Role::Client);
        match event.event {
            TransferEvent::Failed {
                kind,
                message,
                files_done,
            } => {
                assert_eq!(kind, ErrorKind::Connect);
                assert_eq!(files_done, 0);
                assert!(message.contains("timed out"), "{message}");
            }
            other => panic!("expected Failed, got {other:?}"),
        }
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_cancel_while_connecting() {
        let (_listener, _held, addr) = saturated_listener().await;
        let (notifier, mut events) = EventNotifier::channel();

        let worker = ClientWorker::spawn(
            addr,
            TransferBatch::new(),
            Duration::from_secs(30),
            CHUNK_SIZE,
            notifier,
        );
        let done = worker.outcome();
        worker.cancel().await;

        assert!(matches!(
            *done.borrow(),
            Some(TransferOutcome::Failed {
                reason: ErrorKind::Cancelled,
                ..
            })
        ));
        assert!(events.try_recv().unwrap().event.is_terminal());
    }
}
