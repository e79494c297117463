//! One run of the batch protocol over one connection.
//!
//! A [`TransferSession`] owns its stream for its whole life and is consumed by
//! [`TransferSession::receive`] (Host) or [`TransferSession::send`] (Client).
//! Either way it reports exactly one terminal event and returns the matching
//! [`TransferOutcome`]; the stream is dropped, and so closed, on return.

mod receive;
mod send;

use log::{info, warn};
use tokio::{
    io::{AsyncRead, AsyncWrite, AsyncWriteExt},
    sync::watch,
};
use uuid::Uuid;

use crate::{
    error::{Result, SyncError},
    models::{Role, SessionState, TransferOutcome},
    notify::{EventNotifier, TransferEvent},
    CHUNK_SIZE,
};

pub struct TransferSession<T> {
    id: Uuid,
    role: Role,
    stream: T,
    peer: String,
    state: watch::Sender<SessionState>,
    chunk_size: usize,
    progress: Progress,
}

impl<T> TransferSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(role: Role, stream: T, peer: impl Into<String>, notifier: EventNotifier) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            stream,
            peer: peer.into(),
            state: watch::Sender::new(SessionState::Idle),
            chunk_size: CHUNK_SIZE,
            progress: Progress {
                role,
                notifier,
                done: 0,
                total: 0,
            },
        }
    }

    pub fn chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Follows the session's state after it has been handed to `receive` or `send`.
    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    async fn finish(mut self, result: Result<()>) -> TransferOutcome {
        let done = self.progress.done;
        match result {
            Ok(()) => {
                self.state.send_replace(SessionState::Completed);
                if let Err(e) = self.stream.shutdown().await {
                    log::debug!("session {}: shutdown after completion failed: {e}", self.id);
                }
                info!(
                    "session {} ({}) with {} completed: {done} files",
                    self.id, self.role, self.peer
                );
                self.progress.emit(TransferEvent::Completed { count: done });
                TransferOutcome::Completed {
                    files_transferred: done,
                }
            }
            Err(e) => {
                let failed_in = self.state.send_replace(SessionState::Failed);
                warn!(
                    "session {} ({}) with {} failed in {failed_in:?} after {done} files: {e}",
                    self.id, self.role, self.peer
                );
                let kind = e.kind();
                let message = e.to_string();
                self.progress.emit(TransferEvent::Failed {
                    kind,
                    message: message.clone(),
                    files_done: done,
                });
                TransferOutcome::Failed {
                    reason: kind,
                    message,
                    partial_files_transferred: done,
                }
            }
        }
    }
}

/// Per-session counters; kept apart from the stream so both can be borrowed at once.
struct Progress {
    role: Role,
    notifier: EventNotifier,
    done: u32,
    total: u32,
}

impl Progress {
    fn emit(&self, event: TransferEvent) {
        self.notifier.emit(self.role, event);
    }

    fn start(&mut self, total: u32) {
        self.total = total;
        self.emit(TransferEvent::Progress { done: 0, total });
    }

    fn file_done(&mut self, event: TransferEvent) {
        debug_assert!(self.done < self.total);
        self.done += 1;
        self.emit(event);
        self.emit(TransferEvent::Progress {
            done: self.done,
            total: self.total,
        });
    }
}

/// Resolves once `cancel` flips to `true`; never resolves if the sender is gone.
pub(crate) async fn cancelled(mut cancel: watch::Receiver<bool>) {
    if cancel.wait_for(|c| *c).await.is_err() {
        std::future::pending::<()>().await;
    }
}

fn size_mismatch(name: &str, expected: u64, actual: u64) -> SyncError {
    SyncError::SizeMismatch {
        name: name.to_string(),
        expected,
        actual,
    }
}
