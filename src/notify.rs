//! Event delivery from session workers to the caller.
//!
//! Workers push events into one unbounded channel; the caller drains it from a
//! single task, so events arrive one at a time and in the order produced.

use serde::{Deserialize, Serialize};
use tokio::{
    sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender},
    task::JoinHandle,
};

use crate::{error::ErrorKind, models::Role};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum TransferEvent {
    Progress {
        done: u32,
        total: u32,
    },
    FileTransferred {
        name: String,
    },
    /// The Host already had this file and left it untouched.
    FileSkipped {
        name: String,
    },
    Completed {
        count: u32,
    },
    Failed {
        kind: ErrorKind,
        message: String,
        files_done: u32,
    },
}

impl TransferEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransferEvent::Completed { .. } | TransferEvent::Failed { .. }
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncEvent {
    pub role: Role,
    #[serde(flatten)]
    pub event: TransferEvent,
}

#[derive(Debug, Clone)]
pub struct EventNotifier {
    tx: UnboundedSender<SyncEvent>,
}

impl EventNotifier {
    pub fn channel() -> (Self, UnboundedReceiver<SyncEvent>) {
        let (tx, rx) = unbounded_channel();
        (Self { tx }, rx)
    }

    pub fn emit(&self, role: Role, event: TransferEvent) {
        let msg = SyncEvent { role, event };
        if let Err(e) = self.tx.send(msg) {
            log::error!("got error sending {:?} to frontend: no receiver", e.0);
        }
    }
}

/// Calls `handler` for every event, one at a time, until every sender is gone.
pub fn dispatch<F>(mut rx: UnboundedReceiver<SyncEvent>, mut handler: F) -> JoinHandle<()>
where
    F: FnMut(SyncEvent) + Send + 'static,
{
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            handler(event);
        }
        log::debug!("event dispatcher finished");
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[tokio::test]
    async fn dispatch_preserves_emission_order() {
        let (notifier, rx) = EventNotifier::channel();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let handle = dispatch(rx, move |event| sink.lock().unwrap().push(event.event));

        for done in 0..50 {
            notifier.emit(Role::Host, TransferEvent::Progress { done, total: 50 });
        }
        notifier.emit(Role::Host, TransferEvent::Completed { count: 50 });
        drop(notifier);
        handle.await.unwrap();

        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 51);
        for (i, event) in seen[..50].iter().enumerate() {
            assert_eq!(
                event,
                &TransferEvent::Progress {
                    done: i as u32,
                    total: 50
                }
            );
        }
        assert!(seen[50].is_terminal());
    }

    #[test]
    fn events_serialize_with_role_and_type() {
        let event = SyncEvent {
            role: Role::Client,
            event: TransferEvent::FileTransferred {
                name: "a.jpg".into(),
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"role": "client", "type": "fileTransferred", "name": "a.jpg"})
        );
    }

    #[test]
    fn emitting_without_receiver_does_not_panic() {
        let (notifier, rx) = EventNotifier::channel();
        drop(rx);
        notifier.emit(Role::Host, TransferEvent::Completed { count: 0 });
    }
}
