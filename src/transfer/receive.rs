use log::debug;
use tokio::{
    io::{AsyncRead, AsyncWrite, BufReader},
    sync::watch,
};

use super::{cancelled, size_mismatch, TransferSession};
use crate::{
    codec::{BatchReader, Limits},
    error::{Result, SyncError},
    models::{SessionState, TransferOutcome},
    notify::TransferEvent,
    storage::FileSink,
};

impl<T> TransferSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Receives one batch into `sink`.
    ///
    /// Files committed before a failure stay in the sink; the file in flight
    /// when the session fails or is cancelled is discarded.
    pub async fn receive<S: FileSink>(
        mut self,
        sink: &mut S,
        limits: Limits,
        cancel: watch::Receiver<bool>,
    ) -> TransferOutcome {
        let mut in_flight = None;
        let result = tokio::select! {
            r = self.receive_batch(sink, limits, &mut in_flight) => r,
            _ = cancelled(cancel) => Err(SyncError::Cancelled),
        };

        if result.is_err() {
            if let Some(name) = in_flight {
                if let Err(e) = sink.discard(&name).await {
                    log::warn!("session {}: could not discard {name}: {e}", self.id);
                }
            }
        }

        self.finish(result).await
    }

    async fn receive_batch<S: FileSink>(
        &mut self,
        sink: &mut S,
        limits: Limits,
        in_flight: &mut Option<String>,
    ) -> Result<()> {
        self.state.send_replace(SessionState::AwaitingCount);
        let buffered = BufReader::with_capacity(self.chunk_size, &mut self.stream);
        let mut reader = BatchReader::with_chunk_size(buffered, self.chunk_size).limits(limits);

        let total = reader.read_batch_header().await?;
        debug!("session {}: will receive {total} files from {}", self.id, self.peer);
        sink.prepare().await?;
        self.progress.start(total);

        for index in 0..total {
            self.state.send_replace(SessionState::TransferringFile(index));
            let file = reader.read_file_header().await?;
            debug!(
                "session {}: receiving {} ({} bytes)",
                self.id, file.name, file.size
            );

            if sink.skip_existing() && sink.exists(&file.name).await? {
                let drained = reader.skip_body(file.size).await?;
                if drained != file.size {
                    return Err(size_mismatch(&file.name, file.size, drained));
                }
                debug!("session {}: {} already exists, skipped", self.id, file.name);
                self.progress
                    .file_done(TransferEvent::FileSkipped { name: file.name });
                continue;
            }

            // only a file this session created may be discarded
            let mut writer = sink.open(&file.name).await?;
            *in_flight = Some(file.name.clone());
            let written = reader.read_body(&mut writer, file.size).await?;
            if written != file.size {
                return Err(size_mismatch(&file.name, file.size, written));
            }
            sink.commit(&file.name, writer).await?;
            *in_flight = None;

            self.progress
                .file_done(TransferEvent::FileTransferred { name: file.name });
        }

        Ok(())
    }
}
