use log::debug;
use tokio::{
    io::{AsyncRead, AsyncWrite, BufWriter},
    sync::watch,
};

use super::{cancelled, size_mismatch, TransferSession};
use crate::{
    codec::BatchWriter,
    error::{Result, SyncError},
    models::{SessionState, TransferBatch, TransferOutcome},
    notify::TransferEvent,
};

impl<T> TransferSession<T>
where
    T: AsyncRead + AsyncWrite + Unpin + Send,
{
    /// Sends every file in `batch`, in order.
    pub async fn send(mut self, batch: TransferBatch, cancel: watch::Receiver<bool>) -> TransferOutcome {
        let result = tokio::select! {
            r = self.send_batch(batch) => r,
            _ = cancelled(cancel) => Err(SyncError::Cancelled),
        };
        self.finish(result).await
    }

    async fn send_batch(&mut self, batch: TransferBatch) -> Result<()> {
        batch.validate()?;
        let entries = batch.into_entries();
        let total = entries.len() as u32;

        self.state.send_replace(SessionState::AwaitingCount);
        let buffered = BufWriter::with_capacity(self.chunk_size, &mut self.stream);
        let mut writer = BatchWriter::with_chunk_size(buffered, self.chunk_size);

        writer.write_batch_header(total).await?;
        writer.flush().await?;
        debug!("session {}: sending {total} files to {}", self.id, self.peer);
        self.progress.start(total);

        for (index, entry) in entries.into_iter().enumerate() {
            self.state.send_replace(SessionState::TransferringFile(index as u32));
            let (file, mut source) = entry.open().await?;
            debug!("session {}: sending {} ({} bytes)", self.id, file.name, file.size);

            writer.write_file_header(&file).await?;
            let sent = writer.write_body(&mut source, file.size).await?;
            writer.flush().await?;
            if sent != file.size {
                return Err(size_mismatch(&file.name, file.size, sent));
            }

            self.progress
                .file_done(TransferEvent::FileTransferred { name: file.name });
        }

        Ok(())
    }
}
