//! Wire framing for a batch of files.
//!
//! ```text
//! Batch = FileCount(u32 BE) File*
//! File  = NameLen(u16 BE) Name(UTF-8) Size(u64 BE) Body(Size bytes)
//! ```
//!
//! The codec only frames bytes; the caller owns the stream and decides what
//! a short body means.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    error::{Result, SyncError},
    models::{validate_file_name, FileDescriptor},
    CHUNK_SIZE,
};

/// Upper bounds applied while decoding headers.
#[derive(Debug, Clone, Copy)]
pub struct Limits {
    pub max_files: u32,
    pub max_file_size: u64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            max_files: u32::MAX,
            max_file_size: u64::MAX,
        }
    }
}

/// Writes batch headers and file bodies to an async writer
pub struct BatchWriter<W> {
    writer: W,
    buf: Vec<u8>,
}

impl<W> BatchWriter<W> {
    pub fn new(writer: W) -> Self {
        Self::with_chunk_size(writer, CHUNK_SIZE)
    }

    pub fn with_chunk_size(writer: W, chunk_size: usize) -> Self {
        Self {
            writer,
            buf: vec![0; chunk_size.max(1)],
        }
    }

    pub fn get_mut(&mut self) -> &mut W {
        &mut self.writer
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: AsyncWrite + Unpin> BatchWriter<W> {
    pub async fn write_batch_header(&mut self, count: u32) -> Result<()> {
        self.writer.write_u32(count).await?;
        Ok(())
    }

    /// Fails without writing anything if the name could not be decoded safely on the other end.
    pub async fn write_file_header(&mut self, file: &FileDescriptor) -> Result<()> {
        validate_file_name(&file.name)?;
        self.writer.write_u16(file.name.len() as u16).await?;
        self.writer.write_all(file.name.as_bytes()).await?;
        self.writer.write_u64(file.size).await?;
        Ok(())
    }

    /// Copies at most `size` bytes from `source`, one chunk at a time.
    ///
    /// Returns the number of bytes written, which is less than `size` only if
    /// `source` ran dry first.
    pub async fn write_body<R>(&mut self, source: &mut R, size: u64) -> Result<u64>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut written = 0u64;
        while written < size {
            let want = chunk_len(self.buf.len(), size - written);
            let n = source.read(&mut self.buf[..want]).await?;
            if n == 0 {
                break;
            }
            self.writer.write_all(&self.buf[..n]).await?;
            written += n as u64;
        }
        Ok(written)
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer.flush().await?;
        Ok(())
    }
}

/// Reads batch headers and file bodies from an async reader
pub struct BatchReader<R> {
    reader: R,
    buf: Vec<u8>,
    limits: Limits,
}

impl<R> BatchReader<R> {
    pub fn new(reader: R) -> Self {
        Self::with_chunk_size(reader, CHUNK_SIZE)
    }

    pub fn with_chunk_size(reader: R, chunk_size: usize) -> Self {
        Self {
            reader,
            buf: vec![0; chunk_size.max(1)],
            limits: Limits::default(),
        }
    }

    pub fn limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    pub fn get_mut(&mut self) -> &mut R {
        &mut self.reader
    }

    pub fn into_inner(self) -> R {
        self.reader
    }
}

impl<R: AsyncRead + Unpin> BatchReader<R> {
    pub async fn read_batch_header(&mut self) -> Result<u32> {
        let count = self.reader.read_u32().await?;
        if count > self.limits.max_files {
            return Err(SyncError::protocol(format!(
                "peer announced {count} files, the limit is {}",
                self.limits.max_files
            )));
        }
        Ok(count)
    }

    pub async fn read_file_header(&mut self) -> Result<FileDescriptor> {
        let name_len = self.reader.read_u16().await?;
        let mut name = vec![0; name_len as usize];
        self.reader.read_exact(&mut name).await?;
        let name = String::from_utf8(name)
            .map_err(|_| SyncError::protocol("file name is not valid UTF-8"))?;
        validate_file_name(&name)?;

        let size = self.reader.read_u64().await?;
        if size > self.limits.max_file_size {
            return Err(SyncError::protocol(format!(
                "{name} is {size} bytes, the limit is {}",
                self.limits.max_file_size
            )));
        }
        Ok(FileDescriptor { name, size })
    }

    /// Copies up to `size` body bytes into `sink`.
    ///
    /// Returns the number of bytes consumed; a value below `size` means the
    /// stream ended early.
    pub async fn read_body<W>(&mut self, sink: &mut W, size: u64) -> Result<u64>
    where
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut consumed = 0u64;
        while consumed < size {
            let want = chunk_len(self.buf.len(), size - consumed);
            let n = self.reader.read(&mut self.buf[..want]).await?;
            if n == 0 {
                break;
            }
            sink.write_all(&self.buf[..n]).await?;
            consumed += n as u64;
        }
        sink.flush().await?;
        Ok(consumed)
    }

    /// Consumes a body without storing it.
    pub async fn skip_body(&mut self, size: u64) -> Result<u64> {
        self.read_body(&mut tokio::io::sink(), size).await
    }
}

fn chunk_len(buf_len: usize, remaining: u64) -> usize {
    usize::try_from(remaining).map_or(buf_len, |r| r.min(buf_len))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[tokio::test]
    async fn encodes_reference_layout() {
        let mut out = Vec::new();
        {
            let mut writer = BatchWriter::new(&mut out);
            writer.write_batch_header(1).await.unwrap();
            writer
                .write_file_header(&FileDescriptor::new("a.jpg", 3))
                .await
                .unwrap();
            let mut body = Cursor::new(vec![0xAA; 3]);
            assert_eq!(writer.write_body(&mut body, 3).await.unwrap(), 3);
            writer.flush().await.unwrap();
        }

        let mut expected = vec![0, 0, 0, 1, 0, 5];
        expected.extend_from_slice(b"a.jpg");
        expected.extend_from_slice(&3u64.to_be_bytes());
        expected.extend_from_slice(&[0xAA; 3]);
        assert_eq!(out, expected);
    }

    #[tokio::test]
    async fn decodes_headers_and_body_in_small_chunks() {
        let mut wire = Vec::new();
        {
            let mut writer = BatchWriter::with_chunk_size(&mut wire, 4);
            writer.write_batch_header(2).await.unwrap();
            writer
                .write_file_header(&FileDescriptor::new("one.bin", 10))
                .await
                .unwrap();
            writer
                .write_body(&mut Cursor::new((0u8..10).collect::<Vec<_>>()), 10)
                .await
                .unwrap();
            writer
                .write_file_header(&FileDescriptor::new("empty", 0))
                .await
                .unwrap();
        }

        let mut reader = BatchReader::with_chunk_size(Cursor::new(wire), 3);
        assert_eq!(reader.read_batch_header().await.unwrap(), 2);
        let first = reader.read_file_header().await.unwrap();
        assert_eq!(first, FileDescriptor::new("one.bin", 10));
        let mut body = Vec::new();
        assert_eq!(reader.read_body(&mut body, first.size).await.unwrap(), 10);
        assert_eq!(body, (0u8..10).collect::<Vec<_>>());
        let second = reader.read_file_header().await.unwrap();
        assert_eq!(second, FileDescriptor::new("empty", 0));
        assert_eq!(reader.read_body(&mut Vec::new(), 0).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn short_body_reports_bytes_actually_read() {
        let mut reader = BatchReader::new(Cursor::new(vec![1u8; 40]));
        let mut body = Vec::new();
        assert_eq!(reader.read_body(&mut body, 100).await.unwrap(), 40);
        assert_eq!(body.len(), 40);
    }

    #[tokio::test]
    async fn short_source_stops_writer_early() {
        let mut out = Vec::new();
        let mut writer = BatchWriter::new(&mut out);
        let written = writer
            .write_body(&mut Cursor::new(b"Short".to_vec()), 100)
            .await
            .unwrap();
        assert_eq!(written, 5);
    }

    #[tokio::test]
    async fn writer_never_sends_more_than_declared() {
        let mut out = Vec::new();
        let mut writer = BatchWriter::new(&mut out);
        let written = writer
            .write_body(&mut Cursor::new(vec![7u8; 64]), 10)
            .await
            .unwrap();
        assert_eq!(written, 10);
        assert_eq!(out.len(), 10);
    }

    #[tokio::test]
    async fn rejects_counts_and_sizes_over_the_limits() {
        let limits = Limits {
            max_files: 4,
            max_file_size: 16,
        };
        let mut reader = BatchReader::new(Cursor::new(5u32.to_be_bytes().to_vec())).limits(limits);
        assert!(matches!(
            reader.read_batch_header().await,
            Err(SyncError::Protocol(_))
        ));

        let mut wire = Vec::new();
        BatchWriter::new(&mut wire)
            .write_file_header(&FileDescriptor::new("big", 17))
            .await
            .unwrap();
        let mut reader = BatchReader::new(Cursor::new(wire)).limits(limits);
        assert!(matches!(
            reader.read_file_header().await,
            Err(SyncError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn rejects_path_separators_from_the_wire() {
        let name = b"../x";
        let mut wire = vec![0, name.len() as u8];
        wire.extend_from_slice(name);
        wire.extend_from_slice(&0u64.to_be_bytes());

        let mut reader = BatchReader::new(Cursor::new(wire));
        assert!(matches!(
            reader.read_file_header().await,
            Err(SyncError::Protocol(_))
        ));
    }

    #[tokio::test]
    async fn truncated_header_is_a_transport_error() {
        let mut reader = BatchReader::new(Cursor::new(vec![0u8, 0]));
        assert!(matches!(
            reader.read_batch_header().await,
            Err(SyncError::Transport(_))
        ));
    }
}
