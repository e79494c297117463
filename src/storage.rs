use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::{
    fs::File,
    io::{AsyncWrite, AsyncWriteExt, BufWriter},
};

use crate::{error::Result, models::validate_file_name};

/// Destination for received files.
///
/// The Host opens one writer per file, then either commits it once the full
/// body arrived or discards it.
#[async_trait]
pub trait FileSink: Send + Sync {
    type Writer: AsyncWrite + Send + Unpin;

    /// Whether files that already exist should be left alone.
    fn skip_existing(&self) -> bool {
        false
    }

    /// Called once per session, as soon as the file count is known.
    async fn prepare(&mut self) -> Result<()> {
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool>;

    async fn open(&mut self, name: &str) -> Result<Self::Writer>;

    async fn commit(&mut self, name: &str, writer: Self::Writer) -> Result<()>;

    async fn discard(&mut self, name: &str) -> Result<()>;
}

/// Writes received files into a single directory, created by [`FileSink::prepare`].
#[derive(Debug, Clone)]
pub struct DirectorySink {
    dir: PathBuf,
    skip_existing: bool,
}

impl DirectorySink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            skip_existing: false,
        }
    }

    pub fn with_skip_existing(mut self, skip: bool) -> Self {
        self.skip_existing = skip;
        self
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &str) -> Result<PathBuf> {
        validate_file_name(name)?;
        Ok(self.dir.join(name))
    }
}

#[async_trait]
impl FileSink for DirectorySink {
    type Writer = BufWriter<File>;

    fn skip_existing(&self) -> bool {
        self.skip_existing
    }

    async fn prepare(&mut self) -> Result<()> {
        // create_dir_all succeeds when the directory is already there
        if let Err(e) = tokio::fs::create_dir_all(&self.dir).await {
            log::error!("could not create download directory '{:?}', got {e}", self.dir);
            return Err(e.into());
        }
        Ok(())
    }

    async fn exists(&self, name: &str) -> Result<bool> {
        Ok(tokio::fs::try_exists(self.path_for(name)?).await?)
    }

    async fn open(&mut self, name: &str) -> Result<Self::Writer> {
        let file = File::create(self.path_for(name)?).await?;
        Ok(BufWriter::new(file))
    }

    async fn commit(&mut self, name: &str, mut writer: Self::Writer) -> Result<()> {
        writer.flush().await?;
        writer.shutdown().await?;
        log::debug!("saved {name} to {:?}", self.dir);
        Ok(())
    }

    async fn discard(&mut self, name: &str) -> Result<()> {
        let path = self.path_for(name)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => {
                log::debug!("removed partial file {path:?}");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => {
                log::warn!("could not remove partial file {path:?}, got {e}");
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn creates_missing_directory_and_overwrites() {
        let root = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::new(root.path().join("Camera"));
        sink.prepare().await.unwrap();
        sink.prepare().await.unwrap();

        for content in [&b"first version"[..], &b"second"[..]] {
            let mut writer = sink.open("a.jpg").await.unwrap();
            writer.write_all(content).await.unwrap();
            sink.commit("a.jpg", writer).await.unwrap();
        }

        let saved = std::fs::read(root.path().join("Camera/a.jpg")).unwrap();
        assert_eq!(saved, b"second");
        assert!(sink.exists("a.jpg").await.unwrap());
    }

    #[tokio::test]
    async fn discard_removes_file_and_tolerates_absence() {
        let root = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::new(root.path());

        let mut writer = sink.open("partial.bin").await.unwrap();
        writer.write_all(&[0u8; 10]).await.unwrap();
        drop(writer);

        sink.discard("partial.bin").await.unwrap();
        assert!(!root.path().join("partial.bin").exists());
        sink.discard("partial.bin").await.unwrap();
    }

    #[tokio::test]
    async fn refuses_names_outside_the_directory() {
        let root = tempfile::tempdir().unwrap();
        let mut sink = DirectorySink::new(root.path().join("inbox"));
        assert!(sink.open("../escape").await.is_err());
    }
}
