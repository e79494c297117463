use std::{
    fmt,
    io::Cursor,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tokio::{fs::File, io::AsyncRead};

use crate::error::{ErrorKind, Result, SyncError};

/// Name and exact byte length of one file in a batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub name: String,
    pub size: u64,
}

impl FileDescriptor {
    pub fn new(name: impl Into<String>, size: u64) -> Self {
        Self {
            name: name.into(),
            size,
        }
    }
}

/// Checks that `name` is a bare file name that cannot escape the destination directory.
pub fn validate_file_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(SyncError::protocol("empty file name"));
    }
    if name.len() > u16::MAX as usize {
        return Err(SyncError::protocol(format!(
            "file name is {} bytes, the limit is {}",
            name.len(),
            u16::MAX
        )));
    }
    if name == "." || name == ".." || name.contains(['/', '\\', '\0']) {
        return Err(SyncError::protocol(format!("illegal file name {name:?}")));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Host,
    Client,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Host => f.write_str("host"),
            Role::Client => f.write_str("client"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    AwaitingCount,
    TransferringFile(u32),
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TransferOutcome {
    Completed {
        files_transferred: u32,
    },
    Failed {
        reason: ErrorKind,
        message: String,
        partial_files_transferred: u32,
    },
}

impl TransferOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, TransferOutcome::Completed { .. })
    }
}

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

enum EntrySource {
    Path(PathBuf),
    Bytes(Vec<u8>),
    Reader(BoxedReader),
}

/// One file queued for sending. The byte stream is opened when the file's turn comes.
pub struct BatchEntry {
    pub descriptor: FileDescriptor,
    source: EntrySource,
}

impl BatchEntry {
    pub fn from_reader(name: impl Into<String>, size: u64, reader: BoxedReader) -> Self {
        Self {
            descriptor: FileDescriptor::new(name, size),
            source: EntrySource::Reader(reader),
        }
    }

    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            descriptor: FileDescriptor::new(name, bytes.len() as u64),
            source: EntrySource::Bytes(bytes),
        }
    }

    pub async fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(SyncError::protocol(format!("{path:?} is not a file")));
        }
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SyncError::protocol(format!("{path:?} has no usable file name")))?;

        Ok(Self {
            descriptor: FileDescriptor::new(name, metadata.len()),
            source: EntrySource::Path(path.to_path_buf()),
        })
    }

    pub(crate) async fn open(self) -> Result<(FileDescriptor, BoxedReader)> {
        let reader: BoxedReader = match self.source {
            EntrySource::Path(path) => Box::new(File::open(path).await?),
            EntrySource::Bytes(bytes) => Box::new(Cursor::new(bytes)),
            EntrySource::Reader(reader) => reader,
        };
        Ok((self.descriptor, reader))
    }
}

impl fmt::Debug for BatchEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchEntry")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

/// Ordered set of files sent in one session.
#[derive(Debug, Default)]
pub struct TransferBatch {
    entries: Vec<BatchEntry>,
}

impl TransferBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, entry: BatchEntry) -> &mut Self {
        self.entries.push(entry);
        self
    }

    pub fn push_bytes(&mut self, name: impl Into<String>, bytes: Vec<u8>) -> &mut Self {
        self.push(BatchEntry::from_bytes(name, bytes))
    }

    pub async fn from_paths<P: AsRef<Path>>(paths: impl IntoIterator<Item = P>) -> Result<Self> {
        let mut batch = Self::new();
        for path in paths {
            batch.push(BatchEntry::from_path(path).await?);
        }
        Ok(batch)
    }

    /// Every regular, non-hidden file directly inside `dir`, ordered by name.
    pub async fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let mut paths = Vec::new();
        let mut read_dir = tokio::fs::read_dir(dir.as_ref()).await?;
        while let Some(entry) = read_dir.next_entry().await? {
            let hidden = entry.file_name().to_string_lossy().starts_with('.');
            if hidden || !entry.file_type().await?.is_file() {
                continue;
            }
            paths.push(entry.path());
        }
        paths.sort();

        log::debug!("found {} files in {:?}", paths.len(), dir.as_ref());
        Self::from_paths(paths).await
    }

    /// Refuses a batch the wire format cannot carry, before any byte is sent.
    pub fn validate(&self) -> Result<()> {
        if u32::try_from(self.entries.len()).is_err() {
            return Err(SyncError::protocol(format!(
                "{} files is too many for one batch",
                self.entries.len()
            )));
        }
        for entry in &self.entries {
            validate_file_name(&entry.descriptor.name)?;
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &FileDescriptor> {
        self.entries.iter().map(|e| &e.descriptor)
    }

    pub(crate) fn into_entries(self) -> Vec<BatchEntry> {
        self.entries
    }
}
