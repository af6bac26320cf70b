//! Append-only log store writer.
//!
//! The store has exactly one writer at a time. Every record is written as a
//! single complete line and flushed before `append` returns, so the size a
//! reader observes never covers a write that has not completed.

use crate::error::StoreError;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tp_common::{encode_line, TelemetrySample};
use tracing::{debug, info};

const HEADER_LINE: &[u8] = b"lat,lon,alt,vel\n";

/// How an existing store is treated on open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenMode {
    /// Discard prior contents and start from a fresh header.
    Reset,
    /// Keep prior contents; write the header only if the store is absent or empty.
    Append,
}

/// Durability applied after each append.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPolicy {
    /// Flush to the OS before returning.
    #[default]
    Flush,
    /// Flush and `sync_data` before returning.
    Fsync,
}

/// Writer options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreOptions {
    #[serde(default)]
    pub sync: SyncPolicy,
}

/// The single writer of a telemetry log.
pub struct LogStore {
    path: PathBuf,
    file: File,
    size: u64,
    rows_appended: u64,
    options: StoreOptions,
}

impl LogStore {
    /// Open a store with default options.
    pub fn open(path: impl AsRef<Path>, mode: OpenMode) -> Result<Self, StoreError> {
        Self::open_with_options(path, mode, StoreOptions::default())
    }

    /// Open a store, creating it and its parent directories when missing.
    pub fn open_with_options(
        path: impl AsRef<Path>,
        mode: OpenMode,
        options: StoreOptions,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if path.is_dir() {
            return Err(StoreError::NotAStore { path });
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|e| StoreError::io(&path, e))?;

        if mode == OpenMode::Reset {
            file.set_len(0).map_err(|e| StoreError::io(&path, e))?;
        }

        let size = file
            .metadata()
            .map_err(|e| StoreError::io(&path, e))?
            .len();

        let mut store = LogStore {
            path,
            file,
            size,
            rows_appended: 0,
            options,
        };

        if store.size == 0 {
            store.write_line(Self::header())?;
            debug!(path = %store.path.display(), "wrote store header");
        }

        info!(
            path = %store.path.display(),
            mode = ?mode,
            size = store.size,
            "log store opened"
        );
        Ok(store)
    }

    /// The header line, including its terminator.
    pub fn header() -> &'static [u8] {
        HEADER_LINE
    }

    /// Append one record as a complete line.
    pub fn append(&mut self, sample: &TelemetrySample) -> Result<(), StoreError> {
        let line = encode_line(sample);
        self.write_line(line.as_bytes())?;
        self.rows_appended += 1;
        Ok(())
    }

    /// Size in bytes of everything this writer has completed.
    pub fn current_size(&self) -> u64 {
        self.size
    }

    /// Rows appended through this handle.
    pub fn rows_appended(&self) -> u64 {
        self.rows_appended
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_line(&mut self, bytes: &[u8]) -> Result<(), StoreError> {
        self.file
            .write_all(bytes)
            .map_err(|e| StoreError::io(&self.path, e))?;
        self.file
            .flush()
            .map_err(|e| StoreError::io(&self.path, e))?;
        if self.options.sync == SyncPolicy::Fsync {
            self.file
                .sync_data()
                .map_err(|e| StoreError::io(&self.path, e))?;
        }
        self.size += bytes.len() as u64;
        Ok(())
    }
}

/// Size of the store at `path` as seen by a reader. A missing store has size 0.
pub fn store_size(path: impl AsRef<Path>) -> Result<u64, StoreError> {
    let path = path.as_ref();
    match std::fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Err(StoreError::NotAStore {
            path: path.to_path_buf(),
        }),
        Ok(meta) => Ok(meta.len()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
        Err(e) => Err(StoreError::io(path, e)),
    }
}
