//! Incremental reader over a growing store.
//!
//! Each reader owns a [`ReadCursor`]. A poll compares the store size with the
//! size observed last time: equal means nothing new, smaller means the store
//! was reset by a new run and the cursor starts over. Only newline-terminated
//! lines are ever consumed, so a record still being written is picked up by a
//! later poll instead of being emitted partially.

use crate::error::StoreError;
use crate::store::store_size;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::{ErrorKind, Read};
use std::path::{Path, PathBuf};
use tp_common::{decode_line, TelemetrySample, STORE_HEADER};
use tracing::{debug, trace, warn};

/// A consumer's private bookmark into the store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReadCursor {
    /// Data lines consumed after the header, decoded or skipped.
    pub lines_consumed: u64,
    /// Whether the header line has been read and discarded.
    pub header_acknowledged: bool,
    /// Store size in bytes at the last poll.
    pub observed_size: u64,
}

impl ReadCursor {
    pub fn clear(&mut self) {
        *self = ReadCursor::default();
    }
}

/// Result of one poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PollBatch {
    /// Newly decoded samples in file order.
    pub samples: Vec<TelemetrySample>,
    /// The store shrank since the previous poll and the cursor was cleared.
    pub reset: bool,
    /// Complete lines that failed to decode in this poll.
    pub skipped: u64,
}

impl PollBatch {
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty() && !self.reset && self.skipped == 0
    }
}

/// Follows a store through polls without ever writing to it.
#[derive(Debug, Clone)]
pub struct IncrementalReader {
    path: PathBuf,
    cursor: ReadCursor,
}

impl IncrementalReader {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_cursor(path, ReadCursor::default())
    }

    /// Resume from a previously saved cursor.
    pub fn with_cursor(path: impl Into<PathBuf>, cursor: ReadCursor) -> Self {
        IncrementalReader {
            path: path.into(),
            cursor,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cursor(&self) -> ReadCursor {
        self.cursor
    }

    /// Return the samples appended since the previous poll.
    pub fn poll(&mut self) -> Result<Vec<TelemetrySample>, StoreError> {
        self.poll_batch().map(|batch| batch.samples)
    }

    /// Poll and report whether a reset happened.
    pub fn poll_batch(&mut self) -> Result<PollBatch, StoreError> {
        let mut batch = PollBatch::default();

        let size = store_size(&self.path)?;
        if size == self.cursor.observed_size {
            return Ok(batch);
        }

        // Sizes are re-derived from the bytes actually read, which covers a
        // store that changed between the size query and the read.
        let content = self.read_store()?;
        let size = content.len() as u64;
        if size == self.cursor.observed_size {
            return Ok(batch);
        }
        if size < self.cursor.observed_size {
            debug!(
                path = %self.path.display(),
                observed = self.cursor.observed_size,
                size,
                "store shrank; restarting cursor"
            );
            self.cursor.clear();
            batch.reset = true;
        }

        let complete = match content.iter().rposition(|&b| b == b'\n') {
            Some(last) => &content[..=last],
            None => &content[..0],
        };
        let mut lines = complete.split_inclusive(|&b| b == b'\n');

        if !self.cursor.header_acknowledged {
            let Some(header) = lines.next() else {
                trace!(path = %self.path.display(), "header not yet complete");
                return Ok(batch);
            };
            let header = String::from_utf8_lossy(header);
            if header.trim() != STORE_HEADER {
                warn!(
                    path = %self.path.display(),
                    found = %header.trim(),
                    "unexpected store header; discarding first line"
                );
            }
            self.cursor.header_acknowledged = true;
        }

        let already = usize::try_from(self.cursor.lines_consumed).unwrap_or(usize::MAX);
        for (offset, line) in lines.skip(already).enumerate() {
            let decoded = std::str::from_utf8(line)
                .map_err(|_| tp_common::InvalidRecordError::NotUtf8)
                .and_then(decode_line);
            match decoded {
                Ok(sample) => batch.samples.push(sample),
                Err(err) => {
                    batch.skipped += 1;
                    debug!(
                        path = %self.path.display(),
                        line = self.cursor.lines_consumed + offset as u64 + 1,
                        error = %err,
                        "skipping malformed stored record"
                    );
                }
            }
        }

        self.cursor.lines_consumed += batch.samples.len() as u64 + batch.skipped;
        self.cursor.observed_size = size;
        Ok(batch)
    }

    fn read_store(&self) -> Result<Vec<u8>, StoreError> {
        let mut content = Vec::new();
        match File::open(&self.path) {
            Ok(mut file) => {
                file.read_to_end(&mut content)
                    .map_err(|e| StoreError::Io {
                        path: self.path.clone(),
                        source: e,
                    })?;
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => {
                return Err(StoreError::Io {
                    path: self.path.clone(),
                    source: e,
                })
            }
        }
        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{LogStore, OpenMode};
    use std::io::Write;
    use tempfile::TempDir;

    fn sample(i: u32) -> TelemetrySample {
        TelemetrySample::new(f64::from(i), 2.0, 3.0, 4.0)
    }

    fn write_rows(path: &Path, rows: u32) {
        let mut store = LogStore::open(path, OpenMode::Reset).unwrap();
        for i in 0..rows {
            store.append(&sample(i)).unwrap();
        }
    }

    #[test]
    fn missing_store_yields_nothing() {
        let tmp = TempDir::new().unwrap();
        let mut reader = IncrementalReader::new(tmp.path().join("absent.csv"));

        assert!(reader.poll().unwrap().is_empty());
        assert_eq!(reader.cursor(), ReadCursor::default());
    }

    #[test]
    fn header_only_store_acknowledges_header() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("log.csv");
        write_rows(&path, 0);

        let mut reader = IncrementalReader::new(&path);
        assert!(reader.poll().unwrap().is_empty());

        let cursor = reader.cursor();
        assert!(cursor.header_acknowledged);
        assert_eq!(cursor.lines_consumed, 0);
        assert_eq!(cursor.observed_size, LogStore::header().len() as u64);
    }

    #[test]
    fn poll_returns_only_new_rows() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("log.csv");
        let mut store = LogStore::open(&path, OpenMode::Reset).unwrap();
        let mut reader = IncrementalReader::new(&path);

        store.append(&sample(1)).unwrap();
        store.append(&sample(2)).unwrap();
        assert_eq!(reader.poll().unwrap(), vec![sample(1), sample(2)]);

        assert!(reader.poll().unwrap().is_empty());

        store.append(&sample(3)).unwrap();
        assert_eq!(reader.poll().unwrap(), vec![sample(3)]);
        assert_eq!(reader.cursor().lines_consumed, 3);
    }

    #[test]
    fn unterminated_line_waits_for_completion() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("log.csv");
        write_rows(&path, 1);

        let mut file = std::fs::OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"9.000000,2.000000,3.").unwrap();
        file.flush().unwrap();

        let mut reader = IncrementalReader::new(&path);
        assert_eq!(reader.poll().unwrap(), vec![sample(0)]);

        file.write_all(b"00,4.00\n").unwrap();
        file.flush().unwrap();
        assert_eq!(reader.poll().unwrap(), vec![sample(9)]);
        assert_eq!(reader.cursor().lines_consumed, 2);
    }

    #[test]
    fn incomplete_header_leaves_cursor_untouched() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("log.csv");
        std::fs::write(&path, b"lat,lon").unwrap();

        let mut reader = IncrementalReader::new(&path);
        assert!(reader.poll().unwrap().is_empty());
        assert_eq!(reader.cursor(), ReadCursor::default());
    }

    #[test]
    fn malformed_rows_are_skipped_and_counted() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("log.csv");
        std::fs::write(
            &path,
            b"lat,lon,alt,vel\n1,2,3,4\nnot,a,record\n5,6,7,8\n\n",
        )
        .unwrap();

        let mut reader = IncrementalReader::new(&path);
        let batch = reader.poll_batch().unwrap();

        assert_eq!(
            batch.samples,
            vec![
                TelemetrySample::new(1.0, 2.0, 3.0, 4.0),
                TelemetrySample::new(5.0, 6.0, 7.0, 8.0)
            ]
        );
        assert_eq!(batch.skipped, 2);
        assert_eq!(reader.cursor().lines_consumed, 4);
    }

    #[test]
    fn legacy_store_without_header_loses_first_line_once() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("log.csv");
        std::fs::write(&path, b"1,2,3,4\n5,6,7,8\n").unwrap();

        let mut reader = IncrementalReader::new(&path);
        assert_eq!(
            reader.poll().unwrap(),
            vec![TelemetrySample::new(5.0, 6.0, 7.0, 8.0)]
        );
        assert!(reader.cursor().header_acknowledged);
    }

    #[test]
    fn shrinking_store_resets_cursor() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("log.csv");
        write_rows(&path, 4);

        let mut reader = IncrementalReader::new(&path);
        assert_eq!(reader.poll().unwrap().len(), 4);

        write_rows(&path, 1);
        let batch = reader.poll_batch().unwrap();
        assert!(batch.reset);
        assert_eq!(batch.samples, vec![sample(0)]);
        assert_eq!(reader.cursor().lines_consumed, 1);
    }

    #[test]
    fn resumed_cursor_skips_consumed_rows() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("log.csv");
        write_rows(&path, 2);

        let mut first = IncrementalReader::new(&path);
        first.poll().unwrap();
        let saved = first.cursor();

        let mut store = LogStore::open(&path, OpenMode::Append).unwrap();
        store.append(&sample(5)).unwrap();

        let mut resumed = IncrementalReader::with_cursor(&path, saved);
        assert_eq!(resumed.poll().unwrap(), vec![sample(5)]);
    }

    #[test]
    fn cursor_serializes_as_plain_value() {
        let cursor = ReadCursor {
            lines_consumed: 3,
            header_acknowledged: true,
            observed_size: 120,
        };
        let json = serde_json::to_string(&cursor).unwrap();
        let back: ReadCursor = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cursor);
    }
}
