//! Durable telemetry log and incremental readers.
//!
//! The store is a line-oriented text file with a fixed header. A single
//! writer appends whole lines; any number of readers follow it through their
//! own [`ReadCursor`] without coordinating with the writer or each other.

pub mod error;
pub mod history;
pub mod reader;
pub mod store;

pub use error::StoreError;
pub use history::SampleHistory;
pub use reader::{IncrementalReader, PollBatch, ReadCursor};
pub use store::{store_size, LogStore, OpenMode, StoreOptions, SyncPolicy};
