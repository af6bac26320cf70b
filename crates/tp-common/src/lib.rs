//! Telemetry pipeline common types.
//!
//! This crate provides the data contract shared by every pipeline component:
//! - `TelemetrySample`, the fixed four-field record
//! - The record codec for the datagram wire format and the storage line format
//! - Output format selection for CLI payloads

pub mod codec;
pub mod output;
pub mod sample;

pub use codec::{
    classify, decode, decode_line, encode, encode_line, is_sentinel, InvalidRecordError,
    WirePayload, END_SENTINEL, STORE_HEADER,
};
pub use output::OutputFormat;
pub use sample::TelemetrySample;

/// Default UDP port the receiver listens on.
pub const DEFAULT_RECEIVER_PORT: u16 = 5555;

/// Default port of the dashboard service.
pub const DEFAULT_DASHBOARD_PORT: u16 = 8501;

/// Default location of the store, relative to the working directory.
pub const DEFAULT_STORE_PATH: &str = "data/dados.csv";
