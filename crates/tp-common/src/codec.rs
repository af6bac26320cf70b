//! Record codec for the datagram wire format and the storage line format.
//!
//! Wire format: one datagram carries one record, UTF-8 text
//! `lat,lon,alt,rate` with 6/6/2/2 decimal places. The literal payload
//! `END` is the end-of-stream sentinel and never decodes to a sample.
//!
//! Storage format: the same text, one record per line, newline-terminated,
//! below a fixed `lat,lon,alt,vel` header line.

use crate::sample::TelemetrySample;
use thiserror::Error;

/// End-of-stream sentinel payload.
pub const END_SENTINEL: &str = "END";

/// Header line of the durable store (without terminator).
pub const STORE_HEADER: &str = "lat,lon,alt,vel";

/// Number of fields in a record.
pub const FIELD_COUNT: usize = 4;

const FIELD_NAMES: [&str; FIELD_COUNT] = ["lat", "lon", "alt", "rate"];

/// Reasons a payload fails to decode into a sample.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum InvalidRecordError {
    #[error("payload is not valid UTF-8")]
    NotUtf8,

    #[error("payload is empty")]
    Empty,

    #[error("payload is the end-of-stream sentinel")]
    Sentinel,

    #[error("expected {expected} fields, found {found}", expected = FIELD_COUNT)]
    FieldCount { found: usize },

    #[error("field {field} is not a number: {value:?}")]
    NotANumber { field: &'static str, value: String },

    #[error("field {field} is not finite")]
    NonFinite { field: &'static str },
}

/// A classified wire payload.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum WirePayload {
    /// The end-of-stream sentinel.
    EndOfStream,
    /// A valid telemetry sample.
    Sample(TelemetrySample),
}

/// Encode a sample into its wire payload.
pub fn encode(sample: &TelemetrySample) -> Vec<u8> {
    format_record(sample).into_bytes()
}

/// Encode a sample into a newline-terminated storage line.
pub fn encode_line(sample: &TelemetrySample) -> String {
    let mut line = format_record(sample);
    line.push('\n');
    line
}

fn format_record(sample: &TelemetrySample) -> String {
    format!(
        "{:.6},{:.6},{:.2},{:.2}",
        sample.latitude, sample.longitude, sample.altitude, sample.rate
    )
}

/// Whether a payload is the end-of-stream sentinel.
pub fn is_sentinel(payload: &[u8]) -> bool {
    match std::str::from_utf8(payload) {
        Ok(text) => text.trim() == END_SENTINEL,
        Err(_) => false,
    }
}

/// Classify a wire payload, checking the sentinel before attempting decode.
pub fn classify(payload: &[u8]) -> Result<WirePayload, InvalidRecordError> {
    if is_sentinel(payload) {
        return Ok(WirePayload::EndOfStream);
    }
    decode(payload).map(WirePayload::Sample)
}

/// Decode a wire payload into a sample.
///
/// Callers that need sentinel handling must check [`is_sentinel`] first; the
/// sentinel itself is reported as [`InvalidRecordError::Sentinel`].
pub fn decode(payload: &[u8]) -> Result<TelemetrySample, InvalidRecordError> {
    let text = std::str::from_utf8(payload).map_err(|_| InvalidRecordError::NotUtf8)?;
    decode_line(text)
}

/// Decode one storage line (terminator optional).
pub fn decode_line(line: &str) -> Result<TelemetrySample, InvalidRecordError> {
    let text = line.trim();
    if text.is_empty() {
        return Err(InvalidRecordError::Empty);
    }
    if text == END_SENTINEL {
        return Err(InvalidRecordError::Sentinel);
    }

    let parts: Vec<&str> = text.split(',').collect();
    if parts.len() != FIELD_COUNT {
        return Err(InvalidRecordError::FieldCount { found: parts.len() });
    }

    let mut values = [0.0f64; FIELD_COUNT];
    for (i, raw) in parts.iter().enumerate() {
        values[i] = parse_field(FIELD_NAMES[i], raw)?;
    }

    Ok(TelemetrySample::new(values[0], values[1], values[2], values[3]))
}

fn parse_field(field: &'static str, raw: &str) -> Result<f64, InvalidRecordError> {
    let value: f64 = raw
        .trim()
        .parse()
        .map_err(|_| InvalidRecordError::NotANumber {
            field,
            value: raw.to_string(),
        })?;
    if !value.is_finite() {
        return Err(InvalidRecordError::NonFinite { field });
    }
    Ok(value)
}
