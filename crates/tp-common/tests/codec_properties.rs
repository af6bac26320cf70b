//! Property-based tests for the record codec.

use proptest::prelude::*;
use tp_common::{classify, decode, decode_line, encode, encode_line, is_sentinel, WirePayload};
use tp_common::{InvalidRecordError, TelemetrySample};

fn sample_strategy() -> impl Strategy<Value = TelemetrySample> {
    (
        -90.0..90.0f64,
        -180.0..180.0f64,
        -500.0..50_000.0f64,
        -400.0..400.0f64,
    )
        .prop_map(|(lat, lon, alt, rate)| TelemetrySample::new(lat, lon, alt, rate))
}

// ============================================================================
// Encode/decode agreement
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Decoding an encoded payload yields the sample at wire precision.
    #[test]
    fn decode_of_encode_is_quantized(sample in sample_strategy()) {
        let decoded = decode(&encode(&sample)).unwrap();
        prop_assert_eq!(decoded, sample.quantized());
    }

    /// Storage lines and wire payloads carry the same record.
    #[test]
    fn line_and_payload_agree(sample in sample_strategy()) {
        let line = encode_line(&sample);
        prop_assert!(line.ends_with('\n'));
        let payload = encode(&sample);
        prop_assert_eq!(line.trim_end().as_bytes(), payload.as_slice());
        prop_assert_eq!(decode_line(&line).unwrap(), decode(&encode(&sample)).unwrap());
    }

    /// Encoded records never contain a line terminator and have exactly four fields.
    #[test]
    fn encoded_payload_is_single_line(sample in sample_strategy()) {
        let payload = String::from_utf8(encode(&sample)).unwrap();
        prop_assert!(!payload.contains('\n'));
        prop_assert_eq!(payload.split(',').count(), 4);
    }

    /// A valid sample is never mistaken for the sentinel.
    #[test]
    fn samples_are_never_sentinels(sample in sample_strategy()) {
        let payload = encode(&sample);
        prop_assert!(!is_sentinel(&payload));
        prop_assert_eq!(classify(&payload).unwrap(), WirePayload::Sample(sample.quantized()));
    }
}

// ============================================================================
// Robustness against arbitrary input
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// Arbitrary bytes either decode to a finite sample or yield an error.
    #[test]
    fn arbitrary_bytes_never_panic(bytes in proptest::collection::vec(any::<u8>(), 0..64)) {
        if let Ok(sample) = decode(&bytes) {
            prop_assert!(sample.is_finite());
        }
    }

    /// Fewer or more than four comma-separated fields are rejected.
    #[test]
    fn wrong_field_counts_rejected(fields in proptest::collection::vec(-1000.0..1000.0f64, 1..9)) {
        prop_assume!(fields.len() != 4);
        let text = fields
            .iter()
            .map(|v| format!("{:.3}", v))
            .collect::<Vec<_>>()
            .join(",");
        prop_assert_eq!(
            decode(text.as_bytes()),
            Err(InvalidRecordError::FieldCount { found: fields.len() })
        );
    }

    /// Surrounding whitespace around the sentinel is tolerated.
    #[test]
    fn padded_sentinel_detected(left in "[ \t\r\n]{0,3}", right in "[ \t\r\n]{0,3}") {
        let payload = format!("{}END{}", left, right);
        prop_assert!(is_sentinel(payload.as_bytes()));
        prop_assert_eq!(classify(payload.as_bytes()), Ok(WirePayload::EndOfStream));
    }
}
