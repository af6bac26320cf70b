//! The telemetry sample record.

use serde::{Deserialize, Serialize};

/// Decimal places carried for latitude and longitude.
pub const POSITION_DECIMALS: i32 = 6;

/// Decimal places carried for altitude and rate.
pub const MEASURE_DECIMALS: i32 = 2;

/// One decoded telemetry reading.
///
/// All four fields are mandatory. A sample has no identity beyond its
/// position in the log.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TelemetrySample {
    /// Latitude in decimal degrees.
    pub latitude: f64,
    /// Longitude in decimal degrees.
    pub longitude: f64,
    /// Altitude in meters.
    pub altitude: f64,
    /// Vertical rate as reported by the producer (stored under `vel`).
    pub rate: f64,
}

impl TelemetrySample {
    pub fn new(latitude: f64, longitude: f64, altitude: f64, rate: f64) -> Self {
        Self {
            latitude,
            longitude,
            altitude,
            rate,
        }
    }

    /// Round every field to the precision the wire and storage formats carry.
    ///
    /// `decode(encode(s)) == s.quantized()` for every finite sample.
    pub fn quantized(&self) -> Self {
        Self {
            latitude: round_to(self.latitude, POSITION_DECIMALS),
            longitude: round_to(self.longitude, POSITION_DECIMALS),
            altitude: round_to(self.altitude, MEASURE_DECIMALS),
            rate: round_to(self.rate, MEASURE_DECIMALS),
        }
    }

    /// Whether every field is a finite number.
    pub fn is_finite(&self) -> bool {
        self.latitude.is_finite()
            && self.longitude.is_finite()
            && self.altitude.is_finite()
            && self.rate.is_finite()
    }
}

/// Round through the same decimal text the codec emits.
fn round_to(value: f64, decimals: i32) -> f64 {
    let text = format!("{:.*}", decimals as usize, value);
    text.parse().unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quantized_rounds_per_field_precision() {
        let s = TelemetrySample::new(-23.5505204, -46.6333086, 1.234, 3.456);
        let q = s.quantized();
        assert_eq!(q.latitude, -23.550520);
        assert_eq!(q.longitude, -46.633309);
        assert_eq!(q.altitude, 1.23);
        assert_eq!(q.rate, 3.46);
    }

    #[test]
    fn quantized_is_idempotent() {
        let s = TelemetrySample::new(10.1234567, 20.7654321, 99.999, -0.005);
        assert_eq!(s.quantized(), s.quantized().quantized());
    }

    #[test]
    fn is_finite_rejects_nan_and_inf() {
        assert!(TelemetrySample::new(0.0, 0.0, 0.0, 0.0).is_finite());
        assert!(!TelemetrySample::new(f64::NAN, 0.0, 0.0, 0.0).is_finite());
        assert!(!TelemetrySample::new(0.0, 0.0, f64::INFINITY, 0.0).is_finite());
    }

    #[test]
    fn sample_serializes_with_field_names() {
        let s = TelemetrySample::new(1.0, 2.0, 3.0, 4.0);
        let json = serde_json::to_string(&s).unwrap();
        assert_eq!(
            json,
            r#"{"latitude":1.0,"longitude":2.0,"altitude":3.0,"rate":4.0}"#
        );
    }
}
