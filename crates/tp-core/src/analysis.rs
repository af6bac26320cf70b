//! Flight summary over stored samples.

use serde::Serialize;
use std::time::Duration;
use tp_common::TelemetrySample;

/// Mean Earth radius in metres (IUGG).
pub const EARTH_RADIUS_M: f64 = 6_371_008.8;

/// Assumed spacing between consecutive samples.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(100);

/// Minimum, maximum and mean of one field.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FieldStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl FieldStats {
    fn from_values(values: impl Iterator<Item = f64>) -> Option<Self> {
        let mut count = 0usize;
        let mut sum = 0.0;
        let mut min = f64::INFINITY;
        let mut max = f64::NEG_INFINITY;
        for v in values {
            count += 1;
            sum += v;
            min = min.min(v);
            max = max.max(v);
        }
        (count > 0).then(|| FieldStats {
            min,
            max,
            mean: sum / count as f64,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FlightSummary {
    pub samples: usize,
    pub altitude: FieldStats,
    pub rate: FieldStats,
    pub latitude: FieldStats,
    pub longitude: FieldStats,
    /// Largest rate change per second between consecutive samples; absent
    /// with fewer than two samples.
    pub max_acceleration: Option<f64>,
    pub duration_secs: f64,
    /// Offset of the first sample with the highest rate.
    pub peak_rate_at_secs: f64,
    /// Great-circle distance between the first and last position.
    pub horizontal_distance_m: f64,
}

/// Summarize a flight. `None` when there are no samples.
pub fn summarize(samples: &[TelemetrySample], interval: Duration) -> Option<FlightSummary> {
    let first = samples.first()?;
    let last = samples.last()?;
    let dt = interval.as_secs_f64();

    let altitude = FieldStats::from_values(samples.iter().map(|s| s.altitude))?;
    let rate = FieldStats::from_values(samples.iter().map(|s| s.rate))?;
    let latitude = FieldStats::from_values(samples.iter().map(|s| s.latitude))?;
    let longitude = FieldStats::from_values(samples.iter().map(|s| s.longitude))?;

    let max_acceleration = if dt > 0.0 {
        samples
            .windows(2)
            .map(|w| (w[1].rate - w[0].rate) / dt)
            .reduce(f64::max)
    } else {
        None
    };

    let peak_index = samples
        .iter()
        .enumerate()
        .fold((0usize, f64::NEG_INFINITY), |(best_i, best), (i, s)| {
            if s.rate > best {
                (i, s.rate)
            } else {
                (best_i, best)
            }
        })
        .0;

    Some(FlightSummary {
        samples: samples.len(),
        altitude,
        rate,
        latitude,
        longitude,
        max_acceleration,
        duration_secs: samples.len() as f64 * dt,
        peak_rate_at_secs: peak_index as f64 * dt,
        horizontal_distance_m: haversine_m(
            first.latitude,
            first.longitude,
            last.latitude,
            last.longitude,
        ),
    })
}

/// Haversine distance in metres between two positions given in degrees.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let (phi1, phi2) = (lat1.to_radians(), lat2.to_radians());
    let dphi = (lat2 - lat1).to_radians();
    let dlambda = (lon2 - lon1).to_radians();
    let a = (dphi / 2.0).sin().powi(2) + phi1.cos() * phi2.cos() * (dlambda / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().min(1.0).asin()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(lat: f64, lon: f64, alt: f64, rate: f64) -> TelemetrySample {
        TelemetrySample::new(lat, lon, alt, rate)
    }

    #[test]
    fn empty_input_has_no_summary() {
        assert!(summarize(&[], DEFAULT_SAMPLE_INTERVAL).is_none());
    }

    #[test]
    fn single_sample_has_no_acceleration() {
        let summary = summarize(&[sample(1.0, 2.0, 3.0, 4.0)], DEFAULT_SAMPLE_INTERVAL).unwrap();
        assert_eq!(summary.samples, 1);
        assert_eq!(summary.max_acceleration, None);
        assert_eq!(summary.horizontal_distance_m, 0.0);
        assert!((summary.duration_secs - 0.1).abs() < 1e-12);
    }

    #[test]
    fn stats_and_peak() {
        let samples = [
            sample(-23.55, -46.63, 0.0, 0.0),
            sample(-23.55, -46.63, 10.0, 5.0),
            sample(-23.55, -46.63, 30.0, 20.0),
            sample(-23.55, -46.63, 20.0, 10.0),
        ];
        let summary = summarize(&samples, DEFAULT_SAMPLE_INTERVAL).unwrap();
        assert_eq!(summary.altitude.max, 30.0);
        assert_eq!(summary.altitude.min, 0.0);
        assert_eq!(summary.altitude.mean, 15.0);
        assert_eq!(summary.rate.max, 20.0);
        assert!((summary.max_acceleration.unwrap() - 150.0).abs() < 1e-9);
        assert!((summary.peak_rate_at_secs - 0.2).abs() < 1e-12);
        assert!((summary.duration_secs - 0.4).abs() < 1e-12);
    }

    #[test]
    fn first_peak_wins_ties() {
        let samples = [
            sample(0.0, 0.0, 0.0, 7.0),
            sample(0.0, 0.0, 0.0, 7.0),
        ];
        let summary = summarize(&samples, Duration::from_secs(1)).unwrap();
        assert_eq!(summary.peak_rate_at_secs, 0.0);
        assert_eq!(summary.max_acceleration, Some(0.0));
    }

    #[test]
    fn haversine_one_degree_of_latitude() {
        let d = haversine_m(0.0, 0.0, 1.0, 0.0);
        assert!((d - 111_195.08).abs() < 1.0, "got {}", d);
    }

    #[test]
    fn haversine_is_symmetric() {
        let a = haversine_m(-23.550520, -46.633308, -23.560000, -46.640000);
        let b = haversine_m(-23.560000, -46.640000, -23.550520, -46.633308);
        assert!((a - b).abs() < 1e-6);
        assert!(a > 1000.0 && a < 1500.0);
    }
}
