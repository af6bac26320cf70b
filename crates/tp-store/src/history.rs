//! Consumer-side accumulated view of a store.

use crate::reader::PollBatch;
use tp_common::TelemetrySample;

/// Samples a consumer has seen since the last store reset.
#[derive(Debug, Clone, Default)]
pub struct SampleHistory {
    samples: Vec<TelemetrySample>,
    resets: u64,
}

impl SampleHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold a poll result into the view. A reset clears everything seen so far.
    ///
    /// Returns the number of samples added.
    pub fn apply(&mut self, batch: &PollBatch) -> usize {
        if batch.reset {
            self.samples.clear();
            self.resets += 1;
        }
        self.samples.extend_from_slice(&batch.samples);
        batch.samples.len()
    }

    pub fn samples(&self) -> &[TelemetrySample] {
        &self.samples
    }

    pub fn latest(&self) -> Option<&TelemetrySample> {
        self.samples.last()
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of resets observed.
    pub fn resets(&self) -> u64 {
        self.resets
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn batch(values: &[f64], reset: bool) -> PollBatch {
        PollBatch {
            samples: values
                .iter()
                .map(|&v| TelemetrySample::new(v, v, v, v))
                .collect(),
            reset,
            skipped: 0,
        }
    }

    #[test]
    fn apply_accumulates_in_order() {
        let mut history = SampleHistory::new();
        assert_eq!(history.apply(&batch(&[1.0, 2.0], false)), 2);
        assert_eq!(history.apply(&batch(&[3.0], false)), 1);

        let lats: Vec<f64> = history.samples().iter().map(|s| s.latitude).collect();
        assert_eq!(lats, vec![1.0, 2.0, 3.0]);
        assert_eq!(history.latest().map(|s| s.latitude), Some(3.0));
    }

    #[test]
    fn reset_clears_previous_view() {
        let mut history = SampleHistory::new();
        history.apply(&batch(&[1.0, 2.0, 3.0], false));
        history.apply(&batch(&[9.0], true));

        assert_eq!(history.len(), 1);
        assert_eq!(history.resets(), 1);
        assert_eq!(history.latest().map(|s| s.latitude), Some(9.0));
    }
}
