use crate::data::model::{all_finite, peak_to_peak};

/// Raw peak-to-peak absorbance below which the optics are assumed dead
/// (lamp off, blocked window, saturated detector).
pub const MIN_VIABLE_RANGE: f64 = 1e-4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityFlags {
    pub anomaly: bool,
    pub alert: bool,
}

/// Derives the anomaly and low-Pol alert flags for one tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityEvaluator {
    pub min_viable_range: f64,
}

impl Default for QualityEvaluator {
    fn default() -> Self {
        Self {
            min_viable_range: MIN_VIABLE_RANGE,
        }
    }
}

impl QualityEvaluator {
    /// An alert is only raised on a trustworthy prediction: any anomaly
    /// suppresses it, whatever `predicted` says.
    pub fn evaluate(
        &self,
        raw: &[f64],
        preprocessing_failed: bool,
        predicted: f64,
        threshold: f64,
    ) -> QualityFlags {
        let anomaly = preprocessing_failed
            || !all_finite(raw)
            || !(peak_to_peak(raw) >= self.min_viable_range);
        let alert = !anomaly && predicted < threshold;
        QualityFlags { anomaly, alert }
    }
}
