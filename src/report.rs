use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::session::DEFAULT_THRESHOLD;

/// History accumulated by a client from the records it received.
/// `null` entries stand for ticks whose prediction was not computable.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ShiftHistory {
    #[serde(default)]
    pub timestamp: Vec<i64>,
    #[serde(default)]
    pub actual_pol: Vec<Option<f64>>,
    pub predicted_pol: Vec<Option<f64>>,
    #[serde(default)]
    pub threshold: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ShiftSummary {
    pub total_samples: usize,
    /// Mean over the computable predictions, 0 when there are none.
    pub average_predicted_pol: f64,
    pub low_pol_alerts: usize,
    pub threshold: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rmsep: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bias: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_timestamp: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_timestamp: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ReportError {
    #[error("{field} has {found} entries but predicted_pol has {expected}")]
    LengthMismatch {
        field: &'static str,
        expected: usize,
        found: usize,
    },
    #[error("threshold must be finite, got {0}")]
    InvalidThreshold(f64),
}

impl ShiftHistory {
    pub fn summarize(&self) -> Result<ShiftSummary, ReportError> {
        let n = self.predicted_pol.len();
        if !self.timestamp.is_empty() && self.timestamp.len() != n {
            return Err(ReportError::LengthMismatch {
                field: "timestamp",
                expected: n,
                found: self.timestamp.len(),
            });
        }

        let threshold = self.threshold.unwrap_or(DEFAULT_THRESHOLD);
        if !threshold.is_finite() {
            return Err(ReportError::InvalidThreshold(threshold));
        }

        let predicted: Vec<f64> = self
            .predicted_pol
            .iter()
            .flatten()
            .copied()
            .filter(|p| p.is_finite())
            .collect();
        let average_predicted_pol = if predicted.is_empty() {
            0.0
        } else {
            predicted.iter().sum::<f64>() / predicted.len() as f64
        };
        let low_pol_alerts = predicted.iter().filter(|&&p| p < threshold).count();

        let (rmsep, bias) = if n > 0 && self.actual_pol.len() == n {
            residual_stats(&self.predicted_pol, &self.actual_pol)
        } else {
            (None, None)
        };

        Ok(ShiftSummary {
            total_samples: n,
            average_predicted_pol,
            low_pol_alerts,
            threshold,
            rmsep,
            bias,
            first_timestamp: self.timestamp.first().copied(),
            last_timestamp: self.timestamp.last().copied(),
        })
    }
}

/// RMSEP and mean (predicted − actual) over the pairs where both are known.
fn residual_stats(predicted: &[Option<f64>], actual: &[Option<f64>]) -> (Option<f64>, Option<f64>) {
    let residuals: Vec<f64> = predicted
        .iter()
        .zip(actual)
        .filter_map(|pair| match pair {
            (Some(p), Some(a)) if p.is_finite() && a.is_finite() => Some(p - a),
            _ => None,
        })
        .collect();
    if residuals.is_empty() {
        return (None, None);
    }
    let n = residuals.len() as f64;
    let bias = residuals.iter().sum::<f64>() / n;
    let rmsep = (residuals.iter().map(|r| r * r).sum::<f64>() / n).sqrt();
    (Some(rmsep), Some(bias))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history(json: &str) -> ShiftHistory {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn summary_counts_alerts_below_default_threshold() {
        let s = history(
            r#"{"timestamp": [1000, 2000, 3000, 4000],
                "actual_pol": [14.0, 13.0, 12.0, 15.0],
                "predicted_pol": [14.5, 12.5, 12.0, 15.0]}"#,
        )
        .summarize()
        .unwrap();

        assert_eq!(s.total_samples, 4);
        assert!((s.average_predicted_pol - 13.5).abs() < 1e-12);
        assert_eq!(s.low_pol_alerts, 2);
        assert_eq!(s.threshold, 13.0);
        assert!((s.bias.unwrap() - 0.0).abs() < 1e-12);
        // residuals 0.5, -0.5, 0, 0
        assert!((s.rmsep.unwrap() - 0.125f64.sqrt()).abs() < 1e-12);
        assert_eq!(s.first_timestamp, Some(1000));
        assert_eq!(s.last_timestamp, Some(4000));
    }

    #[test]
    fn null_predictions_are_skipped() {
        let s = history(r#"{"predicted_pol": [null, 12.0, 14.0], "threshold": 12.5}"#)
            .summarize()
            .unwrap();
        assert_eq!(s.total_samples, 3);
        assert!((s.average_predicted_pol - 13.0).abs() < 1e-12);
        assert_eq!(s.low_pol_alerts, 1);
        assert_eq!(s.rmsep, None);

        let json = serde_json::to_value(&s).unwrap();
        assert!(json.get("rmsep").is_none());
        assert!(json.get("first_timestamp").is_none());
    }

    #[test]
    fn empty_history_averages_to_zero() {
        let s = history(r#"{"predicted_pol": []}"#).summarize().unwrap();
        assert_eq!(s.total_samples, 0);
        assert_eq!(s.average_predicted_pol, 0.0);
        assert_eq!(s.low_pol_alerts, 0);
    }

    #[test]
    fn mismatched_timestamps_are_rejected() {
        let err = history(r#"{"timestamp": [1, 2], "predicted_pol": [14.0]}"#)
            .summarize()
            .unwrap_err();
        assert_eq!(
            err,
            ReportError::LengthMismatch {
                field: "timestamp",
                expected: 1,
                found: 2
            }
        );
    }

    #[test]
    fn short_actual_pol_skips_error_statistics() {
        let s = history(r#"{"actual_pol": [14.0], "predicted_pol": [14.0, 13.0]}"#)
            .summarize()
            .unwrap();
        assert_eq!(s.rmsep, None);
        assert_eq!(s.bias, None);
    }
}
