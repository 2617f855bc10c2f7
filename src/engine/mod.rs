/// Prediction engine: one spectrum in, one Pol estimate and its flags out.
///
/// ```text
///   SpectrumSource ──► Preprocessor ──► RegressionModel ──► QualityEvaluator
///   (sim / replay)     (SG + SNV)        (w·x + b)           (anomaly, alert)
/// ```
pub mod preprocess;
pub mod quality;
pub mod regression;
pub mod source;

use std::time::{Duration, Instant};

use log::{debug, warn};

use crate::data::calibration::CalibrationModel;
use quality::{QualityEvaluator, QualityFlags};

/// Result of running one raw spectrum through the model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Inference {
    /// NaN when the spectrum could not be preprocessed.
    pub predicted_pol: f64,
    pub flags: QualityFlags,
    /// Wall time of preprocessing plus regression.
    pub inference_ms: f64,
}

/// Preprocess, predict and evaluate one spectrum.
///
/// Nothing here fails: a flat or malformed spectrum, or a computation that
/// overruns `budget`, comes back as an anomaly.
pub fn infer(
    model: &CalibrationModel,
    evaluator: &QualityEvaluator,
    raw: &[f64],
    threshold: f64,
    budget: Duration,
) -> Inference {
    let started = Instant::now();

    let predicted = if raw.len() != model.len() {
        warn!(
            "spectrum has {} channels, calibration expects {}",
            raw.len(),
            model.len()
        );
        None
    } else {
        match model.preprocessor().apply(raw) {
            Ok(features) => match model.regression().predict(&features) {
                Ok(pol) => Some(pol),
                Err(e) => {
                    warn!("regression failed: {e}");
                    None
                }
            },
            Err(degenerate) => {
                debug!("{degenerate}");
                None
            }
        }
    };

    let elapsed = started.elapsed();
    let overran = elapsed > budget;
    if overran {
        warn!(
            "inference took {:.1} ms, budget is {} ms; flagging tick as anomalous",
            elapsed.as_secs_f64() * 1e3,
            budget.as_millis()
        );
    }

    let predicted_pol = predicted.unwrap_or(f64::NAN);
    let failed = predicted.is_none() || overran;

    Inference {
        predicted_pol,
        flags: evaluator.evaluate(raw, failed, predicted_pol, threshold),
        inference_ms: elapsed.as_secs_f64() * 1e3,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::calibration::CalibrationArtifact;

    fn model() -> CalibrationModel {
        CalibrationModel::from_artifact(CalibrationArtifact::synthetic(14.5).unwrap()).unwrap()
    }

    const BUDGET: Duration = Duration::from_secs(5);

    #[test]
    fn reference_spectrum_predicts_reference_pol() {
        let model = model();
        let out = infer(&model, &QualityEvaluator::default(), model.reference_spectrum(), 13.0, BUDGET);
        assert!((out.predicted_pol - 14.5).abs() < 1e-9);
        assert_eq!(out.flags, QualityFlags { anomaly: false, alert: false });
        assert!(out.inference_ms >= 0.0);
    }

    #[test]
    fn huge_readings_predict_like_the_reference() {
        let model = model();
        let scale = 2f64.powi(600);
        let huge: Vec<f64> = model.reference_spectrum().iter().map(|v| v * scale).collect();
        let out = infer(&model, &QualityEvaluator::default(), &huge, 13.0, BUDGET);
        assert!((out.predicted_pol - 14.5).abs() < 1e-6, "{}", out.predicted_pol);
        assert_eq!(out.flags, QualityFlags { anomaly: false, alert: false });
    }

    #[test]
    fn threshold_above_prediction_alerts() {
        let model = model();
        let out = infer(&model, &QualityEvaluator::default(), model.reference_spectrum(), 20.0, BUDGET);
        assert_eq!(out.flags, QualityFlags { anomaly: false, alert: true });
    }

    #[test]
    fn flat_spectrum_is_anomalous_without_alert() {
        let model = model();
        let flat = vec![0.5; model.len()];
        let out = infer(&model, &QualityEvaluator::default(), &flat, 20.0, BUDGET);
        assert!(out.predicted_pol.is_nan());
        assert_eq!(out.flags, QualityFlags { anomaly: true, alert: false });
    }

    #[test]
    fn wrong_length_and_empty_spectra_are_anomalous() {
        let model = model();
        for raw in [vec![], vec![0.3, 0.4, 0.5]] {
            let out = infer(&model, &QualityEvaluator::default(), &raw, 20.0, BUDGET);
            assert!(out.flags.anomaly);
            assert!(!out.flags.alert);
        }
    }

    #[test]
    fn budget_overrun_is_reported_as_anomaly() {
        let model = model();
        let out = infer(
            &model,
            &QualityEvaluator::default(),
            model.reference_spectrum(),
            20.0,
            Duration::ZERO,
        );
        assert!(out.flags.anomaly);
        assert!(!out.flags.alert);
    }
}
