use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// The final linear form of a PLS calibration: latent components are
/// already folded into one weight per wavelength.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionModel {
    pub coefficients: Vec<f64>,
    pub intercept: f64,
}

impl RegressionModel {
    pub fn len(&self) -> usize {
        self.coefficients.len()
    }

    pub fn is_empty(&self) -> bool {
        self.coefficients.is_empty()
    }

    /// `intercept + Σ features[i] * coefficients[i]`
    pub fn predict(&self, features: &[f64]) -> Result<f64, ConfigurationError> {
        predict(features, &self.coefficients, self.intercept)
    }
}

/// Accumulates in index order so equal inputs give bit-identical output.
pub fn predict(features: &[f64], coefficients: &[f64], intercept: f64) -> Result<f64, ConfigurationError> {
    if features.len() != coefficients.len() {
        return Err(ConfigurationError::DimensionMismatch {
            what: "feature vector",
            expected: coefficients.len(),
            found: features.len(),
        });
    }
    Ok(features
        .iter()
        .zip(coefficients)
        .fold(intercept, |acc, (x, w)| acc + x * w))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dot_product_plus_intercept() {
        let model = RegressionModel {
            coefficients: vec![0.5, -1.0, 2.0],
            intercept: 10.0,
        };
        let got = model.predict(&[2.0, 1.0, 0.25]).unwrap();
        assert_eq!(got, 10.0 + 1.0 - 1.0 + 0.5);
    }

    #[test]
    fn repeated_calls_are_bit_identical() {
        let coefficients: Vec<f64> = (0..331).map(|i| ((i as f64) * 0.37).sin() * 0.01).collect();
        let features: Vec<f64> = (0..331).map(|i| ((i as f64) * 0.11).cos()).collect();
        let first = predict(&features, &coefficients, 14.5).unwrap();
        for _ in 0..10 {
            assert_eq!(
                predict(&features, &coefficients, 14.5).unwrap().to_bits(),
                first.to_bits()
            );
        }
    }

    #[test]
    fn dimension_mismatch_is_rejected() {
        let err = predict(&[1.0, 2.0], &[1.0, 2.0, 3.0], 0.0).unwrap_err();
        assert!(matches!(
            err,
            ConfigurationError::DimensionMismatch {
                expected: 3,
                found: 2,
                ..
            }
        ));
    }
}
