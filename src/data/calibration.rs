use std::path::Path;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::model::{all_finite, peak_to_peak, Spectrum, WavelengthGrid};
use crate::engine::preprocess::{PreprocessingParams, Preprocessor};
use crate::engine::quality::MIN_VIABLE_RANGE;
use crate::engine::regression::RegressionModel;
use crate::error::ConfigurationError;

/// Version written by this build and the only one it reads.
pub const SCHEMA_VERSION: u32 = 1;

// ---------------------------------------------------------------------------
// CalibrationArtifact – the persisted, versioned form
// ---------------------------------------------------------------------------

/// On-disk calibration, as produced by the offline training process.
///
/// ```json
/// {
///   "schema_version": 1,
///   "wavelengths": [740.0, 741.0, ...],
///   "reference_spectrum": [0.31, 0.31, ...],
///   "reference_pol": 14.5,
///   "preprocessing": { "window": 15, "order": 2, "derivative": 1 },
///   "regression": { "coefficients": [...], "intercept": 13.9 }
/// }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CalibrationArtifact {
    pub schema_version: u32,
    pub wavelengths: Vec<f64>,
    pub reference_spectrum: Spectrum,
    pub reference_pol: f64,
    pub preprocessing: PreprocessingParams,
    pub regression: RegressionModel,
}

#[derive(Deserialize)]
struct SchemaHeader {
    schema_version: u32,
}

impl CalibrationArtifact {
    pub fn from_json(text: &str) -> Result<Self, ConfigurationError> {
        // Check the version before the layout so an unknown schema is
        // reported as such rather than as a missing field.
        let header: SchemaHeader = serde_json::from_str(text)?;
        if header.schema_version != SCHEMA_VERSION {
            return Err(ConfigurationError::UnsupportedSchema {
                found: header.schema_version,
                supported: SCHEMA_VERSION,
            });
        }
        Ok(serde_json::from_str(text)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    pub fn save(&self, path: &Path) -> Result<(), ConfigurationError> {
        let text = serde_json::to_string_pretty(self)?;
        std::fs::write(path, text)?;
        Ok(())
    }

    /// A self-consistent demo calibration on a 740–1070 nm scanner grid.
    ///
    /// The regression weights point along the direction a sucrose band
    /// change moves the preprocessed spectrum, scaled so that one Pol unit
    /// of band change predicts one Pol unit, and the intercept puts the
    /// reference spectrum exactly on `reference_pol`.
    pub fn synthetic(reference_pol: f64) -> Result<Self, ConfigurationError> {
        let wavelengths: Vec<f64> = (0..=330).map(|i| 740.0 + i as f64).collect();
        let preprocessing = PreprocessingParams {
            window: 15,
            order: 2,
            derivative: 1,
        };
        let preprocessor = Preprocessor::new(preprocessing)?;

        let reference_spectrum = synthetic_absorbance(&wavelengths, reference_pol);
        let step = 1.0;
        let shifted = synthetic_absorbance(&wavelengths, reference_pol + step);

        let base = preprocessor.apply(&reference_spectrum)?;
        let moved = preprocessor.apply(&shifted)?;

        let direction: Vec<f64> = moved.iter().zip(&base).map(|(m, b)| m - b).collect();
        let norm_sq: f64 = direction.iter().map(|d| d * d).sum();
        if !(norm_sq > 0.0) {
            return Err(ConfigurationError::SingularFit);
        }
        let coefficients: Vec<f64> = direction.iter().map(|d| d * step / norm_sq).collect();
        let projected: f64 = base.iter().zip(&coefficients).map(|(f, w)| f * w).sum();

        Ok(CalibrationArtifact {
            schema_version: SCHEMA_VERSION,
            wavelengths,
            reference_spectrum,
            reference_pol,
            preprocessing,
            regression: RegressionModel {
                coefficients,
                intercept: reference_pol - projected,
            },
        })
    }
}

fn gaussian(x: f64, mu: f64, sigma: f64, amplitude: f64) -> f64 {
    amplitude * (-(x - mu).powi(2) / (2.0 * sigma.powi(2))).exp()
}

/// Cane-like NIR absorbance: sloped scatter baseline, the 970 nm water
/// band, a weak 840 nm band and a sucrose C–H band near 910 nm whose
/// height follows `pol`.
pub fn synthetic_absorbance(wavelengths: &[f64], pol: f64) -> Spectrum {
    wavelengths
        .iter()
        .map(|&nm| {
            0.30 + 0.0004 * (nm - 740.0)
                + gaussian(nm, 970.0, 25.0, 0.35)
                + gaussian(nm, 840.0, 30.0, 0.05)
                + gaussian(nm, 910.0, 18.0, 0.008 * pol)
        })
        .collect()
}

// ---------------------------------------------------------------------------
// CalibrationModel – validated, immutable, shared by every session
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CalibrationModel {
    wavelengths: WavelengthGrid,
    reference: Spectrum,
    reference_pol: f64,
    preprocessor: Preprocessor,
    regression: RegressionModel,
}

impl CalibrationModel {
    pub fn from_artifact(artifact: CalibrationArtifact) -> Result<Self, ConfigurationError> {
        if artifact.schema_version != SCHEMA_VERSION {
            return Err(ConfigurationError::UnsupportedSchema {
                found: artifact.schema_version,
                supported: SCHEMA_VERSION,
            });
        }

        let wavelengths = WavelengthGrid::new(artifact.wavelengths)?;
        let n = wavelengths.len();

        check_len("reference spectrum", n, artifact.reference_spectrum.len())?;
        check_len(
            "regression coefficients",
            n,
            artifact.regression.coefficients.len(),
        )?;
        if !all_finite(&artifact.reference_spectrum) {
            return Err(ConfigurationError::NonFinite {
                what: "reference spectrum",
            });
        }
        if !all_finite(&artifact.regression.coefficients) || !artifact.regression.intercept.is_finite() {
            return Err(ConfigurationError::NonFinite {
                what: "regression coefficients",
            });
        }
        if !artifact.reference_pol.is_finite() {
            return Err(ConfigurationError::NonFinite {
                what: "reference Pol",
            });
        }

        let preprocessor = Preprocessor::new(artifact.preprocessing)?;
        if n < artifact.preprocessing.window {
            return Err(ConfigurationError::GridTooShort {
                points: n,
                window: artifact.preprocessing.window,
            });
        }
        // A flat reference would make every simulated tick an anomaly.
        preprocessor.apply(&artifact.reference_spectrum)?;
        // Same for a reference the quality check would call dead optics.
        let range = peak_to_peak(&artifact.reference_spectrum);
        if range < MIN_VIABLE_RANGE {
            return Err(ConfigurationError::WeakReference {
                range,
                minimum: MIN_VIABLE_RANGE,
            });
        }

        debug!(
            "calibration grid {:.1}..{:.1} nm",
            wavelengths.as_slice()[0],
            wavelengths.as_slice()[n - 1]
        );

        Ok(CalibrationModel {
            wavelengths,
            reference: artifact.reference_spectrum,
            reference_pol: artifact.reference_pol,
            preprocessor,
            regression: artifact.regression,
        })
    }

    pub fn load(path: &Path) -> Result<Self, ConfigurationError> {
        let model = Self::from_artifact(CalibrationArtifact::load(path)?)?;
        let params = model.preprocessor.params();
        info!(
            "loaded calibration {} (schema v{SCHEMA_VERSION}): {} wavelengths, SG window {} order {} derivative {}",
            path.display(),
            model.len(),
            params.window,
            params.order,
            params.derivative
        );
        Ok(model)
    }

    pub fn to_artifact(&self) -> CalibrationArtifact {
        CalibrationArtifact {
            schema_version: SCHEMA_VERSION,
            wavelengths: self.wavelengths.as_slice().to_vec(),
            reference_spectrum: self.reference.clone(),
            reference_pol: self.reference_pol,
            preprocessing: self.preprocessor.params(),
            regression: self.regression.clone(),
        }
    }

    /// Number of wavelengths, N.
    pub fn len(&self) -> usize {
        self.wavelengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavelengths.is_empty()
    }

    pub fn wavelengths(&self) -> &WavelengthGrid {
        &self.wavelengths
    }

    pub fn reference_spectrum(&self) -> &[f64] {
        &self.reference
    }

    pub fn reference_pol(&self) -> f64 {
        self.reference_pol
    }

    pub fn preprocessor(&self) -> &Preprocessor {
        &self.preprocessor
    }

    pub fn regression(&self) -> &RegressionModel {
        &self.regression
    }
}

fn check_len(what: &'static str, expected: usize, found: usize) -> Result<(), ConfigurationError> {
    if expected != found {
        return Err(ConfigurationError::DimensionMismatch {
            what,
            expected,
            found,
        });
    }
    Ok(())
}
