use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ConfigurationError;

/// Absorbance readings, index-aligned with a [`WavelengthGrid`].
pub type Spectrum = Vec<f64>;

// ---------------------------------------------------------------------------
// WavelengthGrid – the fixed x axis of every spectrum
// ---------------------------------------------------------------------------

/// Strictly increasing wavelengths in nm. Length defines N for every
/// spectrum handled by one calibration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct WavelengthGrid(Vec<f64>);

impl WavelengthGrid {
    pub fn new(values: Vec<f64>) -> Result<Self, ConfigurationError> {
        if values.is_empty() {
            return Err(ConfigurationError::EmptyGrid);
        }
        if !all_finite(&values) {
            return Err(ConfigurationError::NonFinite {
                what: "wavelength grid",
            });
        }
        if let Some(index) = values.windows(2).position(|w| w[1] <= w[0]) {
            return Err(ConfigurationError::NonIncreasingGrid { index: index + 1 });
        }
        Ok(Self(values))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    /// Same points, compared with a tolerance small enough for nm values
    /// that went through a text round trip.
    pub fn matches(&self, other: &[f64]) -> bool {
        self.0.len() == other.len()
            && self
                .0
                .iter()
                .zip(other)
                .all(|(a, b)| (a - b).abs() <= 1e-6 * a.abs().max(1.0))
    }
}

impl TryFrom<Vec<f64>> for WavelengthGrid {
    type Error = ConfigurationError;

    fn try_from(values: Vec<f64>) -> Result<Self, Self::Error> {
        Self::new(values)
    }
}

impl From<WavelengthGrid> for Vec<f64> {
    fn from(grid: WavelengthGrid) -> Self {
        grid.0
    }
}

// ---------------------------------------------------------------------------
// Spectrum statistics
// ---------------------------------------------------------------------------

pub fn all_finite(values: &[f64]) -> bool {
    values.iter().all(|v| v.is_finite())
}

/// max − min; NaN if any value is NaN, 0 for an empty slice.
pub fn peak_to_peak(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    if values.iter().any(|v| v.is_nan()) {
        return f64::NAN;
    }
    let (lo, hi) = values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    hi - lo
}

/// Mean and population standard deviation (two-pass).
///
/// Values are divided by their largest magnitude first, so the squares of
/// large but finite readings cannot overflow.
pub fn mean_and_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let peak = values.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    let scale = if peak > 0.0 && peak.is_finite() { peak } else { 1.0 };

    let n = values.len() as f64;
    let mean = values.iter().map(|v| v / scale).sum::<f64>() / n;
    let var = values
        .iter()
        .map(|v| (v / scale - mean).powi(2))
        .sum::<f64>()
        / n;
    (mean * scale, var.sqrt() * scale)
}

// ---------------------------------------------------------------------------
// MetadataValue – a non-spectral column of a replay sample
// ---------------------------------------------------------------------------

/// A dynamically-typed metadata value, as read from the dataset file.
#[derive(Debug, Clone, PartialEq)]
pub enum MetadataValue {
    String(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Null,
}

impl MetadataValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            MetadataValue::Float(v) => Some(*v),
            MetadataValue::Integer(i) => Some(*i as f64),
            MetadataValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// LabeledSpectrum – one scanned sample with its lab reference value
// ---------------------------------------------------------------------------

/// One sample as read from disk, before it is checked against a grid.
#[derive(Debug, Clone)]
pub struct RawSample {
    pub wavelengths: Vec<f64>,
    pub absorbance: Spectrum,
    /// Lab-measured Pol, when the file carries one.
    pub pol: Option<f64>,
    pub metadata: BTreeMap<String, MetadataValue>,
}

#[derive(Debug, Clone)]
pub struct LabeledSpectrum {
    pub absorbance: Spectrum,
    pub pol: Option<f64>,
    pub metadata: BTreeMap<String, MetadataValue>,
}

// ---------------------------------------------------------------------------
// ReplayDataset – held-out spectra streamed back in order
// ---------------------------------------------------------------------------

/// Samples sharing one wavelength grid.
#[derive(Debug, Clone)]
pub struct ReplayDataset {
    pub wavelengths: WavelengthGrid,
    pub samples: Vec<LabeledSpectrum>,
}

impl ReplayDataset {
    /// Check every sample sits on the first sample's grid.
    pub fn from_samples(raw: Vec<RawSample>) -> Result<Self, ConfigurationError> {
        let first = raw.first().ok_or(ConfigurationError::EmptyGrid)?;
        let wavelengths = WavelengthGrid::new(first.wavelengths.clone())?;

        let mut samples = Vec::with_capacity(raw.len());
        for (row, sample) in raw.into_iter().enumerate() {
            if sample.absorbance.len() != wavelengths.len() {
                return Err(ConfigurationError::DimensionMismatch {
                    what: "replay sample absorbance",
                    expected: wavelengths.len(),
                    found: sample.absorbance.len(),
                });
            }
            if !wavelengths.matches(&sample.wavelengths) {
                return Err(ConfigurationError::GridMismatch {
                    what: format!("replay sample {row}"),
                });
            }
            samples.push(LabeledSpectrum {
                absorbance: sample.absorbance,
                pol: sample.pol,
                metadata: sample.metadata,
            });
        }

        Ok(ReplayDataset {
            wavelengths,
            samples,
        })
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}
