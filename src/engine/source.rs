use std::sync::Arc;

use rand::Rng;
use rand_distr::StandardNormal;

use crate::data::calibration::CalibrationModel;
use crate::data::model::{peak_to_peak, ReplayDataset, Spectrum};
use crate::error::ConfigurationError;

/// One acquired spectrum, plus the lab Pol when the source knows it.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceReading {
    pub spectrum: Spectrum,
    pub actual_pol: Option<f64>,
}

/// Where a session gets its spectra from. A live sensor driver plugs in
/// here; it reports `actual_pol: None`.
pub trait SpectrumSource: Send {
    fn next_reading(&mut self, noise_level: f64) -> SourceReading;

    fn name(&self) -> &'static str;
}

// ---------------------------------------------------------------------------
// Noise model
// ---------------------------------------------------------------------------

/// Standard deviation of the injected noise: `noise_level` percent of the
/// reference's peak-to-peak range.
pub fn noise_sigma(reference: &[f64], noise_level: f64) -> f64 {
    noise_level / 100.0 * peak_to_peak(reference)
}

/// Adds independent zero-mean Gaussian noise to every channel.
/// With zero noise the reference comes back unchanged and `rng` is untouched.
pub fn generate<R: Rng>(reference: &[f64], noise_level: f64, rng: &mut R) -> Spectrum {
    let sigma = noise_sigma(reference, noise_level);
    if !(sigma > 0.0) || !sigma.is_finite() {
        return reference.to_vec();
    }
    reference
        .iter()
        .map(|v| {
            let z: f64 = rng.sample(StandardNormal);
            v + sigma * z
        })
        .collect()
}

// ---------------------------------------------------------------------------
// SimulatedSource – calibration reference plus noise
// ---------------------------------------------------------------------------

pub struct SimulatedSource<R> {
    model: Arc<CalibrationModel>,
    rng: R,
}

impl<R: Rng + Send> SimulatedSource<R> {
    pub fn new(model: Arc<CalibrationModel>, rng: R) -> Self {
        Self { model, rng }
    }
}

impl<R: Rng + Send> SpectrumSource for SimulatedSource<R> {
    fn next_reading(&mut self, noise_level: f64) -> SourceReading {
        SourceReading {
            spectrum: generate(self.model.reference_spectrum(), noise_level, &mut self.rng),
            actual_pol: Some(self.model.reference_pol()),
        }
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

// ---------------------------------------------------------------------------
// ReplaySource – held-out lab samples, cycled in order
// ---------------------------------------------------------------------------

pub struct ReplaySource<R> {
    dataset: Arc<ReplayDataset>,
    cursor: usize,
    rng: R,
}

impl<R: Rng + Send> ReplaySource<R> {
    /// Fails unless the dataset is non-empty and sits on the calibration grid.
    pub fn new(
        model: &CalibrationModel,
        dataset: Arc<ReplayDataset>,
        rng: R,
    ) -> Result<Self, ConfigurationError> {
        check_replay_dataset(model, &dataset)?;
        Ok(Self {
            dataset,
            cursor: 0,
            rng,
        })
    }
}

pub fn check_replay_dataset(model: &CalibrationModel, dataset: &ReplayDataset) -> Result<(), ConfigurationError> {
    if dataset.is_empty() {
        return Err(ConfigurationError::DimensionMismatch {
            what: "replay dataset samples",
            expected: 1,
            found: 0,
        });
    }
    if !model.wavelengths().matches(dataset.wavelengths.as_slice()) {
        return Err(ConfigurationError::GridMismatch {
            what: "replay dataset".to_string(),
        });
    }
    Ok(())
}

impl<R: Rng + Send> SpectrumSource for ReplaySource<R> {
    fn next_reading(&mut self, noise_level: f64) -> SourceReading {
        let sample = &self.dataset.samples[self.cursor];
        self.cursor = (self.cursor + 1) % self.dataset.len();
        SourceReading {
            spectrum: generate(&sample.absorbance, noise_level, &mut self.rng),
            actual_pol: sample.pol,
        }
    }

    fn name(&self) -> &'static str {
        "replay"
    }
}
