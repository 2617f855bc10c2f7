use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::data::model::{mean_and_std, Spectrum};
use crate::error::{ConfigurationError, DegenerateSignal};

/// Below this the smoothed spectrum is considered flat.
pub const MIN_SNV_STD: f64 = 1e-8;

// ---------------------------------------------------------------------------
// Parameters as persisted in the calibration artifact
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreprocessingParams {
    /// Smoothing window length, odd, at least 3.
    pub window: usize,
    /// Local polynomial degree, strictly less than `window`.
    pub order: usize,
    /// 0 smooths; k > 0 takes the k-th derivative of the local fit.
    #[serde(default)]
    pub derivative: usize,
}

impl PreprocessingParams {
    pub fn validate(&self) -> Result<(), ConfigurationError> {
        if self.window < 3 || self.window % 2 == 0 {
            return Err(ConfigurationError::InvalidWindow {
                window: self.window,
            });
        }
        if self.order >= self.window {
            return Err(ConfigurationError::OrderTooHigh {
                order: self.order,
                window: self.window,
            });
        }
        if self.derivative > self.order {
            return Err(ConfigurationError::DerivativeTooHigh {
                derivative: self.derivative,
                order: self.order,
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Savitzky–Golay filter
// ---------------------------------------------------------------------------

/// Precomputed Savitzky–Golay correlation kernel.
///
/// Ends are handled by mirror padding about the first and last sample
/// (the end sample itself is not repeated), so every channel is filtered
/// with the same kernel.
#[derive(Debug, Clone, PartialEq)]
pub struct SavitzkyGolay {
    params: PreprocessingParams,
    kernel: Vec<f64>,
}

impl SavitzkyGolay {
    pub fn new(params: PreprocessingParams) -> Result<Self, ConfigurationError> {
        params.validate()?;
        let kernel = sg_kernel(params.window, params.order, params.derivative)?;
        Ok(Self { params, kernel })
    }

    pub fn params(&self) -> PreprocessingParams {
        self.params
    }

    pub fn kernel(&self) -> &[f64] {
        &self.kernel
    }

    /// Filter `raw`. The caller guarantees `raw.len() >= window`.
    pub fn apply(&self, raw: &[f64]) -> Spectrum {
        let n = raw.len() as isize;
        let half = (self.kernel.len() / 2) as isize;

        (0..n)
            .map(|center| {
                self.kernel
                    .iter()
                    .enumerate()
                    .map(|(k, w)| {
                        let idx = mirror(center + k as isize - half, n);
                        w * raw[idx]
                    })
                    .sum()
            })
            .collect()
    }
}

fn mirror(idx: isize, n: isize) -> usize {
    let reflected = if idx < 0 {
        -idx
    } else if idx >= n {
        2 * (n - 1) - idx
    } else {
        idx
    };
    reflected.clamp(0, n - 1) as usize
}

/// Least-squares weights giving the `derivative`-th derivative of the
/// degree-`order` polynomial fitted over `window` points, at the center.
///
/// Positions are scaled to [-1, 1] to keep the normal matrix well
/// conditioned; the derivative is rescaled back to per-channel units.
fn sg_kernel(window: usize, order: usize, derivative: usize) -> Result<Vec<f64>, ConfigurationError> {
    let half = (window / 2) as f64;
    let positions: Vec<f64> = (0..window).map(|i| (i as f64 - half) / half).collect();
    let terms = order + 1;

    // Normal matrix G = AᵀA where A[i][j] = t_i^j.
    let mut gram = vec![vec![0.0; terms]; terms];
    for &t in &positions {
        for (r, row) in gram.iter_mut().enumerate() {
            for (c, cell) in row.iter_mut().enumerate() {
                *cell += t.powi((r + c) as i32);
            }
        }
    }

    // G is symmetric, so solving G z = e_d yields row d of G⁻¹.
    let mut rhs = vec![0.0; terms];
    rhs[derivative] = 1.0;
    let z = solve(gram, rhs)?;

    let factorial: f64 = (1..=derivative).map(|k| k as f64).product();
    let scale = factorial / half.powi(derivative as i32);

    Ok(positions
        .iter()
        .map(|&t| {
            let projected: f64 = z
                .iter()
                .enumerate()
                .map(|(k, zk)| zk * t.powi(k as i32))
                .sum();
            projected * scale
        })
        .collect())
}

/// Gaussian elimination with partial pivoting.
fn solve(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Result<Vec<f64>, ConfigurationError> {
    let n = b.len();
    for col in 0..n {
        let pivot = (col..n)
            .max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))
            .unwrap_or(col);
        if a[pivot][col].abs() < 1e-12 {
            return Err(ConfigurationError::SingularFit);
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in col + 1..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = (row + 1..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }
    Ok(x)
}

// ---------------------------------------------------------------------------
// Standard Normal Variate
// ---------------------------------------------------------------------------

/// Centre on the mean and scale by the population standard deviation.
pub fn snv(smoothed: &[f64]) -> Result<Spectrum, DegenerateSignal> {
    let (mean, std_dev) = mean_and_std(smoothed);
    // Written so NaN also lands on the degenerate path.
    if !(std_dev >= MIN_SNV_STD) || !std_dev.is_finite() {
        return Err(DegenerateSignal { std_dev });
    }
    Ok(smoothed.iter().map(|v| (v - mean) / std_dev).collect())
}

// ---------------------------------------------------------------------------
// Preprocessor – smoothing then SNV
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessor {
    filter: SavitzkyGolay,
}

impl Preprocessor {
    pub fn new(params: PreprocessingParams) -> Result<Self, ConfigurationError> {
        Ok(Self {
            filter: SavitzkyGolay::new(params)?,
        })
    }

    pub fn params(&self) -> PreprocessingParams {
        self.filter.params()
    }

    pub fn apply(&self, raw: &[f64]) -> Result<Spectrum, DegenerateSignal> {
        snv(&self.filter.apply(raw))
    }
}

#[derive(Debug, Error)]
pub enum PreprocessError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Degenerate(#[from] DegenerateSignal),
}

/// One-shot smoothing + SNV with plain smoothing (no derivative).
/// Sessions use a [`Preprocessor`] built once from the calibration instead.
pub fn preprocess(raw: &[f64], window: usize, order: usize) -> Result<Spectrum, PreprocessError> {
    let params = PreprocessingParams {
        window,
        order,
        derivative: 0,
    };
    let preprocessor = Preprocessor::new(params)?;
    if raw.len() < window {
        return Err(ConfigurationError::GridTooShort {
            points: raw.len(),
            window,
        }
        .into());
    }
    Ok(preprocessor.apply(raw)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(window: usize, order: usize, derivative: usize) -> PreprocessingParams {
        PreprocessingParams {
            window,
            order,
            derivative,
        }
    }

    fn wavy(n: usize, phase: f64) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let x = i as f64 / n as f64;
                0.4 + 0.3 * (12.0 * x + phase).sin() + 0.05 * (41.0 * x).cos()
            })
            .collect()
    }

    #[test]
    fn classic_five_point_quadratic_kernel() {
        let sg = SavitzkyGolay::new(params(5, 2, 0)).unwrap();
        let expected = [-3.0, 12.0, 17.0, 12.0, -3.0].map(|v| v / 35.0);
        for (got, want) in sg.kernel().iter().zip(expected) {
            assert!((got - want).abs() < 1e-12, "{got} vs {want}");
        }
    }

    #[test]
    fn first_derivative_kernel_on_a_ramp() {
        let sg = SavitzkyGolay::new(params(7, 2, 1)).unwrap();
        let ramp: Vec<f64> = (0..20).map(|i| 3.0 * i as f64 + 1.0).collect();
        let out = sg.apply(&ramp);
        for v in &out[3..17] {
            assert!((v - 3.0).abs() < 1e-9, "{v}");
        }
    }

    #[test]
    fn smoothing_preserves_low_order_polynomials_inside() {
        let sg = SavitzkyGolay::new(params(9, 3, 0)).unwrap();
        let cubic: Vec<f64> = (0..40)
            .map(|i| {
                let x = i as f64 * 0.1;
                0.5 - x + 0.3 * x * x - 0.02 * x * x * x
            })
            .collect();
        let out = sg.apply(&cubic);
        for i in 4..36 {
            assert!((out[i] - cubic[i]).abs() < 1e-9);
        }
    }

    #[test]
    fn mirror_padding_at_the_ends() {
        assert_eq!(mirror(-1, 10), 1);
        assert_eq!(mirror(-3, 10), 3);
        assert_eq!(mirror(10, 10), 8);
        assert_eq!(mirror(12, 10), 6);
        assert_eq!(mirror(4, 10), 4);

        // A constant stays constant everywhere, ends included.
        let sg = SavitzkyGolay::new(params(11, 2, 0)).unwrap();
        let out = sg.apply(&[2.5; 15]);
        assert!(out.iter().all(|v| (v - 2.5).abs() < 1e-12));
    }

    #[test]
    fn invalid_parameters_are_configuration_errors() {
        assert!(matches!(
            SavitzkyGolay::new(params(4, 2, 0)),
            Err(ConfigurationError::InvalidWindow { window: 4 })
        ));
        assert!(matches!(
            SavitzkyGolay::new(params(1, 0, 0)),
            Err(ConfigurationError::InvalidWindow { .. })
        ));
        assert!(matches!(
            SavitzkyGolay::new(params(5, 5, 0)),
            Err(ConfigurationError::OrderTooHigh { order: 5, window: 5 })
        ));
        assert!(matches!(
            SavitzkyGolay::new(params(5, 2, 3)),
            Err(ConfigurationError::DerivativeTooHigh { .. })
        ));
        assert!(matches!(
            preprocess(&wavy(50, 0.0), 5, 7),
            Err(PreprocessError::Configuration(ConfigurationError::OrderTooHigh { .. }))
        ));
    }

    #[test]
    fn output_has_zero_mean_and_unit_variance() {
        for (phase, scale, offset) in [(0.0, 1.0, 0.0), (0.7, 3.5, 1.2), (2.1, 0.02, -0.4)] {
            let raw: Vec<f64> = wavy(331, phase).iter().map(|v| v * scale + offset).collect();
            let out = preprocess(&raw, 15, 2).unwrap();
            assert_eq!(out.len(), raw.len());
            let (mean, std) = mean_and_std(&out);
            assert!(mean.abs() < 1e-9, "mean {mean}");
            assert!((std - 1.0).abs() < 1e-9, "std {std}");
        }
    }

    #[test]
    fn snv_is_scale_invariant_up_to_huge_readings() {
        let pre = Preprocessor::new(params(15, 2, 1)).unwrap();
        let base = wavy(200, 0.3);
        let scale = 2f64.powi(600);
        let huge: Vec<f64> = base.iter().map(|v| v * scale).collect();
        let a = pre.apply(&base).unwrap();
        let b = pre.apply(&huge).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-9, "{x} vs {y}");
        }
    }

    #[test]
    fn snv_rejects_an_infinite_spread() {
        assert!(snv(&[f64::INFINITY, 0.0, 1.0]).is_err());
        assert!(snv(&[f64::NEG_INFINITY, f64::INFINITY]).is_err());
    }

    #[test]
    fn snv_removes_multiplicative_scatter() {
        let pre = Preprocessor::new(params(15, 2, 1)).unwrap();
        let base = wavy(200, 0.3);
        let scattered: Vec<f64> = base.iter().map(|v| 1.8 * v + 0.25).collect();
        let a = pre.apply(&base).unwrap();
        let b = pre.apply(&scattered).unwrap();
        for (x, y) in a.iter().zip(&b) {
            assert!((x - y).abs() < 1e-9);
        }
    }

    #[test]
    fn flat_or_non_finite_input_is_degenerate() {
        let pre = Preprocessor::new(params(15, 2, 0)).unwrap();
        let err = pre.apply(&[0.7; 100]).unwrap_err();
        assert!(err.std_dev < MIN_SNV_STD);

        let mut raw = wavy(100, 0.0);
        raw[40] = f64::NAN;
        let err = pre.apply(&raw).unwrap_err();
        assert!(err.std_dev.is_nan());
    }
}
