use thiserror::Error;

// ---------------------------------------------------------------------------
// ConfigurationError – invalid calibration, fatal at load time
// ---------------------------------------------------------------------------

/// A calibration or engine parameter that can never produce a valid
/// prediction. Raised while loading; startup must abort on it.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("wavelength grid is empty")]
    EmptyGrid,

    #[error("wavelength grid is not strictly increasing at index {index}")]
    NonIncreasingGrid { index: usize },

    #[error("{what}: expected {expected} values, found {found}")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("smoothing window must be odd and at least 3, got {window}")]
    InvalidWindow { window: usize },

    #[error("polynomial order {order} must be less than window {window}")]
    OrderTooHigh { order: usize, window: usize },

    #[error("derivative {derivative} exceeds polynomial order {order}")]
    DerivativeTooHigh { derivative: usize, order: usize },

    #[error("grid of {points} points is shorter than the smoothing window {window}")]
    GridTooShort { points: usize, window: usize },

    #[error("wavelength grid of {what} does not match")]
    GridMismatch { what: String },

    #[error("{what} contains a non-finite value")]
    NonFinite { what: &'static str },

    #[error("unsupported calibration schema version {found} (supported: {supported})")]
    UnsupportedSchema { found: u32, supported: u32 },

    #[error("reference spectrum is unusable after preprocessing: {0}")]
    DegenerateReference(#[from] DegenerateSignal),

    #[error("reference spectrum range {range:e} is below the minimum viable range {minimum:e}")]
    WeakReference { range: f64, minimum: f64 },

    #[error("Savitzky-Golay normal equations are singular")]
    SingularFit,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("calibration artifact is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
}

// ---------------------------------------------------------------------------
// DegenerateSignal – recoverable, per tick
// ---------------------------------------------------------------------------

/// The smoothed spectrum is flat, so SNV has nothing to scale by.
/// Treated as a sensor fault for one tick, not as a session failure.
#[derive(Debug, Clone, Copy, PartialEq, Error)]
#[error("smoothed signal is flat (std dev {std_dev:e})")]
pub struct DegenerateSignal {
    pub std_dev: f64,
}
