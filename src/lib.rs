//! # cane-pol
//!
//! Real-time prediction of sugarcane Pol (sucrose %) from near-infrared
//! absorbance spectra.
//!
//! ## Layout
//!
//! - `data`: wavelength grids, spectra, replay datasets and the calibration artifact
//! - `engine`: the per-tick pipeline (source, preprocessing, regression, quality)
//! - `session`: one client's tick loop and its configuration
//! - `report`: shift summaries over accumulated predictions
//! - `server`: HTTP / websocket transport
//! - `config`: command-line settings

pub mod config;
pub mod data;
pub mod engine;
pub mod error;
pub mod report;
pub mod server;
pub mod session;

pub use data::calibration::{CalibrationArtifact, CalibrationModel};
pub use error::{ConfigurationError, DegenerateSignal};
pub use session::{PredictionRecord, PredictionSession, SessionConfig, SessionState};
