/// Data layer: spectra, the calibration artifact, and replay datasets.
///
/// Architecture:
/// ```text
///  calibration.json              .parquet / .json / .csv
///        │                               │
///        ▼                               ▼
///   ┌─────────────┐                ┌──────────┐
///   │ calibration │ validate       │  loader   │ parse file → ReplayDataset
///   └─────────────┘                └──────────┘
///        │                               │
///        ▼                               ▼
///   Arc<CalibrationModel> ◄── grid check ── ReplayDataset
///        │
///        ▼
///     engine / sessions
/// ```

pub mod calibration;
pub mod loader;
pub mod model;
