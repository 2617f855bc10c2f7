use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use crate::data::calibration::CalibrationModel;
use crate::data::model::Spectrum;
use crate::engine::quality::QualityEvaluator;
use crate::engine::source::SpectrumSource;
use crate::engine::{infer, Inference};

pub const DEFAULT_NOISE_LEVEL: f64 = 2.0;
pub const DEFAULT_THRESHOLD: f64 = 13.0;

// ---------------------------------------------------------------------------
// SessionConfig – what the client controls
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionConfig {
    /// Injected noise, percent of the reference's dynamic range.
    pub noise_level: f64,
    /// Pol below which a trustworthy prediction raises an alert.
    pub threshold: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Error)]
pub enum InvalidConfig {
    #[error("noise level must be finite and >= 0, got {0}")]
    NoiseLevel(f64),
    #[error("threshold must be finite, got {0}")]
    Threshold(f64),
}

impl SessionConfig {
    pub fn new(noise_level: f64, threshold: f64) -> Result<Self, InvalidConfig> {
        if !(noise_level >= 0.0) || !noise_level.is_finite() {
            return Err(InvalidConfig::NoiseLevel(noise_level));
        }
        if !threshold.is_finite() {
            return Err(InvalidConfig::Threshold(threshold));
        }
        Ok(Self {
            noise_level,
            threshold,
        })
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            noise_level: DEFAULT_NOISE_LEVEL,
            threshold: DEFAULT_THRESHOLD,
        }
    }
}

/// Inbound configuration message. Absent fields keep their current value.
///
/// ```json
/// { "noiseLevel": 2.0, "threshold": 13.0 }
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdate {
    pub noise_level: Option<f64>,
    pub threshold: Option<f64>,
}

impl ConfigUpdate {
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    pub fn apply_to(&self, current: SessionConfig) -> Result<SessionConfig, InvalidConfig> {
        SessionConfig::new(
            self.noise_level.unwrap_or(current.noise_level),
            self.threshold.unwrap_or(current.threshold),
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SessionCommand {
    Configure(ConfigUpdate),
    Stop,
}

// ---------------------------------------------------------------------------
// PredictionRecord – one per tick, handed to the transport
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRecord {
    /// Milliseconds since the Unix epoch.
    pub timestamp: i64,
    pub noisy_spectrum: Spectrum,
    /// NaN (serialized as `null`) when the spectrum was unusable.
    pub predicted_pol: f64,
    /// Known only for simulated and replayed spectra.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub actual_pol: Option<f64>,
    pub anomaly: bool,
    pub alert: bool,
    pub inference_ms: f64,
}

// ---------------------------------------------------------------------------
// PredictionSession – Idle → Active → Stopped
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => write!(f, "idle"),
            SessionState::Active => write!(f, "active"),
            SessionState::Stopped => write!(f, "stopped"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The client asked to stop.
    Requested,
    /// Either channel to the client closed.
    Disconnected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionOutcome {
    pub ticks: u64,
    pub reason: StopReason,
    pub state: SessionState,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionTiming {
    pub tick_interval: Duration,
    /// Preprocessing + regression slower than this is flagged as anomalous.
    pub tick_budget: Duration,
}

impl Default for SessionTiming {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(1),
            tick_budget: Duration::from_millis(250),
        }
    }
}

/// One client's tick loop. Owns its configuration and spectrum source;
/// shares only the read-only calibration.
pub struct PredictionSession {
    id: u64,
    model: Arc<CalibrationModel>,
    source: Box<dyn SpectrumSource>,
    evaluator: QualityEvaluator,
    timing: SessionTiming,
    config: SessionConfig,
    state: SessionState,
}

impl PredictionSession {
    pub fn new(
        id: u64,
        model: Arc<CalibrationModel>,
        source: Box<dyn SpectrumSource>,
        timing: SessionTiming,
    ) -> Self {
        Self {
            id,
            model,
            source,
            evaluator: QualityEvaluator::default(),
            timing,
            config: SessionConfig::default(),
            state: SessionState::Idle,
        }
    }

    /// Starting values that the first configuration message is merged onto.
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> SessionConfig {
        self.config
    }

    /// Merge `update` into the configuration; an invalid update leaves it
    /// untouched.
    pub fn apply(&mut self, update: ConfigUpdate) -> Result<SessionConfig, InvalidConfig> {
        match update.apply_to(self.config) {
            Ok(config) => {
                if config != self.config {
                    debug!(
                        "session {}: noise {}% threshold {}",
                        self.id, config.noise_level, config.threshold
                    );
                }
                self.config = config;
                Ok(config)
            }
            Err(e) => {
                warn!("session {}: rejected configuration: {e}", self.id);
                Err(e)
            }
        }
    }

    /// Run one full acquisition → prediction → evaluation step.
    pub fn tick(&mut self) -> PredictionRecord {
        let reading = self.source.next_reading(self.config.noise_level);
        let Inference {
            predicted_pol,
            flags,
            inference_ms,
        } = infer(
            &self.model,
            &self.evaluator,
            &reading.spectrum,
            self.config.threshold,
            self.timing.tick_budget,
        );

        PredictionRecord {
            timestamp: chrono::Utc::now().timestamp_millis(),
            noisy_spectrum: reading.spectrum,
            predicted_pol,
            actual_pol: reading.actual_pol,
            anomaly: flags.anomaly,
            alert: flags.alert,
            inference_ms,
        }
    }

    /// Drive the session until the client stops or goes away.
    ///
    /// Waits in `Idle` for the first valid configuration, then emits one
    /// record per tick. Commands are only looked at outside a tick, so a
    /// configuration change lands on the next tick. A stop is honoured
    /// while waiting for the timer or for room on `records`, and is never
    /// followed by another record.
    pub async fn run(
        mut self,
        mut commands: mpsc::Receiver<SessionCommand>,
        records: mpsc::Sender<PredictionRecord>,
    ) -> SessionOutcome {
        loop {
            match commands.recv().await {
                Some(SessionCommand::Configure(update)) => {
                    if self.apply(update).is_ok() {
                        break;
                    }
                }
                Some(SessionCommand::Stop) => return self.stop(0, StopReason::Requested),
                None => return self.stop(0, StopReason::Disconnected),
            }
        }

        self.state = SessionState::Active;
        info!(
            "session {} active ({} source, noise {}%, threshold {})",
            self.id,
            self.source.name(),
            self.config.noise_level,
            self.config.threshold
        );

        let mut ticker = tokio::time::interval(self.timing.tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut ticks = 0u64;

        loop {
            tokio::select! {
                biased;

                command = commands.recv() => {
                    if let Some(reason) = self.handle(command) {
                        return self.stop(ticks, reason);
                    }
                }

                _ = ticker.tick() => {
                    let record = self.tick();
                    if let Err(reason) = self.deliver(record, &mut commands, &records).await {
                        return self.stop(ticks, reason);
                    }
                    ticks += 1;
                }
            }
        }
    }

    /// Apply one inbound command; `Some` when it ends the session.
    fn handle(&mut self, command: Option<SessionCommand>) -> Option<StopReason> {
        match command {
            Some(SessionCommand::Configure(update)) => {
                if self.apply(update).is_err() {
                    debug!(
                        "session {}: keeping noise {}% threshold {}",
                        self.id, self.config.noise_level, self.config.threshold
                    );
                }
                None
            }
            Some(SessionCommand::Stop) => Some(StopReason::Requested),
            None => Some(StopReason::Disconnected),
        }
    }

    /// Hand `record` to the transport once it has room. A stop or
    /// disconnect seen while waiting drops the record.
    async fn deliver(
        &mut self,
        record: PredictionRecord,
        commands: &mut mpsc::Receiver<SessionCommand>,
        records: &mpsc::Sender<PredictionRecord>,
    ) -> Result<(), StopReason> {
        loop {
            tokio::select! {
                biased;

                command = commands.recv() => {
                    if let Some(reason) = self.handle(command) {
                        return Err(reason);
                    }
                }

                permit = records.reserve() => {
                    let permit = permit.map_err(|_| StopReason::Disconnected)?;
                    permit.send(record);
                    return Ok(());
                }
            }
        }
    }

    fn stop(mut self, ticks: u64, reason: StopReason) -> SessionOutcome {
        let from = self.state;
        self.state = SessionState::Stopped;
        info!(
            "session {} {from} -> stopped after {ticks} ticks ({reason:?})",
            self.id
        );
        SessionOutcome {
            ticks,
            reason,
            state: self.state,
        }
    }
}
