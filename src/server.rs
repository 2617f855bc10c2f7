//! HTTP and websocket boundary.
//!
//! - `GET /`               health
//! - `GET /api/config`     wavelength grid of the loaded calibration
//! - `POST /api/report`    shift summary over a client's accumulated history
//! - `GET /ws/simulation`  one prediction session per connection

use std::future::Future;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use futures::{sink::SinkExt, stream::StreamExt};
use log::{debug, error, info, warn};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::config::Settings;
use crate::data::calibration::CalibrationModel;
use crate::data::model::ReplayDataset;
use crate::engine::source::{check_replay_dataset, ReplaySource, SimulatedSource, SpectrumSource};
use crate::error::ConfigurationError;
use crate::report::{ShiftHistory, ShiftSummary};
use crate::session::{
    ConfigUpdate, PredictionSession, SessionCommand, SessionConfig, SessionOutcome,
    SessionTiming, StopReason,
};

const COMMAND_BUFFER: usize = 16;
const RECORD_BUFFER: usize = 4;

// =============================================================================
// Server State
// =============================================================================

/// Shared by every connection. Holds nothing a session can mutate.
pub struct AppState {
    model: Arc<CalibrationModel>,
    replay: Option<Arc<ReplayDataset>>,
    timing: SessionTiming,
    defaults: SessionConfig,
    seed: Option<u64>,
    next_session: AtomicU64,
    active: AtomicUsize,
    disconnected: AtomicU64,
    stopped: AtomicU64,
}

/// Connection counts, reported by the health endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SessionStats {
    pub active: usize,
    pub disconnected: u64,
    pub stopped: u64,
}

impl AppState {
    pub fn new(
        model: Arc<CalibrationModel>,
        replay: Option<Arc<ReplayDataset>>,
        settings: &Settings,
    ) -> Result<Self, ConfigurationError> {
        if let Some(dataset) = &replay {
            check_replay_dataset(&model, dataset)?;
        }
        Ok(Self {
            model,
            replay,
            timing: settings.timing,
            defaults: settings.defaults,
            seed: settings.seed,
            next_session: AtomicU64::new(0),
            active: AtomicUsize::new(0),
            disconnected: AtomicU64::new(0),
            stopped: AtomicU64::new(0),
        })
    }

    pub fn model(&self) -> &CalibrationModel {
        &self.model
    }

    pub fn session_stats(&self) -> SessionStats {
        SessionStats {
            active: self.active.load(Ordering::Relaxed),
            disconnected: self.disconnected.load(Ordering::Relaxed),
            stopped: self.stopped.load(Ordering::Relaxed),
        }
    }

    fn session_ended(&self, outcome: Option<SessionOutcome>) {
        match outcome.map(|o| o.reason) {
            Some(StopReason::Requested) => {
                self.stopped.fetch_add(1, Ordering::Relaxed);
            }
            Some(StopReason::Disconnected) | None => {
                self.disconnected.fetch_add(1, Ordering::Relaxed);
            }
        }
        self.active.fetch_sub(1, Ordering::Relaxed);
    }

    /// A fresh `Idle` session with its own random stream.
    pub fn open_session(&self) -> Result<PredictionSession, ConfigurationError> {
        let id = self.next_session.fetch_add(1, Ordering::Relaxed);
        let rng = match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed.wrapping_add(id)),
            None => StdRng::from_os_rng(),
        };

        let source: Box<dyn SpectrumSource> = match &self.replay {
            Some(dataset) => Box::new(ReplaySource::new(&self.model, dataset.clone(), rng)?),
            None => Box::new(SimulatedSource::new(self.model.clone(), rng)),
        };

        Ok(PredictionSession::new(id, self.model.clone(), source, self.timing).with_config(self.defaults))
    }
}

// =============================================================================
// Router
// =============================================================================

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(health_handler))
        .route("/api/config", get(config_handler))
        .route("/api/report", post(report_handler))
        .route("/ws/simulation", get(ws_handler))
        .with_state(state)
}

/// Serve until `shutdown` resolves.
pub async fn serve<F>(listener: TcpListener, state: Arc<AppState>, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    if let Ok(addr) = listener.local_addr() {
        info!("Listening on {addr}");
        info!("  WebSocket: ws://{addr}/ws/simulation");
        info!("  Config:    http://{addr}/api/config");
    }
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
}

#[derive(Debug, Serialize)]
struct ConfigResponse<'a> {
    wavelengths: &'a [f64],
}

async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "Sugarcane NIR Pol engine is running.",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.session_stats()
    }))
}

async fn config_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    Json(ConfigResponse {
        wavelengths: state.model.wavelengths().as_slice(),
    })
    .into_response()
}

async fn report_handler(
    Json(history): Json<ShiftHistory>,
) -> Result<Json<ShiftSummary>, (StatusCode, String)> {
    history
        .summarize()
        .map(Json)
        .map_err(|e| (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()))
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

// =============================================================================
// Websocket session
// =============================================================================

/// Bridge one websocket to one `PredictionSession`.
///
/// Text frames become configuration commands; records go back as JSON text.
/// Either side closing ends the session.
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session = match state.open_session() {
        Ok(session) => session,
        Err(e) => {
            error!("Could not open session: {e}");
            return;
        }
    };
    let id = session.id();
    state.active.fetch_add(1, Ordering::Relaxed);
    info!("session {id}: client connected");

    let (mut sender, mut receiver) = socket.split();
    let (cmd_tx, cmd_rx) = mpsc::channel(COMMAND_BUFFER);
    let (rec_tx, mut rec_rx) = mpsc::channel(RECORD_BUFFER);

    let session_task = tokio::spawn(session.run(cmd_rx, rec_tx));

    let send_task = tokio::spawn(async move {
        while let Some(record) = rec_rx.recv().await {
            let json = match serde_json::to_string(&record) {
                Ok(json) => json,
                Err(e) => {
                    warn!("session {id}: could not encode record: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json)).await.is_err() {
                debug!("session {id}: send failed, client disconnected");
                break;
            }
        }
        if let Err(e) = sender.close().await {
            debug!("session {id}: close after stop: {e}");
        }
    });

    let recv_task = tokio::spawn(async move {
        while let Some(Ok(message)) = receiver.next().await {
            match message {
                Message::Text(text) => match ConfigUpdate::from_json(&text) {
                    Ok(update) => {
                        if cmd_tx.send(SessionCommand::Configure(update)).await.is_err() {
                            break;
                        }
                    }
                    Err(e) => warn!("session {id}: ignoring malformed configuration: {e}"),
                },
                Message::Close(_) => break,
                _ => {}
            }
        }
        // Dropping cmd_tx tells the session the client is gone.
    });

    let outcome = match session_task.await {
        Ok(outcome) => {
            debug!("session {id}: {outcome:?}");
            Some(outcome)
        }
        Err(e) => {
            error!("session {id}: task failed: {e}");
            None
        }
    };
    recv_task.abort();
    if let Err(e) = send_task.await {
        error!("session {id}: send task failed: {e}");
    }
    state.session_ended(outcome);
}
