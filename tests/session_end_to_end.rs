use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::mpsc;

use cane_pol::engine::source::SimulatedSource;
use cane_pol::session::{
    ConfigUpdate, PredictionRecord, SessionCommand, SessionOutcome, SessionTiming, StopReason,
};
use cane_pol::{CalibrationArtifact, CalibrationModel, PredictionSession, SessionState};

const REFERENCE_POL: f64 = 14.5;

struct Harness {
    commands: mpsc::Sender<SessionCommand>,
    records: mpsc::Receiver<PredictionRecord>,
    session: tokio::task::JoinHandle<SessionOutcome>,
}

fn start(seed: u64) -> Harness {
    let artifact = CalibrationArtifact::synthetic(REFERENCE_POL).unwrap();
    let model = Arc::new(CalibrationModel::from_artifact(artifact).unwrap());
    let source = SimulatedSource::new(model.clone(), StdRng::seed_from_u64(seed));
    let session = PredictionSession::new(0, model, Box::new(source), SessionTiming::default());

    let (cmd_tx, cmd_rx) = mpsc::channel(8);
    let (rec_tx, rec_rx) = mpsc::channel(1);
    Harness {
        commands: cmd_tx,
        records: rec_rx,
        session: tokio::spawn(session.run(cmd_rx, rec_tx)),
    }
}

fn configure(noise_level: f64, threshold: f64) -> SessionCommand {
    SessionCommand::Configure(ConfigUpdate {
        noise_level: Some(noise_level),
        threshold: Some(threshold),
    })
}

#[tokio::test(start_paused = true)]
async fn noiseless_reference_predicts_reference_pol_for_ten_ticks() {
    let mut h = start(2024);
    h.commands.send(configure(0.0, 13.0)).await.unwrap();

    for tick in 0..10 {
        let record = h.records.recv().await.unwrap();
        assert!(
            (record.predicted_pol - REFERENCE_POL).abs() < 1e-6,
            "tick {tick}: predicted {}",
            record.predicted_pol
        );
        assert_eq!(record.actual_pol, Some(REFERENCE_POL));
        assert!(!record.alert, "tick {tick}");
        assert!(!record.anomaly, "tick {tick}");
    }

    h.commands.send(SessionCommand::Stop).await.unwrap();
    while h.records.recv().await.is_some() {}
    let outcome = h.session.await.unwrap();
    assert_eq!(outcome.state, SessionState::Stopped);
    assert_eq!(outcome.reason, StopReason::Requested);
}

#[tokio::test(start_paused = true)]
async fn raising_threshold_flips_every_later_tick_to_alert() {
    let mut h = start(7);
    h.commands.send(configure(0.0, 13.0)).await.unwrap();
    for _ in 0..3 {
        let record = h.records.recv().await.unwrap();
        assert!(!record.alert);
    }

    h.commands
        .send(SessionCommand::Configure(ConfigUpdate {
            noise_level: None,
            threshold: Some(20.0),
        }))
        .await
        .unwrap();

    // A record computed before the update was queued may still be buffered.
    let mut seen_alert = false;
    for _ in 0..10 {
        let record = h.records.recv().await.unwrap();
        assert!(!record.anomaly);
        if seen_alert {
            assert!(record.alert);
        }
        seen_alert |= record.alert;
    }
    assert!(seen_alert);

    drop(h.commands);
    while h.records.recv().await.is_some() {}
    assert_eq!(h.session.await.unwrap().reason, StopReason::Disconnected);
}

#[tokio::test(start_paused = true)]
async fn stop_during_the_wait_ends_the_stream() {
    let mut h = start(1);
    h.commands.send(configure(2.0, 13.0)).await.unwrap();
    let first = h.records.recv().await.unwrap();
    assert_eq!(first.noisy_spectrum.len(), 331);

    // Halfway through the interval, the session is parked on its timer.
    tokio::time::sleep(Duration::from_millis(500)).await;
    h.commands.send(SessionCommand::Stop).await.unwrap();

    let outcome = h.session.await.unwrap();
    let mut after_stop = 0;
    while h.records.recv().await.is_some() {
        after_stop += 1;
    }
    assert_eq!(outcome.ticks, 1 + after_stop);
    assert!(after_stop <= 1);
    assert_eq!(outcome.state, SessionState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn malformed_configuration_keeps_the_last_valid_one() {
    let mut h = start(5);
    h.commands.send(configure(0.0, 13.0)).await.unwrap();
    h.records.recv().await.unwrap();

    assert!(ConfigUpdate::from_json(r#"{"threshold": "abc"}"#).is_err());
    h.commands.send(configure(-3.0, 20.0)).await.unwrap();

    for _ in 0..3 {
        let record = h.records.recv().await.unwrap();
        assert!(!record.alert);
        assert!((record.predicted_pol - REFERENCE_POL).abs() < 1e-6);
    }

    h.commands.send(SessionCommand::Stop).await.unwrap();
    while h.records.recv().await.is_some() {}
    h.session.await.unwrap();
}
