// src/monitor/mod.rs

//! Client-side attention monitor.
//!
//! A single task samples a [`FrameSource`] on a fixed interval, debounces what
//! it sees and reports incidents through an [`IncidentSink`]. Browser boundary
//! events (tab switch, window blur, fullscreen exit) are pushed in through the
//! [`MonitorHandle`] and reported immediately.

pub mod client;
pub mod countdown;
pub mod debounce;
pub mod geometry;
pub mod reporter;

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use thiserror::Error;
use tokio::{
    sync::{Mutex, mpsc, watch},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at, timeout},
};

use crate::models::exam::ProctoringSettings;
use debounce::{DebounceState, Incident, classify};
use geometry::{FACE_MATCH_THRESHOLD, Landmarks};
use reporter::{IncidentReporter, IncidentSink, ReportOutcome};

/// Consecutive anomalous ticks before an incident fires.
pub const DETECTION_THRESHOLD: u32 = 3;

#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("face detection failed: {0}")]
    Detection(String),

    #[error("face detection timed out after {0:?}")]
    DetectionTimeout(Duration),

    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("server rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
}

/// One face found in a frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetectedFace {
    pub descriptor: Option<Vec<f32>>,
    pub landmarks: Option<Landmarks>,
}

/// Camera plus face detector.
#[async_trait]
pub trait FrameSource: Send {
    async fn detect(&mut self) -> Result<Vec<DetectedFace>, MonitorError>;

    /// Evidence image attached to reported incidents.
    async fn snapshot(&mut self) -> Option<String> {
        None
    }

    /// Stops the camera. Called exactly once when the loop ends.
    async fn release(&mut self) {}
}

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub interval: Duration,
    /// Consecutive ticks before no-face, multiple-faces or head movement fires.
    pub detection_threshold: u32,
    pub match_threshold: f64,
    pub detection_timeout: Duration,
    pub reference_descriptor: Option<Vec<f32>>,
    pub settings: ProctoringSettings,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3),
            detection_threshold: DETECTION_THRESHOLD,
            match_threshold: FACE_MATCH_THRESHOLD,
            detection_timeout: Duration::from_secs(3),
            reference_descriptor: None,
            settings: ProctoringSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryEvent {
    TabSwitch,
    WindowBlur,
    FullscreenExit,
}

impl BoundaryEvent {
    fn incident(self) -> Incident {
        match self {
            BoundaryEvent::TabSwitch => Incident::TabSwitch,
            BoundaryEvent::WindowBlur => Incident::WindowBlur,
            BoundaryEvent::FullscreenExit => Incident::FullscreenExit,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonitorStatus {
    Running,
    Stopped,
    /// The server auto-submitted the session; the loop ended on its own.
    AutoSubmitted,
}

pub struct AttentionMonitor;

impl AttentionMonitor {
    pub fn start<S>(source: S, sink: Arc<dyn IncidentSink>, config: MonitorConfig) -> MonitorHandle
    where
        S: FrameSource + 'static,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let (boundary_tx, boundary_rx) = mpsc::channel(16);
        let (status_tx, status_rx) = watch::channel(MonitorStatus::Running);

        let reporter = IncidentReporter::new(sink, config.settings.clone());
        let task = tokio::spawn(run(source, reporter, config, stop_rx, boundary_rx, status_tx));

        MonitorHandle {
            stop_tx,
            boundary_tx,
            status: status_rx,
            task: Mutex::new(Some(task)),
        }
    }
}

pub struct MonitorHandle {
    stop_tx: watch::Sender<bool>,
    boundary_tx: mpsc::Sender<BoundaryEvent>,
    status: watch::Receiver<MonitorStatus>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl MonitorHandle {
    /// Returns false once the loop has ended.
    pub async fn boundary(&self, event: BoundaryEvent) -> bool {
        self.boundary_tx.send(event).await.is_ok()
    }

    pub fn status(&self) -> MonitorStatus {
        *self.status.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<MonitorStatus> {
        self.status.clone()
    }

    /// Stops the loop and waits until the frame source is released.
    pub async fn stop(&self) {
        let _ = self.stop_tx.send(true);
        let Some(task) = self.task.lock().await.take() else {
            return;
        };
        if let Err(e) = task.await {
            tracing::error!("attention monitor task failed: {}", e);
        }
    }
}

async fn run<S: FrameSource>(
    mut source: S,
    mut reporter: IncidentReporter,
    config: MonitorConfig,
    mut stop_rx: watch::Receiver<bool>,
    mut boundary_rx: mpsc::Receiver<BoundaryEvent>,
    status_tx: watch::Sender<MonitorStatus>,
) {
    let mut ticker = interval_at(Instant::now() + config.interval, config.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut state = DebounceState::default();

    tracing::info!(interval = ?config.interval, "attention monitor started");

    let status = loop {
        tokio::select! {
            biased;

            _ = stop_rx.changed() => break MonitorStatus::Stopped,

            Some(event) = boundary_rx.recv() => {
                if reporter.submit(&event.incident(), None).await == ReportOutcome::AutoSubmitted {
                    break MonitorStatus::AutoSubmitted;
                }
            }

            _ = ticker.tick() => {
                let faces = match timeout(config.detection_timeout, source.detect()).await {
                    Ok(Ok(faces)) => faces,
                    Ok(Err(e)) => {
                        tracing::warn!("skipping tick: {}", e);
                        continue;
                    }
                    Err(_) => {
                        tracing::warn!(
                            "skipping tick: {}",
                            MonitorError::DetectionTimeout(config.detection_timeout)
                        );
                        continue;
                    }
                };

                let observation = classify(
                    &faces,
                    config.reference_descriptor.as_deref(),
                    config.match_threshold,
                );
                let Some(incident) = state.observe(observation, config.detection_threshold) else {
                    continue;
                };

                let snapshot = source.snapshot().await;
                if reporter.submit(&incident, snapshot).await == ReportOutcome::AutoSubmitted {
                    break MonitorStatus::AutoSubmitted;
                }
            }
        }
    };

    source.release().await;
    tracing::info!(?status, "attention monitor stopped");
    let _ = status_tx.send(status);
}
