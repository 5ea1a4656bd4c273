// src/monitor/reporter.rs

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use tokio::time::Instant;

use super::{MonitorError, debounce::Incident};
use crate::models::{
    exam::ProctoringSettings,
    violation::{LogViolationRequest, LogViolationResponse, ViolationType},
};

/// Same-type incidents closer together than this are dropped client-side.
pub const DEDUP_WINDOW: Duration = Duration::from_secs(2);

/// Where incidents go. The HTTP implementation is
/// [`ProctoringClient`](super::client::ProctoringClient).
#[async_trait]
pub trait IncidentSink: Send + Sync {
    async fn report(&self, request: LogViolationRequest) -> Result<LogViolationResponse, MonitorError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReportOutcome {
    /// The exam's proctoring policy does not watch this category.
    Disabled,
    /// Same type reported within the dedup window.
    Duplicate,
    Logged { warning_count: u32, threshold: u32 },
    /// The server closed the session on this incident.
    AutoSubmitted,
    Failed,
}

/// Gates incidents by the exam's proctoring flags, drops duplicates and
/// forwards the rest to the sink.
pub struct IncidentReporter {
    sink: Arc<dyn IncidentSink>,
    settings: ProctoringSettings,
    last: Option<(ViolationType, Instant)>,
}

impl IncidentReporter {
    pub fn new(sink: Arc<dyn IncidentSink>, settings: ProctoringSettings) -> Self {
        Self {
            sink,
            settings,
            last: None,
        }
    }

    pub fn is_enabled(&self, kind: ViolationType) -> bool {
        match kind {
            ViolationType::NoFaceDetected => self.settings.enable_face_detection,
            ViolationType::MultipleFaces => self.settings.enable_multiple_face_detection,
            ViolationType::ExcessiveHeadMovement => self.settings.enable_head_movement,
            ViolationType::TabSwitch | ViolationType::WindowBlur | ViolationType::FullscreenExit => {
                self.settings.enable_tab_switch
            }
            ViolationType::FaceNotMatching | ViolationType::SuspiciousObject | ViolationType::Other => true,
        }
    }

    pub async fn submit(&mut self, incident: &Incident, snapshot: Option<String>) -> ReportOutcome {
        let kind = incident.violation_type();
        if !self.is_enabled(kind) {
            return ReportOutcome::Disabled;
        }

        let now = Instant::now();
        if let Some((last_kind, at)) = self.last {
            if last_kind == kind && now.duration_since(at) < DEDUP_WINDOW {
                tracing::debug!(violation_type = kind.as_str(), "skipping duplicate incident");
                return ReportOutcome::Duplicate;
            }
        }
        self.last = Some((kind, now));

        let request = LogViolationRequest {
            violation_type: kind,
            severity: Some(incident.severity()),
            snapshot,
            metadata: incident.metadata(),
            description: None,
        };

        match self.sink.report(request).await {
            Ok(response) if response.auto_submitted => {
                tracing::warn!(
                    warning_count = response.warning_count,
                    threshold = response.threshold,
                    "warning threshold reached, session auto-submitted"
                );
                ReportOutcome::AutoSubmitted
            }
            Ok(response) => ReportOutcome::Logged {
                warning_count: response.warning_count,
                threshold: response.threshold,
            },
            Err(e) => {
                tracing::error!(violation_type = kind.as_str(), "failed to report incident: {}", e);
                ReportOutcome::Failed
            }
        }
    }
}
