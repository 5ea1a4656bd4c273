// src/monitor/countdown.rs

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::{
    sync::watch,
    time::{Instant, sleep_until},
};

use super::MonitorError;
use crate::models::session::SubmitReason;

#[async_trait]
pub trait ExamSubmitter: Send + Sync {
    async fn submit(&self, reason: SubmitReason) -> Result<(), MonitorError>;
}

/// Client-side exam timer. Expiry submits the session with `time-expired`.
pub struct ExamCountdown {
    deadline: Instant,
    cancel_tx: watch::Sender<bool>,
}

impl ExamCountdown {
    pub fn new(remaining: Duration) -> Self {
        let (cancel_tx, _) = watch::channel(false);
        Self {
            deadline: Instant::now() + remaining,
            cancel_tx,
        }
    }

    /// Counts down to `start_time + duration_minutes`. An already elapsed
    /// deadline expires immediately.
    pub fn for_session(start_time: DateTime<Utc>, duration_minutes: u32, now: DateTime<Utc>) -> Self {
        let end = start_time + chrono::Duration::minutes(i64::from(duration_minutes));
        let remaining = (end - now).to_std().unwrap_or(Duration::ZERO);
        Self::new(remaining)
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn cancel(&self) {
        self.cancel_tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.cancel_tx.borrow()
    }

    /// Resolves to true at the deadline, false if cancelled first.
    pub async fn expired(&self) -> bool {
        let mut cancel_rx = self.cancel_tx.subscribe();
        if *cancel_rx.borrow_and_update() {
            return false;
        }
        tokio::select! {
            _ = sleep_until(self.deadline) => !*cancel_rx.borrow(),
            _ = cancel_rx.changed() => false,
        }
    }

    /// Waits for expiry and submits once. Returns whether a submission was made.
    pub async fn run(&self, submitter: Arc<dyn ExamSubmitter>) -> bool {
        if !self.expired().await {
            return false;
        }
        tracing::info!("exam time expired, submitting");
        if let Err(e) = submitter.submit(SubmitReason::TimeExpired).await {
            tracing::error!("time-expired submission failed: {}", e);
        }
        true
    }
}
