// src/monitor/client.rs

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use super::{MonitorError, countdown::ExamSubmitter, reporter::IncidentSink};
use crate::models::{
    session::{SubmitExamRequest, SubmitReason},
    violation::{LogViolationRequest, LogViolationResponse},
};

/// HTTP client for one proctored session, authenticated as the student.
#[derive(Debug, Clone)]
pub struct ProctoringClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
    session_id: Uuid,
}

impl ProctoringClient {
    pub fn new(base_url: impl Into<String>, token: impl Into<String>, session_id: Uuid) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, token, session_id)
    }

    pub fn with_client(
        http: reqwest::Client,
        base_url: impl Into<String>,
        token: impl Into<String>,
        session_id: Uuid,
    ) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self {
            http,
            base_url,
            token: token.into(),
            session_id,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/api/proctoring/{}/{}", self.base_url, path, self.session_id)
    }

    async fn read<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, MonitorError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response.json().await?);
        }
        Err(rejection(status, response).await)
    }
}

async fn rejection(status: StatusCode, response: reqwest::Response) -> MonitorError {
    let message = match response.json::<serde_json::Value>().await {
        Ok(body) => body["error"].as_str().unwrap_or_default().to_string(),
        Err(_) => String::new(),
    };
    MonitorError::Rejected {
        status: status.as_u16(),
        message,
    }
}

#[async_trait]
impl IncidentSink for ProctoringClient {
    async fn report(&self, request: LogViolationRequest) -> Result<LogViolationResponse, MonitorError> {
        let response = self
            .http
            .post(self.url("violation"))
            .bearer_auth(&self.token)
            .json(&request)
            .send()
            .await?;
        Self::read(response).await
    }
}

#[async_trait]
impl ExamSubmitter for ProctoringClient {
    /// A session that is already closed counts as submitted.
    async fn submit(&self, reason: SubmitReason) -> Result<(), MonitorError> {
        let response = self
            .http
            .post(self.url("submit"))
            .bearer_auth(&self.token)
            .json(&SubmitExamRequest { reason })
            .send()
            .await?;

        match response.status() {
            status if status.is_success() => Ok(()),
            StatusCode::CONFLICT => {
                tracing::info!(session_id = %self.session_id, "session already submitted");
                Ok(())
            }
            status => Err(rejection(status, response).await),
        }
    }
}
