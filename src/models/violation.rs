// src/models/violation.rs

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

/// Closed set of proctoring incidents.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ViolationType {
    NoFaceDetected,
    MultipleFaces,
    FaceNotMatching,
    ExcessiveHeadMovement,
    TabSwitch,
    FullscreenExit,
    WindowBlur,
    SuspiciousObject,
    Other,
}

impl ViolationType {
    pub fn as_str(self) -> &'static str {
        match self {
            ViolationType::NoFaceDetected => "no-face-detected",
            ViolationType::MultipleFaces => "multiple-faces",
            ViolationType::FaceNotMatching => "face-not-matching",
            ViolationType::ExcessiveHeadMovement => "excessive-head-movement",
            ViolationType::TabSwitch => "tab-switch",
            ViolationType::FullscreenExit => "fullscreen-exit",
            ViolationType::WindowBlur => "window-blur",
            ViolationType::SuspiciousObject => "suspicious-object",
            ViolationType::Other => "other",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "no-face-detected" => Some(ViolationType::NoFaceDetected),
            "multiple-faces" => Some(ViolationType::MultipleFaces),
            "face-not-matching" => Some(ViolationType::FaceNotMatching),
            "excessive-head-movement" => Some(ViolationType::ExcessiveHeadMovement),
            "tab-switch" => Some(ViolationType::TabSwitch),
            "fullscreen-exit" => Some(ViolationType::FullscreenExit),
            "window-blur" => Some(ViolationType::WindowBlur),
            "suspicious-object" => Some(ViolationType::SuspiciousObject),
            "other" => Some(ViolationType::Other),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    #[default]
    Medium,
    High,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            _ => None,
        }
    }
}

/// An append-only ledger entry. Never updated after creation.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Violation {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub session_id: Uuid,
    pub violation_type: ViolationType,
    pub timestamp: DateTime<Utc>,
    /// Opaque evidence blob (typically a base64 data URL).
    pub snapshot: Option<String>,
    pub severity: Severity,
    pub metadata: BTreeMap<String, String>,
    pub description: Option<String>,
}

/// DTO for logging a violation from the proctoring client.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct LogViolationRequest {
    pub violation_type: ViolationType,
    #[serde(default)]
    pub severity: Option<Severity>,
    #[serde(default)]
    #[validate(length(max = 2_000_000))]
    pub snapshot: Option<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default)]
    #[validate(length(max = 1000))]
    pub description: Option<String>,
}

impl LogViolationRequest {
    pub fn into_violation(self, session_id: Uuid, now: DateTime<Utc>) -> Violation {
        Violation {
            id: Uuid::new_v4(),
            session_id,
            violation_type: self.violation_type,
            timestamp: now,
            snapshot: self.snapshot,
            severity: self.severity.unwrap_or_default(),
            metadata: self.metadata,
            description: self.description,
        }
    }
}

/// Compact violation view returned right after logging.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ViolationSummary {
    #[serde(rename = "_id")]
    pub id: Uuid,
    pub violation_type: ViolationType,
    pub severity: Severity,
    pub timestamp: DateTime<Utc>,
}

impl From<&Violation> for ViolationSummary {
    fn from(v: &Violation) -> Self {
        Self {
            id: v.id,
            violation_type: v.violation_type,
            severity: v.severity,
            timestamp: v.timestamp,
        }
    }
}

/// Server reply to a logged violation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogViolationResponse {
    pub violation: ViolationSummary,
    pub warning_count: u32,
    pub threshold: u32,
    pub auto_submitted: bool,
}
