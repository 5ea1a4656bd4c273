// src/monitor/debounce.rs

//! Tick classification and temporal debouncing.
//!
//! Transient anomalies (a face briefly leaving the frame, a glance away) only
//! become incidents after `threshold` consecutive matching ticks.

use std::collections::BTreeMap;

use super::geometry::{HeadDirection, face_mismatch, head_pose};
use super::DetectedFace;
use crate::models::violation::{Severity, ViolationType};

/// What one detection tick saw.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Observation {
    NoFace,
    MultipleFaces(usize),
    /// A single face whose descriptor is too far from the reference.
    FaceMismatch(f64),
    LookingAway(HeadDirection),
    Attentive,
}

/// Classifies the faces found in one frame.
pub fn classify(faces: &[DetectedFace], reference: Option<&[f32]>, match_threshold: f64) -> Observation {
    match faces {
        [] => Observation::NoFace,
        [face] => {
            if let Some(distance) = face_mismatch(face.descriptor.as_deref(), reference, match_threshold) {
                return Observation::FaceMismatch(distance);
            }
            match face.landmarks.as_ref().and_then(head_pose).and_then(|p| p.direction) {
                Some(direction) => Observation::LookingAway(direction),
                None => Observation::Attentive,
            }
        }
        many => Observation::MultipleFaces(many.len()),
    }
}

/// A proctoring incident ready to be reported.
#[derive(Debug, Clone, PartialEq)]
pub enum Incident {
    NoFace,
    MultipleFaces { count: usize },
    FaceMismatch { distance: f64 },
    HeadMovement { direction: HeadDirection },
    TabSwitch,
    WindowBlur,
    FullscreenExit,
}

impl Incident {
    pub fn violation_type(&self) -> ViolationType {
        match self {
            Incident::NoFace => ViolationType::NoFaceDetected,
            Incident::MultipleFaces { .. } => ViolationType::MultipleFaces,
            Incident::FaceMismatch { .. } => ViolationType::FaceNotMatching,
            Incident::HeadMovement { .. } => ViolationType::ExcessiveHeadMovement,
            Incident::TabSwitch => ViolationType::TabSwitch,
            Incident::WindowBlur => ViolationType::WindowBlur,
            Incident::FullscreenExit => ViolationType::FullscreenExit,
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Incident::NoFace | Incident::MultipleFaces { .. } | Incident::FaceMismatch { .. } => {
                Severity::High
            }
            _ => Severity::Medium,
        }
    }

    pub fn metadata(&self) -> BTreeMap<String, String> {
        let mut metadata = BTreeMap::new();
        match self {
            Incident::MultipleFaces { count } => {
                metadata.insert("faceCount".to_string(), count.to_string());
            }
            Incident::FaceMismatch { distance } => {
                metadata.insert("distance".to_string(), format!("{:.3}", distance));
            }
            Incident::HeadMovement { direction } => {
                metadata.insert("direction".to_string(), direction.as_str().to_string());
            }
            _ => {}
        }
        metadata
    }
}

/// Consecutive-tick counters. Owned by the monitor task only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DebounceState {
    pub no_face_streak: u32,
    pub multi_face_streak: u32,
    pub head_move_streak: u32,
}

impl DebounceState {
    /// Feeds one observation. A counter grows on a matching tick and resets
    /// on any other; reaching `threshold` fires the incident and resets it.
    /// Face mismatches fire immediately.
    pub fn observe(&mut self, observation: Observation, threshold: u32) -> Option<Incident> {
        let threshold = threshold.max(1);
        match observation {
            Observation::NoFace => {
                self.multi_face_streak = 0;
                self.head_move_streak = 0;
                self.no_face_streak += 1;
                (self.no_face_streak >= threshold).then(|| {
                    self.no_face_streak = 0;
                    Incident::NoFace
                })
            }
            Observation::MultipleFaces(count) => {
                self.no_face_streak = 0;
                self.head_move_streak = 0;
                self.multi_face_streak += 1;
                (self.multi_face_streak >= threshold).then(|| {
                    self.multi_face_streak = 0;
                    Incident::MultipleFaces { count }
                })
            }
            Observation::LookingAway(direction) => {
                self.no_face_streak = 0;
                self.multi_face_streak = 0;
                self.head_move_streak += 1;
                (self.head_move_streak >= threshold).then(|| {
                    self.head_move_streak = 0;
                    Incident::HeadMovement { direction }
                })
            }
            Observation::FaceMismatch(distance) => {
                self.reset();
                Some(Incident::FaceMismatch { distance })
            }
            Observation::Attentive => {
                self.reset();
                None
            }
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
