// src/monitor/geometry.rs

//! Face descriptor comparison and head pose estimation from landmarks.

use serde::{Deserialize, Serialize};

/// Horizontal nose offset, in eye-distance units, past which the head counts
/// as turned left or right.
pub const HORIZONTAL_THRESHOLD: f64 = 0.4;

/// Vertical nose offset, in eye-distance units, past which the head counts as
/// tilted down (positive) or up (negative).
pub const VERTICAL_THRESHOLD: f64 = 0.45;

/// Descriptor distance below which two faces are the same person.
pub const FACE_MATCH_THRESHOLD: f64 = 0.6;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// The landmark groups head pose needs. Image coordinates: y grows downwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Landmarks {
    /// Nose points; the last one is the tip.
    pub nose: Vec<Point>,
    pub left_eye: Vec<Point>,
    pub right_eye: Vec<Point>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HeadDirection {
    Left,
    Right,
    Up,
    Down,
}

impl HeadDirection {
    pub fn as_str(self) -> &'static str {
        match self {
            HeadDirection::Left => "left",
            HeadDirection::Right => "right",
            HeadDirection::Up => "up",
            HeadDirection::Down => "down",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadPose {
    pub horizontal_offset: f64,
    pub vertical_offset: f64,
    /// `None` while the student faces the screen.
    pub direction: Option<HeadDirection>,
}

fn centroid(points: &[Point]) -> Option<Point> {
    if points.is_empty() {
        return None;
    }
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Some(Point::new(sx / n, sy / n))
}

/// Offsets of the nose tip from the midpoint between the eyes, normalized by
/// the distance between the eye centers. Horizontal offset wins over vertical.
///
/// Returns `None` when a landmark group is empty or the eyes coincide.
pub fn head_pose(landmarks: &Landmarks) -> Option<HeadPose> {
    let left = centroid(&landmarks.left_eye)?;
    let right = centroid(&landmarks.right_eye)?;
    let nose_tip = *landmarks.nose.last()?;

    let face_width = (right.x - left.x).abs();
    if face_width <= f64::EPSILON {
        return None;
    }

    let eye_center = Point::new((left.x + right.x) / 2.0, (left.y + right.y) / 2.0);
    let horizontal_offset = (nose_tip.x - eye_center.x) / face_width;
    let vertical_offset = (nose_tip.y - eye_center.y) / face_width;

    let direction = if horizontal_offset.abs() > HORIZONTAL_THRESHOLD {
        Some(if horizontal_offset > 0.0 {
            HeadDirection::Right
        } else {
            HeadDirection::Left
        })
    } else if vertical_offset > VERTICAL_THRESHOLD {
        Some(HeadDirection::Down)
    } else if vertical_offset < -VERTICAL_THRESHOLD {
        Some(HeadDirection::Up)
    } else {
        None
    };

    Some(HeadPose {
        horizontal_offset,
        vertical_offset,
        direction,
    })
}

/// `None` when the descriptors have different lengths.
pub fn euclidean_distance(a: &[f32], b: &[f32]) -> Option<f64> {
    if a.len() != b.len() {
        return None;
    }
    let sum: f64 = a
        .iter()
        .zip(b)
        .map(|(x, y)| {
            let d = f64::from(*x) - f64::from(*y);
            d * d
        })
        .sum();
    Some(sum.sqrt())
}

/// Compares a detected face with the reference descriptor.
///
/// Returns the distance when the faces do not match, `None` otherwise. The
/// check is skipped (treated as a match) when either descriptor is missing
/// or they are not comparable.
pub fn face_mismatch(detected: Option<&[f32]>, reference: Option<&[f32]>, threshold: f64) -> Option<f64> {
    let distance = euclidean_distance(detected?, reference?)?;
    (distance >= threshold).then_some(distance)
}
