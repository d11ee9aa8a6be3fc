//! Attentiveness from facial landmark geometry.
//!
//! Two interchangeable, stateless methods:
//! - eye aspect ratio (EAR) of one eye, attentive when the eye is open;
//! - head pose from a PnP solve, attentive when the face points at the camera.
//!
//! EAR reports malformed input as an error. Head pose never fails: any
//! numerical failure classifies the face as not attentive.

use crate::head_pose::{estimate_head_pose, HeadPose};
use crate::types::{FaceLandmarks, Point2};
use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_EAR_THRESHOLD: f32 = 0.23;
pub const DEFAULT_MAX_YAW_DEG: f32 = 20.0;
pub const DEFAULT_MAX_PITCH_DEG: f32 = 20.0;

/// Face-mesh indices of the image-left eye, ordered `p0..p5`:
/// corners at p0/p3, vertical pairs p1–p5 and p2–p4.
pub const EAR_EYE_INDICES: [usize; 6] = [33, 160, 158, 133, 153, 144];

/// Face-mesh indices matching [`crate::head_pose::MODEL_POINTS`]:
/// nose tip, chin, eye outer corners, mouth corners.
pub const POSE_INDICES: [usize; 6] = [1, 152, 33, 263, 61, 291];

#[derive(Error, Debug, Clone, PartialEq)]
pub enum AttentionError {
    #[error("landmark {0} missing from landmark set")]
    MissingLandmark(usize),
    #[error("eye landmarks are not finite")]
    NonFinite,
    #[error("eye corners coincide; eye width is zero")]
    ZeroEyeWidth,
}

/// What the active method measured for the frame.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AttentionMetric {
    EyeAspectRatio { ear: f32 },
    HeadPose { pitch: f32, yaw: f32, roll: f32 },
    /// Head pose could not be solved; classified as not attentive.
    PoseUnavailable,
    /// Eye landmarks were missing or malformed; classified as not attentive.
    EarUnavailable,
    /// No usable landmark set in the frame.
    NoLandmarks,
}

/// Frame-level attentiveness.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AttentionState {
    pub attentive: bool,
    pub metric: AttentionMetric,
}

impl AttentionState {
    pub fn no_landmarks() -> Self {
        Self {
            attentive: false,
            metric: AttentionMetric::NoLandmarks,
        }
    }

    pub fn ear_unavailable() -> Self {
        Self {
            attentive: false,
            metric: AttentionMetric::EarUnavailable,
        }
    }
}

/// `(‖p1−p5‖ + ‖p2−p4‖) / (2·‖p0−p3‖)` for six ordered eye points.
pub fn eye_aspect_ratio(eye: &[Point2; 6]) -> Result<f32, AttentionError> {
    if !eye.iter().all(Point2::is_finite) {
        return Err(AttentionError::NonFinite);
    }
    let horizontal = eye[0].distance(&eye[3]);
    if horizontal <= f32::EPSILON {
        return Err(AttentionError::ZeroEyeWidth);
    }
    let vertical = eye[1].distance(&eye[5]) + eye[2].distance(&eye[4]);
    Ok(vertical / (2.0 * horizontal))
}

fn pick<const N: usize>(
    landmarks: &FaceLandmarks,
    indices: &[usize; N],
    width: u32,
    height: u32,
) -> Result<[Point2; N], AttentionError> {
    let mut out = [Point2::default(); N];
    for (slot, &idx) in out.iter_mut().zip(indices.iter()) {
        *slot = landmarks
            .pixel(idx, width, height)
            .ok_or(AttentionError::MissingLandmark(idx))?;
    }
    Ok(out)
}

/// The active attentiveness method and its thresholds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum AttentionMethod {
    EyeAspectRatio { threshold: f32 },
    HeadPose { max_yaw: f32, max_pitch: f32 },
}

impl Default for AttentionMethod {
    fn default() -> Self {
        AttentionMethod::HeadPose {
            max_yaw: DEFAULT_MAX_YAW_DEG,
            max_pitch: DEFAULT_MAX_PITCH_DEG,
        }
    }
}

impl AttentionMethod {
    pub fn name(&self) -> &'static str {
        match self {
            AttentionMethod::EyeAspectRatio { .. } => "ear",
            AttentionMethod::HeadPose { .. } => "head_pose",
        }
    }

    /// Classify one landmark set. `width`/`height` are the pixel size of the
    /// frame the landmarks were taken from.
    ///
    /// Only the EAR method returns errors; head pose fails safe.
    pub fn classify(
        &self,
        landmarks: &FaceLandmarks,
        width: u32,
        height: u32,
    ) -> Result<AttentionState, AttentionError> {
        match *self {
            AttentionMethod::EyeAspectRatio { threshold } => {
                let eye = pick(landmarks, &EAR_EYE_INDICES, width, height)?;
                let ear = eye_aspect_ratio(&eye)?;
                Ok(AttentionState {
                    attentive: ear > threshold,
                    metric: AttentionMetric::EyeAspectRatio { ear },
                })
            }
            AttentionMethod::HeadPose { max_yaw, max_pitch } => {
                let pose = pick(landmarks, &POSE_INDICES, width, height)
                    .map_err(|e| e.to_string())
                    .and_then(|pts| estimate_head_pose(&pts, width, height).map_err(|e| e.to_string()));
                Ok(match pose {
                    Ok(pose) => classify_pose(&pose, max_yaw, max_pitch),
                    Err(reason) => {
                        tracing::warn!(%reason, "head pose unavailable; treating face as not attentive");
                        AttentionState {
                            attentive: false,
                            metric: AttentionMetric::PoseUnavailable,
                        }
                    }
                })
            }
        }
    }
}

fn classify_pose(pose: &HeadPose, max_yaw: f32, max_pitch: f32) -> AttentionState {
    AttentionState {
        attentive: pose.yaw.abs() <= max_yaw && pose.pitch.abs() <= max_pitch,
        metric: AttentionMetric::HeadPose {
            pitch: pose.pitch,
            yaw: pose.yaw,
            roll: pose.roll,
        },
    }
}
