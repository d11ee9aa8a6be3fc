use crate::report::ReportMode;
use rollcall_core::attention::{
    AttentionMethod, DEFAULT_EAR_THRESHOLD, DEFAULT_MAX_PITCH_DEG, DEFAULT_MAX_YAW_DEG,
};
use rollcall_core::matcher::DEFAULT_TOLERANCE;
use rollcall_core::{DownscaleFactor, PipelineConfig};
use rollcall_models::mesh::DEFAULT_MAX_FACES;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// V4L2 device path, or `http(s)://` URL of an MJPEG stream (default: /dev/video0).
    pub video_source: String,
    /// Attendance service base URL.
    pub backend_url: String,
    pub report_mode: ReportMode,
    pub post_timeout: Duration,
    pub tolerance: f32,
    pub attention: AttentionMethod,
    pub downscale: DownscaleFactor,
    /// Most faces the landmark extractor runs the mesh on per frame.
    pub max_landmark_faces: usize,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// Path to the SQLite roster database.
    pub db_path: PathBuf,
}

impl Config {
    /// Load configuration from `ROLLCALL_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let get = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let model_dir = lookup("ROLLCALL_MODEL_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(rollcall_models::default_model_dir);
        let db_path = lookup("ROLLCALL_DB_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| rollcall_models::default_data_dir().join("attendance.db"));

        let ear_threshold = parse_or(&lookup, "ROLLCALL_EAR_THRESHOLD", DEFAULT_EAR_THRESHOLD);
        let max_yaw = parse_or(&lookup, "ROLLCALL_MAX_YAW_DEG", DEFAULT_MAX_YAW_DEG);
        let max_pitch = parse_or(&lookup, "ROLLCALL_MAX_PITCH_DEG", DEFAULT_MAX_PITCH_DEG);
        let attention = match get("ROLLCALL_ATTENTION_METHOD", "head_pose").as_str() {
            "ear" => AttentionMethod::EyeAspectRatio {
                threshold: ear_threshold,
            },
            other => {
                if other != "head_pose" {
                    tracing::warn!(value = other, "unknown ROLLCALL_ATTENTION_METHOD; using head_pose");
                }
                AttentionMethod::HeadPose { max_yaw, max_pitch }
            }
        };

        let report_mode = match get("ROLLCALL_REPORT_MODE", "batched").as_str() {
            "simple" => ReportMode::Simple,
            other => {
                if other != "batched" {
                    tracing::warn!(value = other, "unknown ROLLCALL_REPORT_MODE; using batched");
                }
                ReportMode::Batched
            }
        };

        let scale = parse_or(&lookup, "ROLLCALL_FRAME_DOWNSCALE", DownscaleFactor::default().get());
        let downscale = DownscaleFactor::new(scale).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "invalid ROLLCALL_FRAME_DOWNSCALE; using default");
            DownscaleFactor::default()
        });

        Self {
            video_source: get("ROLLCALL_VIDEO_SOURCE", "/dev/video0"),
            backend_url: get("ROLLCALL_BACKEND_URL", "http://localhost:3000")
                .trim_end_matches('/')
                .to_string(),
            report_mode,
            post_timeout: Duration::from_secs(parse_checked(&lookup, "ROLLCALL_POST_TIMEOUT_SECS", 3u64, |s| *s > 0)),
            tolerance: parse_checked(&lookup, "ROLLCALL_MATCH_TOLERANCE", DEFAULT_TOLERANCE, |t| {
                t.is_finite() && *t >= 0.0
            }),
            attention,
            downscale,
            max_landmark_faces: parse_or(&lookup, "ROLLCALL_MAX_LANDMARK_FACES", DEFAULT_MAX_FACES),
            model_dir,
            db_path,
        }
    }

    pub fn pipeline(&self) -> PipelineConfig {
        PipelineConfig {
            tolerance: self.tolerance,
            downscale: self.downscale,
            attention: self.attention,
        }
    }
}

fn parse_or<T>(lookup: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T
where
    T: FromStr + Copy,
{
    match lookup(key) {
        None => default,
        Some(raw) => raw.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %raw, "unparsable value; using default");
            default
        }),
    }
}

/// Like [`parse_or`], but also falls back when the parsed value fails `valid`.
fn parse_checked<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
    valid: impl Fn(&T) -> bool,
) -> T
where
    T: FromStr + Copy + std::fmt::Debug,
{
    let value = parse_or(lookup, key, default);
    if valid(&value) {
        value
    } else {
        tracing::warn!(key, value = ?value, "value out of range; using default");
        default
    }
}
