//! rollcall-models: ONNX implementations of the face extractors.
//!
//! SCRFD for detection, ArcFace for embeddings and a 468-point face mesh
//! for landmarks, all on CPU through ONNX Runtime.

pub mod alignment;
pub mod detector;
pub mod encoder;
pub mod mesh;
pub mod recognizer;

pub use detector::{Detection, DetectorError, FaceDetector};
pub use encoder::{EncoderError, FaceEncoder};
pub use mesh::{FaceMeshLandmarker, LandmarkError};
pub use recognizer::{FaceRecognizer, RecognizerError};

use rollcall_core::Frame;
use std::path::{Path, PathBuf};

pub const SCRFD_MODEL_FILE: &str = "det_10g.onnx";
pub const ARCFACE_MODEL_FILE: &str = "w600k_r50.onnx";
pub const FACE_MESH_MODEL_FILE: &str = "face_mesh.onnx";

/// `$XDG_DATA_HOME/rollcall`, falling back to `~/.local/share/rollcall`.
pub fn default_data_dir() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
            PathBuf::from(home).join(".local/share")
        })
        .join("rollcall")
}

pub fn default_model_dir() -> PathBuf {
    default_data_dir().join("models")
}

/// Locations of the three model files inside a model directory.
#[derive(Debug, Clone)]
pub struct ModelPaths {
    pub scrfd: PathBuf,
    pub arcface: PathBuf,
    pub face_mesh: PathBuf,
}

impl ModelPaths {
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            scrfd: dir.join(SCRFD_MODEL_FILE),
            arcface: dir.join(ARCFACE_MODEL_FILE),
            face_mesh: dir.join(FACE_MESH_MODEL_FILE),
        }
    }
}

/// Decode an image file into a grayscale frame.
pub fn load_image_frame(path: &Path) -> Result<Frame, image::ImageError> {
    let gray = image::open(path)?.into_luma8();
    let (width, height) = gray.dimensions();
    Ok(Frame::new(gray.into_raw(), width, height))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_model_paths_in_dir() {
        let paths = ModelPaths::in_dir(Path::new("/opt/models"));
        assert_eq!(paths.scrfd, PathBuf::from("/opt/models/det_10g.onnx"));
        assert_eq!(paths.face_mesh, PathBuf::from("/opt/models/face_mesh.onnx"));
    }

    #[test]
    fn test_load_image_frame_missing_file() {
        assert!(load_image_frame(Path::new("/nonexistent/face.png")).is_err());
    }
}
