//! 468-point face-mesh landmarks via ONNX Runtime.
//!
//! Faces are found with SCRFD; each of the most confident `max_faces` boxes
//! is expanded to a square crop, resampled to the 192×192 mesh input and the
//! predicted points are mapped back to frame-normalized coordinates.

use crate::detector::{Detection, DetectorError, FaceDetector};
use ndarray::Array4;
use ort::session::Session;
use ort::value::TensorRef;
use rollcall_core::{FaceLandmarks, Frame, LandmarkExtractor, Point2};
use std::path::Path;
use thiserror::Error;

const MESH_INPUT_SIZE: usize = 192;
pub const MESH_POINTS: usize = 468;
/// Crop side relative to the larger side of the detection box.
const CROP_EXPANSION: f32 = 1.5;
pub const DEFAULT_MAX_FACES: usize = 3;

#[derive(Error, Debug)]
pub enum LandmarkError {
    #[error("model file not found: {0}")]
    ModelNotFound(String),
    #[error("inference failed: {0}")]
    InferenceFailed(String),
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("ort: {0}")]
    Ort(#[from] ort::Error),
}

/// Square crop in frame pixels.
#[derive(Debug, Clone, Copy, PartialEq)]
struct CropRegion {
    x0: f32,
    y0: f32,
    side: f32,
}

impl CropRegion {
    fn around(det: &Detection) -> Self {
        let side = det.width.max(det.height) * CROP_EXPANSION;
        let cx = det.x + det.width / 2.0;
        let cy = det.y + det.height / 2.0;
        Self {
            x0: cx - side / 2.0,
            y0: cy - side / 2.0,
            side,
        }
    }
}

pub struct FaceMeshLandmarker {
    detector: FaceDetector,
    session: Session,
    output_count: usize,
    max_faces: usize,
}

impl FaceMeshLandmarker {
    pub fn load(scrfd_path: &Path, mesh_path: &Path, max_faces: usize) -> Result<Self, LandmarkError> {
        let detector = FaceDetector::load(scrfd_path)?;
        if !mesh_path.exists() {
            return Err(LandmarkError::ModelNotFound(mesh_path.display().to_string()));
        }

        let session = Session::builder()?
            .with_intra_threads(2)?
            .commit_from_file(mesh_path)?;
        let output_count = session.outputs().len();

        tracing::info!(
            path = %mesh_path.display(),
            outputs = ?session.outputs().iter().map(|o| o.name()).collect::<Vec<_>>(),
            max_faces,
            "loaded face-mesh model"
        );

        Ok(Self {
            detector,
            session,
            output_count,
            max_faces: max_faces.max(1),
        })
    }

    fn mesh_for(&mut self, frame: &Frame, region: CropRegion) -> Result<FaceLandmarks, LandmarkError> {
        let input = crop_tensor(frame, region);
        let outputs = self
            .session
            .run(ort::inputs![TensorRef::from_array_view(input.view())?])?;

        // The landmark tensor is the one carrying 468 × (x, y, z).
        for i in 0..self.output_count {
            let Ok((_, raw)) = outputs[i].try_extract_tensor::<f32>() else {
                continue;
            };
            if raw.len() == MESH_POINTS * 3 {
                return Ok(to_frame_normalized(raw, region, frame.width, frame.height));
            }
        }
        Err(LandmarkError::InferenceFailed(format!(
            "no output with {} values",
            MESH_POINTS * 3
        )))
    }
}

impl LandmarkExtractor for FaceMeshLandmarker {
    type Error = LandmarkError;

    fn landmarks(&mut self, frame: &Frame) -> Result<Vec<FaceLandmarks>, LandmarkError> {
        let mut detections = self.detector.detect(frame)?;
        detections.truncate(self.max_faces);

        detections
            .iter()
            .map(|det| self.mesh_for(frame, CropRegion::around(det)))
            .collect()
    }
}

/// Resample `region` to a 192×192 NHWC tensor in `[0, 1]`, gray replicated to RGB.
fn crop_tensor(frame: &Frame, region: CropRegion) -> Array4<f32> {
    let n = MESH_INPUT_SIZE;
    let step = region.side / n as f32;
    let mut tensor = Array4::<f32>::zeros((1, n, n, 3));
    for y in 0..n {
        let sy = region.y0 + (y as f32 + 0.5) * step - 0.5;
        for x in 0..n {
            let sx = region.x0 + (x as f32 + 0.5) * step - 0.5;
            let v = frame.sample(sx, sy) / 255.0;
            for c in 0..3 {
                tensor[[0, y, x, c]] = v;
            }
        }
    }
    tensor
}

/// Map mesh output (crop pixels, stride 3) to fractions of the frame size.
fn to_frame_normalized(raw: &[f32], region: CropRegion, width: u32, height: u32) -> FaceLandmarks {
    let k = region.side / MESH_INPUT_SIZE as f32;
    let points = raw
        .chunks_exact(3)
        .take(MESH_POINTS)
        .map(|p| {
            Point2::new(
                (region.x0 + p[0] * k) / width as f32,
                (region.y0 + p[1] * k) / height as f32,
            )
        })
        .collect();
    FaceLandmarks {
        points,
        normalized: true,
    }
}
