use crate::detector::{DetectorError, FaceDetector};
use crate::recognizer::{FaceRecognizer, RecognizerError, ARCFACE_EMBEDDING_DIM};
use rollcall_core::{DetectedFace, EmbeddingExtractor, Frame};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EncoderError {
    #[error("detector: {0}")]
    Detector(#[from] DetectorError),
    #[error("recognizer: {0}")]
    Recognizer(#[from] RecognizerError),
}

/// SCRFD detection followed by ArcFace embedding of every face found.
pub struct FaceEncoder {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
}

impl FaceEncoder {
    pub fn load(scrfd_path: &Path, arcface_path: &Path) -> Result<Self, EncoderError> {
        let detector = FaceDetector::load(scrfd_path)?;
        let recognizer = FaceRecognizer::load(arcface_path)?;
        Ok(Self { detector, recognizer })
    }
}

impl EmbeddingExtractor for FaceEncoder {
    type Error = EncoderError;

    fn extract(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, EncoderError> {
        let detections = self.detector.detect(frame)?;

        let mut faces = Vec::with_capacity(detections.len());
        for det in &detections {
            let embedding = match self.recognizer.embed(frame, det) {
                Ok(e) => e,
                Err(RecognizerError::NoLandmarks | RecognizerError::DegenerateLandmarks) => {
                    tracing::debug!(confidence = det.confidence, "skipping face without usable keypoints");
                    continue;
                }
                Err(e) => return Err(e.into()),
            };
            faces.push(DetectedFace {
                embedding,
                face_box: det.face_box(frame.width, frame.height),
            });
        }
        Ok(faces)
    }

    fn dimension(&self) -> Option<usize> {
        Some(ARCFACE_EMBEDDING_DIM)
    }
}
