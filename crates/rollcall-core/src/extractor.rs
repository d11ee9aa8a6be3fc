//! Seams to the external vision models.

use crate::frame::Frame;
use crate::types::{DetectedFace, FaceLandmarks};

/// Finds faces in a frame and computes one embedding per face.
///
/// Boxes are reported in the coordinate space of the frame passed in.
pub trait EmbeddingExtractor {
    type Error: std::error::Error;

    fn extract(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, Self::Error>;

    /// Length of every embedding this extractor produces, when fixed.
    fn dimension(&self) -> Option<usize> {
        None
    }
}

/// Produces face-mesh landmark sets (468 points) for the faces in a frame.
pub trait LandmarkExtractor {
    type Error: std::error::Error;

    fn landmarks(&mut self, frame: &Frame) -> Result<Vec<FaceLandmarks>, Self::Error>;
}
