use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Identifier of an enrolled identity (the `students.id` primary key).
pub type IdentityId = i64;

/// Display name reported for faces that match no enrolled identity.
pub const UNKNOWN_NAME: &str = "Unknown";

#[derive(Error, Debug, PartialEq, Eq)]
pub enum EmbeddingError {
    #[error("encoding byte length {0} is not a multiple of 8")]
    InvalidLength(usize),
    #[error("encoding is empty")]
    Empty,
}

/// Face embedding vector (fixed dimensionality within one roster).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Compute Euclidean distance between two embeddings.
    ///
    /// Callers are expected to compare equal-dimension vectors; extra
    /// trailing components of the longer vector are ignored.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        self.values
            .iter()
            .zip(other.values.iter())
            .map(|(a, b)| (a - b).powi(2))
            .sum::<f32>()
            .sqrt()
    }

    /// Decode the stored wire format: little-endian IEEE-754 `f64` values.
    pub fn from_f64_le_bytes(bytes: &[u8]) -> Result<Self, EmbeddingError> {
        if bytes.is_empty() {
            return Err(EmbeddingError::Empty);
        }
        if bytes.len() % 8 != 0 {
            return Err(EmbeddingError::InvalidLength(bytes.len()));
        }
        let values = bytes
            .chunks_exact(8)
            .map(|chunk| {
                let mut raw = [0u8; 8];
                raw.copy_from_slice(chunk);
                f64::from_le_bytes(raw) as f32
            })
            .collect();
        Ok(Self { values })
    }

    /// Encode as little-endian `f64` values, the format read by [`from_f64_le_bytes`](Self::from_f64_le_bytes).
    pub fn to_f64_le_bytes(&self) -> Vec<u8> {
        self.values
            .iter()
            .flat_map(|&v| (v as f64).to_le_bytes())
            .collect()
    }
}

/// Face bounding box in pixel coordinates, `(top, right, bottom, left)` order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaceBox {
    pub top: i32,
    pub right: i32,
    pub bottom: i32,
    pub left: i32,
}

impl FaceBox {
    pub fn new(top: i32, right: i32, bottom: i32, left: i32) -> Self {
        Self { top, right, bottom, left }
    }

    pub fn width(&self) -> i32 {
        self.right - self.left
    }

    pub fn height(&self) -> i32 {
        self.bottom - self.top
    }
}

/// One face found by the embedding extractor in a single frame.
#[derive(Debug, Clone)]
pub struct DetectedFace {
    pub embedding: Embedding,
    /// Box in the coordinate space of the image handed to the extractor.
    pub face_box: FaceBox,
}

/// 2D point, either in pixels or normalized to `[0, 1]` of the frame.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point2 {
    pub x: f32,
    pub y: f32,
}

impl Point2 {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point2) -> f32 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }

    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

/// Landmark set for one face in face-mesh topology (468 points).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FaceLandmarks {
    pub points: Vec<Point2>,
    /// True when points are fractions of frame width/height rather than pixels.
    pub normalized: bool,
}

impl FaceLandmarks {
    pub fn get(&self, index: usize) -> Option<Point2> {
        self.points.get(index).copied()
    }

    /// Point `index` in pixel coordinates of a `width` × `height` frame.
    pub fn pixel(&self, index: usize, width: u32, height: u32) -> Option<Point2> {
        let p = self.get(index)?;
        if self.normalized {
            Some(Point2::new(p.x * width as f32, p.y * height as f32))
        } else {
            Some(p)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_euclidean_distance_345() {
        let a = Embedding::new(vec![0.0, 0.0]);
        let b = Embedding::new(vec![3.0, 4.0]);
        assert!((a.euclidean_distance(&b) - 5.0).abs() < 1e-6);
    }

    #[test]
    fn test_euclidean_distance_identical() {
        let a = Embedding::new(vec![0.25, -0.5, 1.0]);
        assert_eq!(a.euclidean_distance(&a.clone()), 0.0);
    }

    #[test]
    fn test_f64_bytes_decode() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0.5f64.to_le_bytes());
        bytes.extend_from_slice(&(-1.25f64).to_le_bytes());
        let e = Embedding::from_f64_le_bytes(&bytes).unwrap();
        assert_eq!(e.values, vec![0.5, -1.25]);
        assert_eq!(e.to_f64_le_bytes(), bytes);
    }

    #[test]
    fn test_f64_bytes_rejects_partial_value() {
        assert_eq!(
            Embedding::from_f64_le_bytes(&[0u8; 12]),
            Err(EmbeddingError::InvalidLength(12))
        );
        assert_eq!(Embedding::from_f64_le_bytes(&[]), Err(EmbeddingError::Empty));
    }

    #[test]
    fn test_landmark_pixel_denormalizes() {
        let lm = FaceLandmarks {
            points: vec![Point2::new(0.5, 0.25)],
            normalized: true,
        };
        assert_eq!(lm.pixel(0, 640, 480), Some(Point2::new(320.0, 120.0)));
        assert_eq!(lm.pixel(1, 640, 480), None);
    }

    #[test]
    fn test_face_box_dimensions() {
        let b = FaceBox::new(10, 50, 40, 20);
        assert_eq!(b.width(), 30);
        assert_eq!(b.height(), 30);
    }
}
