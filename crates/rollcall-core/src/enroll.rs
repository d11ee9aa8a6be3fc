//! Single-image encoding for enrollment and the encode service.

use crate::extractor::EmbeddingExtractor;
use crate::frame::Frame;
use crate::types::Embedding;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EnrollError<E: std::error::Error + 'static> {
    #[error("No face detected")]
    NoFaceDetected,
    #[error("extractor failed: {0}")]
    Extractor(#[source] E),
}

/// Encode the first face found in `frame`.
///
/// Extractors report faces best-first, so with several faces in the image the
/// most confident one is enrolled.
pub fn encode_single<X: EmbeddingExtractor>(
    extractor: &mut X,
    frame: &Frame,
) -> Result<Embedding, EnrollError<X::Error>>
where
    X::Error: 'static,
{
    let faces = extractor.extract(frame).map_err(EnrollError::Extractor)?;
    let count = faces.len();
    let first = faces.into_iter().next().ok_or(EnrollError::NoFaceDetected)?;
    if count > 1 {
        tracing::warn!(faces = count, "several faces in enrollment image; using the first");
    }
    Ok(first.embedding)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DetectedFace, FaceBox};

    #[derive(Debug, Error)]
    #[error("model missing")]
    struct ModelMissing;

    struct Faces(Result<Vec<Vec<f32>>, ()>);

    impl EmbeddingExtractor for Faces {
        type Error = ModelMissing;
        fn extract(&mut self, _frame: &Frame) -> Result<Vec<DetectedFace>, ModelMissing> {
            let vectors = self.0.clone().map_err(|_| ModelMissing)?;
            Ok(vectors
                .into_iter()
                .map(|v| DetectedFace {
                    embedding: Embedding::new(v),
                    face_box: FaceBox::new(0, 1, 1, 0),
                })
                .collect())
        }
    }

    fn frame() -> Frame {
        Frame::new(vec![0; 4], 2, 2)
    }

    #[test]
    fn test_no_face_is_rejected() {
        let err = encode_single(&mut Faces(Ok(vec![])), &frame()).unwrap_err();
        assert!(matches!(err, EnrollError::NoFaceDetected));
        assert_eq!(err.to_string(), "No face detected");
    }

    #[test]
    fn test_first_face_is_used() {
        let mut x = Faces(Ok(vec![vec![1.0, 2.0], vec![3.0, 4.0]]));
        assert_eq!(encode_single(&mut x, &frame()).unwrap().values, vec![1.0, 2.0]);
    }

    #[test]
    fn test_extractor_error_propagates() {
        let err = encode_single(&mut Faces(Err(())), &frame()).unwrap_err();
        assert!(matches!(err, EnrollError::Extractor(_)));
    }
}
