//! Single-image encoding, once from the command line or as an HTTP service.
//!
//! `POST /encode {"image_path": "..."}` answers `{"encoding": "<base64>"}`, where
//! the payload is the embedding as little-endian `f64` bytes, or
//! `{"error": "..."}` with a 4xx/5xx status.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rollcall_core::enroll::{encode_single, EnrollError};
use rollcall_core::EmbeddingExtractor;
use serde::Deserialize;
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

#[derive(Debug, Clone, PartialEq)]
pub enum EncodeFailure {
    Unreadable(String),
    NoFace,
    Extractor(String),
}

impl EncodeFailure {
    pub fn status(&self) -> StatusCode {
        match self {
            EncodeFailure::Unreadable(_) => StatusCode::NOT_FOUND,
            EncodeFailure::NoFace => StatusCode::BAD_REQUEST,
            EncodeFailure::Extractor(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn message(&self) -> String {
        match self {
            EncodeFailure::Unreadable(e) => format!("Could not read image: {e}"),
            EncodeFailure::NoFace => "No face detected".to_string(),
            EncodeFailure::Extractor(e) => format!("Encoding failed: {e}"),
        }
    }
}

/// Base64 of the first face's embedding in the image at `path`.
pub fn encode_image<X: EmbeddingExtractor>(
    extractor: &mut X,
    path: &Path,
) -> Result<String, EncodeFailure>
where
    X::Error: 'static,
{
    let frame = rollcall_models::load_image_frame(path)
        .map_err(|e| EncodeFailure::Unreadable(e.to_string()))?;
    let embedding = encode_single(extractor, &frame).map_err(|e| match e {
        EnrollError::NoFaceDetected => EncodeFailure::NoFace,
        EnrollError::Extractor(e) => EncodeFailure::Extractor(e.to_string()),
    })?;
    Ok(STANDARD.encode(embedding.to_f64_le_bytes()))
}

pub fn response_body(result: &Result<String, EncodeFailure>) -> (StatusCode, Value) {
    match result {
        Ok(encoding) => (StatusCode::OK, json!({ "encoding": encoding })),
        Err(e) => (e.status(), json!({ "error": e.message() })),
    }
}

#[derive(Debug, Deserialize)]
struct EncodeRequest {
    image_path: String,
}

type SharedExtractor<X> = Arc<Mutex<X>>;

async fn encode_handler<X>(
    State(extractor): State<SharedExtractor<X>>,
    Json(req): Json<EncodeRequest>,
) -> (StatusCode, Json<Value>)
where
    X: EmbeddingExtractor + Send + 'static,
    X::Error: 'static,
{
    let path = req.image_path;
    let result = tokio::task::spawn_blocking(move || {
        let mut guard = extractor
            .lock()
            .map_err(|_| EncodeFailure::Extractor("encoder lock poisoned".into()))?;
        encode_image(&mut *guard, Path::new(&path))
    })
    .await
    .unwrap_or_else(|e| Err(EncodeFailure::Extractor(e.to_string())));

    if let Err(e) = &result {
        tracing::warn!(error = %e.message(), "encode request failed");
    }
    let (status, body) = response_body(&result);
    (status, Json(body))
}

pub fn router<X>(extractor: X) -> Router
where
    X: EmbeddingExtractor + Send + 'static,
    X::Error: 'static,
{
    Router::new()
        .route("/encode", post(encode_handler::<X>))
        .with_state(Arc::new(Mutex::new(extractor)))
}

pub async fn serve<X>(extractor: X, addr: SocketAddr) -> anyhow::Result<()>
where
    X: EmbeddingExtractor + Send + 'static,
    X::Error: 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "encode service listening");
    axum::serve(listener, router(extractor)).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rollcall_core::{DetectedFace, Embedding, FaceBox, Frame};
    use std::path::PathBuf;
    use tempfile::TempDir;

    #[derive(Debug, thiserror::Error)]
    #[error("unused")]
    struct Never;

    /// Finds one face in bright images and none in dark ones.
    struct BrightnessExtractor;

    impl EmbeddingExtractor for BrightnessExtractor {
        type Error = Never;
        fn extract(&mut self, frame: &Frame) -> Result<Vec<DetectedFace>, Never> {
            let mean = frame.data.iter().map(|&p| p as f32).sum::<f32>() / frame.data.len() as f32;
            if mean < 128.0 {
                return Ok(vec![]);
            }
            Ok(vec![DetectedFace {
                embedding: Embedding::new(vec![1.0, -0.5]),
                face_box: FaceBox::new(0, 4, 4, 0),
            }])
        }
    }

    fn write_image(dir: &TempDir, name: &str, value: u8) -> PathBuf {
        let path = dir.path().join(name);
        image::GrayImage::from_pixel(8, 8, image::Luma([value]))
            .save(&path)
            .unwrap();
        path
    }

    #[test]
    fn test_encode_image_base64_f64() {
        let dir = tempfile::tempdir().unwrap();
        let path = write_image(&dir, "bright.png", 220);
        let encoded = encode_image(&mut BrightnessExtractor, &path).unwrap();
        let bytes = STANDARD.decode(encoded).unwrap();
        assert_eq!(Embedding::from_f64_le_bytes(&bytes).unwrap().values, vec![1.0, -0.5]);
    }

    #[test]
    fn test_encode_image_failures() {
        let dir = tempfile::tempdir().unwrap();
        let dark = write_image(&dir, "dark.png", 10);
        assert_eq!(encode_image(&mut BrightnessExtractor, &dark), Err(EncodeFailure::NoFace));
        assert!(matches!(
            encode_image(&mut BrightnessExtractor, &dir.path().join("missing.png")),
            Err(EncodeFailure::Unreadable(_))
        ));
    }

    #[test]
    fn test_response_body() {
        let (status, body) = response_body(&Err(EncodeFailure::NoFace));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body, json!({"error": "No face detected"}));
        let (status, body) = response_body(&Ok("AAAA".into()));
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"encoding": "AAAA"}));
    }

    #[tokio::test]
    async fn test_service_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let bright = write_image(&dir, "bright.png", 220);
        let dark = write_image(&dir, "dark.png", 10);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(BrightnessExtractor)).await.unwrap();
        });

        let client = reqwest::Client::new();
        let url = format!("http://{addr}/encode");

        let ok = client
            .post(&url)
            .json(&json!({"image_path": bright}))
            .send()
            .await
            .unwrap();
        assert_eq!(ok.status().as_u16(), 200);
        let body: Value = ok.json().await.unwrap();
        assert!(body["encoding"].is_string());

        let none = client
            .post(&url)
            .json(&json!({"image_path": dark}))
            .send()
            .await
            .unwrap();
        assert_eq!(none.status().as_u16(), 400);
        let body: Value = none.json().await.unwrap();
        assert_eq!(body, json!({"error": "No face detected"}));
    }
}
