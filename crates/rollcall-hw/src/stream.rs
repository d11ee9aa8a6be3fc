//! MJPEG-over-HTTP frame source, as served by phone "IP webcam" apps.
//!
//! Frames are cut out of the response body by their JPEG start/end markers,
//! so both `multipart/x-mixed-replace` and bare concatenated JPEG streams work.
//! Reads block on the runtime handle and must come from a non-runtime thread.

use reqwest::{Client, Response};
use rollcall_core::{Frame, FrameSource};
use std::time::Duration;
use thiserror::Error;
use tokio::runtime::Handle;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Longest wait for the next body chunk before the stream counts as stalled.
const READ_TIMEOUT: Duration = Duration::from_secs(5);
/// Buffered bytes without a complete JPEG before the buffer is discarded.
const MAX_BUFFERED: usize = 8 * 1024 * 1024;

const SOI: [u8; 2] = [0xFF, 0xD8];
const EOI: [u8; 2] = [0xFF, 0xD9];

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    #[error("video stream replied {0}")]
    Status(reqwest::StatusCode),
    #[error("no data for {0:?}")]
    Stalled(Duration),
    #[error("video stream ended")]
    Ended,
    #[error("no complete JPEG within {0} bytes")]
    Overflow(usize),
    #[error("jpeg decode: {0}")]
    Decode(#[from] image::ImageError),
}

/// Whether a video source locator names a network stream rather than a device.
pub fn is_stream_locator(locator: &str) -> bool {
    locator.starts_with("http://") || locator.starts_with("https://")
}

/// Network MJPEG stream. A dropped connection is reopened on the next read.
pub struct MjpegStream {
    url: String,
    client: Client,
    runtime: Handle,
    response: Option<Response>,
    buffer: Vec<u8>,
}

impl MjpegStream {
    /// Open the stream, failing if the first request does not succeed.
    pub fn connect(url: &str, runtime: Handle) -> Result<Self, StreamError> {
        let client = Client::builder().connect_timeout(CONNECT_TIMEOUT).build()?;
        let mut stream = Self {
            url: url.to_string(),
            client,
            runtime,
            response: None,
            buffer: Vec::new(),
        };
        stream.open()?;
        Ok(stream)
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn open(&mut self) -> Result<(), StreamError> {
        let response = self.runtime.block_on(self.client.get(&self.url).send())?;
        let status = response.status();
        if !status.is_success() {
            return Err(StreamError::Status(status));
        }
        tracing::info!(url = %self.url, "video stream connected");
        self.response = Some(response);
        Ok(())
    }

    /// Read one more body chunk into the buffer.
    fn fill(&mut self) -> Result<(), StreamError> {
        if self.response.is_none() {
            self.open()?;
        }
        let runtime = self.runtime.clone();
        let Some(response) = self.response.as_mut() else {
            return Err(StreamError::Ended);
        };
        let chunk = runtime
            .block_on(async { tokio::time::timeout(READ_TIMEOUT, response.chunk()).await })
            .map_err(|_| StreamError::Stalled(READ_TIMEOUT))??;
        match chunk {
            Some(bytes) => {
                self.buffer.extend_from_slice(&bytes);
                Ok(())
            }
            None => Err(StreamError::Ended),
        }
    }

    /// The next complete JPEG image in the stream.
    pub fn next_jpeg(&mut self) -> Result<Vec<u8>, StreamError> {
        loop {
            if let Some(jpeg) = take_jpeg(&mut self.buffer) {
                return Ok(jpeg);
            }
            if self.buffer.len() > MAX_BUFFERED {
                let buffered = self.buffer.len();
                self.buffer.clear();
                return Err(StreamError::Overflow(buffered));
            }
            if let Err(e) = self.fill() {
                self.response = None;
                self.buffer.clear();
                return Err(e);
            }
        }
    }
}

impl FrameSource for MjpegStream {
    type Error = StreamError;

    fn next_frame(&mut self) -> Result<Frame, StreamError> {
        let jpeg = self.next_jpeg()?;
        Ok(decode_jpeg(&jpeg)?)
    }
}

/// Decode a JPEG into an 8-bit grayscale frame.
pub fn decode_jpeg(jpeg: &[u8]) -> Result<Frame, image::ImageError> {
    let gray = image::load_from_memory_with_format(jpeg, image::ImageFormat::Jpeg)?.into_luma8();
    let (width, height) = gray.dimensions();
    Ok(Frame::new(gray.into_raw(), width, height))
}

fn find_marker(haystack: &[u8], marker: &[u8; 2], from: usize) -> Option<usize> {
    haystack
        .get(from..)?
        .windows(2)
        .position(|w| w == marker)
        .map(|p| p + from)
}

/// Remove and return the first complete SOI..EOI image from `buffer`.
///
/// Bytes before the start marker (multipart headers, boundaries) are dropped.
fn take_jpeg(buffer: &mut Vec<u8>) -> Option<Vec<u8>> {
    let Some(start) = find_marker(buffer, &SOI, 0) else {
        // A trailing 0xFF may be the first half of the next start marker.
        let keep = usize::from(buffer.last() == Some(&0xFF));
        let cut = buffer.len() - keep;
        buffer.drain(..cut);
        return None;
    };
    buffer.drain(..start);

    let end = find_marker(buffer, &EOI, SOI.len())? + EOI.len();
    let jpeg: Vec<u8> = buffer.drain(..end).collect();
    Some(jpeg)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn jpeg(value: u8) -> Vec<u8> {
        let img = image::GrayImage::from_pixel(16, 8, image::Luma([value]));
        let mut out = std::io::Cursor::new(Vec::new());
        img.write_to(&mut out, image::ImageFormat::Jpeg).unwrap();
        out.into_inner()
    }

    fn multipart(values: &[u8]) -> Vec<u8> {
        let mut body = Vec::new();
        for &v in values {
            let part = jpeg(v);
            body.extend_from_slice(
                format!("--frame\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n", part.len()).as_bytes(),
            );
            body.extend_from_slice(&part);
            body.extend_from_slice(b"\r\n");
        }
        body
    }

    fn mean(frame: &Frame) -> f32 {
        frame.data.iter().map(|&p| p as f32).sum::<f32>() / frame.data.len() as f32
    }

    #[test]
    fn test_stream_locator() {
        assert!(is_stream_locator("http://10.0.0.5:8080/video"));
        assert!(is_stream_locator("https://cam.local/video"));
        assert!(!is_stream_locator("/dev/video0"));
    }

    #[test]
    fn test_take_jpeg_skips_headers() {
        let mut buffer = b"--frame\r\n\r\n".to_vec();
        buffer.extend_from_slice(&[0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]);
        buffer.extend_from_slice(b"\r\n--frame\r\n");
        buffer.extend_from_slice(&[0xFF, 0xD8, 9]);

        assert_eq!(take_jpeg(&mut buffer), Some(vec![0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9]));
        // Second image is still incomplete.
        assert_eq!(take_jpeg(&mut buffer), None);
        assert_eq!(buffer, vec![0xFF, 0xD8, 9]);
        buffer.extend_from_slice(&[0xFF, 0xD9]);
        assert_eq!(take_jpeg(&mut buffer), Some(vec![0xFF, 0xD8, 9, 0xFF, 0xD9]));
    }

    #[test]
    fn test_take_jpeg_keeps_split_marker() {
        let mut buffer = b"headers".to_vec();
        buffer.push(0xFF);
        assert_eq!(take_jpeg(&mut buffer), None);
        assert_eq!(buffer, vec![0xFF]);
        buffer.extend_from_slice(&[0xD8, 7, 0xFF, 0xD9]);
        assert_eq!(take_jpeg(&mut buffer), Some(vec![0xFF, 0xD8, 7, 0xFF, 0xD9]));
    }

    #[test]
    fn test_decode_jpeg_to_grayscale() {
        let frame = decode_jpeg(&jpeg(120)).unwrap();
        assert_eq!((frame.width, frame.height), (16, 8));
        assert!((mean(&frame) - 120.0).abs() < 3.0);
        assert!(decode_jpeg(&[0xFF, 0xD8, 0xFF, 0xD9]).is_err());
    }

    #[test]
    fn test_reads_frames_and_reconnects() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .and(path("/video"))
                .respond_with(
                    ResponseTemplate::new(200)
                        .set_body_raw(multipart(&[40, 200]), "multipart/x-mixed-replace; boundary=frame"),
                )
                .mount(&server)
                .await;
            server
        });

        let url = format!("{}/video", server.uri());
        let mut stream = MjpegStream::connect(&url, rt.handle().clone()).unwrap();

        let first = stream.next_frame().unwrap();
        assert_eq!((first.width, first.height), (16, 8));
        assert!((mean(&first) - 40.0).abs() < 3.0);
        let second = stream.next_frame().unwrap();
        assert!((mean(&second) - 200.0).abs() < 3.0);

        // Body exhausted: the read fails, the next one reconnects.
        assert!(matches!(stream.next_frame(), Err(StreamError::Ended)));
        let again = stream.next_frame().unwrap();
        assert!((mean(&again) - 40.0).abs() < 3.0);
    }

    #[test]
    fn test_connect_rejects_error_status() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let server = rt.block_on(async {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(404))
                .mount(&server)
                .await;
            server
        });

        let result = MjpegStream::connect(&format!("{}/video", server.uri()), rt.handle().clone());
        assert!(matches!(result, Err(StreamError::Status(s)) if s.as_u16() == 404));
    }
}
