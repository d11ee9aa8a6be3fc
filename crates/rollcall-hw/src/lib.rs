//! rollcall-hw: video capture as a pipeline frame source.
//!
//! A V4L2 device by path, or an MJPEG stream by `http(s)://` URL.

pub mod camera;
pub mod frame;
pub mod stream;

pub use camera::{Camera, CameraError, DeviceInfo, PixelFormat};
pub use stream::{is_stream_locator, MjpegStream, StreamError};
