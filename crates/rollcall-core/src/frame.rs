//! Grayscale frame buffer and bilinear resampling.

use crate::rescale::DownscaleFactor;

/// An 8-bit grayscale frame (row-major, `width * height` bytes).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32) -> Self {
        Self { data, width, height }
    }

    /// Bilinear sample at sub-pixel position `(x, y)`, clamped to the frame edges.
    pub fn sample(&self, x: f32, y: f32) -> f32 {
        sample_bilinear(&self.data, self.width as usize, self.height as usize, x, y)
    }

    /// Resize to `new_width` × `new_height` with pixel-center aligned bilinear sampling.
    pub fn resize(&self, new_width: u32, new_height: u32) -> Frame {
        let (w, h) = (new_width.max(1) as usize, new_height.max(1) as usize);
        let sx = self.width as f32 / w as f32;
        let sy = self.height as f32 / h as f32;

        let mut data = vec![0u8; w * h];
        for y in 0..h {
            let src_y = (y as f32 + 0.5) * sy - 0.5;
            for x in 0..w {
                let src_x = (x as f32 + 0.5) * sx - 0.5;
                data[y * w + x] = self.sample(src_x, src_y).round().clamp(0.0, 255.0) as u8;
            }
        }

        Frame::new(data, w as u32, h as u32)
    }

    /// Shrink by `factor` for cheaper detection. A factor of 1 returns a copy.
    pub fn downscale(&self, factor: DownscaleFactor) -> Frame {
        let s = factor.get();
        if s >= 1.0 {
            return self.clone();
        }
        let w = (self.width as f32 * s).round() as u32;
        let h = (self.height as f32 * s).round() as u32;
        self.resize(w, h)
    }
}

/// Bilinear sample of a grayscale buffer. Coordinates outside the buffer are clamped.
pub fn sample_bilinear(data: &[u8], width: usize, height: usize, x: f32, y: f32) -> f32 {
    if width == 0 || height == 0 || data.len() < width * height {
        return 0.0;
    }

    let x = x.clamp(0.0, (width - 1) as f32);
    let y = y.clamp(0.0, (height - 1) as f32);
    let x0 = x.floor() as usize;
    let y0 = y.floor() as usize;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let tl = data[y0 * width + x0] as f32;
    let tr = data[y0 * width + x1] as f32;
    let bl = data[y1 * width + x0] as f32;
    let br = data[y1 * width + x1] as f32;

    tl * (1.0 - fx) * (1.0 - fy) + tr * fx * (1.0 - fy) + bl * (1.0 - fx) * fy + br * fx * fy
}
