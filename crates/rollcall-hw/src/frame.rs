//! Raw buffer conversion to 8-bit grayscale and dark-frame detection.

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum FrameError {
    #[error("{format} buffer too short: expected {expected}, got {actual}")]
    TooShort {
        format: &'static str,
        expected: usize,
        actual: usize,
    },
}

/// Extract the Y channel of packed YUYV 4:2:2 (`[Y0, U, Y1, V]` per two pixels).
pub fn yuyv_to_grayscale(yuyv: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if yuyv.len() < expected {
        return Err(FrameError::TooShort {
            format: "YUYV",
            expected,
            actual: yuyv.len(),
        });
    }
    Ok(yuyv[..expected].iter().step_by(2).copied().collect())
}

/// Keep the high byte of 16-bit little-endian samples.
pub fn y16_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height * 2) as usize;
    if buf.len() < expected {
        return Err(FrameError::TooShort {
            format: "Y16",
            expected,
            actual: buf.len(),
        });
    }
    Ok(buf[..expected].chunks_exact(2).map(|px| px[1]).collect())
}

pub fn grey_to_grayscale(buf: &[u8], width: u32, height: u32) -> Result<Vec<u8>, FrameError> {
    let expected = (width * height) as usize;
    if buf.len() < expected {
        return Err(FrameError::TooShort {
            format: "GREY",
            expected,
            actual: buf.len(),
        });
    }
    Ok(buf[..expected].to_vec())
}

/// True when more than `threshold_pct` of pixels are below 32.
pub fn is_dark_frame(gray: &[u8], threshold_pct: f32) -> bool {
    if gray.is_empty() {
        return true;
    }
    let dark = gray.iter().filter(|&&p| p < 32).count();
    (dark as f32 / gray.len() as f32) > threshold_pct
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_yuyv_to_grayscale_4x2() {
        let yuyv: Vec<u8> = (0..16).collect();
        assert_eq!(
            yuyv_to_grayscale(&yuyv, 4, 2).unwrap(),
            vec![0, 2, 4, 6, 8, 10, 12, 14]
        );
    }

    #[test]
    fn test_yuyv_too_short() {
        assert_eq!(
            yuyv_to_grayscale(&[100, 128], 2, 1),
            Err(FrameError::TooShort { format: "YUYV", expected: 4, actual: 2 })
        );
    }

    #[test]
    fn test_y16_keeps_high_byte() {
        let buf = [0x34, 0x12, 0xff, 0x80];
        assert_eq!(y16_to_grayscale(&buf, 2, 1).unwrap(), vec![0x12, 0x80]);
    }

    #[test]
    fn test_grey_truncates_padding() {
        assert_eq!(grey_to_grayscale(&[1, 2, 3, 4, 5], 2, 2).unwrap(), vec![1, 2, 3, 4]);
        assert!(grey_to_grayscale(&[1, 2], 2, 2).is_err());
    }

    #[test]
    fn test_dark_frame_threshold() {
        assert!(is_dark_frame(&[0u8; 1000], 0.95));
        assert!(is_dark_frame(&[], 0.95));
        assert!(!is_dark_frame(&[128u8; 1000], 0.95));

        let mut mostly_dark = vec![10u8; 960];
        mostly_dark.extend([128u8; 40]);
        assert!(is_dark_frame(&mostly_dark, 0.95));

        let mut borderline = vec![10u8; 940];
        borderline.extend([128u8; 60]);
        assert!(!is_dark_frame(&borderline, 0.95));
    }
}
