//! Face alignment via 4-DOF similarity transform.
//!
//! Warps a detected face onto the canonical 112×112 ArcFace crop using the
//! five InsightFace reference landmarks and a least-squares fit.

use rollcall_core::linalg;
use rollcall_core::Frame;

/// ArcFace reference landmarks for a 112×112 output.
const REFERENCE_LANDMARKS_112: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

pub const ALIGNED_SIZE: usize = 112;

/// `[a, -b, tx, b, a, ty]`, the row-major 2×3 matrix mapping source to destination.
type Similarity = [f32; 6];

/// Least-squares similarity transform from `src` onto `dst`.
///
/// Returns `None` when the landmarks are degenerate (all coincident).
fn estimate_similarity_transform(
    src: &[(f32, f32); 5],
    dst: &[(f32, f32); 5],
) -> Option<Similarity> {
    // Per pair: sx·a − sy·b + tx = dx and sy·a + sx·b + ty = dy.
    let mut ata = [[0.0f64; 4]; 4];
    let mut atb = [0.0f64; 4];

    for (&(sx, sy), &(dx, dy)) in src.iter().zip(dst.iter()) {
        let (sx, sy, dx, dy) = (sx as f64, sy as f64, dx as f64, dy as f64);
        let r1 = [sx, -sy, 1.0, 0.0];
        let r2 = [sy, sx, 0.0, 1.0];
        for j in 0..4 {
            for k in 0..4 {
                ata[j][k] += r1[j] * r1[k] + r2[j] * r2[k];
            }
            atb[j] += r1[j] * dx + r2[j] * dy;
        }
    }

    let [a, b, tx, ty] = linalg::solve(&ata, &atb)?;
    Some([a as f32, -b as f32, tx as f32, b as f32, a as f32, ty as f32])
}

/// Inverse-map every output pixel through `m` and sample the source bilinearly.
/// Pixels falling outside the source are black.
fn warp_affine(frame: &Frame, m: &Similarity, out_size: usize) -> Vec<u8> {
    let (a, b, tx, ty) = (m[0], m[3], m[2], m[5]);
    let det = a * a + b * b;
    let mut output = vec![0u8; out_size * out_size];
    if det < 1e-12 {
        return output;
    }
    let ia = a / det;
    let ib = b / det;
    let (w, h) = (frame.width as f32, frame.height as f32);

    for oy in 0..out_size {
        for ox in 0..out_size {
            let dx = ox as f32 - tx;
            let dy = oy as f32 - ty;
            let sx = ia * dx + ib * dy;
            let sy = -ib * dx + ia * dy;
            if sx < -1.0 || sy < -1.0 || sx > w || sy > h {
                continue;
            }
            output[oy * out_size + ox] = frame.sample(sx, sy).round().clamp(0.0, 255.0) as u8;
        }
    }
    output
}

/// Canonical 112×112 crop of the face whose five keypoints are `landmarks`.
pub fn align_face(frame: &Frame, landmarks: &[(f32, f32); 5]) -> Option<Vec<u8>> {
    let m = estimate_similarity_transform(landmarks, &REFERENCE_LANDMARKS_112)?;
    Some(warp_affine(frame, &m, ALIGNED_SIZE))
}
