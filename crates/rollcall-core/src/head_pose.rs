//! Head pose (pitch/yaw/roll) from six facial landmarks.
//!
//! Solves the perspective-n-point problem between a generic 3D face model
//! and the detected 2D landmarks with Levenberg–Marquardt over an
//! axis-angle rotation and translation, then decomposes the rotation
//! into Euler angles.

use crate::linalg::{self, euler_angles_deg, mat_vec, rodrigues};
use crate::types::Point2;
use thiserror::Error;

/// Generic face model in camera axes (x right, y down, z away from the camera).
///
/// Order: nose tip, chin, image-left eye outer corner, image-right eye outer
/// corner, image-left mouth corner, image-right mouth corner. A face looking
/// straight into the camera solves to a rotation close to identity.
pub const MODEL_POINTS: [[f64; 3]; 6] = [
    [0.0, 0.0, 0.0],
    [0.0, 330.0, 65.0],
    [-225.0, -170.0, 135.0],
    [225.0, -170.0, 135.0],
    [-150.0, 150.0, 125.0],
    [150.0, 150.0, 125.0],
];

/// Distance between the two model eye corners, used to seed the depth estimate.
const MODEL_EYE_SPAN: f64 = 450.0;

const MAX_ITERATIONS: usize = 100;
const INITIAL_DAMPING: f64 = 1e-3;
const MAX_DAMPING: f64 = 1e10;
const FD_STEP: f64 = 1e-6;
/// Smallest accepted ratio between the minor and major spread of the 2D points.
const MIN_SPREAD_RATIO: f64 = 1e-4;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum PoseError {
    #[error("frame size {0}x{1} is not usable for camera intrinsics")]
    InvalidFrame(u32, u32),
    #[error("landmark coordinates are not finite")]
    NonFinite,
    #[error("landmarks are degenerate (coincident or collinear)")]
    Degenerate,
    #[error("normal equations are singular")]
    Singular,
    #[error("solver did not converge within {0} iterations")]
    NotConverged(usize),
    #[error("solution places the face behind the camera")]
    BehindCamera,
}

/// Estimated head orientation in degrees.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct HeadPose {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
    /// Root-mean-square reprojection error in pixels.
    pub reprojection_rms: f32,
}

/// Pinhole camera with focal length equal to the frame width and centered principal point.
#[derive(Debug, Clone, Copy)]
struct Intrinsics {
    focal: f64,
    cx: f64,
    cy: f64,
}

impl Intrinsics {
    fn for_frame(width: u32, height: u32) -> Self {
        Self {
            focal: width as f64,
            cx: width as f64 / 2.0,
            cy: height as f64 / 2.0,
        }
    }
}

/// Pose parameters: axis-angle rotation followed by translation.
type Params = [f64; 6];

/// Estimate head pose from the six landmarks matching [`MODEL_POINTS`], in pixels.
pub fn estimate_head_pose(
    image_points: &[Point2; 6],
    width: u32,
    height: u32,
) -> Result<HeadPose, PoseError> {
    if width == 0 || height == 0 {
        return Err(PoseError::InvalidFrame(width, height));
    }
    if !image_points.iter().all(Point2::is_finite) {
        return Err(PoseError::NonFinite);
    }

    let observed: [[f64; 2]; 6] = std::array::from_fn(|i| {
        [image_points[i].x as f64, image_points[i].y as f64]
    });
    check_spread(&observed)?;

    let cam = Intrinsics::for_frame(width, height);
    let params = solve_pnp(&observed, &cam)?;

    if params[5].is_nan() || params[5] <= 0.0 {
        return Err(PoseError::BehindCamera);
    }

    let residual = residuals(&params, &observed, &cam).ok_or(PoseError::BehindCamera)?;
    let rms = (residual.iter().map(|r| r * r).sum::<f64>() / observed.len() as f64).sqrt();

    let rotation = rodrigues([params[0], params[1], params[2]]);
    let (pitch, yaw, roll) = euler_angles_deg(&rotation);

    Ok(HeadPose {
        pitch: pitch as f32,
        yaw: yaw as f32,
        roll: roll as f32,
        reprojection_rms: rms as f32,
    })
}

/// Reject coincident or collinear point sets via the eigenvalues of their 2D covariance.
fn check_spread(points: &[[f64; 2]; 6]) -> Result<(), PoseError> {
    let n = points.len() as f64;
    let mx = points.iter().map(|p| p[0]).sum::<f64>() / n;
    let my = points.iter().map(|p| p[1]).sum::<f64>() / n;

    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for p in points {
        let dx = p[0] - mx;
        let dy = p[1] - my;
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    sxx /= n;
    syy /= n;
    sxy /= n;

    let half_trace = (sxx + syy) / 2.0;
    let det = sxx * syy - sxy * sxy;
    let disc = (half_trace * half_trace - det).max(0.0).sqrt();
    let major = half_trace + disc;
    let minor = half_trace - disc;

    if major < 1.0 || minor < major * MIN_SPREAD_RATIO {
        return Err(PoseError::Degenerate);
    }
    Ok(())
}

/// Frontal-facing seed: no rotation, depth from the apparent eye span, nose on its ray.
fn initial_guess(observed: &[[f64; 2]; 6], cam: &Intrinsics) -> Result<Params, PoseError> {
    let eye_span = ((observed[2][0] - observed[3][0]).powi(2)
        + (observed[2][1] - observed[3][1]).powi(2))
    .sqrt();
    if eye_span < 1e-6 {
        return Err(PoseError::Degenerate);
    }
    let tz = cam.focal * MODEL_EYE_SPAN / eye_span;
    let tx = (observed[0][0] - cam.cx) * tz / cam.focal;
    let ty = (observed[0][1] - cam.cy) * tz / cam.focal;
    Ok([0.0, 0.0, 0.0, tx, ty, tz])
}

/// Reprojection residuals `[du0, dv0, du1, dv1, ...]`, `None` if a point is behind the camera.
fn residuals(params: &Params, observed: &[[f64; 2]; 6], cam: &Intrinsics) -> Option<[f64; 12]> {
    let rotation = rodrigues([params[0], params[1], params[2]]);
    let mut out = [0.0f64; 12];

    for (i, model) in MODEL_POINTS.iter().enumerate() {
        let p = mat_vec(&rotation, *model);
        let z = p[2] + params[5];
        if z <= 1e-9 {
            return None;
        }
        let u = cam.focal * (p[0] + params[3]) / z + cam.cx;
        let v = cam.focal * (p[1] + params[4]) / z + cam.cy;
        out[2 * i] = u - observed[i][0];
        out[2 * i + 1] = v - observed[i][1];
    }

    Some(out)
}

fn cost_of(r: &[f64; 12]) -> f64 {
    r.iter().map(|v| v * v).sum()
}

/// Central-difference Jacobian of the residuals, 12×6.
fn jacobian(
    params: &Params,
    observed: &[[f64; 2]; 6],
    cam: &Intrinsics,
) -> Result<[[f64; 6]; 12], PoseError> {
    let mut jac = [[0.0f64; 6]; 12];
    for k in 0..6 {
        let h = FD_STEP * params[k].abs().max(1.0);
        let mut plus = *params;
        let mut minus = *params;
        plus[k] += h;
        minus[k] -= h;
        let rp = residuals(&plus, observed, cam).ok_or(PoseError::BehindCamera)?;
        let rm = residuals(&minus, observed, cam).ok_or(PoseError::BehindCamera)?;
        for row in 0..12 {
            jac[row][k] = (rp[row] - rm[row]) / (2.0 * h);
        }
    }
    Ok(jac)
}

fn solve_pnp(observed: &[[f64; 2]; 6], cam: &Intrinsics) -> Result<Params, PoseError> {
    let mut params = initial_guess(observed, cam)?;
    let mut residual = residuals(&params, observed, cam).ok_or(PoseError::BehindCamera)?;
    let mut cost = cost_of(&residual);
    let mut damping = INITIAL_DAMPING;

    for _ in 0..MAX_ITERATIONS {
        let jac = jacobian(&params, observed, cam)?;

        let mut jtj = [[0.0f64; 6]; 6];
        let mut jtr = [0.0f64; 6];
        for row in 0..12 {
            for i in 0..6 {
                jtr[i] += jac[row][i] * residual[row];
                for j in 0..6 {
                    jtj[i][j] += jac[row][i] * jac[row][j];
                }
            }
        }

        if jtr.iter().all(|g| g.abs() < 1e-12) {
            return Ok(params);
        }

        let mut augmented = jtj;
        for (i, row) in augmented.iter_mut().enumerate() {
            row[i] += damping * jtj[i][i].max(1e-12);
        }
        let neg_grad = jtr.map(|g| -g);
        let step = linalg::solve(&augmented, &neg_grad).ok_or(PoseError::Singular)?;

        let candidate: Params = std::array::from_fn(|i| params[i] + step[i]);
        let candidate_residual = residuals(&candidate, observed, cam);

        match candidate_residual {
            Some(r) if cost_of(&r) < cost => {
                let new_cost = cost_of(&r);
                let improvement = cost - new_cost;
                params = candidate;
                residual = r;
                cost = new_cost;
                damping = (damping / 10.0).max(1e-12);

                let step_norm = step.iter().map(|s| s * s).sum::<f64>().sqrt();
                let param_norm = params.iter().map(|p| p * p).sum::<f64>().sqrt();
                if improvement <= 1e-12 * cost.max(1e-12) || step_norm <= 1e-10 * (param_norm + 1e-10) {
                    return Ok(params);
                }
            }
            _ => {
                damping *= 10.0;
                // No step reduces the cost any further: we are at a minimum.
                if damping > MAX_DAMPING {
                    return Ok(params);
                }
            }
        }

        if !params.iter().all(|p| p.is_finite()) {
            return Err(PoseError::NonFinite);
        }
    }

    Err(PoseError::NotConverged(MAX_ITERATIONS))
}
