//! Small fixed-size dense linear algebra used by the geometric solvers.

pub type Mat3 = [[f64; 3]; 3];

/// Solve the `N`×`N` system `a · x = b` by Gaussian elimination with partial pivoting.
///
/// Returns `None` when the system is singular or ill-conditioned.
#[allow(clippy::needless_range_loop)]
pub fn solve<const N: usize>(a: &[[f64; N]; N], b: &[f64; N]) -> Option<[f64; N]> {
    let mut m = *a;
    let mut rhs = *b;

    let scale = a
        .iter()
        .flat_map(|row| row.iter())
        .fold(0.0f64, |acc, v| acc.max(v.abs()));
    if scale == 0.0 || !scale.is_finite() {
        return None;
    }
    let eps = scale * 1e-14;

    for col in 0..N {
        let mut max_row = col;
        let mut max_val = m[col][col].abs();
        for row in (col + 1)..N {
            if m[row][col].abs() > max_val {
                max_val = m[row][col].abs();
                max_row = row;
            }
        }
        if max_val <= eps {
            return None;
        }
        m.swap(col, max_row);
        rhs.swap(col, max_row);

        let pivot = m[col][col];
        for row in (col + 1)..N {
            let factor = m[row][col] / pivot;
            for j in col..N {
                m[row][j] -= factor * m[col][j];
            }
            rhs[row] -= factor * rhs[col];
        }
    }

    let mut x = [0.0f64; N];
    for i in (0..N).rev() {
        let mut acc = rhs[i];
        for j in (i + 1)..N {
            acc -= m[i][j] * x[j];
        }
        x[i] = acc / m[i][i];
    }

    if x.iter().all(|v| v.is_finite()) {
        Some(x)
    } else {
        None
    }
}

/// Rotation matrix from an axis-angle (Rodrigues) vector.
pub fn rodrigues(r: [f64; 3]) -> Mat3 {
    let theta = (r[0] * r[0] + r[1] * r[1] + r[2] * r[2]).sqrt();
    if theta < 1e-12 {
        return [[1.0, 0.0, 0.0], [0.0, 1.0, 0.0], [0.0, 0.0, 1.0]];
    }
    let (kx, ky, kz) = (r[0] / theta, r[1] / theta, r[2] / theta);
    let (s, c) = theta.sin_cos();
    let v = 1.0 - c;

    [
        [c + kx * kx * v, kx * ky * v - kz * s, kx * kz * v + ky * s],
        [ky * kx * v + kz * s, c + ky * ky * v, ky * kz * v - kx * s],
        [kz * kx * v - ky * s, kz * ky * v + kx * s, c + kz * kz * v],
    ]
}

pub fn mat_vec(m: &Mat3, v: [f64; 3]) -> [f64; 3] {
    [
        m[0][0] * v[0] + m[0][1] * v[1] + m[0][2] * v[2],
        m[1][0] * v[0] + m[1][1] * v[1] + m[1][2] * v[2],
        m[2][0] * v[0] + m[2][1] * v[1] + m[2][2] * v[2],
    ]
}

#[cfg(test)]
pub(crate) fn mat_mul(a: &Mat3, b: &Mat3) -> Mat3 {
    let mut out = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

/// Decompose `R = Rz(roll) · Ry(yaw) · Rx(pitch)` into `(pitch, yaw, roll)` in degrees.
pub fn euler_angles_deg(r: &Mat3) -> (f64, f64, f64) {
    let sy = (r[0][0] * r[0][0] + r[1][0] * r[1][0]).sqrt();
    let (pitch, yaw, roll) = if sy > 1e-9 {
        (
            r[2][1].atan2(r[2][2]),
            (-r[2][0]).atan2(sy),
            r[1][0].atan2(r[0][0]),
        )
    } else {
        // Gimbal lock: roll is folded into pitch.
        ((-r[1][2]).atan2(r[1][1]), (-r[2][0]).atan2(sy), 0.0)
    };
    (pitch.to_degrees(), yaw.to_degrees(), roll.to_degrees())
}

#[cfg(test)]
pub(crate) fn rotation_from_euler_deg(pitch: f64, yaw: f64, roll: f64) -> Mat3 {
    let (sx, cx) = pitch.to_radians().sin_cos();
    let (sy, cy) = yaw.to_radians().sin_cos();
    let (sz, cz) = roll.to_radians().sin_cos();
    let rx = [[1.0, 0.0, 0.0], [0.0, cx, -sx], [0.0, sx, cx]];
    let ry = [[cy, 0.0, sy], [0.0, 1.0, 0.0], [-sy, 0.0, cy]];
    let rz = [[cz, -sz, 0.0], [sz, cz, 0.0], [0.0, 0.0, 1.0]];
    mat_mul(&rz, &mat_mul(&ry, &rx))
}
