use nalgebra as na;

/// Weighted least squares fit of `y = a * x + b`, returns `[a, b]`.
pub fn weighted_linear_ls(
    x: &na::DVector<f64>,
    y: &na::DVector<f64>,
    w: &na::DVector<f64>,
) -> Option<na::Matrix2x1<f64>> {
    let s_w = w.sum();
    let s_x = w.zip_map(x, |w, x| w * x).sum();
    let s_x2 = w.zip_map(x, |w, x| w * x * x).sum();
    let s_xy = w.zip_map(x, |w, x| w * x).zip_map(y, |wx, y| wx * y).sum();
    let s_y = w.zip_map(y, |w, y| w * y).sum();

    // all x equal (or all weight on one sample): slope is undetermined
    let det = s_x2 * s_w - s_x * s_x;
    if !(det > f64::EPSILON * s_x2 * s_w) {
        return None;
    }

    let a = na::Matrix2::new(s_x2, s_x, s_x, s_w);
    let b = na::Matrix2x1::new(s_xy, s_y);

    let qr_result = a.qr();
    let qty = qr_result.q().transpose() * b;
    let beta_hat = qr_result.r().solve_upper_triangular(&qty)?;

    if beta_hat.iter().all(|v| v.is_finite()) {
        Some(beta_hat)
    } else {
        None
    }
}

#[inline]
pub fn weighted_mean(x: &na::DVector<f64>, w: &na::DVector<f64>) -> f64 {
    w.zip_map(x, |w, x| w * x).sum() / w.sum()
}

/// Population variance.
pub fn variance(x: &na::DVector<f64>) -> f64 {
    if x.is_empty() {
        return 0.0;
    }

    let mean = x.mean();
    x.map(|v| (v - mean) * (v - mean)).sum() / x.len() as f64
}

pub fn linspace(start: f64, end: f64, n: usize) -> na::DVector<f64> {
    match n {
        0 => return na::DVector::zeros(0),
        1 => return na::DVector::from_element(1, end),
        _ => {}
    }

    let step = (end - start) / (n - 1) as f64;
    na::DVector::from_fn(n, |i, _| start + step * i as f64)
}

/// Bhattacharyya distance between two Gaussians with diagonal covariances
/// `var1` and `var2`, computed in log space.
///
/// `None` when a variance is not strictly positive or the result is not
/// finite.
pub fn bhattacharyya_diag(
    mu1: &na::DVector<f64>,
    mu2: &na::DVector<f64>,
    var1: &na::DVector<f64>,
    var2: &na::DVector<f64>,
) -> Option<f64> {
    let valid = |v: &f64| v.is_finite() && *v > 0.0;
    if !var1.iter().all(valid) || !var2.iter().all(valid) {
        return None;
    }

    let var = (var1 + var2) * 0.5;
    let mu = mu1 - mu2;

    let mahalanobis = mu.zip_map(&var, |m, v| m * m / v).sum();
    let log_det_ratio = var
        .iter()
        .zip(var1.iter().zip(var2.iter()))
        .map(|(v, (v1, v2))| v.ln() - 0.5 * v1.ln() - 0.5 * v2.ln())
        .sum::<f64>();

    let dist = 0.125 * mahalanobis + 0.5 * log_det_ratio;

    if !dist.is_finite() {
        None
    } else if dist < -999.0 {
        Some(999.0)
    } else {
        Some(dist)
    }
}
