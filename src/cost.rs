use crate::math::{bhattacharyya_diag, linspace, variance, weighted_linear_ls, weighted_mean};
use crate::track::{Samples, Track};

use nalgebra as na;
use serde_derive::{Deserialize, Serialize};

/// Cost of a link that must never be formed.
pub const REJECT_COST: f64 = 1e6;

const MIN_WEIGHT: f64 = 1e-6;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct CostParams {
    /// links costing more than this are never formed
    pub stitch_thresh: f64,
    pub cx: f64,
    pub mx: f64,
    pub cy: f64,
    pub my: f64,
    /// cost per second of gap
    pub time_penalty: f64,
    /// samples at each end of a track used for fitting and measurement
    pub anchor_samples: usize,
    /// optional Euclidean pre-filter, in position units
    pub prefilter_distance: Option<f64>,
}

impl Default for CostParams {
    fn default() -> Self {
        Self {
            stitch_thresh: 3.0,
            cx: 0.2,
            mx: 0.1,
            cy: 2.0,
            my: 0.1,
            time_penalty: 0.1,
            anchor_samples: 25,
            prefilter_distance: None,
        }
    }
}

/// Scores how plausible it is that `b` continues `a`.
///
/// The longer track (ties go to `a`) is fitted with a weighted linear motion
/// model near the junction and projected onto the other track's junction
/// samples; the score is the per-sample Bhattacharyya distance between the
/// projected cone and the measurements plus a linear gap penalty. Returns
/// [`REJECT_COST`] when the gap is out of `[0, time_win]` or on any numeric
/// failure.
pub fn stitch_cost(a: &Track, b: &Track, time_win: f64, params: &CostParams) -> f64 {
    match bhattacharyya_cost(a, b, time_win, params) {
        Some(cost) if cost.is_finite() => cost,
        _ => {
            tracing::debug!(
                a_last = a.last_timestamp,
                b_first = b.first_timestamp,
                "stitch cost evaluation failed, rejecting pair"
            );
            REJECT_COST
        }
    }
}

/// Cost of linking `pred -> succ`, `None` when the pair may never be linked:
/// gap outside the window, beyond the pre-filter distance or above
/// `stitch_thresh`.
pub fn link_cost(pred: &Track, succ: &Track, time_win: f64, params: &CostParams) -> Option<f64> {
    let gap = succ.first_timestamp - pred.last_timestamp;
    if !(0.0..=time_win).contains(&gap) {
        return None;
    }

    if let Some(max_dist) = params.prefilter_distance {
        if simple_distance(pred, succ, time_win) > max_dist {
            return None;
        }
    }

    let cost = stitch_cost(pred, succ, time_win, params);

    (cost <= params.stitch_thresh).then_some(cost)
}

/// Distance between the end of `a` and the start of `b`, the cheap
/// pre-filter for [`stitch_cost`].
pub fn simple_distance(a: &Track, b: &Track, time_win: f64) -> f64 {
    let gap = b.first_timestamp - a.last_timestamp;
    if !(0.0..=time_win).contains(&gap) {
        return REJECT_COST;
    }

    na::distance(&a.last_point(), &b.first_point())
}

fn bhattacharyya_cost(a: &Track, b: &Track, time_win: f64, params: &CostParams) -> Option<f64> {
    let gap = b.first_timestamp - a.last_timestamp;
    if !(0.0..=time_win).contains(&gap) {
        return Some(REJECT_COST);
    }

    // keep the regression away from large absolute timestamps
    let toffset = a.first_timestamp.min(b.first_timestamp);

    // forward: a's fit predicts b; backward: b's fit "predicts" a back in time
    let forward = a.len >= b.len;
    let (anchor, meas, junction, dir, weights) = if forward {
        let w = linspace(MIN_WEIGHT, 1.0, a.tail.len());
        (&a.tail, &b.head, a.last_timestamp, 1.0, w)
    } else {
        let w = linspace(1.0, MIN_WEIGHT, b.head.len());
        (&b.head, &a.tail, b.first_timestamp, -1.0, w)
    };
    let sign = if forward {
        a.direction.sign()
    } else {
        b.direction.sign()
    };

    let (at, ax, ay) = shifted(anchor, toffset);
    let (mt, mx, my) = shifted(meas, toffset);

    let fitx = weighted_linear_ls(&at, &ax, &weights)?;
    let fity = weighted_linear_ls(&at, &ay, &weights)?;

    // no backward drift against the direction of travel
    let (mut slope_x, mut intercept_x) = (fitx[0], fitx[1]);
    if slope_x * sign < 0.0 {
        slope_x = 0.0;
        intercept_x = weighted_mean(&ax, &weights);
    }

    let target_x = mt.map(|t| slope_x * t + intercept_x);
    let target_y = mt.map(|t| fity[0] * t + fity[1]);

    let pt = junction - toffset;
    let tdiff = mt.map(|t| (t - pt) * dir);

    let sigma_x = tdiff.map(|dt| params.cx + params.mx * dt * fitx[0].abs());
    let sigma_y = tdiff.map(|dt| params.cy + params.my * dt * fity[0].abs());
    let var_x = sigma_x.map(|s| s * s);
    let var_y_pred = sigma_y.map(|s| s * s);
    let var_y_meas = variance(&my).max(params.cy * params.cy);

    let n = mt.len();
    let mu1 = concat(&target_x, &target_y);
    let mu2 = concat(&mx, &my);
    let var1 = concat(&var_x, &var_y_pred);
    let var2 = concat(
        &na::DVector::from_element(n, var_x[0]),
        &na::DVector::from_element(n, var_y_meas),
    );

    let bd = bhattacharyya_diag(&mu1, &mu2, &var1, &var2)?;
    let nll = bd / n as f64;

    Some(nll + params.time_penalty * gap)
}

fn shifted(
    s: &Samples,
    toffset: f64,
) -> (na::DVector<f64>, na::DVector<f64>, na::DVector<f64>) {
    (
        na::DVector::from_iterator(s.len(), s.t.iter().map(|t| t - toffset)),
        na::DVector::from_column_slice(&s.x),
        na::DVector::from_column_slice(&s.y),
    )
}

fn concat(a: &na::DVector<f64>, b: &na::DVector<f64>) -> na::DVector<f64> {
    na::DVector::from_iterator(a.len() + b.len(), a.iter().chain(b.iter()).copied())
}
