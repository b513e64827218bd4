use crate::fragment::{Direction, Fragment};
use nalgebra as na;

/// A contiguous run of (t, x, y) samples.
#[derive(Debug, Clone, Default)]
pub struct Samples {
    pub t: Vec<f64>,
    pub x: Vec<f64>,
    pub y: Vec<f64>,
}

impl Samples {
    fn copy_range(f: &Fragment, range: std::ops::Range<usize>) -> Self {
        Self {
            t: f.timestamp[range.clone()].to_vec(),
            x: f.x_position[range.clone()].to_vec(),
            y: f.y_position[range].to_vec(),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.t.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.t.is_empty()
    }
}

/// What the stitch graph keeps of a fragment: enough to score links in
/// either direction, without the full time series.
#[derive(Debug, Clone)]
pub struct Track {
    pub direction: Direction,
    pub len: usize,
    pub first_timestamp: f64,
    pub last_timestamp: f64,

    // first `anchor_samples` samples
    pub head: Samples,

    // last `anchor_samples` samples
    pub tail: Samples,
}

impl Track {
    pub fn from_fragment(f: &Fragment, anchor_samples: usize) -> Self {
        let n = f.len();
        let k = anchor_samples.min(n);

        Self {
            direction: f.direction,
            len: n,
            first_timestamp: f.first_timestamp,
            last_timestamp: f.last_timestamp,
            head: Samples::copy_range(f, 0..k),
            tail: Samples::copy_range(f, n - k..n),
        }
    }

    #[inline]
    pub fn first_point(&self) -> na::Point2<f64> {
        na::Point2::new(self.head.x[0], self.head.y[0])
    }

    #[inline]
    pub fn last_point(&self) -> na::Point2<f64> {
        let i = self.tail.len() - 1;
        na::Point2::new(self.tail.x[i], self.tail.y[i])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_head_and_tail_are_truncated() {
        let t: Vec<f64> = (0..10).map(|i| i as f64 * 0.1).collect();
        let x: Vec<f64> = (0..10).map(|i| i as f64).collect();
        let f = Fragment::new("a", Direction::East, t, x, vec![1.0; 10]);

        let track = Track::from_fragment(&f, 4);

        assert_eq!(track.len, 10);
        assert_eq!(track.head.x, vec![0.0, 1.0, 2.0, 3.0]);
        assert_eq!(track.tail.x, vec![6.0, 7.0, 8.0, 9.0]);
        assert_eq!(track.first_point(), na::Point2::new(0.0, 1.0));
        assert_eq!(track.last_point(), na::Point2::new(9.0, 1.0));
    }

    #[test]
    fn test_short_fragment_keeps_everything() {
        let f = Fragment::new(
            "a",
            Direction::West,
            vec![0.0, 0.04, 0.08],
            vec![3.0, 2.0, 1.0],
            vec![0.0; 3],
        );

        let track = Track::from_fragment(&f, 25);

        assert_eq!(track.head.len(), 3);
        assert_eq!(track.tail.len(), 3);
    }
}
