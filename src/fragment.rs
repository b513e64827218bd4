use crate::error::{Error, Result};

use serde_derive::{Deserialize, Serialize};
use serde_json::Value;
use std::{fmt, fs, path::Path};

const TIMESTAMP_TOLERANCE: f64 = 1e-6;

/// Travel direction along the roadway x axis.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(try_from = "i8", into = "i8")]
pub enum Direction {
    /// +1, x increases with time
    East,
    /// -1, x decreases with time
    West,
}

impl Direction {
    #[inline]
    pub fn sign(self) -> f64 {
        match self {
            Direction::East => 1.0,
            Direction::West => -1.0,
        }
    }

    #[inline]
    pub fn name(self) -> &'static str {
        match self {
            Direction::East => "eb",
            Direction::West => "wb",
        }
    }
}

impl TryFrom<i8> for Direction {
    type Error = String;

    fn try_from(v: i8) -> std::result::Result<Self, Self::Error> {
        match v {
            1 => Ok(Direction::East),
            -1 => Ok(Direction::West),
            other => Err(format!("direction must be 1 or -1, got {}", other)),
        }
    }
}

impl From<Direction> for i8 {
    fn from(d: Direction) -> i8 {
        match d {
            Direction::East => 1,
            Direction::West => -1,
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One trajectory fragment as produced by per-camera tracking.
///
/// All time series are sample-aligned and ordered by `timestamp` (seconds).
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Fragment {
    pub id: String,
    pub direction: Direction,
    #[serde(default)]
    pub compute_node_id: i64,

    pub first_timestamp: f64,
    pub last_timestamp: f64,
    pub starting_x: f64,
    pub ending_x: f64,

    pub timestamp: Vec<f64>,
    pub x_position: Vec<f64>,
    pub y_position: Vec<f64>,
    pub width: Vec<f64>,
    pub length: Vec<f64>,
    pub height: Vec<f64>,
    pub velocity: Vec<f64>,
    pub detection_confidence: Vec<f64>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub merged_ids: Vec<String>,

    // low confidence, downstream skips reconciliation
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub post_flag: bool,
}

impl Fragment {
    /// Builds a fragment from positions only; box dimensions are zero, velocity
    /// is the finite difference of x and confidence is 1.
    pub fn new(
        id: impl Into<String>,
        direction: Direction,
        timestamp: Vec<f64>,
        x_position: Vec<f64>,
        y_position: Vec<f64>,
    ) -> Self {
        let n = timestamp.len();
        let velocity = (0..n)
            .map(|i| {
                if n < 2 {
                    return 0.0;
                }
                let (a, b) = if i + 1 < n { (i, i + 1) } else { (i - 1, i) };
                (x_position[b] - x_position[a]).abs() / (timestamp[b] - timestamp[a])
            })
            .collect();

        Self {
            id: id.into(),
            direction,
            compute_node_id: 0,
            first_timestamp: timestamp.first().copied().unwrap_or(0.0),
            last_timestamp: timestamp.last().copied().unwrap_or(0.0),
            starting_x: x_position.first().copied().unwrap_or(0.0),
            ending_x: x_position.last().copied().unwrap_or(0.0),
            width: vec![0.0; n],
            length: vec![0.0; n],
            height: vec![0.0; n],
            velocity,
            detection_confidence: vec![1.0; n],
            timestamp,
            x_position,
            y_position,
            merged_ids: Vec::new(),
            post_flag: false,
        }
    }

    /// Decodes a loosely-typed record, taking the identity from `id_field`.
    ///
    /// The identity may be a string, a number or a Mongo-style `{"$oid": ..}`.
    pub fn from_value(mut value: Value, id_field: &str) -> Result<Self> {
        let obj = value
            .as_object_mut()
            .ok_or_else(|| invalid("", "record is not an object"))?;

        let raw_id = obj
            .remove(id_field)
            .ok_or_else(|| invalid("", format!("missing identity field {:?}", id_field)))?;

        let id = match raw_id {
            Value::String(s) => s,
            Value::Number(n) => n.to_string(),
            Value::Object(mut o) => match o.remove("$oid") {
                Some(Value::String(s)) => s,
                _ => return Err(invalid("", "identity object has no $oid string")),
            },
            other => return Err(invalid("", format!("unsupported identity {}", other))),
        };

        obj.insert("id".to_string(), Value::String(id.clone()));

        serde_json::from_value(value).map_err(|e| invalid(&id, e.to_string()))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.timestamp.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.timestamp.is_empty()
    }

    /// Rejects records the cost model cannot score.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(invalid(&self.id, "empty id"));
        }

        let n = self.len();
        if n < 2 {
            return Err(invalid(&self.id, format!("needs at least 2 samples, got {}", n)));
        }

        let series = [
            ("x_position", self.x_position.len()),
            ("y_position", self.y_position.len()),
            ("width", self.width.len()),
            ("length", self.length.len()),
            ("height", self.height.len()),
            ("velocity", self.velocity.len()),
            ("detection_confidence", self.detection_confidence.len()),
        ];

        for (name, len) in series {
            if len != n {
                return Err(invalid(
                    &self.id,
                    format!("{} has {} samples, timestamp has {}", name, len, n),
                ));
            }
        }

        if self
            .timestamp
            .iter()
            .chain(self.x_position.iter())
            .chain(self.y_position.iter())
            .any(|v| !v.is_finite())
        {
            return Err(invalid(&self.id, "non-finite timestamp or position"));
        }

        if self.timestamp.windows(2).any(|w| w[1] <= w[0]) {
            return Err(invalid(&self.id, "timestamps are not strictly increasing"));
        }

        if (self.first_timestamp - self.timestamp[0]).abs() > TIMESTAMP_TOLERANCE
            || (self.last_timestamp - self.timestamp[n - 1]).abs() > TIMESTAMP_TOLERANCE
        {
            return Err(invalid(
                &self.id,
                "first/last timestamp disagree with the timestamp series",
            ));
        }

        Ok(())
    }
}

/// One finished trajectory: fragments ordered oldest to newest.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct StitchedPath {
    pub direction: Direction,
    pub fragments: Vec<Fragment>,
}

impl StitchedPath {
    pub fn ids(&self) -> Vec<&str> {
        self.fragments.iter().map(|f| f.id.as_str()).collect()
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// The path carries a low-confidence fragment.
    pub fn post_flag(&self) -> bool {
        self.fragments.iter().any(|f| f.post_flag)
    }
}

/// Reads a JSON array of fragment records, dropping those with fewer than
/// `min_samples` samples.
pub fn read_fragments<P: AsRef<Path>>(
    path: P,
    id_field: &str,
    min_samples: usize,
) -> Result<Vec<Fragment>> {
    let contents = fs::read_to_string(path)?;
    let records: Vec<Value> = serde_json::from_str(&contents)?;

    let mut fragments = Vec::with_capacity(records.len());
    let mut discarded = 0;

    for record in records {
        let fragment = Fragment::from_value(record, id_field)?;

        if fragment.len() < min_samples {
            tracing::debug!(id = %fragment.id, samples = fragment.len(), "discard short fragment");
            discarded += 1;
            continue;
        }

        fragments.push(fragment);
    }

    tracing::info!(read = fragments.len(), discarded, "fragments loaded");

    Ok(fragments)
}

fn invalid(id: &str, reason: impl Into<String>) -> Error {
    Error::InvalidFragment {
        id: id.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Value {
        json!({
            "_id": {"$oid": "62a1"},
            "direction": -1,
            "compute_node_id": 3,
            "first_timestamp": 0.0,
            "last_timestamp": 0.08,
            "starting_x": 100.0,
            "ending_x": 98.0,
            "timestamp": [0.0, 0.04, 0.08],
            "x_position": [100.0, 99.0, 98.0],
            "y_position": [12.0, 12.0, 12.1],
            "width": [6.0, 6.0, 6.0],
            "length": [15.0, 15.0, 15.0],
            "height": [5.0, 5.0, 5.0],
            "velocity": [25.0, 25.0, 25.0],
            "detection_confidence": [0.9, 0.8, 0.9]
        })
    }

    #[test]
    fn test_from_value_unwraps_oid() {
        let f = Fragment::from_value(record(), "_id").unwrap();

        assert_eq!(f.id, "62a1");
        assert_eq!(f.direction, Direction::West);
        assert_eq!(f.compute_node_id, 3);
        assert!(f.merged_ids.is_empty());
        assert!(!f.post_flag);
        f.validate().unwrap();
    }

    #[test]
    fn test_from_value_missing_identity() {
        let err = Fragment::from_value(record(), "fragment_id").unwrap_err();
        assert!(matches!(err, Error::InvalidFragment { .. }));
    }

    #[test]
    fn test_bad_direction_is_rejected() {
        let mut r = record();
        r["direction"] = json!(0);

        assert!(Fragment::from_value(r, "_id").is_err());
    }

    #[test]
    fn test_validate_unequal_series() {
        let mut f = Fragment::from_value(record(), "_id").unwrap();
        f.velocity.pop();

        assert!(f.validate().is_err());
    }

    #[test]
    fn test_validate_non_monotonic_time() {
        let f = Fragment::new(
            "a",
            Direction::East,
            vec![0.0, 0.04, 0.04],
            vec![0.0, 1.0, 2.0],
            vec![0.0; 3],
        );

        assert!(f.validate().is_err());
    }

    #[test]
    fn test_validate_single_sample() {
        let f = Fragment::new("a", Direction::East, vec![0.0], vec![0.0], vec![0.0]);

        assert!(f.validate().is_err());
    }

    #[test]
    fn test_serialize_omits_empty_optionals() {
        let f = Fragment::new(
            "a",
            Direction::East,
            vec![0.0, 0.04],
            vec![0.0, 1.0],
            vec![0.0; 2],
        );
        let v = serde_json::to_value(&f).unwrap();

        assert_eq!(v["direction"], json!(1));
        assert!(v.get("merged_ids").is_none());
        assert!(v.get("post_flag").is_none());
    }
}
