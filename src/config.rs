use crate::cost::CostParams;
use crate::error::{Error, Result};

use serde_derive::{Deserialize, Serialize};
use std::{fs, path::Path, time::Duration};

/// Stitcher parameters, read from the same JSON document as the rest of
/// the post-processing pipeline.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct Config {
    /// field used as fragment identity
    pub fragment_attr_name: String,
    /// max gap of a link, seconds
    pub time_win: f64,
    /// input wait before the stream counts as ended, seconds
    pub stitcher_timeout: f64,
    /// status report interval, seconds
    pub log_heartbeat: f64,
    /// bound of every queue created by the pipeline
    pub queue_capacity: usize,
    pub stitcher_args: CostParams,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fragment_attr_name: "_id".to_string(),
            time_win: 15.0,
            stitcher_timeout: 20.0,
            log_heartbeat: 60.0,
            queue_capacity: 1000,
            stitcher_args: CostParams::default(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(s: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(s)?;
        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let args = &self.stitcher_args;

        if self.fragment_attr_name.is_empty() {
            return Err(Error::Config("fragment_attr_name is empty".into()));
        }

        for (name, value) in [
            ("time_win", self.time_win),
            ("stitcher_timeout", self.stitcher_timeout),
            ("log_heartbeat", self.log_heartbeat),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(Error::Config(format!("{} must be positive, got {}", name, value)));
            }
        }

        for (name, value) in [
            ("cx", args.cx),
            ("mx", args.mx),
            ("my", args.my),
            ("time_penalty", args.time_penalty),
        ] {
            if !(value.is_finite() && value >= 0.0) {
                return Err(Error::Config(format!("{} must be non-negative, got {}", name, value)));
            }
        }

        // cy floors the measured y variance
        if !(args.cy.is_finite() && args.cy > 0.0) {
            return Err(Error::Config(format!("cy must be positive, got {}", args.cy)));
        }

        if !args.stitch_thresh.is_finite() {
            return Err(Error::Config("stitch_thresh must be finite".into()));
        }

        if args.anchor_samples < 2 {
            return Err(Error::Config("anchor_samples must be at least 2".into()));
        }

        if self.queue_capacity == 0 {
            return Err(Error::Config("queue_capacity must be at least 1".into()));
        }

        Ok(())
    }

    #[inline]
    pub fn stitcher_timeout(&self) -> Duration {
        Duration::from_secs_f64(self.stitcher_timeout)
    }

    #[inline]
    pub fn log_heartbeat(&self) -> Duration {
        Duration::from_secs_f64(self.log_heartbeat)
    }
}
