pub mod batch;
pub mod config;
pub mod cost;
pub mod error;
pub mod fragment;
pub mod graph;
pub mod math;
pub mod pipeline;
pub mod queue;
pub mod stitcher;

mod track;

pub use config::Config;
pub use cost::CostParams;
pub use error::{Error, Result};
pub use fragment::{Direction, Fragment, StitchedPath};
pub use graph::{NodeId, StitchGraph};
pub use pipeline::{Pipeline, PipelineReport};
pub use queue::{FragmentSource, PathSink, Received, SinkError, SourceError};
pub use stitcher::{ExitReason, StitchReport, Stitcher};
pub use track::Track;
