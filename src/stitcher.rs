use crate::config::Config;
use crate::error::Error;
use crate::fragment::{Direction, Fragment, StitchedPath};
use crate::graph::{NodeId, StitchGraph};
use crate::queue::{FragmentSource, PathSink, Received, SinkError, SourceError};

use std::time::Instant;
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    /// input timed out or every producer hung up, everything was flushed
    StreamEnded,
    /// a queue broke, resident fragments were abandoned
    Disconnected,
    /// unexpected failure, resident fragments were flushed
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StitchReport {
    pub direction: Direction,
    pub ingested: usize,
    pub rejected: usize,
    pub emitted_paths: usize,
    pub emitted_fragments: usize,
    pub abandoned: usize,
    pub exit: ExitReason,
}

enum StepError {
    Graph(Error),
    Sink(SinkError),
}

/// Online stitcher for one direction of travel.
///
/// Owns its graph; fragments go in through a [`FragmentSource`] and finished
/// paths come out through a [`PathSink`].
pub struct Stitcher {
    graph: StitchGraph,
    config: Config,
    ingested: usize,
    rejected: usize,
    emitted_paths: usize,
    emitted_fragments: usize,
}

impl Stitcher {
    pub fn new(direction: Direction, config: Config) -> Self {
        Self {
            graph: StitchGraph::new(direction, config.time_win, config.stitcher_args.clone()),
            config,
            ingested: 0,
            rejected: 0,
            emitted_paths: 0,
            emitted_fragments: 0,
        }
    }

    #[inline]
    pub fn direction(&self) -> Direction {
        self.graph.direction()
    }

    pub fn graph(&self) -> &StitchGraph {
        &self.graph
    }

    /// Consumes the source until it ends or breaks. Always returns; the
    /// report says how the run ended.
    pub fn run<S, K>(mut self, source: &mut S, sink: &mut K) -> StitchReport
    where
        S: FragmentSource + ?Sized,
        K: PathSink + ?Sized,
    {
        let span = tracing::info_span!("stitcher", direction = %self.direction());
        let _enter = span.enter();

        let timeout = self.config.stitcher_timeout();
        let heartbeat = self.config.log_heartbeat();
        let mut last_beat = Instant::now();

        info!(time_win = self.config.time_win, "stitcher started");

        let exit = loop {
            let fragment = match source.recv_fragment(timeout) {
                Ok(Received::Fragment(f)) => f,
                Ok(Received::Ended) => {
                    info!(
                        resident = self.graph.num_nodes(),
                        "input ended, flushing all paths"
                    );
                    break self.flush(sink, ExitReason::StreamEnded);
                }
                Err(SourceError::Disconnected) => {
                    error!("input queue broken, exit without flushing");
                    break ExitReason::Disconnected;
                }
                Err(err @ SourceError::Other(_)) => {
                    error!(%err, "flushing all paths before exit");
                    break self.flush(sink, ExitReason::Failed);
                }
            };

            match self.ingest(fragment, sink) {
                Ok(()) => {}
                Err(StepError::Sink(err)) => {
                    error!(%err, "exit without flushing");
                    break ExitReason::Disconnected;
                }
                Err(StepError::Graph(err)) => {
                    error!(%err, "flushing all paths before exit");
                    break self.flush(sink, ExitReason::Failed);
                }
            }

            if last_beat.elapsed() >= heartbeat {
                self.heartbeat();
                last_beat = Instant::now();
            }
        };

        let report = StitchReport {
            direction: self.direction(),
            ingested: self.ingested,
            rejected: self.rejected,
            emitted_paths: self.emitted_paths,
            emitted_fragments: self.emitted_fragments,
            abandoned: self.graph.num_nodes(),
            exit,
        };

        info!(
            ingested = report.ingested,
            rejected = report.rejected,
            paths = report.emitted_paths,
            abandoned = report.abandoned,
            exit = ?report.exit,
            "exit stitcher"
        );

        report
    }

    fn ingest<K: PathSink + ?Sized>(
        &mut self,
        fragment: Fragment,
        sink: &mut K,
    ) -> Result<(), StepError> {
        if let Err(err) = fragment.validate() {
            warn!(%err, "skip fragment");
            self.rejected += 1;
            return Ok(());
        }

        let start = fragment.first_timestamp;
        let id = self.graph.add_node(fragment).map_err(StepError::Graph)?;
        self.ingested += 1;

        self.graph.augment_path(id).map_err(StepError::Graph)?;

        for path in self.graph.pop_path(start - self.config.time_win) {
            self.emit(&path, sink)?;
        }

        Ok(())
    }

    fn emit<K: PathSink + ?Sized>(
        &mut self,
        path: &[NodeId],
        sink: &mut K,
    ) -> Result<(), StepError> {
        let fragments = self.graph.traj_dicts(path).map_err(StepError::Graph)?;
        let n = fragments.len();

        debug!(ids = ?self.graph.fragment_ids(path), "path finished");

        sink.send_path(StitchedPath {
            direction: self.direction(),
            fragments,
        })
        .map_err(StepError::Sink)?;

        self.emitted_paths += 1;
        self.emitted_fragments += n;

        self.graph.clean_graph(path).map_err(StepError::Graph)
    }

    /// Emits every resident chain. A broken sink stops the flush and turns
    /// the exit into `Disconnected`.
    fn flush<K: PathSink + ?Sized>(&mut self, sink: &mut K, exit: ExitReason) -> ExitReason {
        for path in self.graph.all_paths() {
            match self.emit(&path, sink) {
                Ok(()) => {}
                Err(StepError::Sink(err)) => {
                    error!(%err, left = self.graph.num_nodes(), "flush interrupted");
                    return ExitReason::Disconnected;
                }
                Err(StepError::Graph(err)) => {
                    error!(%err, "skip path during flush");
                }
            }
        }

        exit
    }

    fn heartbeat(&self) {
        info!(
            nodes = self.graph.num_nodes(),
            links = self.graph.num_edges(),
            candidates = self.graph.num_candidate_edges(),
            resident = self.graph.num_resident(),
            cached = self.graph.cache_len(),
            ingested = self.ingested,
            emitted = self.emitted_fragments,
            "graph status"
        );
    }
}
