use crate::config::Config;
use crate::error::{Error, Result};
use crate::fragment::{Direction, Fragment, StitchedPath};
use crate::queue::{FragmentSource, Received, SourceError};
use crate::stitcher::{StitchReport, Stitcher};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, SendError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineReport {
    pub routed: usize,
    /// fragments whose direction had no running stitcher
    pub dropped: usize,
    pub east: StitchReport,
    pub west: StitchReport,
}

#[derive(Debug, Clone, Copy, Default)]
struct RouterStats {
    routed: usize,
    dropped: usize,
}

/// Splits one fragment stream by direction, stitches each direction on its
/// own thread and merges the finished paths into a single bounded queue.
///
/// The router owns end of stream: it closes both direction queues once the
/// input has been idle for `stitcher_timeout` or every producer hung up, so
/// a quiet direction keeps its stitcher alive while the other one flows.
pub struct Pipeline {
    output: Receiver<StitchedPath>,
    router: JoinHandle<RouterStats>,
    east: JoinHandle<StitchReport>,
    west: JoinHandle<StitchReport>,
}

impl Pipeline {
    pub fn spawn(config: Config, input: Receiver<Fragment>) -> Result<Self> {
        config.validate()?;

        let cap = config.queue_capacity;
        let (east_tx, east_rx) = bounded(cap);
        let (west_tx, west_rx) = bounded(cap);
        let (out_tx, output) = bounded(cap);

        let east = spawn_stitcher(Direction::East, config.clone(), east_rx, out_tx.clone())?;
        let west = spawn_stitcher(Direction::West, config.clone(), west_rx, out_tx)?;

        let timeout = config.stitcher_timeout();
        let router = thread::Builder::new()
            .name("router".to_string())
            .spawn(move || route(input, timeout, east_tx, west_tx))?;

        Ok(Self {
            output,
            router,
            east,
            west,
        })
    }

    /// Finished paths of both directions. Must be drained for the stitchers
    /// to make progress once the queue is full.
    pub fn output(&self) -> &Receiver<StitchedPath> {
        &self.output
    }

    /// Waits for every worker. Paths still queued are dropped with the
    /// output receiver.
    pub fn join(self) -> Result<PipelineReport> {
        drop(self.output);

        let stats = self.router.join().map_err(|_| Error::Worker("router".into()))?;
        let east = self.east.join().map_err(|_| Error::Worker("stitcher_eb".into()))?;
        let west = self.west.join().map_err(|_| Error::Worker("stitcher_wb".into()))?;

        Ok(PipelineReport {
            routed: stats.routed,
            dropped: stats.dropped,
            east,
            west,
        })
    }

    /// Drains the output until both stitchers exit, then joins.
    pub fn collect(self) -> Result<(Vec<StitchedPath>, PipelineReport)> {
        let paths: Vec<StitchedPath> = self.output.iter().collect();
        let report = self.join()?;

        Ok((paths, report))
    }
}

fn route(
    input: Receiver<Fragment>,
    timeout: Duration,
    east_tx: Sender<Fragment>,
    west_tx: Sender<Fragment>,
) -> RouterStats {
    let mut east_tx = Some(east_tx);
    let mut west_tx = Some(west_tx);
    let mut stats = RouterStats::default();

    loop {
        let fragment = match input.recv_timeout(timeout) {
            Ok(f) => f,
            Err(RecvTimeoutError::Timeout) => {
                info!(routed = stats.routed, "input idle, closing direction queues");
                break;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let slot = match fragment.direction {
            Direction::East => &mut east_tx,
            Direction::West => &mut west_tx,
        };

        let sent = match slot {
            Some(tx) => tx.send(fragment),
            None => Err(SendError(fragment)),
        };

        match sent {
            Ok(()) => stats.routed += 1,
            Err(SendError(f)) => {
                if slot.take().is_some() {
                    warn!(direction = %f.direction, "stitcher gone, closing its queue");
                }

                warn!(id = %f.id, direction = %f.direction, "fragment dropped");
                stats.dropped += 1;
            }
        }
    }

    stats
}

/// Direction queue fed by the router. Never times out on its own; the
/// stream ends when the router closes the queue.
struct Routed(Receiver<Fragment>);

impl FragmentSource for Routed {
    fn recv_fragment(
        &mut self,
        _timeout: Duration,
    ) -> std::result::Result<Received, SourceError> {
        match self.0.recv() {
            Ok(f) => Ok(Received::Fragment(f)),
            Err(_) => Ok(Received::Ended),
        }
    }
}

fn spawn_stitcher(
    direction: Direction,
    config: Config,
    input: Receiver<Fragment>,
    mut output: Sender<StitchedPath>,
) -> Result<JoinHandle<StitchReport>> {
    let mut source = Routed(input);
    let handle = thread::Builder::new()
        .name(format!("stitcher_{}", direction))
        .spawn(move || Stitcher::new(direction, config).run(&mut source, &mut output))?;

    Ok(handle)
}
