use crate::fragment::{Fragment, StitchedPath};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use std::time::Duration;
use thiserror::Error;

/// Outcome of a bounded wait on the input queue.
#[derive(Debug)]
pub enum Received {
    Fragment(Fragment),
    /// nothing arrived within the wait, or every producer hung up
    Ended,
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("input channel is broken")]
    Disconnected,

    #[error("input failure: {0}")]
    Other(String),
}

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("output channel is broken")]
    Disconnected,
}

pub trait FragmentSource {
    fn recv_fragment(&mut self, timeout: Duration) -> Result<Received, SourceError>;
}

pub trait PathSink {
    /// May block while the consumer is behind.
    fn send_path(&mut self, path: StitchedPath) -> Result<(), SinkError>;
}

impl FragmentSource for Receiver<Fragment> {
    fn recv_fragment(&mut self, timeout: Duration) -> Result<Received, SourceError> {
        match self.recv_timeout(timeout) {
            Ok(f) => Ok(Received::Fragment(f)),
            // crossbeam reports a hang-up only once the queue is drained
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => {
                Ok(Received::Ended)
            }
        }
    }
}

impl PathSink for Sender<StitchedPath> {
    fn send_path(&mut self, path: StitchedPath) -> Result<(), SinkError> {
        self.send(path).map_err(|_| SinkError::Disconnected)
    }
}

impl PathSink for Vec<StitchedPath> {
    fn send_path(&mut self, path: StitchedPath) -> Result<(), SinkError> {
        self.push(path);
        Ok(())
    }
}
