use thiserror::Error;

use crate::fragment::Direction;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid fragment {id:?}: {reason}")]
    InvalidFragment { id: String, reason: String },

    #[error("Fragment {0} is already resident in the graph")]
    DuplicateFragment(String),

    #[error("Fragment {id} has direction {found}, graph expects {expected}")]
    DirectionMismatch {
        id: String,
        expected: Direction,
        found: Direction,
    },

    #[error("Fragment for node {0} is missing from the cache")]
    MissingFragment(u64),

    #[error("Unknown node {0}")]
    UnknownNode(u64),

    #[error("Config Error: {0}")]
    Config(String),

    #[error("Worker {0} panicked")]
    Worker(String),

    #[error("Assignment Error: {0}")]
    Assignment(String),

    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Json Error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
