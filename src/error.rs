//! The typed error hierarchy returned by every fallible core operation. One variant per
//! kind named in spec §7; see that section for the propagation rules each variant follows.

use thiserror::Error;

use crate::types::EntryId;

#[derive(Error, Debug)]
pub enum Error {
    /// The compiled word database file is truncated or fails a structural invariant.
    #[error("malformed database: {0}")]
    MalformedDatabase(String),

    /// The grid template is non-rectangular or contains a character outside `A-Z a-z . # `.
    #[error("malformed template: {0}")]
    MalformedTemplate(String),

    /// An entry's initial bitmap is empty, or a pre-filled word isn't in the database.
    #[error("template is infeasible: {0}")]
    InfeasibleTemplate(String),

    /// The search exhausted its space without finding a complete fill.
    #[error("no solution exists for this template")]
    NoSolution,

    /// An invariant that should be guaranteed by construction was violated. This indicates
    /// a bug in the engine, not a problem with user input.
    #[error("internal consistency error at entry {entry}: {detail}")]
    InternalConsistencyError { entry: EntryId, detail: String },

    /// Wraps an I/O failure encountered while reading a database or template file.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
