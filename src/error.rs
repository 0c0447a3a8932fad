use std::path::PathBuf;

use blockscan_support::reader::ReadError;
use thiserror::Error;

/// Conditions that abort a run. Everything else the engine survives: it is
/// counted in [`crate::logging::Diagnostics`] and the walk continues.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("no block data found: failed to open {0}")]
    MissingData(PathBuf),

    #[error("{0} is full; rebuild with larger capacity")]
    CapacityExhausted(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Why a single record could not be decoded. Non-fatal: the scanner or the
/// block walk flags the record and moves on.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error(transparent)]
    Read(#[from] ReadError),

    #[error("script length {0} exceeds the {1}-byte cap")]
    ScriptTooLong(usize, usize),

    #[error("transaction declares {0} inputs, cap is {1}")]
    TooManyInputs(usize, usize),

    #[error("transaction declares {0} outputs, cap is {1}")]
    TooManyOutputs(usize, usize),

    #[error("block declares {0} transactions, cap is {1}")]
    TooManyTransactions(usize, usize),
}
