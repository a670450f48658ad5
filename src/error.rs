//! Failure taxonomy of a verification run.
//!
//! Every check in the harness fails fast: the first [`TbError`] raised by any
//! task terminates the running test.

use crate::phase::Phase;
use std::io;

pub type TbResult<T = ()> = Result<T, TbError>;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TbError {
    /// The DUT (or a model) broke a bus rule, e.g. an address outside a slave window.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A scoreboard comparison failed.
    #[error("transaction mismatch in {path}\ntransaction =>\n{uut}\nref =>\n{reference}")]
    Mismatch {
        path: String,
        uut: String,
        reference: String,
    },

    /// A transaction was dropped, duplicated or left behind.
    #[error("leak detected in {path}: {reason}")]
    Leak { path: String, reason: String },

    /// No progress within the simulated time budget.
    #[error("timeout in phase {phase:?} at {time_ns} ns, waiting on: {blocking}")]
    Timeout {
        phase: Phase,
        time_ns: u64,
        blocking: String,
    },

    /// The test ran into the global simulated-time ceiling.
    #[error("simulation time limit of {limit_ns} ns exceeded")]
    SimTimeLimit { limit_ns: u64 },

    /// Nothing is scheduled anymore but the test has no result.
    #[error("simulation stalled at {time_ns} ns: no more scheduled events")]
    Stalled { time_ns: u64 },

    /// Too many delta cycles at one time step, usually a combinational loop between models.
    #[error("delta cycle limit exceeded at {time_ns} ns (max {max_deltas} deltas)")]
    DeltaCycleLimit { time_ns: u64, max_deltas: u32 },

    #[error("missing field '{field}' in transaction")]
    MissingField { field: String },

    #[error("unknown signal '{0}'")]
    UnknownSignal(String),

    #[error("signal '{0}' declared twice")]
    DuplicateSignal(String),

    #[error("can't convert {time} {unit} to simulation steps: {reason}")]
    TimeConversion {
        time: f64,
        unit: String,
        reason: String,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("task '{0}' was cancelled")]
    TaskCancelled(String),

    #[error("{0}")]
    Failed(String),
}

impl TbError {
    pub fn protocol(msg: impl Into<String>) -> Self {
        TbError::ProtocolViolation(msg.into())
    }

    pub fn leak(path: impl Into<String>, reason: impl Into<String>) -> Self {
        TbError::Leak {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Timeouts usually mean deadlock rather than wrong data.
    pub fn is_hang(&self) -> bool {
        matches!(
            self,
            TbError::Timeout { .. }
                | TbError::SimTimeLimit { .. }
                | TbError::Stalled { .. }
                | TbError::DeltaCycleLimit { .. }
        )
    }
}

impl From<io::Error> for TbError {
    fn from(e: io::Error) -> Self {
        TbError::Io(e.to_string())
    }
}

impl From<toml::de::Error> for TbError {
    fn from(e: toml::de::Error) -> Self {
        TbError::Config(e.to_string())
    }
}
