use std::time::Duration;

use thiserror::Error;

use crate::store::RemoteError;

pub mod extract;
pub mod materialize;
pub mod progress;
pub mod runner;
pub mod submit;

pub use progress::FailureKind;
#[cfg(test)]
pub use runner::NullProgress;
pub use runner::{ProgressSink, ScanKind, ScanRunner};

#[derive(Debug, Error)]
pub enum ScanError {
    #[error("{0}")]
    Validation(String),
    #[error("submission failed: {reason}")]
    Submission {
        reason: String,
        #[source]
        source: RemoteError,
    },
    #[error("could not load results: {reason}")]
    Fetch {
        reason: String,
        #[source]
        source: Option<RemoteError>,
    },
    #[error("change subscription failed: {0}")]
    Subscription(#[source] RemoteError),
    #[error("no scoring progress for {0:?}; scan abandoned")]
    TimedOut(Duration),
    #[error("scan cancelled")]
    Cancelled,
}

impl ScanError {
    pub fn kind(&self) -> FailureKind {
        match self {
            ScanError::Validation(_) => FailureKind::Validation,
            ScanError::Submission { .. } => FailureKind::Submission,
            ScanError::Fetch { .. } => FailureKind::Fetch,
            ScanError::Subscription(_) => FailureKind::Subscription,
            ScanError::TimedOut(_) => FailureKind::TimedOut,
            ScanError::Cancelled => FailureKind::Cancelled,
        }
    }
}
