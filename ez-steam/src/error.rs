//! Errors returned by the call manager and its bridges.

/// Why a bridged call did not produce a payload.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FailureReason {
    /// The platform flagged an I/O failure on the completion.
    #[error("I/O failure")]
    IoFailure,
    /// The completion arrived but reported failure (board not found, upload rejected).
    #[error("rejected by the platform")]
    Rejected,
    /// The platform refused to start the operation.
    #[error("platform did not start the call")]
    NotStarted,
    /// A step while building the payload failed.
    #[error("translation failed: {0}")]
    Translation(String),
    /// The bridge was torn down while the call was in flight.
    #[error("aborted by teardown")]
    TeardownAborted,
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A required platform accessor returned nothing.
    #[error("platform accessor unavailable: {0}")]
    PlatformUnavailable(&'static str),

    #[error("platform initialization failed")]
    InitFailed,

    /// A bridged asynchronous call failed.
    #[error("platform call {call} failed: {reason}")]
    CallFailed {
        call: &'static str,
        reason: FailureReason,
    },

    /// A synchronous accessor reported failure.
    #[error("platform accessor {call} failed")]
    Accessor { call: &'static str },

    #[error("call manager is stopped")]
    Stopped,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to spawn dispatch thread: {0}")]
    Spawn(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn call_failed(call: &'static str, reason: FailureReason) -> Self {
        Error::CallFailed { call, reason }
    }

    /// True for every outcome of a bridged call that did not succeed.
    pub fn is_call_failure(&self) -> bool {
        matches!(self, Error::CallFailed { .. } | Error::Stopped)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_failed_message() {
        let err = Error::call_failed("find_leaderboard", FailureReason::IoFailure);
        assert_eq!(err.to_string(), "platform call find_leaderboard failed: I/O failure");
        assert!(err.is_call_failure());
        assert!(!Error::InitFailed.is_call_failure());
    }
}
