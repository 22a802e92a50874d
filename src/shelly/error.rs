use thiserror::Error;

/// Why a single plug poll or control call failed.
///
/// Every variant is a per-device failure: callers fall back to cached state
/// instead of aborting the whole polling cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    #[error("request timed out")]
    Timeout,

    /// Still 429 after the retry budget was spent.
    #[error("rate limited by the Shelly cloud")]
    RateLimited,

    #[error("network error: {0}")]
    Network(String),

    /// The vendor answered but the payload is unusable.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl DeviceError {
    pub(crate) fn protocol(msg: impl Into<String>) -> Self {
        Self::Protocol(msg.into())
    }
}

impl From<reqwest::Error> for DeviceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            Self::Timeout
        } else if e.is_decode() {
            Self::Protocol(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}
