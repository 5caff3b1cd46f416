use thiserror::Error;

/// Error taxonomy for a catalog search.
///
/// Every failure a search can hit is folded into one of these categories
/// before it crosses the tool boundary; the host only ever sees
/// [`SearchError::category`], never transport detail.
#[derive(Error, Debug, Clone)]
pub enum SearchError {
    /// Malformed query. Surfaced immediately, never retried.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Transient transport failure. Retried with backoff up to a budget.
    #[error("network error: {0}")]
    Network(String),

    /// The remote service answered with an unexpected shape or status.
    #[error("unexpected response from catalog service: {0}")]
    RemoteProtocol(String),

    /// The remote service no longer knows the session token.
    #[error("search session expired")]
    SessionExpired,

    /// Host-initiated abort.
    #[error("search cancelled")]
    Cancelled,
}

impl SearchError {
    /// Stable category string surfaced in tool error responses.
    pub fn category(&self) -> &'static str {
        match self {
            SearchError::InvalidInput(_) => "invalid_input",
            SearchError::Network(_) => "network_error",
            SearchError::RemoteProtocol(_) => "remote_protocol_error",
            SearchError::SessionExpired => "session_expired",
            SearchError::Cancelled => "cancelled",
        }
    }

    /// Only network errors are worth another attempt with the same session.
    pub fn is_transient(&self) -> bool {
        matches!(self, SearchError::Network(_))
    }
}

impl From<reqwest::Error> for SearchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            SearchError::RemoteProtocol(err.to_string())
        } else {
            SearchError::Network(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_network_is_transient() {
        assert!(SearchError::Network("reset".into()).is_transient());
        assert!(!SearchError::SessionExpired.is_transient());
        assert!(!SearchError::RemoteProtocol("bad json".into()).is_transient());
        assert!(!SearchError::Cancelled.is_transient());
        assert!(!SearchError::InvalidInput("empty".into()).is_transient());
    }

    #[test]
    fn test_categories_are_stable() {
        assert_eq!(SearchError::SessionExpired.category(), "session_expired");
        assert_eq!(SearchError::Cancelled.category(), "cancelled");
    }
}
