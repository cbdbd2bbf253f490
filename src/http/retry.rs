//! Replay of requests that hit a stale pooled connection.
//!
//! Based on Chromium's `HttpNetworkTransaction::RetryReason` and
//! `ShouldResendRequest`: a reused keep-alive socket may have been closed by
//! the server while it sat idle, and that race shows up as a reset, a close,
//! or an empty response before any response byte. Such a request is sent
//! again once on a fresh connection, provided replaying it is safe.

use crate::base::neterror::NetError;
use http::Method;

/// Reasons for retrying a request (mirrors Chromium's RetryReason enum).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// Server closed connection unexpectedly
    ConnectionReset,
    /// Connection was closed during request
    ConnectionClosed,
    /// Connection was aborted
    ConnectionAborted,
    /// Empty response received
    EmptyResponse,
}

impl RetryReason {
    /// Map a NetError to a RetryReason, if the error is retryable.
    pub fn from_error(error: &NetError) -> Option<Self> {
        match error {
            NetError::ConnectionReset => Some(Self::ConnectionReset),
            NetError::ConnectionClosed | NetError::SocketRemoteClosed => {
                Some(Self::ConnectionClosed)
            }
            NetError::ConnectionAborted => Some(Self::ConnectionAborted),
            NetError::EmptyResponse => Some(Self::EmptyResponse),
            _ => None,
        }
    }
}

/// Methods that may be replayed without changing server state (RFC 9110 9.2.2).
pub fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::HEAD | Method::OPTIONS | Method::TRACE | Method::PUT | Method::DELETE
    )
}

/// Whether a failed attempt should be replayed on a new connection.
pub fn should_resend(
    error: &NetError,
    method: &Method,
    connection_reused: bool,
    response_started: bool,
) -> Option<RetryReason> {
    if !connection_reused || response_started || !is_idempotent(method) {
        return None;
    }
    RetryReason::from_error(error)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_mapping() {
        assert_eq!(
            RetryReason::from_error(&NetError::ConnectionReset),
            Some(RetryReason::ConnectionReset)
        );
        assert_eq!(
            RetryReason::from_error(&NetError::EmptyResponse),
            Some(RetryReason::EmptyResponse)
        );
        assert_eq!(RetryReason::from_error(&NetError::TimedOut), None);
        assert_eq!(RetryReason::from_error(&NetError::InvalidChunkedEncoding), None);
    }

    #[test]
    fn test_only_stale_reused_idempotent() {
        let e = NetError::ConnectionClosed;
        assert!(should_resend(&e, &Method::GET, true, false).is_some());
        assert!(should_resend(&e, &Method::GET, false, false).is_none());
        assert!(should_resend(&e, &Method::GET, true, true).is_none());
        assert!(should_resend(&e, &Method::POST, true, false).is_none());
    }
}
