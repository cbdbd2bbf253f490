//! Exchange progress states.
//!
//! [`ExchangeState`] is the engine's own state machine vocabulary;
//! [`LoadState`] is the coarser public view, roughly matching
//! `net/base/load_states.h`.

use serde::{Deserialize, Serialize};

/// Which side of the wire an exchange sits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Client,
    Server,
}

/// Application protocol carried by an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Protocol {
    Http,
    WebSocket,
}

/// State of one HTTP exchange or WebSocket session.
///
/// Client exchanges walk `Connecting -> SendingHeaders -> SendingBody ->
/// AwaitingResponse -> ReceivingHeaders -> ReceivingBody -> Complete`.
/// Server exchanges start at `ReceivingHeaders` and finish by sending.
/// A successful upgrade moves either side into `Open`, and the session ends
/// in `Closed`. `Failed` is reachable from every non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ExchangeState {
    #[default]
    Connecting,
    SendingHeaders,
    SendingBody,
    AwaitingResponse,
    ReceivingHeaders,
    ReceivingBody,
    Complete,
    Open,
    Closing,
    Closed,
    Failed,
}

impl ExchangeState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ExchangeState::Complete | ExchangeState::Closed | ExchangeState::Failed
        )
    }

    /// Whether `self -> next` is a legal edge.
    pub fn can_transition_to(self, next: ExchangeState) -> bool {
        use ExchangeState::*;

        if self.is_terminal() {
            return false;
        }
        if next == Failed {
            return true;
        }
        match self {
            Connecting => matches!(next, SendingHeaders | ReceivingHeaders),
            SendingHeaders => matches!(next, SendingBody | AwaitingResponse | Complete | Open),
            SendingBody => matches!(next, AwaitingResponse | Complete),
            AwaitingResponse => matches!(next, ReceivingHeaders),
            ReceivingHeaders => {
                matches!(next, ReceivingBody | Complete | Open | SendingHeaders)
            }
            ReceivingBody => matches!(next, Complete | SendingHeaders),
            Open => matches!(next, Closing | Closed),
            Closing => matches!(next, Closed),
            Complete | Closed | Failed => false,
        }
    }

    /// Map to the public load state.
    pub fn to_load_state(self) -> LoadState {
        match self {
            ExchangeState::Connecting => LoadState::Connecting,
            ExchangeState::SendingHeaders | ExchangeState::SendingBody => LoadState::SendingRequest,
            ExchangeState::AwaitingResponse => LoadState::WaitingForResponse,
            ExchangeState::ReceivingHeaders | ExchangeState::ReceivingBody => {
                LoadState::ReadingResponse
            }
            ExchangeState::Open | ExchangeState::Closing => LoadState::WebSocketOpen,
            ExchangeState::Complete | ExchangeState::Closed | ExchangeState::Failed => {
                LoadState::Idle
            }
        }
    }
}

/// The current state of a request, as reported to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LoadState {
    /// The request is idle.
    #[default]
    Idle,

    /// Resolving the host.
    ResolvingHost,

    /// Waiting for an available socket.
    WaitingForAvailableSocket,

    /// Connecting to the host (TCP handshake).
    Connecting,

    /// Establishing an SSL connection.
    SslHandshake,

    /// Sending the HTTP request.
    SendingRequest,

    /// Waiting for the server response (TTFB).
    WaitingForResponse,

    /// Reading the response body.
    ReadingResponse,

    /// Exchanging WebSocket frames.
    WebSocketOpen,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_happy_path() {
        use ExchangeState::*;
        let path = [
            Connecting,
            SendingHeaders,
            SendingBody,
            AwaitingResponse,
            ReceivingHeaders,
            ReceivingBody,
            Complete,
        ];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_failed_reachable_from_non_terminal() {
        use ExchangeState::*;
        for state in [
            Connecting,
            SendingHeaders,
            SendingBody,
            AwaitingResponse,
            ReceivingHeaders,
            ReceivingBody,
            Open,
            Closing,
        ] {
            assert!(state.can_transition_to(Failed));
        }
        for state in [Complete, Closed, Failed] {
            assert!(!state.can_transition_to(Failed));
        }
    }

    #[test]
    fn test_upgrade_edges() {
        assert!(ExchangeState::ReceivingHeaders.can_transition_to(ExchangeState::Open));
        assert!(ExchangeState::Open.can_transition_to(ExchangeState::Closing));
        assert!(ExchangeState::Closing.can_transition_to(ExchangeState::Closed));
        assert!(!ExchangeState::Open.can_transition_to(ExchangeState::Complete));
    }

    #[test]
    fn test_load_state_mapping() {
        assert_eq!(ExchangeState::Connecting.to_load_state(), LoadState::Connecting);
        assert_eq!(
            ExchangeState::AwaitingResponse.to_load_state(),
            LoadState::WaitingForResponse
        );
        assert_eq!(ExchangeState::Failed.to_load_state(), LoadState::Idle);
    }
}
