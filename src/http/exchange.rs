//! Per-exchange state tracking.

use crate::base::loadstate::{Direction, ExchangeState, LoadState, Protocol};
use crate::base::neterror::NetError;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::time::Instant;

static NEXT_EXCHANGE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id for observers and logs.
pub fn next_exchange_id() -> u64 {
    NEXT_EXCHANGE_ID.fetch_add(1, Ordering::Relaxed)
}

/// One request/response pair or one WebSocket session.
///
/// Owns its [`ExchangeState`] and enforces the legal edges between states.
/// Terminal states are sticky: once `Complete`, `Closed` or `Failed`, later
/// transitions are ignored.
#[derive(Debug)]
pub struct Exchange {
    id: u64,
    direction: Direction,
    protocol: Protocol,
    state: ExchangeState,
    deadline: Option<Instant>,
    error: Option<NetError>,
}

impl Exchange {
    /// A client exchange, starting in `Connecting`.
    pub fn client(id: u64, deadline: Option<Instant>) -> Self {
        Self {
            id,
            direction: Direction::Client,
            protocol: Protocol::Http,
            state: ExchangeState::Connecting,
            deadline,
            error: None,
        }
    }

    /// A server exchange; the connection is already up, so it starts
    /// receiving the request head.
    pub fn server(id: u64) -> Self {
        Self {
            id,
            direction: Direction::Server,
            protocol: Protocol::Http,
            state: ExchangeState::ReceivingHeaders,
            deadline: None,
            error: None,
        }
    }

    /// A WebSocket session whose upgrade already completed.
    pub fn websocket(id: u64, direction: Direction) -> Self {
        Self {
            id,
            direction,
            protocol: Protocol::WebSocket,
            state: ExchangeState::Open,
            deadline: None,
            error: None,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    pub fn state(&self) -> ExchangeState {
        self.state
    }

    pub fn load_state(&self) -> LoadState {
        self.state.to_load_state()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time left before the deadline; `None` when there is no deadline.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn error(&self) -> Option<&NetError> {
        self.error.as_ref()
    }

    /// Move to `next`. Returns false, leaving the state unchanged, for an
    /// illegal edge.
    pub fn advance(&mut self, next: ExchangeState) -> bool {
        if !self.state.can_transition_to(next) {
            debug_assert!(
                self.state.is_terminal(),
                "illegal exchange transition {:?} -> {:?}",
                self.state,
                next
            );
            tracing::debug!(
                id = self.id,
                from = ?self.state,
                to = ?next,
                "ignored exchange transition"
            );
            return false;
        }
        tracing::trace!(id = self.id, from = ?self.state, to = ?next, "exchange transition");
        if next == ExchangeState::Open {
            self.protocol = Protocol::WebSocket;
        }
        self.state = next;
        true
    }

    /// Enter `Failed`, recording the cause. No-op once terminal.
    pub fn fail(&mut self, error: &NetError) {
        if self.state.is_terminal() {
            return;
        }
        tracing::debug!(id = self.id, state = ?self.state, %error, "exchange failed");
        self.state = ExchangeState::Failed;
        self.error = Some(error.clone());
    }
}
