//! Lifecycle observation.
//!
//! Observers are registered when a [`Client`](crate::client::Client) or
//! [`HttpServer`](crate::http::server::HttpServer) is built and are invoked
//! inline on the task driving the exchange. They see every start, every
//! completion, and every failure, including cancellation.

use super::loadstate::Direction;
use super::neterror::NetError;
use http::{Method, StatusCode};
use std::fmt;
use std::sync::Arc;

/// Identity of one exchange, as handed to observers.
#[derive(Debug, Clone)]
pub struct RequestInfo {
    pub exchange_id: u64,
    pub direction: Direction,
    pub method: Method,
    pub target: String,
}

impl RequestInfo {
    pub fn new(
        exchange_id: u64,
        direction: Direction,
        method: Method,
        target: impl Into<String>,
    ) -> Self {
        Self {
            exchange_id,
            direction,
            method,
            target: target.into(),
        }
    }
}

/// Receives request lifecycle events.
///
/// All methods default to no-ops. Implementations must not block; they run
/// on the task that drives the exchange.
pub trait Observer: Send + Sync {
    fn on_start(&self, _info: &RequestInfo) {}

    fn on_complete(&self, _info: &RequestInfo, _status: StatusCode) {}

    fn on_error(&self, _info: &RequestInfo, _error: &NetError) {}
}

/// Logs every lifecycle event through `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingObserver;

impl Observer for TracingObserver {
    fn on_start(&self, info: &RequestInfo) {
        tracing::debug!(
            exchange_id = info.exchange_id,
            direction = ?info.direction,
            method = %info.method,
            target = %info.target,
            "request started"
        );
    }

    fn on_complete(&self, info: &RequestInfo, status: StatusCode) {
        tracing::debug!(
            exchange_id = info.exchange_id,
            status = status.as_u16(),
            "request complete"
        );
    }

    fn on_error(&self, info: &RequestInfo, error: &NetError) {
        tracing::warn!(
            exchange_id = info.exchange_id,
            target = %info.target,
            error = %error,
            code = error.as_i32(),
            "request failed"
        );
    }
}

/// An ordered, immutable set of observers.
#[derive(Clone, Default)]
pub struct Observers {
    list: Arc<[Arc<dyn Observer>]>,
}

impl Observers {
    pub fn new(list: Vec<Arc<dyn Observer>>) -> Self {
        Self { list: list.into() }
    }

    pub fn is_empty(&self) -> bool {
        self.list.is_empty()
    }

    pub fn len(&self) -> usize {
        self.list.len()
    }

    pub fn start(&self, info: &RequestInfo) {
        for o in self.list.iter() {
            o.on_start(info);
        }
    }

    pub fn complete(&self, info: &RequestInfo, status: StatusCode) {
        for o in self.list.iter() {
            o.on_complete(info, status);
        }
    }

    pub fn error(&self, info: &RequestInfo, error: &NetError) {
        for o in self.list.iter() {
            o.on_error(info, error);
        }
    }

    /// Track one exchange; reports [`NetError::Aborted`] if dropped unfinished.
    pub fn track(&self, info: RequestInfo) -> ExchangeEvents {
        self.start(&info);
        ExchangeEvents {
            observers: self.clone(),
            info,
            finished: false,
        }
    }
}

impl fmt::Debug for Observers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers").field("count", &self.list.len()).finish()
    }
}

/// Guard that guarantees each tracked exchange reports exactly one outcome.
pub struct ExchangeEvents {
    observers: Observers,
    info: RequestInfo,
    finished: bool,
}

impl ExchangeEvents {
    pub fn info(&self) -> &RequestInfo {
        &self.info
    }

    pub fn complete(mut self, status: StatusCode) {
        self.finished = true;
        self.observers.complete(&self.info, status);
    }

    pub fn error(mut self, error: &NetError) {
        self.finished = true;
        self.observers.error(&self.info, error);
    }
}

impl Drop for ExchangeEvents {
    fn drop(&mut self) {
        if !self.finished {
            self.observers.error(&self.info, &NetError::Aborted);
        }
    }
}
