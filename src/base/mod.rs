//! Base types and error handling.
//!
//! Provides foundational types mirroring Chromium's `net/base/`:
//! - [`NetError`]: Network error codes matching `net_error_list.h`
//! - [`ExchangeState`] / [`LoadState`]: per-exchange progress
//! - [`Observer`]: lifecycle hooks for requests and sessions

pub mod context;
pub mod events;
pub mod loadstate;
pub mod neterror;

pub use events::{ExchangeEvents, Observer, Observers, RequestInfo, TracingObserver};
pub use loadstate::{Direction, ExchangeState, LoadState, Protocol};
pub use neterror::{ErrorKind, NetError};

#[cfg(test)]
mod tests;
