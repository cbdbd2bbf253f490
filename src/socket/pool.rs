//! Bounded pool of reusable transport connections.
//!
//! Partitions are keyed by [`Endpoint`]. Each partition keeps a LIFO idle
//! stack, a count of open connections (idle + in use + dialing) and a queue
//! of callers waiting for capacity. All three are mutated only while holding
//! the partition's map entry, which is the pool's one critical section.
//!
//! Capacity moves between callers as RAII values: a [`PooledConnection`]
//! for a live socket, a `SlotReservation` for the right to dial one. If a
//! value is dropped anywhere (including inside a waiter's channel after the
//! waiter was cancelled) its `Drop` gives the capacity back, so `total_open`
//! can never leak.

use crate::base::neterror::NetError;
use crate::socket::connectjob::Connector;
use crate::socket::endpoint::Endpoint;
use crate::socket::stream::BoxedSocket;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Request priority (matches Chromium's RequestPriority).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub enum RequestPriority {
    Throttled = 0,
    Idle = 1,
    Lowest = 2,
    Low = 3,
    #[default]
    Medium = 4,
    Highest = 5,
}

/// Pool tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Upper bound on open connections per partition.
    pub max_open_per_endpoint: usize,
    /// How long `acquire` waits for capacity by default.
    pub acquire_timeout: Duration,
    /// Idle lifetime of a connection that has carried at least one exchange.
    pub idle_timeout: Duration,
    /// Idle lifetime of a connection that was dialed but never used.
    pub unused_idle_timeout: Duration,
    /// Period of the background staleness sweep.
    pub sweep_interval: Duration,
    /// Per-address TCP connect timeout.
    pub connect_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open_per_endpoint: 6,
            acquire_timeout: Duration::from_secs(30),
            idle_timeout: Duration::from_secs(90),
            unused_idle_timeout: Duration::from_secs(10),
            sweep_interval: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Idle,
    InUse,
    Closing,
    Closed,
}

/// A transport connection and its bookkeeping.
///
/// Owned by the pool while idle and by exactly one [`PooledConnection`]
/// while in use.
#[derive(Debug)]
pub struct Connection {
    id: u64,
    endpoint: Endpoint,
    socket: BoxedSocket,
    state: ConnectionState,
    created_at: Instant,
    last_used_at: Instant,
    use_count: u32,
}

impl Connection {
    fn new(id: u64, endpoint: Endpoint, socket: BoxedSocket) -> Self {
        let now = Instant::now();
        Self {
            id,
            endpoint,
            socket,
            state: ConnectionState::InUse,
            created_at: now,
            last_used_at: now,
            use_count: 0,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn last_used_at(&self) -> Instant {
        self.last_used_at
    }

    /// Number of exchanges this connection has been handed out for.
    pub fn use_count(&self) -> u32 {
        self.use_count
    }

    /// Follows Chromium's IdleSocket::IsUsable():
    /// previously-used sockets must be connected AND idle, never-used
    /// sockets only need to be connected.
    fn is_usable(&self) -> Result<(), NetError> {
        if self.use_count > 0 {
            if !self.socket.is_connected_and_idle() {
                return if self.socket.is_connected() {
                    Err(NetError::DataReceivedUnexpectedly)
                } else {
                    Err(NetError::SocketRemoteClosed)
                };
            }
        } else if !self.socket.is_connected() {
            return Err(NetError::SocketRemoteClosed);
        }
        Ok(())
    }
}

/// What a waiter receives when capacity frees up.
enum Handoff {
    Reused(PooledConnection),
    Slot(SlotReservation),
}

struct Waiter {
    id: u64,
    priority: RequestPriority,
    sender: oneshot::Sender<Handoff>,
}

impl Waiter {
    fn cmp_priority(&self, other: &Self) -> CmpOrdering {
        // Higher priority first, then lower id (older) first.
        match self.priority.cmp(&other.priority) {
            CmpOrdering::Equal => other.id.cmp(&self.id),
            other => other,
        }
    }
}

/// Per-partition state.
struct Group {
    idle: Vec<Connection>,
    open: usize,
    waiters: Vec<Waiter>,
}

impl Group {
    fn new() -> Self {
        Self {
            idle: Vec::new(),
            open: 0,
            waiters: Vec::new(),
        }
    }

    fn pop_highest_priority_waiter(&mut self) -> Option<Waiter> {
        let idx = self
            .waiters
            .iter()
            .enumerate()
            .max_by(|(_, a), (_, b)| a.cmp_priority(b))
            .map(|(i, _)| i)?;
        Some(self.waiters.remove(idx))
    }

    fn is_empty(&self) -> bool {
        self.idle.is_empty() && self.open == 0 && self.waiters.is_empty()
    }
}

struct PoolInner {
    config: PoolConfig,
    connector: Arc<dyn Connector>,
    groups: DashMap<Endpoint, Group>,
    total_open: AtomicUsize,
    next_id: AtomicU64,
    closed: AtomicBool,
}

/// Point-in-time counters for one partition.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub open: usize,
    pub idle: usize,
    pub in_use: usize,
    pub pending: usize,
}

/// Manages a pool of sockets, enforcing per-endpoint limits.
///
/// Cloning is cheap; clones share all state.
#[derive(Clone)]
pub struct ClientSocketPool {
    inner: Arc<PoolInner>,
}

impl std::fmt::Debug for ClientSocketPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientSocketPool")
            .field("max_open_per_endpoint", &self.inner.config.max_open_per_endpoint)
            .field("total_open", &self.total_open_all())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl ClientSocketPool {
    pub fn new(connector: Arc<dyn Connector>, config: PoolConfig) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                config,
                connector,
                groups: DashMap::new(),
                total_open: AtomicUsize::new(0),
                next_id: AtomicU64::new(1),
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn config(&self) -> &PoolConfig {
        &self.inner.config
    }

    fn next_id(&self) -> u64 {
        self.inner.next_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Acquire with default priority.
    pub async fn acquire(
        &self,
        endpoint: &Endpoint,
        timeout: Duration,
    ) -> Result<PooledConnection, NetError> {
        self.acquire_with_priority(endpoint, RequestPriority::default(), timeout)
            .await
    }

    /// Hand out an idle connection, dial a new one, or wait for capacity.
    ///
    /// `timeout` bounds only the wait for capacity; dialing is bounded by
    /// the connector. Waiting past `timeout` yields `PoolExhausted`.
    pub async fn acquire_with_priority(
        &self,
        endpoint: &Endpoint,
        priority: RequestPriority,
        timeout: Duration,
    ) -> Result<PooledConnection, NetError> {
        let deadline = Instant::now() + timeout;

        let (id, rx) = match self.checkout(endpoint, priority)? {
            Checkout::Reused(conn) => return Ok(conn),
            Checkout::Slot(slot) => return self.dial(slot).await,
            Checkout::Wait(id, rx) => (id, rx),
        };

        tracing::debug!(%endpoint, waiter = id, "partition saturated, waiting");
        let mut pending = PendingAcquire {
            pool: self,
            endpoint,
            id,
            rx: Some(rx),
        };

        let handoff = match pending.wait(deadline).await? {
            Some(handoff) => handoff,
            None => {
                tracing::debug!(%endpoint, waiter = id, "acquire timed out");
                return Err(NetError::PoolExhausted {
                    endpoint: endpoint.to_string(),
                });
            }
        };

        match handoff {
            Handoff::Reused(conn) => Ok(conn),
            Handoff::Slot(slot) => self.dial(slot).await,
        }
    }

    /// The synchronous half of acquire: one pass through the critical section.
    fn checkout(
        &self,
        endpoint: &Endpoint,
        priority: RequestPriority,
    ) -> Result<Checkout, NetError> {
        let mut group = self
            .inner
            .groups
            .entry(endpoint.clone())
            .or_insert_with(Group::new);

        // Checked under the entry lock so close_all cannot race a new waiter in.
        if self.is_closed() {
            return Err(NetError::PoolClosed);
        }

        while let Some(mut conn) = group.idle.pop() {
            match conn.is_usable() {
                Ok(()) => {
                    conn.state = ConnectionState::InUse;
                    conn.use_count += 1;
                    tracing::trace!(%endpoint, conn = conn.id, "reusing idle connection");
                    return Ok(Checkout::Reused(PooledConnection::new(conn, self.clone())));
                }
                Err(e) => {
                    tracing::debug!(
                        %endpoint,
                        conn = conn.id,
                        error = %e,
                        "discarding stale idle connection"
                    );
                    conn.state = ConnectionState::Closed;
                    group.open -= 1;
                    self.inner.total_open.fetch_sub(1, Ordering::Relaxed);
                }
            }
        }

        if group.open < self.inner.config.max_open_per_endpoint {
            group.open += 1;
            self.inner.total_open.fetch_add(1, Ordering::Relaxed);
            return Ok(Checkout::Slot(SlotReservation::new(endpoint.clone(), self.clone())));
        }

        let (tx, rx) = oneshot::channel();
        let id = self.next_id();
        group.waiters.push(Waiter {
            id,
            priority,
            sender: tx,
        });
        Ok(Checkout::Wait(id, rx))
    }

    async fn dial(&self, slot: SlotReservation) -> Result<PooledConnection, NetError> {
        let endpoint = slot.endpoint.clone();
        tracing::debug!(%endpoint, "opening new connection");
        // On error or cancellation the reservation drops and frees the slot.
        let socket = self.inner.connector.connect(&endpoint).await?;

        let mut conn = Connection::new(self.next_id(), endpoint, socket);
        conn.use_count = 1;
        slot.disarm();
        Ok(PooledConnection::new(conn, self.clone()))
    }

    /// Return a healthy connection: to the best waiter, else to the idle stack.
    fn check_in(&self, mut conn: Connection) {
        let endpoint = conn.endpoint.clone();
        let mut group = self
            .inner
            .groups
            .entry(endpoint.clone())
            .or_insert_with(Group::new);

        if self.is_closed() {
            drop(conn);
            group.open -= 1;
            self.inner.total_open.fetch_sub(1, Ordering::Relaxed);
            return;
        }

        conn.last_used_at = Instant::now();
        conn.use_count += 1;
        let handoff = Handoff::Reused(PooledConnection::new(conn, self.clone()));
        match offer(&mut group, handoff) {
            None => tracing::trace!(%endpoint, "connection handed to waiter"),
            Some(leftover) => self.park(&mut group, leftover),
        }
    }

    /// A connection was destroyed or a dial failed: pass the slot on.
    fn slot_freed(&self, endpoint: &Endpoint) {
        let mut group = self
            .inner
            .groups
            .entry(endpoint.clone())
            .or_insert_with(Group::new);

        if self.is_closed() {
            group.open -= 1;
            self.inner.total_open.fetch_sub(1, Ordering::Relaxed);
            return;
        }

        let slot = Handoff::Slot(SlotReservation::new(endpoint.clone(), self.clone()));
        if let Some(leftover) = offer(&mut group, slot) {
            self.park(&mut group, leftover);
        }
    }

    /// Keep a handoff nobody waited for. Never drops a guard, so it is safe
    /// to call with the partition entry held.
    fn park(&self, group: &mut Group, handoff: Handoff) {
        match handoff {
            Handoff::Reused(pooled) => {
                if let Some(mut conn) = pooled.into_connection() {
                    conn.use_count = conn.use_count.saturating_sub(1);
                    conn.state = ConnectionState::Idle;
                    tracing::trace!(
                        endpoint = %conn.endpoint,
                        conn = conn.id,
                        "connection parked idle"
                    );
                    group.idle.push(conn);
                }
            }
            Handoff::Slot(slot) => {
                slot.disarm();
                debug_assert!(group.open > 0, "open count underflow");
                group.open -= 1;
                self.inner.total_open.fetch_sub(1, Ordering::Relaxed);
            }
        }
    }

    /// Dial one connection ahead of demand and park it idle.
    ///
    /// Returns `false` without dialing if the partition is already full.
    pub async fn preconnect(&self, endpoint: &Endpoint) -> Result<bool, NetError> {
        let slot = {
            let mut group = self
                .inner
                .groups
                .entry(endpoint.clone())
                .or_insert_with(Group::new);
            if self.is_closed() {
                return Err(NetError::PoolClosed);
            }
            if group.open >= self.inner.config.max_open_per_endpoint {
                return Ok(false);
            }
            group.open += 1;
            self.inner.total_open.fetch_add(1, Ordering::Relaxed);
            SlotReservation::new(endpoint.clone(), self.clone())
        };

        let socket = self.inner.connector.connect(endpoint).await?;
        let conn = Connection::new(self.next_id(), endpoint.clone(), socket);
        slot.disarm();
        self.check_in(conn);
        Ok(true)
    }

    /// Clean up idle sockets based on timeout.
    /// - Used sockets: `idle_timeout`
    /// - Unused sockets: `unused_idle_timeout` (Chromium unused_idle_socket_timeout)
    ///
    /// Returns the number of connections closed.
    pub fn cleanup_idle_sockets(&self) -> usize {
        let now = Instant::now();
        let config = &self.inner.config;
        let mut closed = 0;

        self.inner.groups.retain(|endpoint, group| {
            let before = group.idle.len();
            group.idle.retain(|conn| {
                let timeout = if conn.use_count > 0 {
                    config.idle_timeout
                } else {
                    config.unused_idle_timeout
                };
                let fresh = now.saturating_duration_since(conn.last_used_at) < timeout;
                fresh && conn.socket.is_connected()
            });
            let removed = before - group.idle.len();
            if removed > 0 {
                tracing::debug!(%endpoint, removed, "swept idle connections");
                group.open -= removed;
                self.inner.total_open.fetch_sub(removed, Ordering::Relaxed);
                closed += removed;
            }
            !group.is_empty()
        });
        closed
    }

    /// Start a background task to periodically clean up idle sockets.
    ///
    /// The task holds only a weak reference and exits once every pool
    /// handle is gone.
    pub fn start_cleanup_task(&self) -> JoinHandle<()> {
        let weak: Weak<PoolInner> = Arc::downgrade(&self.inner);
        let period = self.inner.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(inner) = weak.upgrade() else {
                    break;
                };
                let pool = ClientSocketPool { inner };
                if pool.is_closed() {
                    break;
                }
                pool.cleanup_idle_sockets();
            }
        })
    }

    /// Close every idle connection and fail every waiter with `PoolClosed`.
    ///
    /// Connections currently in use are closed when released.
    pub fn close_all(&self) {
        self.inner.closed.store(true, Ordering::SeqCst);
        let mut idle_closed = 0;
        let mut waiters_failed = 0;

        self.inner.groups.retain(|_, group| {
            let idle = std::mem::take(&mut group.idle);
            group.open -= idle.len();
            self.inner.total_open.fetch_sub(idle.len(), Ordering::Relaxed);
            idle_closed += idle.len();
            waiters_failed += group.waiters.len();
            // Dropping the senders wakes every waiter with a closed channel.
            group.waiters.clear();
            !group.is_empty()
        });
        tracing::debug!(idle_closed, waiters_failed, "pool closed");
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    pub fn stats(&self, endpoint: &Endpoint) -> PoolStats {
        self.inner
            .groups
            .get(endpoint)
            .map(|g| PoolStats {
                open: g.open,
                idle: g.idle.len(),
                in_use: g.open - g.idle.len(),
                pending: g.waiters.len(),
            })
            .unwrap_or_default()
    }

    /// Open connections (idle, in use or dialing) for one partition.
    pub fn total_open(&self, endpoint: &Endpoint) -> usize {
        self.stats(endpoint).open
    }

    pub fn idle_count(&self, endpoint: &Endpoint) -> usize {
        self.stats(endpoint).idle
    }

    pub fn pending_count(&self, endpoint: &Endpoint) -> usize {
        self.stats(endpoint).pending
    }

    pub fn total_open_all(&self) -> usize {
        self.inner.total_open.load(Ordering::Relaxed)
    }

    /// Get total idle socket count across all groups.
    pub fn idle_socket_count(&self) -> usize {
        self.inner.groups.iter().map(|g| g.idle.len()).sum()
    }
}

/// Offer `handoff` to waiters in priority order. Returns it if nobody took it.
fn offer(group: &mut Group, mut handoff: Handoff) -> Option<Handoff> {
    while let Some(waiter) = group.pop_highest_priority_waiter() {
        match waiter.sender.send(handoff) {
            Ok(()) => return None,
            // Receiver is gone (cancelled or timed out); try the next one.
            Err(back) => handoff = back,
        }
    }
    Some(handoff)
}

enum Checkout {
    Reused(PooledConnection),
    Slot(SlotReservation),
    Wait(u64, oneshot::Receiver<Handoff>),
}

/// A registered waiter. Dropping it deregisters.
struct PendingAcquire<'a> {
    pool: &'a ClientSocketPool,
    endpoint: &'a Endpoint,
    id: u64,
    rx: Option<oneshot::Receiver<Handoff>>,
}

impl PendingAcquire<'_> {
    /// `Ok(None)` on timeout.
    async fn wait(&mut self, deadline: Instant) -> Result<Option<Handoff>, NetError> {
        let Some(rx) = self.rx.as_mut() else {
            return Ok(None);
        };
        let result = tokio::time::timeout_at(deadline, rx).await;
        match result {
            Ok(Ok(handoff)) => {
                self.rx = None;
                Ok(Some(handoff))
            }
            Ok(Err(_)) => {
                self.rx = None;
                Err(NetError::PoolClosed)
            }
            Err(_) => {
                // If our entry is already gone, the handoff was sent under the
                // same lock that removed it, so it is sitting in the channel.
                if self.deregister() {
                    return Ok(None);
                }
                match self.rx.take().map(|mut rx| rx.try_recv()) {
                    Some(Ok(handoff)) => Ok(Some(handoff)),
                    _ => Err(NetError::PoolClosed),
                }
            }
        }
    }

    /// Remove this waiter if still queued. Returns whether it was.
    fn deregister(&self) -> bool {
        let Some(mut group) = self.pool.inner.groups.get_mut(self.endpoint) else {
            return false;
        };
        let before = group.waiters.len();
        group.waiters.retain(|w| w.id != self.id);
        group.waiters.len() != before
    }
}

impl Drop for PendingAcquire<'_> {
    fn drop(&mut self) {
        if self.rx.is_some() {
            self.deregister();
            // Any handoff already in the channel drops with `rx` below and
            // returns its capacity through its own Drop.
        }
    }
}

/// The right to open one connection in a partition.
struct SlotReservation {
    endpoint: Endpoint,
    pool: Option<ClientSocketPool>,
}

impl SlotReservation {
    fn new(endpoint: Endpoint, pool: ClientSocketPool) -> Self {
        Self {
            endpoint,
            pool: Some(pool),
        }
    }

    /// Keep the slot counted without releasing it on drop.
    fn disarm(mut self) {
        self.pool = None;
    }
}

impl Drop for SlotReservation {
    fn drop(&mut self) {
        if let Some(pool) = self.pool.take() {
            pool.slot_freed(&self.endpoint);
        }
    }
}

/// A connection checked out of the pool.
///
/// Call [`release`](Self::release) when the exchange ends. Dropping without
/// releasing closes the connection and frees its slot.
#[derive(Debug)]
pub struct PooledConnection {
    conn: Option<Connection>,
    pool: ClientSocketPool,
}

impl PooledConnection {
    fn new(conn: Connection, pool: ClientSocketPool) -> Self {
        Self {
            conn: Some(conn),
            pool,
        }
    }

    /// Give the connection back. Idempotent: later calls do nothing.
    ///
    /// `reusable` must be false if the exchange failed, timed out or the
    /// peer asked to close; the stream position is then unknown.
    pub fn release(&mut self, reusable: bool) {
        let Some(mut conn) = self.conn.take() else {
            tracing::trace!("release on already released connection");
            return;
        };

        if reusable && conn.is_usable().is_ok() {
            self.pool.check_in(conn);
        } else {
            tracing::debug!(endpoint = %conn.endpoint, conn = conn.id, "closing connection");
            conn.state = ConnectionState::Closing;
            let endpoint = conn.endpoint.clone();
            drop(conn);
            self.pool.slot_freed(&endpoint);
        }
    }

    pub fn is_released(&self) -> bool {
        self.conn.is_none()
    }

    /// Whether this connection carried an earlier exchange.
    pub fn was_reused(&self) -> bool {
        self.conn.as_ref().is_some_and(|c| c.use_count > 1)
    }

    pub fn connection(&self) -> Option<&Connection> {
        self.conn.as_ref()
    }

    /// Leave the pool's accounting: the caller now owns the socket and the
    /// slot is freed. Used for protocol upgrades that never return to the
    /// idle set.
    pub fn detach(mut self) -> Option<BoxedSocket> {
        let conn = self.conn.take()?;
        let endpoint = conn.endpoint.clone();
        let socket = conn.socket;
        self.pool.slot_freed(&endpoint);
        Some(socket)
    }

    /// Unwrap without touching the pool's counters.
    fn into_connection(mut self) -> Option<Connection> {
        self.conn.take()
    }

    fn socket_mut(&mut self) -> std::io::Result<&mut BoxedSocket> {
        self.conn
            .as_mut()
            .map(|c| &mut c.socket)
            .ok_or_else(|| {
                std::io::Error::new(std::io::ErrorKind::NotConnected, "connection released")
            })
    }
}

impl Drop for PooledConnection {
    fn drop(&mut self) {
        if self.conn.is_some() {
            self.release(false);
        }
    }
}

impl AsyncRead for PooledConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<std::io::Result<()>> {
        match self.socket_mut() {
            Ok(socket) => Pin::new(socket).poll_read(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}

impl AsyncWrite for PooledConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<std::io::Result<usize>> {
        match self.socket_mut() {
            Ok(socket) => Pin::new(socket).poll_write(cx, buf),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.socket_mut() {
            Ok(socket) => Pin::new(socket).poll_flush(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        match self.socket_mut() {
            Ok(socket) => Pin::new(socket).poll_shutdown(cx),
            Err(e) => Poll::Ready(Err(e)),
        }
    }
}
