//! Lazily established, single-attempt connection lifecycle

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::OnceCell;

use crate::error::ExecError;

/// Lifecycle of a client's connection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No attempt made yet
    Unstarted,
    /// First attempt in flight
    Connecting,
    /// Session established
    Ready,
    /// The one attempt failed; the client will not retry
    Failed,
    /// Closed by the caller
    Closed,
}

/// Counts callers waiting on a connection attempt
struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Holds at most one session, created by the first caller that needs it.
///
/// Concurrent first callers await the same attempt. Its outcome, failure
/// included, is kept for the lifetime of the holder. A session that finishes
/// connecting after `close` is never handed out; it is returned once from
/// [`LazySession::take_for_teardown`] instead.
#[derive(Debug)]
pub struct LazySession<S> {
    cell: OnceCell<Result<S, ExecError>>,
    in_flight: AtomicUsize,
    closed: AtomicBool,
    torn_down: AtomicBool,
}

impl<S> Default for LazySession<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S> LazySession<S> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            cell: OnceCell::const_new(),
            in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Return the session, running `connect` if no attempt was made yet
    ///
    /// # Errors
    /// The cached connection error, or `NotConnected` once `close` was called,
    /// including when `close` happened while this call was connecting
    pub async fn get_or_connect<F, Fut>(&self, connect: F) -> Result<&S, ExecError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<S, ExecError>>,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(ExecError::NotConnected);
        }

        let outcome = {
            let _in_flight = InFlight::enter(&self.in_flight);
            self.cell.get_or_init(connect).await
        };

        if self.closed.load(Ordering::SeqCst) {
            return Err(ExecError::NotConnected);
        }

        outcome.as_ref().map_err(Clone::clone)
    }

    /// Established session, if any
    pub fn get(&self) -> Option<&S> {
        if self.closed.load(Ordering::SeqCst) {
            return None;
        }
        self.cell.get().and_then(|r| r.as_ref().ok())
    }

    /// Mark closed, returning the session that should be torn down
    pub fn close(&self) -> Option<&S> {
        self.closed.store(true, Ordering::SeqCst);
        self.take_for_teardown()
    }

    /// After `close`, the established session that nobody has torn down yet
    ///
    /// Returns `Some` at most once over the lifetime of the holder.
    pub fn take_for_teardown(&self) -> Option<&S> {
        if !self.closed.load(Ordering::SeqCst) {
            return None;
        }
        let session = self.cell.get()?.as_ref().ok()?;
        (!self.torn_down.swap(true, Ordering::SeqCst)).then_some(session)
    }

    #[must_use]
    pub fn state(&self) -> ConnectionState {
        if self.closed.load(Ordering::SeqCst) {
            return ConnectionState::Closed;
        }
        match self.cell.get() {
            Some(Ok(_)) => ConnectionState::Ready,
            Some(Err(_)) => ConnectionState::Failed,
            None if self.in_flight.load(Ordering::SeqCst) > 0 => ConnectionState::Connecting,
            None => ConnectionState::Unstarted,
        }
    }
}
