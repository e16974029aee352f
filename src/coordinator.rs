//! Run coordination and graceful shutdown.
//!
//! Every run holds a [`RunTicket`] for as long as it is active. The coordinator refuses new
//! tickets once shutdown has begun and wakes shutdown waiters when the last ticket is dropped,
//! whether its run succeeded, failed or was abandoned by its caller.

use std::collections::HashSet;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use futures::channel::oneshot;
use parking_lot::Mutex;

#[cfg(feature = "tracing")]
use tracing::{debug, trace};

use crate::error::{EngineError, EngineResult};
use crate::types::RunId;

#[derive(Default)]
struct State {
    shutting_down: bool,
    active: HashSet<RunId>,
    waiters: Vec<oneshot::Sender<()>>,
}

struct Inner {
    next_id: AtomicU64,
    state: Mutex<State>,
}

/// Tracks active runs and the shutdown flag. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct Coordinator {
    inner: Arc<Inner>,
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}

impl Coordinator {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                next_id: AtomicU64::new(1),
                state: Mutex::new(State::default()),
            }),
        }
    }

    /// Register a new run.
    ///
    /// # Errors
    ///
    /// [`EngineError::ShuttingDown`] once shutdown has begun.
    pub fn begin(&self) -> EngineResult<RunTicket> {
        let mut state = self.inner.state.lock();
        if state.shutting_down {
            return Err(EngineError::ShuttingDown);
        }
        let id = RunId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        state.active.insert(id);

        #[cfg(feature = "tracing")]
        trace!(run = %id, active = state.active.len(), "run registered");

        Ok(RunTicket {
            id,
            inner: Arc::clone(&self.inner),
        })
    }

    /// Refuse new runs from now on and wait for the active ones to finish.
    ///
    /// The flag is set before this returns; the returned future only waits. It resolves
    /// immediately when nothing is active.
    pub fn shutdown(&self) -> impl Future<Output = ()> + Send + 'static {
        let waiter = {
            let mut state = self.inner.state.lock();
            state.shutting_down = true;

            #[cfg(feature = "tracing")]
            debug!(active = state.active.len(), "shutdown requested");

            if state.active.is_empty() {
                None
            } else {
                let (tx, rx) = oneshot::channel();
                state.waiters.push(tx);
                Some(rx)
            }
        };

        async move {
            if let Some(rx) = waiter {
                // Senders are only dropped after firing
                let _ = rx.await;
            }
        }
    }

    /// Wait for every active run to finish, then accept runs again.
    pub async fn flush(&self) {
        self.shutdown().await;
        self.inner.state.lock().shutting_down = false;

        #[cfg(feature = "tracing")]
        debug!("flush complete, accepting runs");
    }

    pub fn is_shutting_down(&self) -> bool {
        self.inner.state.lock().shutting_down
    }

    pub fn active_runs(&self) -> usize {
        self.inner.state.lock().active.len()
    }
}

impl std::fmt::Debug for Coordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.inner.state.lock();
        f.debug_struct("Coordinator")
            .field("shutting_down", &state.shutting_down)
            .field("active", &state.active.len())
            .finish()
    }
}

/// Membership of one run in the active set; leaves it on drop.
pub struct RunTicket {
    id: RunId,
    inner: Arc<Inner>,
}

impl RunTicket {
    pub fn id(&self) -> RunId {
        self.id
    }
}

impl Drop for RunTicket {
    fn drop(&mut self) {
        let mut state = self.inner.state.lock();
        state.active.remove(&self.id);

        #[cfg(feature = "tracing")]
        trace!(run = %self.id, active = state.active.len(), "run finished");

        if state.active.is_empty() {
            for waiter in state.waiters.drain(..) {
                let _ = waiter.send(());
            }
        }
    }
}

impl std::fmt::Debug for RunTicket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("RunTicket").field(&self.id).finish()
    }
}
