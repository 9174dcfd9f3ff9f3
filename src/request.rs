//! Requests: one-shot work units injected from any thread.
//!
//! Producers (console sessions, signal handlers, tests) push boxed requests
//! into a [`RequestQueue`]; the scheduler pops and executes them on the server
//! thread at the start of each cycle.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::RequestResult;
use crate::server::CogServer;

/// A reified unit of work executed against the server.
pub trait Request: Send {
    /// Class identifier, matching the registry name it was created from.
    fn class_id(&self) -> &str;

    /// Receive the arguments typed after the command name on the console.
    fn set_parameters(&mut self, params: Vec<String>) -> RequestResult<()> {
        let _ = params;
        Ok(())
    }

    /// Execute on the server thread. The returned text is sent back to the
    /// console that issued the request, if any.
    fn execute(&mut self, server: &mut CogServer) -> RequestResult<String>;
}

/// Thread-safe FIFO of pending requests.
///
/// Cloning yields another handle to the same queue.
#[derive(Clone, Default)]
pub struct RequestQueue {
    inner: Arc<Mutex<VecDeque<Box<dyn Request>>>>,
}

impl RequestQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a request.
    pub fn push(&self, request: Box<dyn Request>) {
        self.lock().push_back(request);
    }

    /// Take the front request, or `None` when empty. Never blocks on an empty queue.
    pub fn pop(&self) -> Option<Box<dyn Request>> {
        self.lock().pop_front()
    }

    /// Snapshot of the queue length.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Drop every pending request.
    pub fn clear(&self) -> usize {
        let mut queue = self.lock();
        let n = queue.len();
        queue.clear();
        n
    }

    // A panicking producer cannot leave the deque half-modified, so a
    // poisoned lock is still safe to use.
    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<Box<dyn Request>>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for RequestQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestQueue")
            .field("pending", &self.len())
            .finish()
    }
}
