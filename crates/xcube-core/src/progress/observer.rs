//! Observer capability and the registry of active observers.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, warn};

use super::state::ProgressState;
use crate::error::{XcubeError, XcubeResult};

/// Kind of notification delivered to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProgressEvent {
    Begin,
    Update,
    End,
}

impl ProgressEvent {
    /// Name of the callback, as sent in callback payloads.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Begin => "on_begin",
            Self::Update => "on_update",
            Self::End => "on_end",
        }
    }
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Receives progress notifications.
///
/// Every callback gets the full state stack, outermost state first. Callbacks
/// may be invoked from any thread.
pub trait ProgressObserver: Send + Sync {
    fn on_begin(&self, state_stack: &[ProgressState]) -> XcubeResult<()>;

    fn on_update(&self, state_stack: &[ProgressState]) -> XcubeResult<()>;

    fn on_end(&self, state_stack: &[ProgressState]) -> XcubeResult<()>;

    /// Dispatch `event` to the matching callback.
    fn notify(&self, event: ProgressEvent, state_stack: &[ProgressState]) -> XcubeResult<()> {
        match event {
            ProgressEvent::Begin => self.on_begin(state_stack),
            ProgressEvent::Update => self.on_update(state_stack),
            ProgressEvent::End => self.on_end(state_stack),
        }
    }
}

/// Return the innermost state or fail if the stack is empty.
pub fn require_state_stack(state_stack: &[ProgressState]) -> XcubeResult<&ProgressState> {
    state_stack
        .last()
        .ok_or_else(|| XcubeError::invalid_argument("state_stack must be given"))
}

/// Handle returned by [`ProgressObserverRegistry::activate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObserverId(u64);

type Registered = Vec<(ObserverId, Arc<dyn ProgressObserver>)>;

/// Set of active observers.
///
/// Events are dispatched while holding the read lock, so once
/// [`deactivate`](Self::deactivate) returns the observer receives nothing more.
/// Observers must therefore not (de)activate observers from inside a callback.
#[derive(Default)]
pub struct ProgressObserverRegistry {
    observers: RwLock<Registered>,
    next_id: AtomicU64,
}

impl ProgressObserverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer for all subsequent events.
    pub fn activate(&self, observer: Arc<dyn ProgressObserver>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, observer));
        debug!(observer = id.0, "Activated progress observer");
        id
    }

    /// Remove an observer. Returns false if it was not active.
    pub fn deactivate(&self, id: ObserverId) -> bool {
        let mut observers = self
            .observers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = observers.len();
        observers.retain(|(registered, _)| *registered != id);
        let removed = observers.len() != before;
        if removed {
            debug!(observer = id.0, "Deactivated progress observer");
        }
        removed
    }

    /// Remove all observers.
    pub fn clear(&self) {
        self.observers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn len(&self) -> usize {
        self.observers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Deliver `event` to every active observer.
    ///
    /// All observers are notified even if one fails; the first failure is returned.
    pub fn emit(&self, event: ProgressEvent, state_stack: &[ProgressState]) -> XcubeResult<()> {
        let observers = self
            .observers
            .read()
            .unwrap_or_else(PoisonError::into_inner);

        let mut first_error = None;
        for (id, observer) in observers.iter() {
            if let Err(e) = observer.notify(event, state_stack) {
                warn!(observer = id.0, event = %event, error = %e, "Progress observer failed");
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ProgressObserverRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressObserverRegistry")
            .field("observers", &self.len())
            .finish()
    }
}
