//! Scoped progress contexts.
//!
//! A [`ProgressContext`] owns the state stack of one thread of work. Entering
//! a scope pushes a [`ProgressState`] and returns a [`ProgressScope`] guard;
//! the guard pops the state again on every exit path, including early
//! returns and panics.
//!
//! ```ignore
//! let registry = Arc::new(ProgressObserverRegistry::new());
//! let context = ProgressContext::new(registry.clone());
//!
//! context.run("Generating cube", 100.0, |progress| {
//!     progress.will_work(80.0)?;
//!     context.run("Writing output", 4.0, |inner| {
//!         for _ in 0..4 {
//!             inner.worked(1.0)?;
//!         }
//!         Ok::<_, XcubeError>(())
//!     })?;
//!     progress.worked(20.0)
//! })?;
//! ```

use std::cell::{Cell, RefCell};
use std::fmt;
use std::sync::Arc;

use tracing::{debug, warn};

use super::observer::{ProgressEvent, ProgressObserverRegistry};
use super::state::ProgressState;
use crate::error::{XcubeError, XcubeResult};

/// Per-thread stack of progress states, notifying an injected registry.
///
/// The context is deliberately `!Sync`: states are only mutated by the thread
/// doing the work, observers only ever see snapshots.
pub struct ProgressContext {
    registry: Arc<ProgressObserverRegistry>,
    state_stack: RefCell<Vec<ProgressState>>,
    /// Id of the scope owning each stack entry, parallel to `state_stack`.
    scope_ids: RefCell<Vec<u64>>,
    next_scope_id: Cell<u64>,
}

impl ProgressContext {
    pub fn new(registry: Arc<ProgressObserverRegistry>) -> Self {
        Self {
            registry,
            state_stack: RefCell::new(Vec::new()),
            scope_ids: RefCell::new(Vec::new()),
            next_scope_id: Cell::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<ProgressObserverRegistry> {
        &self.registry
    }

    /// Snapshot of the current stack, outermost first.
    pub fn state_stack(&self) -> Vec<ProgressState> {
        self.state_stack.borrow().clone()
    }

    pub fn depth(&self) -> usize {
        self.state_stack.borrow().len()
    }

    /// Enter a scope weighted by the work the enclosing scope announced with
    /// [`ProgressScope::will_work`] (1 at the root).
    pub fn observe(
        &self,
        label: impl Into<String>,
        total_work: f64,
    ) -> XcubeResult<ProgressScope<'_>> {
        let super_work = self
            .state_stack
            .borrow()
            .last()
            .map_or(1.0, |parent| parent.super_work_ahead());
        self.enter(label, total_work, super_work)
    }

    /// Enter a scope representing `super_work` units of the enclosing scope.
    pub fn enter(
        &self,
        label: impl Into<String>,
        total_work: f64,
        super_work: f64,
    ) -> XcubeResult<ProgressScope<'_>> {
        let state = ProgressState::new(label, total_work, super_work)?;
        let id = self.next_scope_id.get();
        self.next_scope_id.set(id + 1);
        let (level, snapshot) = {
            let mut stack = self.state_stack.borrow_mut();
            stack.push(state);
            self.scope_ids.borrow_mut().push(id);
            (stack.len() - 1, stack.clone())
        };
        debug!(level, label = snapshot[level].label(), "Entered progress scope");

        let scope = ProgressScope {
            context: self,
            id,
            level,
            exited: false,
        };

        if let Err(e) = self.registry.emit(ProgressEvent::Begin, &snapshot) {
            scope.fail(&e);
            if let Err(end_error) = scope.end() {
                warn!(error = %end_error, "Progress observer failed while unwinding a scope");
            }
            return Err(e);
        }

        Ok(scope)
    }

    /// Run `f` inside a scope.
    ///
    /// If `f` fails its error is recorded on the state before `on_end` fires and
    /// is then returned unchanged.
    pub fn run<T, E, F>(&self, label: impl Into<String>, total_work: f64, f: F) -> Result<T, E>
    where
        F: FnOnce(&ProgressScope<'_>) -> Result<T, E>,
        E: From<XcubeError> + fmt::Display,
    {
        let scope = self.observe(label, total_work)?;
        match f(&scope) {
            Ok(value) => {
                scope.end()?;
                Ok(value)
            }
            Err(e) => {
                scope.fail(&e);
                if let Err(end_error) = scope.end() {
                    warn!(error = %end_error, "Progress observer failed on errored scope");
                }
                Err(e)
            }
        }
    }
}

impl fmt::Debug for ProgressContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressContext")
            .field("state_stack", &self.state_stack.borrow())
            .finish()
    }
}

/// Guard for one entered scope.
#[must_use = "dropping the scope ends it immediately"]
pub struct ProgressScope<'a> {
    context: &'a ProgressContext,
    id: u64,
    level: usize,
    exited: bool,
}

impl ProgressScope<'_> {
    /// Nesting level, 0 for the outermost scope.
    pub fn level(&self) -> usize {
        self.level
    }

    /// False once the scope was ended, possibly by an ancestor's `end()`.
    pub fn is_active(&self) -> bool {
        self.context.scope_ids.borrow().get(self.level) == Some(&self.id)
    }

    /// Announce that the next nested scope represents `work` units of this one.
    pub fn will_work(&self, work: f64) -> XcubeResult<()> {
        if !self.is_active() {
            return Err(XcubeError::invalid_argument(
                "will_work() must be called within context",
            ));
        }
        match self.context.state_stack.borrow_mut().get_mut(self.level) {
            Some(state) => state.set_super_work_ahead(work),
            None => Err(XcubeError::invalid_argument(
                "will_work() must be called within context",
            )),
        }
    }

    /// Record `work` completed units and propagate them to all ancestors.
    pub fn worked(&self, work: f64) -> XcubeResult<()> {
        if !work.is_finite() || work <= 0.0 {
            return Err(XcubeError::invalid_argument("work must be >0"));
        }
        if !self.is_active() {
            return Err(XcubeError::invalid_argument(
                "worked() must be called within context",
            ));
        }

        let snapshot = {
            let mut stack = self.context.state_stack.borrow_mut();
            if stack.len() != self.level + 1 {
                return Err(XcubeError::invalid_argument(
                    "worked() must be called on the innermost progress scope",
                ));
            }

            let mut work = work;
            for state in stack.iter_mut().rev() {
                let before = state.completed_work();
                state.inc_work(work);
                work = state.to_super_work(state.completed_work() - before);
                if work <= 0.0 {
                    break;
                }
            }
            stack.clone()
        };

        self.context.registry.emit(ProgressEvent::Update, &snapshot)
    }

    /// Mark the scope as failed with `error`; reported by `on_end`.
    pub fn fail(&self, error: &dyn fmt::Display) {
        if !self.is_active() {
            return;
        }
        if let Some(state) = self.context.state_stack.borrow_mut().get_mut(self.level) {
            state.set_exc_info(error.to_string());
        }
    }

    /// End the scope, returning any observer failure from `on_end`.
    pub fn end(mut self) -> XcubeResult<()> {
        self.exit()
    }

    fn exit(&mut self) -> XcubeResult<()> {
        if self.exited {
            return Ok(());
        }
        self.exited = true;
        // Already ended along with an ancestor; the level may now belong to
        // another scope.
        if !self.is_active() {
            return Ok(());
        }

        let mut result = Ok(());
        loop {
            // Scopes entered after this one and still alive are ended first,
            // so a child's on_end always precedes its parent's.
            let snapshot = {
                let mut stack = self.context.state_stack.borrow_mut();
                if stack.len() <= self.level {
                    break;
                }
                if let Some(top) = stack.last_mut() {
                    top.finish();
                }
                stack.clone()
            };

            let emitted = self.context.registry.emit(ProgressEvent::End, &snapshot);

            let done = {
                let mut stack = self.context.state_stack.borrow_mut();
                self.context.scope_ids.borrow_mut().pop();
                if let Some(state) = stack.pop() {
                    debug!(
                        label = state.label(),
                        errored = state.errored(),
                        elapsed_ms = state.elapsed().as_millis() as u64,
                        "Exited progress scope"
                    );
                }
                if let Some(parent) = stack.last_mut() {
                    parent.reset_super_work_ahead();
                }
                stack.len() <= self.level
            };

            if let Err(e) = emitted {
                if result.is_ok() {
                    result = Err(e);
                }
            }
            if done {
                break;
            }
        }
        result
    }
}

impl Drop for ProgressScope<'_> {
    fn drop(&mut self) {
        if self.exited {
            return;
        }
        if std::thread::panicking() {
            self.fail(&"panicked");
        }
        if let Err(e) = self.exit() {
            warn!(error = %e, "Progress observer failed while ending scope");
        }
    }
}
