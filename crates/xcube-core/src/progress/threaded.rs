//! Throttling decorator that moves observer delivery onto a notifier thread.
//!
//! The work-producing thread only publishes the latest state snapshot into a
//! `tokio::sync::watch` channel. A dedicated notifier thread forwards changed
//! snapshots to the delegate at most once per `dt`, so slow observers (HTTP
//! callbacks, terminal repaints) never block `worked()` calls.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use tokio::sync::{oneshot, watch};
use tracing::{debug, warn};

use super::observer::{
    require_state_stack, ObserverId, ProgressEvent, ProgressObserver, ProgressObserverRegistry,
};
use super::state::ProgressState;
use crate::error::{XcubeError, XcubeResult};

type Snapshot = Option<Vec<ProgressState>>;

/// Observer decorator delivering `on_update` from a background timer.
///
/// `on_begin` and `on_end` are forwarded immediately on the calling thread.
pub struct ThreadedProgressObserver {
    front: Arc<ThreadedFront>,
    minimum: Duration,
    dt: Duration,
    activation: Mutex<Option<Activation>>,
}

struct Activation {
    registry: Arc<ProgressObserverRegistry>,
    id: ObserverId,
    shutdown: oneshot::Sender<()>,
    notifier: JoinHandle<()>,
}

/// The part registered with the registry and shared with the notifier thread.
struct ThreadedFront {
    delegate: Arc<dyn ProgressObserver>,
    latest: watch::Sender<Snapshot>,
    /// Held while calling the delegate, keeping begin/update/end ordered.
    dispatch: Mutex<()>,
    /// First delegate failure seen on the notifier thread.
    deferred_error: Mutex<Option<XcubeError>>,
}

impl ThreadedProgressObserver {
    /// Wrap `delegate`. `minimum` is the delay in seconds before the first
    /// update is forwarded, `dt` the minimum time step between updates.
    pub fn new(delegate: Arc<dyn ProgressObserver>, minimum: f64, dt: f64) -> XcubeResult<Self> {
        if !(minimum >= 0.0) {
            return Err(XcubeError::invalid_argument("The timer's minimum must be >=0"));
        }
        if !(dt >= 0.0) {
            return Err(XcubeError::invalid_argument("The timer's time step must be >=0"));
        }

        let (latest, _) = watch::channel(None);
        Ok(Self {
            front: Arc::new(ThreadedFront {
                delegate,
                latest,
                dispatch: Mutex::new(()),
                deferred_error: Mutex::new(None),
            }),
            minimum: Duration::from_secs_f64(minimum),
            dt: Duration::from_secs_f64(dt),
            activation: Mutex::new(None),
        })
    }

    pub fn minimum(&self) -> Duration {
        self.minimum
    }

    pub fn dt(&self) -> Duration {
        self.dt
    }

    pub fn is_active(&self) -> bool {
        self.activation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Start the notifier thread and register with `registry`.
    pub fn activate(&self, registry: &Arc<ProgressObserverRegistry>) -> XcubeResult<()> {
        let mut activation = self
            .activation
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if activation.is_some() {
            return Err(XcubeError::invalid_argument("observer is already active"));
        }

        let (shutdown, shutdown_rx) = oneshot::channel();
        let notifier = spawn_notifier(
            self.front.clone(),
            self.front.latest.subscribe(),
            shutdown_rx,
            self.minimum,
            self.dt,
        )?;
        let id = registry.activate(self.front.clone());

        debug!(minimum = ?self.minimum, dt = ?self.dt, "Started progress notifier");
        *activation = Some(Activation {
            registry: registry.clone(),
            id,
            shutdown,
            notifier,
        });
        Ok(())
    }

    /// Unregister, flush the latest pending update and join the notifier thread.
    ///
    /// Returns the first delegate failure raised on the notifier thread.
    pub fn deactivate(&self) -> XcubeResult<()> {
        let activation = self
            .activation
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(activation) = activation else {
            return Ok(());
        };

        activation.registry.deactivate(activation.id);
        // The notifier may already have exited; nothing to signal then.
        let _ = activation.shutdown.send(());
        activation
            .notifier
            .join()
            .map_err(|_| XcubeError::Internal("progress notifier thread panicked".into()))?;
        debug!("Stopped progress notifier");

        self.front.take_deferred_error()
    }
}

impl ProgressObserver for ThreadedProgressObserver {
    fn on_begin(&self, state_stack: &[ProgressState]) -> XcubeResult<()> {
        self.front.on_begin(state_stack)
    }

    fn on_update(&self, state_stack: &[ProgressState]) -> XcubeResult<()> {
        self.front.on_update(state_stack)
    }

    fn on_end(&self, state_stack: &[ProgressState]) -> XcubeResult<()> {
        self.front.on_end(state_stack)
    }
}

impl Drop for ThreadedProgressObserver {
    fn drop(&mut self) {
        if let Err(e) = self.deactivate() {
            warn!(error = %e, "Progress observer failed while deactivating");
        }
    }
}

impl fmt::Debug for ThreadedProgressObserver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadedProgressObserver")
            .field("minimum", &self.minimum)
            .field("dt", &self.dt)
            .field("active", &self.is_active())
            .finish()
    }
}

impl ThreadedFront {
    /// Forward `event` right away, discarding any update not yet delivered.
    fn forward_now(&self, event: ProgressEvent, state_stack: &[ProgressState]) -> XcubeResult<()> {
        let _dispatch = self.dispatch.lock().unwrap_or_else(PoisonError::into_inner);
        self.latest.send_if_modified(|pending| pending.take().is_some());
        self.delegate.notify(event, state_stack)?;
        self.take_deferred_error()
    }

    /// Forward the latest published snapshot, if any. Runs on the notifier thread.
    fn flush(&self, rx: &mut watch::Receiver<Snapshot>) {
        let _dispatch = self.dispatch.lock().unwrap_or_else(PoisonError::into_inner);
        let pending = rx.borrow_and_update().clone();
        if let Some(state_stack) = pending {
            if let Err(e) = self.delegate.on_update(&state_stack) {
                warn!(error = %e, "Throttled progress observer failed");
                self.deferred_error
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .get_or_insert(e);
            }
        }
    }

    fn take_deferred_error(&self) -> XcubeResult<()> {
        match self
            .deferred_error
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl ProgressObserver for ThreadedFront {
    fn on_begin(&self, state_stack: &[ProgressState]) -> XcubeResult<()> {
        require_state_stack(state_stack)?;
        self.forward_now(ProgressEvent::Begin, state_stack)
    }

    fn on_update(&self, state_stack: &[ProgressState]) -> XcubeResult<()> {
        require_state_stack(state_stack)?;
        self.latest.send_replace(Some(state_stack.to_vec()));
        self.take_deferred_error()
    }

    fn on_end(&self, state_stack: &[ProgressState]) -> XcubeResult<()> {
        require_state_stack(state_stack)?;
        self.forward_now(ProgressEvent::End, state_stack)
    }
}

/// Spawn the notifier thread.
///
/// The thread's runtime is only entered to wait for changes and timers, so the
/// delegate never runs inside an async context and may block.
fn spawn_notifier(
    front: Arc<ThreadedFront>,
    mut rx: watch::Receiver<Snapshot>,
    mut shutdown: oneshot::Receiver<()>,
    minimum: Duration,
    dt: Duration,
) -> XcubeResult<JoinHandle<()>> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .build()
        .map_err(|e| XcubeError::Internal(format!("Failed to create notifier runtime: {}", e)))?;

    std::thread::Builder::new()
        .name("xcube-progress".to_string())
        .spawn(move || {
            // Sleep for `period`; true if shutdown was requested meanwhile.
            let pause = |period: Duration, shutdown: &mut oneshot::Receiver<()>| {
                !period.is_zero()
                    && runtime.block_on(async {
                        tokio::select! {
                            _ = tokio::time::sleep(period) => false,
                            _ = shutdown => true,
                        }
                    })
            };

            let mut stopped = pause(minimum, &mut shutdown);
            while !stopped {
                let changed = runtime.block_on(async {
                    tokio::select! {
                        changed = rx.changed() => changed.is_ok(),
                        _ = &mut shutdown => false,
                    }
                });
                if !changed {
                    break;
                }
                front.flush(&mut rx);
                stopped = pause(dt, &mut shutdown);
            }

            if rx.has_changed().unwrap_or(false) {
                front.flush(&mut rx);
            }
        })
        .map_err(|e| XcubeError::Internal(format!("Failed to spawn notifier thread: {}", e)))
}
