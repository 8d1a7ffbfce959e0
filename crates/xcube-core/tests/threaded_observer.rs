//! Integration tests for the throttling progress observer.

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use xcube_core::progress::{
    ProgressContext, ProgressEvent, ProgressObserver, ProgressObserverRegistry, ProgressState,
    ThreadedProgressObserver,
};
use xcube_core::{XcubeError, XcubeResult};

/// Records every delivered event with the innermost state's completed work.
#[derive(Default)]
struct Recorder {
    events: Mutex<Vec<(ProgressEvent, String, f64)>>,
}

impl Recorder {
    fn record(&self, event: ProgressEvent, stack: &[ProgressState]) -> XcubeResult<()> {
        let state = xcube_core::progress::require_state_stack(stack)?;
        self.events.lock().unwrap().push((
            event,
            state.label().to_string(),
            state.completed_work(),
        ));
        Ok(())
    }

    fn events(&self) -> Vec<(ProgressEvent, String, f64)> {
        self.events.lock().unwrap().clone()
    }
}

impl ProgressObserver for Recorder {
    fn on_begin(&self, stack: &[ProgressState]) -> XcubeResult<()> {
        self.record(ProgressEvent::Begin, stack)
    }

    fn on_update(&self, stack: &[ProgressState]) -> XcubeResult<()> {
        self.record(ProgressEvent::Update, stack)
    }

    fn on_end(&self, stack: &[ProgressState]) -> XcubeResult<()> {
        self.record(ProgressEvent::End, stack)
    }
}

/// Fails every update.
struct FailingUpdates;

impl ProgressObserver for FailingUpdates {
    fn on_begin(&self, _: &[ProgressState]) -> XcubeResult<()> {
        Ok(())
    }

    fn on_update(&self, _: &[ProgressState]) -> XcubeResult<()> {
        Err(XcubeError::Transport("callback endpoint unreachable".into()))
    }

    fn on_end(&self, _: &[ProgressState]) -> XcubeResult<()> {
        Ok(())
    }
}

#[test]
fn test_timer_parameters_validated() {
    let delegate: Arc<dyn ProgressObserver> = Arc::new(Recorder::default());

    for (minimum, dt) in [(0.0, 0.0), (0.0, 0.5), (2.5, 0.0), (1.0, 1.0)] {
        ThreadedProgressObserver::new(delegate.clone(), minimum, dt).unwrap();
    }

    let err = ThreadedProgressObserver::new(delegate.clone(), -1.0, 0.0).unwrap_err();
    assert_eq!(err.to_string(), "The timer's minimum must be >=0");
    assert!(matches!(err, XcubeError::InvalidArgument(_)));

    let err = ThreadedProgressObserver::new(delegate, 0.0, -0.1).unwrap_err();
    assert_eq!(err.to_string(), "The timer's time step must be >=0");
}

#[test]
fn test_empty_state_stack_rejected() {
    let observer = ThreadedProgressObserver::new(Arc::new(Recorder::default()), 0.0, 0.0).unwrap();

    for event in [ProgressEvent::Begin, ProgressEvent::Update, ProgressEvent::End] {
        let err = observer.notify(event, &[]).unwrap_err();
        assert_eq!(err.to_string(), "state_stack must be given");
    }
}

#[test]
fn test_events_forwarded_in_order() {
    let registry = Arc::new(ProgressObserverRegistry::new());
    let recorder = Arc::new(Recorder::default());
    let observer = ThreadedProgressObserver::new(recorder.clone(), 0.0, 0.0).unwrap();
    observer.activate(&registry).unwrap();
    assert!(observer.is_active());

    let context = ProgressContext::new(registry.clone());
    let scope = context.observe("Writing output", 4.0).unwrap();
    for _ in 0..4 {
        scope.worked(1.0).unwrap();
        thread::sleep(Duration::from_millis(5));
    }
    scope.end().unwrap();
    observer.deactivate().unwrap();
    assert!(registry.is_empty());

    let events = recorder.events();
    assert_eq!(events.first().map(|e| e.0), Some(ProgressEvent::Begin));
    assert_eq!(events.last().map(|e| e.0), Some(ProgressEvent::End));
    assert_eq!(events.last().map(|e| e.2), Some(4.0));

    let updates: Vec<f64> = events[1..events.len() - 1]
        .iter()
        .map(|(event, _, completed)| {
            assert_eq!(*event, ProgressEvent::Update);
            *completed
        })
        .collect();
    assert!(updates.len() <= 4);
    assert!(updates.windows(2).all(|w| w[0] <= w[1]));
}

#[test]
fn test_deactivate_flushes_latest_update() {
    let registry = Arc::new(ProgressObserverRegistry::new());
    let recorder = Arc::new(Recorder::default());
    // A long time step keeps the notifier asleep after the first update.
    let observer = ThreadedProgressObserver::new(recorder.clone(), 0.0, 60.0).unwrap();
    observer.activate(&registry).unwrap();

    let context = ProgressContext::new(registry.clone());
    let scope = context.observe("Processing", 10.0).unwrap();
    scope.worked(1.0).unwrap();
    thread::sleep(Duration::from_millis(20));
    scope.worked(1.0).unwrap();

    observer.deactivate().unwrap();
    let events = recorder.events();
    let last = events.last().unwrap();
    assert_eq!(last.0, ProgressEvent::Update);
    assert_eq!(last.2, 2.0);

    // Nothing reaches the delegate once deactivated.
    scope.worked(1.0).unwrap();
    scope.end().unwrap();
    assert_eq!(recorder.events().len(), events.len());
}

#[test]
fn test_minimum_delays_first_update() {
    let registry = Arc::new(ProgressObserverRegistry::new());
    let recorder = Arc::new(Recorder::default());
    let observer = ThreadedProgressObserver::new(recorder.clone(), 60.0, 0.0).unwrap();
    observer.activate(&registry).unwrap();

    let context = ProgressContext::new(registry.clone());
    let scope = context.observe("Processing", 10.0).unwrap();
    scope.worked(3.0).unwrap();
    thread::sleep(Duration::from_millis(20));

    // Begin is forwarded at once, the update waits for the timer.
    let events = recorder.events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].0, ProgressEvent::Begin);

    observer.deactivate().unwrap();
    let events = recorder.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[1], (ProgressEvent::Update, "Processing".to_string(), 3.0));
    drop(scope);
}

#[test]
fn test_delegate_error_returned_by_deactivate() {
    let registry = Arc::new(ProgressObserverRegistry::new());
    let observer = ThreadedProgressObserver::new(Arc::new(FailingUpdates), 0.0, 0.0).unwrap();
    observer.activate(&registry).unwrap();

    let context = ProgressContext::new(registry.clone());
    let scope = context.observe("Uploading", 2.0).unwrap();
    // The failure surfaces on the next call into the observer or on deactivate.
    let worked = scope.worked(1.0);
    let deactivated = observer.deactivate();
    let err = worked.err().or(deactivated.err()).unwrap();
    assert!(matches!(err, XcubeError::Transport(_)));
    drop(scope);
}

#[test]
fn test_drop_deactivates() {
    let registry = Arc::new(ProgressObserverRegistry::new());
    {
        let observer =
            ThreadedProgressObserver::new(Arc::new(Recorder::default()), 0.0, 0.1).unwrap();
        observer.activate(&registry).unwrap();
        assert_eq!(registry.len(), 1);
        assert!(observer.activate(&registry).is_err());
    }
    assert!(registry.is_empty());
}
