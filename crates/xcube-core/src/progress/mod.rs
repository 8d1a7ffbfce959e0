//! Nested progress observation.
//!
//! Work is organised in scopes entered on a [`ProgressContext`]. Each scope
//! owns a [`ProgressState`]; entering, updating and leaving a scope notifies
//! every [`ProgressObserver`] active in the context's
//! [`ProgressObserverRegistry`].

mod context;
mod observer;
mod state;
mod threaded;

pub use context::{ProgressContext, ProgressScope};
pub use observer::{
    require_state_stack, ObserverId, ProgressEvent, ProgressObserver, ProgressObserverRegistry,
};
pub use state::ProgressState;
pub use threaded::ThreadedProgressObserver;
