//! Bookkeeping for one unit of nested work.

use std::time::{Duration, Instant};

use crate::error::{XcubeError, XcubeResult};

/// State of one progress scope.
///
/// A state is created when a scope is entered and mutated only by the
/// thread that owns the enclosing [`ProgressContext`](super::ProgressContext).
/// Observers receive clones of it.
#[derive(Debug, Clone)]
pub struct ProgressState {
    label: String,
    total_work: f64,
    super_work: f64,
    super_work_ahead: f64,
    completed_work: f64,
    exc_info: Option<String>,
    start_time: Instant,
    total_time: Option<Duration>,
}

impl ProgressState {
    /// Create a new state. `total_work` and `super_work` must be finite and >= 0.
    pub fn new(label: impl Into<String>, total_work: f64, super_work: f64) -> XcubeResult<Self> {
        if !total_work.is_finite() || total_work < 0.0 {
            return Err(XcubeError::invalid_argument("total_work must be >=0"));
        }
        if !super_work.is_finite() || super_work < 0.0 {
            return Err(XcubeError::invalid_argument("super_work must be >=0"));
        }
        Ok(Self {
            label: label.into(),
            total_work,
            super_work,
            super_work_ahead: 1.0,
            completed_work: 0.0,
            exc_info: None,
            start_time: Instant::now(),
            total_time: None,
        })
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn total_work(&self) -> f64 {
        self.total_work
    }

    /// How much of the parent's work this state represents.
    pub fn super_work(&self) -> f64 {
        self.super_work
    }

    /// Parent work units reserved for the next nested scope.
    pub fn super_work_ahead(&self) -> f64 {
        self.super_work_ahead
    }

    pub fn completed_work(&self) -> f64 {
        self.completed_work
    }

    /// Text of the error that terminated this scope, if any.
    pub fn exc_info(&self) -> Option<&str> {
        self.exc_info.as_deref()
    }

    pub fn errored(&self) -> bool {
        self.exc_info.is_some()
    }

    pub fn finished(&self) -> bool {
        self.total_time.is_some()
    }

    /// Completed fraction in `[0, 1]`.
    ///
    /// A state without work reports 0 until it finishes successfully.
    pub fn progress(&self) -> f64 {
        if self.total_work > 0.0 {
            (self.completed_work / self.total_work).clamp(0.0, 1.0)
        } else if self.finished() && !self.errored() {
            1.0
        } else {
            0.0
        }
    }

    /// Wall-clock time since the scope was entered, frozen once finished.
    pub fn elapsed(&self) -> Duration {
        self.total_time.unwrap_or_else(|| self.start_time.elapsed())
    }

    /// Convert work units of this state into work units of its parent.
    pub fn to_super_work(&self, work: f64) -> f64 {
        if self.total_work > 0.0 {
            self.super_work * work / self.total_work
        } else {
            0.0
        }
    }

    pub(crate) fn set_super_work_ahead(&mut self, work: f64) -> XcubeResult<()> {
        if !work.is_finite() || work < 0.0 {
            return Err(XcubeError::invalid_argument("work must be >=0"));
        }
        self.super_work_ahead = work;
        Ok(())
    }

    pub(crate) fn reset_super_work_ahead(&mut self) {
        self.super_work_ahead = 1.0;
    }

    /// Add completed work, saturating at `total_work`.
    pub(crate) fn inc_work(&mut self, work: f64) {
        self.completed_work = (self.completed_work + work).min(self.total_work);
    }

    pub(crate) fn set_exc_info(&mut self, exc_info: impl Into<String>) {
        self.exc_info = Some(exc_info.into());
    }

    pub(crate) fn finish(&mut self) {
        if self.total_time.is_none() {
            self.total_time = Some(self.start_time.elapsed());
        }
    }
}
