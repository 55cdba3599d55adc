//! Initialization guard, frame scheduling and the process clock.

use serde::Serialize;

use crate::error::LifecycleError;

/// `Uninitialized -> Initializing -> Ready`. A second initialization while
/// one is in progress or complete is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum InitState {
    #[default]
    Uninitialized,
    Initializing,
    Ready,
}

impl InitState {
    pub fn begin(&mut self) -> Result<(), LifecycleError> {
        match self {
            InitState::Uninitialized => {
                *self = InitState::Initializing;
                Ok(())
            }
            InitState::Initializing => Err(LifecycleError::AlreadyInitializing),
            InitState::Ready => Err(LifecycleError::AlreadyInitialized),
        }
    }

    pub fn finish(&mut self) {
        if *self == InitState::Initializing {
            *self = InitState::Ready;
        }
    }

    /// Initialization failed; allow a later retry.
    pub fn fail(&mut self) {
        *self = InitState::Uninitialized;
    }

    pub fn reset(&mut self) {
        *self = InitState::Uninitialized;
    }

    pub fn is_ready(&self) -> bool {
        *self == InitState::Ready
    }

    pub fn require_ready(&self) -> Result<(), LifecycleError> {
        if self.is_ready() {
            Ok(())
        } else {
            Err(LifecycleError::NotInitialized)
        }
    }
}

/// Single-flight frame requests. At most one request is pending and at most
/// one frame runs at a time; cancelling suspends scheduling until resumed.
#[derive(Debug, Default)]
pub struct FrameScheduler {
    next_id: u64,
    pending: Option<u64>,
    in_flight: bool,
    suspended: bool,
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request the next frame. Returns the request id, or `None` when a
    /// request is already pending, a frame is running, or scheduling is
    /// suspended.
    pub fn request(&mut self) -> Option<u64> {
        if self.suspended || self.pending.is_some() || self.in_flight {
            return None;
        }
        self.next_id += 1;
        self.pending = Some(self.next_id);
        self.pending
    }

    /// Start the frame for request `id`. Stale or cancelled ids are refused.
    pub fn begin(&mut self, id: u64) -> bool {
        if self.in_flight || self.pending != Some(id) {
            return false;
        }
        self.pending = None;
        self.in_flight = true;
        true
    }

    pub fn finish(&mut self) {
        self.in_flight = false;
    }

    /// Drop the pending request and stop scheduling. Returns the cancelled
    /// request id so the host can cancel its callback.
    pub fn cancel(&mut self) -> Option<u64> {
        self.suspended = true;
        self.pending.take()
    }

    pub fn resume(&mut self) {
        self.suspended = false;
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    pub fn is_suspended(&self) -> bool {
        self.suspended
    }
}

/// One tick of the process clock.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameTime {
    /// Seconds since the first tick.
    pub elapsed: f32,
    /// Seconds since the previous tick, 0 on the first.
    pub dt: f32,
    pub frame: u64,
}

/// Elapsed time and frame counter. Starts on the first tick and restarts
/// after `reset`.
#[derive(Debug, Default)]
pub struct FrameClock {
    start: Option<f64>,
    last: Option<f64>,
    frame: u64,
}

impl FrameClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance to host time `now` in seconds. Time never runs backwards.
    pub fn tick(&mut self, now: f64) -> FrameTime {
        let start = *self.start.get_or_insert(now);
        let last = self.last.unwrap_or(now);
        let now = now.max(last);
        self.last = Some(now);
        self.frame += 1;
        FrameTime {
            elapsed: (now - start) as f32,
            dt: (now - last) as f32,
            frame: self.frame,
        }
    }

    pub fn frame(&self) -> u64 {
        self.frame
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Teardown steps, in the order they run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TeardownStep {
    CancelFrame,
    StopAnimation,
    StopTracking,
    DeactivateParticles,
    ReleaseObjects,
    ResetClock,
}
