//! Run state machine states and the cancellation handle.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;

/// What the controller is doing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerState {
    /// Waiting for a request
    Idle,
    /// Moving to a sample
    Navigating,
    /// A calibration point is selected and awaits commit
    Calibrating,
    /// Taking one image
    CapturingSingle,
    /// Taking a focus stack at the current sample
    CapturingStack,
    /// Imaging the whole plate
    RunningBatch,
    /// A stop was requested; the batch unwinds at the next sample boundary
    Cancelling,
}

impl ControllerState {
    /// True while a plate run owns the hardware.
    pub fn is_batch(self) -> bool {
        matches!(self, ControllerState::RunningBatch | ControllerState::Cancelling)
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ControllerState::Idle => "idle",
            ControllerState::Navigating => "navigating",
            ControllerState::Calibrating => "calibrating",
            ControllerState::CapturingSingle => "capturing image",
            ControllerState::CapturingStack => "capturing stack",
            ControllerState::RunningBatch => "running plate",
            ControllerState::Cancelling => "cancelling",
        };
        f.write_str(name)
    }
}

/// Cloneable handle for observing and stopping a plate run from another task.
///
/// Cancellation is cooperative: the run checks the flag after each sample,
/// so an in-flight move or capture always completes.
#[derive(Debug, Clone)]
pub struct RunHandle {
    running: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
    state: Arc<watch::Sender<ControllerState>>,
}

impl RunHandle {
    pub(crate) fn new(state: Arc<watch::Sender<ControllerState>>) -> Self {
        Self {
            running: Arc::new(AtomicBool::new(false)),
            cancel: Arc::new(AtomicBool::new(false)),
            state,
        }
    }

    /// Ask a running batch to stop after the current sample.
    ///
    /// Has no effect when no batch is running.
    pub fn request_cancel(&self) {
        if !self.is_running() {
            tracing::debug!("cancel requested with no run active");
            return;
        }
        if !self.cancel.swap(true, Ordering::SeqCst) {
            tracing::info!("plate run cancellation requested");
            self.state.send_replace(ControllerState::Cancelling);
        }
    }

    /// Whether a batch is in progress.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Whether a stop has been requested and not yet honoured.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Subscribe to state changes.
    pub fn subscribe(&self) -> watch::Receiver<ControllerState> {
        self.state.subscribe()
    }

    pub(crate) fn begin(&self) {
        self.cancel.store(false, Ordering::SeqCst);
        self.running.store(true, Ordering::SeqCst);
    }

    /// Clear both flags once a run has fully unwound.
    pub(crate) fn finish(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.cancel.store(false, Ordering::SeqCst);
    }
}
