//! Mock Hardware Implementations
//!
//! In-memory stand-ins for the imager's peripherals, used by the tests and by
//! the simulated bench configuration. Every mock can share a [`CallLog`] so a
//! test can assert on the order of hardware actions across devices.
//!
//! # Available Mocks
//!
//! - `MockMotion` - GRBL stand-in that tracks machine position
//! - `MockOutput` - a light line
//! - `MockInput` - the movement-complete line
//! - `MockCamera` - preview and capture; captures write a placeholder file
//! - `RecordingStatusSink` - keeps every status line

use ami_core::{MachinePosition, ProtocolError};
use ami_driver_grbl::{Command, MotionProtocol, ProtocolResult};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::hardware::capabilities::{CaptureSink, DigitalInput, DigitalOutput, Previewable};
use crate::status::StatusSink;

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// CallLog - shared, ordered record of hardware actions
// =============================================================================

/// Ordered record of actions taken by the mocks that share it.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    /// Empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one entry.
    pub fn push(&self, entry: impl Into<String>) {
        locked(&self.0).push(entry.into());
    }

    /// Copy of every entry so far.
    pub fn entries(&self) -> Vec<String> {
        locked(&self.0).clone()
    }

    /// Number of entries equal to `entry`.
    pub fn count(&self, entry: &str) -> usize {
        locked(&self.0).iter().filter(|e| *e == entry).count()
    }

    /// Number of entries starting with `prefix`.
    pub fn count_prefix(&self, prefix: &str) -> usize {
        locked(&self.0)
            .iter()
            .filter(|e| e.starts_with(prefix))
            .count()
    }

    /// Forget everything recorded so far.
    pub fn clear(&self) {
        locked(&self.0).clear();
    }
}

// =============================================================================
// MockMotion - GRBL stand-in
// =============================================================================

/// Motion controller that acknowledges every command.
///
/// Each command is logged with its wire text (`G0 X1.000`, `$21=0`, ...).
/// Machine position follows rapid moves; work coordinates equal machine
/// coordinates.
pub struct MockMotion {
    log: CallLog,
    position: Mutex<MachinePosition>,
    moves: AtomicUsize,
    fail_move: Mutex<Option<usize>>,
}

impl MockMotion {
    /// Controller at the machine origin.
    pub fn new(log: CallLog) -> Self {
        Self::with_position(log, MachinePosition::default())
    }

    /// Controller at `position`.
    pub fn with_position(log: CallLog, position: MachinePosition) -> Self {
        Self {
            log,
            position: Mutex::new(position),
            moves: AtomicUsize::new(0),
            fail_move: Mutex::new(None),
        }
    }

    /// Reject the `n`th rapid move (1-based) with `error:9`.
    pub fn fail_move(&self, n: usize) {
        *locked(&self.fail_move) = Some(n);
    }

    /// Position after the last accepted move.
    pub fn position(&self) -> MachinePosition {
        *locked(&self.position)
    }

    fn record(&self, command: Command) -> ProtocolResult<()> {
        self.log.push(command.to_string());
        Ok(())
    }
}

#[async_trait]
impl MotionProtocol for MockMotion {
    async fn rapid_move(
        &self,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
    ) -> ProtocolResult<()> {
        let command = Command::RapidMove { x, y, z };
        let n = self.moves.fetch_add(1, Ordering::SeqCst) + 1;
        if *locked(&self.fail_move) == Some(n) {
            self.log.push(format!("{} -> error:9", command));
            return Err(ProtocolError::Rejected {
                command: command.to_string(),
                code: "9".to_string(),
            });
        }
        {
            let mut position = locked(&self.position);
            position.x = x.unwrap_or(position.x);
            position.y = y.unwrap_or(position.y);
            position.z = z.unwrap_or(position.z);
        }
        self.record(command)
    }

    async fn run_homing_cycle(&self) -> ProtocolResult<()> {
        *locked(&self.position) = MachinePosition::default();
        self.record(Command::Home)
    }

    async fn kill_alarm_lock(&self) -> ProtocolResult<()> {
        self.record(Command::KillAlarmLock)
    }

    async fn hard_limits(&self, enabled: bool) -> ProtocolResult<()> {
        self.record(Command::hard_limits(enabled))
    }

    async fn set_spindle_speed(&self, rpm: u32) -> ProtocolResult<()> {
        self.record(Command::SpindleSpeed(rpm))
    }

    async fn spindle_control(&self, clockwise: bool, running: bool) -> ProtocolResult<()> {
        self.record(Command::Spindle { clockwise, running })
    }

    async fn coolant_control(&self, mist: bool, flood: bool) -> ProtocolResult<()> {
        match (mist, flood) {
            (false, false) => self.record(Command::CoolantOff),
            (true, false) => self.record(Command::CoolantMist),
            (false, true) => self.record(Command::CoolantFlood),
            (true, true) => {
                self.record(Command::CoolantMist)?;
                self.record(Command::CoolantFlood)
            }
        }
    }

    async fn set_coordinate_system(
        &self,
        system: u8,
        x: Option<f64>,
        y: Option<f64>,
        z: Option<f64>,
    ) -> ProtocolResult<()> {
        self.record(Command::SetCoordinateSystem { system, x, y, z })
    }

    async fn get_work_position(&self) -> ProtocolResult<MachinePosition> {
        self.log.push("?");
        Ok(self.position())
    }

    async fn get_machine_position(&self) -> ProtocolResult<MachinePosition> {
        self.log.push("?");
        Ok(self.position())
    }

    async fn cycle_start(&self) -> ProtocolResult<()> {
        self.record(Command::CycleStart)
    }

    async fn feed_hold(&self) -> ProtocolResult<()> {
        self.record(Command::FeedHold)
    }
}

// =============================================================================
// MockOutput / MockInput - digital lines
// =============================================================================

/// Output line that logs `<name> on` / `<name> off`.
pub struct MockOutput {
    name: String,
    log: CallLog,
    level: AtomicBool,
}

impl MockOutput {
    /// Line called `name`, initially low.
    pub fn new(name: impl Into<String>, log: CallLog) -> Self {
        Self {
            name: name.into(),
            log,
            level: AtomicBool::new(false),
        }
    }

    /// Last level written.
    pub fn is_high(&self) -> bool {
        self.level.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DigitalOutput for MockOutput {
    async fn set(&self, high: bool) -> Result<()> {
        self.level.store(high, Ordering::SeqCst);
        self.log
            .push(format!("{} {}", self.name, if high { "on" } else { "off" }));
        Ok(())
    }
}

/// Input line with a level set by the test.
///
/// `busy_reads` makes the line read high that many times before settling at
/// its level, mimicking a move still in progress.
pub struct MockInput {
    level: AtomicBool,
    busy_reads: AtomicUsize,
    reads: AtomicUsize,
}

impl MockInput {
    /// Line that reads low (movement complete).
    pub fn idle() -> Self {
        Self::with_level(false)
    }

    /// Line that never goes low.
    pub fn stuck_high() -> Self {
        Self::with_level(true)
    }

    fn with_level(level: bool) -> Self {
        Self {
            level: AtomicBool::new(level),
            busy_reads: AtomicUsize::new(0),
            reads: AtomicUsize::new(0),
        }
    }

    /// Read high for the next `n` reads.
    pub fn busy_for(&self, n: usize) {
        self.busy_reads.store(n, Ordering::SeqCst);
    }

    /// Set the settled level.
    pub fn set_level(&self, high: bool) {
        self.level.store(high, Ordering::SeqCst);
    }

    /// Total reads so far.
    pub fn reads(&self) -> usize {
        self.reads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DigitalInput for MockInput {
    async fn read(&self) -> Result<bool> {
        self.reads.fetch_add(1, Ordering::SeqCst);
        let busy = self
            .busy_reads
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        Ok(busy || self.level.load(Ordering::SeqCst))
    }
}

// =============================================================================
// MockCamera
// =============================================================================

type CaptureHook = Box<dyn Fn(usize) + Send + Sync>;

/// Camera that writes a small placeholder file for every capture.
///
/// Logs `preview on`, `preview off` and `capture <file name>`.
pub struct MockCamera {
    log: CallLog,
    previewing: AtomicBool,
    captures: AtomicUsize,
    on_capture: Mutex<Option<CaptureHook>>,
    fail_captures: AtomicBool,
}

impl MockCamera {
    /// Camera with preview off.
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            previewing: AtomicBool::new(false),
            captures: AtomicUsize::new(0),
            on_capture: Mutex::new(None),
            fail_captures: AtomicBool::new(false),
        }
    }

    /// Call `hook` with the running capture count after every capture.
    pub fn on_capture(&self, hook: impl Fn(usize) + Send + Sync + 'static) {
        *locked(&self.on_capture) = Some(Box::new(hook));
    }

    /// Make every subsequent capture fail.
    pub fn fail_captures(&self) {
        self.fail_captures.store(true, Ordering::SeqCst);
    }

    /// Captures taken so far.
    pub fn captures(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }

    /// Whether the preview is showing.
    pub fn is_previewing(&self) -> bool {
        self.previewing.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Previewable for MockCamera {
    async fn start_preview(&self) -> Result<()> {
        self.previewing.store(true, Ordering::SeqCst);
        self.log.push("preview on");
        Ok(())
    }

    async fn stop_preview(&self) -> Result<()> {
        self.previewing.store(false, Ordering::SeqCst);
        self.log.push("preview off");
        Ok(())
    }
}

#[async_trait]
impl CaptureSink for MockCamera {
    async fn capture(&self, path: &Path) -> Result<()> {
        if self.fail_captures.load(Ordering::SeqCst) {
            return Err(anyhow!("camera unavailable"));
        }
        tokio::fs::write(path, b"mock image").await?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        self.log.push(format!("capture {}", name));
        let count = self.captures.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(hook) = locked(&self.on_capture).as_ref() {
            hook(count);
        }
        Ok(())
    }
}

// =============================================================================
// RecordingStatusSink
// =============================================================================

/// Status sink that keeps every line.
#[derive(Debug, Clone, Default)]
pub struct RecordingStatusSink(Arc<Mutex<Vec<String>>>);

impl RecordingStatusSink {
    /// Empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every line reported so far.
    pub fn messages(&self) -> Vec<String> {
        locked(&self.0).clone()
    }

    /// Most recent line.
    pub fn last(&self) -> Option<String> {
        locked(&self.0).last().cloned()
    }
}

impl StatusSink for RecordingStatusSink {
    fn report(&self, message: &str) {
        locked(&self.0).push(message.to_string());
    }
}
