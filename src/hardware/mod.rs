// src/hardware/mod.rs
//
// Hardware-facing traits the motion core drives, plus minimal in-memory
// mock implementations for the demo binary and tests. Register-level chip
// programming and real GPIO access are out of scope (see spec Non-goals);
// these traits are the seam a real driver crate would implement.
// Grounded on StepDriverBase.h/.cpp and EndStops/EndStops.h.

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};

/// Direction a stepper axis is commanded to move.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepDirection {
    Forwards,
    Backwards,
}

/// One physical stepper output. The ramp generator calls `step_start`/
/// `step_end` once per generated pulse and `set_direction` whenever the
/// commanded direction changes; `set_enabled` gates the shared motor-enable
/// line. Mirrors the pulse-pair contract in `StepDriverBase.h`.
pub trait StepperDriver: Send + Sync {
    fn set_direction(&self, axis_idx: usize, direction: StepDirection);
    fn step_start(&self, axis_idx: usize);
    /// Resets the step pulse and reports whether a pin reset actually
    /// happened (false if no pulse was in flight on this axis). The ramp
    /// generator only counts a step as having completed once this returns
    /// true, mirroring `StepDriverBase::stepEnd`'s minimum-pulse-width
    /// contract.
    fn step_end(&self, axis_idx: usize) -> bool;
    fn set_enabled(&self, enabled: bool);
}

/// Source of end-stop state for a single axis. `is_at_endstop` is sampled
/// from the ISR so it must not block or allocate. Mirrors `EndStops.h`.
pub trait EndstopSource: Send + Sync {
    fn is_at_endstop(&self, axis_idx: usize, is_max: bool) -> bool;
    fn is_valid(&self, axis_idx: usize, is_max: bool) -> bool;
}

/// In-memory stepper mock: counts pulses and records direction/enable state
/// per axis so tests can assert step conservation without real hardware.
#[derive(Debug, Default)]
pub struct MockStepperDriver {
    step_counts: Vec<AtomicI64>,
    directions: Vec<AtomicBool>,
    pulse_pending: Vec<AtomicBool>,
    enabled: AtomicBool,
}

impl MockStepperDriver {
    pub fn new(num_axes: usize) -> Self {
        Self {
            step_counts: (0..num_axes).map(|_| AtomicI64::new(0)).collect(),
            directions: (0..num_axes).map(|_| AtomicBool::new(true)).collect(),
            pulse_pending: (0..num_axes).map(|_| AtomicBool::new(false)).collect(),
            enabled: AtomicBool::new(false),
        }
    }

    pub fn step_count(&self, axis_idx: usize) -> i64 {
        self.step_counts
            .get(axis_idx)
            .map_or(0, |c| c.load(Ordering::Acquire))
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled.load(Ordering::Acquire)
    }
}

impl StepperDriver for MockStepperDriver {
    fn set_direction(&self, axis_idx: usize, direction: StepDirection) {
        if let Some(d) = self.directions.get(axis_idx) {
            d.store(direction == StepDirection::Forwards, Ordering::Release);
        }
    }

    fn step_start(&self, axis_idx: usize) {
        if let Some(count) = self.step_counts.get(axis_idx) {
            let forwards = self.directions.get(axis_idx).map_or(true, |d| d.load(Ordering::Acquire));
            if forwards {
                count.fetch_add(1, Ordering::AcqRel);
            } else {
                count.fetch_sub(1, Ordering::AcqRel);
            }
        }
        if let Some(pending) = self.pulse_pending.get(axis_idx) {
            pending.store(true, Ordering::Release);
        }
    }

    /// Mirrors the real driver's minimum-pulse-width contract: only
    /// reports a reset (and only then should the caller count the step as
    /// complete) if `step_start` asserted a pulse that hasn't been reset
    /// yet.
    fn step_end(&self, axis_idx: usize) -> bool {
        let Some(pending) = self.pulse_pending.get(axis_idx) else {
            return false;
        };
        pending.swap(false, Ordering::AcqRel)
    }

    fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::Release);
    }
}

/// In-memory end-stop mock: always reports "not hit" unless a test arms a
/// trigger position via `arm_at_step`.
#[derive(Debug, Default)]
pub struct MockEndstopSource {
    trigger_steps: Vec<AtomicI64>,
    armed: Vec<AtomicBool>,
    driver_steps: Vec<AtomicI64>,
}

impl MockEndstopSource {
    pub fn new(num_axes: usize) -> Self {
        Self {
            trigger_steps: (0..num_axes).map(|_| AtomicI64::new(0)).collect(),
            armed: (0..num_axes).map(|_| AtomicBool::new(false)).collect(),
            driver_steps: (0..num_axes).map(|_| AtomicI64::new(0)).collect(),
        }
    }

    /// Arms the endstop for `axis_idx` to report "hit" once the recorded
    /// step count reaches `trigger_step`.
    pub fn arm_at_step(&self, axis_idx: usize, trigger_step: i64) {
        if let (Some(t), Some(a)) = (self.trigger_steps.get(axis_idx), self.armed.get(axis_idx)) {
            t.store(trigger_step, Ordering::Release);
            a.store(true, Ordering::Release);
        }
    }

    /// Records a step taken on `axis_idx` so armed triggers can compare
    /// against it. A real driver samples a physical pin instead.
    pub fn record_step(&self, axis_idx: usize, delta: i64) {
        if let Some(s) = self.driver_steps.get(axis_idx) {
            s.fetch_add(delta, Ordering::AcqRel);
        }
    }
}

impl EndstopSource for MockEndstopSource {
    fn is_at_endstop(&self, axis_idx: usize, _is_max: bool) -> bool {
        let Some(armed) = self.armed.get(axis_idx) else {
            return false;
        };
        if !armed.load(Ordering::Acquire) {
            return false;
        }
        let trigger = self.trigger_steps[axis_idx].load(Ordering::Acquire);
        let current = self.driver_steps[axis_idx].load(Ordering::Acquire);
        current >= trigger
    }

    fn is_valid(&self, axis_idx: usize, _is_max: bool) -> bool {
        axis_idx < self.armed.len()
    }
}

/// Wall-clock source the motor enabler uses for its idle timeout. Kept as a
/// trait so tests can fast-forward time instead of sleeping.
pub trait Clock: Send + Sync {
    fn now_millis(&self) -> u64;
}

/// `Clock` backed by `std::time::Instant`.
#[derive(Debug)]
pub struct SystemClock {
    start: std::time::Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self { start: std::time::Instant::now() }
    }
}

impl Clock for SystemClock {
    fn now_millis(&self) -> u64 {
        self.start.elapsed().as_millis() as u64
    }
}

/// `Clock` a test can advance manually.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicU64,
}

impl ManualClock {
    pub fn advance(&self, delta_millis: u64) {
        self.millis.fetch_add(delta_millis, Ordering::AcqRel);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.millis.load(Ordering::Acquire)
    }
}
