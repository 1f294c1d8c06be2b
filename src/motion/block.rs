// src/motion/block.rs
//
// A single entry in the motion pipeline: the geometry of one move (steps
// per axis, unit vector, requested/entry/exit speeds) plus the stepping
// profile (acceleration/cruise/deceleration step rates in fixed-point
// TTICKS units) computed by `prepare_for_stepping`. Grounded on
// RampGenerator/MotionBlock.h / MotionBlock.cpp.

use std::sync::atomic::{AtomicBool, Ordering};

use super::axes::{AxisEndstopChecks, N_AXES};
use super::axes_params::AxesParams;

/// Fixed-point scale for step-rate arithmetic done in the ISR: all step
/// rates are expressed as steps per `TTICKS` timer ticks rather than
/// floating-point steps/sec, so the hot path never touches floats.
pub const TTICKS_VALUE: u64 = 1_000_000_000;

/// Nanoseconds in a millisecond, used to convert the per-tick step-timer
/// period into a ms-cadence acceleration increment.
pub const NS_IN_A_MS: u32 = 1_000_000;

/// Floor step rate (steps/sec) below which a block would otherwise stall.
const MIN_STEP_RATE_PER_SEC: f64 = 10.0;

/// Moves shorter than this (in mm) are rejected by the planner rather than
/// queued as a degenerate zero-length block.
pub const MINIMUM_MOVE_DIST_MM: f64 = 0.0001;

pub fn calc_ticks_per_sec(step_gen_period_ns: u32) -> f64 {
    1.0e9 / step_gen_period_ns as f64
}

pub fn calc_min_step_rate_per_tticks(step_gen_period_ns: u32) -> u32 {
    ((MIN_STEP_RATE_PER_SEC * TTICKS_VALUE as f64) / calc_ticks_per_sec(step_gen_period_ns)) as u32
}

/// `sqrt(v^2 + 2 * a * d)`: the speed reachable after accelerating at `a`
/// over distance `d`, starting from `v`. Used by both the planner's
/// junction pass and `prepare_for_stepping`.
pub fn max_achievable_speed(acceleration: f64, target_velocity: f64, distance: f64) -> f64 {
    (target_velocity * target_velocity + 2.0 * acceleration * distance).sqrt()
}

/// Execution hand-off flags shared between the task (producer) and the ISR
/// (consumer). The task owns a block until `can_execute` is set; the ISR
/// owns it from the moment `is_executing` is set until it removes the block
/// from the pipeline.
#[derive(Debug, Default)]
pub struct BlockFlags {
    pub is_executing: AtomicBool,
    pub can_execute: AtomicBool,
    pub block_is_followed: AtomicBool,
}

impl Clone for BlockFlags {
    fn clone(&self) -> Self {
        Self {
            is_executing: AtomicBool::new(self.is_executing.load(Ordering::Acquire)),
            can_execute: AtomicBool::new(self.can_execute.load(Ordering::Acquire)),
            block_is_followed: AtomicBool::new(self.block_is_followed.load(Ordering::Acquire)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct MotionBlock {
    pub flags: BlockFlags,

    /// Requested max velocity: axis-units/sec for ramped moves, steps/sec
    /// for linear (stepwise) moves.
    pub requested_velocity: f64,
    /// Pythagorean distance over primary axes only.
    pub move_dist_primary_axes_mm: f64,
    pub unit_vec_axis_with_max_dist: f64,
    pub max_entry_speed_mmps: f64,
    pub entry_speed_mmps: f64,
    pub exit_speed_mmps: f64,
    pub end_stops_to_check: AxisEndstopChecks,

    pub steps_total_maybe_neg: [i32; N_AXES],
    pub axis_idx_with_max_steps: usize,
    pub steps_before_decel: u32,

    pub initial_step_rate_per_tticks: u32,
    pub max_step_rate_per_tticks: u32,
    pub final_step_rate_per_tticks: u32,
    pub acc_steps_per_tticks_per_ms: u32,

    pub motion_tracking_index: u32,

    step_dist_mm: f64,
    ticks_per_sec: f64,
}

impl Default for MotionBlock {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionBlock {
    pub fn new() -> Self {
        Self {
            flags: BlockFlags::default(),
            requested_velocity: 0.0,
            move_dist_primary_axes_mm: 0.0,
            unit_vec_axis_with_max_dist: 0.0,
            max_entry_speed_mmps: 0.0,
            entry_speed_mmps: 0.0,
            exit_speed_mmps: 0.0,
            end_stops_to_check: AxisEndstopChecks::new(),
            steps_total_maybe_neg: [0; N_AXES],
            axis_idx_with_max_steps: 0,
            steps_before_decel: 0,
            initial_step_rate_per_tticks: 0,
            max_step_rate_per_tticks: 0,
            final_step_rate_per_tticks: 0,
            acc_steps_per_tticks_per_ms: 0,
            motion_tracking_index: 0,
            step_dist_mm: 0.0,
            ticks_per_sec: calc_ticks_per_sec(20_000),
        }
    }

    pub fn set_timer_period_ns(&mut self, step_gen_period_ns: u32) {
        self.ticks_per_sec = calc_ticks_per_sec(step_gen_period_ns);
    }

    pub fn clear(&mut self) {
        *self = Self {
            ticks_per_sec: self.ticks_per_sec,
            ..Self::new()
        };
    }

    pub fn is_executing(&self) -> bool {
        self.flags.is_executing.load(Ordering::Acquire)
    }

    pub fn can_execute(&self) -> bool {
        self.flags.can_execute.load(Ordering::Acquire)
    }

    pub fn set_can_execute(&self, val: bool) {
        self.flags.can_execute.store(val, Ordering::Release);
    }

    pub fn set_is_executing(&self, val: bool) {
        self.flags.is_executing.store(val, Ordering::Release);
    }

    pub fn block_is_followed(&self) -> bool {
        self.flags.block_is_followed.load(Ordering::Acquire)
    }

    pub fn set_block_is_followed(&self, val: bool) {
        self.flags.block_is_followed.store(val, Ordering::Release);
    }

    pub fn get_steps_to_target(&self, axis_idx: usize) -> i32 {
        self.steps_total_maybe_neg.get(axis_idx).copied().unwrap_or(0)
    }

    pub fn get_abs_steps_to_target(&self, axis_idx: usize) -> u32 {
        self.get_steps_to_target(axis_idx).unsigned_abs()
    }

    pub fn set_steps_to_target(&mut self, axis_idx: usize, steps: i32) {
        if axis_idx >= N_AXES {
            return;
        }
        self.steps_total_maybe_neg[axis_idx] = steps;
        if steps.abs() > self.steps_total_maybe_neg[self.axis_idx_with_max_steps].abs() {
            self.axis_idx_with_max_steps = axis_idx;
        }
    }

    pub fn get_exit_step_rate_per_tticks(&self) -> u32 {
        self.final_step_rate_per_tticks
    }

    /// Computes the acceleration/cruise/deceleration stepping profile from
    /// the block's entry/exit speeds (ramped) or requested rate (linear).
    /// Returns `false` without modifying anything if the block is already
    /// being executed by the ISR. Mirrors `MotionBlock::prepareForStepping`.
    pub fn prepare_for_stepping(&mut self, axes_params: &AxesParams, is_linear: bool) -> bool {
        if self.is_executing() {
            return false;
        }

        let abs_max_steps_for_any_axis =
            self.steps_total_maybe_neg[self.axis_idx_with_max_steps].unsigned_abs() as f64;

        let initial_step_rate_per_sec;
        let final_step_rate_per_sec;
        let max_acc_steps_per_sec2;
        let mut axis_max_step_rate_per_sec;
        let mut steps_accelerating: f64;
        let mut steps_decelerating: f64;
        let step_dist_mm;

        let axis_max_rate = axes_params.get_max_step_rate_per_sec(self.axis_idx_with_max_steps);

        if is_linear {
            let step_rate_per_sec = self.requested_velocity.min(axis_max_rate);
            initial_step_rate_per_sec = step_rate_per_sec;
            final_step_rate_per_sec = step_rate_per_sec;
            max_acc_steps_per_sec2 = step_rate_per_sec;
            axis_max_step_rate_per_sec = step_rate_per_sec;
            steps_decelerating = 0.0;
            step_dist_mm = 0.0;
        } else {
            step_dist_mm = (self.move_dist_primary_axes_mm
                / self.steps_total_maybe_neg[self.axis_idx_with_max_steps] as f64)
                .abs();

            initial_step_rate_per_sec =
                (self.entry_speed_mmps / step_dist_mm).abs().min(axis_max_rate);
            final_step_rate_per_sec =
                (self.exit_speed_mmps / step_dist_mm).abs().min(axis_max_rate);
            max_acc_steps_per_sec2 =
                (axes_params.get_max_accel(self.axis_idx_with_max_steps) / step_dist_mm).abs();

            let steps_accelerating_float = ((final_step_rate_per_sec.powi(2)
                - initial_step_rate_per_sec.powi(2))
                / 4.0
                / max_acc_steps_per_sec2
                + abs_max_steps_for_any_axis / 2.0)
                .ceil();
            steps_accelerating = if steps_accelerating_float > 0.0 {
                steps_accelerating_float.min(abs_max_steps_for_any_axis)
            } else {
                0.0
            };
            steps_decelerating = 0.0;

            axis_max_step_rate_per_sec =
                (self.requested_velocity / step_dist_mm).abs().min(axis_max_rate);

            let steps_to_max_speed = (axis_max_step_rate_per_sec.powi(2)
                - initial_step_rate_per_sec.powi(2))
                / 2.0
                / max_acc_steps_per_sec2;
            if steps_accelerating > steps_to_max_speed {
                steps_accelerating = steps_to_max_speed;
                steps_decelerating = (axis_max_step_rate_per_sec.powi(2)
                    - final_step_rate_per_sec.powi(2))
                    / 2.0
                    / max_acc_steps_per_sec2;
            } else {
                axis_max_step_rate_per_sec = (initial_step_rate_per_sec.powi(2)
                    + 2.0 * max_acc_steps_per_sec2 * steps_accelerating)
                    .sqrt();
                steps_decelerating = abs_max_steps_for_any_axis - steps_accelerating;
            }
        }

        self.initial_step_rate_per_tticks =
            ((initial_step_rate_per_sec * TTICKS_VALUE as f64) / self.ticks_per_sec) as u32;
        self.max_step_rate_per_tticks =
            ((axis_max_step_rate_per_sec * TTICKS_VALUE as f64) / self.ticks_per_sec) as u32;
        self.final_step_rate_per_tticks =
            ((final_step_rate_per_sec * TTICKS_VALUE as f64) / self.ticks_per_sec) as u32;
        self.acc_steps_per_tticks_per_ms =
            ((max_acc_steps_per_sec2 * TTICKS_VALUE as f64) / self.ticks_per_sec / 1000.0) as u32;
        self.steps_before_decel = (abs_max_steps_for_any_axis - steps_decelerating) as u32;
        self.step_dist_mm = step_dist_mm;

        true
    }
}
