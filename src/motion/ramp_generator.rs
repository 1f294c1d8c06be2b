// src/motion/ramp_generator.rs
//
// Timer-tick step generator: on every call to `tick()` it advances the head
// block's acceleration profile by one `step_gen_period_ns` and emits at most
// one step pulse per axis, interleaving non-master axes against the master
// via a Bresenham-style relative accumulator. `tick()` never allocates and
// never blocks, matching the real ISR it stands in for. Grounded on
// RampGenerator/RampGenerator.h / RampGenerator.cpp.

use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::axes::{AxesParamVals, AxisMinMaxEnum, N_AXES};
use super::block::{NS_IN_A_MS, TTICKS_VALUE};
use super::pipeline::MotionPipeline;
use crate::hardware::{EndstopSource, StepDirection, StepperDriver};

const TTICKS_U32: u32 = TTICKS_VALUE as u32;

#[derive(Debug, Clone, Copy)]
struct EndStopCheck {
    axis_idx: usize,
    is_max: bool,
    check_hit: bool,
}

/// Mutable state touched only from the tick thread between calls to `tick`.
/// Held behind `UnsafeCell` rather than a lock: the single-caller discipline
/// documented on `tick` is what makes this sound, the same discipline
/// `MotionPipeline` relies on for its own slots.
struct IsrState {
    steps_total_abs: [u32; N_AXES],
    cur_step_count: [u32; N_AXES],
    cur_accumulator_relative: [u32; N_AXES],
    total_steps_inc: [i32; N_AXES],
    cur_step_rate_per_tticks: u32,
    cur_accumulator_step: u32,
    cur_accumulator_ns: u32,
    end_stop_checks: Vec<EndStopCheck>,
}

impl Default for IsrState {
    fn default() -> Self {
        Self {
            steps_total_abs: [0; N_AXES],
            cur_step_count: [0; N_AXES],
            cur_accumulator_relative: [0; N_AXES],
            total_steps_inc: [1; N_AXES],
            cur_step_rate_per_tticks: 0,
            cur_accumulator_step: 0,
            cur_accumulator_ns: 0,
            end_stop_checks: Vec::with_capacity(N_AXES * 2),
        }
    }
}

/// ISR-observable performance counters, updated from inside `tick` with
/// relaxed atomics (no ordering is required between counters; each is read
/// independently by `get_stats`). Mirrors `RampGenerator::RampGenStats`.
#[derive(Debug, Default)]
struct RampGenStats {
    isr_count: AtomicU64,
    isr_acc_us: AtomicU64,
    isr_max_us: AtomicU64,
    cur_step_rate_per_tticks: AtomicU32,
}

impl RampGenStats {
    fn record_tick(&self, elapsed_us: u64, cur_step_rate_per_tticks: u32) {
        self.isr_count.fetch_add(1, Ordering::Relaxed);
        self.isr_acc_us.fetch_add(elapsed_us, Ordering::Relaxed);
        self.cur_step_rate_per_tticks.store(cur_step_rate_per_tticks, Ordering::Relaxed);
        let mut cur_max = self.isr_max_us.load(Ordering::Relaxed);
        while elapsed_us > cur_max {
            match self.isr_max_us.compare_exchange_weak(
                cur_max,
                elapsed_us,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(observed) => cur_max = observed,
            }
        }
    }
}

/// Snapshot returned from `RampGenerator::get_stats`. Mirrors the fields
/// spec.md §6 names on `RampGenStats`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RampGenStatsSnapshot {
    pub isr_avg_us: f64,
    pub isr_max_us: u64,
    pub cur_step_rate_per_tticks: u32,
}

/// Timer-tick step generator. One tick corresponds to one hardware-timer
/// interrupt firing every `step_gen_period_ns`. Mirrors `RampGenerator`.
pub struct RampGenerator {
    pipeline: Arc<MotionPipeline>,
    stepper_driver: Arc<dyn StepperDriver>,
    endstops: Arc<dyn EndstopSource>,

    step_gen_period_ns: u32,
    min_step_rate_per_tticks: u32,

    paused: AtomicBool,
    endstop_reached: AtomicBool,
    axis_total_steps: [AtomicI32; N_AXES],

    stats: RampGenStats,
    state: UnsafeCell<IsrState>,
}

// SAFETY: `state` is only ever touched from within `tick`, which the caller
// must serialize against itself (one ticking thread, same discipline as a
// real hardware ISR). All cross-thread-visible fields are plain atomics.
unsafe impl Sync for RampGenerator {}

impl RampGenerator {
    pub fn new(
        pipeline: Arc<MotionPipeline>,
        stepper_driver: Arc<dyn StepperDriver>,
        endstops: Arc<dyn EndstopSource>,
        step_gen_period_ns: u32,
    ) -> Self {
        let min_step_rate_per_tticks = super::block::calc_min_step_rate_per_tticks(step_gen_period_ns);
        Self {
            pipeline,
            stepper_driver,
            endstops,
            step_gen_period_ns,
            min_step_rate_per_tticks,
            paused: AtomicBool::new(true),
            endstop_reached: AtomicBool::new(false),
            axis_total_steps: Default::default(),
            stats: RampGenStats::default(),
            state: UnsafeCell::new(IsrState::default()),
        }
    }

    /// Unpauses pulse generation and clears any latched end-stop hit.
    pub fn pause(&self, pause_it: bool) {
        self.paused.store(pause_it, Ordering::Release);
        if !pause_it {
            self.endstop_reached.store(false, Ordering::Release);
        }
    }

    /// Pauses pulse generation and clears the latched end-stop hit. Unlike
    /// `pause(true)`, this is the "stop everything now" entry point a
    /// caller uses before clearing the pipeline.
    pub fn stop(&self) {
        self.paused.store(true, Ordering::Release);
        self.endstop_reached.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn clear_endstop_reached(&self) {
        self.endstop_reached.store(false, Ordering::Release);
    }

    pub fn is_endstop_reached(&self) -> bool {
        self.endstop_reached.load(Ordering::Acquire)
    }

    pub fn reset_total_step_position(&self) {
        for axis in &self.axis_total_steps {
            axis.store(0, Ordering::Release);
        }
    }

    pub fn get_total_step_position(&self) -> AxesParamVals<i32> {
        let mut out = AxesParamVals::<i32>::new();
        for (axis_idx, axis) in self.axis_total_steps.iter().enumerate() {
            out.set_val(axis_idx, axis.load(Ordering::Acquire));
        }
        out
    }

    pub fn set_total_step_position(&self, axis_idx: usize, step_pos: i32) {
        if let Some(axis) = self.axis_total_steps.get(axis_idx) {
            axis.store(step_pos, Ordering::Release);
        }
    }

    pub fn get_stats(&self) -> RampGenStatsSnapshot {
        let count = self.stats.isr_count.load(Ordering::Relaxed);
        let acc = self.stats.isr_acc_us.load(Ordering::Relaxed);
        RampGenStatsSnapshot {
            isr_avg_us: if count == 0 { 0.0 } else { acc as f64 / count as f64 },
            isr_max_us: self.stats.isr_max_us.load(Ordering::Relaxed),
            cur_step_rate_per_tticks: self.stats.cur_step_rate_per_tticks.load(Ordering::Relaxed),
        }
    }

    /// Runs `tick` enough times to make visible progress without a real
    /// timer interrupt driving it — used when the demo binary or a test
    /// pumps the ISR from a plain loop rather than a hardware timer.
    /// Mirrors `RampGenerator::service`'s non-timer fallback.
    pub fn service(&self) {
        for _ in 0..100 {
            self.tick();
        }
    }

    /// One ISR tick. Must be called from a single dedicated caller (a
    /// hardware timer interrupt in firmware, one ticking thread here);
    /// concurrent calls from multiple threads would race on `state`.
    /// Mirrors `RampGenerator::generateMotionPulses`.
    pub fn tick(&self) {
        let started = Instant::now();
        self.tick_inner();
        let elapsed_us = started.elapsed().as_micros() as u64;
        let cur_rate = unsafe { (*self.state.get()).cur_step_rate_per_tticks };
        self.stats.record_tick(elapsed_us, cur_rate);
    }

    fn tick_inner(&self) {
        if self.handle_step_end() {
            return;
        }

        if self.paused.load(Ordering::Acquire) {
            return;
        }

        let Some(block) = self.pipeline.peek_get_mut() else {
            return;
        };

        if !block.can_execute() {
            return;
        }

        let is_new_block = !block.is_executing();
        block.set_is_executing(true);

        // Single `&mut IsrState` for the rest of this tick: every helper
        // below takes it as a parameter rather than re-deriving its own
        // `&mut *self.state.get()`, so no two live mutable borrows of the
        // same `UnsafeCell` ever coexist.
        let state = unsafe { &mut *self.state.get() };

        if is_new_block {
            self.setup_new_block(state, block);
            return;
        }

        let mut endstop_hit = false;
        for check in &state.end_stop_checks {
            if self.endstops.is_at_endstop(check.axis_idx, check.is_max) == check.check_hit {
                endstop_hit = true;
                break;
            }
        }

        if endstop_hit {
            self.endstop_reached.store(true, Ordering::Release);
            self.end_motion();
            return;
        }

        self.update_ms_accumulator(state, block);

        state.cur_accumulator_step = state
            .cur_accumulator_step
            .wrapping_add(state.cur_step_rate_per_tticks.max(self.min_step_rate_per_tticks));

        if state.cur_accumulator_step >= TTICKS_U32 {
            let any_axis_moving = self.handle_step_motion(state, block);
            if !any_axis_moving {
                self.end_motion();
            }
        }
    }

    /// De-asserts any pulse left asserted from the previous tick. Returns
    /// `true` (and lets the caller return immediately) if any axis had one,
    /// so a pulse is never shorter than one full tick period.
    fn handle_step_end(&self) -> bool {
        let mut any_pin_reset = false;
        for axis_idx in 0..N_AXES {
            if self.stepper_driver.step_end(axis_idx) {
                any_pin_reset = true;
                let state = unsafe { &*self.state.get() };
                let inc = state.total_steps_inc[axis_idx];
                self.axis_total_steps[axis_idx].fetch_add(inc, Ordering::AcqRel);
            }
        }
        any_pin_reset
    }

    fn setup_new_block(&self, state: &mut IsrState, block: &super::block::MotionBlock) {
        state.end_stop_checks.clear();

        for axis_idx in 0..N_AXES {
            let steps_total = block.get_steps_to_target(axis_idx);
            let positive = steps_total >= 0;

            state.steps_total_abs[axis_idx] = steps_total.unsigned_abs();
            state.cur_step_count[axis_idx] = 0;
            state.cur_accumulator_relative[axis_idx] = 0;
            state.total_steps_inc[axis_idx] = if positive { 1 } else { -1 };

            self.stepper_driver.set_direction(
                axis_idx,
                if positive { StepDirection::Forwards } else { StepDirection::Backwards },
            );

            if !block.end_stops_to_check.any() {
                continue;
            }

            for min_max_idx in 0..2 {
                let check_type = block.end_stops_to_check.get(axis_idx, min_max_idx);
                if check_type == AxisMinMaxEnum::None {
                    continue;
                }

                let is_max = min_max_idx == 1;
                if check_type == AxisMinMaxEnum::Towards {
                    let heading_towards_this_stop =
                        (is_max && steps_total > 0) || (!is_max && steps_total < 0);
                    if !heading_towards_this_stop {
                        continue;
                    }
                }

                if self.endstops.is_valid(axis_idx, is_max) {
                    state.end_stop_checks.push(EndStopCheck {
                        axis_idx,
                        is_max,
                        check_hit: check_type != AxisMinMaxEnum::NotHit,
                    });
                }
            }
        }

        state.cur_accumulator_step = 0;
        state.cur_accumulator_ns = 0;
        state.cur_step_rate_per_tticks = block.initial_step_rate_per_tticks;
    }

    fn update_ms_accumulator(&self, state: &mut IsrState, block: &super::block::MotionBlock) {
        state.cur_accumulator_ns += self.step_gen_period_ns;
        if state.cur_accumulator_ns < NS_IN_A_MS {
            return;
        }
        state.cur_accumulator_ns -= NS_IN_A_MS;

        let master = block.axis_idx_with_max_steps;
        if state.cur_step_count[master] > block.steps_before_decel {
            let decel_floor = (self.min_step_rate_per_tticks + block.acc_steps_per_tticks_per_ms)
                .max(block.final_step_rate_per_tticks + block.acc_steps_per_tticks_per_ms);
            if state.cur_step_rate_per_tticks > decel_floor {
                state.cur_step_rate_per_tticks -= block.acc_steps_per_tticks_per_ms;
            }
        } else if state.cur_step_rate_per_tticks < self.min_step_rate_per_tticks
            || state.cur_step_rate_per_tticks < block.max_step_rate_per_tticks
        {
            if state.cur_step_rate_per_tticks + block.acc_steps_per_tticks_per_ms < TTICKS_U32 {
                state.cur_step_rate_per_tticks += block.acc_steps_per_tticks_per_ms;
            }
        }
    }

    /// Emits the master-axis step (if still short of target) then checks
    /// every other axis's relative accumulator, Bresenham-style, so all
    /// axes finish together. Returns whether any axis still has steps left
    /// after this tick's pulses.
    fn handle_step_motion(&self, state: &mut IsrState, block: &super::block::MotionBlock) -> bool {
        let master = block.axis_idx_with_max_steps;
        let mut any_axis_moving = false;

        state.cur_accumulator_step -= TTICKS_U32;

        if state.cur_step_count[master] < state.steps_total_abs[master] {
            self.stepper_driver.step_start(master);
            state.cur_step_count[master] += 1;
            if state.cur_step_count[master] < state.steps_total_abs[master] {
                any_axis_moving = true;
            }
        }

        for axis_idx in 0..N_AXES {
            if axis_idx == master || state.cur_step_count[axis_idx] == state.steps_total_abs[axis_idx] {
                continue;
            }

            state.cur_accumulator_relative[axis_idx] += state.steps_total_abs[axis_idx];
            if state.cur_accumulator_relative[axis_idx] >= state.steps_total_abs[master] {
                state.cur_accumulator_relative[axis_idx] -= state.steps_total_abs[master];
                self.stepper_driver.step_start(axis_idx);
                state.cur_step_count[axis_idx] += 1;
                if state.cur_step_count[axis_idx] < state.steps_total_abs[axis_idx] {
                    any_axis_moving = true;
                }
            }
        }

        any_axis_moving
    }

    fn end_motion(&self) {
        self.pipeline.remove();
    }
}

impl std::fmt::Debug for RampGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RampGenerator")
            .field("paused", &self.is_paused())
            .field("endstop_reached", &self.is_endstop_reached())
            .field("step_gen_period_ns", &self.step_gen_period_ns)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{MockEndstopSource, MockStepperDriver};
    use crate::motion::axes_params::{AxesParams, AxisParams};
    use crate::motion::block::MotionBlock;

    fn axes_params() -> AxesParams {
        AxesParams::new(vec![
            AxisParams {
                max_speed: 200.0,
                max_accel: 1000.0,
                steps_per_rot: 200.0,
                units_per_rot: 1.0,
                ..AxisParams::default()
            };
            3
        ])
    }

    fn generator_with_block(block: MotionBlock) -> (Arc<MotionPipeline>, Arc<MockStepperDriver>, RampGenerator) {
        let pipeline = Arc::new({
            let mut p = MotionPipeline::new();
            p.setup(4);
            p
        });
        pipeline.add(block);
        let driver = Arc::new(MockStepperDriver::new(3));
        let endstops = Arc::new(MockEndstopSource::new(3));
        let generator = RampGenerator::new(pipeline.clone(), driver.clone(), endstops, 20_000);
        generator.pause(false);
        (pipeline, driver, generator)
    }

    fn straight_line_block(steps: i32) -> MotionBlock {
        let mut block = MotionBlock::new();
        block.set_timer_period_ns(20_000);
        block.move_dist_primary_axes_mm = 100.0;
        block.requested_velocity = 100.0;
        block.set_steps_to_target(0, steps);
        block.prepare_for_stepping(&axes_params(), false);
        block.set_can_execute(true);
        block
    }

    #[test]
    fn step_conservation_runs_block_to_completion() {
        let (pipeline, driver, generator) = generator_with_block(straight_line_block(500));
        for _ in 0..200_000 {
            generator.tick();
            if pipeline.count() == 0 {
                break;
            }
        }
        assert_eq!(pipeline.count(), 0);
        assert_eq!(driver.step_count(0), 500);
    }

    #[test]
    fn paused_generator_emits_no_pulses() {
        let (pipeline, driver, generator) = generator_with_block(straight_line_block(500));
        generator.pause(true);
        for _ in 0..1000 {
            generator.tick();
        }
        assert_eq!(driver.step_count(0), 0);
        assert_eq!(pipeline.count(), 1);
    }

    #[test]
    fn endstop_hit_aborts_block_and_latches() {
        let pipeline = Arc::new({
            let mut p = MotionPipeline::new();
            p.setup(4);
            p
        });
        let mut block = straight_line_block(10_000);
        block.end_stops_to_check.set(0, 1, AxisMinMaxEnum::Towards);
        pipeline.add(block);

        let driver = Arc::new(MockStepperDriver::new(3));
        let endstops = Arc::new(MockEndstopSource::new(3));
        endstops.arm_at_step(0, 5000);
        let generator = RampGenerator::new(pipeline.clone(), driver.clone(), endstops.clone(), 20_000);
        generator.pause(false);

        for _ in 0..200_000 {
            let before = driver.step_count(0);
            generator.tick();
            let after = driver.step_count(0);
            if after != before {
                endstops.record_step(0, after - before);
            }
            if generator.is_endstop_reached() {
                break;
            }
        }

        assert!(generator.is_endstop_reached());
        assert_eq!(pipeline.count(), 0);
        assert!(driver.step_count(0) >= 4995 && driver.step_count(0) <= 5005);
    }
}
