// src/motion/controller.rs
//
// Top-level orchestrator: owns the axes configuration, the pipeline, the
// block manager (planner + splitter), the motor enabler and the ramp
// generator, and exposes the handful of entry points a higher-level device
// framework (out of scope here) would call: `move_to`, `service`, and the
// status getters. Grounded on Controller/MotionController.h / .cpp.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::error::MotionError;
use crate::hardware::{Clock, EndstopSource, StepperDriver};

use super::args::MotionArgs;
use super::axes::{AxesPosValues, N_AXES};
use super::axes_params::AxesParams;
use super::block_manager::BlockManager;
use super::motor_enabler::MotorEnabler;
use super::pipeline::MotionPipeline;
use super::ramp_generator::{RampGenStatsSnapshot, RampGenerator};

/// Chord length (mm) at/below which block-distance splitting is treated as
/// disabled, mirroring the original's "0 or near-0 means don't split"
/// convention for this configuration field.
const BLOCK_DISTANCE_DISABLED_THRESHOLD_MM: f64 = 0.01;

/// Orchestrates the motion core: admits requests, drives the block
/// splitter, and owns the pipeline the ramp generator consumes. Mirrors
/// `MotionController`.
pub struct MotionController {
    axes_params: AxesParams,
    pipeline: Arc<MotionPipeline>,
    block_manager: BlockManager,
    motor_enabler: Arc<MotorEnabler>,
    ramp_generator: Arc<RampGenerator>,
    block_distance_mm: f64,
}

impl MotionController {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        axes_params: AxesParams,
        pipeline_len: usize,
        step_gen_period_us: u32,
        junction_deviation: f64,
        geom: &str,
        allow_out_of_bounds: bool,
        home_before_move: bool,
        block_distance_mm: f64,
        step_disable_secs: f64,
        stepper_driver: Arc<dyn StepperDriver>,
        endstops: Arc<dyn EndstopSource>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, MotionError> {
        if pipeline_len == 0 {
            return Err(MotionError::ZeroPipelineLen);
        }
        if axes_params.master_axis_max_accel() <= 0.0 {
            return Err(MotionError::ZeroAcceleration(axes_params.master_axis_idx()));
        }

        let mut pipeline = MotionPipeline::new();
        pipeline.setup(pipeline_len);
        let pipeline = Arc::new(pipeline);

        let mut motor_enabler = MotorEnabler::new(stepper_driver.clone(), clock);
        motor_enabler.setup(step_disable_secs);
        let motor_enabler = Arc::new(motor_enabler);

        let mut block_manager = BlockManager::new(pipeline.clone(), motor_enabler.clone());
        block_manager.setup(geom, allow_out_of_bounds, junction_deviation, home_before_move, step_gen_period_us)?;

        let ramp_generator = Arc::new(RampGenerator::new(
            pipeline.clone(),
            stepper_driver,
            endstops,
            step_gen_period_us * 1000,
        ));
        ramp_generator.pause(false);

        debug!(pipeline_len, junction_deviation, geom, "motion controller configured");

        Ok(Self {
            axes_params,
            pipeline,
            block_manager,
            motor_enabler,
            ramp_generator,
            block_distance_mm,
        })
    }

    pub fn ramp_generator(&self) -> Arc<RampGenerator> {
        self.ramp_generator.clone()
    }

    /// Primary admission entry point. Mirrors `MotionController::moveTo`.
    pub fn move_to(&mut self, args: MotionArgs) -> Result<(), MotionError> {
        if args.is_clear_queue() {
            self.clear_queue()?;
        }

        if !args.is_enable_motors() {
            self.motor_enabler.enable_motors(false, false);
        }

        if args.is_linear() {
            self.block_manager.add_linear_block(&args, &self.axes_params);
            Ok(())
        } else {
            self.move_to_ramped(args)
        }
    }

    /// Clears the pipeline. Only safe while the ramp generator is paused or
    /// the pipeline has already drained, mirroring spec.md §5's requirement
    /// that callers serialize `clear_queue` against in-flight execution.
    pub fn clear_queue(&mut self) -> Result<(), MotionError> {
        if !self.ramp_generator.is_paused() && self.pipeline.count() != 0 {
            return Err(MotionError::Busy);
        }
        self.pipeline.clear();
        self.block_manager.clear();
        Ok(())
    }

    fn move_to_ramped(&mut self, args: MotionArgs) -> Result<(), MotionError> {
        if self.block_manager.is_busy() {
            return Err(MotionError::Busy);
        }
        if self.block_manager.is_homing_needed_before_move() && !self.block_manager.last_pos_valid() {
            return Err(MotionError::HomingRequired);
        }

        let last_pos = self.block_manager.get_last_pos();
        let requested = args.get_axes_positions();
        let mut target = AxesPosValues::new();
        for axis_idx in 0..N_AXES {
            let val = if requested.is_valid(axis_idx) {
                if args.is_relative() {
                    last_pos.get_val(axis_idx) + requested.get_val(axis_idx)
                } else {
                    requested.get_val(axis_idx)
                }
            } else {
                last_pos.get_val(axis_idx)
            };
            target.set_val(axis_idx, val);
        }

        let mut primary_mask = [false; N_AXES];
        for (axis_idx, flag) in primary_mask.iter_mut().enumerate() {
            *flag = self.axes_params.is_primary_axis(axis_idx);
        }
        let line_len = target.distance_to(&last_pos, &primary_mask);

        let num_blocks = if args.dont_split_move() || self.block_distance_mm <= BLOCK_DISTANCE_DISABLED_THRESHOLD_MM {
            1
        } else {
            (line_len / self.block_distance_mm).ceil().max(1.0) as u32
        };

        self.block_manager.add_ramped_block(args, target, num_blocks);
        self.block_manager.pump_block_splitter(&self.axes_params);
        Ok(())
    }

    /// Drives the splitter and idle-timeout housekeeping. Call at least
    /// once a millisecond from the task loop. Mirrors
    /// `MotionController::service`.
    pub fn service(&mut self) {
        self.block_manager.pump_block_splitter(&self.axes_params);
        self.motor_enabler.service();
        if self.pipeline.count() > 0 {
            self.motor_enabler.enable_motors(true, false);
        }
    }

    pub fn set_cur_position_as_home(&mut self, all_axes: bool, axis_idx: usize) {
        self.block_manager.set_cur_position_as_home(&self.axes_params, all_axes, axis_idx);
    }

    pub fn get_last_pos(&self) -> AxesPosValues {
        self.block_manager.get_last_pos()
    }

    pub fn last_pos_valid(&self) -> bool {
        self.block_manager.last_pos_valid()
    }

    pub fn stream_get_queue_slots(&self) -> u32 {
        self.pipeline.remaining()
    }

    pub fn get_stats(&self) -> RampGenStatsSnapshot {
        self.ramp_generator.get_stats()
    }

    /// Pauses the ramp generator, aborting any in-flight motion. Callers
    /// must still `clear_queue` once it observes the pause before admitting
    /// new moves (spec.md §5's cancellation contract).
    pub fn stop(&mut self) {
        warn!("motion controller stop requested");
        self.ramp_generator.stop();
    }

    pub fn axes_params(&self) -> &AxesParams {
        &self.axes_params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{ManualClock, MockEndstopSource, MockStepperDriver};
    use crate::motion::axes_params::AxisParams;

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

    fn controller() -> MotionController {
        let driver = Arc::new(MockStepperDriver::new(3));
        let endstops = Arc::new(MockEndstopSource::new(3));
        let clock = Arc::new(ManualClock::default());
        MotionController::new(
            axes_params(),
            8,
            20,
            0.05,
            "XYZ",
            false,
            false,
            0.0,
            60.0,
            driver,
            endstops,
            clock,
        )
        .unwrap()
    }

    #[test]
    fn zero_pipeline_length_is_rejected_at_construction() {
        let driver = Arc::new(MockStepperDriver::new(3));
        let endstops = Arc::new(MockEndstopSource::new(3));
        let clock = Arc::new(ManualClock::default());
        let err = MotionController::new(axes_params(), 0, 20, 0.05, "XYZ", false, false, 0.0, 60.0, driver, endstops, clock)
            .unwrap_err();
        assert_eq!(err, MotionError::ZeroPipelineLen);
    }

    #[test]
    fn move_to_enqueues_a_ramped_block() {
        let mut controller = controller();
        let mut args = MotionArgs::new();
        args.set_axis_pos(0, 50.0);
        args.set_axis_pos(1, 0.0);
        args.set_axis_pos(2, 0.0);
        controller.move_to(args).unwrap();
        assert!(controller.stream_get_queue_slots() < 8);
    }

    #[test]
    fn move_to_rejects_when_homing_required() {
        let driver = Arc::new(MockStepperDriver::new(3));
        let endstops = Arc::new(MockEndstopSource::new(3));
        let clock = Arc::new(ManualClock::default());
        let mut controller = MotionController::new(
            axes_params(), 8, 20, 0.05, "XYZ", false, true, 0.0, 60.0, driver, endstops, clock,
        )
        .unwrap();
        let mut args = MotionArgs::new();
        args.set_axis_pos(0, 50.0);
        let err = controller.move_to(args).unwrap_err();
        assert_eq!(err, MotionError::HomingRequired);
    }

    #[test]
    fn clear_queue_rejects_while_actively_stepping() {
        let mut controller = controller();
        controller.ramp_generator().pause(false);
        let mut args = MotionArgs::new();
        args.set_axis_pos(0, 50.0);
        controller.move_to(args).unwrap();
        let err = controller.clear_queue().unwrap_err();
        assert_eq!(err, MotionError::Busy);
    }
}
