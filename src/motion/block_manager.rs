// src/motion/block_manager.rs
//
// Owns the planner, the configured geometry, and the in-progress block
// splitter for a single multi-block move. Grounded on
// Controller/MotionBlockManager.h / MotionBlockManager.cpp.

use std::sync::Arc;

use tracing::warn;

use crate::error::MotionError;

use super::args::MotionArgs;
use super::axes::{AxesParamVals, AxesPosValues, AxesPosition, N_AXES};
use super::axes_params::AxesParams;
use super::kinematics::{create_geometry, AxisGeom};
use super::motor_enabler::MotorEnabler;
use super::pipeline::MotionPipeline;
use super::planner::MotionPlanner;

/// Owns block splitting and the geometry/planner pair for a motion pipeline.
/// Mirrors `MotionBlockManager`.
pub struct BlockManager {
    block_motion_args: MotionArgs,
    cur_position: AxesPosition,
    target_position: AxesPosValues,
    block_delta_distance: AxesPosValues,
    num_blocks: u32,
    next_block_idx: u32,

    pipeline: Arc<MotionPipeline>,
    planner: MotionPlanner,
    motor_enabler: Arc<MotorEnabler>,
    geometry: Option<Box<dyn AxisGeom>>,

    last_commanded_axes_positions: AxesPosition,
    allow_all_out_of_bounds: bool,
    homing_needed_before_any_move: bool,
}

impl BlockManager {
    pub fn new(pipeline: Arc<MotionPipeline>, motor_enabler: Arc<MotorEnabler>) -> Self {
        Self {
            block_motion_args: MotionArgs::new(),
            cur_position: AxesPosition::new(),
            target_position: AxesPosValues::new(),
            block_delta_distance: AxesPosValues::new(),
            num_blocks: 0,
            next_block_idx: 0,
            pipeline,
            planner: MotionPlanner::new(),
            motor_enabler,
            geometry: None,
            last_commanded_axes_positions: AxesPosition::new(),
            allow_all_out_of_bounds: false,
            homing_needed_before_any_move: true,
        }
    }

    pub fn clear(&mut self) {
        self.num_blocks = 0;
        self.next_block_idx = 0;
        self.geometry = None;
        self.allow_all_out_of_bounds = false;
        self.homing_needed_before_any_move = true;
    }

    pub fn setup(
        &mut self,
        geometry: &str,
        allow_all_out_of_bounds: bool,
        junction_deviation: f64,
        homing_needed_before_any_move: bool,
        step_gen_period_us: u32,
    ) -> Result<(), MotionError> {
        self.allow_all_out_of_bounds = allow_all_out_of_bounds;
        self.homing_needed_before_any_move = homing_needed_before_any_move;
        self.planner.setup(junction_deviation, step_gen_period_us);
        self.geometry = Some(
            create_geometry(geometry).ok_or_else(|| MotionError::UnknownGeometry(geometry.to_string()))?,
        );
        Ok(())
    }

    pub fn is_busy(&self) -> bool {
        self.num_blocks != 0
    }

    pub fn is_homing_needed_before_move(&self) -> bool {
        self.homing_needed_before_any_move
    }

    pub fn get_last_pos(&self) -> AxesPosValues {
        self.last_commanded_axes_positions.units_from_home
    }

    pub fn last_pos_valid(&self) -> bool {
        self.last_commanded_axes_positions.units_from_home_valid()
    }

    pub fn pre_process_coords(&self, axis_positions: &mut AxesPosValues, axes_params: &AxesParams) {
        if let Some(geom) = &self.geometry {
            geom.pre_process_coords(axis_positions, axes_params);
        }
    }

    pub fn set_cur_position_as_home(&mut self, axes_params: &AxesParams, all_axes: bool, axis_idx: usize) {
        if !all_axes && axis_idx >= N_AXES {
            return;
        }
        let range = if all_axes { 0..N_AXES } else { axis_idx..axis_idx + 1 };
        for i in range {
            self.last_commanded_axes_positions
                .units_from_home
                .set_val(i, axes_params.axis(i).map_or(0.0, |a| a.home_offset_val));
            self.last_commanded_axes_positions.set_units_from_home_validity(true);
            self.last_commanded_axes_positions
                .steps_from_home
                .set_val(i, axes_params.get_home_off_steps(i));
        }
    }

    /// Adds a linear (no-ramp) block, e.g. for homing. Steps are taken
    /// directly from `args`, not routed through the geometry.
    pub fn add_linear_block(&mut self, args: &MotionArgs, axes_params: &AxesParams) -> bool {
        let steps_from_home = self.planner.move_to_linear(
            args,
            self.last_commanded_axes_positions.steps_from_home,
            axes_params,
            &self.pipeline,
        );
        self.last_commanded_axes_positions.set_units_from_home_validity(false);
        self.last_commanded_axes_positions.steps_from_home = steps_from_home;
        true
    }

    /// Registers a ramped move to be split into `num_blocks` sub-moves and
    /// expanded out over subsequent `pump_block_splitter` calls.
    pub fn add_ramped_block(&mut self, args: MotionArgs, target_position: AxesPosValues, num_blocks: u32) -> bool {
        let num_blocks = num_blocks.max(1);
        self.block_motion_args = args;
        self.target_position = target_position;
        self.num_blocks = num_blocks;
        self.next_block_idx = 0;
        self.block_delta_distance = (target_position - self.last_commanded_axes_positions.units_from_home)
            .scale(1.0 / num_blocks as f64);
        true
    }

    /// Expands the pending split move into the pipeline while there is room
    /// and sub-blocks remain. Call regularly from the task loop.
    pub fn pump_block_splitter(&mut self, axes_params: &AxesParams) {
        while self.pipeline.can_accept() {
            if self.num_blocks == 0 {
                return;
            }

            let mut next_block_dest =
                self.last_commanded_axes_positions.units_from_home + self.block_delta_distance;

            self.next_block_idx += 1;
            if self.next_block_idx >= self.num_blocks {
                self.num_blocks = 0;
                next_block_dest = self.target_position;
            }

            self.block_motion_args.set_axes_positions(next_block_dest);
            self.block_motion_args.more_moves_coming = self.num_blocks != 0;

            let args = self.block_motion_args.clone();
            if !self.add_to_planner(&args, axes_params) {
                warn!("pump_block_splitter: addToPlanner rejected the next sub-block");
            }

            self.motor_enabler.enable_motors(true, false);
        }
    }

    fn add_to_planner(&mut self, args: &MotionArgs, axes_params: &AxesParams) -> bool {
        let Some(geom) = &self.geometry else {
            warn!("add_to_planner: no geometry configured");
            return false;
        };

        let mut actuator_coords = AxesParamVals::<i32>::new();
        geom.pt_to_actuator(
            args.get_axes_positions(),
            &mut actuator_coords,
            &self.cur_position,
            axes_params,
            args.allow_out_of_bounds || self.allow_all_out_of_bounds,
        );

        self.planner.move_to_ramped(
            args,
            &actuator_coords,
            &mut self.last_commanded_axes_positions,
            axes_params,
            &self.pipeline,
        )
    }
}

impl AxesPosValues {
    fn scale(self, factor: f64) -> Self {
        let mut out = AxesPosValues::new();
        for i in 0..N_AXES {
            out.set(i, self.get_val(i) * factor, self.is_valid(i));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hardware::{ManualClock, MockStepperDriver};
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

    fn manager() -> BlockManager {
        let pipeline = Arc::new({
            let mut p = MotionPipeline::new();
            p.setup(8);
            p
        });
        let driver = Arc::new(MockStepperDriver::new(3));
        let clock = Arc::new(ManualClock::default());
        let motor_enabler = Arc::new(MotorEnabler::new(driver, clock));
        let mut mgr = BlockManager::new(pipeline, motor_enabler);
        mgr.setup("XYZ", false, 0.05, false, 20).unwrap();
        mgr
    }

    #[test]
    fn unknown_geometry_is_rejected_at_setup() {
        let pipeline = Arc::new(MotionPipeline::new());
        let driver = Arc::new(MockStepperDriver::new(3));
        let clock = Arc::new(ManualClock::default());
        let motor_enabler = Arc::new(MotorEnabler::new(driver, clock));
        let mut mgr = BlockManager::new(pipeline, motor_enabler);
        let err = mgr.setup("Delta", false, 0.05, false, 20).unwrap_err();
        assert_eq!(err, MotionError::UnknownGeometry("Delta".to_string()));
    }

    #[test]
    fn ramped_block_splits_across_requested_block_count() {
        let mut mgr = manager();
        let params = axes_params();
        let mut target = AxesPosValues::new();
        target.set_val(0, 100.0);
        target.set_val(1, 0.0);
        target.set_val(2, 0.0);

        let args = MotionArgs::new();
        mgr.add_ramped_block(args, target, 4);
        assert!(mgr.is_busy());
        mgr.pump_block_splitter(&params);
        assert!(mgr.pipeline.count() > 0);
    }

    #[test]
    fn set_cur_position_as_home_marks_units_from_home_valid() {
        let mut mgr = manager();
        let params = axes_params();
        assert!(!mgr.last_pos_valid());
        mgr.set_cur_position_as_home(&params, true, 0);
        assert!(mgr.last_pos_valid());
    }
}
