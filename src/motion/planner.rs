// src/motion/planner.rs
//
// Converts a `MotionArgs` request into one or more `MotionBlock`s on the
// pipeline, and keeps entry/exit speeds across the whole queue consistent
// with junction-deviation cornering. Grounded on Controller/MotionPlanner.h
// and MotionPlanner.cpp.

use tracing::debug;

use super::args::MotionArgs;
use super::axes::{AxesParamVals, AxesPosition, N_AXES};
use super::axes_params::AxesParams;
use super::block::{max_achievable_speed, MotionBlock, MINIMUM_MOVE_DIST_MM};
use super::pipeline::MotionPipeline;

/// Steps-from-home type used by the linear (stepwise) path.
pub type AxisStepsVals = AxesParamVals<i32>;

#[derive(Debug, Clone, Copy, Default)]
struct PrevBlockInfo {
    unit_vectors: AxesParamVals<f64>,
    max_param_speed_mmps: f64,
}

/// Builds motion blocks from requests and keeps the pipeline's speed profile
/// globally consistent. Mirrors `MotionPlanner`.
#[derive(Debug)]
pub struct MotionPlanner {
    minimum_planner_speed_mmps: f64,
    junction_deviation: f64,
    step_gen_period_ns: u32,
    prev_block: Option<PrevBlockInfo>,
}

impl Default for MotionPlanner {
    fn default() -> Self {
        Self::new()
    }
}

impl MotionPlanner {
    pub fn new() -> Self {
        Self {
            minimum_planner_speed_mmps: 0.0,
            junction_deviation: 0.0,
            step_gen_period_ns: 20_000,
            prev_block: None,
        }
    }

    pub fn setup(&mut self, junction_deviation: f64, step_gen_period_us: u32) {
        self.junction_deviation = junction_deviation;
        self.step_gen_period_ns = step_gen_period_us * 1000;
        debug!(junction_deviation, step_gen_period_ns = self.step_gen_period_ns, "motion planner configured");
    }

    /// Adds a linear (no-ramp) block: constant step rate, no junction
    /// handling. Used for homing and other stepwise moves where the
    /// requested axis values are already in steps. Returns the updated
    /// steps-from-home.
    pub fn move_to_linear(
        &mut self,
        args: &MotionArgs,
        cur_axes_steps_from_home: AxisStepsVals,
        axes_params: &AxesParams,
        pipeline: &MotionPipeline,
    ) -> AxisStepsVals {
        let mut block = MotionBlock::new();
        block.entry_speed_mmps = 0.0;
        block.exit_speed_mmps = 0.0;
        block.set_timer_period_ns(self.step_gen_period_ns);

        let mut has_steps = false;
        let mut lowest_max_step_rate_for_any_axis = 1e8_f64;
        let mut steps_from_home = cur_axes_steps_from_home;

        for axis_idx in 0..N_AXES {
            let mut steps = 0_i32;
            if args.is_axis_pos_valid(axis_idx) {
                steps = if args.is_relative() {
                    args.get_axis_pos(axis_idx) as i32
                } else {
                    args.get_axis_pos(axis_idx) as i32 - cur_axes_steps_from_home.get_val(axis_idx)
                };
            }
            if steps != 0 {
                has_steps = true;
                let max_rate = axes_params.get_max_step_rate_per_sec(axis_idx);
                if lowest_max_step_rate_for_any_axis > max_rate {
                    lowest_max_step_rate_for_any_axis = max_rate;
                }
            }
            block.set_steps_to_target(axis_idx, steps);
        }

        if !has_steps {
            return cur_axes_steps_from_home;
        }

        block.unit_vec_axis_with_max_dist = 1.0;
        block.end_stops_to_check = args.get_endstop_check();
        block.motion_tracking_index = args.get_motion_tracking_index();

        let mut requested_velocity = lowest_max_step_rate_for_any_axis;
        if args.is_target_speed_valid() && requested_velocity > args.get_target_speed() {
            requested_velocity = args.get_target_speed();
        }

        let mut feedrate_as_ratio_to_max = args.get_feedrate() / 100.0;
        if args.is_feedrate_units_per_min() {
            feedrate_as_ratio_to_max = 1.0;
            if axes_params.master_axis_max_speed() != 0.0 {
                feedrate_as_ratio_to_max =
                    args.get_feedrate() / 60.0 / axes_params.master_axis_max_speed();
            }
        }
        requested_velocity *= feedrate_as_ratio_to_max;
        block.requested_velocity = requested_velocity;

        if block.prepare_for_stepping(axes_params, true) {
            block.set_can_execute(true);
        }

        for axis_idx in 0..N_AXES {
            let delta = block.get_steps_to_target(axis_idx);
            steps_from_home.set_val(axis_idx, steps_from_home.get_val(axis_idx) + delta);
        }

        pipeline.add(block);
        steps_from_home
    }

    /// Adds a ramped (variable-acceleration) block for a move specified in
    /// axis units, updating `cur_axis_positions` in place. Returns `false`
    /// (and leaves the pipeline untouched) if there is no real movement.
    pub fn move_to_ramped(
        &mut self,
        args: &MotionArgs,
        dest_actuator_coords: &AxisStepsVals,
        cur_axis_positions: &mut AxesPosition,
        axes_params: &AxesParams,
        pipeline: &MotionPipeline,
    ) -> bool {
        let mut first_primary_axis = None;
        for axis_idx in 0..N_AXES {
            if axes_params.is_primary_axis(axis_idx) {
                first_primary_axis = Some(axis_idx);
            }
        }
        let first_primary_axis = first_primary_axis.unwrap_or(0);

        let mut deltas = [0.0_f64; N_AXES];
        let mut is_a_move = false;
        let mut is_a_primary_move = false;
        let mut axis_with_max_move_dist = 0_usize;
        let mut square_sum = 0.0_f64;

        for axis_idx in 0..N_AXES {
            deltas[axis_idx] =
                args.get_axis_pos(axis_idx) - cur_axis_positions.units_from_home.get_val(axis_idx);
            if deltas[axis_idx] != 0.0 {
                is_a_move = true;
                if axes_params.is_primary_axis(axis_idx) {
                    square_sum += deltas[axis_idx].powi(2);
                    is_a_primary_move = true;
                }
            }
            if deltas[axis_idx].abs() > deltas[axis_with_max_move_dist].abs() {
                axis_with_max_move_dist = axis_idx;
            }
        }

        let move_dist = square_sum.sqrt();
        if !is_a_move || move_dist < MINIMUM_MOVE_DIST_MM {
            return false;
        }

        let mut block = MotionBlock::new();
        block.set_timer_period_ns(self.step_gen_period_ns);
        block.set_block_is_followed(args.get_more_moves_coming());
        block.end_stops_to_check = args.get_endstop_check();
        block.motion_tracking_index = args.get_motion_tracking_index();

        let mut requested_velocity = axes_params.get_max_speed(first_primary_axis);
        if args.is_target_speed_valid() && requested_velocity > args.get_target_speed() {
            requested_velocity = args.get_target_speed();
        }

        let mut feedrate_as_ratio_to_max = args.get_feedrate() / 100.0;
        if args.is_feedrate_units_per_min() {
            feedrate_as_ratio_to_max = 1.0;
            if axes_params.master_axis_max_speed() != 0.0 {
                feedrate_as_ratio_to_max =
                    args.get_feedrate() / 60.0 / axes_params.master_axis_max_speed();
            }
        }
        requested_velocity *= feedrate_as_ratio_to_max;

        let mut unit_vectors = AxesParamVals::<f64>::new();
        for axis_idx in 0..N_AXES {
            if axes_params.is_primary_axis(axis_idx) {
                unit_vectors.set_val(axis_idx, deltas[axis_idx] / move_dist);
            }
        }

        block.requested_velocity = requested_velocity;
        block.move_dist_primary_axes_mm = move_dist;

        let mut has_steps = false;
        for axis_idx in 0..N_AXES {
            let steps_float = dest_actuator_coords.get_val(axis_idx)
                - cur_axis_positions.steps_from_home.get_val(axis_idx);
            let steps = steps_float;
            if steps != 0 {
                has_steps = true;
            }
            block.set_steps_to_target(axis_idx, steps);
        }

        if !has_steps {
            return false;
        }

        block.unit_vec_axis_with_max_dist = unit_vectors.get_val(axis_with_max_move_dist);

        let junction_deviation = self.junction_deviation;
        let mut vmax_junction = self.minimum_planner_speed_mmps;

        if !pipeline.can_get() {
            self.prev_block = None;
        }

        if is_a_primary_move {
            if let Some(prev) = self.prev_block {
                let prev_param_speed = prev.max_param_speed_mmps;
                if junction_deviation > 0.0 && prev_param_speed > 0.0 {
                    let cos_theta = -dot_product(&unit_vectors, &prev.unit_vectors);
                    if cos_theta < 0.95 {
                        vmax_junction = prev_param_speed.min(block.requested_velocity);
                        if cos_theta > -0.95 {
                            let sin_theta_d2 = (0.5 * (1.0 - cos_theta)).sqrt();
                            vmax_junction = vmax_junction.min(
                                (axes_params.master_axis_max_accel()
                                    * junction_deviation
                                    * sin_theta_d2
                                    / (1.0 - sin_theta_d2))
                                    .sqrt(),
                            );
                        }
                    }
                }
            }
        }
        block.max_entry_speed_mmps = vmax_junction;

        pipeline.add(block.clone());
        self.prev_block = Some(PrevBlockInfo {
            unit_vectors,
            max_param_speed_mmps: block.requested_velocity,
        });

        self.recalculate_pipeline(pipeline, axes_params);

        for axis_idx in 0..N_AXES {
            let delta = block.get_steps_to_target(axis_idx);
            cur_axis_positions
                .steps_from_home
                .set_val(axis_idx, cur_axis_positions.steps_from_home.get_val(axis_idx) + delta);
        }
        cur_axis_positions.units_from_home = args.get_axes_positions();
        true
    }

    /// Walks the pipeline backwards from the most recently added block,
    /// propagating entry speeds so each block can decelerate in time for
    /// the one that follows it, then walks forward propagating exit
    /// speeds capped by what's actually achievable, then finalizes every
    /// touched block's stepping profile. Mirrors
    /// `MotionPlanner::recalculatePipeline`.
    fn recalculate_pipeline(&mut self, pipeline: &MotionPipeline, axes_params: &AxesParams) {
        let mut reverse_block_idx = 0_u32;
        let mut earliest_block_to_reprocess: Option<u32> = None;
        let mut previous_block_exit_speed = 0.0_f64;
        let mut following_block_entry_speed = 0.0_f64;
        let mut following_block_idx: Option<u32> = None;

        loop {
            let Some(block) = pipeline.peek_nth_from_put(reverse_block_idx) else {
                break;
            };

            if block.is_executing() {
                previous_block_exit_speed = block.exit_speed_mmps;
                break;
            }

            if block.entry_speed_mmps == block.max_entry_speed_mmps && reverse_block_idx > 1 {
                previous_block_exit_speed = block.exit_speed_mmps;
                break;
            }

            if let Some(following_idx) = following_block_idx {
                if let Some(following) = pipeline.peek_nth_from_put_mut(following_idx) {
                    let max_achievable = max_achievable_speed(
                        axes_params.master_axis_max_accel(),
                        following.exit_speed_mmps,
                        following.move_dist_primary_axes_mm,
                    );
                    following.entry_speed_mmps = max_achievable.min(following.max_entry_speed_mmps);
                    following_block_entry_speed = following.entry_speed_mmps;
                }
            }

            following_block_idx = Some(reverse_block_idx);

            if let Some(block_mut) = pipeline.peek_nth_from_put_mut(reverse_block_idx) {
                block_mut.exit_speed_mmps = following_block_entry_speed;
            }

            earliest_block_to_reprocess = Some(reverse_block_idx);
            reverse_block_idx += 1;
        }

        let Some(earliest) = earliest_block_to_reprocess else {
            return;
        };

        let mut idx = earliest as i64;
        while idx >= 0 {
            let Some(block) = pipeline.peek_nth_from_put_mut(idx as u32) else {
                break;
            };
            block.entry_speed_mmps = previous_block_exit_speed;
            let max_exit_speed = max_achievable_speed(
                axes_params.master_axis_max_accel(),
                block.entry_speed_mmps,
                block.move_dist_primary_axes_mm,
            );
            block.exit_speed_mmps = max_exit_speed.min(block.exit_speed_mmps);
            previous_block_exit_speed = block.exit_speed_mmps;
            idx -= 1;
        }

        let mut idx = earliest as i64;
        while idx >= 0 {
            let Some(block) = pipeline.peek_nth_from_put_mut(idx as u32) else {
                break;
            };
            if block.prepare_for_stepping(axes_params, false)
                && (!block.block_is_followed() || pipeline.count() > 1)
            {
                block.set_can_execute(true);
            }
            idx -= 1;
        }
    }
}

fn dot_product(a: &AxesParamVals<f64>, b: &AxesParamVals<f64>) -> f64 {
    (0..N_AXES).map(|i| a.get_val(i) * b.get_val(i)).sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::motion::axes_params::AxisParams;

    fn axes_params() -> AxesParams {
        AxesParams::new(vec![
            AxisParams {
                max_speed: 200.0,
                max_accel: 1000.0,
                steps_per_rot: 200.0,
                units_per_rot: 1.0,
                is_dominant_axis: false,
                is_primary_axis: true,
                ..AxisParams::default()
            };
            3
        ])
    }

    #[test]
    fn straight_line_move_produces_one_full_speed_block() {
        let mut planner = MotionPlanner::new();
        planner.setup(0.05, 20);
        let mut pipeline = MotionPipeline::new();
        pipeline.setup(8);
        let params = axes_params();
        let mut pos = AxesPosition::new();

        let mut args = MotionArgs::new();
        args.set_axis_pos(0, 100.0);
        args.set_axis_pos(1, 0.0);
        args.set_axis_pos(2, 0.0);
        let mut dest_steps = AxisStepsVals::new();
        for i in 0..N_AXES {
            dest_steps.set_val(i, (args.get_axis_pos(i) * 2.0) as i32);
        }

        let ok = planner.move_to_ramped(&args, &dest_steps, &mut pos, &params, &pipeline);
        assert!(ok);
        assert_eq!(pipeline.count(), 1);
        let block = pipeline.peek_nth_from_get(0).unwrap();
        assert!(block.can_execute());
        assert_eq!(block.entry_speed_mmps, 0.0);
        assert_eq!(block.exit_speed_mmps, 0.0);
    }

    #[test]
    fn zero_distance_move_is_rejected() {
        let mut planner = MotionPlanner::new();
        planner.setup(0.05, 20);
        let mut pipeline = MotionPipeline::new();
        pipeline.setup(8);
        let params = axes_params();
        let mut pos = AxesPosition::new();
        let args = MotionArgs::new();
        let dest_steps = AxisStepsVals::new();
        assert!(!planner.move_to_ramped(&args, &dest_steps, &mut pos, &params, &pipeline));
        assert_eq!(pipeline.count(), 0);
    }
}
