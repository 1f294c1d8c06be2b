// tests/motion_scenarios.rs
//
// End-to-end scenarios exercising the public `MotionController` surface
// (driver pulse counts, backpressure, end-stop abort) plus two focused
// planner-level checks for junction-deviation cornering where the
// assertion needs the intermediate entry/exit speeds a black-box
// `MotionController` test can't observe.

use std::sync::Arc;

use multistepper_motion::hardware::{
    EndstopSource, MockEndstopSource, MockStepperDriver, StepperDriver, SystemClock,
};
use multistepper_motion::motion::planner::AxisStepsVals;
use multistepper_motion::motion::{
    AxesParams, AxesPosition, AxesPosValues, AxisEndstopChecks, AxisMinMaxEnum, AxisParams,
    MotionArgs, MotionController, MotionPipeline, MotionPlanner, N_AXES,
};

fn three_axes(max_speed: f64, max_accel: f64, steps_per_unit: f64) -> AxesParams {
    AxesParams::new(vec![
        AxisParams {
            max_speed,
            max_accel,
            steps_per_rot: steps_per_unit,
            units_per_rot: 1.0,
            ..AxisParams::default()
        };
        3
    ])
}

/// Scenario 1: a straight X move produces one block whose master-axis step
/// count matches the commanded distance exactly, with no motion on the
/// other axes.
#[test]
fn straight_x_move_steps_the_master_axis_exactly() {
    let axes_params = three_axes(100.0, 1000.0, 100.0);
    let driver = Arc::new(MockStepperDriver::new(3));
    let stepper_driver: Arc<dyn StepperDriver> = driver.clone();
    let endstops: Arc<dyn EndstopSource> = Arc::new(MockEndstopSource::new(3));
    let clock = Arc::new(SystemClock::default());

    let mut controller = MotionController::new(
        axes_params, 100, 20, 0.05, "XYZ", false, false, 0.0, 60.0, stepper_driver, endstops, clock,
    )
    .unwrap();
    controller.set_cur_position_as_home(true, 0);

    let mut args = MotionArgs::new();
    args.set_axis_pos(0, 50.0);
    args.set_axis_pos(1, 0.0);
    args.set_axis_pos(2, 0.0);
    controller.move_to(args).unwrap();

    let mut drained = false;
    for _ in 0..2_000_000 {
        controller.service();
        controller.ramp_generator().tick();
        if controller.stream_get_queue_slots() == 100 {
            drained = true;
            break;
        }
    }

    assert!(drained, "pipeline never drained");
    assert_eq!(driver.step_count(0), 5000);
    assert_eq!(driver.step_count(1), 0);
    assert_eq!(driver.step_count(2), 0);
}

/// Scenario 2: a 90-degree XY corner limits the shared entry/exit speed to
/// the junction-deviation-derived value (~10.99 mm/s for a=1000, jd=0.05).
#[test]
fn ninety_degree_corner_limits_junction_speed() {
    let axes_params = three_axes(100.0, 1000.0, 1.0);
    let mut planner = MotionPlanner::new();
    planner.setup(0.05, 20);
    let mut pipeline = MotionPipeline::new();
    pipeline.setup(8);
    let mut pos = AxesPosition::new();

    let mut first = MotionArgs::new();
    first.set_axis_pos(0, 100.0);
    first.set_axis_pos(1, 0.0);
    first.set_axis_pos(2, 0.0);
    let dest1 = dest_steps(&first);
    assert!(planner.move_to_ramped(&first, &dest1, &mut pos, &axes_params, &pipeline));

    let mut second = MotionArgs::new();
    second.set_axis_pos(0, 100.0);
    second.set_axis_pos(1, 100.0);
    second.set_axis_pos(2, 0.0);
    let dest2 = dest_steps(&second);
    assert!(planner.move_to_ramped(&second, &dest2, &mut pos, &axes_params, &pipeline));

    let block1 = pipeline.peek_nth_from_get(0).unwrap();
    let block2 = pipeline.peek_nth_from_get(1).unwrap();
    assert!((block1.exit_speed_mmps - 10.99).abs() < 0.05);
    assert!((block2.entry_speed_mmps - 10.99).abs() < 0.05);
    assert_eq!(block1.exit_speed_mmps, block2.entry_speed_mmps);
}

/// Scenario 3: a 180-degree reversal forces the junction speed to zero even
/// though the raw dot product looks like a straight line (the unit vectors
/// point in opposite directions).
#[test]
fn reversing_direction_forces_zero_junction_speed() {
    let axes_params = three_axes(100.0, 1000.0, 1.0);
    let mut planner = MotionPlanner::new();
    planner.setup(0.05, 20);
    let mut pipeline = MotionPipeline::new();
    pipeline.setup(8);
    let mut pos = AxesPosition::new();

    let mut first = MotionArgs::new();
    first.set_axis_pos(0, 100.0);
    first.set_axis_pos(1, 0.0);
    first.set_axis_pos(2, 0.0);
    let dest1 = dest_steps(&first);
    assert!(planner.move_to_ramped(&first, &dest1, &mut pos, &axes_params, &pipeline));

    let mut second = MotionArgs::new();
    second.set_axis_pos(0, 0.0);
    second.set_axis_pos(1, 0.0);
    second.set_axis_pos(2, 0.0);
    let dest2 = dest_steps(&second);
    assert!(planner.move_to_ramped(&second, &dest2, &mut pos, &axes_params, &pipeline));

    let block2 = pipeline.peek_nth_from_get(1).unwrap();
    assert_eq!(block2.entry_speed_mmps, 0.0);
}

fn dest_steps(args: &MotionArgs) -> AxisStepsVals {
    let mut dest = AxisStepsVals::new();
    for i in 0..N_AXES {
        dest.set_val(i, args.get_axis_pos(i) as i32);
    }
    dest
}

/// Scenario 4: a linear (stepwise) move runs at a constant rate with no
/// deceleration phase, landing on the exact commanded step count.
#[test]
fn linear_stepwise_move_runs_at_constant_rate() {
    let axes_params = three_axes(100.0, 1000.0, 1.0);
    let driver = Arc::new(MockStepperDriver::new(3));
    let stepper_driver: Arc<dyn StepperDriver> = driver.clone();
    let endstops: Arc<dyn EndstopSource> = Arc::new(MockEndstopSource::new(3));
    let clock = Arc::new(SystemClock::default());

    let mut controller = MotionController::new(
        axes_params, 100, 20, 0.05, "XYZ", false, false, 0.0, 60.0, stepper_driver, endstops, clock,
    )
    .unwrap();

    let mut args = MotionArgs::new();
    args.linear_no_ramp = true;
    args.units_are_steps = true;
    args.target_speed_valid = true;
    args.target_speed = 500.0;
    args.set_axis_pos(0, 1000.0);
    controller.move_to(args).unwrap();

    let mut drained = false;
    for _ in 0..2_000_000 {
        controller.service();
        controller.ramp_generator().tick();
        if controller.stream_get_queue_slots() == 100 {
            drained = true;
            break;
        }
    }

    assert!(drained, "pipeline never drained");
    assert_eq!(driver.step_count(0), 1000);
}

/// Scenario 5: an end-stop trip during a long move aborts the block cleanly
/// and leaves the master axis within one ISR tick's worth of the trigger
/// point.
#[test]
fn endstop_hit_aborts_block_near_trigger_point() {
    let axes_params = three_axes(50.0, 1000.0, 1.0);
    let driver = Arc::new(MockStepperDriver::new(3));
    let stepper_driver: Arc<dyn StepperDriver> = driver.clone();
    let endstops = Arc::new(MockEndstopSource::new(3));
    let endstop_source: Arc<dyn EndstopSource> = endstops.clone();
    let clock = Arc::new(SystemClock::default());
    endstops.arm_at_step(0, 5000);

    let mut controller = MotionController::new(
        axes_params, 100, 20, 0.05, "XYZ", false, false, 0.0, 60.0, stepper_driver, endstop_source, clock,
    )
    .unwrap();

    let mut endstop_checks = AxisEndstopChecks::new();
    endstop_checks.set(0, 1, AxisMinMaxEnum::Towards);

    let mut args = MotionArgs::new();
    args.set_axis_pos(0, 10_000.0);
    args.set_axis_pos(1, 0.0);
    args.set_axis_pos(2, 0.0);
    args.endstops = endstop_checks;
    controller.move_to(args).unwrap();

    let mut aborted = false;
    for _ in 0..500_000 {
        let before = driver.step_count(0);
        controller.service();
        controller.ramp_generator().tick();
        let after = driver.step_count(0);
        if after != before {
            endstops.record_step(0, after - before);
        }
        if controller.stream_get_queue_slots() == 100 {
            aborted = true;
            break;
        }
    }

    assert!(aborted, "block never aborted");
    let final_steps = driver.step_count(0);
    assert!((4995..=5005).contains(&final_steps), "got {final_steps}");
}

/// Scenario 6: submitting one long move through the splitter with a small
/// pipeline depth backs up (the splitter withholds sub-blocks it can't yet
/// admit) rather than dropping anything; once drained, every sub-block has
/// landed and the final commanded position is exact.
#[test]
fn splitter_backpressure_drops_nothing() {
    let axes_params = three_axes(100.0, 1000.0, 100.0);
    let driver = Arc::new(MockStepperDriver::new(3));
    let stepper_driver: Arc<dyn StepperDriver> = driver.clone();
    let endstops: Arc<dyn EndstopSource> = Arc::new(MockEndstopSource::new(3));
    let clock = Arc::new(SystemClock::default());

    let mut controller = MotionController::new(
        axes_params, 4, 20, 0.05, "XYZ", false, false, 1.0, 60.0, stepper_driver, endstops, clock,
    )
    .unwrap();
    controller.set_cur_position_as_home(true, 0);

    let mut args = MotionArgs::new();
    args.set_axis_pos(0, 8.0);
    args.set_axis_pos(1, 0.0);
    args.set_axis_pos(2, 0.0);
    controller.move_to(args).unwrap();

    // With only 4 pipeline slots (3 usable, one kept as the put/get
    // disambiguation sentinel) and 8 sub-blocks to place, the splitter
    // cannot have admitted them all yet.
    assert!(controller.stream_get_queue_slots() <= 1);

    let mut drained = false;
    for _ in 0..4_000_000 {
        controller.service();
        controller.ramp_generator().tick();
        if controller.stream_get_queue_slots() == 4 {
            drained = true;
            break;
        }
    }

    assert!(drained, "pipeline never fully drained");
    assert_eq!(driver.step_count(0), 800);
    let last_pos = controller.get_last_pos();
    assert_eq!(last_pos.get_val(0), 8.0);
}
