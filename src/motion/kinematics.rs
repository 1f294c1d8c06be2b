// src/motion/kinematics.rs
//
// Coordinate transform between axis units (mm, degrees, ...) and actuator
// steps. Grounded on Geometries/AxisGeomBase.h (the trait) and
// Geometries/AxisGeomXYZ.cpp (the one concrete geometry shipped here).

use super::axes::{AxesParamVals, AxesPosValues, AxesPosition, N_AXES};
use super::axes_params::AxesParams;

/// Pluggable coordinate geometry. `pt_to_actuator`/`actuator_to_pt` convert
/// between the caller-facing axis-unit coordinate system and actuator step
/// counts; `pre_process_coords`/`correct_step_overflow` are geometry-specific
/// hooks most Cartesian geometries leave as no-ops.
pub trait AxisGeom: Send + Sync {
    /// Converts `target_pt` (axis units) to actuator step counts. Returns
    /// `true` if the point was within configured bounds (or bounds-checking
    /// was bypassed via `allow_out_of_bounds`).
    fn pt_to_actuator(
        &self,
        target_pt: AxesPosValues,
        out_actuator: &mut AxesParamVals<i32>,
        cur_pos: &AxesPosition,
        axes_params: &AxesParams,
        allow_out_of_bounds: bool,
    ) -> bool;

    /// Converts actuator step counts back to axis units.
    fn actuator_to_pt(
        &self,
        target_actuator: &AxesParamVals<i32>,
        out_pt: &mut AxesPosValues,
        cur_pos: &AxesPosition,
        axes_params: &AxesParams,
    ) -> bool;

    /// Corrects accumulated step overflow; only meaningful for geometries
    /// with continuous-rotation axes. Default is a no-op.
    fn correct_step_overflow(&self, _cur_pos: &mut AxesPosition, _axes_params: &AxesParams) {}

    /// Adjusts `axis_positions` in place before a move is planned; used by
    /// position-dependent coordinate systems. Default is a no-op.
    fn pre_process_coords(&self, _axis_positions: &mut AxesPosValues, _axes_params: &AxesParams) {}
}

/// Cartesian XYZ geometry: actuator steps are axis units scaled by
/// steps-per-unit and offset by the configured home position. Mirrors
/// `AxisGeomXYZ`.
#[derive(Debug, Default, Clone, Copy)]
pub struct XyzGeom;

impl AxisGeom for XyzGeom {
    fn pt_to_actuator(
        &self,
        mut target_pt: AxesPosValues,
        out_actuator: &mut AxesParamVals<i32>,
        _cur_pos: &AxesPosition,
        axes_params: &AxesParams,
        allow_out_of_bounds: bool,
    ) -> bool {
        let pt_was_valid = axes_params.pt_in_bounds(&mut target_pt, !allow_out_of_bounds);
        for axis_idx in 0..N_AXES {
            let axis_val_from_home = target_pt.get_val(axis_idx);
            let steps = (axis_val_from_home * axes_params.get_steps_per_unit(axis_idx)
                + axes_params.get_home_off_steps(axis_idx) as f64)
                .round() as i32;
            out_actuator.set_val(axis_idx, steps);
        }
        pt_was_valid
    }

    fn actuator_to_pt(
        &self,
        target_actuator: &AxesParamVals<i32>,
        out_pt: &mut AxesPosValues,
        _cur_pos: &AxesPosition,
        axes_params: &AxesParams,
    ) -> bool {
        for axis_idx in 0..N_AXES {
            let steps_per_unit = axes_params.get_steps_per_unit(axis_idx);
            let pt_val = if steps_per_unit.abs() < f64::EPSILON {
                0.0
            } else {
                (target_actuator.get_val(axis_idx) - axes_params.get_home_off_steps(axis_idx)) as f64
                    / steps_per_unit
            };
            out_pt.set_val(axis_idx, pt_val);
        }
        true
    }
}

/// Resolves a configured geometry name to its implementation. Mirrors the
/// string dispatch in `MotionBlockManager::setup` (`geometry.equalsIgnoreCase("XYZ")`).
pub fn create_geometry(name: &str) -> Option<Box<dyn AxisGeom>> {
    if name.eq_ignore_ascii_case("XYZ") {
        Some(Box::new(XyzGeom))
    } else {
        None
    }
}
