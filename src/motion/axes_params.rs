// src/motion/axes_params.rs
//
// Per-axis static configuration and the axis-vector aggregate that derives
// step rates, bounds checks, and master-axis election from it. Grounded on
// Axes/AxisParams.h and Axes/AxesParams.h.

use serde::{Deserialize, Serialize};

use super::axes::{AxesPosValues, N_AXES};

fn default_max_speed() -> f64 {
    100.0
}
fn default_min_speed() -> f64 {
    0.0
}
fn default_max_accel() -> f64 {
    100.0
}
fn default_steps_per_rot() -> f64 {
    1.0
}
fn default_units_per_rot() -> f64 {
    1.0
}
fn default_true() -> bool {
    true
}

/// Static, per-axis configuration. Mirrors `AxisParams`.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AxisParams {
    #[serde(default = "default_max_speed")]
    pub max_speed: f64,
    #[serde(default = "default_min_speed")]
    pub min_speed: f64,
    #[serde(default = "default_max_accel")]
    pub max_accel: f64,
    #[serde(default = "default_steps_per_rot")]
    pub steps_per_rot: f64,
    #[serde(default = "default_units_per_rot")]
    pub units_per_rot: f64,
    #[serde(default)]
    pub min_val: Option<f64>,
    #[serde(default)]
    pub max_val: Option<f64>,
    #[serde(default)]
    pub home_offset_val: f64,
    #[serde(default)]
    pub home_off_steps: i32,
    #[serde(default)]
    pub is_dominant_axis: bool,
    #[serde(default = "default_true")]
    pub is_primary_axis: bool,
    #[serde(default)]
    pub is_servo_axis: bool,
}

impl Default for AxisParams {
    fn default() -> Self {
        Self {
            max_speed: default_max_speed(),
            min_speed: default_min_speed(),
            max_accel: default_max_accel(),
            steps_per_rot: default_steps_per_rot(),
            units_per_rot: default_units_per_rot(),
            min_val: None,
            max_val: None,
            home_offset_val: 0.0,
            home_off_steps: 0,
            is_dominant_axis: false,
            is_primary_axis: true,
            is_servo_axis: false,
        }
    }
}

impl AxisParams {
    pub fn steps_per_unit(&self) -> f64 {
        if self.units_per_rot.abs() < f64::EPSILON {
            return self.steps_per_rot;
        }
        self.steps_per_rot / self.units_per_rot
    }

    /// Clamps `val` into `[min_val, max_val]` (where configured) and reports
    /// whether it was already in bounds. Mirrors `AxisParams::ptInBounds`.
    pub fn pt_in_bounds(&self, val: f64, correct_value_in_place: bool) -> (f64, bool) {
        let mut out = val;
        let mut is_valid = true;
        if let Some(max_val) = self.max_val {
            if val > max_val {
                is_valid = false;
                if correct_value_in_place {
                    out = max_val;
                }
            }
        }
        if let Some(min_val) = self.min_val {
            if val < min_val {
                is_valid = false;
                if correct_value_in_place {
                    out = min_val;
                }
            }
        }
        (out, is_valid)
    }
}

/// The full set of per-axis configuration plus derived, cached values.
/// Mirrors `AxesParams`.
#[derive(Debug, Clone, Default)]
pub struct AxesParams {
    axes: Vec<AxisParams>,
    master_axis_idx: Option<usize>,
    master_axis_max_accel: f64,
    master_axis_max_speed: f64,
}

impl AxesParams {
    pub fn new(axes: Vec<AxisParams>) -> Self {
        let mut params = Self {
            axes,
            master_axis_idx: None,
            master_axis_max_accel: 0.0,
            master_axis_max_speed: 0.0,
        };
        params.set_master_axis(0);
        params
    }

    pub fn num_axes(&self) -> usize {
        self.axes.len().min(N_AXES)
    }

    pub fn axis(&self, axis_idx: usize) -> Option<&AxisParams> {
        self.axes.get(axis_idx)
    }

    pub fn get_max_speed(&self, axis_idx: usize) -> f64 {
        self.axes.get(axis_idx).map_or(default_max_speed(), |a| a.max_speed)
    }

    pub fn get_min_speed(&self, axis_idx: usize) -> f64 {
        self.axes.get(axis_idx).map_or(default_min_speed(), |a| a.min_speed)
    }

    pub fn get_max_accel(&self, axis_idx: usize) -> f64 {
        self.axes.get(axis_idx).map_or(default_max_accel(), |a| a.max_accel)
    }

    pub fn get_steps_per_unit(&self, axis_idx: usize) -> f64 {
        self.axes
            .get(axis_idx)
            .map_or(1.0, |a| a.steps_per_unit())
    }

    /// Maximum step rate for `axis_idx`, caching nothing (the original caches
    /// this per-axis; callers here are expected to call it rarely, outside
    /// the hot path).
    pub fn get_max_step_rate_per_sec(&self, axis_idx: usize) -> f64 {
        self.get_max_speed(axis_idx) * self.get_steps_per_unit(axis_idx)
    }

    pub fn get_home_off_steps(&self, axis_idx: usize) -> i32 {
        self.axes.get(axis_idx).map_or(0, |a| a.home_off_steps)
    }

    pub fn is_primary_axis(&self, axis_idx: usize) -> bool {
        self.axes.get(axis_idx).map_or(false, |a| a.is_primary_axis)
    }

    pub fn is_dominant_axis(&self, axis_idx: usize) -> bool {
        self.axes.get(axis_idx).map_or(false, |a| a.is_dominant_axis)
    }

    /// True if `pt` lies within every axis's configured bounds; corrects
    /// `pt` in place (clamping out-of-range axes) when `correct_value_in_place`.
    pub fn pt_in_bounds(&self, pt: &mut AxesPosValues, correct_value_in_place: bool) -> bool {
        let mut all_in_bounds = true;
        for axis_idx in 0..self.num_axes() {
            if !pt.is_valid(axis_idx) {
                continue;
            }
            if let Some(axis) = self.axes.get(axis_idx) {
                let (corrected, in_bounds) =
                    axis.pt_in_bounds(pt.get_val(axis_idx), correct_value_in_place);
                if !in_bounds {
                    all_in_bounds = false;
                    if correct_value_in_place {
                        pt.set_val(axis_idx, corrected);
                    }
                }
            }
        }
        all_in_bounds
    }

    /// Master-axis election: first dominant axis, else first primary axis,
    /// else `fallback_axis_idx`, else axis 0. Caches max accel/speed.
    /// Mirrors `AxesParams::setMasterAxis`.
    pub fn set_master_axis(&mut self, fallback_axis_idx: usize) {
        let mut chosen = None;
        for (idx, axis) in self.axes.iter().enumerate() {
            if axis.is_dominant_axis {
                chosen = Some(idx);
                break;
            }
        }
        if chosen.is_none() {
            for (idx, axis) in self.axes.iter().enumerate() {
                if axis.is_primary_axis {
                    chosen = Some(idx);
                    break;
                }
            }
        }
        let chosen = chosen.unwrap_or_else(|| {
            if fallback_axis_idx < self.axes.len() {
                fallback_axis_idx
            } else {
                0
            }
        });
        self.master_axis_idx = Some(chosen);
        self.master_axis_max_accel = self.get_max_accel(chosen);
        self.master_axis_max_speed = self.get_max_speed(chosen);
    }

    pub fn master_axis_idx(&self) -> usize {
        self.master_axis_idx.unwrap_or(0)
    }

    pub fn master_axis_max_accel(&self) -> f64 {
        self.master_axis_max_accel
    }

    pub fn master_axis_max_speed(&self) -> f64 {
        self.master_axis_max_speed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis(max_speed: f64, max_accel: f64) -> AxisParams {
        AxisParams {
            max_speed,
            max_accel,
            ..AxisParams::default()
        }
    }

    #[test]
    fn master_axis_prefers_dominant_over_primary() {
        let mut x = axis(100.0, 100.0);
        x.is_primary_axis = true;
        let mut y = axis(200.0, 50.0);
        y.is_primary_axis = true;
        y.is_dominant_axis = true;
        let params = AxesParams::new(vec![x, y]);
        assert_eq!(params.master_axis_idx(), 1);
        assert_eq!(params.master_axis_max_speed(), 200.0);
        assert_eq!(params.master_axis_max_accel(), 50.0);
    }

    #[test]
    fn master_axis_falls_back_to_first_primary() {
        let mut non_primary = axis(10.0, 10.0);
        non_primary.is_primary_axis = false;
        let primary = axis(30.0, 30.0);
        let params = AxesParams::new(vec![non_primary, primary]);
        assert_eq!(params.master_axis_idx(), 1);
    }

    #[test]
    fn pt_in_bounds_clamps_out_of_range_axes() {
        let mut x = AxisParams::default();
        x.min_val = Some(0.0);
        x.max_val = Some(100.0);
        let params = AxesParams::new(vec![x]);
        let mut pt = AxesPosValues::new();
        pt.set_val(0, 150.0);
        let ok = params.pt_in_bounds(&mut pt, true);
        assert!(!ok);
        assert_eq!(pt.get_val(0), 100.0);
    }
}
