// src/motion/args.rs
//
// Wire-level motion request. This is what arrives from the stream/socket
// layer (or gets built directly by a caller in-process) and is handed to
// `MotionController::move_to`. Grounded on Controller/MotionArgs.h and the
// binary layout in HWElemMultiStepperFormat.h.

use super::axes::{AxesPosValues, AxesParamVals, AxisEndstopChecks, N_AXES};

/// Version byte for the binary request layout. Only one format exists so
/// far; a future format would get its own constant and a branch in
/// `from_binary`.
pub const MULTISTEPPER_MOTION_ARGS_BINARY_FORMAT_1: u8 = 0;

const MULTISTEPPER_MOVETO_OPCODE: u8 = 0;
const MULTISTEPPER_OPCODE_POS: usize = 0;
const MULTISTEPPER_MOVETO_BINARY_FORMAT_POS: usize = 0;
const MULTISTEPPER_MOVETO_AXES_COUNT_POS: usize = 1;
const MULTISTEPPER_MOVETO_AXES_START_POS: usize = 2;
const MULTISTEPPER_MOVETO_AXES_BLOCK_SIZE: usize = 4;

/// A single move/configuration request. Mirrors `MotionArgs`.
#[derive(Debug, Clone)]
pub struct MotionArgs {
    pub motion_args_struct_version: u8,

    pub is_relative: bool,
    pub linear_no_ramp: bool,
    pub units_are_steps: bool,
    pub dont_split_move: bool,
    pub extrude_valid: bool,
    pub target_speed_valid: bool,
    pub move_clockwise: bool,
    pub move_rapid: bool,
    pub allow_out_of_bounds: bool,
    pub more_moves_coming: bool,
    pub is_homing: bool,
    pub motion_tracking_index_valid: bool,
    pub feedrate_units_per_min: bool,
    pub enable_motors: bool,
    pub pre_clear_motion_queue: bool,

    pub target_speed: f64,
    pub extrude_distance: f64,
    pub feedrate: f64,
    pub motion_tracking_idx: u32,

    pub endstops: AxisEndstopChecks,
    axis_valid: [bool; N_AXES],
    axis_pos: [f64; N_AXES],
}

impl Default for MotionArgs {
    fn default() -> Self {
        Self {
            motion_args_struct_version: MULTISTEPPER_MOTION_ARGS_BINARY_FORMAT_1,
            is_relative: false,
            linear_no_ramp: false,
            units_are_steps: false,
            dont_split_move: false,
            extrude_valid: false,
            target_speed_valid: false,
            move_clockwise: false,
            move_rapid: false,
            allow_out_of_bounds: false,
            more_moves_coming: false,
            is_homing: false,
            motion_tracking_index_valid: false,
            feedrate_units_per_min: false,
            enable_motors: true,
            pre_clear_motion_queue: false,
            target_speed: 0.0,
            extrude_distance: 1.0,
            feedrate: 100.0,
            motion_tracking_idx: 0,
            endstops: AxisEndstopChecks::new(),
            axis_valid: [false; N_AXES],
            axis_pos: [0.0; N_AXES],
        }
    }
}

impl MotionArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_axis_pos_valid(&self, axis_idx: usize) -> bool {
        axis_idx < N_AXES && self.axis_valid[axis_idx]
    }

    pub fn get_axis_pos(&self, axis_idx: usize) -> f64 {
        if axis_idx >= N_AXES {
            return 0.0;
        }
        self.axis_pos[axis_idx]
    }

    pub fn set_axis_pos(&mut self, axis_idx: usize, val: f64) {
        if axis_idx >= N_AXES {
            return;
        }
        self.axis_pos[axis_idx] = val;
        self.axis_valid[axis_idx] = true;
    }

    pub fn get_axes_positions(&self) -> AxesPosValues {
        let mut pt = AxesPosValues::new();
        for i in 0..N_AXES {
            pt.set(i, self.axis_pos[i], self.axis_valid[i]);
        }
        pt
    }

    pub fn set_axes_positions(&mut self, positions: AxesPosValues) {
        for i in 0..N_AXES {
            if positions.is_valid(i) {
                self.set_axis_pos(i, positions.get_val(i));
            } else {
                self.axis_valid[i] = false;
            }
        }
    }

    pub fn get_axes_steps(&self) -> AxesParamVals<i32> {
        let mut steps = AxesParamVals::new();
        for i in 0..N_AXES {
            steps.set_val(i, self.axis_pos[i] as i32);
        }
        steps
    }

    pub fn is_linear(&self) -> bool {
        self.linear_no_ramp
    }

    pub fn is_clear_queue(&self) -> bool {
        self.pre_clear_motion_queue
    }

    pub fn is_enable_motors(&self) -> bool {
        self.enable_motors
    }

    pub fn get_endstop_check(&self) -> AxisEndstopChecks {
        self.endstops
    }

    pub fn get_motion_tracking_index(&self) -> u32 {
        if self.motion_tracking_index_valid {
            self.motion_tracking_idx
        } else {
            0
        }
    }

    pub fn is_target_speed_valid(&self) -> bool {
        self.target_speed_valid
    }

    pub fn get_target_speed(&self) -> f64 {
        self.target_speed
    }

    pub fn is_feedrate_units_per_min(&self) -> bool {
        self.feedrate_units_per_min
    }

    pub fn get_feedrate(&self) -> f64 {
        self.feedrate
    }

    pub fn get_more_moves_coming(&self) -> bool {
        self.more_moves_coming
    }

    pub fn is_relative(&self) -> bool {
        self.is_relative
    }

    pub fn dont_split_move(&self) -> bool {
        self.dont_split_move
    }

    /// Serializes this request per `HWElemMultiStepperFormat.h`'s
    /// single-opcode, fixed-stride axis layout: opcode byte, axis count
    /// byte, then `axisCount` 4-byte little-endian floats.
    ///
    /// This is a deliberately small slice of the original's format: it
    /// carries the fields needed to drive a move (relative/absolute,
    /// target speed, per-axis positions) rather than every flag in the
    /// struct, matching how the wire protocol only ever needs to move
    /// a subset across at a time.
    pub fn to_binary(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(MULTISTEPPER_MOVETO_AXES_START_POS + N_AXES * MULTISTEPPER_MOVETO_AXES_BLOCK_SIZE);
        out.push(MULTISTEPPER_MOVETO_OPCODE);
        let axis_count = self.axis_valid.iter().filter(|v| **v).count() as u8;
        out.push(axis_count);
        for i in 0..N_AXES {
            if self.axis_valid[i] {
                out.extend_from_slice(&(self.axis_pos[i] as f32).to_le_bytes());
            }
        }
        out
    }

    /// Parses the layout written by `to_binary`. Returns `None` on a short
    /// buffer or an opcode/format byte mismatch.
    pub fn from_binary(buf: &[u8]) -> Option<Self> {
        if buf.len() < MULTISTEPPER_MOVETO_AXES_START_POS {
            return None;
        }
        if buf[MULTISTEPPER_OPCODE_POS] != MULTISTEPPER_MOVETO_OPCODE {
            return None;
        }
        let _format = buf[MULTISTEPPER_MOVETO_BINARY_FORMAT_POS];
        let axis_count = buf[MULTISTEPPER_MOVETO_AXES_COUNT_POS] as usize;
        let mut args = Self::new();
        let mut pos = MULTISTEPPER_MOVETO_AXES_START_POS;
        for axis_idx in 0..axis_count.min(N_AXES) {
            if pos + MULTISTEPPER_MOVETO_AXES_BLOCK_SIZE > buf.len() {
                return None;
            }
            let bytes: [u8; 4] = buf[pos..pos + 4].try_into().ok()?;
            let val = f32::from_le_bytes(bytes) as f64;
            args.set_axis_pos(axis_idx, val);
            pos += MULTISTEPPER_MOVETO_AXES_BLOCK_SIZE;
        }
        Some(args)
    }
}
