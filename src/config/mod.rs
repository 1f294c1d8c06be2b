// src/config/mod.rs
//
// TOML configuration surface for the motion core: axis parameters, ramp
// generator timing, motor-enable idle timeout, and the handful of
// controller-level switches (geometry name, block-splitting distance,
// junction deviation, out-of-bounds/homing policy). Mirrors the original's
// JSON config (`axes[]`, `ramp.*`, `motorEn.*`, `geom`, `blockDist`,
// `junctionDeviation`, `allowOutOfBounds`, `homeBeforeMove`), ported to
// `serde` + `toml` with one default-fn per field.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::MotionError;
use crate::motion::axes_params::AxisParams;

fn default_geom() -> String {
    "XYZ".to_string()
}
fn default_block_dist() -> f64 {
    0.0
}
fn default_junction_deviation() -> f64 {
    0.05
}
fn default_ramp_timer_en() -> bool {
    true
}
fn default_ramp_timer_us() -> u32 {
    20
}
fn default_pipeline_len() -> usize {
    8
}
fn default_step_en_lev() -> bool {
    true
}
fn default_step_disable_secs() -> f64 {
    crate::motion::motor_enabler::STEP_DISABLE_SECS_DEFAULT
}

/// Ramp-generator timer configuration. Mirrors the original's `ramp.*`
/// config keys.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RampConfig {
    #[serde(default = "default_ramp_timer_en")]
    pub ramp_timer_en: bool,
    /// Timer-tick period in microseconds; one `RampGenerator::tick` call
    /// corresponds to one period.
    #[serde(default = "default_ramp_timer_us")]
    pub ramp_timer_us: u32,
    /// Number of in-flight blocks the pipeline can hold.
    #[serde(default = "default_pipeline_len")]
    pub pipeline_len: usize,
}

impl Default for RampConfig {
    fn default() -> Self {
        Self {
            ramp_timer_en: default_ramp_timer_en(),
            ramp_timer_us: default_ramp_timer_us(),
            pipeline_len: default_pipeline_len(),
        }
    }
}

/// Motor-enable idle-timeout configuration. Mirrors the original's
/// `motorEn.*` config keys.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MotorEnConfig {
    #[serde(default)]
    pub step_enable_pin: Option<String>,
    #[serde(default = "default_step_en_lev")]
    pub step_en_lev: bool,
    #[serde(default = "default_step_disable_secs")]
    pub step_disable_secs: f64,
}

impl Default for MotorEnConfig {
    fn default() -> Self {
        Self {
            step_enable_pin: None,
            step_en_lev: default_step_en_lev(),
            step_disable_secs: crate::motion::motor_enabler::STEP_DISABLE_SECS_DEFAULT,
        }
    }
}

/// Top-level motion-core configuration. Mirrors the original's JSON config
/// object for this component.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default = "default_geom")]
    pub geom: String,
    #[serde(default = "default_block_dist")]
    pub block_dist: f64,
    #[serde(default = "default_junction_deviation")]
    pub junction_deviation: f64,
    #[serde(default)]
    pub allow_out_of_bounds: bool,
    #[serde(default)]
    pub home_before_move: bool,
    #[serde(default)]
    pub ramp: RampConfig,
    #[serde(default)]
    pub motor_en: MotorEnConfig,
    #[serde(default)]
    pub axes: Vec<AxisParams>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            geom: default_geom(),
            block_dist: default_block_dist(),
            junction_deviation: default_junction_deviation(),
            allow_out_of_bounds: false,
            home_before_move: false,
            ramp: RampConfig::default(),
            motor_en: MotorEnConfig::default(),
            axes: vec![AxisParams::default(); 3],
        }
    }
}

impl Config {
    /// Loads and parses a TOML config file. Mirrors the original's
    /// config-file loading, minus the legacy `printer.cfg` fallback the
    /// original 3D-printer stack carried (this core has no legacy format).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MotionError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path)
            .map_err(|e| MotionError::Config(format!("reading {}: {e}", path.display())))?;
        Self::parse(&contents)
    }

    pub fn parse(contents: &str) -> Result<Self, MotionError> {
        toml::from_str(contents).map_err(|e| MotionError::Config(e.to_string()))
    }

    /// Validates cross-field constraints `serde`'s per-field defaults can't
    /// express: at least one axis, and every axis has a positive
    /// acceleration (a zero-accel axis can never be stepped, per
    /// `MotionBlock::prepareForStepping`'s divide-by-acceleration math).
    pub fn validate(&self) -> Result<(), MotionError> {
        if self.axes.is_empty() {
            return Err(MotionError::Config("at least one axis must be configured".to_string()));
        }
        for (idx, axis) in self.axes.iter().enumerate() {
            if axis.max_accel <= 0.0 {
                return Err(MotionError::ZeroAcceleration(idx));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_original_firmware_values() {
        let config = Config::default();
        assert_eq!(config.geom, "XYZ");
        assert_eq!(config.ramp.pipeline_len, 8);
        assert_eq!(config.axes.len(), 3);
    }

    #[test]
    fn parses_snake_case_toml_document() {
        let toml = r#"
            geom = "XYZ"
            junction_deviation = 0.1
            block_dist = 2.0

            [ramp]
            ramp_timer_us = 50
            pipeline_len = 4

            [[axes]]
            max_speed = 200.0
            max_accel = 2000.0
            steps_per_rot = 200.0
            units_per_rot = 40.0
        "#;
        let config = Config::parse(toml).unwrap();
        assert_eq!(config.junction_deviation, 0.1);
        assert_eq!(config.ramp.pipeline_len, 4);
        assert_eq!(config.axes.len(), 1);
        config.validate().unwrap();
    }

    #[test]
    fn validate_rejects_zero_acceleration_axis() {
        let mut config = Config::default();
        config.axes[0].max_accel = 0.0;
        let err = config.validate().unwrap_err();
        assert_eq!(err, MotionError::ZeroAcceleration(0));
    }
}
