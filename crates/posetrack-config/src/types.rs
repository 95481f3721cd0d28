use posetrack_imu::fusion::{EstimatorConfig, FusionError, OrientationMode};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("[fusion] {0}")]
    Fusion(#[from] FusionError),
    #[error("{0} must be greater than zero")]
    ZeroInterval(&'static str),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Estimator tuning.
    pub fusion: FusionConfig,
    /// Where samples come from.
    pub source: SourceConfig,
    /// Loop rates.
    pub timing: TimingConfig,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.fusion.validate()?;
        self.timing.validate()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrientationModeConfig {
    /// Integrate the gyro for all three angles.
    #[default]
    GyroIntegration,
    /// Pitch and roll from the accelerometer, yaw from the gyro.
    Leveling,
}

impl From<OrientationModeConfig> for OrientationMode {
    fn from(mode: OrientationModeConfig) -> Self {
        match mode {
            OrientationModeConfig::GyroIntegration => OrientationMode::GyroIntegration,
            OrientationModeConfig::Leveling => OrientationMode::Leveling,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FusionConfig {
    /// Linear acceleration deadzone (m/s^2). Suppresses drift while stationary.
    pub acceleration_deadzone: f64,
    /// Rotation deadzone, compared against the per-tick rotation (deg).
    pub rotation_deadzone: f64,
    /// Velocity multiplier per tick, in (0, 1]. 1.0 disables damping.
    pub damping_factor: f64,
    /// Gravity constant (m/s^2).
    pub gravity: f64,
    pub mode: OrientationModeConfig,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            acceleration_deadzone: 1.5,
            rotation_deadzone: 0.05,
            damping_factor: 0.95,
            gravity: 9.81,
            mode: OrientationModeConfig::GyroIntegration,
        }
    }
}

impl FusionConfig {
    /// Estimator tuning described by this section.
    pub fn estimator(&self) -> EstimatorConfig {
        EstimatorConfig {
            acceleration_deadzone: self.acceleration_deadzone,
            rotation_deadzone: self.rotation_deadzone,
            damping_factor: self.damping_factor,
            gravity: self.gravity,
            mode: self.mode.into(),
        }
    }

    /// Same rules the estimator enforces at construction.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Ok(self.estimator().validate()?)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Generate synthetic samples instead of reading the device.
    pub simulation: bool,
    /// Device link path (serial character device or FIFO).
    pub device: PathBuf,
    /// RNG seed for the synthetic source. `None` draws from entropy.
    pub seed: Option<u64>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            simulation: false,
            device: PathBuf::from("/dev/ttyACM0"),
            seed: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimingConfig {
    /// Fusion loop interval (ms).
    pub physics_interval_ms: u64,
    /// Pose display interval (ms). Also sizes the one-second miss-rate window.
    pub dashboard_interval_ms: u64,
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            physics_interval_ms: 50,
            dashboard_interval_ms: 50,
        }
    }
}

impl TimingConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.physics_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("physics_interval_ms"));
        }
        if self.dashboard_interval_ms == 0 {
            return Err(ConfigError::ZeroInterval("dashboard_interval_ms"));
        }
        Ok(())
    }
}
