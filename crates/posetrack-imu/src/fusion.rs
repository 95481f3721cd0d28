use crate::types::{EstimatorState, Pose, Sample};
use glam::{DQuat, DVec3, EulerRot};
use thiserror::Error;

/// Per-tick rotation above which summing Euler increments stops being a
/// reasonable stand-in for composing rotations (degrees).
pub const SMALL_ANGLE_LIMIT_DEG: f64 = 5.0;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum FusionError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),
    #[error("Invalid estimator configuration: {0}")]
    InvalidConfig(String),
}

/// How orientation is derived each tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrientationMode {
    /// Pure gyro integration: per-tick incremental rotation, summed as Euler angles.
    #[default]
    GyroIntegration,
    /// Pitch and roll from the accelerometer tilt, yaw from gyro integration.
    Leveling,
}

/// Tuning for an [`OrientationEstimator`]. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EstimatorConfig {
    /// World-frame linear acceleration below this magnitude is treated as zero (m/s^2).
    pub acceleration_deadzone: f64,
    /// Per-tick rotation increments below this magnitude are treated as zero (deg).
    pub rotation_deadzone: f64,
    /// Multiplier applied to the previous velocity every tick, in (0, 1].
    pub damping_factor: f64,
    /// Gravity removed from the world Z axis (m/s^2).
    pub gravity: f64,
    pub mode: OrientationMode,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            acceleration_deadzone: 1.5,
            rotation_deadzone: 0.05,
            damping_factor: 0.95,
            gravity: 9.81,
            mode: OrientationMode::GyroIntegration,
        }
    }
}

impl EstimatorConfig {
    pub fn validate(&self) -> Result<(), FusionError> {
        if !(self.acceleration_deadzone.is_finite() && self.acceleration_deadzone >= 0.0) {
            return Err(FusionError::InvalidConfig(format!(
                "acceleration deadzone must be finite and >= 0, got {}",
                self.acceleration_deadzone
            )));
        }
        if !(self.rotation_deadzone.is_finite() && self.rotation_deadzone >= 0.0) {
            return Err(FusionError::InvalidConfig(format!(
                "rotation deadzone must be finite and >= 0, got {}",
                self.rotation_deadzone
            )));
        }
        if !(self.damping_factor > 0.0 && self.damping_factor <= 1.0) {
            return Err(FusionError::InvalidConfig(format!(
                "damping factor must be in (0, 1], got {}",
                self.damping_factor
            )));
        }
        if !self.gravity.is_finite() {
            return Err(FusionError::InvalidConfig(format!(
                "gravity must be finite, got {}",
                self.gravity
            )));
        }
        Ok(())
    }
}

/// Dead-reckoning orientation and position estimator.
///
/// Each tick turns one IMU sample plus its elapsed time into an updated pose:
/// the gyro rate gives an incremental body rotation, the accelerometer is
/// rotated into the world frame, gravity is removed, and the remainder is
/// integrated twice. Deadzones on rotation and acceleration keep sensor noise
/// out of the integrals while at rest, and velocity damping bounds whatever
/// residual noise gets through.
///
/// Orientation is the running sum of per-tick Euler increments (X-Y-Z order).
/// That is exact for rotation about a single axis but only approximates the
/// composed rotation when several axes turn together, and nothing corrects
/// pitch, roll or yaw drift in [`OrientationMode::GyroIntegration`].
/// Per-tick rotations should stay under [`SMALL_ANGLE_LIMIT_DEG`].
pub struct OrientationEstimator {
    config: EstimatorConfig,
    /// Accumulated Euler angles about X, Y, Z (deg).
    orientation: DVec3,
    velocity: DVec3,
    position: DVec3,
    state: EstimatorState,
}

impl OrientationEstimator {
    pub fn new(config: EstimatorConfig) -> Result<Self, FusionError> {
        config.validate()?;
        Ok(Self {
            config,
            orientation: DVec3::ZERO,
            velocity: DVec3::ZERO,
            position: DVec3::ZERO,
            state: EstimatorState::Zeroed,
        })
    }

    /// Advance the estimate from raw sample values (6 or 9 channels).
    ///
    /// Returns `(pitch, roll, yaw, x, y, z)` as a [`Pose`]. On error the
    /// estimator is left untouched.
    pub fn update(&mut self, values: &[f64], dt: f64) -> Result<Pose, FusionError> {
        let sample = Sample::from_slice(values)?;
        self.update_sample(&sample, dt)
    }

    pub fn update_sample(&mut self, sample: &Sample, dt: f64) -> Result<Pose, FusionError> {
        sample.validate()?;
        if !dt.is_finite() || dt < 0.0 {
            return Err(FusionError::InvalidInput(format!(
                "dt must be finite and >= 0, got {dt}"
            )));
        }

        // A zero-length tick carries no motion; damping must not run either.
        if dt == 0.0 {
            self.state = EstimatorState::Running;
            return Ok(self.pose());
        }

        let (orientation, accel_world) = match self.config.mode {
            OrientationMode::GyroIntegration => self.integrate_gyro(sample, dt),
            OrientationMode::Leveling => self.level(sample, dt),
        };

        let linear = apply_deadzone(
            accel_world - DVec3::Z * self.config.gravity,
            self.config.acceleration_deadzone,
        );

        let velocity = self.velocity * self.config.damping_factor + linear * dt;
        let position = self.position + velocity * dt;

        // Finite inputs can still overflow once multiplied by dt.
        if !(orientation.is_finite() && velocity.is_finite() && position.is_finite()) {
            return Err(FusionError::InvalidInput(format!(
                "sample overflows the estimate over dt = {dt}"
            )));
        }

        self.orientation = orientation;
        self.velocity = velocity;
        self.position = position;
        self.state = EstimatorState::Running;

        Ok(self.pose())
    }

    /// Return to the zeroed state.
    pub fn reset(&mut self) {
        self.orientation = DVec3::ZERO;
        self.velocity = DVec3::ZERO;
        self.position = DVec3::ZERO;
        self.state = EstimatorState::Zeroed;
    }

    pub fn pose(&self) -> Pose {
        Pose {
            pitch: self.orientation.y,
            roll: self.orientation.x,
            yaw: self.orientation.z,
            x: self.position.x,
            y: self.position.y,
            z: self.position.z,
        }
    }

    pub fn state(&self) -> EstimatorState {
        self.state
    }

    pub fn config(&self) -> &EstimatorConfig {
        &self.config
    }

    /// Incremental body rotation from the gyro.
    ///
    /// Returns the next orientation and the world-frame acceleration.
    fn integrate_gyro(&self, sample: &Sample, dt: f64) -> (DVec3, DVec3) {
        let delta = apply_deadzone(sample.gyro * dt, self.config.rotation_deadzone);
        if delta.abs().max_element() > SMALL_ANGLE_LIMIT_DEG {
            tracing::debug!(
                dx = delta.x,
                dy = delta.y,
                dz = delta.z,
                "Per-tick rotation exceeds small-angle limit"
            );
        }

        let rotation = DQuat::from_euler(
            EulerRot::XYZ,
            delta.x.to_radians(),
            delta.y.to_radians(),
            delta.z.to_radians(),
        );

        let (ex, ey, ez) = rotation.to_euler(EulerRot::XYZ);
        let increment = DVec3::new(ex.to_degrees(), ey.to_degrees(), ez.to_degrees());
        (
            wrap_degrees(self.orientation + increment),
            rotation * sample.accel,
        )
    }

    /// Pitch and roll from gravity, yaw from the Z gyro.
    fn level(&self, sample: &Sample, dt: f64) -> (DVec3, DVec3) {
        let a = sample.accel;

        let yz = (a.y * a.y + a.z * a.z).sqrt();
        let pitch = if yz != 0.0 { (-a.x).atan2(yz) } else { 0.0 };
        let roll = if a.z != 0.0 { a.y.atan2(a.z) } else { 0.0 };

        let mut yaw_step = sample.gyro.z * dt;
        if yaw_step.abs() < self.config.rotation_deadzone {
            yaw_step = 0.0;
        }

        let orientation = wrap_degrees(DVec3::new(
            roll.to_degrees(),
            pitch.to_degrees(),
            self.orientation.z + yaw_step,
        ));

        let rotation = DQuat::from_euler(EulerRot::ZYX, orientation.z.to_radians(), pitch, roll);
        (orientation, rotation * a)
    }
}

/// Zero every component whose magnitude is strictly below `threshold`.
fn apply_deadzone(v: DVec3, threshold: f64) -> DVec3 {
    let clip = |c: f64| if c.abs() < threshold { 0.0 } else { c };
    DVec3::new(clip(v.x), clip(v.y), clip(v.z))
}

/// Wrap each component into (-180, 180].
fn wrap_degrees(v: DVec3) -> DVec3 {
    let wrap = |a: f64| {
        let w = (a + 180.0).rem_euclid(360.0) - 180.0;
        if w == -180.0 {
            180.0
        } else {
            w
        }
    };
    DVec3::new(wrap(v.x), wrap(v.y), wrap(v.z))
}
