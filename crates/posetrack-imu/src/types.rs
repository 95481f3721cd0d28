use crate::fusion::FusionError;
use glam::DVec3;

/// One reading from the IMU, already converted to SI units.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sample {
    /// Linear acceleration (m/s^2).
    pub accel: DVec3,
    /// Angular rate (deg/s).
    pub gyro: DVec3,
    /// Magnetic field (Gauss), present on 9-axis devices only.
    pub mag: Option<DVec3>,
}

impl Sample {
    pub fn new(accel: DVec3, gyro: DVec3) -> Self {
        Self {
            accel,
            gyro,
            mag: None,
        }
    }

    /// Build a sample from `[ax, ay, az, gx, gy, gz]` or
    /// `[ax, ay, az, gx, gy, gz, mx, my, mz]`.
    ///
    /// Extra values beyond the ninth are ignored. Slices shorter than six
    /// values, or containing non-finite values in the used range, are rejected.
    pub fn from_slice(values: &[f64]) -> Result<Self, FusionError> {
        if values.len() < 6 {
            return Err(FusionError::InvalidInput(format!(
                "sample needs at least 6 values, got {}",
                values.len()
            )));
        }

        let mag = if values.len() >= 9 {
            Some(DVec3::new(values[6], values[7], values[8]))
        } else {
            None
        };

        let sample = Self {
            accel: DVec3::new(values[0], values[1], values[2]),
            gyro: DVec3::new(values[3], values[4], values[5]),
            mag,
        };
        sample.validate()?;
        Ok(sample)
    }

    /// Reject samples carrying NaN or infinite channels.
    pub fn validate(&self) -> Result<(), FusionError> {
        let mag_ok = self.mag.map_or(true, |m| m.is_finite());
        if self.accel.is_finite() && self.gyro.is_finite() && mag_ok {
            Ok(())
        } else {
            Err(FusionError::InvalidInput(
                "sample contains non-finite values".into(),
            ))
        }
    }
}

/// Estimated pose of the device.
///
/// Angles are in degrees, position in meters. Field names carry the axis
/// convention so consumers never depend on tuple order.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Pose {
    pub pitch: f64,
    pub roll: f64,
    pub yaw: f64,
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Pose {
    /// `(pitch, roll, yaw, x, y, z)`, the order returned by the estimator.
    pub fn as_tuple(&self) -> (f64, f64, f64, f64, f64, f64) {
        (self.pitch, self.roll, self.yaw, self.x, self.y, self.z)
    }

    pub fn position(&self) -> DVec3 {
        DVec3::new(self.x, self.y, self.z)
    }
}

/// Lifecycle of an estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstimatorState {
    /// Freshly constructed or just reset.
    Zeroed,
    /// At least one update applied since the last reset.
    Running,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn six_values_without_mag() {
        let s = Sample::from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        assert_eq!(s.accel, DVec3::new(1.0, 2.0, 3.0));
        assert_eq!(s.gyro, DVec3::new(4.0, 5.0, 6.0));
        assert!(s.mag.is_none());
    }

    #[test]
    fn nine_values_carry_mag() {
        let s = Sample::from_slice(&[0.0, 0.0, 9.81, 0.0, 0.0, 0.0, 0.5, 0.0, -0.5]).unwrap();
        assert_eq!(s.mag, Some(DVec3::new(0.5, 0.0, -0.5)));
    }

    #[test]
    fn short_slice_rejected() {
        let err = Sample::from_slice(&[1.0, 2.0, 3.0, 4.0]).unwrap_err();
        assert!(matches!(err, FusionError::InvalidInput(_)));
    }

    #[test]
    fn nan_rejected() {
        assert!(Sample::from_slice(&[0.0, f64::NAN, 0.0, 0.0, 0.0, 0.0]).is_err());
    }

    #[test]
    fn pose_tuple_order() {
        let pose = Pose {
            pitch: 1.0,
            roll: 2.0,
            yaw: 3.0,
            x: 4.0,
            y: 5.0,
            z: 6.0,
        };
        assert_eq!(pose.as_tuple(), (1.0, 2.0, 3.0, 4.0, 5.0, 6.0));
    }
}
