use crate::ToPrettyString;
use postcard::experimental::max_size::MaxSize;
use serde::{Deserialize, Serialize};
use std::fmt;

type Celsius = f64;
type Meters = f64;

/// Represents a vector
#[derive(
  Deserialize, Serialize, Clone, Copy, MaxSize, Debug, PartialEq, Default,
)]
pub struct Vector {
  /// First axis.
  pub x: f64,
  /// Second axis.
  pub y: f64,
  /// Third axis.
  pub z: f64,
}

impl From<[f64; 3]> for Vector {
  fn from([x, y, z]: [f64; 3]) -> Self {
    Vector { x, y, z }
  }
}

impl fmt::Display for Vector {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "[{:>9.4}, {:>9.4}, {:>9.4}]", self.x, self.y, self.z)
  }
}

/// in units of m/s^2
type Accelerometer = Vector;

/// in units of rad/s
type Gyroscope = Vector;

/// in units of rad
type Magnetometer = Vector;

/// Represents the state of the IMU
#[derive(
  Deserialize, Serialize, Clone, Copy, MaxSize, Debug, PartialEq, Default,
)]
pub struct Imu {
  /// Calibrated specific force.
  pub accelerometer: Accelerometer,

  /// Calibrated angular rate.
  pub gyroscope: Gyroscope,

  /// Calibrated magnetometer reading.
  pub magnetometer: Magnetometer,
}

/// Represents the state of the Barometer
#[derive(
  Deserialize, Serialize, Clone, Copy, MaxSize, Debug, PartialEq, Default,
)]
pub struct Barometer {
  /// Sensor die temperature.
  pub temperature: Celsius,

  /// Barometric altitude relative to the calibrated reference.
  pub altitude: Meters,
}

/// Represents the state of AHRS as a whole
#[derive(
  Clone, Copy, MaxSize, Debug, Default, Deserialize, PartialEq, Serialize,
)]
pub struct Ahrs {
  /// Inertial and magnetic sensors.
  pub imu: Imu,

  /// Pressure sensor.
  pub barometer: Barometer,

  /// Time since the previous sample, in microseconds.
  pub period_us: f64,
}

/// A single data point with a timestamp and channel, no units.
#[derive(Clone, Copy, Debug, Deserialize, MaxSize, PartialEq, Serialize)]
pub struct DataPoint {
  /// The state of AHRS when the sample was taken.
  pub state: Ahrs,

  /// The timestamp of when this data was collected, in seconds since the
  /// Unix epoch.
  pub timestamp: f64,
}

impl ToPrettyString for DataPoint {
  fn to_pretty_string(&self) -> String {
    let imu = &self.state.imu;
    let baro = &self.state.barometer;

    format!(
      "\x1b[1macc\x1b[0m  {} m/s²\n\
       \x1b[1mgyro\x1b[0m {} rad/s\n\
       \x1b[1mmagn\x1b[0m {} rad\n\
       \x1b[1mbaro\x1b[0m {:.2} °C, \x1b[32m{:.2} m\x1b[0m",
      imu.accelerometer,
      imu.gyroscope,
      imu.magnetometer,
      baro.temperature,
      baro.altitude,
    )
  }
}

/// Operator commands accepted by the AHRS harness.
#[derive(Clone, Copy, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Command {
  /// Begin a null estimate. The vehicle must be still.
  Calibrate,

  /// Drop the running null estimate and keep the previous calibration.
  AbortCalibration,

  /// Print the committed calibration.
  ShowCalibration,

  /// Write the committed calibration to disk.
  SaveCalibration,

  /// Stop acquisition and exit.
  Quit,
}

impl fmt::Display for Command {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    let description = match self {
      Self::Calibrate => "start calibration",
      Self::AbortCalibration => "abort calibration",
      Self::ShowCalibration => "show calibration",
      Self::SaveCalibration => "save calibration",
      Self::Quit => "quit",
    };

    write!(f, "{description}")
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn data_point_fits_its_max_size() -> anyhow::Result<()> {
    let point = DataPoint {
      state: Ahrs {
        imu: Imu {
          accelerometer: [0.1, -0.2, 9.81].into(),
          ..Imu::default()
        },
        barometer: Barometer {
          temperature: 24.5,
          altitude: 212.0,
        },
        period_us: 10_000.0,
      },
      timestamp: 1_700_000_000.25,
    };

    let bytes = postcard::to_allocvec(&point)?;
    assert!(bytes.len() <= DataPoint::POSTCARD_MAX_SIZE);
    assert_eq!(postcard::from_bytes::<DataPoint>(&bytes)?, point);
    Ok(())
  }

  #[test]
  fn pretty_string_shows_every_group() {
    let point = DataPoint {
      state: Ahrs::default(),
      timestamp: 0.0,
    };
    let pretty = point.to_pretty_string();
    for label in ["acc", "gyro", "magn", "baro"] {
      assert!(pretty.contains(label));
    }
  }
}
