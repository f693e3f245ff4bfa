use crate::{
  calibration::{CalibrationModel, SensorGroup},
  frame::RawSample,
};
use common::comm::ahrs::{Ahrs, Barometer, DataPoint, Imu, Vector};
use nalgebra::Vector3;
use serde::{Deserialize, Serialize};
use std::{
  fmt,
  time::{SystemTime, UNIX_EPOCH},
};

/// m/s^2
pub const GRAVITY: f64 = 9.81;

/// Exponent of the barometric formula, 1 / 5.255.
pub const PRESS_EXP: f64 = 0.191_387_559_808_612;
pub const PRESS_EXP_INV: f64 = 5.255;
/// Scale height of the barometric formula, in meters.
pub const PRESS_K: f64 = 44_330.0;
/// Standard sea level pressure, in Pascal.
pub const P0_DEFAULT: f64 = 101_325.0;

/// °C per temperature count.
pub const TEMP_SCALE: f64 = 0.1;

/// Gyro gain fudge some IMU firmware builds need on top of the calibration.
pub const GYRO_GAIN_FUDGE: f64 = 0.929_55;

/// Temperature in °C for a (possibly averaged) raw reading.
pub fn temperature(raw: f64) -> f64 {
  raw * TEMP_SCALE
}

/// Sea level pressure implied by having measured `p_z0` at altitude `z0`.
pub fn sea_level_pressure(p_z0: f64, z0: f64) -> f64 {
  p_z0 / (1.0 - z0 / PRESS_K).powf(PRESS_EXP_INV)
}

/// Barometric altitude in meters. A zero pressure maps to `PRESS_K`.
pub fn altitude(pressure: f64, p0: f64) -> f64 {
  PRESS_K * (1.0 - (pressure / p0).powf(PRESS_EXP))
}

/// One frame in SI units.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct PhysicalSample {
  /// Time since the previous sample, in microseconds.
  pub t_us: f64,
  /// m/s^2
  pub acc: Vector3<f64>,
  /// rad/s
  pub gyro: Vector3<f64>,
  /// rad
  pub magn: Vector3<f64>,
  /// °C
  pub temp: f64,
  /// m
  pub alt: f64,
  pub timestamp: SystemTime,
}

impl Default for PhysicalSample {
  fn default() -> Self {
    PhysicalSample {
      t_us: 0.0,
      acc: Vector3::zeros(),
      gyro: Vector3::zeros(),
      magn: Vector3::zeros(),
      temp: 0.0,
      alt: 0.0,
      timestamp: UNIX_EPOCH,
    }
  }
}

impl fmt::Display for PhysicalSample {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{:.8}", self.t_us)?;
    for value in self.acc.iter().chain(&self.gyro).chain(&self.magn) {
      write!(f, "\t{value:.8}")?;
    }
    write!(f, "\t{:.8}\t{:.8}", self.temp, self.alt)
  }
}

impl From<&PhysicalSample> for DataPoint {
  fn from(sample: &PhysicalSample) -> Self {
    let vector = |v: &Vector3<f64>| Vector {
      x: v.x,
      y: v.y,
      z: v.z,
    };

    DataPoint {
      state: Ahrs {
        imu: Imu {
          accelerometer: vector(&sample.acc),
          gyroscope: vector(&sample.gyro),
          magnetometer: vector(&sample.magn),
        },
        barometer: Barometer {
          temperature: sample.temp,
          altitude: sample.alt,
        },
        period_us: sample.t_us,
      },
      timestamp: sample
        .timestamp
        .duration_since(UNIX_EPOCH)
        .map(|since_epoch| since_epoch.as_secs_f64())
        .unwrap_or(0.0),
    }
  }
}

/// Extra per axis gain applied after calibration.
pub trait ScaleCorrection: Send {
  fn adjust(&self, group: SensorGroup, axis: usize, value: f64) -> f64;
}

/// Leaves every value as is.
#[derive(Clone, Copy, Debug, Default)]
pub struct Identity;

impl ScaleCorrection for Identity {
  fn adjust(&self, _group: SensorGroup, _axis: usize, value: f64) -> f64 {
    value
  }
}

/// Constant gains for acc and gyro.
#[derive(Clone, Copy, Debug)]
pub struct FixedGain {
  pub acc: f64,
  pub gyro: f64,
}

impl FixedGain {
  /// The gyro correction older firmware needs.
  pub fn gyro_fudge() -> Self {
    FixedGain {
      acc: 1.0,
      gyro: GYRO_GAIN_FUDGE,
    }
  }
}

impl ScaleCorrection for FixedGain {
  fn adjust(&self, group: SensorGroup, _axis: usize, value: f64) -> f64 {
    match group {
      SensorGroup::Accelerometer => value * self.acc,
      SensorGroup::Gyroscope => value * self.gyro,
      SensorGroup::Magnetometer => value,
    }
  }
}

fn axes(values: &[i16; 3]) -> Vector3<f64> {
  Vector3::new(
    f64::from(values[0]),
    f64::from(values[1]),
    f64::from(values[2]),
  )
}

/// Turns raw frames into physical samples under a calibration model.
pub struct Converter {
  scale: Box<dyn ScaleCorrection>,
}

impl Converter {
  pub fn new(scale: Box<dyn ScaleCorrection>) -> Self {
    Converter { scale }
  }

  pub fn set_scale(&mut self, scale: Box<dyn ScaleCorrection>) {
    self.scale = scale;
  }

  /// Pure function of the frame and the model, never fails.
  pub fn convert(
    &self,
    raw: &RawSample,
    model: &CalibrationModel,
  ) -> PhysicalSample {
    let temp = temperature(f64::from(raw.temp));

    let mut acc = model.acc.apply(&axes(&raw.acc))
      - model.acc_t_off * (temp - model.acc_t_ref);

    let mut gyro = model.gyro.apply(&axes(&raw.gyro)).map(f64::to_radians)
      - model.gyro_t_off * (temp - model.gyro_t_ref);

    for axis in 0..3 {
      acc[axis] =
        self.scale.adjust(SensorGroup::Accelerometer, axis, acc[axis]);
      gyro[axis] = self.scale.adjust(SensorGroup::Gyroscope, axis, gyro[axis]);
    }

    let magn = model.magn.apply(&axes(&raw.magn)).map(f64::to_radians);
    let alt = altitude(f64::from(raw.pres), model.sea_level_pressure());

    PhysicalSample {
      t_us: f64::from(raw.t_us),
      acc,
      gyro,
      magn,
      temp,
      alt,
      timestamp: raw.timestamp,
    }
  }
}

impl Default for Converter {
  fn default() -> Self {
    Converter::new(Box::new(Identity))
  }
}
