//! Null estimation and the linear sensor model.
//!
//! Acc, gyro and magn use a linear model
//!
//! ```text
//!   data = T * K_inv * (raw - b)
//! ```
//!
//! where `b` is the null offset in counts, `K_inv` the inverse of the diagonal
//! gain matrix and `T` the cross axis sensitivity. Only the product `T*K_inv`
//! is stored.

use crate::{
  convert::{self, GRAVITY, P0_DEFAULT, PRESS_K},
  error::{Error, Result},
  frame::RawSample,
};
use bitflags::bitflags;
use jeflog::{pass, warn};
use nalgebra::{Matrix3, Vector3};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc, time::SystemTime};

/// Frames averaged by default for one null estimate.
pub const CALIB_SIZE: usize = 512;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SensorGroup {
  Accelerometer,
  Gyroscope,
  Magnetometer,
}

impl fmt::Display for SensorGroup {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SensorGroup::Accelerometer => write!(f, "accelerometer"),
      SensorGroup::Gyroscope => write!(f, "gyroscope"),
      SensorGroup::Magnetometer => write!(f, "magnetometer"),
    }
  }
}

/// `T*K_inv` and `b` for one sensor group.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
  pub tk_inv: Matrix3<f64>,
  pub b: Vector3<f64>,
}

impl LinearModel {
  pub fn identity() -> Self {
    LinearModel {
      tk_inv: Matrix3::identity(),
      b: Vector3::zeros(),
    }
  }

  /// Maps counts into the sensor's native unit.
  pub fn apply(&self, raw: &Vector3<f64>) -> Vector3<f64> {
    self.tk_inv * (raw - self.b)
  }

  /// Counts that map to `native`, with the current gain but no offset.
  fn counts_for(&self, native: &Vector3<f64>) -> Option<Vector3<f64>> {
    self.tk_inv.try_inverse().map(|k| k * native)
  }
}

bitflags! {
  /// Where the committed calibration came from. Both can be set when a file
  /// was loaded and the nulls were re-estimated afterwards.
  #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
  pub struct CalibrationOrigin : u8 {
    const FILE = 1 << 0;
    const ESTIMATED = 1 << 1;
  }
}

/// Everything needed to turn a raw frame into physical units.
///
/// Committed as a whole, never edited in place once shared.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CalibrationModel {
  pub acc: LinearModel,
  pub gyro: LinearModel,
  pub magn: LinearModel,

  /// m/(s^2 °C)
  pub acc_t_off: Vector3<f64>,
  /// °C
  pub acc_t_ref: f64,
  /// rad/(s °C)
  pub gyro_t_off: Vector3<f64>,
  /// °C
  pub gyro_t_ref: f64,

  /// Externally known altitude at calibration time, in meters.
  pub z0: f64,
  /// Pressure measured at `z0`, in Pascal.
  pub p_z0: f64,

  pub origin: CalibrationOrigin,
  pub loaded_at: Option<SystemTime>,
  pub estimated_at: Option<SystemTime>,
}

impl Default for CalibrationModel {
  fn default() -> Self {
    CalibrationModel {
      acc: LinearModel::identity(),
      gyro: LinearModel::identity(),
      magn: LinearModel::identity(),
      acc_t_off: Vector3::zeros(),
      acc_t_ref: 0.0,
      gyro_t_off: Vector3::zeros(),
      gyro_t_ref: 0.0,
      z0: 0.0,
      p_z0: P0_DEFAULT,
      origin: CalibrationOrigin::empty(),
      loaded_at: None,
      estimated_at: None,
    }
  }
}

impl CalibrationModel {
  /// True for the built in defaults.
  pub fn is_unset(&self) -> bool {
    self.origin.is_empty()
  }

  pub fn group(&self, group: SensorGroup) -> &LinearModel {
    match group {
      SensorGroup::Accelerometer => &self.acc,
      SensorGroup::Gyroscope => &self.gyro,
      SensorGroup::Magnetometer => &self.magn,
    }
  }

  fn group_mut(&mut self, group: SensorGroup) -> &mut LinearModel {
    match group {
      SensorGroup::Accelerometer => &mut self.acc,
      SensorGroup::Gyroscope => &mut self.gyro,
      SensorGroup::Magnetometer => &mut self.magn,
    }
  }

  /// Sea level pressure implied by the `(z0, p_z0)` reference pair.
  pub fn sea_level_pressure(&self) -> f64 {
    convert::sea_level_pressure(self.p_z0, self.z0)
  }

  /// Rejects models the converter could not use.
  pub fn validate(&self) -> Result<()> {
    for group in [
      SensorGroup::Accelerometer,
      SensorGroup::Gyroscope,
      SensorGroup::Magnetometer,
    ] {
      let model = self.group(group);
      if model.tk_inv.iter().chain(model.b.iter()).any(|v| !v.is_finite()) {
        return Err(Error::InvalidArgument(format!(
          "{group} model holds a non finite value"
        )));
      }
      if model.tk_inv.try_inverse().is_none() {
        return Err(Error::InvalidArgument(format!(
          "{group} gain matrix is singular"
        )));
      }
    }

    let scalars = [self.acc_t_ref, self.gyro_t_ref, self.z0, self.p_z0];
    let offsets = self.acc_t_off.iter().chain(self.gyro_t_off.iter());
    if scalars.iter().chain(offsets).any(|v| !v.is_finite()) {
      return Err(Error::InvalidArgument(
        "temperature or altitude reference is not finite".to_owned(),
      ));
    }

    if self.p_z0 <= 0.0 {
      return Err(Error::InvalidArgument(format!(
        "reference pressure must be positive, got {}",
        self.p_z0
      )));
    }

    check_altitude(self.z0)
  }
}

fn check_altitude(z0: f64) -> Result<()> {
  if !z0.is_finite() || z0 >= PRESS_K {
    return Err(Error::InvalidArgument(format!(
      "altitude reference must be finite and below {PRESS_K} m, got {z0}"
    )));
  }
  Ok(())
}

impl fmt::Display for CalibrationModel {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    for (name, model) in
      [("acc", &self.acc), ("gyro", &self.gyro), ("magn", &self.magn)]
    {
      writeln!(f, "{name}:")?;
      for row in model.tk_inv.row_iter() {
        writeln!(f, "  {:12.8} {:12.8} {:12.8}", row[0], row[1], row[2])?;
      }
      writeln!(f, "  b = [{:.4}, {:.4}, {:.4}]", model.b.x, model.b.y, model.b.z)?;
    }

    let (a, g) = (&self.acc_t_off, &self.gyro_t_off);
    writeln!(
      f,
      "acc temp offset:  [{:.6}, {:.6}, {:.6}] @ {:.2} °C",
      a.x, a.y, a.z, self.acc_t_ref
    )?;
    writeln!(
      f,
      "gyro temp offset: [{:.6}, {:.6}, {:.6}] @ {:.2} °C",
      g.x, g.y, g.z, self.gyro_t_ref
    )?;
    writeln!(f, "z0 = {:.2} m, p(z0) = {:.2} Pa", self.z0, self.p_z0)?;
    write!(
      f,
      "from file: {}, estimated: {}",
      self.origin.contains(CalibrationOrigin::FILE),
      self.origin.contains(CalibrationOrigin::ESTIMATED)
    )
  }
}

/// Expected physical readings while the vehicle sits still.
#[derive(Clone, Debug)]
pub struct RestState {
  /// m/s^2
  pub acc: Vector3<f64>,
  /// rad/s
  pub gyro: Vector3<f64>,
  /// Magnetometer reading to null against. `None` keeps the committed
  /// magnetometer offsets instead.
  pub magn: Option<Vector3<f64>>,
}

impl Default for RestState {
  fn default() -> Self {
    RestState {
      acc: Vector3::new(0.0, 0.0, GRAVITY),
      gyro: Vector3::zeros(),
      magn: Some(Vector3::zeros()),
    }
  }
}

#[derive(Clone, Debug)]
pub struct CalibrationConfig {
  /// Frames required before a null estimate may be committed.
  pub min_samples: usize,
  pub rest: RestState,
}

impl Default for CalibrationConfig {
  fn default() -> Self {
    CalibrationConfig {
      min_samples: CALIB_SIZE,
      rest: RestState::default(),
    }
  }
}

/// Average of the frames gathered during one calibration run.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct NullEstimate {
  pub acc: Vector3<f64>,
  pub gyro: Vector3<f64>,
  pub magn: Vector3<f64>,
  /// counts
  pub temp: f64,
  /// Pa
  pub pres: f64,
  pub samples: usize,
}

/// Running sums while calibrating. Wide integers so no realistic run can
/// overflow them.
#[derive(Clone, Debug)]
pub struct CalibrationAccumulator {
  acc: [i64; 3],
  gyro: [i64; 3],
  magn: [i64; 3],
  temp: u64,
  pres: u64,
  count: usize,
  started_at: SystemTime,
}

impl CalibrationAccumulator {
  fn new() -> Self {
    CalibrationAccumulator {
      acc: [0; 3],
      gyro: [0; 3],
      magn: [0; 3],
      temp: 0,
      pres: 0,
      count: 0,
      started_at: SystemTime::now(),
    }
  }

  fn add(&mut self, raw: &RawSample) {
    for axis in 0..3 {
      self.acc[axis] += i64::from(raw.acc[axis]);
      self.gyro[axis] += i64::from(raw.gyro[axis]);
      self.magn[axis] += i64::from(raw.magn[axis]);
    }
    self.temp += u64::from(raw.temp);
    self.pres += u64::from(raw.pres);
    self.count += 1;
  }

  pub fn count(&self) -> usize {
    self.count
  }

  pub fn started_at(&self) -> SystemTime {
    self.started_at
  }

  fn mean(&self) -> NullEstimate {
    let n = self.count.max(1) as f64;
    let axes = |sums: &[i64; 3]| {
      Vector3::new(sums[0] as f64, sums[1] as f64, sums[2] as f64) / n
    };

    NullEstimate {
      acc: axes(&self.acc),
      gyro: axes(&self.gyro),
      magn: axes(&self.magn),
      temp: self.temp as f64 / n,
      pres: self.pres as f64 / n,
      samples: self.count,
    }
  }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalibrationStatus {
  Idle,
  Calibrating { collected: usize, required: usize },
}

/// Collects frames while the vehicle is still and commits null estimates.
///
/// Readers get `Arc` snapshots of the model, and a commit swaps the whole
/// `Arc`, so a reader never sees a gain matrix paired with a stale offset.
pub struct CalibrationEngine {
  config: CalibrationConfig,
  model: Arc<CalibrationModel>,
  accumulator: Option<CalibrationAccumulator>,
  z0: f64,
  null_estimate: Option<NullEstimate>,
}

impl CalibrationEngine {
  pub fn new(config: CalibrationConfig) -> Self {
    CalibrationEngine {
      config,
      model: Arc::new(CalibrationModel::default()),
      accumulator: None,
      z0: 0.0,
      null_estimate: None,
    }
  }

  pub fn config(&self) -> &CalibrationConfig {
    &self.config
  }

  pub fn status(&self) -> CalibrationStatus {
    match &self.accumulator {
      None => CalibrationStatus::Idle,
      Some(accumulator) => CalibrationStatus::Calibrating {
        collected: accumulator.count(),
        required: self.config.min_samples,
      },
    }
  }

  pub fn is_calibrating(&self) -> bool {
    self.accumulator.is_some()
  }

  /// True once enough frames were fed for `finish_calibration` to succeed.
  pub fn is_complete(&self) -> bool {
    self
      .accumulator
      .as_ref()
      .is_some_and(|acc| acc.count() >= self.config.min_samples)
  }

  /// Read only snapshot of the committed model.
  pub fn model(&self) -> Arc<CalibrationModel> {
    Arc::clone(&self.model)
  }

  /// Nulls gathered by the last successful run.
  pub fn null_estimate(&self) -> Option<&NullEstimate> {
    self.null_estimate.as_ref()
  }

  pub fn calib_file(&self) -> bool {
    self.model.origin.contains(CalibrationOrigin::FILE)
  }

  /// True when the committed nulls were estimated by this engine. An
  /// estimate carried in from a file does not count.
  pub fn calib_estim(&self) -> bool {
    self.null_estimate.is_some()
  }

  /// Altitude to associate with the pressure measured during the next
  /// calibration run. Has no effect on an already committed model.
  pub fn set_altitude_reference(&mut self, z0: f64) -> Result<()> {
    check_altitude(z0)?;
    self.z0 = z0;
    Ok(())
  }

  pub fn altitude_reference(&self) -> f64 {
    self.z0
  }

  pub fn start_calibration(&mut self) -> Result<()> {
    if self.is_calibrating() {
      return Err(Error::InvalidState {
        operation: "start calibration",
        state: "calibrating",
      });
    }

    self.accumulator = Some(CalibrationAccumulator::new());
    pass!(
      "Calibrating IMU over {} frames, keep the vehicle still.",
      self.config.min_samples
    );
    Ok(())
  }

  /// Adds one frame to the running sums and returns how many were collected.
  pub fn feed(&mut self, raw: &RawSample) -> Result<usize> {
    match self.accumulator.as_mut() {
      Some(accumulator) => {
        accumulator.add(raw);
        Ok(accumulator.count())
      }
      None => Err(Error::InvalidState {
        operation: "feed calibration",
        state: "idle",
      }),
    }
  }

  /// Averages the collected frames and commits a new model.
  ///
  /// Returns `NotReady` until `min_samples` frames have been fed, in which
  /// case calibration simply continues.
  pub fn finish_calibration(&mut self) -> Result<Arc<CalibrationModel>> {
    let Some(accumulator) = self.accumulator.as_ref() else {
      return Err(Error::InvalidState {
        operation: "finish calibration",
        state: "idle",
      });
    };

    if accumulator.count() < self.config.min_samples {
      return Err(Error::NotReady);
    }

    let null = accumulator.mean();
    let model = self.estimate(&null)?;

    self.model = Arc::new(model);
    self.accumulator = None;
    self.null_estimate = Some(null);

    pass!(
      "IMU calibration committed from {} frames (z0 = {:.2} m).",
      null.samples,
      self.z0
    );
    Ok(self.model())
  }

  /// Builds the model a null estimate implies, on top of the committed one.
  fn estimate(&self, null: &NullEstimate) -> Result<CalibrationModel> {
    let rest = &self.config.rest;
    let mut model = (*self.model).clone();

    let mut targets = vec![
      (SensorGroup::Accelerometer, null.acc, rest.acc),
      // gyro and magn models work in degrees
      (SensorGroup::Gyroscope, null.gyro, rest.gyro.map(f64::to_degrees)),
    ];
    if let Some(magn) = rest.magn {
      targets.push((
        SensorGroup::Magnetometer,
        null.magn,
        magn.map(f64::to_degrees),
      ));
    }

    for (group, mean, expected) in targets {
      let linear = model.group_mut(group);
      let counts = linear.counts_for(&expected).ok_or_else(|| {
        Error::InvalidArgument(format!("{group} gain matrix is singular"))
      })?;
      linear.b = mean - counts;
    }

    let temp = convert::temperature(null.temp);
    model.acc_t_ref = temp;
    model.gyro_t_ref = temp;

    if null.pres > 0.0 {
      model.z0 = self.z0;
      model.p_z0 = null.pres;
    } else {
      warn!("No pressure during calibration, keeping the previous barometer reference.");
    }

    model.origin |= CalibrationOrigin::ESTIMATED;
    model.estimated_at = Some(SystemTime::now());
    model.validate()?;
    Ok(model)
  }

  /// Drops the running sums. The committed model is left alone.
  pub fn abort_calibration(&mut self) -> Result<()> {
    match self.accumulator.take() {
      Some(accumulator) => {
        warn!(
          "IMU calibration aborted after {} frames, previous calibration kept.",
          accumulator.count()
        );
        Ok(())
      }
      None => Err(Error::InvalidState {
        operation: "abort calibration",
        state: "idle",
      }),
    }
  }

  /// Installs a model obtained elsewhere, typically from a calibration file.
  pub fn replace_model(&mut self, model: CalibrationModel) -> Result<()> {
    if self.is_calibrating() {
      return Err(Error::InvalidState {
        operation: "replace calibration",
        state: "calibrating",
      });
    }

    model.validate()?;
    self.model = Arc::new(model);
    self.null_estimate = None;
    Ok(())
  }
}

impl Default for CalibrationEngine {
  fn default() -> Self {
    CalibrationEngine::new(CalibrationConfig::default())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn still(pres: u32) -> RawSample {
    RawSample {
      t_us: 10_000,
      acc: [12, -7, 815],
      gyro: [3, -2, 1],
      magn: [120, -40, 300],
      temp: 231,
      pres,
      ..RawSample::default()
    }
  }

  fn engine(min_samples: usize) -> CalibrationEngine {
    CalibrationEngine::new(CalibrationConfig {
      min_samples,
      ..CalibrationConfig::default()
    })
  }

  #[test]
  fn starts_unset() {
    let engine = CalibrationEngine::default();
    let model = engine.model();
    assert!(model.is_unset());
    assert_eq!(model.acc, LinearModel::identity());
    assert_eq!(model.p_z0, P0_DEFAULT);
    assert!(!engine.calib_estim());
    assert!(!engine.calib_file());
  }

  #[test]
  fn feed_outside_calibration_is_an_invalid_state() {
    let mut engine = engine(4);
    assert!(matches!(
      engine.feed(&still(100_000)),
      Err(Error::InvalidState { .. })
    ));
    assert!(matches!(
      engine.finish_calibration(),
      Err(Error::InvalidState { .. })
    ));
    assert!(matches!(
      engine.abort_calibration(),
      Err(Error::InvalidState { .. })
    ));
  }

  #[test]
  fn cannot_start_twice() {
    let mut engine = engine(4);
    engine.start_calibration().unwrap();
    assert!(matches!(
      engine.start_calibration(),
      Err(Error::InvalidState { .. })
    ));
  }

  #[test]
  fn finishing_early_is_not_ready() {
    let mut engine = engine(4);
    engine.start_calibration().unwrap();
    for _ in 0..3 {
      engine.feed(&still(100_000)).unwrap();
    }
    assert!(!engine.is_complete());
    assert!(matches!(engine.finish_calibration(), Err(Error::NotReady)));
    assert_eq!(
      engine.status(),
      CalibrationStatus::Calibrating {
        collected: 3,
        required: 4
      }
    );

    engine.feed(&still(100_000)).unwrap();
    assert!(engine.is_complete());
    assert!(engine.finish_calibration().is_ok());
    assert_eq!(engine.status(), CalibrationStatus::Idle);
  }

  #[test]
  fn offsets_are_mean_minus_rest_counts() {
    let mut engine = engine(8);
    engine.start_calibration().unwrap();
    for _ in 0..8 {
      engine.feed(&still(100_000)).unwrap();
    }
    let model = engine.finish_calibration().unwrap();

    let raw = still(100_000);
    assert_eq!(model.acc.b, Vector3::new(12.0, -7.0, 815.0 - GRAVITY));
    assert_eq!(model.gyro.b, Vector3::new(3.0, -2.0, 1.0));
    assert_eq!(model.magn.b, Vector3::new(120.0, -40.0, 300.0));
    assert!((model.acc_t_ref - 23.1).abs() < 1e-9);
    assert_eq!(model.p_z0, f64::from(raw.pres));
    assert!(model.origin.contains(CalibrationOrigin::ESTIMATED));
    assert!(model.estimated_at.is_some());

    let null = engine.null_estimate().unwrap();
    assert_eq!(null.samples, 8);
    assert_eq!(null.acc, Vector3::new(12.0, -7.0, 815.0));
  }

  #[test]
  fn offsets_follow_the_gain_matrix() {
    let mut engine = engine(2);
    let mut scaled = CalibrationModel::default();
    scaled.acc.tk_inv = Matrix3::from_diagonal(&Vector3::new(0.5, 0.5, 0.01));
    engine.replace_model(scaled).unwrap();

    engine.start_calibration().unwrap();
    engine.feed(&still(100_000)).unwrap();
    engine.feed(&still(100_000)).unwrap();
    let model = engine.finish_calibration().unwrap();

    // gravity needs 981 counts on z with a 0.01 gain
    assert!((model.acc.b.z - (815.0 - 981.0)).abs() < 1e-9);
    assert_eq!(model.acc.b.x, 12.0);
  }

  #[test]
  fn only_estimates_from_this_run_count() {
    let mut engine = engine(1);
    let mut loaded = CalibrationModel::default();
    loaded.origin = CalibrationOrigin::FILE | CalibrationOrigin::ESTIMATED;
    engine.replace_model(loaded).unwrap();
    assert!(!engine.calib_estim());
    assert!(engine.calib_file());

    engine.start_calibration().unwrap();
    engine.feed(&still(100_000)).unwrap();
    engine.finish_calibration().unwrap();
    assert!(engine.calib_estim());

    engine.replace_model(CalibrationModel::default()).unwrap();
    assert!(!engine.calib_estim());
    assert!(engine.null_estimate().is_none());
  }

  #[test]
  fn magnetometer_nulls_can_be_kept() {
    let mut engine = CalibrationEngine::new(CalibrationConfig {
      min_samples: 1,
      rest: RestState {
        magn: None,
        ..RestState::default()
      },
    });
    let mut loaded = CalibrationModel::default();
    loaded.magn.b = Vector3::new(5.0, 6.0, 7.0);
    engine.replace_model(loaded).unwrap();

    engine.start_calibration().unwrap();
    engine.feed(&still(100_000)).unwrap();
    let model = engine.finish_calibration().unwrap();
    assert_eq!(model.magn.b, Vector3::new(5.0, 6.0, 7.0));
    assert_eq!(model.gyro.b, Vector3::new(3.0, -2.0, 1.0));
  }

  #[test]
  fn magnetometer_rest_reading_shifts_its_nulls() {
    let mut engine = CalibrationEngine::new(CalibrationConfig {
      min_samples: 1,
      rest: RestState {
        magn: Some(Vector3::new(10.0, 0.0, -20.0).map(f64::to_radians)),
        ..RestState::default()
      },
    });
    engine.start_calibration().unwrap();
    engine.feed(&still(100_000)).unwrap();
    let model = engine.finish_calibration().unwrap();

    let expected = Vector3::new(110.0, -40.0, 320.0);
    assert!((model.magn.b - expected).norm() < 1e-9);
  }

  #[test]
  fn abort_keeps_the_committed_model() {
    let mut engine = engine(1);
    engine.start_calibration().unwrap();
    engine.feed(&still(100_000)).unwrap();
    let committed = engine.finish_calibration().unwrap();

    engine.start_calibration().unwrap();
    let mut shaken = still(90_000);
    shaken.acc = [900, 900, 900];
    engine.feed(&shaken).unwrap();
    engine.abort_calibration().unwrap();

    assert_eq!(*engine.model(), *committed);
    assert!(!engine.is_calibrating());
  }

  #[test]
  fn snapshots_survive_a_new_commit() {
    let mut engine = engine(1);
    let before = engine.model();

    engine.start_calibration().unwrap();
    engine.feed(&still(100_000)).unwrap();
    engine.finish_calibration().unwrap();

    assert!(before.is_unset());
    assert!(!engine.model().is_unset());
  }

  #[test]
  fn altitude_reference_is_committed_with_the_pressure() {
    let mut engine = engine(1);
    engine.set_altitude_reference(35.0).unwrap();
    engine.start_calibration().unwrap();
    engine.feed(&still(100_800)).unwrap();
    let model = engine.finish_calibration().unwrap();

    assert_eq!(model.z0, 35.0);
    assert_eq!(model.p_z0, 100_800.0);
  }

  #[test]
  fn missing_pressure_keeps_the_old_reference() {
    let mut engine = engine(1);
    engine.start_calibration().unwrap();
    engine.feed(&still(0)).unwrap();
    let model = engine.finish_calibration().unwrap();
    assert_eq!(model.p_z0, P0_DEFAULT);
  }

  #[test]
  fn rejects_unusable_altitude_references() {
    let mut engine = engine(1);
    assert!(engine.set_altitude_reference(f64::NAN).is_err());
    assert!(engine.set_altitude_reference(PRESS_K).is_err());
    assert!(engine.set_altitude_reference(-10.0).is_ok());
  }

  #[test]
  fn replace_rejects_singular_models_and_calibrating_engines() {
    let mut engine = engine(1);
    let mut singular = CalibrationModel::default();
    singular.gyro.tk_inv = Matrix3::zeros();
    assert!(matches!(
      engine.replace_model(singular),
      Err(Error::InvalidArgument(_))
    ));

    engine.start_calibration().unwrap();
    assert!(matches!(
      engine.replace_model(CalibrationModel::default()),
      Err(Error::InvalidState { .. })
    ));
  }
}
