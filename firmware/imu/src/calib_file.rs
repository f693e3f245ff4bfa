//! Plain text persistence of a `CalibrationModel`.
//!
//! One `key value...` record per line, in a fixed order:
//!
//! ```text
//! acc.tk_inv   9 values, row major
//! acc.b        3 values
//! gyro.tk_inv
//! gyro.b
//! magn.tk_inv
//! magn.b
//! acc.t_off    3 values
//! acc.t_ref
//! gyro.t_off
//! gyro.t_ref
//! z0
//! p_z0
//! estimated    unix seconds and nanoseconds, or '-' if never estimated
//! ```
//!
//! Blank lines and lines starting with `#` are ignored.

use crate::{
  calibration::{CalibrationModel, CalibrationOrigin},
  error::{Error, Result},
};
use nalgebra::{Matrix3, Vector3};
use std::{
  fs::File,
  io::{self, BufRead, BufReader, BufWriter, Write},
  path::Path,
  time::{Duration, SystemTime, UNIX_EPOCH},
};

pub const DEFAULT_CALIB_PATH: &str = "imu_calib.txt";

const KEYS: [(&str, usize); 13] = [
  ("acc.tk_inv", 9),
  ("acc.b", 3),
  ("gyro.tk_inv", 9),
  ("gyro.b", 3),
  ("magn.tk_inv", 9),
  ("magn.b", 3),
  ("acc.t_off", 3),
  ("acc.t_ref", 1),
  ("gyro.t_off", 3),
  ("gyro.t_ref", 1),
  ("z0", 1),
  ("p_z0", 1),
  ("estimated", 2),
];

fn write_record<'a>(
  writer: &mut impl Write,
  key: &str,
  values: impl IntoIterator<Item = &'a f64>,
) -> io::Result<()> {
  write!(writer, "{key}")?;
  for value in values {
    // Display of f64 is the shortest text that parses back to the same bits
    write!(writer, " {value}")?;
  }
  writeln!(writer)
}

fn row_major(matrix: &Matrix3<f64>) -> [f64; 9] {
  let mut values = [0.0; 9];
  for (i, value) in values.iter_mut().enumerate() {
    *value = matrix[(i / 3, i % 3)];
  }
  values
}

pub fn save(model: &CalibrationModel, mut writer: impl Write) -> io::Result<()> {
  writeln!(writer, "# imu calibration")?;
  write_record(&mut writer, "acc.tk_inv", &row_major(&model.acc.tk_inv))?;
  write_record(&mut writer, "acc.b", &model.acc.b)?;
  write_record(&mut writer, "gyro.tk_inv", &row_major(&model.gyro.tk_inv))?;
  write_record(&mut writer, "gyro.b", &model.gyro.b)?;
  write_record(&mut writer, "magn.tk_inv", &row_major(&model.magn.tk_inv))?;
  write_record(&mut writer, "magn.b", &model.magn.b)?;
  write_record(&mut writer, "acc.t_off", &model.acc_t_off)?;
  write_record(&mut writer, "acc.t_ref", [&model.acc_t_ref])?;
  write_record(&mut writer, "gyro.t_off", &model.gyro_t_off)?;
  write_record(&mut writer, "gyro.t_ref", [&model.gyro_t_ref])?;
  write_record(&mut writer, "z0", [&model.z0])?;
  write_record(&mut writer, "p_z0", [&model.p_z0])?;

  let estimated = model
    .estimated_at
    .and_then(|at| at.duration_since(UNIX_EPOCH).ok());
  match estimated {
    Some(since_epoch) => writeln!(
      writer,
      "estimated {} {}",
      since_epoch.as_secs(),
      since_epoch.subsec_nanos()
    )?,
    None => writeln!(writer, "estimated -")?,
  }

  writer.flush()
}

pub fn save_to_path(model: &CalibrationModel, path: impl AsRef<Path>) -> Result<()> {
  let file = File::create(path)?;
  save(model, BufWriter::new(file))?;
  Ok(())
}

fn parse_values(
  line: usize,
  key: &str,
  fields: &[&str],
) -> Result<Vec<f64>> {
  fields
    .iter()
    .map(|field| {
      field.parse::<f64>().map_err(|_| Error::CalibrationFile {
        line,
        reason: format!("'{field}' in {key} is not a number"),
      })
    })
    .collect()
}

fn parse_timestamp(line: usize, fields: &[&str]) -> Result<Option<SystemTime>> {
  let invalid = || Error::CalibrationFile {
    line,
    reason: format!("'{}' is not a valid timestamp", fields.join(" ")),
  };

  let (secs, nanos) = match fields {
    ["-"] => return Ok(None),
    [secs, nanos] => (
      secs.parse::<u64>().map_err(|_| invalid())?,
      nanos.parse::<u32>().map_err(|_| invalid())?,
    ),
    _ => return Err(invalid()),
  };

  if nanos >= 1_000_000_000 {
    return Err(invalid());
  }

  UNIX_EPOCH
    .checked_add(Duration::new(secs, nanos))
    .map(Some)
    .ok_or_else(invalid)
}

/// Reads a model written by `save`.
///
/// The returned model is marked as coming from a file. Nothing is returned
/// unless every record parsed and the model validated.
pub fn load(reader: impl BufRead) -> Result<CalibrationModel> {
  let mut values: Vec<Vec<f64>> = Vec::with_capacity(KEYS.len());
  let mut estimated_at = None;
  let mut last_line = 0;

  for (index, text) in reader.lines().enumerate() {
    let text = text?;
    let line = index + 1;
    last_line = line;

    let text = text.trim();
    if text.is_empty() || text.starts_with('#') {
      continue;
    }

    let Some(&(key, count)) = KEYS.get(values.len()) else {
      return Err(Error::CalibrationFile {
        line,
        reason: format!("unexpected record '{text}'"),
      });
    };

    let fields: Vec<&str> = text.split_whitespace().collect();
    if fields[0] != key {
      return Err(Error::CalibrationFile {
        line,
        reason: format!("expected {key}, found {}", fields[0]),
      });
    }

    if key == "estimated" {
      estimated_at = parse_timestamp(line, &fields[1..])?;
      values.push(Vec::new());
      continue;
    }

    if fields.len() - 1 != count {
      return Err(Error::CalibrationFile {
        line,
        reason: format!("{key} takes {count} values, found {}", fields.len() - 1),
      });
    }

    values.push(parse_values(line, key, &fields[1..])?);
  }

  if let Some((key, _)) = KEYS.get(values.len()) {
    return Err(Error::CalibrationFile {
      line: last_line,
      reason: format!("missing {key}"),
    });
  }

  let matrix = |v: &[f64]| Matrix3::from_row_slice(v);
  let vector = |v: &[f64]| Vector3::from_column_slice(v);

  let mut model = CalibrationModel {
    acc_t_off: vector(&values[6]),
    acc_t_ref: values[7][0],
    gyro_t_off: vector(&values[8]),
    gyro_t_ref: values[9][0],
    z0: values[10][0],
    p_z0: values[11][0],
    origin: CalibrationOrigin::FILE,
    loaded_at: Some(SystemTime::now()),
    estimated_at,
    ..CalibrationModel::default()
  };
  model.acc.tk_inv = matrix(&values[0]);
  model.acc.b = vector(&values[1]);
  model.gyro.tk_inv = matrix(&values[2]);
  model.gyro.b = vector(&values[3]);
  model.magn.tk_inv = matrix(&values[4]);
  model.magn.b = vector(&values[5]);

  if estimated_at.is_some() {
    model.origin |= CalibrationOrigin::ESTIMATED;
  }

  model.validate().map_err(|err| Error::CalibrationFile {
    line: last_line,
    reason: err.to_string(),
  })?;

  Ok(model)
}

pub fn load_from_path(path: impl AsRef<Path>) -> Result<CalibrationModel> {
  load(BufReader::new(File::open(path)?))
}
