//! Wire layout of a single IMU frame.
//!
//! ```text
//!   [1b: init 'A'] [2b: T_us] [3 x 2b: acc] [3 x 2b: gyro] [3 x 2b: magn]
//!   [2b: temp] [4b: pressure] [1b: end 'Z']
//! ```
//!
//! There are no separators, every field is positional and little endian.

use crate::error::{Result, SyncFault};
use serde::{Deserialize, Serialize};
use std::{
  fmt,
  time::{SystemTime, UNIX_EPOCH},
};

pub const FRAME_INIT_MARKER: u8 = b'A';
pub const FRAME_INIT_MARKER_ALT: u8 = b'C';
pub const FRAME_END_MARKER: u8 = b'Z';

/// Bytes between the markers.
pub const PAYLOAD_SIZE: usize = 26;
pub const FRAME_SIZE: usize = PAYLOAD_SIZE + 2;

/// Size of the time delta field, read on its own so the frame can be stamped
/// as soon as it starts arriving.
pub const TIME_FIELD_SIZE: usize = 2;
pub const SENSOR_BLOCK_SIZE: usize = PAYLOAD_SIZE - TIME_FIELD_SIZE;

/// Nominal sampling period of the IMU firmware.
pub const TS_DEFAULT_US: u16 = 10_000;

/// Channels printed per raw log line.
pub const LOG_COLUMNS: usize = 12;

/// One frame as delivered by the IMU, still in ADC counts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawSample {
  /// Time since the previous sample, in microseconds.
  pub t_us: u16,
  pub acc: [i16; 3],
  pub gyro: [i16; 3],
  pub magn: [i16; 3],
  /// Tenths of a degree Celsius.
  pub temp: u16,
  /// Pascal.
  pub pres: u32,
  /// Wall clock time at which the frame started arriving.
  pub timestamp: SystemTime,
  /// Arrival order, assigned by the frame source.
  pub sequence: u64,
}

impl Default for RawSample {
  fn default() -> Self {
    RawSample {
      t_us: 0,
      acc: [0; 3],
      gyro: [0; 3],
      magn: [0; 3],
      temp: 0,
      pres: 0,
      timestamp: UNIX_EPOCH,
      sequence: 0,
    }
  }
}

fn read_i16(bytes: &[u8], at: usize) -> i16 {
  i16::from_le_bytes([bytes[at], bytes[at + 1]])
}

fn read_axes(bytes: &[u8], at: usize) -> [i16; 3] {
  [
    read_i16(bytes, at),
    read_i16(bytes, at + 2),
    read_i16(bytes, at + 4),
  ]
}

impl RawSample {
  /// Decodes the sensor block that follows the time field.
  pub(crate) fn from_fields(
    t_us: u16,
    block: &[u8; SENSOR_BLOCK_SIZE],
    timestamp: SystemTime,
    sequence: u64,
  ) -> RawSample {
    RawSample {
      t_us,
      acc: read_axes(block, 0),
      gyro: read_axes(block, 6),
      magn: read_axes(block, 12),
      temp: u16::from_le_bytes([block[18], block[19]]),
      pres: u32::from_le_bytes([block[20], block[21], block[22], block[23]]),
      timestamp,
      sequence,
    }
  }

  /// Encodes the sample with the default markers, as the IMU would send it.
  pub fn to_frame_bytes(&self) -> [u8; FRAME_SIZE] {
    let mut frame = [0; FRAME_SIZE];
    frame[0] = FRAME_INIT_MARKER;
    frame[1..3].copy_from_slice(&self.t_us.to_le_bytes());

    let axes = self.acc.iter().chain(&self.gyro).chain(&self.magn);
    for (index, value) in axes.enumerate() {
      let at = 3 + 2 * index;
      frame[at..at + 2].copy_from_slice(&value.to_le_bytes());
    }

    frame[21..23].copy_from_slice(&self.temp.to_le_bytes());
    frame[23..27].copy_from_slice(&self.pres.to_le_bytes());
    frame[FRAME_SIZE - 1] = FRAME_END_MARKER;
    frame
  }

  /// Parses one line written by the `Display` impl.
  pub fn parse_log_line(
    line: &str,
    timestamp: SystemTime,
    sequence: u64,
  ) -> Result<RawSample> {
    let columns: Vec<&str> = line.split_whitespace().collect();
    if columns.len() != LOG_COLUMNS {
      return Err(
        SyncFault::Malformed(format!(
          "expected {LOG_COLUMNS} columns, found {}",
          columns.len()
        ))
        .into(),
      );
    }

    fn column<T: std::str::FromStr>(
      columns: &[&str],
      index: usize,
    ) -> std::result::Result<T, SyncFault> {
      columns[index].parse().map_err(|_| {
        SyncFault::Malformed(format!(
          "column {index} holds '{}'",
          columns[index]
        ))
      })
    }

    Ok(RawSample {
      t_us: column(&columns, 0)?,
      acc: [
        column(&columns, 1)?,
        column(&columns, 2)?,
        column(&columns, 3)?,
      ],
      gyro: [
        column(&columns, 4)?,
        column(&columns, 5)?,
        column(&columns, 6)?,
      ],
      magn: [
        column(&columns, 7)?,
        column(&columns, 8)?,
        column(&columns, 9)?,
      ],
      temp: column(&columns, 10)?,
      pres: column(&columns, 11)?,
      timestamp,
      sequence,
    })
  }
}

impl fmt::Display for RawSample {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.t_us)?;
    for value in self.acc.iter().chain(&self.gyro).chain(&self.magn) {
      write!(f, "\t{value}")?;
    }
    write!(f, "\t{}\t{}", self.temp, self.pres)
  }
}
