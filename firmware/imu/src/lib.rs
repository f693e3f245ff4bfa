//! Acquisition pipeline for the serial IMU: frame synchronization, a ring of
//! raw frames, null calibration, conversion to physical units and FIR
//! smoothing.

pub mod calib_file;
pub mod calibration;
pub mod convert;
mod driver;
pub mod error;
pub mod filter;
pub mod frame;
mod internals;
pub mod replay;
pub mod ring;
pub mod sync;

pub use calibration::{
  CalibrationConfig,
  CalibrationEngine,
  CalibrationModel,
  CalibrationOrigin,
  CalibrationStatus,
  RestState,
};
pub use convert::{Converter, PhysicalSample};
pub use driver::*;
pub use error::{Error, Result};
pub use filter::FirFilter;
pub use frame::RawSample;
pub use internals::{SerialConfig, SerialPort, DEFAULT_BAUD_RATE};
pub use replay::AsciiReplay;
pub use ring::SampleRing;
pub use sync::{FrameSource, FrameSynchronizer, PollableSource, SyncConfig};
