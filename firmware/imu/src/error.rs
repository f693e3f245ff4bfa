use std::{error, fmt, io};

pub type Result<T> = std::result::Result<T, Error>;

/// Why a frame could not be delimited.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SyncFault {
  /// No INIT marker within the watchdog bound.
  MissingInit { scanned: usize },

  /// The byte where the END marker belongs held something else.
  BadEnd { found: u8 },

  /// A replayed log line could not be parsed as a frame.
  Malformed(String),
}

impl fmt::Display for SyncFault {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      SyncFault::MissingInit { scanned } => {
        write!(f, "no frame start after {scanned} bytes")
      }
      SyncFault::BadEnd { found } => {
        write!(f, "expected frame end, found 0x{found:02x}")
      }
      SyncFault::Malformed(reason) => write!(f, "malformed frame: {reason}"),
    }
  }
}

#[derive(Debug)]
pub enum Error {
  /// The source stalled before a full frame arrived. The stream may still be
  /// healthy, so reading again later is fine.
  Timeout,

  /// Framing is corrupted. The next read must rescan from scratch.
  SyncLost(SyncFault),

  /// Not enough data yet. This is an expected condition, not a fault.
  NotReady,

  /// The operation is forbidden in the current state.
  InvalidState {
    operation: &'static str,
    state: &'static str,
  },

  /// Out of range or otherwise unusable input.
  InvalidArgument(String),

  /// A calibration record could not be loaded.
  CalibrationFile { line: usize, reason: String },

  /// Unexpected OS level failure.
  Io(io::Error),
}

impl Error {
  /// Timeouts and sync loss are fixed by the caller reading again.
  pub fn is_recoverable(&self) -> bool {
    matches!(self, Error::Timeout | Error::SyncLost(_))
  }
}

impl fmt::Display for Error {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Error::Timeout => write!(f, "read timed out"),
      Error::SyncLost(fault) => write!(f, "sync lost - {fault}"),
      Error::NotReady => write!(f, "not enough data available"),
      Error::InvalidState { operation, state } => {
        write!(f, "cannot {operation} while {state}")
      }
      Error::InvalidArgument(reason) => write!(f, "invalid argument: {reason}"),
      Error::CalibrationFile { line, reason } => {
        write!(f, "calibration file line {line}: {reason}")
      }
      Error::Io(err) => write!(f, "IO error: {err}"),
    }
  }
}

impl error::Error for Error {
  fn source(&self) -> Option<&(dyn error::Error + 'static)> {
    match self {
      Error::Io(err) => Some(err),
      _ => None,
    }
  }
}

impl From<io::Error> for Error {
  fn from(err: io::Error) -> Self {
    Error::Io(err)
  }
}

impl From<SyncFault> for Error {
  fn from(fault: SyncFault) -> Self {
    Error::SyncLost(fault)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn only_stream_faults_are_recoverable() {
    assert!(Error::Timeout.is_recoverable());
    assert!(Error::SyncLost(SyncFault::BadEnd { found: 0 }).is_recoverable());
    assert!(!Error::NotReady.is_recoverable());
    assert!(!Error::InvalidState {
      operation: "feed",
      state: "idle"
    }
    .is_recoverable());
    assert!(!Error::InvalidArgument("z0".to_owned()).is_recoverable());
  }

  #[test]
  fn display_names_the_fault() {
    let err = Error::SyncLost(SyncFault::BadEnd { found: 0x41 });
    assert_eq!(err.to_string(), "sync lost - expected frame end, found 0x41");
  }
}
