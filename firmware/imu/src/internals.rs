use crate::{
  error::{Error, Result},
  frame::FRAME_SIZE,
};
use serialport::{
  ClearBuffer,
  DataBits,
  FlowControl,
  Parity,
  SerialPort as _,
  StopBits,
  TTYPort,
};
use std::{
  io::{self, Read, Write},
  os::fd::{AsRawFd, RawFd},
  path::{Path, PathBuf},
  time::Duration,
};

pub const DEFAULT_BAUD_RATE: u32 = 115_200;

/// Start, eight data and one stop bit.
const BITS_PER_BYTE: u64 = 10;

/// Floor for the read timeout on fast links.
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

#[derive(Clone, Debug)]
pub struct SerialConfig {
  pub baud_rate: u32,
}

impl Default for SerialConfig {
  fn default() -> Self {
    SerialConfig {
      baud_rate: DEFAULT_BAUD_RATE,
    }
  }
}

impl SerialConfig {
  /// Time one whole frame takes on the wire.
  pub fn frame_time(&self) -> Duration {
    let micros =
      FRAME_SIZE as u64 * BITS_PER_BYTE * 1_000_000 / u64::from(self.baud_rate.max(1));
    Duration::from_micros(micros)
  }

  /// How long a single read may wait for data before giving up.
  pub fn read_timeout(&self) -> Duration {
    self.frame_time().max(MIN_READ_TIMEOUT)
  }
}

impl From<serialport::Error> for Error {
  fn from(err: serialport::Error) -> Self {
    match err.kind() {
      serialport::ErrorKind::InvalidInput => Error::InvalidArgument(err.description),
      serialport::ErrorKind::Io(kind) => Error::Io(io::Error::new(kind, err.description)),
      serialport::ErrorKind::NoDevice => {
        Error::Io(io::Error::new(io::ErrorKind::NotFound, err.description))
      }
      serialport::ErrorKind::Unknown => {
        Error::Io(io::Error::new(io::ErrorKind::Other, err.description))
      }
    }
  }
}

/// Raw 8N1 tty.
///
/// A read waits at most `SerialConfig::read_timeout` for the first byte and
/// reports `TimedOut` when the line stayed idle.
pub struct SerialPort {
  port: TTYPort,
  path: PathBuf,
}

impl SerialPort {
  pub fn open(path: impl AsRef<Path>, config: &SerialConfig) -> Result<Self> {
    if config.baud_rate == 0 {
      return Err(Error::InvalidArgument("baud rate must be positive".to_owned()));
    }

    let path = path.as_ref().to_path_buf();
    let port = serialport::new(path.to_string_lossy(), config.baud_rate)
      .data_bits(DataBits::Eight)
      .parity(Parity::None)
      .stop_bits(StopBits::One)
      .flow_control(FlowControl::None)
      .timeout(config.read_timeout())
      .open_native()?;

    // whatever arrived before configuration is garbage
    port.clear(ClearBuffer::All)?;

    Ok(SerialPort { port, path })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Discards bytes received but not yet read.
  pub fn flush_input(&self) -> Result<()> {
    self.port.clear(ClearBuffer::Input)?;
    Ok(())
  }
}

impl Read for SerialPort {
  fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
    self.port.read(buf)
  }
}

impl Write for SerialPort {
  fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
    self.port.write(buf)
  }

  fn flush(&mut self) -> io::Result<()> {
    self.port.flush()
  }
}

impl AsRawFd for SerialPort {
  fn as_raw_fd(&self) -> RawFd {
    self.port.as_raw_fd()
  }
}
