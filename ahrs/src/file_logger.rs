//! Background logging of IMU samples to length prefixed postcard files.
//!
//! Each record is a little endian `u64` length followed by the postcard
//! encoding of a `Record`. Files rotate once they exceed the size limit.

use std::{
  fs::{self, File},
  io::{BufWriter, Write},
  path::{Path, PathBuf},
  sync::mpsc::{self, TrySendError},
  thread,
  time::{Duration, Instant},
};

use common::comm::ahrs::DataPoint;
use imu::RawSample;
use jeflog::{fail, warn};
use serde::{Deserialize, Serialize};

/// One logged sample.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Record {
  /// Frame as read from the IMU, in counts.
  Raw(RawSample),

  /// The same frame in physical units.
  Data(DataPoint),

  /// Output of the smoothing filter.
  Filtered(DataPoint),
}

/// Configuration for the file logger
#[derive(Clone, Debug)]
pub struct LoggerConfig {
  /// Whether file logging is enabled
  pub enabled: bool,
  /// Directory where log files are stored
  pub log_dir: PathBuf,
  /// Maximum number of records to buffer in the channel
  pub channel_capacity: usize,
  /// Number of records to batch before writing
  pub batch_size: usize,
  /// Maximum time to wait before flushing a batch (even if not full)
  pub batch_timeout: Duration,
  /// Maximum file size in bytes before rotation
  pub file_size_limit: usize,
}

impl Default for LoggerConfig {
  fn default() -> Self {
    Self {
      enabled: false,
      log_dir: default_log_dir(),
      // three records per frame at 100 Hz
      channel_capacity: 300,
      batch_size: 150,
      batch_timeout: Duration::from_millis(500),
      file_size_limit: 100 * 1024 * 1024, // 100MB
    }
  }
}

fn default_log_dir() -> PathBuf {
  std::env::var("HOME")
    .map(PathBuf::from)
    .unwrap_or_else(|_| PathBuf::from("."))
    .join("ahrs_imu_logs")
}

/// Error types for file logger operations
#[derive(Debug)]
pub enum LoggerError {
  IoError(std::io::Error),
  SerializationError(postcard::Error),
  ChannelSendError,
}

impl From<std::io::Error> for LoggerError {
  fn from(err: std::io::Error) -> Self {
    LoggerError::IoError(err)
  }
}

impl From<postcard::Error> for LoggerError {
  fn from(err: postcard::Error) -> Self {
    LoggerError::SerializationError(err)
  }
}

impl std::fmt::Display for LoggerError {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match self {
      LoggerError::IoError(e) => write!(f, "IO error: {}", e),
      LoggerError::SerializationError(e) => {
        write!(f, "Serialization error: {}", e)
      }
      LoggerError::ChannelSendError => {
        write!(f, "Failed to send to logging channel")
      }
    }
  }
}

impl std::error::Error for LoggerError {}

/// Writes records on a background thread so the acquisition loop never waits
/// on the disk.
pub struct FileLogger {
  sender: mpsc::SyncSender<Record>,
  handle: Option<thread::JoinHandle<()>>,
  dropped: usize,
}

impl FileLogger {
  pub fn new(config: LoggerConfig) -> Result<Self, LoggerError> {
    let (sender, receiver) = mpsc::sync_channel(config.channel_capacity);

    if !config.enabled {
      let handle = thread::spawn(move || while receiver.recv().is_ok() {});
      return Ok(Self {
        sender,
        handle: Some(handle),
        dropped: 0,
      });
    }

    fs::create_dir_all(&config.log_dir)?;
    let file_path = create_log_file_path(&config.log_dir);

    let handle = thread::spawn(move || {
      Writer::new(config, file_path).run(receiver);
    });

    Ok(Self {
      sender,
      handle: Some(handle),
      dropped: 0,
    })
  }

  /// Queues a record. Never blocks; a full channel drops the record.
  pub fn log(&mut self, record: Record) -> Result<(), LoggerError> {
    match self.sender.try_send(record) {
      Ok(()) => Ok(()),
      Err(TrySendError::Full(_)) => {
        self.dropped += 1;
        Err(LoggerError::ChannelSendError)
      }
      Err(TrySendError::Disconnected(_)) => Err(LoggerError::ChannelSendError),
    }
  }

  /// Records lost to a full channel so far.
  pub fn dropped(&self) -> usize {
    self.dropped
  }

  /// Flushes everything still queued and stops the writer thread.
  pub fn shutdown(self) -> Result<(), LoggerError> {
    drop(self.sender);

    if let Some(handle) = self.handle {
      handle.join().map_err(|_| {
        LoggerError::IoError(std::io::Error::new(
          std::io::ErrorKind::Other,
          "Logger thread panicked",
        ))
      })?;
    }

    Ok(())
  }
}

/// State owned by the background thread.
struct Writer {
  config: LoggerConfig,
  path: PathBuf,
  file: Option<BufWriter<File>>,
  file_size: usize,
  batch: Vec<Record>,
}

impl Writer {
  fn new(config: LoggerConfig, path: PathBuf) -> Self {
    Writer {
      batch: Vec::with_capacity(config.batch_size),
      config,
      path,
      file: None,
      file_size: 0,
    }
  }

  fn run(mut self, receiver: mpsc::Receiver<Record>) {
    let mut last_flush = Instant::now();

    loop {
      let due = last_flush.elapsed() >= self.config.batch_timeout
        || self.batch.len() >= self.config.batch_size;

      let timeout = if due {
        Duration::ZERO
      } else {
        self.config.batch_timeout - last_flush.elapsed()
      };

      match receiver.recv_timeout(timeout) {
        Ok(record) => self.batch.push(record),
        Err(mpsc::RecvTimeoutError::Timeout) => {}
        Err(mpsc::RecvTimeoutError::Disconnected) => break,
      }

      if due && !self.batch.is_empty() {
        self.write_batch();
        last_flush = Instant::now();
      }

      if self.file_size >= self.config.file_size_limit {
        self.rotate();
      }
    }

    if !self.batch.is_empty() {
      self.write_batch();
    }

    if let Some(writer) = self.file.as_mut() {
      let _ = writer.flush();
    }
  }

  fn write_batch(&mut self) {
    if self.file.is_none() {
      match open_file(&self.path) {
        Ok(file) => self.file = Some(file),
        Err(e) => {
          fail!("Failed to open log file {}: {e}", self.path.display());
          self.batch.clear();
          return;
        }
      }
    }

    let Some(writer) = self.file.as_mut() else {
      return;
    };

    for record in self.batch.drain(..) {
      let serialized = match postcard::to_allocvec(&record) {
        Ok(serialized) => serialized,
        Err(e) => {
          warn!("Failed to serialize record: {e}");
          continue;
        }
      };

      let len = serialized.len() as u64;
      let written = writer
        .write_all(&len.to_le_bytes())
        .and_then(|_| writer.write_all(&serialized));

      match written {
        Ok(()) => self.file_size += 8 + serialized.len(),
        Err(e) => warn!("Failed to write record: {e}"),
      }
    }

    if let Err(e) = writer.flush() {
      warn!("Failed to flush log file: {e}");
    }
  }

  fn rotate(&mut self) {
    if let Some(mut writer) = self.file.take() {
      let _ = writer.flush();
    }

    let mut path = create_log_file_path(&self.config.log_dir);
    // rotation can happen within the same second as the previous file
    if path == self.path {
      path.set_extension(format!("{}.postcard", self.file_size));
    }

    self.path = path;
    self.file_size = 0;
  }
}

fn open_file(path: &Path) -> Result<BufWriter<File>, std::io::Error> {
  let file = File::create(path)?;
  Ok(BufWriter::with_capacity(256 * 1024, file)) // 256KB buffer
}

/// Create a log file path with current timestamp
fn create_log_file_path(log_dir: &Path) -> PathBuf {
  use chrono::Local;

  let now = Local::now();
  let timestamp_str = now.format("%Y%m%d_%H%M%S").to_string();
  let filename = format!("ahrs_imu_data_{}.postcard", timestamp_str);
  log_dir.join(filename)
}

/// Splits a log file back into records.
pub fn read_records(bytes: &[u8]) -> Result<Vec<Record>, LoggerError> {
  let mut records = Vec::new();
  let mut rest = bytes;

  while rest.len() >= 8 {
    let (len, tail) = rest.split_at(8);
    let mut prefix = [0; 8];
    prefix.copy_from_slice(len);
    let len = u64::from_le_bytes(prefix) as usize;

    if tail.len() < len {
      return Err(postcard::Error::DeserializeUnexpectedEnd.into());
    }

    let (record, tail) = tail.split_at(len);
    records.push(postcard::from_bytes(record)?);
    rest = tail;
  }

  Ok(records)
}
