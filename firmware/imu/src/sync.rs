use crate::{
  error::{Error, Result, SyncFault},
  frame::{
    RawSample,
    FRAME_END_MARKER,
    FRAME_INIT_MARKER,
    FRAME_SIZE,
    SENSOR_BLOCK_SIZE,
    TIME_FIELD_SIZE,
  },
};
use std::{
  io::{ErrorKind, Read},
  os::fd::{AsRawFd, RawFd},
  time::SystemTime,
};

/// Anything that can hand out one raw frame per call.
pub trait FrameSource {
  /// Reads the next frame. Callers are expected to have checked readiness of
  /// the underlying descriptor first, so this never blocks for long.
  fn read_frame(&mut self) -> Result<RawSample>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
  fn read_frame(&mut self) -> Result<RawSample> {
    (**self).read_frame()
  }
}

/// A frame source backed by a descriptor that can be polled for readiness.
pub trait PollableSource: FrameSource + AsRawFd {}

impl<T: FrameSource + AsRawFd> PollableSource for T {}

/// Framing parameters of the byte stream.
#[derive(Clone, Debug)]
pub struct SyncConfig {
  pub init_marker: u8,

  /// Some firmware builds alternate between two INIT markers. When set,
  /// either one starts a frame.
  pub alternate_init_marker: Option<u8>,

  pub end_marker: u8,

  /// Empty reads tolerated per call before reporting `Timeout`. A partly
  /// read frame is kept, so the next call picks up where this one stopped.
  pub read_retries: usize,

  /// Bytes scanned for an INIT marker before declaring sync lost.
  pub sync_watchdog: usize,
}

impl Default for SyncConfig {
  fn default() -> Self {
    SyncConfig {
      init_marker: FRAME_INIT_MARKER,
      alternate_init_marker: None,
      end_marker: FRAME_END_MARKER,
      read_retries: 1,
      sync_watchdog: FRAME_SIZE,
    }
  }
}

/// Recovers frame boundaries from a raw byte stream.
///
/// Bytes of an unfinished frame are buffered across calls, so a source that
/// delivers a frame in several chunks loses nothing.
pub struct FrameSynchronizer<R> {
  reader: R,
  config: SyncConfig,
  frames_read: u64,
  sync_failures: u64,

  pending: [u8; FRAME_SIZE],
  filled: usize,
  /// Bytes discarded while looking for the current INIT marker.
  scanned: usize,
  received_at: Option<SystemTime>,
}

impl<R: Read> FrameSynchronizer<R> {
  pub fn new(reader: R, config: SyncConfig) -> Self {
    FrameSynchronizer {
      reader,
      config,
      frames_read: 0,
      sync_failures: 0,
      pending: [0; FRAME_SIZE],
      filled: 0,
      scanned: 0,
      received_at: None,
    }
  }

  /// Frames delivered so far.
  pub fn frames_read(&self) -> u64 {
    self.frames_read
  }

  /// Times the stream had to be rescanned.
  pub fn sync_failures(&self) -> u64 {
    self.sync_failures
  }

  /// Bytes of the frame in progress, INIT marker included.
  pub fn buffered(&self) -> usize {
    self.filled
  }

  pub fn config(&self) -> &SyncConfig {
    &self.config
  }

  pub fn get_ref(&self) -> &R {
    &self.reader
  }

  pub fn get_mut(&mut self) -> &mut R {
    &mut self.reader
  }

  /// Reads into `buf`, allowing `retries` empty reads. Zero means the source
  /// had nothing to give.
  fn read_some(reader: &mut R, buf: &mut [u8], retries: usize) -> Result<usize> {
    for _ in 0..retries.max(1) {
      match reader.read(buf) {
        Ok(0) => continue,
        Ok(count) => return Ok(count),
        Err(err)
          if matches!(
            err.kind(),
            ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted
          ) =>
        {
          continue
        }
        Err(err) => return Err(err.into()),
      }
    }

    Ok(0)
  }

  fn is_init_marker(&self, byte: u8) -> bool {
    byte == self.config.init_marker
      || Some(byte) == self.config.alternate_init_marker
  }

  fn scan_for_init(&mut self) -> Result<()> {
    while self.scanned < self.config.sync_watchdog {
      let mut byte = [0; 1];
      if Self::read_some(&mut self.reader, &mut byte, self.config.read_retries)? == 0 {
        return Err(Error::Timeout);
      }

      if self.is_init_marker(byte[0]) {
        self.pending[0] = byte[0];
        self.filled = 1;
        self.scanned = 0;
        return Ok(());
      }

      self.scanned += 1;
    }

    self.scanned = 0;
    self.sync_failures += 1;
    Err(
      SyncFault::MissingInit {
        scanned: self.config.sync_watchdog,
      }
      .into(),
    )
  }

  /// Reads the rest of the frame, stopping early when the source runs dry.
  fn fill_frame(&mut self) -> Result<()> {
    while self.filled < FRAME_SIZE {
      let buf = &mut self.pending[self.filled..];
      let count = Self::read_some(&mut self.reader, buf, self.config.read_retries)?;
      if count == 0 {
        return Err(Error::Timeout);
      }

      self.filled += count;

      // stamped on reception of the frame, not of its individual fields
      if self.received_at.is_none() && self.filled > TIME_FIELD_SIZE {
        self.received_at = Some(SystemTime::now());
      }
    }

    Ok(())
  }

  /// Decodes the completed frame and clears it for the next one.
  fn take_frame(&mut self) -> Result<RawSample> {
    let frame = self.pending;
    let timestamp = self.received_at.take().unwrap_or_else(SystemTime::now);
    self.filled = 0;

    let end = frame[FRAME_SIZE - 1];
    if end != self.config.end_marker {
      self.sync_failures += 1;
      return Err(SyncFault::BadEnd { found: end }.into());
    }

    let t_us = u16::from_le_bytes([frame[1], frame[2]]);
    let mut block = [0; SENSOR_BLOCK_SIZE];
    block.copy_from_slice(&frame[1 + TIME_FIELD_SIZE..FRAME_SIZE - 1]);

    let sample =
      RawSample::from_fields(t_us, &block, timestamp, self.frames_read);
    self.frames_read += 1;
    Ok(sample)
  }
}

impl<R: Read> FrameSource for FrameSynchronizer<R> {
  fn read_frame(&mut self) -> Result<RawSample> {
    if self.filled == 0 {
      self.scan_for_init()?;
    }

    self.fill_frame()?;
    self.take_frame()
  }
}

impl<R: AsRawFd> AsRawFd for FrameSynchronizer<R> {
  fn as_raw_fd(&self) -> RawFd {
    self.reader.as_raw_fd()
  }
}
