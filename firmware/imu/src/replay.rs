use crate::{
  error::{Error, Result},
  frame::RawSample,
  sync::FrameSource,
};
use std::{
  fs::File,
  io::{BufRead, BufReader, ErrorKind},
  os::fd::{AsRawFd, RawFd},
  path::Path,
  time::SystemTime,
};

/// Plays back a raw log written one `RawSample` per line, standing in for
/// the serial device when no hardware is attached.
pub struct AsciiReplay<B> {
  reader: B,
  line: String,
  frames_read: u64,
}

impl AsciiReplay<BufReader<File>> {
  pub fn open(path: impl AsRef<Path>) -> Result<Self> {
    Ok(AsciiReplay::new(BufReader::new(File::open(path)?)))
  }
}

impl<B: BufRead> AsciiReplay<B> {
  pub fn new(reader: B) -> Self {
    AsciiReplay {
      reader,
      line: String::new(),
      frames_read: 0,
    }
  }

  pub fn frames_read(&self) -> u64 {
    self.frames_read
  }
}

impl<B: BufRead> FrameSource for AsciiReplay<B> {
  fn read_frame(&mut self) -> Result<RawSample> {
    loop {
      self.line.clear();
      match self.reader.read_line(&mut self.line) {
        // end of log looks like a stalled stream
        Ok(0) => return Err(Error::Timeout),
        Ok(_) => {}
        Err(err) if err.kind() == ErrorKind::WouldBlock => {
          return Err(Error::Timeout)
        }
        Err(err) => return Err(err.into()),
      }

      let line = self.line.trim();
      if line.is_empty() || line.starts_with('#') {
        continue;
      }

      let sample =
        RawSample::parse_log_line(line, SystemTime::now(), self.frames_read)?;
      self.frames_read += 1;
      return Ok(sample);
    }
  }
}

impl AsRawFd for AsciiReplay<BufReader<File>> {
  fn as_raw_fd(&self) -> RawFd {
    self.reader.get_ref().as_raw_fd()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::Cursor;

  #[test]
  fn replays_lines_and_skips_comments() {
    let log = "# imu raw log\n\
               \n\
               10000\t1\t2\t3\t4\t5\t6\t7\t8\t9\t250\t101325\n\
               9990\t0\t0\t0\t0\t0\t0\t0\t0\t0\t251\t101300\n";
    let mut replay = AsciiReplay::new(Cursor::new(log));

    let first = replay.read_frame().unwrap();
    assert_eq!(first.acc, [1, 2, 3]);
    assert_eq!(first.pres, 101_325);
    assert_eq!(first.sequence, 0);

    let second = replay.read_frame().unwrap();
    assert_eq!(second.t_us, 9990);
    assert_eq!(second.sequence, 1);

    assert!(matches!(replay.read_frame(), Err(Error::Timeout)));
  }

  #[test]
  fn bad_line_loses_sync_but_replay_continues() {
    let log = "garbage\n10000\t1\t2\t3\t4\t5\t6\t7\t8\t9\t250\t101325\n";
    let mut replay = AsciiReplay::new(Cursor::new(log));

    assert!(matches!(replay.read_frame(), Err(Error::SyncLost(_))));
    assert_eq!(replay.read_frame().unwrap().magn, [7, 8, 9]);
    assert_eq!(replay.frames_read(), 1);
  }
}
