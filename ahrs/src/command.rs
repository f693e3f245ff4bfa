use common::comm::ahrs::Command;
use imu::{calib_file::DEFAULT_CALIB_PATH, FrameSource, ImuComm};
use jeflog::{fail, pass, warn};
use std::{
  io,
  os::fd::RawFd,
  sync::atomic::{AtomicBool, Ordering},
  time::Duration,
};

static INTERRUPTED: AtomicBool = AtomicBool::new(false);

extern "C" fn on_interrupt(_signal: libc::c_int) {
  INTERRUPTED.store(true, Ordering::SeqCst);
}

/// Routes Ctrl-C into a flag checked by the run loop.
pub fn install_interrupt_handler() -> io::Result<()> {
  let handler = on_interrupt as extern "C" fn(libc::c_int);

  // SAFETY: the handler only stores to an atomic, which is signal safe.
  let previous = unsafe { libc::signal(libc::SIGINT, handler as libc::sighandler_t) };
  if previous == libc::SIG_ERR {
    return Err(io::Error::last_os_error());
  }

  Ok(())
}

pub fn interrupted() -> bool {
  INTERRUPTED.load(Ordering::SeqCst)
}

/// Which descriptors have data waiting.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Readiness {
  pub imu: bool,
  pub stdin: bool,
}

/// Waits until the IMU or stdin is readable, or the timeout passes.
///
/// A signal arriving during the wait is reported as nothing being ready.
pub fn poll_inputs(
  imu: RawFd,
  stdin: Option<RawFd>,
  timeout: Duration,
) -> io::Result<Readiness> {
  let mut fds = vec![libc::pollfd {
    fd: imu,
    events: libc::POLLIN,
    revents: 0,
  }];

  if let Some(fd) = stdin {
    fds.push(libc::pollfd {
      fd,
      events: libc::POLLIN,
      revents: 0,
    });
  }

  let timeout = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;

  // SAFETY: fds is a live, correctly sized array of pollfd for the call.
  let status =
    unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout) };

  if status < 0 {
    let error = io::Error::last_os_error();
    return match error.kind() {
      io::ErrorKind::Interrupted => Ok(Readiness::default()),
      _ => Err(error),
    };
  }

  // a hung up descriptor is readable too, its read reports the end
  let readable = |fd: &libc::pollfd| fd.revents & (libc::POLLIN | libc::POLLHUP) != 0;

  Ok(Readiness {
    imu: readable(&fds[0]),
    stdin: fds.get(1).is_some_and(readable),
  })
}

/// Maps an operator key press to a command.
pub fn parse_key(line: &str) -> Option<Command> {
  match line.trim().chars().next()? {
    'q' | 'Q' => Some(Command::Quit),
    'c' | 'C' => Some(Command::Calibrate),
    'a' | 'A' => Some(Command::AbortCalibration),
    's' | 'S' => Some(Command::ShowCalibration),
    'w' | 'W' => Some(Command::SaveCalibration),
    _ => None,
  }
}

pub fn print_help() {
  println!("keys: [c]alibrate, [a]bort calibration, [s]how, [w]rite, [q]uit");
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Flow {
  Continue,
  Quit,
}

/// Runs an operator command against the IMU. Failures are reported and
/// never end the session.
pub fn execute<S: FrameSource>(command: Command, imu: &mut ImuComm<S>) -> Flow {
  let outcome = match command {
    Command::Quit => return Flow::Quit,
    Command::Calibrate => imu.calibration_start(),
    Command::AbortCalibration => imu.calibration_abort(),
    Command::ShowCalibration => {
      println!("{}", imu.calibration());
      Ok(())
    }
    Command::SaveCalibration => imu.calib_save(DEFAULT_CALIB_PATH),
  };

  match outcome {
    Ok(()) if command == Command::ShowCalibration => {}
    Ok(()) => pass!("Command '{command}' done."),
    Err(error) if error.is_recoverable() => warn!("Command '{command}' failed: {error}"),
    Err(error) => fail!("Command '{command}' failed: {error}"),
  }

  Flow::Continue
}

#[cfg(test)]
mod tests {
  use super::*;
  use imu::{CalibrationConfig, Error, RawSample, Result};

  struct Silent;

  impl FrameSource for Silent {
    fn read_frame(&mut self) -> Result<RawSample> {
      Err(Error::Timeout)
    }
  }

  #[test]
  fn keys_map_to_commands() {
    assert_eq!(parse_key("q\n"), Some(Command::Quit));
    assert_eq!(parse_key("  C"), Some(Command::Calibrate));
    assert_eq!(parse_key("a"), Some(Command::AbortCalibration));
    assert_eq!(parse_key("show"), Some(Command::ShowCalibration));
    assert_eq!(parse_key("w"), Some(Command::SaveCalibration));
    assert_eq!(parse_key("x"), None);
    assert_eq!(parse_key("\n"), None);
  }

  #[test]
  fn commands_drive_the_calibration_engine() {
    let mut imu = ImuComm::new(Silent, CalibrationConfig::default());

    assert_eq!(execute(Command::Calibrate, &mut imu), Flow::Continue);
    assert!(imu.calibration_engine().is_calibrating());

    // a second start is refused but the session goes on
    assert_eq!(execute(Command::Calibrate, &mut imu), Flow::Continue);

    assert_eq!(execute(Command::AbortCalibration, &mut imu), Flow::Continue);
    assert!(!imu.calibration_engine().is_calibrating());

    assert_eq!(execute(Command::Quit, &mut imu), Flow::Quit);
  }

  #[test]
  fn poll_reports_a_readable_pipe() -> anyhow::Result<()> {
    let mut fds = [0; 2];
    // SAFETY: fds has room for the two descriptors pipe writes.
    assert_eq!(unsafe { libc::pipe(fds.as_mut_ptr()) }, 0);
    let [read_end, write_end] = fds;

    let idle = poll_inputs(read_end, None, Duration::from_millis(10))?;
    assert_eq!(idle, Readiness::default());

    // SAFETY: write_end is open and the buffer outlives the call.
    assert_eq!(unsafe { libc::write(write_end, b"x".as_ptr().cast(), 1) }, 1);
    let ready = poll_inputs(read_end, None, Duration::from_millis(10))?;
    assert!(ready.imu);
    assert!(!ready.stdin);

    // SAFETY: both descriptors came from pipe above and are closed once.
    unsafe {
      libc::close(read_end);
      libc::close(write_end);
    }
    Ok(())
  }
}
