use std::{
  io::{self, BufRead},
  os::fd::{AsRawFd, RawFd},
  path::PathBuf,
  process,
  time::{Duration, Instant},
};

use crate::{
  command::{self, Flow},
  file_logger::{FileLogger, LoggerConfig, Record},
};
use common::{comm::ahrs::DataPoint, ToPrettyString};
use imu::{
  Error,
  ImuComm,
  ImuConfig,
  PollableSource,
  ReadEvent,
  ReplayImu,
  SerialImu,
};
use jeflog::{fail, pass, task, warn};

/// Wait per poll of the IMU and stdin.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// Consecutive empty waits or reads before giving up on the IMU.
const WAIT_COUNTER_MAX: usize = 10;

/// How often the filtered state is printed.
const REPORT_PERIOD: Duration = Duration::from_secs(1);

type Imu = ImuComm<Box<dyn PollableSource>>;

/// Where frames come from.
#[derive(Clone, Debug)]
pub enum Input {
  Device(PathBuf),
  Replay(PathBuf),
}

pub enum State {
  Init(InitData),
  Run(RunData),
  Exit(ExitData),
}

pub struct InitData {
  pub input: Input,
  pub imu_config: ImuConfig,
  pub calibration_file: Option<PathBuf>,
  pub z0: Option<f64>,
  pub logger_config: LoggerConfig,
}

pub struct RunData {
  imu: Imu,
  logger: Option<FileLogger>,
  replay: bool,
  stdin_open: bool,
  idle_count: usize,
  sync_faults: u64,
  last_report: Instant,
}

pub struct ExitData {
  logger: Option<FileLogger>,
  code: i32,
}

impl State {
  pub fn next(self) -> Self {
    match self {
      State::Init(data) => init(data),

      State::Run(data) => run(data),

      State::Exit(data) => exit(data),
    }
  }
}

fn open(input: &Input, config: ImuConfig) -> imu::Result<Imu> {
  match input {
    Input::Device(path) => Ok(SerialImu::open(path, config)?.boxed()),
    Input::Replay(path) => {
      Ok(ReplayImu::replay(path, config.calibration)?.boxed())
    }
  }
}

fn init(data: InitData) -> State {
  if let Err(e) = command::install_interrupt_handler() {
    warn!("Could not install the Ctrl-C handler: {e}");
  }

  let mut imu = match open(&data.input, data.imu_config) {
    Ok(imu) => imu,
    Err(e) => {
      fail!("Failed to start the IMU: {e}");
      return State::Exit(ExitData {
        logger: None,
        code: 1,
      });
    }
  };

  if let Some(path) = &data.calibration_file {
    if let Err(e) = imu.calib_load(path) {
      warn!("Ignoring calibration file {}: {e}", path.display());
    }
  }

  if let Some(z0) = data.z0 {
    if let Err(e) = imu.set_z0(z0) {
      warn!("Ignoring altitude reference: {e}");
    }
  }

  if !imu.calib_estim() {
    if let Err(e) = imu.calibration_start() {
      warn!("Could not start calibration: {e}");
    }
  }

  let logger = if data.logger_config.enabled {
    task!("Logging to {}...", data.logger_config.log_dir.display());
    match FileLogger::new(data.logger_config) {
      Ok(logger) => {
        pass!("File logger running.");
        Some(logger)
      }
      Err(e) => {
        fail!("Failed to start file logger, continuing without: {e}");
        None
      }
    }
  } else {
    None
  };

  command::print_help();

  State::Run(RunData {
    imu,
    logger,
    replay: matches!(data.input, Input::Replay(_)),
    stdin_open: true,
    idle_count: 0,
    sync_faults: 0,
    last_report: Instant::now(),
  })
}

fn log(logger: &mut Option<FileLogger>, record: Record) {
  if let Some(logger) = logger {
    // a full channel drops the record, counted by the logger
    let _ = logger.log(record);
  }
}

/// Drains unread frames into the log and reports the filtered state.
fn publish(data: &mut RunData) {
  while let Ok(raw) = data.imu.get_raw_unread() {
    log(&mut data.logger, Record::Raw(raw));
  }

  if let Ok(sample) = data.imu.get_data_latest() {
    log(&mut data.logger, Record::Data(DataPoint::from(&sample)));
  }

  if !data.imu.filter_ready() {
    return;
  }

  let Ok(filtered) = data.imu.get_filtered_unread() else {
    return;
  };

  let point = DataPoint::from(&filtered);
  log(&mut data.logger, Record::Filtered(point));

  if data.last_report.elapsed() >= REPORT_PERIOD {
    println!("{}\n", point.to_pretty_string());
    data.last_report = Instant::now();
  }
}

fn stop(data: RunData, code: i32) -> State {
  if data.sync_faults > 0 {
    warn!("Lost frame sync {} times.", data.sync_faults);
  }

  if let Some(logger) = &data.logger {
    if logger.dropped() > 0 {
      warn!("Dropped {} log records.", logger.dropped());
    }
  }

  State::Exit(ExitData {
    logger: data.logger,
    code,
  })
}

/// Counts an empty wait or read, ending the run once the IMU went quiet.
fn idle(mut data: RunData) -> State {
  data.idle_count += 1;

  if data.idle_count >= WAIT_COUNTER_MAX && data.replay {
    pass!("Replay finished.");
    return stop(data, 0);
  }

  if data.idle_count >= WAIT_COUNTER_MAX {
    fail!("No data from the IMU after {WAIT_COUNTER_MAX} attempts.");
    return stop(data, 1);
  }

  State::Run(data)
}

fn read_stdin(data: &mut RunData) -> Flow {
  let mut line = String::new();
  match io::stdin().lock().read_line(&mut line) {
    Ok(0) => {
      data.stdin_open = false;
      Flow::Continue
    }
    Ok(_) => match command::parse_key(&line) {
      Some(command) => command::execute(command, &mut data.imu),
      None => {
        command::print_help();
        Flow::Continue
      }
    },
    Err(e) => {
      warn!("Failed to read stdin: {e}");
      data.stdin_open = false;
      Flow::Continue
    }
  }
}

fn run(mut data: RunData) -> State {
  if command::interrupted() {
    return stop(data, 0);
  }

  let imu_fd: RawFd = data.imu.source().as_raw_fd();
  let stdin_fd = data.stdin_open.then(|| io::stdin().as_raw_fd());

  let ready = match command::poll_inputs(imu_fd, stdin_fd, POLL_TIMEOUT) {
    Ok(ready) => ready,
    Err(e) => {
      fail!("Failed to poll inputs: {e}");
      return stop(data, 1);
    }
  };

  if ready.stdin && read_stdin(&mut data) == Flow::Quit {
    return stop(data, 0);
  }

  if !ready.imu {
    return idle(data);
  }

  match data.imu.read() {
    Ok(event) => {
      data.idle_count = 0;

      if event == ReadEvent::CalibrationComplete {
        println!("{}", data.imu.calibration());
      }

      publish(&mut data);
      State::Run(data)
    }
    Err(Error::Timeout) => idle(data),
    Err(Error::SyncLost(_)) => {
      data.sync_faults += 1;
      State::Run(data)
    }
    Err(e) => {
      fail!("IMU read failed: {e}");
      stop(data, 1)
    }
  }
}

fn exit(data: ExitData) -> State {
  if let Some(logger) = data.logger {
    if let Err(e) = logger.shutdown() {
      fail!("Failed to flush the log: {e}");
    }
  }

  pass!("Exiting.");
  process::exit(data.code)
}
