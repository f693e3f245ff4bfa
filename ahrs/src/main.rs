use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use imu::{CalibrationConfig, ImuConfig, SerialConfig, DEFAULT_BAUD_RATE};
use std::path::PathBuf;

use crate::{
  file_logger::LoggerConfig,
  state::{InitData, Input, State},
};

mod command;
mod file_logger;
mod state;

fn cli() -> Command {
  Command::new("ahrs")
    .about("Reads, calibrates and filters the serial IMU")
    .arg(
      Arg::new("device")
        .help("serial device the IMU is attached to")
        .required_unless_present("replay")
        .value_parser(value_parser!(PathBuf)),
    )
    .arg(
      Arg::new("baud")
        .long("baud")
        .default_value("115200")
        .value_parser(value_parser!(u32)),
    )
    .arg(
      Arg::new("replay")
        .long("replay")
        .value_name("FILE")
        .help("play back a raw log instead of reading a device")
        .conflicts_with("device")
        .value_parser(value_parser!(PathBuf)),
    )
    .arg(
      Arg::new("calibration")
        .long("calibration")
        .value_name("FILE")
        .help("calibration file to load at startup")
        .value_parser(value_parser!(PathBuf)),
    )
    .arg(
      Arg::new("z0")
        .long("z0")
        .help("altitude in meters at which the next calibration runs")
        .allow_negative_numbers(true)
        .value_parser(value_parser!(f64)),
    )
    .arg(
      Arg::new("calib-samples")
        .long("calib-samples")
        .default_value("512")
        .value_parser(value_parser!(usize)),
    )
    .arg(
      Arg::new("log")
        .long("log")
        .help("log raw, converted and filtered samples")
        .action(ArgAction::SetTrue),
    )
    .arg(
      Arg::new("log-dir")
        .long("log-dir")
        .value_parser(value_parser!(PathBuf)),
    )
}

fn init_data(matches: &ArgMatches) -> InitData {
  let input = match matches.get_one::<PathBuf>("replay") {
    Some(path) => Input::Replay(path.clone()),
    // clap guarantees the device when there is no replay
    None => Input::Device(
      matches.get_one::<PathBuf>("device").cloned().unwrap_or_default(),
    ),
  };

  let defaults = ImuConfig::default();
  let imu_config = ImuConfig {
    serial: SerialConfig {
      baud_rate: matches
        .get_one::<u32>("baud")
        .copied()
        .unwrap_or(DEFAULT_BAUD_RATE),
    },
    calibration: CalibrationConfig {
      min_samples: matches
        .get_one::<usize>("calib-samples")
        .copied()
        .unwrap_or(defaults.calibration.min_samples),
      ..CalibrationConfig::default()
    },
    ..defaults
  };

  let mut logger_config = LoggerConfig {
    enabled: matches.get_flag("log"),
    ..LoggerConfig::default()
  };
  if let Some(dir) = matches.get_one::<PathBuf>("log-dir") {
    logger_config.log_dir = dir.clone();
  }

  InitData {
    input,
    imu_config,
    calibration_file: matches.get_one::<PathBuf>("calibration").cloned(),
    z0: matches.get_one::<f64>("z0").copied(),
    logger_config,
  }
}

fn main() {
  let matches = cli().get_matches();

  let mut state = State::Init(init_data(&matches));

  loop {
    state = state.next();
  }
}
