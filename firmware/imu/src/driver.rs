use crate::{
  calib_file,
  calibration::{
    CalibrationConfig,
    CalibrationEngine,
    CalibrationModel,
    CalibrationStatus,
  },
  convert::{Converter, PhysicalSample, ScaleCorrection},
  error::{Error, Result},
  filter::FirFilter,
  frame::RawSample,
  internals::{SerialConfig, SerialPort},
  replay::AsciiReplay,
  ring::SampleRing,
  sync::{FrameSource, FrameSynchronizer, PollableSource, SyncConfig},
};
use jeflog::{fail, pass, task};
use std::{
  fs::File,
  io::{BufReader, Write},
  os::fd::{AsRawFd, RawFd},
  path::Path,
  sync::Arc,
  thread,
  time::Duration,
};

/// How long the IMU firmware needs after a configuration command.
pub const STARTUP_DELAY: Duration = Duration::from_millis(350);

/// Single byte commands understood by the IMU firmware.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ImuCommand {
  Run = b'#',
  Stop = b'$',
  Defaults = b'!',
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ImuStatus {
  Running,
  Stopped,
  Calibrating,
  Unknown,
}

/// What a successful `read` did besides storing the frame.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReadEvent {
  Frame,
  CalibrationComplete,
}

#[derive(Clone, Debug)]
pub struct ImuConfig {
  pub serial: SerialConfig,
  pub sync: SyncConfig,
  pub calibration: CalibrationConfig,
  pub startup_delay: Duration,
}

impl Default for ImuConfig {
  fn default() -> Self {
    ImuConfig {
      serial: SerialConfig::default(),
      sync: SyncConfig::default(),
      calibration: CalibrationConfig::default(),
      startup_delay: STARTUP_DELAY,
    }
  }
}

pub type SerialImu = ImuComm<FrameSynchronizer<SerialPort>>;
pub type ReplayImu = ImuComm<AsciiReplay<BufReader<File>>>;

/// Owns the frame source and everything downstream of it.
///
/// Each `read` moves exactly one frame through the ring, the calibration
/// engine when it is collecting, the converter and the filter.
pub struct ImuComm<S> {
  source: S,
  ring: SampleRing,
  engine: CalibrationEngine,
  converter: Converter,
  filter: FirFilter,
  status: ImuStatus,

  /// Converted form of the latest frame.
  latest: Option<PhysicalSample>,
}

impl<S: FrameSource> ImuComm<S> {
  pub fn new(source: S, calibration: CalibrationConfig) -> Self {
    ImuComm {
      source,
      ring: SampleRing::new(),
      engine: CalibrationEngine::new(calibration),
      converter: Converter::default(),
      filter: FirFilter::new(),
      status: ImuStatus::Unknown,
      latest: None,
    }
  }

  /// Erases the source type so device and replay can share one code path.
  pub fn boxed(self) -> ImuComm<Box<dyn PollableSource>>
  where
    S: PollableSource + 'static,
  {
    ImuComm {
      source: Box::new(self.source),
      ring: self.ring,
      engine: self.engine,
      converter: self.converter,
      filter: self.filter,
      status: self.status,
      latest: self.latest,
    }
  }

  pub fn source(&self) -> &S {
    &self.source
  }

  pub fn source_mut(&mut self) -> &mut S {
    &mut self.source
  }

  pub fn set_scale_correction(&mut self, scale: Box<dyn ScaleCorrection>) {
    self.converter.set_scale(scale);
  }

  pub fn status(&self) -> ImuStatus {
    if self.engine.is_calibrating() {
      ImuStatus::Calibrating
    } else {
      self.status
    }
  }

  /// Reads one frame and runs it through the pipeline.
  ///
  /// `Timeout` and `SyncLost` come straight from the source and leave every
  /// downstream stage untouched.
  pub fn read(&mut self) -> Result<ReadEvent> {
    let raw = self.source.read_frame()?;
    self.ring.push(raw);

    let mut event = ReadEvent::Frame;
    if self.engine.is_calibrating() {
      self.engine.feed(&raw)?;

      if self.engine.is_complete() {
        self.engine.finish_calibration()?;
        // earlier samples were converted under the old model
        self.filter.reset();
        event = ReadEvent::CalibrationComplete;
      }
    }

    let data = self.converter.convert(&raw, &self.engine.model());
    self.filter.insert(data);
    self.latest = Some(data);

    Ok(event)
  }

  /// True if frames arrived that were not handed out yet.
  pub fn unread(&self) -> bool {
    self.ring.has_unread()
  }

  pub fn get_raw_latest(&self) -> Result<RawSample> {
    self.ring.peek_latest().copied().ok_or(Error::NotReady)
  }

  /// Oldest frame not handed out yet.
  pub fn get_raw_unread(&mut self) -> Result<RawSample> {
    self.ring.pop_unread().ok_or(Error::NotReady)
  }

  pub fn get_data_latest(&self) -> Result<PhysicalSample> {
    self.latest.ok_or(Error::NotReady)
  }

  /// Like `get_raw_unread`, converted under the current calibration.
  pub fn get_data_unread(&mut self) -> Result<PhysicalSample> {
    let raw = self.get_raw_unread()?;
    Ok(self.converter.convert(&raw, &self.engine.model()))
  }

  pub fn filter_ready(&self) -> bool {
    self.filter.filter_ready()
  }

  /// Filtered value over the most recent samples, without consuming it.
  pub fn get_filtered(&self) -> Result<PhysicalSample> {
    self.filter.output()
  }

  /// Filtered value, at most once per filter length samples.
  pub fn get_filtered_unread(&mut self) -> Result<PhysicalSample> {
    self.filter.take()
  }

  pub fn calibration_start(&mut self) -> Result<()> {
    self.engine.start_calibration()
  }

  pub fn calibration_abort(&mut self) -> Result<()> {
    self.engine.abort_calibration()
  }

  pub fn calibration_status(&self) -> CalibrationStatus {
    self.engine.status()
  }

  pub fn calibration(&self) -> Arc<CalibrationModel> {
    self.engine.model()
  }

  pub fn calibration_engine(&self) -> &CalibrationEngine {
    &self.engine
  }

  pub fn calib_file(&self) -> bool {
    self.engine.calib_file()
  }

  pub fn calib_estim(&self) -> bool {
    self.engine.calib_estim()
  }

  pub fn set_z0(&mut self, z0: f64) -> Result<()> {
    self.engine.set_altitude_reference(z0)
  }

  pub fn calib_load(&mut self, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let model = calib_file::load_from_path(path)?;
    self.engine.replace_model(model)?;
    self.filter.reset();

    pass!("Loaded IMU calibration from {}.", path.display());
    Ok(())
  }

  pub fn calib_save(&self, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    calib_file::save_to_path(&self.engine.model(), path)?;

    pass!("Saved IMU calibration to {}.", path.display());
    Ok(())
  }
}

impl SerialImu {
  /// Opens the device and brings the IMU into a known running state.
  pub fn open(path: impl AsRef<Path>, config: ImuConfig) -> Result<Self> {
    let path = path.as_ref();
    task!("Opening IMU on {}...", path.display());

    let port = match SerialPort::open(path, &config.serial) {
      Ok(port) => port,
      Err(error) => {
        fail!("Failed to open {}: {error}", path.display());
        return Err(error);
      }
    };

    let source = FrameSynchronizer::new(port, config.sync);
    let mut imu = ImuComm::new(source, config.calibration);

    imu.stop()?;
    imu.reset_defaults()?;
    thread::sleep(config.startup_delay);
    imu.resume()?;
    thread::sleep(config.startup_delay);

    // drop whatever arrived while the firmware was reconfiguring
    imu.source.get_ref().flush_input()?;

    pass!("IMU running on {}.", path.display());
    Ok(imu)
  }

  fn send(&mut self, command: ImuCommand) -> Result<()> {
    let port = self.source.get_mut();
    port.write_all(&[command as u8])?;
    port.flush()?;
    Ok(())
  }

  pub fn stop(&mut self) -> Result<()> {
    self.send(ImuCommand::Stop)?;
    self.status = ImuStatus::Stopped;
    Ok(())
  }

  pub fn resume(&mut self) -> Result<()> {
    self.send(ImuCommand::Run)?;
    self.status = ImuStatus::Running;
    Ok(())
  }

  /// Restores the firmware's default configuration. Leaves the IMU stopped.
  pub fn reset_defaults(&mut self) -> Result<()> {
    self.send(ImuCommand::Defaults)?;
    self.status = ImuStatus::Stopped;
    Ok(())
  }
}

impl ReplayImu {
  /// Feeds the pipeline from a raw log instead of a device.
  pub fn replay(
    path: impl AsRef<Path>,
    calibration: CalibrationConfig,
  ) -> Result<Self> {
    let path = path.as_ref();
    let source = AsciiReplay::open(path)?;
    let mut imu = ImuComm::new(source, calibration);
    imu.status = ImuStatus::Running;

    pass!("Replaying IMU log {}.", path.display());
    Ok(imu)
  }
}

impl<S: AsRawFd> AsRawFd for ImuComm<S> {
  fn as_raw_fd(&self) -> RawFd {
    self.source.as_raw_fd()
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{calibration::RestState, convert::GRAVITY};
  use std::{collections::VecDeque, io::Cursor};

  /// Hands out queued results, then times out.
  struct Scripted(VecDeque<Result<RawSample>>);

  impl FrameSource for Scripted {
    fn read_frame(&mut self) -> Result<RawSample> {
      self.0.pop_front().unwrap_or(Err(Error::Timeout))
    }
  }

  fn still(sequence: u64) -> RawSample {
    RawSample {
      t_us: 10_000,
      acc: [40, -20, 800],
      gyro: [4, -1, 2],
      temp: 250,
      pres: 100_000,
      sequence,
      ..RawSample::default()
    }
  }

  fn imu(frames: usize, min_samples: usize) -> ImuComm<Scripted> {
    let source = Scripted((0..frames as u64).map(|i| Ok(still(i))).collect());
    ImuComm::new(
      source,
      CalibrationConfig {
        min_samples,
        rest: RestState::default(),
      },
    )
  }

  #[test]
  fn nothing_available_before_the_first_frame() {
    let mut imu = imu(0, 4);
    assert!(!imu.unread());
    assert!(matches!(imu.get_raw_latest(), Err(Error::NotReady)));
    assert!(matches!(imu.get_data_latest(), Err(Error::NotReady)));
    assert!(matches!(imu.get_raw_unread(), Err(Error::NotReady)));
    assert!(matches!(imu.read(), Err(Error::Timeout)));
    assert_eq!(imu.status(), ImuStatus::Unknown);
  }

  #[test]
  fn unread_frames_come_out_in_order() {
    let mut imu = imu(3, 4);
    for _ in 0..3 {
      imu.read().unwrap();
    }

    assert_eq!(imu.get_raw_latest().unwrap().sequence, 2);
    let order: Vec<u64> = (0..3)
      .map(|_| imu.get_raw_unread().unwrap().sequence)
      .collect();
    assert_eq!(order, vec![0, 1, 2]);
    assert!(!imu.unread());
  }

  #[test]
  fn read_errors_leave_the_pipeline_alone() {
    let source = Scripted(VecDeque::from([
      Ok(still(0)),
      Err(Error::SyncLost(crate::error::SyncFault::BadEnd { found: 0 })),
    ]));
    let mut imu = ImuComm::new(source, CalibrationConfig::default());

    imu.read().unwrap();
    imu.get_raw_unread().unwrap();
    assert!(matches!(imu.read(), Err(Error::SyncLost(_))));
    assert!(!imu.unread());
    assert_eq!(imu.get_raw_latest().unwrap().sequence, 0);
  }

  #[test]
  fn calibration_completes_on_its_own() {
    let mut imu = imu(6, 4);
    imu.calibration_start().unwrap();
    assert_eq!(imu.status(), ImuStatus::Calibrating);

    let events: Vec<ReadEvent> = (0..4).map(|_| imu.read().unwrap()).collect();
    assert_eq!(events[3], ReadEvent::CalibrationComplete);
    assert!(events[..3].iter().all(|e| *e == ReadEvent::Frame));
    assert!(imu.calib_estim());
    assert_eq!(imu.calibration_status(), CalibrationStatus::Idle);

    // the completing frame is already converted under the new model
    let data = imu.get_data_latest().unwrap();
    assert!((data.acc.z - GRAVITY).abs() < 1e-9);
    assert!(data.acc.x.abs() < 1e-9);
    assert!(data.gyro.norm() < 1e-9);
  }

  #[test]
  fn filter_restarts_after_calibration() {
    let mut imu = imu(12, 4);
    imu.calibration_start().unwrap();
    for _ in 0..4 {
      imu.read().unwrap();
    }
    // only the completing frame is in the filter
    assert!(!imu.filter_ready());

    for _ in 0..4 {
      imu.read().unwrap();
      assert!(!imu.filter_ready());
    }
    imu.read().unwrap();
    assert!(imu.filter_ready());

    let filtered = imu.get_filtered_unread().unwrap();
    assert!((filtered.acc.z - GRAVITY).abs() < 1e-9);
    assert!(matches!(imu.get_filtered_unread(), Err(Error::NotReady)));
    assert!(imu.get_filtered().is_ok());
  }

  #[test]
  fn data_unread_converts_under_the_current_model() {
    let mut imu = imu(1, 4);
    imu.read().unwrap();
    let data = imu.get_data_unread().unwrap();
    assert_eq!(data.acc.z, 800.0);
    assert!(matches!(imu.get_data_unread(), Err(Error::NotReady)));
  }

  #[test]
  fn calibration_survives_a_save_and_load() {
    let dir = std::env::temp_dir().join(format!("imu-calib-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let path = dir.join("calib.txt");

    let mut imu = imu(4, 4);
    imu.set_z0(50.0).unwrap();
    imu.calibration_start().unwrap();
    for _ in 0..4 {
      imu.read().unwrap();
    }
    imu.calib_save(&path).unwrap();

    let mut fresh = ImuComm::new(
      Scripted(VecDeque::new()),
      CalibrationConfig::default(),
    );
    assert!(!fresh.calib_file());
    fresh.calib_load(&path).unwrap();
    assert!(fresh.calib_file());
    // nulls from an earlier run still need estimating in this one
    assert!(!fresh.calib_estim());
    assert!(fresh
      .calibration()
      .origin
      .contains(crate::calibration::CalibrationOrigin::ESTIMATED));
    assert_eq!(fresh.calibration().acc, imu.calibration().acc);
    assert_eq!(fresh.calibration().z0, 50.0);

    std::fs::remove_dir_all(&dir).unwrap();
  }

  #[test]
  fn boxed_source_keeps_the_pipeline_state() {
    let path = std::env::temp_dir()
      .join(format!("imu-frames-{}.bin", std::process::id()));
    let bytes: Vec<u8> = (0..2).flat_map(|i| still(i).to_frame_bytes()).collect();
    std::fs::write(&path, bytes).unwrap();

    let file = File::open(&path).unwrap();
    let source = FrameSynchronizer::new(file, SyncConfig::default());
    let mut imu = ImuComm::new(source, CalibrationConfig::default());
    imu.read().unwrap();

    let mut boxed = imu.boxed();
    assert!(boxed.unread());
    boxed.read().unwrap();
    assert_eq!(boxed.get_raw_unread().unwrap().sequence, 0);
    assert_eq!(boxed.get_raw_unread().unwrap().sequence, 1);
    assert!(boxed.source().as_raw_fd() >= 0);

    std::fs::remove_file(&path).unwrap();
  }

  #[test]
  fn works_over_a_byte_stream() {
    let bytes: Vec<u8> = (0..3).flat_map(|i| still(i).to_frame_bytes()).collect();
    let source = FrameSynchronizer::new(Cursor::new(bytes), SyncConfig::default());
    let mut imu = ImuComm::new(source, CalibrationConfig::default());

    for _ in 0..3 {
      imu.read().unwrap();
    }
    assert!(matches!(imu.read(), Err(Error::Timeout)));
    assert_eq!(imu.source().frames_read(), 3);
  }
}
