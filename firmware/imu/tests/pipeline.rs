use imu::{
  convert::GRAVITY,
  filter::FILTER_LEN,
  CalibrationConfig,
  Error,
  FrameSynchronizer,
  ImuComm,
  ImuStatus,
  RawSample,
  ReadEvent,
  ReplayImu,
  SyncConfig,
};
use std::{fs, io::Cursor};

fn resting(sequence: u64) -> RawSample {
  RawSample {
    t_us: 10_000,
    acc: [25 + (sequence % 3) as i16 - 1, -14, 790],
    gyro: [2, -3, (sequence % 2) as i16],
    magn: [150, -60, 220],
    temp: 233,
    pres: 98_000,
    sequence,
    ..RawSample::default()
  }
}

/// Reads until the source runs dry, retrying over sync loss like a control
/// loop would.
fn drain<S: imu::FrameSource>(imu: &mut ImuComm<S>) -> (usize, usize) {
  let (mut frames, mut faults) = (0, 0);
  loop {
    match imu.read() {
      Ok(_) => frames += 1,
      Err(error) if matches!(error, Error::SyncLost(_)) => faults += 1,
      Err(Error::Timeout) => return (frames, faults),
      Err(error) => panic!("unexpected error {error}"),
    }
  }
}

#[test]
fn noisy_stream_calibrates_and_filters() -> anyhow::Result<()> {
  let mut bytes = b"boot banner\r\n".to_vec();
  for sequence in 0..40 {
    let mut frame = resting(sequence).to_frame_bytes();
    if sequence == 7 {
      frame[27] = b'?';
    }
    bytes.extend_from_slice(&frame);
  }

  let source = FrameSynchronizer::new(Cursor::new(bytes), SyncConfig::default());
  let mut imu = ImuComm::new(
    source,
    CalibrationConfig {
      min_samples: 16,
      ..CalibrationConfig::default()
    },
  );

  imu.set_z0(300.0)?;
  imu.calibration_start()?;
  let (frames, faults) = drain(&mut imu);

  assert_eq!(frames, 39);
  assert!(faults >= 1);
  assert!(imu.source().sync_failures() >= 1);
  assert!(imu.calib_estim());
  assert!(imu.unread());

  assert!(imu.filter_ready());
  let filtered = imu.get_filtered_unread()?;
  assert!((filtered.acc.z - GRAVITY).abs() < 0.05);
  assert!(filtered.gyro.norm() < 0.02);
  assert!((filtered.alt - 300.0).abs() < 1e-6);
  assert!((filtered.temp - 23.3).abs() < 1e-9);
  Ok(())
}

#[test]
fn replayed_log_drives_the_pipeline() -> anyhow::Result<()> {
  let dir = std::env::temp_dir().join(format!("imu-replay-{}", std::process::id()));
  fs::create_dir_all(&dir)?;
  let path = dir.join("raw.log");

  let log: String = (0..FILTER_LEN as u64)
    .map(|sequence| format!("{}\n", resting(sequence)))
    .collect();
  fs::write(&path, format!("# T acc gyro magn temp pres\n{log}"))?;

  let mut imu = ReplayImu::replay(&path, CalibrationConfig::default())?;
  assert_eq!(imu.status(), ImuStatus::Running);

  let mut events = Vec::new();
  for _ in 0..FILTER_LEN {
    events.push(imu.read()?);
  }
  assert!(events.iter().all(|event| *event == ReadEvent::Frame));
  assert!(matches!(imu.read(), Err(Error::Timeout)));

  assert_eq!(imu.get_raw_latest()?.sequence, FILTER_LEN as u64 - 1);
  assert!(imu.get_filtered().is_ok());
  assert!(!imu.calib_estim());

  fs::remove_dir_all(&dir)?;
  Ok(())
}
