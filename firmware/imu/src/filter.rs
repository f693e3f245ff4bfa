use crate::{
  convert::PhysicalSample,
  error::{Error, Result},
};
use std::f64::consts::PI;

/// Taps of the default smoothing filter.
pub const FILTER_LEN: usize = 6;

/// Normalized Hann window without its zero end points, so every tap counts.
pub fn hann_coefficients<const L: usize>() -> [f64; L] {
  let mut h = [0.0; L];
  for (i, tap) in h.iter_mut().enumerate() {
    let phase = 2.0 * PI * (i + 1) as f64 / (L + 1) as f64;
    *tap = 0.5 - 0.5 * phase.cos();
  }

  let sum: f64 = h.iter().sum();
  for tap in &mut h {
    *tap /= sum;
  }
  h
}

/// Finite impulse response smoother over physical samples.
///
/// Samples go in one at a time. An output is ready once `L` samples arrived
/// since the previous one was taken, which decimates the stream by `L`.
/// `h[0]` weighs the newest sample.
pub struct FirFilter<const L: usize = FILTER_LEN> {
  h: [f64; L],
  history: [PhysicalSample; L],

  /// Slot the next sample goes to.
  head: usize,

  /// Valid samples in `history`.
  stored: usize,

  /// Samples since the last output was taken.
  pending: usize,
}

impl<const L: usize> FirFilter<L> {
  pub fn new() -> Self {
    FirFilter::with_coefficients(hann_coefficients())
  }

  pub fn with_coefficients(h: [f64; L]) -> Self {
    assert!(L > 0, "filter needs at least one tap");

    FirFilter {
      h,
      history: [PhysicalSample::default(); L],
      head: 0,
      stored: 0,
      pending: 0,
    }
  }

  pub fn coefficients(&self) -> &[f64; L] {
    &self.h
  }

  pub fn insert(&mut self, sample: PhysicalSample) {
    self.history[self.head] = sample;
    self.head = (self.head + 1) % L;
    self.stored = (self.stored + 1).min(L);
    self.pending = (self.pending + 1).min(L);
  }

  pub fn filter_ready(&self) -> bool {
    self.pending >= L
  }

  /// Weighted sum over the last `L` samples, without consuming anything.
  pub fn output(&self) -> Result<PhysicalSample> {
    if self.stored < L {
      return Err(Error::NotReady);
    }

    let newest = self.history[(self.head + L - 1) % L];
    let mut out = PhysicalSample {
      timestamp: newest.timestamp,
      ..PhysicalSample::default()
    };

    for (age, weight) in self.h.iter().enumerate() {
      let sample = &self.history[(self.head + L - 1 - age) % L];
      out.t_us += weight * sample.t_us;
      out.acc += sample.acc * *weight;
      out.gyro += sample.gyro * *weight;
      out.magn += sample.magn * *weight;
      out.temp += weight * sample.temp;
      out.alt += weight * sample.alt;
    }

    Ok(out)
  }

  /// Output once ready, restarting the count towards the next one.
  pub fn take(&mut self) -> Result<PhysicalSample> {
    if !self.filter_ready() {
      return Err(Error::NotReady);
    }

    let out = self.output()?;
    self.pending = 0;
    Ok(out)
  }

  /// Inserts a sample and takes the output if one became ready.
  pub fn push(&mut self, sample: PhysicalSample) -> Result<PhysicalSample> {
    self.insert(sample);
    self.take()
  }

  /// Forgets all history, e.g. after the calibration changed.
  pub fn reset(&mut self) {
    self.head = 0;
    self.stored = 0;
    self.pending = 0;
  }
}

impl<const L: usize> Default for FirFilter<L> {
  fn default() -> Self {
    Self::new()
  }
}
