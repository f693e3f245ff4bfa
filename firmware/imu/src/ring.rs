use crate::frame::RawSample;

/// Frames held between the serial link and the control loop.
pub const FRAME_BUFFER_SIZE: usize = 32;

/// Fixed capacity circular store of raw frames.
///
/// Pushing never fails. When the store is full the oldest unread frame is
/// overwritten and the unread count stays at capacity, so loss is silent here.
/// Consumers that care compare `RawSample::sequence` numbers.
pub struct SampleRing<const N: usize = FRAME_BUFFER_SIZE> {
  buffer: [RawSample; N],

  /// New data goes here.
  next: usize,

  /// Slot of the most recent frame, `None` until the first push.
  latest: Option<usize>,

  unread: usize,
}

impl<const N: usize> SampleRing<N> {
  const MASK: usize = N - 1;

  pub fn new() -> Self {
    assert!(N.is_power_of_two(), "ring capacity must be a power of two");

    SampleRing {
      buffer: [RawSample::default(); N],
      next: 0,
      latest: None,
      unread: 0,
    }
  }

  pub fn capacity(&self) -> usize {
    N
  }

  pub fn push(&mut self, sample: RawSample) {
    self.buffer[self.next] = sample;
    self.latest = Some(self.next);
    self.next = (self.next + 1) & Self::MASK;
    self.unread = (self.unread + 1).min(N);
  }

  /// Most recent frame, read or not.
  pub fn peek_latest(&self) -> Option<&RawSample> {
    self.latest.map(|slot| &self.buffer[slot])
  }

  /// Oldest frame not yet handed out. `None` is the normal empty condition.
  pub fn pop_unread(&mut self) -> Option<RawSample> {
    if self.unread == 0 {
      return None;
    }

    let slot = (self.next + N - self.unread) & Self::MASK;
    self.unread -= 1;
    Some(self.buffer[slot])
  }

  pub fn has_unread(&self) -> bool {
    self.unread != 0
  }

  pub fn unread(&self) -> usize {
    self.unread
  }

  /// Marks everything as read without touching the stored frames.
  pub fn discard_unread(&mut self) {
    self.unread = 0;
  }
}

impl<const N: usize> Default for SampleRing<N> {
  fn default() -> Self {
    Self::new()
  }
}
