use super::*;

/// A monotonic timerfd.
///
/// Serves two roles in the supervisor: a recurring sampling tick and a
/// one-shot deadline that doubles as a stopwatch, because the time left
/// until expiration can be read back at any point before the timer is
/// cancelled.
#[derive(Debug)]
pub struct Timer {
  fd: TimerFd,
}

impl Timer {
  /// A timer that fires `initial` from now and every `period` thereafter.
  pub fn recurring(initial: Duration, period: Duration) -> Result<Self> {
    let timer = Self::unarmed()?;

    timer.fd.set(
      Expiration::IntervalDelayed(
        TimeSpec::from_duration(initial),
        TimeSpec::from_duration(period),
      ),
      TimerSetTimeFlags::empty(),
    )?;

    Ok(timer)
  }

  /// A timer that fires once, `after` from now.
  pub fn one_shot(after: Duration) -> Result<Self> {
    let timer = Self::unarmed()?;

    timer.fd.set(
      Expiration::OneShot(TimeSpec::from_duration(after)),
      TimerSetTimeFlags::empty(),
    )?;

    Ok(timer)
  }

  /// Consume the accumulated expiration count.
  ///
  /// Timerfds tally expirations until read; a delivery that is not
  /// acknowledged leaves the descriptor readable and the poller would spin
  /// on it.
  pub fn acknowledge(&self) -> Result {
    Ok(self.fd.wait()?)
  }

  /// Time left until the next expiration; zero once a one-shot timer has
  /// fired.
  pub fn remaining(&self) -> Result<Duration> {
    Ok(match self.fd.get()? {
      Some(Expiration::OneShot(value)) => duration_from(value),
      Some(Expiration::IntervalDelayed(value, _)) => duration_from(value),
      Some(Expiration::Interval(value)) => duration_from(value),
      None => Duration::ZERO,
    })
  }

  /// Disarm the timer, returning how much time was left on it.
  pub fn cancel(self) -> Result<Duration> {
    let remaining = self.remaining()?;

    self.fd.unset()?;

    Ok(remaining)
  }

  fn unarmed() -> Result<Self> {
    Ok(Self {
      fd: TimerFd::new(ClockId::CLOCK_MONOTONIC, TimerFlags::TFD_CLOEXEC)?,
    })
  }
}

impl AsFd for Timer {
  fn as_fd(&self) -> BorrowedFd<'_> {
    self.fd.as_fd()
  }
}

fn duration_from(value: TimeSpec) -> Duration {
  if value.tv_sec() < 0 {
    Duration::ZERO
  } else {
    Duration::new(value.tv_sec() as u64, value.tv_nsec() as u32)
  }
}
