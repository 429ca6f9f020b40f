use super::*;

/// Terminal classification of a supervised run.
///
/// `InProgress` exists only while the supervisor loop is still polling; every
/// other state is terminal and seals the statistics record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
  InProgress,
  MemoryLimit,
  WallTimeLimit,
  CpuTimeLimit,
  Finished,
}

impl Verdict {
  pub fn code(&self) -> &'static str {
    match self {
      Self::InProgress => "",
      Self::MemoryLimit => "ML",
      Self::WallTimeLimit => "WT",
      Self::CpuTimeLimit => "TL",
      Self::Finished => "OK",
    }
  }

  fn tag(&self) -> u8 {
    match self {
      Self::InProgress => 0,
      Self::MemoryLimit => 1,
      Self::WallTimeLimit => 2,
      Self::CpuTimeLimit => 3,
      Self::Finished => 4,
    }
  }

  fn from_tag(tag: u8) -> Result<Self> {
    Ok(match tag {
      0 => Self::InProgress,
      1 => Self::MemoryLimit,
      2 => Self::WallTimeLimit,
      3 => Self::CpuTimeLimit,
      4 => Self::Finished,
      _ => return Err(Error::Channel(format!("unknown verdict tag {tag}"))),
    })
  }
}

impl fmt::Display for Verdict {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.code())
  }
}

/// Post-mortem accounting of one supervised run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunStatistics {
  /// Final CPU usage of the whole cgroup.
  pub cpu_time: CpuUsage,

  /// How the payload left the system.
  pub exit_status: ExitStatus,

  /// Peak memory charge observed by the sampling loop, in bytes.
  pub max_memory_bytes: u64,

  /// Terminal verdict.
  pub verdict: Verdict,

  /// Elapsed wall-clock time between launch and the terminal verdict.
  pub wall_time: Duration,
}

impl fmt::Display for RunStatistics {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    writeln!(f, "time.wall: {}", self.wall_time.as_micros())?;
    writeln!(f, "time.cpu.total: {}", self.cpu_time.total.as_micros())?;
    writeln!(f, "time.cpu.user: {}", self.cpu_time.user.as_micros())?;
    writeln!(f, "time.cpu.system: {}", self.cpu_time.system.as_micros())?;
    writeln!(f, "memory.max: {}", self.max_memory_bytes)?;
    writeln!(f, "status: {}", self.exit_status)?;
    writeln!(f, "verdict: {}", self.verdict)
  }
}

impl Message for RunStatistics {
  // wall + three cpu durations + peak memory, a tagged exit status, and the
  // verdict tag.
  const SIZE: usize = 8 * 5 + 5 + 1;

  fn encode(&self) -> Vec<u8> {
    let mut frame = Vec::with_capacity(Self::SIZE);

    let micros =
      |duration: Duration| u64::try_from(duration.as_micros()).unwrap_or(u64::MAX);

    frame.extend_from_slice(&micros(self.wall_time).to_le_bytes());
    frame.extend_from_slice(&micros(self.cpu_time.total).to_le_bytes());
    frame.extend_from_slice(&micros(self.cpu_time.user).to_le_bytes());
    frame.extend_from_slice(&micros(self.cpu_time.system).to_le_bytes());
    frame.extend_from_slice(&self.max_memory_bytes.to_le_bytes());

    match self.exit_status {
      ExitStatus::Exited(code) => {
        frame.push(0);
        frame.extend_from_slice(&i32::from(code).to_le_bytes());
      }
      ExitStatus::Signaled(signal) => {
        frame.push(1);
        frame.extend_from_slice(&signal.to_le_bytes());
      }
    }

    frame.push(self.verdict.tag());

    frame
  }

  fn decode(frame: &[u8]) -> Result<Self> {
    ensure!(
      frame.len() == Self::SIZE,
      Error::Channel("truncated statistics frame".into())
    );

    let word = |index: usize| {
      let bytes: [u8; 8] = frame[index * 8..(index + 1) * 8]
        .try_into()
        .expect("slice is eight bytes");
      u64::from_le_bytes(bytes)
    };

    let value = i32::from_le_bytes(
      frame[41..45].try_into().expect("slice is four bytes"),
    );

    let exit_status = match frame[40] {
      0 => ExitStatus::Exited(
        u8::try_from(value)
          .map_err(|_| Error::Channel(format!("exit code {value} out of range")))?,
      ),
      1 => ExitStatus::Signaled(value),
      tag => return Err(Error::Channel(format!("unknown exit status tag {tag}"))),
    };

    Ok(Self {
      cpu_time: CpuUsage {
        total: Duration::from_micros(word(1)),
        user: Duration::from_micros(word(2)),
        system: Duration::from_micros(word(3)),
      },
      exit_status,
      max_memory_bytes: word(4),
      verdict: Verdict::from_tag(frame[45])?,
      wall_time: Duration::from_micros(word(0)),
    })
  }
}
