use super::*;

const STATUS_CHECK: u64 = 0;
const DEADLINE: u64 = 1;
const FINISHED_PROC: u64 = 2;

/// Limits governing one supervised run. Every field is required and must be
/// non-zero; there are no sentinel defaults.
#[derive(Debug, Clone, Copy)]
pub struct WaitParameters {
  /// Period of the resource-sampling timer. A limit breach is observed at
  /// most this long after it happens.
  pub check_interval: Duration,

  /// Ceiling on accumulated CPU time of the whole cgroup.
  pub cpu_time_limit: Duration,

  /// Ceiling on the observed memory charge in bytes.
  pub memory_limit_bytes: u64,

  /// Hard wall-clock deadline, measured from entry into the loop.
  pub wall_time_limit: Duration,
}

impl WaitParameters {
  fn validate(&self) -> Result {
    ensure!(
      !self.check_interval.is_zero(),
      Error::Supervisor("check interval must be specified".into())
    );

    ensure!(
      !self.cpu_time_limit.is_zero(),
      Error::Supervisor("cpu time limit must be specified".into())
    );

    ensure!(
      self.memory_limit_bytes != 0,
      Error::Supervisor("memory limit must be specified".into())
    );

    ensure!(
      !self.wall_time_limit.is_zero(),
      Error::Supervisor("wall time limit must be specified".into())
    );

    Ok(())
  }
}

/// Launch a payload and supervise it to a terminal verdict.
///
/// `start` launches the payload and must return a handle carrying a pidfd;
/// the payload is expected to be (or to immediately become) a member of
/// `cgroup`. `checks` are invoked on every sampling tick with a
/// monotonically increasing tick index.
///
/// The loop multiplexes three readiness sources: the sampling timer, the
/// wall-clock deadline, and the pidfd. One event is taken per wake-up, so
/// when the payload exits in the same poll cycle as a limit breach the
/// verdict goes to whichever descriptor the kernel ready list yields first;
/// the outcome is deterministic for a given kernel state, and both
/// resolutions are valid.
///
/// Whatever the verdict, the cgroup is killed before the handle is reaped,
/// so sibling processes the payload spawned cannot outlive the run.
pub fn run_and_wait<F>(
  start: F,
  params: WaitParameters,
  cgroup: &CgroupController,
  checks: &mut [&mut dyn FnMut(u64)],
) -> Result<RunStatistics>
where
  F: FnOnce() -> Result<ProcessHandle>,
{
  params.validate()?;

  let status_check = Timer::recurring(params.check_interval, params.check_interval)?;
  let deadline = Timer::one_shot(params.wall_time_limit)?;

  let handle = start()?;

  let Some(pid_fd) = handle.pid_fd() else {
    return Err(Error::Supervisor(
      "launcher returned a handle without a pidfd".into(),
    ));
  };

  let poller = EventPoller::new()?;
  poller.add(&status_check, STATUS_CHECK)?;
  poller.add(&deadline, DEADLINE)?;
  poller.add(&pid_fd, FINISHED_PROC)?;

  let mut verdict = Verdict::InProgress;
  let mut max_memory_bytes = 0;
  let mut tick = 0;

  while verdict == Verdict::InProgress {
    match poller.wait()? {
      STATUS_CHECK => {
        max_memory_bytes = max_memory_bytes.max(cgroup.current_memory()?);

        if max_memory_bytes > params.memory_limit_bytes {
          verdict = Verdict::MemoryLimit;
        }

        if cgroup.cpu_usage()?.total > params.cpu_time_limit {
          verdict = Verdict::CpuTimeLimit;
        }

        for check in checks.iter_mut() {
          check(tick);
        }

        tick += 1;

        status_check.acknowledge()?;
      }
      DEADLINE => {
        verdict = Verdict::WallTimeLimit;
        deadline.acknowledge()?;
      }
      // The pidfd is a one-shot exit notification; there is nothing to
      // drain.
      FINISHED_PROC => verdict = Verdict::Finished,
      token => {
        return Err(Error::Supervisor(format!("unexpected poll token {token}")))
      }
    }
  }

  // The deadline timer doubles as the stopwatch: what is left on it is the
  // wall time the run did not use. Read before cancelling.
  let wall_time = params.wall_time_limit.saturating_sub(deadline.cancel()?);

  cgroup.kill_all()?;

  let exit_status = handle.wait()?;

  let cpu_time = cgroup.cpu_usage()?;

  debug!("run finished with verdict {verdict:?} after {wall_time:?}");

  Ok(RunStatistics {
    cpu_time,
    exit_status,
    max_memory_bytes,
    verdict,
    wall_time,
  })
}
