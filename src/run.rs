use super::*;

const CHECK_INTERVAL: Duration = Duration::from_millis(10);
const CPU_TIME_LIMIT: Duration = Duration::from_secs(4);
const CPU_WINDOW: Duration = Duration::from_millis(100);
const FILE_SIZE_LIMIT_BYTES: u64 = 64 << 10;
const MEMORY_LIMIT_BYTES: u64 = 256 << 20;
const PIDS_LIMIT: u32 = 1;
const SANDBOX_SIZE_BYTES: u64 = 8 << 20;
const WALL_TIME_LIMIT: Duration = Duration::from_secs(5);

/// Execute an untrusted binary inside a sandbox under the run limit
/// profile.
///
/// The executable is bind-mounted at `/main` in a tmpfs root; stdin, stdout
/// and stderr are redirected to the given files (output and error files are
/// created if absent); a file-size rlimit keeps runaway output from
/// exhausting the tmpfs.
///
/// The payload is cloned straight into the cgroup, so not a single syscall
/// escapes accounting, and the supervision loop runs in the calling
/// process.
pub fn run(
  executable: &Path,
  input: &Path,
  output: &Path,
  errors: &Path,
) -> Result<RunStatistics> {
  allow_others_execute(executable)?;

  let id = SandboxId::new("run")?;

  let cgroup = CgroupController::new(
    &id,
    CgroupConfig::default()
      .pids_limit(PIDS_LIMIT)
      .cpu_window(CPU_WINDOW, CPU_WINDOW)
      .memory_high(MEMORY_LIMIT_BYTES)
      .memory_max(MEMORY_LIMIT_BYTES * 3 / 2),
  )?;

  let mut container = Container::new(&id)?;

  let stdin = File::open(input)?;
  let stdout = File::options().write(true).create(true).open(output)?;
  let stderr = File::options().write(true).create(true).open(errors)?;

  let stdin_fd = stdin.as_raw_fd();
  let stdout_fd = stdout.as_raw_fd();
  let stderr_fd = stderr.as_raw_fd();

  let sandbox = &mut container;

  let statistics = run_and_wait(
    || {
      execute(
        || {
          sandbox.mount_tmpfs(SANDBOX_SIZE_BYTES)?;
          sandbox.bind_file(executable, "main")?;
          sandbox.detach_mounts();
          sandbox.enter()?;

          dup2(stdin_fd, 0)?;
          dup2(stdout_fd, 1)?;
          dup2(stderr_fd, 2)?;

          set_file_size_limit(FILE_SIZE_LIMIT_BYTES)?;

          let program = cstring("/main")?;

          execvp(&program, &[program.clone()])?;

          Ok(())
        },
        ExecuteArgs::default()
          .new_network_ns()
          .new_mount_ns()
          .new_pid_ns()
          .new_user_ns()
          .into_cgroup(cgroup.fd())
          .create_pid_fd(),
      )
    },
    WaitParameters {
      check_interval: CHECK_INTERVAL,
      cpu_time_limit: CPU_TIME_LIMIT,
      memory_limit_bytes: MEMORY_LIMIT_BYTES,
      wall_time_limit: WALL_TIME_LIMIT,
    },
    &cgroup,
    &mut [],
  )?;

  drop(container);

  cgroup.destroy()?;

  Ok(statistics)
}

/// The payload execs under a mapped-root identity in its own user
/// namespace; the bind-mounted binary keeps the host file's mode, so it
/// needs the others-execute bit.
fn allow_others_execute(executable: &Path) -> Result {
  let mut permissions = fs::metadata(executable)?.permissions();
  permissions.set_mode(permissions.mode() | 0o001);

  Ok(fs::set_permissions(executable, permissions)?)
}
