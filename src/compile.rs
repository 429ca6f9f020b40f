use super::*;

const CHECK_INTERVAL: Duration = Duration::from_millis(10);
const COMPILER: &str = "clang++-15";
const CPU_TIME_LIMIT: Duration = Duration::from_secs(9);
const CPU_WINDOW: Duration = Duration::from_millis(100);
const MEMORY_LIMIT_BYTES: u64 = 256 << 20;
const PIDS_LIMIT: u32 = 10;
const SANDBOX_SIZE_BYTES: u64 = 32 << 20;
const WALL_TIME_LIMIT: Duration = Duration::from_secs(10);

/// Compile an untrusted source file inside a sandbox.
///
/// The source is bind-mounted read-only into a tmpfs root together with the
/// host toolchain directories, the compiler runs under the compile limit
/// profile, and on success the produced binary is installed at
/// `destination` with execute bits set. The compiler's stderr goes to
/// `logs`, which is created or truncated.
///
/// Supervision happens in a proxy process holding fresh user, mount,
/// network and UTS namespaces; the proxy reports statistics back over a
/// pipe and its own exit status distinguishes setup failures from completed
/// supervision.
pub fn compile(source: &Path, destination: &Path, logs: &Path) -> Result<RunStatistics> {
  let logs = File::options()
    .write(true)
    .create(true)
    .truncate(true)
    .open(logs)?;

  let id = SandboxId::new("compile")?;

  let mut container = Container::new(&id)?;

  let cgroup = CgroupController::new(
    &id,
    CgroupConfig::default()
      .pids_limit(PIDS_LIMIT)
      .memory_high(MEMORY_LIMIT_BYTES)
      .memory_max(MEMORY_LIMIT_BYTES * 3 / 2)
      .cpu_window(CPU_WINDOW, CPU_WINDOW),
  )?;

  let mut statistics_channel = Transfer::new()?;

  let proxy = execute(
    || {
      proxy_main(
        &mut container,
        &cgroup,
        source,
        destination,
        &logs,
        &mut statistics_channel,
      )
    },
    ExecuteArgs::default()
      .new_user_ns()
      .new_mount_ns()
      .new_network_ns()
      .new_uts_ns(),
  )?;

  let status = proxy.wait()?;

  ensure!(status.success(), Error::Proxy(status));

  let statistics = statistics_channel.recv()?;

  cgroup.destroy()?;

  Ok(statistics)
}

/// Runs inside the proxy's private namespaces: performs the mount setup,
/// supervises the compiler, ships the statistics, and installs the output.
fn proxy_main(
  container: &mut Container,
  cgroup: &CgroupController,
  source: &Path,
  destination: &Path,
  logs: &File,
  statistics_channel: &mut Transfer,
) -> Result {
  container.mount_tmpfs(SANDBOX_SIZE_BYTES)?;
  container.bind_file(source, "source.cpp")?;

  for host in ["/usr", "/lib", "/lib64"] {
    container.bind_dir(Path::new(host), host.trim_start_matches('/'))?;
  }

  fs::create_dir(container.path().join("tmp"))?;

  // The compiler must see the mounts after this scope ends; the mount
  // namespace dies with the proxy and unmounts whatever remains.
  container.detach_mounts();

  let sandbox = &*container;
  let logs_fd = logs.as_raw_fd();

  let statistics = run_and_wait(
    || {
      execute(
        || {
          sandbox.enter()?;

          dup2(logs_fd, 2)?;

          let argv = [COMPILER, "source.cpp", "-o", "output", "-static", "-std=c++2a"]
            .into_iter()
            .map(cstring)
            .collect::<Result<Vec<CString>>>()?;

          execvp(&argv[0], &argv)?;

          Ok(())
        },
        ExecuteArgs::default()
          .new_pid_ns()
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
    cgroup,
    &mut [],
  )?;

  statistics_channel.send(&statistics)?;

  if statistics.exit_status.success() {
    install(&container.path().join("output"), destination)?;
  }

  Ok(())
}

/// Copy the compiled artifact out of the sandbox and mark it executable.
/// Any failure here is a setup error: the destination cannot be trusted, so
/// the proxy exits non-zero and no verdict is reported.
fn install(artifact: &Utf8Path, destination: &Path) -> Result {
  fs::copy(artifact, destination).map_err(|e| {
    Error::Filesystem(std::io::Error::new(
      e.kind(),
      format!("cannot install {artifact} at {}: {e}", destination.display()),
    ))
  })?;

  let mut permissions = fs::metadata(destination)?.permissions();
  permissions.set_mode(permissions.mode() | 0o111);

  fs::set_permissions(destination, permissions)?;

  Ok(())
}
