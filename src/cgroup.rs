use super::*;

/// Mount point of the cgroup-v2 unified hierarchy.
const CGROUP_ROOT: &str = "/sys/fs/cgroup";

const REMOVE_ATTEMPTS: u32 = 100;
const REMOVE_BACKOFF: Duration = Duration::from_millis(10);

/// Limits applied to a control group when it is created.
///
/// Unset fields leave the kernel defaults (unlimited) in place.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CgroupConfig {
  /// CPU bandwidth as (quota, period): the group may consume `quota` of CPU
  /// time per `period` of wall time. Equal values grant one full CPU.
  pub cpu_window: Option<(Duration, Duration)>,

  /// Soft memory target in bytes. Above it the kernel throttles and reclaims
  /// but does not kill, which gives the supervisor a window to observe the
  /// breach before the OOM killer acts.
  pub memory_high: Option<u64>,

  /// Hard memory ceiling in bytes; crossing it OOM-kills the group.
  pub memory_max: Option<u64>,

  /// Hard cap on the number of concurrent processes in the group.
  pub pids_limit: Option<u32>,
}

impl CgroupConfig {
  pub fn cpu_window(self, quota: Duration, period: Duration) -> Self {
    Self {
      cpu_window: Some((quota, period)),
      ..self
    }
  }

  pub fn memory_high(self, bytes: u64) -> Self {
    Self {
      memory_high: Some(bytes),
      ..self
    }
  }

  pub fn memory_max(self, bytes: u64) -> Self {
    Self {
      memory_max: Some(bytes),
      ..self
    }
  }

  pub fn pids_limit(self, limit: u32) -> Self {
    Self {
      pids_limit: Some(limit),
      ..self
    }
  }
}

/// Accumulated CPU time of a control group, split the way `cpu.stat` reports
/// it. Successive readings on the same group are non-decreasing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CpuUsage {
  pub total: Duration,
  pub user: Duration,
  pub system: Duration,
}

/// Owns one cgroup-v2 directory.
///
/// The group is created and configured on construction and killed + removed
/// on drop; a drop that cannot remove the group panics rather than leaking
/// it.
#[derive(Debug)]
pub struct CgroupController {
  dir: File,
  path: Utf8PathBuf,
}

impl CgroupController {
  pub fn new(id: &SandboxId, config: CgroupConfig) -> Result<Self> {
    Self::with_root(Utf8Path::new(CGROUP_ROOT), id, config)
  }

  /// Create the group under an explicit hierarchy root.
  ///
  /// Tests point this at a scratch directory populated with fake control
  /// files; the drivers always use the real mount point.
  pub fn with_root(root: &Utf8Path, id: &SandboxId, config: CgroupConfig) -> Result<Self> {
    let path = root.join(id.as_str());

    enable_controllers(root)?;

    fs::create_dir_all(&path)
      .map_err(|e| Error::Cgroup(format!("cannot create {path}: {e}")))?;

    debug!("created cgroup {path}");

    if let Some(limit) = config.pids_limit {
      write_control(&path, "pids.max", &limit.to_string())?;
    }

    if let Some(bytes) = config.memory_high {
      write_control(&path, "memory.high", &bytes.to_string())?;
    }

    if let Some(bytes) = config.memory_max {
      write_control(&path, "memory.max", &bytes.to_string())?;
    }

    if let Some((quota, period)) = config.cpu_window {
      write_control(
        &path,
        "cpu.max",
        &format!("{} {}", quota.as_micros(), period.as_micros()),
      )?;
    }

    let dir = File::options()
      .read(true)
      .custom_flags(libc::O_PATH | libc::O_DIRECTORY)
      .open(&path)
      .map_err(|e| Error::Cgroup(format!("cannot open {path}: {e}")))?;

    Ok(Self { dir, path })
  }

  /// Move an already-running process into this group.
  ///
  /// Fails if the process is gone or the group is being torn down. Placing
  /// the child into the group at clone time via
  /// [`ExecuteArgs::into_cgroup`] is preferable since it leaves no window in
  /// which the child runs unaccounted.
  pub fn add_process(&self, pid: Pid) -> Result {
    write_control(&self.path, "cgroup.procs", &pid.as_raw().to_string())
  }

  /// Current memory charge of the group in bytes.
  pub fn current_memory(&self) -> Result<u64> {
    let content = read_control(&self.path, "memory.current")?;

    content
      .trim()
      .parse()
      .map_err(|e| Error::Cgroup(format!("cannot parse memory.current: {e}")))
  }

  /// Accumulated CPU time of the group.
  pub fn cpu_usage(&self) -> Result<CpuUsage> {
    parse_cpu_stat(&read_control(&self.path, "cpu.stat")?)
  }

  /// Ask the kernel to SIGKILL every member of the group. Idempotent: an
  /// empty group accepts the request as a no-op.
  pub fn kill_all(&self) -> Result {
    write_control(&self.path, "cgroup.kill", "1")
  }

  /// Descriptor of the cgroup directory, suitable for `CLONE_INTO_CGROUP`.
  pub fn fd(&self) -> BorrowedFd<'_> {
    self.dir.as_fd()
  }

  pub fn path(&self) -> &Utf8Path {
    &self.path
  }

  /// Kill the members and remove the group, consuming the controller.
  pub fn destroy(self) -> Result {
    let result = self.remove();

    std::mem::forget(self);

    result
  }

  fn remove(&self) -> Result {
    if !self.path.exists() {
      return Ok(());
    }

    if self.path.join("cgroup.kill").exists() {
      self.kill_all()?;
    }

    // The kernel unlinks members asynchronously after cgroup.kill, so rmdir
    // can transiently fail with EBUSY.
    for attempt in 0..REMOVE_ATTEMPTS {
      match fs::remove_dir(&self.path) {
        Ok(()) => {
          debug!("removed cgroup {}", self.path);
          return Ok(());
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(e)
          if matches!(
            e.raw_os_error(),
            Some(libc::EBUSY) | Some(libc::ENOTEMPTY)
          ) =>
        {
          if attempt % 10 == 9 {
            warn!("cgroup {} still busy, retrying removal", self.path);
          }
          thread::sleep(REMOVE_BACKOFF);
        }
        Err(e) => {
          return Err(Error::Cgroup(format!("cannot remove {}: {e}", self.path)))
        }
      }
    }

    Err(Error::Cgroup(format!(
      "{} still busy after {REMOVE_ATTEMPTS} removal attempts",
      self.path
    )))
  }
}

impl Drop for CgroupController {
  fn drop(&mut self) {
    if let Err(error) = self.remove() {
      if thread::panicking() {
        warn!("leaking cgroup {}: {error}", self.path);
      } else {
        panic!("failed to tear down cgroup {}: {error}", self.path);
      }
    }
  }
}

/// The limit files of a child group only exist once the parent delegates
/// the matching controllers through `cgroup.subtree_control`.
fn enable_controllers(root: &Utf8Path) -> Result {
  let subtree_control = root.join("cgroup.subtree_control");

  if !subtree_control.exists() {
    return Ok(());
  }

  if fs::write(&subtree_control, "+cpu +memory +pids").is_ok() {
    return Ok(());
  }

  // Some hierarchies reject the combined write; enabling one controller at a
  // time salvages the rest.
  for controller in ["+cpu", "+memory", "+pids"] {
    fs::write(&subtree_control, controller).map_err(|e| {
      Error::Cgroup(format!(
        "cannot enable {controller} in {subtree_control}: {e}"
      ))
    })?;
  }

  Ok(())
}

fn write_control(path: &Utf8Path, file: &str, value: &str) -> Result {
  let control = path.join(file);

  fs::write(&control, value)
    .map_err(|e| Error::Cgroup(format!("cannot write {control}: {e}")))
}

fn read_control(path: &Utf8Path, file: &str) -> Result<String> {
  let control = path.join(file);

  fs::read_to_string(&control)
    .map_err(|e| Error::Cgroup(format!("cannot read {control}: {e}")))
}

fn parse_cpu_stat(content: &str) -> Result<CpuUsage> {
  let mut usage = CpuUsage::default();
  let mut seen = 0;

  for line in content.lines() {
    let mut fields = line.split_whitespace();

    let (Some(key), Some(value)) = (fields.next(), fields.next()) else {
      continue;
    };

    let slot = match key {
      "usage_usec" => &mut usage.total,
      "user_usec" => &mut usage.user,
      "system_usec" => &mut usage.system,
      _ => continue,
    };

    let micros = value
      .parse()
      .map_err(|e| Error::Cgroup(format!("cannot parse cpu.stat `{key}`: {e}")))?;

    *slot = Duration::from_micros(micros);
    seen += 1;
  }

  ensure!(
    seen == 3,
    Error::Cgroup("cpu.stat is missing usage fields".into())
  );

  Ok(usage)
}
