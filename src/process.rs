use super::*;

// clone3-only flags; libc exposes the rest through the classic clone
// constants.
const CLONE_PIDFD: u64 = 0x1000;
const CLONE_INTO_CGROUP: u64 = 0x2_0000_0000;

/// Kernel `struct clone_args`, passed verbatim to clone3(2).
#[repr(C)]
#[derive(Debug, Default, Clone, Copy)]
struct CloneArgs {
  flags: u64,
  pidfd: u64,
  child_tid: u64,
  parent_tid: u64,
  exit_signal: u64,
  stack: u64,
  stack_size: u64,
  tls: u64,
  set_tid: u64,
  set_tid_size: u64,
  cgroup: u64,
}

/// Configuration for [`execute`]: which namespaces the child is born into,
/// whether it is placed into a cgroup as part of the clone, and whether a
/// pidfd is returned for it.
#[derive(Debug, Default)]
pub struct ExecuteArgs<'a> {
  /// Return a pidfd alongside the pid, usable for poll-based exit
  /// notification and race-free signalling.
  create_pid_fd: bool,

  /// Place the child into this cgroup as part of the clone, so it never runs
  /// a single instruction unaccounted.
  into_cgroup: Option<BorrowedFd<'a>>,

  /// Give the child an independent mount table.
  new_mount_ns: bool,

  /// Give the child an empty, isolated network stack.
  new_network_ns: bool,

  /// Make the child pid 1 of a fresh pid namespace.
  new_pid_ns: bool,

  /// Run the child in a new user namespace, mapped to see itself as root.
  new_user_ns: bool,

  /// Give the child its own hostname and domainname.
  new_uts_ns: bool,
}

impl<'a> ExecuteArgs<'a> {
  pub fn create_pid_fd(self) -> Self {
    Self {
      create_pid_fd: true,
      ..self
    }
  }

  pub fn into_cgroup(self, cgroup: BorrowedFd<'a>) -> Self {
    Self {
      into_cgroup: Some(cgroup),
      ..self
    }
  }

  pub fn new_mount_ns(self) -> Self {
    Self {
      new_mount_ns: true,
      ..self
    }
  }

  pub fn new_network_ns(self) -> Self {
    Self {
      new_network_ns: true,
      ..self
    }
  }

  pub fn new_pid_ns(self) -> Self {
    Self {
      new_pid_ns: true,
      ..self
    }
  }

  pub fn new_user_ns(self) -> Self {
    Self {
      new_user_ns: true,
      ..self
    }
  }

  pub fn new_uts_ns(self) -> Self {
    Self {
      new_uts_ns: true,
      ..self
    }
  }

  fn clone_flags(&self) -> u64 {
    let mut flags = 0;

    if self.create_pid_fd {
      flags |= CLONE_PIDFD;
    }

    if self.into_cgroup.is_some() {
      flags |= CLONE_INTO_CGROUP;
    }

    if self.new_mount_ns {
      flags |= libc::CLONE_NEWNS as u64;
    }

    if self.new_network_ns {
      flags |= libc::CLONE_NEWNET as u64;
    }

    if self.new_pid_ns {
      flags |= libc::CLONE_NEWPID as u64;
    }

    if self.new_user_ns {
      flags |= libc::CLONE_NEWUSER as u64;
    }

    if self.new_uts_ns {
      flags |= libc::CLONE_NEWUTS as u64;
    }

    flags
  }
}

/// A launched child process.
///
/// The pidfd, when requested, stays live from launch until [`wait`], which
/// consumes the handle and reaps the exit status exactly once.
///
/// [`wait`]: ProcessHandle::wait
#[derive(Debug)]
pub struct ProcessHandle {
  pid: Pid,
  pidfd: Option<OwnedFd>,
}

impl ProcessHandle {
  pub fn pid(&self) -> Pid {
    self.pid
  }

  pub fn pid_fd(&self) -> Option<BorrowedFd<'_>> {
    self.pidfd.as_ref().map(|fd| fd.as_fd())
  }

  /// Deliver a signal, via the pidfd when one exists so the target cannot be
  /// confused with a recycled pid.
  pub fn send_signal(&self, signal: Signal) -> Result {
    match &self.pidfd {
      Some(fd) => {
        let ret = unsafe {
          libc::syscall(
            libc::SYS_pidfd_send_signal,
            fd.as_raw_fd(),
            signal as libc::c_int,
            std::ptr::null::<libc::siginfo_t>(),
            0,
          )
        };

        ensure!(
          ret == 0,
          Error::Launch(format!("pidfd_send_signal: {}", Errno::last()))
        );

        Ok(())
      }
      None => Ok(kill(self.pid, signal)?),
    }
  }

  /// Block until the child exits and reap its status.
  pub fn wait(self) -> Result<ExitStatus> {
    loop {
      match waitpid(self.pid, None) {
        Ok(WaitStatus::Exited(_, code)) => return Ok(ExitStatus::Exited(code as u8)),
        Ok(WaitStatus::Signaled(_, signal, _)) => {
          return Ok(ExitStatus::Signaled(signal as i32))
        }
        Ok(_) | Err(Errno::EINTR) => continue,
        Err(e) => return Err(e.into()),
      }
    }
  }
}

/// Fork a child into the configured namespaces and run `child` there.
///
/// The closure runs in a freshly cloned process: everything it captures must
/// be safe to use after a fork, which in practice means file descriptors and
/// values the parent no longer mutates. If the closure returns an error, the
/// child prints it to stderr and exits 1; the parent observes that as an
/// ordinary non-zero exit.
pub fn execute<'a, F>(child: F, args: ExecuteArgs<'a>) -> Result<ProcessHandle>
where
  F: FnOnce() -> Result<()>,
{
  let outer_uid = getuid();
  let outer_gid = getgid();

  let mut pidfd: RawFd = -1;

  let mut clone_args = CloneArgs {
    flags: args.clone_flags(),
    exit_signal: libc::SIGCHLD as u64,
    ..Default::default()
  };

  if args.create_pid_fd {
    clone_args.pidfd = &mut pidfd as *mut RawFd as u64;
  }

  if let Some(cgroup) = &args.into_cgroup {
    clone_args.cgroup = cgroup.as_raw_fd() as u64;
  }

  let ret = unsafe {
    libc::syscall(
      libc::SYS_clone3,
      &clone_args as *const CloneArgs,
      std::mem::size_of::<CloneArgs>(),
    )
  };

  match ret {
    -1 => Err(Error::Launch(format!("clone3: {}", Errno::last()))),
    0 => {
      let outcome = if args.new_user_ns {
        map_self_as_root(outer_uid.as_raw(), outer_gid.as_raw()).and_then(|()| child())
      } else {
        child()
      };

      if let Err(error) = outcome {
        eprintln!("sandbox child failed: {error}");
        unsafe { libc::_exit(1) }
      }

      unsafe { libc::_exit(0) }
    }
    pid => {
      debug!("launched child {pid}");

      Ok(ProcessHandle {
        pid: Pid::from_raw(pid as libc::pid_t),
        pidfd: args
          .create_pid_fd
          .then(|| unsafe { OwnedFd::from_raw_fd(pidfd) }),
      })
    }
  }
}

/// Cap the size of any file the calling process creates or extends; growing
/// past it fails with EFBIG and raises SIGXFSZ.
pub fn set_file_size_limit(bytes: u64) -> Result {
  Ok(setrlimit(Resource::RLIMIT_FSIZE, bytes, bytes)?)
}

pub(crate) fn cstring(value: &str) -> Result<CString> {
  CString::new(value)
    .map_err(|_| Error::Launch(format!("`{value}` contains an interior nul byte")))
}

/// Map the calling process to uid/gid 0 inside its fresh user namespace.
///
/// An unprivileged process may install the identity mapping of its own
/// credentials; setgroups has to be denied before the gid map is accepted.
fn map_self_as_root(outer_uid: u32, outer_gid: u32) -> Result {
  let write = |file: &str, contents: String| -> Result {
    fs::write(format!("/proc/self/{file}"), contents)
      .map_err(|e| Error::Launch(format!("cannot write {file}: {e}")))
  };

  write("setgroups", "deny".into())?;
  write("uid_map", format!("0 {outer_uid} 1"))?;
  write("gid_map", format!("0 {outer_gid} 1"))?;

  Ok(())
}

#[cfg(test)]
mod tests {
  use {super::*, assert_matches::assert_matches};

  #[test]
  fn clone_flags_reflect_requested_namespaces() {
    let flags = ExecuteArgs::default()
      .new_mount_ns()
      .new_pid_ns()
      .new_user_ns()
      .clone_flags();

    assert_eq!(
      flags,
      libc::CLONE_NEWNS as u64 | libc::CLONE_NEWPID as u64 | libc::CLONE_NEWUSER as u64
    );

    assert_eq!(ExecuteArgs::default().clone_flags(), 0);
  }

  #[test]
  fn pidfd_flag_is_independent_of_namespaces() {
    let flags = ExecuteArgs::default().create_pid_fd().clone_flags();

    assert_eq!(flags, CLONE_PIDFD);
  }

  #[test]
  fn child_exit_code_is_reaped() {
    let handle = execute(|| Ok(()), ExecuteArgs::default()).unwrap();

    assert!(handle.pid_fd().is_none());
    assert_eq!(handle.wait().unwrap(), ExitStatus::Exited(0));
  }

  #[test]
  fn failing_child_exits_nonzero() {
    let handle = execute(
      || Err(Error::Launch("deliberate".into())),
      ExecuteArgs::default(),
    )
    .unwrap();

    assert_eq!(handle.wait().unwrap(), ExitStatus::Exited(1));
  }

  #[test]
  fn pidfd_is_created_on_request() {
    let handle =
      execute(|| Ok(()), ExecuteArgs::default().create_pid_fd()).unwrap();

    assert!(handle.pid_fd().is_some());
    assert_eq!(handle.wait().unwrap(), ExitStatus::Exited(0));
  }

  #[test]
  fn signal_through_pidfd_terminates_child() {
    let handle = execute(
      || {
        thread::sleep(Duration::from_secs(10));
        Ok(())
      },
      ExecuteArgs::default().create_pid_fd(),
    )
    .unwrap();

    handle.send_signal(Signal::SIGKILL).unwrap();

    assert_matches!(
      handle.wait().unwrap(),
      ExitStatus::Signaled(signal) if signal == Signal::SIGKILL as i32
    );
  }
}
