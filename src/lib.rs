#[macro_use]
mod ensure;

pub(crate) use {
  camino::{Utf8Path, Utf8PathBuf},
  log::{debug, warn},
  nix::{
    errno::Errno,
    fcntl::OFlag,
    mount::{mount, umount2, MntFlags, MsFlags},
    sys::{
      epoll::{Epoll, EpollCreateFlags, EpollEvent, EpollFlags, EpollTimeout},
      resource::{setrlimit, Resource},
      signal::{kill, Signal},
      time::TimeSpec,
      timerfd::{ClockId, Expiration, TimerFd, TimerFlags, TimerSetTimeFlags},
      wait::{waitpid, WaitStatus},
    },
    unistd::{chdir, chroot, dup2, execvp, getgid, getuid, pipe2, Pid},
  },
  std::{
    ffi::CString,
    fmt,
    fs::{self, File},
    io::{Read, Write},
    os::{
      fd::{AsFd, AsRawFd, BorrowedFd, FromRawFd, OwnedFd, RawFd},
      unix::fs::{OpenOptionsExt, PermissionsExt},
    },
    path::Path,
    thread,
    time::Duration,
  },
  thiserror::Error,
};

mod cgroup;
mod channel;
mod compile;
mod container;
mod error;
mod exit_status;
mod mount;
mod path_ext;
mod poller;
mod process;
mod run;
mod sandbox_id;
mod statistics;
mod supervisor;
mod timer;

pub(crate) use process::cstring;

pub use {
  cgroup::{CgroupConfig, CgroupController, CpuUsage},
  channel::{Message, Transfer},
  compile::compile,
  container::Container,
  error::Error,
  exit_status::ExitStatus,
  mount::Mount,
  path_ext::PathExt,
  poller::EventPoller,
  process::{execute, set_file_size_limit, ExecuteArgs, ProcessHandle},
  run::run,
  sandbox_id::SandboxId,
  statistics::{RunStatistics, Verdict},
  supervisor::{run_and_wait, WaitParameters},
  timer::Timer,
};

pub type Result<T = (), E = Error> = std::result::Result<T, E>;
