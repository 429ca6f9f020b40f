#![cfg(feature = "integration")]

use {
  assert_matches::assert_matches,
  nix::unistd::Uid,
  std::{fs, hint, path::Path, thread, time::Duration},
  warden::{
    execute, run_and_wait, CgroupConfig, CgroupController, Container, ExecuteArgs,
    ExitStatus, SandboxId, Verdict, WaitParameters,
  },
};

const SIGKILL: i32 = 9;

fn sandboxing_available() -> bool {
  if !Uid::effective().is_root() {
    eprintln!("skipping: requires root");
    return false;
  }

  if !Path::new("/sys/fs/cgroup/cgroup.controllers").exists() {
    eprintln!("skipping: requires cgroup v2");
    return false;
  }

  true
}

fn parameters() -> WaitParameters {
  WaitParameters {
    check_interval: Duration::from_millis(10),
    cpu_time_limit: Duration::from_secs(60),
    memory_limit_bytes: 1 << 30,
    wall_time_limit: Duration::from_secs(60),
  }
}

#[test]
fn cgroup_lifecycle() {
  if !sandboxing_available() {
    return;
  }

  let id = SandboxId::new("itest-cgroup").unwrap();

  let cgroup = CgroupController::new(
    &id,
    CgroupConfig::default()
      .pids_limit(4)
      .memory_high(64 << 20)
      .memory_max(96 << 20)
      .cpu_window(Duration::from_millis(100), Duration::from_millis(100)),
  )
  .unwrap();

  let path = cgroup.path().to_path_buf();

  let child = execute(
    || {
      thread::sleep(Duration::from_secs(60));
      Ok(())
    },
    ExecuteArgs::default()
      .into_cgroup(cgroup.fd())
      .create_pid_fd(),
  )
  .unwrap();

  assert!(cgroup.current_memory().is_ok());

  let first = cgroup.cpu_usage().unwrap();
  let second = cgroup.cpu_usage().unwrap();

  assert!(second.total >= first.total);

  cgroup.kill_all().unwrap();

  assert_eq!(child.wait().unwrap(), ExitStatus::Signaled(SIGKILL));

  // Killing an already-empty group is a no-op.
  cgroup.kill_all().unwrap();

  cgroup.destroy().unwrap();

  assert!(!path.exists());
}

#[test]
fn container_hides_the_host_filesystem() {
  if !sandboxing_available() {
    return;
  }

  let id = SandboxId::new("itest-container").unwrap();
  let mut container = Container::new(&id).unwrap();
  let root = container.path().to_path_buf();

  let sandbox = &mut container;

  let child = execute(
    || {
      sandbox.mount_tmpfs(8 << 20)?;

      fs::write(sandbox.path().join("marker"), b"inside")?;

      sandbox.detach_mounts();
      sandbox.enter()?;

      // A panic would unwind through the child's copy of the container, so
      // report mismatches as errors instead.
      for (path, expected) in [("/marker", true), ("/usr", false), ("/etc", false)] {
        if Path::new(path).exists() != expected {
          return Err(warden::Error::Container(format!(
            "{path} visibility is wrong inside the sandbox"
          )));
        }
      }

      Ok(())
    },
    ExecuteArgs::default().new_user_ns().new_mount_ns(),
  )
  .unwrap();

  assert_eq!(child.wait().unwrap(), ExitStatus::Exited(0));

  drop(container);

  assert!(!root.exists());
}

#[test]
fn prompt_payload_finishes_ok() {
  if !sandboxing_available() {
    return;
  }

  let id = SandboxId::new("itest-finish").unwrap();

  let cgroup =
    CgroupController::new(&id, CgroupConfig::default().pids_limit(4)).unwrap();

  let statistics = run_and_wait(
    || {
      execute(
        || Ok(()),
        ExecuteArgs::default()
          .into_cgroup(cgroup.fd())
          .create_pid_fd(),
      )
    },
    parameters(),
    &cgroup,
    &mut [],
  )
  .unwrap();

  assert_eq!(statistics.verdict, Verdict::Finished);
  assert_eq!(statistics.exit_status, ExitStatus::Exited(0));
  assert!(statistics.wall_time < Duration::from_secs(1));

  let path = cgroup.path().to_path_buf();

  cgroup.destroy().unwrap();

  assert!(!path.exists());
}

#[test]
fn spinning_payload_hits_the_cpu_limit() {
  if !sandboxing_available() {
    return;
  }

  let id = SandboxId::new("itest-spin").unwrap();

  let cgroup = CgroupController::new(
    &id,
    CgroupConfig::default()
      .pids_limit(4)
      .cpu_window(Duration::from_millis(100), Duration::from_millis(100)),
  )
  .unwrap();

  let params = WaitParameters {
    cpu_time_limit: Duration::from_millis(300),
    ..parameters()
  };

  let statistics = run_and_wait(
    || {
      execute(
        || loop {
          hint::spin_loop();
        },
        ExecuteArgs::default()
          .into_cgroup(cgroup.fd())
          .create_pid_fd(),
      )
    },
    params,
    &cgroup,
    &mut [],
  )
  .unwrap();

  assert_eq!(statistics.verdict, Verdict::CpuTimeLimit);
  assert_eq!(statistics.exit_status, ExitStatus::Signaled(SIGKILL));
  assert!(statistics.cpu_time.total >= Duration::from_millis(300));

  // Kernel accounting may round, but user + system tracks the total.
  let split = statistics.cpu_time.user + statistics.cpu_time.system;
  let drift = if split > statistics.cpu_time.total {
    split - statistics.cpu_time.total
  } else {
    statistics.cpu_time.total - split
  };

  assert!(drift < Duration::from_millis(100));

  cgroup.destroy().unwrap();
}

#[test]
fn sleeping_payload_hits_the_wall_deadline() {
  if !sandboxing_available() {
    return;
  }

  let id = SandboxId::new("itest-sleep").unwrap();

  let cgroup =
    CgroupController::new(&id, CgroupConfig::default().pids_limit(4)).unwrap();

  let params = WaitParameters {
    wall_time_limit: Duration::from_millis(300),
    ..parameters()
  };

  let statistics = run_and_wait(
    || {
      execute(
        || {
          thread::sleep(Duration::from_secs(60));
          Ok(())
        },
        ExecuteArgs::default()
          .into_cgroup(cgroup.fd())
          .create_pid_fd(),
      )
    },
    params,
    &cgroup,
    &mut [],
  )
  .unwrap();

  assert_eq!(statistics.verdict, Verdict::WallTimeLimit);
  assert_eq!(statistics.exit_status, ExitStatus::Signaled(SIGKILL));
  assert_eq!(statistics.wall_time, Duration::from_millis(300));

  cgroup.destroy().unwrap();
}

#[test]
fn hungry_payload_is_stopped_by_the_memory_limit() {
  if !sandboxing_available() {
    return;
  }

  let id = SandboxId::new("itest-alloc").unwrap();

  let cgroup = CgroupController::new(
    &id,
    CgroupConfig::default()
      .pids_limit(4)
      .memory_high(32 << 20)
      .memory_max(48 << 20),
  )
  .unwrap();

  let params = WaitParameters {
    memory_limit_bytes: 32 << 20,
    ..parameters()
  };

  let statistics = run_and_wait(
    || {
      execute(
        || {
          let mut hoard: Vec<u8> = Vec::new();
          hoard.resize(96 << 20, 1);
          hint::black_box(&hoard);
          thread::sleep(Duration::from_secs(60));
          Ok(())
        },
        ExecuteArgs::default()
          .into_cgroup(cgroup.fd())
          .create_pid_fd(),
      )
    },
    params,
    &cgroup,
    &mut [],
  )
  .unwrap();

  // Either the sampler catches the breach first, or the kernel OOM-kills the
  // payload before a tick lands. Both are valid outcomes.
  match statistics.verdict {
    Verdict::MemoryLimit => assert!(statistics.max_memory_bytes > 32 << 20),
    Verdict::Finished => {
      assert_matches!(statistics.exit_status, ExitStatus::Signaled(SIGKILL))
    }
    verdict => panic!("unexpected verdict {verdict:?}"),
  }

  cgroup.destroy().unwrap();
}
