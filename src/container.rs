use super::*;

/// All sandbox roots are created under this directory.
const CONTAINER_BASE: &str = "/tmp/warden";

/// A sandbox filesystem rooted at a host directory named after the sandbox
/// id.
///
/// Mounts are pushed on a stack as they are created and unwound in reverse
/// order when the container is dropped, unless [`detach_mounts`] has handed
/// them to the enclosing mount namespace first. The root directory itself is
/// removed on drop.
///
/// [`detach_mounts`]: Container::detach_mounts
#[derive(Debug)]
pub struct Container {
  mounts: Vec<Mount>,
  root: Utf8PathBuf,
}

impl Container {
  pub fn new(id: &SandboxId) -> Result<Self> {
    Self::with_base(Utf8Path::new(CONTAINER_BASE), id)
  }

  pub fn with_base(base: &Utf8Path, id: &SandboxId) -> Result<Self> {
    let root = base.join(id.as_str());

    root.recreate(0o755)?;

    debug!("created container root {root}");

    Ok(Self {
      mounts: Vec::new(),
      root,
    })
  }

  pub fn path(&self) -> &Utf8Path {
    &self.root
  }

  /// Mount a size-limited tmpfs over the root. Everything the sandbox writes
  /// lands in memory and disappears with the mount.
  pub fn mount_tmpfs(&mut self, size_bytes: u64) -> Result {
    let guard = Mount::tmpfs(&self.root, size_bytes)?;

    self.mounts.push(guard);

    Ok(())
  }

  /// Bind a host file at `inner`, a path relative to the sandbox root.
  pub fn bind_file(&mut self, source: &Path, inner: &str) -> Result {
    let target = self.target(inner)?;

    let guard = Mount::bind_file(source, &target)?;

    self.mounts.push(guard);

    Ok(())
  }

  /// Bind a host directory read-only at `inner`, a path relative to the
  /// sandbox root. Used to supply toolchains and libraries.
  pub fn bind_dir(&mut self, source: &Path, inner: &str) -> Result {
    let target = self.target(inner)?;

    let guard = Mount::bind_dir(source, &target)?;

    self.mounts.push(guard);

    Ok(())
  }

  /// Hand every mount to the enclosing mount namespace.
  ///
  /// Called once setup is complete and a child must keep seeing the mounts
  /// after this object goes away; the namespace unmounts them when its last
  /// member exits.
  pub fn detach_mounts(&mut self) {
    while let Some(guard) = self.mounts.pop() {
      guard.detach();
    }
  }

  /// Make the sandbox root the calling process's filesystem root. Only
  /// bind-mounted and tmpfs contents remain visible afterwards.
  ///
  /// Must be called inside a fresh mount namespace.
  pub fn enter(&self) -> Result {
    chroot(self.root.as_std_path())?;
    chdir("/")?;

    Ok(())
  }

  fn target(&self, inner: &str) -> Result<Utf8PathBuf> {
    ensure!(
      !inner.is_empty() && !inner.starts_with('/'),
      Error::Container(format!("mount path `{inner}` must be relative"))
    );

    ensure!(
      Utf8Path::new(inner)
        .components()
        .all(|c| matches!(c, camino::Utf8Component::Normal(_))),
      Error::Container(format!("mount path `{inner}` must not leave the root"))
    );

    Ok(self.root.join(inner))
  }

  fn cleanup(&mut self) -> Result {
    while let Some(mut guard) = self.mounts.pop() {
      guard.unmount()?;
    }

    match fs::remove_dir_all(&self.root) {
      Ok(()) => {
        debug!("removed container root {}", self.root);
        Ok(())
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
      Err(e) => Err(Error::Container(format!(
        "cannot remove root {}: {e}",
        self.root
      ))),
    }
  }
}

impl Drop for Container {
  fn drop(&mut self) {
    if let Err(error) = self.cleanup() {
      if thread::panicking() {
        warn!("leaking container {}: {error}", self.root);
      } else {
        panic!("failed to tear down container {}: {error}", self.root);
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use {super::*, assert_matches::assert_matches, tempfile::TempDir};

  fn fake_base() -> (TempDir, Utf8PathBuf) {
    let temp = TempDir::new().unwrap();
    let base = Utf8PathBuf::try_from(temp.path().to_path_buf()).unwrap();
    (temp, base)
  }

  #[test]
  fn root_created_under_base() {
    let (_temp, base) = fake_base();
    let id = SandboxId::from_name("box_7").unwrap();

    let container = Container::with_base(&base, &id).unwrap();

    assert_eq!(container.path(), base.join("box_7"));
    assert!(container.path().is_dir());

    assert_eq!(
      fs::metadata(container.path()).unwrap().permissions().mode() & 0o777,
      0o755
    );
  }

  #[test]
  fn stale_root_is_replaced() {
    let (_temp, base) = fake_base();
    let id = SandboxId::from_name("stale").unwrap();

    let leftover = base.join("stale").join("junk");
    fs::create_dir_all(&leftover).unwrap();

    let container = Container::with_base(&base, &id).unwrap();

    assert!(!leftover.exists());
    assert!(container.path().is_dir());
  }

  #[test]
  fn drop_removes_root() {
    let (_temp, base) = fake_base();
    let id = SandboxId::from_name("transient").unwrap();

    let root = {
      let container = Container::with_base(&base, &id).unwrap();
      container.path().to_path_buf()
    };

    assert!(!root.exists());
  }

  #[test]
  fn mount_targets_resolve_under_root() {
    let (_temp, base) = fake_base();
    let id = SandboxId::from_name("paths").unwrap();

    let container = Container::with_base(&base, &id).unwrap();

    assert_eq!(
      container.target("usr").unwrap(),
      container.path().join("usr")
    );

    assert_eq!(
      container.target("source.cpp").unwrap(),
      container.path().join("source.cpp")
    );
  }

  #[test]
  fn absolute_mount_paths_are_rejected() {
    let (_temp, base) = fake_base();
    let id = SandboxId::from_name("absolute").unwrap();

    let container = Container::with_base(&base, &id).unwrap();

    assert_matches!(
      container.target("/etc"),
      Err(Error::Container(message)) if message.contains("must be relative")
    );
  }

  #[test]
  fn escaping_mount_paths_are_rejected() {
    let (_temp, base) = fake_base();
    let id = SandboxId::from_name("escape").unwrap();

    let container = Container::with_base(&base, &id).unwrap();

    assert_matches!(
      container.target("../outside"),
      Err(Error::Container(message)) if message.contains("must not leave the root")
    );
  }
}
