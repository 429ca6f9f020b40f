use super::*;

/// A scoped mount.
///
/// Dropping the guard unmounts the target; a guard that is [`detach`]ed
/// instead hands the unmount obligation to the enclosing mount namespace,
/// which releases every remaining mount when its last member exits.
///
/// [`detach`]: Mount::detach
#[derive(Debug)]
pub struct Mount {
  armed: bool,
  target: Utf8PathBuf,
}

impl Mount {
  /// Mount a size-limited in-memory filesystem at `target`.
  pub fn tmpfs(target: &Utf8Path, size_bytes: u64) -> Result<Self> {
    mount(
      Some("tmpfs"),
      target.as_std_path(),
      Some("tmpfs"),
      MsFlags::empty(),
      Some(tmpfs_data(size_bytes).as_str()),
    )
    .map_err(|e| Error::Mount(format!("cannot mount tmpfs at {target}: {e}")))?;

    Ok(Self::armed(target))
  }

  /// Bind a single host file at `target`, creating the mount point.
  pub fn bind_file(source: &Path, target: &Utf8Path) -> Result<Self> {
    File::create(target)
      .map_err(|e| Error::Mount(format!("cannot create mount point {target}: {e}")))?;

    mount(
      Some(source),
      target.as_std_path(),
      None::<&str>,
      MsFlags::MS_BIND,
      None::<&str>,
    )
    .map_err(|e| {
      Error::Mount(format!(
        "cannot bind {} at {target}: {e}",
        source.display()
      ))
    })?;

    Ok(Self::armed(target))
  }

  /// Bind a host directory read-only at `target`, creating the mount point.
  pub fn bind_dir(source: &Path, target: &Utf8Path) -> Result<Self> {
    fs::create_dir_all(target)
      .map_err(|e| Error::Mount(format!("cannot create mount point {target}: {e}")))?;

    mount(
      Some(source),
      target.as_std_path(),
      None::<&str>,
      MsFlags::MS_BIND,
      None::<&str>,
    )
    .map_err(|e| {
      Error::Mount(format!(
        "cannot bind {} at {target}: {e}",
        source.display()
      ))
    })?;

    let guard = Self::armed(target);

    // A bind mount ignores MS_RDONLY on creation; read-only needs a remount.
    mount(
      None::<&str>,
      target.as_std_path(),
      None::<&str>,
      MsFlags::MS_BIND | MsFlags::MS_REMOUNT | MsFlags::MS_RDONLY,
      None::<&str>,
    )
    .map_err(|e| Error::Mount(format!("cannot remount {target} read-only: {e}")))?;

    Ok(guard)
  }

  /// Relinquish the unmount obligation; the mount now lives as long as the
  /// mount namespace it was created in.
  pub fn detach(mut self) {
    self.armed = false;
  }

  pub fn target(&self) -> &Utf8Path {
    &self.target
  }

  fn armed(target: &Utf8Path) -> Self {
    Self {
      armed: true,
      target: target.to_path_buf(),
    }
  }

  pub(crate) fn unmount(&mut self) -> Result {
    self.armed = false;

    umount2(self.target.as_std_path(), MntFlags::MNT_DETACH)
      .map_err(|e| Error::Mount(format!("cannot unmount {}: {e}", self.target)))
  }
}

impl Drop for Mount {
  fn drop(&mut self) {
    if !self.armed {
      return;
    }

    if let Err(error) = self.unmount() {
      if thread::panicking() {
        warn!("leaking mount {}: {error}", self.target);
      } else {
        panic!("failed to release mount {}: {error}", self.target);
      }
    }
  }
}

fn tmpfs_data(size_bytes: u64) -> String {
  format!("size={size_bytes}")
}
