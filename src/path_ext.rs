use super::*;

pub trait PathExt {
  fn create(&self, mode: u32) -> Result;
  fn recreate(&self, mode: u32) -> Result;
}

impl PathExt for Utf8PathBuf {
  fn create(&self, mode: u32) -> Result {
    fs::create_dir_all(self)?;
    fs::set_permissions(self, fs::Permissions::from_mode(mode))?;
    Ok(())
  }

  fn recreate(&self, mode: u32) -> Result {
    if self.exists() {
      fs::remove_dir_all(self)?;
    }

    self.create(mode)
  }
}
