use super::*;

/// Names one sandbox instance.
///
/// The same id keys both the cgroup directory and the container root, so two
/// concurrent runs must use distinct ids. Deriving the id from the calling
/// process id guarantees that for the drivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxId(String);

impl SandboxId {
  pub fn new(prefix: &str) -> Result<Self> {
    Self::from_name(format!("{prefix}_{}", std::process::id()))
  }

  pub fn from_name(name: impl Into<String>) -> Result<Self> {
    let name = name.into();

    ensure!(!name.is_empty(), Error::SandboxId("must not be empty".into()));

    ensure!(
      name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-'),
      Error::SandboxId(format!(
        "`{name}` may contain only ascii letters, digits, `_` and `-`"
      ))
    );

    Ok(Self(name))
  }

  pub fn as_str(&self) -> &str {
    &self.0
  }
}

impl fmt::Display for SandboxId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.0)
  }
}
