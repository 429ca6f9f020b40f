use super::*;

#[derive(Debug, Error)]
pub enum Error {
  #[error("cgroup error: {0}")]
  Cgroup(String),
  #[error("channel error: {0}")]
  Channel(String),
  #[error("container error: {0}")]
  Container(String),
  #[error("filesystem error: {0}")]
  Filesystem(#[from] std::io::Error),
  #[error("launch error: {0}")]
  Launch(String),
  #[error("mount error: {0}")]
  Mount(String),
  #[error("proxy finished with unexpected status: {0}")]
  Proxy(ExitStatus),
  #[error("invalid sandbox id: {0}")]
  SandboxId(String),
  #[error("supervisor error: {0}")]
  Supervisor(String),
  #[error("system error: {0}")]
  System(#[from] nix::Error),
}
