#[cfg(test)]
use super::*;

#[macro_export]
macro_rules! ensure {
  ($cond:expr, $err:expr) => {
    if !($cond) {
      return Err($err);
    }
  };
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn ensures_properly() {
    fn validate_interval(interval: Duration) -> Result<()> {
      ensure!(
        !interval.is_zero(),
        Error::Supervisor("check interval must be specified".into())
      );

      Ok(())
    }

    fn validate_id(id: &str) -> Result<()> {
      ensure!(!id.is_empty(), Error::SandboxId("empty".into()));

      Ok(())
    }

    assert!(validate_interval(Duration::from_millis(10)).is_ok());

    assert!(matches!(
      validate_interval(Duration::ZERO),
      Err(Error::Supervisor(_))
    ));

    assert!(matches!(validate_id(""), Err(Error::SandboxId(_))));
  }
}
