use super::*;

/// A readiness poller over a fixed set of descriptors.
///
/// [`wait`] blocks until at least one registered descriptor is readable and
/// reports exactly one token per wake-up, in the order the kernel ready list
/// yields them. Callers that race several sources against each other get a
/// deterministic winner for a given kernel state.
///
/// [`wait`]: EventPoller::wait
#[derive(Debug)]
pub struct EventPoller {
  epoll: Epoll,
}

impl EventPoller {
  pub fn new() -> Result<Self> {
    Ok(Self {
      epoll: Epoll::new(EpollCreateFlags::EPOLL_CLOEXEC)?,
    })
  }

  pub fn add(&self, fd: &impl AsFd, token: u64) -> Result {
    Ok(self.epoll.add(fd, EpollEvent::new(EpollFlags::EPOLLIN, token))?)
  }

  pub fn wait(&self) -> Result<u64> {
    let mut events = [EpollEvent::empty(); 1];

    loop {
      match self.epoll.wait(&mut events, EpollTimeout::NONE) {
        Ok(0) | Err(Errno::EINTR) => continue,
        Ok(_) => return Ok(events[0].data()),
        Err(e) => return Err(e.into()),
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use {super::*, nix::fcntl::OFlag, nix::unistd::write};

  #[test]
  fn reports_token_of_ready_descriptor() {
    let (reader, writer) = pipe2(OFlag::O_CLOEXEC).unwrap();

    let poller = EventPoller::new().unwrap();
    poller.add(&reader, 7).unwrap();

    write(&writer, b"x").unwrap();

    assert_eq!(poller.wait().unwrap(), 7);
  }

  #[test]
  fn distinguishes_multiple_descriptors() {
    let (first_reader, _first_writer) = pipe2(OFlag::O_CLOEXEC).unwrap();
    let (second_reader, second_writer) = pipe2(OFlag::O_CLOEXEC).unwrap();

    let poller = EventPoller::new().unwrap();
    poller.add(&first_reader, 1).unwrap();
    poller.add(&second_reader, 2).unwrap();

    write(&second_writer, b"x").unwrap();

    assert_eq!(poller.wait().unwrap(), 2);
  }

  #[test]
  fn observes_timer_expirations() {
    let timer =
      Timer::recurring(Duration::from_millis(5), Duration::from_millis(5)).unwrap();

    let poller = EventPoller::new().unwrap();
    poller.add(&timer, 3).unwrap();

    assert_eq!(poller.wait().unwrap(), 3);

    timer.acknowledge().unwrap();
  }
}
