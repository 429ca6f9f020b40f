use super::*;

/// A value that travels over a [`Transfer`] as one fixed-size frame.
///
/// Both endpoints live on the same machine, so fields are encoded in native
/// width and little-endian order with no framing beyond the fixed length.
pub trait Message: Sized {
  const SIZE: usize;

  fn encode(&self) -> Vec<u8>;

  fn decode(frame: &[u8]) -> Result<Self>;
}

impl Message for u8 {
  const SIZE: usize = 1;

  fn encode(&self) -> Vec<u8> {
    vec![*self]
  }

  fn decode(frame: &[u8]) -> Result<Self> {
    ensure!(
      frame.len() == Self::SIZE,
      Error::Channel("truncated byte frame".into())
    );

    Ok(frame[0])
  }
}

impl Message for i32 {
  const SIZE: usize = 4;

  fn encode(&self) -> Vec<u8> {
    self.to_le_bytes().to_vec()
  }

  fn decode(frame: &[u8]) -> Result<Self> {
    let bytes = frame
      .try_into()
      .map_err(|_| Error::Channel("truncated integer frame".into()))?;

    Ok(i32::from_le_bytes(bytes))
  }
}

/// An ordered one-shot message channel over a pipe.
///
/// Created before a fork, it is usable from both sides afterwards: one
/// process sends, the other receives, and each frame is a happens-before
/// barrier between them. The descriptors are close-on-exec, so a payload
/// that execs cannot inherit the channel.
#[derive(Debug)]
pub struct Transfer {
  reader: File,
  writer: File,
}

impl Transfer {
  pub fn new() -> Result<Self> {
    let (reader, writer) =
      pipe2(OFlag::O_CLOEXEC).map_err(|e| Error::Channel(format!("cannot create pipe: {e}")))?;

    Ok(Self {
      reader: File::from(reader),
      writer: File::from(writer),
    })
  }

  pub fn send<M: Message>(&mut self, message: &M) -> Result {
    let frame = message.encode();

    debug_assert_eq!(frame.len(), M::SIZE);

    self
      .writer
      .write_all(&frame)
      .map_err(|e| Error::Channel(format!("send failed: {e}")))
  }

  pub fn recv<M: Message>(&mut self) -> Result<M> {
    let mut frame = vec![0; M::SIZE];

    self
      .reader
      .read_exact(&mut frame)
      .map_err(|e| Error::Channel(format!("receive failed: {e}")))?;

    M::decode(&frame)
  }
}

#[cfg(test)]
mod tests {
  use {super::*, assert_matches::assert_matches};

  #[test]
  fn byte_crosses_the_channel() {
    let mut transfer = Transfer::new().unwrap();

    transfer.send(&b's').unwrap();

    assert_eq!(transfer.recv::<u8>().unwrap(), b's');
  }

  #[test]
  fn pid_sized_integers_cross_the_channel() {
    let mut transfer = Transfer::new().unwrap();

    transfer.send(&123456i32).unwrap();
    transfer.send(&-1i32).unwrap();

    assert_eq!(transfer.recv::<i32>().unwrap(), 123456);
    assert_eq!(transfer.recv::<i32>().unwrap(), -1);
  }

  #[test]
  fn messages_arrive_in_order_across_a_fork() {
    let mut transfer = Transfer::new().unwrap();

    let sender = execute(
      || {
        transfer.send(&1i32)?;
        transfer.send(&2i32)?;
        Ok(())
      },
      ExecuteArgs::default(),
    )
    .unwrap();

    assert_eq!(sender.wait().unwrap(), ExitStatus::Exited(0));

    assert_eq!(transfer.recv::<i32>().unwrap(), 1);
    assert_eq!(transfer.recv::<i32>().unwrap(), 2);
  }

  #[test]
  fn decode_rejects_short_frames() {
    assert_matches!(i32::decode(&[1, 2]), Err(Error::Channel(_)));
    assert_matches!(u8::decode(&[]), Err(Error::Channel(_)));
  }
}
