use super::ArqError;
use crate::window::SlidingWindow;

/// Receiving side of a selective-repeat transfer.
///
/// Blocks may arrive in any order as long as they fit in the window;
/// the contiguous run at the front of the window is moved to the
/// accumulator as soon as it forms.
///
/// ```
/// use coala::layer::arq::rx::SrRx;
///
/// let rx = SrRx::new(4);
/// rx.did_receive(b"cd".to_vec(), 1, 4, false).unwrap();
/// assert_eq!(rx.data(), None);
///
/// rx.did_receive(b"ab".to_vec(), 0, 4, true).unwrap();
/// assert_eq!(rx.data(), Some(b"abcd".to_vec()));
/// ```
#[derive(Debug)]
pub struct SrRx {
  window: SlidingWindow<Vec<u8>>,
  acc: std::sync::RwLock<Acc>,
}

#[derive(Debug, Default)]
struct Acc {
  bytes: Vec<u8>,
  last: Option<i64>,
}

impl SrRx {
  /// Expect a transfer with `window_size` blocks in flight
  pub fn new(window_size: usize) -> Self {
    Self { window: SlidingWindow::new(window_size, 0),
           acc: Default::default() }
  }

  /// Window size negotiated for this transfer
  pub fn window_size(&self) -> usize {
    self.window.size()
  }

  /// Store a block.
  ///
  /// The peer must keep the window size it started the transfer with.
  pub fn did_receive(&self, block: Vec<u8>, num: u32, window_size: usize, more: bool) -> Result<(), ArqError> {
    if window_size != self.window.size() {
      return Err(ArqError::WindowSizeChange { was: self.window.size(),
                                              now: window_size });
    }

    self.window
        .set(block, i64::from(num))
        .map_err(ArqError::Window)?;

    let mut acc = match self.acc.write() {
      | Ok(a) => a,
      | Err(p) => p.into_inner(),
    };

    if !more {
      acc.last = Some(i64::from(num));
    }

    while let Some(b) = self.window.advance() {
      acc.bytes.extend(b);
    }

    Ok(())
  }

  /// Bytes received in order so far
  pub fn accumulated(&self) -> Vec<u8> {
    self.acc
        .read()
        .map(|a| a.bytes.clone())
        .unwrap_or_default()
  }

  /// The whole payload, once the final block and every block before it arrived
  pub fn data(&self) -> Option<Vec<u8>> {
    let acc = self.acc.read().ok()?;
    let complete = acc.last == Some(self.window.offset() - 1);
    complete.then(|| acc.bytes.clone())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn reassembles_out_of_order() {
    let payload = (0..=255u8).cycle().take(5 * 16 - 3).collect::<Vec<_>>();
    let blocks = payload.chunks(16).map(|c| c.to_vec()).collect::<Vec<_>>();
    let rx = SrRx::new(3);

    for num in [1usize, 0, 2, 4, 3] {
      assert_eq!(rx.data(), None);
      rx.did_receive(blocks[num].clone(), num as u32, 3, num != 4)
        .unwrap();
    }

    assert_eq!(rx.data(), Some(payload));
  }

  #[test]
  fn duplicates_are_harmless() {
    let rx = SrRx::new(2);
    rx.did_receive(vec![1], 0, 2, true).unwrap();
    rx.did_receive(vec![1], 0, 2, true).unwrap();
    rx.did_receive(vec![2], 1, 2, false).unwrap();
    assert_eq!(rx.data(), Some(vec![1, 2]));
  }

  #[test]
  fn window_size_must_not_change() {
    let rx = SrRx::new(2);
    assert_eq!(rx.did_receive(vec![1], 0, 3, true),
               Err(ArqError::WindowSizeChange { was: 2, now: 3 }));
  }

  #[test]
  fn blocks_past_the_window_are_rejected() {
    let rx = SrRx::new(2);
    assert!(matches!(rx.did_receive(vec![1], 2, 2, true), Err(ArqError::Window(_))));
  }
}
