use crate::window::{SlidingWindow, WindowError};

/// A block ready to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxBlock {
  /// Block number
  pub num: u32,
  /// The slice of the payload this block carries
  pub data: Vec<u8>,
  /// Whether blocks follow this one
  pub more: bool,
}

/// Sending side of a selective-repeat transfer.
///
/// The window holds one "delivered" flag per block in flight. It starts out
/// pre-filled at negative indices, so the first `window_size` calls to
/// [`SrTx::pop_block`] yield blocks right away; after that every delivered
/// block at the front of the window lets one more block out.
///
/// ```
/// use coala::layer::arq::tx::SrTx;
///
/// let tx = SrTx::new(vec![7; 10], 2, 4);
/// assert_eq!(tx.pop_block().map(|b| b.num), Some(0));
/// assert_eq!(tx.pop_block().map(|b| b.num), Some(1));
/// assert_eq!(tx.pop_block(), None);
///
/// tx.did_transmit(0).unwrap();
/// let last = tx.pop_block().unwrap();
/// assert_eq!((last.num, last.data.len(), last.more), (2, 2, false));
/// ```
#[derive(Debug)]
pub struct SrTx {
  data: Vec<u8>,
  block_size: usize,
  window: SlidingWindow<bool>,
}

impl SrTx {
  /// Prepare to send `data` in blocks of `block_size` bytes,
  /// keeping at most `window_size` of them in flight
  pub fn new(data: Vec<u8>, window_size: usize, block_size: usize) -> Self {
    let block_size = block_size.max(1);
    let total = data.len() / block_size + usize::from(data.len() % block_size != 0);
    let size = window_size.min(total);

    let window = SlidingWindow::new(size, -(size as i64));
    (-(size as i64)..0).for_each(|ix| {
                          // within bounds by construction
                          let _ = window.set(true, ix);
                        });

    Self { data,
           block_size,
           window }
  }

  /// The payload being sent
  pub fn data(&self) -> &[u8] {
    &self.data
  }

  /// Block size in bytes
  pub fn block_size(&self) -> usize {
    self.block_size
  }

  /// Number of blocks kept in flight
  pub fn window_size(&self) -> usize {
    self.window.size()
  }

  /// Number of blocks the payload is split into
  pub fn total_blocks(&self) -> usize {
    let len = self.data.len();
    len / self.block_size + usize::from(len % self.block_size != 0)
  }

  /// The peer acknowledged a block
  pub fn did_transmit(&self, num: u32) -> Result<(), WindowError> {
    self.window.set(true, i64::from(num))
  }

  /// Whether every block up to the end of the payload was acknowledged
  pub fn is_completed(&self) -> bool {
    let delivered = self.window.offset() + self.window.filled_prefix() as i64;
    delivered.max(0) as usize * self.block_size >= self.data.len()
  }

  /// The next block to send, if the window lets one out
  pub fn pop_block(&self) -> Option<TxBlock> {
    let (_, num) = self.window.advance_with_tail()?;
    if num < 0 {
      return None;
    }

    let start = (num as usize).saturating_mul(self.block_size);
    let end = start.saturating_add(self.block_size).min(self.data.len());
    if start >= end {
      return None;
    }

    Some(TxBlock { num: num as u32,
                   data: self.data[start..end].to_vec(),
                   more: end != self.data.len() })
  }
}
