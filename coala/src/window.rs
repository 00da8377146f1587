use std::collections::VecDeque;
use std::sync::RwLock;

use crate::sync;

/// Errors encounterable using a [`SlidingWindow`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowError {
  /// Index is past the end of the window
  OutOfBounds {
    /// The index that was set
    index: i64,
    /// Last index the window currently covers
    tail: i64,
  },
}

impl core::fmt::Display for WindowError {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | Self::OutOfBounds { index, tail } => {
        write!(f, "index {} is beyond the window tail {}", index, tail)
      },
    }
  }
}

#[derive(Debug)]
struct Slots<T> {
  offset: i64,
  values: VecDeque<Option<T>>,
}

/// Fixed-size window over a sequence of slots indexed by a
/// monotonically increasing number.
///
/// The window covers `[offset, offset + size)`. Setting a slot below the
/// window is a no-op (it was already consumed), setting one past it fails.
/// The window only moves forward, and only over filled slots.
///
/// ```
/// use coala::window::SlidingWindow;
///
/// let w = SlidingWindow::<&str>::new(2, 0);
/// w.set("b", 1).unwrap();
/// assert_eq!(w.advance(), None);
///
/// w.set("a", 0).unwrap();
/// assert_eq!(w.advance(), Some("a"));
/// assert_eq!(w.advance(), Some("b"));
/// assert_eq!(w.offset(), 2);
///
/// assert!(w.set("z", 0).is_ok());
/// assert!(w.set("too far", 4).is_err());
/// ```
#[derive(Debug)]
pub struct SlidingWindow<T> {
  size: usize,
  slots: RwLock<Slots<T>>,
}

impl<T: Clone> SlidingWindow<T> {
  /// Create an empty window of `size` slots starting at `offset`
  pub fn new(size: usize, offset: i64) -> Self {
    Self { size,
           slots: RwLock::new(Slots { offset,
                                      values: (0..size).map(|_| None).collect() }) }
  }

  /// Number of slots
  pub fn size(&self) -> usize {
    self.size
  }

  /// Index of the first slot
  pub fn offset(&self) -> i64 {
    self.read(|s| s.offset)
  }

  /// Index of the last slot
  pub fn tail(&self) -> i64 {
    self.offset() + self.size as i64 - 1
  }

  /// Store a value at an absolute index
  pub fn set(&self, value: T, index: i64) -> Result<(), WindowError> {
    let size = self.size as i64;
    self.write(|s| {
          let ix = index - s.offset;
          match ix {
            | ix if ix < 0 => Ok(()),
            | ix if ix >= size => Err(WindowError::OutOfBounds { index,
                                                                 tail: s.offset + size - 1 }),
            | ix => {
              s.values[ix as usize] = Some(value);
              Ok(())
            },
          }
        })
  }

  /// If the first slot is filled, pop it and move the window forward by one
  pub fn advance(&self) -> Option<T> {
    self.advance_with_tail().map(|(v, _)| v)
  }

  /// [`SlidingWindow::advance`], along with the index of the last slot
  /// once the window moved
  pub fn advance_with_tail(&self) -> Option<(T, i64)> {
    let size = self.size as i64;
    self.write(|s| match s.values.front() {
          | Some(Some(_)) => {
            let v = s.values.pop_front().flatten();
            s.values.push_back(None);
            s.offset += 1;
            v.map(|v| (v, s.offset + size - 1))
          },
          | _ => None,
        })
  }

  /// Value at a position relative to the window's offset
  pub fn value(&self, window_index: usize) -> Option<T> {
    self.read(|s| s.values.get(window_index).cloned().flatten())
  }

  /// Number of filled slots at the front of the window
  pub fn filled_prefix(&self) -> usize {
    self.read(|s| s.values.iter().take_while(|v| v.is_some()).count())
  }

  fn read<R>(&self, f: impl FnOnce(&Slots<T>) -> R) -> R {
    f(&sync::read(&self.slots))
  }

  fn write<R>(&self, f: impl FnOnce(&mut Slots<T>) -> R) -> R {
    f(&mut sync::write(&self.slots))
  }
}

impl<T> core::fmt::Display for SlidingWindow<T> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    let (offset, mask) = {
      let s = sync::read(&self.slots);
      (s.offset,
       s.values
        .iter()
        .map(|v| if v.is_some() { 'T' } else { '_' })
        .collect::<String>())
    };

    write!(f, "SlidingWindow<size:{}, offset:{}>[{}]", self.size, offset, mask)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn below_offset_is_noop() {
    let w = SlidingWindow::<u8>::new(3, 5);
    assert_eq!(w.set(1, 4), Ok(()));
    assert_eq!(w.value(0), None);
    assert_eq!(w.advance(), None);
    assert_eq!(w.offset(), 5);
  }

  #[test]
  fn beyond_tail_fails() {
    let w = SlidingWindow::<u8>::new(3, 5);
    assert_eq!(w.tail(), 7);
    assert_eq!(w.set(1, 7), Ok(()));
    assert_eq!(w.set(1, 8),
               Err(WindowError::OutOfBounds { index: 8,
                                              tail: 7 }));
  }

  #[test]
  fn offset_is_monotonic() {
    let w = SlidingWindow::<u8>::new(2, -2);
    w.set(0, -2).unwrap();
    w.set(0, -1).unwrap();
    let mut last = w.offset();
    for i in 0..10 {
      assert!(w.advance().is_some());
      assert!(w.offset() > last);
      last = w.offset();
      w.set(i, i as i64).unwrap();
    }
    assert_eq!(w.tail(), last + 1);
  }

  #[test]
  fn empty_window() {
    let w = SlidingWindow::<bool>::new(0, 0);
    assert_eq!(w.advance(), None);
    assert!(w.set(true, 0).is_err());
  }

  #[test]
  fn display() {
    let w = SlidingWindow::<u8>::new(3, 0);
    w.set(1, 1).unwrap();
    assert_eq!(w.to_string(), "SlidingWindow<size:3, offset:0>[_T_]");
  }

  #[test]
  fn display_after_a_panicked_writer() {
    let w = std::sync::Arc::new(SlidingWindow::<u8>::new(3, 0));
    w.set(1, 1).unwrap();

    let w_ = w.clone();
    let _ = std::thread::spawn(move || {
              let _held = w_.slots.write().unwrap();
              panic!("writer died");
            }).join();
    assert!(w.slots.is_poisoned());

    assert_eq!(w.to_string(), "SlidingWindow<size:3, offset:0>[_T_]");
    assert_eq!(w.filled_prefix(), 0);
  }
}
