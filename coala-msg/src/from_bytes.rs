/// Trait for converting a sequence of bytes into some data structure
pub trait TryFromBytes<A: AsRef<[u8]>>: Sized {
  /// Error type yielded if conversion fails
  type Error;

  /// Try to convert from some sequence of bytes `T`
  /// into `Self`
  fn try_from_bytes(bytes: A) -> Result<Self, Self::Error>;
}

/// Split `n` bytes off the front of a slice
pub(crate) fn take_exact<'a>(bytes: &mut &'a [u8], n: usize) -> Option<&'a [u8]> {
  if bytes.len() < n {
    return None;
  }

  let (taken, rest) = bytes.split_at(n);
  *bytes = rest;
  Some(taken)
}
