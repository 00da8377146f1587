use tinyvec::TinyVec;

/// # Message Token
///
/// 0 to 8 bytes used to correlate requests and responses independently
/// of the message [`Id`](crate::Id).
///
/// Tokens longer than 8 bytes can be represented so that
/// serializing them reports [`MessageToBytesError::WrongTokenLength`](crate::MessageToBytesError::WrongTokenLength)
/// instead of silently truncating.
#[derive(Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Token(pub TinyVec<[u8; 8]>);

impl Token {
  /// Copy some bytes into a token
  ///
  /// ```
  /// use coala_msg::Token;
  ///
  /// let t = Token::new(&[1, 2, 3]);
  /// assert_eq!(t.len(), 3);
  /// assert!(Token::default().is_empty());
  /// ```
  pub fn new(bytes: &[u8]) -> Self {
    Self(bytes.iter().copied().collect())
  }

  /// Token length in bytes
  pub fn len(&self) -> usize {
    self.0.len()
  }

  /// Whether the message carries no token at all
  pub fn is_empty(&self) -> bool {
    self.0.is_empty()
  }

  /// Borrow the token's bytes
  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }
}

impl core::fmt::Display for Token {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    self.0.iter().try_for_each(|b| write!(f, "{:02x}", b))
  }
}
