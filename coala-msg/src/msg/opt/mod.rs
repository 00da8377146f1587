/// Known option numbers
pub mod known;

/// Block1 / Block2 option values
pub mod block;

/// Option parsing errors
pub mod parse_error;

pub use block::*;
pub use parse_error::*;

pub(crate) fn parse_opt_len_or_delta(head: u8,
                                     bytes: &mut &[u8],
                                     reserved_err: OptParseError)
                                     -> Result<u16, OptParseError> {
  match head {
    | 13 => {
      let (n, rest) = bytes.split_first().ok_or_else(OptParseError::eof)?;
      *bytes = rest;
      Ok((*n as u16) + 13)
    },
    | 14 => match bytes {
      | [a, b, rest @ ..] => {
        let n = u16::from_be_bytes([*a, *b]);
        *bytes = rest;
        n.checked_add(269).ok_or(OptParseError::OptionNumberOverflow)
      },
      | _ => Err(OptParseError::eof()),
    },
    | 15 => Err(reserved_err),
    | _ => Ok(head as u16),
  }
}

/// Option Number, identifying which Option is being set
/// (e.g. Content-Format has a Number of 12).
///
/// Odd numbers are "critical": a recipient that does not understand
/// a critical option must reject the message.
///
/// See [`known`] for the numbers this library understands.
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct OptNumber(pub u16);

impl OptNumber {
  /// Whether the option is critical (odd number)
  ///
  /// ```
  /// use coala_msg::known;
  ///
  /// assert!(known::repeat::PATH.is_critical());
  /// assert!(!known::no_repeat::CONTENT_FORMAT.is_critical());
  /// ```
  pub fn is_critical(&self) -> bool {
    self.0 % 2 == 1
  }

  /// Whether the option may occur more than once in a message
  pub fn is_repeatable(&self) -> bool {
    known::repeat::ALL.contains(self)
  }

  /// Whether this library knows the option
  pub fn is_known(&self) -> bool {
    known::is_known(*self)
  }
}

/// Raw option value bytes.
///
/// Helpers interpret the bytes as UTF-8 strings or as
/// variable-length big-endian unsigned integers.
#[derive(Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct OptValue(pub Vec<u8>);

impl OptValue {
  /// Encode an unsigned integer, stripping leading zero bytes
  ///
  /// ```
  /// use coala_msg::OptValue;
  ///
  /// assert_eq!(OptValue::uint(0).0, Vec::<u8>::new());
  /// assert_eq!(OptValue::uint(1).0, vec![1]);
  /// assert_eq!(OptValue::uint(0x0100).0, vec![1, 0]);
  /// ```
  pub fn uint(n: u64) -> Self {
    let bytes = n.to_be_bytes();
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len());
    Self(bytes[first..].to_vec())
  }

  /// Decode as unsigned integer. `None` if longer than 8 bytes.
  pub fn as_uint(&self) -> Option<u64> {
    if self.0.len() > 8 {
      return None;
    }

    Some(self.0.iter().fold(0u64, |n, b| (n << 8) | u64::from(*b)))
  }

  /// Decode as a UTF-8 string
  pub fn as_str(&self) -> Option<&str> {
    core::str::from_utf8(&self.0).ok()
  }

  /// Borrow the raw bytes
  pub fn as_bytes(&self) -> &[u8] {
    &self.0
  }
}

impl From<&str> for OptValue {
  fn from(s: &str) -> Self {
    Self(s.as_bytes().to_vec())
  }
}

impl From<String> for OptValue {
  fn from(s: String) -> Self {
    Self(s.into_bytes())
  }
}

impl From<Vec<u8>> for OptValue {
  fn from(b: Vec<u8>) -> Self {
    Self(b)
  }
}

impl From<&[u8]> for OptValue {
  fn from(b: &[u8]) -> Self {
    Self(b.to_vec())
  }
}

/// A single option: number and raw value
///
/// Messages keep options in a list rather than a map, since
/// some options are repeatable and their order matters.
#[derive(Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Opt {
  /// See [`OptNumber`]
  pub number: OptNumber,
  /// See [`OptValue`]
  pub value: OptValue,
}

impl Opt {
  /// Given a collection to [`Extend`] and an Opt, add that Opt's bytes to the collection.
  ///
  /// `prev` is the number of the option written before this one.
  ///
  /// Nothing is written when the value is too long to fit the length field.
  /// ```
  /// use coala_msg::*;
  ///
  /// let opt = Opt { number: OptNumber(11),
  ///                 value: OptValue(vec![0; 65536]) };
  /// let mut bytes = Vec::<u8>::new();
  /// assert_eq!(opt.extend_bytes(OptNumber(0), &mut bytes),
  ///            Err(MessageToBytesError::OptionValueTooLong { number: OptNumber(11),
  ///                                                          len: 65536 }));
  /// assert!(bytes.is_empty());
  /// ```
  pub fn extend_bytes(&self,
                      prev: OptNumber,
                      bytes: &mut impl Extend<u8>)
                      -> Result<(), crate::MessageToBytesError> {
    let value_len = u16::try_from(self.value.0.len()).map_err(|_| {
                      crate::MessageToBytesError::OptionValueTooLong { number: self.number,
                                                                       len: self.value.0.len() }
                    })?;
    let (del, del_bytes) = crate::to_bytes::opt_len_or_delta(self.number.0 - prev.0);
    let (len, len_bytes) = crate::to_bytes::opt_len_or_delta(value_len);

    bytes.extend(Some(del << 4 | len));

    if let Some(bs) = del_bytes {
      bytes.extend(bs);
    }

    if let Some(bs) = len_bytes {
      bytes.extend(bs);
    }

    bytes.extend(self.value.0.iter().copied());
    Ok(())
  }

  /// A short human-readable rendering used in message summaries
  pub fn describe(&self) -> String {
    let name = known::name(self.number).map(String::from)
                                       .unwrap_or_else(|| self.number.0.to_string());
    match (known::is_string(self.number), self.value.as_str(), self.value.as_uint()) {
      | (true, Some(s), _) => format!("{} S:{}", name, s),
      | (_, _, Some(n)) => format!("{} U:{}", name, n),
      | _ => format!("{} ({} bytes)", name, self.value.0.len()),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_ext_delta() {
    let mut bytes: &[u8] = &[1, 0xAA];
    let n = parse_opt_len_or_delta(13, &mut bytes, OptParseError::OptionDeltaReservedValue(15));
    assert_eq!(n, Ok(14));
    assert_eq!(bytes, &[0xAA]);

    let mut bytes: &[u8] = &[0, 1];
    let n = parse_opt_len_or_delta(14, &mut bytes, OptParseError::OptionDeltaReservedValue(15));
    assert_eq!(n, Ok(270));
    assert!(bytes.is_empty());
  }

  #[test]
  fn parse_ext_delta_truncated() {
    let mut bytes: &[u8] = &[0];
    let n = parse_opt_len_or_delta(14, &mut bytes, OptParseError::OptionDeltaReservedValue(15));
    assert_eq!(n, Err(OptParseError::UnexpectedEndOfStream));

    let mut bytes: &[u8] = &[];
    let n = parse_opt_len_or_delta(15, &mut bytes, OptParseError::ValueLengthReservedValue(15));
    assert_eq!(n, Err(OptParseError::ValueLengthReservedValue(15)));
  }

  #[test]
  fn uint_values() {
    assert_eq!(OptValue::uint(0).as_uint(), Some(0));
    assert_eq!(OptValue::uint(70).as_uint(), Some(70));
    assert_eq!(OptValue::uint(u64::MAX).as_uint(), Some(u64::MAX));
    assert_eq!(OptValue(vec![0; 9]).as_uint(), None);
  }

  #[test]
  fn describe() {
    let opt = Opt { number: known::repeat::PATH,
                    value: "msg".into() };
    assert_eq!(opt.describe(), "UriPath S:msg");

    let opt = Opt { number: known::coala::WINDOW_SIZE,
                    value: OptValue::uint(70) };
    assert_eq!(opt.describe(), "SelectiveRepeatWindowSize U:70");
  }
}
