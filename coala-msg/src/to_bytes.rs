use tinyvec::ArrayVec;

use crate::*;

/// Trait allowing fallible conversion into bytes
pub trait TryIntoBytes {
  /// Error yielded if the value cannot be represented on the wire
  type Error;

  /// Try to convert into a collection of bytes
  ///
  /// ```
  /// use coala_msg::*;
  ///
  /// let msg = Message::new(Type::Con, Code::Request(Method::Get), Id(0x0102));
  /// let bytes = msg.try_into_bytes().unwrap();
  /// assert_eq!(bytes, vec![0b_01_00_0000, 0b_000_00001, 1, 2]);
  /// ```
  fn try_into_bytes(self) -> Result<Vec<u8>, Self::Error>;
}

/// Errors encounterable serializing to bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum MessageToBytesError {
  /// Token was longer than 8 bytes
  WrongTokenLength(usize),

  /// An option value was longer than 65535 bytes
  #[allow(missing_docs)]
  OptionValueTooLong { number: OptNumber, len: usize },
}

impl core::fmt::Display for MessageToBytesError {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | Self::WrongTokenLength(n) => write!(f, "token is {} bytes long, at most 8 allowed", n),
      | Self::OptionValueTooLong { number, len } => {
        write!(f, "option {} value is {} bytes long", number.0, len)
      },
    }
  }
}

impl std::error::Error for MessageToBytesError {}

impl<'a> TryIntoBytes for &'a Message {
  type Error = MessageToBytesError;

  fn try_into_bytes(self) -> Result<Vec<u8>, Self::Error> {
    let tkl = self.token.len();
    if tkl > 8 {
      return Err(MessageToBytesError::WrongTokenLength(tkl));
    }

    let mut bytes = Vec::with_capacity(self.get_size());

    let byte1: u8 = Byte1 { tkl: tkl as u8,
                            ty: self.ty }.into();
    let code: u8 = self.code.into();
    let id: [u8; 2] = self.id.into();

    bytes.push(byte1);
    bytes.push(code);
    bytes.extend(id);
    bytes.extend(self.token.as_bytes().iter().copied());

    let mut opts = self.opts.iter().collect::<Vec<_>>();
    opts.sort_by_key(|o| o.number);

    let mut prev = OptNumber(0);
    for opt in opts {
      opt.extend_bytes(prev, &mut bytes)?;
      prev = opt.number;
    }

    if !self.payload.0.is_empty() {
      bytes.push(0b11111111);
      bytes.extend(self.payload.0.iter().copied());
    }

    Ok(bytes)
  }
}

impl TryIntoBytes for Message {
  type Error = MessageToBytesError;

  fn try_into_bytes(self) -> Result<Vec<u8>, Self::Error> {
    (&self).try_into_bytes()
  }
}

pub(crate) fn opt_len_or_delta(val: u16) -> (u8, Option<ArrayVec<[u8; 2]>>) {
  match val {
    | n if n >= 269 => {
      let mut bytes = ArrayVec::new();
      bytes.extend((n - 269).to_be_bytes());
      (14, Some(bytes))
    },
    | n if n >= 13 => {
      let mut bytes = ArrayVec::new();
      bytes.push((n as u8) - 13);
      (13, Some(bytes))
    },
    | n => (n as u8, None),
  }
}

impl From<Id> for [u8; 2] {
  fn from(id: Id) -> [u8; 2] {
    id.0.to_be_bytes()
  }
}

impl From<Byte1> for u8 {
  fn from(b: Byte1) -> u8 {
    let ver = 1u8 << 6;
    let ty = u8::from(b.ty) << 4;
    let tkl = b.tkl & 0b1111;

    ver | ty | tkl
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{assert_eqb, assert_eqb_iter};

  #[test]
  fn msg() {
    let (m, expected) = crate::test_msg();
    let actual = m.try_into_bytes().unwrap();
    assert_eqb_iter!(actual, expected);
  }

  #[test]
  fn byte_1() {
    let byte = Byte1 { ty: Type::Ack,
                       tkl: 3 };
    let actual: u8 = byte.into();
    let expected = 0b_01_10_0011u8;
    assert_eqb!(actual, expected)
  }

  #[test]
  fn id() {
    let id = Id(16);
    let actual = u16::from_be_bytes(id.into());
    assert_eqb!(actual, 16)
  }

  #[test]
  fn opt_len_thresholds() {
    assert_eq!(opt_len_or_delta(12), (12, None));
    assert_eq!(opt_len_or_delta(13).0, 13);
    assert_eq!(opt_len_or_delta(13).1.unwrap().as_slice(), &[0]);
    assert_eq!(opt_len_or_delta(268).1.unwrap().as_slice(), &[255]);
    assert_eq!(opt_len_or_delta(269).0, 14);
    assert_eq!(opt_len_or_delta(269).1.unwrap().as_slice(), &[0, 0]);
  }

  #[test]
  fn opt() {
    let opt = Opt { number: OptNumber(1),
                    value: OptValue(vec![1]) };
    let mut actual = Vec::<u8>::new();
    opt.extend_bytes(OptNumber(0), &mut actual).unwrap();
    assert_eqb_iter!(actual, vec![0b00010001, 1]);

    let opt = Opt { number: OptNumber(24),
                    value: OptValue(vec![1]) };
    let mut actual = Vec::<u8>::new();
    opt.extend_bytes(OptNumber(0), &mut actual).unwrap();
    assert_eqb_iter!(actual, vec![0b1101_0001, 0b0000_1011, 1]);

    let opt = Opt { number: OptNumber(24),
                    value: OptValue(vec![1]) };
    let mut actual = Vec::<u8>::new();
    opt.extend_bytes(OptNumber(12), &mut actual).unwrap();
    assert_eqb_iter!(actual, vec![0b1100_0001, 1]);
  }

  #[test]
  fn options_sorted_by_number() {
    let mut m = Message::new(Type::Non, Code::Request(Method::Get), Id(1));
    m.opts.push(Opt { number: OptNumber(12),
                      value: OptValue(vec![]) });
    m.opts.push(Opt { number: OptNumber(11),
                      value: OptValue(vec![b'a']) });
    let bytes = m.try_into_bytes().unwrap();
    assert_eqb_iter!(bytes[4..], [0b1011_0001u8, b'a', 0b0001_0000]);
  }

  #[test]
  fn token_too_long() {
    let mut m = Message::new(Type::Con, Code::Request(Method::Get), Id(1));
    m.token = Token::new(&[0; 9]);
    assert_eq!(m.try_into_bytes(), Err(MessageToBytesError::WrongTokenLength(9)));

    let mut m = Message::new(Type::Con, Code::Request(Method::Get), Id(1));
    m.token = Token::new(&[0; 8]);
    assert!(m.try_into_bytes().is_ok());
  }

  #[test]
  fn option_too_long() {
    let mut m = Message::new(Type::Con, Code::Request(Method::Get), Id(1));
    m.set(known::repeat::PATH, OptValue(vec![b'a'; 65536]));
    assert_eq!(m.try_into_bytes(),
               Err(MessageToBytesError::OptionValueTooLong { number: known::repeat::PATH,
                                                             len: 65536 }));

    let mut m = Message::new(Type::Con, Code::Request(Method::Get), Id(1));
    m.set(known::repeat::PATH, OptValue(vec![b'a'; 65535]));
    let bytes = m.try_into_bytes().unwrap();
    assert_eqb_iter!(bytes[4..7], [0b1011_1110u8, 0xFE, 0xF2]);
    assert_eq!(bytes.len(), 4 + 3 + 65535);
  }

  #[test]
  fn too_long_option_writes_nothing() {
    let opt = Opt { number: OptNumber(60),
                    value: OptValue(vec![0; 70_000]) };
    let mut actual = vec![0xAAu8];
    assert_eq!(opt.extend_bytes(OptNumber(0), &mut actual),
               Err(MessageToBytesError::OptionValueTooLong { number: OptNumber(60),
                                                             len: 70_000 }));
    assert_eq!(actual, vec![0xAA]);
  }
}
