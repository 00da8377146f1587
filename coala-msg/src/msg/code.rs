use super::MessageParseError;

/// Request method
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Method {
  /// 0.01
  Get,
  /// 0.02
  Post,
  /// 0.03
  Put,
  /// 0.04
  Delete,
}

impl Method {
  fn detail(&self) -> u8 {
    match self {
      | Method::Get => 1,
      | Method::Post => 2,
      | Method::Put => 3,
      | Method::Delete => 4,
    }
  }
}

macro_rules! response_codes {
  ($($(#[doc = $doc:expr])* $name:ident = ($class:literal, $detail:literal)),* $(,)?) => {
    /// Response code, as registered by RFC7252 section 12.1.2 and RFC7959
    ///
    /// [`ResponseCode::Empty`] (0.00) is the code of empty ACK / RST messages.
    #[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
    pub enum ResponseCode {
      $($(#[doc = $doc])* $name),*
    }

    impl ResponseCode {
      /// `(class, detail)` pair of this code
      pub const fn class_detail(&self) -> (u8, u8) {
        match self {
          $(| ResponseCode::$name => ($class, $detail)),*
        }
      }

      fn from_class_detail(class: u8, detail: u8) -> Option<Self> {
        match (class, detail) {
          $(| ($class, $detail) => Some(ResponseCode::$name),)*
          | _ => None,
        }
      }
    }
  };
}

response_codes! {
  /// 0.00
  Empty = (0, 0),
  /// 2.01
  Created = (2, 1),
  /// 2.02
  Deleted = (2, 2),
  /// 2.03
  Valid = (2, 3),
  /// 2.04
  Changed = (2, 4),
  /// 2.05
  Content = (2, 5),
  /// 2.31, the next block of a block-wise request may be sent
  Continue = (2, 31),
  /// 4.00
  BadRequest = (4, 0),
  /// 4.01
  Unauthorized = (4, 1),
  /// 4.02
  BadOption = (4, 2),
  /// 4.03
  Forbidden = (4, 3),
  /// 4.04
  NotFound = (4, 4),
  /// 4.05
  MethodNotAllowed = (4, 5),
  /// 4.06
  NotAcceptable = (4, 6),
  /// 4.08
  RequestEntityIncomplete = (4, 8),
  /// 4.12
  PreconditionFailed = (4, 12),
  /// 4.13
  RequestEntityTooLarge = (4, 13),
  /// 4.15
  UnsupportedContentFormat = (4, 15),
  /// 5.00
  InternalServerError = (5, 0),
  /// 5.01
  NotImplemented = (5, 1),
  /// 5.02
  BadGateway = (5, 2),
  /// 5.03
  ServiceUnavailable = (5, 3),
  /// 5.04
  GatewayTimeout = (5, 4),
  /// 5.05
  ProxyingNotSupported = (5, 5),
}

impl ResponseCode {
  /// Class 4 and 5 codes
  pub fn is_error(&self) -> bool {
    self.class_detail().0 >= 4
  }
}

/// Message code: either a request [`Method`] or a [`ResponseCode`].
///
/// The two are mutually exclusive, so they live in one enum.
///
/// ```
/// use coala_msg::{Code, Method, ResponseCode};
///
/// assert_eq!(Code::try_from(0b010_00101).unwrap(), Code::Response(ResponseCode::Content));
/// assert_eq!(u8::from(Code::Request(Method::Post)), 2);
/// assert_eq!(Code::Response(ResponseCode::Continue).to_string(), "2.31");
/// assert!(Code::try_from(0b111_00000).is_err());
/// ```
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub enum Code {
  /// Request
  Request(Method),
  /// Response (or empty message)
  Response(ResponseCode),
}

impl Code {
  /// 0.00
  pub const EMPTY: Code = Code::Response(ResponseCode::Empty);

  /// The "class" digit (`0` for requests and empty messages)
  pub fn class(&self) -> u8 {
    match self {
      | Code::Request(_) => 0,
      | Code::Response(r) => r.class_detail().0,
    }
  }

  /// The 2-digit "detail"
  pub fn detail(&self) -> u8 {
    match self {
      | Code::Request(m) => m.detail(),
      | Code::Response(r) => r.class_detail().1,
    }
  }

  /// Whether this is the empty code 0.00
  pub fn is_empty(&self) -> bool {
    *self == Code::EMPTY
  }
}

impl core::fmt::Display for Code {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    write!(f, "{}.{:02}", self.class(), self.detail())
  }
}

impl TryFrom<u8> for Code {
  type Error = MessageParseError;

  fn try_from(b: u8) -> Result<Self, Self::Error> {
    let class = b >> 5;
    let detail = b & 0b0001_1111;

    match (class, detail) {
      | (0, 1) => Ok(Code::Request(Method::Get)),
      | (0, 2) => Ok(Code::Request(Method::Post)),
      | (0, 3) => Ok(Code::Request(Method::Put)),
      | (0, 4) => Ok(Code::Request(Method::Delete)),
      | (class, detail) => ResponseCode::from_class_detail(class, detail).map(Code::Response)
                                                                          .ok_or(MessageParseError::UnknownCode),
    }
  }
}

impl From<Code> for u8 {
  fn from(code: Code) -> u8 {
    (code.class() << 5) | code.detail()
  }
}

impl From<Method> for Code {
  fn from(m: Method) -> Self {
    Code::Request(m)
  }
}

impl From<ResponseCode> for Code {
  fn from(r: ResponseCode) -> Self {
    Code::Response(r)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::assert_eqb;

  #[test]
  fn parse_code() {
    let byte = 0b_010_00101u8;
    let code = Code::try_from(byte).unwrap();
    assert_eq!(code, Code::Response(ResponseCode::Content))
  }

  #[test]
  fn serialize_code() {
    let actual: u8 = Code::Response(ResponseCode::Content).into();
    let expected = 0b_010_00101u8;
    assert_eqb!(actual, expected)
  }

  #[test]
  fn unknown_codes() {
    assert_eq!(Code::try_from(0b_000_00101), Err(MessageParseError::UnknownCode));
    assert_eq!(Code::try_from(0b_011_00000), Err(MessageParseError::UnknownCode));
  }

  #[test]
  fn empty() {
    assert_eq!(Code::try_from(0).unwrap(), Code::EMPTY);
    assert!(Code::EMPTY.is_empty());
    assert_eq!(Code::Request(Method::Get).class(), 0);
    assert!(!Code::Request(Method::Get).is_empty());
  }
}
