/// Message Code
pub mod code;

/// Message parsing errors
pub mod parse_error;

/// Message ID
pub mod id;

/// Message Options
pub mod opt;

/// Message Type
pub mod ty;

/// Message Token
pub mod token;

pub use code::*;
pub use id::*;
pub use opt::*;
pub use parse_error::*;
pub use token::*;
pub use ty::*;

use crate::from_bytes::take_exact;
use crate::TryFromBytes;

/// Message payload; empty when absent
#[derive(Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub struct Payload(pub Vec<u8>);

/// URL scheme the message is delivered with.
///
/// Stored in the [`known::coala::URI_SCHEME`] option; absent means [`Scheme::Coap`].
#[derive(Copy, Clone, Hash, PartialEq, Eq, PartialOrd, Ord, Debug, Default)]
pub enum Scheme {
  /// Plain `coap://`
  #[default]
  Coap,
  /// `coaps://`, payload protected by the secure session layer
  Coaps,
}

impl Scheme {
  /// `"coap"` or `"coaps"`
  pub fn as_str(&self) -> &'static str {
    match self {
      | Scheme::Coap => "coap",
      | Scheme::Coaps => "coaps",
    }
  }

  /// Parse a URL scheme
  pub fn parse(s: &str) -> Option<Self> {
    match s {
      | "coap" => Some(Scheme::Coap),
      | "coaps" => Some(Scheme::Coaps),
      | _ => None,
    }
  }
}

/// Struct representing the first byte of a message.
///
/// ```text
/// CoAP version
/// |
/// |  Message type (request, response, empty)
/// |  |
/// |  |  Length of token, in bytes. (4-bit integer)
/// |  |  |
/// vv vv vvvv
/// 01 00 0000
/// ```
#[derive(Clone, Copy, Debug, PartialEq, PartialOrd)]
pub(crate) struct Byte1 {
  pub(crate) ty: Type,
  pub(crate) tkl: u8,
}

impl TryFrom<u8> for Byte1 {
  type Error = MessageParseError;

  fn try_from(b: u8) -> Result<Self, Self::Error> {
    let ty = b >> 4 & 0b11; // bits 2 & 3
    let tkl = b & 0b1111u8; // last 4 bits

    Ok(Byte1 { ty: Type::try_from(ty)?,
               tkl })
  }
}

/// # `Message` struct
/// Low-level representation of a CoAP message.
///
/// Options are an ordered list of `(number, value)` pairs rather than a map,
/// since repeatable options (e.g. Uri-Path) keep their order.
/// Routing information (destination, proxy) is not part of the wire message.
///
/// ```
/// use coala_msg::*;
/// # let header: [u8; 4] = 0b_01_00_0001_01000101_0000000000000001u32.to_be_bytes();
/// # let token: [u8; 1] = [254u8];
/// # let content_format: &[u8] = b"application/json";
/// # let options: [&[u8]; 2] = [&[0b_1100_1101u8, 0b00000011u8], content_format];
/// # let payload: [&[u8]; 2] = [&[0b_11111111u8], b"hello, world!"];
/// let packet: Vec<u8> = /* bytes! */
/// # [header.as_ref(), token.as_ref(), options.concat().as_ref(), payload.concat().as_ref()].concat();
///
/// let msg = Message::try_from_bytes(&packet).unwrap();
///
/// assert_eq!(msg.id, Id(1));
/// assert_eq!(msg.ty, Type::Con);
/// assert_eq!(msg.token, Token::new(&[254]));
/// assert_eq!(msg.code, Code::Response(ResponseCode::Content));
/// assert_eq!(msg.get_first(known::no_repeat::CONTENT_FORMAT).and_then(|v| v.as_str()),
///            Some("application/json"));
/// assert_eq!(msg.payload.0, b"hello, world!".to_vec());
/// ```
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Message {
  /// see [`Id`] for details
  pub id: Id,
  /// see [`Type`] for details
  pub ty: Type,
  /// see [`Token`] for details
  pub token: Token,
  /// see [`Code`] for details
  pub code: Code,
  /// see [`opt::Opt`] for details
  pub opts: Vec<Opt>,
  /// see [`Payload`]
  pub payload: Payload,
}

impl Message {
  /// Create a message with no token, options or payload
  pub fn new(ty: Type, code: Code, id: Id) -> Self {
    Self { id,
           ty,
           code,
           token: Token::default(),
           opts: Vec::new(),
           payload: Payload::default() }
  }

  /// Size of the message on the wire, assuming the payload marker is present
  pub fn get_size(&self) -> usize {
    let header_size = 4;
    let payload_marker_size = 1;
    let opts_size: usize = self.opts
                               .iter()
                               .map(|o| 5 + o.value.0.len())
                               .sum();

    header_size + payload_marker_size + self.payload.0.len() + self.token.len() + opts_size
  }

  /// All values of an option, in insertion order
  pub fn get(&self, n: OptNumber) -> impl Iterator<Item = &OptValue> {
    self.opts.iter().filter(move |o| o.number == n).map(|o| &o.value)
  }

  /// First value of an option
  pub fn get_first(&self, n: OptNumber) -> Option<&OptValue> {
    self.get(n).next()
  }

  /// First value of an option, as a string
  pub fn get_str(&self, n: OptNumber) -> Option<&str> {
    self.get_first(n).and_then(OptValue::as_str)
  }

  /// First value of an option, as an unsigned integer
  pub fn get_uint(&self, n: OptNumber) -> Option<u64> {
    self.get_first(n).and_then(OptValue::as_uint)
  }

  /// Whether the option is present
  pub fn has(&self, n: OptNumber) -> bool {
    self.opts.iter().any(|o| o.number == n)
  }

  /// Set an option.
  ///
  /// Non-repeatable options replace any previous value;
  /// repeatable options are appended.
  ///
  /// ```
  /// use coala_msg::*;
  ///
  /// let mut msg = Message::new(Type::Con, Code::Request(Method::Get), Id(1));
  /// msg.set(known::repeat::PATH, "a".into());
  /// msg.set(known::repeat::PATH, "b".into());
  /// msg.set(known::no_repeat::MAX_AGE, OptValue::uint(1));
  /// msg.set(known::no_repeat::MAX_AGE, OptValue::uint(2));
  ///
  /// assert_eq!(msg.path(), vec!["a", "b"]);
  /// assert_eq!(msg.get_uint(known::no_repeat::MAX_AGE), Some(2));
  /// ```
  pub fn set(&mut self, n: OptNumber, v: OptValue) {
    if !n.is_repeatable() {
      self.remove(n);
    }

    self.opts.push(Opt { number: n, value: v });
  }

  /// Set an option, or remove it when `v` is `None`
  pub fn set_or_remove(&mut self, n: OptNumber, v: Option<OptValue>) {
    match v {
      | Some(v) => self.set(n, v),
      | None => self.remove(n),
    }
  }

  /// Remove every value of an option
  pub fn remove(&mut self, n: OptNumber) {
    self.opts.retain(|o| o.number != n);
  }

  /// Uri-Path segments
  pub fn path(&self) -> Vec<&str> {
    self.get(known::repeat::PATH)
        .filter_map(OptValue::as_str)
        .collect()
  }

  /// Uri-Path segments joined by `/`, without a leading slash
  pub fn path_string(&self) -> String {
    self.path().join("/")
  }

  /// Uri-Query items split on the first `=`
  ///
  /// ```
  /// use coala_msg::*;
  ///
  /// let mut msg = Message::new(Type::Con, Code::Request(Method::Get), Id(1));
  /// msg.set(known::repeat::QUERY, "a=1".into());
  /// msg.set(known::repeat::QUERY, "b".into());
  /// msg.set(known::repeat::QUERY, "c=x=y".into());
  ///
  /// assert_eq!(msg.query(),
  ///            vec![("a".to_string(), Some("1".to_string())),
  ///                 ("b".to_string(), None),
  ///                 ("c".to_string(), Some("x=y".to_string()))]);
  /// ```
  pub fn query(&self) -> Vec<(String, Option<String>)> {
    self.get(known::repeat::QUERY)
        .filter_map(OptValue::as_str)
        .map(|item| match item.split_once('=') {
          | Some((k, v)) => (k.to_string(), Some(v.to_string())),
          | None => (item.to_string(), None),
        })
        .collect()
  }

  /// See [`Scheme`]
  pub fn scheme(&self) -> Scheme {
    match self.get_uint(known::coala::URI_SCHEME) {
      | Some(1) => Scheme::Coaps,
      | _ => Scheme::Coap,
    }
  }

  /// See [`Scheme`]
  pub fn set_scheme(&mut self, scheme: Scheme) {
    self.remove(known::coala::URI_SCHEME);
    if scheme == Scheme::Coaps {
      self.set(known::coala::URI_SCHEME, OptValue::uint(1));
    }
  }

  /// Block1 option, if present and valid
  pub fn block1(&self) -> Option<Block> {
    self.get_first(known::no_repeat::BLOCK1).and_then(Block::from_value)
  }

  /// Block2 option, if present and valid
  pub fn block2(&self) -> Option<Block> {
    self.get_first(known::no_repeat::BLOCK2).and_then(Block::from_value)
  }

  /// Set or remove the Block1 option
  pub fn set_block1(&mut self, b: Option<Block>) {
    self.set_or_remove(known::no_repeat::BLOCK1, b.map(|b| b.to_value()));
  }

  /// Set or remove the Block2 option
  pub fn set_block2(&mut self, b: Option<Block>) {
    self.set_or_remove(known::no_repeat::BLOCK2, b.map(|b| b.to_value()));
  }

  /// Request method, if this is a request
  pub fn method(&self) -> Option<Method> {
    match self.code {
      | Code::Request(m) => Some(m),
      | Code::Response(_) => None,
    }
  }

  /// Response code, if this is a response or empty message
  pub fn response_code(&self) -> Option<ResponseCode> {
    match self.code {
      | Code::Request(_) => None,
      | Code::Response(r) => Some(r),
    }
  }

  /// Whether the code is a request method
  pub fn is_request(&self) -> bool {
    self.method().is_some()
  }

  /// Whether the code is a response code other than 0.00
  pub fn is_response(&self) -> bool {
    matches!(self.code, Code::Response(r) if r != ResponseCode::Empty)
  }

  /// Create an empty ACK for this message, with the same id and token
  pub fn ack(&self) -> Self {
    Self { id: self.id,
           token: self.token.clone(),
           ty: Type::Ack,
           code: Code::EMPTY,
           payload: Payload::default(),
           opts: Vec::new() }
  }
}

impl<Bytes: AsRef<[u8]>> TryFromBytes<Bytes> for Message {
  type Error = MessageParseError;

  fn try_from_bytes(bytes: Bytes) -> Result<Self, Self::Error> {
    let mut bytes = bytes.as_ref();

    let header = take_exact(&mut bytes, 4).ok_or(MessageParseError::HeaderTooShort)?;
    let Byte1 { tkl, ty } = header[0].try_into()?;
    let code = Code::try_from(header[1])?;
    let id = Id::from_be_bytes([header[2], header[3]]);

    if tkl > 8 {
      return Err(MessageParseError::InvalidTokenLength(tkl));
    }

    let token = take_exact(&mut bytes, tkl as usize).ok_or(MessageParseError::TokenTruncated)?;
    let token = Token::new(token);

    let mut opts = Vec::new();
    let mut number = 0u16;
    let mut payload = Payload::default();

    while let Some((head, rest)) = bytes.split_first() {
      bytes = rest;

      if *head == 0b11111111 {
        payload = Payload(bytes.to_vec());
        break;
      }

      let delta = opt::parse_opt_len_or_delta(head >> 4,
                                              &mut bytes,
                                              OptParseError::OptionDeltaReservedValue(15)).map_err(MessageParseError::OptionFormat)?;
      let len = opt::parse_opt_len_or_delta(head & 0b1111,
                                            &mut bytes,
                                            OptParseError::ValueLengthReservedValue(15)).map_err(MessageParseError::OptionFormat)?;
      let value = take_exact(&mut bytes, len as usize).ok_or(MessageParseError::OptionFormat(OptParseError::eof()))?;

      number = number.checked_add(delta)
                     .ok_or(MessageParseError::OptionFormat(OptParseError::OptionNumberOverflow))?;
      let n = OptNumber(number);

      // unknown elective options are skipped, unknown critical ones are kept
      // so that the request can be rejected with 4.02
      if n.is_known() || n.is_critical() {
        opts.push(Opt { number: n,
                        value: OptValue(value.to_vec()) });
      }
    }

    Ok(Message { id,
                 ty,
                 code,
                 token,
                 opts,
                 payload })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn parse_msg() {
    let (expect, msg) = crate::test_msg();
    assert_eq!(Message::try_from_bytes(&msg).unwrap(), expect)
  }

  #[test]
  fn parse_byte1() {
    let byte = 0b_01_10_0011u8;
    let byte = Byte1::try_from(byte).unwrap();
    assert_eq!(byte, Byte1 { ty: Type::Ack, tkl: 3 })
  }

  #[test]
  fn header_too_short() {
    assert_eq!(Message::try_from_bytes([0x40u8, 0x01, 0x00]),
               Err(MessageParseError::HeaderTooShort));
  }

  #[test]
  fn unknown_code() {
    assert_eq!(Message::try_from_bytes([0x40u8, 0b_111_00000, 0x00, 0x01]),
               Err(MessageParseError::UnknownCode));
  }

  #[test]
  fn reserved_nibble() {
    let bytes = [0x40u8, 0x01, 0x00, 0x01, 0b1111_0001, 0];
    assert_eq!(Message::try_from_bytes(bytes),
               Err(MessageParseError::OptionFormat(OptParseError::OptionDeltaReservedValue(15))));
  }

  #[test]
  fn truncated_extended_length() {
    let bytes = [0x40u8, 0x01, 0x00, 0x01, 0b1011_1110, 0];
    assert_eq!(Message::try_from_bytes(bytes),
               Err(MessageParseError::OptionFormat(OptParseError::UnexpectedEndOfStream)));
  }

  #[test]
  fn unknown_options() {
    // option 10 (elective, unknown) then option 13 (critical, unknown)
    let bytes = [0x40u8, 0x01, 0x00, 0x01, 0b1010_0001, 7, 0b0011_0001, 9];
    let msg = Message::try_from_bytes(bytes).unwrap();
    assert_eq!(msg.opts,
               vec![Opt { number: OptNumber(13),
                          value: OptValue(vec![9]) }]);
  }

  #[test]
  fn large_option_number() {
    let mut msg = Message::new(Type::Con, Code::Request(Method::Get), Id(9));
    msg.set(known::coala::PROXY_SECURITY_ID, OptValue::uint(42));
    msg.set(known::coala::WINDOW_SIZE, OptValue::uint(70));
    let bytes = crate::TryIntoBytes::try_into_bytes(&msg).unwrap();
    let parsed = Message::try_from_bytes(bytes).unwrap();
    assert_eq!(parsed.get_uint(known::coala::PROXY_SECURITY_ID), Some(42));
    assert_eq!(parsed.get_uint(known::coala::WINDOW_SIZE), Some(70));
  }

  #[test]
  fn scheme() {
    let mut msg = Message::new(Type::Con, Code::Request(Method::Get), Id(1));
    assert_eq!(msg.scheme(), Scheme::Coap);
    msg.set_scheme(Scheme::Coaps);
    assert_eq!(msg.scheme(), Scheme::Coaps);
    msg.set_scheme(Scheme::Coap);
    assert!(!msg.has(known::coala::URI_SCHEME));
  }

  #[test]
  fn response_classification() {
    let msg = Message::new(Type::Ack, Code::EMPTY, Id(1));
    assert!(!msg.is_response());
    assert!(!msg.is_request());
    let msg = Message::new(Type::Ack, Code::Response(ResponseCode::Content), Id(1));
    assert!(msg.is_response());
  }
}
