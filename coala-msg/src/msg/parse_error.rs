/// Errors encounterable while parsing a message from bytes
#[derive(Copy, Clone, Debug, PartialEq, PartialOrd, Eq, Ord)]
pub enum MessageParseError {
  /// Fewer than the 4 header bytes were present
  HeaderTooShort,

  /// The code byte is neither a known method nor a known response code
  UnknownCode,

  /// Token length nibble was > 8
  InvalidTokenLength(u8),

  /// Fewer bytes followed the header than the token length announced
  TokenTruncated,

  /// Error parsing an option
  OptionFormat(super::opt::parse_error::OptParseError),
}

impl core::fmt::Display for MessageParseError {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | Self::HeaderTooShort => f.write_str("message header is shorter than 4 bytes"),
      | Self::UnknownCode => f.write_str("unknown message code"),
      | Self::InvalidTokenLength(n) => write!(f, "token length {} is greater than 8", n),
      | Self::TokenTruncated => f.write_str("message ends inside the token"),
      | Self::OptionFormat(e) => write!(f, "malformed option: {:?}", e),
    }
  }
}

impl std::error::Error for MessageParseError {}
