use super::MessageParseError;

/// Indicates if this message is of
/// type Confirmable (0), Non-confirmable (1), Acknowledgement (2), or Reset (3).
///
/// See [RFC7252 - Message Details](https://datatracker.ietf.org/doc/html/rfc7252#section-3) for context
#[derive(Copy, Clone, Hash, Eq, Ord, PartialEq, PartialOrd, Debug)]
pub enum Type {
  /// Message that requires an acknowledgement; retransmitted until one arrives.
  Con,
  /// Fire-and-forget message.
  Non,
  /// Acknowledges that a specific Confirmable message arrived.
  ///
  /// May carry a piggybacked response.
  Ack,
  /// A message was received, but some context is missing to process it.
  Reset,
}

impl Type {
  /// The short uppercase name used in logs (`CON`, `NON`, `ACK`, `RST`)
  pub fn short_name(&self) -> &'static str {
    match self {
      | Type::Con => "CON",
      | Type::Non => "NON",
      | Type::Ack => "ACK",
      | Type::Reset => "RST",
    }
  }
}

impl core::fmt::Display for Type {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.write_str(self.short_name())
  }
}

impl TryFrom<u8> for Type {
  type Error = MessageParseError;

  fn try_from(b: u8) -> Result<Self, Self::Error> {
    match b {
      | 0 => Ok(Type::Con),
      | 1 => Ok(Type::Non),
      | 2 => Ok(Type::Ack),
      | 3 => Ok(Type::Reset),
      | _ => Err(MessageParseError::UnknownCode),
    }
  }
}

impl From<Type> for u8 {
  fn from(t: Type) -> u8 {
    match t {
      | Type::Con => 0,
      | Type::Non => 1,
      | Type::Ack => 2,
      | Type::Reset => 3,
    }
  }
}
