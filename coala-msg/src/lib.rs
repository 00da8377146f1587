//! Low-level representation of CoAP messages used by the `coala` runtime.
//!
//! The most notable item in `coala_msg` is [`Message`];
//! a CoAP message very close to the actual byte layout.
//!
//! Messages are converted to and from bytes with the [`TryIntoBytes`] and [`TryFromBytes`]
//! traits:
//!
//! ```
//! use coala_msg::*;
//!
//! let mut msg = Message::new(Type::Con, Code::Request(Method::Get), Id(1));
//! msg.token = Token::new(&[254]);
//! msg.set(known::repeat::PATH, OptValue::from("msg"));
//!
//! let bytes = msg.clone().try_into_bytes().unwrap();
//! assert_eq!(Message::try_from_bytes(&bytes).unwrap(), msg);
//! ```
//!
//! ## Tunnel frames
//! [`tcp`] contains the framing used when datagrams are tunneled through
//! a TCP connection to a proxy.
#![cfg_attr(not(test), forbid(missing_debug_implementations, unreachable_pub))]
#![cfg_attr(not(test), deny(unsafe_code))]
#![deny(missing_docs)]

#[doc(hidden)]
pub mod from_bytes;

/// Message structs
pub mod msg;

/// TCP tunnel framing
pub mod tcp;

#[doc(hidden)]
pub mod to_bytes;

#[doc(inline)]
pub use from_bytes::TryFromBytes;
#[doc(inline)]
pub use msg::*;
#[doc(inline)]
pub use to_bytes::{MessageToBytesError, TryIntoBytes};

#[cfg(test)]
pub(crate) fn test_msg() -> (Message, Vec<u8>) {
  let header: [u8; 4] = 0b0100_0001_0100_0101_0000_0000_0000_0001_u32.to_be_bytes();
  let token: [u8; 1] = [254u8];
  let content_format: &[u8] = b"application/json";
  let options: [&[u8]; 2] = [&[0b_1100_1101u8, 0b00000011u8], content_format];
  let payload: [&[u8]; 2] = [&[0b1111_1111_u8], b"hello, world!"];
  let bytes = [header.as_ref(),
               token.as_ref(),
               options.concat().as_ref(),
               payload.concat().as_ref()].concat();

  let msg = Message { id: Id(1),
                      ty: Type::Con,
                      token: Token::new(&[254]),
                      opts: vec![Opt { number: OptNumber(12),
                                       value: OptValue(content_format.to_vec()) }],
                      code: Code::Response(ResponseCode::Content),
                      payload: Payload(b"hello, world!".to_vec()) };
  (msg, bytes)
}

#[cfg(test)]
pub(crate) mod tests {
  /// Assert two values are equal, printing them in binary on failure
  #[macro_export]
  macro_rules! assert_eqb {
    ($actual:expr, $expected:expr) => {
      if $actual != $expected {
        panic!("expected {:08b} to equal {:08b}", $actual, $expected)
      }
    };
  }

  /// Assert two byte iterables are equal, printing them in binary on failure
  #[macro_export]
  macro_rules! assert_eqb_iter {
    ($actual:expr, $expected:expr) => {
      if $actual.iter().ne($expected.iter()) {
        panic!("expected {:?} to equal {:?}",
               $actual.into_iter()
                      .map(|b| format!("{:08b}", b))
                      .collect::<Vec<_>>(),
               $expected.into_iter()
                        .map(|b| format!("{:08b}", b))
                        .collect::<Vec<_>>())
      }
    };
  }
}
