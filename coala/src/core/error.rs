use std::io;
use std::net::SocketAddr;

use coala_msg::{MessageParseError, MessageToBytesError};

use crate::envelope::UrlError;
use crate::layer::arq::ArqError;
use crate::layer::block::BlockError;
use crate::layer::observe::ObserveError;
use crate::layer::proxy::ProxyError;
use crate::layer::response::ResponseError;
use crate::security::SecurityError;
use crate::window::WindowError;

/// An error encounterable while sending or receiving messages
///
/// Some variants are not failures at all but signals that a layer
/// took ownership of the message and the rest of the pipeline must not
/// run; see [`Error::is_control_flow`].
#[derive(Debug, Clone, PartialEq)]
pub enum Error {
  /// See [`WindowError`]
  Window(WindowError),
  /// See [`ArqError`]
  Arq(ArqError),
  /// See [`BlockError`]
  Block(BlockError),
  /// See [`SecurityError`]
  Security(SecurityError),
  /// See [`ObserveError`]
  Observe(ObserveError),
  /// See [`ProxyError`]
  Proxy(ProxyError),
  /// See [`ResponseError`]
  Response(ResponseError),
  /// Serializing a message to bytes failed
  ToBytes(MessageToBytesError),
  /// Parsing a message from bytes failed
  FromBytes(MessageParseError),
  /// A socket operation failed
  Socket(io::ErrorKind),
  /// A CONfirmable message was sent the maximum number of times
  /// without being acknowledged.
  ///
  /// Carries the address the message was sent to.
  MessageExpired(Option<SocketAddr>),
  /// The message has no destination
  AddressNotSet,
  /// See [`UrlError`]
  Url(UrlError),
}

impl Error {
  /// Whether this error only signals that the message was taken over
  /// by a layer (it was buffered, split into blocks, answered, ...)
  /// and should not be reported.
  ///
  /// ```
  /// use coala::layer::arq::ArqError;
  /// use coala::Error;
  ///
  /// assert!(Error::Arq(ArqError::SplittingToBlocks).is_control_flow());
  /// assert!(!Error::Arq(ArqError::UnexpectedAck).is_control_flow());
  /// assert!(!Error::AddressNotSet.is_control_flow());
  /// ```
  pub fn is_control_flow(&self) -> bool {
    matches!(self,
             Error::Arq(ArqError::TransferIncomplete)
             | Error::Arq(ArqError::SplittingToBlocks)
             | Error::Arq(ArqError::Retransmission)
             | Error::Block(BlockError::TransferIncomplete)
             | Error::Security(SecurityError::HandshakeInProgress)
             | Error::Observe(ObserveError::RequestHandledWithNotification)
             | Error::Observe(ObserveError::NotificationHandled))
  }
}

impl core::fmt::Display for Error {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | Error::Window(e) => write!(f, "{}", e),
      | Error::Arq(e) => write!(f, "ARQ: {}", e),
      | Error::Block(e) => write!(f, "block-wise transfer: {}", e),
      | Error::Security(e) => write!(f, "security: {}", e),
      | Error::Observe(e) => write!(f, "observe: {}", e),
      | Error::Proxy(e) => write!(f, "proxy: {}", e),
      | Error::Response(e) => write!(f, "{}", e),
      | Error::ToBytes(e) => write!(f, "failed to serialize message: {}", e),
      | Error::FromBytes(e) => write!(f, "failed to parse message: {}", e),
      | Error::Socket(kind) => write!(f, "socket error: {:?}", kind),
      | Error::MessageExpired(Some(addr)) => write!(f, "peer {} did not respond to CON message", addr),
      | Error::MessageExpired(None) => write!(f, "peer did not respond to CON message"),
      | Error::AddressNotSet => write!(f, "message destination not set"),
      | Error::Url(e) => write!(f, "{}", e),
    }
  }
}

impl std::error::Error for Error {}

macro_rules! from_component {
  ($($variant:ident($err:ty)),*) => {
    $(
      impl From<$err> for Error {
        fn from(e: $err) -> Self {
          Error::$variant(e)
        }
      }
    )*
  };
}

from_component!(Window(WindowError),
                Arq(ArqError),
                Block(BlockError),
                Security(SecurityError),
                Observe(ObserveError),
                Proxy(ProxyError),
                Response(ResponseError),
                ToBytes(MessageToBytesError),
                FromBytes(MessageParseError),
                Url(UrlError));

impl From<io::Error> for Error {
  fn from(e: io::Error) -> Self {
    Error::Socket(e.kind())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn control_flow_classification() {
    let control = [Error::Arq(ArqError::TransferIncomplete),
                   Error::Arq(ArqError::SplittingToBlocks),
                   Error::Arq(ArqError::Retransmission),
                   Error::Block(BlockError::TransferIncomplete),
                   Error::Security(SecurityError::HandshakeInProgress),
                   Error::Observe(ObserveError::RequestHandledWithNotification),
                   Error::Observe(ObserveError::NotificationHandled)];
    assert!(control.iter().all(Error::is_control_flow));

    let fatal = [Error::Arq(ArqError::NonMessage),
                 Error::Block(BlockError::OutOfOrder { expected: 0, got: 1 }),
                 Error::Security(SecurityError::ValidationFailed),
                 Error::Observe(ObserveError::ResourceIsNotObserved),
                 Error::Proxy(ProxyError::ProxyingNotSupported),
                 Error::Response(ResponseError::RequestHasBeenReset),
                 Error::MessageExpired(None),
                 Error::Socket(io::ErrorKind::Other)];
    assert!(fatal.iter().all(|e| !e.is_control_flow()));
  }

  #[test]
  fn from_io() {
    let e: Error = io::Error::new(io::ErrorKind::AddrInUse, "taken").into();
    assert_eq!(e, Error::Socket(io::ErrorKind::AddrInUse));
  }
}
