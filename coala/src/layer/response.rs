use std::net::SocketAddr;

use coala_msg::{known, Type};

use super::InLayer;
use crate::envelope::{Envelope, Response};
use crate::{Coala, Error};

/// Errors delivered to response handlers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseError {
  /// The peer answered the request with a RST
  RequestHasBeenReset,
}

impl core::fmt::Display for ResponseError {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | ResponseError::RequestHasBeenReset => write!(f, "request has been reset by the peer"),
    }
  }
}

/// Hands responses to the handler of the message they answer
#[derive(Debug, Default)]
pub struct ResponseLayer;

impl InLayer for ResponseLayer {
  fn run_in(&self,
            coala: &Coala,
            msg: &mut Envelope,
            from: &mut SocketAddr,
            _: &mut Option<Envelope>)
            -> Result<(), Error> {
    if !(msg.is_response() || msg.ty == Type::Reset) {
      return Ok(());
    }

    let source = match coala.pool().source_of(msg) {
      | Some(s) => s,
      | None => {
        if !msg.has(known::no_repeat::OBSERVE) {
          log::warn!(target: "coala",
                     "no request found for response {} (token {}) from {}",
                     msg.id,
                     msg.token,
                     from);
        }
        return Ok(());
      },
    };

    // a multicast request may be answered by many peers
    if !source.is_multicast() {
      coala.forget(&source);
    }

    let r = match msg.ty {
      | Type::Reset => Err(ResponseError::RequestHasBeenReset.into()),
      | _ => Ok(Response { msg: msg.msg.clone(),
                           from: *from,
                           peer_public_key: msg.peer_public_key }),
    };
    source.respond(r);

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::sync::{Arc, Mutex};

  use coala_msg::{Code, ResponseCode};

  use super::*;
  use crate::test;

  type Seen = Arc<Mutex<Vec<Result<Response, Error>>>>;

  fn tracked(coala: &Coala, token: &[u8]) -> Seen {
    let seen = Seen::default();
    let seen_ = seen.clone();
    let env = test::to_peer(test::get("x", 1, token)).with_response_handler(move |r| {
                                                        seen_.lock().unwrap().push(r)
                                                      });
    coala.pool().push(&env, coala.now());
    seen
  }

  #[test]
  fn response_reaches_handler_once() {
    let (coala, _, _) = test::coala(Default::default());
    let seen = tracked(&coala, &[5]);

    let mut rep = test::to_peer(test::msg(Type::Ack, ResponseCode::Content, 1, &[5]));
    rep.payload = coala_msg::Payload(b"hi".to_vec());
    ResponseLayer.run_in(&coala, &mut rep, &mut test::peer_addr(), &mut None)
                 .unwrap();
    ResponseLayer.run_in(&coala, &mut rep, &mut test::peer_addr(), &mut None)
                 .unwrap();

    let seen = seen.lock().unwrap();
    assert_eq!(seen.len(), 1);
    let r = seen[0].as_ref().unwrap();
    assert_eq!(r.msg.payload.0, b"hi".to_vec());
    assert_eq!(r.from, test::peer_addr());
    assert!(coala.pool().is_empty());
  }

  #[test]
  fn reset_fails_request() {
    let (coala, _, _) = test::coala(Default::default());
    let seen = tracked(&coala, &[5]);

    let mut rst = test::to_peer(test::msg(Type::Reset, Code::EMPTY, 1, &[]));
    ResponseLayer.run_in(&coala, &mut rst, &mut test::peer_addr(), &mut None)
                 .unwrap();

    assert_eq!(seen.lock().unwrap()[0],
               Err(Error::Response(ResponseError::RequestHasBeenReset)));
  }

  #[test]
  fn empty_ack_is_not_a_response() {
    let (coala, _, _) = test::coala(Default::default());
    let seen = tracked(&coala, &[5]);

    let mut ack = test::to_peer(test::msg(Type::Ack, Code::EMPTY, 1, &[5]));
    ResponseLayer.run_in(&coala, &mut ack, &mut test::peer_addr(), &mut None)
                 .unwrap();

    assert!(seen.lock().unwrap().is_empty());
    assert_eq!(coala.pool().len(), 1);
  }
}
