use std::net::SocketAddr;

use coala_msg::{known, OptValue, ResponseCode};

use super::{InLayer, OutLayer};
use crate::envelope::Envelope;
use crate::{Coala, Error};

/// Errors of the proxy layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProxyError {
  /// A peer asked us to forward a request; this node is not a proxy
  ProxyingNotSupported,
}

impl core::fmt::Display for ProxyError {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | ProxyError::ProxyingNotSupported => write!(f, "proxying is not supported"),
    }
  }
}

/// Routes messages with [`Envelope::proxy_via`] through the proxy,
/// and attributes replies relayed by the proxy to the real peer.
#[derive(Debug, Default)]
pub struct ProxyLayer;

impl InLayer for ProxyLayer {
  fn run_in(&self,
            coala: &Coala,
            msg: &mut Envelope,
            from: &mut SocketAddr,
            ack: &mut Option<Envelope>)
            -> Result<(), Error> {
    if let Some(source) = coala.pool().source_of(msg) {
      if let (Some(proxy), Some(peer)) = (source.proxy_via, source.addr) {
        if proxy == *from {
          msg.proxy_via = Some(proxy);
          msg.addr = Some(peer);
          *from = peer;
        }
      }
    }

    if msg.has(known::no_repeat::PROXY_URI) {
      *ack = Some(Envelope::ack_to(msg, *from, ResponseCode::ProxyingNotSupported));
      return Err(ProxyError::ProxyingNotSupported.into());
    }

    Ok(())
  }
}

impl OutLayer for ProxyLayer {
  fn run_out(&self, _: &Coala, msg: &mut Envelope, to: &mut SocketAddr) -> Result<(), Error> {
    if let Some(proxy) = msg.proxy_via {
      let uri = format!("{}://{}", msg.scheme().as_str(), to);
      msg.set(known::no_repeat::PROXY_URI, OptValue::from(uri));
      *to = proxy;
    }

    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use coala_msg::{Method, Type};

  use super::*;
  use crate::test;

  fn proxy() -> SocketAddr {
    "10.0.0.100:5683".parse().unwrap()
  }

  #[test]
  fn outbound_goes_to_proxy() {
    let (coala, _, _) = test::coala(Default::default());
    let mut env = test::to_peer(test::get("x", 1, &[1]));
    env.proxy_via = Some(proxy());
    let mut to = test::peer_addr();

    ProxyLayer.run_out(&coala, &mut env, &mut to).unwrap();

    assert_eq!(to, proxy());
    assert_eq!(env.get_str(known::no_repeat::PROXY_URI), Some("coap://10.0.0.2:5683"));
  }

  #[test]
  fn reply_from_proxy_is_attributed_to_peer() {
    let (coala, _, _) = test::coala(Default::default());
    let mut out = test::to_peer(test::get("x", 1, &[1]));
    out.proxy_via = Some(proxy());
    coala.pool().push(&out, coala.now());

    let mut rep = Envelope::new(test::msg(Type::Ack, ResponseCode::Content, 1, &[1]));
    let mut from = proxy();
    ProxyLayer.run_in(&coala, &mut rep, &mut from, &mut None)
              .unwrap();

    assert_eq!(from, test::peer_addr());
    assert_eq!(rep.addr, Some(test::peer_addr()));
    assert_eq!(rep.proxy_via, Some(proxy()));
  }

  #[test]
  fn forwarding_requests_is_refused() {
    let (coala, _, _) = test::coala(Default::default());
    let mut req = test::to_peer(test::msg(Type::Con, Method::Get, 1, &[]));
    req.set(known::no_repeat::PROXY_URI, "coap://10.0.0.9:5683".into());
    let mut ack = None;

    assert_eq!(ProxyLayer.run_in(&coala, &mut req, &mut test::peer_addr(), &mut ack),
               Err(Error::Proxy(ProxyError::ProxyingNotSupported)));
    assert_eq!(ack.unwrap().response_code(), Some(ResponseCode::ProxyingNotSupported));
  }
}
