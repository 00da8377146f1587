use std::net::SocketAddr;
use std::sync::Arc;

use coala_msg::{known, Code, Message, Method, OptValue, Payload, ResponseCode, Scheme, Type};
use url::Url;

use super::{InLayer, OutLayer};
use crate::envelope::{random_id, Envelope};
use crate::security::{hex, proxy_security_id, Route, SecuredSession, SecurityError, SessionKey, Sessions};
use crate::{Coala, Error};

const HANDSHAKE_REQUEST: u64 = 1;
const HANDSHAKE_RESPONSE: u64 = 2;

/// Secure sessions for `coaps` messages.
///
/// Sessions are set up with an X25519 handshake carried by plain `coap`
/// messages; once established, payloads and destination URLs travel sealed
/// with the session's AEAD. Messages sent while a handshake is underway wait
/// for it to finish.
#[derive(Debug, Default)]
pub struct SecurityLayer {
  sessions: Arc<Sessions>,
}

fn flush(coala: &Coala, pending: Vec<Envelope>) {
  pending.into_iter().for_each(|env| {
                       if let Err(e) = coala.send(env.clone()) {
                         env.respond(Err(e));
                       }
                     });
}

fn fail(pending: Vec<Envelope>, e: SecurityError) {
  pending.into_iter()
         .for_each(|env| env.respond(Err(e.into())));
}

impl SecurityLayer {
  /// Whether a session with the peer is established
  pub fn has_session(&self, addr: SocketAddr) -> bool {
    self.sessions
        .get(&SessionKey { addr,
                           proxy: None,
                           proxy_security_id: None })
        .is_some()
  }

  fn start_handshake(&self, coala: &Coala, key: SessionKey, trigger: &Envelope) -> Result<(), Error> {
    let mut msg = Message::new(Type::Con, Code::Request(Method::Get), random_id());
    msg.set_scheme(Scheme::Coap);
    msg.set(known::coala::HANDSHAKE_TYPE, OptValue::uint(HANDSHAKE_REQUEST));
    if let Some(id) = key.proxy_security_id.clone() {
      msg.set(known::coala::PROXY_SECURITY_ID, id.into());
    }
    msg.payload = Payload(coala.identity().public_key().to_vec());

    let sessions = self.sessions.clone();
    let k = key.clone();
    let handshake = Envelope { addr: Some(key.addr),
                               proxy_via: trigger.proxy_via,
                               ..Envelope::new(msg) }.with_response_handler(move |r| {
                                                        if let Err(e) = r {
                                                          log::warn!(target: "coala", "Handshake with {} failed: {}", k.addr, e);
                                                          sessions.fail(&k)
                                                                  .into_iter()
                                                                  .for_each(|env| env.respond(Err(e.clone())));
                                                        }
                                                      });

    log::debug!(target: "coala", "Handshake: starting with {}", key.addr);
    coala.send(handshake)
  }

  /// The peer answered our handshake
  fn handshake_response(&self, coala: &Coala, msg: &Envelope) -> Result<(), Error> {
    let (source, addr) = match coala.pool().source_of(msg) {
      | Some(s) => match s.addr {
        | Some(a) => (s, a),
        | None => return Ok(()),
      },
      | None => return Ok(()),
    };
    let key = SessionKey::new(addr, &source);

    let peer_key = &msg.payload.0;
    if let Some(expected) = self.sessions.pending_peer_key(&key) {
      if peer_key.as_slice() != expected.as_slice() {
        log::warn!(target: "coala",
                   "Handshake: peer {} public key: {} but expected: {}",
                   key.addr,
                   hex(peer_key),
                   hex(&expected));
        coala.forget(&source);
        fail(self.sessions.fail(&key), SecurityError::PeerPublicKeyValidationFailed);
        return Err(SecurityError::PeerPublicKeyValidationFailed.into());
      }
    }

    let session = match SecuredSession::start(coala.identity(), peer_key, false) {
      | Ok(s) => s,
      | Err(e) => {
        log::error!(target: "coala", "Session error: {}", e);
        coala.forget(&source);
        fail(self.sessions.fail(&key), e);
        return Err(e.into());
      },
    };

    log::info!(target: "coala",
               "Handshake: completed, peer {} public key: {}",
               key.addr,
               hex(peer_key));
    flush(coala, self.sessions.establish(key, session));
    Ok(())
  }

  /// The peer wants a session with us
  fn handshake_request(&self,
                       coala: &Coala,
                       msg: &Envelope,
                       from: SocketAddr,
                       ack: &mut Option<Envelope>)
                       -> Result<(), Error> {
    if msg.payload.0.is_empty() {
      return Err(SecurityError::PayloadExpected.into());
    }

    let session = SecuredSession::start(coala.identity(), &msg.payload.0, true)?;
    log::info!(target: "coala",
               "Handshake: peer {} started a session, public key: {}",
               from,
               hex(&msg.payload.0));

    let mut reply = Envelope::ack_to(msg, from, ResponseCode::Content);
    reply.set_scheme(Scheme::Coap);
    reply.set(known::coala::HANDSHAKE_TYPE, OptValue::uint(HANDSHAKE_RESPONSE));
    reply.set_or_remove(known::coala::PROXY_SECURITY_ID,
                        msg.get_first(known::coala::PROXY_SECURITY_ID).cloned());
    reply.payload = Payload(coala.identity().public_key().to_vec());
    reply.proxy_via = msg.proxy_via;
    *ack = Some(reply);

    flush(coala, self.sessions.establish(SessionKey::new(from, msg), session));
    Err(SecurityError::HandshakeInProgress.into())
  }

  /// The peer lost (or expired) our session; start over with the message it refused
  fn restart(&self, coala: &Coala, msg: &Envelope) -> Result<(), Error> {
    let source = match coala.pool().source_of(msg) {
      | Some(s) => s,
      | None => return Ok(()),
    };
    let addr = match source.addr {
      | Some(a) => a,
      | None => return Ok(()),
    };

    log::info!(target: "coala", "Session with {} is gone, starting a new one", addr);
    coala.forget(&source);
    self.sessions.discard(&SessionKey::new(addr, &source));
    coala.send(source)?;

    Err(SecurityError::HandshakeInProgress.into())
  }

  /// Key of the session an inbound message belongs to.
  ///
  /// Replies relayed by a proxy don't always echo the proxy's session id,
  /// in which case the message they answer has it.
  fn inbound_key(coala: &Coala, msg: &Envelope, from: SocketAddr) -> SessionKey {
    let mut key = SessionKey::new(from, msg);
    if key.proxy_security_id.is_none() && key.proxy.is_some() {
      key.proxy_security_id = coala.pool()
                                   .source_of(msg)
                                   .and_then(|s| proxy_security_id(&s));
    }
    key
  }
}

impl InLayer for SecurityLayer {
  fn run_in(&self,
            coala: &Coala,
            msg: &mut Envelope,
            from: &mut SocketAddr,
            ack: &mut Option<Envelope>)
            -> Result<(), Error> {
    match msg.get_uint(known::coala::HANDSHAKE_TYPE) {
      | Some(HANDSHAKE_RESPONSE) if msg.is_response() => return self.handshake_response(coala, msg),
      | Some(HANDSHAKE_REQUEST) if msg.method() == Some(Method::Get) => {
        return self.handshake_request(coala, msg, *from, ack)
      },
      | _ => (),
    }

    if msg.has(known::coala::SESSION_NOT_FOUND) || msg.has(known::coala::SESSION_EXPIRED) {
      return self.restart(coala, msg);
    }

    if msg.scheme() != Scheme::Coaps {
      return Ok(());
    }

    let key = Self::inbound_key(coala, msg, *from);
    let session = match self.sessions.get(&key) {
      | Some(s) => s,
      | None => {
        let mut reply = Envelope::ack_to(msg, *from, ResponseCode::Unauthorized);
        reply.set_scheme(Scheme::Coap);
        reply.set(known::coala::SESSION_NOT_FOUND, OptValue::uint(1));
        reply.set_or_remove(known::coala::PROXY_SECURITY_ID,
                            msg.get_first(known::coala::PROXY_SECURITY_ID).cloned());
        reply.proxy_via = msg.proxy_via;
        *ack = Some(reply);
        return Err(SecurityError::SessionNotEstablished.into());
      },
    };

    let counter = msg.id.0;
    if !msg.payload.0.is_empty() {
      msg.payload = Payload(session.open(&msg.payload.0, counter)?);
    }

    if let Some(sealed) = msg.get_first(known::coala::COAPS_URI).cloned() {
      let plain = session.open(&sealed.0, counter)?;
      match Url::parse(&String::from_utf8_lossy(&plain)) {
        | Ok(url) => msg.set_path_and_query(&url),
        | Err(e) => log::warn!(target: "coala", "sealed URL of message {} is invalid: {}", msg.id, e),
      }
      msg.remove(known::coala::COAPS_URI);
    }

    msg.peer_public_key = Some(session.peer_public_key());
    Ok(())
  }
}

impl OutLayer for SecurityLayer {
  fn run_out(&self, coala: &Coala, msg: &mut Envelope, to: &mut SocketAddr) -> Result<(), Error> {
    if msg.scheme() != Scheme::Coaps {
      return Ok(());
    }

    let key = SessionKey::new(*to, msg);
    let session = match self.sessions.route(&key, msg) {
      | Route::Seal(s) => s,
      | Route::Enqueued => return Err(SecurityError::HandshakeInProgress.into()),
      | Route::StartHandshake => {
        self.start_handshake(coala, key, msg)?;
        return Err(SecurityError::HandshakeInProgress.into());
      },
    };

    let counter = msg.id.0;
    if !msg.payload.0.is_empty() {
      msg.payload = Payload(session.seal(&msg.payload.0, counter)?);
    }

    if let Some(url) = msg.url() {
      let sealed = session.seal(url.as_str().as_bytes(), counter)?;
      msg.set(known::coala::COAPS_URI, sealed.into());
    }

    msg.remove(known::repeat::PATH);
    msg.remove(known::repeat::QUERY);
    Ok(())
  }
}
