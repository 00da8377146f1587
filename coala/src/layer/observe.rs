use std::net::SocketAddr;

use coala_msg::{known, Code, Message, Method, OptValue, Payload, ResponseCode, Token, Type};
use embedded_time::Instant;

use super::{InLayer, OutLayer};
use crate::envelope::{Envelope, Response};
use crate::observe::{jitter, Registry};
use crate::resource::{Input, Output, Resource};
use crate::{Coala, Error};

const REGISTER: u64 = 0;
const DEREGISTER: u64 = 1;

/// Errors of the observe layer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveError {
  /// A register request was answered with the resource's current state
  RequestHandledWithNotification,
  /// A notification was delivered to (or discarded for) the observer
  NotificationHandled,
  /// The peer sent a notification for a token nothing observes
  ResourceIsNotObserved,
  /// A register request must have a response handler to deliver notifications to
  HandlerRequired,
}

impl core::fmt::Display for ObserveError {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | ObserveError::RequestHandledWithNotification => write!(f, "request answered with a notification"),
      | ObserveError::NotificationHandled => write!(f, "notification handled"),
      | ObserveError::ResourceIsNotObserved => write!(f, "notification for a resource that isn't observed"),
      | ObserveError::HandlerRequired => write!(f, "register request without a response handler"),
    }
  }
}

/// Observers of our resources, and the resources we observe
#[derive(Debug, Default)]
pub struct ObserveLayer {
  registry: Registry<crate::std::Clock>,
}

impl ObserveLayer {
  /// Whether notifications with this token are expected
  pub fn is_observing(&self, token: &Token) -> bool {
    self.registry.is_observing(token)
  }

  /// Number of resources being observed
  pub fn observed_count(&self) -> usize {
    self.registry.len()
  }

  /// Renew observations whose notifications stopped coming
  pub(crate) fn tick(&self, coala: &Coala, now: Instant<crate::std::Clock>) {
    for (url, handler) in self.registry.expired(now) {
      log::info!(target: "coala", "observation of {} expired, registering again", url);
      if let Err(e) = coala.observe_url(&url, REGISTER, Some(handler)) {
        log::warn!(target: "coala", "failed to observe {} again: {}", url, e);
      }
    }
  }

  fn request(&self,
             coala: &Coala,
             msg: &Envelope,
             from: SocketAddr,
             ack: &mut Option<Envelope>)
             -> Result<(), Error> {
    let action = match msg.get_uint(known::no_repeat::OBSERVE) {
      | Some(a) => a,
      | None => return Ok(()),
    };

    let path = msg.path_string();
    let resource = coala.resources()
                        .into_iter()
                        .filter(|res| res.matches(Method::Get, &path))
                        .find_map(|res| match res {
                          | Resource::Observable(r) => Some(r),
                          | _ => None,
                        });
    let resource = match resource {
      | Some(r) => r,
      | None => return Ok(()),
    };

    match action {
      | REGISTER => {
        resource.add_observer(from, msg.clone());
        let Output { code, payload } = resource.handle(Input { query: msg.query(),
                                                               payload: msg.payload.0.clone() });

        log::debug!(target: "coala",
                    "{} observes /{} ({} observers)",
                    from,
                    path,
                    resource.observers_count());

        let mut rep = match ack.take() {
          | Some(ack) => ack,
          | None => {
            let mut rep = Envelope::response_to(Type::Non, code, msg, from);
            rep.id = msg.id;
            rep.proxy_via = msg.proxy_via;
            rep
          },
        };
        rep.code = Code::Response(code);
        rep.payload = Payload(payload);
        rep.set(known::no_repeat::OBSERVE, OptValue::uint(resource.sequence()));

        match rep.ty {
          | Type::Ack => *ack = Some(rep),
          | _ => coala.send(rep)?,
        }

        Err(ObserveError::RequestHandledWithNotification.into())
      },
      | DEREGISTER => {
        resource.remove_observer(from);
        Ok(())
      },
      | _ => Ok(()),
    }
  }

  fn response(&self,
              coala: &Coala,
              msg: &Envelope,
              from: SocketAddr,
              ack: &mut Option<Envelope>)
              -> Result<(), Error> {
    let observe = msg.get_uint(known::no_repeat::OBSERVE);

    if !self.registry.is_observing(&msg.token) {
      if observe.is_none() {
        return Ok(());
      }

      let mut rst = Message::new(Type::Reset, Code::Response(ResponseCode::NotFound), msg.id);
      rst.token = msg.token.clone();
      rst.set_scheme(msg.scheme());
      *ack = Some(Envelope { addr: Some(from),
                             proxy_via: msg.proxy_via,
                             ..Envelope::new(rst) });
      return Err(ObserveError::ResourceIsNotObserved.into());
    }

    // notifications answer the register request; it must not be resent
    if let Some(register) = coala.pool().get_by_token(&msg.token) {
      coala.forget(&register);
    }

    let now = coala.now();
    let handler = self.registry.notification(&msg.token,
                                             observe,
                                             msg.get_uint(known::no_repeat::MAX_AGE),
                                             jitter(&coala.config().observe.expiry_jitter_secs),
                                             now);

    if observe.is_none() || msg.code.class() != 2 {
      self.registry.stop(&msg.token);
    }

    if let Some(ack) = ack.as_mut() {
      ack.set_or_remove(known::no_repeat::OBSERVE,
                        msg.get_first(known::no_repeat::OBSERVE).cloned());
    }

    if let Some(f) = handler {
      f(Ok(Response { msg: msg.msg.clone(),
                      from,
                      peer_public_key: msg.peer_public_key }));
    }

    Err(ObserveError::NotificationHandled.into())
  }
}

impl InLayer for ObserveLayer {
  fn run_in(&self,
            coala: &Coala,
            msg: &mut Envelope,
            from: &mut SocketAddr,
            ack: &mut Option<Envelope>)
            -> Result<(), Error> {
    match msg.code {
      | Code::Request(Method::Get) => self.request(coala, msg, *from, ack),
      | Code::Response(ResponseCode::Empty) | Code::Request(_) => Ok(()),
      | Code::Response(_) => self.response(coala, msg, *from, ack),
    }
  }
}

impl OutLayer for ObserveLayer {
  fn run_out(&self, _: &Coala, msg: &mut Envelope, _: &mut SocketAddr) -> Result<(), Error> {
    if !msg.is_request() || msg.token.is_empty() {
      return Ok(());
    }

    match msg.get_uint(known::no_repeat::OBSERVE) {
      | Some(REGISTER) => {
        let handler = msg.on_response
                         .clone()
                         .ok_or(ObserveError::HandlerRequired)?;
        let url = msg.url().map(|u| u.to_string()).unwrap_or_default();
        self.registry.start(msg.token.clone(), url, handler);
      },
      | Some(DEREGISTER) => self.registry.stop(&msg.token),
      | _ => (),
    }

    Ok(())
  }
}
