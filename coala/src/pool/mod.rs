use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use coala_msg::{Id, Message, Scheme, Token, Type};
use embedded_time::Instant;

use crate::config::Msg;
use crate::envelope::Envelope;
use crate::time::{millis_between, Clock};

/// Per-peer delivery statistics
pub mod stats;

pub use stats::{Counters, DeliveryStats};

#[derive(Debug)]
struct Element<C: Clock> {
  env: Envelope,
  created: Instant<C>,
  times_sent: u16,
  last_send: Instant<C>,
  did_transmit: bool,
}

/// What should be done with a message in the pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
  /// Send it again
  Resend,
  /// The peer never acknowledged it; notify the response handler and forget it
  Timeout,
  /// Nothing left to do; forget it
  Delete,
}

#[derive(Debug)]
struct Inner<C: Clock> {
  elements: HashMap<Id, Element<C>>,
  tokens: HashMap<Token, Id>,
}

impl<C: Clock> Inner<C> {
  fn remove_id(&mut self, id: Id) -> Option<Envelope> {
    self.tokens.retain(|_, v| *v != id);
    self.elements.remove(&id).map(|el| el.env)
  }
}

/// Outbound messages awaiting acknowledgement or a response.
///
/// Messages are keyed by message id, with a secondary index from token to the
/// id of the last message sent with that token.
///
/// The pool never sends anything itself: [`MessagePool::poll`] says what
/// should happen to each message and the caller acts on it.
#[derive(Debug)]
pub struct MessagePool<C: Clock> {
  config: Msg,
  inner: RwLock<Inner<C>>,
  stats: stats::Statistics,
}

impl<C: Clock> MessagePool<C> {
  /// Create an empty pool
  pub fn new(config: Msg) -> Self {
    Self { config,
           inner: RwLock::new(Inner { elements: HashMap::new(),
                                      tokens: HashMap::new() }),
           stats: Default::default() }
  }

  fn read(&self) -> RwLockReadGuard<'_, Inner<C>> {
    match self.inner.read() {
      | Ok(g) => g,
      | Err(p) => p.into_inner(),
    }
  }

  fn write(&self) -> RwLockWriteGuard<'_, Inner<C>> {
    match self.inner.write() {
      | Ok(g) => g,
      | Err(p) => p.into_inner(),
    }
  }

  /// Track a message that was just sent.
  ///
  /// ACKs are never tracked. Pushing a message id that is already
  /// tracked counts as a retransmission.
  pub fn push(&self, env: &Envelope, now: Instant<C>) {
    if env.ty == Type::Ack {
      return;
    }

    let mut inner = self.write();

    if !env.token.is_empty() {
      inner.tokens.insert(env.token.clone(), env.id);
    }

    let retransmit = match inner.elements.get_mut(&env.id) {
      | Some(el) => {
        el.times_sent = el.times_sent.saturating_add(1);
        el.last_send = now;
        true
      },
      | None => {
        inner.elements.insert(env.id,
                              Element { env: env.clone(),
                                        created: now,
                                        times_sent: 1,
                                        last_send: now,
                                        did_transmit: false });
        false
      },
    };
    drop(inner);

    if let Some(addr) = env.addr {
      self.stats
          .record(env.scheme(), addr, env.proxy_via.is_some(), retransmit);
    }
  }

  /// The peer acknowledged a message
  pub fn did_transmit(&self, id: Id) {
    if let Some(el) = self.write().elements.get_mut(&id) {
      el.did_transmit = true;
    }
  }

  /// Start counting attempts of a message from scratch,
  /// e.g. when the peer is visibly working on it.
  pub fn reset_attempts(&self, id: Id, now: Instant<C>) {
    if let Some(el) = self.write().elements.get_mut(&id) {
      el.times_sent = 1;
      el.last_send = now;
    }
  }

  /// Get a message by id
  pub fn get(&self, id: Id) -> Option<Envelope> {
    self.read().elements.get(&id).map(|el| el.env.clone())
  }

  /// Get the last message sent with a token
  pub fn get_by_token(&self, token: &Token) -> Option<Envelope> {
    let inner = self.read();
    inner.tokens
         .get(token)
         .and_then(|id| inner.elements.get(id))
         .map(|el| el.env.clone())
  }

  /// Find the message `msg` is a reply to: by token, else by message id
  pub fn source_of(&self, msg: &Message) -> Option<Envelope> {
    (!msg.token.is_empty()).then(|| self.get_by_token(&msg.token))
                           .flatten()
                           .or_else(|| self.get(msg.id))
  }

  /// Number of times a message has been sent
  pub fn times_sent(&self, id: Id) -> Option<u16> {
    self.read().elements.get(&id).map(|el| el.times_sent)
  }

  /// Stop tracking a message id
  pub fn remove_id(&self, id: Id) -> Option<Envelope> {
    self.write().remove_id(id)
  }

  /// Stop tracking a message: the last message sent with its token, and its id
  pub fn remove(&self, msg: &Message) {
    let mut inner = self.write();

    if let Some(id) = inner.tokens.remove(&msg.token) {
      inner.remove_id(id);
    }

    inner.remove_id(msg.id);
  }

  /// Stop tracking every message sent with a token.
  ///
  /// Returns how many there were.
  pub fn remove_token(&self, token: &Token) -> usize {
    let mut inner = self.write();
    let ids = inner.elements
                   .iter()
                   .filter(|(_, el)| &el.env.token == token)
                   .map(|(id, _)| *id)
                   .collect::<Vec<_>>();

    ids.iter().for_each(|id| {
                inner.remove_id(*id);
              });
    ids.len()
  }

  /// Number of tracked messages
  pub fn len(&self) -> usize {
    self.read().elements.len()
  }

  /// Whether no messages are tracked
  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  /// Decide what to do with every tracked message.
  ///
  /// Messages that should be left alone for now are not returned.
  pub fn poll(&self, now: Instant<C>) -> Vec<(Action, Envelope)> {
    self.read()
        .elements
        .values()
        .filter_map(|el| self.action(el, now).map(|a| (a, el.env.clone())))
        .collect()
  }

  fn action(&self, el: &Element<C>, now: Instant<C>) -> Option<Action> {
    let since_last_send = millis_between(el.last_send, now);
    let interval = self.config.resend_interval_for(&el.env.path_string()).0;

    match el.env.ty {
      | Type::Con => {
        let exhausted = el.times_sent >= self.config.max_attempts.0;
        match (exhausted, el.did_transmit) {
          | (_, true) => Some(Action::Delete),
          | (true, false) if since_last_send > interval => {
            log::debug!(target: "coala",
                        "message {} expired {}ms after it was first sent",
                        el.env.id,
                        millis_between(el.created, now));
            Some(Action::Timeout)
          },
          | (false, false) if since_last_send > interval => Some(Action::Resend),
          | _ => None,
        }
      },
      | _ => {
        let forget_after = interval * u64::from(self.config.max_attempts.0);
        (since_last_send > forget_after).then_some(Action::Delete)
      },
    }
  }

  /// Delivery statistics for a peer
  pub fn statistics(&self, scheme: Scheme, addr: SocketAddr) -> Option<DeliveryStats> {
    self.stats.get(scheme, addr)
  }

  /// Forget delivery statistics for a peer
  pub fn flush_statistics(&self, scheme: Scheme, addr: SocketAddr) {
    self.stats.flush(scheme, addr)
  }

  /// Forget all delivery statistics
  pub fn flush_all_statistics(&self) {
    self.stats.flush_all()
  }
}
