use std::collections::{HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::{Arc, RwLock, Weak};

use coala_msg::{known, Block, Code, Id, Message, OptNumber, OptValue, Payload, ResponseCode, Token, Type};
use embedded_time::Instant;

use super::{InLayer, OutLayer};
use crate::envelope::{random_id, Envelope, ProgressHandler};
use crate::pool::MessagePool;
use crate::std::Clock;
use crate::sync::{read, write};
use crate::time::{millis_between, Millis};
use crate::window::WindowError;
use crate::{Coala, Error};

/// Receiving side of a transfer
pub mod rx;

/// Sending side of a transfer
pub mod tx;

use rx::SrRx;
use tx::{SrTx, TxBlock};

/// Errors of the selective-repeat ARQ transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArqError {
  /// The message was too large and is being sent in blocks
  SplittingToBlocks,
  /// More blocks are expected before the message can be processed further
  TransferIncomplete,
  /// A CON block without payload
  PayloadExpected,
  /// Blocks must be CON
  NonMessage,
  /// Blocks must carry a token
  TokenMissing,
  /// A block message received an actual response
  BlockAckHandlingFailed,
  /// A block was acknowledged that we never sent
  UnexpectedAck,
  /// A block of a transfer that already completed was sent again; it was
  /// answered the way it was the first time
  Retransmission,
  /// The peer changed the window size in the middle of a transfer
  WindowSizeChange {
    /// Window size the transfer started with
    was: usize,
    /// Window size the peer switched to
    now: usize,
  },
  /// See [`WindowError`]
  Window(WindowError),
}

impl core::fmt::Display for ArqError {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | ArqError::SplittingToBlocks => write!(f, "splitting message to blocks"),
      | ArqError::TransferIncomplete => write!(f, "transfer incomplete"),
      | ArqError::PayloadExpected => write!(f, "block without payload"),
      | ArqError::NonMessage => write!(f, "NON block"),
      | ArqError::TokenMissing => write!(f, "block without token"),
      | ArqError::BlockAckHandlingFailed => write!(f, "block message got a response"),
      | ArqError::UnexpectedAck => write!(f, "ACK for a block that was never sent"),
      | ArqError::Retransmission => write!(f, "block of a completed transfer"),
      | ArqError::WindowSizeChange { was, now } => {
        write!(f, "window size changed from {} to {} during transfer", was, now)
      },
      | ArqError::Window(e) => write!(f, "{}", e),
    }
  }
}

#[derive(Debug)]
struct TxState {
  original: Envelope,
  sr: Arc<SrTx>,
  start: Instant<Clock>,
  retransmits: u64,
}

impl TxState {
  fn log_completed(&self, token: &Token, now: Instant<Clock>) {
    let bytes = self.sr.data().len() as u64;
    let ms = millis_between(self.start, now).max(1);
    let blocks = self.sr.total_blocks() as f64;
    let loss = self.retransmits as f64 / (blocks + self.retransmits as f64) * 100.0;

    log::info!(target: "coala",
               "ARQ tx transfer {} {}B at {}B/s, {:.1}% loss",
               token,
               bytes,
               bytes * 1000 / ms,
               loss);
  }
}

#[derive(Debug)]
struct RxState {
  outbound: Option<Envelope>,
  first: Message,
  sr: Arc<SrRx>,
  start: Instant<Clock>,
  last: Instant<Clock>,
  ids: HashSet<Id>,
}

/// An inbound transfer that completed recently, kept to answer its blocks
/// again when the peer missed our ACKs
#[derive(Debug)]
struct Completed {
  ids: HashSet<Id>,
  /// The block that completed the transfer; its ACK carried the answer
  last_id: Id,
  answer: Option<Message>,
  at: Instant<Clock>,
}

#[derive(Debug, Default)]
struct States {
  tx: RwLock<HashMap<Token, TxState>>,
  rx: RwLock<HashMap<Token, RxState>>,
  done: RwLock<HashMap<Token, Completed>>,
}

impl States {
  /// Abandon the transfer, telling whoever sent the large message.
  ///
  /// Blocks still in flight are no longer retransmitted.
  fn fail(&self, pool: Option<&MessagePool<Clock>>, token: &Token, e: Error) {
    let tx = write(&self.tx).remove(token);
    write(&self.rx).remove(token);
    let in_flight = pool.map(|p| p.remove_token(token)).unwrap_or(0);

    log::debug!(target: "coala",
                "ARQ transfer {} failed: {} ({} blocks in flight dropped)",
                token,
                e,
                in_flight);
    if let Some(tx) = tx {
      tx.original.respond(Err(e));
    }
  }
}

/// Selective-repeat ARQ: large payloads are sent as a stream of CON blocks
/// with up to `window_size` of them unacknowledged at once, and reassembled
/// on the other end regardless of arrival order.
///
/// The window-size option next to a block option marks a message as part of
/// such a transfer; without it, the [`super::block::BlockLayer`] deals with
/// block options.
#[derive(Default)]
pub struct ArqLayer {
  states: Arc<States>,
  progress: RwLock<HashMap<Token, ProgressHandler>>,
}

impl core::fmt::Debug for ArqLayer {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_struct("ArqLayer")
     .field("states", &self.states)
     .field("progress", &read(&self.progress).keys().collect::<Vec<_>>())
     .finish()
  }
}

impl ArqLayer {
  /// Get told about the bytes received so far for a token
  pub(crate) fn set_progress(&self, token: Token, f: ProgressHandler) {
    write(&self.progress).insert(token, f);
  }

  fn progress(&self, token: &Token) -> Option<ProgressHandler> {
    read(&self.progress).get(token).cloned()
  }

  /// Whether a large message is being sent with this token
  pub fn is_sending(&self, token: &Token) -> bool {
    read(&self.states.tx).contains_key(token)
  }

  /// Whether a large message is being received with this token
  pub fn is_receiving(&self, token: &Token) -> bool {
    read(&self.states.rx).contains_key(token)
  }

  /// Drop every transfer with this token, and its progress handler
  pub(crate) fn clear(&self, token: &Token) {
    write(&self.states.tx).remove(token);
    write(&self.states.rx).remove(token);
    write(&self.progress).remove(token);
  }

  /// Drop inbound transfers the peer stopped sending, and forget
  /// completed ones once the peer can no longer retransmit their blocks
  pub(crate) fn prune(&self, now: Instant<Clock>, lifetime: Millis) {
    let stale = |at: Instant<Clock>| millis_between(at, now) > lifetime.0;

    let mut abandoned = vec![];
    write(&self.states.rx).retain(|token, s| {
                            let keep = !stale(s.last);
                            if !keep {
                              abandoned.push(token.clone());
                            }
                            keep
                          });

    if !abandoned.is_empty() {
      let mut progress = write(&self.progress);
      for token in abandoned {
        log::debug!(target: "coala", "ARQ rx transfer {} abandoned by peer", token);
        progress.remove(&token);
      }
    }

    write(&self.states.done).retain(|_, d| !stale(d.at));
  }

  /// Remember the ACK that answered the block completing an inbound transfer
  pub(crate) fn answered(&self, ack: &Message) {
    if let Some(done) = write(&self.states.done).get_mut(&ack.token) {
      if done.answer.is_none() && done.last_id == ack.id {
        done.answer = Some(ack.clone());
      }
    }
  }

  /// Answer a block of a completed transfer like the first time it came.
  ///
  /// Returns `false` when the block isn't part of one.
  fn answer_again(&self,
                  coala: &Coala,
                  msg: &Envelope,
                  block: Block,
                  opt: OptNumber,
                  window_size: usize,
                  ack: &mut Option<Envelope>)
                  -> bool {
    let done = read(&self.states.done);
    let done = match done.get(&msg.token) {
      | Some(d) if d.ids.contains(&msg.id) => d,
      | _ => return false,
    };

    log::debug!(target: "coala",
                "block {} of completed transfer {} sent again",
                block.num(),
                msg.token);

    let ack = match ack.as_mut() {
      | Some(a) => a,
      | None => return true,
    };

    let block_size = usize::from(coala.config().block.size);
    match &done.answer {
      // a large answer went out in blocks of its own; the ACK itself was empty
      | Some(answer) if msg.id == done.last_id && answer.payload.0.len() <= block_size => {
        ack.msg = answer.clone();
      },
      | _ => {
        ack.set(opt, block.to_value());
        ack.set(known::coala::WINDOW_SIZE, OptValue::uint(window_size as u64));
        if msg.id != done.last_id {
          ack.code = Code::Response(ResponseCode::Continue);
        }
      },
    }

    true
  }

  fn send_block(&self,
                coala: &Coala,
                block: TxBlock,
                original: &Envelope,
                token: &Token,
                window_size: usize)
                -> Result<(), Error> {
    let mut msg = Message::new(original.ty, original.code, random_id());
    msg.opts = original.opts.clone();

    let b = Some(Block::new(coala.config().block.size, block.num, block.more));
    if original.is_request() {
      msg.set_block1(b);
    } else {
      msg.set_block2(b);
    }

    msg.set(known::coala::WINDOW_SIZE, OptValue::uint(window_size as u64));
    msg.token = token.clone();
    msg.payload = Payload(block.data);

    let states = self.states.clone();
    let pool: Weak<MessagePool<Clock>> = coala.pool_ref();
    let t = token.clone();
    let num = block.num;
    let on_response = move |r: Result<crate::Response, Error>| {
      let e = match r {
        | Ok(_) => ArqError::BlockAckHandlingFailed.into(),
        | Err(e) => {
          log::trace!(target: "coala", "block {} of {} failed", num, t);
          e
        },
      };
      states.fail(pool.upgrade().as_deref(), &t, e)
    };

    coala.send(Envelope { msg,
                          addr: original.addr,
                          proxy_via: original.proxy_via,
                          peer_public_key: original.peer_public_key,
                          on_response: Some(Arc::new(on_response)) })
  }

  /// Send as many blocks as the window allows
  fn send_more(&self, coala: &Coala, token: &Token) -> Result<(), Error> {
    let (sr, original) = match read(&self.states.tx).get(token) {
      | Some(s) => (s.sr.clone(), s.original.clone()),
      | None => return Ok(()),
    };

    while let Some(block) = sr.pop_block() {
      self.send_block(coala, block, &original, token, sr.window_size())?;
    }

    Ok(())
  }

  fn did_transmit(&self, coala: &Coala, token: &Token, num: u32, retransmits: u64) -> Result<(), Error> {
    let sr = match write(&self.states.tx).get_mut(token) {
      | Some(s) => {
        s.retransmits += retransmits;
        s.sr.clone()
      },
      | None => return Ok(()),
    };

    sr.did_transmit(num).map_err(ArqError::Window)?;
    self.send_more(coala, token)
  }

  fn acked(&self, coala: &Coala, msg: &Envelope, block: Block) -> Result<(), Error> {
    let token = &msg.token;
    let retransmits = coala.pool().times_sent(msg.id).unwrap_or(0).saturating_sub(1);

    self.did_transmit(coala, token, block.num(), u64::from(retransmits))?;
    coala.pool().remove_id(msg.id);

    let completed = match read(&self.states.tx).get(token) {
      | Some(s) => s.sr.is_completed(),
      | None => return Err(ArqError::UnexpectedAck.into()),
    };

    if !completed {
      return Err(ArqError::TransferIncomplete.into());
    }

    if let Some(state) = write(&self.states.tx).remove(token) {
      let now = coala.now();
      state.log_completed(token, now);

      // a request still awaits its response; nothing answers a response
      if state.original.is_request() {
        coala.pool().push(&state.original, now);
      }
    }

    Ok(())
  }

  fn received(&self,
              coala: &Coala,
              msg: &mut Envelope,
              block: Block,
              opt: OptNumber,
              window_size: usize,
              ack: &mut Option<Envelope>)
              -> Result<(), Error> {
    if msg.payload.0.is_empty() {
      return Err(ArqError::PayloadExpected.into());
    }

    let token = msg.token.clone();
    let now = coala.now();

    if !self.is_receiving(&token) && self.answer_again(coala, msg, block, opt, window_size, ack) {
      return Err(ArqError::Retransmission.into());
    }

    let (sr, outbound) = {
      let mut rx = write(&self.states.rx);
      let state = rx.entry(token.clone()).or_insert_with(|| {
                                          log::trace!(target: "coala", "ARQ rx transfer {} started", token);
                                          RxState { outbound: coala.pool().get_by_token(&token),
                                                    first: msg.msg.clone(),
                                                    sr: Arc::new(SrRx::new(window_size)),
                                                    start: now,
                                                    last: now,
                                                    ids: HashSet::new() }
                                        });
      state.last = now;
      state.ids.insert(msg.id);
      (state.sr.clone(), state.outbound.clone())
    };

    sr.did_receive(msg.payload.0.clone(), block.num(), window_size, block.more())?;

    if let Some(f) = self.progress(&token) {
      f(&sr.accumulated());
    }

    if let Some(ack) = ack.as_mut() {
      ack.set(opt, block.to_value());
      ack.set(known::coala::WINDOW_SIZE, OptValue::uint(window_size as u64));
      ack.proxy_via = msg.proxy_via;
      ack.set_or_remove(known::coala::PROXY_SECURITY_ID,
                        msg.get_first(known::coala::PROXY_SECURITY_ID).cloned());
    }

    // the peer is visibly working on our request; don't let it expire
    if let Some(out) = outbound.as_ref() {
      coala.pool().reset_attempts(out.id, now);
    }

    let data = match sr.data() {
      | Some(d) => d,
      | None => {
        if let Some(ack) = ack.as_mut() {
          ack.code = Code::Response(ResponseCode::Continue);
        }
        return Err(ArqError::TransferIncomplete.into());
      },
    };

    let state = write(&self.states.rx).remove(&token);
    write(&self.progress).remove(&token);

    if let Some(state) = state {
      let ms = millis_between(state.start, now).max(1);
      log::info!(target: "coala",
                 "ARQ rx transfer {} {}B at {}B/s",
                 token,
                 data.len(),
                 data.len() as u64 * 1000 / ms);

      if let Some(out) = state.outbound {
        if coala.pool().get(out.id).is_none() {
          coala.pool().push(&out, now);
        }
      }

      write(&self.states.done).insert(token.clone(),
                                      Completed { ids: state.ids,
                                                  last_id: msg.id,
                                                  answer: None,
                                                  at: now });
      msg.opts = state.first.opts;
    }

    msg.payload = Payload(data);
    Ok(())
  }

  fn process(&self,
             coala: &Coala,
             msg: &mut Envelope,
             block: Block,
             opt: OptNumber,
             window_size: usize,
             ack: &mut Option<Envelope>)
             -> Result<(), Error> {
    if msg.token.is_empty() {
      return Err(ArqError::TokenMissing.into());
    }

    match msg.ty {
      | Type::Ack | Type::Reset => self.acked(coala, msg, block),
      | Type::Con => self.received(coala, msg, block, opt, window_size, ack),
      | Type::Non => Err(ArqError::NonMessage.into()),
    }
  }

  fn as_con(msg: &Envelope) -> Envelope {
    let mut con = Message::new(Type::Con, msg.code, random_id());
    con.opts = msg.opts.clone();
    con.set_block1(None);
    con.token = msg.token.clone();
    con.payload = msg.payload.clone();

    Envelope { msg: con,
               addr: msg.addr,
               proxy_via: msg.proxy_via,
               peer_public_key: msg.peer_public_key,
               on_response: msg.on_response.clone() }
  }
}

impl InLayer for ArqLayer {
  fn run_in(&self,
            coala: &Coala,
            msg: &mut Envelope,
            _: &mut SocketAddr,
            ack: &mut Option<Envelope>)
            -> Result<(), Error> {
    let has_block = msg.block1().is_some() || msg.block2().is_some();
    let window_size = match msg.get_uint(known::coala::WINDOW_SIZE) {
      | Some(w) if has_block => w as usize,
      | _ => return Ok(()),
    };

    for opt in [known::no_repeat::BLOCK1, known::no_repeat::BLOCK2] {
      let block = match msg.get_first(opt).and_then(Block::from_value) {
        | Some(b) => b,
        | None => continue,
      };

      let r = self.process(coala, msg, block, opt, window_size, ack);
      msg.remove(opt);
      r?;
    }

    Ok(())
  }
}

impl OutLayer for ArqLayer {
  fn run_out(&self, coala: &Coala, msg: &mut Envelope, to: &mut SocketAddr) -> Result<(), Error> {
    let block_size = usize::from(coala.config().block.size);
    if msg.token.is_empty() || msg.payload.0.len() <= block_size {
      return Ok(());
    }

    coala.pool().remove(&msg.msg);

    let large = match msg.ty {
      | Type::Ack | Type::Reset => {
        // blocks are CONs, so a piggybacked response becomes a separate one
        let mut empty = Envelope::ack_to(&msg.msg, *to, ResponseCode::Empty);
        empty.proxy_via = msg.proxy_via;
        empty.set_block1(msg.block1());
        empty.set_or_remove(known::coala::WINDOW_SIZE,
                            msg.get_first(known::coala::WINDOW_SIZE).cloned());
        coala.send(empty)?;

        Self::as_con(msg)
      },
      | Type::Non => Self::as_con(msg),
      | Type::Con => msg.clone(),
    };

    let token = msg.token.clone();
    let sr = SrTx::new(msg.payload.0.clone(), coala.arq_window_size(), block_size);
    log::trace!(target: "coala",
                "ARQ tx transfer {} of {} blocks started",
                token,
                sr.total_blocks());

    write(&self.states.tx).insert(token.clone(),
                                  TxState { original: large,
                                            sr: Arc::new(sr),
                                            start: coala.now(),
                                            retransmits: 0 });
    self.send_more(coala, &token)?;

    Err(ArqError::SplittingToBlocks.into())
  }
}
