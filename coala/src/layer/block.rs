use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::RwLock;

use coala_msg::{known, Block, Code, Message, Method, Opt, Payload, ResponseCode, Token, Type};

use super::{InLayer, OutLayer};
use crate::envelope::{random_id, Envelope};
use crate::sync::{read, write};
use crate::{Coala, Error};

/// Errors of the strictly sequential block-wise transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
  /// A block without payload
  UnexpectedEmptyPayload,
  /// More blocks are expected before the message can be processed further
  TransferIncomplete,
  /// A block that doesn't belong to any transfer
  UnexpectedMessage,
  /// A block arrived before the ones preceding it
  OutOfOrder {
    /// The block number that should have come next
    expected: u32,
    /// The block number that came
    got: u32,
  },
}

impl core::fmt::Display for BlockError {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | BlockError::UnexpectedEmptyPayload => write!(f, "block without payload"),
      | BlockError::TransferIncomplete => write!(f, "transfer incomplete"),
      | BlockError::UnexpectedMessage => write!(f, "block does not belong to a known transfer"),
      | BlockError::OutOfOrder { expected, got } => {
        write!(f, "expected block {} but got block {}", expected, got)
      },
    }
  }
}

#[derive(Debug, Default, Clone)]
struct State {
  acc: Vec<u8>,
  outgoing: Option<Envelope>,
  opts: Vec<Opt>,
  expected: u32,
}

fn is_block(o: &Opt) -> bool {
  o.number == known::no_repeat::BLOCK1 || o.number == known::no_repeat::BLOCK2
}

/// RFC7959 block-wise transfer, one block at a time.
///
/// Used with peers that don't negotiate the selective-repeat window.
/// Transfers are tracked by token; without one only the first block
/// of a large payload gets through.
#[derive(Debug, Default)]
pub struct BlockLayer {
  states: RwLock<HashMap<Token, State>>,
}

impl BlockLayer {
  fn state(&self, token: &Token) -> Option<State> {
    if token.is_empty() {
      return None;
    }

    read(&self.states).get(token).cloned()
  }

  fn set_state(&self, token: &Token, state: Option<State>) {
    if token.is_empty() {
      return;
    }

    let mut states = write(&self.states);
    match state {
      | Some(s) => states.insert(token.clone(), s),
      | None => states.remove(token),
    };
  }

  /// Forget the transfer state for a token
  pub(crate) fn clear(&self, token: &Token) {
    self.set_state(token, None)
  }

  /// Accumulate a block. `Ok(true)` when it was the last one, in which case
  /// `msg` now carries the whole payload.
  fn accumulate(&self, msg: &mut Envelope, block: Block) -> Result<bool, BlockError> {
    let mut state = match (block.num(), self.state(&msg.token)) {
      | (0, _) => State { opts: msg.opts.iter().filter(|o| !is_block(o)).cloned().collect(),
                          ..State::default() },
      | (_, Some(s)) => s,
      | (_, None) => return Err(BlockError::UnexpectedMessage),
    };

    if msg.payload.0.is_empty() {
      return Err(BlockError::UnexpectedEmptyPayload);
    }

    if state.expected != block.num() {
      return Err(BlockError::OutOfOrder { expected: state.expected,
                                          got: block.num() });
    }

    state.acc.extend_from_slice(&msg.payload.0);
    state.expected = block.num() + 1;

    if block.more() {
      self.set_state(&msg.token, Some(state));
      return Ok(false);
    }

    let blocks = msg.opts.iter().filter(|o| is_block(o)).cloned().collect::<Vec<_>>();
    msg.payload = Payload(state.acc);
    msg.opts = state.opts;
    msg.opts.extend(blocks);
    self.clear(&msg.token);

    Ok(true)
  }

  fn block1(&self,
            coala: &Coala,
            msg: &mut Envelope,
            from: SocketAddr,
            ack: &mut Option<Envelope>,
            block: Block)
            -> Result<(), Error> {
    if msg.is_request() {
      if let Some(ack) = ack.as_mut() {
        ack.set_block1(Some(block));
      }

      if self.accumulate(msg, block)? {
        return Ok(());
      }

      if let Some(ack) = ack.as_mut() {
        ack.code = Code::Response(ResponseCode::Continue);
      }
      return Err(BlockError::TransferIncomplete.into());
    }

    // the peer got one of our blocks
    if !block.more() {
      return Ok(());
    }

    self.proceed(coala, msg, from, Some(block), None)?;
    Err(BlockError::TransferIncomplete.into())
  }

  fn block2(&self,
            coala: &Coala,
            msg: &mut Envelope,
            from: SocketAddr,
            ack: &mut Option<Envelope>,
            block: Block)
            -> Result<(), Error> {
    if msg.is_request() {
      // block 0 only negotiates the block size
      if block.num() == 0 {
        return Ok(());
      }

      let last = self.state(&msg.token)
                     .and_then(|s| s.outgoing)
                     .ok_or_else(|| {
                       log::warn!(target: "coala", "block {} requested but nothing is being sent", block.num());
                       BlockError::UnexpectedMessage
                     })?;

      let mut next = Message::new(last.ty, last.code, msg.id);
      next.payload = last.payload.clone();
      next.opts = last.opts.clone();
      next.set_block1(None);
      next.token = last.token.clone();

      let mut next = Envelope { addr: Some(from),
                                proxy_via: msg.proxy_via,
                                ..Envelope::new(next) };
      self.trim(&mut next, Some(block), coala.config().block.size);

      match ack.as_mut() {
        | Some(ack) if next.ty == Type::Ack => *ack = next,
        | _ => coala.send(next)?,
      }

      return Err(BlockError::TransferIncomplete.into());
    }

    if self.accumulate(msg, block)? {
      return Ok(());
    }

    self.proceed(coala, msg, from, None, Some(block))?;
    Err(BlockError::TransferIncomplete.into())
  }

  /// Ask for (or send) the block after the one `msg` is about
  fn proceed(&self,
             coala: &Coala,
             msg: &Envelope,
             from: SocketAddr,
             block1: Option<Block>,
             block2: Option<Block>)
             -> Result<(), Error> {
    let prev = match coala.pool().source_of(msg) {
      | Some(p) => p,
      | None if block2.map(|b| b.num()) == Some(0) => {
        let mut get = Message::new(Type::Con, Code::Request(Method::Get), msg.id);
        get.token = msg.token.clone();
        Envelope::new(get)
      },
      | None => return Err(BlockError::UnexpectedMessage.into()),
    };

    // leaving the pool must not end the transfer
    let state = self.state(&msg.token);
    coala.pool().remove(&prev);
    self.set_state(&msg.token, state);

    let mut more = Message::new(prev.ty, prev.code, random_id());
    more.opts = prev.opts.clone();
    more.token = prev.token.clone();
    more.payload = prev.payload.clone();
    more.set_scheme(msg.scheme());

    if let Some(b) = block1 {
      more.set_block1(Some(Block::new(b.size(), b.num() + 1, false)));
    }
    if let Some(b) = block2 {
      more.set_block2(Some(Block::new(b.size(), b.num() + 1, false)));
    }

    // no payload for requests asking for a block2 past the first one
    if more.block2().map(|b| b.num() > 0).unwrap_or(false) {
      more.payload = Payload::default();
      more.set_block1(None);
    }

    coala.send(Envelope { msg: more,
                          addr: prev.addr.or(Some(from)),
                          proxy_via: prev.proxy_via,
                          peer_public_key: prev.peer_public_key,
                          on_response: prev.on_response })
  }

  /// Cut the block a peer asked for (block 0 by default) out of an outbound
  /// payload larger than the block size, caching the full message while
  /// blocks remain.
  fn trim(&self, msg: &mut Envelope, requested: Option<Block>, block_size: u16) {
    let bs = usize::from(block_size);
    let len = msg.payload.0.len();
    if len <= bs {
      return;
    }

    let num = requested.map(|b| b.num()).unwrap_or(0);
    let start = (num as usize).saturating_mul(bs).min(len);
    let end = (start + bs).min(len);
    let more = end < len;

    let mut state = self.state(&msg.token).unwrap_or_default();
    state.outgoing = more.then(|| msg.clone());
    self.set_state(&msg.token, Some(state));

    msg.payload = Payload(msg.payload.0[start..end].to_vec());

    let block = Some(Block::new(block_size, num, more));
    if msg.is_request() {
      msg.set_block1(block);
    } else {
      msg.set_block2(block);
    }
  }
}

impl InLayer for BlockLayer {
  fn run_in(&self,
            coala: &Coala,
            msg: &mut Envelope,
            from: &mut SocketAddr,
            ack: &mut Option<Envelope>)
            -> Result<(), Error> {
    if let Some(b) = msg.block1() {
      self.block1(coala, msg, *from, ack, b)?;
    }

    if let Some(b) = msg.block2() {
      self.block2(coala, msg, *from, ack, b)?;
    }

    Ok(())
  }
}

impl OutLayer for BlockLayer {
  fn run_out(&self, coala: &Coala, msg: &mut Envelope, _: &mut SocketAddr) -> Result<(), Error> {
    let requested = match msg.is_request() {
      | true => msg.block1(),
      | false => msg.block2(),
    };
    self.trim(msg, requested, coala.config().block.size);
    Ok(())
  }
}
