use std::net::SocketAddr;

use coala_msg::{known, Message, Scheme};

use super::{InLayer, OutLayer};
use crate::envelope::Envelope;
use crate::{Coala, Error};

/// One-line summary of a message, e.g.
/// `$ CON 0.02 [id 12] /upload?x=1, 1:5/1/1024, [1024b]`
///
/// ```
/// use coala::layer::log::summary;
/// use coala::msg::*;
///
/// let mut msg = Message::new(Type::Con, Code::Request(Method::Get), Id(7));
/// msg.set(known::repeat::PATH, "a".into());
/// msg.set(known::repeat::QUERY, "b=1".into());
/// msg.payload = Payload(b"hey".to_vec());
///
/// assert_eq!(summary(&msg), "CON 0.01 [id 7] /a?b=1, [3b]");
/// ```
pub fn summary(msg: &Message) -> String {
  let mut s = String::new();

  if msg.scheme() == Scheme::Coaps {
    s.push_str("$ ");
  }

  s.push_str(&format!("{} {} [id {}]", msg.ty, msg.code, msg.id));

  let path = msg.path_string();
  let query = msg.get(known::repeat::QUERY)
                 .filter_map(|v| v.as_str())
                 .collect::<Vec<_>>();
  if !path.is_empty() || !query.is_empty() {
    s.push_str(&format!(" /{}", path));
  }
  if !query.is_empty() {
    s.push_str(&format!("?{}", query.join("&")));
  }

  let block = |b: coala_msg::Block| format!("{}/{}/{}", b.num(), u8::from(b.more()), b.size());
  if let Some(b) = msg.block1() {
    s.push_str(&format!(", 1:{}", block(b)));
  }
  if let Some(b) = msg.block2() {
    s.push_str(&format!(", 2:{}", block(b)));
  }

  if !msg.payload.0.is_empty() {
    s.push_str(&format!(", [{}b]", msg.payload.0.len()));
  }

  s
}

fn details(msg: &Message) -> String {
  let opts = msg.opts
                .iter()
                .filter(|o| {
                  ![known::repeat::PATH, known::repeat::QUERY, known::coala::URI_SCHEME].contains(&o.number)
                })
                .map(|o| o.describe())
                .collect::<Vec<_>>();

  let mut s = summary(msg);
  if !msg.token.is_empty() {
    s.push_str(&format!(", token {}", msg.token));
  }
  if !opts.is_empty() {
    s.push_str(&format!(", {{{}}}", opts.join(", ")));
  }
  s
}

/// Middle blocks of a transfer are too chatty for info
fn is_intermediate_block(msg: &Message) -> bool {
  [msg.block1(), msg.block2()].into_iter()
                              .flatten()
                              .any(|b| b.num() > 0 && b.more())
}

fn emit(msg: &Envelope, line: String) {
  let line = match msg.proxy_via {
    | Some(proxy) => format!("{} via proxy {}", line, proxy),
    | None => line,
  };

  if is_intermediate_block(msg) {
    log::debug!(target: "coala", "{}", line);
  } else {
    log::info!(target: "coala", "{}", line);
  }
}

/// Logs every message going in or out
#[derive(Debug, Default)]
pub struct LogLayer;

impl InLayer for LogLayer {
  fn run_in(&self,
            _: &Coala,
            msg: &mut Envelope,
            from: &mut SocketAddr,
            _: &mut Option<Envelope>)
            -> Result<(), Error> {
    emit(msg, format!("Receiving message: {} from: {}", details(msg), from));
    Ok(())
  }
}

impl OutLayer for LogLayer {
  fn run_out(&self, _: &Coala, msg: &mut Envelope, to: &mut SocketAddr) -> Result<(), Error> {
    emit(msg, format!("Sending message: {} to: {}", details(msg), to));
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use coala_msg::{Block, Code, Id, Method, OptValue, ResponseCode, Type};

  use super::*;

  #[test]
  fn summary_of_secure_block() {
    let mut msg = Message::new(Type::Ack, Code::Response(ResponseCode::Continue), Id(3));
    msg.set_scheme(Scheme::Coaps);
    msg.set_block1(Some(Block::new(1024, 5, true)));

    assert_eq!(summary(&msg), "$ ACK 2.31 [id 3], 1:5/1/1024");
    assert!(is_intermediate_block(&msg));

    msg.set_block1(Some(Block::new(1024, 5, false)));
    assert!(!is_intermediate_block(&msg));
  }

  #[test]
  fn details_include_token_and_options() {
    let mut msg = Message::new(Type::Non, Code::Request(Method::Post), Id(1));
    msg.token = coala_msg::Token::new(&[0xab, 0x01]);
    msg.set(known::no_repeat::CONTENT_FORMAT, OptValue::uint(50));

    assert_eq!(details(&msg), "NON 0.02 [id 1], token ab01, {ContentFormat U:50}");
  }
}
