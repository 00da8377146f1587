#![allow(dead_code)]

use ::core::cell::Cell;
use ::std::io;
use ::std::net::{IpAddr, SocketAddr};
use ::std::sync::{Arc, Mutex};

use coala_msg::{Code, Id, Message, Method, Token, TryFromBytes, TryIntoBytes, Type};
use embedded_time::rate::Fraction;
use embedded_time::Instant;

use crate::net::{Addrd, Socket};
use crate::{Config, Envelope};

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct ClockMock(pub Cell<u64>);

impl ClockMock {
  pub fn new() -> Self {
    Self(Cell::new(0))
  }

  pub fn set(&self, to: u64) {
    self.0.set(to);
  }
}

impl embedded_time::Clock for ClockMock {
  type T = u64;

  // nanoseconds
  const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000_000);

  fn try_now(&self) -> Result<Instant<Self>, embedded_time::clock::Error> {
    Ok(Instant::new(self.0.get()))
  }
}

/// An instant `ms` milliseconds after the std clock's epoch
pub fn std_at(ms: u64) -> Instant<crate::std::Clock> {
  Instant::new(ms * 1_000)
}

pub type Dgrams = Arc<Mutex<Vec<Addrd<Vec<u8>>>>>;

/// A mocked socket
#[derive(Debug, Default)]
pub struct SockMock {
  /// Inbound bytes from remote sockets. Address represents the sender
  pub rx: Dgrams,
  /// Outbound bytes to remote sockets. Address represents the destination
  pub tx: Dgrams,
}

impl SockMock {
  pub fn new() -> Self {
    Self::default()
  }

  /// Take every message sent so far
  pub fn drain_sent(tx: &Dgrams) -> Vec<Addrd<Message>> {
    tx.lock()
      .unwrap()
      .drain(..)
      .map(|d| d.map(|bytes| Message::try_from_bytes(bytes).unwrap()))
      .collect()
  }

  pub fn send_msg(rx: &Dgrams, msg: Addrd<Message>) {
    rx.lock()
      .unwrap()
      .push(msg.map(|m| m.try_into_bytes().unwrap()));
  }
}

impl Socket for SockMock {
  fn local_addr(&self) -> io::Result<SocketAddr> {
    Ok(self_addr())
  }

  fn send(&self, buf: Addrd<&[u8]>) -> nb::Result<(), io::Error> {
    self.tx.lock().unwrap().push(buf.map(Vec::from));
    Ok(())
  }

  fn recv(&self, buf: &mut [u8]) -> nb::Result<Addrd<usize>, io::Error> {
    let mut rx = self.rx.lock().unwrap();

    if rx.is_empty() {
      return Err(nb::Error::WouldBlock);
    }

    let dgram = rx.remove(0);
    let n = dgram.data().len().min(buf.len());
    buf[..n].copy_from_slice(&dgram.data()[..n]);

    Ok(dgram.map(|_| n))
  }

  fn join_multicast(&self, _: IpAddr) -> io::Result<()> {
    Ok(())
  }
}

pub fn self_addr() -> SocketAddr {
  "127.0.0.1:5683".parse().unwrap()
}

pub fn peer_addr() -> SocketAddr {
  "10.0.0.2:5683".parse().unwrap()
}

/// A coala instance over a mocked socket, with handles to the socket's queues
pub fn coala(config: Config) -> (crate::Coala, Dgrams, Dgrams) {
  let sock = SockMock::new();
  let (rx, tx) = (sock.rx.clone(), sock.tx.clone());
  (crate::Coala::new(sock, config), rx, tx)
}

pub fn msg(ty: Type, code: impl Into<Code>, id: u16, token: &[u8]) -> Message {
  let mut m = Message::new(ty, code.into(), Id(id));
  m.token = Token::new(token);
  m
}

pub fn get(path: &str, id: u16, token: &[u8]) -> Message {
  let mut m = msg(Type::Con, Method::Get, id, token);
  path.split('/')
      .filter(|s| !s.is_empty())
      .for_each(|s| m.set(coala_msg::known::repeat::PATH, s.into()));
  m
}

pub fn to_peer(msg: Message) -> Envelope {
  Envelope { addr: Some(peer_addr()),
             ..Envelope::new(msg) }
}
