use std::io;
use std::net::{IpAddr, Ipv4Addr, SocketAddr, ToSocketAddrs, UdpSocket};

use embedded_time::rate::Fraction;

use crate::net::{Addrd, Socket};

/// TCP tunnel to a proxy, for networks where UDP is blocked
pub mod tcp;

pub(crate) fn io_to_nb(err: io::Error) -> nb::Error<io::Error> {
  match err.kind() {
    | io::ErrorKind::WouldBlock => nb::Error::WouldBlock,
    | _ => nb::Error::Other(err),
  }
}

/// Bind a non-blocking UDP socket
pub fn bind<A: ToSocketAddrs>(addr: A) -> io::Result<UdpSocket> {
  let sock = UdpSocket::bind(addr)?;
  sock.set_nonblocking(true)?;
  Ok(sock)
}

impl Socket for UdpSocket {
  fn local_addr(&self) -> io::Result<SocketAddr> {
    UdpSocket::local_addr(self)
  }

  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), io::Error> {
    self.send_to(msg.data(), msg.addr())
        .map(|_| ())
        .map_err(io_to_nb)
  }

  fn recv(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, io::Error> {
    self.recv_from(buffer)
        .map(|(n, addr)| Addrd(n, addr))
        .map_err(io_to_nb)
  }

  fn join_multicast(&self, addr: IpAddr) -> io::Result<()> {
    match addr {
      | IpAddr::V4(addr) => self.join_multicast_v4(&addr, &Ipv4Addr::UNSPECIFIED),
      | IpAddr::V6(addr) => self.join_multicast_v6(&addr, 0),
    }
  }
}

/// Implement [`embedded_time::Clock`] using [`std::time`] primitives
#[derive(Debug, Clone, Copy)]
pub struct Clock(std::time::Instant);

impl Default for Clock {
  fn default() -> Self {
    Self::new()
  }
}

impl Clock {
  /// Create a new clock
  pub fn new() -> Self {
    Self(std::time::Instant::now())
  }
}

impl embedded_time::Clock for Clock {
  type T = u64;

  // microseconds
  const SCALING_FACTOR: Fraction = Fraction::new(1, 1_000_000);

  fn try_now(&self) -> Result<embedded_time::Instant<Self>, embedded_time::clock::Error> {
    let now = std::time::Instant::now();
    let elapsed = now.duration_since(self.0);
    Ok(embedded_time::Instant::new(elapsed.as_micros() as u64))
  }
}
