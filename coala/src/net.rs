use std::io;
use std::net::{IpAddr, SocketAddr};

/// Data that came from (or is going to) a network socket
#[derive(PartialEq, PartialOrd, Eq, Ord, Hash, Debug, Clone, Copy)]
pub struct Addrd<T>(pub T, pub SocketAddr);

impl<T> Addrd<T> {
  /// Borrow the contents of this Addressed
  pub fn as_ref(&self) -> Addrd<&T> {
    Addrd(self.data(), self.addr())
  }

  /// Discard the socket and get the data in this Addressed
  pub fn unwrap(self) -> T {
    self.0
  }

  /// Map the data contained in this Addressed
  pub fn map<R>(self, f: impl FnOnce(T) -> R) -> Addrd<R> {
    Addrd(f(self.0), self.1)
  }

  /// Borrow the contents of the addressed item
  pub fn data(&self) -> &T {
    &self.0
  }

  /// Copy the socket address for the data
  pub fn addr(&self) -> SocketAddr {
    self.1
  }
}

/// A datagram socket coala can run on.
///
/// Operations are non-blocking: when nothing can be done right now
/// they yield [`nb::Error::WouldBlock`].
///
/// Implemented for [`std::net::UdpSocket`] and for the TCP proxy tunnel
/// [`TcpTunnel`](crate::std::tcp::TcpTunnel).
pub trait Socket: Send + Sync + core::fmt::Debug {
  /// Get the local address this socket is bound to
  fn local_addr(&self) -> io::Result<SocketAddr>;

  /// Send a datagram to a remote address
  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), io::Error>;

  /// Pull a buffered datagram from the socket, along with the address of the sender.
  ///
  /// It is expected that (like [`std::net::UdpSocket`]) if the message is larger
  /// than the buffer, those bytes are dropped and not considered an error condition.
  fn recv(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, io::Error>;

  /// Join a multicast group
  fn join_multicast(&self, addr: IpAddr) -> io::Result<()>;

  /// Poll the socket for a datagram
  fn poll(&self) -> io::Result<Option<Addrd<Vec<u8>>>> {
    let mut buf = vec![0u8; 65_536];

    match self.recv(&mut buf) {
      | Ok(Addrd(n, addr)) => {
        buf.truncate(n);
        Ok(Some(Addrd(buf, addr)))
      },
      | Err(nb::Error::WouldBlock) => Ok(None),
      | Err(nb::Error::Other(e)) => Err(e),
    }
  }
}

/// Helper constants and functions for multicast addresses
pub mod multicast {
  use std::net::{IpAddr, Ipv4Addr};

  /// IPv4 "All CoAP devices" multicast address.
  pub const ALL_COAP_DEVICES_IP: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 187);

  /// Whether responses to messages sent to `ip` may come from many peers,
  /// so the request should stay in the retransmission pool.
  pub fn is_all_coap_devices(ip: IpAddr) -> bool {
    ip == IpAddr::V4(ALL_COAP_DEVICES_IP)
  }
}
