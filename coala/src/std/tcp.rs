use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{IpAddr, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Mutex;

use coala_msg::tcp::{Frame, FrameDecoder};

use super::io_to_nb;
use crate::net::{Addrd, Socket};

/// Default port of the TCP proxy endpoint
pub const DEFAULT_PORT: u16 = 16666;

#[derive(Debug)]
struct Conn {
  stream: TcpStream,
  decoder: FrameDecoder,
  frames: VecDeque<Frame>,
}

/// A [`Socket`] that tunnels datagrams through a TCP connection to a proxy.
///
/// Every datagram is wrapped in a [`Frame`] carrying the real peer address;
/// the proxy forwards it over UDP and wraps replies the same way.
/// Only IPv4 peers can be addressed.
#[derive(Debug)]
pub struct TcpTunnel {
  proxy: SocketAddr,
  conn: Mutex<Conn>,
}

fn connect(proxy: SocketAddr) -> io::Result<TcpStream> {
  let stream = TcpStream::connect(proxy)?;
  stream.set_nonblocking(true)?;
  stream.set_nodelay(true)?;
  Ok(stream)
}

fn poisoned() -> io::Error {
  io::Error::new(io::ErrorKind::Other, "tcp tunnel lock poisoned")
}

impl TcpTunnel {
  /// Connect to a proxy's TCP endpoint
  pub fn connect<A: ToSocketAddrs>(proxy: A) -> io::Result<Self> {
    let proxy = proxy.to_socket_addrs()?
                     .next()
                     .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "no proxy address"))?;

    let stream = connect(proxy)?;
    log::info!(target: "coala", "TCP tunnel connected to {}", proxy);

    Ok(Self { proxy,
              conn: Mutex::new(Conn { stream,
                                      decoder: FrameDecoder::new(),
                                      frames: VecDeque::new() }) })
  }

  /// Address of the proxy
  pub fn proxy(&self) -> SocketAddr {
    self.proxy
  }

  fn reconnect(&self, conn: &mut Conn) -> io::Result<()> {
    conn.decoder.flush();
    conn.stream = connect(self.proxy)?;
    log::info!(target: "coala", "TCP tunnel reconnected to {}", self.proxy);
    Ok(())
  }
}

impl Socket for TcpTunnel {
  fn local_addr(&self) -> io::Result<SocketAddr> {
    self.conn.lock().map_err(|_| poisoned())?.stream.local_addr()
  }

  fn send(&self, msg: Addrd<&[u8]>) -> nb::Result<(), io::Error> {
    let addr = match msg.addr() {
      | SocketAddr::V4(a) => a,
      | SocketAddr::V6(a) => {
        return Err(nb::Error::Other(io::Error::new(io::ErrorKind::InvalidInput,
                                                   format!("cannot tunnel to IPv6 peer {}", a))))
      },
    };

    let bytes = Frame { addr,
                        data: msg.data().to_vec() }.to_bytes()
                                                   .map_err(|e| {
                                                     nb::Error::Other(io::Error::new(io::ErrorKind::InvalidInput, e))
                                                   })?;

    let mut conn = self.conn.lock().map_err(|_| nb::Error::Other(poisoned()))?;
    let mut written = 0;
    while written < bytes.len() {
      match conn.stream.write(&bytes[written..]) {
        | Ok(0) => {
          self.reconnect(&mut conn).map_err(nb::Error::Other)?;
          written = 0;
        },
        | Ok(n) => written += n,
        | Err(e) if e.kind() == io::ErrorKind::WouldBlock => std::thread::yield_now(),
        | Err(e) => return Err(nb::Error::Other(e)),
      }
    }

    Ok(())
  }

  fn recv(&self, buffer: &mut [u8]) -> nb::Result<Addrd<usize>, io::Error> {
    let mut conn = self.conn.lock().map_err(|_| nb::Error::Other(poisoned()))?;

    if conn.frames.is_empty() {
      let mut chunk = [0u8; 4096];
      match conn.stream.read(&mut chunk) {
        | Ok(0) => {
          log::warn!(target: "coala", "TCP tunnel to {} closed", self.proxy);
          self.reconnect(&mut conn).map_err(nb::Error::Other)?;
          return Err(nb::Error::WouldBlock);
        },
        | Ok(n) => {
          let frames = conn.decoder.push(&chunk[..n]);
          conn.frames.extend(frames);
        },
        | Err(e) => return Err(io_to_nb(e)),
      }
    }

    match conn.frames.pop_front() {
      | Some(Frame { addr, data }) => {
        let n = data.len().min(buffer.len());
        buffer[..n].copy_from_slice(&data[..n]);
        Ok(Addrd(n, SocketAddr::V4(addr)))
      },
      | None => Err(nb::Error::WouldBlock),
    }
  }

  fn join_multicast(&self, _: IpAddr) -> io::Result<()> {
    Err(io::Error::new(io::ErrorKind::Unsupported, "multicast over a TCP tunnel"))
  }
}

#[cfg(test)]
mod tests {
  use std::net::{Ipv4Addr, SocketAddrV4, TcpListener};

  use super::*;

  #[test]
  fn tunnels_datagrams() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let tunnel = TcpTunnel::connect(listener.local_addr().unwrap()).unwrap();
    let (mut proxy_side, _) = listener.accept().unwrap();

    let peer = SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::new(10, 1, 2, 3), 5683));
    Socket::send(&tunnel, Addrd(&b"ping"[..], peer)).unwrap();

    let mut got = [0u8; 13];
    proxy_side.read_exact(&mut got).unwrap();
    assert_eq!(&got[..], &[0x4D, 10, 1, 2, 3, 0x33, 0x16, 4, 0, b'p', b'i', b'n', b'g']);

    proxy_side.write_all(&got).unwrap();

    let dgram = loop {
      if let Some(d) = Socket::poll(&tunnel).unwrap() {
        break d;
      }
    };
    assert_eq!(dgram, Addrd(b"ping".to_vec(), peer));
  }
}
