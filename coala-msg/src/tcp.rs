use std::net::{Ipv4Addr, SocketAddrV4};

/// First byte of every tunnel frame
pub const DELIMITER: u8 = 0x4D;

/// Bytes preceding the payload: delimiter, IPv4 address, port, length
pub const HEADER_LEN: usize = 1 + 4 + 2 + 2;

/// A datagram tunneled through a TCP connection to a proxy.
///
/// ```text
/// +------+---------+-----------+-----------+-----------------+
/// | 0x4D | IPv4 x4 | port (LE) | size (LE) | size bytes      |
/// +------+---------+-----------+-----------+-----------------+
/// ```
///
/// `addr` is the final destination (outgoing frames) or the
/// original sender (incoming frames) of the datagram.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
  /// Peer the datagram is addressed to / came from
  pub addr: SocketAddrV4,
  /// The datagram
  pub data: Vec<u8>,
}

/// Errors encounterable encoding a frame
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FrameError {
  /// Datagram does not fit the 16-bit size field
  TooLong(usize),
}

impl core::fmt::Display for FrameError {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    match self {
      | Self::TooLong(n) => write!(f, "datagram of {} bytes does not fit a tunnel frame", n),
    }
  }
}

impl std::error::Error for FrameError {}

impl Frame {
  /// Serialize the frame
  ///
  /// ```
  /// use std::net::{Ipv4Addr, SocketAddrV4};
  ///
  /// use coala_msg::tcp::Frame;
  ///
  /// let frame = Frame { addr: SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 0x1633),
  ///                     data: vec![1, 2, 3] };
  /// assert_eq!(frame.to_bytes().unwrap(),
  ///            vec![0x4D, 10, 0, 0, 1, 0x33, 0x16, 3, 0, 1, 2, 3]);
  /// ```
  pub fn to_bytes(&self) -> Result<Vec<u8>, FrameError> {
    let len = u16::try_from(self.data.len()).map_err(|_| FrameError::TooLong(self.data.len()))?;

    let mut bytes = Vec::with_capacity(HEADER_LEN + self.data.len());
    bytes.push(DELIMITER);
    bytes.extend(self.addr.ip().octets());
    bytes.extend(self.addr.port().to_le_bytes());
    bytes.extend(len.to_le_bytes());
    bytes.extend(self.data.iter().copied());

    Ok(bytes)
  }
}

/// Reassembles [`Frame`]s from a TCP byte stream.
///
/// Bytes are buffered across calls to [`FrameDecoder::push`],
/// so a frame split over several reads is yielded once complete.
/// Garbage before a delimiter is discarded.
#[derive(Clone, Debug, Default)]
pub struct FrameDecoder {
  buffer: Vec<u8>,
}

impl FrameDecoder {
  /// Create an empty decoder
  pub fn new() -> Self {
    Self::default()
  }

  /// Buffer `bytes` and yield every complete frame
  pub fn push(&mut self, bytes: &[u8]) -> Vec<Frame> {
    self.buffer.extend_from_slice(bytes);

    let mut frames = Vec::new();

    loop {
      match self.buffer.iter().position(|b| *b == DELIMITER) {
        | Some(0) => (),
        | Some(n) => {
          self.buffer.drain(..n);
        },
        | None => {
          self.buffer.clear();
          break;
        },
      }

      if self.buffer.len() < HEADER_LEN {
        break;
      }

      let h = &self.buffer[..HEADER_LEN];
      let ip = Ipv4Addr::new(h[1], h[2], h[3], h[4]);
      let port = u16::from_le_bytes([h[5], h[6]]);
      let len = u16::from_le_bytes([h[7], h[8]]) as usize;

      if self.buffer.len() < HEADER_LEN + len {
        break;
      }

      let data = self.buffer[HEADER_LEN..HEADER_LEN + len].to_vec();
      self.buffer.drain(..HEADER_LEN + len);
      frames.push(Frame { addr: SocketAddrV4::new(ip, port),
                          data });
    }

    frames
  }

  /// Drop anything buffered, e.g. after the connection was re-established
  pub fn flush(&mut self) {
    self.buffer.clear();
  }

  /// Number of bytes waiting for the rest of their frame
  pub fn buffered(&self) -> usize {
    self.buffer.len()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn frame(data: &[u8]) -> Frame {
    Frame { addr: SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 7), 5683),
            data: data.to_vec() }
  }

  #[test]
  fn exact_frame_is_decoded() {
    let f = frame(b"hello");
    let mut dec = FrameDecoder::new();
    assert_eq!(dec.push(&f.to_bytes().unwrap()), vec![f]);
    assert_eq!(dec.buffered(), 0);
  }

  #[test]
  fn frame_split_across_reads() {
    let f = frame(b"split me");
    let bytes = f.to_bytes().unwrap();
    let mut dec = FrameDecoder::new();
    assert!(dec.push(&bytes[..3]).is_empty());
    assert!(dec.push(&bytes[3..11]).is_empty());
    assert_eq!(dec.push(&bytes[11..]), vec![f]);
  }

  #[test]
  fn several_frames_and_garbage() {
    let a = frame(b"a");
    let b = frame(b"");
    let bytes = [&[1u8, 2, 3][..], &a.to_bytes().unwrap(), &b.to_bytes().unwrap()].concat();
    let mut dec = FrameDecoder::new();
    assert_eq!(dec.push(&bytes), vec![a, b]);
  }

  #[test]
  fn too_long() {
    let f = frame(&vec![0; 70_000]);
    assert_eq!(f.to_bytes(), Err(FrameError::TooLong(70_000)));
  }
}
