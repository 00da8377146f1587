use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::RwLock;

use coala_msg::Scheme;

/// Delivery counters for one route
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Counters {
  /// Messages sent, retransmissions included
  pub total: u64,
  /// Messages sent more than once
  pub retransmits: u64,
}

/// Delivery statistics for a peer.
///
/// Messages sent directly and messages sent through a proxy
/// are counted separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct DeliveryStats {
  /// URL scheme of the counted messages
  #[cfg_attr(feature = "serde", serde(with = "scheme_str"))]
  pub scheme: Scheme,
  /// Peer the messages were sent to
  pub addr: SocketAddr,
  /// Messages sent straight to the peer
  pub direct: Counters,
  /// Messages sent to the peer through a proxy
  pub proxy: Counters,
}

#[cfg(feature = "serde")]
mod scheme_str {
  use coala_msg::Scheme;
  use serde::{Deserialize, Deserializer, Serializer};

  pub(super) fn serialize<S: Serializer>(scheme: &Scheme, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(scheme.as_str())
  }

  pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Scheme, D::Error> {
    let s = String::deserialize(d)?;
    Scheme::parse(&s).ok_or_else(|| serde::de::Error::custom(format!("unknown scheme {:?}", s)))
  }
}

#[derive(Debug, Default)]
pub(crate) struct Statistics(RwLock<HashMap<(Scheme, SocketAddr), DeliveryStats>>);

impl Statistics {
  pub(crate) fn record(&self, scheme: Scheme, addr: SocketAddr, via_proxy: bool, retransmit: bool) {
    let mut map = match self.0.write() {
      | Ok(m) => m,
      | Err(p) => p.into_inner(),
    };

    let stats = map.entry((scheme, addr)).or_insert(DeliveryStats { scheme,
                                                                    addr,
                                                                    direct: Counters::default(),
                                                                    proxy: Counters::default() });
    let counters = if via_proxy {
      &mut stats.proxy
    } else {
      &mut stats.direct
    };

    counters.total += 1;
    if retransmit {
      counters.retransmits += 1;
    }
  }

  pub(crate) fn get(&self, scheme: Scheme, addr: SocketAddr) -> Option<DeliveryStats> {
    self.0.read().ok().and_then(|m| m.get(&(scheme, addr)).copied())
  }

  pub(crate) fn flush(&self, scheme: Scheme, addr: SocketAddr) {
    if let Ok(mut m) = self.0.write() {
      m.remove(&(scheme, addr));
    }
  }

  pub(crate) fn flush_all(&self) {
    if let Ok(mut m) = self.0.write() {
      m.clear();
    }
  }
}
