use core::ops::RangeInclusive;

use embedded_time::duration::Milliseconds;

use crate::time::Millis;

/// A number of attempts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Attempts(pub u16);

/// Resend interval override for requests to a specific path.
///
/// Useful for resources that are known to take a long time
/// before acknowledging (e.g. firmware upgrades).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LongRunning {
  /// Uri-Path of the request, segments joined by `/`, without leading slash
  pub path: String,
  /// Resend interval used instead of [`Msg::resend_interval`]
  pub timeout: Millis,
}

/// Configuration options related to retransmitting outbound messages
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Msg {
  /// Time to wait for an ACK before resending a CON message.
  ///
  /// The retransmission pool is inspected 3 times per interval.
  ///
  /// Defaults to 3 seconds:
  /// ```
  /// use coala::config::Msg;
  /// use embedded_time::duration::Milliseconds;
  ///
  /// assert_eq!(Msg::default().resend_interval, Milliseconds(3_000u64));
  /// ```
  pub resend_interval: Millis,

  /// Number of times a CON message is sent before giving up
  /// and reporting [`Error::MessageExpired`](crate::Error::MessageExpired)
  /// to its response handler.
  ///
  /// NON messages are forgotten after `resend_interval * max_attempts`.
  ///
  /// Defaults to 3 attempts:
  /// ```
  /// use coala::config::{Attempts, Msg};
  ///
  /// assert_eq!(Msg::default().max_attempts, Attempts(3));
  /// ```
  pub max_attempts: Attempts,

  /// Per-path overrides of [`Msg::resend_interval`]
  ///
  /// Defaults to none:
  /// ```
  /// use coala::config::Msg;
  ///
  /// assert!(Msg::default().long_running.is_empty());
  /// ```
  pub long_running: Vec<LongRunning>,
}

impl Default for Msg {
  fn default() -> Self {
    Msg { resend_interval: Milliseconds(3_000),
          max_attempts: Attempts(3),
          long_running: Vec::new() }
  }
}

impl Msg {
  /// Resend interval for a message with the given Uri-Path
  pub fn resend_interval_for(&self, path: &str) -> Millis {
    self.long_running
        .iter()
        .find(|lr| lr.path == path)
        .map(|lr| lr.timeout)
        .unwrap_or(self.resend_interval)
  }

  /// How long a peer may keep retransmitting a message of an exchange:
  /// every attempt plus one more interval.
  ///
  /// ```
  /// use coala::config::Msg;
  /// use embedded_time::duration::Milliseconds;
  ///
  /// assert_eq!(Msg::default().exchange_lifetime(), Milliseconds(12_000u64));
  /// ```
  pub fn exchange_lifetime(&self) -> Millis {
    Milliseconds(self.resend_interval.0 * (u64::from(self.max_attempts.0) + 1))
  }
}

/// Selective-repeat ARQ configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Arq {
  /// Number of blocks kept in flight while sending a large payload.
  ///
  /// Defaults to 70:
  /// ```
  /// use coala::config::Arq;
  ///
  /// assert_eq!(Arq::default().window_size, 70);
  /// ```
  pub window_size: usize,
}

impl Default for Arq {
  fn default() -> Self {
    Arq { window_size: 70 }
  }
}

/// Block-wise transfer configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block {
  /// Payloads larger than this are split into blocks.
  ///
  /// Must be a power of two in `16..=1024`. Defaults to 1024:
  /// ```
  /// use coala::config::Block;
  ///
  /// assert_eq!(Block::default().size, 1024);
  /// ```
  pub size: u16,
}

impl Default for Block {
  fn default() -> Self {
    Block { size: 1024 }
  }
}

/// Client-side observation configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Observe {
  /// Seconds added to a notification's Max-Age before the
  /// observation is considered stale and re-registered.
  ///
  /// A value is picked at random from this range for every notification.
  ///
  /// Defaults to `5..=15`:
  /// ```
  /// use coala::config::Observe;
  ///
  /// assert_eq!(Observe::default().expiry_jitter_secs, 5..=15);
  /// ```
  pub expiry_jitter_secs: RangeInclusive<u64>,

  /// How often observations are checked for expiry.
  ///
  /// Defaults to 1 second:
  /// ```
  /// use coala::config::Observe;
  /// use embedded_time::duration::Milliseconds;
  ///
  /// assert_eq!(Observe::default().tick, Milliseconds(1_000u64));
  /// ```
  pub tick: Millis,
}

impl Default for Observe {
  fn default() -> Self {
    Observe { expiry_jitter_secs: 5..=15,
              tick: Milliseconds(1_000) }
  }
}

/// Runtime config
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Config {
  /// See [`Msg`]
  pub msg: Msg,
  /// See [`Arq`]
  pub arq: Arq,
  /// See [`Block`]
  pub block: Block,
  /// See [`Observe`]
  pub observe: Observe,
}

impl Config {
  /// How often the retransmission pool should be inspected
  pub(crate) fn pool_tick(&self) -> Millis {
    Milliseconds((self.msg.resend_interval.0 / 3).max(1))
  }
}
