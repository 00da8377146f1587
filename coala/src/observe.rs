use std::collections::HashMap;
use std::ops::RangeInclusive;
use std::sync::RwLock;

use coala_msg::Token;
use embedded_time::Instant;
use rand::Rng;
use sha2::{Digest, Sha256};

use crate::envelope::ResponseHandler;
use crate::sync::{read, write};
use crate::time::{add_millis, Clock};

/// Token used to observe a URL: the first 8 bytes of its SHA-256.
///
/// Observing the same URL twice reuses the token, so the peer sees a
/// re-registration rather than a second observer.
///
/// ```
/// use coala::observe::token_for;
///
/// let t = token_for("coap://10.0.0.2:5683/temp");
/// assert_eq!(t.len(), 8);
/// assert_eq!(t, token_for("coap://10.0.0.2:5683/temp"));
/// assert_ne!(t, token_for("coap://10.0.0.2:5683/humidity"));
/// ```
pub fn token_for(url: &str) -> Token {
  let hash = Sha256::digest(url.as_bytes());
  Token::new(&hash[..8])
}

/// Seconds past a notification's Max-Age after which an observation is renewed
pub(crate) fn jitter(range: &RangeInclusive<u64>) -> u64 {
  if range.is_empty() {
    return *range.start();
  }

  rand::thread_rng().gen_range(range.clone())
}

struct Observed<C: Clock> {
  url: String,
  handler: ResponseHandler,
  valid_until: Option<Instant<C>>,
  sequence: Option<u64>,
}

/// Resources this instance observes, by the token of the register request
pub(crate) struct Registry<C: Clock> {
  observed: RwLock<HashMap<Token, Observed<C>>>,
}

impl<C: Clock> Default for Registry<C> {
  fn default() -> Self {
    Self { observed: Default::default() }
  }
}

impl<C: Clock> core::fmt::Debug for Registry<C> {
  fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
    f.debug_map()
     .entries(read(&self.observed).iter().map(|(t, o)| (t, &o.url)))
     .finish()
  }
}

impl<C: Clock> Registry<C> {
  pub(crate) fn start(&self, token: Token, url: String, handler: ResponseHandler) {
    log::debug!(target: "coala", "observing {} with token {}", url, token);
    write(&self.observed).insert(token,
                                 Observed { url,
                                            handler,
                                            valid_until: None,
                                            sequence: None });
  }

  pub(crate) fn stop(&self, token: &Token) {
    if let Some(o) = write(&self.observed).remove(token) {
      log::debug!(target: "coala", "stopped observing {}", o.url);
    }
  }

  pub(crate) fn is_observing(&self, token: &Token) -> bool {
    read(&self.observed).contains_key(token)
  }

  pub(crate) fn len(&self) -> usize {
    read(&self.observed).len()
  }

  /// Record a notification.
  ///
  /// Returns the handler it should be delivered to, or `None` when it is
  /// stale (its sequence number is not past the last one seen) or the
  /// token isn't observed.
  pub(crate) fn notification(&self,
                             token: &Token,
                             sequence: Option<u64>,
                             max_age: Option<u64>,
                             jitter_secs: u64,
                             now: Instant<C>)
                             -> Option<ResponseHandler> {
    let mut observed = write(&self.observed);
    let o = observed.get_mut(token)?;

    if let (Some(prev), Some(new)) = (o.sequence, sequence) {
      if prev >= new {
        log::debug!(target: "coala", "dropping stale notification {} for {} (last {})", new, o.url, prev);
        return None;
      }
    }

    o.valid_until = max_age.map(|secs| add_millis(now, (secs + jitter_secs) * 1000));
    o.sequence = sequence;
    Some(o.handler.clone())
  }

  /// Remove the observations that went stale, yielding what is needed to renew them
  pub(crate) fn expired(&self, now: Instant<C>) -> Vec<(String, ResponseHandler)> {
    let mut observed = write(&self.observed);

    let stale = observed.iter()
                        .filter(|(_, o)| o.valid_until.map(|t| t < now).unwrap_or(false))
                        .map(|(t, _)| t.clone())
                        .collect::<Vec<_>>();

    stale.into_iter()
         .filter_map(|t| observed.remove(&t))
         .map(|o| (o.url, o.handler))
         .collect()
  }
}
