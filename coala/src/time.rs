use embedded_time::duration::Milliseconds;
use embedded_time::Instant;

/// A duration, in milliseconds
pub type Millis = embedded_time::duration::Milliseconds<u64>;

/// Supertrait of [`embedded_time::Clock`] pinning the
/// type of "ticks" to u64
pub trait Clock: embedded_time::Clock<T = u64> {}
impl<C: embedded_time::Clock<T = u64>> Clock for C {}

/// Milliseconds elapsed between two instants; zero if `later` is before `earlier`
///
/// ```
/// use coala::time::millis_between;
/// use embedded_time::Instant;
///
/// // the std clock ticks in microseconds
/// let a = Instant::<coala::std::Clock>::new(1_000);
/// let b = Instant::<coala::std::Clock>::new(3_500_000);
/// assert_eq!(millis_between(a, b), 3_499);
/// assert_eq!(millis_between(b, a), 0);
/// ```
pub fn millis_between<C: Clock>(earlier: Instant<C>, later: Instant<C>) -> u64 {
  later.checked_duration_since(&earlier)
       .and_then(|d| Millis::try_from(d).ok())
       .map(|Milliseconds(ms)| ms)
       .unwrap_or(0)
}

/// `now` shifted forward by some milliseconds, saturating at `now` on overflow
pub fn add_millis<C: Clock>(now: Instant<C>, ms: u64) -> Instant<C> {
  now.checked_add(Milliseconds(ms)).unwrap_or(now)
}
