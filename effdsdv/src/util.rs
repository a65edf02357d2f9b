use std::time::Duration;

use rand::Rng;

/// Whether an update `(seqno_a, hops_a)` should replace `(seqno_b, hops_b)`
///
/// # Examples
///
/// ```
/// use effdsdv::util::is_fresher;
/// assert!(is_fresher(6, 3, 4, 1));
/// assert!(is_fresher(4, 1, 4, 2));
///
/// assert!(!is_fresher(4, 2, 4, 2));
/// assert!(!is_fresher(2, 1, 4, 9));
/// ```
pub fn is_fresher(seqno_a: u32, hops_a: u16, seqno_b: u32, hops_b: u16) -> bool {
    seqno_a > seqno_b || (seqno_a == seqno_b && hops_a < hops_b)
}

/// Odd sequence numbers signal an unreachable destination
pub fn is_poisoned(seqno: u32) -> bool {
    seqno % 2 == 1
}

/// The poisoned successor of a sequence number, already poisoned values are kept
pub fn poison(seqno: u32) -> u32 {
    if is_poisoned(seqno) {
        seqno
    } else {
        seqno.wrapping_add(1)
    }
}

/// `w * settling + (1 - w) * lifetime`, zero when there was no settling time before.
/// The weight is clamped to `[0, 1]`.
pub fn weighted_settling_time(weight: f64, settling: Duration, lifetime: Duration) -> Duration {
    if settling.is_zero() {
        return Duration::ZERO;
    }
    let weight = if weight.is_nan() { 1.0 } else { weight.clamp(0.0, 1.0) };
    let secs = weight * settling.as_secs_f64() + (1.0 - weight) * lifetime.as_secs_f64();
    Duration::try_from_secs_f64(secs).unwrap_or(settling)
}

/// Uniform delay in `[0, max]` in steps of `unit`
pub fn jitter(rng: &mut impl Rng, unit: Duration, max: u32) -> Duration {
    unit * rng.gen_range(0..=max)
}
