use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Wall-clock instant with a logical tie-breaker.
///
/// Ordering: `unix_ms` then `logical`. Records are stamped with
/// [`Timestamp::now`]; the ledger stamps blocks with [`Timestamp::next_after`]
/// so that block timestamps strictly increase even inside one millisecond or
/// across a backwards clock step.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp {
    /// Milliseconds since the UNIX epoch.
    pub unix_ms: u64,
    /// Logical counter for events within the same millisecond.
    pub logical: u32,
}

impl Timestamp {
    pub const fn new(unix_ms: u64, logical: u32) -> Self {
        Self { unix_ms, logical }
    }

    /// The current wall-clock time with a zero logical component.
    pub fn now() -> Self {
        Self {
            unix_ms: wall_clock_ms(),
            logical: 0,
        }
    }

    /// The zero timestamp.
    pub const fn zero() -> Self {
        Self {
            unix_ms: 0,
            logical: 0,
        }
    }

    /// A timestamp strictly greater than `prev`, as close to now as possible.
    pub fn next_after(prev: &Self) -> Self {
        let now = Self::now();
        if now > *prev {
            return now;
        }
        match prev.logical.checked_add(1) {
            Some(logical) => Self {
                unix_ms: prev.unix_ms,
                logical,
            },
            None => Self {
                unix_ms: prev.unix_ms + 1,
                logical: 0,
            },
        }
    }

    /// Canonical 12-byte little-endian encoding used in hashes.
    pub fn to_le_bytes(&self) -> [u8; 12] {
        let mut out = [0u8; 12];
        out[..8].copy_from_slice(&self.unix_ms.to_le_bytes());
        out[8..].copy_from_slice(&self.logical.to_le_bytes());
        out
    }
}

fn wall_clock_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({}ms.{})", self.unix_ms, self.logical)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.unix_ms, self.logical)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_ms_first() {
        assert!(Timestamp::new(100, 9) < Timestamp::new(101, 0));
        assert!(Timestamp::new(100, 1) < Timestamp::new(100, 2));
    }

    #[test]
    fn now_is_reasonable() {
        // After 2020-01-01.
        assert!(Timestamp::now().unix_ms > 1_577_836_800_000);
    }

    #[test]
    fn next_after_future_prev_bumps_logical() {
        let far = Timestamp::new(u64::MAX / 2, 4);
        assert_eq!(Timestamp::next_after(&far), Timestamp::new(u64::MAX / 2, 5));
    }

    #[test]
    fn next_after_logical_overflow_rolls_ms() {
        let far = Timestamp::new(u64::MAX / 2, u32::MAX);
        assert_eq!(
            Timestamp::next_after(&far),
            Timestamp::new(u64::MAX / 2 + 1, 0)
        );
    }

    #[test]
    fn next_after_is_strictly_monotonic() {
        let mut prev = Timestamp::zero();
        for _ in 0..1000 {
            let next = Timestamp::next_after(&prev);
            assert!(next > prev);
            prev = next;
        }
    }

    #[test]
    fn le_bytes_layout() {
        let ts = Timestamp::new(1, 2);
        let bytes = ts.to_le_bytes();
        assert_eq!(&bytes[..8], &1u64.to_le_bytes());
        assert_eq!(&bytes[8..], &2u32.to_le_bytes());
    }

    #[test]
    fn display_format() {
        assert_eq!(format!("{}", Timestamp::new(1000, 5)), "1000.5");
    }

    proptest::proptest! {
        #[test]
        fn next_after_always_exceeds_prev(ms in 0u64..u64::MAX / 2, logical in proptest::num::u32::ANY) {
            let prev = Timestamp::new(ms, logical);
            proptest::prop_assert!(Timestamp::next_after(&prev) > prev);
        }
    }
}
