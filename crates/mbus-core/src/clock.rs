//! Monotonic millisecond clock
//!
//! Deadlines across the engine are absolute millisecond values from this
//! clock. The ordering predicates compare through a signed 64-bit delta so
//! that they stay correct even if the raw values ever wrap.

use std::sync::OnceLock;
use std::time::Instant;

/// Millisecond reading of the monotonic clock
pub type Millis = u64;

fn epoch() -> Instant {
    static EPOCH: OnceLock<Instant> = OnceLock::new();
    *EPOCH.get_or_init(Instant::now)
}

/// Current monotonic time in milliseconds
pub fn monotonic() -> Millis {
    epoch().elapsed().as_millis() as Millis
}

/// True if `a` is later than `b`
pub fn after(a: Millis, b: Millis) -> bool {
    (b.wrapping_sub(a) as i64) < 0
}

/// True if `a` is earlier than `b`
pub fn before(a: Millis, b: Millis) -> bool {
    after(b, a)
}

/// Milliseconds from `current` until `deadline`, zero if already passed
pub fn until(current: Millis, deadline: Millis) -> Millis {
    if after(current, deadline) {
        0
    } else {
        deadline.wrapping_sub(current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering() {
        assert!(after(10, 5));
        assert!(!after(5, 10));
        assert!(!after(5, 5));
        assert!(before(5, 10));
        assert!(!before(10, 5));
    }

    #[test]
    fn test_ordering_wraps() {
        let a = u64::MAX - 10;
        let b = a.wrapping_add(20);
        assert!(after(b, a));
        assert!(before(a, b));
    }

    #[test]
    fn test_until() {
        assert_eq!(until(100, 150), 50);
        assert_eq!(until(150, 100), 0);
        assert_eq!(until(100, 100), 0);
    }

    #[test]
    fn test_monotonic_advances() {
        let a = monotonic();
        std::thread::sleep(std::time::Duration::from_millis(5));
        let b = monotonic();
        assert!(b >= a);
    }
}
