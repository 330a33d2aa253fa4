//! Transaction id generation.

use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};

/// OpenFlow transaction id correlating a request with its replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Xid(pub u32);

impl Xid {
    pub fn value(self) -> u32 {
        self.0
    }
}

impl fmt::Display for Xid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Xid {
    fn from(value: u32) -> Self {
        Xid(value)
    }
}

/// Monotonic xid source shared by every request of a device.
///
/// Values wrap on overflow; a wrapped xid still never collides with a live
/// request unless more than 2^32 requests are outstanding at once.
#[derive(Debug)]
pub struct XidGenerator {
    next: AtomicU32,
}

impl XidGenerator {
    pub fn new(start: u32) -> Self {
        Self {
            next: AtomicU32::new(start),
        }
    }

    /// Hand out the next xid. Safe to call from any number of threads.
    pub fn generate(&self) -> Xid {
        Xid(self.next.fetch_add(1, Ordering::Relaxed))
    }

    /// Xid the next call to [`generate`](Self::generate) would return.
    pub fn peek(&self) -> Xid {
        Xid(self.next.load(Ordering::Relaxed))
    }
}

impl Default for XidGenerator {
    fn default() -> Self {
        Self::new(crate::config::consts::XID_START)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn sequential_values_increase() {
        let xids = XidGenerator::new(7);
        assert_eq!(xids.generate(), Xid(7));
        assert_eq!(xids.generate(), Xid(8));
        assert_eq!(xids.peek(), Xid(9));
    }

    #[test]
    fn concurrent_callers_never_share_a_value() {
        let xids = Arc::new(XidGenerator::new(1));
        let workers: Vec<_> = (0..8)
            .map(|_| {
                let xids = Arc::clone(&xids);
                std::thread::spawn(move || (0..1000).map(|_| xids.generate()).collect::<Vec<_>>())
            })
            .collect();
        let mut seen = HashSet::new();
        for worker in workers {
            let values = worker.join().expect("worker thread");
            assert!(values.windows(2).all(|w| w[0] < w[1]));
            for xid in values {
                assert!(seen.insert(xid), "xid {xid} handed out twice");
            }
        }
        assert_eq!(seen.len(), 8000);
    }

    #[test]
    fn wraps_on_overflow() {
        let xids = XidGenerator::new(u32::MAX);
        assert_eq!(xids.generate(), Xid(u32::MAX));
        assert_eq!(xids.generate(), Xid(0));
    }
}
