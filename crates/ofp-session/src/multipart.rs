//! Multipart reply reassembly keyed by xid.

use std::collections::HashMap;

use ofp_wire::MultipartReply;
use tracing::trace;

use crate::xid::Xid;

/// Result of feeding one fragment to the collector.
#[derive(Debug, PartialEq, Eq)]
pub enum Collected {
    /// More fragments expected; holds the number accumulated so far.
    Incomplete(usize),
    /// Last fragment seen; every fragment in arrival order.
    Complete(Vec<MultipartReply>),
}

/// Accumulates multipart fragments until the final one arrives.
#[derive(Debug, Default)]
pub struct MultipartCollector {
    partial: HashMap<Xid, Vec<MultipartReply>>,
}

impl MultipartCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, xid: Xid, fragment: MultipartReply) -> Collected {
        let more = fragment.has_more();
        let fragments = self.partial.entry(xid).or_default();
        fragments.push(fragment);
        trace!(%xid, fragments = fragments.len(), more, "multipart fragment");
        if more {
            Collected::Incomplete(fragments.len())
        } else {
            Collected::Complete(self.partial.remove(&xid).unwrap_or_default())
        }
    }

    /// Drop the accumulation for `xid`, returning how many fragments it held.
    pub fn discard(&mut self, xid: Xid) -> usize {
        self.partial.remove(&xid).map(|f| f.len()).unwrap_or(0)
    }

    /// Drop every accumulation, returning how many xids were pending.
    pub fn clear(&mut self) -> usize {
        let pending = self.partial.len();
        self.partial.clear();
        pending
    }

    /// Number of xids with an unfinished reply.
    pub fn pending(&self) -> usize {
        self.partial.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use ofp_wire::{MultipartReplyFlags, MultipartType};

    fn fragment(byte: u8, more: bool) -> MultipartReply {
        MultipartReply {
            mp_type: MultipartType::Flow,
            flags: if more {
                MultipartReplyFlags::REPLY_MORE
            } else {
                MultipartReplyFlags::empty()
            },
            body: Bytes::from(vec![byte]),
        }
    }

    #[test]
    fn completes_on_final_fragment_in_order() {
        let mut collector = MultipartCollector::new();
        assert_eq!(collector.push(Xid(4), fragment(1, true)), Collected::Incomplete(1));
        assert_eq!(collector.push(Xid(4), fragment(2, true)), Collected::Incomplete(2));
        match collector.push(Xid(4), fragment(3, false)) {
            Collected::Complete(parts) => {
                let bodies: Vec<u8> = parts.iter().map(|p| p.body[0]).collect();
                assert_eq!(bodies, vec![1, 2, 3]);
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(collector.pending(), 0);
    }

    #[test]
    fn interleaved_xids_stay_separate() {
        let mut collector = MultipartCollector::new();
        collector.push(Xid(1), fragment(1, true));
        collector.push(Xid(2), fragment(9, true));
        assert_eq!(collector.pending(), 2);
        assert_eq!(collector.discard(Xid(2)), 1);
        assert_eq!(collector.clear(), 1);
    }
}
