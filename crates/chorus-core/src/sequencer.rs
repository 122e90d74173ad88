//! Message ID allocation.

use crate::message::MessageId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Issues unique, strictly increasing message IDs starting at 1.
///
/// IDs are never reused, even when the message they were issued for fails
/// to persist. Gaps are therefore possible and expected.
#[derive(Debug)]
pub struct Sequencer {
    next: AtomicU64,
}

impl Sequencer {
    /// Create a sequencer whose first ID is 1.
    #[must_use]
    pub fn new() -> Self {
        Self::resume_after(0)
    }

    /// Create a sequencer whose first ID is `last + 1`.
    #[must_use]
    pub fn resume_after(last: MessageId) -> Self {
        Self {
            next: AtomicU64::new(last + 1),
        }
    }

    /// Allocate the next ID.
    pub fn next(&self) -> MessageId {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    /// The most recently issued ID, or 0 if none has been issued.
    #[must_use]
    pub fn last_issued(&self) -> MessageId {
        self.next.load(Ordering::SeqCst) - 1
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    #[test]
    fn test_starts_at_one() {
        let seq = Sequencer::new();
        assert_eq!(seq.last_issued(), 0);
        assert_eq!(seq.next(), 1);
        assert_eq!(seq.next(), 2);
        assert_eq!(seq.last_issued(), 2);
    }

    #[test]
    fn test_resume_after() {
        let seq = Sequencer::resume_after(41);
        assert_eq!(seq.last_issued(), 41);
        assert_eq!(seq.next(), 42);
    }

    #[test]
    fn test_concurrent_ids_are_unique() {
        let seq = Arc::new(Sequencer::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let seq = Arc::clone(&seq);
                std::thread::spawn(move || {
                    let mut ids = Vec::with_capacity(1000);
                    for _ in 0..1000 {
                        ids.push(seq.next());
                    }
                    ids
                })
            })
            .collect();

        let mut all = HashSet::new();
        for handle in handles {
            let ids = handle.join().unwrap();
            // Each thread observes its own IDs in increasing order
            assert!(ids.windows(2).all(|w| w[0] < w[1]));
            all.extend(ids);
        }

        assert_eq!(all.len(), 8000);
        assert_eq!(seq.last_issued(), 8000);
    }
}
