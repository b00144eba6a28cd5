//! Expiring string set used to tag paths whose next filesystem event is
//! already attributed (e.g. a finished web upload that must not be
//! re-attributed to SMB). A min-heap keyed by expiry is swept on access, so
//! no background task is needed.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::{Duration, Instant};

use parking_lot::Mutex;

#[derive(Debug, Default)]
pub struct TtlSet {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, Instant>,
    expiries: BinaryHeap<Reverse<(Instant, String)>>,
}

impl TtlSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark(&self, key: impl Into<String>, ttl: Duration) {
        let key = key.into();
        let deadline = Instant::now() + ttl;
        let mut inner = self.inner.lock();
        inner.entries.insert(key.clone(), deadline);
        inner.expiries.push(Reverse((deadline, key)));
    }

    pub fn is_marked(&self, key: &str) -> bool {
        let mut inner = self.inner.lock();
        Self::sweep(&mut inner);
        inner.entries.contains_key(key)
    }

    pub fn len(&self) -> usize {
        let mut inner = self.inner.lock();
        Self::sweep(&mut inner);
        inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn sweep(inner: &mut Inner) {
        let now = Instant::now();
        while let Some(Reverse((deadline, _))) = inner.expiries.peek() {
            if *deadline > now {
                break;
            }
            let Some(Reverse((deadline, key))) = inner.expiries.pop() else {
                break;
            };
            // A re-mark leaves a stale heap entry behind; only drop the map
            // entry when the deadlines still agree.
            if inner.entries.get(&key) == Some(&deadline) {
                inner.entries.remove(&key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn marked_entries_expire() {
        let set = TtlSet::new();
        set.mark("/data/users/alice/a.txt", Duration::from_millis(20));
        assert!(set.is_marked("/data/users/alice/a.txt"));
        std::thread::sleep(Duration::from_millis(40));
        assert!(!set.is_marked("/data/users/alice/a.txt"));
        assert!(set.is_empty());
    }

    #[test]
    fn remark_extends_lifetime() {
        let set = TtlSet::new();
        set.mark("k", Duration::from_millis(20));
        set.mark("k", Duration::from_millis(200));
        std::thread::sleep(Duration::from_millis(40));
        // The first deadline has passed but the re-mark must keep it alive.
        assert!(set.is_marked("k"));
    }

    #[test]
    fn unknown_keys_are_not_marked() {
        let set = TtlSet::new();
        assert!(!set.is_marked("nope"));
    }
}
