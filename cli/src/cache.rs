//! Session read cache for state entries
//!
//! Only read paths consult it. Submissions drop the addresses they write.

use keyledger_core::Address;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::time::{Duration, Instant};

struct CacheEntry {
    fetched_at: Instant,
    value: Option<Vec<u8>>,
}

/// Address to blob cache with a fixed time-to-live; a zero TTL disables it
pub struct StateCache {
    ttl: Duration,
    entries: Mutex<HashMap<Address, CacheEntry>>,
}

impl StateCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn disabled() -> Self {
        Self::new(Duration::ZERO)
    }

    pub fn is_enabled(&self) -> bool {
        !self.ttl.is_zero()
    }

    /// Cached lookup: `Some(None)` means the address was known to be empty
    pub fn get(&self, address: &Address) -> Option<Option<Vec<u8>>> {
        if !self.is_enabled() {
            return None;
        }
        let mut entries = self.entries.lock();
        match entries.get(address) {
            Some(entry) if entry.fetched_at.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.remove(address);
                None
            }
            None => None,
        }
    }

    pub fn insert(&self, address: Address, value: Option<Vec<u8>>) {
        if !self.is_enabled() {
            return;
        }
        self.entries.lock().insert(
            address,
            CacheEntry {
                fetched_at: Instant::now(),
                value,
            },
        );
    }

    pub fn invalidate<'a>(&self, addresses: impl IntoIterator<Item = &'a Address>) {
        let mut entries = self.entries.lock();
        for address in addresses {
            entries.remove(address);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(c: char) -> Address {
        Address::from_hex(&c.to_string().repeat(70)).unwrap()
    }

    #[test]
    fn test_hit_and_invalidate() {
        let cache = StateCache::new(Duration::from_secs(60));
        cache.insert(addr('a'), Some(b"farmA,42".to_vec()));
        cache.insert(addr('b'), None);

        assert_eq!(cache.get(&addr('a')), Some(Some(b"farmA,42".to_vec())));
        assert_eq!(cache.get(&addr('b')), Some(None));
        assert_eq!(cache.get(&addr('c')), None);

        cache.invalidate([&addr('a')]);
        assert_eq!(cache.get(&addr('a')), None);
        assert_eq!(cache.len(), 1);

        cache.invalidate([&addr('b')]);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_expiry() {
        let cache = StateCache::new(Duration::from_millis(20));
        cache.insert(addr('a'), Some(vec![1]));
        std::thread::sleep(Duration::from_millis(40));
        assert_eq!(cache.get(&addr('a')), None);
        assert!(cache.is_empty());
    }

    #[test]
    fn test_disabled() {
        let cache = StateCache::disabled();
        cache.insert(addr('a'), Some(vec![1]));
        assert!(!cache.is_enabled());
        assert_eq!(cache.get(&addr('a')), None);
        assert!(cache.is_empty());
    }
}
