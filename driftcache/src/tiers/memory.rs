use crate::asset::Asset;
use scc::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Entry {
    asset: Arc<Asset>,
    expires_at: Instant,
}

/// Expiring memory tier: id → asset held strongly until its TTL runs
/// out. Expired entries are removed on the lookup that finds them.
#[derive(Clone)]
pub struct MemoryTier {
    map: Arc<HashMap<String, Entry>>,
    ttl: Duration,
}

impl MemoryTier {
    pub fn new(ttl: Duration) -> Self {
        MemoryTier {
            map: Arc::default(),
            ttl,
        }
    }

    pub fn get(&self, id: &str) -> Option<Arc<Asset>> {
        let now = Instant::now();
        match self.map.read(id, |_, entry| {
            if entry.expires_at > now {
                Some(entry.asset.clone())
            } else {
                None
            }
        }) {
            Some(Some(asset)) => Some(asset),
            Some(None) => {
                self.map.remove(id);
                None
            }
            None => None,
        }
    }

    /// Insert or replace, restarting the TTL.
    pub fn insert(&self, asset: &Arc<Asset>) {
        let entry = Entry {
            asset: asset.clone(),
            expires_at: Instant::now() + self.ttl,
        };
        let replaced = self
            .map
            .update(asset.id.as_str(), |_, slot| {
                slot.asset = entry.asset.clone();
                slot.expires_at = entry.expires_at;
            })
            .is_some();
        if !replaced {
            let _ = self.map.insert(asset.id.clone(), entry);
        }
    }

    pub fn contains_fresh(&self, id: &str) -> bool {
        let now = Instant::now();
        self.map
            .read(id, |_, entry| entry.expires_at > now)
            .unwrap_or(false)
    }

    pub fn remove(&self, id: &str) {
        self.map.remove(id);
    }

    pub fn clear(&self) {
        let mut keys = Vec::with_capacity(self.map.len());
        self.map.scan(|key, _| keys.push(key.clone()));
        for key in keys {
            self.map.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.len() == 0
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn asset(id: &str) -> Arc<Asset> {
        Arc::new(Asset::new(id, 0, vec![9]))
    }

    #[test]
    fn fresh_entries_hit() {
        let tier = MemoryTier::new(Duration::from_secs(60));
        tier.insert(&asset("m1"));
        assert!(tier.get("m1").is_some());
        assert!(tier.contains_fresh("m1"));
    }

    #[test]
    fn expired_entries_miss_and_are_removed() {
        let tier = MemoryTier::new(Duration::from_millis(20));
        tier.insert(&asset("m2"));
        std::thread::sleep(Duration::from_millis(40));

        assert!(tier.get("m2").is_none());
        assert!(tier.is_empty());
    }

    #[test]
    fn reinsert_restarts_the_ttl() {
        let tier = MemoryTier::new(Duration::from_millis(60));
        tier.insert(&asset("m3"));
        std::thread::sleep(Duration::from_millis(40));
        tier.insert(&asset("m3"));
        std::thread::sleep(Duration::from_millis(40));

        // 80ms after the first insert, 40ms after the second
        assert!(tier.get("m3").is_some());
    }

    #[test]
    fn clear_empties_the_tier() {
        let tier = MemoryTier::new(Duration::from_secs(60));
        tier.insert(&asset("a"));
        tier.insert(&asset("b"));
        tier.clear();
        assert_eq!(tier.len(), 0);
    }
}
