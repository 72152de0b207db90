use scc::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// How many entries a single prune pass will look at.
const PRUNE_SAMPLE_CAP: usize = 5_000;

/// Bounded negative-lookup map: id → absolute expiry tick.
///
/// An entry means upstream authoritatively reported the id absent; a
/// fresh entry short-circuits the fetch path. The map is capped at
/// `max_entries`: when breached, a prune pass samples up to 5000
/// entries, sorts them by expiry and drops the oldest `prune_batch`.
#[derive(Clone)]
pub struct NegativeTier {
    map: Arc<HashMap<String, Instant>>,
    ttl: Duration,
    max_entries: usize,
    prune_batch: usize,
}

impl NegativeTier {
    pub fn new(ttl: Duration, max_entries: usize, prune_batch: usize) -> Self {
        NegativeTier {
            map: Arc::default(),
            ttl,
            max_entries,
            prune_batch,
        }
    }

    /// Insert or refresh, then prune opportunistically if over cap.
    pub fn insert(&self, id: &str) {
        let expires_at = Instant::now() + self.ttl;
        let refreshed = self
            .map
            .update(id, |_, slot| *slot = expires_at)
            .is_some();
        if !refreshed {
            let _ = self.map.insert(id.to_owned(), expires_at);
        }
        if self.map.len() > self.max_entries {
            self.prune();
        }
    }

    /// True while an unexpired entry exists. An expired entry found
    /// here is removed on the way out.
    pub fn fresh(&self, id: &str) -> bool {
        let now = Instant::now();
        match self.map.read(id, |_, expires_at| *expires_at > now) {
            Some(true) => true,
            Some(false) => {
                self.map.remove(id);
                false
            }
            None => false,
        }
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

    pub fn over_capacity(&self) -> bool {
        self.map.len() > self.max_entries
    }

    /// Drop every expired entry.
    pub fn sweep_expired(&self) {
        let now = Instant::now();
        let mut expired = Vec::new();
        self.map.scan(|key, expires_at| {
            if *expires_at <= now {
                expired.push(key.clone());
            }
        });
        for key in expired {
            self.map.remove(&key);
        }
    }

    /// Remove up to `prune_batch` of the oldest sampled entries.
    pub fn prune(&self) {
        let mut sampled: Vec<(String, Instant)> = Vec::with_capacity(PRUNE_SAMPLE_CAP);
        self.map.scan(|key, expires_at| {
            if sampled.len() < PRUNE_SAMPLE_CAP {
                sampled.push((key.clone(), *expires_at));
            }
        });

        sampled.sort_by_key(|(_, expires_at)| *expires_at);
        for (key, _) in sampled.into_iter().take(self.prune_batch) {
            self.map.remove(&key);
        }
    }
}
