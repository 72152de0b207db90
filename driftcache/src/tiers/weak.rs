use crate::asset::Asset;
use scc::HashMap;
use std::sync::{Arc, Weak};

/// Weak-reference tier: id → weak handle to a live asset.
///
/// Entries never keep an asset alive; retention is bounded by whoever
/// else holds the `Arc`. A dead handle found during lookup is dropped
/// on the spot, the rest wait for the cleanup sweep's reset.
///
/// Calling [`clone()`](WeakTier::clone) creates a reference to the same
/// instance.
#[derive(Clone, Default)]
pub struct WeakTier(Arc<HashMap<String, Weak<Asset>>>);

impl WeakTier {
    pub fn get(&self, id: &str) -> Option<Arc<Asset>> {
        match self.0.read(id, |_, handle| handle.upgrade()) {
            Some(Some(asset)) => Some(asset),
            Some(None) => {
                self.0.remove(id);
                None
            }
            None => None,
        }
    }

    /// Insert or refresh the handle for the asset's id.
    pub fn insert(&self, asset: &Arc<Asset>) {
        let handle = Arc::downgrade(asset);
        if self
            .0
            .update(asset.id.as_str(), |_, slot| *slot = handle.clone())
            .is_none()
        {
            let _ = self.0.insert(asset.id.clone(), handle);
        }
    }

    /// True only while the target is still alive.
    pub fn contains_live(&self, id: &str) -> bool {
        self.0
            .read(id, |_, handle| handle.strong_count() > 0)
            .unwrap_or(false)
    }

    pub fn remove(&self, id: &str) {
        self.0.remove(id);
    }

    /// Reset to empty. Entries inserted concurrently may survive, which
    /// is fine: the map short-circuits live lookups, it is not state.
    pub fn clear(&self) {
        let mut keys = Vec::with_capacity(self.0.len());
        self.0.scan(|key, _| keys.push(key.clone()));
        for key in keys {
            self.0.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.len() == 0
    }

    /// Walk at most `target` entries and count how many are alive.
    /// Returns `(sampled, live)`.
    pub fn sample_live(&self, target: usize) -> (usize, usize) {
        let mut sampled = 0usize;
        let mut live = 0usize;
        self.0.scan(|_, handle| {
            if sampled < target {
                sampled += 1;
                if handle.strong_count() > 0 {
                    live += 1;
                }
            }
        });
        (sampled, live)
    }
}
