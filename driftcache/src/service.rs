//! Seams to the external collaborators: the upstream asset service,
//! attached scenes, and the default-assets loader.

use crate::asset::Asset;
use std::collections::HashMap;
use uuid::Uuid;

/// The upstream, authoritative asset store.
///
/// `Ok(None)` means authoritatively absent and is recorded as a
/// negative; `Err` is treated as transient and never recorded.
pub trait AssetService: Send + Sync {
    fn fetch(&self, id: &str) -> anyhow::Result<Option<Asset>>;

    /// Marker used to detect a service wired back to a layered cache;
    /// such a self-loop short-circuits to miss instead of recursing.
    fn is_layered_cache(&self) -> bool {
        false
    }
}

/// Why a scene references an asset. The hint travels with gathered
/// uuids so maintenance passes know what they are repopulating.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum RefKind {
    Terrain,
    Environment,
    Parcel,
    Object,
    Bake,
}

/// A live scene the cache spares during cleanup and walks during
/// deep-touch.
pub trait SceneRefs: Send + Sync {
    fn region_id(&self) -> Uuid;

    /// Every uuid the scene currently references: terrain textures
    /// (legacy, PBR and the composite), the region and parcel
    /// environments, recursively gathered object groups, and avatar
    /// bake textures.
    fn referenced_assets(&self) -> HashMap<Uuid, RefKind>;
}

/// Optional plugin enumerating built-in assets by set name.
pub trait DefaultAssets: Send + Sync {
    fn assets(&self, set: &str) -> Vec<Asset>;
}

/// Sticky allowlist of built-in asset ids. Cleanup spares these until
/// the operator deletes the default set again.
#[derive(Clone, Default)]
pub struct AllowList(std::sync::Arc<scc::HashMap<String, ()>>);

impl AllowList {
    pub fn add(&self, id: &str) {
        let _ = self.0.insert(id.to_owned(), ());
    }

    pub fn contains(&self, id: &str) -> bool {
        self.0.contains(id)
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids = Vec::with_capacity(self.0.len());
        self.0.scan(|id, _| ids.push(id.clone()));
        ids
    }

    pub fn clear(&self) {
        for id in self.ids() {
            self.0.remove(&id);
        }
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.len() == 0
    }
}

#[cfg(any(test, feature = "test"))]
pub mod test {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Serves a fixed set of assets and counts fetches.
    #[derive(Default)]
    pub struct StaticService {
        assets: Mutex<HashMap<String, Asset>>,
        calls: AtomicUsize,
        delay: Option<Duration>,
    }

    impl StaticService {
        pub fn new() -> Self {
            StaticService::default()
        }

        pub fn slow(delay: Duration) -> Self {
            StaticService {
                delay: Some(delay),
                ..StaticService::default()
            }
        }

        pub fn put(&self, asset: Asset) {
            self.assets.lock().insert(asset.id.clone(), asset);
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl AssetService for StaticService {
        fn fetch(&self, id: &str) -> anyhow::Result<Option<Asset>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                std::thread::sleep(delay);
            }
            Ok(self.assets.lock().get(id).cloned())
        }
    }

    /// Always errors; used to exercise the no-negative-on-error path.
    #[derive(Default)]
    pub struct FailingService {
        pub calls: AtomicUsize,
    }

    impl AssetService for FailingService {
        fn fetch(&self, _id: &str) -> anyhow::Result<Option<Asset>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            anyhow::bail!("upstream unavailable")
        }
    }

    /// A scene with a fixed set of referenced uuids.
    pub struct StaticScene {
        pub region: Uuid,
        pub refs: HashMap<Uuid, RefKind>,
    }

    impl StaticScene {
        pub fn new(refs: impl IntoIterator<Item = (Uuid, RefKind)>) -> Self {
            StaticScene {
                region: Uuid::new_v4(),
                refs: refs.into_iter().collect(),
            }
        }
    }

    impl SceneRefs for StaticScene {
        fn region_id(&self) -> Uuid {
            self.region
        }

        fn referenced_assets(&self) -> HashMap<Uuid, RefKind> {
            self.refs.clone()
        }
    }

    /// Fixed built-in asset set.
    pub struct StaticDefaults(pub Vec<Asset>);

    impl DefaultAssets for StaticDefaults {
        fn assets(&self, _set: &str) -> Vec<Asset> {
            self.0.clone()
        }
    }
}
