//! The layered cache core: weak map → expiring memory map → sharded
//! file store → negative map, with the upstream service behind a
//! single-flight coordinator.
//!
//! One instance owns every structure; there is no global state.
//! Public operations never fail outward: every internal error maps to
//! a miss or a `false` result, and the log is the only channel for
//! transient trouble.

use crate::asset::{valid_id, Asset, AssetMetadata};
use crate::codec::{self, Limits};
use crate::config::Config;
use crate::error::CacheError;
use crate::flight::{Backoff, FetchOutcome, Flight};
use crate::pipeline::{InProgress, TouchDebounce, WritePool};
use crate::service::{AllowList, AssetService, DefaultAssets, SceneRefs};
use crate::shard::{self, ShardLayout};
use crate::stats::{CacheStats, StatsSnapshot};
use crate::sweep::{self, SweepContext, Sweeper};
use crate::tiers::{MemoryTier, NegativeTier, WeakTier};
use parking_lot::{Mutex, RwLock};
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// How long a reader waits for a write reservation to clear before
/// treating the file as absent.
const RESERVED_READ_PAUSE: Duration = Duration::from_millis(8);

#[derive(Clone)]
pub struct AssetCache {
    config: Arc<Config>,
    layout: Arc<ShardLayout>,
    weak: WeakTier,
    memory: MemoryTier,
    negative: NegativeTier,
    in_progress: InProgress,
    touch: Arc<TouchDebounce>,
    flight: Flight,
    stats: Arc<CacheStats>,
    upstream: Arc<RwLock<Option<Arc<dyn AssetService>>>>,
    scenes: Arc<RwLock<Vec<Arc<dyn SceneRefs>>>>,
    defaults: Arc<RwLock<Option<Arc<dyn DefaultAssets>>>>,
    allow: AllowList,
    pool: Arc<Mutex<Option<WritePool>>>,
    sweeper: Arc<Mutex<Option<Sweeper>>>,
    sweep_gate: Arc<AtomicBool>,
    cancel: Arc<AtomicBool>,
}

impl AssetCache {
    pub fn new(config: Config) -> Self {
        let config = config.clamped();
        let layout = ShardLayout::new(config.resolved_root(), config.tiers, config.tier_len);
        if config.file_cache_enabled {
            if let Err(err) = fs::create_dir_all(layout.root()) {
                warn!(root = %layout.root().display(), error = %err, "cannot create cache root");
            }
        }

        AssetCache {
            memory: MemoryTier::new(config.memory_ttl()),
            negative: NegativeTier::new(
                config.negative_ttl(),
                config.negative_max_entries,
                config.negative_prune_batch,
            ),
            layout: Arc::new(layout),
            config: Arc::new(config),
            weak: WeakTier::default(),
            in_progress: InProgress::default(),
            touch: Arc::new(TouchDebounce::new()),
            flight: Flight::default(),
            stats: Arc::default(),
            upstream: Arc::default(),
            scenes: Arc::default(),
            defaults: Arc::default(),
            allow: AllowList::default(),
            pool: Arc::default(),
            sweeper: Arc::default(),
            sweep_gate: Arc::default(),
            cancel: Arc::default(),
        }
    }

    // ---- wiring ---------------------------------------------------

    pub fn set_upstream(&self, service: Arc<dyn AssetService>) {
        *self.upstream.write() = Some(service);
    }

    pub fn set_default_assets(&self, loader: Arc<dyn DefaultAssets>) {
        *self.defaults.write() = Some(loader);
    }

    /// Register a scene; idempotent per region. The first scene brings
    /// the writer pool and the cleanup timer up.
    pub fn attach_scene(&self, scene: Arc<dyn SceneRefs>) {
        let first = {
            let mut scenes = self.scenes.write();
            if scenes.iter().any(|s| s.region_id() == scene.region_id()) {
                return;
            }
            scenes.push(scene);
            scenes.len() == 1
        };
        if first {
            self.start();
        }
    }

    /// Deregister a region; the last scene out stops the workers.
    pub fn detach_scene(&self, region: Uuid) {
        let empty = {
            let mut scenes = self.scenes.write();
            scenes.retain(|s| s.region_id() != region);
            scenes.is_empty()
        };
        if empty {
            self.stop();
        }
    }

    /// Spawn the writer pool and cleanup timer. Idempotent.
    pub fn start(&self) {
        self.cancel.store(false, Ordering::Relaxed);

        if self.config.file_cache_enabled {
            let mut pool = self.pool.lock();
            if pool.is_none() {
                *pool = Some(WritePool::spawn(
                    self.config.writer_workers,
                    self.in_progress.clone(),
                    self.touch.clone(),
                    self.config.update_file_time_on_cache_hit,
                ));
            }
        }

        if let Some(period) = self.config.cleanup_period() {
            let mut sweeper = self.sweeper.lock();
            if sweeper.is_none() {
                *sweeper = Some(Sweeper::spawn(self.clone(), period));
            }
        }

        info!(root = %self.layout.root().display(), "asset cache started");
    }

    /// Stop the cleanup timer and drain the writer pool.
    pub fn stop(&self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(sweeper) = self.sweeper.lock().take() {
            sweeper.stop();
        }
        if let Some(pool) = self.pool.lock().take() {
            pool.shutdown();
        }
        info!("asset cache stopped");
    }

    // ---- lookups --------------------------------------------------

    /// Resolve `id` through every tier, going upstream on a full miss.
    pub fn get(&self, id: &str) -> Option<Arc<Asset>> {
        let requests = self.stats.record_request();
        if requests % self.config.hit_rate_display == 0 {
            let snap = self.stats.snapshot(self.flight.joins());
            debug!(
                requests = snap.requests,
                hits = snap.total_hits(),
                rate = format_args!("{:.1}%", snap.hit_rate()),
                "cache hit rate"
            );
        }

        if !valid_id(id) {
            return None;
        }

        if let Some(asset) = self.weak.get(id) {
            self.stats.record_weak_hit();
            self.promote_weak_hit(&asset);
            return Some(asset);
        }

        if self.config.memory_cache_enabled {
            if let Some(asset) = self.memory.get(id) {
                self.stats.record_memory_hit();
                self.negative.remove(id);
                self.weak.insert(&asset);
                return Some(asset);
            }
        }

        match self.read_file(id) {
            Ok(asset) => {
                self.stats.record_file_hit();
                self.negative.remove(id);
                self.weak.insert(&asset);
                if self.config.memory_cache_enabled {
                    self.memory.insert(&asset);
                }
                return Some(asset);
            }
            Err(CacheError::NotFound) => {}
            Err(_) => {} // logged where it happened
        }

        if self.config.negative_cache_enabled && self.negative.fresh(id) {
            return None;
        }

        self.fetch_upstream(id)
    }

    /// Like [`get`](Self::get), but never touches the file tier or
    /// upstream.
    pub fn get_from_memory(&self, id: &str) -> Option<Arc<Asset>> {
        self.stats.record_request();
        if !valid_id(id) {
            return None;
        }

        if let Some(asset) = self.weak.get(id) {
            self.stats.record_weak_hit();
            self.promote_weak_hit(&asset);
            return Some(asset);
        }
        if self.config.memory_cache_enabled {
            if let Some(asset) = self.memory.get(id) {
                self.stats.record_memory_hit();
                self.negative.remove(id);
                self.weak.insert(&asset);
                return Some(asset);
            }
        }
        None
    }

    /// Presence probe. Does not promote and does not count as a hit.
    pub fn check(&self, id: &str) -> bool {
        if !valid_id(id) {
            return false;
        }
        if self.weak.contains_live(id) {
            return true;
        }
        if self.config.memory_cache_enabled && self.memory.contains_fresh(id) {
            return true;
        }
        if self.config.file_cache_enabled {
            if let Some(path) = self.layout.path_of(id) {
                return path.is_file();
            }
        }
        false
    }

    /// Metadata sugar over [`get`](Self::get).
    pub fn metadata(&self, id: &str) -> Option<AssetMetadata> {
        self.get(id).map(|asset| asset.metadata())
    }

    /// Payload sugar over [`get`](Self::get).
    pub fn data(&self, id: &str) -> Option<Vec<u8>> {
        self.get(id).map(|asset| asset.data.clone())
    }

    // ---- inserts --------------------------------------------------

    /// Insert into every enabled tier and clear any negative entry.
    pub fn cache(&self, asset: Asset, replace: bool) {
        if !valid_id(&asset.id) {
            return;
        }
        let asset = Arc::new(asset);
        self.insert_tiers(&asset, replace);
    }

    /// Record that upstream authoritatively lacks `id`.
    pub fn cache_negative(&self, id: &str) {
        if !self.config.negative_cache_enabled || !valid_id(id) {
            return;
        }
        self.negative.insert(id);
    }

    /// Assign a fresh uuid (and an id derived from it) where missing,
    /// then cache. Returns the id the asset is stored under.
    pub fn store(&self, mut asset: Asset) -> String {
        if asset.uuid.is_nil() {
            asset.uuid = Uuid::new_v4();
        }
        if asset.id.trim().is_empty() {
            asset.id = asset.uuid.to_string();
        }
        let id = asset.id.clone();
        self.cache(asset, false);
        id
    }

    /// Replace the payload of a cached asset. False when `id` cannot
    /// be resolved.
    pub fn update_content(&self, id: &str, data: Vec<u8>) -> bool {
        match self.get(id) {
            Some(existing) => {
                let mut updated = (*existing).clone();
                updated.data = data;
                self.cache(updated, true);
                true
            }
            None => false,
        }
    }

    // ---- eviction -------------------------------------------------

    /// Drop `id` from every tier, best-effort for the file.
    pub fn expire(&self, id: &str) {
        if !valid_id(id) {
            return;
        }
        self.weak.remove(id);
        self.memory.remove(id);
        self.negative.remove(id);
        if self.config.file_cache_enabled {
            if let Some(path) = self.layout.path_of(id) {
                let _ = fs::remove_file(&path);
            }
        }
    }

    /// Wipe everything: shard directories, memory, weak and negative
    /// maps.
    pub fn clear(&self) {
        self.clear_file();
        self.clear_memory();
        self.weak.clear();
        self.negative.clear();
    }

    /// Drop every shard directory. Stamp files at the root survive.
    pub fn clear_file(&self) {
        if !self.config.file_cache_enabled {
            return;
        }
        let Ok(entries) = fs::read_dir(self.layout.root()) else {
            return;
        };
        for entry in entries.flatten() {
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                if let Err(err) = fs::remove_dir_all(entry.path()) {
                    warn!(dir = %entry.path().display(), error = %err, "clear could not drop shard");
                }
            }
        }
    }

    pub fn clear_memory(&self) {
        self.memory.clear();
    }

    pub fn clear_negatives(&self) {
        self.negative.clear();
    }

    // ---- maintenance ----------------------------------------------

    /// Run one cleanup pass with an explicit purge line; gated to one
    /// run at a time.
    pub fn run_cleanup(&self, purge_line: SystemTime) {
        if self
            .sweep_gate
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("cleanup already running");
            return;
        }

        let scenes = self.scenes.read().clone();
        let ctx = SweepContext {
            layout: &self.layout,
            weak: &self.weak,
            negative: &self.negative,
            scenes: &scenes,
            allow: &self.allow,
            cancel: &self.cancel,
            negative_enabled: self.config.negative_cache_enabled,
            bak_enabled: self.config.bak_cleanup_enabled,
            bak_max_age: self.config.bak_max_age(),
            warn_at: self.config.cache_warn_at,
        };
        sweep::run(&ctx, purge_line);

        self.sweep_gate.store(false, Ordering::Release);
    }

    pub(crate) fn run_cleanup_now(&self) {
        let purge_line = SystemTime::now()
            .checked_sub(self.config.file_ttl())
            .unwrap_or(SystemTime::UNIX_EPOCH);
        self.run_cleanup(purge_line);
    }

    /// Refresh the on-disk footprint of everything the scenes
    /// reference: touch files that exist, refetch the ones that are
    /// missing, and stamp each region.
    pub fn deep_touch(&self) -> DeepTouchReport {
        let scenes = self.scenes.read().clone();
        let referenced = sweep::gather(&scenes);
        let upstream = self.upstream.read().clone();
        let mut report = DeepTouchReport::default();

        for uuid in referenced.keys() {
            let id = uuid.to_string();
            if let Some(path) = self.layout.path_of(&id) {
                if path.is_file() {
                    self.touch.touch(&path);
                    report.touched += 1;
                    continue;
                }
            }
            // straight to upstream: maintenance traffic must not join
            // user requests on the in-flight tokens
            match upstream.as_deref().map(|u| u.fetch(&id)) {
                Some(Ok(Some(asset))) => {
                    self.cache(asset, false);
                    report.fetched += 1;
                }
                Some(Ok(None)) | None => report.missing += 1,
                Some(Err(err)) => {
                    warn!(id = %id, error = %err, "deep-touch refetch failed");
                    report.missing += 1;
                }
            }
        }

        for scene in &scenes {
            self.write_stamp(scene.region_id());
        }
        report
    }

    /// Pull the plugin's built-in set into the cache; the ids become
    /// sticky and cleanup spares them.
    pub fn cache_default_assets(&self, set: &str) -> usize {
        let Some(loader) = self.defaults.read().clone() else {
            return 0;
        };
        let assets = loader.assets(set);
        let count = assets.len();
        for asset in assets {
            self.allow.add(&asset.id);
            self.cache(asset, false);
        }
        info!(set, count, "cached default assets");
        count
    }

    /// Expire every sticky default asset and drop the allowlist.
    pub fn delete_default_assets(&self) -> usize {
        let ids = self.allow.ids();
        let count = ids.len();
        for id in &ids {
            self.expire(id);
        }
        self.allow.clear();
        count
    }

    /// Remove every `.bak` sibling immediately.
    pub fn clean_baks(&self) -> usize {
        sweep::remove_baks(self.layout.root())
    }

    // ---- reporting ------------------------------------------------

    pub fn status(&self) -> StatusReport {
        let (weak_sampled, weak_live) = self
            .weak
            .sample_live(self.config.hit_report_weak_sample_target);
        StatusReport {
            stats: self.stats.snapshot(self.flight.joins()),
            weak_entries: self.weak.len(),
            weak_sampled,
            weak_live,
            memory_entries: self.memory.len(),
            negative_entries: self.negative.len(),
            pending_writes: self.in_progress.len(),
            region_scans: self.region_stamps(),
        }
    }

    /// Write jobs queued or running.
    pub fn pending_writes(&self) -> usize {
        self.in_progress.len()
    }

    // ---- internals ------------------------------------------------

    fn promote_weak_hit(&self, asset: &Arc<Asset>) {
        self.negative.remove(&asset.id);
        if self.config.memory_cache_enabled {
            self.memory.insert(asset);
        }
        if self.config.file_cache_enabled && self.config.update_file_time_on_cache_hit {
            if let Some(path) = self.layout.path_of(&asset.id) {
                self.touch.touch(&path);
            }
        }
    }

    fn insert_tiers(&self, asset: &Arc<Asset>, replace: bool) {
        // the negative goes first so it is never live alongside the
        // memory entry
        self.negative.remove(&asset.id);
        self.weak.insert(asset);
        if self.config.memory_cache_enabled {
            self.memory.insert(asset);
        }
        if self.config.file_cache_enabled {
            if let Some(path) = self.layout.path_of(&asset.id) {
                match self.pool.lock().as_ref() {
                    Some(pool) => {
                        if !pool.submit(path, asset.clone(), replace) {
                            debug!(id = %asset.id, "write already pending, dropping submission");
                        }
                    }
                    None => {
                        debug!(id = %asset.id, "writer pool not running, skipping file write")
                    }
                }
            }
        }
    }

    fn read_file(&self, id: &str) -> Result<Arc<Asset>, CacheError> {
        if !self.config.file_cache_enabled {
            return Err(CacheError::NotFound);
        }
        let path = self.layout.path_of(id).ok_or(CacheError::NotFound)?;

        if self.in_progress.contains(&path) {
            // give the writer a moment instead of going upstream for
            // an asset that is landing right now
            thread::sleep(RESERVED_READ_PAUSE);
            if self.in_progress.contains(&path) {
                return Err(CacheError::NotFound);
            }
        }

        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(CacheError::NotFound)
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cache file unreadable");
                return Err(err.into());
            }
        };
        if bytes.is_empty() {
            return Err(CacheError::NotFound);
        }

        match codec::decode(&bytes, self.limits()) {
            Ok(asset) => Ok(Arc::new(asset)),
            Err(err) => {
                warn!(path = %path.display(), error = %err, "corrupt cache file, removing");
                let _ = fs::remove_file(&path);
                Err(err.into())
            }
        }
    }

    fn fetch_upstream(&self, id: &str) -> Option<Arc<Asset>> {
        let upstream = self.upstream.read().clone()?;
        let backoff = Backoff {
            attempts: self.config.backoff_attempts,
            initial: self.config.backoff_initial(),
            max: self.config.backoff_max(),
        };
        match self.flight.fetch(id, &upstream, &backoff) {
            FetchOutcome::Hit(asset) => {
                self.insert_tiers(&asset, false);
                Some(asset)
            }
            FetchOutcome::Absent => {
                if self.config.negative_cache_enabled {
                    self.negative.insert(id);
                }
                None
            }
            FetchOutcome::Failed => None,
        }
    }

    fn limits(&self) -> Limits {
        Limits {
            max_string_bytes: self.config.deserialize_max_string_bytes,
            max_data_bytes: self.config.max_data_bytes(),
        }
    }

    fn write_stamp(&self, region: Uuid) {
        let path = self.layout.stamp_path(region);
        let line = format!("{}\n", chrono::Utc::now().to_rfc3339());
        if let Err(err) = fs::write(&path, line) {
            warn!(region = %region, error = %err, "could not write region stamp");
        }
    }

    fn region_stamps(&self) -> Vec<(Uuid, SystemTime)> {
        let Ok(entries) = fs::read_dir(self.layout.root()) else {
            return Vec::new();
        };
        let mut stamps = Vec::new();
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if let Some(region) = shard::stamp_region(name) {
                if let Ok(modified) = entry.metadata().and_then(|m| m.modified()) {
                    stamps.push((region, modified));
                }
            }
        }
        stamps
    }

    #[cfg(test)]
    pub(crate) fn file_path(&self, id: &str) -> Option<std::path::PathBuf> {
        self.layout.path_of(id)
    }
}

impl AssetService for AssetCache {
    /// The cache can stand in as the scene-facing asset service.
    fn fetch(&self, id: &str) -> anyhow::Result<Option<Asset>> {
        Ok(self.get(id).map(|asset| (*asset).clone()))
    }

    fn is_layered_cache(&self) -> bool {
        true
    }
}

/// Result of a deep-touch pass.
#[derive(Clone, Copy, Debug, Default)]
pub struct DeepTouchReport {
    /// Files present whose access time was refreshed.
    pub touched: usize,
    /// Missing files repopulated from upstream.
    pub fetched: usize,
    /// Referenced ids upstream could not supply.
    pub missing: usize,
}

/// Everything the `status` command reports.
#[derive(Clone, Debug)]
pub struct StatusReport {
    pub stats: StatsSnapshot,
    pub weak_entries: usize,
    pub weak_sampled: usize,
    pub weak_live: usize,
    pub memory_entries: usize,
    pub negative_entries: usize,
    pub pending_writes: usize,
    pub region_scans: Vec<(Uuid, SystemTime)>,
}

#[allow(unused)]
fn _assert_send_sync(cache: AssetCache) -> impl Send + Sync {
    cache
}
