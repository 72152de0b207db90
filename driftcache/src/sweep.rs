//! Periodic cleanup: prunes expired files and negatives while sparing
//! everything the attached scenes still reference.
//!
//! A run is gated to one at a time and cooperatively cancellable; the
//! walk yields every few filesystem operations to cap sustained I/O
//! pressure. Many filesystems ignore atime, so the purge check falls
//! back to mtime on a best effort basis.

use crate::cache::AssetCache;
use crate::service::{AllowList, RefKind, SceneRefs};
use crate::shard::{ShardLayout, BAK_EXT};
use crate::tiers::{NegativeTier, WeakTier};
use flume as mpsc;
use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, SystemTime};
use tracing::{debug, warn};
use uuid::Uuid;

const THROTTLE_EVERY: usize = 16;
const THROTTLE_PAUSE: Duration = Duration::from_millis(80);

pub(crate) struct SweepContext<'a> {
    pub layout: &'a ShardLayout,
    pub weak: &'a WeakTier,
    pub negative: &'a NegativeTier,
    pub scenes: &'a [Arc<dyn SceneRefs>],
    pub allow: &'a AllowList,
    pub cancel: &'a AtomicBool,
    pub negative_enabled: bool,
    pub bak_enabled: bool,
    pub bak_max_age: Duration,
    pub warn_at: usize,
}

/// Merge every scene's referenced uuids into one hint map.
pub(crate) fn gather(scenes: &[Arc<dyn SceneRefs>]) -> HashMap<Uuid, RefKind> {
    let mut all = HashMap::new();
    for scene in scenes {
        for (uuid, kind) in scene.referenced_assets() {
            all.entry(uuid).or_insert(kind);
        }
    }
    all
}

/// One full sweep. Files whose last access precedes `purge_line` go,
/// unless a scene references them or they are allowlisted.
pub(crate) fn run(ctx: &SweepContext<'_>, purge_line: SystemTime) {
    if ctx.negative_enabled {
        ctx.negative.sweep_expired();
        if ctx.negative.over_capacity() {
            ctx.negative.prune();
        }
    }

    let referenced = gather(ctx.scenes);
    debug!(referenced = referenced.len(), "cleanup sweep starting");

    let entries = match fs::read_dir(ctx.layout.root()) {
        Ok(entries) => entries,
        Err(err) => {
            debug!(error = %err, "cache root not readable, skipping sweep");
            return;
        }
    };

    let mut ops = 0usize;
    for entry in entries.flatten() {
        if cancelled(ctx) {
            debug!("cleanup cancelled");
            return;
        }
        let path = entry.path();
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
            clean_dir(ctx, &path, purge_line, &referenced, &mut ops);
            let _ = fs::remove_dir(&path);
        }
    }

    ctx.weak.clear();
    debug!("cleanup sweep finished");
}

fn clean_dir(
    ctx: &SweepContext<'_>,
    dir: &Path,
    purge_line: SystemTime,
    referenced: &HashMap<Uuid, RefKind>,
    ops: &mut usize,
) {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) => {
            warn!(dir = %dir.display(), error = %err, "cleanup cannot read directory");
            return;
        }
    };

    let mut seen = 0usize;
    for entry in entries.flatten() {
        if cancelled(ctx) {
            return;
        }
        throttle(ops);
        seen += 1;

        let path = entry.path();
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        if is_dir {
            clean_dir(ctx, &path, purge_line, referenced, ops);
            if fs::remove_dir(&path).is_ok() {
                *ops += 1;
            }
        } else if let Err(err) = clean_file(ctx, &path, purge_line, referenced, ops) {
            warn!(path = %path.display(), error = %err, "cleanup skipping file");
        }
    }

    if seen > ctx.warn_at {
        warn!(
            dir = %dir.display(),
            entries = seen,
            "cache directory is very large, consider deeper sharding"
        );
    }
}

fn clean_file(
    ctx: &SweepContext<'_>,
    path: &Path,
    purge_line: SystemTime,
    referenced: &HashMap<Uuid, RefKind>,
    ops: &mut usize,
) -> std::io::Result<()> {
    let name = match path.file_name().and_then(|n| n.to_str()) {
        Some(name) => name,
        None => return Ok(()),
    };

    // backups age out on their own schedule
    if path.extension().and_then(|e| e.to_str()) == Some(BAK_EXT) {
        if ctx.bak_enabled {
            let modified = fs::metadata(path)?.modified()?;
            if let Some(limit) = SystemTime::now().checked_sub(ctx.bak_max_age) {
                if modified < limit {
                    fs::remove_file(path)?;
                    *ops += 1;
                }
            }
        }
        return Ok(());
    }

    if ctx.allow.contains(name) {
        return Ok(());
    }
    if let Ok(uuid) = Uuid::parse_str(name) {
        if referenced.contains_key(&uuid) {
            return Ok(());
        }
    }

    let meta = fs::metadata(path)?;
    let last_access = meta.accessed().or_else(|_| meta.modified())?;
    if last_access < purge_line {
        fs::remove_file(path)?;
        ctx.weak.remove(name);
        *ops += 1;
    }
    Ok(())
}

/// Remove every `.bak` sibling under the root, regardless of age.
/// Backs the explicit `cleanbak` operator command.
pub(crate) fn remove_baks(root: &Path) -> usize {
    fn walk(dir: &Path, removed: &mut usize) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if entry.file_type().map(|t| t.is_dir()).unwrap_or(false) {
                walk(&path, removed);
            } else if path.extension().and_then(|e| e.to_str()) == Some(BAK_EXT)
                && fs::remove_file(&path).is_ok()
            {
                *removed += 1;
            }
        }
    }

    let mut removed = 0;
    walk(root, &mut removed);
    removed
}

fn throttle(ops: &mut usize) {
    *ops += 1;
    if *ops % THROTTLE_EVERY == 0 {
        thread::sleep(THROTTLE_PAUSE);
    }
}

#[inline]
fn cancelled(ctx: &SweepContext<'_>) -> bool {
    ctx.cancel.load(Ordering::Relaxed)
}

/// The periodic timer thread. Dropping the channel on `stop` wakes the
/// thread out of its wait and ends it.
pub(crate) struct Sweeper {
    shutdown: mpsc::Sender<()>,
    worker: thread::JoinHandle<()>,
}

impl Sweeper {
    pub fn spawn(cache: AssetCache, period: Duration) -> Self {
        let (shutdown, signal) = mpsc::bounded(1);
        let worker = thread::Builder::new()
            .name("driftcache-sweeper".into())
            .spawn(move || loop {
                match signal.recv_timeout(period) {
                    Err(mpsc::RecvTimeoutError::Timeout) => cache.run_cleanup_now(),
                    _ => break,
                }
            })
            .expect("failed to spawn cleanup timer");
        Sweeper { shutdown, worker }
    }

    pub fn stop(self) {
        drop(self.shutdown);
        let _ = self.worker.join();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::service::test::StaticScene;

    fn age_file(path: &Path, age: Duration) {
        let old = SystemTime::now() - age;
        let file = fs::OpenOptions::new().write(true).open(path).unwrap();
        file.set_times(fs::FileTimes::new().set_accessed(old).set_modified(old))
            .unwrap();
    }

    fn write_aged(path: &Path, age: Duration) {
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, b"record").unwrap();
        age_file(path, age);
    }

    #[test]
    fn gather_merges_scene_maps() {
        let u1 = Uuid::new_v4();
        let u2 = Uuid::new_v4();
        let scenes: Vec<Arc<dyn SceneRefs>> = vec![
            Arc::new(StaticScene::new([(u1, RefKind::Terrain)])),
            Arc::new(StaticScene::new([
                (u1, RefKind::Object),
                (u2, RefKind::Bake),
            ])),
        ];

        let refs = gather(&scenes);
        assert_eq!(refs.len(), 2);
        assert!(refs.contains_key(&u1));
        assert_eq!(refs[&u2], RefKind::Bake);
    }

    #[test]
    fn sweep_spares_referenced_files_and_prunes_the_rest() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ShardLayout::new(dir.path(), 1, 3);

        // distinct leading characters keep the two in separate shards
        let spared = Uuid::from_u128(0x1111_1111_2222_3333_4444_5555_6666_7777);
        let doomed = Uuid::from_u128(0x9999_9999_2222_3333_4444_5555_6666_7777);
        let spared_path = layout.path_of(&spared.to_string()).unwrap();
        let doomed_path = layout.path_of(&doomed.to_string()).unwrap();
        let age = Duration::from_secs(72 * 3600);
        write_aged(&spared_path, age);
        write_aged(&doomed_path, age);

        let weak = WeakTier::default();
        let negative = NegativeTier::new(Duration::from_secs(60), 1_000, 100);
        let scenes: Vec<Arc<dyn SceneRefs>> =
            vec![Arc::new(StaticScene::new([(spared, RefKind::Object)]))];
        let allow = AllowList::default();
        let cancel = AtomicBool::new(false);

        let ctx = SweepContext {
            layout: &layout,
            weak: &weak,
            negative: &negative,
            scenes: &scenes,
            allow: &allow,
            cancel: &cancel,
            negative_enabled: true,
            bak_enabled: false,
            bak_max_age: Duration::from_secs(3600),
            warn_at: 30_000,
        };
        run(&ctx, SystemTime::now() - Duration::from_secs(48 * 3600));

        assert!(spared_path.is_file());
        assert!(!doomed_path.exists());
        // the doomed file's shard directory emptied out and was removed
        assert!(!doomed_path.parent().unwrap().exists());
    }

    #[test]
    fn allowlisted_files_survive_any_purge_line() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ShardLayout::new(dir.path(), 1, 3);
        let path = layout.path_of("builtin-grass").unwrap();
        write_aged(&path, Duration::from_secs(1_000_000));

        let weak = WeakTier::default();
        let negative = NegativeTier::new(Duration::from_secs(60), 1_000, 100);
        let allow = AllowList::default();
        allow.add("builtin-grass");
        let cancel = AtomicBool::new(false);

        let ctx = SweepContext {
            layout: &layout,
            weak: &weak,
            negative: &negative,
            scenes: &[],
            allow: &allow,
            cancel: &cancel,
            negative_enabled: false,
            bak_enabled: false,
            bak_max_age: Duration::from_secs(3600),
            warn_at: 30_000,
        };
        run(&ctx, SystemTime::now() + Duration::from_secs(1));

        assert!(path.is_file());
    }

    #[test]
    fn aged_bak_files_go_fresh_ones_stay() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ShardLayout::new(dir.path(), 1, 3);

        let keeper = layout.path_of("keeper").unwrap();
        write_aged(&keeper, Duration::ZERO);
        let old_bak = crate::pipeline::bak_sibling(&keeper);
        fs::write(&old_bak, b"old").unwrap();
        age_file(&old_bak, Duration::from_secs(48 * 3600));

        let fresh = layout.path_of("fresh").unwrap();
        write_aged(&fresh, Duration::ZERO);
        let fresh_bak = crate::pipeline::bak_sibling(&fresh);
        fs::write(&fresh_bak, b"new").unwrap();

        let weak = WeakTier::default();
        let negative = NegativeTier::new(Duration::from_secs(60), 1_000, 100);
        let allow = AllowList::default();
        let cancel = AtomicBool::new(false);

        let ctx = SweepContext {
            layout: &layout,
            weak: &weak,
            negative: &negative,
            scenes: &[],
            allow: &allow,
            cancel: &cancel,
            negative_enabled: false,
            bak_enabled: true,
            bak_max_age: Duration::from_secs(24 * 3600),
            warn_at: 30_000,
        };
        run(&ctx, SystemTime::now() - Duration::from_secs(3600));

        assert!(!old_bak.exists());
        assert!(fresh_bak.is_file());
        assert!(keeper.is_file());
    }

    #[test]
    fn cancelled_sweep_leaves_files_alone() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ShardLayout::new(dir.path(), 1, 3);
        let path = layout.path_of("victim").unwrap();
        write_aged(&path, Duration::from_secs(72 * 3600));

        let weak = WeakTier::default();
        let negative = NegativeTier::new(Duration::from_secs(60), 1_000, 100);
        let allow = AllowList::default();
        let cancel = AtomicBool::new(true);

        let ctx = SweepContext {
            layout: &layout,
            weak: &weak,
            negative: &negative,
            scenes: &[],
            allow: &allow,
            cancel: &cancel,
            negative_enabled: false,
            bak_enabled: false,
            bak_max_age: Duration::from_secs(3600),
            warn_at: 30_000,
        };
        run(&ctx, SystemTime::now() + Duration::from_secs(1));

        assert!(path.is_file());
    }

    #[test]
    fn remove_baks_clears_backups_recursively() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("aa").join("bb");
        fs::create_dir_all(&nested).unwrap();
        fs::write(nested.join("one.bak"), b"x").unwrap();
        fs::write(dir.path().join("two.bak"), b"y").unwrap();
        fs::write(nested.join("asset"), b"z").unwrap();

        assert_eq!(remove_baks(dir.path()), 2);
        assert!(nested.join("asset").is_file());
    }
}
