//! Write-behind pipeline: a bounded queue feeding a small pool of
//! writer workers that persist assets with atomic temp-then-rename
//! commits.
//!
//! Submission never blocks on I/O. A path can hold at most one pending
//! job at a time: the global in-progress reservation is taken before
//! enqueue and released by the worker when the job is done, whatever
//! the outcome.

use crate::asset::Asset;
use crate::codec;
use flume as mpsc;
use lru::LruCache;
use parking_lot::Mutex;
use scc::HashMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant, SystemTime};
use tracing::{debug, warn};

pub(crate) const QUEUE_CAPACITY: usize = 1_000;

const TOUCH_WINDOW: Duration = Duration::from_secs(15 * 60);
const TOUCH_TABLE_CAP: usize = 4_096;

pub(crate) struct WriteJob {
    pub path: PathBuf,
    pub asset: Arc<Asset>,
    pub replace: bool,
}

/// Paths currently reserved for writing. Insertion grants exclusive
/// write rights for that path until released.
#[derive(Clone, Default)]
pub(crate) struct InProgress(Arc<HashMap<PathBuf, ()>>);

impl InProgress {
    /// True if the reservation was taken; false if already held.
    pub fn reserve(&self, path: &Path) -> bool {
        self.0.insert(path.to_path_buf(), ()).is_ok()
    }

    pub fn release(&self, path: &Path) {
        self.0.remove(path);
    }

    pub fn contains(&self, path: &Path) -> bool {
        self.0.contains(path)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Releases the reservation when the job ends, success or not.
struct Reservation<'a> {
    set: &'a InProgress,
    path: &'a Path,
}

impl Drop for Reservation<'_> {
    fn drop(&mut self) {
        self.set.release(self.path);
    }
}

/// Debounced last-access touches: at most one real touch per path per
/// window, tracked through a bounded LRU table.
pub(crate) struct TouchDebounce {
    window: Duration,
    seen: Mutex<LruCache<PathBuf, Instant>>,
}

impl TouchDebounce {
    pub fn new() -> Self {
        Self::with_window(TOUCH_WINDOW)
    }

    pub fn with_window(window: Duration) -> Self {
        TouchDebounce {
            window,
            seen: Mutex::new(LruCache::new(TOUCH_TABLE_CAP)),
        }
    }

    pub fn touch(&self, path: &Path) {
        let key = path.to_path_buf();
        let now = Instant::now();
        {
            let mut seen = self.seen.lock();
            if let Some(last) = seen.get(&key) {
                if now.duration_since(*last) < self.window {
                    return;
                }
            }
            seen.put(key, now);
        }
        if let Err(err) = touch_file(path) {
            debug!(path = %path.display(), error = %err, "access-time touch failed");
        }
    }
}

fn touch_file(path: &Path) -> std::io::Result<()> {
    let file = fs::OpenOptions::new().write(true).open(path)?;
    let now = SystemTime::now();
    file.set_times(fs::FileTimes::new().set_accessed(now).set_modified(now))
}

/// The worker pool. Dropping the pool via [`WritePool::shutdown`]
/// closes the queue and joins every worker, draining pending jobs.
pub(crate) struct WritePool {
    queue: mpsc::Sender<WriteJob>,
    workers: Vec<thread::JoinHandle<()>>,
    in_progress: InProgress,
}

impl WritePool {
    pub fn spawn(
        workers: usize,
        in_progress: InProgress,
        touch: Arc<TouchDebounce>,
        touch_on_hit: bool,
    ) -> Self {
        let (queue, dequeue) = mpsc::bounded(QUEUE_CAPACITY);
        let workers = (0..workers.clamp(1, 4))
            .map(|n| {
                let dequeue = dequeue.clone();
                let in_progress = in_progress.clone();
                let touch = touch.clone();
                thread::Builder::new()
                    .name(format!("driftcache-writer-{n}"))
                    .spawn(move || worker_loop(dequeue, in_progress, touch, touch_on_hit))
                    .expect("failed to spawn writer worker")
            })
            .collect();

        WritePool {
            queue,
            workers,
            in_progress,
        }
    }

    /// Reserve the path and enqueue the job. Returns false when the
    /// path is already reserved; the submission is dropped and the
    /// earlier job persists an equivalent or newer version.
    pub fn submit(&self, path: PathBuf, asset: Arc<Asset>, replace: bool) -> bool {
        if !self.in_progress.reserve(&path) {
            return false;
        }
        let job = WriteJob {
            path,
            asset,
            replace,
        };
        if let Err(err) = self.queue.send(job) {
            let job = err.into_inner();
            self.in_progress.release(&job.path);
            warn!(path = %job.path.display(), "write queue closed, dropping job");
            return false;
        }
        true
    }

    pub fn shutdown(self) {
        drop(self.queue);
        for worker in self.workers {
            let _ = worker.join();
        }
    }
}

fn worker_loop(
    dequeue: mpsc::Receiver<WriteJob>,
    in_progress: InProgress,
    touch: Arc<TouchDebounce>,
    touch_on_hit: bool,
) {
    while let Ok(job) = dequeue.recv() {
        let _reservation = Reservation {
            set: &in_progress,
            path: &job.path,
        };
        if let Err(err) = persist(&job, &touch, touch_on_hit) {
            warn!(path = %job.path.display(), error = %err, "asset write failed");
        }
    }
}

fn persist(job: &WriteJob, touch: &TouchDebounce, touch_on_hit: bool) -> std::io::Result<()> {
    let target = &job.path;

    if !job.replace && target.is_file() {
        if touch_on_hit {
            touch.touch(target);
        }
        return Ok(());
    }

    if let Some(dir) = target.parent() {
        fs::create_dir_all(dir)?;
    }

    let tmp = temp_sibling(target);
    let result = write_and_commit(&tmp, target, &codec::encode(&job.asset), job.replace);
    if result.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    result
}

fn write_and_commit(tmp: &Path, target: &Path, bytes: &[u8], replace: bool) -> std::io::Result<()> {
    {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }

    if replace && target.is_file() {
        // keep the previous version as a .bak sibling; cleanup ages
        // those out
        let bak = bak_sibling(target);
        let _ = fs::remove_file(&bak);
        let _ = fs::rename(target, &bak);
    }

    match fs::rename(tmp, target) {
        Ok(()) => Ok(()),
        Err(_) => {
            // legacy commit: delete-then-move, small race window
            let _ = fs::remove_file(target);
            fs::rename(tmp, target)
        }
    }
}

fn temp_sibling(target: &Path) -> PathBuf {
    let mut random = [0u8; 8];
    let _ = getrandom::getrandom(&mut random);
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!("{name}.{}.tmp", hex::encode(random)))
}

pub(crate) fn bak_sibling(target: &Path) -> PathBuf {
    let name = target
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    target.with_file_name(format!("{name}.{}", crate::shard::BAK_EXT))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::codec::Limits;

    fn asset(id: &str, data: &[u8]) -> Arc<Asset> {
        Arc::new(Asset::new(id, 1, data.to_vec()))
    }

    fn drain(in_progress: &InProgress) {
        while in_progress.len() != 0 {
            thread::yield_now();
        }
    }

    fn read_back(path: &Path) -> Asset {
        let bytes = fs::read(path).unwrap();
        codec::decode(
            &bytes,
            Limits {
                max_string_bytes: 1024,
                max_data_bytes: 1024,
            },
        )
        .unwrap()
    }

    #[test]
    fn written_file_decodes_to_the_submitted_asset() {
        let dir = tempfile::tempdir().unwrap();
        let in_progress = InProgress::default();
        let pool = WritePool::spawn(1, in_progress.clone(), Arc::new(TouchDebounce::new()), false);

        let target = dir.path().join("abc").join("abcdef");
        assert!(pool.submit(target.clone(), asset("abcdef", b"bytes"), false));
        drain(&in_progress);

        assert_eq!(read_back(&target).data, b"bytes");
        pool.shutdown();
    }

    #[test]
    fn a_held_reservation_drops_the_submission() {
        let dir = tempfile::tempdir().unwrap();
        let in_progress = InProgress::default();
        let pool = WritePool::spawn(1, in_progress.clone(), Arc::new(TouchDebounce::new()), false);

        let target = dir.path().join("x").join("xyz");
        assert!(in_progress.reserve(&target));
        assert!(!pool.submit(target.clone(), asset("xyz", b"second"), false));

        in_progress.release(&target);
        drain(&in_progress);
        assert!(!target.exists());
        pool.shutdown();
    }

    #[test]
    fn replace_keeps_the_old_version_as_bak() {
        let dir = tempfile::tempdir().unwrap();
        let in_progress = InProgress::default();
        let pool = WritePool::spawn(1, in_progress.clone(), Arc::new(TouchDebounce::new()), false);

        let target = dir.path().join("r").join("rst");
        assert!(pool.submit(target.clone(), asset("rst", b"old"), false));
        drain(&in_progress);
        assert!(pool.submit(target.clone(), asset("rst", b"new"), true));
        drain(&in_progress);

        assert_eq!(read_back(&target).data, b"new");
        assert_eq!(read_back(&bak_sibling(&target)).data, b"old");
        pool.shutdown();
    }

    #[test]
    fn existing_target_skips_a_non_replace_write() {
        let dir = tempfile::tempdir().unwrap();
        let in_progress = InProgress::default();
        let pool = WritePool::spawn(1, in_progress.clone(), Arc::new(TouchDebounce::new()), false);

        let target = dir.path().join("s").join("stu");
        assert!(pool.submit(target.clone(), asset("stu", b"first"), false));
        drain(&in_progress);
        assert!(pool.submit(target.clone(), asset("stu", b"ignored"), false));
        drain(&in_progress);

        assert_eq!(read_back(&target).data, b"first");
        pool.shutdown();
    }

    #[test]
    fn shutdown_drains_queued_jobs() {
        let dir = tempfile::tempdir().unwrap();
        let in_progress = InProgress::default();
        let pool = WritePool::spawn(2, in_progress.clone(), Arc::new(TouchDebounce::new()), false);

        let targets: Vec<_> = (0..8)
            .map(|n| dir.path().join("d").join(format!("file{n}")))
            .collect();
        for (n, target) in targets.iter().enumerate() {
            assert!(pool.submit(
                target.clone(),
                asset(&format!("file{n}"), b"data"),
                false
            ));
        }
        pool.shutdown();

        for target in &targets {
            assert!(target.is_file());
        }
        assert_eq!(in_progress.len(), 0);
    }

    #[test]
    fn touch_is_debounced_within_the_window() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("touched");
        fs::write(&path, b"x").unwrap();

        let old = SystemTime::now() - Duration::from_secs(3600);
        let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_times(fs::FileTimes::new().set_accessed(old).set_modified(old))
            .unwrap();
        drop(file);

        let touch = TouchDebounce::with_window(Duration::from_secs(600));
        touch.touch(&path);
        let first = fs::metadata(&path).unwrap().modified().unwrap();
        assert!(first > old);

        // within the window: no second touch
        let rewound = SystemTime::now() - Duration::from_secs(1800);
        let file = fs::OpenOptions::new().write(true).open(&path).unwrap();
        file.set_times(
            fs::FileTimes::new()
                .set_accessed(rewound)
                .set_modified(rewound),
        )
        .unwrap();
        drop(file);

        touch.touch(&path);
        let after = fs::metadata(&path).unwrap().modified().unwrap();
        assert!(after <= rewound + Duration::from_secs(1));
    }
}
