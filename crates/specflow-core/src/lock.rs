//! Per-resource locking: an in-process gate serializes threads, then an OS
//! advisory lock on a sibling `.lock` file serializes processes.

use crate::error::{Result, SpecflowError};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

/// Default bound on how long a store operation waits for a resource lock.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(10);

/// Pause between attempts to take a contended OS lock.
const RETRY_INTERVAL: Duration = Duration::from_millis(10);

// ---------------------------------------------------------------------------
// PlatformLock
// ---------------------------------------------------------------------------

/// Cross-process exclusion on an open lock file.
pub trait PlatformLock: Send + Sync + fmt::Debug {
    /// Try to take an exclusive lock without blocking. `Ok(false)` means the
    /// lock is held elsewhere.
    fn try_lock(&self, file: &File) -> std::io::Result<bool>;

    fn unlock(&self, file: &File) -> std::io::Result<()>;
}

/// OS advisory locking through `fs2` (`flock` on Unix, `LockFileEx` on Windows).
#[derive(Debug, Default, Clone, Copy)]
pub struct AdvisoryLock;

impl PlatformLock for AdvisoryLock {
    fn try_lock(&self, file: &File) -> std::io::Result<bool> {
        match fs2::FileExt::try_lock_exclusive(file) {
            Ok(()) => Ok(true),
            Err(e) if is_contended(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn unlock(&self, file: &File) -> std::io::Result<()> {
        fs2::FileExt::unlock(file)
    }
}

fn is_contended(err: &std::io::Error) -> bool {
    err.kind() == std::io::ErrorKind::WouldBlock
        || err.raw_os_error() == fs2::lock_contended_error().raw_os_error()
}

/// Thread-level exclusion only. For embedding where a single process owns the
/// memory directory.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessLocalLock;

impl PlatformLock for ProcessLocalLock {
    fn try_lock(&self, _file: &File) -> std::io::Result<bool> {
        Ok(true)
    }

    fn unlock(&self, _file: &File) -> std::io::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// ThreadGate
// ---------------------------------------------------------------------------

/// A mutex with a timed acquire.
#[derive(Debug, Default)]
struct ThreadGate {
    held: Mutex<bool>,
    released: Condvar,
}

impl ThreadGate {
    fn acquire(&self, deadline: Instant) -> Option<GateGuard<'_>> {
        let mut held = lock_ignoring_poison(&self.held);
        while *held {
            let now = Instant::now();
            if now >= deadline {
                return None;
            }
            held = match self.released.wait_timeout(held, deadline - now) {
                Ok((guard, _)) => guard,
                Err(poisoned) => poisoned.into_inner().0,
            };
        }
        *held = true;
        Some(GateGuard { gate: self })
    }
}

fn lock_ignoring_poison(m: &Mutex<bool>) -> MutexGuard<'_, bool> {
    match m.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

struct GateGuard<'a> {
    gate: &'a ThreadGate,
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        *lock_ignoring_poison(&self.gate.held) = false;
        self.gate.released.notify_one();
    }
}

// ---------------------------------------------------------------------------
// ResourceLock
// ---------------------------------------------------------------------------

/// Lock for one logical resource (one JSON file).
#[derive(Debug)]
pub struct ResourceLock {
    name: &'static str,
    lock_path: PathBuf,
    gate: ThreadGate,
    platform: Arc<dyn PlatformLock>,
}

impl ResourceLock {
    pub fn new(name: &'static str, lock_path: impl Into<PathBuf>, platform: Arc<dyn PlatformLock>) -> Self {
        Self {
            name,
            lock_path: lock_path.into(),
            gate: ThreadGate::default(),
            platform,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }

    /// Take the thread gate and then the OS lock, giving up after `timeout`.
    /// Both are released when the returned guard drops.
    pub fn acquire(&self, timeout: Duration) -> Result<ResourceGuard<'_>> {
        let started = Instant::now();
        let deadline = started + timeout;
        let gate = self
            .gate
            .acquire(deadline)
            .ok_or_else(|| self.timeout_error(started))?;

        if let Some(parent) = self.lock_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| SpecflowError::storage(parent, e))?;
        }
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&self.lock_path)
            .map_err(|e| SpecflowError::storage(&self.lock_path, e))?;

        loop {
            match self.platform.try_lock(&file) {
                Ok(true) => break,
                Ok(false) => {
                    if Instant::now() >= deadline {
                        return Err(self.timeout_error(started));
                    }
                    std::thread::sleep(RETRY_INTERVAL);
                }
                Err(e) => return Err(SpecflowError::storage(&self.lock_path, e)),
            }
        }

        Ok(ResourceGuard {
            file,
            platform: self.platform.as_ref(),
            _gate: gate,
        })
    }

    fn timeout_error(&self, started: Instant) -> SpecflowError {
        SpecflowError::LockTimeout {
            resource: self.name.to_string(),
            waited_ms: started.elapsed().as_millis(),
        }
    }
}

/// Held resource lock. Field order matters: the OS lock is released in
/// `drop` before the thread gate field is dropped.
pub struct ResourceGuard<'a> {
    file: File,
    platform: &'a dyn PlatformLock,
    _gate: GateGuard<'a>,
}

impl Drop for ResourceGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.platform.unlock(&self.file) {
            tracing::warn!(error = %e, "failed to release resource lock");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
