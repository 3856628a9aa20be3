use crate::error::{Result, SpecflowError};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

// ---------------------------------------------------------------------------
// Atomic writes
// ---------------------------------------------------------------------------

/// Content fully written and synced to a temp file next to its target,
/// waiting for the rename. Dropping it without `commit` removes the temp file
/// and leaves the target exactly as it was.
pub struct StagedWrite {
    tmp: NamedTempFile,
    target: PathBuf,
}

impl StagedWrite {
    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn temp_path(&self) -> &Path {
        self.tmp.path()
    }

    /// Rename the temp file over the target. This is the only step that
    /// changes the target.
    pub fn commit(self) -> Result<()> {
        let target = self.target;
        self.tmp
            .persist(&target)
            .map_err(|e| SpecflowError::storage(&target, e.error))?;
        Ok(())
    }
}

/// Write `data` to a temp file in the same directory as `path` and fsync it.
pub fn stage_write(path: &Path, data: &[u8]) -> Result<StagedWrite> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(dir).map_err(|e| SpecflowError::storage(dir, e))?;
    let mut tmp = NamedTempFile::new_in(dir).map_err(|e| SpecflowError::storage(dir, e))?;
    tmp.write_all(data)
        .and_then(|_| tmp.as_file().sync_all())
        .map_err(|e| SpecflowError::storage(tmp.path(), e))?;
    Ok(StagedWrite {
        tmp,
        target: path.to_path_buf(),
    })
}

/// Atomically write `data` to `path` using a tempfile in the same directory.
/// Prevents partial writes from corrupting state files.
pub fn atomic_write(path: &Path, data: &[u8]) -> Result<()> {
    stage_write(path, data)?.commit()
}

/// Create a directory and all parents, idempotent.
pub fn ensure_dir(path: &Path) -> Result<()> {
    std::fs::create_dir_all(path).map_err(|e| SpecflowError::storage(path, e))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn atomic_write_creates_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("test.json");
        atomic_write(&path, b"{\"a\": 1}").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "{\"a\": 1}");
    }

    #[test]
    fn atomic_write_creates_parents() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("a/b/c/test.json");
        atomic_write(&path, b"data").unwrap();
        assert!(path.exists());
    }

    #[test]
    fn abandoned_stage_leaves_target_untouched() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("task-states.json");
        std::fs::write(&path, b"{\"001\": {}}").unwrap();
        let before = std::fs::read(&path).unwrap();

        let staged = stage_write(&path, b"{\"002\": {\"T1\": \"half-writ").unwrap();
        assert_eq!(staged.temp_path().parent(), path.parent());
        assert_eq!(std::fs::read(&path).unwrap(), before);
        // Process dies before the rename.
        drop(staged);

        assert_eq!(std::fs::read(&path).unwrap(), before);
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn commit_replaces_target() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("x.json");
        std::fs::write(&path, b"old").unwrap();
        let staged = stage_write(&path, b"new").unwrap();
        staged.commit().unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "new");
    }
}
