//! Per-challenge scratch storage (§2.1, §5 "shared-resource policy"): a dedicated directory tree
//! with distinct `file` and `fifo` subdirectories, addressed by generated filenames unique within
//! the challenge.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use uuid::Uuid;

/// The scratch directory of one challenge. Filenames handed out by `gen_filepath`/`gen_fifopath`
/// are just joined onto `file_dir`/`fifo_dir`; callers (the Tasks) are responsible for actually
/// creating and removing the files there.
#[derive(Debug)]
pub struct ChallengeBox {
    root: PathBuf,
    file_dir: PathBuf,
    fifo_dir: PathBuf,
}

impl ChallengeBox {
    /// Create a fresh scratch tree under `base_tmp_path/<chal_id>`.
    pub fn new(base_tmp_path: &Path, chal_id: u64) -> Result<Self> {
        let root = base_tmp_path.join(chal_id.to_string());
        let file_dir = root.join("file");
        let fifo_dir = root.join("fifo");
        fs::create_dir_all(&file_dir)
            .with_context(|| format!("failed to create {:?}", file_dir))?;
        fs::create_dir_all(&fifo_dir)
            .with_context(|| format!("failed to create {:?}", fifo_dir))?;
        Ok(ChallengeBox {
            root,
            file_dir,
            fifo_dir,
        })
    }

    pub fn file_path(&self, name: &str) -> PathBuf {
        self.file_dir.join(name)
    }

    pub fn fifo_path(&self, name: &str) -> PathBuf {
        self.fifo_dir.join(name)
    }

    /// `Some(path)` iff a file with this name currently exists in the file store.
    pub fn get_file(&self, name: &str) -> Option<PathBuf> {
        let path = self.file_path(name);
        path.exists().then_some(path)
    }

    pub fn delete_file(&self, name: &str) -> Result<()> {
        let path = self.file_path(name);
        if path.exists() {
            fs::remove_file(&path).with_context(|| format!("failed to remove {:?}", path))?;
        }
        Ok(())
    }

    /// Allocate a fresh, uniquely-named workdir under the scratch root for one sandbox run.
    pub fn alloc_workdir(&self) -> Result<PathBuf> {
        let workdir = self.root.join(format!("sandbox_{}", Uuid::new_v4()));
        fs::create_dir_all(&workdir)
            .with_context(|| format!("failed to create {:?}", workdir))?;
        Ok(workdir)
    }

    /// Move `filename`, relative to `workdir`, into the file store, if it exists.
    pub fn adopt_from_workdir(&self, workdir: &Path, filename: &str) -> Result<()> {
        let src = workdir.join(filename);
        if src.is_file() {
            let dst = self.file_path(filename);
            fs::rename(&src, &dst)
                .with_context(|| format!("failed to move {:?} to {:?}", src, dst))?;
        }
        Ok(())
    }

    pub fn remove_workdir(&self, workdir: &Path) {
        let _ = fs::remove_dir_all(workdir);
    }

    /// Tear down the whole scratch tree. Called once the challenge's Summary task has finished.
    pub fn cleanup(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)
                .with_context(|| format!("failed to remove {:?}", self.root))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn new_creates_file_and_fifo_dirs() {
        let tmp = tempfile::tempdir().unwrap();
        let chal_box = ChallengeBox::new(tmp.path(), 42).unwrap();
        assert!(chal_box.file_dir.is_dir());
        assert!(chal_box.fifo_dir.is_dir());
    }

    #[test]
    fn get_file_reflects_existence() {
        let tmp = tempfile::tempdir().unwrap();
        let chal_box = ChallengeBox::new(tmp.path(), 1).unwrap();
        assert_eq!(chal_box.get_file("1-stdout"), None);
        fs::write(chal_box.file_path("1-stdout"), b"hi").unwrap();
        assert_eq!(
            chal_box.get_file("1-stdout"),
            Some(chal_box.file_path("1-stdout"))
        );
    }

    #[test]
    fn adopt_from_workdir_moves_existing_file_only() {
        let tmp = tempfile::tempdir().unwrap();
        let chal_box = ChallengeBox::new(tmp.path(), 2).unwrap();
        let workdir = chal_box.alloc_workdir().unwrap();
        fs::write(workdir.join("out.txt"), b"result").unwrap();

        chal_box.adopt_from_workdir(&workdir, "out.txt").unwrap();
        chal_box.adopt_from_workdir(&workdir, "missing.txt").unwrap();

        assert!(chal_box.get_file("out.txt").is_some());
        assert!(chal_box.get_file("missing.txt").is_none());
    }

    #[test]
    fn cleanup_removes_the_whole_tree() {
        let tmp = tempfile::tempdir().unwrap();
        let chal_box = ChallengeBox::new(tmp.path(), 3).unwrap();
        chal_box.cleanup().unwrap();
        assert!(!chal_box.root.exists());
    }
}
