#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;

use hound_search::{RepoConfig, VcsDriver, VcsError};

/// Scripted driver: "pulling" copies a fixture directory into the working
/// copy and reports whatever revision the test has staged.
pub struct FakeDriver {
    fixture: PathBuf,
    revision: Mutex<String>,
    fail: AtomicBool,
    pulls: AtomicUsize,
}

impl FakeDriver {
    pub fn new(fixture: impl Into<PathBuf>, revision: &str) -> Self {
        Self {
            fixture: fixture.into(),
            revision: Mutex::new(revision.to_string()),
            fail: AtomicBool::new(false),
            pulls: AtomicUsize::new(0),
        }
    }

    pub fn set_revision(&self, rev: &str) {
        *self.revision.lock() = rev.to_string();
    }

    pub fn set_fail(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn pulls(&self) -> usize {
        self.pulls.load(Ordering::SeqCst)
    }
}

impl VcsDriver for FakeDriver {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn pull(&self, workdir: &Path) -> Result<String, VcsError> {
        self.pulls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(VcsError::Other("scripted failure".into()));
        }
        if workdir.exists() {
            std::fs::remove_dir_all(workdir).map_err(|e| VcsError::Other(e.to_string()))?;
        }
        copy_dir(&self.fixture, workdir).map_err(|e| VcsError::Other(e.to_string()))?;
        Ok(self.revision.lock().clone())
    }
}

fn copy_dir(src: &Path, dst: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(dst)?;
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir(&entry.path(), &to)?;
        } else {
            std::fs::copy(entry.path(), &to)?;
        }
    }
    Ok(())
}

/// Write one fixture file, creating parent directories.
pub fn write_file(root: &Path, rel: &str, contents: &str) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, contents).unwrap();
}

/// A repo config with polling disabled so tests drive rebuilds explicitly.
pub fn repo_config(url: &str) -> RepoConfig {
    serde_json::from_value(serde_json::json!({
        "url": url,
        "enable-poll-updates": false,
    }))
    .unwrap()
}

/// Poll `pred` until it holds or the timeout elapses.
pub async fn wait_until<F: Fn() -> bool>(what: &str, pred: F) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
    while !pred() {
        if tokio::time::Instant::now() > deadline {
            panic!("timed out waiting for {}", what);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
