//! Test-only fixture: lays out a synthetic `<mount>/<controller>/...` tree under
//! `std::env::temp_dir()`, the same way the container-tooling crates this backend is modeled
//! on test their cgroup code (no mocking framework, just real files under a throwaway
//! directory that gets removed on `Drop`).

#![cfg(test)]

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct TempMount {
    path: PathBuf,
}

impl TempMount {
    pub fn new(test_name: &str) -> Self {
        let path = std::env::temp_dir().join(format!("resgroup-cgroup-test-{}-{}", test_name, std::process::id()));
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path).expect("create temp mount root");
        TempMount { path }
    }

    pub fn root(&self) -> &Path {
        &self.path
    }

    /// Create (or truncate) a file under the mount root, writing `contents`. Parent
    /// directories are created as needed.
    pub fn fixture(&self, name: &str, contents: &str) -> PathBuf {
        let full = self.path.join(name);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).expect("create fixture parent dir");
        }
        let mut f = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&full)
            .unwrap_or_else(|e| panic!("create fixture {}: {}", full.display(), e));
        f.write_all(contents.as_bytes()).unwrap();
        full
    }

    /// Create `<root>/<controller>/<leaf>` (and parents), writing `contents`.
    pub fn controller_fixture(&self, controller: &str, leaf: &str, contents: &str) -> PathBuf {
        let dir = self.path.join(controller);
        fs::create_dir_all(&dir).expect("create controller dir");
        let full = dir.join(leaf);
        let mut f = fs::OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&full)
            .unwrap();
        f.write_all(contents.as_bytes()).unwrap();
        full
    }

    pub fn mkdir(&self, rel: &str) -> PathBuf {
        let dir = self.path.join(rel);
        fs::create_dir_all(&dir).expect("mkdir");
        dir
    }
}

impl Drop for TempMount {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}
