//! Shared fixture for the integration test crates below: a synthetic `<mount>/<controller>/...`
//! tree under `std::env::temp_dir()`, mirroring `src/testutil.rs`'s unit-test fixture but
//! standing alone since each file under `tests/` compiles as its own crate.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

pub struct TempMount {
    path: PathBuf,
}

impl TempMount {
    pub fn new(test_name: &str) -> Self {
        let path = std::env::temp_dir().join(format!(
            "resgroup-cgroup-itest-{}-{}-{}",
            test_name,
            std::process::id(),
            test_name.len()
        ));
        let _ = fs::remove_dir_all(&path);
        fs::create_dir_all(&path).expect("create temp mount root");
        TempMount { path }
    }

    pub fn root(&self) -> &Path {
        &self.path
    }

    pub fn fixture(&self, name: &str, contents: &str) -> PathBuf {
        let full = self.path.join(name);
        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).expect("create fixture parent");
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
