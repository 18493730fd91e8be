//! The immutable, once-initialized process-wide context: the controller directory table,
//! capability flags, system info and CFS calibration, plus the per-process current-attachment
//! cache, passed around as a value instead of living in globals.
//!
//! Everything in here except `current_group` is written exactly once, during `init`/`check`,
//! before any worker forks; readers after that point need no synchronization.

use std::cell::Cell;
use std::path::{Path, PathBuf};

use crate::discovery::{self, ControllerDirs};
use crate::error::Result;
use crate::path::build_path;
use crate::probe;
use crate::types::{
    BaseDir, CfsCalibration, Capabilities, Controller, SystemInfo, DEFAULT_CPUSET, ROOT,
};

/// A caller-supplied bundle of tunables, handed to `init`/`check`/`probe`. Kept separate from
/// the derived `Capabilities` so the database's own configuration-variable machinery never has
/// to be consulted from inside this crate (it's just an input value).
#[derive(Debug, Clone, Copy)]
pub struct Tunables {
    pub cpu_limit: f64,
    pub cpu_priority: u32,
    pub cpu_ceiling_enforcement: bool,
    pub enable_cgroup_memory: bool,
    pub enable_cgroup_swap: bool,
    pub enable_cgroup_cpuset: bool,
    /// Total vmem chunks the database is configured to allow, system-wide.
    pub vmem_limit_chunks: i64,
    /// Number of primary segment worker sets sharing that vmem budget on this host.
    pub primary_segment_count: u32,
}

impl Default for Tunables {
    fn default() -> Self {
        Tunables {
            cpu_limit: 0.9,
            cpu_priority: 1,
            cpu_ceiling_enforcement: true,
            enable_cgroup_memory: true,
            enable_cgroup_swap: true,
            enable_cgroup_cpuset: true,
            vmem_limit_chunks: 0,
            primary_segment_count: 1,
        }
    }
}

#[derive(Debug)]
pub struct Context {
    pub dirs: ControllerDirs,
    pub caps: Capabilities,
    pub system: SystemInfo,
    pub cfs: CfsCalibration,
    pub tunables: Tunables,
    proc_cgroup_path: PathBuf,
    current_group: Cell<Option<i32>>,
    /// Set to true on the first post-fork call; before that, the attachment cache is never
    /// trusted. The cache value reflects at most the local process.
    forked: Cell<bool>,
}

impl Context {
    /// Discover the controller layout, run the root permission scan to stamp capability flags,
    /// and calibrate CFS bandwidth. This is `check()`/`init()`'s shared first half; it raises
    /// `ConfigError` on any hierarchy or permission violation.
    pub fn build(proc_cgroup_path: &Path, mount: &Path, tunables: Tunables) -> Result<Context> {
        discovery::check_hierarchy(proc_cgroup_path)?;

        let required = Controller::ALL;
        let dirs = discovery::discover(proc_cgroup_path, mount, &required);

        let mut caps = Capabilities::default();
        crate::perm::permission_check(&dirs, BaseDir::Gpdb, None, &mut caps, true)?;

        if !tunables.enable_cgroup_memory {
            caps.memory_enabled = false;
        }
        if !tunables.enable_cgroup_swap {
            caps.swap_enabled = false;
        }
        if !tunables.enable_cgroup_cpuset {
            caps.cpuset_enabled = false;
        }

        let system = probe::probe_system_info();
        let cfs = probe::calibrate_cfs(&dirs, system.ncores)?;

        log::debug!(
            "cgroup backend initialized: memory={} swap={} cpuset={} ncores={}",
            caps.memory_enabled,
            caps.swap_enabled,
            caps.cpuset_enabled,
            system.ncores
        );

        Ok(Context {
            dirs,
            caps,
            system,
            cfs,
            tunables,
            proc_cgroup_path: proc_cgroup_path.to_path_buf(),
            current_group: Cell::new(None),
            forked: Cell::new(false),
        })
    }

    pub fn controller_dir(&self, controller: Controller) -> &Path {
        self.dirs
            .get(&controller)
            .unwrap_or_else(|| panic!("controller {} not discovered", controller))
    }

    pub fn group_path(
        &self,
        controller: Controller,
        group: i32,
        leaf: Option<&str>,
    ) -> Result<PathBuf> {
        let group_component = if group == ROOT { None } else { Some(group) };
        build_path(self.controller_dir(controller), BaseDir::Gpdb, group_component, leaf)
    }

    pub fn parent_path(&self, controller: Controller, leaf: Option<&str>) -> Result<PathBuf> {
        build_path(self.controller_dir(controller), BaseDir::Parent, None, leaf)
    }

    /// Which group the current process last attached itself to, if that cache can be trusted.
    /// Never trusted across a fork boundary until explicitly refreshed.
    pub fn cached_group(&self) -> Option<i32> {
        if self.forked.get() {
            None
        } else {
            self.current_group.get()
        }
    }

    pub fn remember_attachment(&self, group: i32) {
        self.current_group.set(Some(group));
    }

    /// Called once, by the child immediately after `fork()`, to invalidate the inherited
    /// attachment cache copied across the fork boundary.
    pub fn note_forked(&self) {
        self.forked.set(true);
        self.current_group.set(None);
    }

    pub fn proc_cgroup_path(&self) -> &Path {
        &self.proc_cgroup_path
    }

    pub fn default_cpuset_group(&self) -> i32 {
        DEFAULT_CPUSET
    }
}
