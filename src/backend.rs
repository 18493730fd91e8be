//! Backend vtable: the uniform interface the surrounding database binds once per process
//! lifetime, so it never has to know it is specifically talking to a cgroup v1 implementation.

use std::os::unix::io::RawFd;
use std::path::Path;

use crate::context::{Context, Tunables};
use crate::error::Result;
use crate::types::Controller;
use crate::{group, limit};

/// Operations a resource-group control backend must provide. A future v2 (cgroup unified
/// hierarchy) implementation binds the same trait; the database selects exactly one at probe
/// time and never branches on which it got.
pub trait Backend {
    fn name(&self) -> &'static str;

    /// Best-effort usability check: does this backend look usable, without raising on failure?
    fn probe(&self) -> bool;

    /// Strict init check: raise `ConfigError` identifying what's wrong, if anything is.
    fn check(&self) -> Result<()>;

    /// Create the gpdb sub-tree and the reserved system/default groups.
    fn init(&self) -> Result<()>;

    /// Re-derive nice=0 equivalence across worker processes after a tunable change.
    fn adjust_tunables(&self) -> Result<()>;

    fn create_group(&self, group: i32) -> Result<()>;
    fn attach(&self, group: i32, pid: u32, with_cpuset: bool) -> Result<()>;
    fn destroy_group(&self, group: i32, migrate: bool) -> Result<()>;

    fn set_cpu_limit(&self, group: i32, rate: f64) -> Result<()>;
    fn set_memory_limit(&self, group: i32, rate: f64) -> Result<()>;
    fn get_cpu_usage(&self, group: i32) -> Result<i64>;
    fn get_memory_usage(&self, group: i32) -> Result<i64>;
    fn get_memory_limit_chunks(&self, group: i32) -> Result<i64>;
    fn get_cpuset(&self, group: i32) -> Result<String>;
    fn set_cpuset(&self, group: i32, value: &str) -> Result<()>;
}

/// The cgroup v1 implementation of `Backend`, wrapping an initialized `Context`.
#[derive(Debug)]
pub struct CgroupV1Backend {
    ctx: Context,
}

impl CgroupV1Backend {
    /// Run discovery, the permission scan, and CFS calibration; fails fast with `ConfigError`
    /// rather than leaving a half-initialized backend around.
    pub fn new(proc_cgroup_path: &Path, mount: &Path, tunables: Tunables) -> Result<Self> {
        let ctx = Context::build(proc_cgroup_path, mount, tunables)?;
        Ok(CgroupV1Backend { ctx })
    }

    pub fn context(&self) -> &Context {
        &self.ctx
    }

    pub fn lock_group(&self, group: i32, controller: Controller, block: bool) -> Result<RawFd> {
        group::lock(&self.ctx, group, controller, block)
    }

    pub fn unlock_group(&self, fd: RawFd) {
        group::unlock(fd)
    }
}

impl Backend for CgroupV1Backend {
    fn name(&self) -> &'static str {
        "cgroup"
    }

    fn probe(&self) -> bool {
        crate::discovery::check_hierarchy(self.ctx.proc_cgroup_path()).is_ok()
    }

    fn check(&self) -> Result<()> {
        crate::discovery::check_hierarchy(self.ctx.proc_cgroup_path())
    }

    fn init(&self) -> Result<()> {
        limit::init_cpu(&self.ctx)?;
        if self.ctx.caps.cpuset_enabled {
            limit::init_cpuset(&self.ctx)?;
        }
        group::create(&self.ctx, crate::types::SYSTEM)?;

        log::debug!(
            "init: memory={} swap={} cpuset={}",
            self.ctx.caps.memory_enabled,
            self.ctx.caps.swap_enabled,
            self.ctx.caps.cpuset_enabled,
        );
        Ok(())
    }

    fn adjust_tunables(&self) -> Result<()> {
        limit::set_cpu_limit(&self.ctx, crate::types::SYSTEM, 100.0)
    }

    fn create_group(&self, group: i32) -> Result<()> {
        group::create(&self.ctx, group)
    }

    fn attach(&self, group: i32, pid: u32, with_cpuset: bool) -> Result<()> {
        group::attach(&self.ctx, group, pid, with_cpuset)
    }

    fn destroy_group(&self, group: i32, migrate: bool) -> Result<()> {
        group::destroy(&self.ctx, group, migrate)
    }

    fn set_cpu_limit(&self, group: i32, rate: f64) -> Result<()> {
        limit::set_cpu_limit(&self.ctx, group, rate)
    }

    fn set_memory_limit(&self, group: i32, rate: f64) -> Result<()> {
        limit::set_memory_limit(&self.ctx, group, rate)
    }

    fn get_cpu_usage(&self, group: i32) -> Result<i64> {
        limit::get_cpu_usage(&self.ctx, group)
    }

    fn get_memory_usage(&self, group: i32) -> Result<i64> {
        limit::get_memory_usage(&self.ctx, group)
    }

    fn get_memory_limit_chunks(&self, group: i32) -> Result<i64> {
        limit::get_memory_limit_chunks(&self.ctx, group)
    }

    fn get_cpuset(&self, group: i32) -> Result<String> {
        limit::get_cpuset(&self.ctx, group)
    }

    fn set_cpuset(&self, group: i32, value: &str) -> Result<()> {
        limit::set_cpuset(&self.ctx, group, value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::TempMount;
    use std::path::PathBuf;

    fn full_layout(tm: &TempMount) -> PathBuf {
        for ctrl in ["cpu", "cpuacct", "memory", "cpuset"] {
            tm.mkdir(&format!("mount/{}/gpdb", ctrl));
        }
        tm.fixture("mount/cpu/cpu.cfs_period_us", "100000");
        tm.fixture("mount/cpu/cpu.cfs_quota_us", "-1");
        tm.fixture("mount/cpu/cpu.shares", "1024");
        tm.fixture("mount/cpuset/cpuset.mems", "0");
        tm.fixture("mount/cpuset/cpuset.cpus", "0-3");
        for (ctrl, leaf) in [
            ("cpu", "cpu.shares"),
            ("cpu", "cpu.cfs_period_us"),
            ("cpu", "cpu.cfs_quota_us"),
            ("cpu", "cgroup.procs"),
            ("cpuacct", "cpuacct.usage"),
            ("cpuacct", "cgroup.procs"),
            ("memory", "memory.limit_in_bytes"),
            ("memory", "memory.usage_in_bytes"),
            ("memory", "cgroup.procs"),
            ("cpuset", "cpuset.cpus"),
            ("cpuset", "cpuset.mems"),
            ("cpuset", "cgroup.procs"),
        ] {
            tm.fixture(&format!("mount/{}/gpdb/{}", ctrl, leaf), "0");
        }
        let default_cpuset_dir = format!("mount/cpuset/gpdb/{}", crate::types::DEFAULT_CPUSET);
        for leaf in ["cpuset.cpus", "cpuset.mems", "cgroup.procs"] {
            tm.fixture(&format!("{}/{}", default_cpuset_dir, leaf), "");
        }
        for (ctrl, leaf) in [
            ("cpu", "cpu.shares"),
            ("cpu", "cpu.cfs_period_us"),
            ("cpu", "cpu.cfs_quota_us"),
            ("cpu", "cgroup.procs"),
            ("cpuacct", "cpuacct.usage"),
            ("cpuacct", "cgroup.procs"),
            ("memory", "memory.limit_in_bytes"),
            ("memory", "memory.usage_in_bytes"),
            ("memory", "cgroup.procs"),
            ("cpuset", "cpuset.cpus"),
            ("cpuset", "cpuset.mems"),
            ("cpuset", "cgroup.procs"),
        ] {
            tm.fixture(&format!("mount/{}/gpdb/{}/{}", ctrl, crate::types::SYSTEM, leaf), "0");
        }
        tm.root().join("mount")
    }

    #[test]
    fn init_creates_system_group_and_stamps_gpdb_quota() {
        let tm = TempMount::new("backend_init");
        let mount = full_layout(&tm);
        let proc_cgroup = tm.fixture(
            "proc_1_cgroup",
            "4:cpu:/\n5:cpuacct:/\n6:memory:/\n7:cpuset:/\n",
        );

        let backend = CgroupV1Backend::new(&proc_cgroup, &mount, Tunables::default()).unwrap();
        backend.init().unwrap();

        assert!(tm
            .root()
            .join(format!("mount/cpu/gpdb/{}", crate::types::SYSTEM))
            .is_dir());
        assert_eq!(backend.name(), "cgroup");
    }

    #[test]
    fn probe_fails_fast_on_comounted_hierarchy() {
        let tm = TempMount::new("backend_probe_bad");
        let mount = tm.mkdir("mount");
        let proc_cgroup = tm.fixture("proc_1_cgroup", "4:cpu,cpuset:/\n");

        assert!(CgroupV1Backend::new(&proc_cgroup, &mount, Tunables::default()).is_err());
    }
}
