//! Group lifecycle manager: create, lock, attach, detach and destroy per-group controller
//! subdirectories.

use std::os::unix::io::RawFd;
use std::thread::sleep;
use std::time::Duration;

use crate::context::Context;
use crate::error::{Error, ErrorKind, Result};
use crate::path::{self, lock_dir, read_pid_list, read_str, write_pid, write_str};
use crate::types::{BaseDir, Controller, MAX_RETRY};

/// The controllers a group directory spans, in creation/destruction order. `cpuset` and
/// `memory` are included only when their capability is enabled.
fn group_controllers(ctx: &Context) -> Vec<Controller> {
    let mut v = vec![Controller::Cpu, Controller::CpuAcct];
    if ctx.caps.memory_enabled {
        v.push(Controller::Memory);
    }
    if ctx.caps.cpuset_enabled {
        v.push(Controller::CpuSet);
    }
    v
}

/// The anchor leaf whose writability proves a directory is still "ours" before `destroy`
/// removes it. `cpuacct` and `cpuset` have no anchor file of their own.
fn anchor_file(controller: Controller) -> Option<&'static str> {
    match controller {
        Controller::Cpu => Some("cpu.shares"),
        Controller::Memory => Some("memory.limit_in_bytes"),
        Controller::CpuAcct | Controller::CpuSet | Controller::Unknown => None,
    }
}

/// `mkdir` the group under every controller it spans, then poll until the kernel has
/// populated the new directory's interface files (a cooperative wait, not a busy loop). For
/// `cpuset`, also copies `cpuset.mems`/`cpuset.cpus` down from the parent, since an empty
/// cpuset would otherwise reject every attachment.
pub fn create(ctx: &Context, group: i32) -> Result<()> {
    for controller in group_controllers(ctx) {
        let dir = ctx.group_path(controller, group, None)?;
        path::mkdir_p(&dir)?;
    }

    poll_until_ready(ctx, group)?;

    if ctx.caps.cpuset_enabled {
        init_group_cpuset(ctx, group)?;
    }

    Ok(())
}

fn poll_until_ready(ctx: &Context, group: i32) -> Result<()> {
    let mut caps_scratch = ctx.caps;
    for attempt in 0..MAX_RETRY {
        match ready(ctx, group, &mut caps_scratch) {
            Ok(()) => return Ok(()),
            Err(e) if e.is_transient() => {
                log::trace!("create({}): interface files not yet populated, attempt {}", group, attempt);
                sleep(Duration::from_millis(1));
            }
            Err(e) => return Err(e),
        }
    }

    log::warn!("create({}): MAX_RETRY exhausted waiting for interface files", group);
    // Escalate to a reporting check, which raises ConfigError identifying the culprit.
    ready_report(ctx, group)?;
    Ok(())
}

/// Returns `Ok(())` once every mandatory interface file is populated, or a `Transient` error
/// (never surfaced past `poll_until_ready`) while the kernel is still catching up.
fn ready(ctx: &Context, group: i32, caps_scratch: &mut crate::types::Capabilities) -> Result<()> {
    let ok = crate::perm::permission_check(&ctx.dirs, BaseDir::Gpdb, Some(group), caps_scratch, false)?;
    if ok {
        Ok(())
    } else {
        Err(Error::new(ErrorKind::Transient))
    }
}

fn ready_report(ctx: &Context, group: i32) -> Result<()> {
    let mut caps_scratch = ctx.caps;
    crate::perm::permission_check(&ctx.dirs, BaseDir::Gpdb, Some(group), &mut caps_scratch, true)
        .map(|_| ())
}

/// Copy `cpuset.mems`/`cpuset.cpus` from the parent sub-tree into `group`'s cpuset directory.
fn init_group_cpuset(ctx: &Context, group: i32) -> Result<()> {
    for leaf in ["cpuset.mems", "cpuset.cpus"] {
        let parent_val = read_str(&ctx.parent_path(Controller::CpuSet, Some(leaf))?)?;
        let dest = ctx.group_path(Controller::CpuSet, group, Some(leaf))?;
        write_str(&dest, &parent_val)?;
    }
    Ok(())
}

/// Write `pid` to `cgroup.procs` under `cpu` and `cpuacct`, and (if cpuset is enabled) under
/// either `group`'s own cpuset directory or the reserved default cpuset group. Never writes to
/// `memory`, to preserve continuity of memory accounting across group changes.
///
/// Skips all writes if the process already cached `group` as its current attachment.
pub fn attach(ctx: &Context, group: i32, pid: u32, with_cpuset: bool) -> Result<()> {
    if ctx.cached_group() == Some(group) {
        log::trace!("attach({}, {}): already cached, skipping", group, pid);
        return Ok(());
    }

    for controller in [Controller::Cpu, Controller::CpuAcct] {
        let procs = ctx.group_path(controller, group, Some("cgroup.procs"))?;
        write_pid(&procs, pid)?;
    }

    if ctx.caps.cpuset_enabled {
        let cpuset_group = if with_cpuset { group } else { ctx.default_cpuset_group() };
        let procs = ctx.group_path(Controller::CpuSet, cpuset_group, Some("cgroup.procs"))?;
        write_pid(&procs, pid)?;
    }

    ctx.remember_attachment(group);
    Ok(())
}

/// Open `group`'s directory under `controller` and take an advisory exclusive lock.
pub fn lock(ctx: &Context, group: i32, controller: Controller, block: bool) -> Result<RawFd> {
    let dir = ctx.group_path(controller, group, None)?;
    match lock_dir(&dir, block)? {
        Some(fd) => Ok(fd),
        None => Ok(-1),
    }
}

pub fn unlock(fd: RawFd) {
    if fd >= 0 {
        path::unlock(fd);
    }
}

/// With the gpdb top-level directory already held under `held_fd`, read `group`'s pid list
/// under `controller` and re-emit each pid, one `write()` at a time, into the default group.
/// On any I/O error, `held_fd` is closed (releasing the lock) before the error is raised, so
/// so the lock is never leaked.
pub fn detach(ctx: &Context, group: i32, controller: Controller, held_fd: RawFd) -> Result<()> {
    match detach_inner(ctx, group, controller) {
        Ok(()) => Ok(()),
        Err(e) => {
            unlock(held_fd);
            Err(e)
        }
    }
}

fn detach_inner(ctx: &Context, group: i32, controller: Controller) -> Result<()> {
    let procs = ctx.group_path(controller, group, Some("cgroup.procs"))?;
    let pids = read_pid_list(&procs)?;

    let default_group = default_group_for(ctx, controller);
    let dest = ctx.group_path(controller, default_group, Some("cgroup.procs"))?;

    for pid in pids {
        if let Err(e) = write_pid(&dest, pid) {
            // Log the failing pid and continue; partial migration beats a completely wedged
            // group.
            log::warn!("detach({}): failed to migrate pid {}: {}", group, pid, e);
        }
    }
    Ok(())
}

fn default_group_for(ctx: &Context, controller: Controller) -> i32 {
    if controller == Controller::CpuSet {
        ctx.default_cpuset_group()
    } else {
        crate::types::ROOT
    }
}

/// For each controller the group spans, call `delete_dir`: optionally migrate residual
/// processes to the default group (via `detach`), then `rmdir`.
pub fn destroy(ctx: &Context, group: i32, migrate: bool) -> Result<()> {
    for controller in group_controllers(ctx) {
        delete_dir(ctx, group, controller, migrate)?;
    }
    Ok(())
}

fn delete_dir(ctx: &Context, group: i32, controller: Controller, migrate: bool) -> Result<()> {
    let dir = ctx.group_path(controller, group, None)?;
    if !dir.exists() {
        return Ok(());
    }

    if let Some(anchor) = anchor_file(controller) {
        let anchor_path = ctx.group_path(controller, group, Some(anchor))?;
        if !crate::path::can_access(&anchor_path, nix::unistd::AccessFlags::W_OK) {
            return Err(Error::with_path(ErrorKind::ConfigError, anchor_path));
        }
    }

    if migrate {
        let held_fd = lock(ctx, group, controller, true)?;
        detach(ctx, group, controller, held_fd)?;
        unlock(held_fd);
    }

    path::rmdir(&dir)?;
    log::debug!("destroy({}): removed {} directory", group, controller);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::{Context, Tunables};
    use crate::testutil::TempMount;

    fn build_context(tm: &TempMount) -> Context {
        for ctrl in ["cpu", "cpuacct", "memory", "cpuset"] {
            tm.mkdir(&format!("mount/{}/gpdb", ctrl));
        }
        tm.fixture("mount/cpu/cpu.cfs_period_us", "100000");
        tm.fixture("mount/cpu/cpu.cfs_quota_us", "-1");
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
        // DEFAULT_CPUSET pseudo-group.
        let default_cpuset_dir = format!("mount/cpuset/gpdb/{}", crate::types::DEFAULT_CPUSET);
        for leaf in ["cpuset.cpus", "cpuset.mems", "cgroup.procs"] {
            tm.fixture(&format!("{}/{}", default_cpuset_dir, leaf), "");
        }
        // ROOT's own cgroup.procs, used as the default group for cpu/cpuacct/memory detach.
        tm.fixture("mount/cpu/gpdb/cgroup.procs", "");
        tm.fixture("mount/cpuacct/gpdb/cgroup.procs", "");

        let mount = tm.root().join("mount");
        let proc_cgroup = tm.fixture(
            "proc_1_cgroup",
            "4:cpu:/\n5:cpuacct:/\n6:memory:/\n7:cpuset:/\n",
        );
        Context::build(&proc_cgroup, &mount, Tunables::default()).unwrap()
    }

    /// Real cgroupfs populates a freshly-`mkdir`'d directory's interface files synchronously in
    /// the overwhelming common case; `create()`'s 1ms poll exists only to cover the rare
    /// scheduling delay. Since our fixture is a plain tmpfs tree standing in for cgroupfs, we
    /// simulate that common case by pre-populating the files `create()` will mkdir over.
    fn prepopulate_group(tm: &TempMount, group: i32) {
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
            tm.fixture(&format!("mount/{}/gpdb/{}/{}", ctrl, group, leaf), "0");
        }
    }

    #[test]
    fn create_populates_group_under_every_enabled_controller() {
        let tm = TempMount::new("group_create");
        let ctx = build_context(&tm);
        prepopulate_group(&tm, 42);

        create(&ctx, 42).unwrap();

        for ctrl in ["cpu", "cpuacct", "memory", "cpuset"] {
            assert!(tm.root().join(format!("mount/{}/gpdb/42", ctrl)).is_dir());
        }
    }

    #[test]
    fn create_copies_parent_cpuset_into_group() {
        let tm = TempMount::new("group_create_cpuset");
        let ctx = build_context(&tm);
        prepopulate_group(&tm, 7);

        create(&ctx, 7).unwrap();

        let cpus = tm.root().join("mount/cpuset/gpdb/7/cpuset.cpus");
        assert_eq!(std::fs::read_to_string(cpus).unwrap(), "0-3");
    }

    #[test]
    fn attach_writes_cpu_and_cpuacct_but_not_memory() {
        let tm = TempMount::new("group_attach");
        let ctx = build_context(&tm);
        prepopulate_group(&tm, 42);
        create(&ctx, 42).unwrap();

        attach(&ctx, 42, 1001, true).unwrap();

        let cpu_procs = tm.root().join("mount/cpu/gpdb/42/cgroup.procs");
        assert_eq!(std::fs::read_to_string(&cpu_procs).unwrap(), "1001");
        let mem_procs = tm.root().join("mount/memory/gpdb/42/cgroup.procs");
        assert_eq!(std::fs::read_to_string(&mem_procs).unwrap(), "0");
    }

    #[test]
    fn attach_is_skipped_when_group_already_cached() {
        let tm = TempMount::new("group_attach_cached");
        let ctx = build_context(&tm);
        prepopulate_group(&tm, 42);
        create(&ctx, 42).unwrap();

        attach(&ctx, 42, 1001, true).unwrap();
        // Overwrite to prove the second attach call doesn't touch the file again.
        std::fs::write(tm.root().join("mount/cpu/gpdb/42/cgroup.procs"), "sentinel").unwrap();

        attach(&ctx, 42, 1001, true).unwrap();

        let cpu_procs = tm.root().join("mount/cpu/gpdb/42/cgroup.procs");
        assert_eq!(std::fs::read_to_string(&cpu_procs).unwrap(), "sentinel");
    }

    #[test]
    fn destroy_migrates_pids_to_default_before_removing() {
        let tm = TempMount::new("group_destroy");
        let ctx = build_context(&tm);
        prepopulate_group(&tm, 42);
        create(&ctx, 42).unwrap();
        attach(&ctx, 42, 1001, false).unwrap();

        destroy(&ctx, 42, true).unwrap();

        for ctrl in ["cpu", "cpuacct", "memory", "cpuset"] {
            assert!(!tm.root().join(format!("mount/{}/gpdb/42", ctrl)).exists());
        }
        let cpu_default_procs = std::fs::read_to_string(tm.root().join("mount/cpu/gpdb/cgroup.procs")).unwrap();
        assert_eq!(cpu_default_procs.trim(), "1001");
    }

    #[test]
    fn lock_then_unlock_round_trips() {
        let tm = TempMount::new("group_lock");
        let ctx = build_context(&tm);
        prepopulate_group(&tm, 42);
        create(&ctx, 42).unwrap();

        let fd = lock(&ctx, 42, Controller::Cpu, true).unwrap();
        assert!(fd >= 0);
        unlock(fd);
    }
}
