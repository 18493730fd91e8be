//! System probe: host core count, parent CFS period/quota, overcommit ratio, total RAM/swap,
//! and the effective totals once container limits are accounted for.

use std::path::Path;

use crate::discovery::ControllerDirs;
use crate::error::Result;
use crate::path::{build_path, read_i64};
use crate::types::{BaseDir, CfsCalibration, Controller, SystemInfo};

/// Number of logical cores visible to this process (`sysconf(_SC_NPROCESSORS_ONLN)`).
pub fn ncores() -> u32 {
    let n = unsafe { libc::sysconf(libc::_SC_NPROCESSORS_ONLN) };
    if n < 1 {
        1
    } else {
        n as u32
    }
}

/// Populate the immutable `SystemInfo` record. Called once during postmaster init.
pub fn probe_system_info() -> SystemInfo {
    SystemInfo { ncores: ncores() }
}

/// Read the parent sub-tree's `cpu.cfs_period_us` and `cpu.cfs_quota_us`, and calibrate the
/// system-wide quota (`period * ncores`) against them.
///
/// Some kernels ship `cpu.cfs_period_us = 0`, which is nonsensical; when observed, this is
/// treated as the kernel default of 100000us rather than propagated. It is unclear whether
/// current kernels still exhibit this, but the defensive read stays.
pub fn calibrate_cfs(dirs: &ControllerDirs, ncores: u32) -> Result<CfsCalibration> {
    let cpu_dir = dirs.get(&Controller::Cpu).expect("cpu controller must be discovered");
    let period_path = build_path(cpu_dir, BaseDir::Parent, None, Some("cpu.cfs_period_us"))?;
    let mut period_us = read_i64(&period_path)?;
    if period_us == 0 {
        log::debug!("calibrate_cfs: cpu.cfs_period_us read as 0, treating as kernel default 100000");
        period_us = 100_000;
    }

    let quota_path = build_path(cpu_dir, BaseDir::Parent, None, Some("cpu.cfs_quota_us"))?;
    let parent_cfs_quota_us = read_i64(&quota_path)?;

    Ok(CfsCalibration {
        system_cfs_quota_us: period_us * ncores as i64,
        parent_cfs_quota_us,
        period_us,
    })
}

/// `/proc/sys/vm/overcommit_ratio`, as a percentage (e.g. `50`).
pub fn read_overcommit_ratio(proc_path: &Path) -> Result<i64> {
    read_i64(proc_path)
}

/// Host total RAM and swap, in bytes, via `sysinfo(2)`.
pub fn host_mem_and_swap() -> (u64, u64) {
    let mut info: libc::sysinfo = unsafe { std::mem::zeroed() };
    let rc = unsafe { libc::sysinfo(&mut info) };
    if rc != 0 {
        log::warn!("sysinfo(2) failed; reporting zero RAM/swap");
        return (0, 0);
    }
    let unit = info.mem_unit as u64;
    (info.totalram as u64 * unit, info.totalswap as u64 * unit)
}
