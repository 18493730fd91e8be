//! Limit engine: translate database-visible units (percentages, vmem chunks) to and from
//! kernel-interface units (shares, microseconds, bytes), and read back usage.

use crate::context::Context;
use crate::error::Result;
use crate::group::{lock, unlock};
use crate::path::{read_i64, read_str, write_i64, write_str};
use crate::types::{CfsCalibration, Controller, CHUNK_SIZE_BYTES};

fn bytes_to_chunks(bytes: i64) -> i64 {
    bytes / CHUNK_SIZE_BYTES
}

fn chunks_to_bytes(chunks: i64) -> i64 {
    chunks * CHUNK_SIZE_BYTES
}

/// Set the gpdb sub-tree's own `cpu.cfs_quota_us` from the parent's calibration, and its
/// `cpu.shares` from the parent's, scaled by `cpu_priority`. Every group's limits are later
/// expressed relative to these two gpdb-level values.
pub fn init_cpu(ctx: &Context) -> Result<()> {
    let quota = if ctx.cfs.parent_is_bounded() {
        (ctx.cfs.parent_cfs_quota_us as f64 * ctx.tunables.cpu_limit) as i64
    } else {
        (ctx.cfs.system_cfs_quota_us as f64 * ctx.tunables.cpu_limit) as i64
    };
    write_i64(&ctx.group_path(Controller::Cpu, crate::types::ROOT, Some("cpu.cfs_quota_us"))?, quota)?;

    let parent_shares = read_i64(&ctx.parent_path(Controller::Cpu, Some("cpu.shares"))?)?;
    let shares = parent_shares * ctx.tunables.cpu_priority as i64;
    write_i64(&ctx.group_path(Controller::Cpu, crate::types::ROOT, Some("cpu.shares"))?, shares)?;

    log::debug!("init_cpu: gpdb cfs_quota_us={} shares={}", quota, shares);
    Ok(())
}

/// Copy `cpuset.mems`/`cpuset.cpus` from the parent sub-tree into the gpdb sub-tree, then
/// apply the same values to the reserved default cpuset group.
pub fn init_cpuset(ctx: &Context) -> Result<()> {
    for leaf in ["cpuset.mems", "cpuset.cpus"] {
        let parent_val = read_str(&ctx.parent_path(Controller::CpuSet, Some(leaf))?)?;
        write_str(&ctx.group_path(Controller::CpuSet, crate::types::ROOT, Some(leaf))?, &parent_val)?;
        write_str(
            &ctx.group_path(Controller::CpuSet, ctx.default_cpuset_group(), Some(leaf))?,
            &parent_val,
        )?;
    }
    Ok(())
}

/// `group.cpu.shares := gpdb.cpu.shares * rate / 100`. When ceiling enforcement is enabled,
/// also bound `group.cpu.cfs_quota_us`; otherwise it is left (or set) unlimited.
pub fn set_cpu_limit(ctx: &Context, group: i32, rate: f64) -> Result<()> {
    let gpdb_shares = read_i64(&ctx.group_path(Controller::Cpu, crate::types::ROOT, Some("cpu.shares"))?)?;
    let shares = (gpdb_shares as f64 * rate / 100.0) as i64;
    write_i64(&ctx.group_path(Controller::Cpu, group, Some("cpu.shares"))?, shares)?;

    let quota: i64 = if ctx.tunables.cpu_ceiling_enforcement {
        ((ctx.cfs.period_us * ctx.system.ncores as i64) as f64 * rate / 100.0) as i64
    } else {
        -1
    };
    write_i64(&ctx.group_path(Controller::Cpu, group, Some("cpu.cfs_quota_us"))?, quota)?;
    Ok(())
}

/// Raise or lower `memory.limit_in_bytes`/`memory.memsw.limit_in_bytes` together, respecting
/// the kernel's `limit <= memsw` invariant at every intermediate state.
pub fn set_memory_limit_by_chunks(ctx: &Context, group: i32, chunks: i64) -> Result<()> {
    if !ctx.caps.memory_enabled {
        return Ok(());
    }
    let new_bytes = chunks_to_bytes(chunks);
    let limit_path = ctx.group_path(Controller::Memory, group, Some("memory.limit_in_bytes"))?;

    if !ctx.caps.swap_enabled {
        write_i64(&limit_path, new_bytes)?;
        return Ok(());
    }

    let memsw_path = ctx.group_path(Controller::Memory, group, Some("memory.memsw.limit_in_bytes"))?;
    let old_bytes = read_i64(&limit_path)?;

    if new_bytes == old_bytes {
        return Ok(());
    } else if new_bytes > old_bytes {
        log::debug!("set_memory_limit_by_chunks({}): raising {} -> {}, memsw first", group, old_bytes, new_bytes);
        write_i64(&memsw_path, new_bytes)?;
        write_i64(&limit_path, new_bytes)?;
    } else {
        log::debug!("set_memory_limit_by_chunks({}): lowering {} -> {}, memory first", group, old_bytes, new_bytes);
        write_i64(&limit_path, new_bytes)?;
        write_i64(&memsw_path, new_bytes)?;
    }
    Ok(())
}

/// Compute the target chunk count from `rate` and the configured vmem budget, then apply it
/// under the group's memory-controller lock so concurrent recomputation can't interleave.
pub fn set_memory_limit(ctx: &Context, group: i32, rate: f64) -> Result<()> {
    let target_chunks = (ctx.tunables.vmem_limit_chunks as f64 * rate / 100.0
        * ctx.tunables.primary_segment_count as f64) as i64;

    let fd = lock(ctx, group, Controller::Memory, true)?;
    let result = set_memory_limit_by_chunks(ctx, group, target_chunks);
    unlock(fd);
    result
}

/// Cumulative CPU time consumed by the group's tasks, in nanoseconds.
pub fn get_cpu_usage(ctx: &Context, group: i32) -> Result<i64> {
    read_i64(&ctx.group_path(Controller::CpuAcct, group, Some("cpuacct.usage"))?)
}

/// Convert a `cpuacct.usage` delta over `duration_us` into a percentage of total system CPU
/// capacity, rescaled against the parent sub-tree's own quota when it is itself bounded.
pub fn convert_cpu_usage(usage_ns: i64, duration_us: i64, ncores: u32, cfs: &CfsCalibration) -> f64 {
    let mut percent = usage_ns as f64 / 10.0 / duration_us as f64 / ncores as f64;
    if cfs.parent_is_bounded() {
        let rescale = cfs.system_cfs_quota_us as f64 / cfs.parent_cfs_quota_us as f64;
        log::trace!("convert_cpu_usage: rescaling by {}", rescale);
        percent *= rescale;
    }
    percent
}

/// Memory usage in chunks: `memory.memsw.usage_in_bytes` when swap is enabled, else
/// `memory.usage_in_bytes`.
pub fn get_memory_usage(ctx: &Context, group: i32) -> Result<i64> {
    let leaf = if ctx.caps.swap_enabled { "memory.memsw.usage_in_bytes" } else { "memory.usage_in_bytes" };
    let bytes = read_i64(&ctx.group_path(Controller::Memory, group, Some(leaf))?)?;
    Ok(bytes_to_chunks(bytes))
}

/// `memory.limit_in_bytes` in chunks, or `i32::MAX` when the memory controller is disabled.
pub fn get_memory_limit_chunks(ctx: &Context, group: i32) -> Result<i64> {
    if !ctx.caps.memory_enabled {
        return Ok(i32::MAX as i64);
    }
    let bytes = read_i64(&ctx.group_path(Controller::Memory, group, Some("memory.limit_in_bytes"))?)?;
    Ok(bytes_to_chunks(bytes))
}

/// Host-wide usable memory in MiB, accounting for swap, overcommit ratio, and any cgroup-level
/// memory/memsw ceiling already imposed on this process's own sub-tree.
pub fn get_total_memory(ctx: &Context, overcommit_ratio: i64) -> Result<u64> {
    let (ram, swap) = crate::probe::host_mem_and_swap();
    let overcommit_total = swap + ram * overcommit_ratio as u64 / 100;

    let mut ram = ram;
    let mut swap = swap;
    if ctx.caps.memory_enabled {
        let mem_limit = read_i64(&ctx.parent_path(Controller::Memory, Some("memory.limit_in_bytes"))?)? as u64;
        ram = ram.min(mem_limit);
        if ctx.caps.swap_enabled {
            let memsw_limit =
                read_i64(&ctx.parent_path(Controller::Memory, Some("memory.memsw.limit_in_bytes"))?)? as u64;
            if memsw_limit < ram + swap {
                swap = memsw_limit.saturating_sub(ram);
            }
        }
    }

    Ok(overcommit_total.min(ram + swap) >> 20)
}

/// Bounded read of `cpuset.cpus`.
pub fn get_cpuset(ctx: &Context, group: i32) -> Result<String> {
    read_str(&ctx.group_path(Controller::CpuSet, group, Some("cpuset.cpus"))?)
}

/// Bounded write of `cpuset.cpus`; validation of the list syntax is left to the kernel.
pub fn set_cpuset(ctx: &Context, group: i32, value: &str) -> Result<()> {
    write_str(&ctx.group_path(Controller::CpuSet, group, Some("cpuset.cpus"))?, value)
}
