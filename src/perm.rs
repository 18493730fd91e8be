//! The declarative permission matrix: which interface files must be accessible, under which
//! controller, with which access bits, before this backend can trust a group directory.

use nix::unistd::AccessFlags;

use crate::discovery::ControllerDirs;
use crate::error::{Error, ErrorKind, Result};
use crate::path::{build_path_safe, can_access};
use crate::types::{BaseDir, Capabilities, Controller};

/// One `(controller, leaf, required access bits)` tuple.
#[derive(Debug, Clone, Copy)]
pub struct PermItem {
    pub controller: Controller,
    pub leaf: &'static str,
    pub mode: AccessFlags,
}

/// A named group of permission items, mandatory unless it is the designated optional-capability
/// list for one of `memory`, `swap` or `cpuset`.
#[derive(Debug, Clone, Copy)]
pub struct PermList {
    pub name: &'static str,
    pub items: &'static [PermItem],
    pub optional: Optionality,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Optionality {
    Mandatory,
    /// Clearing this list only clears a capability flag; it never raises in report mode.
    OptionalCapability,
}

const RW: AccessFlags = AccessFlags::R_OK.union(AccessFlags::W_OK);

static CPU_ITEMS: &[PermItem] = &[
    PermItem { controller: Controller::Cpu, leaf: "cpu.shares", mode: RW },
    PermItem { controller: Controller::Cpu, leaf: "cpu.cfs_period_us", mode: RW },
    PermItem { controller: Controller::Cpu, leaf: "cpu.cfs_quota_us", mode: RW },
    PermItem { controller: Controller::Cpu, leaf: "cgroup.procs", mode: RW },
];

static CPUACCT_ITEMS: &[PermItem] = &[
    PermItem { controller: Controller::CpuAcct, leaf: "cpuacct.usage", mode: AccessFlags::R_OK },
    PermItem { controller: Controller::CpuAcct, leaf: "cgroup.procs", mode: RW },
];

static MEMORY_ITEMS: &[PermItem] = &[
    PermItem { controller: Controller::Memory, leaf: "memory.limit_in_bytes", mode: RW },
    PermItem { controller: Controller::Memory, leaf: "memory.usage_in_bytes", mode: AccessFlags::R_OK },
    PermItem { controller: Controller::Memory, leaf: "cgroup.procs", mode: RW },
];

static SWAP_ITEMS: &[PermItem] = &[
    PermItem { controller: Controller::Memory, leaf: "memory.memsw.limit_in_bytes", mode: RW },
    PermItem { controller: Controller::Memory, leaf: "memory.memsw.usage_in_bytes", mode: AccessFlags::R_OK },
];

static CPUSET_ITEMS: &[PermItem] = &[
    PermItem { controller: Controller::CpuSet, leaf: "cpuset.cpus", mode: RW },
    PermItem { controller: Controller::CpuSet, leaf: "cpuset.mems", mode: RW },
    PermItem { controller: Controller::CpuSet, leaf: "cgroup.procs", mode: RW },
];

/// Whether `memory` and `cpuset` are mandatory (current kernels) or merely optional
/// capabilities (legacy 5.x). Fixed at compile time via the `legacy-kernel` feature.
#[cfg(not(feature = "legacy-kernel"))]
const MEMORY_CPUSET_MANDATORY: bool = true;
#[cfg(feature = "legacy-kernel")]
const MEMORY_CPUSET_MANDATORY: bool = false;

fn memory_cpuset_optionality() -> Optionality {
    if MEMORY_CPUSET_MANDATORY {
        Optionality::Mandatory
    } else {
        Optionality::OptionalCapability
    }
}

fn perm_lists() -> [PermList; 5] {
    [
        PermList { name: "cpu", items: CPU_ITEMS, optional: Optionality::Mandatory },
        PermList { name: "cpuacct", items: CPUACCT_ITEMS, optional: Optionality::Mandatory },
        PermList { name: "memory", items: MEMORY_ITEMS, optional: memory_cpuset_optionality() },
        PermList { name: "swap", items: SWAP_ITEMS, optional: Optionality::OptionalCapability },
        PermList { name: "cpuset", items: CPUSET_ITEMS, optional: memory_cpuset_optionality() },
    ]
}

fn list_satisfied(list: &PermList, dirs: &ControllerDirs, base: BaseDir, group: Option<i32>) -> bool {
    for item in list.items {
        let mount = match dirs.get(&item.controller) {
            Some(m) => m,
            None => return false,
        };
        let path = match build_path_safe(mount, base, group, Some(item.leaf)) {
            Some(p) => p,
            None => return false,
        };
        if !can_access(&path, item.mode) {
            log::debug!(
                "permission_check: {} missing/inaccessible in list {}",
                path.display(),
                list.name
            );
            return false;
        }
    }
    true
}

/// Scan every permission list against `dirs`/`base`/`group`.
///
/// When `report` is true, any mandatory list that fails raises `ConfigError`. When `report` is
/// false, a failing mandatory list simply makes the overall result `false` (used as a readiness
/// probe while a freshly-created group's interface files are still being populated). A failing
/// optional list always just clears the corresponding capability flag in `caps`, regardless of
/// `report`.
///
/// Must be called once at root (`group = None`, `report = true`) to stamp `caps`; may be
/// called per-group (`report = false`) afterwards as a readiness probe.
pub fn permission_check(
    dirs: &ControllerDirs,
    base: BaseDir,
    group: Option<i32>,
    caps: &mut Capabilities,
    report: bool,
) -> Result<bool> {
    let mut all_mandatory_ok = true;

    for list in &perm_lists() {
        let ok = list_satisfied(list, dirs, base, group);
        if matches!(list.name, "memory" | "swap" | "cpuset") {
            set_capability(caps, list.name, ok);
        }
        if list.optional == Optionality::Mandatory && !ok {
            all_mandatory_ok = false;
            if report {
                log::warn!("permission_check: mandatory list '{}' unsatisfied", list.name);
                return Err(Error::new(ErrorKind::ConfigError));
            }
        }
    }

    Ok(all_mandatory_ok)
}

fn set_capability(caps: &mut Capabilities, list_name: &str, ok: bool) {
    match list_name {
        "memory" => caps.memory_enabled = ok,
        "swap" => caps.swap_enabled = ok,
        "cpuset" => caps.cpuset_enabled = ok,
        _ => unreachable!("optional list {} has no capability flag", list_name),
    }
}
