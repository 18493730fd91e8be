//! The closed data model shared by every other module: controller identifiers, the reserved
//! group-id sentinels, the base-directory selector and the process-wide state produced once
//! during discovery and never mutated afterwards.

use std::fmt;

/// Upper bound on a built path; mirrors the kernel's own `PATH_MAX`.
pub const MAX_PATH: usize = 4096;

/// Upper bound on a `cpuset.cpus` / `cpuset.mems` mask we will read or write.
pub const MAX_CPUSET_LENGTH: usize = 4096;

/// How many times `create()` polls a freshly-`mkdir`'d group for populated interface files.
pub const MAX_RETRY: u32 = 100;

/// Compile-time fallback sub-path used when discovery via `/proc/1/cgroup` fails or a
/// hierarchy invariant is violated. All controllers fall back together, never partially.
pub const BASEDIR_GPDB: &str = "gpdb";

/// The gpdb sub-tree itself; not a database-allocated group.
pub const ROOT: i32 = 0;

/// Pseudo-group receiving processes whose resource group has no explicit cpuset binding.
pub const DEFAULT_CPUSET: i32 = -1;

/// Reserved group for the postmaster and auxiliary processes.
pub const SYSTEM: i32 = -2;

/// Size in bytes of one vmem accounting chunk, the database's native memory-limit unit.
pub const CHUNK_SIZE_BYTES: i64 = 1024 * 1024;

/// A closed enumeration of the controllers this backend understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Controller {
    Cpu,
    CpuAcct,
    CpuSet,
    Memory,
    /// Never produced by discovery; used as a parse-error sentinel.
    Unknown,
}

impl Controller {
    /// The canonical lower-case name, matching the kernel's own subsystem name.
    pub fn name(self) -> &'static str {
        match self {
            Controller::Cpu => "cpu",
            Controller::CpuAcct => "cpuacct",
            Controller::CpuSet => "cpuset",
            Controller::Memory => "memory",
            Controller::Unknown => "unknown",
        }
    }

    /// Recognize a controller token from a `/proc/1/cgroup` line, after a `name=` prefix (if
    /// any) has already been stripped.
    pub fn from_name(name: &str) -> Controller {
        match name {
            "cpu" => Controller::Cpu,
            "cpuacct" => Controller::CpuAcct,
            "cpuset" => Controller::CpuSet,
            "memory" => Controller::Memory,
            _ => Controller::Unknown,
        }
    }

    /// The four controllers this backend manages, in the order `create`/`destroy` act on them.
    pub const ALL: [Controller; 4] = [
        Controller::Cpu,
        Controller::CpuAcct,
        Controller::CpuSet,
        Controller::Memory,
    ];
}

impl fmt::Display for Controller {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Which level of the hierarchy a built path should address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseDir {
    /// The controller's mount point directly (the parent sub-tree).
    Parent,
    /// The gpdb sub-tree under which all managed groups live.
    Gpdb,
}

/// Process-wide capability flags stamped once by the permission scan and immutable for the
/// remainder of the process lifetime.
#[derive(Debug, Clone, Copy, Default)]
pub struct Capabilities {
    pub memory_enabled: bool,
    pub swap_enabled: bool,
    pub cpuset_enabled: bool,
}

/// Host facts populated once during probe and immutable afterwards.
#[derive(Debug, Clone, Copy)]
pub struct SystemInfo {
    pub ncores: u32,
}

/// CFS calibration pair: what the whole system could offer versus what the parent sub-tree is
/// actually bounded to.
#[derive(Debug, Clone, Copy)]
pub struct CfsCalibration {
    /// `period_us * ncores`: the system-wide ceiling were the parent unbounded.
    pub system_cfs_quota_us: i64,
    /// The parent's own `cpu.cfs_quota_us`; `-1` means "unlimited".
    pub parent_cfs_quota_us: i64,
    /// The CFS period in effect, in microseconds (normally 100000).
    pub period_us: i64,
}

impl CfsCalibration {
    /// Whether the parent sub-tree itself is CPU-bandwidth bounded.
    pub fn parent_is_bounded(&self) -> bool {
        self.parent_cfs_quota_us > 0
    }
}
