//! Controller discovery: parse `/proc/1/cgroup`, locate each required controller's mount/
//! sub-path, and decide between the discovered layout and the compile-time fallback.

use std::collections::HashMap;
use std::io::BufRead;
use std::path::{Path, PathBuf};

use nix::unistd::AccessFlags;

use crate::error::{Error, ErrorKind, Result};
use crate::path::can_access;
use crate::types::{Controller, BASEDIR_GPDB};

/// A mapping from controller identifier to the absolute filesystem path prefix (mount point
/// plus discovered sub-path) that `build_path` is constructed relative to.
pub type ControllerDirs = HashMap<Controller, PathBuf>;

/// One line of `/proc/1/cgroup`: `hierarchyId:comma_separated_controllers:path`.
struct CgroupLine {
    hierarchy_id: u32,
    controllers: Vec<String>,
    path: String,
}

fn parse_line(line: &str) -> Option<CgroupLine> {
    let mut parts = line.splitn(3, ':');
    let hierarchy_id: u32 = parts.next()?.parse().ok()?;
    let controllers_field = parts.next()?;
    let path = parts.next()?.to_string();

    if controllers_field.is_empty() {
        return None;
    }

    let controllers = controllers_field
        .split(',')
        .map(|c| c.strip_prefix("name=").unwrap_or(c).to_string())
        .collect();

    Some(CgroupLine {
        hierarchy_id,
        controllers,
        path,
    })
}

fn parse_cgroup_file(path: &Path) -> Result<Vec<CgroupLine>> {
    let file =
        std::fs::File::open(path).map_err(|e| Error::with_path_cause(ErrorKind::IOError, path, e))?;
    let reader = std::io::BufReader::new(file);
    let mut lines = Vec::new();
    for line in reader.lines() {
        let line = line.map_err(|e| Error::with_path_cause(ErrorKind::IOError, path, e))?;
        if let Some(parsed) = parse_line(&line) {
            lines.push(parsed);
        }
        // An overlong line that failed to parse is treated the same as a missing entry: it
        // simply contributes nothing, so the controller it would have named is later found
        // "not present exactly once" and discovery falls back.
    }
    Ok(lines)
}

/// Normalize the per-hierarchy cgroup path the kernel reports: `"/"` collapses to `""` so it
/// can be joined onto a mount point without producing a doubled separator.
fn normalize_subpath(p: &str) -> String {
    if p == "/" {
        String::new()
    } else {
        p.trim_start_matches('/').to_string()
    }
}

/// Discover the controller directory table by parsing `/proc/1/cgroup`, validating each
/// candidate sub-path exists and is accessible, and falling back to `BASEDIR_GPDB` under the
/// given mount point, all-or-nothing, if any required controller fails to resolve cleanly.
pub fn discover(proc_cgroup_path: &Path, mount: &Path, required: &[Controller]) -> ControllerDirs {
    match try_discover(proc_cgroup_path, mount, required) {
        Some(dirs) => dirs,
        None => fallback(mount, required),
    }
}

fn try_discover(
    proc_cgroup_path: &Path,
    mount: &Path,
    required: &[Controller],
) -> Option<ControllerDirs> {
    let lines = match parse_cgroup_file(proc_cgroup_path) {
        Ok(l) => l,
        Err(e) => {
            log::warn!(
                "discovery: failed to read {}: {}; falling back to {}",
                proc_cgroup_path.display(),
                e,
                BASEDIR_GPDB
            );
            return None;
        }
    };

    let mut found: HashMap<Controller, String> = HashMap::new();
    let mut seen_count: HashMap<Controller, u32> = HashMap::new();

    for line in &lines {
        for name in &line.controllers {
            let ctrl = Controller::from_name(name);
            if ctrl == Controller::Unknown {
                continue;
            }
            *seen_count.entry(ctrl).or_insert(0) += 1;
            found.insert(ctrl, normalize_subpath(&line.path));
        }
    }

    let mut dirs = ControllerDirs::new();
    for &ctrl in required {
        let count = *seen_count.get(&ctrl).unwrap_or(&0);
        if count != 1 {
            log::warn!(
                "discovery: controller {} seen {} time(s) across hierarchies; falling back to {}",
                ctrl,
                count,
                BASEDIR_GPDB
            );
            return None;
        }
        let subpath = found.get(&ctrl).unwrap();
        let mut dir = mount.join(ctrl.name());
        if !subpath.is_empty() {
            dir.push(subpath);
        }
        if !dir.exists() || !can_access(&dir, AccessFlags::F_OK | AccessFlags::R_OK) {
            log::warn!(
                "discovery: candidate path {} for {} failed basic probe; falling back to {}",
                dir.display(),
                ctrl,
                BASEDIR_GPDB
            );
            return None;
        }
        dirs.insert(ctrl, dir);
    }

    Some(dirs)
}

/// All-or-nothing fallback: every required controller gets `<mount>/<controller>/BASEDIR_GPDB`.
fn fallback(mount: &Path, required: &[Controller]) -> ControllerDirs {
    required
        .iter()
        .map(|&ctrl| (ctrl, mount.join(ctrl.name())))
        .collect()
}

/// Re-read `/proc/1/cgroup` and fail if `cpu` and `cpuset` share a hierarchy id. Attaching a
/// pid to the default cpuset group would otherwise move it out of the cpu group, silently
/// dropping enforcement.
pub fn check_hierarchy(proc_cgroup_path: &Path) -> Result<()> {
    let lines = parse_cgroup_file(proc_cgroup_path)?;

    for line in &lines {
        let has_cpu = line
            .controllers
            .iter()
            .any(|c| Controller::from_name(c) == Controller::Cpu);
        let has_cpuset = line
            .controllers
            .iter()
            .any(|c| Controller::from_name(c) == Controller::CpuSet);
        if has_cpu && has_cpuset {
            log::warn!(
                "check_hierarchy: cpu and cpuset co-mounted on hierarchy {}",
                line.hierarchy_id
            );
            return Err(Error::new(ErrorKind::ConfigError));
        }
    }
    Ok(())
}
