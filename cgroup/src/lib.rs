// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as
// published by the Free Software Foundation, either version 3 of the
// License, or (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

//! Cgroup hierarchy discovery and the drain-based reaper.
//!
//! Detects whether the host runs cgroup v1 (legacy) or v2 (unified),
//! locates the current process's own cgroup, and — when armed — signals
//! and waits out any processes left behind in that cgroup after the job
//! shell exits. `cgroup.procs` has no inotify-style change
//! notification, so draining is a bounded polling loop, not an event
//! wait.

use std::ffi::CString;
use std::fmt;
use std::fs;
use std::io;
use std::mem;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

/// Linux magic numbers for `statfs.f_type`. Not reexported by every
/// `libc` version, so named directly here (they are kernel ABI, not
/// going to change).
const TMPFS_MAGIC: i64 = 0x0102_1994;
const CGROUP_SUPER_MAGIC: i64 = 0x0000_270f;
const CGROUP2_SUPER_MAGIC: i64 = 0x6367_7270;

#[derive(Debug)]
pub enum Error {
    Unsupported(String),
    Io(io::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Unsupported(s) => write!(f, "cgroup hierarchy not supported: {}", s),
            Error::Io(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e)
    }
}

/// What the reaper knows about the current process's cgroup.
#[derive(Debug, Clone)]
pub struct CgroupInfo {
    pub mount_dir: PathBuf,
    pub cgroup_path: PathBuf,
    pub unified: bool,
    /// Armed only when the basename of `cgroup_path` starts with
    /// `imp-shell` — the scheduler's convention for a cgroup it created
    /// specifically to bound one job shell and wants drained on exit.
    pub reap_enabled: bool,
}

fn statfs_type(path: &Path) -> io::Result<i64> {
    let c_path = CString::new(path.as_os_str().to_str().ok_or_else(|| {
        io::Error::new(io::ErrorKind::InvalidInput, "cgroup mount path is not valid UTF-8")
    })?)?;
    unsafe {
        let mut buf: libc::statfs = mem::zeroed();
        if libc::statfs(c_path.as_ptr(), &mut buf) != 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(buf.f_type as i64)
    }
}

/// Four-step discovery: unified mount, the `unified` subdirectory some
/// distros use alongside a legacy tree, then a legacy `systemd`
/// hierarchy under a tmpfs root, else failure.
pub fn discover_mount() -> Result<(PathBuf, bool), Error> {
    let root = Path::new("/sys/fs/cgroup");
    if let Ok(t) = statfs_type(root) {
        if t == CGROUP2_SUPER_MAGIC {
            return Ok((root.to_path_buf(), true));
        }
    }

    let unified = root.join("unified");
    if let Ok(t) = statfs_type(&unified) {
        if t == CGROUP2_SUPER_MAGIC {
            return Ok((unified, true));
        }
    }

    if let Ok(t) = statfs_type(root) {
        if t == TMPFS_MAGIC {
            let systemd = root.join("systemd");
            if let Ok(st) = statfs_type(&systemd) {
                if st == CGROUP_SUPER_MAGIC {
                    return Ok((systemd, false));
                }
            }
        }
    }

    Err(Error::Unsupported("neither a unified cgroup2 mount nor a legacy systemd hierarchy was found".to_string()))
}

/// Strips leading `/..` segments from a cgroup-relative path, which
/// appear when this process runs inside a container whose own cgroup
/// root has been nested one or more levels below the host's.
fn strip_leading_dotdot(relpath: &str) -> &str {
    let mut rest = relpath;
    while let Some(stripped) = rest.strip_prefix("/..") {
        rest = stripped;
    }
    rest
}

/// Parses `/proc/self/cgroup` lines of the form
/// `hierarchy:subsys:relpath`, selecting the unified line (empty
/// `subsys`) or the legacy `name=systemd` line depending on `unified`.
pub fn resolve_relpath(proc_cgroup: &str, unified: bool) -> Result<String, Error> {
    for line in proc_cgroup.lines() {
        let mut fields = line.splitn(3, ':');
        let _hierarchy = fields.next();
        let subsys = fields.next().unwrap_or("");
        let relpath = fields.next().unwrap_or("");
        let matches = if unified {
            subsys.is_empty()
        } else {
            subsys == "name=systemd"
        };
        if matches {
            return Ok(strip_leading_dotdot(relpath).to_string());
        }
    }
    Err(Error::Unsupported(format!(
        "no {} line found in /proc/self/cgroup",
        if unified {
            "unified"
        } else {
            "name=systemd"
        }
    )))
}

/// Full discovery: mount, then this process's own path within it.
pub fn discover() -> Result<CgroupInfo, Error> {
    let (mount_dir, unified) = discover_mount()?;
    let proc_cgroup = fs::read_to_string("/proc/self/cgroup")?;
    let relpath = resolve_relpath(&proc_cgroup, unified)?;
    let cgroup_path = join_relpath(&mount_dir, &relpath);
    let reap_enabled = cgroup_path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with("imp-shell"))
        .unwrap_or(false);

    Ok(CgroupInfo {
        mount_dir,
        cgroup_path,
        unified,
        reap_enabled,
    })
}

fn join_relpath(mount_dir: &Path, relpath: &str) -> PathBuf {
    let trimmed = relpath.trim_start_matches('/');
    if trimmed.is_empty() {
        mount_dir.to_path_buf()
    } else {
        mount_dir.join(trimmed)
    }
}

/// Reads `cgroup.procs` under `cgroup_path` and sends `sig` to every pid
/// other than `skip_pid` (the reaper's own pid — it always lives in the
/// same cgroup as the processes it's draining). Returns the count
/// successfully signaled; `Ok(0)` with nothing left to signal is the
/// success case `wait_for_empty` polls for. Returns an error only when
/// at least one pid was found and *every* signal send failed; a partial
/// failure is logged and the drain continues.
pub fn drain_once(cgroup_path: &Path, skip_pid: i32, sig: i32) -> Result<usize, Error> {
    let procs_path = cgroup_path.join("cgroup.procs");
    let contents = fs::read_to_string(&procs_path)?;

    let mut attempted = 0usize;
    let mut sent = 0usize;
    for line in contents.lines() {
        let pid: i32 = match line.trim().parse() {
            Ok(p) => p,
            Err(_) => continue,
        };
        if pid == skip_pid {
            continue;
        }
        attempted += 1;
        let rc = unsafe { libc::kill(pid, sig) };
        if rc == 0 {
            sent += 1;
        } else {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::NotFound {
                log::warn!("failed to signal pid {} in {}: {}", pid, cgroup_path.display(), err);
            }
        }
    }

    if attempted > 0 && sent == 0 {
        return Err(Error::Io(io::Error::new(io::ErrorKind::Other, "no process in cgroup could be signaled")));
    }
    Ok(sent)
}

/// Polls `drain_once` with `sig = 0` (a pure existence probe — no
/// process actually receives signal 0) until the cgroup is empty,
/// sleeping up to one second between probes. A short extra pause after
/// an interrupted sleep lets an in-flight reap settle before the next
/// probe, rather than busy-spinning on `EINTR`.
pub fn wait_for_empty(cgroup_path: &Path, skip_pid: i32) -> Result<(), Error> {
    loop {
        match drain_once(cgroup_path, skip_pid, 0) {
            Ok(0) => return Ok(()),
            Ok(_) => {}
            Err(_) => {}
        }
        let remaining = sleep_interruptibly(Duration::from_secs(1));
        if !remaining.is_zero() {
            thread::sleep(Duration::from_millis(50));
        }
    }
}

/// Sleeps for `dur` via `nanosleep`, returning the unslept remainder
/// (zero if the sleep ran to completion). Unlike `thread::sleep`, a raw
/// `nanosleep` surfaces `EINTR` with the remaining time in `rem` instead
/// of silently retrying, which is what lets `wait_for_empty` add its
/// short extra back-off specifically when a probe's sleep was cut short
/// by a signal (e.g. a forwarded one arriving during the drain).
fn sleep_interruptibly(dur: Duration) -> Duration {
    let req = libc::timespec {
        tv_sec: dur.as_secs() as libc::time_t,
        tv_nsec: libc::c_long::from(dur.subsec_nanos() as i32),
    };
    let mut rem: libc::timespec = unsafe { mem::zeroed() };
    let rc = unsafe { libc::nanosleep(&req, &mut rem) };
    if rc == 0 {
        Duration::from_secs(0)
    } else {
        Duration::new(rem.tv_sec.max(0) as u64, rem.tv_nsec.max(0) as u32)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sleep_interruptibly_runs_to_completion_when_uninterrupted() {
        let remaining = sleep_interruptibly(Duration::from_millis(10));
        assert_eq!(remaining, Duration::from_secs(0));
    }

    #[test]
    fn resolves_unified_line() {
        let proc_cgroup = "0::/user.slice/user-1000.slice\n";
        assert_eq!(resolve_relpath(proc_cgroup, true).unwrap(), "/user.slice/user-1000.slice");
    }

    #[test]
    fn resolves_legacy_systemd_line_among_several() {
        let proc_cgroup = "11:cpu,cpuacct:/\n4:memory:/user.slice\n1:name=systemd:/user.slice/imp-shell-42\n";
        assert_eq!(resolve_relpath(proc_cgroup, false).unwrap(), "/user.slice/imp-shell-42");
    }

    #[test]
    fn strips_nested_container_dotdot_prefix() {
        assert_eq!(strip_leading_dotdot("/..//../imp-shell-7"), "/imp-shell-7");
        assert_eq!(strip_leading_dotdot("/user.slice/imp-shell-7"), "/user.slice/imp-shell-7");
    }

    #[test]
    fn missing_hierarchy_line_is_an_error() {
        let proc_cgroup = "4:memory:/user.slice\n";
        assert!(resolve_relpath(proc_cgroup, true).is_err());
    }

    #[test]
    fn join_relpath_handles_root() {
        assert_eq!(join_relpath(Path::new("/sys/fs/cgroup"), "/"), Path::new("/sys/fs/cgroup"));
        assert_eq!(
            join_relpath(Path::new("/sys/fs/cgroup"), "/imp-shell-1"),
            Path::new("/sys/fs/cgroup/imp-shell-1")
        );
    }

    #[test]
    fn reap_enabled_only_for_imp_shell_prefixed_basename() {
        let info = CgroupInfo {
            mount_dir: PathBuf::from("/sys/fs/cgroup"),
            cgroup_path: PathBuf::from("/sys/fs/cgroup/imp-shell-99"),
            unified: true,
            reap_enabled: true,
        };
        assert!(info.reap_enabled);

        let other = CgroupInfo {
            cgroup_path: PathBuf::from("/sys/fs/cgroup/user.slice"),
            reap_enabled: false,
            ..info
        };
        assert!(!other.reap_enabled);
    }

    #[test]
    fn drain_once_on_a_cgroup_procs_file_with_only_self_signals_nobody() {
        let tmp = std::env::temp_dir().join(format!("flux-cgroup-test-{}", std::process::id()));
        fs::create_dir_all(&tmp).unwrap();
        let me = std::process::id() as i32;
        fs::write(tmp.join("cgroup.procs"), format!("{}\n", me)).unwrap();

        let sent = drain_once(&tmp, me, 0).unwrap();
        assert_eq!(sent, 0);

        fs::remove_dir_all(&tmp).ok();
    }
}
