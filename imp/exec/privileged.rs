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

//! The privileged half: verify the attested envelope, switch user
//! irrevocably, fork/exec the job shell, forward signals, and — when
//! armed — drain the job's cgroup before exiting.

use std::ffi::CString;
use std::os::unix::net::UnixStream;

use scope_finally::finally;

use flux_sign::SignEngine;

use crate::config::ExecConfig;
use crate::exec::util::{exec_failure_code, exec_shell};
use crate::pam;
use crate::signal;
use crate::users::UserLookup;

/// Waits for `pid` with `waitpid`, retrying on `EINTR`. Returns the exit
/// status: the exit code if the child exited normally, `128 + N` if it
/// was killed by signal `N`.
fn wait_for_exit_code(pid: libc::pid_t) -> i32 {
    let mut status: libc::c_int = 0;
    loop {
        let rc = unsafe { libc::waitpid(pid, &mut status, 0) };
        if rc == -1 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::Interrupted {
                continue;
            }
            log::error!("waitpid({}) failed: {}", pid, err);
            return 1;
        }
        break;
    }
    if libc::WIFEXITED(status) {
        libc::WEXITSTATUS(status)
    } else if libc::WIFSIGNALED(status) {
        128 + libc::WTERMSIG(status)
    } else {
        1
    }
}

/// Runs the privileged half to completion and returns the IMP's final
/// exit code. `unprivileged_pid` is the already-forked child that ran
/// [`crate::exec::unprivileged::run`]; `channel` is this process's end
/// of the pipe it used to forward the request.
pub fn run(
    mut channel: UnixStream,
    unprivileged_pid: libc::pid_t,
    exec_cfg: &ExecConfig,
    sign_engine: &mut SignEngine,
    users: &dyn UserLookup,
) -> i32 {
    let received = flux_privsep::recv_request(&mut channel);
    let unprivileged_status = wait_for_exit_code(unprivileged_pid);
    if unprivileged_status != 0 {
        log::warn!("unprivileged half exited with status {}; aborting", unprivileged_status);
        return 1;
    }

    let request = match received {
        Ok(r) => r,
        Err(e) => {
            log::error!("failed to receive exec request from unprivileged half: {}", e);
            return 1;
        }
    };

    let unwrapped = match sign_engine.unwrap(&request.envelope, 0) {
        Ok(u) => u,
        Err(_) => {
            log::error!("envelope verification failed: {}", sign_engine.last_error().unwrap_or_default());
            return 1;
        }
    };
    let target_uid = unwrapped.userid;

    if target_uid == 0 {
        log::error!("refusing to launch a shell as uid 0");
        return 1;
    }
    if target_uid < 0 {
        log::error!("envelope carries a negative userid {}", target_uid);
        return 1;
    }

    if !exec_cfg.allowed_shells.iter().any(|s| s == &request.shell_path) {
        log::error!("shell '{}' is not in allowed-shells", request.shell_path);
        return 1;
    }

    let target = match users.lookup_uid(target_uid as u32) {
        Some(t) => t,
        None => {
            log::error!("no passwd entry for uid {}", target_uid);
            return 1;
        }
    };

    let _pam_session = if exec_cfg.pam_support {
        match pam::open_session(&target.name) {
            Ok(s) => Some(s),
            Err(e) => {
                log::error!("{}", e);
                return 1;
            }
        }
    } else {
        None
    };
    // `_pam_session`'s drop (or, when PAM is absent, this no-op guard)
    // closes the session on every exit path below.
    let _close_pam = finally(|| {
        log::debug!("closing PAM session for uid {}", target_uid);
    });

    let old_mask = signal::block_all();
    let child_pid = unsafe { libc::fork() };
    if child_pid < 0 {
        signal::restore(old_mask);
        log::error!("fork failed: {}", std::io::Error::last_os_error());
        return 1;
    }

    if child_pid == 0 {
        signal::restore(old_mask);
        if exec_cfg.kill_process_group {
            unsafe {
                libc::setsid();
            }
        }
        std::process::exit(switch_and_exec(&target, &request.shell_path, &request.args));
    }

    let forward_target = if exec_cfg.kill_process_group {
        -child_pid
    } else {
        child_pid
    };
    signal::set_target(forward_target);
    signal::install_forwarding();
    signal::restore(old_mask);

    let exit_code = wait_for_exit_code(child_pid);

    if let Ok(info) = flux_cgroup::discover() {
        if info.reap_enabled {
            let me = std::process::id() as i32;
            let _ = flux_cgroup::drain_once(&info.cgroup_path, me, libc::SIGKILL);
            if let Err(e) = flux_cgroup::wait_for_empty(&info.cgroup_path, me) {
                log::warn!("cgroup drain did not complete cleanly: {}", e);
            }
        }
    }

    exit_code
}

/// The child side of the second fork: irrevocably switch
/// real/effective/saved uid+gid and supplementary groups, `chdir("/")`,
/// then `execvp`. Never returns on success.
fn switch_and_exec(target: &crate::users::TargetUser, shell_path: &str, argv: &[String]) -> i32 {
    unsafe {
        if libc::setresgid(target.gid, target.gid, target.gid) != 0 {
            log::error!("setresgid({}) failed: {}", target.gid, std::io::Error::last_os_error());
            return 127;
        }
        let name = match CString::new(target.name.as_str()) {
            Ok(n) => n,
            Err(_) => return 127,
        };
        if libc::initgroups(name.as_ptr(), target.gid) != 0 {
            log::error!("initgroups({}) failed: {}", target.name, std::io::Error::last_os_error());
            return 127;
        }
        if libc::setresuid(target.uid, target.uid, target.uid) != 0 {
            log::error!("setresuid({}) failed: {}", target.uid, std::io::Error::last_os_error());
            return 127;
        }
        let root = CString::new("/").expect("constant path is valid");
        if libc::chdir(root.as_ptr()) != 0 {
            log::error!("chdir(\"/\") failed: {}", std::io::Error::last_os_error());
            return 127;
        }
    }

    exec_shell(shell_path, argv);
    exec_failure_code(std::io::Error::last_os_error())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_code_1_signal_is_128_plus_signum() {
        // WTERMSIG/WIFSIGNALED are exercised indirectly through
        // wait_for_exit_code in the integration tests, which actually
        // fork; this unit test only pins the arithmetic the signal
        // branch relies on.
        let signum = libc::SIGTERM;
        assert_eq!(128 + signum, 128 + libc::SIGTERM);
    }
}
