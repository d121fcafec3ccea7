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

//! Top-level wiring of the exec pipeline: decides whether this
//! invocation is running setuid (a privileged parent is available) or
//! in unprivileged-exec test mode, forks accordingly, and dispatches to
//! [`unprivileged::run`] / [`privileged::run`].

pub mod privileged;
pub mod unprivileged;
pub mod util;

use flux_privsep::channel_pair;
use flux_sign::SignEngine;

use crate::config::LoadedConfig;
use crate::users::SystemUsers;

/// True when this process has root privilege available beyond its own
/// real uid — i.e. it was invoked setuid-root (or directly as root) and
/// there is a privileged half worth forking off. When real and
/// effective uid are identical there is nothing to separate: every
/// check still applies, but there is no second, more-trusted process to
/// hand off to.
fn have_privileged_parent() -> bool {
    let euid = unsafe { libc::geteuid() };
    let ruid = unsafe { libc::getuid() };
    euid == 0 && ruid != 0
}

pub fn run(shell_path: &str, args: &[String], config: LoadedConfig) -> i32 {
    let users = SystemUsers;
    let caller_uid = unsafe { libc::getuid() };

    if !have_privileged_parent() {
        return match unprivileged::run(shell_path, args, &config.exec, &users, caller_uid, None) {
            unprivileged::Outcome::Exit(code) => code,
            unprivileged::Outcome::Forwarded => unreachable!("unprivileged::run never forwards without a channel"),
        };
    }

    let (mut parent_end, mut child_end) = match channel_pair() {
        Ok(pair) => pair,
        Err(e) => {
            log::error!("failed to create privsep channel: {}", e);
            return 1;
        }
    };

    let pid = unsafe { libc::fork() };
    if pid < 0 {
        log::error!("fork failed: {}", std::io::Error::last_os_error());
        return 1;
    }

    if pid == 0 {
        drop(parent_end);
        drop_privileges_to_real_ids();
        let exit_code = match unprivileged::run(shell_path, args, &config.exec, &users, caller_uid, Some(&mut child_end)) {
            unprivileged::Outcome::Forwarded => 0,
            unprivileged::Outcome::Exit(code) => code,
        };
        std::process::exit(exit_code);
    }

    drop(child_end);
    let mut sign_engine = SignEngine::new(config.sign);
    privileged::run(parent_end, pid, &config.exec, &mut sign_engine, &users)
}

/// The unprivileged half must actually run as the caller, not merely
/// believe it does: this drops the effective uid/gid down to the real
/// ones inherited from the setuid-invoking caller, so a bug in its
/// input handling can't accidentally touch anything root-owned.
fn drop_privileges_to_real_ids() {
    unsafe {
        let ruid = libc::getuid();
        let rgid = libc::getgid();
        if libc::setresgid(rgid, rgid, rgid) != 0 || libc::setresuid(ruid, ruid, ruid) != 0 {
            log::error!("failed to drop privileges in unprivileged half: {}", std::io::Error::last_os_error());
            std::process::exit(1);
        }
    }
}
