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

//! Signal blocking/unblocking across `fork`, and forwarding of a fixed
//! signal set to whatever pid the privileged parent currently owns.
//!
//! Only one exec pipeline is ever in flight per process, so a single
//! process-wide cell for the forwarding target is sufficient — no
//! registry, no per-signal state.

use std::mem;
use std::sync::atomic::{AtomicI32, Ordering};

/// The signals a job shell's controlling session expects forwarded.
/// Each gets its own `sigaction` registration sharing one handler and
/// one target cell.
pub const FORWARDED: &[libc::c_int] = &[
    libc::SIGTERM,
    libc::SIGINT,
    libc::SIGHUP,
    libc::SIGCONT,
    libc::SIGALRM,
    libc::SIGWINCH,
    libc::SIGTTIN,
    libc::SIGTTOU,
];

static TARGET_PID: AtomicI32 = AtomicI32::new(0);

/// Sets the pid (or, for a forwarded process group, `-pid`) that
/// `FORWARDED` signals are relayed to. Call before installing handlers
/// so a signal arriving the instant after registration still has
/// somewhere to go.
pub fn set_target(pid: i32) {
    TARGET_PID.store(pid, Ordering::SeqCst);
}

extern "C" fn forward(sig: libc::c_int) {
    let pid = TARGET_PID.load(Ordering::SeqCst);
    if pid != 0 {
        unsafe {
            libc::kill(pid, sig);
        }
    }
}

/// Registers `forward` for every signal in `FORWARDED`. Idempotent; the
/// parent calls this exactly once, after the second fork.
pub fn install_forwarding() {
    for &sig in FORWARDED {
        unsafe {
            let mut action: libc::sigaction = mem::zeroed();
            action.sa_sigaction = forward as usize;
            libc::sigemptyset(&mut action.sa_mask);
            action.sa_flags = libc::SA_RESTART;
            if libc::sigaction(sig, &action, std::ptr::null_mut()) != 0 {
                log::error!("failed to install forwarding handler for signal {}: {}", sig, std::io::Error::last_os_error());
            }
        }
    }
}

/// Blocks every signal for the calling thread, returning the previous
/// mask so it can be restored later. Called before `fork` so both the
/// resulting parent and child start out with everything blocked — no
/// signal can be delivered to either before they are ready for it.
pub fn block_all() -> libc::sigset_t {
    unsafe {
        let mut full: libc::sigset_t = mem::zeroed();
        libc::sigfillset(&mut full);
        let mut old: libc::sigset_t = mem::zeroed();
        libc::pthread_sigmask(libc::SIG_SETMASK, &full, &mut old);
        old
    }
}

/// Restores a mask previously returned by `block_all`.
pub fn restore(mask: libc::sigset_t) {
    unsafe {
        libc::pthread_sigmask(libc::SIG_SETMASK, &mask, std::ptr::null_mut());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_target_round_trips_through_the_atomic_cell() {
        set_target(4242);
        assert_eq!(TARGET_PID.load(Ordering::SeqCst), 4242);
        set_target(-4242);
        assert_eq!(TARGET_PID.load(Ordering::SeqCst), -4242);
        set_target(0);
    }

    #[test]
    fn block_all_and_restore_do_not_panic() {
        let old = block_all();
        restore(old);
    }
}
