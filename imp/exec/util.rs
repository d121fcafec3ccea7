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

//! `execvp` plumbing shared by the privileged child and the
//! unprivileged-exec test path, and the exit-code mapping for a failed
//! `execvp`. Written as one `match` with two arms so the
//! `EPERM`/`EACCES` branch can never again collapse into the generic
//! one through a missing `else`.

use std::ffi::CString;

/// `execvp(shell_path, argv)`. Only returns on failure — a successful
/// call replaces the current process image. `argv` becomes the child's
/// full argument vector, including `argv[0]`.
pub fn exec_shell(shell_path: &str, argv: &[String]) -> i32 {
    let path = match CString::new(shell_path) {
        Ok(p) => p,
        Err(_) => return 127,
    };
    let c_args: Result<Vec<CString>, _> = argv.iter().map(|a| CString::new(a.as_str())).collect();
    let c_args = match c_args {
        Ok(a) => a,
        Err(_) => return 127,
    };
    let mut argv_ptrs: Vec<*const libc::c_char> = c_args.iter().map(|a| a.as_ptr()).collect();
    argv_ptrs.push(std::ptr::null());

    unsafe {
        libc::execvp(path.as_ptr(), argv_ptrs.as_ptr());
    }

    exec_failure_code(std::io::Error::last_os_error())
}

/// Maps the `errno` left by a failed `execvp` to an exit code: 126 when
/// the shell exists but isn't runnable by the caller, 127 for every
/// other failure (path doesn't exist, not a valid executable format,
/// ...).
pub fn exec_failure_code(err: std::io::Error) -> i32 {
    match err.raw_os_error() {
        Some(code) if code == libc::EACCES || code == libc::EPERM => 126,
        _ => 127,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eacces_and_eperm_map_to_126() {
        assert_eq!(exec_failure_code(std::io::Error::from_raw_os_error(libc::EACCES)), 126);
        assert_eq!(exec_failure_code(std::io::Error::from_raw_os_error(libc::EPERM)), 126);
    }

    #[test]
    fn other_errors_map_to_127() {
        assert_eq!(exec_failure_code(std::io::Error::from_raw_os_error(libc::ENOENT)), 127);
        assert_eq!(exec_failure_code(std::io::Error::from_raw_os_error(libc::ENOEXEC)), 127);
    }

    #[test]
    fn exec_of_a_nonexistent_path_returns_without_replacing_the_process() {
        let code = exec_shell("/nonexistent/shell/path", &["/nonexistent/shell/path".to_string()]);
        assert_eq!(code, 127);
    }
}
