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

//! The unprivileged half of the exec pipeline: collect the launch
//! request, check it against policy, and either hand it to the
//! privileged half over the privsep channel or — only in the
//! explicitly-configured unprivileged-exec test mode — exec the shell
//! directly under the caller's own identity.

use std::env;
use std::io::{self, Read};
use std::os::unix::net::UnixStream;
use std::process::{Command, Stdio};

use serde_derive::Deserialize;

use flux_privsep::ExecRequest;

use crate::config::ExecConfig;
use crate::exec::util::exec_shell;
use crate::users::{caller_is_allowed, UserLookup};

/// The JSON object read from stdin (or the exec helper's stdout): just
/// the attested envelope. `shell_path`/`args` come from argv, not from
/// this input, so a caller cannot smuggle a different shell in through
/// the JSON the way it could if the whole `ExecRequest` were read back.
#[derive(Debug, Deserialize)]
struct ExecInput {
    #[serde(rename = "J")]
    envelope: String,
}

/// Reads the input JSON either from `$FLUX_IMP_EXEC_HELPER`'s stdout
/// (when that variable is set and non-empty) or from this process's own
/// stdin.
fn acquire_input() -> Result<String, String> {
    let helper = env::var("FLUX_IMP_EXEC_HELPER").unwrap_or_default();
    if !helper.is_empty() {
        let output = Command::new("sh")
            .arg("-c")
            .arg(&helper)
            .stdin(Stdio::null())
            .output()
            .map_err(|e| format!("failed to spawn FLUX_IMP_EXEC_HELPER '{}': {}", helper, e))?;
        if !output.status.success() {
            return Err(format!("FLUX_IMP_EXEC_HELPER '{}' exited with {}", helper, output.status));
        }
        String::from_utf8(output.stdout).map_err(|e| format!("exec helper emitted non-UTF8 output: {}", e))
    } else {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf).map_err(|e| format!("failed to read stdin: {}", e))?;
        Ok(buf)
    }
}

fn parse_input(raw: &str) -> Result<String, String> {
    let input: ExecInput = serde_json::from_str(raw).map_err(|e| format!("malformed exec request JSON: {}", e))?;
    Ok(input.envelope)
}

/// Outcome of the unprivileged half. `Forwarded` means a channel was
/// present and the bundle was sent; the caller should exit 0.
/// `ExecedDirectly`/`Denied` carry the exit code to use instead.
pub enum Outcome {
    Forwarded,
    Exit(i32),
}

/// Runs the unprivileged half. `channel` is `Some` in setuid mode (a
/// privileged parent is waiting on the other end) and `None` in
/// unprivileged-exec mode.
pub fn run(
    shell_path: &str,
    args: &[String],
    exec_cfg: &ExecConfig,
    users: &dyn UserLookup,
    caller_uid: u32,
    channel: Option<&mut UnixStream>,
) -> Outcome {
    let raw_input = match acquire_input() {
        Ok(r) => r,
        Err(e) => {
            log::error!("{}", e);
            return Outcome::Exit(1);
        }
    };
    let envelope = match parse_input(&raw_input) {
        Ok(e) => e,
        Err(e) => {
            log::error!("{}", e);
            return Outcome::Exit(1);
        }
    };

    evaluate(envelope, shell_path, args, exec_cfg, users, caller_uid, channel)
}

/// The policy/dispatch logic of the unprivileged half, separated from
/// [`acquire_input`]'s real stdin/subprocess I/O so it can be exercised
/// against a literal envelope string in tests without blocking on this
/// process's own stdin.
fn evaluate(
    envelope: String,
    shell_path: &str,
    args: &[String],
    exec_cfg: &ExecConfig,
    users: &dyn UserLookup,
    caller_uid: u32,
    channel: Option<&mut UnixStream>,
) -> Outcome {
    if !caller_is_allowed(users, caller_uid, &exec_cfg.allowed_users) {
        log::warn!("caller uid {} is not in allowed-users", caller_uid);
        return Outcome::Exit(1);
    }

    match channel {
        Some(ch) => {
            if !exec_cfg.allowed_shells.iter().any(|s| s == shell_path) {
                log::warn!("shell '{}' is not in allowed-shells", shell_path);
                return Outcome::Exit(1);
            }
            let request = ExecRequest {
                envelope,
                shell_path: shell_path.to_string(),
                args: args.to_vec(),
            };
            if let Err(e) = flux_privsep::send_request(ch, &request) {
                log::error!("failed to forward exec request to privileged half: {}", e);
                return Outcome::Exit(1);
            }
            Outcome::Forwarded
        }
        None => {
            if !exec_cfg.allow_unprivileged_exec {
                log::error!("no privileged parent present and allow-unprivileged-exec is not set");
                return Outcome::Exit(1);
            }
            log::warn!("executing '{}' without privilege separation (allow-unprivileged-exec)", shell_path);
            Outcome::Exit(exec_shell(shell_path, args))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeUsers(HashMap<String, u32>);

    impl UserLookup for FakeUsers {
        fn uid_for_name(&self, name: &str) -> Option<u32> {
            self.0.get(name).copied()
        }

        fn lookup_uid(&self, _uid: u32) -> Option<crate::users::TargetUser> {
            None
        }
    }

    fn exec_cfg(allowed_users: &[&str], allowed_shells: &[&str], allow_unpriv: bool) -> ExecConfig {
        ExecConfig {
            allowed_users: allowed_users.iter().map(|s| s.to_string()).collect(),
            allowed_shells: allowed_shells.iter().map(|s| s.to_string()).collect(),
            allow_unprivileged_exec: allow_unpriv,
            pam_support: false,
            kill_process_group: false,
        }
    }

    fn users_with(name: &str, uid: u32) -> FakeUsers {
        let mut map = HashMap::new();
        map.insert(name.to_string(), uid);
        FakeUsers(map)
    }

    #[test]
    fn rejects_caller_not_in_allowed_users() {
        let users = users_with("alice", 1000);
        let cfg = exec_cfg(&["alice"], &["/bin/true"], false);
        let outcome = evaluate("ENV".to_string(), "/bin/true", &[], &cfg, &users, 9999, None);
        assert!(matches!(outcome, Outcome::Exit(1)));
    }

    #[test]
    fn unprivileged_exec_mode_denies_when_not_allowed() {
        let users = users_with("alice", 1000);
        let cfg = exec_cfg(&["alice"], &["/bin/true"], false);
        let outcome = evaluate("ENV".to_string(), "/bin/true", &[], &cfg, &users, 1000, None);
        assert!(matches!(outcome, Outcome::Exit(1)));
    }

    #[test]
    fn unprivileged_exec_mode_execs_when_allowed() {
        let users = users_with("alice", 1000);
        let cfg = exec_cfg(&["alice"], &["/bin/true"], true);
        let outcome = evaluate("ENV".to_string(), "/nonexistent/shell", &[], &cfg, &users, 1000, None);
        // exec_shell on a nonexistent path returns 127 rather than replacing the process.
        assert!(matches!(outcome, Outcome::Exit(127)));
    }

    #[test]
    fn setuid_mode_rejects_shell_not_in_allowed_shells() {
        use std::os::unix::net::UnixStream;

        let users = users_with("alice", 1000);
        let cfg = exec_cfg(&["alice"], &["/bin/bash"], false);
        let (mut a, _b) = UnixStream::pair().unwrap();
        let outcome = evaluate("ENV".to_string(), "/bin/zsh", &[], &cfg, &users, 1000, Some(&mut a));
        assert!(matches!(outcome, Outcome::Exit(1)));
    }

    #[test]
    fn setuid_mode_forwards_an_allowed_request() {
        use std::os::unix::net::UnixStream;

        let users = users_with("alice", 1000);
        let cfg = exec_cfg(&["alice"], &["/bin/bash"], false);
        let (mut a, mut b) = UnixStream::pair().unwrap();
        let outcome = evaluate(
            "ENV".to_string(),
            "/bin/bash",
            &["-c".to_string(), "true".to_string()],
            &cfg,
            &users,
            1000,
            Some(&mut a),
        );
        assert!(matches!(outcome, Outcome::Forwarded));

        let received = flux_privsep::recv_request(&mut b).unwrap();
        assert_eq!(received.envelope, "ENV");
        assert_eq!(received.shell_path, "/bin/bash");
    }

    #[test]
    fn parses_exec_input_json() {
        assert_eq!(parse_input(r#"{"J":"abc.def.ghi"}"#).unwrap(), "abc.def.ghi");
        assert!(parse_input("not json").is_err());
    }
}
