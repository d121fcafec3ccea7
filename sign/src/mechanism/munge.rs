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

//! The `munge` (shared-secret) mechanism.
//!
//! Hands the `HEADER.PAYLOAD` prefix to an external authentication
//! daemon, which returns an opaque credential; verification submits the
//! credential back to the daemon and compares the recovered bytes
//! against the prefix and the daemon-authenticated uid against
//! `header.userid`. The daemon is reached through a narrow
//! [`AuthDaemon`] interface so the concrete transport (here, the
//! system's `munge`/`unmunge` CLI front-ends) stays swappable and
//! testable without a running daemon.

use std::io::Write;
use std::process::{Command, Stdio};

use crate::codec::Header;
use crate::error::Error;
use crate::mechanism::{stamp_expiry, Mechanism};

/// Narrow interface to the external shared-secret authentication
/// daemon. `encode` wraps bytes into an opaque, self-authenticating
/// credential; `decode` recovers the bytes and the uid that produced
/// them.
pub trait AuthDaemon {
    fn encode(&self, bytes: &[u8]) -> Result<String, Error>;
    fn decode(&self, credential: &str) -> Result<(Vec<u8>, i64), Error>;
}

/// Talks to the daemon via the `munge`/`unmunge` command-line front
/// ends, which read from stdin and write to stdout by default: `munge`
/// emits the credential string; `unmunge` emits a metadata block (one
/// `KEY:    value` line per field, including `UID:`) followed by a
/// blank line and the recovered payload bytes.
pub struct ProcessAuthDaemon;

impl ProcessAuthDaemon {
    fn run(program: &str, args: &[&str], input: &[u8]) -> Result<Vec<u8>, Error> {
        let mut child = Command::new(program)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| Error::MechanismUnavailable(format!("failed to start {}: {}", program, e)))?;
        child
            .stdin
            .take()
            .expect("piped stdin")
            .write_all(input)
            .map_err(|e| Error::MechanismUnavailable(format!("failed to write to {}: {}", program, e)))?;
        let output = child
            .wait_with_output()
            .map_err(|e| Error::MechanismUnavailable(format!("failed to wait for {}: {}", program, e)))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::MechanismUnavailable(format!("{} failed: {}", program, stderr.trim())));
        }
        Ok(output.stdout)
    }
}

impl AuthDaemon for ProcessAuthDaemon {
    fn encode(&self, bytes: &[u8]) -> Result<String, Error> {
        let out = Self::run("munge", &[], bytes)?;
        let credential = String::from_utf8(out)
            .map_err(|e| Error::MechanismUnavailable(format!("munge emitted non-UTF8 output: {}", e)))?;
        Ok(credential.trim_end().to_string())
    }

    fn decode(&self, credential: &str) -> Result<(Vec<u8>, i64), Error> {
        let out = Self::run("unmunge", &[], credential.as_bytes())?;
        parse_unmunge_output(&out)
    }
}

/// Splits `unmunge`'s metadata block from its payload (separated by the
/// first blank line) and extracts the `UID:` field.
fn parse_unmunge_output(out: &[u8]) -> Result<(Vec<u8>, i64), Error> {
    let separator = b"\n\n";
    let split_at = out
        .windows(2)
        .position(|w| w == separator)
        .ok_or_else(|| Error::SignatureInvalid("unmunge output missing metadata/payload separator".to_string()))?;
    let metadata = String::from_utf8_lossy(&out[..split_at]);
    let payload = out[split_at + 2..].to_vec();

    let uid = metadata
        .lines()
        .find_map(|line| line.trim().strip_prefix("UID:"))
        .and_then(|rest| rest.trim().split_whitespace().next())
        .and_then(|tok| tok.parse::<i64>().ok())
        .ok_or_else(|| Error::SignatureInvalid("unmunge output missing UID field".to_string()))?;

    Ok((payload, uid))
}

pub struct MungeMechanism {
    daemon: Box<dyn AuthDaemon>,
}

impl MungeMechanism {
    pub fn from_env() -> MungeMechanism {
        MungeMechanism {
            daemon: Box::new(ProcessAuthDaemon),
        }
    }

    pub fn with_daemon(daemon: Box<dyn AuthDaemon>) -> MungeMechanism {
        MungeMechanism {
            daemon,
        }
    }
}

impl Mechanism for MungeMechanism {
    fn name(&self) -> &'static str {
        "munge"
    }

    fn prep(&self, header: &mut Header, max_ttl: i64, _flags: u32) -> Result<(), Error> {
        stamp_expiry(header, max_ttl);
        Ok(())
    }

    fn sign(&self, signed_bytes: &[u8]) -> Result<String, Error> {
        self.daemon.encode(signed_bytes)
    }

    fn verify(&self, header: &Header, signed_bytes: &[u8], signature: &str, _flags: u32) -> Result<(), Error> {
        let (recovered, daemon_uid) = self.daemon.decode(signature)?;
        if recovered != signed_bytes {
            return Err(Error::SignatureInvalid("munge credential does not cover this envelope's prefix".to_string()));
        }
        let claimed_uid = header
            .userid()
            .ok_or_else(|| Error::InputMalformed("header missing userid".to_string()))?;
        if daemon_uid != claimed_uid {
            return Err(Error::SignatureInvalid(format!(
                "munge-authenticated uid {} does not match header userid {}",
                daemon_uid, claimed_uid
            )));
        }
        Ok(())
    }
}
