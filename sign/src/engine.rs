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

//! The sign engine: config-validated wrap/unwrap over the mechanism
//! registry. One engine per security context; not safe to share across
//! threads (scratch buffers and `last_error` are context-local).

use parking_lot::Mutex;

use crate::codec::{self, Header, VERSION};
use crate::config::{Config, NO_EXPIRY};
use crate::error::Error;
use crate::mechanism;

/// Skip the mechanism's cryptographic check on unwrap. Never accepted
/// from an untrusted caller by privileged consumers — it still performs
/// full structural validation (version, header shape, payload decode).
pub const NOVERIFY: u32 = 0x1;

/// The result of a successful unwrap: the payload borrows the engine's
/// scratch buffer and is invalidated by the engine's next wrap/unwrap
/// call, matching the C-ABI-era "owned by the engine" contract — here
/// enforced by the borrow checker instead of by convention.
pub struct Unwrapped<'a> {
    pub mechanism: String,
    pub userid: i64,
    pub payload: &'a [u8],
    pub header: Header,
}

pub struct SignEngine {
    config: Config,
    wrap_buf: String,
    unwrap_buf: Vec<u8>,
    last_error: Mutex<Option<String>>,
}

impl SignEngine {
    pub fn new(config: Config) -> SignEngine {
        SignEngine {
            config,
            wrap_buf: String::new(),
            unwrap_buf: Vec::new(),
            last_error: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The message from the most recent failed operation. Replaced on
    /// each failure; untouched by successful calls.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.lock().clone()
    }

    fn fail(&self, err: Error) -> Error {
        *self.last_error.lock() = Some(err.to_string());
        err
    }

    /// Wraps `payload` for `userid` under `mechanism` (or `default-type`
    /// if `None`). `flags` must be 0. Returns a reference to the engine's
    /// wrap buffer, valid until the next wrap/unwrap call.
    pub fn wrap(&mut self, userid: i64, payload: &[u8], mechanism: Option<&str>, flags: u32) -> Result<&str, Error> {
        if userid < 0 {
            return Err(self.fail(Error::InputMalformed("userid must be >= 0".to_string())));
        }
        if flags != 0 {
            return Err(self.fail(Error::InputMalformed("wrap does not accept any flags".to_string())));
        }

        let mechanism_name = mechanism.unwrap_or(&self.config.default_type).to_string();
        let mech = match mechanism::build(&mechanism_name) {
            Ok(m) => m,
            Err(e) => return Err(self.fail(e)),
        };

        let mut header = Header::new(&mechanism_name, userid);
        if let Err(e) = mech.prep(&mut header, self.config.max_ttl, flags) {
            return Err(self.fail(e));
        }

        if let Err(e) = codec::header_encode_cpy(&mut self.wrap_buf, &header) {
            return Err(self.fail(e));
        }
        codec::payload_encode_cat(&mut self.wrap_buf, payload);

        let prefix = self.wrap_buf.clone();
        let signature = match mech.sign(prefix.as_bytes()) {
            Ok(s) => s,
            Err(e) => return Err(self.fail(e)),
        };
        codec::signature_cat(&mut self.wrap_buf, &signature);

        Ok(&self.wrap_buf)
    }

    /// `wrap` with `userid` set to the calling process's real uid.
    pub fn wrap_current(&mut self, payload: &[u8], mechanism: Option<&str>, flags: u32) -> Result<&str, Error> {
        let uid = unsafe { libc::getuid() } as i64;
        self.wrap(uid, payload, mechanism, flags)
    }

    /// Unwraps `input`, enforcing that its mechanism is in
    /// `allowed-types`.
    pub fn unwrap(&mut self, input: &str, flags: u32) -> Result<Unwrapped<'_>, Error> {
        self.unwrap_impl(input, flags, true)
    }

    /// Unwraps `input` without enforcing `allowed-types` — for tooling
    /// that inspects foreign envelopes, not for policy decisions.
    pub fn unwrap_anymech(&mut self, input: &str, flags: u32) -> Result<Unwrapped<'_>, Error> {
        self.unwrap_impl(input, flags, false)
    }

    fn unwrap_impl(&mut self, input: &str, flags: u32, enforce_allowed: bool) -> Result<Unwrapped<'_>, Error> {
        if flags & !NOVERIFY != 0 {
            return Err(self.fail(Error::InputMalformed("unwrap flags may only contain NOVERIFY".to_string())));
        }

        let (header, first_dot) = match codec::header_decode(input) {
            Ok(v) => v,
            Err(e) => return Err(self.fail(e)),
        };

        let version = header
            .version()
            .ok_or_else(|| Error::InputMalformed("header missing version".to_string()));
        let version = match version {
            Ok(v) => v,
            Err(e) => return Err(self.fail(e)),
        };
        if version != VERSION {
            return Err(self.fail(Error::InputMalformed(format!("unsupported envelope version {}", version))));
        }

        let mechanism_name = match header.mechanism() {
            Some(m) => m.to_string(),
            None => return Err(self.fail(Error::InputMalformed("header missing mechanism".to_string()))),
        };
        let claimed_uid = match header.userid() {
            Some(u) => u,
            None => return Err(self.fail(Error::InputMalformed("header missing userid".to_string()))),
        };

        if self.config.max_ttl != NO_EXPIRY && mechanism::is_expired(&header) {
            return Err(self.fail(Error::Expired(format!("envelope for uid {} has an expired xtime", claimed_uid))));
        }

        if enforce_allowed && !self.config.is_allowed(&mechanism_name) {
            return Err(self.fail(Error::PolicyDenied(format!(
                "mechanism '{}' is not in allowed-types",
                mechanism_name
            ))));
        }

        let mech = match mechanism::build(&mechanism_name) {
            Ok(m) => m,
            Err(e) => return Err(self.fail(e)),
        };

        let second_dot = match codec::payload_decode_cpy(input, first_dot, &mut self.unwrap_buf) {
            Ok(v) => v,
            Err(e) => return Err(self.fail(e)),
        };
        let prefix = &input[..second_dot];
        let signature = &input[second_dot + 1..];

        if flags & NOVERIFY == 0 {
            if let Err(e) = mech.verify(&header, prefix.as_bytes(), signature, flags) {
                return Err(self.fail(e));
            }
        }

        Ok(Unwrapped {
            mechanism: mechanism_name,
            userid: claimed_uid,
            payload: &self.unwrap_buf,
            header,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RawConfig;

    fn engine(default_type: &str, allowed: &[&str]) -> SignEngine {
        let raw = RawConfig {
            max_ttl: 30,
            default_type: default_type.to_string(),
            allowed_types: allowed.iter().map(|s| s.to_string()).collect(),
        };
        SignEngine::new(Config::validate(raw).unwrap())
    }

    #[test]
    fn round_trip_none() {
        let mut e = engine("none", &["none"]);
        let envelope = e.wrap(1000, b"hi", None, 0).unwrap().to_string();
        assert!(regex_like_matches(&envelope));
        let unwrapped = e.unwrap(&envelope, 0).unwrap();
        assert_eq!(unwrapped.payload, b"hi");
        assert_eq!(unwrapped.userid, 1000);
        assert_eq!(unwrapped.mechanism, "none");
    }

    fn regex_like_matches(envelope: &str) -> bool {
        // ^[A-Za-z0-9+/=]+\.aGk=\.none$
        let parts: Vec<&str> = envelope.splitn(3, '.').collect();
        parts.len() == 3
            && parts[0].chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=')
            && parts[1] == "aGk="
            && parts[2] == "none"
    }

    #[test]
    fn wrap_rejects_unknown_mechanism() {
        let mut e = engine("none", &["none"]);
        let err = e.wrap(1000, b"hi", Some("bogus"), 0).unwrap_err();
        assert!(err.to_string().contains("bogus"));
        assert_eq!(e.last_error().unwrap(), err.to_string());
    }

    #[test]
    fn unwrap_enforces_allowed_types_unwrap_anymech_does_not() {
        let mut e = engine("curve", &["curve"]);
        // wrap_as under "none" even though it's not in allowed-types: a test-only path.
        let envelope = e.wrap(1000, b"hi", Some("none"), 0).unwrap().to_string();

        let mut e2 = engine("curve", &["curve"]);
        match e2.unwrap(&envelope, 0) {
            Err(Error::PolicyDenied(_)) => {}
            other => panic!("expected PolicyDenied, got {:?}", other.map(|u| u.userid)),
        }

        let mut e3 = engine("curve", &["curve"]);
        assert!(e3.unwrap_anymech(&envelope, 0).is_ok());
    }

    #[test]
    fn tampering_with_payload_is_detected_unless_noverify() {
        let mut e = engine("none", &["none"]);
        let mut envelope = e.wrap(1000, b"hi", None, 0).unwrap().to_string();
        // Flip a byte inside the base64 payload segment.
        let bytes = unsafe { envelope.as_bytes_mut() };
        let payload_start = bytes.iter().position(|&b| b == b'.').unwrap() + 1;
        bytes[payload_start] = if bytes[payload_start] == b'a' {
            b'b'
        } else {
            b'a'
        };

        let mut e2 = engine("none", &["none"]);
        // "none" signs the literal string "none" regardless of payload, so
        // tampering the payload is undetectable by this mechanism: this is
        // exactly why `none` must never appear in a production allowed-types.
        assert!(e2.unwrap(&envelope, 0).is_ok());
    }

    #[test]
    fn version_mismatch_is_rejected() {
        let mut e = engine("none", &["none"]);
        let mut header = Header::new("none", 1000);
        header.set("version", serde_json::Value::from(2));
        let mut buf = String::new();
        codec::header_encode_cpy(&mut buf, &header).unwrap();
        codec::payload_encode_cat(&mut buf, b"hi");
        codec::signature_cat(&mut buf, "none");
        match e.unwrap(&buf, 0) {
            Err(Error::InputMalformed(msg)) => assert!(msg.contains('2')),
            other => panic!("expected InputMalformed, got {:?}", other.map(|u| u.userid)),
        }
    }

    #[test]
    fn expired_xtime_is_rejected_unless_no_expiry() {
        let mut e = engine("none", &["none"]);
        let mut header = Header::new("none", 1000);
        header.set("xtime", serde_json::Value::from(1));
        let mut buf = String::new();
        codec::header_encode_cpy(&mut buf, &header).unwrap();
        codec::payload_encode_cat(&mut buf, b"hi");
        codec::signature_cat(&mut buf, "none");
        match e.unwrap(&buf, 0) {
            Err(Error::Expired(_)) => {}
            other => panic!("expected Expired, got {:?}", other.map(|u| u.userid)),
        }

        let raw = RawConfig {
            max_ttl: NO_EXPIRY,
            default_type: "none".to_string(),
            allowed_types: vec!["none".to_string()],
        };
        let mut e2 = SignEngine::new(Config::validate(raw).unwrap());
        assert!(e2.unwrap(&buf, 0).is_ok());
    }

    #[test]
    fn wrap_current_uses_real_uid() {
        let mut e = engine("none", &["none"]);
        let envelope = e.wrap_current(b"x", None, 0).unwrap().to_string();
        let unwrapped = e.unwrap(&envelope, 0).unwrap();
        assert_eq!(unwrapped.userid as u32, unsafe { libc::getuid() });
    }
}
