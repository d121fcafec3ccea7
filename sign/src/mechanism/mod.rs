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

//! Pluggable signing back-ends.
//!
//! New mechanisms plug in by implementing [`Mechanism`] and adding a
//! branch to [`build`]; mechanisms are compile-time known, not
//! dynamically registered. The set of back-ends is meant to stay small
//! and auditable, not discoverable at runtime.

mod curve;
mod munge;
mod none;

pub use curve::CurveMechanism;
pub use munge::MungeMechanism;
pub use none::NoneMechanism;

use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

use crate::codec::Header;
use crate::config::NO_EXPIRY;
use crate::error::Error;

/// The capability set every signing back-end satisfies.
pub trait Mechanism {
    /// Stable identifier, used in the header's `mechanism` field and in
    /// `allowed-types`/`default-type` configuration.
    fn name(&self) -> &'static str;

    /// Adds mechanism-specific fields to `header` before it is encoded
    /// (e.g. `curve.pubkey`, or the `ctime`/`xtime` expiry stamp via
    /// [`stamp_expiry`]). `max_ttl` is the sign engine's configured
    /// `max-ttl`, passed through so a mechanism can decide whether (and
    /// how) to stamp an expiry. Most mechanisms have nothing to add.
    fn prep(&self, _header: &mut Header, _max_ttl: i64, _flags: u32) -> Result<(), Error> {
        Ok(())
    }

    /// Produces the opaque signature string over `signed_bytes` (the
    /// `HEADER.PAYLOAD` prefix, not just the payload — both `sign` and
    /// `verify` operate on the same bytes so a verifier can recompute
    /// what the signer produced).
    fn sign(&self, signed_bytes: &[u8]) -> Result<String, Error>;

    /// Checks `signature` against `signed_bytes` and `header`. On
    /// success, the caller treats `header.userid()` as authenticated.
    fn verify(&self, header: &Header, signed_bytes: &[u8], signature: &str, flags: u32) -> Result<(), Error>;
}

/// The fixed set of mechanism names the registry recognizes, independent
/// of whether the mechanism can actually be constructed (e.g. `curve`'s
/// keystore directory need not exist merely to validate configuration).
const KNOWN_MECHANISMS: &[&str] = &["none", "munge", "curve"];

pub fn known_mechanism(name: &str) -> bool {
    KNOWN_MECHANISMS.contains(&name)
}

/// Constructs the mechanism named `name`, wiring it to its default
/// real-world collaborator (the `munge`/`unmunge` CLI for the
/// shared-secret mechanism, a directory of per-uid public keys for the
/// public-key mechanism). Constructed fresh on every call: none of the
/// three mechanisms hold meaningfully expensive state, and a fresh
/// construction means a rotated key file or a restarted munge daemon is
/// picked up on the very next wrap/unwrap without restarting the engine.
pub fn build(name: &str) -> Result<Box<dyn Mechanism>, Error> {
    match name {
        "none" => Ok(Box::new(NoneMechanism)),
        "munge" => Ok(Box::new(MungeMechanism::from_env())),
        "curve" => Ok(Box::new(CurveMechanism::from_env()?)),
        _ => Err(Error::MechanismUnknown(name.to_string())),
    }
}

fn now_secs() -> i64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as i64).unwrap_or(0)
}

/// Stamps `ctime` (creation time, seconds since the epoch) into `header`,
/// and `xtime` (the expiry instant, `ctime + max_ttl`) unless `max_ttl`
/// is the [`NO_EXPIRY`] sentinel. Shared by the `munge` and `curve`
/// mechanisms' `prep` implementations; `none` has no expiry because it
/// has no verification step to enforce one against.
pub fn stamp_expiry(header: &mut Header, max_ttl: i64) {
    let ctime = now_secs();
    header.set("ctime", Value::from(ctime));
    if max_ttl != NO_EXPIRY {
        header.set("xtime", Value::from(ctime + max_ttl));
    }
}

/// `true` if `header` carries an `xtime` that is in the past. A header
/// with no `xtime` field (the `none` mechanism, or an engine configured
/// with `max-ttl = -100`'s own wraps) is never considered expired here —
/// that decision belongs to the unwrapping engine's own `max-ttl`
/// policy, checked separately.
pub fn is_expired(header: &Header) -> bool {
    match header.get("xtime").and_then(Value::as_i64) {
        Some(xtime) => now_secs() > xtime,
        None => false,
    }
}
