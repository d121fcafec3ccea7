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

//! The `none` mechanism: no cryptography at all.
//!
//! Exists for replay and integration tests. A production configuration
//! must never list `none` in `allowed-types` — enforced by whoever
//! assembles that configuration, not by this crate. Mechanism policy
//! and mechanism mechanics stay separate concerns.

use crate::codec::Header;
use crate::error::Error;
use crate::mechanism::Mechanism;

pub struct NoneMechanism;

const SIGNATURE: &str = "none";

impl Mechanism for NoneMechanism {
    fn name(&self) -> &'static str {
        "none"
    }

    fn sign(&self, _signed_bytes: &[u8]) -> Result<String, Error> {
        Ok(SIGNATURE.to_string())
    }

    fn verify(&self, _header: &Header, _signed_bytes: &[u8], signature: &str, _flags: u32) -> Result<(), Error> {
        if signature == SIGNATURE {
            Ok(())
        } else {
            Err(Error::SignatureInvalid(format!("none mechanism expects signature '{}'", SIGNATURE)))
        }
    }
}
