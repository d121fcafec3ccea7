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

use std::fmt;
use std::io;

/// Error kinds for the sign engine and its mechanisms.
///
/// Mirrors the abstract error kinds of the envelope/exec design: callers
/// match on the structured variant; `last_error` on the engine renders
/// this via `Display` for the C-ABI-shaped string accessor.
#[derive(Debug)]
pub enum Error {
    ConfigInvalid(String),
    InputMalformed(String),
    PolicyDenied(String),
    SignatureInvalid(String),
    MechanismUnknown(String),
    MechanismUnavailable(String),
    Expired(String),
    Io(io::Error),
    Custom(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match *self {
            Error::ConfigInvalid(ref s) => format!("invalid configuration: {}", s),
            Error::InputMalformed(ref s) => format!("malformed input: {}", s),
            Error::PolicyDenied(ref s) => format!("policy denied: {}", s),
            Error::SignatureInvalid(ref s) => format!("signature invalid: {}", s),
            Error::MechanismUnknown(ref s) => format!("unknown mechanism '{}'", s),
            Error::MechanismUnavailable(ref s) => format!("mechanism unavailable: {}", s),
            Error::Expired(ref s) => format!("envelope expired: {}", s),
            Error::Io(ref err) => err.to_string(),
            Error::Custom(ref s) => s.clone(),
        };
        write!(f, "{}", s)
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::InputMalformed(format!("base64 decode failed: {}", err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::InputMalformed(format!("key/value bundle malformed: {}", err))
    }
}

impl From<toml::de::Error> for Error {
    fn from(err: toml::de::Error) -> Self {
        Error::ConfigInvalid(err.to_string())
    }
}
