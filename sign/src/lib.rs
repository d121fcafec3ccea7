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

//! Envelope signing and verification for flux-security.
//!
//! A [`SignEngine`] wraps a payload for a uid into a
//! `HEADER.PAYLOAD.SIGNATURE` envelope under one of the pluggable
//! [`mechanism`]s, and unwraps an envelope back into its payload and
//! authenticated uid. See [`config::Config`] for the policy this crate
//! enforces around which mechanisms may be used.

pub mod codec;
pub mod config;
pub mod engine;
pub mod error;
pub mod mechanism;

pub use codec::{Header, VERSION};
pub use config::Config;
pub use engine::{SignEngine, Unwrapped, NOVERIFY};
pub use error::Error;
