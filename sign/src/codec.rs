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

//! `HEADER.PAYLOAD.SIGNATURE` envelope wire format.
//!
//! Header and payload are base64 (standard, padded) of a JSON key/value
//! bundle and of the opaque payload bytes respectively. Signature is
//! mechanism-defined opaque ASCII. The whole string is ASCII and safe to
//! embed in a JSON string value.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::error::Error;

pub const VERSION: i64 = 1;

/// The header key/value bundle. Ordered (`BTreeMap`) so that
/// `header_encode_cpy` is byte-for-byte deterministic across calls with
/// the same fields — both sides of a mechanism's sign/verify must
/// reproduce the exact same prefix bytes.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Header(pub BTreeMap<String, Value>);

impl Header {
    pub fn new(mechanism: &str, userid: i64) -> Header {
        let mut map = BTreeMap::new();
        map.insert("version".to_string(), Value::from(VERSION));
        map.insert("mechanism".to_string(), Value::from(mechanism));
        map.insert("userid".to_string(), Value::from(userid));
        Header(map)
    }

    pub fn version(&self) -> Option<i64> {
        self.0.get("version").and_then(Value::as_i64)
    }

    pub fn mechanism(&self) -> Option<&str> {
        self.0.get("mechanism").and_then(Value::as_str)
    }

    pub fn userid(&self) -> Option<i64> {
        self.0.get("userid").and_then(Value::as_i64)
    }

    pub fn set(&mut self, key: &str, value: Value) {
        self.0.insert(key.to_string(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

/// Writes a fresh base64 header into `buf`, replacing any prior contents.
pub fn header_encode_cpy(buf: &mut String, header: &Header) -> Result<(), Error> {
    buf.clear();
    let json = serde_json::to_vec(&header.0)?;
    buf.push_str(&base64::encode(&json));
    Ok(())
}

/// Appends `"." + base64(payload)` to `buf`.
pub fn payload_encode_cat(buf: &mut String, payload: &[u8]) {
    buf.push('.');
    buf.push_str(&base64::encode(payload));
}

/// Appends `"." + signature` to `buf`.
pub fn signature_cat(buf: &mut String, signature: &str) {
    buf.push('.');
    buf.push_str(signature);
}

/// Finds the first `.`, base64-decodes the prefix, parses it as the
/// header key/value bundle. Returns the header and the byte offset of
/// the first `.` in `input`.
pub fn header_decode(input: &str) -> Result<(Header, usize), Error> {
    let first_dot = input
        .find('.')
        .ok_or_else(|| Error::InputMalformed("envelope has no '.' separator".to_string()))?;
    let raw = base64::decode(&input[..first_dot])?;
    let map: BTreeMap<String, Value> = serde_json::from_slice(&raw)?;
    Ok((Header(map), first_dot))
}

/// Finds the next `.` after `first_dot`, base64-decodes into `buf`
/// (cleared first; an empty segment yields an empty `buf`). Returns the
/// byte offset of the second `.` in `input`.
pub fn payload_decode_cpy(input: &str, first_dot: usize, buf: &mut Vec<u8>) -> Result<usize, Error> {
    let rest = &input[first_dot + 1..];
    let second_dot_rel = rest
        .find('.')
        .ok_or_else(|| Error::InputMalformed("envelope has only one '.' separator".to_string()))?;
    buf.clear();
    if second_dot_rel > 0 {
        let decoded = base64::decode(&rest[..second_dot_rel])?;
        buf.extend_from_slice(&decoded);
    }
    Ok(first_dot + 1 + second_dot_rel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_header_and_payload() {
        let header = Header::new("none", 1000);
        let mut wrap_buf = String::new();
        header_encode_cpy(&mut wrap_buf, &header).unwrap();
        payload_encode_cat(&mut wrap_buf, b"hi");
        signature_cat(&mut wrap_buf, "none");

        assert_eq!(wrap_buf.matches('.').count(), 2);

        let (decoded_header, first_dot) = header_decode(&wrap_buf).unwrap();
        assert_eq!(decoded_header.mechanism(), Some("none"));
        assert_eq!(decoded_header.userid(), Some(1000));

        let mut payload_buf = Vec::new();
        let second_dot = payload_decode_cpy(&wrap_buf, first_dot, &mut payload_buf).unwrap();
        assert_eq!(payload_buf, b"hi");
        assert_eq!(&wrap_buf[second_dot + 1..], "none");
    }

    #[test]
    fn empty_payload_decodes_to_empty_buffer() {
        let header = Header::new("none", 0);
        let mut wrap_buf = String::new();
        header_encode_cpy(&mut wrap_buf, &header).unwrap();
        payload_encode_cat(&mut wrap_buf, b"");
        signature_cat(&mut wrap_buf, "none");

        let (_, first_dot) = header_decode(&wrap_buf).unwrap();
        let mut payload_buf = vec![1, 2, 3];
        payload_decode_cpy(&wrap_buf, first_dot, &mut payload_buf).unwrap();
        assert!(payload_buf.is_empty());
    }

    #[test]
    fn rejects_fewer_than_two_dots() {
        assert!(header_decode("aGVsbG8=").is_err());

        let header = Header::new("none", 1000);
        let mut envelope = String::new();
        header_encode_cpy(&mut envelope, &header).unwrap();
        payload_encode_cat(&mut envelope, b"hi");
        // No signature segment appended: exactly one '.' in the string.
        let (_, first_dot) = header_decode(&envelope).unwrap();
        let mut buf = Vec::new();
        assert!(payload_decode_cpy(&envelope, first_dot, &mut buf).is_err());
    }
}
