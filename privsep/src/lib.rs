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

//! The privilege-separation channel: a byte-framed pipe carrying exactly
//! one [`ExecRequest`] from the unprivileged child to the privileged
//! parent, and exactly one exit status back.
//!
//! Each direction is a 4-byte big-endian length prefix followed by that
//! many bytes of JSON. This is a strict one-shot protocol, not a
//! general-purpose RPC channel: a `Channel` is used for a single
//! request/response and then dropped.

use std::collections::BTreeMap;
use std::io::{self, Read, Write};
use std::os::unix::net::UnixStream;

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde_derive::{Deserialize, Serialize};

/// A connected pair of endpoints for the privsep channel, one to be kept
/// by the unprivileged child and one by the privileged parent after
/// `fork`. Built on `UnixStream::pair` (a full-duplex, blocking,
/// in-kernel socket pair) rather than two unidirectional `pipe(2)`s:
/// one fd per side instead of four, and a single object to close on
/// each end.
pub fn channel_pair() -> io::Result<(UnixStream, UnixStream)> {
    UnixStream::pair()
}

/// Largest message this channel will accept. Guards against a corrupt
/// or hostile length prefix forcing an unbounded allocation; well above
/// any real argv/envelope size.
const MAX_MESSAGE_BYTES: u32 = 16 * 1024 * 1024;

/// The bundle that crosses the channel from unprivileged to privileged:
/// the attested envelope, the shell to run, and its argument vector.
///
/// `args` is wire-encoded as a flat key/value sub-bundle with positional
/// string keys (`"0"`, `"1"`, ...) per the envelope/header data model's
/// general key/value bundle convention, rather than as a native JSON
/// array; [`args_as_bundle`] does the conversion so callers still work
/// with an ordinary `Vec<String>`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecRequest {
    #[serde(rename = "J")]
    pub envelope: String,
    pub shell_path: String,
    #[serde(with = "args_as_bundle")]
    pub args: Vec<String>,
}

mod args_as_bundle {
    use std::collections::BTreeMap;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(args: &[String], s: S) -> Result<S::Ok, S::Error> {
        let bundle: BTreeMap<String, &String> =
            args.iter().enumerate().map(|(i, a)| (i.to_string(), a)).collect();
        bundle.serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<String>, D::Error> {
        let bundle = BTreeMap::<String, String>::deserialize(d)?;
        let mut indexed: Vec<(usize, String)> = Vec::with_capacity(bundle.len());
        for (key, value) in bundle {
            let idx: usize = key.parse().map_err(serde::de::Error::custom)?;
            indexed.push((idx, value));
        }
        indexed.sort_by_key(|(idx, _)| *idx);
        Ok(indexed.into_iter().map(|(_, v)| v).collect())
    }
}

fn write_frame<W: Write>(writer: &mut W, bytes: &[u8]) -> io::Result<()> {
    if bytes.len() as u64 > u64::from(MAX_MESSAGE_BYTES) {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "privsep message too large"));
    }
    writer.write_u32::<BigEndian>(bytes.len() as u32)?;
    writer.write_all(bytes)?;
    writer.flush()
}

fn read_frame<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let len = reader.read_u32::<BigEndian>()?;
    if len > MAX_MESSAGE_BYTES {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "privsep message exceeds size limit"));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Sent by the unprivileged child once, as the sole message in that
/// direction.
pub fn send_request<W: Write>(writer: &mut W, request: &ExecRequest) -> io::Result<()> {
    let bytes = serde_json::to_vec(request)?;
    write_frame(writer, &bytes)
}

/// Received by the privileged parent, exactly once.
pub fn recv_request<R: Read>(reader: &mut R) -> io::Result<ExecRequest> {
    let bytes = read_frame(reader)?;
    serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
}

/// Sent by the privileged parent back to the unprivileged child after
/// the child has exited, carrying the IMP's own final exit code.
pub fn send_status<W: Write>(writer: &mut W, exit_code: i32) -> io::Result<()> {
    let mut map = BTreeMap::new();
    map.insert("exit_code".to_string(), exit_code);
    let bytes = serde_json::to_vec(&map)?;
    write_frame(writer, &bytes)
}

pub fn recv_status<R: Read>(reader: &mut R) -> io::Result<i32> {
    let bytes = read_frame(reader)?;
    let map: BTreeMap<String, i32> = serde_json::from_slice(&bytes).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
    map.get("exit_code")
        .copied()
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "status message missing exit_code"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn sample_request() -> ExecRequest {
        ExecRequest {
            envelope: "HEADER.PAYLOAD.SIGNATURE".to_string(),
            shell_path: "/bin/bash".to_string(),
            args: vec!["bash".to_string(), "-c".to_string(), "true".to_string()],
        }
    }

    #[test]
    fn round_trips_a_request_through_a_byte_buffer() {
        let request = sample_request();
        let mut buf = Vec::new();
        send_request(&mut buf, &request).unwrap();

        let mut cursor = Cursor::new(buf);
        let received = recv_request(&mut cursor).unwrap();
        assert_eq!(received, request);
    }

    #[test]
    fn args_are_wire_encoded_as_a_positional_bundle() {
        let request = sample_request();
        let bytes = serde_json::to_vec(&request).unwrap();
        let value: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let args = value.get("args").unwrap();
        assert!(args.is_object());
        assert_eq!(args.get("0").unwrap(), "bash");
        assert_eq!(args.get("2").unwrap(), "true");
    }

    #[test]
    fn round_trips_an_exit_status() {
        let mut buf = Vec::new();
        send_status(&mut buf, 130).unwrap();
        let mut cursor = Cursor::new(buf);
        assert_eq!(recv_status(&mut cursor).unwrap(), 130);
    }

    #[test]
    fn rejects_a_truncated_length_prefix() {
        let mut cursor = Cursor::new(vec![0u8, 0u8]);
        assert!(recv_request(&mut cursor).is_err());
    }

    #[test]
    fn rejects_an_oversized_length_prefix() {
        let mut buf = Vec::new();
        buf.write_u32::<BigEndian>(MAX_MESSAGE_BYTES + 1).unwrap();
        let mut cursor = Cursor::new(buf);
        assert!(recv_request(&mut cursor).is_err());
    }
}
