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

//! The `curve` (public-key) mechanism.
//!
//! Adds `curve.pubkey` (base64 of a 32-byte ed25519 public key) to the
//! header during `prep`, signs the `HEADER.PAYLOAD` prefix with the
//! matching secret key, and emits a detached signature. Verification
//! recomputes the signature check against the header's declared public
//! key, then confirms that public key belongs to a principal whose uid
//! equals `header.userid` by consulting a local keystore keyed by uid —
//! reached through a narrow [`Keystore`] interface so tests can supply
//! one without touching the filesystem.

use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use ed25519_dalek::{Keypair, PublicKey, SecretKey, Signature, Signer, Verifier};
use serde_json::Value;

use crate::codec::Header;
use crate::error::Error;
use crate::mechanism::{stamp_expiry, Mechanism};

/// Looks up the public key on file for a given uid. `Ok(None)` means no
/// key is on file for that uid (distinct from an I/O error).
pub trait Keystore {
    fn pubkey_for_uid(&self, uid: i64) -> Result<Option<[u8; 32]>, Error>;
}

/// A directory of `<uid>.pub` files, each containing the base64 of a
/// 32-byte ed25519 public key.
pub struct FileKeystore {
    dir: PathBuf,
}

impl FileKeystore {
    pub fn new<P: Into<PathBuf>>(dir: P) -> FileKeystore {
        FileKeystore {
            dir: dir.into(),
        }
    }
}

impl Keystore for FileKeystore {
    fn pubkey_for_uid(&self, uid: i64) -> Result<Option<[u8; 32]>, Error> {
        let path = self.dir.join(format!("{}.pub", uid));
        match fs::read_to_string(&path) {
            Ok(contents) => Ok(Some(decode_pubkey(contents.trim())?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }
}

fn decode_pubkey(b64: &str) -> Result<[u8; 32], Error> {
    let bytes = base64::decode(b64)?;
    if bytes.len() != 32 {
        return Err(Error::InputMalformed(format!("curve public key is {} bytes, expected 32", bytes.len())));
    }
    let mut arr = [0u8; 32];
    arr.copy_from_slice(&bytes);
    Ok(arr)
}

pub struct CurveMechanism {
    keystore: Box<dyn Keystore>,
    keyfile: Option<PathBuf>,
}

impl CurveMechanism {
    /// Builds a mechanism backed by `FLUX_SIGN_CURVE_KEYDIR`
    /// (default `/etc/flux-security/curve-keys`) for uid lookups and
    /// `FLUX_SIGN_CURVE_KEYFILE` (default `<keydir>/self.key`) for this
    /// process's own signing key.
    pub fn from_env() -> Result<CurveMechanism, Error> {
        let dir = env::var("FLUX_SIGN_CURVE_KEYDIR").unwrap_or_else(|_| "/etc/flux-security/curve-keys".to_string());
        let keyfile = env::var("FLUX_SIGN_CURVE_KEYFILE")
            .map(PathBuf::from)
            .unwrap_or_else(|_| Path::new(&dir).join("self.key"));
        Ok(CurveMechanism::with_keystore(Box::new(FileKeystore::new(dir)), Some(keyfile)))
    }

    pub fn with_keystore(keystore: Box<dyn Keystore>, keyfile: Option<PathBuf>) -> CurveMechanism {
        CurveMechanism {
            keystore,
            keyfile,
        }
    }

    fn load_signing_key(&self) -> Result<Keypair, Error> {
        let path = self
            .keyfile
            .as_ref()
            .ok_or_else(|| Error::MechanismUnavailable("no curve signing key configured".to_string()))?;
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::MechanismUnavailable(format!("cannot read curve key file {}: {}", path.display(), e)))?;
        let seed = base64::decode(contents.trim())?;
        let secret = SecretKey::from_bytes(&seed)
            .map_err(|e| Error::ConfigInvalid(format!("invalid curve secret key in {}: {}", path.display(), e)))?;
        let public = PublicKey::from(&secret);
        Ok(Keypair {
            secret,
            public,
        })
    }
}

impl Mechanism for CurveMechanism {
    fn name(&self) -> &'static str {
        "curve"
    }

    fn prep(&self, header: &mut Header, max_ttl: i64, _flags: u32) -> Result<(), Error> {
        let keypair = self.load_signing_key()?;
        header.set("curve.pubkey", Value::from(base64::encode(keypair.public.as_bytes())));
        stamp_expiry(header, max_ttl);
        Ok(())
    }

    fn sign(&self, signed_bytes: &[u8]) -> Result<String, Error> {
        let keypair = self.load_signing_key()?;
        let signature: Signature = keypair.sign(signed_bytes);
        Ok(base64::encode(&signature.to_bytes()[..]))
    }

    fn verify(&self, header: &Header, signed_bytes: &[u8], signature: &str, _flags: u32) -> Result<(), Error> {
        let pubkey_b64 = header
            .get("curve.pubkey")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::InputMalformed("header missing curve.pubkey".to_string()))?;
        let pubkey_bytes = decode_pubkey(pubkey_b64)?;
        let public = PublicKey::from_bytes(&pubkey_bytes)
            .map_err(|e| Error::InputMalformed(format!("invalid curve.pubkey: {}", e)))?;

        let sig_bytes = base64::decode(signature)?;
        if sig_bytes.len() != 64 {
            return Err(Error::SignatureInvalid(format!("curve signature is {} bytes, expected 64", sig_bytes.len())));
        }
        let mut sig_arr = [0u8; 64];
        sig_arr.copy_from_slice(&sig_bytes);
        let sig = Signature::from_bytes(&sig_arr)
            .map_err(|e| Error::SignatureInvalid(format!("malformed curve signature: {}", e)))?;
        public
            .verify(signed_bytes, &sig)
            .map_err(|_| Error::SignatureInvalid("curve signature does not verify against curve.pubkey".to_string()))?;

        let claimed_uid = header
            .userid()
            .ok_or_else(|| Error::InputMalformed("header missing userid".to_string()))?;
        match self.keystore.pubkey_for_uid(claimed_uid)? {
            Some(expected) if expected == pubkey_bytes => Ok(()),
            Some(_) => Err(Error::SignatureInvalid(format!("curve.pubkey does not belong to uid {}", claimed_uid))),
            None => Err(Error::SignatureInvalid(format!("no curve key on file for uid {}", claimed_uid))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    struct FakeKeystore(Mutex<HashMap<i64, [u8; 32]>>);

    impl Keystore for FakeKeystore {
        fn pubkey_for_uid(&self, uid: i64) -> Result<Option<[u8; 32]>, Error> {
            Ok(self.0.lock().unwrap().get(&uid).cloned())
        }
    }

    fn write_keyfile(dir: &Path, secret: &SecretKey) -> PathBuf {
        let path = dir.join("self.key");
        fs::write(&path, base64::encode(secret.as_bytes())).unwrap();
        path
    }

    #[test]
    fn signs_and_verifies_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let mut csprng = rand::rngs::OsRng {};
        let keypair = Keypair::generate(&mut csprng);
        let keyfile = write_keyfile(tmp.path(), &keypair.secret);

        let mut keystore_map = HashMap::new();
        keystore_map.insert(1000i64, keypair.public.to_bytes());
        let keystore = FakeKeystore(Mutex::new(keystore_map));

        let mech = CurveMechanism::with_keystore(Box::new(keystore), Some(keyfile));
        let mut header = Header::new("curve", 1000);
        mech.prep(&mut header, 30, 0).unwrap();
        assert!(header.get("curve.pubkey").is_some());

        let sig = mech.sign(b"HEADER.PAYLOAD").unwrap();
        assert!(mech.verify(&header, b"HEADER.PAYLOAD", &sig, 0).is_ok());
    }

    #[test]
    fn rejects_pubkey_not_owned_by_uid() {
        let tmp = tempfile::tempdir().unwrap();
        let mut csprng = rand::rngs::OsRng {};
        let keypair = Keypair::generate(&mut csprng);
        let keyfile = write_keyfile(tmp.path(), &keypair.secret);

        // Keystore has no entry at all for uid 1000.
        let keystore = FakeKeystore(Mutex::new(HashMap::new()));
        let mech = CurveMechanism::with_keystore(Box::new(keystore), Some(keyfile));
        let mut header = Header::new("curve", 1000);
        mech.prep(&mut header, 30, 0).unwrap();
        let sig = mech.sign(b"HEADER.PAYLOAD").unwrap();
        assert!(mech.verify(&header, b"HEADER.PAYLOAD", &sig, 0).is_err());
    }

    #[test]
    fn rejects_tampered_signature() {
        let tmp = tempfile::tempdir().unwrap();
        let mut csprng = rand::rngs::OsRng {};
        let keypair = Keypair::generate(&mut csprng);
        let keyfile = write_keyfile(tmp.path(), &keypair.secret);

        let mut keystore_map = HashMap::new();
        keystore_map.insert(1000i64, keypair.public.to_bytes());
        let keystore = FakeKeystore(Mutex::new(keystore_map));

        let mech = CurveMechanism::with_keystore(Box::new(keystore), Some(keyfile));
        let mut header = Header::new("curve", 1000);
        mech.prep(&mut header, 30, 0).unwrap();
        let sig = mech.sign(b"HEADER.PAYLOAD").unwrap();
        assert!(mech.verify(&header, b"HEADER.TAMPERED", &sig, 0).is_err());
    }
}
