// Tether - Remote debug session orchestrator
// Copyright (C) 2024 Zhuo Zhang and Wuqi Zhang
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use std::{
    fmt,
    io::{self, Read},
    path::Path,
    str::FromStr,
};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Length of a fingerprint in hex characters.
pub const FINGERPRINT_HEX_LEN: usize = 64;

/// SHA-256 digest of a deployable binary, stored as lowercase hex.
///
/// The running VM announces this value right before it opens a debug endpoint,
/// which is how a freshly started instance is mapped back to a program name.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

/// Error returned when a string is not a 64-character lowercase hex digest.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid fingerprint `{0}`: expected 64 lowercase hex characters")]
pub struct InvalidFingerprint(pub String);

impl Fingerprint {
    /// Fingerprint of an in-memory byte slice.
    pub fn from_bytes(bytes: impl AsRef<[u8]>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes.as_ref());
        Self(hex::encode(hasher.finalize()))
    }

    /// Fingerprint of everything readable from `reader`.
    pub fn from_reader(mut reader: impl Read) -> io::Result<Self> {
        let mut hasher = Sha256::new();
        let mut buf = [0_u8; 64 * 1024];
        loop {
            let read = reader.read(&mut buf)?;
            if read == 0 {
                break;
            }
            hasher.update(&buf[..read]);
        }
        Ok(Self(hex::encode(hasher.finalize())))
    }

    /// Fingerprint of a file's contents, streamed.
    pub fn from_file(path: impl AsRef<Path>) -> io::Result<Self> {
        let file = std::fs::File::open(path)?;
        Self::from_reader(file)
    }

    /// The hex digest.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for Fingerprint {
    type Err = InvalidFingerprint;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let valid = trimmed.len() == FINGERPRINT_HEX_LEN
            && trimmed.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(Self(trimmed.to_string()))
        } else {
            Err(InvalidFingerprint(s.to_string()))
        }
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = Fingerprint::from_bytes(b"program bytes");
        let b = Fingerprint::from_bytes(b"program bytes");
        assert_eq!(a, b);
        assert_eq!(a.as_str().len(), FINGERPRINT_HEX_LEN);
    }

    #[test]
    fn test_different_bytes_different_fingerprints() {
        assert_ne!(Fingerprint::from_bytes(b"alpha"), Fingerprint::from_bytes(b"beta"));
    }

    #[test]
    fn test_known_digest() {
        assert_eq!(
            Fingerprint::from_bytes(b"").as_str(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_file_matches_bytes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"deployable").unwrap();
        file.flush().unwrap();
        assert_eq!(Fingerprint::from_file(file.path()).unwrap(), Fingerprint::from_bytes(b"deployable"));
    }

    #[test]
    fn test_parse_validates_shape() {
        let digest = Fingerprint::from_bytes(b"x");
        let parsed: Fingerprint = format!("  {digest}\n").parse().unwrap();
        assert_eq!(parsed, digest);

        assert!("abc".parse::<Fingerprint>().is_err());
        assert!(digest.as_str().to_uppercase().parse::<Fingerprint>().is_err());
    }
}
