//! Content fingerprints.
//!
//! Every fingerprint is a lowercase hex digest. Values are hashed through
//! their canonical JSON rendering (object keys are kept sorted by
//! `serde_json`), so structurally equal values always hash equally.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256, Sha512};
use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use crate::error::ConfigError;

/// Digest used for every fingerprint in a store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    /// SHA-256
    #[default]
    Sha256,
    /// SHA-512
    Sha512,
}

impl HashAlgorithm {
    /// Algorithm name as persisted in the store.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            HashAlgorithm::Sha256 => "sha256",
            HashAlgorithm::Sha512 => "sha512",
        }
    }

    /// Hash raw bytes.
    #[must_use]
    pub fn hash_bytes(self, data: &[u8]) -> String {
        match self {
            HashAlgorithm::Sha256 => format!("{:x}", Sha256::digest(data)),
            HashAlgorithm::Sha512 => format!("{:x}", Sha512::digest(data)),
        }
    }

    /// Hash a string.
    #[must_use]
    pub fn hash_str(self, data: &str) -> String {
        self.hash_bytes(data.as_bytes())
    }

    /// Hash a value through its canonical serialization.
    #[must_use]
    pub fn hash_value(self, value: &Value) -> String {
        self.hash_str(&value.to_string())
    }

    /// Hash a file's content without loading it whole.
    ///
    /// # Errors
    ///
    /// Returns the underlying I/O error if the file cannot be opened or read.
    pub fn hash_file(self, path: &Path) -> io::Result<String> {
        match self {
            HashAlgorithm::Sha256 => Ok(format!("{:x}", stream_file::<Sha256>(path)?.finalize())),
            HashAlgorithm::Sha512 => Ok(format!("{:x}", stream_file::<Sha512>(path)?.finalize())),
        }
    }

    /// Aggregate fingerprint over named dependency fingerprints.
    ///
    /// Entries are sorted by name, so the result does not depend on the
    /// order dependencies were discovered in.
    pub fn hash_depends<'a, I>(self, entries: I) -> String
    where
        I: IntoIterator<Item = (&'a str, &'a str)>,
    {
        let mut lines: Vec<(&str, &str)> = entries.into_iter().collect();
        lines.sort_unstable();

        let mut buf = String::new();
        for (name, fingerprint) in lines {
            buf.push_str(name);
            buf.push('=');
            buf.push_str(fingerprint);
            buf.push('\n');
        }
        self.hash_str(&buf)
    }
}

fn stream_file<D: Digest>(path: &Path) -> io::Result<D> {
    let mut file = File::open(path)?;
    let mut hasher = D::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher)
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HashAlgorithm {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "sha256" => Ok(HashAlgorithm::Sha256),
            "sha512" => Ok(HashAlgorithm::Sha512),
            other => Err(ConfigError::InvalidConfig(format!(
                "unsupported hash algorithm '{other}'"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            HashAlgorithm::Sha256.hash_str("abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
        assert_eq!(HashAlgorithm::Sha512.hash_str("abc").len(), 128);
    }

    #[test]
    fn test_value_hash_ignores_key_order() {
        let a: Value = serde_json::from_str(r#"{"x": 1, "y": [1, 2]}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y": [1, 2], "x": 1}"#).unwrap();
        let algo = HashAlgorithm::Sha256;
        assert_eq!(algo.hash_value(&a), algo.hash_value(&b));
        assert_ne!(algo.hash_value(&a), algo.hash_value(&json!({"x": 2, "y": [1, 2]})));
    }

    #[test]
    fn test_depends_hash_is_order_independent() {
        let algo = HashAlgorithm::Sha256;
        let forward = algo.hash_depends([("a", "1"), ("b", "2")]);
        let backward = algo.hash_depends([("b", "2"), ("a", "1")]);
        assert_eq!(forward, backward);
        assert_ne!(forward, algo.hash_depends([("a", "1"), ("b", "3")]));
    }

    #[test]
    fn test_file_hash_matches_bytes_hash() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"hello world").unwrap();

        for algo in [HashAlgorithm::Sha256, HashAlgorithm::Sha512] {
            assert_eq!(algo.hash_file(file.path()).unwrap(), algo.hash_bytes(b"hello world"));
        }
    }

    #[test]
    fn test_file_hash_spans_read_buffers() {
        let data: Vec<u8> = (0..200_000u32).map(|i| u8::try_from(i % 251).unwrap()).collect();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&data).unwrap();

        let hash = HashAlgorithm::Sha512.hash_file(file.path()).unwrap();
        assert_eq!(hash.len(), 128);
        assert_eq!(hash, HashAlgorithm::Sha512.hash_bytes(&data));
    }

    #[test]
    fn test_parse() {
        assert_eq!("sha512".parse::<HashAlgorithm>().unwrap(), HashAlgorithm::Sha512);
        assert!("md5".parse::<HashAlgorithm>().is_err());
    }
}
