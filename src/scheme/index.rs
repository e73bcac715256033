//! The signed scheme index: a list of scheme-relative file paths along with
//! their SHA-256 hashes.
//!
//! The index file is line-oriented UTF-8: one `<hex-sha256> <path>` entry per
//! line, paths forward-slash-separated and relative to the configuration
//! root. Its raw bytes are what the scheme signature covers; the parsed form
//! is what every authenticated file read consults.

use crate::error::Error;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// SHA-256 hash of an authenticated file under a scheme manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHash(pub [u8; 32]);

impl FileHash {
    pub fn of(content: &[u8]) -> Self {
        let digest = Sha256::digest(content);
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&digest);
        FileHash(hash)
    }

    pub fn from_hex(s: &str) -> Result<Self, Error> {
        if s.len() != 64 {
            return Err(Error::InvalidIndex(format!(
                "File hash must be 64 hex characters, got {}",
                s.len()
            )));
        }
        let bytes = hex::decode(s)
            .map_err(|e| Error::InvalidIndex(format!("Invalid file hash hex: {}", e)))?;
        let mut hash = [0u8; 32];
        hash.copy_from_slice(&bytes);
        Ok(FileHash(hash))
    }
}

impl fmt::Display for FileHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

/// A (signed) list of files under a scheme manager along with their SHA-256
/// hashes.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchemeIndex {
    entries: BTreeMap<String, FileHash>,
}

impl SchemeIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse an index file. Empty lines are skipped; any malformed line is an
    /// `InvalidIndex` error carrying the 1-based line number.
    pub fn parse(content: &str) -> Result<Self, Error> {
        let mut entries = BTreeMap::new();
        for (lineno, line) in content.split('\n').enumerate() {
            if line.is_empty() {
                continue;
            }
            let mut parts = line.splitn(2, ' ');
            let (hash, path) = match (parts.next(), parts.next()) {
                (Some(hash), Some(path)) if !path.is_empty() && !path.contains(' ') => {
                    (hash, path)
                }
                _ => {
                    return Err(Error::InvalidIndex(format!(
                        "Index line {} has an incorrect number of parts",
                        lineno + 1
                    )))
                }
            };
            let hash = FileHash::from_hex(hash).map_err(|e| {
                Error::InvalidIndex(format!("Index line {}: {}", lineno + 1, e))
            })?;
            entries.insert(path.to_string(), hash);
        }
        Ok(SchemeIndex { entries })
    }

    pub fn get(&self, path: &str) -> Option<&FileHash> {
        self.entries.get(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.entries.contains_key(path)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &FileHash)> {
        self.entries.iter().map(|(p, h)| (p.as_str(), h))
    }

    pub fn insert(&mut self, path: impl Into<String>, hash: FileHash) {
        self.entries.insert(path.into(), hash);
    }

    /// A directory counts as "in scheme" if any indexed path has it as a
    /// prefix.
    pub fn dir_in_scheme(&self, dir: &str) -> bool {
        self.entries.keys().any(|path| path.starts_with(dir))
    }
}

impl fmt::Display for SchemeIndex {
    /// The canonical serialization: entries in lexicographic path order, one
    /// space separator, every line newline-terminated.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (path, hash) in &self.entries {
            writeln!(f, "{} {}", hash, path)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const HASH_A: &str = "0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a0a";
    const HASH_B: &str = "b1b1b1b1b1b1b1b1b1b1b1b1b1b1b1b1b1b1b1b1b1b1b1b1b1b1b1b1b1b1b1b1";

    #[test]
    fn test_parse_and_lookup() {
        let content = format!(
            "{} irma-demo/RU/description.xml\n{} irma-demo/description.xml\n",
            HASH_A, HASH_B
        );
        let index = SchemeIndex::parse(&content).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(
            index.get("irma-demo/RU/description.xml").unwrap().to_string(),
            HASH_A
        );
        assert!(!index.contains("irma-demo/RU/logo.png"));
    }

    #[test]
    fn test_empty_lines_ignored() {
        let content = format!("\n{} irma-demo/description.xml\n\n", HASH_A);
        let index = SchemeIndex::parse(&content).unwrap();
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn test_malformed_line_reports_line_number() {
        let content = format!("{} irma-demo/description.xml\nnot-an-entry\n", HASH_A);
        let err = SchemeIndex::parse(&content).unwrap_err();
        match err {
            Error::InvalidIndex(msg) => assert!(msg.contains("line 2"), "{}", msg),
            other => panic!("expected InvalidIndex, got {:?}", other),
        }
    }

    #[test]
    fn test_short_hash_rejected() {
        let content = "abcdef irma-demo/description.xml\n";
        let err = SchemeIndex::parse(content).unwrap_err();
        assert!(matches!(err, Error::InvalidIndex(_)));
    }

    #[test]
    fn test_non_hex_hash_rejected() {
        let content = format!("{} irma-demo/description.xml\n", "z".repeat(64));
        assert!(SchemeIndex::parse(&content).is_err());
    }

    #[test]
    fn test_canonical_roundtrip() {
        // Input deliberately out of order; serialization sorts by path.
        let content = format!(
            "{} irma-demo/b\n{} irma-demo/a\n",
            HASH_B, HASH_A
        );
        let index = SchemeIndex::parse(&content).unwrap();
        let canonical = index.to_string();
        assert_eq!(
            canonical,
            format!("{} irma-demo/a\n{} irma-demo/b\n", HASH_A, HASH_B)
        );
        // Parsing the canonical form again is the identity.
        assert_eq!(SchemeIndex::parse(&canonical).unwrap(), index);
    }

    #[test]
    fn test_dir_in_scheme() {
        let content = format!("{} irma-demo/RU/Issues/studentCard/description.xml\n", HASH_A);
        let index = SchemeIndex::parse(&content).unwrap();
        assert!(index.dir_in_scheme("irma-demo/RU"));
        assert!(index.dir_in_scheme("irma-demo/RU/Issues"));
        assert!(!index.dir_in_scheme("irma-demo/PBDF"));
    }

    #[test]
    fn test_file_hash_of_content() {
        let hash = FileHash::of(b"");
        assert_eq!(
            hash.to_string(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
