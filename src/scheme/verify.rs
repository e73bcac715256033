//! Scheme signature verification and authenticated file reads.
//!
//! Every scheme directory carries an `index` of file hashes, an `index.sig`
//! holding an ECDSA-SHA256 signature over the raw index bytes, and the scheme
//! public key `pk.pem`. A file under the scheme may only be used after its
//! SHA-256 hash has been checked against the signed index.
//!
//! The verifier never panics on malformed input: every PEM, SPKI or DER
//! deserialization fault is mapped to [`Error::InvalidSignature`].

use crate::error::Error;
use crate::scheme::index::{FileHash, SchemeIndex};
use once_cell::sync::Lazy;
use p256::ecdsa::signature::Verifier;
use p256::ecdsa::{Signature, VerifyingKey};
use regex::Regex;
use std::fs;
use std::path::Path;

/// Files and directories that never occur in a scheme's index.
static SIGNATURE_EXEMPT: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"/\.git(/.*)?",
        r"^.*?/pk\.pem$",
        r"^.*?/sk\.pem$",
        r"^.*?/index$",
        r"^.*?/index\.new$",
        r"^.*?/index\.sig$",
        r"^.*?/index\.sig\.new$",
        r"^.*?/AUTHORS$",
        r"^.*?/LICENSE$",
        r"^.*?/README\.md$",
        r"^.*?/.*?/PrivateKeys$",
        r"^.*?/.*?/PrivateKeys/\d+\.xml$",
        r"\.DS_Store$",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static pattern"))
    .collect()
});

/// Whether a configuration-relative path is exempt from index signing.
pub fn is_signature_exempt(relative_path: &str) -> bool {
    SIGNATURE_EXEMPT.iter().any(|re| re.is_match(relative_path))
}

/// Parse a PEM-encoded PKIX EC public key into a P-256 verifying key.
pub fn parse_pem_ecdsa_public_key(pem_bytes: &[u8]) -> Result<VerifyingKey, Error> {
    let block = pem::parse(pem_bytes)
        .map_err(|e| Error::InvalidSignature(format!("Invalid public key PEM: {}", e)))?;
    let spki = spki::SubjectPublicKeyInfoRef::try_from(block.contents())
        .map_err(|e| Error::InvalidSignature(format!("Invalid public key SPKI: {}", e)))?;
    VerifyingKey::try_from(spki)
        .map_err(|e| Error::InvalidSignature(format!("Invalid ECDSA public key: {}", e)))
}

/// Verify an ECDSA-SHA256 signature (ASN.1 DER `SEQUENCE(r, s)`) over the raw
/// index bytes.
pub fn verify_index_bytes(
    index_bytes: &[u8],
    pk_pem: &[u8],
    sig_der: &[u8],
) -> Result<(), Error> {
    let verifying_key = parse_pem_ecdsa_public_key(pk_pem)?;
    let signature = Signature::from_der(sig_der)
        .map_err(|e| Error::InvalidSignature(format!("Invalid signature DER: {}", e)))?;
    verifying_key
        .verify(index_bytes, &signature)
        .map_err(|_| Error::InvalidSignature("Scheme signature was invalid".to_string()))
}

/// Verify the signature on the scheme index file in the specified scheme
/// directory.
pub fn verify_index_signature(scheme_dir: &Path) -> Result<(), Error> {
    let index_path = scheme_dir.join("index");
    let sig_path = scheme_dir.join("index.sig");
    let pk_path = scheme_dir.join("pk.pem");

    for path in [&index_path, &sig_path, &pk_path] {
        if !crate::fs::path_exists(path)? {
            return Err(Error::InvalidSignature(
                "Missing scheme index file, signature, or public key".to_string(),
            ));
        }
    }

    let index_bytes = fs::read(&index_path)?;
    let pk_bytes = fs::read(&pk_path)?;
    let sig_bytes = fs::read(&sig_path)?;
    verify_index_bytes(&index_bytes, &pk_bytes, &sig_bytes)
}

/// Read the file at the configuration-relative `path` and verify its
/// authenticity against the signed scheme index.
///
/// `config_path` is the configuration root that index paths are relative to.
pub fn read_authenticated_file(
    config_path: &Path,
    index: &SchemeIndex,
    path: &str,
) -> Result<Vec<u8>, Error> {
    let signed_hash = index
        .get(path)
        .ok_or_else(|| Error::NotIndexed(path.to_string()))?;

    let bytes = fs::read(config_path.join(path))?;
    if FileHash::of(&bytes) != *signed_hash {
        return Err(Error::HashMismatch(path.to_string()));
    }
    Ok(bytes)
}
