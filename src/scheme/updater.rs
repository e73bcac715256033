//! Syncs a stored scheme with its remote mirror.
//!
//! Downloads are gated on the remote `timestamp` being strictly newer than
//! the stored one. The new index and signature are staged under sibling
//! names, verified against the existing scheme public key, and only renamed
//! over the live copies after every file they attest has been fetched and
//! hash-checked. A crash mid-update therefore never leaves the live index
//! pointing at files that are not present yet.

use crate::error::Error;
use crate::fs as cfs;
use crate::identifier::{CredentialTypeId, IssuerId, SchemeManagerId};
use crate::scheme::index::SchemeIndex;
use crate::scheme::{verify, SchemeManager, SchemeManagerDescription};
use crate::transport::Transport;
use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeSet;
use std::fs;
use std::path::Path;

static ISSUER_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^/]+)/([^/]+)/description\.xml$").expect("static pattern"));
static CREDENTIAL_PATTERN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^([^/]+)/([^/]+)/Issues/([^/]+)/description\.xml$").expect("static pattern")
});

/// Identifiers that appeared while updating schemes. Callers use this to
/// decide what must be re-parsed or re-fetched.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ChangeSet {
    pub scheme_managers: BTreeSet<SchemeManagerId>,
    pub issuers: BTreeSet<IssuerId>,
    pub credential_types: BTreeSet<CredentialTypeId>,
}

impl ChangeSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.scheme_managers.is_empty()
            && self.issuers.is_empty()
            && self.credential_types.is_empty()
    }

    fn record_path(&mut self, path: &str) {
        if let Some(m) = CREDENTIAL_PATTERN.captures(path) {
            if let Ok(id) = format!("{}.{}.{}", &m[1], &m[2], &m[3]).parse() {
                self.credential_types.insert(id);
            }
            return;
        }
        if let Some(m) = ISSUER_PATTERN.captures(path) {
            if let Ok(id) = format!("{}.{}", &m[1], &m[2]).parse() {
                self.issuers.insert(id);
            }
        }
    }
}

/// Download and parse a remote scheme descriptor. Returns the parsed
/// descriptor along with its raw bytes so installers can store them
/// unmodified.
pub fn download_scheme_description(
    transport: &dyn Transport,
) -> Result<(SchemeManagerDescription, Vec<u8>), Error> {
    let bytes = transport.get_bytes("description.xml")?;
    let text = std::str::from_utf8(&bytes)
        .map_err(|e| Error::Parsing(format!("Scheme descriptor is not UTF-8: {}", e)))?;
    let desc: SchemeManagerDescription = quick_xml::de::from_str(text)
        .map_err(|e| Error::Parsing(format!("Invalid scheme descriptor XML: {}", e)))?;
    Ok((desc, bytes))
}

/// Download the remote index and signature, verify the signature against the
/// stored `pk.pem`, and store both. Used during installation, when there is
/// no previous index to preserve.
pub fn download_signed_index(
    config_path: &Path,
    id: &SchemeManagerId,
    transport: &dyn Transport,
) -> Result<(), Error> {
    let dir = config_path.join(id.as_str());
    let index_bytes = transport.get_bytes("index")?;
    let sig_bytes = transport.get_bytes("index.sig")?;
    let pk_pem = fs::read(dir.join("pk.pem"))?;
    verify::verify_index_bytes(&index_bytes, &pk_pem, &sig_bytes)?;
    cfs::save_file(&dir.join("index"), &index_bytes)?;
    cfs::save_file(&dir.join("index.sig"), &sig_bytes)?;
    Ok(())
}

/// Sync the stored scheme with its remote. Returns `true` when anything was
/// downloaded, `false` when the remote is not newer than the stored copy.
///
/// Newly appeared issuer and credential-type descriptor paths are recorded in
/// `changes`; the downloaded files are not parsed here.
pub fn update_scheme(
    config_path: &Path,
    manager: &mut SchemeManager,
    transport: &dyn Transport,
    changes: &mut ChangeSet,
) -> Result<bool, Error> {
    // Anything to do at all?
    let remote_timestamp = cfs::Timestamp::parse(&transport.get_bytes("timestamp")?)?;
    if remote_timestamp <= manager.timestamp {
        return Ok(false);
    }
    log::info!(
        "Updating scheme {} ({} -> {})",
        manager.id,
        manager.timestamp,
        remote_timestamp
    );

    let dir = config_path.join(manager.id.as_str());

    // Fetch the new index and check that it is validly signed by the key we
    // already trust, then stage both next to the live copies.
    let index_bytes = transport.get_bytes("index")?;
    let sig_bytes = transport.get_bytes("index.sig")?;
    let pk_pem = fs::read(dir.join("pk.pem"))?;
    verify::verify_index_bytes(&index_bytes, &pk_pem, &sig_bytes)?;
    let index_text = std::str::from_utf8(&index_bytes)
        .map_err(|e| Error::InvalidIndex(format!("Index is not UTF-8: {}", e)))?;
    let new_index = SchemeIndex::parse(index_text)?;

    let staged_index = dir.join("index.new");
    let staged_sig = dir.join("index.sig.new");
    cfs::save_file(&staged_index, &index_bytes)?;
    cfs::save_file(&staged_sig, &sig_bytes)?;

    let prefix = format!("{}/", manager.id);
    for (path, new_hash) in new_index.iter() {
        let stripped = path.strip_prefix(&prefix).ok_or_else(|| {
            Error::InvalidIndex(format!(
                "Index of scheme {} lists foreign path {}",
                manager.id, path
            ))
        })?;
        let full = config_path.join(path);
        let unchanged = manager.index.get(path) == Some(new_hash);
        if unchanged && cfs::path_exists(&full)? {
            continue;
        }
        if let Some(parent) = full.parent() {
            cfs::ensure_dir_exists(parent)?;
        }
        // The scheme URL already ends with the scheme name.
        transport.get_signed_file(stripped, &full, new_hash)?;
        changes.record_path(path);
    }

    // Every attested file is on disk; commit the staged index.
    fs::rename(&staged_index, dir.join("index"))?;
    fs::rename(&staged_sig, dir.join("index.sig"))?;

    manager.index = new_index;
    manager.timestamp = remote_timestamp;
    changes.scheme_managers.insert(manager.id.clone());
    Ok(true)
}
