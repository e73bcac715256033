//! Test fixtures: writes complete, validly signed scheme directories so the
//! loader, updater and configuration can be exercised against real trust
//! material.

use crate::fs as cfs;
use crate::scheme::index::{FileHash, SchemeIndex};
use p256::ecdsa::signature::Signer;
use p256::ecdsa::{Signature, SigningKey};
use p256::pkcs8::{EncodePublicKey, LineEnding};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

pub const DEMO_SCHEME: &str = "irma-demo";

/// Builder for an on-disk scheme directory with a validly signed index.
pub struct SchemeWriter {
    config_root: PathBuf,
    scheme: String,
    signing_key: SigningKey,
    /// Indexed files, keyed by path relative to the scheme directory.
    files: BTreeMap<String, Vec<u8>>,
}

impl SchemeWriter {
    pub fn new(config_root: &Path, scheme: &str) -> Self {
        SchemeWriter {
            config_root: config_root.to_path_buf(),
            scheme: scheme.to_string(),
            signing_key: SigningKey::random(&mut rand::rngs::OsRng),
            files: BTreeMap::new(),
        }
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn scheme_dir(&self) -> PathBuf {
        self.config_root.join(&self.scheme)
    }

    /// Add an indexed file, path relative to the scheme directory.
    pub fn file(&mut self, rel: &str, content: impl Into<Vec<u8>>) -> &mut Self {
        self.files.insert(rel.to_string(), content.into());
        self
    }

    pub fn remove_file(&mut self, rel: &str) -> &mut Self {
        self.files.remove(rel);
        self
    }

    pub fn scheme_description(&mut self, keyshare_server: Option<&str>) -> &mut Self {
        let keyshare = keyshare_server
            .map(|url| format!("<KeyshareServer>{}</KeyshareServer>", url))
            .unwrap_or_default();
        let xml = format!(
            r#"<SchemeManager version="7">
                <Id>{id}</Id>
                <Url>https://schemes.example.com/{id}</Url>
                <Name><en>Demo</en><nl>Demo</nl></Name>
                <Description><en>Demo scheme.</en><nl>Demoschema.</nl></Description>
                {keyshare}
            </SchemeManager>"#,
            id = self.scheme,
            keyshare = keyshare,
        );
        self.file("description.xml", xml)
    }

    pub fn issuer(&mut self, issuer: &str) -> &mut Self {
        let xml = format!(
            r#"<Issuer version="4">
                <ID>{issuer}</ID>
                <SchemeManager>{scheme}</SchemeManager>
                <Name><en>{issuer}</en><nl>{issuer}</nl></Name>
                <ShortName><en>{issuer}</en><nl>{issuer}</nl></ShortName>
            </Issuer>"#,
            issuer = issuer,
            scheme = self.scheme,
        );
        self.file(&format!("{}/description.xml", issuer), xml);
        self.file(&format!("{}/logo.png", issuer), b"\x89PNG".to_vec());
        self.file(
            &format!("{}/PublicKeys/2.xml", issuer),
            crate::keys::testkeys::public_key_xml(2),
        );
        self
    }

    pub fn credential_type(&mut self, issuer: &str, cred: &str, attributes: &[&str]) -> &mut Self {
        let attrs = attributes
            .iter()
            .map(|a| {
                format!(
                    r#"<Attribute id="{a}"><Name><en>{a}</en><nl>{a}</nl></Name></Attribute>"#,
                    a = a
                )
            })
            .collect::<String>();
        let xml = format!(
            r#"<IssueSpecification version="4">
                <ID>{cred}</ID>
                <IssuerID>{issuer}</IssuerID>
                <SchemeManager>{scheme}</SchemeManager>
                <Name><en>{cred}</en><nl>{cred}</nl></Name>
                <Attributes>{attrs}</Attributes>
            </IssueSpecification>"#,
            cred = cred,
            issuer = issuer,
            scheme = self.scheme,
            attrs = attrs,
        );
        self.file(&format!("{}/Issues/{}/description.xml", issuer, cred), xml);
        self.file(
            &format!("{}/Issues/{}/logo.png", issuer, cred),
            b"\x89PNG".to_vec(),
        );
        self
    }

    pub fn timestamp(&mut self, secs: u64) -> &mut Self {
        self.file("timestamp", secs.to_string())
    }

    /// The standard fixture: `irma-demo.RU.studentCard` with two attributes.
    pub fn standard(&mut self) -> &mut Self {
        self.scheme_description(None)
            .issuer("RU")
            .credential_type("RU", "studentCard", &["university", "studentID"])
            .timestamp(1500000000)
    }

    pub fn build_index(&self) -> SchemeIndex {
        let mut index = SchemeIndex::new();
        for (rel, content) in &self.files {
            index.insert(format!("{}/{}", self.scheme, rel), FileHash::of(content));
        }
        index
    }

    /// Write all files, the index, its signature and the public key.
    pub fn write(&self) {
        let dir = self.scheme_dir();
        for (rel, content) in &self.files {
            let path = dir.join(rel);
            cfs::ensure_dir_exists(path.parent().unwrap()).unwrap();
            cfs::save_file(&path, content).unwrap();
        }
        self.write_signed_index(&self.build_index());
        let pem = self
            .signing_key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap();
        cfs::save_file(&dir.join("pk.pem"), pem.as_bytes()).unwrap();
    }

    /// Write (or rewrite) the index and signature for the given index.
    pub fn write_signed_index(&self, index: &SchemeIndex) {
        let dir = self.scheme_dir();
        cfs::ensure_dir_exists(&dir).unwrap();
        let index_bytes = index.to_string().into_bytes();
        let sig: Signature = self.signing_key.sign(&index_bytes);
        cfs::save_file(&dir.join("index"), &index_bytes).unwrap();
        cfs::save_file(&dir.join("index.sig"), sig.to_der().as_bytes()).unwrap();
    }

    /// Overwrite a file on disk without updating the index, i.e. tamper with
    /// it.
    pub fn tamper(&self, rel: &str, content: &[u8]) {
        cfs::save_file(&self.scheme_dir().join(rel), content).unwrap();
    }

    /// Content of an indexed file, for in-memory remotes.
    pub fn content(&self, rel: &str) -> Option<&[u8]> {
        self.files.get(rel).map(|v| v.as_slice())
    }

    pub fn files(&self) -> impl Iterator<Item = (&str, &[u8])> {
        self.files.iter().map(|(p, c)| (p.as_str(), c.as_slice()))
    }

    pub fn signed_index_bytes(&self) -> (Vec<u8>, Vec<u8>) {
        let index_bytes = self.build_index().to_string().into_bytes();
        let sig: Signature = self.signing_key.sign(&index_bytes);
        (index_bytes, sig.to_der().as_bytes().to_vec())
    }

    pub fn public_key_pem(&self) -> String {
        self.signing_key
            .verifying_key()
            .to_public_key_pem(LineEnding::LF)
            .unwrap()
    }
}
