//! Scheme manager trust material: descriptors, the signed index, signature
//! verification, loading, and remote updates.
//!
//! A scheme manager is a trust root publishing issuers, credential types and
//! issuer public keys. On disk it is a directory whose contents are
//! authenticated by an ECDSA-signed index of SHA-256 hashes:
//!
//! ```text
//! <config>/<scheme>/description.xml    pk.pem    index    index.sig    timestamp
//!                   <issuer>/description.xml
//!                   <issuer>/PublicKeys/<counter>.xml
//!                   <issuer>/Issues/<credential>/description.xml
//! ```

pub mod index;
pub mod loader;
pub mod updater;
pub mod verify;

use crate::fs::Timestamp;
use crate::identifier::{AttributeTypeId, CredentialTypeId, IssuerId, SchemeManagerId};
use index::SchemeIndex;
use serde::{Deserialize, Serialize};

/// Parse state of a scheme manager. Only `Valid` schemes may be used for
/// cryptographic decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchemeManagerStatus {
    Valid,
    Unprocessed,
    InvalidIndex,
    InvalidSignature,
    ParsingError,
    ContentParsingError,
}

/// A string carrying its localized translations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranslatedString {
    #[serde(default)]
    pub en: Option<String>,
    #[serde(default)]
    pub nl: Option<String>,
}

impl TranslatedString {
    /// The languages every descriptor is expected to carry. A missing
    /// translation is a warning, not an error.
    pub const LANGUAGES: [&'static str; 2] = ["en", "nl"];

    pub fn missing_languages(&self) -> Vec<&'static str> {
        let mut missing = Vec::new();
        if self.en.is_none() {
            missing.push("en");
        }
        if self.nl.is_none() {
            missing.push("nl");
        }
        missing
    }
}

/// `description.xml` of a scheme manager.
#[derive(Debug, Clone, Deserialize)]
pub struct SchemeManagerDescription {
    #[serde(rename = "@version")]
    pub xml_version: u32,
    #[serde(rename = "Id")]
    pub id: String,
    #[serde(rename = "Url")]
    pub url: String,
    #[serde(rename = "Name", default)]
    pub name: TranslatedString,
    #[serde(rename = "Description", default)]
    pub description: TranslatedString,
    #[serde(rename = "KeyshareServer", default)]
    pub keyshare_server: Option<String>,
    #[serde(rename = "KeyshareWebsite", default)]
    pub keyshare_website: Option<String>,
    #[serde(rename = "KeyshareAttribute", default)]
    pub keyshare_attribute: Option<String>,
    #[serde(rename = "Contact", default)]
    pub contact: Option<String>,
}

/// A scheme manager as held by the configuration: the parsed descriptor plus
/// the load-time state that authenticates everything underneath it.
#[derive(Debug, Clone)]
pub struct SchemeManager {
    pub id: SchemeManagerId,
    pub url: String,
    pub name: TranslatedString,
    pub description: TranslatedString,
    /// URL of the keyshare server co-signing for this scheme, if any.
    pub keyshare_server: Option<String>,
    pub contact: Option<String>,
    pub xml_version: u32,
    pub timestamp: Timestamp,
    pub status: SchemeManagerStatus,
    pub index: SchemeIndex,
}

impl SchemeManager {
    /// A fresh, not yet parsed scheme manager.
    pub fn unprocessed(id: SchemeManagerId) -> Self {
        SchemeManager {
            id,
            url: String::new(),
            name: TranslatedString::default(),
            description: TranslatedString::default(),
            keyshare_server: None,
            contact: None,
            xml_version: 0,
            timestamp: Timestamp(0),
            status: SchemeManagerStatus::Unprocessed,
            index: SchemeIndex::new(),
        }
    }

    pub fn valid(&self) -> bool {
        self.status == SchemeManagerStatus::Valid
    }

    /// Whether sessions touching this scheme must involve its keyshare
    /// server.
    pub fn distributed(&self) -> bool {
        self.keyshare_server.is_some()
    }

    pub(crate) fn apply_description(&mut self, desc: SchemeManagerDescription) {
        self.url = desc.url;
        self.name = desc.name;
        self.description = desc.description;
        self.keyshare_server = desc.keyshare_server.filter(|s| !s.is_empty());
        self.contact = desc.contact;
        self.xml_version = desc.xml_version;
    }
}

/// `description.xml` of an issuer.
#[derive(Debug, Clone, Deserialize)]
pub struct IssuerDescription {
    #[serde(rename = "@version")]
    pub xml_version: u32,
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "SchemeManager")]
    pub scheme_manager: String,
    #[serde(rename = "Name", default)]
    pub name: TranslatedString,
    #[serde(rename = "ShortName", default)]
    pub short_name: TranslatedString,
    #[serde(rename = "ContactAddress", default)]
    pub contact_address: Option<String>,
    #[serde(rename = "ContactEMail", default)]
    pub contact_email: Option<String>,
}

/// An issuer: a party authorized under a scheme to mint credentials.
#[derive(Debug, Clone)]
pub struct Issuer {
    pub id: IssuerId,
    pub name: TranslatedString,
    pub short_name: TranslatedString,
    pub scheme_manager: SchemeManagerId,
    pub contact_address: Option<String>,
    pub contact_email: Option<String>,
    pub xml_version: u32,
}

/// `description.xml` of a credential type, under an issuer's `Issues/`
/// directory.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialTypeDescription {
    #[serde(rename = "@version")]
    pub xml_version: u32,
    #[serde(rename = "ID")]
    pub id: String,
    #[serde(rename = "IssuerID")]
    pub issuer_id: String,
    #[serde(rename = "SchemeManager")]
    pub scheme_manager: String,
    #[serde(rename = "Name", default)]
    pub name: TranslatedString,
    #[serde(rename = "ShortName", default)]
    pub short_name: TranslatedString,
    #[serde(rename = "Description", default)]
    pub description: TranslatedString,
    #[serde(rename = "IsSingleton", default)]
    pub is_singleton: bool,
    #[serde(rename = "Attributes", default)]
    pub attributes: AttributeTypeList,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AttributeTypeList {
    #[serde(rename = "Attribute", default)]
    pub attributes: Vec<AttributeTypeDescription>,
}

/// One `<Attribute>` element of a credential type descriptor.
#[derive(Debug, Clone, Deserialize)]
pub struct AttributeTypeDescription {
    #[serde(rename = "@id")]
    pub id: String,
    #[serde(rename = "@optional", default)]
    pub optional: bool,
    #[serde(rename = "@displayIndex", default)]
    pub display_index: Option<u32>,
    #[serde(rename = "Name", default)]
    pub name: TranslatedString,
    #[serde(rename = "Description", default)]
    pub description: TranslatedString,
}

/// A credential type: a named, ordered list of attribute types under an
/// issuer.
#[derive(Debug, Clone)]
pub struct CredentialType {
    pub id: CredentialTypeId,
    pub issuer: IssuerId,
    pub scheme_manager: SchemeManagerId,
    pub name: TranslatedString,
    pub short_name: TranslatedString,
    pub description: TranslatedString,
    pub is_singleton: bool,
    pub attributes: Vec<AttributeType>,
    pub xml_version: u32,
}

impl CredentialType {
    pub fn contains_attribute(&self, id: &AttributeTypeId) -> bool {
        self.attributes.iter().any(|a| a.id == *id)
    }
}

/// A single named field of a credential type.
#[derive(Debug, Clone)]
pub struct AttributeType {
    pub id: AttributeTypeId,
    pub credential_type: CredentialTypeId,
    /// Position of this attribute within the credential type.
    pub index: usize,
    pub optional: bool,
    pub display_index: Option<u32>,
    pub name: TranslatedString,
    pub description: TranslatedString,
}
