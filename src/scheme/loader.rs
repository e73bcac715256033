//! Loads one scheme manager directory into memory.
//!
//! Order matters: the index signature is checked before anything under the
//! scheme is trusted, every descriptor is read through the authenticated
//! store, and the scheme only reaches `Valid` once all of its issuers and
//! credential types parsed.

use crate::error::{Error, SchemeError};
use crate::identifier::{AttributeTypeId, CredentialTypeId, IssuerId, SchemeManagerId};
use crate::scheme::verify::{self, read_authenticated_file};
use crate::scheme::{
    AttributeType, CredentialType, CredentialTypeDescription, Issuer, IssuerDescription,
    SchemeManager, SchemeManagerDescription, SchemeManagerStatus,
};
use std::collections::HashSet;
use std::fs;
use std::path::Path;

/// The in-memory result of loading one scheme directory.
#[derive(Debug)]
pub struct ParsedScheme {
    pub manager: SchemeManager,
    pub issuers: Vec<Issuer>,
    pub credential_types: Vec<CredentialType>,
    pub attribute_types: Vec<AttributeType>,
    pub warnings: Vec<String>,
}

/// A failed load: the partially parsed manager (kept so its URL remains
/// available for recovery) plus the scheme-scoped error.
#[derive(Debug)]
pub struct SchemeLoadFailure {
    pub manager: SchemeManager,
    pub error: SchemeError,
}

/// Load and validate the scheme directory `<config_path>/<id>`.
pub fn load_scheme(
    config_path: &Path,
    id: SchemeManagerId,
) -> Result<ParsedScheme, SchemeLoadFailure> {
    let mut manager = SchemeManager::unprocessed(id.clone());
    let mut scheme = ParsedSchemeContent::default();

    match load_inner(config_path, &mut manager, &mut scheme) {
        Ok(()) => {
            manager.status = SchemeManagerStatus::Valid;
            Ok(ParsedScheme {
                manager,
                issuers: scheme.issuers,
                credential_types: scheme.credential_types,
                attribute_types: scheme.attribute_types,
                warnings: scheme.warnings,
            })
        }
        Err((status, cause)) => {
            manager.status = status;
            Err(SchemeLoadFailure {
                error: SchemeError::new(id, status, cause),
                manager,
            })
        }
    }
}

#[derive(Debug, Default)]
struct ParsedSchemeContent {
    issuers: Vec<Issuer>,
    credential_types: Vec<CredentialType>,
    attribute_types: Vec<AttributeType>,
    warnings: Vec<String>,
}

type LoadStep<T> = Result<T, (SchemeManagerStatus, Error)>;

fn load_inner(
    config_path: &Path,
    manager: &mut SchemeManager,
    scheme: &mut ParsedSchemeContent,
) -> LoadStep<()> {
    let scheme_name = manager.id.to_string();
    let dir = config_path.join(&scheme_name);

    // 1. Verify the index signature before trusting anything below.
    verify::verify_index_signature(&dir)
        .map_err(|e| (SchemeManagerStatus::InvalidSignature, e))?;

    // 2. Parse the index.
    let index_bytes = fs::read(dir.join("index"))
        .map_err(|e| (SchemeManagerStatus::InvalidIndex, e.into()))?;
    let index_text = String::from_utf8(index_bytes).map_err(|e| {
        (
            SchemeManagerStatus::InvalidIndex,
            Error::InvalidIndex(format!("Index is not UTF-8: {}", e)),
        )
    })?;
    manager.index = crate::scheme::index::SchemeIndex::parse(&index_text)
        .map_err(|e| (SchemeManagerStatus::InvalidIndex, e))?;

    // 3. Read and check the scheme descriptor.
    let desc_path = format!("{}/description.xml", scheme_name);
    let desc_bytes = read_authenticated_file(config_path, &manager.index, &desc_path)
        .map_err(|e| (SchemeManagerStatus::ParsingError, e))?;
    let desc: SchemeManagerDescription = parse_xml(&desc_bytes)
        .map_err(|e| (SchemeManagerStatus::ParsingError, e))?;
    check_scheme(&scheme_name, &dir, &desc)
        .map_err(|e| (SchemeManagerStatus::ParsingError, e))?;
    check_translations(
        &format!("Scheme {}", scheme_name),
        [("Name", &desc.name), ("Description", &desc.description)],
        &mut scheme.warnings,
    );
    manager.apply_description(desc);

    // 4. Warn about on-disk material the index does not cover.
    warn_unsigned_files(config_path, &dir, &manager.index, &mut scheme.warnings)
        .map_err(|e| (SchemeManagerStatus::ParsingError, e))?;

    // 5. The modification timestamp is mandatory.
    let timestamp = crate::fs::read_timestamp(&dir.join("timestamp"))
        .map_err(|e| (SchemeManagerStatus::ParsingError, e))?
        .ok_or_else(|| {
            (
                SchemeManagerStatus::ParsingError,
                Error::Parsing(format!("Scheme {} has no timestamp", scheme_name)),
            )
        })?;
    manager.timestamp = timestamp;

    // 6+7. Issuers and their credential types.
    load_issuers(config_path, manager, scheme)
        .map_err(|e| (SchemeManagerStatus::ContentParsingError, e))?;

    Ok(())
}

fn parse_xml<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, Error> {
    let text = std::str::from_utf8(bytes)
        .map_err(|e| Error::Parsing(format!("Descriptor is not UTF-8: {}", e)))?;
    quick_xml::de::from_str(text).map_err(|e| Error::Parsing(format!("Invalid XML: {}", e)))
}

fn check_scheme(name: &str, dir: &Path, desc: &SchemeManagerDescription) -> Result<(), Error> {
    if desc.xml_version < 7 {
        return Err(Error::UnsupportedVersion(format!(
            "Scheme descriptor version {} (minimum 7)",
            desc.xml_version
        )));
    }
    if desc.id != name {
        return Err(Error::Parsing(format!(
            "Scheme {} has wrong directory name {}",
            desc.id, name
        )));
    }
    if desc.keyshare_server.as_deref().is_some_and(|s| !s.is_empty())
        && !crate::fs::path_exists(&dir.join("kss-0.pem"))?
    {
        return Err(Error::Parsing(format!(
            "Scheme {} has a keyshare URL but no keyshare public key kss-0.pem",
            name
        )));
    }
    Ok(())
}

/// Walk the scheme subtree and warn for every file or directory that is
/// neither indexed nor signature-exempt.
fn warn_unsigned_files(
    config_path: &Path,
    dir: &Path,
    index: &crate::scheme::index::SchemeIndex,
    warnings: &mut Vec<String>,
) -> Result<(), Error> {
    let mut stack = vec![dir.to_path_buf()];
    while let Some(current) = stack.pop() {
        for entry in sorted_dir(&current)? {
            let path = entry.path();
            let rel = relative_path(config_path, &path)?;
            if verify::is_signature_exempt(&rel) {
                continue;
            }
            if entry.file_type()?.is_dir() {
                if !index.dir_in_scheme(&rel) {
                    warnings.push(format!("Ignored dir: {}", rel));
                }
                stack.push(path);
            } else if !index.contains(&rel) {
                warnings.push(format!("Ignored file: {}", rel));
            }
        }
    }
    Ok(())
}

fn load_issuers(
    config_path: &Path,
    manager: &SchemeManager,
    scheme: &mut ParsedSchemeContent,
) -> Result<(), Error> {
    let scheme_dir = config_path.join(manager.id.as_str());
    for entry in sorted_dir(&scheme_dir)? {
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let basename = entry.file_name().to_string_lossy().into_owned();
        if basename.starts_with('.') {
            continue;
        }
        let rel = format!("{}/{}/description.xml", manager.id, basename);
        if !crate::fs::path_exists(&entry.path().join("description.xml"))? {
            continue;
        }
        let bytes = read_authenticated_file(config_path, &manager.index, &rel)?;
        let desc: IssuerDescription = parse_xml(&bytes)?;
        let issuer = check_issuer(manager, &basename, &entry.path(), desc, scheme)?;
        load_credential_types(config_path, manager, &issuer, &entry.path(), scheme)?;
        scheme.issuers.push(issuer);
    }
    Ok(())
}

fn check_issuer(
    manager: &SchemeManager,
    basename: &str,
    dir: &Path,
    desc: IssuerDescription,
    scheme: &mut ParsedSchemeContent,
) -> Result<Issuer, Error> {
    if desc.xml_version < 4 {
        return Err(Error::UnsupportedVersion(format!(
            "Issuer descriptor version {} (minimum 4)",
            desc.xml_version
        )));
    }
    let id = IssuerId::from_parts(&manager.id, &desc.id);
    if desc.id != basename {
        return Err(Error::Parsing(format!(
            "Issuer {} has wrong directory name {}",
            id, basename
        )));
    }
    if desc.scheme_manager != manager.id.as_str() {
        return Err(Error::Parsing(format!(
            "Issuer {} has wrong SchemeManager {}",
            id, desc.scheme_manager
        )));
    }
    check_translations(
        &format!("Issuer {}", id),
        [("Name", &desc.name), ("ShortName", &desc.short_name)],
        &mut scheme.warnings,
    );
    if public_key_counters(dir)?.is_empty() {
        scheme
            .warnings
            .push(format!("Issuer {} has no public keys", id));
    }
    if !crate::fs::path_exists(&dir.join("logo.png"))? {
        scheme.warnings.push(format!("Issuer {} has no logo.png", id));
    }
    Ok(Issuer {
        id,
        name: desc.name,
        short_name: desc.short_name,
        scheme_manager: manager.id.clone(),
        contact_address: desc.contact_address,
        contact_email: desc.contact_email,
        xml_version: desc.xml_version,
    })
}

fn load_credential_types(
    config_path: &Path,
    manager: &SchemeManager,
    issuer: &Issuer,
    issuer_dir: &Path,
    scheme: &mut ParsedSchemeContent,
) -> Result<(), Error> {
    let issues_dir = issuer_dir.join("Issues");
    if !crate::fs::path_exists(&issues_dir)? {
        scheme
            .warnings
            .push(format!("Issuer {} has no credential types", issuer.id));
        return Ok(());
    }

    let mut found = false;
    for entry in sorted_dir(&issues_dir)? {
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let basename = entry.file_name().to_string_lossy().into_owned();
        let rel = format!(
            "{}/{}/Issues/{}/description.xml",
            manager.id,
            issuer.id.name(),
            basename
        );
        if !crate::fs::path_exists(&entry.path().join("description.xml"))? {
            continue;
        }
        let bytes = read_authenticated_file(config_path, &manager.index, &rel)?;
        let desc: CredentialTypeDescription = parse_xml(&bytes)?;
        let cred = check_credential_type(manager, issuer, &basename, &entry.path(), desc, scheme)?;
        found = true;

        for attr in &cred.attributes {
            scheme.attribute_types.push(attr.clone());
        }
        scheme.credential_types.push(cred);
    }
    if !found {
        scheme
            .warnings
            .push(format!("Issuer {} has no credential types", issuer.id));
    }
    Ok(())
}

fn check_credential_type(
    manager: &SchemeManager,
    issuer: &Issuer,
    basename: &str,
    dir: &Path,
    desc: CredentialTypeDescription,
    scheme: &mut ParsedSchemeContent,
) -> Result<CredentialType, Error> {
    if desc.xml_version < 4 {
        return Err(Error::UnsupportedVersion(format!(
            "Credential type descriptor version {} (minimum 4)",
            desc.xml_version
        )));
    }
    let id = CredentialTypeId::from_parts(&issuer.id, &desc.id);
    if desc.id != basename {
        return Err(Error::Parsing(format!(
            "Credential type {} has wrong directory name {}",
            id, basename
        )));
    }
    if desc.issuer_id != issuer.id.name() {
        return Err(Error::Parsing(format!(
            "Credential type {} has wrong IssuerID {}",
            id, desc.issuer_id
        )));
    }
    if desc.scheme_manager != manager.id.as_str() {
        return Err(Error::Parsing(format!(
            "Credential type {} has wrong SchemeManager {}",
            id, desc.scheme_manager
        )));
    }
    check_translations(
        &format!("Credential type {}", id),
        [("Name", &desc.name), ("ShortName", &desc.short_name)],
        &mut scheme.warnings,
    );
    if !crate::fs::path_exists(&dir.join("logo.png"))? {
        scheme
            .warnings
            .push(format!("Credential type {} has no logo.png", id));
    }

    let count = desc.attributes.attributes.len();
    if count == 0 {
        return Err(Error::Parsing(format!(
            "Credential type {} has no attributes",
            id
        )));
    }

    // Display indices must form a permutation of [0, count). Violations are
    // warnings, not errors.
    let mut seen = HashSet::new();
    let mut attributes = Vec::with_capacity(count);
    for (index, attr) in desc.attributes.attributes.into_iter().enumerate() {
        check_translations(
            &format!("Attribute {} of credential type {}", attr.id, id),
            [("Name", &attr.name), ("Description", &attr.description)],
            &mut scheme.warnings,
        );
        let effective = attr.display_index.map(|i| i as usize).unwrap_or(index);
        if effective >= count {
            scheme.warnings.push(format!(
                "Credential type {} has invalid attribute displayIndex at attribute {}",
                id, index
            ));
        }
        seen.insert(effective);
        attributes.push(AttributeType {
            id: AttributeTypeId::from_parts(&id, &attr.id),
            credential_type: id.clone(),
            index,
            optional: attr.optional,
            display_index: attr.display_index,
            name: attr.name,
            description: attr.description,
        });
    }
    if seen.len() != count {
        scheme.warnings.push(format!(
            "Credential type {} has invalid attribute ordering, check the displayIndex values",
            id
        ));
    }

    Ok(CredentialType {
        id,
        issuer: issuer.id.clone(),
        scheme_manager: manager.id.clone(),
        name: desc.name,
        short_name: desc.short_name,
        description: desc.description,
        is_singleton: desc.is_singleton,
        attributes,
        xml_version: desc.xml_version,
    })
}

fn check_translations<'a>(
    subject: &str,
    fields: impl IntoIterator<Item = (&'a str, &'a crate::scheme::TranslatedString)>,
    warnings: &mut Vec<String>,
) {
    for (tag, value) in fields {
        for lang in value.missing_languages() {
            warnings.push(format!(
                "{} misses {} translation in <{}> tag",
                subject, lang, tag
            ));
        }
    }
}

/// Counters of the public keys present in `<issuer_dir>/PublicKeys`, sorted
/// ascending.
pub fn public_key_counters(issuer_dir: &Path) -> Result<Vec<u32>, Error> {
    let keys_dir = issuer_dir.join("PublicKeys");
    key_counters(&keys_dir)
}

/// Counters of the private keys present in `<issuer_dir>/PrivateKeys`,
/// sorted ascending.
pub fn private_key_counters(issuer_dir: &Path) -> Result<Vec<u32>, Error> {
    let keys_dir = issuer_dir.join("PrivateKeys");
    key_counters(&keys_dir)
}

fn key_counters(keys_dir: &Path) -> Result<Vec<u32>, Error> {
    if !crate::fs::path_exists(keys_dir)? {
        return Ok(Vec::new());
    }
    let mut counters = Vec::new();
    for entry in fs::read_dir(keys_dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        let Some(stem) = name.strip_suffix(".xml") else {
            continue;
        };
        let counter: u32 = stem.parse().map_err(|_| {
            Error::Parsing(format!("Key file {} has a non-integer name", name))
        })?;
        counters.push(counter);
    }
    counters.sort_unstable();
    Ok(counters)
}

fn sorted_dir(path: &Path) -> Result<Vec<fs::DirEntry>, Error> {
    let mut entries: Vec<_> = fs::read_dir(path)?.collect::<Result<_, _>>()?;
    entries.sort_by_key(|e| e.file_name());
    Ok(entries)
}

fn relative_path(outer: &Path, inner: &Path) -> Result<String, Error> {
    let rel = inner.strip_prefix(outer).map_err(|_| {
        Error::Internal(format!(
            "Path {} is not contained in {}",
            inner.display(),
            outer.display()
        ))
    })?;
    // Index paths are forward-slash-separated regardless of host OS.
    let parts: Vec<_> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Ok(parts.join("/"))
}
