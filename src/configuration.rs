//! The configuration: the authenticated catalog of scheme managers, issuers,
//! credential types, attribute types and issuer public keys that every
//! cryptographic decision consults.
//!
//! The catalog is loaded from a storage directory, optionally seeded and
//! refreshed from a read-only assets directory shipped with the app, and
//! synced against each scheme's remote mirror on demand or on a timer.
//!
//! The configuration is single-writer: sessions may read it concurrently,
//! but the embedder must serialize install/update/remove operations against
//! the session lifetimes that consume their results.

use crate::error::{Error, SchemeError};
use crate::fs as cfs;
use crate::identifier::{AttributeTypeId, CredentialTypeId, IssuerId, SchemeManagerId};
use crate::keys::{IssuerPrivateKey, IssuerPublicKey, KeysharePublicKey};
use crate::scheme::loader::{self, ParsedScheme};
use crate::scheme::updater::{self, ChangeSet};
use crate::scheme::verify::read_authenticated_file;
use crate::scheme::{AttributeType, CredentialType, Issuer, SchemeManager};
use crate::session::request::SessionRequest;
use crate::transport::{self, TransportFactory};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use sha2::{Digest, Sha256};
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// A configuration shared between the embedder, sessions and the autoupdater.
pub type SharedConfiguration = Arc<Mutex<Configuration>>;

/// Keeps track of scheme managers, issuers, credential types and public
/// keys, deserializing them from a configuration directory, and downloads
/// and saves new ones on demand.
pub struct Configuration {
    pub path: PathBuf,
    pub scheme_managers: HashMap<SchemeManagerId, SchemeManager>,
    pub issuers: HashMap<IssuerId, Issuer>,
    pub credential_types: HashMap<CredentialTypeId, CredentialType>,
    pub attribute_types: HashMap<AttributeTypeId, AttributeType>,

    /// Scheme managers that did not parse successfully, and the problem that
    /// occurred when parsing them.
    pub disabled_scheme_managers: HashMap<SchemeManagerId, SchemeError>,

    pub warnings: Vec<String>,

    assets: Option<PathBuf>,
    read_only: bool,
    initialized: bool,

    reverse_hashes: HashMap<String, CredentialTypeId>,
    public_keys: RwLock<HashMap<IssuerId, HashMap<u32, Arc<IssuerPublicKey>>>>,
    private_keys: RwLock<HashMap<IssuerId, Arc<IssuerPrivateKey>>>,
    kss_public_keys: RwLock<HashMap<(SchemeManagerId, u32), Arc<KeysharePublicKey>>>,

    transport_factory: TransportFactory,
}

impl Configuration {
    /// Open a configuration at `path`, creating the directory if missing.
    /// If `assets` is given it must exist; its schemes seed and refresh the
    /// storage copy on [`load`](Self::load). A read-only configuration never
    /// alters its representation on disk.
    pub fn open(
        path: impl Into<PathBuf>,
        assets: Option<PathBuf>,
        read_only: bool,
    ) -> Result<Self, Error> {
        let path = path.into();
        if let Some(assets) = &assets {
            if !cfs::path_exists(assets)? {
                return Err(Error::Internal(format!(
                    "Nonexistent assets folder specified: {}",
                    assets.display()
                )));
            }
        }
        cfs::ensure_dir_exists(&path)?;

        Ok(Configuration {
            path,
            scheme_managers: HashMap::new(),
            issuers: HashMap::new(),
            credential_types: HashMap::new(),
            attribute_types: HashMap::new(),
            disabled_scheme_managers: HashMap::new(),
            warnings: Vec::new(),
            assets,
            read_only,
            initialized: false,
            reverse_hashes: HashMap::new(),
            public_keys: RwLock::new(HashMap::new()),
            private_keys: RwLock::new(HashMap::new()),
            kss_public_keys: RwLock::new(HashMap::new()),
            transport_factory: transport::http_transport_factory(),
        })
    }

    /// Replace the transport factory. Updates and installs construct their
    /// HTTP clients through this; tests substitute in-memory remotes.
    pub fn with_transport_factory(mut self, factory: TransportFactory) -> Self {
        self.transport_factory = factory;
        self
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn clear(&mut self) -> Result<(), Error> {
        self.scheme_managers.clear();
        self.issuers.clear();
        self.credential_types.clear();
        self.attribute_types.clear();
        self.disabled_scheme_managers.clear();
        self.warnings.clear();
        self.reverse_hashes.clear();
        lock_write(&self.public_keys)?.clear();
        lock_write(&self.private_keys)?.clear();
        lock_write(&self.kss_public_keys)?.clear();
        Ok(())
    }

    /// Populate the configuration by parsing the storage directory.
    ///
    /// If an assets directory was given, any scheme whose asset timestamp is
    /// strictly newer than the stored copy (or whose stored copy has no
    /// timestamp) is first replaced wholesale by the asset tree. Schemes
    /// that fail to parse are recorded in
    /// [`disabled_scheme_managers`](Self::disabled_scheme_managers); only
    /// non-scheme-scoped errors abort the load.
    pub fn load(&mut self) -> Result<(), Error> {
        self.clear()?;

        if let Some(assets) = self.assets.clone() {
            for id in subdirectory_names(&assets)? {
                let Ok(scheme) = id.parse::<SchemeManagerId>() else {
                    continue;
                };
                if !self.is_up_to_date(&scheme)? {
                    self.copy_from_assets(&scheme)?;
                }
            }
        }

        for id in subdirectory_names(&self.path)? {
            let Ok(scheme) = id.parse::<SchemeManagerId>() else {
                continue;
            };
            self.reload_scheme_record(&scheme)?;
        }

        self.initialized = true;
        Ok(())
    }

    /// Like [`load`](Self::load), but attempts to restore broken schemes: a
    /// scheme that failed with a scheme-scoped error is re-installed from
    /// its remote, or failing that replaced from assets and re-parsed.
    /// Schemes that remain broken stay in
    /// [`disabled_scheme_managers`](Self::disabled_scheme_managers).
    pub fn load_or_restore(&mut self) -> Result<(), Error> {
        self.load()?;
        if self.disabled_scheme_managers.is_empty() || self.read_only {
            return Ok(());
        }

        let broken: Vec<SchemeManagerId> =
            self.disabled_scheme_managers.keys().cloned().collect();
        for id in broken {
            let url = self
                .scheme_managers
                .get(&id)
                .map(|m| m.url.clone())
                .unwrap_or_default();
            if !url.is_empty() && self.reinstall_scheme(&id).is_ok() {
                continue;
            }
            // Filesystem trouble while restoring assets is not recoverable.
            if self.copy_from_assets(&id)? {
                let _ = self.reload_scheme_record(&id);
            }
        }
        Ok(())
    }

    /// Parse (or re-parse) one scheme directory and merge the result,
    /// recording scheme-scoped failures in the disabled map.
    fn reload_scheme_record(&mut self, id: &SchemeManagerId) -> Result<(), Error> {
        self.unmerge_scheme(id);
        match loader::load_scheme(&self.path, id.clone()) {
            Ok(parsed) => {
                self.merge_scheme(parsed);
                self.disabled_scheme_managers.remove(id);
                Ok(())
            }
            Err(failure) => {
                log::warn!("Scheme {} disabled: {}", id, failure.error);
                self.scheme_managers.insert(id.clone(), failure.manager);
                self.disabled_scheme_managers
                    .insert(id.clone(), failure.error);
                Ok(())
            }
        }
    }

    fn merge_scheme(&mut self, parsed: ParsedScheme) {
        self.scheme_managers
            .insert(parsed.manager.id.clone(), parsed.manager);
        for issuer in parsed.issuers {
            self.issuers.insert(issuer.id.clone(), issuer);
        }
        for cred in parsed.credential_types {
            self.add_reverse_hash(&cred.id);
            self.credential_types.insert(cred.id.clone(), cred);
        }
        for attr in parsed.attribute_types {
            self.attribute_types.insert(attr.id.clone(), attr);
        }
        self.warnings.extend(parsed.warnings);
    }

    /// Drop everything falling under the given scheme from the in-memory
    /// maps and caches.
    fn unmerge_scheme(&mut self, id: &SchemeManagerId) {
        let name = id.as_str().to_string();
        self.scheme_managers.remove(id);
        self.disabled_scheme_managers.remove(id);
        self.issuers.retain(|iss, _| iss.root() != name);
        self.credential_types.retain(|cred, _| cred.root() != name);
        self.attribute_types.retain(|attr, _| attr.root() != name);
        self.reverse_hashes.retain(|_, cred| cred.root() != name);
        if let Ok(mut keys) = self.public_keys.write() {
            keys.retain(|iss, _| iss.root() != name);
        }
        if let Ok(mut keys) = self.private_keys.write() {
            keys.retain(|iss, _| iss.root() != name);
        }
        if let Ok(mut keys) = self.kss_public_keys.write() {
            keys.retain(|(scheme, _), _| scheme != id);
        }
    }

    fn is_up_to_date(&self, scheme: &SchemeManagerId) -> Result<bool, Error> {
        let (Some(assets), false) = (&self.assets, self.read_only) else {
            return Ok(true);
        };
        let asset_ts = cfs::read_timestamp(&assets.join(scheme.as_str()).join("timestamp"))?
            .ok_or_else(|| {
                Error::Parsing(format!("Could not read asset timestamp of scheme {}", scheme))
            })?;
        // The storage copy does not need to have a timestamp. If it does
        // not, it is outdated.
        let stored_ts = cfs::read_timestamp(&self.path.join(scheme.as_str()).join("timestamp"))?;
        Ok(stored_ts.is_some_and(|stored| asset_ts <= stored))
    }

    /// Replace the stored scheme tree by the asset tree wholesale (no
    /// merge). Returns whether a copy took place.
    fn copy_from_assets(&self, scheme: &SchemeManagerId) -> Result<bool, Error> {
        let (Some(assets), false) = (&self.assets, self.read_only) else {
            return Ok(false);
        };
        if !cfs::path_exists(&assets.join(scheme.as_str()))? {
            return Ok(false);
        }
        let dest = self.path.join(scheme.as_str());
        if cfs::path_exists(&dest)? {
            std::fs::remove_dir_all(&dest)?;
        }
        cfs::copy_directory(&assets.join(scheme.as_str()), &dest)?;
        Ok(true)
    }

    /// Remove every scheme manager whose status is not Valid, along with
    /// everything it owns, from the in-memory configuration.
    pub fn prune(&mut self) {
        let invalid: Vec<SchemeManagerId> = self
            .scheme_managers
            .values()
            .filter(|m| !m.valid())
            .map(|m| m.id.clone())
            .collect();
        for id in invalid {
            // In-memory removal never fails.
            let _ = self.remove_scheme(&id, false);
        }
    }

    /// Whether the configuration contains the specified credential type,
    /// including its issuer and scheme manager.
    pub fn contains(&self, cred: &CredentialTypeId) -> bool {
        self.scheme_managers.contains_key(&cred.scheme_manager())
            && self.issuers.contains_key(&cred.issuer())
            && self.credential_types.contains_key(cred)
    }

    fn add_reverse_hash(&mut self, cred: &CredentialTypeId) {
        let digest = Sha256::digest(cred.as_str().as_bytes());
        self.reverse_hashes
            .insert(BASE64.encode(&digest[..16]), cred.clone());
    }

    /// Look up a credential type by the 16-byte prefix of the SHA-256 hash
    /// of its identifier, as it appears in proof metadata.
    pub fn credential_by_hash(&self, hash_prefix: &[u8]) -> Option<&CredentialType> {
        let key = BASE64.encode(hash_prefix);
        self.reverse_hashes
            .get(&key)
            .and_then(|id| self.credential_types.get(id))
    }

    /// The public key of the specified issuer with the specified counter, or
    /// `None` if not present. Keys are lazily parsed and memoized; a miss
    /// re-reads the issuer's key folder since new keys may have appeared.
    pub fn public_key(
        &self,
        issuer: &IssuerId,
        counter: u32,
    ) -> Result<Option<Arc<IssuerPublicKey>>, Error> {
        let cached = lock_read(&self.public_keys)?
            .get(issuer)
            .and_then(|keys| keys.get(&counter).cloned());
        if let Some(pk) = cached {
            return Ok(Some(pk));
        }
        self.parse_keys_folder(issuer)?;
        Ok(lock_read(&self.public_keys)?
            .get(issuer)
            .and_then(|keys| keys.get(&counter).cloned()))
    }

    /// The counters of all public keys of the issuer, sorted ascending.
    pub fn public_key_indices(&self, issuer: &IssuerId) -> Result<Vec<u32>, Error> {
        loader::public_key_counters(&self.issuer_dir(issuer))
    }

    fn issuer_dir(&self, issuer: &IssuerId) -> PathBuf {
        self.path.join(issuer.root()).join(issuer.name())
    }

    fn parse_keys_folder(&self, issuer: &IssuerId) -> Result<(), Error> {
        let manager = self
            .scheme_managers
            .get(&issuer.scheme_manager())
            .ok_or_else(|| Error::UnknownScheme(issuer.root().to_string()))?;
        let mut keys = HashMap::new();
        for counter in loader::public_key_counters(&self.issuer_dir(issuer))? {
            let rel = format!(
                "{}/{}/PublicKeys/{}.xml",
                issuer.root(),
                issuer.name(),
                counter
            );
            let bytes = read_authenticated_file(&self.path, &manager.index, &rel)?;
            let pk = IssuerPublicKey::parse(issuer.clone(), &bytes)?;
            if pk.counter != counter {
                return Err(Error::Parsing(format!(
                    "Public key {} of issuer {} has wrong <Counter>",
                    counter, issuer
                )));
            }
            keys.insert(counter, Arc::new(pk));
        }
        lock_write(&self.public_keys)?.insert(issuer.clone(), keys);
        Ok(())
    }

    /// The issuer's private key with the highest counter, or `None` if the
    /// issuer has no private keys in storage. Private keys are not part of
    /// the signed index; they only exist on issuer machines.
    pub fn private_key(&self, issuer: &IssuerId) -> Result<Option<Arc<IssuerPrivateKey>>, Error> {
        if let Some(sk) = lock_read(&self.private_keys)?.get(issuer).cloned() {
            return Ok(Some(sk));
        }
        let counters = loader::private_key_counters(&self.issuer_dir(issuer))?;
        let Some(&counter) = counters.last() else {
            return Ok(None);
        };
        let path = self
            .issuer_dir(issuer)
            .join("PrivateKeys")
            .join(format!("{}.xml", counter));
        let sk = IssuerPrivateKey::parse(issuer.clone(), &std::fs::read(path)?)?;
        if sk.counter != counter {
            return Err(Error::Parsing(format!(
                "Private key {} of issuer {} has wrong <Counter>",
                counter, issuer
            )));
        }
        if let Some(pk) = self.public_key(issuer, counter)? {
            if !sk.belongs_to(&pk) {
                return Err(Error::Crypto(format!(
                    "Private key {} of issuer {} does not belong to its public key",
                    counter, issuer
                )));
            }
        }
        let sk = Arc::new(sk);
        lock_write(&self.private_keys)?.insert(issuer.clone(), sk.clone());
        Ok(Some(sk))
    }

    /// The keyshare server public key with the given id of the specified
    /// scheme, parsed once and cached.
    pub fn keyshare_public_key(
        &self,
        scheme: &SchemeManagerId,
        key_id: u32,
    ) -> Result<Arc<KeysharePublicKey>, Error> {
        let cache_key = (scheme.clone(), key_id);
        if let Some(pk) = lock_read(&self.kss_public_keys)?.get(&cache_key).cloned() {
            return Ok(pk);
        }
        let path = self
            .path
            .join(scheme.as_str())
            .join(format!("kss-{}.pem", key_id));
        let pk = Arc::new(KeysharePublicKey::parse(key_id, &std::fs::read(path)?)?);
        lock_write(&self.kss_public_keys)?.insert(cache_key, pk.clone());
        Ok(pk)
    }

    /// Download and add the scheme at the given URL to this configuration,
    /// provided its signature is valid. When `pinned_public_key` is given it
    /// is stored instead of the remote `pk.pem`, so callers pinning the key
    /// bypass trust-on-first-use.
    pub fn install_scheme(
        &mut self,
        url: &str,
        pinned_public_key: Option<&[u8]>,
    ) -> Result<SchemeManagerId, Error> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let url = transport::normalize_scheme_url(url);
        let transport = (self.transport_factory)(&format!("{}/", url));

        let (desc, desc_bytes) = updater::download_scheme_description(&*transport)?;
        let id: SchemeManagerId = desc.id.parse()?;

        let dir = self.path.join(id.as_str());
        cfs::ensure_dir_exists(&dir)?;
        cfs::save_file(&dir.join("description.xml"), &desc_bytes)?;
        match pinned_public_key {
            Some(pk) => cfs::save_file(&dir.join("pk.pem"), pk)?,
            None => {
                let pk = transport.get_bytes("pk.pem")?;
                cfs::save_file(&dir.join("pk.pem"), &pk)?;
            }
        }
        updater::download_signed_index(&self.path, &id, &*transport)?;

        let mut manager = SchemeManager::unprocessed(id.clone());
        manager.url = url;
        let mut changes = ChangeSet::new();
        updater::update_scheme(&self.path, &mut manager, &*transport, &mut changes)?;
        self.scheme_managers.insert(id.clone(), manager);

        self.reload_scheme_record(&id)?;
        if let Some(err) = self.disabled_scheme_managers.remove(&id) {
            self.scheme_managers.remove(&id);
            return Err(Box::new(err).into());
        }
        Ok(id)
    }

    /// Remove the specified scheme manager and everything it owns from this
    /// configuration. With `purge_storage` the scheme directory is deleted
    /// from disk as well.
    pub fn remove_scheme(
        &mut self,
        id: &SchemeManagerId,
        purge_storage: bool,
    ) -> Result<(), Error> {
        if purge_storage && self.read_only {
            return Err(Error::ReadOnly);
        }
        self.unmerge_scheme(id);
        if purge_storage {
            let dir = self.path.join(id.as_str());
            if cfs::path_exists(&dir)? {
                std::fs::remove_dir_all(dir)?;
            }
        }
        Ok(())
    }

    /// Re-install a scheme from its remote. The remote is probed before the
    /// stored copy is deleted, so an unreachable remote keeps the broken
    /// version in place.
    pub fn reinstall_scheme(&mut self, id: &SchemeManagerId) -> Result<(), Error> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let url = self
            .scheme_managers
            .get(id)
            .map(|m| m.url.clone())
            .filter(|url| !url.is_empty())
            .ok_or_else(|| Error::UnknownScheme(id.to_string()))?;

        // Check that the remote works before we uninstall anything.
        let transport = (self.transport_factory)(&format!(
            "{}/",
            transport::normalize_scheme_url(&url)
        ));
        updater::download_scheme_description(&*transport)?;

        self.remove_scheme(id, true)?;
        self.install_scheme(&url, None)?;
        Ok(())
    }

    /// Sync the stored scheme with the remote version at its URL,
    /// downloading and storing new and modified files according to the index
    /// files of both versions. Newly appeared issuers and credential types
    /// are recorded in `changes`; downloaded files are not parsed into the
    /// configuration until the next [`load`](Self::load).
    pub fn update_scheme(
        &mut self,
        id: &SchemeManagerId,
        changes: &mut ChangeSet,
    ) -> Result<bool, Error> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let url = self
            .scheme_managers
            .get(id)
            .map(|m| m.url.clone())
            .ok_or_else(|| Error::UnknownScheme(id.to_string()))?;
        let transport = (self.transport_factory)(&format!(
            "{}/",
            transport::normalize_scheme_url(&url)
        ));
        let path = self.path.clone();
        let manager = self
            .scheme_managers
            .get_mut(id)
            .ok_or_else(|| Error::UnknownScheme(id.to_string()))?;
        updater::update_scheme(&path, manager, &*transport, changes)
    }

    /// Update every scheme manager; reload if anything changed.
    pub fn update_all(&mut self) -> Result<ChangeSet, Error> {
        let mut changes = ChangeSet::new();
        let ids: Vec<SchemeManagerId> = self.scheme_managers.keys().cloned().collect();
        for id in ids {
            log::info!("Updating scheme {}", id);
            self.update_scheme(&id, &mut changes)?;
        }
        if !changes.is_empty() {
            self.load()?;
        }
        Ok(changes)
    }

    /// Update exactly the schemes owning identifiers the session request
    /// references that this configuration does not know yet, then reload.
    pub fn update_for_request(&mut self, request: &SessionRequest) -> Result<ChangeSet, Error> {
        if self.read_only {
            return Err(Error::ReadOnly);
        }
        let mut schemes: BTreeSet<SchemeManagerId> = BTreeSet::new();

        for disjunction in request.disjunctions() {
            for attr in &disjunction.attributes {
                let cred = attr.credential_type();
                match self.credential_types.get(&cred) {
                    None => {
                        schemes.insert(cred.scheme_manager());
                    }
                    Some(typ) if !typ.contains_attribute(attr) => {
                        schemes.insert(cred.scheme_manager());
                    }
                    Some(_) => {}
                }
            }
        }

        if let SessionRequest::Issuance(issuance) = request {
            for credreq in &issuance.credentials {
                let Some(typ) = self.credential_types.get(&credreq.credential) else {
                    schemes.insert(credreq.credential.scheme_manager());
                    continue;
                };
                // Every non-optional attribute of the type must be supplied,
                // and no unknown attributes may be; otherwise our copy of
                // the credential type is outdated.
                let mut supplied = credreq.attributes.clone();
                let mut outdated = false;
                for attr in &typ.attributes {
                    if supplied.remove(attr.id.name()).is_none() && !attr.optional {
                        outdated = true;
                        break;
                    }
                }
                if outdated || !supplied.is_empty() {
                    schemes.insert(credreq.credential.scheme_manager());
                }
            }
        }

        let mut changes = ChangeSet::new();
        for scheme in schemes {
            self.update_scheme(&scheme, &mut changes)?;
        }
        if !changes.is_empty() {
            self.load()?;
        }
        Ok(changes)
    }

    /// Consistency checks over all issuer key material: key expiry, private
    /// key pairing, and base counts against the attribute counts of the
    /// credential types each issuer issues.
    pub fn check_keys(&mut self) -> Result<(), Error> {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs();
        // 1 month.
        const EXPIRY_BOUNDARY: u64 = 3600 * 24 * 31;

        let issuer_ids: Vec<IssuerId> = self.issuers.keys().cloned().collect();
        for issuer in issuer_ids {
            let indices = self.public_key_indices(&issuer)?;
            let Some(&latest_counter) = indices.last() else {
                continue;
            };
            let latest = self.public_key(&issuer, latest_counter)?.ok_or_else(|| {
                Error::Parsing(format!("Issuer {} has no latest public key", issuer))
            })?;

            if latest.expiry_date < now {
                self.warnings
                    .push(format!("Issuer {} has no nonexpired public keys", issuer));
            } else if latest.expiry_date < now + EXPIRY_BOUNDARY {
                self.warnings.push(format!(
                    "Latest public key of issuer {} expires soon (at {})",
                    issuer, latest.expiry_date
                ));
            }

            for counter in loader::private_key_counters(&self.issuer_dir(&issuer))? {
                let path = self
                    .issuer_dir(&issuer)
                    .join("PrivateKeys")
                    .join(format!("{}.xml", counter));
                let sk = IssuerPrivateKey::parse(issuer.clone(), &std::fs::read(path)?)?;
                if sk.counter != counter {
                    return Err(Error::Parsing(format!(
                        "Private key {} of issuer {} has wrong <Counter>",
                        counter, issuer
                    )));
                }
                let pk = self.public_key(&issuer, counter)?.ok_or_else(|| {
                    Error::Parsing(format!(
                        "Private key {} of issuer {} has no corresponding public key",
                        counter, issuer
                    ))
                })?;
                if !sk.belongs_to(&pk) {
                    return Err(Error::Crypto(format!(
                        "Private key {} of issuer {} does not belong to public key {}",
                        counter, issuer, counter
                    )));
                }
            }

            // The latest public key must support every credential type this
            // issuer issues.
            for (id, typ) in &self.credential_types {
                if id.issuer() != issuer {
                    continue;
                }
                if !latest.supports_attributes(typ.attributes.len()) {
                    return Err(Error::Crypto(format!(
                        "Latest public key of issuer {} does not support the number of \
                         attributes that credential type {} requires ({}, required: {})",
                        issuer,
                        id,
                        latest.bases.len(),
                        typ.attributes.len() + 2
                    )));
                }
            }
        }
        Ok(())
    }
}

fn lock_read<'a, T>(
    lock: &'a RwLock<T>,
) -> Result<std::sync::RwLockReadGuard<'a, T>, Error> {
    lock.read()
        .map_err(|_| Error::Internal("Key cache lock poisoned".to_string()))
}

fn lock_write<'a, T>(
    lock: &'a RwLock<T>,
) -> Result<std::sync::RwLockWriteGuard<'a, T>, Error> {
    lock.write()
        .map_err(|_| Error::Internal("Key cache lock poisoned".to_string()))
}

fn subdirectory_names(path: &Path) -> Result<Vec<String>, Error> {
    let mut names = Vec::new();
    for entry in std::fs::read_dir(path)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if name.starts_with('.') {
            continue;
        }
        names.push(name);
    }
    names.sort();
    Ok(names)
}

/// Handle to the background scheme autoupdater. Dropping it (or calling
/// [`stop`](SchemeAutoUpdater::stop)) cancels the timer loop.
pub struct SchemeAutoUpdater {
    stop_tx: mpsc::Sender<()>,
    handle: Option<std::thread::JoinHandle<()>>,
}

impl SchemeAutoUpdater {
    /// Signal the updater thread to stop and wait for it to finish.
    pub fn stop(mut self) {
        let _ = self.stop_tx.send(());
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
        log::info!("Stopped scheme autoupdater");
    }
}

impl Drop for SchemeAutoUpdater {
    fn drop(&mut self) {
        let _ = self.stop_tx.send(());
    }
}

/// Arm a periodic task invoking [`Configuration::update_all`] every
/// `interval_minutes`. The first run fires ~200ms after arming so it does
/// not race the initial [`Configuration::load`]. Errors are logged, never
/// raised.
pub fn auto_update(
    configuration: SharedConfiguration,
    interval_minutes: u64,
) -> SchemeAutoUpdater {
    log::info!("Updating schemes every {} minutes", interval_minutes);
    let (stop_tx, stop_rx) = mpsc::channel();

    let handle = std::thread::spawn(move || {
        // Run the first update after a small delay.
        let mut wait = Duration::from_millis(200);
        loop {
            match stop_rx.recv_timeout(wait) {
                Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
                Err(RecvTimeoutError::Timeout) => {}
            }
            let result = {
                let mut conf = match configuration.lock() {
                    Ok(guard) => guard,
                    Err(poisoned) => poisoned.into_inner(),
                };
                conf.update_all()
            };
            if let Err(e) = result {
                log::error!("Scheme autoupdater failed: {}", e);
            }
            wait = Duration::from_secs(interval_minutes * 60);
        }
    });

    SchemeAutoUpdater {
        stop_tx,
        handle: Some(handle),
    }
}
