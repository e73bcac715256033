//! Client-side core of an attribute-based credential platform.
//!
//! Two tightly coupled subsystems make up this crate:
//!
//! - The **configuration**: a signed, hash-indexed catalog of scheme
//!   managers (trust roots publishing issuers, credential types, attribute
//!   types and issuer public keys), loaded from a local directory,
//!   refreshable against each scheme's remote mirror, and consulted for
//!   every cryptographic decision the client makes.
//! - The **session state machine**: the multi-step protocol that negotiates
//!   a protocol version, fetches a signed session descriptor, obtains user
//!   consent, computes zero-knowledge proofs (possibly in collaboration with
//!   a keyshare server), posts them, and reports outcomes through the
//!   embedder's [`Handler`](session::handler::Handler).
//!
//! Credential storage and the proof primitives themselves live behind the
//! [`CredentialStore`](store::CredentialStore) trait; the embedding wallet
//! provides both.

#![deny(unsafe_code)]

pub mod configuration;
pub mod error;
pub mod fs;
pub mod identifier;
pub mod keys;
pub mod scheme;
pub mod session;
pub mod store;
pub mod transport;

#[cfg(test)]
pub(crate) mod testfix;

pub use configuration::{auto_update, Configuration, SchemeAutoUpdater, SharedConfiguration};
pub use error::{Error, SchemeError};
pub use identifier::{AttributeTypeId, CredentialTypeId, IssuerId, SchemeManagerId};
pub use scheme::updater::ChangeSet;
pub use scheme::{SchemeManager, SchemeManagerStatus};
pub use session::handler::{Action, Handler, Status};
pub use session::request::Qr;
pub use session::{Session, SessionState};
