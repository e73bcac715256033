//! The credwallet error type.

use crate::identifier::SchemeManagerId;
use crate::scheme::SchemeManagerStatus;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Internal error: [{0}]")]
    Internal(String),

    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("Invalid scheme index: {0}")]
    InvalidIndex(String),

    #[error("Invalid scheme signature: {0}")]
    InvalidSignature(String),

    #[error("Hash of {0} does not match the signed scheme index")]
    HashMismatch(String),

    #[error("File {0} is not present in the signed scheme index")]
    NotIndexed(String),

    #[error("Parse error: {0}")]
    Parsing(String),

    #[error("Error parsing scheme contents: {0}")]
    ContentParsing(String),

    #[error("Unsupported descriptor version: {0}")]
    UnsupportedVersion(String),

    #[error("Configuration is read-only")]
    ReadOnly,

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Unknown scheme manager: {0}")]
    UnknownScheme(String),

    #[error("Unknown session action: {0}")]
    UnknownAction(String),

    #[error("No supported protocol version between {0} and {1}")]
    ProtocolVersionNotSupported(String, String),

    #[error("Invalid session JWT: {0}")]
    InvalidJwt(String),

    #[error("Cryptographic operation failed: {0}")]
    Crypto(String),

    #[error("Keyshare server blocked the account for {0} seconds")]
    KeyshareBlocked(u64),

    #[error("Keyshare session error: {0}")]
    Keyshare(String),

    #[error("Session rejected by server: {0}")]
    Rejected(String),

    #[error("Session cancelled")]
    Cancelled,

    #[error(transparent)]
    Scheme(#[from] Box<SchemeError>),
}

/// An error scoped to a single scheme manager. The configuration records
/// these in its disabled-scheme map and continues loading other schemes.
#[derive(Debug, thiserror::Error)]
#[error("Error parsing scheme manager {scheme}: {cause}")]
pub struct SchemeError {
    pub scheme: SchemeManagerId,
    pub status: SchemeManagerStatus,
    #[source]
    pub cause: Error,
}

impl SchemeError {
    pub fn new(scheme: SchemeManagerId, status: SchemeManagerStatus, cause: Error) -> Self {
        Self {
            scheme,
            status,
            cause,
        }
    }
}
