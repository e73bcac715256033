//! The embedder's callback surface.
//!
//! A [`Handler`] is the fixed capability set through which a session talks
//! to the user: progress updates, the three consent questions, PIN entry for
//! keyshare schemes, and the terminal outcomes. All callbacks are invoked
//! from the session's background thread.

use crate::error::Error;
use crate::session::request::{
    DisclosureChoice, DisclosureRequest, Disjunction, IssuanceRequest, SignatureRequest,
};
use serde::{Deserialize, Serialize};

/// The session action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    Disclosing,
    Signing,
    Issuing,
    #[serde(other)]
    Unknown,
}

impl Action {
    pub fn parse(s: &str) -> Action {
        match s {
            "disclosing" => Action::Disclosing,
            "signing" => Action::Signing,
            "issuing" => Action::Issuing,
            _ => Action::Unknown,
        }
    }
}

impl std::fmt::Display for Action {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Action::Disclosing => "disclosing",
            Action::Signing => "signing",
            Action::Issuing => "issuing",
            Action::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Progress of a running session, reported through
/// [`Handler::status_update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Communicating,
    Connected,
    Done,
}

/// Answer to a consent question: whether to proceed, and with which
/// attributes.
pub type PermissionCallback = Box<dyn FnOnce(bool, Option<DisclosureChoice>) + Send>;

/// Answer to a PIN question: whether to proceed, and the entered PIN.
pub type PinCallback = Box<dyn FnOnce(bool, String) + Send>;

/// Callbacks for communication with the user. All methods are total: a
/// handler must be prepared to receive each of them.
pub trait Handler: Send + Sync {
    fn status_update(&self, action: Action, status: Status);

    /// The session request cannot be satisfied from held credentials. The
    /// session terminates without posting anything.
    fn unsatisfiable_request(&self, action: Action, missing: Vec<Disjunction>);

    fn ask_disclosure_permission(
        &self,
        request: DisclosureRequest,
        server_name: String,
        callback: PermissionCallback,
    );
    fn ask_signature_permission(
        &self,
        request: SignatureRequest,
        server_name: String,
        callback: PermissionCallback,
    );
    fn ask_issuance_permission(
        &self,
        request: IssuanceRequest,
        server_name: String,
        callback: PermissionCallback,
    );

    /// Ask for the keyshare server PIN. Invoked by keyshare sub-sessions.
    fn ask_pin(&self, attempts_left: u32, callback: PinCallback);

    fn success(&self, action: Action);
    fn cancelled(&self, action: Action);
    fn failure(&self, action: Action, error: Error);
}
