//! The boundary with the wallet's credential store.
//!
//! Credential storage and the zero-knowledge proof primitives live outside
//! this crate. Sessions talk to them through [`CredentialStore`], and the
//! messages they exchange are typed black boxes: JSON payloads this core
//! moves between the store and the wire without looking inside.

use crate::error::Error;
use crate::session::request::{DisclosureChoice, Disjunction, IssuanceRequest, SessionRequest};
use serde::{Deserialize, Serialize};

macro_rules! opaque_message {
    ($name:ident, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub serde_json::Value);

        impl $name {
            pub fn into_inner(self) -> serde_json::Value {
                self.0
            }
        }
    };
}

opaque_message!(
    ProofList,
    "A list of zero-knowledge proofs disclosing the chosen attributes."
);
opaque_message!(
    IssueCommitmentMessage,
    "The client's commitments opening an issuance."
);
opaque_message!(
    IssueSignatureMessage,
    "One blind signature returned by the issuing server."
);
opaque_message!(
    ProofBuilderList,
    "Partially built proofs awaiting keyshare server commitments."
);

impl ProofList {
    /// The number of proofs carried, when the payload is a list.
    pub fn len(&self) -> usize {
        self.0.as_array().map(|a| a.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// The message a session posts to the server: proofs for disclosure and
/// signature sessions, a commitment message for issuance.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum SessionMessage {
    Proofs(ProofList),
    IssueCommitments(IssueCommitmentMessage),
}

impl SessionMessage {
    /// The proofs carried by this message, for session logging. Issuance
    /// commitment messages carry theirs under a `proofs` field.
    pub fn proofs(&self) -> ProofList {
        match self {
            SessionMessage::Proofs(proofs) => proofs.clone(),
            SessionMessage::IssueCommitments(msg) => ProofList(
                msg.0
                    .get("proofs")
                    .cloned()
                    .unwrap_or(serde_json::Value::Null),
            ),
        }
    }
}

/// One entry of the wallet's session log, derived from the posted proofs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub action: crate::session::handler::Action,
    /// Seconds since the Unix epoch.
    pub time: u64,
    /// Number of proofs sent in this session.
    pub proof_count: usize,
}

impl LogEntry {
    pub fn new(action: crate::session::handler::Action, proofs: &ProofList) -> Self {
        LogEntry {
            action,
            time: std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
            proof_count: proofs.len(),
        }
    }
}

/// Callbacks into the wallet's credential store. All proof computation
/// happens behind this trait; the session only moves the resulting messages.
pub trait CredentialStore: Send + Sync {
    /// Which of the requested disjunctions cannot be satisfied from held
    /// credentials. An empty return means the request is satisfiable.
    fn check_satisfiability(&self, disjunctions: &[Disjunction]) -> Vec<Disjunction>;

    /// Build the proofs disclosing the chosen attributes. For signature
    /// sessions the request's message is signed along.
    fn proofs(
        &self,
        choice: &DisclosureChoice,
        request: &SessionRequest,
        signature: bool,
    ) -> Result<ProofList, Error>;

    /// Build the commitment message opening an issuance session.
    fn issue_commitments(&self, request: &IssuanceRequest) -> Result<IssueCommitmentMessage, Error>;

    /// Partially built disclosure proofs, to be completed with keyshare
    /// server commitments.
    fn proof_builders(&self, choice: &DisclosureChoice) -> Result<ProofBuilderList, Error>;

    /// Partially built issuance commitments, to be completed with keyshare
    /// server commitments.
    fn issuance_proof_builders(
        &self,
        request: &IssuanceRequest,
    ) -> Result<ProofBuilderList, Error>;

    /// Turn the issuing server's signature messages into stored credentials.
    fn construct_credentials(
        &self,
        messages: &[IssueSignatureMessage],
        request: &IssuanceRequest,
    ) -> Result<(), Error>;

    /// Append an entry to the wallet's session log.
    fn add_log_entry(&self, entry: LogEntry) -> Result<(), Error>;
}
