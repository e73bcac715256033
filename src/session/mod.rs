//! The session state machine.
//!
//! One session runs from a scanned QR descriptor to exactly one terminal
//! outcome, on its own background thread: once [`Session::start`] returns,
//! the machine advances by itself and talks to the embedder exclusively
//! through its [`Handler`]. It suspends only at HTTP requests, user-consent
//! callbacks, and keyshare sub-session round-trips.
//!
//! ```text
//! Init -> VersionNegotiated -> ServerInfoFetched -> AwaitingConsent
//!      -> Computing -> Posting -> (Completed | Cancelled | Failed)
//! ```
//!
//! Transitions are linear; entering a terminal state is idempotent, so a
//! late cancellation or transport failure cannot overwrite an outcome that
//! was already reported.

pub mod handler;
pub mod jwt;
pub mod keyshare;
pub mod request;
pub mod version;

use crate::configuration::SharedConfiguration;
use crate::error::Error;
use crate::store::{CredentialStore, IssueSignatureMessage, LogEntry, SessionMessage};
use crate::transport::{HttpTransport, Transport};
use handler::{Action, Handler, PermissionCallback, Status};
use keyshare::{KeyshareDriver, KeyshareListener};
use request::{DisclosureChoice, Qr, SessionInfo, SessionRequest};
use std::sync::mpsc;
use std::sync::{Arc, Mutex};
use version::ProtocolVersion;

/// Progress of the machine. Terminal states are `Completed`, `Cancelled`
/// and `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Init,
    VersionNegotiated,
    ServerInfoFetched,
    AwaitingConsent,
    Computing,
    Posting,
    Completed,
    Cancelled,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Completed | SessionState::Cancelled | SessionState::Failed
        )
    }
}

/// A running (or finished) session.
pub struct Session {
    inner: Arc<SessionInner>,
    thread: Mutex<Option<std::thread::JoinHandle<()>>>,
}

struct SessionInner {
    action: Action,
    handler: Box<dyn Handler>,
    transport: Box<dyn Transport>,
    store: Arc<dyn CredentialStore>,
    configuration: SharedConfiguration,
    keyshare: Option<Box<dyn KeyshareDriver>>,
    state: Mutex<SessionState>,
    version: Mutex<Option<ProtocolVersion>>,
    request: Mutex<Option<SessionRequest>>,
}

impl Session {
    /// Create and start a session for the scanned QR, talking to the server
    /// over HTTP. Returns immediately; all further communication goes
    /// through the handler.
    pub fn start(
        configuration: SharedConfiguration,
        store: Arc<dyn CredentialStore>,
        qr: &Qr,
        handler: Box<dyn Handler>,
    ) -> Session {
        let transport = Box::new(HttpTransport::new(&qr.u));
        Self::start_with(configuration, store, qr, handler, transport, None)
    }

    /// Like [`start`](Self::start), with an explicit transport and an
    /// optional keyshare driver for schemes that require one.
    pub fn start_with(
        configuration: SharedConfiguration,
        store: Arc<dyn CredentialStore>,
        qr: &Qr,
        handler: Box<dyn Handler>,
        transport: Box<dyn Transport>,
        keyshare: Option<Box<dyn KeyshareDriver>>,
    ) -> Session {
        let inner = Arc::new(SessionInner {
            action: Action::parse(&qr.session_type),
            handler,
            transport,
            store,
            configuration,
            keyshare,
            state: Mutex::new(SessionState::Init),
            version: Mutex::new(None),
            request: Mutex::new(None),
        });
        let session = Session {
            inner: inner.clone(),
            thread: Mutex::new(None),
        };

        // Version negotiation and action validation happen before anything
        // touches the network.
        match version::calculate_version(&qr.protocol_version, &qr.protocol_max_version) {
            Ok(version) => {
                *lock(&inner.version) = Some(version);
                inner.set_state(SessionState::VersionNegotiated);
            }
            Err(e) => {
                inner.fail(e);
                return session;
            }
        }
        if inner.action == Action::Unknown {
            inner.fail(Error::UnknownAction(qr.session_type.clone()));
            return session;
        }

        let worker = inner.clone();
        let handle = std::thread::spawn(move || worker.run());
        *lock(&session.thread) = Some(handle);
        session
    }

    pub fn state(&self) -> SessionState {
        *lock(&self.inner.state)
    }

    /// The negotiated protocol version, once negotiation succeeded.
    pub fn version(&self) -> Option<ProtocolVersion> {
        *lock(&self.inner.version)
    }

    /// Block until the session reached its terminal state. Intended for
    /// embedders that need a synchronous boundary (e.g. process shutdown).
    pub fn wait(&self) {
        if let Some(handle) = lock(&self.thread).take() {
            let _ = handle.join();
        }
    }
}

impl SessionInner {
    fn run(self: &Arc<Self>) {
        self.handler
            .status_update(self.action, Status::Communicating);

        // Fetch the session descriptor.
        let info: SessionInfo = match crate::transport::get_json(&*self.transport, "jwt") {
            Ok(info) => info,
            Err(e) => return self.fail(e),
        };
        let (mut request, server_name) = match jwt::parse_requestor_jwt(self.action, &info.jwt) {
            Ok(parsed) => parsed,
            Err(e) => return self.fail(e),
        };
        request.set_context_and_nonce(info.context.clone(), info.nonce.clone());
        if let SessionRequest::Issuance(issuance) = &mut request {
            // Remember which public keys the server will use.
            for credreq in &mut issuance.credentials {
                credreq.key_counter = info.keys.get(&credreq.issuer()).copied().unwrap_or(0);
            }
        }
        self.set_state(SessionState::ServerInfoFetched);

        let missing = self.store.check_satisfiability(request.disjunctions());
        if !missing.is_empty() {
            if self.try_finish(SessionState::Cancelled) {
                self.handler.unsatisfiable_request(self.action, missing);
            }
            return;
        }

        // Ask the user for permission to execute the session.
        self.set_state(SessionState::AwaitingConsent);
        self.handler.status_update(self.action, Status::Connected);
        let (tx, rx) = mpsc::channel();
        let callback: PermissionCallback = Box::new(move |proceed, choice| {
            let _ = tx.send((proceed, choice));
        });
        match (&request, self.action) {
            (SessionRequest::Disclosure(r), Action::Disclosing) => self
                .handler
                .ask_disclosure_permission(r.clone(), server_name, callback),
            (SessionRequest::Signature(r), Action::Signing) => self
                .handler
                .ask_signature_permission(r.clone(), server_name, callback),
            (SessionRequest::Issuance(r), Action::Issuing) => self
                .handler
                .ask_issuance_permission(r.clone(), server_name, callback),
            _ => return self.fail(Error::Internal("Request does not match action".to_string())),
        }
        let Ok((proceed, choice)) = rx.recv() else {
            return self.fail(Error::Internal(
                "Consent callback dropped without answering".to_string(),
            ));
        };
        if !proceed {
            return self.cancel();
        }

        *lock(&self.request) = Some(request.clone());
        self.set_state(SessionState::Computing);
        self.handler
            .status_update(self.action, Status::Communicating);
        let choice = choice.unwrap_or_default();

        if !self.distributed(&request) {
            match self.compute_local(&request, &choice) {
                Ok(message) => self.send_response(message),
                Err(e) => self.fail(Error::Crypto(e.to_string())),
            }
            return;
        }

        // Keyshare-assisted path: compose local proof builders with remote
        // commitments; the driver reports back through KeyshareListener.
        let builders = match &request {
            SessionRequest::Disclosure(_) | SessionRequest::Signature(_) => {
                self.store.proof_builders(&choice)
            }
            SessionRequest::Issuance(issuance) => self.store.issuance_proof_builders(issuance),
        };
        let builders = match builders {
            Ok(builders) => builders,
            Err(e) => return self.fail(Error::Crypto(e.to_string())),
        };
        match &self.keyshare {
            Some(driver) => driver.start(&request, builders, &*self.handler, &**self),
            None => self.fail(Error::Keyshare(
                "Session requires a keyshare server but no keyshare driver is available"
                    .to_string(),
            )),
        }
    }

    /// Whether any scheme referenced by the request declares a keyshare
    /// server.
    fn distributed(&self, request: &SessionRequest) -> bool {
        let configuration = match self.configuration.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        request.scheme_managers().iter().any(|scheme| {
            configuration
                .scheme_managers
                .get(scheme)
                .map(|m| m.distributed())
                .unwrap_or(false)
        })
    }

    fn compute_local(
        &self,
        request: &SessionRequest,
        choice: &DisclosureChoice,
    ) -> Result<SessionMessage, Error> {
        match request {
            SessionRequest::Disclosure(_) => Ok(SessionMessage::Proofs(
                self.store.proofs(choice, request, false)?,
            )),
            SessionRequest::Signature(_) => Ok(SessionMessage::Proofs(
                self.store.proofs(choice, request, true)?,
            )),
            SessionRequest::Issuance(issuance) => Ok(SessionMessage::IssueCommitments(
                self.store.issue_commitments(issuance)?,
            )),
        }
    }

    fn send_response(&self, message: SessionMessage) {
        self.set_state(SessionState::Posting);

        match self.action {
            Action::Disclosing | Action::Signing => {
                let body = match serde_json::to_vec(&message) {
                    Ok(body) => body,
                    Err(e) => return self.fail(Error::Internal(e.to_string())),
                };
                let response = match self.transport.post_bytes("proofs", body) {
                    Ok(response) => response,
                    Err(e) => return self.fail(e),
                };
                // The body is the literal "VALID", JSON-quoted or bare.
                let response = serde_json::from_slice::<String>(&response)
                    .unwrap_or_else(|_| String::from_utf8_lossy(&response).trim().to_string());
                if response != "VALID" {
                    return self.fail(Error::Rejected(response));
                }
            }
            Action::Issuing => {
                let signatures: Vec<IssueSignatureMessage> =
                    match crate::transport::post_json(&*self.transport, "commitments", &message) {
                        Ok(signatures) => signatures,
                        Err(e) => return self.fail(e),
                    };
                let request = lock(&self.request);
                let Some(SessionRequest::Issuance(issuance)) = &*request else {
                    return self.fail(Error::Internal("Issuance request missing".to_string()));
                };
                if let Err(e) = self.store.construct_credentials(&signatures, issuance) {
                    return self.fail(Error::Crypto(e.to_string()));
                }
            }
            Action::Unknown => {
                return self.fail(Error::UnknownAction("unknown".to_string()));
            }
        }

        if let Err(e) = self
            .store
            .add_log_entry(LogEntry::new(self.action, &message.proofs()))
        {
            log::warn!("Failed to log session: {}", e);
        }
        if self.try_finish(SessionState::Completed) {
            self.handler.status_update(self.action, Status::Done);
            self.handler.success(self.action);
        }
    }

    fn set_state(&self, state: SessionState) {
        let mut guard = lock(&self.state);
        if !guard.is_terminal() {
            *guard = state;
        }
    }

    /// Enter a terminal state. Returns false if the session already
    /// terminated; the first outcome wins.
    fn try_finish(&self, state: SessionState) -> bool {
        debug_assert!(state.is_terminal());
        let mut guard = lock(&self.state);
        if guard.is_terminal() {
            return false;
        }
        *guard = state;
        true
    }

    /// Terminate with a failure: best-effort DELETE, then report.
    fn fail(&self, error: Error) {
        if !self.try_finish(SessionState::Failed) {
            return;
        }
        if let Err(e) = self.transport.delete() {
            log::debug!("Session DELETE failed: {}", e);
        }
        self.handler.failure(self.action, error);
    }

    /// Terminate by user cancellation. Idempotent.
    fn cancel(&self) {
        if !self.try_finish(SessionState::Cancelled) {
            return;
        }
        if let Err(e) = self.transport.delete() {
            log::debug!("Session DELETE failed: {}", e);
        }
        self.handler.cancelled(self.action);
    }
}

impl KeyshareListener for SessionInner {
    fn keyshare_done(&self, message: SessionMessage) {
        self.send_response(message);
    }

    fn keyshare_cancelled(&self) {
        self.cancel();
    }

    fn keyshare_blocked(&self, duration_secs: u64) {
        self.fail(Error::KeyshareBlocked(duration_secs));
    }

    fn keyshare_error(&self, error: Error) {
        self.fail(error);
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}
