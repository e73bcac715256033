//! Session requests: the QR payload that opens a session and the three
//! request variants a server may put behind it.
//!
//! Disclosure, signature and issuance requests share the base fields
//! (context, nonce, disjunctions) and diverge in payload, so they are a
//! tagged sum with accessors over the shared part.

use crate::error::Error;
use crate::identifier::{AttributeTypeId, CredentialTypeId, IssuerId, SchemeManagerId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashMap};

/// The QR payload a wallet scans to start a session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Qr {
    /// Server URL of the session.
    pub u: String,
    /// Minimum protocol version supported by the server.
    #[serde(rename = "v")]
    pub protocol_version: String,
    /// Maximum protocol version supported by the server.
    #[serde(rename = "vmax")]
    pub protocol_max_version: String,
    /// The session type: `disclosing`, `signing` or `issuing`.
    #[serde(rename = "irmaqr")]
    pub session_type: String,
}

/// The envelope returned by `GET {server}/jwt`.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionInfo {
    pub jwt: String,
    pub nonce: serde_json::Value,
    pub context: serde_json::Value,
    /// For issuance: the public key counter the server will use per issuer.
    #[serde(default)]
    pub keys: HashMap<IssuerId, u32>,
}

/// A request element: satisfied by disclosing one of the listed attributes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Disjunction {
    pub label: String,
    pub attributes: Vec<AttributeTypeId>,
    /// Optional required values, keyed by attribute.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub values: BTreeMap<AttributeTypeId, String>,
}

/// The attributes the user chose to disclose, one per disjunction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DisclosureChoice {
    pub attributes: Vec<AttributeTypeId>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct BaseRequest {
    #[serde(default)]
    context: serde_json::Value,
    #[serde(default)]
    nonce: serde_json::Value,
}

/// A request to disclose attributes.
#[derive(Debug, Clone, Deserialize)]
pub struct DisclosureRequest {
    #[serde(flatten)]
    base: BaseRequest,
    pub content: Vec<Disjunction>,
}

/// A request to sign a message with attributes.
#[derive(Debug, Clone, Deserialize)]
pub struct SignatureRequest {
    #[serde(flatten)]
    base: BaseRequest,
    pub content: Vec<Disjunction>,
    pub message: String,
    #[serde(default, rename = "messageType")]
    pub message_type: Option<String>,
}

/// A request to issue credentials, possibly disclosing attributes alongside.
#[derive(Debug, Clone, Deserialize)]
pub struct IssuanceRequest {
    #[serde(flatten)]
    base: BaseRequest,
    pub credentials: Vec<CredentialRequest>,
    #[serde(default)]
    pub disclose: Vec<Disjunction>,
}

/// One credential to be issued.
#[derive(Debug, Clone, Deserialize)]
pub struct CredentialRequest {
    pub credential: CredentialTypeId,
    pub attributes: BTreeMap<String, String>,
    /// Expiry of the new credential, seconds since the epoch.
    #[serde(default)]
    pub validity: Option<u64>,
    /// The issuer public key counter the server will sign with; taken from
    /// the session envelope, not from the JWT.
    #[serde(skip)]
    pub key_counter: u32,
}

impl CredentialRequest {
    pub fn issuer(&self) -> IssuerId {
        self.credential.issuer()
    }
}

/// A session request: the three variants share context, nonce and
/// disjunctions.
#[derive(Debug, Clone)]
pub enum SessionRequest {
    Disclosure(DisclosureRequest),
    Signature(SignatureRequest),
    Issuance(IssuanceRequest),
}

impl SessionRequest {
    fn base(&self) -> &BaseRequest {
        match self {
            SessionRequest::Disclosure(r) => &r.base,
            SessionRequest::Signature(r) => &r.base,
            SessionRequest::Issuance(r) => &r.base,
        }
    }

    fn base_mut(&mut self) -> &mut BaseRequest {
        match self {
            SessionRequest::Disclosure(r) => &mut r.base,
            SessionRequest::Signature(r) => &mut r.base,
            SessionRequest::Issuance(r) => &mut r.base,
        }
    }

    pub fn context(&self) -> &serde_json::Value {
        &self.base().context
    }

    pub fn nonce(&self) -> &serde_json::Value {
        &self.base().nonce
    }

    /// Overwrite context and nonce with the values of the session envelope.
    pub fn set_context_and_nonce(
        &mut self,
        context: serde_json::Value,
        nonce: serde_json::Value,
    ) {
        let base = self.base_mut();
        base.context = context;
        base.nonce = nonce;
    }

    /// The disjunctions the user must satisfy: the request content for
    /// disclosure and signing, the disclose-alongside list for issuance.
    pub fn disjunctions(&self) -> &[Disjunction] {
        match self {
            SessionRequest::Disclosure(r) => &r.content,
            SessionRequest::Signature(r) => &r.content,
            SessionRequest::Issuance(r) => &r.disclose,
        }
    }

    /// Every scheme manager referenced by this request, through either the
    /// requested disjunctions or the credentials to be issued.
    pub fn scheme_managers(&self) -> BTreeSet<SchemeManagerId> {
        let mut schemes: BTreeSet<SchemeManagerId> = self
            .disjunctions()
            .iter()
            .flat_map(|d| d.attributes.iter())
            .map(|a| a.scheme_manager())
            .collect();
        if let SessionRequest::Issuance(issuance) = self {
            schemes.extend(
                issuance
                    .credentials
                    .iter()
                    .map(|c| c.credential.scheme_manager()),
            );
        }
        schemes
    }
}

impl std::str::FromStr for SessionRequest {
    type Err = Error;

    /// Not a parser for any one wire shape: used by tests and embedders to
    /// build requests from their JSON forms, dispatching on the fields
    /// present.
    fn from_str(s: &str) -> Result<Self, Error> {
        let value: serde_json::Value =
            serde_json::from_str(s).map_err(|e| Error::Parsing(e.to_string()))?;
        let parsed = if value.get("credentials").is_some() {
            SessionRequest::Issuance(
                serde_json::from_value(value).map_err(|e| Error::Parsing(e.to_string()))?,
            )
        } else if value.get("message").is_some() {
            SessionRequest::Signature(
                serde_json::from_value(value).map_err(|e| Error::Parsing(e.to_string()))?,
            )
        } else {
            SessionRequest::Disclosure(
                serde_json::from_value(value).map_err(|e| Error::Parsing(e.to_string()))?,
            )
        };
        Ok(parsed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_qr() {
        let qr: Qr = serde_json::from_value(json!({
            "u": "https://server.example.com/irma/abc123",
            "v": "2.1",
            "vmax": "2.2",
            "irmaqr": "disclosing",
        }))
        .unwrap();
        assert_eq!(qr.u, "https://server.example.com/irma/abc123");
        assert_eq!(qr.protocol_version, "2.1");
        assert_eq!(qr.session_type, "disclosing");
    }

    #[test]
    fn test_parse_session_info() {
        let info: SessionInfo = serde_json::from_value(json!({
            "jwt": "xxx.yyy.zzz",
            "nonce": 42,
            "context": 1337,
            "keys": {"irma-demo.RU": 2},
        }))
        .unwrap();
        assert_eq!(info.jwt, "xxx.yyy.zzz");
        assert_eq!(
            info.keys.get(&"irma-demo.RU".parse().unwrap()),
            Some(&2)
        );
    }

    #[test]
    fn test_disclosure_request_shared_fields() {
        let mut request: SessionRequest = json!({
            "content": [{
                "label": "Student number",
                "attributes": ["irma-demo.RU.studentCard.studentID"],
            }],
        })
        .to_string()
        .parse()
        .unwrap();

        assert!(matches!(request, SessionRequest::Disclosure(_)));
        assert_eq!(request.disjunctions().len(), 1);

        request.set_context_and_nonce(json!(1337), json!(42));
        assert_eq!(request.context(), &json!(1337));
        assert_eq!(request.nonce(), &json!(42));
    }

    #[test]
    fn test_signature_request_dispatch() {
        let request: SessionRequest = json!({
            "message": "I agree",
            "content": [{
                "label": "Name",
                "attributes": ["irma-demo.RU.studentCard.studentID"],
            }],
        })
        .to_string()
        .parse()
        .unwrap();
        let SessionRequest::Signature(sig) = &request else {
            panic!("expected signature request");
        };
        assert_eq!(sig.message, "I agree");
    }

    #[test]
    fn test_issuance_request_scheme_managers() {
        let request: SessionRequest = json!({
            "credentials": [{
                "credential": "irma-demo.MijnOverheid.root",
                "attributes": {"BSN": "12345"},
            }],
            "disclose": [{
                "label": "Student number",
                "attributes": ["other-scheme.RU.studentCard.studentID"],
            }],
        })
        .to_string()
        .parse()
        .unwrap();

        let schemes = request.scheme_managers();
        assert_eq!(schemes.len(), 2);
        assert!(schemes.contains(&"irma-demo".parse().unwrap()));
        assert!(schemes.contains(&"other-scheme".parse().unwrap()));
    }

    #[test]
    fn test_disjunction_values() {
        let disjunction: Disjunction = serde_json::from_value(json!({
            "label": "University",
            "attributes": ["irma-demo.RU.studentCard.university"],
            "values": {"irma-demo.RU.studentCard.university": "Radboud"},
        }))
        .unwrap();
        assert_eq!(disjunction.values.len(), 1);
    }
}
