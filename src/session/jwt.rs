//! Decoding of the session descriptor JWT.
//!
//! The server wraps its session request in a JWT whose claim shape is keyed
//! by the session action: disclosure requests arrive under `sprequest`,
//! signature requests under `absrequest`, issuance requests under
//! `iprequest`, with the requestor's name in the `iss` claim.
//!
//! The JWT signature is not verified here: the descriptor is fetched over
//! the session channel itself and everything in it is shown to the user for
//! consent before any proof is computed.

use crate::error::Error;
use crate::session::handler::Action;
use crate::session::request::{
    DisclosureRequest, IssuanceRequest, SessionRequest, SignatureRequest,
};
use jsonwebtoken::{Algorithm, DecodingKey, Validation};
use serde::de::DeserializeOwned;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RequestContainer<T> {
    request: T,
}

#[derive(Debug, Deserialize)]
struct ServiceProviderClaims {
    #[serde(default)]
    iss: String,
    sprequest: RequestContainer<DisclosureRequest>,
}

#[derive(Debug, Deserialize)]
struct SignatureRequestorClaims {
    #[serde(default)]
    iss: String,
    absrequest: RequestContainer<SignatureRequest>,
}

#[derive(Debug, Deserialize)]
struct IdentityProviderClaims {
    #[serde(default)]
    iss: String,
    iprequest: RequestContainer<IssuanceRequest>,
}

fn decode_claims<T: DeserializeOwned>(token: &str) -> Result<T, Error> {
    let mut validation = Validation::new(Algorithm::RS256);
    validation.algorithms = vec![Algorithm::RS256, Algorithm::HS256, Algorithm::ES256];
    validation.insecure_disable_signature_validation();
    validation.validate_exp = false;
    validation.required_spec_claims.clear();

    let data = jsonwebtoken::decode::<T>(token, &DecodingKey::from_secret(&[]), &validation)
        .map_err(|e| Error::InvalidJwt(e.to_string()))?;
    Ok(data.claims)
}

/// Decode the session descriptor JWT into the request matching the session
/// action, along with the requestor's server name.
pub fn parse_requestor_jwt(action: Action, token: &str) -> Result<(SessionRequest, String), Error> {
    match action {
        Action::Disclosing => {
            let claims: ServiceProviderClaims = decode_claims(token)?;
            Ok((
                SessionRequest::Disclosure(claims.sprequest.request),
                claims.iss,
            ))
        }
        Action::Signing => {
            let claims: SignatureRequestorClaims = decode_claims(token)?;
            Ok((
                SessionRequest::Signature(claims.absrequest.request),
                claims.iss,
            ))
        }
        Action::Issuing => {
            let claims: IdentityProviderClaims = decode_claims(token)?;
            Ok((
                SessionRequest::Issuance(claims.iprequest.request),
                claims.iss,
            ))
        }
        Action::Unknown => Err(Error::UnknownAction("unknown".to_string())),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use jsonwebtoken::{EncodingKey, Header};
    use serde_json::json;

    /// Mint a requestor JWT the way test servers do (HS256, throwaway key).
    pub fn encode_jwt(claims: &serde_json::Value) -> String {
        jsonwebtoken::encode(
            &Header::default(),
            claims,
            &EncodingKey::from_secret(b"test-requestor-secret"),
        )
        .unwrap()
    }

    pub fn disclosure_jwt(server: &str, attribute: &str) -> String {
        encode_jwt(&json!({
            "iss": server,
            "sub": "verification_request",
            "sprequest": {
                "request": {
                    "content": [{
                        "label": "attribute",
                        "attributes": [attribute],
                    }],
                },
            },
        }))
    }
}
