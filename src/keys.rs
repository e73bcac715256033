//! Issuer key material and keyshare server keys.
//!
//! Issuer keys live under `<scheme>/<issuer>/PublicKeys/<counter>.xml` and
//! `<scheme>/<issuer>/PrivateKeys/<counter>.xml`. The proof primitives that
//! consume them are out of scope; this module only provides the typed integer
//! surface (modulus, bases, factors) and the consistency checks the
//! configuration enforces over it.

use crate::error::Error;
use crate::identifier::IssuerId;
use num_bigint::BigUint;
use serde::Deserialize;

/// `PublicKeys/<counter>.xml`.
#[derive(Debug, Clone, Deserialize)]
struct IssuerPublicKeyXml {
    #[serde(rename = "Counter")]
    counter: u32,
    #[serde(rename = "ExpiryDate")]
    expiry_date: u64,
    #[serde(rename = "Elements")]
    elements: PublicKeyElements,
}

#[derive(Debug, Clone, Deserialize)]
struct PublicKeyElements {
    n: String,
    #[serde(rename = "Z")]
    z: String,
    #[serde(rename = "S")]
    s: String,
    #[serde(rename = "Bases")]
    bases: BaseList,
}

#[derive(Debug, Clone, Deserialize)]
struct BaseList {
    #[serde(rename = "Base", default)]
    bases: Vec<String>,
}

/// `PrivateKeys/<counter>.xml`.
#[derive(Debug, Clone, Deserialize)]
struct IssuerPrivateKeyXml {
    #[serde(rename = "Counter")]
    counter: u32,
    #[serde(rename = "Elements")]
    elements: PrivateKeyElements,
}

#[derive(Debug, Clone, Deserialize)]
struct PrivateKeyElements {
    p: String,
    q: String,
}

fn parse_bigint(field: &str, s: &str) -> Result<BigUint, Error> {
    BigUint::parse_bytes(s.trim().as_bytes(), 10)
        .ok_or_else(|| Error::Parsing(format!("Invalid integer in key element <{}>", field)))
}

/// An issuer public key: counter, expiry, and the issuance bases `R`.
///
/// A key supports a credential type only if it carries at least
/// `attributes + 2` bases (metadata and secret-key slots included).
#[derive(Debug, Clone)]
pub struct IssuerPublicKey {
    pub issuer: IssuerId,
    pub counter: u32,
    /// Expiry as seconds since the Unix epoch.
    pub expiry_date: u64,
    pub n: BigUint,
    pub z: BigUint,
    pub s: BigUint,
    pub bases: Vec<BigUint>,
}

impl IssuerPublicKey {
    pub fn parse(issuer: IssuerId, bytes: &[u8]) -> Result<Self, Error> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::Parsing(format!("Public key is not UTF-8: {}", e)))?;
        let xml: IssuerPublicKeyXml = quick_xml::de::from_str(text)
            .map_err(|e| Error::Parsing(format!("Invalid public key XML: {}", e)))?;

        let bases = xml
            .elements
            .bases
            .bases
            .iter()
            .map(|b| parse_bigint("Base", b))
            .collect::<Result<Vec<_>, _>>()?;
        if bases.is_empty() {
            return Err(Error::Parsing(format!(
                "Public key {} of issuer {} has no bases",
                xml.counter, issuer
            )));
        }

        Ok(IssuerPublicKey {
            issuer,
            counter: xml.counter,
            expiry_date: xml.expiry_date,
            n: parse_bigint("n", &xml.elements.n)?,
            z: parse_bigint("Z", &xml.elements.z)?,
            s: parse_bigint("S", &xml.elements.s)?,
            bases,
        })
    }

    /// Whether this key has enough bases for a credential with the given
    /// number of attributes.
    pub fn supports_attributes(&self, count: usize) -> bool {
        self.bases.len() >= count + 2
    }
}

/// An issuer private key: the factors of the matching public key modulus.
#[derive(Debug, Clone)]
pub struct IssuerPrivateKey {
    pub issuer: IssuerId,
    pub counter: u32,
    pub p: BigUint,
    pub q: BigUint,
}

impl IssuerPrivateKey {
    pub fn parse(issuer: IssuerId, bytes: &[u8]) -> Result<Self, Error> {
        let text = std::str::from_utf8(bytes)
            .map_err(|e| Error::Parsing(format!("Private key is not UTF-8: {}", e)))?;
        let xml: IssuerPrivateKeyXml = quick_xml::de::from_str(text)
            .map_err(|e| Error::Parsing(format!("Invalid private key XML: {}", e)))?;
        Ok(IssuerPrivateKey {
            issuer,
            counter: xml.counter,
            p: parse_bigint("p", &xml.elements.p)?,
            q: parse_bigint("q", &xml.elements.q)?,
        })
    }

    /// Whether this private key belongs to the given public key:
    /// `p * q == N`.
    pub fn belongs_to(&self, pk: &IssuerPublicKey) -> bool {
        &self.p * &self.q == pk.n
    }
}

/// A keyshare server public key: an RSA key the scheme ships as
/// `kss-<id>.pem`, used to verify JWTs minted by the keyshare server.
///
/// Parsed once into a [`jsonwebtoken::DecodingKey`] and cached by the
/// configuration.
pub struct KeysharePublicKey {
    pub key_id: u32,
    pub decoding_key: jsonwebtoken::DecodingKey,
}

impl KeysharePublicKey {
    pub fn parse(key_id: u32, pem_bytes: &[u8]) -> Result<Self, Error> {
        let decoding_key = jsonwebtoken::DecodingKey::from_rsa_pem(pem_bytes)
            .map_err(|e| Error::Parsing(format!("Invalid keyshare server public key: {}", e)))?;
        Ok(KeysharePublicKey {
            key_id,
            decoding_key,
        })
    }
}

impl std::fmt::Debug for KeysharePublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeysharePublicKey")
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod testkeys {
    //! Small fixture keys used across the crate's tests. The integers are
    //! tiny; the proof primitives consuming real keys are out of scope.

    /// `n = 7829 * 7853 = 61481137`, six bases: supports up to 4 attributes.
    pub fn public_key_xml(counter: u32) -> String {
        format!(
            r#"<IssuerPublicKey>
                <Counter>{}</Counter>
                <ExpiryDate>33170306816</ExpiryDate>
                <Elements>
                    <n>61481137</n>
                    <Z>12345</Z>
                    <S>54321</S>
                    <Bases>
                        <Base>101</Base>
                        <Base>103</Base>
                        <Base>107</Base>
                        <Base>109</Base>
                        <Base>113</Base>
                        <Base>127</Base>
                    </Bases>
                </Elements>
            </IssuerPublicKey>"#,
            counter
        )
    }

    pub fn private_key_xml(counter: u32) -> String {
        format!(
            r#"<IssuerPrivateKey>
                <Counter>{}</Counter>
                <Elements>
                    <p>7829</p>
                    <q>7853</q>
                </Elements>
            </IssuerPrivateKey>"#,
            counter
        )
    }
}
