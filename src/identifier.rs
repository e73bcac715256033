//! Dotted hierarchical identifiers for trust-root entities.
//!
//! A scheme manager id is a single segment (`irma-demo`); each level below
//! appends one dot-separated segment: issuer `irma-demo.RU`, credential type
//! `irma-demo.RU.studentCard`, attribute type
//! `irma-demo.RU.studentCard.studentID`. Parents are derivable by prefix.

use crate::error::Error;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! identifier {
    ($name:ident, $segments:expr, $doc:expr) => {
        #[doc = $doc]
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $name(String);

        impl $name {
            /// The number of dot-separated segments this identifier carries.
            pub const SEGMENTS: usize = $segments;

            /// The final segment, i.e. the entity's short name.
            pub fn name(&self) -> &str {
                self.0.rsplit('.').next().unwrap_or(&self.0)
            }

            /// The first segment: the scheme manager this entity falls under.
            pub fn root(&self) -> &str {
                self.0.split('.').next().unwrap_or(&self.0)
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self, Error> {
                let segments = s.split('.').count();
                if s.is_empty() || segments != $segments || s.split('.').any(str::is_empty) {
                    return Err(Error::Parsing(format!(
                        "{} must consist of {} non-empty dot-separated segments, got {:?}",
                        stringify!($name),
                        $segments,
                        s
                    )));
                }
                Ok(Self(s.to_string()))
            }
        }

        impl TryFrom<String> for $name {
            type Error = Error;

            fn try_from(s: String) -> Result<Self, Error> {
                s.parse()
            }
        }

        impl From<$name> for String {
            fn from(id: $name) -> String {
                id.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

identifier!(SchemeManagerId, 1, "Identifies a scheme manager (trust root).");
identifier!(IssuerId, 2, "Identifies an issuer under a scheme manager.");
identifier!(CredentialTypeId, 3, "Identifies a credential type under an issuer.");
identifier!(AttributeTypeId, 4, "Identifies one attribute of a credential type.");

impl IssuerId {
    pub fn from_parts(scheme: &SchemeManagerId, issuer: &str) -> Self {
        IssuerId(format!("{}.{}", scheme, issuer))
    }

    pub fn scheme_manager(&self) -> SchemeManagerId {
        SchemeManagerId(self.root().to_string())
    }
}

impl CredentialTypeId {
    pub fn from_parts(issuer: &IssuerId, credential: &str) -> Self {
        CredentialTypeId(format!("{}.{}", issuer.as_str(), credential))
    }

    pub fn issuer(&self) -> IssuerId {
        IssuerId(self.0.rsplitn(2, '.').nth(1).unwrap_or("").to_string())
    }

    pub fn scheme_manager(&self) -> SchemeManagerId {
        SchemeManagerId(self.root().to_string())
    }
}

impl AttributeTypeId {
    pub fn from_parts(credential: &CredentialTypeId, attribute: &str) -> Self {
        AttributeTypeId(format!("{}.{}", credential.as_str(), attribute))
    }

    pub fn credential_type(&self) -> CredentialTypeId {
        CredentialTypeId(self.0.rsplitn(2, '.').nth(1).unwrap_or("").to_string())
    }

    pub fn scheme_manager(&self) -> SchemeManagerId {
        SchemeManagerId(self.root().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let attr: AttributeTypeId = "irma-demo.RU.studentCard.studentID".parse().unwrap();
        assert_eq!(attr.to_string(), "irma-demo.RU.studentCard.studentID");
        assert_eq!(attr.name(), "studentID");
        assert_eq!(attr.root(), "irma-demo");
    }

    #[test]
    fn test_parent_derivation() {
        let attr: AttributeTypeId = "irma-demo.RU.studentCard.studentID".parse().unwrap();
        let cred = attr.credential_type();
        assert_eq!(cred.as_str(), "irma-demo.RU.studentCard");
        let issuer = cred.issuer();
        assert_eq!(issuer.as_str(), "irma-demo.RU");
        assert_eq!(issuer.scheme_manager().as_str(), "irma-demo");
    }

    #[test]
    fn test_from_parts() {
        let scheme: SchemeManagerId = "irma-demo".parse().unwrap();
        let issuer = IssuerId::from_parts(&scheme, "RU");
        let cred = CredentialTypeId::from_parts(&issuer, "studentCard");
        assert_eq!(cred.as_str(), "irma-demo.RU.studentCard");
        assert_eq!(cred.name(), "studentCard");
    }

    #[test]
    fn test_wrong_segment_count_rejected() {
        assert!("irma-demo.RU".parse::<SchemeManagerId>().is_err());
        assert!("irma-demo".parse::<IssuerId>().is_err());
        assert!("a..b".parse::<CredentialTypeId>().is_err());
        assert!("".parse::<SchemeManagerId>().is_err());
    }

    #[test]
    fn test_serde_roundtrip() {
        let cred: CredentialTypeId = "irma-demo.RU.studentCard".parse().unwrap();
        let json = serde_json::to_string(&cred).unwrap();
        assert_eq!(json, "\"irma-demo.RU.studentCard\"");
        let back: CredentialTypeId = serde_json::from_str(&json).unwrap();
        assert_eq!(back, cred);
    }
}
