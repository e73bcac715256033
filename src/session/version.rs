//! Protocol version negotiation.

use crate::error::Error;
use std::fmt;
use std::str::FromStr;

/// A `major.minor` protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct ProtocolVersion {
    pub major: u8,
    pub minor: u8,
}

impl ProtocolVersion {
    pub const fn new(major: u8, minor: u8) -> Self {
        ProtocolVersion { major, minor }
    }
}

impl fmt::Display for ProtocolVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.major, self.minor)
    }
}

impl FromStr for ProtocolVersion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Error> {
        let mut parts = s.split('.');
        let (Some(major), Some(minor), None) = (parts.next(), parts.next(), parts.next()) else {
            return Err(Error::Parsing(format!("Invalid protocol version {:?}", s)));
        };
        Ok(ProtocolVersion {
            major: major
                .parse()
                .map_err(|e| Error::Parsing(format!("Invalid protocol version {:?}: {}", s, e)))?,
            minor: minor
                .parse()
                .map_err(|e| Error::Parsing(format!("Invalid protocol version {:?}: {}", s, e)))?,
        })
    }
}

/// Supported protocol versions. Minor version lists are reverse sorted.
const SUPPORTED_VERSIONS: &[(u8, &[u8])] = &[(2, &[2, 1])];

/// Choose the highest supported version within the server's announced
/// `[min, max]` window.
pub fn calculate_version(min: &str, max: &str) -> Result<ProtocolVersion, Error> {
    let min: ProtocolVersion = min.parse()?;
    let max: ProtocolVersion = max.parse()?;

    // Majors are listed ascending; walk them from the highest down, minors
    // are already reverse sorted, so the first match is the highest.
    for &(major, minors) in SUPPORTED_VERSIONS.iter().rev() {
        for &minor in minors {
            let candidate = ProtocolVersion::new(major, minor);
            if candidate >= min && candidate <= max {
                return Ok(candidate);
            }
        }
    }
    Err(Error::ProtocolVersionNotSupported(
        min.to_string(),
        max.to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let v: ProtocolVersion = "2.1".parse().unwrap();
        assert_eq!(v, ProtocolVersion::new(2, 1));
        assert_eq!(v.to_string(), "2.1");

        assert!("2".parse::<ProtocolVersion>().is_err());
        assert!("2.x".parse::<ProtocolVersion>().is_err());
        assert!("2.1.0".parse::<ProtocolVersion>().is_err());
    }

    #[test]
    fn test_ordering() {
        assert!(ProtocolVersion::new(2, 1) < ProtocolVersion::new(2, 2));
        assert!(ProtocolVersion::new(2, 9) < ProtocolVersion::new(3, 0));
    }

    #[test]
    fn test_negotiation_picks_highest_in_window() {
        assert_eq!(
            calculate_version("2.1", "2.2").unwrap(),
            ProtocolVersion::new(2, 2)
        );
        assert_eq!(
            calculate_version("2.1", "2.1").unwrap(),
            ProtocolVersion::new(2, 1)
        );
        assert_eq!(
            calculate_version("1.0", "2.1").unwrap(),
            ProtocolVersion::new(2, 1)
        );
    }

    #[test]
    fn test_negotiation_no_intersection() {
        let err = calculate_version("2.3", "2.4").unwrap_err();
        assert!(matches!(err, Error::ProtocolVersionNotSupported(_, _)));

        let err = calculate_version("3.0", "3.1").unwrap_err();
        assert!(matches!(err, Error::ProtocolVersionNotSupported(_, _)));

        let err = calculate_version("1.0", "1.9").unwrap_err();
        assert!(matches!(err, Error::ProtocolVersionNotSupported(_, _)));
    }

    #[test]
    fn test_negotiation_invalid_input() {
        assert!(calculate_version("abc", "2.2").is_err());
    }
}
