//! MAC-address host identifiers
//!
//! Hosts are named by the MAC address of their boot interface. The address is
//! kept exactly as the client sent it (that spelling ends up in filenames on
//! disk) but every comparison is case-insensitive.

use crate::error::Error;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::fmt;

/// Suffix of uploaded install packages (`<mac>.tgz`)
pub const PACKAGE_SUFFIX: &str = ".tgz";

static MAC_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$").unwrap());

static PACKAGE_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}\.tgz$").unwrap());

/// Returns true if `s` is six colon-separated pairs of hex digits.
///
/// Surrounding whitespace, dashes as separators and short forms are all
/// rejected; case is irrelevant.
pub fn is_valid_mac(s: &str) -> bool {
    MAC_PATTERN.is_match(s)
}

/// Returns true if `s` names an install package, e.g. `aa:bb:cc:dd:ee:ff.tgz`
pub fn is_package_filename(s: &str) -> bool {
    PACKAGE_PATTERN.is_match(s)
}

/// A validated host identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct HostIdentifier(String);

impl HostIdentifier {
    /// Validate `s` as a MAC address, preserving its case.
    ///
    /// # Arguments
    ///
    /// * `s` - MAC address in the format "xx:xx:xx:xx:xx:xx"
    pub fn parse(s: &str) -> Result<Self, Error> {
        if is_valid_mac(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::InvalidMac(s.to_string()))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Lower-cased form, used for case-insensitive keys and prefix matches
    pub fn folded(&self) -> String {
        self.0.to_lowercase()
    }

    /// Case-insensitive comparison against a raw identifier string
    pub fn matches(&self, other: &str) -> bool {
        self.0.eq_ignore_ascii_case(other)
    }
}

impl fmt::Display for HostIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_macs() {
        assert!(is_valid_mac("aa:bb:cc:dd:ee:ff"));
        assert!(is_valid_mac("AA:BB:CC:DD:EE:FF"));
        assert!(is_valid_mac("00:1a:2B:3c:4D:5e"));
    }

    #[test]
    fn test_invalid_macs() {
        for bad in [
            "",
            " aa:bb:cc:dd:ee:ff",
            "aa:bb:cc:dd:ee:ff ",
            "aa:bb:cc:dd:ee:ff\n",
            "aa:bb:cc:dd:ee",
            "aa:bb:cc:dd:ee:ff:00",
            "aa-bb-cc-dd-ee-ff",
            "aabbccddeeff",
            "gg:bb:cc:dd:ee:ff",
            "a:bb:cc:dd:ee:ff",
            "aaa:bb:cc:dd:ee:ff",
        ] {
            assert!(!is_valid_mac(bad), "{:?} should be rejected", bad);
        }
    }

    #[test]
    fn test_parse_preserves_case() {
        let id = HostIdentifier::parse("AA:bb:CC:dd:EE:ff").unwrap();
        assert_eq!(id.as_str(), "AA:bb:CC:dd:EE:ff");
        assert_eq!(id.folded(), "aa:bb:cc:dd:ee:ff");
        assert_eq!(id.to_string(), "AA:bb:CC:dd:EE:ff");
    }

    #[test]
    fn test_parse_rejects_garbage() {
        let err = HostIdentifier::parse("not-a-mac").unwrap_err();
        assert_eq!(err, Error::InvalidMac("not-a-mac".to_string()));
    }

    #[test]
    fn test_matches_ignores_case() {
        let id = HostIdentifier::parse("AA:BB:CC:DD:EE:FF").unwrap();
        assert!(id.matches("aa:bb:cc:dd:ee:ff"));
        assert!(id.matches("Aa:Bb:Cc:Dd:Ee:Ff"));
        assert!(!id.matches("aa:bb:cc:dd:ee:00"));
    }

    #[test]
    fn test_package_filename() {
        assert!(is_package_filename("aa:bb:cc:dd:ee:ff.tgz"));
        assert!(is_package_filename("AA:BB:CC:DD:EE:FF.tgz"));

        assert!(!is_package_filename("aa:bb:cc:dd:ee:ff.tar.gz"));
        assert!(!is_package_filename("aa:bb:cc:dd:ee:ff.tgz.sh"));
        assert!(!is_package_filename("../aa:bb:cc:dd:ee:ff.tgz"));
        assert!(!is_package_filename("package.tgz"));
    }
}
