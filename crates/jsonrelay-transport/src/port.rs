use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// A platform serial port name such as `COM20` or `/dev/ttyS3`.
///
/// The name is opaque to the relay; only the allocator looks at the trailing
/// number, through [`PortIdentifier::numeric_suffix`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PortIdentifier(String);

impl PortIdentifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Build `<prefix><number>`, e.g. `COM` + 20.
    pub fn numbered(prefix: &str, number: u32) -> Self {
        Self(format!("{prefix}{number}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Trailing decimal number of the name, if it has one.
    ///
    /// `COM20` yields 20, `/dev/ttyUSB0` yields 0, `COM#` yields `None`.
    pub fn numeric_suffix(&self) -> Option<u32> {
        let digits = self.0.len() - self.prefix().len();
        if digits == 0 {
            return None;
        }
        self.0[self.0.len() - digits..].parse().ok()
    }

    /// The name with its trailing digits removed.
    pub fn prefix(&self) -> &str {
        self.0.trim_end_matches(|c: char| c.is_ascii_digit())
    }
}

impl fmt::Display for PortIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PortIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for PortIdentifier {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PortIdentifier {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl FromStr for PortIdentifier {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s.trim()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_suffix_parses_trailing_digits() {
        assert_eq!(PortIdentifier::new("COM20").numeric_suffix(), Some(20));
        assert_eq!(PortIdentifier::new("/dev/ttyUSB0").numeric_suffix(), Some(0));
        assert_eq!(PortIdentifier::new("COM#").numeric_suffix(), None);
        assert_eq!(PortIdentifier::new("COM").numeric_suffix(), None);
    }

    #[test]
    fn numeric_suffix_rejects_overflow() {
        assert_eq!(
            PortIdentifier::new("COM99999999999999").numeric_suffix(),
            None
        );
    }

    #[test]
    fn prefix_strips_digits() {
        assert_eq!(PortIdentifier::new("COM21").prefix(), "COM");
        assert_eq!(PortIdentifier::numbered("COM", 7).as_str(), "COM7");
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&PortIdentifier::new("COM20")).unwrap();
        assert_eq!(json, "\"COM20\"");
    }
}
