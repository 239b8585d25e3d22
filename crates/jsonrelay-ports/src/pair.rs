use std::fmt;

use jsonrelay_transport::PortIdentifier;
use serde::{Deserialize, Serialize};

/// Two cross-connected virtual serial endpoints.
///
/// Consecutive at allocation time (`COM20`, `COM21`); nothing checks that
/// afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PortPair {
    primary: PortIdentifier,
    secondary: PortIdentifier,
}

impl PortPair {
    pub fn new(primary: impl Into<PortIdentifier>, secondary: impl Into<PortIdentifier>) -> Self {
        Self {
            primary: primary.into(),
            secondary: secondary.into(),
        }
    }

    pub fn primary(&self) -> &PortIdentifier {
        &self.primary
    }

    pub fn secondary(&self) -> &PortIdentifier {
        &self.secondary
    }

    pub fn contains(&self, port: &PortIdentifier) -> bool {
        &self.primary == port || &self.secondary == port
    }

    /// `(input, output)`: the listening endpoint is the higher-numbered one.
    ///
    /// When either name has no numeric suffix the secondary listens.
    pub fn oriented(&self) -> (PortIdentifier, PortIdentifier) {
        match (self.primary.numeric_suffix(), self.secondary.numeric_suffix()) {
            (Some(p), Some(s)) if p > s => (self.primary.clone(), self.secondary.clone()),
            _ => (self.secondary.clone(), self.primary.clone()),
        }
    }
}

impl fmt::Display for PortPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} <-> {}", self.primary, self.secondary)
    }
}

/// The persisted pair document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PersistedConfig {
    pub pair: PortPair,
    /// Local time the pair was saved, `YYYY-MM-DD HH:MM:SS`.
    pub created_at: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_is_higher_numbered_port() {
        let pair = PortPair::new("COM20", "COM21");
        let (input, output) = pair.oriented();
        assert_eq!(input.as_str(), "COM21");
        assert_eq!(output.as_str(), "COM20");

        let reversed = PortPair::new("COM21", "COM20");
        assert_eq!(reversed.oriented().0.as_str(), "COM21");
    }

    #[test]
    fn unnumbered_names_fall_back_to_secondary_input() {
        let pair = PortPair::new("COMA", "COM5");
        assert_eq!(pair.oriented(), ("COM5".into(), "COMA".into()));
    }

    #[test]
    fn contains_either_endpoint() {
        let pair = PortPair::new("COM3", "COM4");
        assert!(pair.contains(&"COM3".into()));
        assert!(pair.contains(&"COM4".into()));
        assert!(!pair.contains(&"COM5".into()));
        assert_eq!(pair.to_string(), "COM3 <-> COM4");
    }
}
