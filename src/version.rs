//! Dotted driver version parsing and comparison
//!
//! Versions compare component by component as integers, so `32.0.203.240`
//! sorts below `32.0.1000.1`. Missing trailing components count as zero.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

/// A dotted numeric version such as a GPU or NPU driver version
#[derive(Debug, Clone, Default)]
pub struct DriverVersion {
    components: Vec<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid driver version '{0}'")]
pub struct ParseVersionError(String);

impl DriverVersion {
    pub fn new(components: Vec<u64>) -> Self {
        Self { components }
    }

    pub fn components(&self) -> &[u64] {
        &self.components
    }

    fn component(&self, index: usize) -> u64 {
        self.components.get(index).copied().unwrap_or(0)
    }
}

impl FromStr for DriverVersion {
    type Err = ParseVersionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(ParseVersionError(s.to_string()));
        }

        let components = trimmed
            .split('.')
            .map(|part| part.trim().parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| ParseVersionError(s.to_string()))?;

        Ok(Self { components })
    }
}

impl Ord for DriverVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        let len = self.components.len().max(other.components.len());
        (0..len)
            .map(|i| self.component(i).cmp(&other.component(i)))
            .find(|ord| *ord != Ordering::Equal)
            .unwrap_or(Ordering::Equal)
    }
}

impl PartialOrd for DriverVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for DriverVersion {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for DriverVersion {}

impl fmt::Display for DriverVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self.components.iter().map(|c| c.to_string()).collect();
        write!(f, "{}", parts.join("."))
    }
}

impl Serialize for DriverVersion {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for DriverVersion {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn v(s: &str) -> DriverVersion {
        s.parse().unwrap()
    }

    #[test]
    fn test_parse() {
        assert_eq!(v("32.0.203.240").components(), &[32, 0, 203, 240]);
        assert_eq!(v(" 1.2 ").components(), &[1, 2]);
        assert!("".parse::<DriverVersion>().is_err());
        assert!("32.x.1".parse::<DriverVersion>().is_err());
        assert!("1..2".parse::<DriverVersion>().is_err());
    }

    #[test]
    fn test_component_wise_ordering() {
        // Stripping dots would give 320203240 > 32010001, which is wrong.
        assert!(v("32.0.203.240") < v("32.0.1000.1"));
        assert!(v("32.0.203.258") > v("32.0.203.240"));
        assert!(v("31.9.999.999") < v("32.0.0.0"));
    }

    #[test]
    fn test_missing_components_are_zero() {
        assert_eq!(v("32.0"), v("32.0.0.0"));
        assert!(v("32.0.0.1") > v("32"));
    }

    #[test]
    fn test_display_and_serde() {
        let version = v("32.0.203.240");
        assert_eq!(version.to_string(), "32.0.203.240");

        let json = serde_json::to_string(&version).unwrap();
        assert_eq!(json, "\"32.0.203.240\"");
        let parsed: DriverVersion = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, version);
    }
}
