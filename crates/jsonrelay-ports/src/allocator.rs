use std::collections::BTreeSet;
use std::sync::Arc;

use jsonrelay_transport::PortIdentifier;
use tracing::{debug, info};

use crate::driver::{DriverError, PortPairDriver};
use crate::pair::PortPair;

/// Errors from pair allocation.
#[derive(Debug, thiserror::Error)]
pub enum AllocError {
    /// No two consecutive names in the range are free.
    #[error("no free consecutive port pair in {prefix}{first}..={prefix}{last}")]
    NotFound {
        prefix: String,
        first: u32,
        last: u32,
    },

    /// The driver could not report busy ports.
    #[error(transparent)]
    Driver(#[from] DriverError),
}

/// Candidate name range for allocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AllocatorConfig {
    pub prefix: String,
    pub first: u32,
    pub last: u32,
}

impl Default for AllocatorConfig {
    fn default() -> Self {
        Self {
            prefix: "COM".to_string(),
            first: 1,
            last: 50,
        }
    }
}

impl AllocatorConfig {
    /// Free names in ascending order, given the busy set.
    pub fn free_ports(&self, busy: &[PortIdentifier]) -> Vec<PortIdentifier> {
        let taken: BTreeSet<u32> = busy
            .iter()
            .filter(|p| p.prefix().eq_ignore_ascii_case(&self.prefix))
            .filter_map(PortIdentifier::numeric_suffix)
            .collect();

        (self.first..=self.last)
            .filter(|n| !taken.contains(n))
            .map(|n| PortIdentifier::numbered(&self.prefix, n))
            .collect()
    }

    /// First ascending `i` with both `i` and `i + 1` free.
    pub fn first_free_pair(&self, busy: &[PortIdentifier]) -> Option<PortPair> {
        self.free_ports(busy)
            .windows(2)
            .find(|w| match (w[0].numeric_suffix(), w[1].numeric_suffix()) {
                (Some(a), Some(b)) => b == a + 1,
                _ => false,
            })
            .map(|w| PortPair::new(w[0].clone(), w[1].clone()))
    }
}

/// Picks free consecutive port names using the driver's busy list.
#[derive(Clone)]
pub struct PortAllocator {
    driver: Arc<dyn PortPairDriver>,
    config: AllocatorConfig,
}

impl PortAllocator {
    pub fn new(driver: Arc<dyn PortPairDriver>) -> Self {
        Self::with_config(driver, AllocatorConfig::default())
    }

    pub fn with_config(driver: Arc<dyn PortPairDriver>, config: AllocatorConfig) -> Self {
        Self { driver, config }
    }

    pub fn config(&self) -> &AllocatorConfig {
        &self.config
    }

    /// Free names in the configured range.
    pub fn available_ports(&self) -> Result<Vec<PortIdentifier>, AllocError> {
        let busy = self.driver.list_busy_ports()?;
        debug!(busy = busy.len(), "busy ports reported by driver");
        Ok(self.config.free_ports(&busy))
    }

    pub fn find_available_pair(&self) -> Result<PortPair, AllocError> {
        let busy = self.driver.list_busy_ports()?;
        let pair = self
            .config
            .first_free_pair(&busy)
            .ok_or_else(|| AllocError::NotFound {
                prefix: self.config.prefix.clone(),
                first: self.config.first,
                last: self.config.last,
            })?;
        info!(%pair, "found free port pair");
        Ok(pair)
    }
}

impl std::fmt::Debug for PortAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortAllocator")
            .field("driver", &self.driver.name())
            .field("config", &self.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn busy(names: &[&str]) -> Vec<PortIdentifier> {
        names.iter().map(|n| PortIdentifier::new(*n)).collect()
    }

    #[test]
    fn skips_to_first_consecutive_gap() {
        let mut names: Vec<String> = (1..=19).map(|n| format!("COM{n}")).collect();
        names.push("COM22".to_string());
        let busy: Vec<PortIdentifier> = names.into_iter().map(PortIdentifier::new).collect();

        let pair = AllocatorConfig::default().first_free_pair(&busy).unwrap();
        assert_eq!(pair, PortPair::new("COM20", "COM21"));
    }

    #[test]
    fn isolated_free_ports_are_not_paired() {
        // Free: COM2, COM4, COM6..=COM50.
        let mut taken = vec!["COM1", "COM3", "COM5"];
        taken.push("COM#");
        let pair = AllocatorConfig::default()
            .first_free_pair(&busy(&taken))
            .unwrap();
        assert_eq!(pair, PortPair::new("COM6", "COM7"));
    }

    #[test]
    fn unparseable_busy_names_are_skipped() {
        let pair = AllocatorConfig::default()
            .first_free_pair(&busy(&["COMX", "CNCA0", "COM#"]))
            .unwrap();
        assert_eq!(pair, PortPair::new("COM1", "COM2"));
    }

    #[test]
    fn exhausted_range_has_no_pair() {
        let config = AllocatorConfig {
            first: 1,
            last: 4,
            ..AllocatorConfig::default()
        };
        assert!(config.first_free_pair(&busy(&["COM2", "COM4"])).is_none());
        assert_eq!(config.free_ports(&busy(&["COM2", "COM4"])), busy(&["COM1", "COM3"]));
    }

    #[test]
    fn prefix_comparison_ignores_case() {
        let config = AllocatorConfig {
            first: 1,
            last: 3,
            ..AllocatorConfig::default()
        };
        assert_eq!(config.free_ports(&busy(&["com1"])), busy(&["COM2", "COM3"]));
    }
}
