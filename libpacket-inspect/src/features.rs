use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::Error;

/// Per-interface enable switch for the inspection stage
///
/// Interfaces `0..n` are registered at creation. Lookups are lock-free, so a
/// single table can be shared by all workers while the control side toggles it.
#[derive(Debug)]
pub struct FeatureTable {
    enabled: Vec<AtomicBool>,
}

impl FeatureTable {
    /// Register `n_interfaces` interfaces, all enabled
    pub fn new(n_interfaces: usize) -> Self {
        let enabled = (0..n_interfaces).map(|_| AtomicBool::new(true)).collect();
        FeatureTable { enabled }
    }

    pub fn len(&self) -> usize {
        self.enabled.len()
    }

    pub fn is_empty(&self) -> bool {
        self.enabled.is_empty()
    }

    /// Insert (`enable == true`) or remove the stage from an interface's path
    pub fn enable_disable(&self, sw_if_index: u32, enable: bool) -> Result<(), Error> {
        let flag = self
            .enabled
            .get(sw_if_index as usize)
            .ok_or(Error::InvalidInterface(sw_if_index))?;
        flag.store(enable, Ordering::Relaxed);
        debug!(
            "inspection {} on interface {}",
            if enable { "enabled" } else { "disabled" },
            sw_if_index
        );
        Ok(())
    }

    /// Unknown interfaces are reported as disabled
    pub fn is_enabled(&self, sw_if_index: u32) -> bool {
        self.enabled
            .get(sw_if_index as usize)
            .map(|flag| flag.load(Ordering::Relaxed))
            .unwrap_or(false)
    }
}
