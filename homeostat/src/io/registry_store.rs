//! Capability registry storage (`.homeostat/state/capabilities.json`).

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::Result;
use tracing::{debug, warn};

use crate::core::registry::CapabilityRegistry;
use crate::io::atomic::write_json_atomic;

/// Load the registry, falling back to an empty one when missing or corrupt.
pub fn load_registry(path: &Path) -> CapabilityRegistry {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(err) if err.kind() == ErrorKind::NotFound => {
            debug!(path = %path.display(), "no registry file, starting empty");
            return CapabilityRegistry::default();
        }
        Err(err) => {
            warn!(path = %path.display(), err = %err, "cannot read registry, starting empty");
            return CapabilityRegistry::default();
        }
    };
    match serde_json::from_str::<CapabilityRegistry>(&contents) {
        Ok(registry) => {
            debug!(
                capabilities = registry.capabilities.len(),
                anti_patterns = registry.anti_patterns.len(),
                exploration_rate = registry.exploration_log.exploration_rate,
                "registry loaded"
            );
            registry
        }
        Err(err) => {
            warn!(path = %path.display(), err = %err, "corrupt registry, starting empty");
            CapabilityRegistry::default()
        }
    }
}

/// Atomically write the registry (temp file + rename).
pub fn write_registry(path: &Path, registry: &CapabilityRegistry) -> Result<()> {
    debug!(
        path = %path.display(),
        capabilities = registry.capabilities.len(),
        "writing registry"
    );
    write_json_atomic(path, registry)
}
