//! Per-process registry of named capabilities
//!
//! A plugin process registers the tiles it serves; the orchestrator registers
//! a placeholder for every tile it expects to dispense. The two registries
//! never cross the process boundary, only their names have to agree.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, warn};

use super::capability::BackupRestorer;

/// What a registry entry holds for a name
pub enum CapabilityAdapter {
    /// A concrete implementation served from this process
    Local(Box<dyn BackupRestorer>),

    /// A capability expected to be dispensed by a plugin process
    Remote,
}

impl CapabilityAdapter {
    pub fn local(capability: impl BackupRestorer + 'static) -> Self {
        CapabilityAdapter::Local(Box::new(capability))
    }

    pub fn is_local(&self) -> bool {
        matches!(self, CapabilityAdapter::Local(_))
    }
}

impl fmt::Debug for CapabilityAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapabilityAdapter::Local(capability) => f
                .debug_tuple("Local")
                .field(&capability.meta().name)
                .finish(),
            CapabilityAdapter::Remote => f.write_str("Remote"),
        }
    }
}

#[derive(Debug, Default)]
pub struct PluginRegistry {
    entries: BTreeMap<String, CapabilityAdapter>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a capability under `name`, replacing any earlier entry.
    ///
    /// The replaced adapter is returned so callers that care can detect the
    /// overwrite; the registry itself never refuses a registration.
    pub fn register(
        &mut self,
        name: impl Into<String>,
        adapter: CapabilityAdapter,
    ) -> Option<CapabilityAdapter> {
        let name = name.into();
        debug!(plugin = %name, ?adapter, "registering plugin");
        let previous = self.entries.insert(name.clone(), adapter);
        if previous.is_some() {
            warn!(plugin = %name, "plugin registered twice, keeping the latest registration");
        }
        previous
    }

    /// Returns the full name → adapter mapping
    pub fn entries(&self) -> &BTreeMap<String, CapabilityAdapter> {
        &self.entries
    }

    /// Returns registered names in sorted order
    pub fn names(&self) -> Vec<&str> {
        self.entries.keys().map(String::as_str).collect()
    }

    pub fn get(&self, name: &str) -> Option<&CapabilityAdapter> {
        self.entries.get(name)
    }

    pub fn get_mut(&mut self, name: &str) -> Option<&mut CapabilityAdapter> {
        self.entries.get_mut(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::capability::{PluginMeta, TileTarget};
    use crate::plugin::error::Result;
    use proptest::prelude::*;

    struct Named(&'static str);

    impl BackupRestorer for Named {
        fn meta(&self) -> PluginMeta {
            PluginMeta::new(self.0, "test")
        }

        fn setup(&mut self, _target: &TileTarget) -> Result<()> {
            Ok(())
        }

        fn backup(&mut self) -> Result<()> {
            Ok(())
        }

        fn restore(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn local_name(adapter: &CapabilityAdapter) -> Option<String> {
        match adapter {
            CapabilityAdapter::Local(capability) => Some(capability.meta().name),
            CapabilityAdapter::Remote => None,
        }
    }

    #[test]
    fn new_registry_is_empty() {
        let registry = PluginRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.names().is_empty());
    }

    #[test]
    fn register_and_lookup() {
        let mut registry = PluginRegistry::new();
        assert!(registry
            .register("ops-manager", CapabilityAdapter::local(Named("ops-manager")))
            .is_none());
        registry.register("elastic-runtime", CapabilityAdapter::Remote);

        assert_eq!(registry.names(), vec!["elastic-runtime", "ops-manager"]);
        assert!(registry.get("ops-manager").unwrap().is_local());
        assert!(!registry.get("elastic-runtime").unwrap().is_local());
        assert!(registry.get("redis").is_none());
    }

    #[test]
    fn overwrite_returns_previous_entry() {
        let mut registry = PluginRegistry::new();
        registry.register("tile", CapabilityAdapter::local(Named("first")));

        let previous = registry
            .register("tile", CapabilityAdapter::local(Named("second")))
            .expect("previous entry");

        assert_eq!(local_name(&previous).as_deref(), Some("first"));
        assert_eq!(
            local_name(registry.get("tile").unwrap()).as_deref(),
            Some("second")
        );
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn registries_are_independent() {
        let mut server_side = PluginRegistry::new();
        let mut caller_side = PluginRegistry::new();
        server_side.register("noop-tile", CapabilityAdapter::local(Named("noop-tile")));
        caller_side.register("other-tile", CapabilityAdapter::Remote);

        assert!(!server_side.contains("other-tile"));
        assert!(!caller_side.contains("noop-tile"));
    }

    proptest! {
        #[test]
        fn last_registration_wins(names in proptest::collection::vec("[a-c]{1,2}", 1..20)) {
            let mut registry = PluginRegistry::new();
            let mut expected = BTreeMap::new();
            for (i, name) in names.iter().enumerate() {
                let adapter = if i % 2 == 0 {
                    CapabilityAdapter::Remote
                } else {
                    CapabilityAdapter::local(Named("x"))
                };
                expected.insert(name.clone(), adapter.is_local());
                registry.register(name.clone(), adapter);
            }

            prop_assert_eq!(registry.len(), expected.len());
            for (name, is_local) in expected {
                prop_assert_eq!(registry.get(&name).unwrap().is_local(), is_local);
            }
        }
    }
}
