//! Kind registry and the asset existence gate.

use std::collections::HashMap;

use super::{AssetRef, Entity, EntityStore};

/// Descriptor for one entity kind known to the system.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindDescriptor {
    pub name: String,
    pub label: String,
    /// Whether the kind may appear as a node of the impact graph.
    pub graphable: bool,
}

const GRAPHABLE_KINDS: &[(&str, &str)] = &[
    ("Appliance", "Appliance"),
    ("Cluster", "Cluster"),
    ("Computer", "Computer"),
    ("DCRoom", "Server room"),
    ("Database", "Database"),
    ("DatabaseInstance", "Database instance"),
    ("Datacenter", "Data center"),
    ("Domain", "Domain"),
    ("Enclosure", "Enclosure"),
    ("Monitor", "Monitor"),
    ("NetworkEquipment", "Network device"),
    ("PassiveDCEquipment", "Passive device"),
    ("PDU", "PDU"),
    ("Peripheral", "Device"),
    ("Phone", "Phone"),
    ("Printer", "Printer"),
    ("Rack", "Rack"),
    ("Software", "Software"),
];

const CATALOG_KINDS: &[(&str, &str)] = &[
    ("Change", "Change"),
    ("Group", "Group"),
    ("Location", "Location"),
    ("Problem", "Problem"),
    ("Ticket", "Ticket"),
    ("User", "User"),
];

/// Maps kind identifiers to descriptors. Kind strings coming from requests are
/// only ever looked up here, never used to build anything directly.
#[derive(Debug, Clone, Default)]
pub struct KindRegistry {
    kinds: HashMap<String, KindDescriptor>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every built-in asset and catalog kind.
    pub fn builtin() -> Self {
        let mut registry = Self::new();
        for (name, label) in GRAPHABLE_KINDS {
            registry.register(KindDescriptor {
                name: name.to_string(),
                label: label.to_string(),
                graphable: true,
            });
        }
        for (name, label) in CATALOG_KINDS {
            registry.register(KindDescriptor {
                name: name.to_string(),
                label: label.to_string(),
                graphable: false,
            });
        }
        registry
    }

    pub fn register(&mut self, descriptor: KindDescriptor) {
        self.kinds.insert(descriptor.name.clone(), descriptor);
    }

    pub fn resolve(&self, kind: &str) -> Option<&KindDescriptor> {
        self.kinds.get(kind)
    }

    /// Names of all graphable kinds, sorted.
    pub fn graphable_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self
            .kinds
            .values()
            .filter(|d| d.graphable)
            .map(|d| d.name.clone())
            .collect();
        kinds.sort();
        kinds
    }
}

/// The single validation boundary for asset references coming from outside:
/// allow-list first, then registry resolution, then an actual load.
pub struct AssetGate<'a> {
    registry: &'a KindRegistry,
    allowed_kinds: &'a [String],
    entities: &'a dyn EntityStore,
}

impl<'a> AssetGate<'a> {
    pub fn new(
        registry: &'a KindRegistry,
        allowed_kinds: &'a [String],
        entities: &'a dyn EntityStore,
    ) -> Self {
        Self {
            registry,
            allowed_kinds,
            entities,
        }
    }

    pub fn is_allowed_kind(&self, kind: &str) -> bool {
        self.allowed_kinds.iter().any(|k| k == kind)
    }

    /// Load the asset if it passes the gate.
    pub fn resolve(&self, asset: &AssetRef) -> Option<Entity> {
        if !self.is_allowed_kind(&asset.kind) {
            log::debug!("Kind {} is not in the allowed list", asset.kind);
            return None;
        }
        if self.registry.resolve(&asset.kind).is_none() {
            log::debug!("Kind {} is not a known entity type", asset.kind);
            return None;
        }
        match self.entities.load(asset) {
            Ok(entity) => entity,
            Err(e) => {
                log::warn!("Failed to load {}: {}", asset, e);
                None
            }
        }
    }

    pub fn asset_exists(&self, asset: &AssetRef) -> bool {
        self.resolve(asset).is_some()
    }
}
