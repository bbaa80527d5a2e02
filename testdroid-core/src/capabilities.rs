//! Capability-to-label mapping
//!
//! Devices are tagged with labels grouped by attribute. A capability filter
//! such as `{type: "flame", memory: "512"}` is translated into label lookups
//! whose ids are ANDed into one device query.

use std::collections::BTreeMap;

/// Label group holding device type labels.
pub const DEVICE_TYPE_GROUP: &str = "Device Type";
/// Label group holding flashed build labels.
pub const BUILD_GROUP: &str = "Build Identifier";
/// Label group holding memory configuration labels.
pub const MEMORY_GROUP: &str = "Memory";
/// Label group holding SIM count labels.
pub const SIMS_GROUP: &str = "SIMs";

/// Recognized capability keys and the label group each one is looked up in.
pub const CAPABILITY_GROUPS: &[(&str, &str)] = &[
    ("type", DEVICE_TYPE_GROUP),
    ("build", BUILD_GROUP),
    ("memory", MEMORY_GROUP),
    ("sims", SIMS_GROUP),
];

/// Capability name → requested value.
pub type Capabilities = BTreeMap<String, String>;

/// One label to resolve: a value inside a named group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelLookup {
    pub group: &'static str,
    pub value: String,
}

impl LabelLookup {
    fn new(group: &'static str, value: impl Into<String>) -> Self {
        Self {
            group,
            value: value.into(),
        }
    }
}

/// Label group for a capability key, if the key is recognized.
pub fn group_for(capability: &str) -> Option<&'static str> {
    CAPABILITY_GROUPS
        .iter()
        .find(|(key, _)| *key == capability)
        .map(|(_, group)| *group)
}

/// Translate capabilities into the label lookups that must all match.
///
/// Returns `None` when any key is unrecognized, so the caller can fail
/// closed instead of issuing a partial filter. When both `memory` and
/// `build` are given they are folded into the single build label
/// `"<memory>_<build>"`, because flashed builds are labelled per memory
/// configuration.
pub fn label_lookups(capabilities: &Capabilities) -> Option<Vec<LabelLookup>> {
    if capabilities.keys().any(|key| group_for(key).is_none()) {
        return None;
    }

    let composite = match (capabilities.get("memory"), capabilities.get("build")) {
        (Some(memory), Some(build)) => Some(format!("{}_{}", memory, build)),
        _ => None,
    };

    let mut lookups = Vec::new();
    for (key, group) in CAPABILITY_GROUPS {
        let Some(value) = capabilities.get(*key) else {
            continue;
        };
        match (*key, &composite) {
            ("memory", Some(_)) => {}
            ("build", Some(folded)) => lookups.push(LabelLookup::new(group, folded.clone())),
            _ => lookups.push(LabelLookup::new(group, value.clone())),
        }
    }

    Some(lookups)
}
