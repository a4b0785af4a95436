//! Named integer sets, referenced from parser transitions.

use crate::config::ValueSetDescriptor;
use crate::{Error, Result};
use std::collections::{HashMap, HashSet};

/// A registry of named value sets.
#[derive(Debug, Clone, Default)]
pub struct ValueSets(HashMap<String, HashSet<i64>>);

impl ValueSets {
    /// Build a registry from a list of descriptors.
    pub fn new(descriptors: &[ValueSetDescriptor]) -> Self {
        let mut map = HashMap::new();
        for d in descriptors {
            map.insert(d.name.clone(), d.values.iter().copied().collect());
        }
        Self(map)
    }

    /// Whether `value` is a member of the named set. Errors if the set name
    /// is unknown, since that is a configuration mistake, not a runtime miss.
    pub fn contains(&self, name: &str, value: i64) -> Result<bool> {
        self.0
            .get(name)
            .map(|s| s.contains(&value))
            .ok_or_else(|| Error::Configuration(format!("unknown value set {name:?}")))
    }

    /// Whether a value set with this name was registered.
    pub fn known(&self, name: &str) -> bool {
        self.0.contains_key(name)
    }
}
