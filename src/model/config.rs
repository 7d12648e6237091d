//! Configuration maps keyed by configuration type.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Property name to value.
pub type Properties = BTreeMap<String, String>;

/// Attribute name to (property name to attribute value), e.g. `final -> {dfs.name.dir: "true"}`.
pub type PropertyAttributes = BTreeMap<String, BTreeMap<String, String>>;

/// Per configuration type, the tag layers a host must resolve at dispatch time.
///
/// The `tag` key holds the cluster-wide desired tag; additional keys are
/// override layers (config group id to override tag).
pub type ConfigTags = BTreeMap<String, BTreeMap<String, String>>;

/// Key under which the cluster-wide desired tag is stored in [`ConfigTags`].
pub const TAG_KEY: &str = "tag";

/// `configType -> (property -> value)` plus a parallel attributes map.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigurationMap {
    #[serde(default)]
    pub properties: BTreeMap<String, Properties>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub attributes: BTreeMap<String, PropertyAttributes>,
}

impl ConfigurationMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn contains_type(&self, config_type: &str) -> bool {
        self.properties.contains_key(config_type)
    }

    pub fn get(&self, config_type: &str) -> Option<&Properties> {
        self.properties.get(config_type)
    }

    /// Value of one property, if both the type and the property exist.
    pub fn property(&self, config_type: &str, name: &str) -> Option<&str> {
        self.properties
            .get(config_type)
            .and_then(|props| props.get(name))
            .map(String::as_str)
    }

    pub fn types(&self) -> impl Iterator<Item = &String> {
        self.properties.keys()
    }

    /// Replace the properties of a type, keeping its attributes.
    pub fn insert_type(&mut self, config_type: impl Into<String>, properties: Properties) {
        self.properties.insert(config_type.into(), properties);
    }

    pub fn insert_attributes(&mut self, config_type: impl Into<String>, attrs: PropertyAttributes) {
        if !attrs.is_empty() {
            self.attributes.insert(config_type.into(), attrs);
        }
    }

    /// Drop a type together with its attributes.
    pub fn remove_type(&mut self, config_type: &str) -> Option<Properties> {
        self.attributes.remove(config_type);
        self.properties.remove(config_type)
    }

    pub fn set_property(
        &mut self,
        config_type: impl Into<String>,
        name: impl Into<String>,
        value: impl Into<String>,
    ) {
        self.properties
            .entry(config_type.into())
            .or_default()
            .insert(name.into(), value.into());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_property_lookup() {
        let mut map = ConfigurationMap::new();
        map.set_property("hdfs-site", "dfs.replication", "3");
        assert_eq!(map.property("hdfs-site", "dfs.replication"), Some("3"));
        assert_eq!(map.property("hdfs-site", "missing"), None);
        assert_eq!(map.property("core-site", "dfs.replication"), None);
    }

    #[test]
    fn test_remove_type_drops_attributes() {
        let mut map = ConfigurationMap::new();
        map.set_property("hdfs-site", "dfs.name.dir", "/data");
        let mut attrs = PropertyAttributes::new();
        attrs
            .entry("final".to_string())
            .or_default()
            .insert("dfs.name.dir".to_string(), "true".to_string());
        map.insert_attributes("hdfs-site", attrs);

        assert!(map.remove_type("hdfs-site").is_some());
        assert!(map.is_empty());
        assert!(map.attributes.is_empty());
    }

    #[test]
    fn test_empty_attributes_not_inserted() {
        let mut map = ConfigurationMap::new();
        map.insert_attributes("core-site", PropertyAttributes::new());
        assert!(map.attributes.is_empty());
    }
}
