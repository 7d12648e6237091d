//! `{{config-type/property}}` placeholder substitution.

use anyhow::{Context as _, Result};
use regex::{Captures, Regex};
use tracing::{debug, error};

use crate::model::ConfigurationMap;

/// Replaces `{{type/property}}` with the desired configuration value.
///
/// Placeholders that do not resolve are logged and left in place.
#[derive(Debug, Clone)]
pub struct PlaceholderResolver {
    pattern: Regex,
}

impl PlaceholderResolver {
    pub fn new() -> Result<Self> {
        Ok(Self {
            pattern: Regex::new(r"\{\{.*?\}\}").context("Invalid placeholder pattern")?,
        })
    }

    pub fn resolve(&self, source: &str, desired: &ConfigurationMap) -> String {
        self.pattern
            .replace_all(source, |caps: &Captures<'_>| {
                let token = &caps[0];
                let key = &token[2..token.len() - 2];
                match lookup(key, desired) {
                    Some(value) => {
                        debug!("Resolved {token}");
                        value.to_string()
                    }
                    None => {
                        error!("Unable to retrieve value for {token}");
                        token.to_string()
                    }
                }
            })
            .into_owned()
    }
}

fn lookup<'a>(key: &str, desired: &'a ConfigurationMap) -> Option<&'a str> {
    let (config_type, property) = key.split_once('/')?;
    desired.property(config_type, property)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn desired() -> ConfigurationMap {
        let mut configs = ConfigurationMap::new();
        configs.set_property("hdfs-site", "dfs.namenode.http-address", "h1:50070");
        configs.set_property("core-site", "fs.defaultFS", "hdfs://h1:8020");
        configs
    }

    #[test]
    fn test_resolve_known_placeholders() {
        let resolver = PlaceholderResolver::new().unwrap();
        let out = resolver.resolve(
            r#"{"url":"{{hdfs-site/dfs.namenode.http-address}}","fs":"{{core-site/fs.defaultFS}}"}"#,
            &desired(),
        );
        assert_eq!(out, r#"{"url":"h1:50070","fs":"hdfs://h1:8020"}"#);
    }

    #[test]
    fn test_unresolved_placeholder_stays_verbatim() {
        let resolver = PlaceholderResolver::new().unwrap();
        let source = "run {{yarn-site/missing}} then {{no-slash}} and {{core-site/fs.defaultFS}}";
        let out = resolver.resolve(source, &desired());
        assert_eq!(out, "run {{yarn-site/missing}} then {{no-slash}} and hdfs://h1:8020");
    }

    #[test]
    fn test_no_placeholders() {
        let resolver = PlaceholderResolver::new().unwrap();
        assert_eq!(resolver.resolve("plain text", &desired()), "plain text");
    }
}
