//! Resource rules: per-type descriptors of attributes, children and agent.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RestreeError, RestreeResult};

/// Deepest start/stop level a child type may declare.
pub const RESOURCE_MAX_LEVELS: u32 = 100;

/// Flags on a rule attribute.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttrFlags {
    #[serde(default)]
    pub primary: bool,
    #[serde(default)]
    pub unique: bool,
    #[serde(default)]
    pub required: bool,
    /// A change to this attribute can be applied with a reconfigure
    /// instead of a restart.
    #[serde(default)]
    pub reconfig: bool,
}

/// An attribute a resource of this type may carry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleAttr {
    pub name: String,
    #[serde(flatten)]
    pub flags: AttrFlags,
    /// Value used when a resource does not set the attribute.
    #[serde(default)]
    pub default: Option<String>,
    /// Inheritance spec (`attr` or `parenttype%attr`) used when a resource
    /// does not set the attribute.
    #[serde(default)]
    pub inherit: Option<String>,
}

impl RuleAttr {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            flags: AttrFlags::default(),
            default: None,
            inherit: None,
        }
    }

    pub fn primary(mut self) -> Self {
        self.flags.primary = true;
        self.flags.unique = true;
        self.flags.required = true;
        self
    }

    pub fn required(mut self) -> Self {
        self.flags.required = true;
        self
    }

    pub fn unique(mut self) -> Self {
        self.flags.unique = true;
        self
    }

    pub fn inherit(mut self, spec: impl Into<String>) -> Self {
        self.inherit = Some(spec.into());
        self
    }

    pub fn default_value(mut self, value: impl Into<String>) -> Self {
        self.default = Some(value.into());
        self
    }
}

/// A child type a rule permits beneath its resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildType {
    pub name: String,
    #[serde(default)]
    pub start_level: Option<u32>,
    #[serde(default)]
    pub stop_level: Option<u32>,
    #[serde(default)]
    pub forbid: bool,
}

impl ChildType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            start_level: None,
            stop_level: None,
            forbid: false,
        }
    }

    pub fn levels(mut self, start: u32, stop: u32) -> Self {
        self.start_level = Some(start).filter(|l| (1..=RESOURCE_MAX_LEVELS).contains(l));
        self.stop_level = Some(stop).filter(|l| (1..=RESOURCE_MAX_LEVELS).contains(l));
        self
    }

    pub fn forbidden(mut self) -> Self {
        self.forbid = true;
        self
    }
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Descriptor for one resource type (e.g. `ip`, `fs`, `script`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceRule {
    #[serde(rename = "type")]
    pub rtype: String,
    /// Agent path; relative paths resolve under the resource root.
    #[serde(default)]
    pub agent: Option<String>,
    /// Interpreter used to run the agent.
    #[serde(default)]
    pub handler: Option<String>,
    #[serde(default = "default_version")]
    pub version: String,
    #[serde(default)]
    pub attrs: Vec<RuleAttr>,
    #[serde(default)]
    pub children: Vec<ChildType>,
    /// Maximum tree references to one resource of this type; 0 is unlimited.
    #[serde(default)]
    pub max_refs: u32,
    /// Whether resources of this type may sit at the top of the tree.
    #[serde(default)]
    pub root: bool,
}

impl ResourceRule {
    pub fn new(rtype: impl Into<String>) -> Self {
        Self {
            rtype: rtype.into(),
            agent: None,
            handler: None,
            version: default_version(),
            attrs: Vec::new(),
            children: Vec::new(),
            max_refs: 0,
            root: false,
        }
    }

    pub fn with_agent(mut self, agent: impl Into<String>) -> Self {
        self.agent = Some(agent.into());
        self
    }

    pub fn with_attr(mut self, attr: RuleAttr) -> Self {
        self.attrs.push(attr);
        self
    }

    pub fn with_child(mut self, child: ChildType) -> Self {
        self.children.push(child);
        self
    }

    pub fn as_root(mut self) -> Self {
        self.root = true;
        self
    }

    pub fn primary_attr(&self) -> Option<&RuleAttr> {
        self.attrs.iter().find(|a| a.flags.primary)
    }

    pub fn attr(&self, name: &str) -> Option<&RuleAttr> {
        self.attrs.iter().find(|a| a.name == name)
    }

    pub fn child_type(&self, name: &str) -> Option<&ChildType> {
        self.children
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// (major, minor) of the agent API version.
    pub fn version_parts(&self) -> (String, String) {
        match self.version.split_once('.') {
            Some((major, minor)) => (major.to_string(), minor.to_string()),
            None => (self.version.clone(), "0".to_string()),
        }
    }
}

/// Registry of all known resource rules.
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    rules: Vec<Arc<ResourceRule>>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load rules, skipping duplicates and rules without a primary attribute.
    pub fn build(rules: impl IntoIterator<Item = ResourceRule>) -> Self {
        let mut registry = Self::new();
        for rule in rules {
            if let Err(e) = registry.register(rule) {
                warn!(error = %e, "Skipping resource rule");
            }
        }
        registry
    }

    pub fn register(&mut self, rule: ResourceRule) -> RestreeResult<Arc<ResourceRule>> {
        if self.find(&rule.rtype).is_some() {
            return Err(RestreeError::DuplicateRule(rule.rtype));
        }
        if rule.primary_attr().is_none() {
            return Err(RestreeError::NoPrimaryAttribute(rule.rtype));
        }
        debug!(rtype = %rule.rtype, attrs = rule.attrs.len(), "Resource rule loaded");
        let rule = Arc::new(rule);
        self.rules.push(rule.clone());
        Ok(rule)
    }

    /// Case-insensitive lookup by type name.
    pub fn find(&self, rtype: &str) -> Option<&Arc<ResourceRule>> {
        self.rules
            .iter()
            .find(|r| r.rtype.eq_ignore_ascii_case(rtype))
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<ResourceRule>> {
        self.rules.iter()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fs_rule() -> ResourceRule {
        ResourceRule::new("fs")
            .with_agent("fs.sh")
            .with_attr(RuleAttr::new("mountpoint").primary())
            .with_attr(RuleAttr::new("device").required().unique())
    }

    #[test]
    fn test_register_and_find() {
        let mut reg = RuleRegistry::new();
        reg.register(fs_rule()).unwrap();
        assert!(reg.find("FS").is_some());
        assert!(matches!(
            reg.register(fs_rule()),
            Err(RestreeError::DuplicateRule(_))
        ));
    }

    #[test]
    fn test_rule_without_primary_rejected() {
        let mut reg = RuleRegistry::new();
        let err = reg
            .register(ResourceRule::new("bogus").with_attr(RuleAttr::new("x")))
            .unwrap_err();
        assert!(matches!(err, RestreeError::NoPrimaryAttribute(_)));
    }

    #[test]
    fn test_child_levels_are_bounded() {
        let c = ChildType::new("ip").levels(1, 101);
        assert_eq!(c.start_level, Some(1));
        assert_eq!(c.stop_level, None);
    }

    #[test]
    fn test_version_parts() {
        let mut rule = fs_rule();
        assert_eq!(rule.version_parts(), ("1".into(), "0".into()));
        rule.version = "2".into();
        assert_eq!(rule.version_parts(), ("2".into(), "0".into()));
    }

    #[test]
    fn test_rule_from_json() {
        let rule: ResourceRule = serde_json::from_str(
            r#"{
                "type": "service",
                "root": true,
                "attrs": [{"name": "name", "primary": true}],
                "children": [{"name": "fs", "start_level": 1, "stop_level": 3}]
            }"#,
        )
        .unwrap();
        assert!(rule.root);
        assert_eq!(rule.primary_attr().unwrap().name, "name");
        assert_eq!(rule.child_type("FS").unwrap().stop_level, Some(3));
    }
}
