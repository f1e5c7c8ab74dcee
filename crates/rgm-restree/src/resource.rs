//! Resource instances and the flat resource list that owns them.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{RestreeError, RestreeResult};
use crate::rules::{ResourceRule, RuleRegistry};

/// Index of a resource in its [`ResourceList`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub usize);

/// Resource flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceFlags {
    /// Declared inside the tree rather than in the resources section.
    pub inline: bool,
    /// Declared in the resources section.
    pub defined: bool,
    pub needstart: bool,
    pub needstop: bool,
    pub common: bool,
    pub independent: bool,
    pub reconfig: bool,
}

impl fmt::Display for ResourceFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = [
            (self.inline, "INLINE"),
            (self.defined, "DEFINED"),
            (self.needstart, "NEEDSTART"),
            (self.needstop, "NEEDSTOP"),
            (self.common, "COMMON"),
            (self.independent, "INDEPENDENT"),
            (self.reconfig, "RECONFIG"),
        ];
        let set: Vec<&str> = names.iter().filter(|(on, _)| *on).map(|(_, n)| *n).collect();
        write!(f, "{}", set.join(" | "))
    }
}

/// One bound attribute of a resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceAttr {
    pub name: String,
    /// Literal value, or the inheritance spec when `inherit` is set.
    pub value: String,
    #[serde(default)]
    pub inherit: bool,
}

/// Raw resource definition as it appears in configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceConfig {
    #[serde(rename = "type")]
    pub rtype: String,
    #[serde(flatten)]
    pub attrs: BTreeMap<String, String>,
}

impl ResourceConfig {
    pub fn new(rtype: impl Into<String>) -> Self {
        Self {
            rtype: rtype.into(),
            attrs: BTreeMap::new(),
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }
}

/// An instantiated resource: a rule plus bound attribute values.
#[derive(Debug, Clone)]
pub struct Resource {
    pub rule: Arc<ResourceRule>,
    pub attrs: Vec<ResourceAttr>,
    /// Number of tree nodes referencing this resource.
    pub refs: u32,
    /// Number of live starts.
    pub incarnations: u32,
    pub flags: ResourceFlags,
}

impl Resource {
    /// Bind raw attribute values against a rule.
    ///
    /// Attributes are kept in the rule's declaration order. Unset
    /// attributes take the rule default, or the rule's inheritance spec.
    pub fn load(rule: Arc<ResourceRule>, raw: &BTreeMap<String, String>) -> RestreeResult<Self> {
        for name in raw.keys() {
            if rule.attr(name).is_none() && !name.starts_with("__") {
                warn!(rtype = %rule.rtype, attr = %name, "Ignoring unknown attribute");
            }
        }

        let mut attrs = Vec::with_capacity(rule.attrs.len());
        for def in &rule.attrs {
            if let Some(value) = raw.get(&def.name) {
                attrs.push(ResourceAttr {
                    name: def.name.clone(),
                    value: value.clone(),
                    inherit: false,
                });
            } else if let Some(spec) = &def.inherit {
                attrs.push(ResourceAttr {
                    name: def.name.clone(),
                    value: spec.clone(),
                    inherit: true,
                });
            } else if let Some(default) = &def.default {
                attrs.push(ResourceAttr {
                    name: def.name.clone(),
                    value: default.clone(),
                    inherit: false,
                });
            }
        }

        let resource = Self {
            rule,
            attrs,
            refs: 0,
            incarnations: 0,
            flags: ResourceFlags::default(),
        };

        let primary = resource
            .rule
            .primary_attr()
            .ok_or_else(|| RestreeError::NoPrimaryAttribute(resource.rule.rtype.clone()))?;
        if resource.literal(&primary.name).is_none() {
            return Err(RestreeError::MissingPrimary {
                rtype: resource.rule.rtype.clone(),
                attr: primary.name.clone(),
            });
        }
        for def in resource.rule.attrs.iter().filter(|a| a.flags.required) {
            if resource.attr(&def.name).is_none() {
                return Err(RestreeError::MissingRequired {
                    resource: resource.name(),
                    attr: def.name.clone(),
                });
            }
        }
        Ok(resource)
    }

    pub fn rtype(&self) -> &str {
        &self.rule.rtype
    }

    pub fn attr(&self, name: &str) -> Option<&ResourceAttr> {
        self.attrs.iter().find(|a| a.name == name)
    }

    /// Value of a locally set, non-inherited attribute.
    pub fn literal(&self, name: &str) -> Option<&str> {
        self.attr(name)
            .filter(|a| !a.inherit)
            .map(|a| a.value.as_str())
    }

    /// Value of the primary attribute.
    pub fn primary(&self) -> &str {
        self.rule
            .primary_attr()
            .and_then(|p| self.literal(&p.name))
            .unwrap_or_default()
    }

    /// Instance name, `type:primary`.
    pub fn name(&self) -> String {
        format!("{}:{}", self.rule.rtype, self.primary())
    }

    /// Whether two resources bind the same attribute values.
    pub fn same_attrs(&self, other: &Resource) -> bool {
        self.rule.rtype == other.rule.rtype && self.attrs == other.attrs
    }
}

/// Flat owner of every resource. Tree nodes refer into it by index.
#[derive(Debug, Clone, Default)]
pub struct ResourceList {
    resources: Vec<Resource>,
}

impl ResourceList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the resources section, skipping invalid definitions.
    pub fn build(rules: &RuleRegistry, configs: &[ResourceConfig]) -> Self {
        let mut list = Self::new();
        for config in configs {
            let loaded = rules
                .find(&config.rtype)
                .ok_or_else(|| RestreeError::UnknownRule(config.rtype.clone()))
                .and_then(|rule| Resource::load(rule.clone(), &config.attrs))
                .and_then(|mut resource| {
                    resource.flags.defined = true;
                    list.add(resource)
                });
            if let Err(e) = loaded {
                warn!(rtype = %config.rtype, error = %e, "Skipping resource definition");
            }
        }
        list
    }

    /// Add a resource, enforcing identity and UNIQUE attribute constraints.
    pub fn add(&mut self, resource: Resource) -> RestreeResult<ResourceId> {
        let name = resource.name();
        if self.find_by_name(&name).is_some() {
            return Err(RestreeError::DuplicateResource(name));
        }
        for def in resource.rule.attrs.iter().filter(|a| a.flags.unique) {
            let Some(value) = resource.literal(&def.name) else {
                continue;
            };
            let clash = self.resources.iter().any(|r| {
                r.rule.rtype.eq_ignore_ascii_case(&resource.rule.rtype)
                    && r.literal(&def.name) == Some(value)
            });
            if clash {
                return Err(RestreeError::UniqueViolation {
                    resource: name,
                    attr: def.name.clone(),
                    value: value.to_string(),
                });
            }
        }
        self.resources.push(resource);
        Ok(ResourceId(self.resources.len() - 1))
    }

    /// Find by type and primary attribute value, as used by `ref=`.
    pub fn find_by_ref(&self, rtype: &str, primary: &str) -> Option<ResourceId> {
        self.resources
            .iter()
            .position(|r| r.rule.rtype.eq_ignore_ascii_case(rtype) && r.primary() == primary)
            .map(ResourceId)
    }

    /// Find by `type:primary` instance name.
    pub fn find_by_name(&self, name: &str) -> Option<ResourceId> {
        let (rtype, primary) = name.split_once(':')?;
        self.find_by_ref(rtype, primary)
    }

    pub fn get(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(id.0)
    }

    pub fn get_mut(&mut self, id: ResourceId) -> Option<&mut Resource> {
        self.resources.get_mut(id.0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceId, &Resource)> {
        self.resources
            .iter()
            .enumerate()
            .map(|(i, r)| (ResourceId(i), r))
    }

    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }
}
