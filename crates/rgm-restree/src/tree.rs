//! Arena-backed resource tree.
//!
//! Nodes live in a flat vector and link to each other by [`TreeNodeId`].
//! Each node wraps one resource from the tree's [`ResourceList`]; a shared
//! resource may back several nodes up to its rule's `max_refs`.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{RestreeError, RestreeResult};
use crate::resource::{Resource, ResourceId, ResourceList};
use crate::rules::RuleRegistry;

/// Index of a node in its [`ResourceTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreeNodeId(pub usize);

/// Execution state of a tree node.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeState {
    #[default]
    Stopped,
    Started,
    Failed,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeFlags {
    pub needstart: bool,
    pub needstop: bool,
    pub independent: bool,
}

#[derive(Debug, Clone)]
pub struct TreeNode {
    pub resource: ResourceId,
    pub parent: Option<TreeNodeId>,
    pub children: Vec<TreeNodeId>,
    pub state: NodeState,
    pub flags: NodeFlags,
}

/// One configured tree instance: inline attributes or a `ref` to a
/// resource from the resources section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeEntry {
    #[serde(rename = "type")]
    pub rtype: String,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(rename = "__independent_subtree", default)]
    pub independent: bool,
    #[serde(default)]
    pub children: Vec<TreeEntry>,
    #[serde(flatten)]
    pub attrs: BTreeMap<String, String>,
}

impl TreeEntry {
    pub fn inline(rtype: impl Into<String>) -> Self {
        Self {
            rtype: rtype.into(),
            ..Default::default()
        }
    }

    pub fn reference(rtype: impl Into<String>, reference: impl Into<String>) -> Self {
        Self {
            rtype: rtype.into(),
            reference: Some(reference.into()),
            ..Default::default()
        }
    }

    pub fn attr(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.attrs.insert(name.into(), value.into());
        self
    }

    pub fn child(mut self, child: TreeEntry) -> Self {
        self.children.push(child);
        self
    }

    pub fn independent(mut self) -> Self {
        self.independent = true;
        self
    }
}

#[derive(Debug, Clone, Default)]
pub struct ResourceTree {
    resources: ResourceList,
    nodes: Vec<TreeNode>,
    roots: Vec<TreeNodeId>,
}

impl ResourceTree {
    /// Build the tree from configured entries.
    ///
    /// Root-eligible rules are visited in registry order and each claims the
    /// top-level entries of its type. Entries that fail to load are logged
    /// and skipped together with their subtree.
    pub fn build(rules: &RuleRegistry, resources: ResourceList, entries: &[TreeEntry]) -> Self {
        let mut tree = Self {
            resources,
            nodes: Vec::new(),
            roots: Vec::new(),
        };

        for rule in rules.iter().filter(|r| r.root) {
            for entry in entries
                .iter()
                .filter(|e| e.rtype.eq_ignore_ascii_case(&rule.rtype))
            {
                match tree.load_node(rules, entry, None) {
                    Ok(id) => tree.roots.push(id),
                    Err(e) => warn!(rtype = %entry.rtype, error = %e, "Skipping top-level resource"),
                }
            }
        }
        for entry in entries {
            let root_type = rules
                .find(&entry.rtype)
                .map(|r| r.root)
                .unwrap_or(false);
            if !root_type {
                warn!(rtype = %entry.rtype, "Resource type may not be a top-level resource");
            }
        }
        tree
    }

    fn load_node(
        &mut self,
        rules: &RuleRegistry,
        entry: &TreeEntry,
        parent: Option<TreeNodeId>,
    ) -> RestreeResult<TreeNodeId> {
        let rule = rules
            .find(&entry.rtype)
            .ok_or_else(|| RestreeError::UnknownRule(entry.rtype.clone()))?
            .clone();

        let rid = match &entry.reference {
            Some(reference) => {
                let rid = self
                    .resources
                    .find_by_ref(&rule.rtype, reference)
                    .ok_or_else(|| RestreeError::UndefinedReference {
                        rtype: rule.rtype.clone(),
                        reference: reference.clone(),
                    })?;
                if self.resource(rid).map(|r| r.flags.inline).unwrap_or(false) {
                    return Err(RestreeError::InlineReference {
                        rtype: rule.rtype.clone(),
                        reference: reference.clone(),
                    });
                }
                rid
            }
            None => {
                let mut resource = Resource::load(rule.clone(), &entry.attrs)?;
                resource.flags.inline = true;
                self.resources.add(resource)?
            }
        };

        let resource = self
            .resources
            .get_mut(rid)
            .ok_or_else(|| RestreeError::NotFound(format!("Resource index {}", rid.0)))?;
        if rule.max_refs > 0 && resource.refs >= rule.max_refs {
            return Err(RestreeError::MaxRefsExceeded(resource.name()));
        }
        resource.refs += 1;
        if entry.independent {
            resource.flags.independent = true;
        }

        let id = TreeNodeId(self.nodes.len());
        self.nodes.push(TreeNode {
            resource: rid,
            parent,
            children: Vec::new(),
            state: NodeState::Stopped,
            flags: NodeFlags {
                independent: entry.independent,
                ..Default::default()
            },
        });
        debug!(resource = %resource.name(), node = id.0, "Resource tree node loaded");

        for child_type in rule.children.iter().filter(|c| !c.forbid) {
            for child in entry
                .children
                .iter()
                .filter(|c| c.rtype.eq_ignore_ascii_case(&child_type.name))
            {
                match self.load_node(rules, child, Some(id)) {
                    Ok(child_id) => self.nodes[id.0].children.push(child_id),
                    Err(e) => warn!(parent = %rule.rtype, rtype = %child.rtype, error = %e, "Skipping child resource"),
                }
            }
        }
        for child in &entry.children {
            let permitted = rule
                .child_type(&child.rtype)
                .map(|c| !c.forbid)
                .unwrap_or(false);
            if !permitted {
                let e = RestreeError::IllegalChild {
                    parent: rule.rtype.clone(),
                    child: child.rtype.clone(),
                };
                warn!(error = %e, "Skipping child resource");
            }
        }

        Ok(id)
    }

    pub fn roots(&self) -> &[TreeNodeId] {
        &self.roots
    }

    pub fn node(&self, id: TreeNodeId) -> Option<&TreeNode> {
        self.nodes.get(id.0)
    }

    pub fn node_mut(&mut self, id: TreeNodeId) -> Option<&mut TreeNode> {
        self.nodes.get_mut(id.0)
    }

    pub fn nodes(&self) -> impl Iterator<Item = (TreeNodeId, &TreeNode)> {
        self.nodes.iter().enumerate().map(|(i, n)| (TreeNodeId(i), n))
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn resources(&self) -> &ResourceList {
        &self.resources
    }

    pub fn resource(&self, id: ResourceId) -> Option<&Resource> {
        self.resources.get(id)
    }

    pub fn resource_mut(&mut self, id: ResourceId) -> Option<&mut Resource> {
        self.resources.get_mut(id)
    }

    /// Resource wrapped by a node.
    pub fn node_resource(&self, id: TreeNodeId) -> Option<&Resource> {
        self.node(id).and_then(|n| self.resource(n.resource))
    }

    /// Top-level node whose resource is named `type:primary`.
    pub fn find_root(&self, name: &str) -> Option<TreeNodeId> {
        self.roots
            .iter()
            .copied()
            .find(|&id| self.node_resource(id).map(|r| r.name() == name).unwrap_or(false))
    }

    /// First node, in arena order, whose resource is named `type:primary`.
    pub fn find_node(&self, name: &str) -> Option<TreeNodeId> {
        self.nodes().find_map(|(id, _)| {
            self.node_resource(id)
                .filter(|r| r.name() == name)
                .map(|_| id)
        })
    }

    /// Preorder list of the subtree rooted at `id`, `id` included.
    pub fn subtree(&self, id: TreeNodeId) -> Vec<TreeNodeId> {
        let mut out = Vec::new();
        let mut stack = vec![id];
        while let Some(cur) = stack.pop() {
            out.push(cur);
            if let Some(node) = self.node(cur) {
                stack.extend(node.children.iter().rev().copied());
            }
        }
        out
    }

    /// Resolve an attribute, following inheritance up the tree.
    pub fn attr_value(&self, id: TreeNodeId, name: &str) -> Option<String> {
        let node = self.node(id)?;
        let attr = self.resource(node.resource)?.attr(name)?;
        if !attr.inherit {
            return Some(attr.value.clone());
        }

        let parent = node.parent?;
        match attr.value.split_once('%') {
            Some((ptype, field)) => {
                let mut cur = Some(parent);
                while let Some(p) = cur {
                    if self
                        .node_resource(p)
                        .map(|r| r.rtype().eq_ignore_ascii_case(ptype))
                        .unwrap_or(false)
                    {
                        return self.attr_value(p, field);
                    }
                    cur = self.node(p).and_then(|n| n.parent);
                }
                None
            }
            None => self.attr_value(parent, &attr.value),
        }
    }

    /// Resolve an attribute on the top-level ancestor of `id`.
    pub fn rg_attr_value(&self, id: TreeNodeId, name: &str) -> Option<String> {
        let mut root = id;
        while let Some(parent) = self.node(root).and_then(|n| n.parent) {
            root = parent;
        }
        self.attr_value(root, name)
    }

    /// Every attribute of the node's resource, resolved, in rule order.
    pub fn resolved_attrs(&self, id: TreeNodeId) -> Vec<(String, String)> {
        let Some(resource) = self.node_resource(id) else {
            return Vec::new();
        };
        resource
            .attrs
            .iter()
            .filter_map(|a| self.attr_value(id, &a.name).map(|v| (a.name.clone(), v)))
            .collect()
    }

    /// Flag nodes whose resources differ between two trees.
    ///
    /// Nodes in `old` with no identical counterpart in `new` get NEEDSTOP;
    /// nodes in `new` with no identical counterpart in `old` get NEEDSTART.
    pub fn mark_changes(old: &mut ResourceTree, new: &mut ResourceTree) {
        fn differs(a: &ResourceTree, a_id: TreeNodeId, b: &ResourceTree) -> bool {
            let Some(res) = a.node_resource(a_id) else {
                return true;
            };
            let Some(other) = b.find_node(&res.name()) else {
                return true;
            };
            b.node_resource(other)
                .map(|o| !o.same_attrs(res))
                .unwrap_or(true)
        }

        let stop: Vec<TreeNodeId> = old.nodes().map(|(id, _)| id).filter(|&id| differs(old, id, new)).collect();
        let start: Vec<TreeNodeId> = new.nodes().map(|(id, _)| id).filter(|&id| differs(new, id, old)).collect();

        for id in stop {
            if let Some(node) = old.node_mut(id) {
                node.flags.needstop = true;
            }
        }
        for id in start {
            if let Some(node) = new.node_mut(id) {
                node.flags.needstart = true;
            }
        }
    }

    /// Render the tree as indented text.
    pub fn print_resource_tree(&self) -> String {
        let mut out = String::new();
        for &root in &self.roots {
            self.print_node(&mut out, root, 0);
        }
        out
    }

    fn print_node(&self, out: &mut String, id: TreeNodeId, depth: usize) {
        let (Some(node), Some(resource)) = (self.node(id), self.node_resource(id)) else {
            return;
        };
        let pad = "  ".repeat(depth);
        let mut flags = Vec::new();
        if node.flags.needstart {
            flags.push("NEEDSTART");
        }
        if node.flags.needstop {
            flags.push("NEEDSTOP");
        }
        if node.flags.independent {
            flags.push("INDEPENDENT");
        }
        let _ = write!(out, "{}{}", pad, resource.rtype());
        if !flags.is_empty() {
            let _ = write!(out, " [ {} ]", flags.join(" "));
        }
        let _ = writeln!(out, " {{");
        for attr in &resource.attrs {
            let value = self.attr_value(id, &attr.name).unwrap_or_default();
            if attr.inherit {
                let _ = writeln!(
                    out,
                    "{}  {} = \"{}\" [ INHERIT(\"{}\") ];",
                    pad, attr.name, value, attr.value
                );
            } else {
                let _ = writeln!(out, "{}  {} = \"{}\";", pad, attr.name, value);
            }
        }
        for &child in &node.children {
            self.print_node(out, child, depth + 1);
        }
        let _ = writeln!(out, "{}}}", pad);
    }
}
