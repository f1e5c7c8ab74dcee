//! Dependency blocks and the validated dependency graph.
//!
//! A block is named after a resource (`type:primary`) and lists targets it
//! requires and/or must (or must never) share a node with. Targets that
//! have no block of their own get an implied, empty one.

use std::collections::HashSet;
use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::state::{EdgeFault, ResourceState};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Require {
    #[default]
    Unspec,
    /// Target must be running before this resource starts.
    Start,
    /// Target must be running for as long as this resource runs.
    Always,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Colocate {
    #[default]
    Unspec,
    Always,
    Never,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    #[serde(default)]
    pub require: Require,
    #[serde(default)]
    pub colocate: Colocate,
}

impl TargetConfig {
    pub fn new(name: impl Into<String>, require: Require, colocate: Colocate) -> Self {
        Self {
            name: name.into(),
            require,
            colocate,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyConfig {
    pub name: String,
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

impl DependencyConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            targets: Vec::new(),
        }
    }

    pub fn requires(mut self, target: impl Into<String>) -> Self {
        self.targets
            .push(TargetConfig::new(target, Require::Always, Colocate::Unspec));
        self
    }

    pub fn target(mut self, target: TargetConfig) -> Self {
        self.targets.push(target);
        self
    }
}

/// Edge from a block to one of its targets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepTarget {
    pub name: String,
    pub require: Require,
    pub colocate: Colocate,
    /// Index of the target's block.
    pub block: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepBlock {
    pub name: String,
    pub targets: Vec<DepTarget>,
    /// Number of edges pointing at this block.
    pub hits: u32,
    /// Number of targets.
    pub deps: u32,
    /// Created for a target that has no block of its own.
    pub implied: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DependencyGraph {
    blocks: Vec<DepBlock>,
}

impl DependencyGraph {
    /// Build and validate the graph.
    ///
    /// Bad entries are logged and skipped. Blocks on a requirement cycle
    /// and blocks with contradictory colocation rules are removed.
    pub fn build(configs: &[DependencyConfig]) -> Self {
        let mut blocks: Vec<DepBlock> = Vec::new();

        for config in configs {
            if blocks.iter().any(|b| b.name.eq_ignore_ascii_case(&config.name)) {
                warn!(block = %config.name, "Dependency block defined multiple times");
                continue;
            }
            let mut targets: Vec<DepTarget> = Vec::new();
            for t in &config.targets {
                if targets.iter().any(|x| x.name.eq_ignore_ascii_case(&t.name)) {
                    warn!(block = %config.name, target = %t.name, "Target defined multiple times in dependency block");
                    continue;
                }
                if t.require == Require::Unspec && t.colocate == Colocate::Unspec {
                    info!(block = %config.name, target = %t.name, "Dropping dependency target: no rule in use");
                    continue;
                }
                targets.push(DepTarget {
                    name: t.name.clone(),
                    require: t.require,
                    colocate: t.colocate,
                    block: 0,
                });
            }
            if targets.is_empty() {
                info!(block = %config.name, "Dropping dependency block: no targets");
                continue;
            }
            blocks.push(DepBlock {
                name: config.name.clone(),
                deps: targets.len() as u32,
                targets,
                hits: 0,
                implied: false,
            });
        }

        let mut graph = Self { blocks };
        graph.link();

        let invalid = graph.invalid_blocks();
        if !invalid.is_empty() {
            for &idx in &invalid {
                warn!(block = %graph.blocks[idx].name, "Removing dependency block: invalid");
            }
            let mut idx = 0;
            graph.blocks.retain(|_| {
                let keep = !invalid.contains(&idx);
                idx += 1;
                keep
            });
            graph.link();
        }
        graph
    }

    /// Resolve target indices, create implied blocks and recount hits.
    fn link(&mut self) {
        self.blocks.retain(|b| !b.implied);
        for block in &mut self.blocks {
            block.hits = 0;
        }

        for b in 0..self.blocks.len() {
            for t in 0..self.blocks[b].targets.len() {
                let name = self.blocks[b].targets[t].name.clone();
                let idx = match self.index_of(&name) {
                    Some(idx) => idx,
                    None => {
                        self.blocks.push(DepBlock {
                            name,
                            targets: Vec::new(),
                            hits: 0,
                            deps: 0,
                            implied: true,
                        });
                        self.blocks.len() - 1
                    }
                };
                self.blocks[idx].hits += 1;
                self.blocks[b].targets[t].block = idx;
            }
        }
    }

    fn invalid_blocks(&self) -> HashSet<usize> {
        let mut invalid = HashSet::new();
        for start in 0..self.blocks.len() {
            if self.reaches_require_cycle(start) {
                warn!(block = %self.blocks[start].name, "Cyclic requirement dependency");
                invalid.insert(start);
            }
            if let Some(conflict) = self.colocation_conflict(start) {
                warn!(
                    block = %self.blocks[start].name,
                    target = %self.blocks[conflict].name,
                    "Colocation conflict"
                );
                invalid.insert(start);
                invalid.insert(conflict);
            }
        }
        invalid
    }

    /// Whether a requirement path from `start` runs into a cycle.
    fn reaches_require_cycle(&self, start: usize) -> bool {
        fn visit(g: &DependencyGraph, idx: usize, path: &mut Vec<usize>) -> bool {
            if path.contains(&idx) {
                return true;
            }
            path.push(idx);
            let cyclic = g.blocks[idx]
                .targets
                .iter()
                .filter(|t| t.require != Require::Unspec)
                .any(|t| visit(g, t.block, path));
            path.pop();
            cyclic
        }
        visit(self, start, &mut Vec::new())
    }

    /// A block reachable from `start` over both an always-colocate and a
    /// never-colocate edge.
    fn colocation_conflict(&self, start: usize) -> Option<usize> {
        let mut always = HashSet::new();
        let mut never = HashSet::new();
        let mut seen = HashSet::new();
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            if !seen.insert(idx) {
                continue;
            }
            for t in &self.blocks[idx].targets {
                match t.colocate {
                    Colocate::Always => {
                        always.insert(t.block);
                    }
                    Colocate::Never => {
                        never.insert(t.block);
                    }
                    Colocate::Unspec => {}
                }
                stack.push(t.block);
            }
        }
        always.intersection(&never).min().copied()
    }

    fn index_of(&self, name: &str) -> Option<usize> {
        self.blocks
            .iter()
            .position(|b| b.name.eq_ignore_ascii_case(name))
    }

    /// Case-insensitive lookup.
    pub fn find(&self, name: &str) -> Option<&DepBlock> {
        self.index_of(name).map(|i| &self.blocks[i])
    }

    pub fn block(&self, idx: usize) -> Option<&DepBlock> {
        self.blocks.get(idx)
    }

    pub fn blocks(&self) -> &[DepBlock] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Whether `dependent` requires `target`, directly or transitively.
    pub fn requires(&self, dependent: &str, target: &str) -> bool {
        let Some(start) = self.index_of(dependent) else {
            return false;
        };
        let mut seen = HashSet::new();
        let mut stack = vec![start];
        while let Some(idx) = stack.pop() {
            if !seen.insert(idx) {
                continue;
            }
            for t in self.blocks[idx]
                .targets
                .iter()
                .filter(|t| t.require != Require::Unspec)
            {
                if t.name.eq_ignore_ascii_case(target) {
                    return true;
                }
                stack.push(t.block);
            }
        }
        false
    }

    /// Render each top-level dependency tree as text.
    pub fn print_depends(&self) -> String {
        let mut out = String::new();
        for (idx, block) in self.blocks.iter().enumerate() {
            if block.targets.is_empty() || block.implied || block.hits != 0 {
                continue;
            }
            self.print_tree(&mut out, idx, idx, 0, &mut Vec::new());
            out.push('\n');
        }
        out
    }

    fn print_tree(&self, out: &mut String, start: usize, idx: usize, level: usize, path: &mut Vec<usize>) {
        if idx == start && level > 0 {
            let _ = writeln!(out, "[cycles to {}]", self.blocks[start].name);
            return;
        }
        let block = &self.blocks[idx];
        let _ = writeln!(out, "{}", block.name);
        let pad = " ".repeat(9 * level);
        for t in &block.targets {
            let colo = match t.colocate {
                Colocate::Unspec => "--",
                Colocate::Always => "Ca",
                Colocate::Never => "Cn",
            };
            let req = match t.require {
                Require::Unspec => "--",
                Require::Start => "Rs",
                Require::Always => "Ra",
            };
            let _ = write!(out, "{pad}|\n{pad}+-{colo}{req}-> ");
            if path.contains(&t.block) {
                let _ = writeln!(out, "[cycles to {}]", self.blocks[t.block].name);
            } else {
                path.push(t.block);
                self.print_tree(out, start, t.block, level + 1, path);
                path.pop();
            }
        }
    }

    /// Render the graph in Graphviz DOT. Edges found broken in `states`
    /// are dashed.
    pub fn print_depends_dot(&self, states: &[ResourceState]) -> String {
        let mut out = String::from("digraph G {\n");
        for block in &self.blocks {
            let src = dot_clean(&block.name);
            let broken = |target: &str, fault: EdgeFault| {
                states
                    .iter()
                    .filter(|s| s.name.eq_ignore_ascii_case(&block.name))
                    .any(|s| s.has_broken_edge(target, fault))
            };
            for t in &block.targets {
                let dest = dot_clean(&t.name);
                let mut edge = |color: &str, head: &str, label: &str, dashed: bool| {
                    let style = if dashed { "dashed" } else { "solid" };
                    let _ = writeln!(
                        out,
                        "\tedge [color={color}, arrowhead={head}, label=\"{label}\", style={style}];"
                    );
                    let _ = writeln!(out, "\t{src} -> {dest};");
                };
                match t.colocate {
                    Colocate::Always => edge("black", "diamond", "Ca", broken(&t.name, EdgeFault::Colocate)),
                    Colocate::Never => edge("red", "diamond", "Cn", broken(&t.name, EdgeFault::NonColocate)),
                    Colocate::Unspec => {}
                }
                match t.require {
                    Require::Start => edge("green", "vee", "Rs", broken(&t.name, EdgeFault::Require)),
                    Require::Always => edge("black", "vee", "Ra", broken(&t.name, EdgeFault::Require)),
                    Require::Unspec => {}
                }
            }
        }
        out.push_str("}\n");
        out
    }
}

/// DOT identifiers: alphanumerics, `_` and `-`, starting with a letter.
fn dot_clean(name: &str) -> String {
    name.chars()
        .enumerate()
        .map(|(i, c)| {
            if i == 0 && !c.is_ascii_alphabetic() {
                '_'
            } else if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
