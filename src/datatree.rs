//! DataTree - record of every explored choice path
//!
//! Each executed test case is a path through a tree whose internal nodes are
//! draws (constraints plus the values tried so far) and whose leaves are
//! conclusions. The tree answers two questions for the runner:
//!
//! - which prefix leads somewhere not yet explored ([`DataTree::generate_novel_prefix`]);
//! - whether there is anything left to explore at all ([`DataTree::is_exhausted`]).
//!
//! A node is exhausted when it concluded, or when every value its
//! constraints permit has been tried and every child is exhausted. Only
//! finite domains can ever exhaust.

use crate::choice::{choice_from_index, ChoiceValue, Constraints};
use crate::data::{ConjectureResult, Status};
use crate::providers::{PrimitiveProvider, RandomProvider};

use rand::Rng;
use std::collections::HashMap;

/// Random draws tried at a node before enumerating its untried values.
const NOVEL_ATTEMPTS: usize = 10;

/// Largest domain enumerated when random draws keep hitting known values.
const MAX_ENUMERATION: u128 = 1 << 16;

#[derive(Debug)]
struct Branch {
    constraints: Constraints,
    forced: bool,
    /// Children in the order they were first seen.
    children: Vec<(ChoiceValue, usize)>,
    lookup: HashMap<ChoiceValue, usize>,
}

impl Branch {
    fn new(constraints: Constraints, forced: bool) -> Self {
        Self {
            constraints,
            forced,
            children: Vec::new(),
            lookup: HashMap::new(),
        }
    }

    fn cardinality(&self) -> Option<u128> {
        if self.forced {
            Some(1)
        } else {
            self.constraints.cardinality()
        }
    }

    fn is_saturated(&self) -> bool {
        self.cardinality()
            .map_or(false, |total| self.children.len() as u128 >= total)
    }
}

#[derive(Debug, Default)]
struct TreeNode {
    branch: Option<Branch>,
    conclusion: Option<Status>,
    exhausted: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TreeStats {
    pub nodes: usize,
    pub conclusions: usize,
    pub inconsistencies: usize,
}

#[derive(Debug)]
pub struct DataTree {
    nodes: Vec<TreeNode>,
    stats: TreeStats,
}

impl Default for DataTree {
    fn default() -> Self {
        Self::new()
    }
}

impl DataTree {
    pub fn new() -> Self {
        Self {
            nodes: vec![TreeNode::default()],
            stats: TreeStats {
                nodes: 1,
                ..TreeStats::default()
            },
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.nodes[0].exhausted
    }

    pub fn stats(&self) -> TreeStats {
        self.stats
    }

    fn inconsistent(&mut self, position: usize, what: &str) {
        self.stats.inconsistencies += 1;
        log::warn!("nondeterministic test: {} at choice {}", what, position);
    }

    /// Adds the path of `result` to the tree and propagates exhaustion
    /// towards the root.
    pub fn record(&mut self, result: &ConjectureResult) {
        let mut path = vec![0usize];
        let mut current = 0usize;
        for (position, node) in result.nodes.iter().enumerate() {
            if self.nodes[current].conclusion.is_some() {
                self.inconsistent(position, "draw after a previously concluded path");
                return;
            }
            let fresh = self.nodes.len();
            let branch = self.nodes[current]
                .branch
                .get_or_insert_with(|| Branch::new(node.constraints.clone(), node.was_forced));
            if branch.constraints != node.constraints {
                self.inconsistent(position, "constraints changed");
                return;
            }
            let child = match branch.lookup.get(&node.value) {
                Some(&child) => child,
                None => {
                    branch.lookup.insert(node.value.clone(), fresh);
                    branch.children.push((node.value.clone(), fresh));
                    self.nodes.push(TreeNode::default());
                    self.stats.nodes += 1;
                    fresh
                }
            };
            current = child;
            path.push(current);
        }

        if self.nodes[current].branch.is_some() {
            self.inconsistent(result.nodes.len(), "path concluded early");
            return;
        }
        match self.nodes[current].conclusion {
            Some(status) if status != result.status => {
                self.inconsistent(result.nodes.len(), "status changed");
                return;
            }
            Some(_) => {}
            None => {
                self.nodes[current].conclusion = Some(result.status);
                self.stats.conclusions += 1;
            }
        }

        for &id in path.iter().rev() {
            if self.nodes[id].exhausted {
                continue;
            }
            if !self.compute_exhausted(id) {
                break;
            }
            self.nodes[id].exhausted = true;
        }
    }

    fn compute_exhausted(&self, id: usize) -> bool {
        let node = &self.nodes[id];
        if node.conclusion.is_some() {
            return true;
        }
        match &node.branch {
            Some(branch) => {
                branch.is_saturated() && branch.children.iter().all(|&(_, child)| self.nodes[child].exhausted)
            }
            None => false,
        }
    }

    /// A prefix that, replayed and then continued randomly, leads away from
    /// every path already recorded wherever the tree can tell.
    pub fn generate_novel_prefix<R: Rng>(&self, rng: &mut R) -> Vec<ChoiceValue> {
        let mut prefix = Vec::new();
        let mut current = 0usize;
        loop {
            let branch = match &self.nodes[current].branch {
                Some(branch) if !self.nodes[current].exhausted => branch,
                _ => return prefix,
            };
            if !branch.is_saturated() {
                if let Some(value) = Self::novel_value(branch, rng) {
                    prefix.push(value);
                }
                return prefix;
            }
            let open: Vec<&(ChoiceValue, usize)> = branch
                .children
                .iter()
                .filter(|(_, child)| !self.nodes[*child].exhausted)
                .collect();
            if open.is_empty() {
                return prefix;
            }
            let (value, child) = open[rng.gen_range(0..open.len())];
            prefix.push(value.clone());
            current = *child;
        }
    }

    fn novel_value<R: Rng>(branch: &Branch, rng: &mut R) -> Option<ChoiceValue> {
        if branch.forced {
            return None;
        }
        let mut provider = RandomProvider::new(rng.gen());
        for _ in 0..NOVEL_ATTEMPTS {
            let value = provider.draw(&branch.constraints);
            if !branch.lookup.contains_key(&value) {
                return Some(value);
            }
        }
        let total = branch.cardinality().filter(|&total| total <= MAX_ENUMERATION)?;
        let untried: Vec<ChoiceValue> = (0..total)
            .filter_map(|index| choice_from_index(index, &branch.constraints))
            .filter(|value| !branch.lookup.contains_key(value))
            .collect();
        if untried.is_empty() {
            None
        } else {
            Some(untried[rng.gen_range(0..untried.len())].clone())
        }
    }
}
