//! Dependency resolver.
//!
//! Decides which mods are eligible and in what order they load. Exclusions
//! are applied in passes:
//!
//! 1. duplicate ids (one copy survives)
//! 2. mod data marks (obsolete or known broken)
//! 3. self-declared incompatibilities
//! 4. missing or too-old dependencies, repeated until nothing changes
//! 5. dependency cycles, then the cascade from step 4 again
//!
//! Survivors are ordered topologically with ties broken by lowercase id, so
//! the same input always gives the same order.

use crate::mod_data::ModDataList;
use modshim_runtime::{normalize_id, FailReason, PluginManifest};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info};

/// Why a mod was excluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Exclusion {
    pub reason: FailReason,
    pub detail: String,
}

/// Result of one resolution pass. Indices refer to the input manifests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Eligible mods in load order.
    pub order: Vec<usize>,
    /// Excluded mods and why.
    pub excluded: BTreeMap<usize, Exclusion>,
    /// Required dependencies of each eligible mod.
    pub required: HashMap<usize, Vec<usize>>,
}

impl Resolution {
    pub fn is_excluded(&self, index: usize) -> bool {
        self.excluded.contains_key(&index)
    }

    /// Required dependencies of an eligible mod.
    pub fn required_dependencies(&self, index: usize) -> &[usize] {
        self.required.get(&index).map(Vec::as_slice).unwrap_or(&[])
    }
}

struct Resolver<'a> {
    manifests: &'a [PluginManifest],
    keys: Vec<String>,
    /// Surviving copy for each id.
    by_key: HashMap<String, usize>,
    excluded: BTreeMap<usize, Exclusion>,
}

impl<'a> Resolver<'a> {
    fn new(manifests: &'a [PluginManifest]) -> Self {
        Self {
            manifests,
            keys: manifests.iter().map(PluginManifest::key).collect(),
            by_key: HashMap::new(),
            excluded: BTreeMap::new(),
        }
    }

    fn exclude(&mut self, index: usize, reason: FailReason, detail: String) {
        if self.excluded.contains_key(&index) {
            return;
        }
        debug!(
            "Excluding {} ({}): {}",
            self.manifests[index].id(),
            reason,
            detail
        );
        self.excluded.insert(index, Exclusion { reason, detail });
    }

    fn is_eligible(&self, index: usize) -> bool {
        !self.excluded.contains_key(&index)
    }

    /// Eligible indices, sorted by id.
    fn eligible(&self) -> Vec<usize> {
        let mut eligible: Vec<usize> = (0..self.manifests.len())
            .filter(|&i| self.is_eligible(i))
            .collect();
        eligible.sort_by(|&a, &b| self.keys[a].cmp(&self.keys[b]).then(a.cmp(&b)));
        eligible
    }

    /// The eligible copy of a mod id.
    fn lookup(&self, id: &str) -> Option<usize> {
        self.by_key
            .get(&normalize_id(id))
            .copied()
            .filter(|&i| self.is_eligible(i))
    }

    /// Keep the highest version of each id; ties go to the first seen.
    fn exclude_duplicates(&mut self) {
        for index in 0..self.manifests.len() {
            let key = self.keys[index].clone();
            match self.by_key.get(&key).copied() {
                None => {
                    self.by_key.insert(key, index);
                }
                Some(kept) => {
                    let (winner, loser) =
                        if self.manifests[index].version() > self.manifests[kept].version() {
                            (index, kept)
                        } else {
                            (kept, index)
                        };
                    self.by_key.insert(key, winner);
                    let detail = format!(
                        "another copy of '{}' is installed (keeping v{})",
                        self.manifests[winner].id(),
                        self.manifests[winner].version()
                    );
                    self.exclude(loser, FailReason::Duplicate, detail);
                }
            }
        }
    }

    fn exclude_marked(&mut self, mod_data: &ModDataList) {
        for index in self.eligible() {
            if let Some(record) = mod_data.lookup(&self.manifests[index]) {
                self.exclude(index, record.status.fail_reason(), record.reason.clone());
            }
        }
    }

    fn exclude_incompatible(&mut self) {
        for index in self.eligible() {
            let conflict = self.manifests[index]
                .incompatible_with
                .iter()
                .find(|other| self.lookup(other).is_some_and(|o| o != index))
                .cloned();
            if let Some(other) = conflict {
                self.exclude(
                    index,
                    FailReason::Incompatible,
                    format!("declares itself incompatible with '{}'", other),
                );
            }
        }
    }

    /// Exclude mods whose dependencies are missing, excluded, or too old,
    /// until no more exclusions happen.
    fn exclude_unsatisfied(&mut self) {
        loop {
            let mut changed = false;
            for index in self.eligible() {
                if let Some(detail) = self.unsatisfied(index) {
                    self.exclude(index, FailReason::MissingDependencies, detail);
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }

    fn unsatisfied(&self, index: usize) -> Option<String> {
        for dependency in &self.manifests[index].dependencies {
            let present = self.by_key.get(&dependency.key()).copied();
            match present {
                None if dependency.required => {
                    return Some(format!("requires '{}', which is not installed", dependency.id));
                }
                Some(dep) if !self.is_eligible(dep) && dependency.required => {
                    return Some(format!("requires '{}', which can't be loaded", dependency.id));
                }
                Some(dep) if self.is_eligible(dep) => {
                    if let Some(min) = &dependency.min_version {
                        let found = self.manifests[dep].version();
                        if !found.satisfies(min) {
                            return Some(format!(
                                "requires '{}' {} or later, found {}",
                                dependency.id, min, found
                            ));
                        }
                    }
                }
                _ => {}
            }
        }
        None
    }

    /// Must-load-before edges between eligible mods: dependency -> dependents.
    fn edges(&self) -> BTreeMap<usize, Vec<usize>> {
        let mut edges: BTreeMap<usize, Vec<usize>> = BTreeMap::new();
        for index in self.eligible() {
            for dependency in &self.manifests[index].dependencies {
                if let Some(dep) = self.lookup(&dependency.id) {
                    edges.entry(dep).or_default().push(index);
                }
            }
        }
        edges
    }

    fn exclude_cycles(&mut self) {
        let nodes = self.eligible();
        let edges = self.edges();
        for component in strongly_connected(self.manifests.len(), &nodes, &edges) {
            let self_loop = component.len() == 1
                && edges
                    .get(&component[0])
                    .is_some_and(|targets| targets.contains(&component[0]));
            if component.len() < 2 && !self_loop {
                continue;
            }

            let mut members = component;
            members.sort_by(|&a, &b| self.keys[a].cmp(&self.keys[b]));
            let names: Vec<&str> = members.iter().map(|&i| self.manifests[i].id()).collect();
            let detail = format!("dependency cycle between {}", names.join(", "));
            for member in members {
                self.exclude(member, FailReason::MissingDependencies, detail.clone());
            }
        }
    }

    fn order(&self) -> Vec<usize> {
        let nodes = self.eligible();
        let edges = self.edges();
        let mut indegree: HashMap<usize, usize> = nodes.iter().map(|&i| (i, 0)).collect();
        for targets in edges.values() {
            for target in targets {
                if let Some(count) = indegree.get_mut(target) {
                    *count += 1;
                }
            }
        }

        let mut ready: BTreeSet<(&str, usize)> = nodes
            .iter()
            .filter(|&&i| indegree.get(&i) == Some(&0))
            .map(|&i| (self.keys[i].as_str(), i))
            .collect();
        let mut order = Vec::with_capacity(nodes.len());
        while let Some((key, index)) = ready.iter().next().copied() {
            ready.remove(&(key, index));
            order.push(index);
            for &target in edges.get(&index).map(Vec::as_slice).unwrap_or(&[]) {
                if let Some(count) = indegree.get_mut(&target) {
                    *count -= 1;
                    if *count == 0 {
                        ready.insert((self.keys[target].as_str(), target));
                    }
                }
            }
        }
        order
    }

    fn required(&self, order: &[usize]) -> HashMap<usize, Vec<usize>> {
        order
            .iter()
            .map(|&index| {
                let deps = self.manifests[index]
                    .dependencies
                    .iter()
                    .filter(|d| d.required)
                    .filter_map(|d| self.lookup(&d.id))
                    .collect();
                (index, deps)
            })
            .collect()
    }
}

/// Strongly connected components of the graph (iterative Tarjan).
fn strongly_connected(
    size: usize,
    nodes: &[usize],
    edges: &BTreeMap<usize, Vec<usize>>,
) -> Vec<Vec<usize>> {
    let mut index_of: Vec<Option<usize>> = vec![None; size];
    let mut low = vec![0usize; size];
    let mut on_stack = vec![false; size];
    let mut stack = Vec::new();
    let mut next_index = 0;
    let mut components = Vec::new();

    for &start in nodes {
        if index_of[start].is_some() {
            continue;
        }

        let mut call_stack = vec![(start, 0usize)];
        index_of[start] = Some(next_index);
        low[start] = next_index;
        next_index += 1;
        stack.push(start);
        on_stack[start] = true;

        while let Some(&(node, edge)) = call_stack.last() {
            let successors = edges.get(&node).map(Vec::as_slice).unwrap_or(&[]);
            if let Some(&next) = successors.get(edge) {
                if let Some(frame) = call_stack.last_mut() {
                    frame.1 += 1;
                }
                match index_of[next] {
                    None => {
                        index_of[next] = Some(next_index);
                        low[next] = next_index;
                        next_index += 1;
                        stack.push(next);
                        on_stack[next] = true;
                        call_stack.push((next, 0));
                    }
                    Some(next_idx) if on_stack[next] => {
                        low[node] = low[node].min(next_idx);
                    }
                    Some(_) => {}
                }
                continue;
            }

            call_stack.pop();
            if let Some(&(parent, _)) = call_stack.last() {
                low[parent] = low[parent].min(low[node]);
            }
            if Some(low[node]) == index_of[node] {
                let mut component = Vec::new();
                while let Some(member) = stack.pop() {
                    on_stack[member] = false;
                    component.push(member);
                    if member == node {
                        break;
                    }
                }
                components.push(component);
            }
        }
    }

    components
}

/// Resolve the load order for a set of manifests.
pub fn resolve(manifests: &[PluginManifest], mod_data: &ModDataList) -> Resolution {
    let mut resolver = Resolver::new(manifests);
    resolver.exclude_duplicates();
    resolver.exclude_marked(mod_data);
    resolver.exclude_incompatible();
    resolver.exclude_unsatisfied();
    resolver.exclude_cycles();
    resolver.exclude_unsatisfied();

    let order = resolver.order();
    let required = resolver.required(&order);
    info!(
        "Resolved {} mod(s): {} eligible, {} excluded",
        manifests.len(),
        order.len(),
        resolver.excluded.len()
    );

    Resolution {
        order,
        excluded: resolver.excluded,
        required,
    }
}
