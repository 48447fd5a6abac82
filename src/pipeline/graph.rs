//! Inclusion graph over per-file chains and the concatenation merge engine
//!
//! Chains live in an arena ([`ChainGraph`]) and refer to each other by
//! [`ChainId`]. An edge parent -> child means the parent's output contains
//! the child's output. Merging folds every edge into the parent's steps as
//! a [`Concatenation`] at an extension both chains produce.

use std::collections::HashSet;
use std::fmt;
use thiserror::Error;
use tracing::debug;

use super::chain::{ConcatMode, Concatenation, Step, plan_meta};
use crate::handlers::AssetMeta;
use crate::source::SourceFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChainId(usize);

impl ChainId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Configuration errors raised while merging chains
#[derive(Debug, Error)]
pub enum MergeError {
    #[error(
        "incompatible handler chains: cannot concatenate `{child}` [{child_exts}] into `{parent}` [{parent_exts}]"
    )]
    IncompatibleChains {
        child: String,
        child_exts: String,
        parent: String,
        parent_exts: String,
    },

    #[error("inclusion cycle detected: {path}")]
    InclusionCycle { path: String },
}

/// Steps for one file plus its place in the inclusion graph
#[derive(Debug, Clone)]
pub struct HandlerChain {
    steps: Vec<Step>,
    /// Declared inclusion order; may contain the chain itself
    children: Vec<ChainId>,
    parents: Vec<ChainId>,
    source: Option<SourceFile>,
}

impl HandlerChain {
    pub fn new(steps: Vec<Step>) -> Self {
        Self {
            steps,
            children: Vec::new(),
            parents: Vec::new(),
            source: None,
        }
    }

    pub fn for_source(source: SourceFile, steps: Vec<Step>) -> Self {
        Self {
            source: Some(source),
            ..Self::new(steps)
        }
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    pub fn children(&self) -> &[ChainId] {
        &self.children
    }

    pub fn parents(&self) -> &[ChainId] {
        &self.parents
    }

    pub fn source(&self) -> Option<&SourceFile> {
        self.source.as_ref()
    }

    pub fn is_root(&self) -> bool {
        self.parents.is_empty()
    }

    /// Extension the chain's output is named under
    pub fn output_ext(&self) -> Option<&str> {
        self.steps.last().map(Step::output_ext)
    }

    /// Source metadata after every step's renaming
    pub fn planned_meta(&self) -> Option<AssetMeta> {
        self.source
            .as_ref()
            .map(|source| plan_meta(&self.steps, source.meta()))
    }

    fn label(&self, id: ChainId) -> String {
        match &self.source {
            Some(source) => source.meta().file_name(),
            None => id.to_string(),
        }
    }

    fn ext_sequence(&self) -> String {
        self.steps
            .iter()
            .map(Step::output_ext)
            .collect::<Vec<_>>()
            .join(" -> ")
    }
}

#[derive(Debug, Clone, Default)]
pub struct ChainGraph {
    chains: Vec<HandlerChain>,
}

impl ChainGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, chain: HandlerChain) -> ChainId {
        self.chains.push(chain);
        ChainId(self.chains.len() - 1)
    }

    /// Chain for an id issued by this graph.
    ///
    /// # Panics
    ///
    /// Panics if `id` was not issued by this graph; use [`ChainGraph::get`]
    /// for ids of unknown origin.
    pub fn chain(&self, id: ChainId) -> &HandlerChain {
        &self.chains[id.0]
    }

    pub fn get(&self, id: ChainId) -> Option<&HandlerChain> {
        self.chains.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.chains.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ChainId> + use<> {
        (0..self.chains.len()).map(ChainId)
    }

    /// Chains nobody includes; these are the ones written to disk
    pub fn roots(&self) -> Vec<ChainId> {
        self.ids().filter(|id| self.chain(*id).is_root()).collect()
    }

    /// Record that `parent` includes `child` at the next position of its
    /// declared order. `child == parent` records the parent's own content.
    ///
    /// # Panics
    ///
    /// Panics if either id was not issued by this graph.
    pub fn include(&mut self, parent: ChainId, child: ChainId) {
        if self.chains[parent.0].children.contains(&child) {
            return;
        }
        self.chains[parent.0].children.push(child);
        if child != parent {
            self.chains[child.0].parents.push(parent);
        }
    }

    /// Fold every inclusion edge into the parents' chains.
    ///
    /// Parents are merged before their children, so a chain is shortened by
    /// its own parents before anything is concatenated into it.
    pub fn merge_all(&mut self) -> Result<(), MergeError> {
        for id in self.merge_order()? {
            self.merge_with_parents(id)?;
        }
        Ok(())
    }

    /// Insert `child` into each of its parents as a concatenation step,
    /// shortest parent chain first
    pub fn merge_with_parents(&mut self, child: ChainId) -> Result<(), MergeError> {
        let mut parents = self.chains[child.0].parents.clone();
        parents.sort_by_key(|parent| self.chains[parent.0].steps.len());

        for parent in parents {
            let Some((child_index, parent_index)) =
                find_compatible(&self.chains[child.0].steps, &self.chains[parent.0].steps)
            else {
                return Err(self.incompatible(child, parent));
            };

            let child_steps = &mut self.chains[child.0].steps;
            child_steps.truncate(child_index + 1);
            drop_forks(child_steps);

            let (mode, position) = self.concat_mode(parent, child);
            let concat = Concatenation {
                child,
                mode,
                ext: self.chains[parent.0].steps[parent_index]
                    .output_ext()
                    .to_string(),
                position,
            };

            let steps = &mut self.chains[parent.0].steps;
            let index = insertion_index(steps, parent_index, &concat);
            debug!(
                parent = %parent,
                child = %child,
                mode = %concat.mode,
                ext = %concat.ext,
                index,
                "Inserting concatenation"
            );
            steps.insert(index, Step::Concat(concat));
        }

        Ok(())
    }

    /// Prepend when `child` is declared before the parent's own content,
    /// append otherwise
    fn concat_mode(&self, parent: ChainId, child: ChainId) -> (ConcatMode, usize) {
        let declared = &self.chains[parent.0].children;
        let mut mode = ConcatMode::Prepend;
        for entry in declared {
            if *entry == child {
                break;
            }
            if *entry == parent {
                mode = ConcatMode::Append;
                break;
            }
        }
        let position = declared
            .iter()
            .position(|entry| *entry == child)
            .unwrap_or(declared.len());
        (mode, position)
    }

    fn incompatible(&self, child: ChainId, parent: ChainId) -> MergeError {
        let child_chain = &self.chains[child.0];
        let parent_chain = &self.chains[parent.0];
        MergeError::IncompatibleChains {
            child: child_chain.label(child),
            child_exts: child_chain.ext_sequence(),
            parent: parent_chain.label(parent),
            parent_exts: parent_chain.ext_sequence(),
        }
    }

    /// Chains ordered parents-first; fails on inclusion cycles
    fn merge_order(&self) -> Result<Vec<ChainId>, MergeError> {
        let mut visited = HashSet::new();
        let mut path = Vec::new();
        let mut postorder = Vec::with_capacity(self.chains.len());

        for id in self.ids() {
            self.visit(id, &mut visited, &mut path, &mut postorder)?;
        }

        postorder.reverse();
        Ok(postorder)
    }

    /// DFS over child edges; self-inclusion is not an edge
    fn visit(
        &self,
        current: ChainId,
        visited: &mut HashSet<ChainId>,
        path: &mut Vec<ChainId>,
        postorder: &mut Vec<ChainId>,
    ) -> Result<(), MergeError> {
        if let Some(start) = path.iter().position(|id| *id == current) {
            let mut cycle: Vec<String> = path[start..]
                .iter()
                .map(|id| self.chains[id.0].label(*id))
                .collect();
            cycle.push(self.chains[current.0].label(current));
            return Err(MergeError::InclusionCycle {
                path: cycle.join(" -> "),
            });
        }

        if !visited.insert(current) {
            return Ok(());
        }

        path.push(current);
        for &child in &self.chains[current.0].children {
            if child != current {
                self.visit(child, visited, path, postorder)?;
            }
        }
        path.pop();

        postorder.push(current);
        Ok(())
    }
}

/// Last pair of steps (scanning both chains from the end) producing the
/// same extension, as (child index, parent index)
fn find_compatible(child: &[Step], parent: &[Step]) -> Option<(usize, usize)> {
    for (i, child_step) in child.iter().enumerate().rev() {
        for (j, parent_step) in parent.iter().enumerate().rev() {
            if child_step.output_ext() == parent_step.output_ext() {
                return Some((i, j));
            }
        }
    }
    None
}

/// Included content is only written as part of its parents, so a
/// truncated child loses every fork, wherever it sits in the chain
fn drop_forks(steps: &mut Vec<Step>) {
    let Some(ext) = steps.last().map(|step| step.output_ext().to_string()) else {
        return;
    };
    steps.retain(|step| !matches!(step, Step::Fork(_)));
    if steps.is_empty() {
        steps.push(Step::pass_through(&ext));
    }
}

/// Where a new concatenation goes for a match at `matched`.
///
/// Forks and concatenations pass the stream through unchanged. All of them
/// following the step that produced the extension form one run, with the
/// concatenations ahead of the forks so every fork sees the joined stream.
/// Within the run appends are kept in declared order and prepends in
/// reverse declared order, which leaves the output in the parent's
/// declared order.
fn insertion_index(steps: &[Step], matched: usize, new: &Concatenation) -> usize {
    let mut index = matched + 1;
    while index > 0 && matches!(steps[index - 1], Step::Fork(_) | Step::Concat(_)) {
        index -= 1;
    }

    while let Some(Step::Concat(existing)) = steps.get(index) {
        let existing_first = match (existing.mode, new.mode) {
            (ConcatMode::Append, ConcatMode::Append) => existing.position < new.position,
            (ConcatMode::Prepend, ConcatMode::Prepend) => existing.position > new.position,
            _ => true,
        };
        if !existing_first {
            break;
        }
        index += 1;
    }
    index
}
