//! Fresh symbol allocation and canonical symbol ordering

use crate::{ChcSort, ChcVar, Relation, RelationId};
use rustc_hash::FxHashMap;
use std::cmp::Ordering;

/// Allocates fresh symbols for one solve and orders symbols canonically.
///
/// The factory is owned by the caller and outlives the solve, so symbols
/// allocated during solving stay unique against later queries on the same
/// oracle session.
#[derive(Debug, Default)]
pub struct SymbolFactory {
    relations: Vec<Relation>,
    by_name: FxHashMap<String, RelationId>,
    max_occurrences: FxHashMap<RelationId, usize>,
    initialized: bool,
    next: u64,
}

impl SymbolFactory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the relations of a problem and their highest occurrence
    /// index. Must run before any resolution step.
    pub fn initialize(
        &mut self,
        relations: &[Relation],
        max_occurrences: &FxHashMap<RelationId, usize>,
    ) {
        self.relations = relations.to_vec();
        self.by_name = relations.iter().map(|r| (r.name.clone(), r.id)).collect();
        self.max_occurrences = max_occurrences.clone();
        self.initialized = true;
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn max_occurrence(&self, relation: RelationId) -> usize {
        self.max_occurrences.get(&relation).copied().unwrap_or(0)
    }

    /// A symbol no other call of this factory has returned
    pub fn fresh(&mut self, prefix: &str, sort: ChcSort) -> ChcVar {
        let n = self.next;
        self.next += 1;
        ChcVar::new(format!("{prefix}!{n}"), sort)
    }

    /// Number of symbols allocated so far
    pub fn allocated(&self) -> u64 {
        self.next
    }

    /// (relation, occurrence, position) if `var` is an argument instance
    pub fn argument_instance(&self, var: &ChcVar) -> Option<(RelationId, usize, usize)> {
        let (name, _) = var.name.rsplit_once('@')?;
        let id = *self.by_name.get(name)?;
        let relation = self.relations.get(id.index())?;
        let (occ, pos) = relation.parse_arg_var(var)?;
        Some((id, occ, pos))
    }

    /// Argument instances first, by (relation, occurrence, position); then
    /// every other symbol by name.
    pub fn canonical_cmp(&self, a: &ChcVar, b: &ChcVar) -> Ordering {
        match (self.argument_instance(a), self.argument_instance(b)) {
            (Some(ka), Some(kb)) => ka.cmp(&kb),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => a.name.cmp(&b.name).then_with(|| a.sort.cmp(&b.sort)),
        }
    }

    pub fn sort_canonical(&self, vars: &mut [ChcVar]) {
        vars.sort_by(|a, b| self.canonical_cmp(a, b));
    }
}
