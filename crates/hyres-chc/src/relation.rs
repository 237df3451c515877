//! Relation symbols (uninterpreted predicates) in CHC problems

use crate::{ChcSort, ChcVar};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a relation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RelationId(pub(crate) u32);

impl RelationId {
    /// Create a new relation ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for RelationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "R{}", self.0)
    }
}

/// A relation declaration
///
/// A relation is an uninterpreted predicate together with its ordered,
/// sorted argument list. One instance exists per predicate for the lifetime
/// of a solve.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Relation {
    /// Unique identifier
    pub id: RelationId,
    /// Human-readable name
    pub name: String,
    /// Sorts of arguments
    pub arg_sorts: Vec<ChcSort>,
}

impl Relation {
    /// Create a new relation
    pub fn new(id: RelationId, name: impl Into<String>, arg_sorts: Vec<ChcSort>) -> Self {
        Self {
            id,
            name: name.into(),
            arg_sorts,
        }
    }

    /// Get the arity (number of arguments)
    pub fn arity(&self) -> usize {
        self.arg_sorts.len()
    }

    /// The argument instance symbol for `position` at occurrence `occurrence`.
    ///
    /// Names are a pure function of (relation, occurrence, position), so the
    /// same instance is rebuilt identically wherever it is needed.
    pub fn arg_var(&self, occurrence: usize, position: usize) -> ChcVar {
        let sort = self
            .arg_sorts
            .get(position)
            .cloned()
            .unwrap_or(ChcSort::Int);
        ChcVar::new(format!("{}@{}_{}", self.name, occurrence, position), sort)
    }

    /// All argument instances at one occurrence, in position order
    pub fn arg_vars(&self, occurrence: usize) -> Vec<ChcVar> {
        (0..self.arity())
            .map(|pos| self.arg_var(occurrence, pos))
            .collect()
    }

    /// Inverse of [`Relation::arg_var`]: the (occurrence, position) of `var`
    /// if it is an argument instance of this relation.
    pub fn parse_arg_var(&self, var: &ChcVar) -> Option<(usize, usize)> {
        let rest = var.name.strip_prefix(&self.name)?.strip_prefix('@')?;
        let (occ, pos) = rest.split_once('_')?;
        let occ: usize = occ.parse().ok()?;
        let pos: usize = pos.parse().ok()?;
        (pos < self.arity() && self.arg_sorts[pos] == var.sort).then_some((occ, pos))
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}(", self.name)?;
        for (i, sort) in self.arg_sorts.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{sort}")?;
        }
        write!(f, ")")
    }
}
