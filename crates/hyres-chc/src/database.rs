//! Unit clause database with derivation provenance

use crate::{HyresError, HyresResult, Polarity, Relation, RelationId, UnitClause, UnitHead};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Handle of a stored unit. Stable for the lifetime of the database, also
/// after the unit is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UnitId(pub(crate) usize);

impl UnitId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "u{}", self.0)
    }
}

/// How a stored unit came about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Provenance {
    /// An input clause with an empty body
    Fact { clause: usize },
    /// Hyperresolution of `nucleus` with one electron per body position
    Derived {
        nucleus: usize,
        electrons: Vec<UnitId>,
    },
}

impl Provenance {
    pub fn clause(&self) -> usize {
        match self {
            Provenance::Fact { clause } => *clause,
            Provenance::Derived { nucleus, .. } => *nucleus,
        }
    }

    pub fn electrons(&self) -> &[UnitId] {
        match self {
            Provenance::Fact { .. } => &[],
            Provenance::Derived { electrons, .. } => electrons,
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoredUnit {
    pub unit: UnitClause,
    pub provenance: Provenance,
    /// Cleared when the unit is removed by backward subsumption
    pub active: bool,
}

/// Arena of derived units, indexed per relation.
///
/// Removed units stay in the arena so the provenance of later derivations
/// remains resolvable.
#[derive(Debug, Clone)]
pub struct UnitDatabase {
    relations: Vec<Relation>,
    entries: Vec<StoredUnit>,
    by_relation: FxHashMap<RelationId, Vec<UnitId>>,
    refutations: Vec<UnitId>,
    generation: u64,
}

impl UnitDatabase {
    pub fn new(relations: &[Relation]) -> Self {
        Self {
            relations: relations.to_vec(),
            entries: Vec::new(),
            by_relation: relations.iter().map(|r| (r.id, Vec::new())).collect(),
            refutations: Vec::new(),
            generation: 0,
        }
    }

    /// Store a positive unit of a relation
    pub fn insert(&mut self, unit: UnitClause, provenance: Provenance) -> HyresResult<UnitId> {
        let relation = match (unit.head, unit.polarity) {
            (UnitHead::Relation(id), Polarity::Positive) => id,
            _ => {
                return Err(HyresError::Internal(format!(
                    "only positive relation units are stored, got {}",
                    unit.render(&self.relations)
                )))
            }
        };
        let id = UnitId(self.entries.len());
        debug!(unit = %id, clause = %unit.render(&self.relations), "insert");
        self.entries.push(StoredUnit {
            unit,
            provenance,
            active: true,
        });
        self.by_relation.entry(relation).or_default().push(id);
        self.generation += 1;
        Ok(id)
    }

    /// Deactivate a stored unit
    pub fn remove(&mut self, id: UnitId) -> HyresResult<()> {
        let entry = self
            .entries
            .get_mut(id.0)
            .ok_or_else(|| HyresError::Internal(format!("no stored unit {id}")))?;
        if !entry.active {
            return Ok(());
        }
        entry.active = false;
        if let Some(relation) = entry.unit.relation() {
            if let Some(ids) = self.by_relation.get_mut(&relation) {
                ids.retain(|other| *other != id);
            }
        }
        debug!(unit = %id, "remove");
        self.generation += 1;
        Ok(())
    }

    /// Record the refuting unit that ends a solve. It is kept out of the
    /// per-relation lists.
    pub fn record_refutation(
        &mut self,
        unit: UnitClause,
        provenance: Provenance,
    ) -> HyresResult<UnitId> {
        if !unit.is_refutation() {
            return Err(HyresError::Internal(format!(
                "not a refutation: {}",
                unit.render(&self.relations)
            )));
        }
        let id = UnitId(self.entries.len());
        self.entries.push(StoredUnit {
            unit,
            provenance,
            active: false,
        });
        self.refutations.push(id);
        self.generation += 1;
        Ok(id)
    }

    /// Active units of `relation`, in insertion order
    pub fn unit_ids(&self, relation: RelationId) -> &[UnitId] {
        self.by_relation
            .get(&relation)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn units_of(&self, relation: RelationId) -> impl Iterator<Item = (UnitId, &UnitClause)> {
        self.unit_ids(relation)
            .iter()
            .map(move |id| (*id, &self.entries[id.0].unit))
    }

    pub fn active_units(&self) -> impl Iterator<Item = (UnitId, &StoredUnit)> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.active)
            .map(|(i, e)| (UnitId(i), e))
    }

    pub fn get(&self, id: UnitId) -> Option<&StoredUnit> {
        self.entries.get(id.0)
    }

    pub fn unit(&self, id: UnitId) -> Option<&UnitClause> {
        self.get(id).map(|e| &e.unit)
    }

    pub fn provenance(&self, id: UnitId) -> Option<&Provenance> {
        self.get(id).map(|e| &e.provenance)
    }

    pub fn is_active(&self, id: UnitId) -> bool {
        self.get(id).is_some_and(|e| e.active)
    }

    /// Is a unit identical up to occurrence and local names currently
    /// stored?
    pub fn contains_identical(&self, unit: &UnitClause) -> bool {
        let Some(relation) = unit.relation() else {
            return false;
        };
        let Ok(candidate) = unit.canonical(&self.relations) else {
            return false;
        };
        self.units_of(relation).any(|(_, stored)| {
            stored
                .canonical(&self.relations)
                .is_ok_and(|s| s.constraint == candidate.constraint)
        })
    }

    pub fn refutations(&self) -> &[UnitId] {
        &self.refutations
    }

    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Bumped on every mutation
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Number of entries ever stored, including removed ones
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of active units
    pub fn active_len(&self) -> usize {
        self.by_relation.values().map(Vec::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChcExpr, ChcSort};

    fn relations() -> Vec<Relation> {
        vec![Relation::new(RelationId::new(0), "R", vec![ChcSort::Int])]
    }

    fn unit_eq(rels: &[Relation], occurrence: usize, value: i64) -> UnitClause {
        UnitClause::new(
            UnitHead::Relation(rels[0].id),
            Polarity::Positive,
            occurrence,
            ChcExpr::eq(ChcExpr::var(rels[0].arg_var(occurrence, 0)), ChcExpr::int(value)),
        )
    }

    #[test]
    fn remove_keeps_provenance() {
        let rels = relations();
        let mut db = UnitDatabase::new(&rels);
        let a = db
            .insert(unit_eq(&rels, 0, 0), Provenance::Fact { clause: 0 })
            .unwrap();
        let b = db
            .insert(
                unit_eq(&rels, 1, 1),
                Provenance::Derived {
                    nucleus: 1,
                    electrons: vec![a],
                },
            )
            .unwrap();
        assert_eq!(db.unit_ids(rels[0].id), &[a, b]);
        let before = db.generation();

        db.remove(a).unwrap();
        assert!(!db.is_active(a));
        assert_eq!(db.unit_ids(rels[0].id), &[b]);
        assert_eq!(db.provenance(a), Some(&Provenance::Fact { clause: 0 }));
        assert!(db.generation() > before);
        assert_eq!(db.len(), 2);
        assert_eq!(db.active_len(), 1);
    }

    #[test]
    fn identical_units_match_across_occurrences() {
        let rels = relations();
        let mut db = UnitDatabase::new(&rels);
        db.insert(unit_eq(&rels, 0, 3), Provenance::Fact { clause: 0 })
            .unwrap();
        assert!(db.contains_identical(&unit_eq(&rels, 2, 3)));
        assert!(!db.contains_identical(&unit_eq(&rels, 2, 4)));
    }

    #[test]
    fn refutations_are_not_inserted() {
        let rels = relations();
        let mut db = UnitDatabase::new(&rels);
        let refutation =
            UnitClause::new(UnitHead::False, Polarity::Positive, 0, ChcExpr::Bool(true));
        assert!(db
            .insert(refutation.clone(), Provenance::Fact { clause: 0 })
            .is_err());
        let id = db
            .record_refutation(refutation, Provenance::Fact { clause: 0 })
            .unwrap();
        assert_eq!(db.refutations(), &[id]);
        assert_eq!(db.active_units().count(), 0);
    }
}
