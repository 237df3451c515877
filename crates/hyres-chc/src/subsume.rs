//! Subsumption between unit clauses of the same relation

use crate::{
    ChcExpr, DecisionOracle, Relation, UnitClause, UnitDatabase, UnitId, Validity,
};
use tracing::debug;

/// Decides redundancy of a candidate unit against the database
pub trait SubsumptionChecker {
    /// Does some stored unit make `candidate` redundant?
    fn forward(
        &mut self,
        candidate: &UnitClause,
        db: &UnitDatabase,
        relations: &[Relation],
        oracle: &mut dyn DecisionOracle,
    ) -> bool;

    /// Stored units `candidate` makes redundant
    fn backward(
        &mut self,
        candidate: &UnitClause,
        db: &UnitDatabase,
        relations: &[Relation],
        oracle: &mut dyn DecisionOracle,
    ) -> Vec<UnitId>;

    fn on_inserted(&mut self, _id: UnitId, _unit: &UnitClause) {}

    fn on_removed(&mut self, _id: UnitId) {}
}

/// `A` subsumes `B` when `B`'s constraint implies `A`'s, both read at
/// occurrence 0.
///
/// A subsuming unit must have no local symbols, since the implication would
/// otherwise need a quantifier alternation. Syntactically identical units
/// always subsume each other. An inconclusive oracle answer never subsumes.
#[derive(Debug, Clone, Default)]
pub struct ImplicationSubsumption {
    checks: u64,
}

impl ImplicationSubsumption {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of validity queries issued
    pub fn checks(&self) -> u64 {
        self.checks
    }

    fn implies(
        &mut self,
        premise: &ChcExpr,
        conclusion: &ChcExpr,
        oracle: &mut dyn DecisionOracle,
    ) -> bool {
        self.checks += 1;
        let formula = ChcExpr::implies(premise.clone(), conclusion.clone());
        oracle.check_valid(&formula) == Validity::Valid
    }
}

/// Canonical form of the unit plus whether it has locals
fn aligned(unit: &UnitClause, relations: &[Relation]) -> Option<(UnitClause, bool)> {
    let canonical = unit.canonical(relations).ok()?;
    let has_locals = !canonical.local_vars(relations).ok()?.is_empty();
    Some((canonical, has_locals))
}

impl SubsumptionChecker for ImplicationSubsumption {
    fn forward(
        &mut self,
        candidate: &UnitClause,
        db: &UnitDatabase,
        relations: &[Relation],
        oracle: &mut dyn DecisionOracle,
    ) -> bool {
        let Some(relation) = candidate.relation() else {
            return false;
        };
        let Some((cand, _)) = aligned(candidate, relations) else {
            return false;
        };
        for (id, stored) in db.units_of(relation) {
            let Some((stored, stored_locals)) = aligned(stored, relations) else {
                continue;
            };
            if stored.constraint == cand.constraint {
                debug!(by = %id, "forward subsumed (identical)");
                return true;
            }
            if !stored_locals && self.implies(&cand.constraint, &stored.constraint, oracle) {
                debug!(by = %id, "forward subsumed");
                return true;
            }
        }
        false
    }

    fn backward(
        &mut self,
        candidate: &UnitClause,
        db: &UnitDatabase,
        relations: &[Relation],
        oracle: &mut dyn DecisionOracle,
    ) -> Vec<UnitId> {
        let Some(relation) = candidate.relation() else {
            return Vec::new();
        };
        let Some((cand, cand_locals)) = aligned(candidate, relations) else {
            return Vec::new();
        };
        let mut removed = Vec::new();
        for (id, stored) in db.units_of(relation) {
            let Some((stored, _)) = aligned(stored, relations) else {
                continue;
            };
            if stored.constraint == cand.constraint
                || (!cand_locals && self.implies(&stored.constraint, &cand.constraint, oracle))
            {
                removed.push(id);
            }
        }
        if !removed.is_empty() {
            debug!(count = removed.len(), "backward subsumed");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ChcSort, ChcVar, FiniteDomainOracle, Polarity, Provenance, RelationId, UnitHead};

    fn setup() -> (Vec<Relation>, UnitDatabase, FiniteDomainOracle) {
        let rels = vec![Relation::new(RelationId::new(0), "R", vec![ChcSort::Int])];
        let db = UnitDatabase::new(&rels);
        (rels, db, FiniteDomainOracle::new(0, 5))
    }

    fn unit(rels: &[Relation], occurrence: usize, f: impl Fn(ChcExpr) -> ChcExpr) -> UnitClause {
        UnitClause::new(
            UnitHead::Relation(rels[0].id),
            Polarity::Positive,
            occurrence,
            f(ChcExpr::var(rels[0].arg_var(occurrence, 0))),
        )
    }

    #[test]
    fn weaker_stored_unit_subsumes_forward() {
        let (rels, mut db, mut oracle) = setup();
        let general = unit(&rels, 0, |a| ChcExpr::ge(a, ChcExpr::int(0)));
        db.insert(general, Provenance::Fact { clause: 0 }).unwrap();

        let mut checker = ImplicationSubsumption::new();
        let specific = unit(&rels, 1, |a| ChcExpr::eq(a, ChcExpr::int(3)));
        assert!(checker.forward(&specific, &db, &rels, &mut oracle));
        assert!(checker
            .backward(&specific, &db, &rels, &mut oracle)
            .is_empty());
        assert_eq!(oracle.depth(), 0);
    }

    #[test]
    fn stronger_candidate_removes_backward() {
        let (rels, mut db, mut oracle) = setup();
        let specific = unit(&rels, 0, |a| ChcExpr::eq(a, ChcExpr::int(3)));
        let id = db.insert(specific, Provenance::Fact { clause: 0 }).unwrap();

        let mut checker = ImplicationSubsumption::new();
        let general = unit(&rels, 0, |a| ChcExpr::le(ChcExpr::int(0), a));
        assert!(!checker.forward(&general, &db, &rels, &mut oracle));
        assert_eq!(checker.backward(&general, &db, &rels, &mut oracle), vec![id]);
    }

    #[test]
    fn unit_with_locals_does_not_subsume() {
        let (rels, mut db, mut oracle) = setup();
        let local = ChcVar::new("l!0", ChcSort::Int);
        // R(a) :- a = l /\ l >= 0
        let with_local = unit(&rels, 0, |a| {
            ChcExpr::and(
                ChcExpr::eq(a, ChcExpr::var(local.clone())),
                ChcExpr::ge(ChcExpr::var(local.clone()), ChcExpr::int(0)),
            )
        });
        db.insert(with_local, Provenance::Fact { clause: 0 })
            .unwrap();
        let mut checker = ImplicationSubsumption::new();
        let specific = unit(&rels, 0, |a| ChcExpr::eq(a, ChcExpr::int(1)));
        assert!(!checker.forward(&specific, &db, &rels, &mut oracle));
        assert_eq!(checker.checks(), 0);
    }

    #[test]
    fn renamed_locals_are_still_identical() {
        let (rels, mut db, mut oracle) = setup();
        let even = |occurrence: usize, local: &str| {
            let l = ChcExpr::var(ChcVar::new(local, ChcSort::Int));
            unit(&rels, occurrence, move |a| {
                ChcExpr::eq(a, ChcExpr::mul(ChcExpr::int(2), l.clone()))
            })
        };
        let id = db
            .insert(even(0, "l!0"), Provenance::Fact { clause: 0 })
            .unwrap();
        assert!(db.contains_identical(&even(1, "l!2")));

        let mut checker = ImplicationSubsumption::new();
        assert!(checker.forward(&even(1, "l!2"), &db, &rels, &mut oracle));
        assert_eq!(
            checker.backward(&even(1, "l!5"), &db, &rels, &mut oracle),
            vec![id]
        );
        assert_eq!(checker.checks(), 0);
    }
}
