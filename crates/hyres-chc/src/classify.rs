//! Classification of freshly derived units

use crate::{
    ChcExpr, DecisionOracle, OracleScope, Relation, SatResult, SubsumptionChecker, UnitClause,
    UnitDatabase, UnitId,
};
use tracing::{debug, warn};

/// What to do with a derived unit
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// A satisfiable refutation: the problem is unsatisfiable
    Contradiction,
    /// The constraint is unsatisfiable; discard
    Infeasible,
    /// A stored unit already covers it (or an identical one is stored)
    ForwardSubsumed,
    /// Store it after removing the units it subsumes
    New { removed: Vec<UnitId> },
}

/// Does `unit` witness a refutation?
///
/// True when the unit is a refutation and its constraint is satisfiable. An
/// inconclusive answer counts as a contradiction.
pub fn has_contradiction(unit: &UnitClause, oracle: &mut dyn DecisionOracle) -> bool {
    if !unit.is_refutation() {
        return false;
    }
    let mut scope = OracleScope::new(oracle);
    scope.assert(&unit.constraint);
    match scope.check_sat() {
        SatResult::Sat => true,
        SatResult::Unsat => false,
        SatResult::Unknown => {
            warn!(
                constraint = %scope.present(&unit.constraint),
                "oracle inconclusive on refutation, reporting contradiction"
            );
            true
        }
    }
}

/// Is `constraint` unsatisfiable?
///
/// An inconclusive answer counts as satisfiable, so the search continues.
pub fn constraint_is_false(constraint: &ChcExpr, oracle: &mut dyn DecisionOracle) -> bool {
    if constraint.is_false() {
        return true;
    }
    let mut scope = OracleScope::new(oracle);
    scope.assert(constraint);
    match scope.check_sat() {
        SatResult::Unsat => true,
        SatResult::Sat => false,
        SatResult::Unknown => {
            warn!(
                constraint = %scope.present(constraint),
                "oracle inconclusive on feasibility, keeping unit"
            );
            false
        }
    }
}

/// Classify `unit` against the database.
///
/// Checks run in order: contradiction, infeasibility, duplicate, forward
/// subsumption, backward subsumption. Backward-subsumed ids are returned,
/// not removed.
pub fn classify(
    unit: &UnitClause,
    db: &UnitDatabase,
    relations: &[Relation],
    subsumption: &mut dyn SubsumptionChecker,
    oracle: &mut dyn DecisionOracle,
) -> Classification {
    if unit.is_refutation() {
        return if has_contradiction(unit, oracle) {
            debug!("contradiction");
            Classification::Contradiction
        } else {
            debug!("infeasible refutation");
            Classification::Infeasible
        };
    }
    if constraint_is_false(&unit.constraint, oracle) {
        debug!("infeasible");
        return Classification::Infeasible;
    }
    if db.contains_identical(unit) {
        debug!("duplicate");
        return Classification::ForwardSubsumed;
    }
    if subsumption.forward(unit, db, relations, oracle) {
        return Classification::ForwardSubsumed;
    }
    let removed = subsumption.backward(unit, db, relations, oracle);
    Classification::New { removed }
}
