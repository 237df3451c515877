//! CHC (Constrained Horn Clause) solver using hyperresolution
//!
//! This crate decides satisfiability of a set of Constrained Horn Clauses by
//! forward saturation: unit clauses (facts about one relation, guarded by a
//! constraint) are resolved against the bodies of nonlinear clauses until
//! either `false` is derived or no new information appears.
//!
//! # Example CHC Problem
//!
//! ```text
//! ; 1. x = 0 => R(x)               (fact)
//! ; 2. R(x) /\ x < 3 => R(x+1)     (transition)
//! ; 3. R(x) /\ x = 3 => false      (query - unsat, R(3) is reachable)
//! ```
//!
//! # Architecture
//!
//! - `ChcParser`: SMT-LIB (`declare-rel`/`rule`/`query` and `assert` style) front end
//! - `normalize_problem`: occurrence-indexed argument variables per clause
//! - `UnitDatabase`: derived units with provenance
//! - `HyperResolutionEngine`: the saturation loop
//! - `DecisionOracle`: constraint satisfiability, `FiniteDomainOracle` built in
//! - `Solution` / `Counterexample`: the two kinds of answer

mod cex;
mod classify;
mod clause;
mod database;
mod engine;
mod error;
mod expr;
mod hyperres;
mod normalize;
mod oracle;
mod parser;
mod problem;
mod relation;
mod simplify;
mod solution;
mod strategy;
mod subsume;
mod symbols;
mod unit;

pub use cex::{
    build_counterexample, verify_counterexample, Counterexample, DerivationNode, GroundAtom,
};
pub use classify::{classify, constraint_is_false, has_contradiction, Classification};
pub use clause::{ClauseBody, ClauseHead, HornClause};
pub use database::{Provenance, StoredUnit, UnitDatabase, UnitId};
pub use engine::{
    CancellationToken, EngineConfig, EngineHooks, EngineStats, HyperResolutionEngine,
    SolveResult, TraceEvent,
};
pub use error::{HyresError, HyresResult};
pub use expr::{ChcExpr, ChcOp, ChcSort, ChcVar, SmtValue};
pub use hyperres::{electron_instance, hyperresolve, reduce_unit};
pub use normalize::{
    normalize_problem, BodyAtom, ClauseVocabulary, NormalizedClause, NormalizedHead,
    NormalizedProblem, Normalizer, OccurrenceNormalizer, Theory,
};
pub use oracle::{
    DecisionOracle, FiniteDomainOracle, OracleScope, SatResult, Validity, DEFAULT_MAX_ASSIGNMENTS,
};
pub use parser::ChcParser;
pub use problem::ChcProblem;
pub use relation::{Relation, RelationId};
pub use simplify::{ConstraintSimplifier, EqualitySimplifier};
pub use solution::{
    build_solution, check_solution_clauses, verify_solution, RelationInterpretation, Solution,
};
pub use strategy::{Candidate, LevelSaturation, SearchStrategy, StrategyStep};
pub use subsume::{ImplicationSubsumption, SubsumptionChecker};
pub use symbols::SymbolFactory;
pub use unit::{Polarity, UnitClause, UnitHead};

/// Parse, normalize and solve `input` over the integer domain `[min, max]`.
///
/// Returns the normalized problem alongside the answer so relation names can
/// be resolved when printing.
pub fn solve_str(
    input: &str,
    min: i64,
    max: i64,
    config: EngineConfig,
) -> HyresResult<(NormalizedProblem, SolveResult)> {
    let problem = ChcParser::parse(input)?;
    let normalized = normalize_problem(&problem)?;
    let mut oracle = FiniteDomainOracle::new(min, max);
    let mut symbols = SymbolFactory::new();
    let mut engine = HyperResolutionEngine::new(normalized, config);
    let result = engine.solve(&mut oracle, &mut symbols)?;
    Ok((engine.problem().clone(), result))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_problem_construction() {
        let mut problem = ChcProblem::new();

        // Declare R : Int -> Bool
        let r = problem.declare_relation("R", vec![ChcSort::Int]);
        assert_eq!(problem.relations().len(), 1);

        // x = 0 => R(x)
        let x = ChcVar::new("x", ChcSort::Int);
        problem.add_clause(HornClause::new(
            ClauseBody::constraint(ChcExpr::eq(ChcExpr::var(x.clone()), ChcExpr::int(0))),
            ClauseHead::Predicate(r, vec![ChcExpr::var(x.clone())]),
        ));

        // R(x) /\ x < 3 => R(x + 1)
        problem.add_clause(HornClause::new(
            ClauseBody::new(
                vec![(r, vec![ChcExpr::var(x.clone())])],
                Some(ChcExpr::lt(ChcExpr::var(x.clone()), ChcExpr::int(3))),
            ),
            ClauseHead::Predicate(r, vec![ChcExpr::add(ChcExpr::var(x.clone()), ChcExpr::int(1))]),
        ));

        // R(x) /\ x = 3 => false
        problem.add_clause(HornClause::new(
            ClauseBody::new(
                vec![(r, vec![ChcExpr::var(x.clone())])],
                Some(ChcExpr::eq(ChcExpr::var(x), ChcExpr::int(3))),
            ),
            ClauseHead::False,
        ));

        assert_eq!(problem.clauses().len(), 3);
        assert_eq!(problem.queries().count(), 1);
        assert_eq!(problem.facts().count(), 1);
        assert_eq!(problem.transitions().count(), 1);
        assert!(problem.validate().is_ok());

        let normalized = normalize_problem(&problem).unwrap();
        let mut engine = HyperResolutionEngine::new(normalized, EngineConfig::default());
        let mut oracle = FiniteDomainOracle::new(0, 5);
        let mut symbols = SymbolFactory::new();
        let result = engine.solve(&mut oracle, &mut symbols).unwrap();
        assert!(matches!(result, SolveResult::Unsat(_)));
    }

    #[test]
    fn test_solve_str_sat() {
        let input = r#"
            (set-logic HORN)
            (declare-fun Inv (Int) Bool)
            (assert (forall ((x Int)) (=> (= x 0) (Inv x))))
            (assert (forall ((x Int)) (=> (and (Inv x) (< x 2)) (Inv (+ x 1)))))
            (assert (forall ((x Int)) (=> (and (Inv x) (> x 2)) false)))
            (check-sat)
        "#;
        let (problem, result) = solve_str(input, 0, 4, EngineConfig::default()).unwrap();
        let SolveResult::Sat(solution) = result else {
            panic!("expected sat");
        };
        assert_eq!(solution.len(), problem.relations.len());
        assert!(solution.to_smtlib(&problem.relations).contains("define-fun Inv"));
    }
}
