//! The hyperresolution inference step
//!
//! Resolves a nucleus clause against one electron unit per body position:
//!
//! ```text
//!   nucleus:    H(h) :- B1(b1), ..., Bn(bn), phi
//!   electrons:  B1(a) :- c1,  ...,  Bn(a) :- cn
//!   ------------------------------------------------
//!   H(h) :- exists locals. phi /\ c1[b1/a] /\ ... /\ cn[bn/a]
//! ```
//!
//! Pure formula construction plus simplification; no oracle calls.

use crate::normalize::relation_at;
use crate::{
    ChcExpr, ChcVar, ConstraintSimplifier, HyresError, HyresResult, NormalizedClause,
    NormalizedHead, Polarity, Relation, SymbolFactory, UnitClause, UnitHead,
};
use rustc_hash::FxHashSet;

/// Instantiate electron `electron` for body position `position` of
/// `nucleus`. Returns the occurrence used and the instantiated constraint.
///
/// The electron is read at the position's occurrence unless that would make
/// its constraint mention a head argument instance, in which case the next
/// occurrence is used. Counterexample reconstruction goes through here too,
/// so both sides agree on the instance.
pub fn electron_instance(
    nucleus: &NormalizedClause,
    position: usize,
    electron: &UnitClause,
    relations: &[Relation],
    symbols: &mut SymbolFactory,
) -> HyresResult<(usize, ChcExpr)> {
    let atom = nucleus.body.get(position).ok_or_else(|| {
        HyresError::Internal(format!(
            "clause {} has no body position {position}",
            nucleus.index
        ))
    })?;
    if electron.relation() != Some(atom.relation) {
        return Err(HyresError::Internal(format!(
            "electron for position {position} of clause {} has the wrong relation",
            nucleus.index
        )));
    }
    let head_args: FxHashSet<ChcVar> = nucleus.head_arg_vars(relations)?.into_iter().collect();

    let instance = electron.instantiate(atom.occurrence, relations, symbols)?;
    if instance.vars().iter().any(|v| head_args.contains(v)) {
        let shifted = atom.occurrence + 1;
        return Ok((shifted, electron.instantiate(shifted, relations, symbols)?));
    }
    Ok((atom.occurrence, instance))
}

/// Project a unit's locals away and rename the survivors to fresh symbols
pub fn reduce_unit(
    unit: UnitClause,
    relations: &[Relation],
    simplifier: &dyn ConstraintSimplifier,
    symbols: &mut SymbolFactory,
) -> HyresResult<UnitClause> {
    let keep: FxHashSet<ChcVar> = unit.arg_vars(relations)?.into_iter().collect();
    let locals = unit.local_vars(relations)?;
    let simplified = simplifier.simplify(&unit.constraint, &locals, true, symbols);

    let renaming: Vec<(ChcVar, ChcExpr)> = simplified
        .vars()
        .into_iter()
        .filter(|v| !keep.contains(v))
        .map(|v| {
            let fresh = symbols.fresh("l", v.sort.clone());
            (v, ChcExpr::var(fresh))
        })
        .collect();

    Ok(UnitClause {
        constraint: simplified.substitute(&renaming),
        ..unit
    })
}

/// Resolve `nucleus` against `electrons`, one per body position.
///
/// The result is a positive unit headed by the nucleus head relation (or
/// `false`) at the head occurrence.
pub fn hyperresolve(
    nucleus: &NormalizedClause,
    electrons: &[&UnitClause],
    relations: &[Relation],
    simplifier: &dyn ConstraintSimplifier,
    symbols: &mut SymbolFactory,
) -> HyresResult<UnitClause> {
    if !symbols.is_initialized() {
        return Err(HyresError::Internal(
            "symbol factory used before initialization".into(),
        ));
    }
    if electrons.len() != nucleus.body.len() {
        return Err(HyresError::Internal(format!(
            "clause {} has {} body position(s) but {} electron(s) were given",
            nucleus.index,
            nucleus.body.len(),
            electrons.len()
        )));
    }

    let mut parts = Vec::with_capacity(electrons.len() + 1);
    parts.push(nucleus.constraint.clone());
    for (position, electron) in electrons.iter().enumerate() {
        let (_, instance) = electron_instance(nucleus, position, electron, relations, symbols)?;
        parts.push(instance);
    }

    let (head, occurrence) = match nucleus.head {
        NormalizedHead::Relation {
            relation,
            occurrence,
        } => {
            relation_at(relations, relation)?;
            (UnitHead::Relation(relation), occurrence)
        }
        NormalizedHead::False => (UnitHead::False, 0),
    };
    let unit = UnitClause::new(head, Polarity::Positive, occurrence, ChcExpr::and_all(parts));
    reduce_unit(unit, relations, simplifier, symbols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        normalize_problem, ChcProblem, ChcSort, ClauseBody, ClauseHead, EqualitySimplifier,
        HornClause,
    };

    fn counter() -> (crate::NormalizedProblem, SymbolFactory) {
        let mut problem = ChcProblem::new();
        let r = problem.declare_relation("R", vec![ChcSort::Int]);
        let x = ChcExpr::var(ChcVar::new("x", ChcSort::Int));
        problem.add_clause(HornClause::new(
            ClauseBody::constraint(ChcExpr::Bool(true)),
            ClauseHead::Predicate(r, vec![ChcExpr::int(0)]),
        ));
        problem.add_clause(HornClause::new(
            ClauseBody::new(vec![(r, vec![x.clone()])], None),
            ClauseHead::Predicate(r, vec![ChcExpr::add(x.clone(), ChcExpr::int(1))]),
        ));
        problem.add_clause(HornClause::new(
            ClauseBody::new(
                vec![(r, vec![x.clone()])],
                Some(ChcExpr::eq(x, ChcExpr::int(5))),
            ),
            ClauseHead::False,
        ));
        let normalized = normalize_problem(&problem).unwrap();
        let mut symbols = SymbolFactory::new();
        symbols.initialize(&normalized.relations, &normalized.max_occurrences());
        (normalized, symbols)
    }

    #[test]
    fn step_advances_counter() {
        let (p, mut symbols) = counter();
        let fact = UnitClause::from_normalized(&p.clauses[0]).unwrap();
        let fact = reduce_unit(fact, &p.relations, &EqualitySimplifier, &mut symbols).unwrap();
        assert_eq!(fact.constraint.to_string(), "(= R@0_0 0)");

        let next = hyperresolve(
            &p.clauses[1],
            &[&fact],
            &p.relations,
            &EqualitySimplifier,
            &mut symbols,
        )
        .unwrap();
        assert_eq!(next.occurrence, 1);
        assert_eq!(next.constraint.to_string(), "(= R@1_0 1)");
    }

    #[test]
    fn query_against_wrong_value_folds_to_false() {
        let (p, mut symbols) = counter();
        let fact = UnitClause::from_normalized(&p.clauses[0]).unwrap();
        let derived = hyperresolve(
            &p.clauses[2],
            &[&fact],
            &p.relations,
            &EqualitySimplifier,
            &mut symbols,
        )
        .unwrap();
        assert_eq!(derived.head, UnitHead::False);
        assert!(derived.is_refutation());
        assert!(derived.constraint.is_false());
    }

    #[test]
    fn uninitialized_symbols_are_rejected() {
        let (p, _) = counter();
        let fact = UnitClause::from_normalized(&p.clauses[0]).unwrap();
        let mut fresh = SymbolFactory::new();
        let err = hyperresolve(
            &p.clauses[1],
            &[&fact],
            &p.relations,
            &EqualitySimplifier,
            &mut fresh,
        )
        .unwrap_err();
        assert!(matches!(err, HyresError::Internal(_)));
    }

    #[test]
    fn electron_count_must_match_body() {
        let (p, mut symbols) = counter();
        assert!(hyperresolve(
            &p.clauses[1],
            &[],
            &p.relations,
            &EqualitySimplifier,
            &mut symbols
        )
        .is_err());
    }
}
