//! Solution construction: one formula per relation from the stored units

use crate::{
    ChcExpr, ChcProblem, ChcVar, ClauseHead, ConstraintSimplifier, DecisionOracle, HyresError,
    HyresResult, NormalizedClause, NormalizedHead, Relation, RelationId, SmtValue, SymbolFactory,
    UnitDatabase, Validity,
};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Interpretation of a relation: `formula` over positional variables
/// `x0, x1, ...`, with `existentials` read as existentially quantified.
#[derive(Debug, Clone, PartialEq)]
pub struct RelationInterpretation {
    pub vars: Vec<ChcVar>,
    pub existentials: Vec<ChcVar>,
    pub formula: ChcExpr,
}

impl RelationInterpretation {
    pub fn new(vars: Vec<ChcVar>, existentials: Vec<ChcVar>, formula: ChcExpr) -> Self {
        Self {
            vars,
            existentials,
            formula,
        }
    }

    /// Evaluate at concrete arguments. `None` if the formula has
    /// existentials or is undefined at these values.
    pub fn eval(&self, args: &[SmtValue]) -> Option<bool> {
        if !self.existentials.is_empty() || args.len() != self.vars.len() {
            return None;
        }
        let assignment: FxHashMap<String, SmtValue> = self
            .vars
            .iter()
            .zip(args)
            .map(|(v, a)| (v.name.clone(), *a))
            .collect();
        self.formula.eval(&assignment)?.as_bool()
    }

    /// The formula applied to `args`, existentials renamed apart with `tag`
    pub fn apply(&self, args: &[ChcExpr], tag: &str) -> ChcExpr {
        let mut subst: Vec<(ChcVar, ChcExpr)> = self
            .vars
            .iter()
            .cloned()
            .zip(args.iter().cloned())
            .collect();
        for e in &self.existentials {
            let renamed = ChcVar::new(format!("{}!{tag}", e.name), e.sort.clone());
            subst.push((e.clone(), ChcExpr::var(renamed)));
        }
        self.formula.substitute(&subst)
    }
}

/// Interpretation of every non-`false` relation
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Solution {
    pub interpretations: BTreeMap<RelationId, RelationInterpretation>,
}

impl Solution {
    pub fn get(&self, relation: RelationId) -> Option<&RelationInterpretation> {
        self.interpretations.get(&relation)
    }

    pub fn len(&self) -> usize {
        self.interpretations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.interpretations.is_empty()
    }

    /// Print as SMT-LIB `define-fun`s
    ///
    /// Example output:
    /// ```text
    /// (define-fun Inv ((x0 Int)) Bool
    ///   (and (<= 0 x0) (<= x0 10)))
    /// ```
    pub fn to_smtlib(&self, relations: &[Relation]) -> String {
        let mut output = String::new();
        output.push_str("; CHC solution (hyperresolution)\n\n");

        for (id, interp) in &self.interpretations {
            let name = relations
                .get(id.index())
                .map(|r| r.name.as_str())
                .unwrap_or("unknown");
            output.push_str(&format!("(define-fun {name} ("));
            let params: Vec<String> = interp
                .vars
                .iter()
                .map(|v| format!("({} {})", v.name, v.sort))
                .collect();
            output.push_str(&params.join(" "));
            output.push_str(") Bool\n  ");
            if interp.existentials.is_empty() {
                output.push_str(&interp.formula.to_string());
            } else {
                let bound: Vec<String> = interp
                    .existentials
                    .iter()
                    .map(|v| format!("({} {})", v.name, v.sort))
                    .collect();
                output.push_str(&format!("(exists ({}) {})", bound.join(" "), interp.formula));
            }
            output.push_str(")\n\n");
        }

        output
    }
}

/// Disjoin each relation's stored units, reduce, and rename to positional
/// variables `x{i}` and existentials `e{k}`.
pub fn build_solution(
    db: &UnitDatabase,
    relations: &[Relation],
    simplifier: &dyn ConstraintSimplifier,
    symbols: &SymbolFactory,
) -> HyresResult<Solution> {
    let mut solution = Solution::default();
    for relation in relations {
        let disjuncts = db
            .units_of(relation.id)
            .map(|(_, unit)| unit.at_occurrence(0, relations).map(|u| u.constraint))
            .collect::<HyresResult<Vec<_>>>()?;
        let count = disjuncts.len();
        let reduced = simplifier.simplify(&ChcExpr::or_all(disjuncts), &[], true, symbols);

        let args = relation.arg_vars(0);
        let vars: Vec<ChcVar> = relation
            .arg_sorts
            .iter()
            .enumerate()
            .map(|(i, sort)| ChcVar::new(format!("x{i}"), sort.clone()))
            .collect();
        let arg_set: FxHashSet<&ChcVar> = args.iter().collect();
        let mut locals: Vec<ChcVar> = reduced
            .vars()
            .into_iter()
            .filter(|v| !arg_set.contains(v))
            .collect();
        symbols.sort_canonical(&mut locals);
        let existentials: Vec<ChcVar> = locals
            .iter()
            .enumerate()
            .map(|(k, v)| ChcVar::new(format!("e{k}"), v.sort.clone()))
            .collect();

        let subst: Vec<(ChcVar, ChcExpr)> = args
            .into_iter()
            .zip(vars.iter().cloned().map(ChcExpr::var))
            .chain(
                locals
                    .into_iter()
                    .zip(existentials.iter().cloned().map(ChcExpr::var)),
            )
            .collect();
        let formula = reduced.substitute(&subst);
        debug!(relation = %relation.name, units = count, formula = %formula, "interpretation");
        solution.interpretations.insert(
            relation.id,
            RelationInterpretation::new(vars, existentials, formula),
        );
    }
    Ok(solution)
}

/// Check every clause of `problem` under `solution`.
///
/// Clauses whose head interpretation carries existentials are skipped.
/// `Ok(false)` if some clause is not valid or the oracle is inconclusive.
pub fn verify_solution(
    solution: &Solution,
    problem: &ChcProblem,
    oracle: &mut dyn DecisionOracle,
) -> HyresResult<bool> {
    let lookup = |id: RelationId| {
        solution
            .get(id)
            .ok_or_else(|| HyresError::UndefinedRelation(id.to_string()))
    };
    for (ci, clause) in problem.clauses().iter().enumerate() {
        let mut body = vec![clause.body.constraint_or_true()];
        for (k, (id, args)) in clause.body.relations.iter().enumerate() {
            body.push(lookup(*id)?.apply(args, &format!("{ci}_{k}")));
        }
        let head = match &clause.head {
            ClauseHead::Predicate(id, args) => {
                let interp = lookup(*id)?;
                if !interp.existentials.is_empty() {
                    debug!(clause = ci, "skipping clause with existential head");
                    continue;
                }
                interp.apply(args, "h")
            }
            ClauseHead::False => ChcExpr::Bool(false),
        };
        let formula = ChcExpr::implies(ChcExpr::and_all(body), head);
        match oracle.check_valid(&formula) {
            Validity::Valid => {}
            Validity::Invalid => {
                debug!(clause = ci, "solution violates clause");
                return Ok(false);
            }
            Validity::Unknown => {
                warn!(clause = ci, "oracle inconclusive while verifying solution");
                return Ok(false);
            }
        }
    }
    Ok(true)
}

/// Check every normalized clause under `solution`, the form the engine
/// works in.
///
/// Same contract as [`verify_solution`]: existential heads are skipped and
/// an inconclusive oracle gives `Ok(false)`.
pub fn check_solution_clauses(
    solution: &Solution,
    clauses: &[NormalizedClause],
    relations: &[Relation],
    oracle: &mut dyn DecisionOracle,
) -> HyresResult<bool> {
    let lookup = |id: RelationId| {
        solution
            .get(id)
            .ok_or_else(|| HyresError::UndefinedRelation(id.to_string()))
    };
    let as_exprs = |vars: Vec<ChcVar>| vars.into_iter().map(ChcExpr::var).collect::<Vec<_>>();

    for clause in clauses {
        let head = match clause.head {
            NormalizedHead::Relation { relation, .. } => {
                let interp = lookup(relation)?;
                if !interp.existentials.is_empty() {
                    debug!(clause = clause.index, "skipping clause with existential head");
                    continue;
                }
                interp.apply(&as_exprs(clause.head_arg_vars(relations)?), "h")
            }
            NormalizedHead::False => ChcExpr::Bool(false),
        };
        let mut body = vec![clause.constraint.clone()];
        for (pos, atom) in clause.body.iter().enumerate() {
            let args = as_exprs(clause.body_arg_vars(pos, relations)?);
            body.push(lookup(atom.relation)?.apply(&args, &format!("b{pos}")));
        }
        let formula = ChcExpr::implies(ChcExpr::and_all(body), head);
        match oracle.check_valid(&formula) {
            Validity::Valid => {}
            Validity::Invalid => {
                debug!(clause = clause.index, "solution violates clause");
                return Ok(false);
            }
            Validity::Unknown => {
                debug!(clause = clause.index, "oracle inconclusive while checking solution");
                return Ok(false);
            }
        }
    }
    Ok(true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        ChcSort, ClauseBody, EqualitySimplifier, FiniteDomainOracle, HornClause, Polarity,
        Provenance, UnitClause, UnitHead,
    };

    #[test]
    fn disjunction_of_units_is_renamed_positionally() {
        let rels = vec![Relation::new(RelationId::new(0), "R", vec![ChcSort::Int])];
        let mut symbols = SymbolFactory::new();
        symbols.initialize(&rels, &FxHashMap::default());
        let mut db = UnitDatabase::new(&rels);
        for (occ, v) in [(0, 0), (1, 2)] {
            let unit = UnitClause::new(
                UnitHead::Relation(rels[0].id),
                Polarity::Positive,
                occ,
                ChcExpr::eq(ChcExpr::var(rels[0].arg_var(occ, 0)), ChcExpr::int(v)),
            );
            db.insert(unit, Provenance::Fact { clause: 0 }).unwrap();
        }
        let solution = build_solution(&db, &rels, &EqualitySimplifier, &symbols).unwrap();
        let interp = solution.get(rels[0].id).unwrap();
        assert_eq!(interp.formula.to_string(), "(or (= x0 0) (= x0 2))");
        assert_eq!(interp.eval(&[SmtValue::Int(2)]), Some(true));
        assert_eq!(interp.eval(&[SmtValue::Int(1)]), Some(false));
        assert!(solution.to_smtlib(&rels).contains("(define-fun R ((x0 Int)) Bool"));
    }

    #[test]
    fn locals_become_existentials() {
        let rels = vec![Relation::new(RelationId::new(0), "R", vec![ChcSort::Int])];
        let mut symbols = SymbolFactory::new();
        symbols.initialize(&rels, &FxHashMap::default());
        let mut db = UnitDatabase::new(&rels);
        let l = ChcVar::new("l!7", ChcSort::Int);
        let unit = UnitClause::new(
            UnitHead::Relation(rels[0].id),
            Polarity::Positive,
            0,
            ChcExpr::eq(
                ChcExpr::var(rels[0].arg_var(0, 0)),
                ChcExpr::mul(ChcExpr::int(2), ChcExpr::var(l)),
            ),
        );
        db.insert(unit, Provenance::Fact { clause: 0 }).unwrap();
        let solution = build_solution(&db, &rels, &EqualitySimplifier, &symbols).unwrap();
        let interp = solution.get(rels[0].id).unwrap();
        assert_eq!(interp.existentials, vec![ChcVar::new("e0", ChcSort::Int)]);
        assert_eq!(interp.formula.to_string(), "(= x0 (* 2 e0))");
        assert!(solution.to_smtlib(&rels).contains("(exists ((e0 Int))"));
        assert_eq!(interp.eval(&[SmtValue::Int(4)]), None);
    }

    #[test]
    fn relation_without_units_is_false() {
        let mut problem = ChcProblem::new();
        let r = problem.declare_relation("R", vec![ChcSort::Int]);
        let x = ChcExpr::var(ChcVar::new("x", ChcSort::Int));
        problem.add_clause(HornClause::new(
            ClauseBody::new(vec![(r, vec![x])], None),
            ClauseHead::False,
        ));
        let rels = problem.relations().to_vec();
        let mut symbols = SymbolFactory::new();
        symbols.initialize(&rels, &FxHashMap::default());
        let db = UnitDatabase::new(&rels);
        let solution = build_solution(&db, &rels, &EqualitySimplifier, &symbols).unwrap();
        assert!(solution.get(r).unwrap().formula.is_false());

        let mut oracle = FiniteDomainOracle::new(0, 3);
        assert!(verify_solution(&solution, &problem, &mut oracle).unwrap());
    }

    #[test]
    fn insertion_order_does_not_change_the_model() {
        let rels = vec![Relation::new(RelationId::new(0), "R", vec![ChcSort::Int])];
        let mut symbols = SymbolFactory::new();
        symbols.initialize(&rels, &FxHashMap::default());
        let small = |occ: usize| {
            let a = ChcExpr::var(rels[0].arg_var(occ, 0));
            UnitClause::new(
                UnitHead::Relation(rels[0].id),
                Polarity::Positive,
                occ,
                ChcExpr::le(a, ChcExpr::int(1)),
            )
        };
        let three = |occ: usize| {
            let a = ChcExpr::var(rels[0].arg_var(occ, 0));
            UnitClause::new(
                UnitHead::Relation(rels[0].id),
                Polarity::Positive,
                occ,
                ChcExpr::eq(a, ChcExpr::int(3)),
            )
        };

        let mut first = UnitDatabase::new(&rels);
        first.insert(small(0), Provenance::Fact { clause: 0 }).unwrap();
        first.insert(three(1), Provenance::Fact { clause: 1 }).unwrap();
        let mut second = UnitDatabase::new(&rels);
        second.insert(three(2), Provenance::Fact { clause: 1 }).unwrap();
        second.insert(small(0), Provenance::Fact { clause: 0 }).unwrap();

        let a = build_solution(&first, &rels, &EqualitySimplifier, &symbols).unwrap();
        let b = build_solution(&second, &rels, &EqualitySimplifier, &symbols).unwrap();
        let fa = a.get(rels[0].id).unwrap().formula.clone();
        let fb = b.get(rels[0].id).unwrap().formula.clone();
        let same = ChcExpr::and(
            ChcExpr::implies(fa.clone(), fb.clone()),
            ChcExpr::implies(fb, fa.clone()),
        );
        let mut oracle = FiniteDomainOracle::new(-2, 5);
        assert_eq!(oracle.check_valid(&same), Validity::Valid);

        let x0 = ChcExpr::var(ChcVar::new("x0", ChcSort::Int));
        let expected = ChcExpr::or(
            ChcExpr::le(x0.clone(), ChcExpr::int(1)),
            ChcExpr::eq(x0, ChcExpr::int(3)),
        );
        let same = ChcExpr::and(
            ChcExpr::implies(fa.clone(), expected.clone()),
            ChcExpr::implies(expected, fa),
        );
        assert_eq!(oracle.check_valid(&same), Validity::Valid);
        assert_eq!(oracle.depth(), 0);
    }
}
