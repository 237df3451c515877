//! Conditional unit clauses
//!
//! A unit clause `R(args) :- constraint` states that the constraint is
//! sufficient for `R` to hold. The constraint mentions only the argument
//! instances of `R` at the unit's occurrence and local symbols, which are
//! read existentially. A unit with a `false` head (or negative polarity)
//! witnesses a refutation.

use crate::normalize::relation_at;
use crate::{
    ChcExpr, ChcVar, HyresError, HyresResult, NormalizedClause, NormalizedHead, Relation,
    RelationId, SymbolFactory,
};
use rustc_hash::FxHashSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitHead {
    Relation(RelationId),
    False,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Polarity {
    Positive,
    Negative,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct UnitClause {
    pub head: UnitHead,
    pub polarity: Polarity,
    /// Occurrence index the argument instances in `constraint` use
    pub occurrence: usize,
    pub constraint: ChcExpr,
}

impl UnitClause {
    pub fn new(head: UnitHead, polarity: Polarity, occurrence: usize, constraint: ChcExpr) -> Self {
        Self {
            head,
            polarity,
            occurrence,
            constraint,
        }
    }

    /// Build the unit clause of an empty-body normalized clause.
    ///
    /// Facts become positive units; an empty-body query becomes a negative
    /// `false` unit. Any other clause shape is a contract violation.
    pub fn from_normalized(clause: &NormalizedClause) -> HyresResult<Self> {
        if !clause.body.is_empty() {
            return Err(HyresError::NotUnitClause {
                clause: clause.index,
                reason: format!("body has {} relation occurrence(s)", clause.body.len()),
            });
        }
        Ok(match clause.head {
            NormalizedHead::Relation {
                relation,
                occurrence,
            } => Self::new(
                UnitHead::Relation(relation),
                Polarity::Positive,
                occurrence,
                clause.constraint.clone(),
            ),
            NormalizedHead::False => Self::new(
                UnitHead::False,
                Polarity::Negative,
                0,
                clause.constraint.clone(),
            ),
        })
    }

    pub fn relation(&self) -> Option<RelationId> {
        match self.head {
            UnitHead::Relation(id) => Some(id),
            UnitHead::False => None,
        }
    }

    pub fn is_refutation(&self) -> bool {
        self.head == UnitHead::False || self.polarity == Polarity::Negative
    }

    /// Argument instances of the head at this unit's occurrence
    pub fn arg_vars(&self, relations: &[Relation]) -> HyresResult<Vec<ChcVar>> {
        match self.head {
            UnitHead::Relation(id) => Ok(relation_at(relations, id)?.arg_vars(self.occurrence)),
            UnitHead::False => Ok(Vec::new()),
        }
    }

    /// Symbols of the constraint that are not this unit's own arguments
    pub fn local_vars(&self, relations: &[Relation]) -> HyresResult<Vec<ChcVar>> {
        let args: FxHashSet<ChcVar> = self.arg_vars(relations)?.into_iter().collect();
        Ok(self
            .constraint
            .vars()
            .into_iter()
            .filter(|v| !args.contains(v))
            .collect())
    }

    fn rename_args(&self, occurrence: usize, relations: &[Relation]) -> HyresResult<Vec<(ChcVar, ChcExpr)>> {
        let UnitHead::Relation(id) = self.head else {
            return Ok(Vec::new());
        };
        if occurrence == self.occurrence {
            return Ok(Vec::new());
        }
        let relation = relation_at(relations, id)?;
        Ok(relation
            .arg_vars(self.occurrence)
            .into_iter()
            .zip(relation.arg_vars(occurrence))
            .map(|(from, to)| (from, ChcExpr::var(to)))
            .collect())
    }

    /// The same unit with its arguments moved to `occurrence`. Locals keep
    /// their names.
    pub fn at_occurrence(&self, occurrence: usize, relations: &[Relation]) -> HyresResult<Self> {
        let subst = self.rename_args(occurrence, relations)?;
        Ok(Self {
            head: self.head,
            polarity: self.polarity,
            occurrence,
            constraint: self.constraint.substitute(&subst),
        })
    }

    /// Representative of the unit's alpha-equivalence class: arguments at
    /// occurrence 0 and locals renamed `!c0, !c1, ...` in order of first
    /// appearance. Two units are duplicates when their canonical forms are
    /// equal.
    pub fn canonical(&self, relations: &[Relation]) -> HyresResult<Self> {
        let at0 = self.at_occurrence(0, relations)?;
        let subst: Vec<(ChcVar, ChcExpr)> = at0
            .local_vars(relations)?
            .into_iter()
            .enumerate()
            .map(|(i, v)| {
                let renamed = ChcVar::new(format!("!c{i}"), v.sort.clone());
                (v, ChcExpr::var(renamed))
            })
            .collect();
        Ok(Self {
            constraint: at0.constraint.substitute(&subst),
            ..at0
        })
    }

    /// The constraint re-expressed at `occurrence` with every local renamed
    /// to a fresh symbol, so one unit can serve several body positions of
    /// one nucleus without its locals being identified.
    pub fn instantiate(
        &self,
        occurrence: usize,
        relations: &[Relation],
        symbols: &mut SymbolFactory,
    ) -> HyresResult<ChcExpr> {
        let mut subst = self.rename_args(occurrence, relations)?;
        for local in self.local_vars(relations)? {
            let fresh = symbols.fresh("l", local.sort.clone());
            subst.push((local, ChcExpr::var(fresh)));
        }
        Ok(self.constraint.substitute(&subst))
    }

    /// `Name(args) :- constraint`, with relation names resolved
    pub fn render(&self, relations: &[Relation]) -> String {
        let head = match self.head {
            UnitHead::Relation(id) => match relations.get(id.index()) {
                Some(r) => {
                    let args: Vec<String> = r
                        .arg_vars(self.occurrence)
                        .iter()
                        .map(|v| v.name.clone())
                        .collect();
                    format!("{}({})", r.name, args.join(", "))
                }
                None => id.to_string(),
            },
            UnitHead::False => "false".to_string(),
        };
        let sign = match self.polarity {
            Polarity::Positive => "",
            Polarity::Negative => "~",
        };
        format!("{sign}{head} :- {}", self.constraint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{normalize_problem, ChcProblem, ChcSort, ClauseBody, ClauseHead, HornClause};
    use rustc_hash::FxHashMap;

    fn relations() -> Vec<Relation> {
        vec![Relation::new(RelationId::new(0), "R", vec![ChcSort::Int])]
    }

    fn symbols(relations: &[Relation]) -> SymbolFactory {
        let mut s = SymbolFactory::new();
        s.initialize(relations, &FxHashMap::default());
        s
    }

    #[test]
    fn from_normalized_rejects_clause_with_body() {
        let mut problem = ChcProblem::new();
        let r = problem.declare_relation("R", vec![ChcSort::Int]);
        let x = ChcExpr::var(ChcVar::new("x", ChcSort::Int));
        problem.add_clause(HornClause::new(
            ClauseBody::new(vec![(r, vec![x.clone()])], None),
            ClauseHead::Predicate(r, vec![x]),
        ));
        let normalized = normalize_problem(&problem).unwrap();
        match UnitClause::from_normalized(&normalized.clauses[0]) {
            Err(HyresError::NotUnitClause { clause, .. }) => assert_eq!(clause, 0),
            other => panic!("expected NotUnitClause, got {other:?}"),
        }
    }

    #[test]
    fn empty_query_becomes_negative_refutation() {
        let mut problem = ChcProblem::new();
        problem.add_clause(HornClause::new(
            ClauseBody::constraint(ChcExpr::Bool(true)),
            ClauseHead::False,
        ));
        let normalized = normalize_problem(&problem).unwrap();
        let unit = UnitClause::from_normalized(&normalized.clauses[0]).unwrap();
        assert_eq!(unit.polarity, Polarity::Negative);
        assert!(unit.is_refutation());
    }

    #[test]
    fn instantiate_renames_args_and_freshens_locals() {
        let rels = relations();
        let mut syms = symbols(&rels);
        let a0 = rels[0].arg_var(0, 0);
        let y = ChcVar::new("l!99", ChcSort::Int);
        // R@0_0 = y + 1 /\ y >= 0
        let unit = UnitClause::new(
            UnitHead::Relation(rels[0].id),
            Polarity::Positive,
            0,
            ChcExpr::and(
                ChcExpr::eq(
                    ChcExpr::var(a0.clone()),
                    ChcExpr::add(ChcExpr::var(y.clone()), ChcExpr::int(1)),
                ),
                ChcExpr::ge(ChcExpr::var(y.clone()), ChcExpr::int(0)),
            ),
        );
        assert_eq!(unit.local_vars(&rels).unwrap(), vec![y.clone()]);

        let first = unit.instantiate(2, &rels, &mut syms).unwrap();
        let second = unit.instantiate(2, &rels, &mut syms).unwrap();
        assert!(first.contains_var(&rels[0].arg_var(2, 0)));
        assert!(!first.contains_var(&a0));
        assert!(!first.contains_var(&y));
        assert_ne!(first, second);

        let moved = unit.at_occurrence(2, &rels).unwrap();
        assert_eq!(moved.occurrence, 2);
        assert!(moved.constraint.contains_var(&y));
        assert_eq!(moved.at_occurrence(0, &rels).unwrap(), unit);
    }

    #[test]
    fn alpha_equivalent_units_share_a_canonical_form() {
        let rels = relations();
        let twice = |occurrence: usize, local: &str| {
            UnitClause::new(
                UnitHead::Relation(rels[0].id),
                Polarity::Positive,
                occurrence,
                ChcExpr::eq(
                    ChcExpr::var(rels[0].arg_var(occurrence, 0)),
                    ChcExpr::mul(
                        ChcExpr::int(2),
                        ChcExpr::var(ChcVar::new(local, ChcSort::Int)),
                    ),
                ),
            )
        };
        let a = twice(0, "l!0").canonical(&rels).unwrap();
        let b = twice(1, "l!2").canonical(&rels).unwrap();
        assert_eq!(a, b);
        assert_eq!(a.constraint.to_string(), "(= R@0_0 (* 2 !c0))");
        assert_ne!(a, twice(0, "l!0"));
    }
}
