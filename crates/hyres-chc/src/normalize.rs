//! Per-occurrence clause normalization
//!
//! A normalized clause replaces every relation application by a pair
//! (relation, occurrence index) and moves the argument expressions into the
//! constraint as equalities over argument instance symbols:
//!
//! ```text
//! Inv(x) /\ x < 10 => Inv(x + 1)
//!   body: [(Inv, 0)]   head: (Inv, 1)
//!   constraint: Inv@0_0 = x /\ Inv@1_0 = x + 1 /\ x < 10
//! ```

use crate::{
    ChcExpr, ChcOp, ChcProblem, ChcSort, ClauseHead, HornClause, HyresError, HyresResult,
    Relation, RelationId,
};
use rustc_hash::FxHashMap;
use std::collections::BTreeSet;
use tracing::debug;

/// Background theory a clause draws on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Theory {
    /// Booleans and equality
    Core,
    /// Linear and nonlinear integer arithmetic
    Ints,
}

/// Theories and relation symbols a normalized clause uses
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ClauseVocabulary {
    pub theories: BTreeSet<Theory>,
    pub relations: BTreeSet<RelationId>,
}

/// One body position of a normalized clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BodyAtom {
    pub relation: RelationId,
    pub occurrence: usize,
}

/// Head of a normalized clause
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NormalizedHead {
    Relation {
        relation: RelationId,
        occurrence: usize,
    },
    False,
}

/// A clause in per-occurrence form. Immutable once built.
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedClause {
    /// Index of the originating clause in the input problem
    pub index: usize,
    pub body: Vec<BodyAtom>,
    pub head: NormalizedHead,
    /// Formula over argument instances and clause-local symbols
    pub constraint: ChcExpr,
    pub vocabulary: ClauseVocabulary,
}

impl NormalizedClause {
    pub fn is_query(&self) -> bool {
        matches!(self.head, NormalizedHead::False)
    }

    /// Clauses with an empty body are facts or direct queries
    pub fn is_unit(&self) -> bool {
        self.body.is_empty()
    }

    pub fn head_relation(&self) -> Option<RelationId> {
        match self.head {
            NormalizedHead::Relation { relation, .. } => Some(relation),
            NormalizedHead::False => None,
        }
    }

    /// Argument instance symbols of the head (empty for a `false` head)
    pub fn head_arg_vars(&self, relations: &[Relation]) -> HyresResult<Vec<crate::ChcVar>> {
        match self.head {
            NormalizedHead::Relation {
                relation,
                occurrence,
            } => Ok(relation_at(relations, relation)?.arg_vars(occurrence)),
            NormalizedHead::False => Ok(Vec::new()),
        }
    }

    /// Argument instance symbols of body position `position`
    pub fn body_arg_vars(
        &self,
        position: usize,
        relations: &[Relation],
    ) -> HyresResult<Vec<crate::ChcVar>> {
        let atom = self.body.get(position).ok_or_else(|| {
            HyresError::Internal(format!(
                "clause {} has no body position {position}",
                self.index
            ))
        })?;
        Ok(relation_at(relations, atom.relation)?.arg_vars(atom.occurrence))
    }
}

/// Look up a relation by id, failing on an id from another problem
pub(crate) fn relation_at(relations: &[Relation], id: RelationId) -> HyresResult<&Relation> {
    relations
        .get(id.index())
        .filter(|r| r.id == id)
        .ok_or_else(|| HyresError::UndefinedRelation(id.to_string()))
}

/// Converts one input clause into its normalized form
pub trait Normalizer {
    fn normalize(
        &self,
        clause: &HornClause,
        index: usize,
        relations: &[Relation],
    ) -> HyresResult<NormalizedClause>;
}

/// Normalizer that numbers the uses of each relation within a clause.
///
/// The k-th body use of `R` gets occurrence k. The head gets the number of
/// body uses of its relation, so head instances never alias body instances.
#[derive(Debug, Clone, Copy, Default)]
pub struct OccurrenceNormalizer;

impl Normalizer for OccurrenceNormalizer {
    fn normalize(
        &self,
        clause: &HornClause,
        index: usize,
        relations: &[Relation],
    ) -> HyresResult<NormalizedClause> {
        check_user_vars(clause, index)?;

        let mut uses: FxHashMap<RelationId, usize> = FxHashMap::default();
        let mut vocabulary = ClauseVocabulary::default();
        vocabulary.theories.insert(Theory::Core);

        let mut conjuncts = Vec::new();
        let mut body = Vec::with_capacity(clause.body.relations.len());
        for (id, args) in &clause.body.relations {
            let relation = relation_at(relations, *id)?;
            let occurrence = uses.entry(*id).or_insert(0);
            bind_arguments(relation, *occurrence, args, &mut conjuncts)?;
            body.push(BodyAtom {
                relation: *id,
                occurrence: *occurrence,
            });
            *occurrence += 1;
            vocabulary.relations.insert(*id);
        }

        let head = match &clause.head {
            ClauseHead::Predicate(id, args) => {
                let relation = relation_at(relations, *id)?;
                let occurrence = uses.get(id).copied().unwrap_or(0);
                bind_arguments(relation, occurrence, args, &mut conjuncts)?;
                vocabulary.relations.insert(*id);
                NormalizedHead::Relation {
                    relation: *id,
                    occurrence,
                }
            }
            ClauseHead::False => NormalizedHead::False,
        };

        if let Some(c) = &clause.body.constraint {
            if c.contains_relation_app() {
                return Err(HyresError::Parse(format!(
                    "clause {index}: relation application inside a constraint"
                )));
            }
            conjuncts.push(c.clone());
        }

        let constraint = ChcExpr::and_all(conjuncts);
        if uses_ints(&constraint)
            || vocabulary
                .relations
                .iter()
                .filter_map(|id| relations.get(id.index()))
                .any(|r| r.arg_sorts.contains(&ChcSort::Int))
        {
            vocabulary.theories.insert(Theory::Ints);
        }

        Ok(NormalizedClause {
            index,
            body,
            head,
            constraint,
            vocabulary,
        })
    }
}

fn bind_arguments(
    relation: &Relation,
    occurrence: usize,
    args: &[ChcExpr],
    conjuncts: &mut Vec<ChcExpr>,
) -> HyresResult<()> {
    if args.len() != relation.arity() {
        return Err(HyresError::ArityMismatch {
            name: relation.name.clone(),
            expected: relation.arity(),
            actual: args.len(),
        });
    }
    for (pos, arg) in args.iter().enumerate() {
        conjuncts.push(ChcExpr::eq(
            ChcExpr::var(relation.arg_var(occurrence, pos)),
            arg.clone(),
        ));
    }
    Ok(())
}

/// `@` marks argument instances and `!` marks generated symbols
fn is_reserved_name(name: &str) -> bool {
    name.contains('@') || name.contains('!')
}

/// Reject user variables that could collide with argument instances or
/// generated symbols. Runs on the raw clause, before any binding.
fn check_user_vars(clause: &HornClause, index: usize) -> HyresResult<()> {
    let body_args = clause.body.relations.iter().flat_map(|(_, args)| args.iter());
    let head_args: &[ChcExpr] = match &clause.head {
        ClauseHead::Predicate(_, args) => args.as_slice(),
        ClauseHead::False => &[],
    };
    let exprs = body_args
        .chain(head_args.iter())
        .chain(clause.body.constraint.iter());
    for expr in exprs {
        if let Some(v) = expr.vars().into_iter().find(|v| is_reserved_name(&v.name)) {
            return Err(HyresError::Parse(format!(
                "clause {index}: variable {} uses a reserved character",
                v.name
            )));
        }
    }
    Ok(())
}

fn uses_ints(expr: &ChcExpr) -> bool {
    match expr {
        ChcExpr::Int(_) => true,
        ChcExpr::Bool(_) => false,
        ChcExpr::Var(v) => v.sort == ChcSort::Int,
        ChcExpr::Op(op, args) => {
            matches!(
                op,
                ChcOp::Add | ChcOp::Sub | ChcOp::Mul | ChcOp::Div | ChcOp::Mod | ChcOp::Neg
            ) || args.iter().any(|a| uses_ints(a))
        }
        ChcExpr::RelationApp(_, _, args) => args.iter().any(|a| uses_ints(a)),
    }
}

/// A whole problem in per-occurrence form
#[derive(Debug, Clone)]
pub struct NormalizedProblem {
    pub relations: Vec<Relation>,
    /// Clause `i` is the normalization of input clause `i`
    pub clauses: Vec<NormalizedClause>,
}

impl NormalizedProblem {
    /// Normalize every clause of `problem` with `normalizer`
    pub fn with_normalizer(problem: &ChcProblem, normalizer: &dyn Normalizer) -> HyresResult<Self> {
        problem.validate()?;
        let relations = problem.relations().to_vec();
        let clauses = problem
            .clauses()
            .iter()
            .enumerate()
            .map(|(i, c)| normalizer.normalize(c, i, &relations))
            .collect::<HyresResult<Vec<_>>>()?;
        debug!(
            relations = relations.len(),
            clauses = clauses.len(),
            "normalized problem"
        );
        Ok(Self { relations, clauses })
    }

    /// Highest occurrence index any clause uses per relation, plus one for
    /// the shifted electron instance hyperresolution may introduce.
    pub fn max_occurrences(&self) -> FxHashMap<RelationId, usize> {
        let mut max: FxHashMap<RelationId, usize> =
            self.relations.iter().map(|r| (r.id, 0)).collect();
        for clause in &self.clauses {
            let occurrences = clause
                .body
                .iter()
                .map(|a| (a.relation, a.occurrence + 1))
                .chain(match clause.head {
                    NormalizedHead::Relation {
                        relation,
                        occurrence,
                    } => Some((relation, occurrence)),
                    NormalizedHead::False => None,
                });
            for (relation, occurrence) in occurrences {
                let entry = max.entry(relation).or_insert(0);
                *entry = (*entry).max(occurrence);
            }
        }
        max
    }

    /// Union of all clause theories
    pub fn theories(&self) -> Vec<Theory> {
        let all: BTreeSet<Theory> = self
            .clauses
            .iter()
            .flat_map(|c| c.vocabulary.theories.iter().copied())
            .collect();
        all.into_iter().collect()
    }
}

/// Normalize with [`OccurrenceNormalizer`]
pub fn normalize_problem(problem: &ChcProblem) -> HyresResult<NormalizedProblem> {
    NormalizedProblem::with_normalizer(problem, &OccurrenceNormalizer)
}
