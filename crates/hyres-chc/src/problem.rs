//! CHC problem definition

use crate::{
    ChcExpr, ChcSort, ClauseHead, HornClause, HyresError, HyresResult, Relation, RelationId,
};
use rustc_hash::FxHashMap;

/// A Constrained Horn Clause problem
///
/// Contains:
/// - A set of relation declarations (uninterpreted predicates)
/// - A set of Horn clauses (rules, facts and queries)
#[derive(Debug, Clone, Default)]
pub struct ChcProblem {
    /// Relation declarations
    relations: Vec<Relation>,
    /// Map from name to relation ID
    relation_names: FxHashMap<String, RelationId>,
    /// All Horn clauses
    clauses: Vec<HornClause>,
}

impl ChcProblem {
    /// Create a new empty CHC problem
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a new relation
    pub fn declare_relation(&mut self, name: impl Into<String>, arg_sorts: Vec<ChcSort>) -> RelationId {
        let name = name.into();
        let id = RelationId::new(self.relations.len() as u32);
        self.relations.push(Relation::new(id, name.clone(), arg_sorts));
        self.relation_names.insert(name, id);
        id
    }

    /// Get a relation by ID
    pub fn get_relation(&self, id: RelationId) -> Option<&Relation> {
        self.relations.get(id.index())
    }

    /// Look up relation ID by name
    pub fn lookup_relation(&self, name: &str) -> Option<RelationId> {
        self.relation_names.get(name).copied()
    }

    /// Add a Horn clause
    pub fn add_clause(&mut self, clause: HornClause) {
        self.clauses.push(clause);
    }

    /// Get all clauses
    pub fn clauses(&self) -> &[HornClause] {
        &self.clauses
    }

    /// Get all relations
    pub fn relations(&self) -> &[Relation] {
        &self.relations
    }

    /// Get query clauses (clauses with false head)
    pub fn queries(&self) -> impl Iterator<Item = &HornClause> {
        self.clauses.iter().filter(|c| c.is_query())
    }

    /// Get fact clauses (no relations in the body, relation in the head)
    pub fn facts(&self) -> impl Iterator<Item = &HornClause> {
        self.clauses.iter().filter(|c| c.is_fact() && !c.is_query())
    }

    /// Get transition clauses (relations in both body and head)
    pub fn transitions(&self) -> impl Iterator<Item = &HornClause> {
        self.clauses
            .iter()
            .filter(|c| !c.is_fact() && !c.is_query())
    }

    /// Get clauses that use a relation in their body
    pub fn clauses_using(&self, rel: RelationId) -> impl Iterator<Item = &HornClause> {
        self.clauses
            .iter()
            .filter(move |c| c.body.relations.iter().any(|(id, _)| *id == rel))
    }

    /// Validate the problem: every used relation is declared and applied
    /// with the declared arity, and constraints are Boolean.
    pub fn validate(&self) -> HyresResult<()> {
        for clause in &self.clauses {
            for (rel_id, args) in &clause.body.relations {
                self.check_application(*rel_id, args)?;
            }
            if let ClauseHead::Predicate(rel_id, args) = &clause.head {
                self.check_application(*rel_id, args)?;
            }
            if let Some(c) = &clause.body.constraint {
                if c.sort() != ChcSort::Bool {
                    return Err(HyresError::Parse(format!("non-Boolean clause constraint: {c}")));
                }
            }
        }
        Ok(())
    }

    fn check_application(&self, rel_id: RelationId, args: &[ChcExpr]) -> HyresResult<()> {
        let rel = self
            .get_relation(rel_id)
            .ok_or_else(|| HyresError::UndefinedRelation(rel_id.to_string()))?;
        if args.len() != rel.arity() {
            return Err(HyresError::ArityMismatch {
                name: rel.name.clone(),
                expected: rel.arity(),
                actual: args.len(),
            });
        }
        Ok(())
    }
}
