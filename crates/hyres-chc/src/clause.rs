//! Raw Horn clauses, as produced by the parser or built by hand

use crate::{ChcExpr, RelationId};
use std::fmt;

/// Body of a Horn clause: relation applications plus an optional constraint
#[derive(Debug, Clone, PartialEq)]
pub struct ClauseBody {
    /// Relation applications, in source order
    pub relations: Vec<(RelationId, Vec<ChcExpr>)>,
    /// Background constraint (None means `true`)
    pub constraint: Option<ChcExpr>,
}

impl ClauseBody {
    pub fn new(relations: Vec<(RelationId, Vec<ChcExpr>)>, constraint: Option<ChcExpr>) -> Self {
        Self {
            relations,
            constraint,
        }
    }

    /// A body consisting of a constraint only
    pub fn constraint(constraint: ChcExpr) -> Self {
        Self {
            relations: Vec::new(),
            constraint: Some(constraint),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.relations.is_empty()
    }

    /// The constraint, with a missing one read as `true`
    pub fn constraint_or_true(&self) -> ChcExpr {
        self.constraint.clone().unwrap_or(ChcExpr::Bool(true))
    }
}

/// Head of a Horn clause
#[derive(Debug, Clone, PartialEq)]
pub enum ClauseHead {
    /// A relation application
    Predicate(RelationId, Vec<ChcExpr>),
    /// `false`: the clause is a query
    False,
}

impl ClauseHead {
    pub fn relation_id(&self) -> Option<RelationId> {
        match self {
            ClauseHead::Predicate(id, _) => Some(*id),
            ClauseHead::False => None,
        }
    }
}

/// A constrained Horn clause `body => head`
#[derive(Debug, Clone, PartialEq)]
pub struct HornClause {
    pub body: ClauseBody,
    pub head: ClauseHead,
}

impl HornClause {
    pub fn new(body: ClauseBody, head: ClauseHead) -> Self {
        Self { body, head }
    }

    /// Query clauses have a `false` head
    pub fn is_query(&self) -> bool {
        matches!(self.head, ClauseHead::False)
    }

    /// Fact clauses have no relation application in the body
    pub fn is_fact(&self) -> bool {
        self.body.is_empty()
    }
}

impl fmt::Display for HornClause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut parts: Vec<String> = self
            .body
            .relations
            .iter()
            .map(|(id, args)| {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                format!("{id}({})", args.join(", "))
            })
            .collect();
        if let Some(c) = &self.body.constraint {
            parts.push(c.to_string());
        }
        let body = if parts.is_empty() {
            "true".to_string()
        } else {
            parts.join(" /\\ ")
        };
        match &self.head {
            ClauseHead::Predicate(id, args) => {
                let args: Vec<String> = args.iter().map(|a| a.to_string()).collect();
                write!(f, "{body} => {id}({})", args.join(", "))
            }
            ClauseHead::False => write!(f, "{body} => false"),
        }
    }
}
