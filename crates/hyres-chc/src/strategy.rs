//! Search strategies: which (nucleus, electrons) combination to resolve next

use crate::{NormalizedClause, UnitDatabase, UnitId};
use rustc_hash::FxHashSet;
use std::collections::VecDeque;
use tracing::debug;

/// A resolvable combination: one nucleus and one electron per body position
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Candidate {
    /// Index into the normalized clause list
    pub nucleus: usize,
    pub electrons: Vec<UnitId>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StrategyStep {
    Resolve(Candidate),
    Exhausted,
}

/// Produces candidates from the current database state.
///
/// Electrons must align with the nucleus body order. A strategy must not
/// keep returning available combinations forever once nothing new can be
/// derived; it reports `Exhausted` instead.
pub trait SearchStrategy {
    fn next_candidate(&mut self, clauses: &[NormalizedClause], db: &UnitDatabase) -> StrategyStep;
}

/// Breadth-first level saturation.
///
/// Each refill enumerates, in clause order, every combination of currently
/// active units not enumerated before. Combinations are never re-issued, so
/// the search is fair and stops once a refill yields nothing.
#[derive(Debug, Default)]
pub struct LevelSaturation {
    queue: VecDeque<Candidate>,
    seen: FxHashSet<Candidate>,
    level: usize,
}

impl LevelSaturation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of completed refills
    pub fn level(&self) -> usize {
        self.level
    }

    fn refill(&mut self, clauses: &[NormalizedClause], db: &UnitDatabase) -> bool {
        self.level += 1;
        let before = self.queue.len();
        for (index, clause) in clauses.iter().enumerate() {
            if clause.body.is_empty() {
                continue;
            }
            let choices: Vec<&[UnitId]> = clause
                .body
                .iter()
                .map(|atom| db.unit_ids(atom.relation))
                .collect();
            if choices.iter().any(|c| c.is_empty()) {
                continue;
            }
            // Odometer over the per-position choices
            let mut cursor = vec![0usize; choices.len()];
            'combinations: loop {
                let candidate = Candidate {
                    nucleus: index,
                    electrons: cursor.iter().zip(&choices).map(|(i, c)| c[*i]).collect(),
                };
                if self.seen.insert(candidate.clone()) {
                    self.queue.push_back(candidate);
                }
                let mut pos = 0;
                loop {
                    if pos == cursor.len() {
                        break 'combinations;
                    }
                    cursor[pos] += 1;
                    if cursor[pos] < choices[pos].len() {
                        break;
                    }
                    cursor[pos] = 0;
                    pos += 1;
                }
            }
        }
        let added = self.queue.len() - before;
        debug!(level = self.level, added, "refilled candidate queue");
        added > 0
    }
}

impl SearchStrategy for LevelSaturation {
    fn next_candidate(&mut self, clauses: &[NormalizedClause], db: &UnitDatabase) -> StrategyStep {
        loop {
            while let Some(candidate) = self.queue.pop_front() {
                // Electrons may have been removed by backward subsumption
                if candidate.electrons.iter().all(|id| db.is_active(*id)) {
                    return StrategyStep::Resolve(candidate);
                }
            }
            if !self.refill(clauses, db) {
                return StrategyStep::Exhausted;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        normalize_problem, ChcExpr, ChcProblem, ChcSort, ChcVar, ClauseBody, ClauseHead,
        HornClause, Polarity, Provenance, UnitClause, UnitHead,
    };

    #[test]
    fn enumerates_each_combination_once() {
        let mut problem = ChcProblem::new();
        let p = problem.declare_relation("P", vec![ChcSort::Int]);
        let q = problem.declare_relation("Q", vec![ChcSort::Int]);
        let x = ChcExpr::var(ChcVar::new("x", ChcSort::Int));
        let y = ChcExpr::var(ChcVar::new("y", ChcSort::Int));
        problem.add_clause(HornClause::new(
            ClauseBody::new(vec![(p, vec![x.clone()]), (p, vec![y])], None),
            ClauseHead::Predicate(q, vec![x]),
        ));
        let normalized = normalize_problem(&problem).unwrap();
        let mut db = UnitDatabase::new(&normalized.relations);
        for v in 0..2 {
            let unit = UnitClause::new(
                UnitHead::Relation(p),
                Polarity::Positive,
                0,
                ChcExpr::eq(
                    ChcExpr::var(normalized.relations[0].arg_var(0, 0)),
                    ChcExpr::int(v),
                ),
            );
            db.insert(unit, Provenance::Fact { clause: 9 }).unwrap();
        }

        let mut strategy = LevelSaturation::new();
        let mut issued = Vec::new();
        while let StrategyStep::Resolve(c) = strategy.next_candidate(&normalized.clauses, &db) {
            assert_eq!(c.electrons.len(), 2);
            issued.push(c);
        }
        assert_eq!(issued.len(), 4);
        assert_eq!(
            strategy.next_candidate(&normalized.clauses, &db),
            StrategyStep::Exhausted
        );
    }

    #[test]
    fn skips_candidates_with_removed_electrons() {
        let mut problem = ChcProblem::new();
        let p = problem.declare_relation("P", vec![ChcSort::Int]);
        let x = ChcExpr::var(ChcVar::new("x", ChcSort::Int));
        problem.add_clause(HornClause::new(
            ClauseBody::new(vec![(p, vec![x])], None),
            ClauseHead::False,
        ));
        let normalized = normalize_problem(&problem).unwrap();
        let mut db = UnitDatabase::new(&normalized.relations);
        let unit = UnitClause::new(
            UnitHead::Relation(p),
            Polarity::Positive,
            0,
            ChcExpr::Bool(true),
        );
        let a = db.insert(unit.clone(), Provenance::Fact { clause: 9 }).unwrap();
        let b = db.insert(unit, Provenance::Fact { clause: 9 }).unwrap();

        let mut strategy = LevelSaturation::new();
        match strategy.next_candidate(&normalized.clauses, &db) {
            StrategyStep::Resolve(c) => assert_eq!(c.electrons, vec![a]),
            other => panic!("unexpected {other:?}"),
        }
        db.remove(b).unwrap();
        assert_eq!(
            strategy.next_candidate(&normalized.clauses, &db),
            StrategyStep::Exhausted
        );
        assert_eq!(strategy.level(), 2);
    }
}
