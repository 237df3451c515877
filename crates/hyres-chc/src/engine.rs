//! Hyperresolution engine: the main derivation loop
//!
//! The engine owns the unit database and drives
//! strategy -> hyperresolution -> classification -> database update until
//! the strategy is exhausted or a contradiction is found.
//!
//! # Example
//!
//! ```
//! use hyres_chc::{
//!     normalize_problem, ChcParser, EngineConfig, FiniteDomainOracle, HyperResolutionEngine,
//!     SolveResult, SymbolFactory,
//! };
//!
//! let input = r#"
//!     (declare-rel R (Int))
//!     (declare-var x Int)
//!     (rule (R 0))
//!     (rule (=> (and (R x) (< x 3)) (R (+ x 1))))
//!     (query (and (R x) (> x 3)))
//! "#;
//! let problem = ChcParser::parse(input).unwrap();
//! let normalized = normalize_problem(&problem).unwrap();
//! let mut engine = HyperResolutionEngine::new(normalized, EngineConfig::default());
//! let mut oracle = FiniteDomainOracle::new(0, 5);
//! let mut symbols = SymbolFactory::new();
//! let result = engine.solve(&mut oracle, &mut symbols).unwrap();
//! assert!(matches!(result, SolveResult::Sat(_)));
//! ```

use crate::cex::build_counterexample;
use crate::classify::{classify, has_contradiction, Classification};
use crate::hyperres::{hyperresolve, reduce_unit};
use crate::solution::{build_solution, check_solution_clauses};
use crate::{
    Candidate, ConstraintSimplifier, Counterexample, DecisionOracle, EqualitySimplifier,
    HyresError, HyresResult, ImplicationSubsumption, LevelSaturation, NormalizedProblem,
    Provenance, SearchStrategy, Solution, StrategyStep, SubsumptionChecker, SymbolFactory,
    UnitClause, UnitDatabase, UnitId,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Cloneable flag for cancelling a running solve from elsewhere
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Engine configuration
#[derive(Debug, Clone, Default)]
pub struct EngineConfig {
    /// Maximum number of main-loop iterations before answering Unknown
    pub max_iterations: Option<usize>,
    /// Wall-clock budget; exceeding it cancels the solve
    pub timeout: Option<Duration>,
    pub cancel: Option<CancellationToken>,
    /// Emit one trace event per derivation
    pub trace: bool,
}

/// Observational record of one derivation
#[derive(Debug, Clone)]
pub struct TraceEvent {
    pub iteration: usize,
    pub nucleus: usize,
    pub electrons: Vec<UnitId>,
    pub derived: UnitClause,
}

/// Observer of engine decisions. All methods default to no-ops.
pub trait EngineHooks {
    fn on_trace(&mut self, _event: &TraceEvent) {}
    fn on_infeasible(&mut self, _unit: &UnitClause) {}
    fn on_forward_subsumed(&mut self, _unit: &UnitClause) {}
    fn on_backward_subsumed(&mut self, _removed: &[UnitId]) {}
    fn on_inserted(&mut self, _id: UnitId, _unit: &UnitClause) {}
}

/// Engine statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    pub iterations: usize,
    pub derivations: usize,
    pub infeasible: usize,
    pub forward_subsumed: usize,
    pub backward_removed: usize,
    pub inserted: usize,
}

/// Outcome of a solve
#[derive(Debug, Clone)]
pub enum SolveResult {
    /// Satisfiable, with one interpretation per relation
    Sat(Solution),
    /// Unsatisfiable, with a derivation DAG rooted at the violated clause
    Unsat(Counterexample),
    /// Iteration limit reached, or the saturated model could not be
    /// confirmed against every clause
    Unknown,
}

/// Hyperresolution-based CHC solver
pub struct HyperResolutionEngine {
    problem: NormalizedProblem,
    config: EngineConfig,
    strategy: Box<dyn SearchStrategy>,
    simplifier: Box<dyn ConstraintSimplifier>,
    subsumption: Box<dyn SubsumptionChecker>,
    hooks: Vec<Box<dyn EngineHooks>>,
    db: UnitDatabase,
    stats: EngineStats,
}

impl HyperResolutionEngine {
    pub fn new(problem: NormalizedProblem, config: EngineConfig) -> Self {
        let db = UnitDatabase::new(&problem.relations);
        Self {
            problem,
            config,
            strategy: Box::new(LevelSaturation::new()),
            simplifier: Box::new(EqualitySimplifier),
            subsumption: Box::new(ImplicationSubsumption::new()),
            hooks: Vec::new(),
            db,
            stats: EngineStats::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: impl SearchStrategy + 'static) -> Self {
        self.strategy = Box::new(strategy);
        self
    }

    pub fn with_simplifier(mut self, simplifier: impl ConstraintSimplifier + 'static) -> Self {
        self.simplifier = Box::new(simplifier);
        self
    }

    pub fn with_subsumption(mut self, subsumption: impl SubsumptionChecker + 'static) -> Self {
        self.subsumption = Box::new(subsumption);
        self
    }

    pub fn add_hooks(&mut self, hooks: impl EngineHooks + 'static) {
        self.hooks.push(Box::new(hooks));
    }

    pub fn problem(&self) -> &NormalizedProblem {
        &self.problem
    }

    pub fn database(&self) -> &UnitDatabase {
        &self.db
    }

    pub fn stats(&self) -> &EngineStats {
        &self.stats
    }

    /// Run the search.
    ///
    /// `oracle` and `symbols` stay owned by the caller and are left open, so
    /// further queries can be issued against the same session afterwards.
    pub fn solve(
        &mut self,
        oracle: &mut dyn DecisionOracle,
        symbols: &mut SymbolFactory,
    ) -> HyresResult<SolveResult> {
        let start = Instant::now();
        info!(
            relations = self.problem.relations.len(),
            clauses = self.problem.clauses.len(),
            "starting hyperresolution"
        );

        oracle.declare_theories(&self.problem.theories());
        for relation in &self.problem.relations {
            oracle.declare_relation(relation);
        }
        symbols.initialize(&self.problem.relations, &self.problem.max_occurrences());

        // Seed the database with the input facts
        for index in 0..self.problem.clauses.len() {
            let clause = &self.problem.clauses[index];
            if !clause.is_unit() || clause.is_query() {
                continue;
            }
            let unit = UnitClause::from_normalized(clause)?;
            let unit = reduce_unit(
                unit,
                &self.problem.relations,
                self.simplifier.as_ref(),
                symbols,
            )?;
            // Positive relation units never classify as a contradiction
            self.admit(unit, Provenance::Fact { clause: index }, oracle)?;
        }

        loop {
            self.check_cancelled(start)?;
            if let Some(max) = self.config.max_iterations {
                if self.stats.iterations >= max {
                    info!(iterations = self.stats.iterations, "iteration limit reached");
                    return Ok(SolveResult::Unknown);
                }
            }
            self.stats.iterations += 1;

            let candidate = match self
                .strategy
                .next_candidate(&self.problem.clauses, &self.db)
            {
                StrategyStep::Resolve(candidate) => candidate,
                StrategyStep::Exhausted => break,
            };
            self.check_candidate(&candidate)?;

            let nucleus = &self.problem.clauses[candidate.nucleus];
            let electrons: Vec<&UnitClause> = candidate
                .electrons
                .iter()
                .filter_map(|id| self.db.unit(*id))
                .collect();
            let derived = hyperresolve(
                nucleus,
                &electrons,
                &self.problem.relations,
                self.simplifier.as_ref(),
                symbols,
            )?;
            self.stats.derivations += 1;

            if self.config.trace {
                info!(
                    iteration = self.stats.iterations,
                    nucleus = candidate.nucleus,
                    electrons = ?candidate.electrons,
                    derived = %derived.render(&self.problem.relations),
                    "derivation"
                );
                let event = TraceEvent {
                    iteration: self.stats.iterations,
                    nucleus: candidate.nucleus,
                    electrons: candidate.electrons.clone(),
                    derived: derived.clone(),
                };
                for hooks in &mut self.hooks {
                    hooks.on_trace(&event);
                }
            }

            let provenance = Provenance::Derived {
                nucleus: candidate.nucleus,
                electrons: candidate.electrons,
            };
            if let Some(root) = self.admit(derived, provenance, oracle)? {
                return self.refuted(root, oracle, symbols);
            }
        }

        // Queries with an empty body are never a nucleus; check them directly
        for index in 0..self.problem.clauses.len() {
            let clause = &self.problem.clauses[index];
            if !clause.is_query() {
                continue;
            }
            if !clause.is_unit() {
                debug!(clause = index, "query body never derivable");
                continue;
            }
            let unit = UnitClause::from_normalized(clause)?;
            if has_contradiction(&unit, oracle) {
                let root = self.db.record_refutation(
                    unit,
                    Provenance::Derived {
                        nucleus: index,
                        electrons: Vec::new(),
                    },
                )?;
                return self.refuted(root, oracle, symbols);
            }
        }

        let solution = build_solution(
            &self.db,
            &self.problem.relations,
            self.simplifier.as_ref(),
            symbols,
        )?;
        if !check_solution_clauses(
            &solution,
            &self.problem.clauses,
            &self.problem.relations,
            oracle,
        )? {
            warn!(
                iterations = self.stats.iterations,
                "saturated, but the model does not satisfy every clause"
            );
            return Ok(SolveResult::Unknown);
        }
        info!(
            iterations = self.stats.iterations,
            units = self.db.active_len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "sat"
        );
        Ok(SolveResult::Sat(solution))
    }

    fn refuted(
        &mut self,
        root: UnitId,
        oracle: &mut dyn DecisionOracle,
        symbols: &mut SymbolFactory,
    ) -> HyresResult<SolveResult> {
        let cex = build_counterexample(
            root,
            &self.db,
            &self.problem.clauses,
            &self.problem.relations,
            oracle,
            symbols,
        )?;
        info!(
            iterations = self.stats.iterations,
            nodes = cex.len(),
            "unsat"
        );
        Ok(SolveResult::Unsat(cex))
    }

    fn check_cancelled(&self, start: Instant) -> HyresResult<()> {
        if self
            .config
            .cancel
            .as_ref()
            .is_some_and(CancellationToken::is_cancelled)
        {
            return Err(HyresError::Cancelled);
        }
        if self
            .config
            .timeout
            .is_some_and(|timeout| start.elapsed() >= timeout)
        {
            return Err(HyresError::Cancelled);
        }
        Ok(())
    }

    fn check_candidate(&self, candidate: &Candidate) -> HyresResult<()> {
        let clause = self.problem.clauses.get(candidate.nucleus).ok_or_else(|| {
            HyresError::StrategyContract(format!("nucleus index out of range: {candidate:?}"))
        })?;
        if clause.body.is_empty() {
            return Err(HyresError::StrategyContract(format!(
                "nucleus has an empty body: {candidate:?}"
            )));
        }
        if clause.body.len() != candidate.electrons.len() {
            return Err(HyresError::StrategyContract(format!(
                "expected {} electron(s): {candidate:?}",
                clause.body.len()
            )));
        }
        for (atom, id) in clause.body.iter().zip(&candidate.electrons) {
            let matches = self
                .db
                .get(*id)
                .is_some_and(|e| e.active && e.unit.relation() == Some(atom.relation));
            if !matches {
                return Err(HyresError::StrategyContract(format!(
                    "electron {id} is not an active unit of the body relation: {candidate:?}"
                )));
            }
        }
        Ok(())
    }

    /// Classify a unit and apply the decision. Returns the refutation id on
    /// contradiction.
    fn admit(
        &mut self,
        unit: UnitClause,
        provenance: Provenance,
        oracle: &mut dyn DecisionOracle,
    ) -> HyresResult<Option<UnitId>> {
        let classification = classify(
            &unit,
            &self.db,
            &self.problem.relations,
            self.subsumption.as_mut(),
            oracle,
        );
        match classification {
            Classification::Contradiction => {
                let id = self.db.record_refutation(unit, provenance)?;
                return Ok(Some(id));
            }
            Classification::Infeasible => {
                self.stats.infeasible += 1;
                for hooks in &mut self.hooks {
                    hooks.on_infeasible(&unit);
                }
            }
            Classification::ForwardSubsumed => {
                self.stats.forward_subsumed += 1;
                for hooks in &mut self.hooks {
                    hooks.on_forward_subsumed(&unit);
                }
            }
            Classification::New { removed } => {
                for id in &removed {
                    self.db.remove(*id)?;
                    self.subsumption.on_removed(*id);
                }
                if !removed.is_empty() {
                    self.stats.backward_removed += removed.len();
                    for hooks in &mut self.hooks {
                        hooks.on_backward_subsumed(&removed);
                    }
                }
                let id = self.db.insert(unit, provenance)?;
                self.stats.inserted += 1;
                if let Some(stored) = self.db.unit(id) {
                    self.subsumption.on_inserted(id, stored);
                    for hooks in &mut self.hooks {
                        hooks.on_inserted(id, stored);
                    }
                }
            }
        }
        Ok(None)
    }
}
