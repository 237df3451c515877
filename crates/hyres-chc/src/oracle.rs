//! Decision oracle interface and a finite-domain reference oracle
//!
//! The engine never talks to a decision procedure directly. It receives a
//! `&mut dyn DecisionOracle` handle and wraps every query in an
//! [`OracleScope`], which pushes a context on creation and pops it when
//! dropped.

use crate::{ChcExpr, ChcSort, ChcVar, Relation, SmtValue, Theory};
use rustc_hash::FxHashMap;
use std::ops::{Deref, DerefMut};
use tracing::{debug, warn};

/// Result of a satisfiability check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SatResult {
    Sat,
    Unsat,
    Unknown,
}

/// Result of a validity check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validity {
    Valid,
    Invalid,
    Unknown,
}

/// Satisfiability oracle with scoped assertion contexts
pub trait DecisionOracle {
    /// Announce the background theories the problem uses
    fn declare_theories(&mut self, theories: &[Theory]);

    /// Announce a relation symbol
    fn declare_relation(&mut self, relation: &Relation);

    fn push(&mut self);

    /// Retract everything asserted since the matching `push`
    fn pop(&mut self);

    fn assert(&mut self, formula: &ChcExpr);

    /// Check the conjunction of all current assertions
    fn check_sat(&mut self) -> SatResult;

    /// Value of `term` under the model of the last `Sat` answer
    fn eval(&self, term: &ChcExpr) -> Option<SmtValue>;

    /// Presentable form of a formula
    fn present(&self, formula: &ChcExpr) -> String {
        formula.to_string()
    }

    /// Is `formula` true under every assignment?
    fn check_valid(&mut self, formula: &ChcExpr) -> Validity {
        let mut scope = OracleScope::new(self);
        scope.assert(&ChcExpr::not(formula.clone()));
        match scope.check_sat() {
            SatResult::Unsat => Validity::Valid,
            SatResult::Sat => Validity::Invalid,
            SatResult::Unknown => Validity::Unknown,
        }
    }
}

/// A pushed oracle context, popped on drop
pub struct OracleScope<'a, O: DecisionOracle + ?Sized> {
    oracle: &'a mut O,
}

impl<'a, O: DecisionOracle + ?Sized> OracleScope<'a, O> {
    pub fn new(oracle: &'a mut O) -> Self {
        oracle.push();
        Self { oracle }
    }
}

impl<O: DecisionOracle + ?Sized> Deref for OracleScope<'_, O> {
    type Target = O;

    fn deref(&self) -> &O {
        self.oracle
    }
}

impl<O: DecisionOracle + ?Sized> DerefMut for OracleScope<'_, O> {
    fn deref_mut(&mut self) -> &mut O {
        self.oracle
    }
}

impl<O: DecisionOracle + ?Sized> Drop for OracleScope<'_, O> {
    fn drop(&mut self) {
        self.oracle.pop();
    }
}

/// Default cap on the number of assignments one check may enumerate
pub const DEFAULT_MAX_ASSIGNMENTS: u64 = 1 << 20;

/// Decides formulas over Bool and the integer interval `[min, max]` by
/// enumerating assignments to their free symbols.
///
/// A model is a real witness wherever it was found. A refutation only
/// covers the window, so an integer formula with no model in `[min, max]` is
/// re-checked on a widened window: a model there is reported as `Sat`, and
/// `Unsat` is reported only when the widened search agrees. Checks that
/// would enumerate more than `max_assignments` candidates answer `Unknown`.
#[derive(Debug, Clone)]
pub struct FiniteDomainOracle {
    min: i64,
    max: i64,
    max_assignments: u64,
    assertions: Vec<ChcExpr>,
    frames: Vec<usize>,
    model: FxHashMap<String, SmtValue>,
    theories: Vec<Theory>,
    relations: Vec<String>,
    checks: u64,
}

impl FiniteDomainOracle {
    /// Oracle over the integer interval `[min, max]`; an empty interval is
    /// read as `[max, min]`.
    pub fn new(min: i64, max: i64) -> Self {
        let (min, max) = if min <= max { (min, max) } else { (max, min) };
        Self {
            min,
            max,
            max_assignments: DEFAULT_MAX_ASSIGNMENTS,
            assertions: Vec::new(),
            frames: Vec::new(),
            model: FxHashMap::default(),
            theories: Vec::new(),
            relations: Vec::new(),
            checks: 0,
        }
    }

    pub fn with_max_assignments(mut self, max_assignments: u64) -> Self {
        self.max_assignments = max_assignments;
        self
    }

    pub fn domain(&self) -> (i64, i64) {
        (self.min, self.max)
    }

    /// Current push depth
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Number of `check_sat` calls answered so far
    pub fn checks(&self) -> u64 {
        self.checks
    }

    pub fn declared_relations(&self) -> &[String] {
        &self.relations
    }

    pub fn declared_theories(&self) -> &[Theory] {
        &self.theories
    }

    /// Integer candidates in `[lo, hi]`, nearest to zero first
    fn int_values(lo: i64, hi: i64) -> Vec<i64> {
        let mut values: Vec<i64> = (lo..=hi).collect();
        values.sort_by_key(|v| (v.unsigned_abs(), *v < 0));
        values
    }

    /// Value used for symbols the last model does not mention
    fn default_value(&self, sort: &ChcSort) -> SmtValue {
        match sort {
            ChcSort::Bool => SmtValue::Bool(false),
            ChcSort::Int if self.min <= 0 && 0 <= self.max => SmtValue::Int(0),
            ChcSort::Int => SmtValue::Int(self.min),
        }
    }

    fn search_space(vars: &[ChcVar], (lo, hi): (i64, i64)) -> Option<u64> {
        let ints = (hi as i128 - lo as i128 + 1) as u128;
        vars.iter().try_fold(1u64, |acc, v| {
            let size = match v.sort {
                ChcSort::Bool => 2u128,
                ChcSort::Int => ints,
            };
            let total = (acc as u128).checked_mul(size)?;
            u64::try_from(total).ok()
        })
    }

    /// Window for confirming a refutation: at least the base width on each
    /// side and past every integer literal of `formula`, shrunk until the
    /// enumeration fits the cap. `None` if even a margin of one does not fit.
    fn widened_window(&self, formula: &ChcExpr, vars: &[ChcVar]) -> Option<(i64, i64)> {
        let width = (self.max as i128 - self.min as i128 + 1).min(i64::MAX as i128) as u64;
        let reach = self.min.unsigned_abs().max(self.max.unsigned_abs());
        let literal = max_int_literal(formula);
        let mut margin = width.max(literal.saturating_sub(reach).saturating_add(1));
        while margin > 0 {
            let m = i64::try_from(margin).unwrap_or(i64::MAX);
            let window = (self.min.saturating_sub(m), self.max.saturating_add(m));
            if Self::search_space(vars, window).is_some_and(|n| n <= self.max_assignments) {
                return Some(window);
            }
            margin /= 2;
        }
        None
    }

    /// Enumerate assignments over `window`, recording the first model
    fn search(&mut self, formula: &ChcExpr, vars: &[ChcVar], window: (i64, i64)) -> SatResult {
        match Self::search_space(vars, window) {
            Some(n) if n <= self.max_assignments => {}
            _ => {
                debug!(vars = vars.len(), "assignment space exceeds the cap");
                return SatResult::Unknown;
            }
        }

        let ints = Self::int_values(window.0, window.1);
        let domains: Vec<Vec<SmtValue>> = vars
            .iter()
            .map(|v| match v.sort {
                ChcSort::Bool => vec![SmtValue::Bool(false), SmtValue::Bool(true)],
                ChcSort::Int => ints.iter().map(|n| SmtValue::Int(*n)).collect(),
            })
            .collect();

        // Odometer over the per-symbol domains
        let mut cursor = vec![0usize; vars.len()];
        let mut assignment: FxHashMap<String, SmtValue> = FxHashMap::default();
        let mut undefined = false;
        loop {
            assignment.clear();
            for (i, v) in vars.iter().enumerate() {
                assignment.insert(v.name.clone(), domains[i][cursor[i]]);
            }
            match formula.eval(&assignment) {
                Some(SmtValue::Bool(true)) => {
                    self.model = assignment;
                    return SatResult::Sat;
                }
                Some(_) => {}
                None => undefined = true,
            }

            let mut i = 0;
            loop {
                if i == cursor.len() {
                    return if undefined {
                        SatResult::Unknown
                    } else {
                        SatResult::Unsat
                    };
                }
                cursor[i] += 1;
                if cursor[i] < domains[i].len() {
                    break;
                }
                cursor[i] = 0;
                i += 1;
            }
        }
    }
}

/// Largest absolute value of an integer literal in `expr`
fn max_int_literal(expr: &ChcExpr) -> u64 {
    match expr {
        ChcExpr::Int(n) => n.unsigned_abs(),
        ChcExpr::Bool(_) | ChcExpr::Var(_) => 0,
        ChcExpr::Op(_, args) | ChcExpr::RelationApp(_, _, args) => {
            args.iter().map(|a| max_int_literal(a)).max().unwrap_or(0)
        }
    }
}

impl DecisionOracle for FiniteDomainOracle {
    fn declare_theories(&mut self, theories: &[Theory]) {
        for t in theories {
            if !self.theories.contains(t) {
                self.theories.push(*t);
            }
        }
    }

    fn declare_relation(&mut self, relation: &Relation) {
        if !self.relations.contains(&relation.name) {
            self.relations.push(relation.name.clone());
        }
    }

    fn push(&mut self) {
        self.frames.push(self.assertions.len());
    }

    fn pop(&mut self) {
        match self.frames.pop() {
            Some(len) => self.assertions.truncate(len),
            None => warn!("pop without matching push"),
        }
    }

    fn assert(&mut self, formula: &ChcExpr) {
        self.assertions.push(formula.clone());
    }

    fn check_sat(&mut self) -> SatResult {
        self.checks += 1;
        let formula = ChcExpr::and_all(self.assertions.iter().cloned()).simplify_constants();
        let vars = formula.vars();

        match self.search(&formula, &vars, (self.min, self.max)) {
            SatResult::Unsat if vars.iter().any(|v| v.sort == ChcSort::Int) => {}
            answer => return answer,
        }
        let Some(window) = self.widened_window(&formula, &vars) else {
            debug!(vars = vars.len(), "refutation cannot be confirmed past the window");
            return SatResult::Unknown;
        };
        let answer = self.search(&formula, &vars, window);
        if answer == SatResult::Sat {
            debug!(?window, "model found outside the base window");
        }
        answer
    }

    fn eval(&self, term: &ChcExpr) -> Option<SmtValue> {
        let mut assignment = self.model.clone();
        for v in term.vars() {
            if !assignment.contains_key(&v.name) {
                assignment.insert(v.name.clone(), self.default_value(&v.sort));
            }
        }
        term.eval(&assignment)
    }
}
