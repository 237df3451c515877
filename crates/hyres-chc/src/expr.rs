//! Expression types for CHC constraints

// These constructors build AST nodes, not perform operations.
// Implementing std::ops traits would be semantically incorrect.
#![allow(clippy::should_implement_trait)]

use crate::RelationId;
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Sort (type) of expressions
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChcSort {
    Bool,
    Int,
}

impl fmt::Display for ChcSort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChcSort::Bool => write!(f, "Bool"),
            ChcSort::Int => write!(f, "Int"),
        }
    }
}

/// A variable in CHC expressions
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChcVar {
    pub name: String,
    pub sort: ChcSort,
}

impl ChcVar {
    pub fn new(name: impl Into<String>, sort: ChcSort) -> Self {
        Self {
            name: name.into(),
            sort,
        }
    }
}

impl fmt::Display for ChcVar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// A concrete value, as produced by model evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SmtValue {
    Bool(bool),
    Int(i64),
}

impl SmtValue {
    /// Lift the value back into a constant expression
    pub fn to_expr(self) -> ChcExpr {
        match self {
            SmtValue::Bool(b) => ChcExpr::Bool(b),
            SmtValue::Int(n) => ChcExpr::Int(n),
        }
    }

    pub fn sort(self) -> ChcSort {
        match self {
            SmtValue::Bool(_) => ChcSort::Bool,
            SmtValue::Int(_) => ChcSort::Int,
        }
    }
}

impl fmt::Display for SmtValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SmtValue::Bool(b) => write!(f, "{b}"),
            SmtValue::Int(n) => write!(f, "{n}"),
        }
    }
}

/// Operations in CHC expressions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChcOp {
    // Boolean operations
    Not,
    And,
    Or,
    Implies,
    Iff,

    // Arithmetic operations
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,

    // Comparisons
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,

    // Conditional
    Ite,
}

impl ChcOp {
    /// SMT-LIB spelling of the operator
    pub fn smtlib_name(self) -> &'static str {
        match self {
            ChcOp::Not => "not",
            ChcOp::And => "and",
            ChcOp::Or => "or",
            ChcOp::Implies => "=>",
            ChcOp::Iff => "=",
            ChcOp::Add => "+",
            ChcOp::Sub => "-",
            ChcOp::Mul => "*",
            ChcOp::Div => "div",
            ChcOp::Mod => "mod",
            ChcOp::Neg => "-",
            ChcOp::Eq => "=",
            ChcOp::Ne => "distinct",
            ChcOp::Lt => "<",
            ChcOp::Le => "<=",
            ChcOp::Gt => ">",
            ChcOp::Ge => ">=",
            ChcOp::Ite => "ite",
        }
    }
}

/// CHC expression
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChcExpr {
    /// Boolean constant
    Bool(bool),
    /// Integer constant
    Int(i64),
    /// Variable reference
    Var(ChcVar),
    /// Operation application
    Op(ChcOp, Vec<Arc<ChcExpr>>),
    /// Relation application, only present in raw input clauses.
    /// Normalized constraints never contain one.
    RelationApp(String, RelationId, Vec<Arc<ChcExpr>>),
}

impl ChcExpr {
    // Convenience constructors

    pub fn bool_const(b: bool) -> Self {
        ChcExpr::Bool(b)
    }

    pub fn int(n: i64) -> Self {
        ChcExpr::Int(n)
    }

    pub fn var(v: ChcVar) -> Self {
        ChcExpr::Var(v)
    }

    /// Create a relation application
    pub fn relation_app(name: impl Into<String>, id: RelationId, args: Vec<ChcExpr>) -> Self {
        ChcExpr::RelationApp(name.into(), id, args.into_iter().map(Arc::new).collect())
    }

    pub fn not(e: ChcExpr) -> Self {
        // Double negation elimination: NOT(NOT(x)) = x
        if let ChcExpr::Op(ChcOp::Not, args) = &e {
            if args.len() == 1 {
                return (*args[0]).clone();
            }
        }
        ChcExpr::Op(ChcOp::Not, vec![Arc::new(e)])
    }

    pub fn and(a: ChcExpr, b: ChcExpr) -> Self {
        ChcExpr::Op(ChcOp::And, vec![Arc::new(a), Arc::new(b)])
    }

    pub fn or(a: ChcExpr, b: ChcExpr) -> Self {
        ChcExpr::Op(ChcOp::Or, vec![Arc::new(a), Arc::new(b)])
    }

    /// Conjunction of any number of formulas, flattening nested `and`s and
    /// dropping `true`. The empty conjunction is `true`.
    pub fn and_all(exprs: impl IntoIterator<Item = ChcExpr>) -> Self {
        let mut flat = Vec::new();
        for e in exprs {
            e.collect_conjuncts(&mut flat);
        }
        match flat.len() {
            0 => ChcExpr::Bool(true),
            1 => flat.pop().unwrap_or(ChcExpr::Bool(true)),
            _ => ChcExpr::Op(ChcOp::And, flat.into_iter().map(Arc::new).collect()),
        }
    }

    /// Disjunction of any number of formulas. The empty disjunction is `false`.
    pub fn or_all(exprs: impl IntoIterator<Item = ChcExpr>) -> Self {
        let mut flat: Vec<ChcExpr> = Vec::new();
        for e in exprs {
            match e {
                ChcExpr::Bool(false) => {}
                ChcExpr::Op(ChcOp::Or, args) => flat.extend(args.iter().map(|a| (**a).clone())),
                other => flat.push(other),
            }
        }
        match flat.len() {
            0 => ChcExpr::Bool(false),
            1 => flat.pop().unwrap_or(ChcExpr::Bool(false)),
            _ => ChcExpr::Op(ChcOp::Or, flat.into_iter().map(Arc::new).collect()),
        }
    }

    pub fn implies(a: ChcExpr, b: ChcExpr) -> Self {
        ChcExpr::Op(ChcOp::Implies, vec![Arc::new(a), Arc::new(b)])
    }

    pub fn add(a: ChcExpr, b: ChcExpr) -> Self {
        ChcExpr::Op(ChcOp::Add, vec![Arc::new(a), Arc::new(b)])
    }

    pub fn sub(a: ChcExpr, b: ChcExpr) -> Self {
        ChcExpr::Op(ChcOp::Sub, vec![Arc::new(a), Arc::new(b)])
    }

    pub fn mul(a: ChcExpr, b: ChcExpr) -> Self {
        ChcExpr::Op(ChcOp::Mul, vec![Arc::new(a), Arc::new(b)])
    }

    pub fn mod_op(a: ChcExpr, b: ChcExpr) -> Self {
        ChcExpr::Op(ChcOp::Mod, vec![Arc::new(a), Arc::new(b)])
    }

    pub fn neg(e: ChcExpr) -> Self {
        ChcExpr::Op(ChcOp::Neg, vec![Arc::new(e)])
    }

    pub fn eq(a: ChcExpr, b: ChcExpr) -> Self {
        ChcExpr::Op(ChcOp::Eq, vec![Arc::new(a), Arc::new(b)])
    }

    pub fn ne(a: ChcExpr, b: ChcExpr) -> Self {
        ChcExpr::Op(ChcOp::Ne, vec![Arc::new(a), Arc::new(b)])
    }

    pub fn lt(a: ChcExpr, b: ChcExpr) -> Self {
        ChcExpr::Op(ChcOp::Lt, vec![Arc::new(a), Arc::new(b)])
    }

    pub fn le(a: ChcExpr, b: ChcExpr) -> Self {
        ChcExpr::Op(ChcOp::Le, vec![Arc::new(a), Arc::new(b)])
    }

    pub fn gt(a: ChcExpr, b: ChcExpr) -> Self {
        ChcExpr::Op(ChcOp::Gt, vec![Arc::new(a), Arc::new(b)])
    }

    pub fn ge(a: ChcExpr, b: ChcExpr) -> Self {
        ChcExpr::Op(ChcOp::Ge, vec![Arc::new(a), Arc::new(b)])
    }

    pub fn ite(cond: ChcExpr, then_: ChcExpr, else_: ChcExpr) -> Self {
        ChcExpr::Op(
            ChcOp::Ite,
            vec![Arc::new(cond), Arc::new(then_), Arc::new(else_)],
        )
    }

    pub fn is_true(&self) -> bool {
        matches!(self, ChcExpr::Bool(true))
    }

    pub fn is_false(&self) -> bool {
        matches!(self, ChcExpr::Bool(false))
    }

    /// Get the sort of this expression
    pub fn sort(&self) -> ChcSort {
        match self {
            ChcExpr::Bool(_) => ChcSort::Bool,
            ChcExpr::Int(_) => ChcSort::Int,
            ChcExpr::Var(v) => v.sort.clone(),
            ChcExpr::RelationApp(_, _, _) => ChcSort::Bool,
            ChcExpr::Op(op, args) => match op {
                ChcOp::Add | ChcOp::Sub | ChcOp::Mul | ChcOp::Div | ChcOp::Mod | ChcOp::Neg => {
                    ChcSort::Int
                }
                ChcOp::Ite => args.get(1).map(|a| a.sort()).unwrap_or(ChcSort::Bool),
                _ => ChcSort::Bool,
            },
        }
    }

    /// Substitute variables in the expression
    pub fn substitute(&self, subst: &[(ChcVar, ChcExpr)]) -> ChcExpr {
        if subst.is_empty() {
            return self.clone();
        }
        let map: FxHashMap<&ChcVar, &ChcExpr> = subst.iter().map(|(v, e)| (v, e)).collect();
        self.substitute_with(&map)
    }

    fn substitute_with(&self, map: &FxHashMap<&ChcVar, &ChcExpr>) -> ChcExpr {
        match self {
            ChcExpr::Bool(_) | ChcExpr::Int(_) => self.clone(),
            ChcExpr::Var(v) => map.get(v).map(|e| (*e).clone()).unwrap_or_else(|| self.clone()),
            ChcExpr::Op(op, args) => {
                let new_args = args.iter().map(|a| Arc::new(a.substitute_with(map))).collect();
                ChcExpr::Op(*op, new_args)
            }
            ChcExpr::RelationApp(name, id, args) => {
                let new_args = args.iter().map(|a| Arc::new(a.substitute_with(map))).collect();
                ChcExpr::RelationApp(name.clone(), *id, new_args)
            }
        }
    }

    /// Get all variables in the expression, in first-occurrence order
    pub fn vars(&self) -> Vec<ChcVar> {
        let mut seen = FxHashSet::default();
        let mut result = Vec::new();
        self.collect_vars(&mut seen, &mut result);
        result
    }

    fn collect_vars(&self, seen: &mut FxHashSet<ChcVar>, result: &mut Vec<ChcVar>) {
        match self {
            ChcExpr::Bool(_) | ChcExpr::Int(_) => {}
            ChcExpr::Var(v) => {
                if seen.insert(v.clone()) {
                    result.push(v.clone());
                }
            }
            ChcExpr::Op(_, args) | ChcExpr::RelationApp(_, _, args) => {
                for arg in args {
                    arg.collect_vars(seen, result);
                }
            }
        }
    }

    pub fn contains_var(&self, var: &ChcVar) -> bool {
        match self {
            ChcExpr::Bool(_) | ChcExpr::Int(_) => false,
            ChcExpr::Var(v) => v == var,
            ChcExpr::Op(_, args) | ChcExpr::RelationApp(_, _, args) => {
                args.iter().any(|a| a.contains_var(var))
            }
        }
    }

    pub fn contains_relation_app(&self) -> bool {
        match self {
            ChcExpr::RelationApp(..) => true,
            ChcExpr::Op(_, args) => args.iter().any(|a| a.contains_relation_app()),
            _ => false,
        }
    }

    /// Top-level conjuncts, with nested `and`s flattened and `true` dropped
    pub fn conjuncts(&self) -> Vec<ChcExpr> {
        let mut out = Vec::new();
        self.clone().collect_conjuncts(&mut out);
        out
    }

    fn collect_conjuncts(self, out: &mut Vec<ChcExpr>) {
        match self {
            ChcExpr::Op(ChcOp::And, args) => {
                for a in args {
                    (*a).clone().collect_conjuncts(out);
                }
            }
            ChcExpr::Bool(true) => {}
            other => out.push(other),
        }
    }

    /// Fold constant subterms and apply local Boolean identities.
    ///
    /// `div`/`mod` follow SMT-LIB (Euclidean) semantics; division by zero is
    /// left symbolic.
    pub fn simplify_constants(&self) -> ChcExpr {
        match self {
            ChcExpr::Bool(_) | ChcExpr::Int(_) | ChcExpr::Var(_) => self.clone(),
            ChcExpr::RelationApp(name, id, args) => ChcExpr::RelationApp(
                name.clone(),
                *id,
                args.iter().map(|a| Arc::new(a.simplify_constants())).collect(),
            ),
            ChcExpr::Op(op, args) => {
                let args: Vec<ChcExpr> = args.iter().map(|a| a.simplify_constants()).collect();
                Self::simplify_op(*op, args)
            }
        }
    }

    fn simplify_op(op: ChcOp, args: Vec<ChcExpr>) -> ChcExpr {
        match op {
            ChcOp::And => {
                let mut kept = Vec::new();
                for a in args {
                    match a {
                        ChcExpr::Bool(true) => {}
                        ChcExpr::Bool(false) => return ChcExpr::Bool(false),
                        ChcExpr::Op(ChcOp::And, inner) => {
                            kept.extend(inner.iter().map(|i| (**i).clone()))
                        }
                        other => {
                            if !kept.contains(&other) {
                                kept.push(other)
                            }
                        }
                    }
                }
                // P AND NOT P
                for k in &kept {
                    if kept.contains(&ChcExpr::not(k.clone())) {
                        return ChcExpr::Bool(false);
                    }
                }
                ChcExpr::and_all(kept)
            }
            ChcOp::Or => {
                let mut kept = Vec::new();
                for a in args {
                    match a {
                        ChcExpr::Bool(false) => {}
                        ChcExpr::Bool(true) => return ChcExpr::Bool(true),
                        other => {
                            if !kept.contains(&other) {
                                kept.push(other)
                            }
                        }
                    }
                }
                ChcExpr::or_all(kept)
            }
            ChcOp::Not => match args.as_slice() {
                [ChcExpr::Bool(b)] => ChcExpr::Bool(!b),
                [a] => ChcExpr::not(a.clone()),
                _ => Self::rebuild(op, args),
            },
            ChcOp::Implies => match args.as_slice() {
                [ChcExpr::Bool(false), _] | [_, ChcExpr::Bool(true)] => ChcExpr::Bool(true),
                [ChcExpr::Bool(true), b] => b.clone(),
                [a, ChcExpr::Bool(false)] => ChcExpr::not(a.clone()).simplify_constants(),
                _ => Self::rebuild(op, args),
            },
            ChcOp::Ite => match args.as_slice() {
                [ChcExpr::Bool(true), t, _] => t.clone(),
                [ChcExpr::Bool(false), _, e] => e.clone(),
                [_, t, e] if t == e => t.clone(),
                _ => Self::rebuild(op, args),
            },
            ChcOp::Eq | ChcOp::Iff | ChcOp::Ne if args.len() == 2 => {
                let same = args[0] == args[1];
                let folded = match (&args[0], &args[1]) {
                    (ChcExpr::Int(a), ChcExpr::Int(b)) => Some(a == b),
                    (ChcExpr::Bool(a), ChcExpr::Bool(b)) => Some(a == b),
                    _ if same => Some(true),
                    _ => None,
                };
                match folded {
                    Some(eq) => ChcExpr::Bool(if op == ChcOp::Ne { !eq } else { eq }),
                    None => Self::rebuild(op, args),
                }
            }
            ChcOp::Lt | ChcOp::Le | ChcOp::Gt | ChcOp::Ge if args.len() == 2 => {
                match (&args[0], &args[1]) {
                    (ChcExpr::Int(a), ChcExpr::Int(b)) => ChcExpr::Bool(match op {
                        ChcOp::Lt => a < b,
                        ChcOp::Le => a <= b,
                        ChcOp::Gt => a > b,
                        _ => a >= b,
                    }),
                    (a, b) if a == b => ChcExpr::Bool(matches!(op, ChcOp::Le | ChcOp::Ge)),
                    _ => Self::rebuild(op, args),
                }
            }
            ChcOp::Add | ChcOp::Sub | ChcOp::Mul | ChcOp::Div | ChcOp::Mod | ChcOp::Neg => {
                let consts: Option<Vec<i64>> = args
                    .iter()
                    .map(|a| match a {
                        ChcExpr::Int(n) => Some(*n),
                        _ => None,
                    })
                    .collect();
                match consts.and_then(|c| fold_arith(op, &c)) {
                    Some(n) => ChcExpr::Int(n),
                    None => Self::simplify_arith_identities(op, args),
                }
            }
            _ => Self::rebuild(op, args),
        }
    }

    fn simplify_arith_identities(op: ChcOp, args: Vec<ChcExpr>) -> ChcExpr {
        match (op, args.as_slice()) {
            (ChcOp::Add, _) => {
                let mut constant: i64 = 0;
                let mut rest = Vec::new();
                for a in args {
                    match a {
                        ChcExpr::Int(n) => match constant.checked_add(n) {
                            Some(c) => constant = c,
                            None => rest.push(ChcExpr::Int(n)),
                        },
                        other => rest.push(other),
                    }
                }
                if constant != 0 {
                    rest.push(ChcExpr::Int(constant));
                }
                match rest.len() {
                    0 => ChcExpr::Int(0),
                    1 => rest.pop().unwrap_or(ChcExpr::Int(0)),
                    _ => Self::rebuild(ChcOp::Add, rest),
                }
            }
            (ChcOp::Sub, [a, ChcExpr::Int(0)]) => a.clone(),
            (ChcOp::Mul, [ChcExpr::Int(0), _]) | (ChcOp::Mul, [_, ChcExpr::Int(0)]) => {
                ChcExpr::Int(0)
            }
            (ChcOp::Mul, [ChcExpr::Int(1), a]) | (ChcOp::Mul, [a, ChcExpr::Int(1)]) => a.clone(),
            _ => Self::rebuild(op, args),
        }
    }

    fn rebuild(op: ChcOp, args: Vec<ChcExpr>) -> ChcExpr {
        ChcExpr::Op(op, args.into_iter().map(Arc::new).collect())
    }

    /// Evaluate the expression under a (possibly partial) assignment.
    ///
    /// Returns `None` if a variable is unassigned, an operation is undefined
    /// (division by zero, overflow) or a relation application is reached.
    pub fn eval(&self, assignment: &FxHashMap<String, SmtValue>) -> Option<SmtValue> {
        match self {
            ChcExpr::Bool(b) => Some(SmtValue::Bool(*b)),
            ChcExpr::Int(n) => Some(SmtValue::Int(*n)),
            ChcExpr::Var(v) => assignment.get(&v.name).copied(),
            ChcExpr::RelationApp(..) => None,
            ChcExpr::Op(op, args) => match op {
                ChcOp::And => {
                    for a in args {
                        if !a.eval(assignment)?.as_bool()? {
                            return Some(SmtValue::Bool(false));
                        }
                    }
                    Some(SmtValue::Bool(true))
                }
                ChcOp::Or => {
                    for a in args {
                        if a.eval(assignment)?.as_bool()? {
                            return Some(SmtValue::Bool(true));
                        }
                    }
                    Some(SmtValue::Bool(false))
                }
                ChcOp::Not => Some(SmtValue::Bool(!args.first()?.eval(assignment)?.as_bool()?)),
                ChcOp::Implies => {
                    let a = args.first()?.eval(assignment)?.as_bool()?;
                    if !a {
                        return Some(SmtValue::Bool(true));
                    }
                    args.get(1)?.eval(assignment)
                }
                ChcOp::Ite => {
                    if args.first()?.eval(assignment)?.as_bool()? {
                        args.get(1)?.eval(assignment)
                    } else {
                        args.get(2)?.eval(assignment)
                    }
                }
                ChcOp::Eq | ChcOp::Iff | ChcOp::Ne => {
                    let a = args.first()?.eval(assignment)?;
                    let b = args.get(1)?.eval(assignment)?;
                    let eq = a == b;
                    Some(SmtValue::Bool(if *op == ChcOp::Ne { !eq } else { eq }))
                }
                ChcOp::Lt | ChcOp::Le | ChcOp::Gt | ChcOp::Ge => {
                    let a = args.first()?.eval(assignment)?.as_int()?;
                    let b = args.get(1)?.eval(assignment)?.as_int()?;
                    Some(SmtValue::Bool(match op {
                        ChcOp::Lt => a < b,
                        ChcOp::Le => a <= b,
                        ChcOp::Gt => a > b,
                        _ => a >= b,
                    }))
                }
                ChcOp::Add | ChcOp::Sub | ChcOp::Mul | ChcOp::Div | ChcOp::Mod | ChcOp::Neg => {
                    let values: Option<Vec<i64>> = args
                        .iter()
                        .map(|a| a.eval(assignment).and_then(SmtValue::as_int))
                        .collect();
                    fold_arith(*op, &values?).map(SmtValue::Int)
                }
            },
        }
    }
}

impl SmtValue {
    pub fn as_bool(self) -> Option<bool> {
        match self {
            SmtValue::Bool(b) => Some(b),
            SmtValue::Int(_) => None,
        }
    }

    pub fn as_int(self) -> Option<i64> {
        match self {
            SmtValue::Int(n) => Some(n),
            SmtValue::Bool(_) => None,
        }
    }
}

/// Fold an arithmetic operator over constant arguments, `None` on overflow
/// or division by zero.
fn fold_arith(op: ChcOp, values: &[i64]) -> Option<i64> {
    match (op, values) {
        (ChcOp::Neg, [a]) => a.checked_neg(),
        (ChcOp::Sub, [a]) => a.checked_neg(),
        (ChcOp::Add, vs) => vs.iter().try_fold(0i64, |acc, v| acc.checked_add(*v)),
        (ChcOp::Mul, vs) => vs.iter().try_fold(1i64, |acc, v| acc.checked_mul(*v)),
        (ChcOp::Sub, [first, rest @ ..]) => {
            rest.iter().try_fold(*first, |acc, v| acc.checked_sub(*v))
        }
        (ChcOp::Div, [a, b]) => a.checked_div_euclid(*b),
        (ChcOp::Mod, [a, b]) => a.checked_rem_euclid(*b),
        _ => None,
    }
}

impl fmt::Display for ChcExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChcExpr::Bool(b) => write!(f, "{b}"),
            ChcExpr::Int(n) if *n < 0 => write!(f, "(- {})", n.unsigned_abs()),
            ChcExpr::Int(n) => write!(f, "{n}"),
            ChcExpr::Var(v) => write!(f, "{v}"),
            ChcExpr::RelationApp(name, _, args) => {
                if args.is_empty() {
                    return write!(f, "{name}");
                }
                write!(f, "({name}")?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                write!(f, ")")
            }
            ChcExpr::Op(op, args) => {
                write!(f, "({}", op.smtlib_name())?;
                for arg in args {
                    write!(f, " {arg}")?;
                }
                write!(f, ")")
            }
        }
    }
}
