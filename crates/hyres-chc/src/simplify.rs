//! Constraint simplification and existential projection

use crate::{ChcExpr, ChcOp, ChcVar, SymbolFactory};

/// Simplifies a formula while projecting away a set of symbols.
///
/// Symbols in `eliminate` are read as existentially quantified. An
/// implementation may leave some of them in the result; callers treat
/// survivors as existential locals.
pub trait ConstraintSimplifier {
    fn simplify(
        &self,
        formula: &ChcExpr,
        eliminate: &[ChcVar],
        reduce_first: bool,
        symbols: &SymbolFactory,
    ) -> ChcExpr;
}

/// Eliminates symbols through their defining equalities.
///
/// For each symbol `v` to eliminate, in canonical order, a conjunct of the
/// form `v = t` (or `t = v`, a bare Bool `v`, or `(not v)`) with `v` not
/// occurring in `t` is removed and `t` substituted for `v` everywhere else.
/// Repeats until no symbol can be eliminated, then folds constants.
#[derive(Debug, Clone, Copy, Default)]
pub struct EqualitySimplifier;

impl EqualitySimplifier {
    fn definition(conjunct: &ChcExpr, v: &ChcVar) -> Option<ChcExpr> {
        match conjunct {
            ChcExpr::Var(w) if w == v => Some(ChcExpr::Bool(true)),
            ChcExpr::Op(ChcOp::Not, args) if args.len() == 1 => match args[0].as_ref() {
                ChcExpr::Var(w) if w == v => Some(ChcExpr::Bool(false)),
                _ => None,
            },
            ChcExpr::Op(ChcOp::Eq | ChcOp::Iff, args) if args.len() == 2 => {
                match (args[0].as_ref(), args[1].as_ref()) {
                    (ChcExpr::Var(w), t) | (t, ChcExpr::Var(w))
                        if w == v && !t.contains_var(v) =>
                    {
                        Some(t.clone())
                    }
                    _ => None,
                }
            }
            _ => None,
        }
    }

    fn fold(conjuncts: Vec<ChcExpr>) -> ChcExpr {
        let mut kept = Vec::with_capacity(conjuncts.len());
        for c in conjuncts {
            let c = c.simplify_constants();
            if c.is_false() {
                return ChcExpr::Bool(false);
            }
            kept.extend(c.conjuncts());
        }
        ChcExpr::and_all(kept).simplify_constants()
    }
}

impl ConstraintSimplifier for EqualitySimplifier {
    fn simplify(
        &self,
        formula: &ChcExpr,
        eliminate: &[ChcVar],
        reduce_first: bool,
        symbols: &SymbolFactory,
    ) -> ChcExpr {
        let formula = if reduce_first {
            formula.simplify_constants()
        } else {
            formula.clone()
        };
        let mut conjuncts = formula.conjuncts();

        let mut pending: Vec<ChcVar> = eliminate.to_vec();
        symbols.sort_canonical(&mut pending);

        let mut progress = true;
        while progress && !pending.is_empty() {
            progress = false;
            let mut i = 0;
            while i < pending.len() {
                let v = &pending[i];
                let found = conjuncts
                    .iter()
                    .enumerate()
                    .find_map(|(j, c)| Self::definition(c, v).map(|t| (j, t)));
                match found {
                    Some((j, t)) => {
                        conjuncts.remove(j);
                        let subst = [(v.clone(), t)];
                        conjuncts = conjuncts
                            .into_iter()
                            .map(|c| c.substitute(&subst).simplify_constants())
                            .collect();
                        if conjuncts.iter().any(ChcExpr::is_false) {
                            return ChcExpr::Bool(false);
                        }
                        pending.remove(i);
                        progress = true;
                    }
                    None => i += 1,
                }
            }
        }

        Self::fold(conjuncts)
    }
}
