//! Counterexample reconstruction from a refuting unit
//!
//! The provenance of the refutation forms a DAG over stored units. It is
//! walked with an explicit stack, ordered with Kahn's algorithm from the
//! single root, and then concretized top-down: for every derivation step the
//! oracle is asked for a model of
//!
//! ```text
//! nucleus constraint /\ head args = parent values /\ electron instances
//! ```
//!
//! and each body position's arguments are read off that model. Nodes are
//! keyed by (unit, concrete atom), so a premise shared by two parents with
//! different values yields two nodes.

use crate::hyperres::electron_instance;
use crate::{
    ChcExpr, DecisionOracle, HyresError, HyresResult, NormalizedClause, NormalizedProblem,
    OracleScope, Relation, RelationId, SatResult, SmtValue, SymbolFactory, UnitDatabase, UnitId,
};
use rustc_hash::{FxHashMap, FxHashSet};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tracing::{debug, warn};

/// A relation applied to concrete values, or `false` for the root
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroundAtom {
    pub relation: Option<RelationId>,
    pub args: Vec<SmtValue>,
}

impl GroundAtom {
    pub fn falsum() -> Self {
        Self {
            relation: None,
            args: Vec::new(),
        }
    }

    pub fn render(&self, relations: &[Relation]) -> String {
        let Some(id) = self.relation else {
            return "false".to_string();
        };
        let name = relations
            .get(id.index())
            .map(|r| r.name.clone())
            .unwrap_or_else(|| id.to_string());
        let args: Vec<String> = self.args.iter().map(|v| v.to_string()).collect();
        format!("{name}({})", args.join(", "))
    }
}

/// One node of a counterexample: a ground atom, the input clause that
/// derives it, and the nodes realizing that clause's body positions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivationNode {
    pub atom: GroundAtom,
    /// Index of the input clause
    pub clause: usize,
    /// One node index per body position of `clause`
    pub children: Vec<usize>,
}

/// Derivation DAG of a refutation. Node 0 is the root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Counterexample {
    pub nodes: Vec<DerivationNode>,
}

impl Counterexample {
    pub fn root(&self) -> Option<&DerivationNode> {
        self.nodes.first()
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Nodes with no children
    pub fn leaves(&self) -> impl Iterator<Item = &DerivationNode> {
        self.nodes.iter().filter(|n| n.children.is_empty())
    }

    pub fn to_readable_string(&self, relations: &[Relation]) -> String {
        let mut out = String::new();
        for (i, node) in self.nodes.iter().enumerate() {
            out.push_str(&format!(
                "{i}: {}  [clause {}]",
                node.atom.render(relations),
                node.clause
            ));
            if !node.children.is_empty() {
                let children: Vec<String> = node.children.iter().map(|c| c.to_string()).collect();
                out.push_str(&format!("  <- {}", children.join(", ")));
            }
            out.push('\n');
        }
        out
    }

    /// JSON form with relation names resolved
    pub fn to_json(&self, relations: &[Relation]) -> serde_json::Value {
        let nodes: Vec<serde_json::Value> = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, node)| {
                let relation = node
                    .atom
                    .relation
                    .and_then(|id| relations.get(id.index()))
                    .map(|r| r.name.clone());
                serde_json::json!({
                    "id": i,
                    "relation": relation,
                    "args": node.atom.args,
                    "clause": node.clause,
                    "children": node.children,
                })
            })
            .collect();
        serde_json::json!({ "root": 0, "nodes": nodes })
    }
}

/// Units reachable from `root` through provenance, with their distinct
/// electrons
fn provenance_graph(
    root: UnitId,
    db: &UnitDatabase,
) -> HyresResult<FxHashMap<UnitId, Vec<UnitId>>> {
    let mut graph: FxHashMap<UnitId, Vec<UnitId>> = FxHashMap::default();
    let mut stack = vec![root];
    let mut visited: FxHashSet<UnitId> = FxHashSet::default();
    visited.insert(root);
    while let Some(id) = stack.pop() {
        let provenance = db
            .provenance(id)
            .ok_or_else(|| HyresError::Internal(format!("no provenance for {id}")))?;
        let mut children = Vec::new();
        for &e in provenance.electrons() {
            if !children.contains(&e) {
                children.push(e);
            }
            if visited.insert(e) {
                stack.push(e);
            }
        }
        graph.insert(id, children);
    }
    Ok(graph)
}

/// Kahn's algorithm from the single root
fn topological_order(
    root: UnitId,
    graph: &FxHashMap<UnitId, Vec<UnitId>>,
) -> HyresResult<Vec<UnitId>> {
    let mut in_degree: FxHashMap<UnitId, usize> = graph.keys().map(|id| (*id, 0)).collect();
    for children in graph.values() {
        for c in children {
            *in_degree.entry(*c).or_insert(0) += 1;
        }
    }
    let mut roots: Vec<UnitId> = in_degree
        .iter()
        .filter(|(_, d)| **d == 0)
        .map(|(id, _)| *id)
        .collect();
    roots.sort();
    if roots != [root] {
        return Err(HyresError::Internal(format!(
            "provenance graph must have the single root {root}, found {roots:?}"
        )));
    }

    let mut order = Vec::with_capacity(graph.len());
    let mut queue = VecDeque::from([root]);
    while let Some(id) = queue.pop_front() {
        order.push(id);
        for c in graph.get(&id).map(Vec::as_slice).unwrap_or(&[]) {
            if let Some(d) = in_degree.get_mut(c) {
                *d -= 1;
                if *d == 0 {
                    queue.push_back(*c);
                }
            }
        }
    }
    if order.len() != graph.len() {
        return Err(HyresError::Internal("provenance graph has a cycle".into()));
    }
    Ok(order)
}

struct NodeTable {
    nodes: Vec<DerivationNode>,
    index: FxHashMap<(UnitId, Vec<SmtValue>), usize>,
    assigned: FxHashMap<UnitId, Vec<usize>>,
}

impl NodeTable {
    fn node(&mut self, unit: UnitId, atom: GroundAtom, clause: usize) -> usize {
        let key = (unit, atom.args.clone());
        if let Some(&i) = self.index.get(&key) {
            return i;
        }
        let i = self.nodes.len();
        self.nodes.push(DerivationNode {
            atom,
            clause,
            children: Vec::new(),
        });
        self.index.insert(key, i);
        self.assigned.entry(unit).or_default().push(i);
        i
    }
}

fn clause_at(clauses: &[NormalizedClause], index: usize) -> HyresResult<&NormalizedClause> {
    clauses
        .get(index)
        .ok_or_else(|| HyresError::Internal(format!("no clause {index}")))
}

/// Reconstruct the derivation DAG of the refuting unit `root`
pub fn build_counterexample(
    root: UnitId,
    db: &UnitDatabase,
    clauses: &[NormalizedClause],
    relations: &[Relation],
    oracle: &mut dyn DecisionOracle,
    symbols: &mut SymbolFactory,
) -> HyresResult<Counterexample> {
    let graph = provenance_graph(root, db)?;
    let order = topological_order(root, &graph)?;
    debug!(units = order.len(), "building counterexample");

    let root_clause = db
        .provenance(root)
        .map(|p| p.clause())
        .ok_or_else(|| HyresError::Internal(format!("no provenance for {root}")))?;
    let mut table = NodeTable {
        nodes: Vec::new(),
        index: FxHashMap::default(),
        assigned: FxHashMap::default(),
    };
    table.node(root, GroundAtom::falsum(), root_clause);

    for unit_id in order {
        let Some(crate::Provenance::Derived { nucleus, electrons }) =
            db.provenance(unit_id).cloned()
        else {
            continue;
        };
        let clause = clause_at(clauses, nucleus)?;
        let head_vars = clause.head_arg_vars(relations)?;
        let assigned = table.assigned.get(&unit_id).cloned().unwrap_or_default();

        for node_index in assigned {
            let atom = table.nodes[node_index].atom.clone();
            let mut scope = OracleScope::new(&mut *oracle);
            scope.assert(&clause.constraint);
            for (var, value) in head_vars.iter().zip(&atom.args) {
                scope.assert(&ChcExpr::eq(ChcExpr::var(var.clone()), value.to_expr()));
            }
            for (position, e) in electrons.iter().enumerate() {
                let unit = db
                    .unit(*e)
                    .ok_or_else(|| HyresError::Internal(format!("no stored unit {e}")))?;
                let (_, instance) = electron_instance(clause, position, unit, relations, symbols)?;
                scope.assert(&instance);
            }
            let answer = scope.check_sat();
            if answer != SatResult::Sat {
                return Err(HyresError::Internal(format!(
                    "derivation step through clause {} is not reproducible ({answer:?})",
                    clause.index
                )));
            }

            let mut children = Vec::with_capacity(electrons.len());
            for (position, e) in electrons.iter().enumerate() {
                let values = clause
                    .body_arg_vars(position, relations)?
                    .into_iter()
                    .map(|v| {
                        scope.eval(&ChcExpr::var(v.clone())).ok_or_else(|| {
                            HyresError::Internal(format!("model has no value for {v}"))
                        })
                    })
                    .collect::<HyresResult<Vec<_>>>()?;
                let child_clause = db
                    .provenance(*e)
                    .map(|p| p.clause())
                    .ok_or_else(|| HyresError::Internal(format!("no provenance for {e}")))?;
                let atom = GroundAtom {
                    relation: Some(clause.body[position].relation),
                    args: values,
                };
                children.push(table.node(*e, atom, child_clause));
            }
            table.nodes[node_index].children = children;
        }
    }

    Ok(Counterexample { nodes: table.nodes })
}

/// Re-check every node of `cex` against the clauses with its concrete
/// values. `Ok(false)` if some step does not hold.
pub fn verify_counterexample(
    cex: &Counterexample,
    problem: &NormalizedProblem,
    oracle: &mut dyn DecisionOracle,
) -> HyresResult<bool> {
    match cex.root() {
        Some(root) if root.atom.relation.is_none() => {}
        _ => return Ok(false),
    }
    for (i, node) in cex.nodes.iter().enumerate() {
        let Some(clause) = problem.clauses.get(node.clause) else {
            return Ok(false);
        };
        if node.atom.relation != clause.head_relation()
            || node.children.len() != clause.body.len()
        {
            debug!(node = i, "node does not match its clause shape");
            return Ok(false);
        }

        let mut scope = OracleScope::new(&mut *oracle);
        scope.assert(&clause.constraint);
        let head_vars = clause.head_arg_vars(&problem.relations)?;
        if head_vars.len() != node.atom.args.len() {
            return Ok(false);
        }
        for (var, value) in head_vars.iter().zip(&node.atom.args) {
            scope.assert(&ChcExpr::eq(ChcExpr::var(var.clone()), value.to_expr()));
        }
        for (position, child) in node.children.iter().enumerate() {
            let Some(child) = cex.nodes.get(*child) else {
                return Ok(false);
            };
            if child.atom.relation != Some(clause.body[position].relation) {
                return Ok(false);
            }
            let vars = clause.body_arg_vars(position, &problem.relations)?;
            for (var, value) in vars.iter().zip(&child.atom.args) {
                scope.assert(&ChcExpr::eq(ChcExpr::var(var.clone()), value.to_expr()));
            }
        }
        match scope.check_sat() {
            SatResult::Sat => {}
            SatResult::Unsat => {
                debug!(node = i, "counterexample step does not hold");
                return Ok(false);
            }
            SatResult::Unknown => {
                warn!(node = i, "oracle inconclusive while verifying counterexample");
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
        normalize_problem, ChcProblem, ChcSort, ChcVar, ClauseBody, ClauseHead, HornClause,
        Polarity, Provenance, Theory, UnitClause, UnitHead,
    };

    /// Answers `Unknown` to every check
    #[derive(Default)]
    struct Undecided {
        depth: usize,
    }

    impl DecisionOracle for Undecided {
        fn declare_theories(&mut self, _: &[Theory]) {}
        fn declare_relation(&mut self, _: &Relation) {}
        fn push(&mut self) {
            self.depth += 1;
        }
        fn pop(&mut self) {
            self.depth -= 1;
        }
        fn assert(&mut self, _: &ChcExpr) {}
        fn check_sat(&mut self) -> SatResult {
            SatResult::Unknown
        }
        fn eval(&self, _: &ChcExpr) -> Option<SmtValue> {
            None
        }
    }

    fn unit(head: UnitHead) -> UnitClause {
        UnitClause::new(head, Polarity::Positive, 0, ChcExpr::Bool(true))
    }

    #[test]
    fn kahn_order_starts_at_root_and_rejects_second_root() {
        let rels = vec![Relation::new(RelationId::new(0), "R", vec![ChcSort::Int])];
        let mut db = UnitDatabase::new(&rels);
        let a = db
            .insert(unit(UnitHead::Relation(rels[0].id)), Provenance::Fact { clause: 0 })
            .unwrap();
        let b = db
            .insert(
                unit(UnitHead::Relation(rels[0].id)),
                Provenance::Derived {
                    nucleus: 1,
                    electrons: vec![a, a],
                },
            )
            .unwrap();
        let root = db
            .record_refutation(
                unit(UnitHead::False),
                Provenance::Derived {
                    nucleus: 2,
                    electrons: vec![b, a],
                },
            )
            .unwrap();

        let graph = provenance_graph(root, &db).unwrap();
        assert_eq!(graph.len(), 3);
        let order = topological_order(root, &graph).unwrap();
        assert_eq!(order, vec![root, b, a]);

        // A graph rooted elsewhere
        assert!(topological_order(b, &graph).is_err());
    }

    #[test]
    fn readable_output_names_relations() {
        let rels = vec![Relation::new(RelationId::new(0), "R", vec![ChcSort::Int])];
        let cex = Counterexample {
            nodes: vec![
                DerivationNode {
                    atom: GroundAtom::falsum(),
                    clause: 2,
                    children: vec![1],
                },
                DerivationNode {
                    atom: GroundAtom {
                        relation: Some(rels[0].id),
                        args: vec![SmtValue::Int(0)],
                    },
                    clause: 0,
                    children: vec![],
                },
            ],
        };
        let text = cex.to_readable_string(&rels);
        assert_eq!(text, "0: false  [clause 2]  <- 1\n1: R(0)  [clause 0]\n");
        let json = cex.to_json(&rels);
        assert_eq!(json["nodes"][1]["relation"], "R");
        assert_eq!(json["nodes"][1]["args"][0], 0);
        assert_eq!(cex.leaves().count(), 1);
    }

    #[test]
    fn inconclusive_oracle_is_an_internal_error() {
        let mut problem = ChcProblem::new();
        let r = problem.declare_relation("R", vec![ChcSort::Int]);
        let x = ChcExpr::var(ChcVar::new("x", ChcSort::Int));
        problem.add_clause(HornClause::new(
            ClauseBody::constraint(ChcExpr::Bool(true)),
            ClauseHead::Predicate(r, vec![ChcExpr::int(0)]),
        ));
        problem.add_clause(HornClause::new(
            ClauseBody::new(
                vec![(r, vec![x.clone()])],
                Some(ChcExpr::eq(x, ChcExpr::int(0))),
            ),
            ClauseHead::False,
        ));
        let normalized = normalize_problem(&problem).unwrap();
        let rels = normalized.relations.clone();
        let mut symbols = SymbolFactory::new();
        symbols.initialize(&rels, &normalized.max_occurrences());

        let mut db = UnitDatabase::new(&rels);
        let fact = UnitClause::from_normalized(&normalized.clauses[0]).unwrap();
        let fact = db.insert(fact, Provenance::Fact { clause: 0 }).unwrap();
        let root = db
            .record_refutation(
                unit(UnitHead::False),
                Provenance::Derived {
                    nucleus: 1,
                    electrons: vec![fact],
                },
            )
            .unwrap();

        let mut oracle = Undecided::default();
        let result = build_counterexample(
            root,
            &db,
            &normalized.clauses,
            &rels,
            &mut oracle,
            &mut symbols,
        );
        assert!(matches!(
            result,
            Err(HyresError::Internal(msg)) if msg.contains("not reproducible (Unknown)")
        ));
        assert_eq!(oracle.depth, 0);
    }
}
