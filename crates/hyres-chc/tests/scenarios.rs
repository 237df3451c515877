//! End-to-end solving scenarios.
//!
//! Each test parses a small SMT-LIB problem, runs the engine with the
//! finite-domain oracle, and re-checks the answer independently.

use hyres_chc::{
    normalize_problem, verify_counterexample, verify_solution, ChcParser, ChcProblem,
    EngineConfig, FiniteDomainOracle, GroundAtom, HyperResolutionEngine, NormalizedProblem,
    SmtValue, SolveResult, SymbolFactory,
};

struct Run {
    problem: ChcProblem,
    engine: HyperResolutionEngine,
    oracle: FiniteDomainOracle,
    result: SolveResult,
}

fn run(input: &str, min: i64, max: i64) -> Run {
    run_with(input, min, max, EngineConfig::default())
}

fn run_with(input: &str, min: i64, max: i64, config: EngineConfig) -> Run {
    let problem = ChcParser::parse(input).unwrap();
    let normalized = normalize_problem(&problem).unwrap();
    let mut engine = HyperResolutionEngine::new(normalized, config);
    let mut oracle = FiniteDomainOracle::new(min, max);
    let mut symbols = SymbolFactory::new();
    let result = engine.solve(&mut oracle, &mut symbols).unwrap();
    assert_eq!(oracle.depth(), 0, "oracle scopes must be balanced");
    Run {
        problem,
        engine,
        oracle,
        result,
    }
}

fn normalized(run: &Run) -> &NormalizedProblem {
    run.engine.problem()
}

fn int_atom(run: &Run, name: &str, args: &[i64]) -> GroundAtom {
    let relation = normalized(run)
        .relations
        .iter()
        .find(|r| r.name == name)
        .unwrap()
        .id;
    GroundAtom {
        relation: Some(relation),
        args: args.iter().map(|v| SmtValue::Int(*v)).collect(),
    }
}

#[test]
fn fact_without_reachable_goal_is_sat() {
    let mut run = run(
        r#"
        (declare-rel R (Int))
        (declare-var x Int)
        (rule (R 0))
        (query (and (R x) (> x 0)))
        "#,
        -4,
        4,
    );
    let SolveResult::Sat(solution) = &run.result else {
        panic!("expected sat, got {:?}", run.result);
    };
    let r = normalized(&run).relations[0].id;
    let interp = solution.get(r).unwrap();
    assert_eq!(interp.eval(&[SmtValue::Int(0)]), Some(true));
    assert_eq!(interp.eval(&[SmtValue::Int(1)]), Some(false));
    let solution = solution.clone();
    assert!(verify_solution(&solution, &run.problem, &mut run.oracle).unwrap());
}

#[test]
fn unbounded_counter_reaches_goal() {
    let mut run = run(
        r#"
        (declare-rel R (Int))
        (declare-var x Int)
        (rule (R 0))
        (rule (=> (R x) (R (+ x 1))))
        (query (and (R x) (= x 5)))
        "#,
        0,
        8,
    );
    let SolveResult::Unsat(cex) = &run.result else {
        panic!("expected unsat, got {:?}", run.result);
    };
    assert_eq!(cex.len(), 7);
    assert_eq!(cex.nodes[0].atom, GroundAtom::falsum());
    assert_eq!(cex.leaves().count(), 1);

    // Walk the chain from the root down to the fact
    let mut values = Vec::new();
    let mut node = &cex.nodes[cex.nodes[0].children[0]];
    loop {
        values.push(node.atom.args[0]);
        match node.children.as_slice() {
            [] => break,
            [child] => node = &cex.nodes[*child],
            other => panic!("unexpected fan-out {other:?}"),
        }
    }
    let expected: Vec<SmtValue> = (0..=5).rev().map(SmtValue::Int).collect();
    assert_eq!(values, expected);

    let cex = cex.clone();
    let problem = run.engine.problem().clone();
    assert!(verify_counterexample(&cex, &problem, &mut run.oracle).unwrap());
}

#[test]
fn bodiless_query_is_a_single_node_refutation() {
    let run = run(
        r#"
        (declare-rel R (Int))
        (assert false)
        "#,
        0,
        2,
    );
    let SolveResult::Unsat(cex) = &run.result else {
        panic!("expected unsat, got {:?}", run.result);
    };
    assert_eq!(cex.len(), 1);
    assert!(cex.nodes[0].children.is_empty());
    assert_eq!(cex.nodes[0].clause, 0);
}

#[test]
fn equivalent_derivations_are_stored_once() {
    let run = run(
        r#"
        (declare-rel A (Int))
        (declare-rel B (Int))
        (declare-rel R (Int))
        (declare-var x Int)
        (declare-var y Int)
        (rule (=> (>= x 0) (A x)))
        (rule (=> (<= 0 x) (B x)))
        (rule (=> (A x) (R x)))
        (rule (=> (and (B y) (= x y)) (R x)))
        "#,
        0,
        3,
    );
    assert!(matches!(run.result, SolveResult::Sat(_)));
    let r = normalized(&run).relations[2].id;
    assert_eq!(run.engine.database().units_of(r).count(), 1);
    assert!(run.engine.stats().forward_subsumed >= 1);
}

#[test]
fn shared_premise_with_equal_values_is_one_node() {
    let mut run = run(
        r#"
        (declare-rel P (Int))
        (declare-rel T (Int))
        (declare-var x Int)
        (declare-var y Int)
        (rule (P 1))
        (rule (=> (and (P x) (P y)) (T (+ x y))))
        (query (and (T x) (= x 2)))
        "#,
        0,
        4,
    );
    let SolveResult::Unsat(cex) = &run.result else {
        panic!("expected unsat, got {:?}", run.result);
    };
    assert_eq!(cex.len(), 3);
    assert_eq!(cex.nodes[1].atom, int_atom(&run, "T", &[2]));
    assert_eq!(cex.nodes[1].children, vec![2, 2]);
    assert_eq!(cex.nodes[2].atom, int_atom(&run, "P", &[1]));

    let cex = cex.clone();
    let problem = run.engine.problem().clone();
    assert!(verify_counterexample(&cex, &problem, &mut run.oracle).unwrap());
}

#[test]
fn nonlinear_join_over_two_relations() {
    let input = |goal: i64| {
        format!(
            r#"
            (declare-rel P (Int))
            (declare-rel Q (Int))
            (declare-rel S (Int))
            (declare-var x Int)
            (declare-var y Int)
            (rule (P 1))
            (rule (Q 2))
            (rule (=> (and (P x) (Q y)) (S (+ x y))))
            (query (and (S x) (= x {goal})))
            "#
        )
    };

    let mut sat = run(&input(4), 0, 5);
    let SolveResult::Sat(solution) = &sat.result else {
        panic!("expected sat, got {:?}", sat.result);
    };
    let s = normalized(&sat).relations[2].id;
    let interp = solution.get(s).unwrap();
    for v in 0..=5 {
        assert_eq!(interp.eval(&[SmtValue::Int(v)]), Some(v == 3), "S({v})");
    }
    let solution = solution.clone();
    assert!(verify_solution(&solution, &sat.problem, &mut sat.oracle).unwrap());

    let unsat = run(&input(3), 0, 5);
    let SolveResult::Unsat(cex) = &unsat.result else {
        panic!("expected unsat, got {:?}", unsat.result);
    };
    assert_eq!(cex.len(), 4);
    assert_eq!(cex.leaves().count(), 2);
}

#[test]
fn boolean_relation_flips() {
    let run = run(
        r#"
        (declare-rel Flag (Bool))
        (declare-var b Bool)
        (rule (Flag true))
        (rule (=> (Flag b) (Flag (not b))))
        (query (Flag false))
        "#,
        0,
        1,
    );
    let SolveResult::Unsat(cex) = &run.result else {
        panic!("expected unsat, got {:?}", run.result);
    };
    assert_eq!(cex.len(), 3);
    assert_eq!(cex.nodes[1].atom.args, vec![SmtValue::Bool(false)]);
    assert_eq!(cex.nodes[2].atom.args, vec![SmtValue::Bool(true)]);
}

#[test]
fn bounded_loop_solution_matches_reachable_set() {
    let mut run = run(
        r#"
        (set-logic HORN)
        (declare-fun Inv (Int Int) Bool)
        (assert (forall ((i Int) (s Int)) (=> (and (= i 0) (= s 0)) (Inv i s))))
        (assert (forall ((i Int) (s Int))
            (=> (and (Inv i s) (< i 3)) (Inv (+ i 1) (+ s 2)))))
        (assert (forall ((i Int) (s Int)) (=> (and (Inv i s) (distinct s (* 2 i))) false)))
        "#,
        0,
        6,
    );
    let SolveResult::Sat(solution) = &run.result else {
        panic!("expected sat, got {:?}", run.result);
    };
    let inv = normalized(&run).relations[0].id;
    let interp = solution.get(inv).unwrap();
    for i in 0..=6 {
        for s in 0..=6 {
            let reachable = i <= 3 && s == 2 * i;
            assert_eq!(
                interp.eval(&[SmtValue::Int(i), SmtValue::Int(s)]),
                Some(reachable),
                "Inv({i}, {s})"
            );
        }
    }
    let solution = solution.clone();
    assert!(verify_solution(&solution, &run.problem, &mut run.oracle).unwrap());
}

#[test]
fn goal_past_the_domain_is_still_reached() {
    let mut run = run(
        r#"
        (declare-rel R (Int))
        (declare-var x Int)
        (rule (R 0))
        (rule (=> (R x) (R (+ x 1))))
        (query (and (R x) (= x 20)))
        "#,
        -8,
        8,
    );
    let SolveResult::Unsat(cex) = &run.result else {
        panic!("expected unsat, got {:?}", run.result);
    };
    // root, then one node per value 0..=20
    assert_eq!(cex.len(), 22);
    assert_eq!(cex.nodes[1].atom, int_atom(&run, "R", &[20]));

    let cex = cex.clone();
    let problem = run.engine.problem().clone();
    assert!(verify_counterexample(&cex, &problem, &mut run.oracle).unwrap());
}

#[test]
fn renamed_existential_units_are_stored_once() {
    let config = EngineConfig {
        max_iterations: Some(200),
        ..EngineConfig::default()
    };
    let mut run = run_with(
        r#"
        (declare-rel P (Int))
        (declare-var x Int)
        (declare-var y Int)
        (rule (=> (= x (* 2 y)) (P x)))
        (rule (=> (P x) (P x)))
        (query (and (P x) (= x 3)))
        "#,
        0,
        4,
        config,
    );
    let SolveResult::Sat(solution) = &run.result else {
        panic!("expected sat, got {:?}", run.result);
    };
    let p = normalized(&run).relations[0].id;
    assert_eq!(run.engine.database().units_of(p).count(), 1);
    assert!(run.engine.stats().forward_subsumed >= 1);
    assert_eq!(solution.get(p).unwrap().existentials.len(), 1);

    let solution = solution.clone();
    assert!(verify_solution(&solution, &run.problem, &mut run.oracle).unwrap());
}
