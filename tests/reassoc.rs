//! End-to-end tests for the reassociation pass: the concrete rewrite
//! scenarios, and a property test checking that the pass preserves the
//! value of arbitrary expression trees.

use gantry_midend::ir::{Block, Graph, Mode, Node, Opcode, Tarval};
use gantry_midend::optimize_reassociation;
use proptest::prelude::*;
use std::collections::HashMap;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Evaluate the expression rooted at `n` under a valuation of the Param
/// nodes.
fn eval(graph: &Graph, n: Node, env: &HashMap<Node, Tarval>) -> Tarval {
    let n = graph.resolve(n);
    if let Some(v) = graph.as_const(n) {
        return v;
    }
    let mode = graph.mode(n);
    match graph.opcode(n) {
        Opcode::Param => env[&n],
        Opcode::Not => eval(graph, graph.input(n, 0), env).not(),
        Opcode::Conv => eval(graph, graph.input(n, 0), env).convert(mode),
        op => {
            let l = eval(graph, graph.input(n, 0), env);
            let r = eval(graph, graph.input(n, 1), env);
            match op {
                Opcode::Add => l.convert(mode).add(r.convert(mode)),
                Opcode::Sub => l.convert(mode).sub(r.convert(mode)),
                Opcode::Mul => l.convert(mode).mul(r.convert(mode)),
                Opcode::And => l.convert(mode).and(r.convert(mode)),
                Opcode::Or => l.convert(mode).or(r.convert(mode)),
                Opcode::Eor => l.convert(mode).xor(r.convert(mode)),
                Opcode::Shl => l.convert(mode).shl(r),
                Opcode::Rol => l.convert(mode).rol(r),
                _ => panic!("cannot evaluate {op}"),
            }
        }
    }
}

fn ival(v: u64) -> Tarval {
    Tarval::new(Mode::I32, v)
}

#[test]
fn s1_constants_meet_and_fold() {
    init_logging();
    let mut graph = Graph::new();
    let block = graph.make_block();
    let x = graph.new_param(block, Mode::I32);
    let c1 = graph.new_const(ival(100));
    let c2 = graph.new_const(ival(23));
    let t1 = graph.new_add(block, c2, x);
    let n = graph.new_add(block, c1, t1);

    let env: HashMap<Node, Tarval> = [(x, ival(7))].into_iter().collect();
    let before = eval(&graph, n, &env);

    optimize_reassociation(&mut graph);

    let root = graph.resolve(n);
    assert_eq!(graph.opcode(root), Opcode::Add);
    assert_eq!(graph.input(root, 0), x);
    assert_eq!(graph.as_const(graph.input(root, 1)), Some(ival(123)));
    assert_eq!(eval(&graph, root, &env), before);
}

#[test]
fn s2_multiplication_chain() {
    init_logging();
    let mut graph = Graph::new();
    let block = graph.make_block();
    let x = graph.new_param(block, Mode::I32);
    let c1 = graph.new_const(ival(5));
    let c2 = graph.new_const(ival(8));
    let t1 = graph.new_mul(block, x, c2);
    let n = graph.new_mul(block, c1, t1);

    optimize_reassociation(&mut graph);

    let root = graph.resolve(n);
    assert_eq!(graph.opcode(root), Opcode::Mul);
    assert_eq!(graph.input(root, 0), x);
    assert_eq!(graph.as_const(graph.input(root, 1)), Some(ival(40)));
}

#[test]
fn s3_distribution_is_reversed() {
    init_logging();
    let mut graph = Graph::new();
    let block = graph.make_block();
    let a = graph.new_param(block, Mode::I32);
    let b = graph.new_param(block, Mode::I32);
    let x = graph.new_param(block, Mode::I32);
    let ma = graph.new_mul(block, a, x);
    let mb = graph.new_mul(block, b, x);
    let n = graph.new_add(block, ma, mb);

    let env: HashMap<Node, Tarval> =
        [(a, ival(3)), (b, ival(4)), (x, ival(5))].into_iter().collect();
    let before = eval(&graph, n, &env);

    optimize_reassociation(&mut graph);

    let root = graph.resolve(n);
    assert_eq!(graph.opcode(root), Opcode::Mul);
    assert_eq!(graph.opcode(graph.input(root, 0)), Opcode::Add);
    assert_eq!(graph.input(root, 1), x);
    assert_eq!(eval(&graph, root, &env), before);
    assert_eq!(before, ival(35));
}

#[test]
fn s4_shannon_replaces_reached_operand() {
    init_logging();
    let mut graph = Graph::new();
    let block = graph.make_block();
    let a = graph.new_param(block, Mode::I32);
    let b = graph.new_param(block, Mode::I32);
    let or_ab = graph.new_or(block, a, b);
    let and_ba = graph.new_and(block, b, a);
    let or2 = graph.new_or(block, a, and_ba);
    let root = graph.new_and(block, or_ab, or2);

    let env: HashMap<Node, Tarval> =
        [(a, ival(0b1100)), (b, ival(0b1010))].into_iter().collect();
    let before = eval(&graph, root, &env);

    optimize_reassociation(&mut graph);

    // Inside Or(a, And(b, a)) the reached a is replaced by the Or
    // identity, zero.
    let new_root = graph.resolve(root);
    assert_eq!(graph.input(new_root, 0), or_ab);
    let or2 = graph.resolve(or2);
    assert_eq!(graph.input(or2, 0), a);
    let and_ba = graph.resolve(graph.input(or2, 1));
    assert_eq!(graph.input(and_ba, 0), b);
    assert_eq!(graph.as_const(graph.input(and_ba, 1)), Some(ival(0)));
    assert_eq!(eval(&graph, new_root, &env), before);
}

#[test]
fn s5_eor_equality_rewrite() {
    init_logging();
    let mut graph = Graph::new();
    let block = graph.make_block();
    let a = graph.new_param(block, Mode::I32);
    let b = graph.new_param(block, Mode::I32);
    let eor = graph.new_eor(block, a, b);
    let or = graph.new_or(block, a, b);
    let root = graph.new_and(block, eor, or);

    let env: HashMap<Node, Tarval> =
        [(a, ival(0xf0f0)), (b, ival(0x1234))].into_iter().collect();
    let before = eval(&graph, root, &env);

    optimize_reassociation(&mut graph);

    // And(Eor(a, b), Or(a, b)) => And(Eor(a, b), Or(a, Not(a))).
    let root = graph.resolve(root);
    let or = graph.resolve(or);
    assert_eq!(graph.input(root, 0), eor);
    assert_eq!(graph.input(or, 0), a);
    let not_a = graph.input(or, 1);
    assert_eq!(graph.opcode(not_a), Opcode::Not);
    assert_eq!(graph.input(not_a, 0), a);
    assert_eq!(eval(&graph, root, &env), before);
}

#[test]
fn s6_long_chain_folds_to_one_constant() {
    init_logging();
    let mut graph = Graph::new();
    let block = graph.make_block();
    let x = graph.new_param(block, Mode::I32);
    let c1 = graph.new_const(ival(10));
    let c2 = graph.new_const(ival(20));
    let c3 = graph.new_const(ival(30));
    let t2 = graph.new_add(block, c3, x);
    let t1 = graph.new_add(block, c2, t2);
    let n = graph.new_add(block, c1, t1);

    optimize_reassociation(&mut graph);

    let root = graph.resolve(n);
    assert_eq!(graph.opcode(root), Opcode::Add);
    assert_eq!(graph.input(root, 0), x);
    assert_eq!(graph.as_const(graph.input(root, 1)), Some(ival(60)));

    // A second application reaches the same fixed point.
    let nodes = graph.num_nodes();
    optimize_reassociation(&mut graph);
    assert_eq!(graph.num_nodes(), nodes);
    assert!(!graph.is_replaced(root));
}

#[test]
fn subtraction_of_shifts_is_factored() {
    init_logging();
    let mut graph = Graph::new();
    let block = graph.make_block();
    let a = graph.new_param(block, Mode::U32);
    let b = graph.new_param(block, Mode::U32);
    let s = graph.new_param(block, Mode::U32);
    let sa = graph.new_shl(block, a, s);
    let sb = graph.new_shl(block, b, s);
    let n = graph.new_sub(block, sa, sb);

    let env: HashMap<Node, Tarval> = [
        (a, Tarval::new(Mode::U32, 1000)),
        (b, Tarval::new(Mode::U32, 77)),
        (s, Tarval::new(Mode::U32, 3)),
    ]
    .into_iter()
    .collect();
    let before = eval(&graph, n, &env);

    optimize_reassociation(&mut graph);

    let root = graph.resolve(n);
    assert_eq!(graph.opcode(root), Opcode::Shl);
    assert_eq!(eval(&graph, root, &env), before);
}

/// A recipe for a random expression tree over four parameters.
#[derive(Clone, Debug)]
enum Expr {
    Const(u32),
    Param(usize),
    Bin(u8, Box<Expr>, Box<Expr>),
}

fn expr_strategy() -> impl Strategy<Value = Expr> {
    let leaf = prop_oneof![
        any::<u32>().prop_map(Expr::Const),
        (0usize..4).prop_map(Expr::Param),
    ];
    leaf.prop_recursive(4, 48, 2, |inner| {
        (0u8..5, inner.clone(), inner)
            .prop_map(|(op, l, r)| Expr::Bin(op, Box::new(l), Box::new(r)))
    })
}

fn build(graph: &mut Graph, block: Block, params: &[Node], e: &Expr) -> Node {
    match e {
        Expr::Const(v) => graph.new_const(ival(u64::from(*v))),
        Expr::Param(i) => params[*i],
        Expr::Bin(op, l, r) => {
            let a = build(graph, block, params, l);
            let b = build(graph, block, params, r);
            match op {
                0 => graph.new_add(block, a, b),
                1 => graph.new_mul(block, a, b),
                2 => graph.new_and(block, a, b),
                3 => graph.new_or(block, a, b),
                _ => graph.new_eor(block, a, b),
            }
        }
    }
}

proptest! {
    /// The pass preserves the value computed at the root for arbitrary
    /// expression shapes and input valuations.
    #[test]
    fn pass_preserves_semantics(
        e in expr_strategy(),
        vals in proptest::array::uniform4(any::<u32>()),
    ) {
        let mut graph = Graph::new();
        let block = graph.make_block();
        let params: Vec<Node> = (0..4).map(|_| graph.new_param(block, Mode::I32)).collect();
        let root = build(&mut graph, block, &params, &e);
        let env: HashMap<Node, Tarval> = params
            .iter()
            .zip(vals.iter())
            .map(|(&p, &v)| (p, ival(u64::from(v))))
            .collect();
        let before = eval(&graph, root, &env);

        optimize_reassociation(&mut graph);

        let after = eval(&graph, graph.resolve(root), &env);
        prop_assert_eq!(before, after);
    }
}
