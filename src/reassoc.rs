//! Reassociation of commutative expressions.
//!
//! The pass rearranges nested applications of associative and commutative
//! operations so that constant operands meet and fold. A worklist-driven
//! forward phase pulls constants towards the root until a fixed point; a
//! reverse phase then pushes constants back out of chains where nothing
//! folded (so code generation is not penalized by the motion) and factors
//! `(a*x) + (b*x)` into `(a+b)*x`. Two bitwise simplifications run first:
//! the Shannon-style equivalence replacement (`shannon` module) and the
//! exclusive-or equality replacement (`eor_equality` module).
//!
//! Constants are ranked: a literal outranks a node that is merely constant
//! within the current region (constant-like leaves and loop-invariant
//! values), because only literals fold. Pulling region constants together
//! is still worthwhile, but the forward and reverse phases are duals, so
//! rule A carries a guard against the operand-class patterns that would
//! make them undo each other forever.

use crate::entity::SecondaryMap;
use crate::eor_equality;
use crate::ir::{Block, Graph, GraphProperties, Node, Opcode};
use crate::shannon;
use std::collections::VecDeque;

/// Classification of a node relative to a block.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
enum ConstClass {
    /// A literal constant, eligible for folding.
    RealConstant,
    /// Constant within the scope of the block: a constant-like leaf or a
    /// value that is invariant with respect to the block's loop.
    RegionConst,
    /// Not a constant at all.
    NoConstant,
}

/// Classify `n` as seen from `block`.
///
/// `Bad` nodes are never region constants, even when loop-invariant.
fn const_class(graph: &Graph, n: Node, block: Block) -> ConstClass {
    let op = graph.opcode(n);
    if op == Opcode::Const {
        return ConstClass::RealConstant;
    }
    if op.is_constlike() {
        return ConstClass::RegionConst;
    }
    if op == Opcode::Bad {
        return ConstClass::NoConstant;
    }
    if graph.loop_depth(graph.block(n)) < graph.loop_depth(block) {
        return ConstClass::RegionConst;
    }
    ConstClass::NoConstant
}

/// Return the operands of the commutative binary `n` as
/// `(variable, constant)`.
///
/// With two literals, the reference-mode one stays on the variable side so
/// an add of a pointer constant keeps looking like an address computation.
fn commutative_operands(graph: &Graph, n: Node) -> (Node, Node) {
    debug_assert!(graph.opcode(n).is_commutative());
    let block = graph.block(n);
    let l = graph.input(n, 0);
    let r = graph.input(n, 1);
    let cls_l = const_class(graph, l, block);
    let cls_r = const_class(graph, r, block);
    if cls_l == ConstClass::RealConstant && cls_r == ConstClass::RealConstant {
        if graph.mode(l).is_reference() {
            (l, r)
        } else {
            (r, l)
        }
    } else if cls_l == ConstClass::RealConstant
        || (cls_l == ConstClass::RegionConst && cls_r == ConstClass::NoConstant)
    {
        (r, l)
    } else {
        (l, r)
    }
}

/// The block where a node combining `a` and `b` belongs: the deeper of
/// their two blocks in the dominator tree. Falls back to `curr` when that
/// would be the start block, so combined constants are never hoisted into
/// the entry.
fn earliest_block(graph: &Graph, a: Node, b: Node, curr: Block) -> Block {
    let blk_a = graph.block(a);
    let blk_b = graph.block(b);
    let res = if graph.block_dominates(blk_a, blk_b) {
        blk_b
    } else {
        blk_a
    };
    if res == graph.entry_block() {
        curr
    } else {
        res
    }
}

/// Counters recorded while the pass runs.
#[derive(Clone, Debug, Default)]
struct Stats {
    shannon_replacements: u64,
    eor_replacements: u64,
    queue_visits: u64,
    rule_invocations: u64,
    constants_combined: u64,
    idempotent_collapsed: u64,
    consts_moved_up: u64,
    distributive_applied: u64,
}

/// The FIFO of nodes waiting to be reprocessed.
///
/// The `queued` side table is the scratch link slot of each node: set
/// while the node sits in the queue, cleared on dequeue.
struct Worklist {
    queue: VecDeque<Node>,
    queued: SecondaryMap<Node, bool>,
}

impl Worklist {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            queued: SecondaryMap::new(),
        }
    }

    fn push(&mut self, n: Node) {
        if !self.queued[n] {
            self.queued[n] = true;
            self.queue.push_back(n);
        }
    }

    fn pop(&mut self) -> Option<Node> {
        let n = self.queue.pop_front()?;
        self.queued[n] = false;
        Some(n)
    }
}

type RuleFn = fn(&mut Graph, &mut Node, &mut Stats) -> bool;

/// The rule table. Attaching the commutative rule to an opcode here is the
/// single registration point of the pass.
fn reassoc_rule(opcode: Opcode) -> Option<RuleFn> {
    match opcode {
        Opcode::Add | Opcode::And | Opcode::Eor | Opcode::Mul | Opcode::Or => {
            Some(reassoc_commutative)
        }
        _ => None,
    }
}

/// Widen `c1`/`c2` to a common integer mode before combining them.
///
/// The narrower operand is widened to the wider mode; with equal widths
/// the real constant is converted to the region constant's mode, since the
/// literal is the side a conversion can fold through.
fn coerce_modes(
    graph: &mut Graph,
    c1: Node,
    c2: Node,
    cls_c1: ConstClass,
) -> (Node, Node) {
    let m1 = graph.mode(c1);
    let m2 = graph.mode(c2);
    if m1 == m2 || !m1.is_int() || !m2.is_int() {
        return (c1, c2);
    }
    if m1.size_bits() < m2.size_bits() {
        let blk = graph.block(c1);
        (graph.new_conv(blk, c1, m2), c2)
    } else if m2.size_bits() < m1.size_bits() {
        let blk = graph.block(c2);
        (c1, graph.new_conv(blk, c2, m1))
    } else if cls_c1 == ConstClass::RealConstant {
        let blk = graph.block(c1);
        (graph.new_conv(blk, c1, m2), c2)
    } else {
        let blk = graph.block(c2);
        (c1, graph.new_conv(blk, c2, m1))
    }
}

/// The reassociation rule for the commutative operations.
///
/// Rule A rotates constants towards each other:
/// `c1 . (c2 . t2) => t2 . (c1 . c2)`, letting the constructor fold the
/// combined pair. Rule B collapses a duplicated operand:
/// `x . (x . r) => r . (x . x)` (the inner pair folds for And/Or/Eor and
/// becomes a shift for Add).
///
/// On success `node` is updated to the replacement root.
fn reassoc_commutative(graph: &mut Graph, node: &mut Node, stats: &mut Stats) -> bool {
    let n = *node;
    let op = graph.opcode(n);
    if !op.is_commutative() {
        // A previous application may have replaced the root by an
        // arbitrary equivalent node.
        return false;
    }
    let block = graph.block(n);
    let (t1, c1) = commutative_operands(graph, n);

    if graph.opcode(t1) == op {
        // n = c1 . (c2 . t2)
        let (t2, c2) = commutative_operands(graph, t1);
        let cls_c1 = const_class(graph, c1, block);
        let cls_c2 = const_class(graph, c2, block);
        let cls_t2 = const_class(graph, t2, block);

        let classes = [cls_c1, cls_c2, cls_t2];
        let region = classes
            .iter()
            .filter(|&&c| c == ConstClass::RegionConst)
            .count();
        let none = classes
            .iter()
            .filter(|&&c| c == ConstClass::NoConstant)
            .count();
        // Combining region constants with each other (or shuffling two of
        // them around a plain variable) never folds anything; firing on
        // those shapes would oscillate against the reverse rules.
        let oscillates = region == 3 || (region == 2 && none == 1);

        if cls_c1 != ConstClass::NoConstant && !oscillates {
            let (c1, c2) = coerce_modes(graph, c1, c2, cls_c1);
            let inner_block = earliest_block(graph, c1, c2, block);
            let inner_mode = graph.mode(c1);
            let inner = graph.new_binary(op, inner_mode, inner_block, c1, c2);
            let outer = graph.new_binary(op, graph.mode(n), block, t2, inner);
            let loc = graph.srcloc(n);
            if graph.srcloc(outer).is_default() {
                graph.set_srcloc(outer, loc);
            }
            trace!(
                "reassoc: combined constants of {} {} into {}",
                op,
                n,
                outer
            );
            graph.exchange(n, outer);
            *node = outer;
            stats.constants_combined += 1;
            return true;
        }
    }

    if graph.opcode(t1) == op {
        // n = c1 . (c1 . r)
        let l = graph.input(t1, 0);
        let r = graph.input(t1, 1);
        let other = if l == c1 {
            Some(r)
        } else if r == c1 {
            Some(l)
        } else {
            None
        };
        if let Some(r) = other {
            if const_class(graph, r, block) == ConstClass::NoConstant {
                let inner_block = earliest_block(graph, c1, c1, block);
                let inner = graph.new_binary(op, graph.mode(c1), inner_block, c1, c1);
                let outer = graph.new_binary(op, graph.mode(n), block, r, inner);
                let loc = graph.srcloc(n);
                if outer != r && graph.srcloc(outer).is_default() {
                    graph.set_srcloc(outer, loc);
                }
                trace!("reassoc: collapsed duplicated operand of {} {}", op, n);
                graph.exchange(n, outer);
                *node = outer;
                stats.idempotent_collapsed += 1;
                return true;
            }
        }
    }
    false
}

/// The worklist-driven forward phase: apply the registered rule of every
/// node to a fixed point, re-enqueueing the operands of changed nodes.
fn do_reassociation(graph: &mut Graph, stats: &mut Stats) {
    let mut wq = Worklist::new();
    let all: Vec<Node> = graph.nodes().collect();
    for n in all {
        if !graph.is_replaced(n) {
            wq.push(n);
        }
    }

    while let Some(n) = wq.pop() {
        stats.queue_visits += 1;
        if graph.is_replaced(n) {
            continue;
        }
        // Reassociating float expressions changes rounding behavior.
        if graph.mode(n).is_float() && !graph.imprecise_float_transforms_allowed() {
            continue;
        }
        let rule = match reassoc_rule(graph.opcode(n)) {
            Some(rule) => rule,
            None => continue,
        };
        let mut node = n;
        let mut changed = false;
        loop {
            trace!("reassociate begin: {}", node);
            let res = rule(graph, &mut node, stats);
            trace!("reassociate end: {}", node);
            stats.rule_invocations += 1;
            if !res {
                break;
            }
            changed = true;
        }
        if changed {
            // The operands may reassociate further against the new root.
            for i in 0..graph.arity(node) {
                let pred = graph.input(node, i);
                wq.push(pred);
            }
        }
    }
}

/// A constant expression: a literal or constant-like leaf, or an Add built
/// entirely from them.
fn is_constant_expr(graph: &Graph, n: Node) -> bool {
    match graph.opcode(n) {
        Opcode::Const
        | Opcode::Address
        | Opcode::Offset
        | Opcode::Size
        | Opcode::Align
        | Opcode::TypeConst => true,
        Opcode::Add => {
            is_constant_expr(graph, graph.input(n, 0))
                && is_constant_expr(graph, graph.input(n, 1))
        }
        _ => false,
    }
}

/// Find a constant expression buried one level down in `n = l . r`,
/// returning `(a, b, c, block)` such that `n` can be rebuilt as
/// `(a . b) . c` with `c` the constant expression and `block` the nested
/// node's block.
fn find_movable_const(
    graph: &Graph,
    op: Opcode,
    l: Node,
    r: Node,
) -> Option<(Node, Node, Node, Block)> {
    if graph.opcode(l) == op {
        let a = graph.input(l, 0);
        let b = graph.input(l, 1);
        if is_constant_expr(graph, a) {
            // (C . b) . r => (r . b) . C
            return Some((r, b, a, graph.block(l)));
        }
        if is_constant_expr(graph, b) {
            // (a . C) . r => (a . r) . C
            return Some((a, r, b, graph.block(l)));
        }
    }
    if graph.opcode(r) == op {
        let a = graph.input(r, 0);
        let b = graph.input(r, 1);
        if is_constant_expr(graph, a) {
            // l . (C . b) => (l . b) . C
            return Some((l, b, a, graph.block(r)));
        }
        if is_constant_expr(graph, b) {
            // l . (a . C) => (l . a) . C
            return Some((l, a, b, graph.block(r)));
        }
    }
    None
}

/// Reverse rule: move a constant expression from a nested application of
/// `n`'s operation to the outside, where a later phase (or the code
/// generator) can deal with it: `(C . b) . r => (r . b) . C` and the three
/// symmetric shapes.
fn move_consts_up(graph: &mut Graph, node: &mut Node, stats: &mut Stats) -> bool {
    let n = *node;
    let op = graph.opcode(n);
    let l = graph.input(n, 0);
    let r = graph.input(n, 1);

    // Already in the normal form the forward phase produces.
    if is_constant_expr(graph, l) || is_constant_expr(graph, r) {
        return false;
    }
    let (a, b, c, blk) = match find_movable_const(graph, op, l, r) {
        Some(found) => found,
        None => return false,
    };
    // Do not introduce mode coercions here.
    if graph.mode(a) != graph.mode(b) {
        return false;
    }
    // The rebuilt inner node must be legal in the nested node's block.
    if !graph.block_dominates(graph.block(a), blk) {
        return false;
    }
    if !graph.block_dominates(graph.block(b), blk) {
        return false;
    }
    let mode = graph.mode(n);
    let mut inner = graph.new_binary(op, mode, blk, a, b);
    // The constructor may have rewritten the node; look at what it
    // actually produced before trying to distribute.
    if matches!(graph.opcode(inner), Opcode::Add | Opcode::Sub) {
        reverse_rule_distributive(graph, &mut inner, stats);
    }
    let outer = graph.new_binary(op, mode, blk, inner, c);
    let loc = graph.srcloc(n);
    if graph.srcloc(outer).is_default() {
        graph.set_srcloc(outer, loc);
    }
    trace!("reassoc: moved constant out of {} {}", op, n);
    graph.exchange(n, outer);
    *node = outer;
    stats.consts_moved_up += 1;
    true
}

/// Reverse rule: undo distribution over a shared factor,
/// `(a . x) +/- (b . x) => (a +/- b) . x` for `.` in {Mul, Shl}.
fn reverse_rule_distributive(graph: &mut Graph, node: &mut Node, stats: &mut Stats) -> bool {
    let n = *node;
    let left = graph.input(n, 0);
    let right = graph.input(n, 1);
    let op = graph.opcode(left);
    if op != graph.opcode(right) {
        return false;
    }
    let (x, a, b) = match op {
        Opcode::Shl => {
            // Only a shared shift count on the right factors out.
            if graph.input(left, 1) != graph.input(right, 1) {
                return false;
            }
            (
                graph.input(left, 1),
                graph.input(left, 0),
                graph.input(right, 0),
            )
        }
        Opcode::Mul => {
            let ll = graph.input(left, 0);
            let lr = graph.input(left, 1);
            let rl = graph.input(right, 0);
            let rr = graph.input(right, 1);
            if ll == rl {
                (ll, lr, rr)
            } else if ll == rr {
                (ll, lr, rl)
            } else if lr == rl {
                (lr, ll, rr)
            } else if lr == rr {
                (lr, ll, rl)
            } else {
                return false;
            }
        }
        _ => return false,
    };

    let n_op = graph.opcode(n);
    debug_assert!(matches!(n_op, Opcode::Add | Opcode::Sub));
    let blk = earliest_block(graph, a, b, graph.block(n));
    let inner = graph.new_binary(n_op, graph.mode(a), blk, a, b);
    let blk = earliest_block(graph, inner, x, graph.block(n));
    let outer = graph.new_binary(op, graph.mode(n), blk, inner, x);
    let loc = graph.srcloc(n);
    if graph.srcloc(outer).is_default() {
        graph.set_srcloc(outer, loc);
    }
    trace!("reassoc: factored shared operand out of {}", n);
    graph.exchange(n, outer);
    *node = outer;
    stats.distributive_applied += 1;
    true
}

/// The reverse phase: one walk over all nodes, running the reverse rules
/// on each to a local fixed point.
fn reverse_walk(graph: &mut Graph, stats: &mut Stats) {
    let all: Vec<Node> = graph.nodes().collect();
    for n in all {
        if graph.is_replaced(n) {
            continue;
        }
        if graph.mode(n).is_float() && !graph.imprecise_float_transforms_allowed() {
            continue;
        }
        let mut node = n;
        loop {
            let mut res = false;
            if graph.opcode(node).is_commutative() {
                res = move_consts_up(graph, &mut node, stats);
            }
            // The rewrite may have produced an Add or Sub; check the
            // current opcode, not the one we started from.
            if matches!(graph.opcode(node), Opcode::Add | Opcode::Sub)
                && graph.arity(node) == 2
            {
                res |= reverse_rule_distributive(graph, &mut node, stats);
            }
            if !res {
                break;
            }
        }
    }
}

/// Reassociate the expressions of `graph` to expose constant folding, then
/// undo the motion where nothing folded.
///
/// The graph must be pinned. Dominance, loop info and out-edges are
/// assured on entry; only control-flow properties survive the pass.
pub fn optimize_reassociation(graph: &mut Graph) {
    assert!(graph.is_pinned(), "reassociation requires a pinned graph");
    graph.assure_properties(
        GraphProperties::CONSISTENT_DOMINANCE
            | GraphProperties::CONSISTENT_LOOP_INFO
            | GraphProperties::CONSISTENT_OUT_EDGES,
    );

    let mut stats = Stats::default();
    stats.shannon_replacements = shannon::apply(graph) as u64;
    stats.eor_replacements = eor_equality::apply(graph) as u64;
    do_reassociation(graph, &mut stats);
    reverse_walk(graph, &mut stats);
    trace!("reassociation: {:?}", stats);

    graph.confirm_properties(GraphProperties::CONTROL_FLOW);
}
