//! Exclusive-or equality replacement.
//!
//! For `base = Or(Eor(a, b), r)`, the operand `r` only matters where the
//! Eor is zero, i.e. where `a` and `b` are equal; occurrences of one
//! inside `r` may then be rewritten to the other. For an `And` base the
//! Eor must be all-ones instead, so the substitute is complemented; a Not
//! wrapped around the Eor (or around `a` or `b`) toggles that again.
//!
//! When one Eor operand is a literal the substitution starts immediately.
//! Otherwise the walk keeps the first occurrence it meets and rewrites
//! later occurrences of the other operand in terms of it, normalizing the
//! subtree to a single variable. The walk stays inside the bitwise,
//! single-use region below `r`; anything else could be observed from
//! outside the base.

use crate::ir::{Graph, Node, Opcode};
use core::mem;

/// One substitution walk below a base node.
struct Walker<'a> {
    graph: &'a mut Graph,
    /// The operand whose occurrences are rewritten.
    a: Node,
    /// The replacement operand.
    b: Node,
    /// Substitute `Not(b)` instead of `b`.
    need_not: bool,
    /// Whether substitution is armed; starts false unless `b` is a
    /// literal, becomes true once a first occurrence has been kept.
    replace: bool,
    /// Cached `Not(b)` node, built on first use.
    not_b: Option<Node>,
    replaced: usize,
}

impl Walker<'_> {
    fn substitute(&mut self) -> Node {
        if !self.need_not {
            return self.b;
        }
        if let Some(n) = self.not_b {
            return n;
        }
        let blk = self.graph.block(self.b);
        let n = self.graph.new_not(blk, self.b);
        self.not_b = Some(n);
        n
    }

    fn walk(&mut self, node: Node) {
        if !self.graph.opcode(node).is_bitop() || self.graph.n_outs(node) != 1 {
            return;
        }
        for i in 0..self.graph.arity(node) {
            let inp = self.graph.input(node, i);
            if inp == self.a {
                if self.replace {
                    // The substitute must be available where it is used.
                    if self
                        .graph
                        .block_dominates(self.graph.block(self.b), self.graph.block(node))
                    {
                        let new = self.substitute();
                        if new != inp {
                            self.graph.set_input(node, i, new);
                            self.replaced += 1;
                            trace!("eor equality: rewrote input {} of {}", i, node);
                        }
                    }
                } else {
                    // Keep this occurrence; from here on the other
                    // operand is the one to rewrite.
                    mem::swap(&mut self.a, &mut self.b);
                    debug_assert!(self.not_b.is_none());
                    self.replace = true;
                }
            } else if inp == self.b {
                if !self.replace {
                    self.replace = true;
                }
            } else {
                self.walk(inp);
            }
        }
    }
}

/// Try to use the equality information of `xor_side` (an Eor, possibly
/// under a Not) to rewrite the sibling operand `other` of `base`. Returns
/// false when `xor_side` has no usable shape.
fn try_operand(
    graph: &mut Graph,
    base: Node,
    xor_side: Node,
    other: Node,
    replaced: &mut usize,
) -> bool {
    let mut need_not = graph.opcode(base) == Opcode::And;
    let mut x = xor_side;
    if graph.opcode(x) == Opcode::Not {
        x = graph.input(x, 0);
        need_not = !need_not;
    }
    if graph.opcode(x) != Opcode::Eor {
        return false;
    }
    let mut a = graph.input(x, 0);
    let mut b = graph.input(x, 1);
    let replace;
    if graph.as_const(b).is_some() {
        replace = true;
    } else if graph.as_const(a).is_some() {
        mem::swap(&mut a, &mut b);
        replace = true;
    } else {
        // No literal: strip leading complements so the kept occurrence
        // and the substitute agree up to `need_not`.
        if graph.opcode(a) == Opcode::Not {
            a = graph.input(a, 0);
            need_not = !need_not;
        }
        if graph.opcode(b) == Opcode::Not {
            b = graph.input(b, 0);
            need_not = !need_not;
        }
        replace = false;
    }
    let mut walker = Walker {
        graph,
        a,
        b,
        need_not,
        replace,
        not_b: None,
        replaced: 0,
    };
    walker.walk(other);
    *replaced += walker.replaced;
    true
}

/// Run the exclusive-or equality simplification over `graph`. Returns the
/// number of rewritten edges.
pub(crate) fn apply(graph: &mut Graph) -> usize {
    let mut replaced = 0;
    let all: Vec<Node> = graph.nodes().collect();
    for n in all {
        if graph.is_replaced(n) {
            continue;
        }
        if !matches!(graph.opcode(n), Opcode::And | Opcode::Or) || !graph.mode(n).is_int() {
            continue;
        }
        let l = graph.input(n, 0);
        let r = graph.input(n, 1);
        if try_operand(graph, n, l, r, &mut replaced) {
            continue;
        }
        try_operand(graph, n, r, l, &mut replaced);
    }
    replaced
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::{Mode, Tarval};

    fn setup() -> (Graph, crate::ir::Block, Node, Node) {
        let mut graph = Graph::new();
        let block = graph.make_block();
        let a = graph.new_param(block, Mode::I32);
        let b = graph.new_param(block, Mode::I32);
        (graph, block, a, b)
    }

    #[test]
    fn and_base_rewrites_to_complement() {
        // And(Eor(a, b), Or(a, b)) => And(Eor(a, b), Or(a, Not(a))).
        let (mut graph, block, a, b) = setup();
        let eor = graph.new_eor(block, a, b);
        let or = graph.new_or(block, a, b);
        let root = graph.new_and(block, eor, or);

        let replaced = apply(&mut graph);

        assert_eq!(replaced, 1);
        assert_eq!(graph.input(or, 0), a);
        let rewritten = graph.input(or, 1);
        assert_eq!(graph.opcode(rewritten), Opcode::Not);
        assert_eq!(graph.input(rewritten, 0), a);
        assert_eq!(graph.inputs(root), &[eor, or]);
    }

    #[test]
    fn or_base_rewrites_to_equal() {
        // Or(Eor(a, b), And(a, b)) => Or(Eor(a, b), And(a, a)): where the
        // Eor is zero the operands agree.
        let (mut graph, block, a, b) = setup();
        let eor = graph.new_eor(block, a, b);
        let and = graph.new_and(block, a, b);
        let _root = graph.new_or(block, eor, and);

        let replaced = apply(&mut graph);

        assert_eq!(replaced, 1);
        assert_eq!(graph.inputs(and), &[a, a]);
    }

    #[test]
    fn literal_operand_substitutes_immediately() {
        // And(Eor(a, K), Or(a, b)): where the Eor is all-ones, a is the
        // complement of K.
        let (mut graph, block, a, b) = setup();
        let k = graph.new_const(Tarval::new(Mode::I32, 0x0f));
        let eor = graph.new_eor(block, a, k);
        let or = graph.new_or(block, a, b);
        let _root = graph.new_and(block, eor, or);

        let replaced = apply(&mut graph);

        assert_eq!(replaced, 1);
        assert_eq!(
            graph.as_const(graph.input(or, 0)),
            Some(Tarval::new(Mode::I32, 0xffff_fff0))
        );
        assert_eq!(graph.input(or, 1), b);
    }

    #[test]
    fn or_base_with_literal() {
        // Or(Eor(a, K), And(a, b)): where the Eor is zero, a equals K.
        let (mut graph, block, a, b) = setup();
        let k = graph.new_const(Tarval::new(Mode::I32, 0x0f));
        let eor = graph.new_eor(block, a, k);
        let and = graph.new_and(block, a, b);
        let _root = graph.new_or(block, eor, and);

        let replaced = apply(&mut graph);

        assert_eq!(replaced, 1);
        assert_eq!(graph.input(and, 0), k);
        assert_eq!(graph.input(and, 1), b);
    }

    #[test]
    fn not_wrapper_flips_the_polarity() {
        // Or(Not(Eor(a, b)), And(a, b)): Not(Eor) is non-zero exactly
        // where the operands differ, so the substitute is complemented.
        let (mut graph, block, a, b) = setup();
        let eor = graph.new_eor(block, a, b);
        let noteor = graph.new_not(block, eor);
        let and = graph.new_and(block, a, b);
        let _root = graph.new_or(block, noteor, and);

        let replaced = apply(&mut graph);

        assert_eq!(replaced, 1);
        assert_eq!(graph.input(and, 0), a);
        let rewritten = graph.input(and, 1);
        assert_eq!(graph.opcode(rewritten), Opcode::Not);
        assert_eq!(graph.input(rewritten, 0), a);
    }

    #[test]
    fn multi_user_subtree_is_left_alone() {
        let (mut graph, block, a, b) = setup();
        let eor = graph.new_eor(block, a, b);
        let or = graph.new_or(block, a, b);
        let _root = graph.new_and(block, eor, or);
        // A second user of the Or: its value escapes the base.
        let _escape = graph.new_add(block, or, a);

        let replaced = apply(&mut graph);

        assert_eq!(replaced, 0);
        assert_eq!(graph.inputs(or), &[a, b]);
    }

    #[test]
    fn deep_occurrences_are_rewritten() {
        // And(Eor(a, b), Or(And(b, c), a)): the first b is kept, the
        // later a is rewritten as Not(b).
        let (mut graph, block, a, b) = setup();
        let c = graph.new_param(block, Mode::I32);
        let eor = graph.new_eor(block, a, b);
        let and_bc = graph.new_and(block, b, c);
        let or = graph.new_or(block, and_bc, a);
        let _root = graph.new_and(block, eor, or);

        let replaced = apply(&mut graph);

        assert_eq!(replaced, 1);
        assert_eq!(graph.inputs(and_bc), &[b, c]);
        let rewritten = graph.input(or, 1);
        assert_eq!(graph.opcode(rewritten), Opcode::Not);
        assert_eq!(graph.input(rewritten, 0), b);
    }
}
