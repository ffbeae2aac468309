//! Shannon-style equivalence replacement on bitwise subgraphs.
//!
//! For `base = And(l, r)`, a bit of `r` can only influence the result
//! where `l` has a one bit; dually for `Or`, where `l` has a zero bit. So
//! inside `r`, any occurrence of `l` may be assumed to be the identity
//! element of the base operation. When `l` is a `Not` or an `Eor` with a
//! literal, the assumption transfers through the wrapper to the wrapped
//! operand.
//!
//! The assumption is only sound along edges whose value cannot escape the
//! base: the search therefore descends only through bitwise nodes all of
//! whose uses have been seen within the current exploration. A rolling
//! visit counter detects "all uses seen" across independent searches
//! without clearing the counter map between them.
//!
//! Replacements are collected first and applied afterwards; each one is
//! re-validated against the then-current graph before it is performed.

use crate::fx::FxHashMap;
use crate::ir::{Graph, Node, NodeData, Opcode, Tarval};

/// A replacement candidate found by the search.
struct Pending {
    /// The And/Or node anchoring the assumption.
    base: Node,
    /// The wrapper (Not or Eor-with-literal) between `base` and `top`,
    /// if any.
    middle: Option<Node>,
    /// The node whose occurrences inside the sibling subgraph can be
    /// substituted.
    top: Node,
    /// The node with an input edge pointing at `target`.
    user: Node,
    /// What the edge points at: `top`, or `middle` when the wrapper
    /// itself has further users inside the subgraph.
    target: Node,
}

/// Search state shared by all explorations over one graph.
struct ShannonSearch {
    /// Per-node visit counters. A counter at or below `walk_base` counts
    /// as zero for the current exploration.
    visits: FxHashMap<Node, u32>,
    walk_base: u32,
    walk_max: u32,
    pending: Vec<Pending>,
}

impl ShannonSearch {
    fn new() -> Self {
        Self {
            visits: FxHashMap::default(),
            walk_base: 0,
            walk_max: 0,
            pending: Vec::new(),
        }
    }

    /// Start a fresh exploration without clearing the counter map.
    fn begin_walk(&mut self) {
        self.walk_base = self.walk_max;
    }

    /// Count one use edge of `n` as seen.
    fn visit(&mut self, n: Node) {
        let c = self.visits.entry(n).or_insert(0);
        if *c < self.walk_base {
            *c = self.walk_base;
        }
        *c += 1;
        if *c > self.walk_max {
            self.walk_max = *c;
        }
    }

    /// How many use edges of `n` the current exploration has seen.
    fn seen(&self, n: Node) -> usize {
        match self.visits.get(&n) {
            Some(&c) if c > self.walk_base => (c - self.walk_base) as usize,
            _ => 0,
        }
    }

    /// Identify the substitutable operand and its wrapper for one operand
    /// `l` of a base node, then search the sibling `r` for occurrences.
    fn collect(&mut self, graph: &Graph, base: Node, l: Node, r: Node) {
        let (top, middle) = match *graph.data(l) {
            NodeData::Unary { opcode: Opcode::Not, arg } => (arg, Some(l)),
            NodeData::Binary { opcode: Opcode::Eor, args } => {
                let k0 = graph.as_const(args[0]).is_some();
                let k1 = graph.as_const(args[1]).is_some();
                if k1 && !k0 {
                    (args[0], Some(l))
                } else if k0 && !k1 {
                    (args[1], Some(l))
                } else {
                    (l, None)
                }
            }
            _ => (l, None),
        };
        // A direct edge from base is not an occurrence inside the
        // subgraph; other rules handle that.
        if r == top || Some(r) == middle {
            return;
        }
        self.begin_walk();
        self.visit(r);
        self.walk(graph, r, base, top, middle);
    }

    /// Descend into `node` once all of its uses have been seen inside the
    /// current exploration, recording edges that reach `top` (or a
    /// multiply-used `middle`).
    fn walk(&mut self, graph: &Graph, node: Node, base: Node, top: Node, middle: Option<Node>) {
        if !graph.opcode(node).is_bitop() {
            return;
        }
        if self.seen(node) != graph.n_outs(node) {
            // A use escapes the explored region (so far); substituting
            // below would change the escaping value.
            return;
        }
        for i in 0..graph.arity(node) {
            let inp = graph.input(node, i);
            if inp == top {
                self.pending.push(Pending {
                    base,
                    middle,
                    top,
                    user: node,
                    target: top,
                });
            } else if middle == Some(inp) {
                self.pending.push(Pending {
                    base,
                    middle,
                    top,
                    user: node,
                    target: inp,
                });
            } else {
                self.visit(inp);
                self.walk(graph, inp, base, top, middle);
            }
        }
    }
}

/// Run the Shannon simplification over `graph`. Returns the number of
/// replaced edges.
pub(crate) fn apply(graph: &mut Graph) -> usize {
    let mut search = ShannonSearch::new();
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
        search.collect(graph, n, l, r);
        search.collect(graph, n, r, l);
    }

    let mut replaced = 0;
    for p in &search.pending {
        replaced += apply_one(graph, p);
    }
    replaced
}

/// Re-validate one pending replacement and perform it. The graph may have
/// been mutated since collection; a stale candidate is silently dropped.
fn apply_one(graph: &mut Graph, p: &Pending) -> usize {
    if graph.is_replaced(p.base) || graph.is_replaced(p.user) {
        return 0;
    }
    let anchor = p.middle.unwrap_or(p.top);
    if !graph.inputs(p.base).contains(&anchor) {
        return 0;
    }
    let mode = graph.mode(p.base);
    let identity = match graph.opcode(p.base) {
        Opcode::And => Tarval::all_ones(mode),
        Opcode::Or => Tarval::zero(mode),
        _ => return 0,
    };
    // How far the wrapped operand deviates from the wrapper's value:
    // middle = top ^ deviation.
    let deviation = match p.middle {
        None => Tarval::zero(mode),
        Some(m) => match *graph.data(m) {
            NodeData::Unary { opcode: Opcode::Not, arg } if arg == p.top => Tarval::all_ones(mode),
            NodeData::Binary { opcode: Opcode::Eor, args } => {
                let other = if args[0] == p.top {
                    args[1]
                } else if args[1] == p.top {
                    args[0]
                } else {
                    return 0;
                };
                match graph.as_const(other) {
                    Some(k) => k.convert(mode),
                    None => return 0,
                }
            }
            _ => return 0,
        },
    };
    let value = if p.target == p.top {
        identity.xor(deviation)
    } else {
        // The wrapper itself was reached; it is assumed to be the
        // identity.
        identity
    };

    let slots: Vec<usize> = graph
        .inputs(p.user)
        .iter()
        .enumerate()
        .filter(|&(_, &inp)| inp == p.target)
        .map(|(i, _)| i)
        .collect();
    if slots.is_empty() {
        return 0;
    }
    let cnst = graph.new_const(value);
    let mut count = 0;
    for i in slots {
        trace!(
            "shannon: {} input {} of {} replaced by {}",
            p.target,
            i,
            p.user,
            value
        );
        graph.set_input(p.user, i, cnst);
        count += 1;
    }
    count
}
