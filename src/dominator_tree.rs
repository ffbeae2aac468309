//! Block dominance for a procedure graph.
//!
//! The tree is stored as an immediate-dominator link per block plus the
//! block's position in a reverse post-order of the CFG. Both a dominance
//! query and the common-dominator computation then reduce to walking idom
//! links upwards, using the RPO positions to decide which side to move.
//!
//! Computation follows the iterative scheme of Cooper, Harvey and
//! Kennedy ("A Simple, Fast Dominance Algorithm"): seed every block with
//! an idom guess derived from its already-numbered predecessors, then
//! sweep in reverse post-order until nothing moves. Reducible flow
//! converges in the first sweep; irreducible flow just takes a few more.

use crate::entity::SecondaryMap;
use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, Graph};
use crate::packed_option::PackedOption;
use core::cmp::Ordering;

/// Marker values for `rpo` while the post-order is being built, and the
/// state they leave behind: a reachable block holds `EXPANDED` until the
/// numbering pass replaces it with its final position.
const EXPANDED: u32 = 1;
const ON_STACK: u32 = 2;

/// Per-block dominance facts.
#[derive(Clone, Default)]
struct DomEntry {
    /// Position in a reverse post-order of the CFG, starting at 2 for the
    /// start block. Zero marks a block the traversal never reached.
    rpo: u32,

    /// Immediate dominator; none for the start block and for unreachable
    /// blocks.
    idom: PackedOption<Block>,
}

/// The dominator tree of one procedure graph.
pub struct DominatorTree {
    entries: SecondaryMap<Block, DomEntry>,

    /// The post-order the tree was computed from, kept for callers that
    /// want to traverse the CFG in a dominance-compatible order.
    postorder: Vec<Block>,

    /// Reused DFS stack.
    stack: Vec<Block>,

    valid: bool,
}

/// Methods for querying the dominator tree.
impl DominatorTree {
    /// Did the traversal reach `block` from the start block?
    pub fn is_reachable(&self, block: Block) -> bool {
        self.entries[block].rpo != 0
    }

    /// The CFG post-order underlying this tree.
    ///
    /// Snapshot taken by `compute()`; editing the block graph afterwards
    /// does not refresh it.
    pub fn cfg_postorder(&self) -> &[Block] {
        debug_assert!(self.is_valid());
        &self.postorder
    }

    /// The immediate dominator of `block`, or `None` for the start block
    /// and for unreachable blocks.
    pub fn idom(&self, block: Block) -> Option<Block> {
        self.entries[block].idom.into()
    }

    /// Order two blocks by their reverse post-order positions.
    fn rpo_cmp(&self, a: Block, b: Block) -> Ordering {
        self.entries[a].rpo.cmp(&self.entries[b].rpo)
    }

    /// Does every path from the start block to `b` pass through `a`?
    ///
    /// A block dominates itself. Unreachable blocks dominate nothing and
    /// are dominated by nothing.
    pub fn dominates(&self, a: Block, mut b: Block) -> bool {
        debug_assert!(self.is_valid());
        if !self.is_reachable(a) || !self.is_reachable(b) {
            return false;
        }
        // Climb from b towards the root; a dominator can never sit later
        // in the RPO than the blocks it dominates.
        let rpo_a = self.entries[a].rpo;
        while rpo_a < self.entries[b].rpo {
            match self.idom(b) {
                Some(idom) => b = idom,
                None => return false,
            }
        }
        a == b
    }

    /// The closest block dominating both `a` and `b`, which must both be
    /// reachable.
    pub fn common_dominator(&self, mut a: Block, mut b: Block) -> Block {
        debug_assert!(self.is_valid());
        loop {
            // Whichever side sits later in the RPO cannot dominate the
            // other, so move it to its idom.
            match self.rpo_cmp(a, b) {
                Ordering::Less => {
                    b = self.entries[b]
                        .idom
                        .expect("climbed past the start block; is b reachable?");
                }
                Ordering::Greater => {
                    a = self.entries[a]
                        .idom
                        .expect("climbed past the start block; is a reachable?");
                }
                Ordering::Equal => break,
            }
        }
        debug_assert_eq!(a, b, "distinct blocks cannot share an RPO position");
        a
    }
}

impl DominatorTree {
    /// Allocate an empty dominator tree; fill it with `compute`.
    pub fn new() -> Self {
        Self {
            entries: SecondaryMap::new(),
            postorder: Vec::new(),
            stack: Vec::new(),
            valid: false,
        }
    }

    /// Allocate and compute a dominator tree in one step.
    pub fn with_graph(graph: &Graph, cfg: &ControlFlowGraph) -> Self {
        let mut domtree = Self::new();
        domtree.compute(graph, cfg);
        domtree
    }

    /// Recompute the tree for the current block graph.
    pub fn compute(&mut self, graph: &Graph, cfg: &ControlFlowGraph) {
        debug_assert!(cfg.is_valid());
        self.build_postorder(graph);
        self.build_domtree(graph, cfg);
        self.valid = true;
    }

    /// Discard the computed tree; `is_valid()` reports false until the
    /// next `compute`.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.postorder.clear();
        debug_assert!(self.stack.is_empty());
        self.valid = false;
    }

    /// Whether `compute()` has run since the last `clear()`. Says nothing
    /// about staleness with respect to later graph edits.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Depth-first traversal from the start block producing a post-order
    /// of the reachable blocks.
    ///
    /// Each reachable block is pushed twice: once when first discovered
    /// (`ON_STACK`), and again after its successors have been pushed
    /// (`EXPANDED`); the second pop emits it. On return, `rpo` is
    /// `EXPANDED` for every reachable block and 0 elsewhere.
    fn build_postorder(&mut self, graph: &Graph) {
        self.clear();
        self.entries.resize(graph.num_blocks());

        if graph.num_blocks() == 0 {
            return;
        }
        let entry = graph.entry_block();
        self.stack.push(entry);
        self.entries[entry].rpo = ON_STACK;

        while let Some(block) = self.stack.pop() {
            match self.entries[block].rpo {
                ON_STACK => {
                    // First pop: queue the block again behind its
                    // successors so it is emitted after all of them.
                    self.entries[block].rpo = EXPANDED;
                    self.stack.push(block);
                    for &succ in graph.block_succs(block) {
                        if self.entries[succ].rpo == 0 {
                            self.entries[succ].rpo = ON_STACK;
                            self.stack.push(succ);
                        }
                    }
                }
                EXPANDED => self.postorder.push(block),
                _ => unreachable!("postorder marker out of range"),
            }
        }
    }

    /// The Cooper/Harvey/Kennedy fixpoint over the reverse post-order.
    ///
    /// While this runs, `rpo` distinguishes three cases: 0 for
    /// unreachable blocks, 1 (`EXPANDED`) for reachable blocks that have
    /// no number yet, and 2+ for numbered blocks. `guess_idom` only looks
    /// at numbered predecessors, so the seeding pass never consults an
    /// uninitialized entry: reverse post-order guarantees every non-start
    /// block is preceded by at least one numbered predecessor.
    fn build_domtree(&mut self, graph: &Graph, cfg: &ControlFlowGraph) {
        let (entry, rest) = match self.postorder.as_slice().split_last() {
            Some((&entry, rest)) => (entry, rest),
            None => return,
        };
        debug_assert_eq!(entry, graph.entry_block());

        // Number the blocks and take a first guess at each idom.
        self.entries[entry].rpo = 2;
        for (idx, &block) in rest.iter().rev().enumerate() {
            self.entries[block] = DomEntry {
                idom: self.guess_idom(block, cfg).into(),
                rpo: idx as u32 + 3,
            }
        }

        // Re-guess until the tree settles. One sweep suffices unless the
        // flow graph is irreducible.
        let mut changed = true;
        while changed {
            changed = false;
            for &block in rest.iter().rev() {
                let idom = self.guess_idom(block, cfg).into();
                if self.entries[block].idom != idom {
                    self.entries[block].idom = idom;
                    changed = true;
                }
            }
        }
    }

    /// Estimate the immediate dominator of `block` from its currently
    /// numbered predecessors: their common dominator.
    fn guess_idom(&self, block: Block, cfg: &ControlFlowGraph) -> Block {
        let mut numbered = cfg
            .preds(block)
            .iter()
            .copied()
            .filter(|&pred| self.entries[pred].rpo > EXPANDED);

        let mut idom = numbered
            .next()
            .expect("non-start block with no numbered predecessor in RPO");

        for pred in numbered {
            idom = self.common_dominator(idom, pred);
        }

        idom
    }
}

impl Default for DominatorTree {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty() {
        let graph = Graph::new();
        let cfg = ControlFlowGraph::with_graph(&graph);
        let domtree = DominatorTree::with_graph(&graph, &cfg);
        assert!(domtree.is_valid());
        assert!(domtree.cfg_postorder().is_empty());
    }

    #[test]
    fn unreachable_block() {
        let mut graph = Graph::new();
        let block0 = graph.make_block();
        let block1 = graph.make_block();
        let cfg = ControlFlowGraph::with_graph(&graph);
        let domtree = DominatorTree::with_graph(&graph, &cfg);
        assert!(domtree.is_reachable(block0));
        assert!(!domtree.is_reachable(block1));
        assert!(!domtree.dominates(block0, block1));
        assert!(!domtree.dominates(block1, block0));
    }

    #[test]
    fn diamond() {
        let mut graph = Graph::new();
        let entry = graph.make_block();
        let left = graph.make_block();
        let right = graph.make_block();
        let join = graph.make_block();
        graph.add_block_edge(entry, left);
        graph.add_block_edge(entry, right);
        graph.add_block_edge(left, join);
        graph.add_block_edge(right, join);

        let cfg = ControlFlowGraph::with_graph(&graph);
        let domtree = DominatorTree::with_graph(&graph, &cfg);

        assert_eq!(domtree.idom(entry), None);
        assert_eq!(domtree.idom(left), Some(entry));
        assert_eq!(domtree.idom(right), Some(entry));
        assert_eq!(domtree.idom(join), Some(entry));

        assert!(domtree.dominates(entry, join));
        assert!(domtree.dominates(join, join));
        assert!(!domtree.dominates(left, join));
        assert!(!domtree.dominates(left, right));

        assert_eq!(domtree.common_dominator(left, right), entry);
        assert_eq!(domtree.common_dominator(entry, join), entry);
        assert_eq!(domtree.common_dominator(left, join), entry);
    }

    #[test]
    fn chain() {
        let mut graph = Graph::new();
        let b0 = graph.make_block();
        let b1 = graph.make_block();
        let b2 = graph.make_block();
        graph.add_block_edge(b0, b1);
        graph.add_block_edge(b1, b2);

        let cfg = ControlFlowGraph::with_graph(&graph);
        let domtree = DominatorTree::with_graph(&graph, &cfg);

        assert!(domtree.dominates(b0, b2));
        assert!(domtree.dominates(b1, b2));
        assert!(!domtree.dominates(b2, b1));
        assert_eq!(domtree.common_dominator(b1, b2), b1);
        assert_eq!(domtree.cfg_postorder(), &[b2, b1, b0]);
    }

    #[test]
    fn self_loop() {
        let mut graph = Graph::new();
        let b0 = graph.make_block();
        let b1 = graph.make_block();
        graph.add_block_edge(b0, b1);
        graph.add_block_edge(b1, b1);

        let cfg = ControlFlowGraph::with_graph(&graph);
        let domtree = DominatorTree::with_graph(&graph, &cfg);

        assert_eq!(domtree.idom(b1), Some(b0));
        assert!(domtree.dominates(b1, b1));
    }
}
