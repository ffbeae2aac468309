//! A control flow graph represented as mappings of blocks to their
//! predecessors and successors.
//!
//! Successor edges are stored on the blocks themselves by the
//! [`Graph`](crate::ir::Graph); this structure derives the inverse mapping
//! so dominator and loop computations can walk edges in both directions.

use crate::entity::SecondaryMap;
use crate::ir::{Block, Graph};
use smallvec::SmallVec;

/// A container for the successors and predecessors of some block.
#[derive(Clone, Default)]
struct CFGNode {
    /// Blocks that branch or jump to this block.
    predecessors: SmallVec<[Block; 2]>,
    /// Blocks this block branches or jumps to.
    successors: SmallVec<[Block; 2]>,
}

/// The control flow graph of a procedure: block predecessor and successor
/// lists.
pub struct ControlFlowGraph {
    data: SecondaryMap<Block, CFGNode>,
    valid: bool,
}

impl ControlFlowGraph {
    /// Allocate a new blank control flow graph.
    pub fn new() -> Self {
        Self {
            data: SecondaryMap::new(),
            valid: false,
        }
    }

    /// Clear all data structures in this control flow graph.
    pub fn clear(&mut self) {
        self.data.clear();
        self.valid = false;
    }

    /// Allocate and compute the control flow graph for `graph`.
    pub fn with_graph(graph: &Graph) -> Self {
        let mut cfg = Self::new();
        cfg.compute(graph);
        cfg
    }

    /// Compute the control flow graph of `graph`.
    ///
    /// This will clear and overwrite any information already stored in this
    /// data structure.
    pub fn compute(&mut self, graph: &Graph) {
        self.clear();
        self.data.resize(graph.num_blocks());
        for block in graph.blocks() {
            for &succ in graph.block_succs(block) {
                self.add_edge(block, succ);
            }
        }
        self.valid = true;
    }

    fn add_edge(&mut self, from: Block, to: Block) {
        self.data[from].successors.push(to);
        self.data[to].predecessors.push(from);
    }

    /// Get the CFG predecessors of `block`.
    pub fn preds(&self, block: Block) -> &[Block] {
        debug_assert!(self.is_valid());
        &self.data[block].predecessors
    }

    /// Get the CFG successors of `block`.
    pub fn succs(&self, block: Block) -> &[Block] {
        debug_assert!(self.is_valid());
        &self.data[block].successors
    }

    /// Check if the CFG is in a valid state.
    ///
    /// Note that this doesn't perform any kind of validity checks. It
    /// simply checks if the `compute()` method has been called since the
    /// last `clear()`. It does not check that the CFG is consistent with
    /// the graph.
    pub fn is_valid(&self) -> bool {
        self.valid
    }
}

impl Default for ControlFlowGraph {
    fn default() -> Self {
        Self::new()
    }
}
