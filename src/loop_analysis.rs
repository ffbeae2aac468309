//! A loop analysis represented as mappings of loops to their header blocks
//! and parent loops.
//!
//! Loops are discovered from back edges: an edge whose destination
//! dominates its source closes a natural loop headed by the destination.
//! Loop membership and nesting levels drive the region-constant
//! classification of the reassociation pass (a value defined at a lower
//! nesting level is invariant with respect to a deeper block).

use crate::dominator_tree::DominatorTree;
use crate::entity::{Keys, PrimaryMap, SecondaryMap};
use crate::flowgraph::ControlFlowGraph;
use crate::ir::{Block, Graph, Loop};
use crate::packed_option::PackedOption;

/// A loop nesting level. Level 0 means "not in any loop".
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug)]
pub struct LoopLevel(u8);

impl LoopLevel {
    const INVALID: u8 = u8::MAX;

    /// The level of a block outside any loop.
    pub fn root() -> Self {
        Self(0)
    }

    /// The nesting depth as a number.
    pub fn level(self) -> usize {
        debug_assert_ne!(self.0, Self::INVALID);
        self.0 as usize
    }
}

impl Default for LoopLevel {
    fn default() -> Self {
        Self(Self::INVALID)
    }
}

/// Data about one discovered loop.
#[derive(Clone)]
struct LoopData {
    header: Block,
    parent: PackedOption<Loop>,
    level: LoopLevel,
}

/// Loop tree information for a single procedure graph.
///
/// Loops are referenced by [`Loop`] handles; blocks map to their innermost
/// enclosing loop, if any.
pub struct LoopAnalysis {
    loops: PrimaryMap<Loop, LoopData>,
    block_loop_map: SecondaryMap<Block, PackedOption<Loop>>,
    valid: bool,
}

/// Methods for querying the loop analysis.
impl LoopAnalysis {
    /// Allocate a new blank loop analysis. Use `compute` to fill it.
    pub fn new() -> Self {
        Self {
            loops: PrimaryMap::new(),
            block_loop_map: SecondaryMap::new(),
            valid: false,
        }
    }

    /// The loops in this procedure, in discovery order (outer loops
    /// first).
    pub fn loops(&self) -> Keys<Loop> {
        self.loops.keys()
    }

    /// The header block of `lp`.
    pub fn loop_header(&self, lp: Loop) -> Block {
        self.loops[lp].header
    }

    /// The loop immediately enclosing `lp`, if any.
    pub fn loop_parent(&self, lp: Loop) -> Option<Loop> {
        self.loops[lp].parent.expand()
    }

    /// The innermost loop `block` belongs to, if any.
    pub fn innermost_loop(&self, block: Block) -> Option<Loop> {
        self.block_loop_map[block].expand()
    }

    /// Is `block` inside `lp`, directly or in a nested loop?
    pub fn is_in_loop(&self, block: Block, lp: Loop) -> bool {
        let mut cur = self.innermost_loop(block);
        while let Some(c) = cur {
            if c == lp {
                return true;
            }
            cur = self.loop_parent(c);
        }
        false
    }

    /// The loop nesting level of `block`.
    pub fn loop_level(&self, block: Block) -> LoopLevel {
        debug_assert!(self.is_valid());
        match self.innermost_loop(block) {
            Some(lp) => self.loops[lp].level,
            None => LoopLevel::root(),
        }
    }

    /// Check if the loop analysis is in a valid state.
    ///
    /// Note that this doesn't perform any kind of validity checks. It
    /// simply checks if the `compute()` method has been called since the
    /// last `clear()`.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Clear all the data structures contained in the loop analysis. This
    /// will leave the analysis in a state where `is_valid()` returns
    /// false.
    pub fn clear(&mut self) {
        self.loops.clear();
        self.block_loop_map.clear();
        self.valid = false;
    }
}

impl LoopAnalysis {
    /// Allocate and compute the loop analysis.
    pub fn with_graph(graph: &Graph, cfg: &ControlFlowGraph, domtree: &DominatorTree) -> Self {
        let mut analysis = Self::new();
        analysis.compute(graph, cfg, domtree);
        analysis
    }

    /// Detect the loops in a graph. Needs the control flow graph and the
    /// dominator tree.
    pub fn compute(&mut self, graph: &Graph, cfg: &ControlFlowGraph, domtree: &DominatorTree) {
        self.clear();
        self.block_loop_map.resize(graph.num_blocks());
        self.find_loop_headers(cfg, domtree);
        self.discover_loop_blocks(cfg, domtree);
        self.assign_loop_levels();
        self.valid = true;
    }

    /// Traverses the CFG in reverse postorder and creates a loop for every
    /// block with a back edge pointing at it. Outer loop headers come
    /// first in the RPO, so outer loops get the smaller `Loop` indices.
    fn find_loop_headers(&mut self, cfg: &ControlFlowGraph, domtree: &DominatorTree) {
        for &block in domtree.cfg_postorder().iter().rev() {
            if cfg
                .preds(block)
                .iter()
                .any(|&pred| domtree.dominates(block, pred))
            {
                let lp = self.loops.push(LoopData {
                    header: block,
                    parent: None.into(),
                    level: LoopLevel::default(),
                });
                self.block_loop_map[block] = lp.into();
            }
        }
    }

    /// Walks backwards from every back edge source until the loop header,
    /// assigning each visited block to its innermost loop and linking
    /// nested loops to their parents.
    fn discover_loop_blocks(&mut self, cfg: &ControlFlowGraph, domtree: &DominatorTree) {
        let mut stack: Vec<Block> = Vec::new();
        for lp in self.loops.keys() {
            let header = self.loops[lp].header;
            for &pred in cfg.preds(header) {
                if domtree.dominates(header, pred) {
                    stack.push(pred);
                }
            }
            while let Some(block) = stack.pop() {
                match self.block_loop_map[block].expand() {
                    None => {
                        self.block_loop_map[block] = lp.into();
                        for &pred in cfg.preds(block) {
                            if domtree.is_reachable(pred) {
                                stack.push(pred);
                            }
                        }
                    }
                    Some(assigned) => {
                        // The block is already in a loop. If the current
                        // loop is anywhere in that chain the block is
                        // handled; otherwise the chain's outermost loop is
                        // nested under the current one.
                        let mut handled = assigned == lp;
                        let mut outermost = assigned;
                        while let Some(parent) = self.loops[outermost].parent.expand() {
                            if parent == lp {
                                handled = true;
                                break;
                            }
                            outermost = parent;
                        }
                        if !handled {
                            self.loops[outermost].parent = lp.into();
                            let inner_header = self.loops[outermost].header;
                            for &pred in cfg.preds(inner_header) {
                                // Skip the nested loop's own back edges.
                                if domtree.is_reachable(pred)
                                    && !domtree.dominates(inner_header, pred)
                                {
                                    stack.push(pred);
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    fn assign_loop_levels(&mut self) {
        for lp in self.loops.keys() {
            let mut level = 1u8;
            let mut cur = lp;
            while let Some(parent) = self.loops[cur].parent.expand() {
                level += 1;
                cur = parent;
            }
            self.loops[lp].level = LoopLevel(level);
        }
    }
}

impl Default for LoopAnalysis {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn analyze(graph: &Graph) -> LoopAnalysis {
        let cfg = ControlFlowGraph::with_graph(graph);
        let domtree = DominatorTree::with_graph(graph, &cfg);
        LoopAnalysis::with_graph(graph, &cfg, &domtree)
    }

    #[test]
    fn straight_line_has_no_loops() {
        let mut graph = Graph::new();
        let b0 = graph.make_block();
        let b1 = graph.make_block();
        graph.add_block_edge(b0, b1);
        let la = analyze(&graph);
        assert_eq!(la.loops().count(), 0);
        assert_eq!(la.loop_level(b0).level(), 0);
        assert_eq!(la.loop_level(b1).level(), 0);
    }

    #[test]
    fn single_loop() {
        let mut graph = Graph::new();
        let entry = graph.make_block();
        let header = graph.make_block();
        let body = graph.make_block();
        let exit = graph.make_block();
        graph.add_block_edge(entry, header);
        graph.add_block_edge(header, body);
        graph.add_block_edge(body, header);
        graph.add_block_edge(header, exit);

        let la = analyze(&graph);
        assert_eq!(la.loops().count(), 1);
        let lp = la.loops().next().unwrap();
        assert_eq!(la.loop_header(lp), header);
        assert_eq!(la.loop_parent(lp), None);
        assert_eq!(la.loop_level(entry).level(), 0);
        assert_eq!(la.loop_level(header).level(), 1);
        assert_eq!(la.loop_level(body).level(), 1);
        assert_eq!(la.loop_level(exit).level(), 0);
        assert!(la.is_in_loop(body, lp));
        assert!(!la.is_in_loop(exit, lp));
    }

    #[test]
    fn nested_loops() {
        let mut graph = Graph::new();
        let entry = graph.make_block();
        let outer = graph.make_block();
        let inner = graph.make_block();
        let latch = graph.make_block();
        let exit = graph.make_block();
        graph.add_block_edge(entry, outer);
        graph.add_block_edge(outer, inner);
        graph.add_block_edge(inner, inner);
        graph.add_block_edge(inner, latch);
        graph.add_block_edge(latch, outer);
        graph.add_block_edge(outer, exit);

        let la = analyze(&graph);
        assert_eq!(la.loops().count(), 2);
        let mut it = la.loops();
        let outer_lp = it.next().unwrap();
        let inner_lp = it.next().unwrap();
        assert_eq!(la.loop_header(outer_lp), outer);
        assert_eq!(la.loop_header(inner_lp), inner);
        assert_eq!(la.loop_parent(inner_lp), Some(outer_lp));
        assert_eq!(la.loop_level(outer).level(), 1);
        assert_eq!(la.loop_level(inner).level(), 2);
        assert_eq!(la.loop_level(latch).level(), 1);
        assert_eq!(la.loop_level(exit).level(), 0);
        assert!(la.is_in_loop(inner, outer_lp));
    }
}
