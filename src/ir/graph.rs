//! The procedure graph: container of all nodes and blocks.
//!
//! Nodes live in arenas with stable `u32` indices; per-node facts (mode,
//! block, source location, out-edges) sit in secondary tables keyed by the
//! node index. Out-edge lists are maintained eagerly: every constructor,
//! [`Graph::set_input`] and [`Graph::exchange`] keeps them consistent, so a
//! pass that asserted `CONSISTENT_OUT_EDGES` can rely on them throughout.
//!
//! All node creation goes through optimizing constructors. A constructor
//! validates its operands, applies local simplifications, and may hand back
//! an equivalent existing node (notably, literal constants are interned)
//! instead of allocating a fresh one.

use crate::dominator_tree::DominatorTree;
use crate::entity::{Keys, PrimaryMap, SecondaryMap};
use crate::flowgraph::ControlFlowGraph;
use crate::fx::FxHashMap;
use crate::ir::{Block, Mode, Node, NodeData, Opcode, SourceLoc, Tarval};
use crate::loop_analysis::LoopAnalysis;
use crate::packed_option::PackedOption;
use core::mem;
use core::ops::{BitAnd, BitOr, BitOrAssign};
use smallvec::SmallVec;

/// A set of derived facts about a graph that are currently consistent with
/// its contents.
///
/// Passes assert the properties they need via
/// [`Graph::assure_properties`] and declare the ones they kept intact via
/// [`Graph::confirm_properties`]; everything else is considered stale.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct GraphProperties {
    bits: u8,
}

impl GraphProperties {
    /// No properties.
    pub const NONE: Self = Self { bits: 0 };
    /// The dominator tree matches the block graph.
    pub const CONSISTENT_DOMINANCE: Self = Self { bits: 1 };
    /// The loop nesting forest matches the block graph.
    pub const CONSISTENT_LOOP_INFO: Self = Self { bits: 2 };
    /// Out-edge lists match the input edges.
    pub const CONSISTENT_OUT_EDGES: Self = Self { bits: 4 };
    /// The properties that depend only on control flow. Pure data-flow
    /// rewrites preserve these.
    pub const CONTROL_FLOW: Self = Self { bits: 1 | 2 };

    /// True if every property of `other` is also in `self`.
    pub fn contains(self, other: Self) -> bool {
        self.bits & other.bits == other.bits
    }
}

impl BitOr for GraphProperties {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self { bits: self.bits | rhs.bits }
    }
}

impl BitOrAssign for GraphProperties {
    fn bitor_assign(&mut self, rhs: Self) {
        self.bits |= rhs.bits;
    }
}

impl BitAnd for GraphProperties {
    type Output = Self;
    fn bitand(self, rhs: Self) -> Self {
        Self { bits: self.bits & rhs.bits }
    }
}

/// Per-block data: the explicit control-flow successor edges.
#[derive(Clone, Default)]
struct BlockData {
    succs: SmallVec<[Block; 2]>,
}

/// The container of all nodes and blocks of one procedure.
pub struct Graph {
    nodes: PrimaryMap<Node, NodeData>,
    modes: SecondaryMap<Node, Mode>,
    node_block: SecondaryMap<Node, PackedOption<Block>>,
    srclocs: SecondaryMap<Node, SourceLoc>,
    /// One entry per use edge: a node appears here once for each of its
    /// input slots that refers to the keyed node.
    outs: SecondaryMap<Node, SmallVec<[Node; 4]>>,
    /// Forwarding pointers left behind by `exchange`.
    replaced: SecondaryMap<Node, PackedOption<Node>>,
    constants: FxHashMap<Tarval, Node>,
    blocks: PrimaryMap<Block, BlockData>,
    entry: PackedOption<Block>,
    properties: GraphProperties,
    domtree: DominatorTree,
    loops: LoopAnalysis,
    imprecise_float_transforms: bool,
}

impl Graph {
    /// Create a new empty graph.
    pub fn new() -> Self {
        Self {
            nodes: PrimaryMap::new(),
            modes: SecondaryMap::with_default(Mode::Control),
            node_block: SecondaryMap::new(),
            srclocs: SecondaryMap::new(),
            outs: SecondaryMap::new(),
            replaced: SecondaryMap::new(),
            constants: FxHashMap::default(),
            blocks: PrimaryMap::new(),
            entry: None.into(),
            properties: GraphProperties::NONE,
            domtree: DominatorTree::new(),
            loops: LoopAnalysis::new(),
            imprecise_float_transforms: false,
        }
    }

    /// Permit transforms that may change float rounding behavior.
    ///
    /// Off by default; reassociation skips float-mode nodes unless set.
    pub fn set_imprecise_float_transforms(&mut self, allow: bool) {
        self.imprecise_float_transforms = allow;
    }

    /// Are imprecise float transforms permitted for this graph?
    pub fn imprecise_float_transforms_allowed(&self) -> bool {
        self.imprecise_float_transforms
    }

    // ------------------------------------------------------------------
    // Blocks.

    /// Create a new block. The first block created is the start block.
    pub fn make_block(&mut self) -> Block {
        let block = self.blocks.push(BlockData::default());
        if self.entry.is_none() {
            self.entry = block.into();
        }
        block
    }

    /// The distinguished start block.
    pub fn entry_block(&self) -> Block {
        self.entry.expand().expect("graph has no blocks")
    }

    /// Record a control-flow edge from `from` to `to`.
    ///
    /// Invalidates dominance and loop information.
    pub fn add_block_edge(&mut self, from: Block, to: Block) {
        self.blocks[from].succs.push(to);
        self.properties = self.properties & GraphProperties::CONSISTENT_OUT_EDGES;
    }

    /// The control-flow successors of `block`.
    pub fn block_succs(&self, block: Block) -> &[Block] {
        &self.blocks[block].succs
    }

    /// The number of blocks created in this graph.
    pub fn num_blocks(&self) -> usize {
        self.blocks.len()
    }

    /// Iterate over all blocks of the graph.
    pub fn blocks(&self) -> Keys<Block> {
        self.blocks.keys()
    }

    // ------------------------------------------------------------------
    // Node queries.

    /// Iterate over all nodes ever created, including replaced ones.
    /// Use [`Graph::is_replaced`] to filter.
    pub fn nodes(&self) -> Keys<Node> {
        self.nodes.keys()
    }

    /// The number of nodes created in this graph.
    pub fn num_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// The payload of `n`.
    pub fn data(&self, n: Node) -> &NodeData {
        &self.nodes[n]
    }

    /// The opcode of `n`.
    pub fn opcode(&self, n: Node) -> Opcode {
        self.nodes[n].opcode()
    }

    /// The mode of `n`.
    pub fn mode(&self, n: Node) -> Mode {
        self.modes[n]
    }

    /// The block `n` is pinned to.
    pub fn block(&self, n: Node) -> Block {
        self.node_block[n].expand().expect("node has no block")
    }

    /// The source location attached to `n`.
    pub fn srcloc(&self, n: Node) -> SourceLoc {
        self.srclocs[n]
    }

    /// Attach a source location to `n`.
    pub fn set_srcloc(&mut self, n: Node, loc: SourceLoc) {
        self.srclocs[n] = loc;
    }

    /// The number of operand edges of `n`.
    pub fn arity(&self, n: Node) -> usize {
        self.nodes[n].args().len()
    }

    /// The operand edges of `n`, in order.
    pub fn inputs(&self, n: Node) -> &[Node] {
        self.nodes[n].args()
    }

    /// The operand of `n` at `index`.
    pub fn input(&self, n: Node, index: usize) -> Node {
        self.nodes[n].args()[index]
    }

    /// The literal value of `n` if it is a Const node.
    pub fn as_const(&self, n: Node) -> Option<Tarval> {
        match self.nodes[n] {
            NodeData::Const { value } => Some(value),
            _ => None,
        }
    }

    /// The number of use edges of `n`.
    pub fn n_outs(&self, n: Node) -> usize {
        self.outs[n].len()
    }

    /// The users of `n`, one entry per use edge.
    pub fn outs(&self, n: Node) -> &[Node] {
        &self.outs[n]
    }

    /// Has `n` been replaced by `exchange`?
    pub fn is_replaced(&self, n: Node) -> bool {
        self.replaced[n].is_some()
    }

    /// Follow forwarding pointers to the current replacement of `n`.
    pub fn resolve(&self, mut n: Node) -> Node {
        while let Some(r) = self.replaced[n].expand() {
            n = r;
        }
        n
    }

    /// True if every live node is pinned to a block. Graphs built through
    /// the public constructors always are.
    pub fn is_pinned(&self) -> bool {
        self.nodes
            .keys()
            .all(|n| self.is_replaced(n) || self.node_block[n].is_some())
    }

    // ------------------------------------------------------------------
    // Mutation.

    /// Redirect the operand of `n` at `index` to `new`, keeping out-edge
    /// lists consistent.
    pub fn set_input(&mut self, n: Node, index: usize, new: Node) {
        let old = self.nodes[n].args()[index];
        if old == new {
            return;
        }
        self.remove_out(old, n);
        self.nodes[n].args_mut()[index] = new;
        self.outs[new].push(n);
    }

    /// Replace `old` by `new` everywhere: rewire all users of `old`,
    /// detach `old` from its operands, and leave a forwarding pointer.
    ///
    /// The memory of `old` is reclaimed with the graph, not eagerly.
    pub fn exchange(&mut self, old: Node, new: Node) {
        debug_assert_ne!(old, new, "cannot exchange a node with itself");
        debug_assert!(!self.is_replaced(old));
        let users = mem::take(&mut self.outs[old]);
        for &user in &users {
            // Each out-list entry stands for exactly one edge.
            for arg in self.nodes[user].args_mut() {
                if *arg == old {
                    *arg = new;
                    break;
                }
            }
            self.outs[new].push(user);
        }
        let old_args: SmallVec<[Node; 2]> = self.nodes[old].args().iter().copied().collect();
        for arg in old_args {
            self.remove_out(arg, old);
        }
        self.replaced[old] = new.into();
    }

    /// Remove one `user` entry from the out-list of `def`.
    fn remove_out(&mut self, def: Node, user: Node) {
        let list = &mut self.outs[def];
        let pos = list
            .iter()
            .position(|&u| u == user)
            .expect("out-edge list out of sync");
        list.remove(pos);
    }

    // ------------------------------------------------------------------
    // Constructors.

    /// Allocate a node without local optimization.
    fn raw(&mut self, data: NodeData, mode: Mode, block: Block) -> Node {
        debug_assert!(self.blocks.is_valid(block));
        let n = self.nodes.push(data);
        self.modes[n] = mode;
        self.node_block[n] = block.into();
        let args: SmallVec<[Node; 2]> = self.nodes[n].args().iter().copied().collect();
        for arg in args {
            debug_assert!(!self.is_replaced(arg), "operand was already replaced");
            self.outs[arg].push(n);
        }
        n
    }

    /// Get the unique Const node for `value`. Constants live in the start
    /// block.
    pub fn new_const(&mut self, value: Tarval) -> Node {
        if let Some(&n) = self.constants.get(&value) {
            return n;
        }
        let block = self.entry_block();
        let n = self.raw(NodeData::Const { value }, value.mode(), block);
        self.constants.insert(value, n);
        n
    }

    /// Create a binary node of `opcode` with result `mode` in `block`.
    ///
    /// Runs the local optimizer first; the result may be a folded constant
    /// or an existing equivalent node.
    pub fn new_binary(&mut self, opcode: Opcode, mode: Mode, block: Block, a: Node, b: Node) -> Node {
        debug_assert!(opcode.is_binary());
        if let Some(n) = self.optimize_binary(opcode, mode, block, a, b) {
            return n;
        }
        self.raw(NodeData::Binary { opcode, args: [a, b] }, mode, block)
    }

    /// Create an Add node. The result mode is the reference mode if either
    /// operand is a reference, otherwise the left operand's mode.
    pub fn new_add(&mut self, block: Block, a: Node, b: Node) -> Node {
        let mode = if self.mode(b).is_reference() {
            self.mode(b)
        } else {
            self.mode(a)
        };
        self.new_binary(Opcode::Add, mode, block, a, b)
    }

    /// Create a Sub node in the left operand's mode.
    pub fn new_sub(&mut self, block: Block, a: Node, b: Node) -> Node {
        let mode = self.mode(a);
        self.new_binary(Opcode::Sub, mode, block, a, b)
    }

    /// Create a Mul node in the left operand's mode.
    pub fn new_mul(&mut self, block: Block, a: Node, b: Node) -> Node {
        let mode = self.mode(a);
        self.new_binary(Opcode::Mul, mode, block, a, b)
    }

    /// Create a Shl node in the shifted operand's mode.
    pub fn new_shl(&mut self, block: Block, a: Node, count: Node) -> Node {
        let mode = self.mode(a);
        self.new_binary(Opcode::Shl, mode, block, a, count)
    }

    /// Create an And node.
    pub fn new_and(&mut self, block: Block, a: Node, b: Node) -> Node {
        let mode = self.mode(a);
        self.new_binary(Opcode::And, mode, block, a, b)
    }

    /// Create an Or node.
    pub fn new_or(&mut self, block: Block, a: Node, b: Node) -> Node {
        let mode = self.mode(a);
        self.new_binary(Opcode::Or, mode, block, a, b)
    }

    /// Create an Eor node.
    pub fn new_eor(&mut self, block: Block, a: Node, b: Node) -> Node {
        let mode = self.mode(a);
        self.new_binary(Opcode::Eor, mode, block, a, b)
    }

    /// Create a Not node.
    pub fn new_not(&mut self, block: Block, arg: Node) -> Node {
        let mode = self.mode(arg);
        match self.nodes[arg] {
            // not(not(x)) = x
            NodeData::Unary { opcode: Opcode::Not, arg: inner } => inner,
            NodeData::Const { value } => self.new_const(value.not()),
            _ => self.raw(NodeData::Unary { opcode: Opcode::Not, arg }, mode, block),
        }
    }

    /// Convert `arg` to integer `mode`. Elided when the mode already
    /// matches; constants are converted in place.
    pub fn new_conv(&mut self, block: Block, arg: Node, mode: Mode) -> Node {
        if self.mode(arg) == mode {
            return arg;
        }
        if let Some(value) = self.as_const(arg) {
            return self.new_const(value.convert(mode));
        }
        self.raw(NodeData::Unary { opcode: Opcode::Conv, arg }, mode, block)
    }

    /// Create an opaque procedure parameter of `mode` in `block`.
    pub fn new_param(&mut self, block: Block, mode: Mode) -> Node {
        self.raw(NodeData::Leaf { opcode: Opcode::Param }, mode, block)
    }

    /// Create an Address node (constant-like, start block).
    pub fn new_address(&mut self, mode: Mode) -> Node {
        let block = self.entry_block();
        self.raw(NodeData::Leaf { opcode: Opcode::Address }, mode, block)
    }

    /// Create an Offset node (constant-like, start block).
    pub fn new_offset(&mut self, mode: Mode) -> Node {
        let block = self.entry_block();
        self.raw(NodeData::Leaf { opcode: Opcode::Offset }, mode, block)
    }

    /// Create a Size node (constant-like, start block).
    pub fn new_size(&mut self, mode: Mode) -> Node {
        let block = self.entry_block();
        self.raw(NodeData::Leaf { opcode: Opcode::Size }, mode, block)
    }

    /// Create an Align node (constant-like, start block).
    pub fn new_align(&mut self, mode: Mode) -> Node {
        let block = self.entry_block();
        self.raw(NodeData::Leaf { opcode: Opcode::Align }, mode, block)
    }

    /// Create a TypeConst node (constant-like, start block).
    pub fn new_type_const(&mut self, mode: Mode) -> Node {
        let block = self.entry_block();
        self.raw(NodeData::Leaf { opcode: Opcode::TypeConst }, mode, block)
    }

    /// Create a Bad node of `mode`.
    pub fn new_bad(&mut self, mode: Mode) -> Node {
        let block = self.entry_block();
        self.raw(NodeData::Leaf { opcode: Opcode::Bad }, mode, block)
    }

    /// Local optimization of a binary node under construction. Returns the
    /// equivalent node when a rule fires.
    ///
    /// Float modes are never touched here; whether float reassociation is
    /// acceptable is a pass-level policy, and folding float constants is
    /// the front-end's business.
    fn optimize_binary(
        &mut self,
        opcode: Opcode,
        mode: Mode,
        block: Block,
        a: Node,
        b: Node,
    ) -> Option<Node> {
        if mode.is_float() {
            return None;
        }
        let ca = self.as_const(a);
        let cb = self.as_const(b);
        if let (Some(va), Some(vb)) = (ca, cb) {
            if let Some(folded) = fold_binary(opcode, mode, va, vb) {
                return Some(self.new_const(folded));
            }
        }
        let a_zero = ca.map_or(false, Tarval::is_zero);
        let b_zero = cb.map_or(false, Tarval::is_zero);
        let a_ones = ca.map_or(false, Tarval::is_all_ones);
        let b_ones = cb.map_or(false, Tarval::is_all_ones);
        match opcode {
            Opcode::Add => {
                if b_zero {
                    return Some(a);
                }
                if a_zero {
                    return Some(b);
                }
                if a == b && mode.is_int() {
                    // x + x = x << 1
                    let one = self.new_const(Tarval::one(mode));
                    return Some(self.new_shl(block, a, one));
                }
            }
            Opcode::Sub => {
                if b_zero {
                    return Some(a);
                }
                if a == b && mode.is_int() {
                    return Some(self.new_const(Tarval::zero(mode)));
                }
            }
            Opcode::Mul => {
                if cb.map_or(false, |v| v == Tarval::one(mode)) {
                    return Some(a);
                }
                if ca.map_or(false, |v| v == Tarval::one(mode)) {
                    return Some(b);
                }
                if (a_zero || b_zero) && mode.is_int() {
                    return Some(self.new_const(Tarval::zero(mode)));
                }
            }
            Opcode::Shl | Opcode::Rol => {
                if b_zero {
                    return Some(a);
                }
            }
            Opcode::And => {
                if a == b {
                    return Some(a);
                }
                if b_ones {
                    return Some(a);
                }
                if a_ones {
                    return Some(b);
                }
                if a_zero || b_zero || self.is_complement_pair(a, b) {
                    return Some(self.new_const(Tarval::zero(mode)));
                }
            }
            Opcode::Or => {
                if a == b {
                    return Some(a);
                }
                if b_zero {
                    return Some(a);
                }
                if a_zero {
                    return Some(b);
                }
                if a_ones || b_ones || self.is_complement_pair(a, b) {
                    return Some(self.new_const(Tarval::all_ones(mode)));
                }
            }
            Opcode::Eor => {
                if a == b {
                    return Some(self.new_const(Tarval::zero(mode)));
                }
                if b_zero {
                    return Some(a);
                }
                if a_zero {
                    return Some(b);
                }
                if b_ones {
                    return Some(self.new_not(block, a));
                }
                if a_ones {
                    return Some(self.new_not(block, b));
                }
            }
            _ => {}
        }
        None
    }

    /// Is one operand the Not of the other?
    fn is_complement_pair(&self, a: Node, b: Node) -> bool {
        let not_of = |n: Node, other: Node| match self.nodes[n] {
            NodeData::Unary { opcode: Opcode::Not, arg } => arg == other,
            _ => false,
        };
        not_of(a, b) || not_of(b, a)
    }

    // ------------------------------------------------------------------
    // Graph properties protocol.

    /// Make the requested derived facts consistent, recomputing whatever
    /// is stale.
    pub fn assure_properties(&mut self, props: GraphProperties) {
        let needs_dom = props.contains(GraphProperties::CONSISTENT_DOMINANCE)
            || props.contains(GraphProperties::CONSISTENT_LOOP_INFO);
        if needs_dom && !self.properties.contains(GraphProperties::CONSISTENT_DOMINANCE) {
            let cfg = ControlFlowGraph::with_graph(self);
            let mut domtree = mem::take(&mut self.domtree);
            domtree.compute(self, &cfg);
            self.domtree = domtree;
            self.properties |= GraphProperties::CONSISTENT_DOMINANCE;
        }
        if props.contains(GraphProperties::CONSISTENT_LOOP_INFO)
            && !self.properties.contains(GraphProperties::CONSISTENT_LOOP_INFO)
        {
            let cfg = ControlFlowGraph::with_graph(self);
            let mut loops = mem::take(&mut self.loops);
            loops.compute(self, &cfg, &self.domtree);
            self.loops = loops;
            self.properties |= GraphProperties::CONSISTENT_LOOP_INFO;
        }
        if props.contains(GraphProperties::CONSISTENT_OUT_EDGES) {
            // Maintained eagerly by all mutators.
            self.properties |= GraphProperties::CONSISTENT_OUT_EDGES;
        }
    }

    /// Declare that only the properties in `props` survived the running
    /// pass; all others become stale.
    pub fn confirm_properties(&mut self, props: GraphProperties) {
        self.properties = self.properties & props;
    }

    /// The properties currently known consistent.
    pub fn properties(&self) -> GraphProperties {
        self.properties
    }

    /// Does `a` dominate `b`? Requires consistent dominance.
    pub fn block_dominates(&self, a: Block, b: Block) -> bool {
        debug_assert!(self.properties.contains(GraphProperties::CONSISTENT_DOMINANCE));
        self.domtree.dominates(a, b)
    }

    /// The loop nesting depth of `block`; 0 outside any loop. Requires
    /// consistent loop info.
    pub fn loop_depth(&self, block: Block) -> usize {
        debug_assert!(self.properties.contains(GraphProperties::CONSISTENT_LOOP_INFO));
        self.loops.loop_level(block).level()
    }

    /// The computed dominator tree. Requires consistent dominance.
    pub fn domtree(&self) -> &DominatorTree {
        debug_assert!(self.properties.contains(GraphProperties::CONSISTENT_DOMINANCE));
        &self.domtree
    }

    /// The computed loop analysis. Requires consistent loop info.
    pub fn loop_analysis(&self) -> &LoopAnalysis {
        debug_assert!(self.properties.contains(GraphProperties::CONSISTENT_LOOP_INFO));
        &self.loops
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new()
    }
}

/// Fold a binary operation on two literals into a literal of the result
/// mode. Operands are converted to the result mode first, extending per
/// their own signedness.
fn fold_binary(opcode: Opcode, mode: Mode, a: Tarval, b: Tarval) -> Option<Tarval> {
    if let Opcode::Shl = opcode {
        // The count keeps its own mode.
        return Some(a.convert(mode).shl(b));
    }
    let x = a.convert(mode);
    let y = b.convert(mode);
    Some(match opcode {
        Opcode::Add => x.add(y),
        Opcode::Sub => x.sub(y),
        Opcode::Mul => x.mul(y),
        Opcode::And => x.and(y),
        Opcode::Or => x.or(y),
        Opcode::Eor => x.xor(y),
        // Rotates are left alone by the mid-end.
        _ => return None,
    })
}
