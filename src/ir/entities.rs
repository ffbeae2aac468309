//! Gantry IR entity references.
//!
//! Nodes reference other entities of the enclosing procedure graph. These
//! references are not Rust references but structs wrapping a `u32` index
//! into a table in the [`Graph`](super::Graph) main data structure, both for
//! compactness and because the graph is freely mutated while references are
//! held. There is a separate index type per entity so we don't lose type
//! safety.

use crate::entity::entity_impl;

/// An opaque reference to a value-producing node in a
/// [`Graph`](super::Graph).
///
/// While the order is stable, it is arbitrary and carries no scheduling
/// meaning.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Node(u32);
entity_impl!(Node, "n");

/// An opaque reference to a control-flow region of a
/// [`Graph`](super::Graph).
///
/// Blocks form a tree under the dominator relation computed by
/// [`DominatorTree`](crate::dominator_tree::DominatorTree). The first block
/// created in a graph is its start block.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Block(u32);
entity_impl!(Block, "block");

/// An opaque reference to a natural loop discovered by
/// [`LoopAnalysis`](crate::loop_analysis::LoopAnalysis).
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Loop(u32);
entity_impl!(Loop, "loop");
