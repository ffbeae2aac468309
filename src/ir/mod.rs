//! Representation of Gantry IR procedures.
//!
//! The IR is a sea of nodes: value-producing vertices with ordered operand
//! edges, each pinned to a control-flow block. The [`Graph`] container owns
//! the nodes and blocks of one procedure and keeps derived information
//! (out-edges, dominance, loop nesting) consistent under mutation through
//! the graph-properties protocol.

mod entities;
mod graph;
mod modes;
mod node;
mod sourceloc;
mod tarval;

pub use self::entities::{Block, Loop, Node};
pub use self::graph::{Graph, GraphProperties};
pub use self::modes::Mode;
pub use self::node::{NodeData, Opcode};
pub use self::sourceloc::SourceLoc;
pub use self::tarval::Tarval;
