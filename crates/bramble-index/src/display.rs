//! Depth-first tree dumps: indented text, graphviz DOT, and a flat sorted
//! key/value stream. Read-only; no block is mutated.

use crate::node::Node;
use crate::tree::BTreeIndex;
use bramble_cache::BlockCache;
use bramble_common::block::{BlockId, NodeKind};
use bramble_common::{BrambleError, Result};
use std::io::Write;

/// Output form for [`BTreeIndex::display`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisplayMode {
    /// One line per node in depth-first order.
    Depth,
    /// Graphviz digraph with one edge per child pointer.
    DepthDot,
    /// `(key,value)` per line, ascending by key, leaves only.
    SortedKeyval,
}

impl<C: BlockCache> BTreeIndex<C> {
    /// Writes a dump of the tree to `w`.
    pub fn display<W: Write>(&self, w: &mut W, mode: DisplayMode) -> Result<()> {
        if mode == DisplayMode::DepthDot {
            writeln!(w, "digraph tree {{")?;
        }
        self.display_node(w, self.root_block(), mode)?;
        if mode == DisplayMode::DepthDot {
            writeln!(w, "}}")?;
        }
        Ok(())
    }

    fn display_node<W: Write>(&self, w: &mut W, block: BlockId, mode: DisplayMode) -> Result<()> {
        let node = self.load(block)?;
        print_node(w, block, &node, mode)?;
        if mode == DisplayMode::DepthDot {
            write!(w, ";")?;
        }
        if mode != DisplayMode::SortedKeyval {
            writeln!(w)?;
        }

        match node.header.kind {
            NodeKind::Root | NodeKind::Interior => {
                if node.header.num_keys > 0 {
                    for i in 0..=node.header.num_keys as usize {
                        let child = node.ptr(i)?;
                        if mode == DisplayMode::DepthDot {
                            writeln!(w, "{block} -> {child};")?;
                        }
                        self.display_node(w, child, mode)?;
                    }
                }
                Ok(())
            }
            NodeKind::Leaf => Ok(()),
            other => Err(BrambleError::Insane(format!(
                "display reached a {} node at block {}",
                other, block
            ))),
        }
    }
}

fn print_node<W: Write>(w: &mut W, block: BlockId, node: &Node, mode: DisplayMode) -> Result<()> {
    match mode {
        DisplayMode::Depth => write!(w, "{block}: ")?,
        DisplayMode::DepthDot => write!(w, "{block} [ label=\"{block}: ")?,
        DisplayMode::SortedKeyval => {}
    }

    let num_keys = node.header.num_keys as usize;
    match node.header.kind {
        NodeKind::Root | NodeKind::Interior => {
            if mode != DisplayMode::SortedKeyval {
                if mode == DisplayMode::Depth {
                    write!(w, "Interior: ")?;
                }
                for i in 0..=num_keys {
                    write!(w, "*{} ", node.ptr(i)?)?;
                    if i == num_keys {
                        break;
                    }
                    w.write_all(&node.key(i)?)?;
                    write!(w, " ")?;
                }
            }
        }
        NodeKind::Leaf => {
            if mode == DisplayMode::Depth {
                write!(w, "Leaf: ")?;
            }
            for i in 0..num_keys {
                if i == 0 && mode != DisplayMode::SortedKeyval {
                    // Reserved sibling slot, shown for diagnostic symmetry.
                    write!(w, "*{} ", node.ptr(0)?)?;
                }
                if mode == DisplayMode::SortedKeyval {
                    write!(w, "(")?;
                    w.write_all(&node.key(i)?)?;
                    write!(w, ",")?;
                    w.write_all(&node.val(i)?)?;
                    writeln!(w, ")")?;
                } else {
                    w.write_all(&node.key(i)?)?;
                    write!(w, " ")?;
                    w.write_all(&node.val(i)?)?;
                    write!(w, " ")?;
                }
            }
        }
        other => {
            if mode != DisplayMode::DepthDot {
                write!(w, "unsupported node kind {other}")?;
            }
        }
    }

    if mode == DisplayMode::DepthDot {
        write!(w, "\" ]")?;
    }
    Ok(())
}
