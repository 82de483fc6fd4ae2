//! Dominance queries over a function's block graph.

use petgraph::graph::{DiGraph, NodeIndex};

use crate::module::{BlockId, Function};

/// Immediate-dominator tree for one function, computed over the current
/// block graph. Unreachable blocks are dominated by nothing and dominate
/// nothing.
#[derive(Debug, Clone)]
pub struct DomTree {
    idom: Vec<Option<BlockId>>,
    reachable: Vec<bool>,
}

impl DomTree {
    /// True iff `a` dominates `b` (reflexively).
    pub fn dominates(&self, a: BlockId, b: BlockId) -> bool {
        if !self.reachable[a.index()] || !self.reachable[b.index()] {
            return false;
        }
        let mut cur = Some(b);
        while let Some(block) = cur {
            if block == a {
                return true;
            }
            cur = self.idom[block.index()];
        }
        false
    }

    /// True iff `a` dominates `b` and `a != b` — the "exclusive" relation
    /// the flattening key schedule is built on.
    pub fn strictly_dominates(&self, a: BlockId, b: BlockId) -> bool {
        a != b && self.dominates(a, b)
    }

    pub fn immediate_dominator(&self, b: BlockId) -> Option<BlockId> {
        self.idom[b.index()]
    }

    pub fn is_reachable(&self, b: BlockId) -> bool {
        self.reachable[b.index()]
    }

    /// The chain of strict dominators of `b`, nearest first, ending at the
    /// entry block.
    pub fn strict_dominators(&self, b: BlockId) -> Vec<BlockId> {
        let mut chain = Vec::new();
        let mut cur = self.idom[b.index()];
        while let Some(block) = cur {
            chain.push(block);
            cur = self.idom[block.index()];
        }
        chain
    }
}

impl Function {
    /// Build the dominator tree from the entry block. Blocks without a
    /// terminator contribute no edges.
    pub fn dominator_tree(&self) -> DomTree {
        let mut graph: DiGraph<(), ()> = DiGraph::new();
        let nodes: Vec<NodeIndex> = self.block_ids().map(|_| graph.add_node(())).collect();
        for id in self.block_ids() {
            if let Some(term) = &self.block(id).term {
                for target in term.targets() {
                    graph.add_edge(nodes[id.index()], nodes[target.index()], ());
                }
            }
        }

        let doms = petgraph::algo::dominators::simple_fast(&graph, nodes[0]);
        let mut idom = vec![None; self.blocks.len()];
        let mut reachable = vec![false; self.blocks.len()];
        for id in self.block_ids() {
            let node = nodes[id.index()];
            if id == self.entry() {
                reachable[id.index()] = true;
                continue;
            }
            if let Some(parent) = doms.immediate_dominator(node) {
                idom[id.index()] = Some(BlockId(parent.index() as u32));
                reachable[id.index()] = true;
            }
        }
        DomTree { idom, reachable }
    }
}
