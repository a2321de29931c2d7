//! Treenode: the hierarchical-smoothing taxonomy node (§3, §4.7).
//!
//! The source links nodes with raw parent/child pointers. Here the tree is
//! an arena (`Vec<TreeNode>`) addressed by `NodeId`; a node's parent is
//! `Option<NodeId>` and its children are a `Vec<NodeId>`, per the
//! arena-over-pointers design note.

use serde::{Deserialize, Serialize};

use crate::document::DocId;
use crate::vocab::WordId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreeNode {
    pub parent: Option<NodeId>,
    pub children: Vec<NodeId>,
    pub index_in_parent: usize,
    pub depth: u32,
    pub name: String,
    /// Local multinomial over the vocabulary.
    pub words: Vec<f64>,
    pub new_words: Vec<f64>,
    /// Mixture weights over {self, parent, ..., root, uniform}, length
    /// `depth + 2`.
    pub lambdas: Vec<f64>,
    pub new_lambdas: Vec<f64>,
    pub prior: f64,
    pub new_prior: f64,
    /// Per-class distribution at this node, for leaves representing
    /// classes (and, in the multiclass extension, interior "cmixture"
    /// nodes — see `hem::CMixture`).
    pub classes: Option<Vec<f64>>,
    pub new_classes: Option<Vec<f64>>,
    /// Leave-one-out bookkeeping: total mass this node accumulated from
    /// each document, rotated from `new_*_loo` at `set_from_new`.
    pub doc_loo: std::collections::HashMap<u32, f64>,
    pub new_doc_loo: std::collections::HashMap<u32, f64>,
    /// Per-(document, word) mass this node accumulated, the finer-grained
    /// counterpart to `doc_loo`: lets `leaf_word_prob_loo` hold out one
    /// document's contribution to one word rather than the whole node.
    pub word_loo: std::collections::HashMap<(u32, u32), f64>,
    pub new_word_loo: std::collections::HashMap<(u32, u32), f64>,
    /// Raw (pre-Dirichlet-floor) mass this node accumulated last
    /// `set_from_new`, per word and in total — the numerator/denominator
    /// `leaf_word_prob_loo` rebuilds after subtracting one document's mass.
    pub word_mass: Vec<f64>,
    pub mass_total: f64,
    /// A flat (uniform) "Misc" child is kept un-normalized-over-ancestors.
    pub is_misc: bool,
}

impl TreeNode {
    pub fn new_root(vocab_len: usize) -> Self {
        TreeNode {
            parent: None,
            children: Vec::new(),
            index_in_parent: 0,
            depth: 0,
            name: "root".to_string(),
            words: vec![1.0 / vocab_len as f64; vocab_len],
            new_words: vec![0.0; vocab_len],
            lambdas: vec![1.0, 0.0],
            new_lambdas: vec![0.0, 0.0],
            prior: 1.0,
            new_prior: 0.0,
            classes: None,
            new_classes: None,
            doc_loo: Default::default(),
            new_doc_loo: Default::default(),
            word_loo: Default::default(),
            new_word_loo: Default::default(),
            word_mass: vec![0.0; vocab_len],
            mass_total: 0.0,
            is_misc: false,
        }
    }
}

/// Arena-indexed tree of `TreeNode`s.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Tree {
    nodes: Vec<TreeNode>,
    vocab_len: usize,
}

impl Tree {
    pub fn new(vocab_len: usize) -> Self {
        let mut t = Tree {
            nodes: Vec::new(),
            vocab_len,
        };
        t.nodes.push(TreeNode::new_root(vocab_len));
        t
    }

    pub fn root(&self) -> NodeId {
        NodeId(0)
    }

    pub fn node(&self, id: NodeId) -> &TreeNode {
        &self.nodes[id.index()]
    }

    pub fn node_mut(&mut self, id: NodeId) -> &mut TreeNode {
        &mut self.nodes[id.index()]
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Appends a new child of `parent`, named `name`, and returns its id.
    pub fn add_child(&mut self, parent: NodeId, name: impl Into<String>, is_misc: bool) -> NodeId {
        let depth = self.node(parent).depth + 1;
        let index_in_parent = self.node(parent).children.len();
        let id = NodeId(self.nodes.len() as u32);
        let node = TreeNode {
            parent: Some(parent),
            children: Vec::new(),
            index_in_parent,
            depth,
            name: name.into(),
            words: vec![1.0 / self.vocab_len as f64; self.vocab_len],
            new_words: vec![0.0; self.vocab_len],
            lambdas: {
                let mut l = vec![0.0; depth as usize + 2];
                l[0] = 1.0;
                l
            },
            new_lambdas: vec![0.0; depth as usize + 2],
            prior: 0.0,
            new_prior: 0.0,
            classes: None,
            new_classes: None,
            doc_loo: Default::default(),
            new_doc_loo: Default::default(),
            word_loo: Default::default(),
            new_word_loo: Default::default(),
            word_mass: vec![0.0; self.vocab_len],
            mass_total: 0.0,
            is_misc,
        };
        self.nodes.push(node);
        self.node_mut(parent).children.push(id);
        id
    }

    /// Ancestor chain from `leaf` up to and including the root:
    /// `a0 = leaf, a1 = parent(leaf), ..., aD = root`.
    pub fn ancestors(&self, leaf: NodeId) -> Vec<NodeId> {
        let mut chain = vec![leaf];
        let mut current = leaf;
        while let Some(p) = self.node(current).parent {
            chain.push(p);
            current = p;
        }
        chain
    }

    /// `P(w|leaf) = Σ_i λ_i · P(w|a_i) + λ_last · 1/|V|` (§4.7).
    pub fn leaf_word_prob(&self, leaf: NodeId, wi: WordId) -> f64 {
        let ancestors = self.ancestors(leaf);
        let node = self.node(leaf);
        let mut p = 0.0;
        for (i, &a) in ancestors.iter().enumerate() {
            let lambda = node.lambdas.get(i).copied().unwrap_or(0.0);
            p += lambda * self.node(a).words[wi.index()];
        }
        let uniform_lambda = node.lambdas.last().copied().unwrap_or(0.0);
        p += uniform_lambda / self.vocab_len as f64;
        p
    }

    /// `leaf_word_prob`, but with `doc`'s own contribution to each ancestor
    /// held out — the LOO variant `hem::em_iteration`'s E-step needs when
    /// scoring a document against the mixture it itself trained.
    pub fn leaf_word_prob_loo(&self, leaf: NodeId, wi: WordId, doc: DocId, alpha: f64) -> f64 {
        let ancestors = self.ancestors(leaf);
        let node = self.node(leaf);
        let mut p = 0.0;
        for (i, &a) in ancestors.iter().enumerate() {
            let lambda = node.lambdas.get(i).copied().unwrap_or(0.0);
            p += lambda * self.node_word_prob_loo(a, wi, doc, alpha);
        }
        let uniform_lambda = node.lambdas.last().copied().unwrap_or(0.0);
        p += uniform_lambda / self.vocab_len as f64;
        p
    }

    fn node_word_prob_loo(&self, node_id: NodeId, wi: WordId, doc: DocId, alpha: f64) -> f64 {
        let node = self.node(node_id);
        let held_word = node
            .word_loo
            .get(&(doc.0, wi.index() as u32))
            .copied()
            .unwrap_or(0.0);
        let held_doc = node.doc_loo.get(&doc.0).copied().unwrap_or(0.0);
        let numerator = (node.word_mass[wi.index()] - held_word).max(0.0) + alpha;
        let denominator = (node.mass_total - held_doc).max(0.0) + alpha * self.vocab_len as f64;
        numerator / denominator
    }

    pub fn leaves(&self) -> Vec<NodeId> {
        self.nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.children.is_empty())
            .map(|(i, _)| NodeId(i as u32))
            .collect()
    }

    /// An explicit-stack preorder walk, avoiding recursion for deep trees
    /// per the arena design note.
    pub fn preorder(&self) -> Vec<NodeId> {
        let mut stack = vec![self.root()];
        let mut order = Vec::new();
        while let Some(id) = stack.pop() {
            order.push(id);
            for &child in self.node(id).children.iter().rev() {
                stack.push(child);
            }
        }
        order
    }

    /// `set_words_from_new_words`: normalize `new_words` with a Dirichlet
    /// floor `alpha`, roll `new -> current`, rotate LOO tables, zero
    /// accumulators.
    pub fn set_from_new(&mut self, alpha: f64) {
        for node in &mut self.nodes {
            if node.is_misc {
                let v = node.words.len();
                node.words = vec![1.0 / v as f64; v];
                node.new_words = vec![0.0; v];
                node.new_doc_loo.clear();
                node.new_word_loo.clear();
                continue;
            }
            node.word_mass.clone_from(&node.new_words);
            node.mass_total = node.new_words.iter().sum();
            let total: f64 = node.new_words.iter().sum::<f64>() + alpha * node.words.len() as f64;
            if total > 0.0 {
                for (w, nw) in node.words.iter_mut().zip(node.new_words.iter()) {
                    *w = (nw + alpha) / total;
                }
            }
            for x in &mut node.new_words {
                *x = 0.0;
            }

            let lambda_total: f64 = node.new_lambdas.iter().sum();
            if lambda_total > 0.0 {
                for (l, nl) in node.lambdas.iter_mut().zip(node.new_lambdas.iter()) {
                    *l = nl / lambda_total;
                }
            }
            for x in &mut node.new_lambdas {
                *x = 0.0;
            }

            if node.new_prior > 0.0 {
                node.prior = node.new_prior;
            }
            node.new_prior = 0.0;

            if let (Some(classes), Some(new_classes)) = (&mut node.classes, &node.new_classes) {
                let s: f64 = new_classes.iter().sum();
                if s > 0.0 {
                    for (c, nc) in classes.iter_mut().zip(new_classes.iter()) {
                        *c = nc / s;
                    }
                }
            }
            if let Some(nc) = &mut node.new_classes {
                for x in nc.iter_mut() {
                    *x = 0.0;
                }
            }

            node.doc_loo = std::mem::take(&mut node.new_doc_loo);
            node.word_loo = std::mem::take(&mut node.new_word_loo);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ancestors_end_at_root() {
        let mut t = Tree::new(4);
        let mid = t.add_child(t.root(), "mid", false);
        let leaf = t.add_child(mid, "leaf", false);
        let chain = t.ancestors(leaf);
        assert_eq!(chain, vec![leaf, mid, t.root()]);
    }

    #[test]
    fn leaf_word_prob_is_mixture() {
        let mut t = Tree::new(2);
        let leaf = t.add_child(t.root(), "leaf", false);
        t.node_mut(leaf).words = vec![0.9, 0.1];
        t.node_mut(t.root()).words = vec![0.5, 0.5];
        t.node_mut(leaf).lambdas = vec![0.5, 0.3, 0.2];
        let p0 = t.leaf_word_prob(leaf, WordId(0));
        let expected = 0.5 * 0.9 + 0.3 * 0.5 + 0.2 * 0.5;
        assert!((p0 - expected).abs() < 1e-9);
    }

    #[test]
    fn preorder_visits_every_node_once() {
        let mut t = Tree::new(2);
        let a = t.add_child(t.root(), "a", false);
        let _b = t.add_child(t.root(), "b", false);
        let _c = t.add_child(a, "c", false);
        let order = t.preorder();
        assert_eq!(order.len(), t.len());
        let mut sorted = order.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), order.len());
    }

    #[test]
    fn set_from_new_normalizes_words() {
        let mut t = Tree::new(3);
        let leaf = t.add_child(t.root(), "leaf", false);
        t.node_mut(leaf).new_words = vec![2.0, 2.0, 0.0];
        t.set_from_new(0.0);
        let sum: f64 = t.node(leaf).words.iter().sum();
        assert!((sum - 1.0).abs() < 1e-9);
    }
}
