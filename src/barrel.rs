//! Barrel B: a trained-model container bundling the vocabulary snapshot,
//! the sparse index, the document/class registry, the classname map, and
//! the method that produced it.

use serde::{Deserialize, Serialize};

use crate::document::{ClassId, DocumentRegistry};
use crate::method::Method;
use crate::sparse::SparseIndex;
use crate::vocab::Vocabulary;

/// Whether a barrel's rows are documents (one row per indexed document) or
/// classes (one row per class, i.e. "vector per class").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarrelKind {
    Document,
    Vpc,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Barrel {
    pub vocab: Vocabulary,
    pub index: SparseIndex,
    pub docs: DocumentRegistry,
    pub classnames: Vec<String>,
    pub method: Method,
    pub kind: BarrelKind,
}

impl Barrel {
    pub fn new_document_barrel(vocab: Vocabulary, method: Method) -> Self {
        Barrel {
            vocab,
            index: SparseIndex::default(),
            docs: DocumentRegistry::default(),
            classnames: Vec::new(),
            method,
            kind: BarrelKind::Document,
        }
    }

    pub fn n_classes(&self) -> usize {
        self.classnames.len()
    }

    pub fn classname(&self, class: ClassId) -> Option<&str> {
        self.classnames.get(class.index()).map(String::as_str)
    }

    /// §8 invariant: for a VPC barrel, class count == row count ==
    /// classname-map length.
    pub fn check_vpc_consistency(&self) -> bool {
        if self.kind != BarrelKind::Vpc {
            return true;
        }
        self.docs.len() == self.classnames.len()
    }
}
