//! Document (and, for VPC barrels, class) registry `D`.

use serde::{Deserialize, Serialize};

/// A dense, zero-based document/row id (`di`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocId(pub u32);

impl DocId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// A dense, zero-based class id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassId(pub u32);

impl ClassId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Tag {
    Train,
    Test,
    Unlabeled,
    Untagged,
    Validation,
    Ignore,
    Pool,
    Waiting,
}

/// Soft-label / posterior payload attached to a `Cdoc`.
///
/// The source overlays three distinct meanings on one `class_probs`
/// pointer (E-step responsibilities on documents, a per-class distribution
/// on VPC rows, and a pointer-to-int LOO flag). Those are three different
/// typed fields here; LOO queries are an explicit `Option<DocId>` parameter
/// on scoring calls instead (see `naive_bayes::score_document`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ClassProbs(pub Vec<f64>);

impl ClassProbs {
    pub fn uniform(n_classes: usize) -> Self {
        ClassProbs(vec![1.0 / n_classes as f64; n_classes])
    }

    pub fn one_hot(n_classes: usize, class: ClassId) -> Self {
        let mut v = vec![0.0; n_classes];
        if let Some(slot) = v.get_mut(class.index()) {
            *slot = 1.0;
        }
        ClassProbs(v)
    }

    pub fn sum(&self) -> f64 {
        self.0.iter().sum()
    }

    pub fn normalize(&mut self) {
        let s = self.sum();
        if s > 0.0 {
            for v in &mut self.0 {
                *v /= s;
            }
        }
    }
}

/// A document record (`cdoc`) — or, within a VPC barrel, a class record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cdoc {
    pub tag: Tag,
    pub class: Option<ClassId>,
    pub filename: String,
    pub word_count: u32,
    /// Method-specific scalar: Euclidean row length, row entropy, or (in a
    /// VPC row) document count for the class.
    pub normalizer: f64,
    /// Class prior for a VPC row, or document density for density-weighted
    /// active learning.
    pub prior: f64,
    /// Soft labels (document rows) or per-class distribution (VPC rows).
    pub class_probs: Option<ClassProbs>,
}

impl Cdoc {
    pub fn new(tag: Tag, filename: impl Into<String>) -> Self {
        Cdoc {
            tag,
            class: None,
            filename: filename.into(),
            word_count: 0,
            normalizer: 0.0,
            prior: 0.0,
            class_probs: None,
        }
    }
}

/// Ordered collection of `Cdoc`s, indexed by `DocId`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DocumentRegistry {
    docs: Vec<Cdoc>,
}

impl DocumentRegistry {
    pub fn push(&mut self, doc: Cdoc) -> DocId {
        let id = DocId(self.docs.len() as u32);
        self.docs.push(doc);
        id
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn get(&self, id: DocId) -> Option<&Cdoc> {
        self.docs.get(id.index())
    }

    pub fn get_mut(&mut self, id: DocId) -> Option<&mut Cdoc> {
        self.docs.get_mut(id.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = (DocId, &Cdoc)> {
        self.docs
            .iter()
            .enumerate()
            .map(|(i, d)| (DocId(i as u32), d))
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (DocId, &mut Cdoc)> {
        self.docs
            .iter_mut()
            .enumerate()
            .map(|(i, d)| (DocId(i as u32), d))
    }

    pub fn with_tag(&self, tag: Tag) -> impl Iterator<Item = DocId> + '_ {
        self.iter()
            .filter(move |(_, d)| d.tag == tag)
            .map(|(id, _)| id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn push_assigns_dense_ids() {
        let mut reg = DocumentRegistry::default();
        let a = reg.push(Cdoc::new(Tag::Train, "a.txt"));
        let b = reg.push(Cdoc::new(Tag::Test, "b.txt"));
        assert_eq!(a.0, 0);
        assert_eq!(b.0, 1);
        assert_eq!(reg.len(), 2);
    }

    #[test]
    fn class_probs_normalize_to_one() {
        let mut cp = ClassProbs(vec![2.0, 2.0, 4.0]);
        cp.normalize();
        assert!((cp.sum() - 1.0).abs() < 1e-9);
    }

    #[test]
    fn with_tag_filters() {
        let mut reg = DocumentRegistry::default();
        reg.push(Cdoc::new(Tag::Train, "a"));
        reg.push(Cdoc::new(Tag::Unlabeled, "b"));
        reg.push(Cdoc::new(Tag::Train, "c"));
        let train: Vec<_> = reg.with_tag(Tag::Train).collect();
        assert_eq!(train, vec![DocId(0), DocId(2)]);
    }
}
