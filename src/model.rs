//! A trained model ready to score queries: either a VPC barrel (NaiveBayes,
//! EM, and MaxEnt all produce one, scored by the method recorded on it) or
//! an SVM model (whose support-vector shape doesn't fit a barrel's dense
//! per-class columns, so it gets its own variant).
//!
//! Hierarchical EM's tree and the active-learning loop's working barrel are
//! trained and tested in their own modules but aren't wired into this
//! serving path; see DESIGN.md.

use crate::barrel::Barrel;
use crate::config::Config;
use crate::document::ClassId;
use crate::maxent;
use crate::method::Method;
use crate::naive_bayes;
use crate::row::Row;
use crate::svm::{self, SvmModel};

pub enum TrainedModel {
    Vpc(Barrel),
    Svm(SvmModel),
}

impl TrainedModel {
    pub fn classnames(&self) -> &[String] {
        match self {
            TrainedModel::Vpc(b) => &b.classnames,
            TrainedModel::Svm(m) => &m.classnames,
        }
    }

    /// Per-class scores for `row`, not necessarily comparable in scale
    /// across model kinds but always sorted into `(classname, score)` pairs
    /// by the caller.
    pub fn score(&self, row: &Row, config: &Config) -> Vec<(ClassId, f64)> {
        match self {
            TrainedModel::Vpc(vpc) => {
                let probs = match &vpc.method {
                    Method::MaxEnt(_) => maxent::score_row(vpc, row),
                    _ => naive_bayes::score_row(vpc, row, config.event_model, None),
                };
                probs
                    .into_iter()
                    .enumerate()
                    .map(|(c, p)| (ClassId(c as u32), p))
                    .collect()
            }
            TrainedModel::Svm(model) => {
                let predicted = svm::predict(model, row);
                (0..model.classnames.len())
                    .map(|c| {
                        let class = ClassId(c as u32);
                        (class, if class == predicted { 1.0 } else { 0.0 })
                    })
                    .collect()
            }
        }
    }

    /// Scores `row` and returns `(classname, score)` pairs sorted by
    /// descending score, ties broken by class id — the order the query
    /// server's wire protocol (§6) requires.
    pub fn ranked_scores(&self, row: &Row, config: &Config) -> Vec<(String, f64)> {
        let mut scored = self.score(row, config);
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored
            .into_iter()
            .map(|(c, s)| (self.classnames()[c.index()].clone(), s))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Smoothing;
    use crate::document::{Cdoc, Tag};
    use crate::row::WordEntry;
    use crate::vocab::{VocabMode, Vocabulary, WordId};

    fn toy_vpc() -> Barrel {
        let mut vocab = Vocabulary::new(VocabMode::Open);
        let w0 = vocab.add("cat").unwrap();
        let w1 = vocab.add("dog").unwrap();
        vocab.freeze();
        let mut doc_barrel = Barrel::new_document_barrel(vocab, Method::NaiveBayes(Smoothing::Laplace));
        doc_barrel.classnames = vec!["pets".into(), "other".into()];
        let mut d0 = Cdoc::new(Tag::Train, "d0");
        d0.class = Some(ClassId(0));
        let id0 = doc_barrel.docs.push(d0);
        doc_barrel.index.add(w0, id0, 4, 4.0);
        let mut d1 = Cdoc::new(Tag::Train, "d1");
        d1.class = Some(ClassId(1));
        let id1 = doc_barrel.docs.push(d1);
        doc_barrel.index.add(w1, id1, 4, 4.0);
        naive_bayes::train(&doc_barrel, &Config::default()).unwrap()
    }

    #[test]
    fn ranked_scores_are_sorted_descending() {
        let model = TrainedModel::Vpc(toy_vpc());
        let row = Row::from_unsorted(vec![WordEntry { wi: WordId(0), count: 5, weight: 5.0 }]);
        let ranked = model.ranked_scores(&row, &Config::default());
        assert_eq!(ranked.len(), 2);
        assert!(ranked[0].1 >= ranked[1].1);
        assert_eq!(ranked[0].0, "pets");
    }
}
