//! Support Vector Machines: SMO decomposition, kernels, a kernel value
//! cache, one-vs-rest/pairwise multiclass, and transduction (§4.9).
//!
//! A trained binary classifier doesn't fit the `Barrel` shape the other
//! learners share (its support vectors are a subset of training rows, not
//! a dense per-class weight column), so it gets its own `SvmModel` type
//! instead of riding on `barrel::Barrel`.

use std::collections::{HashMap, VecDeque};

use serde::{Deserialize, Serialize};

use crate::barrel::Barrel;
use crate::config::{Config, Kernel, MultiClassMode, SvmConfig};
use crate::document::{ClassId, Tag};
use crate::errors::{CrossbowError, Result};
use crate::heap_iter::HeapRowIterator;
use crate::row::Row;
use crate::vocab::WordId;

fn dot(a: &Row, b: &Row) -> f64 {
    let (ae, be) = (a.entries(), b.entries());
    let (mut i, mut j) = (0, 0);
    let mut sum = 0.0;
    while i < ae.len() && j < be.len() {
        match ae[i].wi.cmp(&be[j].wi) {
            std::cmp::Ordering::Less => i += 1,
            std::cmp::Ordering::Greater => j += 1,
            std::cmp::Ordering::Equal => {
                sum += ae[i].weight * be[j].weight;
                i += 1;
                j += 1;
            }
        }
    }
    sum
}

/// `K(a, b)` for the configured kernel. `Kernel::Fisher` is approximated by
/// the plain dot product of the (already TF-IDF weighted) rows — the true
/// Fisher kernel needs gradients of a generative model's log-likelihood,
/// which this crate doesn't separately maintain for SVM training.
pub fn kernel_value(kernel: &Kernel, a: &Row, b: &Row) -> f64 {
    match *kernel {
        Kernel::Linear | Kernel::Fisher => dot(a, b),
        Kernel::Polynomial { degree, coef0 } => (dot(a, b) + coef0).powi(degree as i32),
        Kernel::Rbf { gamma } => {
            let d2 = dot(a, a) + dot(b, b) - 2.0 * dot(a, b);
            (-gamma * d2.max(0.0)).exp()
        }
        Kernel::Sigmoid { gamma, coef0 } => (gamma * dot(a, b) + coef0).tanh(),
    }
}

/// Ageing (FIFO-evicted) cache of pairwise kernel values, keyed by the
/// unordered pair of example indices.
struct KernelCache {
    capacity: usize,
    map: HashMap<(u32, u32), f64>,
    order: VecDeque<(u32, u32)>,
}

impl KernelCache {
    fn new(capacity: usize) -> Self {
        KernelCache {
            capacity,
            map: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    fn get_or_insert_with(&mut self, i: usize, j: usize, f: impl FnOnce() -> f64) -> f64 {
        let key = if i <= j {
            (i as u32, j as u32)
        } else {
            (j as u32, i as u32)
        };
        if let Some(&v) = self.map.get(&key) {
            return v;
        }
        let v = f();
        if self.capacity > 0 {
            if self.map.len() >= self.capacity {
                if let Some(old) = self.order.pop_front() {
                    self.map.remove(&old);
                }
            }
            self.map.insert(key, v);
            self.order.push_back(key);
        }
        v
    }
}

/// A trained binary classifier: its support vectors (row, label, alpha)
/// plus the bias term.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BinaryModel {
    pub kernel: Kernel,
    pub bias: f64,
    pub support: Vec<(Row, f64, f64)>,
}

impl BinaryModel {
    pub fn decision_value(&self, row: &Row) -> f64 {
        self.support
            .iter()
            .map(|(sv_row, y, alpha)| alpha * y * kernel_value(&self.kernel, sv_row, row))
            .sum::<f64>()
            + self.bias
    }
}

/// A kernel-`Linear` model folded into an explicit weight vector, avoiding
/// a support-vector scan at prediction time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearModel {
    pub w: HashMap<WordId, f64>,
    pub b: f64,
}

impl LinearModel {
    pub fn decision_value(&self, row: &Row) -> f64 {
        row.entries()
            .iter()
            .map(|e| self.w.get(&e.wi).copied().unwrap_or(0.0) * e.weight)
            .sum::<f64>()
            + self.b
    }
}

/// Folds a `Kernel::Linear` model's support vectors into `w = Σ α·y·x`.
/// Returns `None` for any other kernel.
pub fn fold_linear(model: &BinaryModel) -> Option<LinearModel> {
    if !matches!(model.kernel, Kernel::Linear) {
        return None;
    }
    let mut w: HashMap<WordId, f64> = HashMap::new();
    for (row, y, alpha) in &model.support {
        let coeff = alpha * y;
        for e in row.entries() {
            *w.entry(e.wi).or_insert(0.0) += coeff * e.weight;
        }
    }
    Some(LinearModel { w, b: model.bias })
}

const DEFAULT_MAX_PASSES: usize = 50;

fn kij(examples: &[(Row, f64)], kernel: &Kernel, cache: &mut KernelCache, i: usize, j: usize) -> f64 {
    cache.get_or_insert_with(i, j, || kernel_value(kernel, &examples[i].0, &examples[j].0))
}

fn decision_of(
    examples: &[(Row, f64)],
    kernel: &Kernel,
    cache: &mut KernelCache,
    alpha: &[f64],
    b: f64,
    i: usize,
) -> f64 {
    let mut f = b;
    for (m, &am) in alpha.iter().enumerate() {
        if am != 0.0 {
            f += am * examples[m].1 * kij(examples, kernel, cache, m, i);
        }
    }
    f
}

/// Simplified SMO (Platt's two-variable update): decomposes the dual QP
/// into a sequence of analytically solved 2-variable subproblems until a
/// full pass changes nothing, or `max_passes` consecutive no-change passes
/// are observed. `c_of` gives a per-example box constraint, so labeled and
/// (in transduction) pseudo-labeled examples can carry different costs.
pub fn smo_train(
    examples: &[(Row, f64)],
    c_of: impl Fn(usize) -> f64,
    kernel: Kernel,
    tol: f64,
) -> BinaryModel {
    let n = examples.len();
    let mut alpha = vec![0.0f64; n];
    let mut b = 0.0f64;
    let mut cache = KernelCache::new(4096);

    let mut passes = 0usize;
    while passes < DEFAULT_MAX_PASSES {
        let mut changed = 0usize;
        for i in 0..n {
            let yi = examples[i].1;
            let ci = c_of(i);
            let ei = decision_of(examples, &kernel, &mut cache, &alpha, b, i) - yi;
            if (yi * ei < -tol && alpha[i] < ci) || (yi * ei > tol && alpha[i] > 0.0) {
                // Heuristic second choice: the index maximizing |Ei - Ej|.
                let mut best_j = None;
                let mut best_gap = -1.0f64;
                for j in 0..n {
                    if j == i {
                        continue;
                    }
                    let ej = decision_of(examples, &kernel, &mut cache, &alpha, b, j) - examples[j].1;
                    let gap = (ei - ej).abs();
                    if gap > best_gap {
                        best_gap = gap;
                        best_j = Some((j, ej));
                    }
                }
                let Some((j, ej)) = best_j else { continue };
                let yj = examples[j].1;
                let cj = c_of(j);
                let (alpha_i_old, alpha_j_old) = (alpha[i], alpha[j]);
                let (lo, hi) = if (yi - yj).abs() > 1e-9 {
                    ((alpha_j_old - alpha_i_old).max(0.0), cj.min(ci + alpha_j_old - alpha_i_old))
                } else {
                    ((alpha_i_old + alpha_j_old - ci).max(0.0), cj.min(alpha_i_old + alpha_j_old))
                };
                if lo >= hi {
                    continue;
                }
                let eta = 2.0 * kij(examples, &kernel, &mut cache, i, j)
                    - kij(examples, &kernel, &mut cache, i, i)
                    - kij(examples, &kernel, &mut cache, j, j);
                if eta >= 0.0 {
                    continue;
                }
                let mut alpha_j_new = alpha_j_old - yj * (ei - ej) / eta;
                alpha_j_new = alpha_j_new.clamp(lo, hi);
                if (alpha_j_new - alpha_j_old).abs() < 1e-9 {
                    continue;
                }
                let alpha_i_new = alpha_i_old + yi * yj * (alpha_j_old - alpha_j_new);

                let b1 = b - ei
                    - yi * (alpha_i_new - alpha_i_old) * kij(examples, &kernel, &mut cache, i, i)
                    - yj * (alpha_j_new - alpha_j_old) * kij(examples, &kernel, &mut cache, i, j);
                let b2 = b - ej
                    - yi * (alpha_i_new - alpha_i_old) * kij(examples, &kernel, &mut cache, i, j)
                    - yj * (alpha_j_new - alpha_j_old) * kij(examples, &kernel, &mut cache, j, j);
                b = if alpha_i_new > 0.0 && alpha_i_new < ci {
                    b1
                } else if alpha_j_new > 0.0 && alpha_j_new < cj {
                    b2
                } else {
                    0.5 * (b1 + b2)
                };

                alpha[i] = alpha_i_new;
                alpha[j] = alpha_j_new;
                changed += 1;
            }
        }
        if changed == 0 {
            break;
        }
        passes += 1;
    }

    let support = examples
        .iter()
        .zip(alpha.iter())
        .filter(|(_, &a)| a.abs() > 1e-9)
        .map(|((row, y), &a)| (row.clone(), *y, a))
        .collect();

    BinaryModel {
        kernel,
        bias: b,
        support,
    }
}

/// Trains a binary SVM transductively: after an initial purely-labeled
/// pass, unlabeled rows are assigned pseudo-labels from the current
/// decision function and iteratively re-solved, swapping the pseudo-labels
/// of an opposite-signed pair whenever doing so would reduce total slack
/// (Joachims' TSVM label-switching heuristic), until no improving swap
/// remains or `max_flips` is reached.
pub fn train_transductive(
    labeled: &[(Row, f64)],
    unlabeled: &[Row],
    kernel: Kernel,
    cost: f64,
    transduction_cost: f64,
    tol: f64,
    max_flips: usize,
) -> (BinaryModel, Vec<f64>) {
    let initial = smo_train(labeled, |_| cost, kernel.clone(), tol);
    let mut pseudo: Vec<f64> = unlabeled
        .iter()
        .map(|r| if initial.decision_value(r) >= 0.0 { 1.0 } else { -1.0 })
        .collect();
    if unlabeled.is_empty() {
        return (initial, pseudo);
    }

    let n_labeled = labeled.len();
    let mut model = initial;
    for _ in 0..max_flips {
        let mut examples: Vec<(Row, f64)> = labeled.to_vec();
        examples.extend(unlabeled.iter().cloned().zip(pseudo.iter().copied()));
        let c_of = |i: usize| if i < n_labeled { cost } else { transduction_cost };
        model = smo_train(&examples, c_of, kernel.clone(), tol);

        let slacks: Vec<f64> = unlabeled
            .iter()
            .zip(pseudo.iter())
            .map(|(r, &y)| (1.0 - y * model.decision_value(r)).max(0.0))
            .collect();

        let mut best: Option<(usize, usize, f64)> = None;
        for i in 0..unlabeled.len() {
            if pseudo[i] <= 0.0 {
                continue;
            }
            for j in 0..unlabeled.len() {
                if pseudo[j] >= 0.0 {
                    continue;
                }
                let gain = slacks[i] + slacks[j] - 2.0;
                if gain > 0.0 && best.map(|(_, _, g)| gain > g).unwrap_or(true) {
                    best = Some((i, j, gain));
                }
            }
        }
        match best {
            Some((i, j, _)) => {
                pseudo[i] = -1.0;
                pseudo[j] = 1.0;
            }
            None => break,
        }
    }
    (model, pseudo)
}

/// One binary classifier within a multiclass model: `class_b = None` means
/// "this class vs. the rest" (one-vs-rest); `Some(b)` means "a vs. b"
/// (pairwise).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PairwiseBinary {
    pub class_a: ClassId,
    pub class_b: Option<ClassId>,
    pub model: BinaryModel,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SvmModel {
    pub classnames: Vec<String>,
    pub mode: MultiClassMode,
    pub binaries: Vec<PairwiseBinary>,
}

fn training_rows(doc_barrel: &Barrel) -> HashMap<crate::document::DocId, Row> {
    HeapRowIterator::new(&doc_barrel.index, |_| true).collect()
}

/// Trains a multiclass SVM over `doc_barrel`'s `Tag::Train` documents.
pub fn train(doc_barrel: &Barrel, config: &Config) -> Result<SvmModel> {
    let n_classes = doc_barrel.n_classes();
    if n_classes < 2 {
        return Err(CrossbowError::invalid_argument(
            "SVM training needs at least two classes",
        ));
    }
    let rows = training_rows(doc_barrel);
    let svm: &SvmConfig = &config.svm;

    let labeled: Vec<(crate::document::DocId, ClassId, Row)> = doc_barrel
        .docs
        .iter()
        .filter(|(_, d)| d.tag == Tag::Train)
        .filter_map(|(id, d)| d.class.map(|c| (id, c, rows.get(&id).cloned().unwrap_or_default())))
        .collect();

    let mut binaries = Vec::new();
    match svm.multiclass {
        MultiClassMode::OneVsRest => {
            for c in 0..n_classes {
                let class = ClassId(c as u32);
                let examples: Vec<(Row, f64)> = labeled
                    .iter()
                    .map(|(_, lc, row)| (row.clone(), if *lc == class { 1.0 } else { -1.0 }))
                    .collect();
                let model = smo_train(&examples, |_| svm.cost, svm.kernel, svm.kkt_tolerance);
                binaries.push(PairwiseBinary {
                    class_a: class,
                    class_b: None,
                    model,
                });
            }
        }
        MultiClassMode::Pairwise => {
            for a in 0..n_classes {
                for b in (a + 1)..n_classes {
                    let (ca, cb) = (ClassId(a as u32), ClassId(b as u32));
                    let examples: Vec<(Row, f64)> = labeled
                        .iter()
                        .filter(|(_, lc, _)| *lc == ca || *lc == cb)
                        .map(|(_, lc, row)| (row.clone(), if *lc == ca { 1.0 } else { -1.0 }))
                        .collect();
                    if examples.is_empty() {
                        continue;
                    }
                    let model = smo_train(&examples, |_| svm.cost, svm.kernel, svm.kkt_tolerance);
                    binaries.push(PairwiseBinary {
                        class_a: ca,
                        class_b: Some(cb),
                        model,
                    });
                }
            }
        }
    }

    Ok(SvmModel {
        classnames: doc_barrel.classnames.clone(),
        mode: svm.multiclass,
        binaries,
    })
}

/// Predicts the class of `row`. Pairwise voting ties are broken by the
/// largest pairwise margin among the tied classes and, failing that, the
/// lowest class id — a deliberate, documented resolution of the historical
/// undefined tie behavior.
pub fn predict(model: &SvmModel, row: &Row) -> ClassId {
    match model.mode {
        MultiClassMode::OneVsRest => model
            .binaries
            .iter()
            .map(|pb| (pb.class_a, pb.model.decision_value(row)))
            .fold((ClassId(0), f64::NEG_INFINITY), |best, cur| {
                if cur.1 > best.1 {
                    cur
                } else {
                    best
                }
            })
            .0,
        MultiClassMode::Pairwise => {
            let n_classes = model.classnames.len();
            let mut votes = vec![0u32; n_classes];
            let mut best_margin = vec![f64::NEG_INFINITY; n_classes];
            for pb in &model.binaries {
                let Some(cb) = pb.class_b else { continue };
                let value = pb.model.decision_value(row);
                let (winner, margin) = if value >= 0.0 {
                    (pb.class_a, value)
                } else {
                    (cb, -value)
                };
                votes[winner.index()] += 1;
                if margin > best_margin[winner.index()] {
                    best_margin[winner.index()] = margin;
                }
            }
            let max_votes = votes.iter().copied().max().unwrap_or(0);
            let tied: Vec<usize> = (0..n_classes).filter(|&c| votes[c] == max_votes).collect();
            let winner = tied
                .iter()
                .copied()
                .max_by(|&a, &b| {
                    best_margin[a]
                        .partial_cmp(&best_margin[b])
                        .unwrap_or(std::cmp::Ordering::Equal)
                })
                .unwrap_or(0);
            // Among ties for the largest margin too, `max_by` keeps the
            // last (highest-index) maximum; re-resolve to the lowest id.
            let margin_tied: Vec<usize> = tied
                .iter()
                .copied()
                .filter(|&c| (best_margin[c] - best_margin[winner]).abs() < 1e-12)
                .collect();
            ClassId(*margin_tied.iter().min().unwrap_or(&winner) as u32)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrel::{Barrel, BarrelKind};
    use crate::document::Cdoc;
    use crate::method::Method;
    use crate::row::WordEntry;
    use crate::vocab::{VocabMode, Vocabulary};

    fn row(pairs: &[(u32, f64)]) -> Row {
        Row::from_unsorted(
            pairs
                .iter()
                .map(|&(w, v)| WordEntry {
                    wi: WordId(w),
                    count: v as u32,
                    weight: v,
                })
                .collect(),
        )
    }

    #[test]
    fn linear_kernel_is_dot_product() {
        let a = row(&[(0, 1.0), (1, 2.0)]);
        let b = row(&[(0, 3.0), (1, 4.0)]);
        assert!((kernel_value(&Kernel::Linear, &a, &b) - 11.0).abs() < 1e-9);
    }

    #[test]
    fn smo_separates_linearly_separable_points() {
        let examples = vec![
            (row(&[(0, 2.0)]), 1.0),
            (row(&[(0, 3.0)]), 1.0),
            (row(&[(0, -2.0)]), -1.0),
            (row(&[(0, -3.0)]), -1.0),
        ];
        let model = smo_train(&examples, |_| 10.0, Kernel::Linear, 1e-3);
        assert!(model.decision_value(&row(&[(0, 2.5)])) > 0.0);
        assert!(model.decision_value(&row(&[(0, -2.5)])) < 0.0);
    }

    #[test]
    fn linear_fold_matches_support_vector_scoring() {
        let examples = vec![
            (row(&[(0, 2.0)]), 1.0),
            (row(&[(0, -2.0)]), -1.0),
        ];
        let model = smo_train(&examples, |_| 10.0, Kernel::Linear, 1e-3);
        let folded = fold_linear(&model).unwrap();
        let probe = row(&[(0, 1.3)]);
        assert!((model.decision_value(&probe) - folded.decision_value(&probe)).abs() < 1e-6);
    }

    fn toy_three_class_barrel() -> Barrel {
        let mut vocab = Vocabulary::new(VocabMode::Open);
        for t in ["a", "b", "c"] {
            vocab.add(t).unwrap();
        }
        vocab.freeze();
        let mut barrel = Barrel::new_document_barrel(vocab, Method::Svm(SvmConfig::default()));
        barrel.classnames = vec!["A".into(), "B".into(), "C".into()];
        let docs = [
            (0u32, ClassId(0), 5.0),
            (1, ClassId(1), 5.0),
            (2, ClassId(2), 5.0),
        ];
        for (wi, class, weight) in docs {
            let mut d = Cdoc::new(Tag::Train, format!("d{wi}"));
            d.class = Some(class);
            let id = barrel.docs.push(d);
            barrel.index.add(WordId(wi), id, weight as u32, weight);
        }
        barrel.kind = BarrelKind::Document;
        barrel
    }

    #[test]
    fn one_vs_rest_predicts_each_training_document_correctly() {
        let doc_barrel = toy_three_class_barrel();
        let mut config = Config::default();
        config.svm.multiclass = MultiClassMode::OneVsRest;
        config.svm.cost = 10.0;
        let model = train(&doc_barrel, &config).unwrap();
        assert_eq!(predict(&model, &row(&[(0, 5.0)])), ClassId(0));
        assert_eq!(predict(&model, &row(&[(1, 5.0)])), ClassId(1));
        assert_eq!(predict(&model, &row(&[(2, 5.0)])), ClassId(2));
    }

    #[test]
    fn pairwise_predicts_each_training_document_correctly() {
        let doc_barrel = toy_three_class_barrel();
        let mut config = Config::default();
        config.svm.multiclass = MultiClassMode::Pairwise;
        config.svm.cost = 10.0;
        let model = train(&doc_barrel, &config).unwrap();
        assert_eq!(predict(&model, &row(&[(0, 5.0)])), ClassId(0));
        assert_eq!(predict(&model, &row(&[(2, 5.0)])), ClassId(2));
    }

    #[test]
    fn transduction_can_relabel_an_unlabeled_point() {
        let labeled = vec![
            (row(&[(0, 5.0)]), 1.0),
            (row(&[(0, -5.0)]), -1.0),
        ];
        // An unlabeled point that clearly belongs on the positive side but
        // starts (deliberately, via an adversarial initial guess this test
        // doesn't control) wherever the initial decision function puts it.
        let unlabeled = vec![row(&[(0, 4.5)])];
        let (model, pseudo) =
            train_transductive(&labeled, &unlabeled, Kernel::Linear, 10.0, 1.0, 1e-3, 5);
        assert_eq!(pseudo.len(), 1);
        assert!(model.decision_value(&row(&[(0, 4.5)])) > 0.0);
    }
}
