//! Multinomial / multivariate-Bernoulli Naive Bayes (§4.5).
//!
//! VPC construction and scoring are free functions rather than methods on
//! `Barrel` because EM's M-step (`em.rs`) and hierarchical EM reuse exactly
//! this code with a different per-document membership function — the
//! reuse the system overview calls out explicitly.

use crate::barrel::{Barrel, BarrelKind};
use crate::config::{Config, EventModel, Smoothing};
use crate::document::{Cdoc, ClassId, DocId, Tag};
use crate::errors::{CrossbowError, Result};
use crate::method::Method;
use crate::row::Row;
use crate::sparse::SparseIndex;
use crate::vocab::{VocabMode, Vocabulary};

/// Per-class raw (possibly fractional, under EM) sufficient statistics:
/// `n_wc[c]` keyed by word-id through `counts` (a `SparseIndex` whose
/// "documents" are class ids), plus the per-class total word mass.
pub struct ClassStatistics {
    pub counts: SparseIndex,
    pub class_word_mass: Vec<f64>,
    pub class_doc_mass: Vec<f64>,
}

/// A function from (document, class) to that document's membership weight
/// in the class: one-hot for hard-labeled NaiveBayes, soft `class_probs`
/// for EM's M-step.
pub trait Membership {
    fn weight(&self, doc: &Cdoc, class: ClassId) -> f64;
}

/// Hard one-hot membership from `Cdoc::class`, restricted to `tag`.
pub struct HardLabels {
    pub tag: Tag,
}

impl Membership for HardLabels {
    fn weight(&self, doc: &Cdoc, class: ClassId) -> f64 {
        if doc.tag == self.tag && doc.class == Some(class) {
            1.0
        } else {
            0.0
        }
    }
}

/// Soft membership from `Cdoc::class_probs`, as maintained by EM.
pub struct SoftLabels;

impl Membership for SoftLabels {
    fn weight(&self, doc: &Cdoc, class: ClassId) -> f64 {
        doc.class_probs
            .as_ref()
            .and_then(|p| p.0.get(class.index()))
            .copied()
            .unwrap_or(0.0)
    }
}

/// Accumulates `n_{w,c}` over every document in `doc_barrel` weighted by
/// `membership`. This is the statistic both plain NaiveBayes training and
/// EM's M-step compute; they differ only in which `Membership` they pass.
pub fn accumulate_statistics(
    doc_barrel: &Barrel,
    n_classes: usize,
    membership: &dyn Membership,
) -> ClassStatistics {
    let mut counts = SparseIndex::with_capacity(doc_barrel.vocab.len());
    let mut class_word_mass = vec![0.0; n_classes];
    let mut class_doc_mass = vec![0.0; n_classes];

    for (wi, col) in doc_barrel.index.non_hidden_columns() {
        for entry in col.entries() {
            let doc = match doc_barrel.docs.get(entry.doc) {
                Some(d) => d,
                None => continue,
            };
            for c in 0..n_classes {
                let w = membership.weight(doc, ClassId(c as u32));
                if w == 0.0 {
                    continue;
                }
                let mass = w * entry.weight;
                counts.add(wi, DocId(c as u32), 0, mass);
                class_word_mass[c] += mass;
            }
        }
    }
    for (_, doc) in doc_barrel.docs.iter() {
        for c in 0..n_classes {
            class_doc_mass[c] += membership.weight(doc, ClassId(c as u32));
        }
    }
    ClassStatistics {
        counts,
        class_word_mass,
        class_doc_mass,
    }
}

/// `P(w|c)` for every word, under `smoothing`, optionally with a word/doc
/// held out (the leave-one-out replacement for the source's pointer-to-int
/// cast): `loo` subtracts `held_out_count * held_out_membership` from both
/// `n_{w,c}` and the class total before smoothing.
pub fn class_conditional_probs(
    vocab_len: usize,
    stats: &ClassStatistics,
    class: ClassId,
    smoothing: &Smoothing,
    loo: Option<(&Row, f64)>,
) -> Vec<f64> {
    let v = vocab_len as f64;
    let mut n_wc = vec![0.0; vocab_len];
    for (wi_idx, slot) in n_wc.iter_mut().enumerate() {
        let wi = crate::vocab::WordId(wi_idx as u32);
        if let Some(e) = stats.counts.entry(wi, DocId(class.index() as u32)) {
            *slot = e.weight;
        }
    }
    let mut n_c = stats.class_word_mass.get(class.index()).copied().unwrap_or(0.0);

    if let Some((row, membership)) = loo {
        if membership > 0.0 {
            for e in row.entries() {
                let delta = membership * e.weight;
                if let Some(slot) = n_wc.get_mut(e.wi.index()) {
                    *slot = (*slot - delta).max(0.0);
                }
                n_c = (n_c - delta).max(0.0);
            }
        }
    }

    match smoothing {
        Smoothing::Laplace => n_wc.iter().map(|&n| (n + 1.0) / (n_c + v)).collect(),
        Smoothing::MEstimate { m, p } => {
            n_wc.iter().map(|&n| (n + m * p) / (n_c + m)).collect()
        }
        Smoothing::WittenBell => {
            let types = n_wc.iter().filter(|&&n| n > 0.0).count() as f64;
            let unseen = (v - types).max(1.0);
            let denom = n_c + types;
            n_wc.iter()
                .map(|&n| {
                    if n > 0.0 {
                        n / denom
                    } else if denom > 0.0 {
                        types / (denom * unseen)
                    } else {
                        1.0 / v
                    }
                })
                .collect()
        }
        Smoothing::GoodTuring { k } => good_turing_probs(&n_wc, n_c, *k),
        Smoothing::Dirichlet { weight, .. } => {
            // Per-word alpha_w is an external-file extension point; absent
            // a file this degrades to a flat Dirichlet prior of `weight`.
            let alpha_total = weight * v;
            n_wc.iter().map(|&n| (n + weight) / (n_c + alpha_total)).collect()
        }
    }
}

fn good_turing_probs(n_wc: &[f64], n_c: f64, k: u32) -> Vec<f64> {
    // Classic Good-Turing: for counts r <= k, replace with
    // r* = (r+1) * N_{r+1} / N_r, where N_r is the number of words with
    // count exactly r (rounded, since masses may be fractional under EM).
    use std::collections::HashMap;
    let mut freq_of_freq: HashMap<u32, u64> = HashMap::new();
    for &n in n_wc {
        *freq_of_freq.entry(n.round() as u32).or_insert(0) += 1;
    }
    let smoothed: Vec<f64> = n_wc
        .iter()
        .map(|&n| {
            let r = n.round() as u32;
            if r == 0 || r > k {
                return n;
            }
            let n_r = *freq_of_freq.get(&r).unwrap_or(&0) as f64;
            let n_r1 = *freq_of_freq.get(&(r + 1)).unwrap_or(&0) as f64;
            if n_r > 0.0 {
                (r as f64 + 1.0) * n_r1 / n_r
            } else {
                n
            }
        })
        .collect();
    let total: f64 = smoothed.iter().sum::<f64>() + n_wc.len() as f64;
    let denom = n_c.max(total);
    smoothed.iter().map(|&s| (s + 1.0) / (denom + n_wc.len() as f64)).collect()
}

/// Trains a VPC barrel from `doc_barrel` using hard labels on `Tag::Train`
/// documents.
pub fn train(doc_barrel: &Barrel, config: &Config) -> Result<Barrel> {
    let n_classes = doc_barrel.classnames.len();
    if n_classes == 0 {
        return Err(CrossbowError::invalid_argument(
            "cannot train a VPC barrel with zero classes",
        ));
    }
    let membership = HardLabels { tag: Tag::Train };
    let stats = accumulate_statistics(doc_barrel, n_classes, &membership);
    build_vpc_from_statistics(doc_barrel, &stats, n_classes, config)
}

/// Shared by plain NaiveBayes training and EM's M-step: turns accumulated
/// statistics into a fresh VPC barrel.
pub fn build_vpc_from_statistics(
    doc_barrel: &Barrel,
    stats: &ClassStatistics,
    n_classes: usize,
    config: &Config,
) -> Result<Barrel> {
    let total_docs: f64 = stats.class_doc_mass.iter().sum();
    let mut any_zero_prior = false;
    let mut vpc = Barrel {
        vocab: doc_barrel.vocab.clone(),
        index: SparseIndex::with_capacity(doc_barrel.vocab.len()),
        docs: Default::default(),
        classnames: doc_barrel.classnames.clone(),
        method: Method::NaiveBayes(config.smoothing.clone()),
        kind: BarrelKind::Vpc,
    };

    for c in 0..n_classes {
        let class = ClassId(c as u32);
        let prior = if config.uniform_class_priors {
            1.0 / n_classes as f64
        } else if total_docs > 0.0 {
            stats.class_doc_mass[c] / total_docs
        } else {
            0.0
        };
        if prior == 0.0 {
            any_zero_prior = true;
        }
        let probs = class_conditional_probs(
            doc_barrel.vocab.len(),
            stats,
            class,
            &config.smoothing,
            None,
        );
        for (wi_idx, p) in probs.iter().enumerate() {
            vpc.index.set(
                crate::vocab::WordId(wi_idx as u32),
                DocId(c as u32),
                0,
                *p,
            );
        }
        let mut cdoc = Cdoc::new(Tag::Train, doc_barrel.classnames[c].clone());
        cdoc.class = Some(class);
        cdoc.word_count = stats.class_word_mass[c] as u32;
        cdoc.prior = prior;
        vpc.docs.push(cdoc);
    }
    if any_zero_prior {
        tracing::warn!("one or more class priors are zero; training data may be unbalanced");
    }
    Ok(vpc)
}

/// Scores `row` against a trained VPC barrel, returning `P(c|d)` for every
/// class, normalized to sum to 1. `loo` optionally excludes `row`'s own
/// contribution (weighted by its per-class membership) from the VPC
/// statistics, replacing the source's pointer-to-int LOO flag.
pub fn score_row(
    vpc: &Barrel,
    row: &Row,
    event_model: EventModel,
    loo: Option<(&ClassStatistics, &Row, &[f64])>,
) -> Vec<f64> {
    rescale_and_exponentiate(&raw_log_scores(vpc, row, event_model, 1.0, loo))
}

/// Unnormalized `log P(d, c)` per class, with an optional deterministic
/// annealing `temperature` dividing the log-likelihood term (§4.6).
pub fn raw_log_scores(
    vpc: &Barrel,
    row: &Row,
    event_model: EventModel,
    temperature: f64,
    loo: Option<(&ClassStatistics, &Row, &[f64])>,
) -> Vec<f64> {
    let n_classes = vpc.n_classes();
    let mut log_scores = vec![0.0f64; n_classes];

    for c in 0..n_classes {
        let class = ClassId(c as u32);
        let doc = vpc.docs.get(DocId(c as u32));
        let prior = doc.map(|d| d.prior).unwrap_or(0.0);
        let log_prior = if prior > 0.0 { prior.ln() } else { f64::NEG_INFINITY };

        let probs: std::borrow::Cow<[f64]> = if let Some((stats, held_row, membership)) = loo {
            std::borrow::Cow::Owned(class_conditional_probs(
                vpc.vocab.len(),
                stats,
                class,
                &smoothing_of(vpc),
                Some((held_row, membership[c])),
            ))
        } else {
            let mut v = vec![0.0; vpc.vocab.len()];
            for wi_idx in 0..vpc.vocab.len() {
                let wi = crate::vocab::WordId(wi_idx as u32);
                if let Some(e) = vpc.index.entry(wi, DocId(c as u32)) {
                    v[wi_idx] = e.weight;
                }
            }
            std::borrow::Cow::Owned(v)
        };

        let mut word_ll = 0.0f64;
        match event_model {
            EventModel::WordEvent => {
                for e in row.entries() {
                    let p = probs.get(e.wi.index()).copied().unwrap_or(1e-12).max(1e-12);
                    word_ll += e.weight * p.ln();
                }
            }
            EventModel::DocumentEvent => {
                let present: std::collections::HashSet<_> =
                    row.entries().iter().map(|e| e.wi.index()).collect();
                for (wi_idx, &p) in probs.iter().enumerate() {
                    let p = p.clamp(1e-12, 1.0 - 1e-12);
                    word_ll += if present.contains(&wi_idx) {
                        p.ln()
                    } else {
                        (1.0 - p).ln()
                    };
                }
            }
        }
        let t = if temperature > 0.0 { temperature } else { 1.0 };
        log_scores[c] = log_prior + word_ll / t;
    }

    log_scores
}

fn smoothing_of(vpc: &Barrel) -> Smoothing {
    match &vpc.method {
        Method::NaiveBayes(s) => s.clone(),
        _ => Smoothing::Laplace,
    }
}

/// Log-space accumulation rescaled by its max (to avoid underflow), then
/// exponentiated and normalized so `Σ_c P(c|d) = 1`.
pub fn rescale_and_exponentiate(log_scores: &[f64]) -> Vec<f64> {
    let max = log_scores
        .iter()
        .copied()
        .fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        let n = log_scores.len().max(1);
        return vec![1.0 / n as f64; log_scores.len()];
    }
    let mut out: Vec<f64> = log_scores.iter().map(|&s| (s - max).exp()).collect();
    let sum: f64 = out.iter().sum();
    if sum > 0.0 {
        for v in &mut out {
            *v /= sum;
        }
    }
    out
}

/// `(_, _) -> Vocabulary` helper used by `train` to validate mode before
/// building the document barrel's matching VPC vocabulary snapshot.
pub fn validated_vocab(vocab: &Vocabulary) -> Result<()> {
    if vocab.mode() == VocabMode::Open {
        return Err(CrossbowError::invalid_argument(
            "vocabulary must be frozen before training",
        ));
    }
    Ok(())
}
