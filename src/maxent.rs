//! Maximum Entropy with iterative scaling (§4.8).
//!
//! The trained model is stored in a `Barrel` exactly like NaiveBayes's VPC
//! barrel, except the index's per-(word, class) weight holds `λ_{w,c}`
//! rather than a probability — scoring exponentiates and normalizes.

use crate::barrel::{Barrel, BarrelKind};
use crate::config::{Config, MaxEntConfig};
use crate::document::{Cdoc, ClassId, DocId, Tag};
use crate::errors::{CrossbowError, Result};
use crate::heap_iter::HeapRowIterator;
use crate::method::Method;
use crate::naive_bayes::rescale_and_exponentiate;
use crate::row::Row;
use crate::sparse::SparseIndex;
use crate::vocab::WordId;

/// `f#(d,c)`: total feature count for `(d,c)`. Independent of `c` in this
/// feature set (every word-class indicator fires with the document's own
/// word count), matching the source.
fn feature_total(row: &Row) -> f64 {
    row.entries().iter().map(|e| e.weight).sum()
}

fn p_c_given_d(lambda: &SparseIndex, row: &Row, class: ClassId, n_classes: usize) -> f64 {
    let log_scores: Vec<f64> = (0..n_classes)
        .map(|c| {
            row.entries()
                .iter()
                .map(|e| {
                    lambda
                        .entry(e.wi, DocId(c as u32))
                        .map(|en| en.weight * e.weight)
                        .unwrap_or(0.0)
                })
                .sum::<f64>()
        })
        .collect();
    let probs = rescale_and_exponentiate(&log_scores);
    probs[class.index()]
}

/// Solves `Σ_d P(c|d)·count_{w,d}·β^{f#(d,c)} = target` for `β > 0` via a
/// bracketed Newton iteration with bisection fallback, matching the
/// source's IIS root-finder.
fn solve_beta(coeffs: &[(f64, f64)], target: f64, prior_inv_var: f64) -> f64 {
    // coeffs: (weight = P(c|d)*count_{w,d}, exponent = f#(d,c))
    let g = |beta: f64| -> f64 {
        let base: f64 = coeffs.iter().map(|&(w, f)| w * beta.powf(f)).sum();
        base - target + prior_inv_var * beta.ln()
    };
    let g_prime = |beta: f64| -> f64 {
        let base: f64 = coeffs
            .iter()
            .map(|&(w, f)| w * f * beta.powf(f - 1.0))
            .sum();
        base + prior_inv_var / beta.max(1e-12)
    };

    let mut lo = 1e-6;
    let mut hi = 1e6;
    // Expand the bracket if the root isn't between lo and hi.
    while g(lo) > 0.0 && lo > 1e-12 {
        lo /= 10.0;
    }
    while g(hi) < 0.0 && hi < 1e12 {
        hi *= 10.0;
    }

    let mut beta = 1.0;
    for _ in 0..50 {
        let gv = g(beta);
        if gv.abs() < 1e-10 {
            break;
        }
        if gv < 0.0 {
            lo = beta;
        } else {
            hi = beta;
        }
        let gp = g_prime(beta);
        let newton = if gp.abs() > 1e-12 { beta - gv / gp } else { f64::NAN };
        beta = if newton.is_finite() && newton > lo && newton < hi {
            newton
        } else {
            0.5 * (lo + hi)
        };
    }
    beta.max(1e-9)
}

fn gaussian_prior_inv_var(config: &MaxEntConfig, constraint_count: f64) -> f64 {
    match config.gaussian_prior_variance {
        None => 0.0,
        Some(sigma2) => {
            let scale = if config.variance_scales_with_count {
                constraint_count.max(1.0)
            } else {
                1.0
            };
            1.0 / (sigma2 * scale)
        }
    }
}

/// Trains a MaxEnt model by iterative scaling over `Tag::Train` documents.
pub fn train(doc_barrel: &Barrel, config: &Config) -> Result<Barrel> {
    let n_classes = doc_barrel.n_classes();
    if n_classes == 0 {
        return Err(CrossbowError::invalid_argument("no classes to train against"));
    }
    let rows: std::collections::HashMap<DocId, Row> =
        HeapRowIterator::new(&doc_barrel.index, |_| true).collect();

    // Empirical constraint per (w,c): Σ over training docs of class c of
    // that document's count for w.
    let mut empirical = SparseIndex::with_capacity(doc_barrel.vocab.len());
    let mut train_docs: Vec<(DocId, ClassId)> = Vec::new();
    for (doc_id, doc) in doc_barrel.docs.iter() {
        if doc.tag != Tag::Train {
            continue;
        }
        let Some(class) = doc.class else { continue };
        train_docs.push((doc_id, class));
        if let Some(row) = rows.get(&doc_id) {
            for e in row.entries() {
                empirical.add(e.wi, DocId(class.index() as u32), 0, e.weight);
            }
        }
    }

    let mut lambda = SparseIndex::with_capacity(doc_barrel.vocab.len());

    for _iteration in 0..config.maxent.max_iterations {
        // Active (w,c) pairs: those with nonzero empirical constraint and
        // at least `min_feature_count` occurrences.
        for wi_idx in 0..doc_barrel.vocab.len() {
            let wi = WordId(wi_idx as u32);
            for c in 0..n_classes {
                let class = ClassId(c as u32);
                let target = empirical
                    .entry(wi, DocId(c as u32))
                    .map(|e| e.weight)
                    .unwrap_or(0.0);
                if target < config.maxent.min_feature_count as f64 || target <= 0.0 {
                    continue;
                }
                let coeffs: Vec<(f64, f64)> = train_docs
                    .iter()
                    .filter_map(|&(doc_id, _)| {
                        let row = rows.get(&doc_id)?;
                        let count = row
                            .entries()
                            .iter()
                            .find(|e| e.wi == wi)
                            .map(|e| e.weight)?;
                        let p = p_c_given_d(&lambda, row, class, n_classes);
                        Some((p * count, feature_total(row)))
                    })
                    .collect();
                if coeffs.is_empty() {
                    continue;
                }
                let prior_inv_var = gaussian_prior_inv_var(&config.maxent, target);
                let beta = solve_beta(&coeffs, target, prior_inv_var);
                let current = lambda
                    .entry(wi, DocId(c as u32))
                    .map(|e| e.weight)
                    .unwrap_or(0.0);
                lambda.set(wi, DocId(c as u32), 0, current + beta.ln());
            }
        }
    }

    let mut out = Barrel {
        vocab: doc_barrel.vocab.clone(),
        index: lambda,
        docs: Default::default(),
        classnames: doc_barrel.classnames.clone(),
        method: Method::MaxEnt(config.maxent.clone()),
        kind: BarrelKind::Vpc,
    };
    for (c, name) in doc_barrel.classnames.iter().enumerate() {
        let mut cdoc = Cdoc::new(Tag::Train, name.clone());
        cdoc.class = Some(ClassId(c as u32));
        out.docs.push(cdoc);
    }
    Ok(out)
}

/// Scores `row` against a trained MaxEnt barrel: `P(c|d) = exp(Σ λ·count)
/// / Z(d)`.
pub fn score_row(vpc: &Barrel, row: &Row) -> Vec<f64> {
    let n_classes = vpc.n_classes();
    let log_scores: Vec<f64> = (0..n_classes)
        .map(|c| {
            row.entries()
                .iter()
                .map(|e| {
                    vpc.index
                        .entry(e.wi, DocId(c as u32))
                        .map(|en| en.weight * e.weight)
                        .unwrap_or(0.0)
                })
                .sum::<f64>()
        })
        .collect();
    rescale_and_exponentiate(&log_scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::row::WordEntry;
    use crate::vocab::{VocabMode, Vocabulary};

    fn toy_barrel() -> Barrel {
        let mut vocab = Vocabulary::new(VocabMode::Open);
        let w0 = vocab.add("cat").unwrap();
        let w1 = vocab.add("dog").unwrap();
        vocab.freeze();
        let mut barrel = Barrel::new_document_barrel(
            vocab,
            Method::MaxEnt(MaxEntConfig::default()),
        );
        barrel.classnames = vec!["pets".into(), "other".into()];

        let mut d0 = Cdoc::new(Tag::Train, "d0");
        d0.class = Some(ClassId(0));
        let id0 = barrel.docs.push(d0);
        barrel.index.add(w0, id0, 5, 5.0);

        let mut d1 = Cdoc::new(Tag::Train, "d1");
        d1.class = Some(ClassId(1));
        let id1 = barrel.docs.push(d1);
        barrel.index.add(w1, id1, 5, 5.0);

        barrel
    }

    #[test]
    fn training_fits_empirical_constraints_in_direction() {
        let doc_barrel = toy_barrel();
        let config = Config::default();
        let model = train(&doc_barrel, &config).unwrap();
        let row = Row::from_unsorted(vec![WordEntry { wi: WordId(0), count: 5, weight: 5.0 }]);
        let scores = score_row(&model, &row);
        assert!(scores[0] > scores[1]);
    }

    #[test]
    fn scores_sum_to_one() {
        let doc_barrel = toy_barrel();
        let model = train(&doc_barrel, &Config::default()).unwrap();
        let row = Row::from_unsorted(vec![WordEntry { wi: WordId(1), count: 5, weight: 5.0 }]);
        let scores = score_row(&model, &row);
        let sum: f64 = scores.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
    }
}
