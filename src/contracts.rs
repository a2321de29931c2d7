//! §8 invariant checks.
//!
//! Each function here states one property from the testable-properties
//! list and is meant to be wrapped in a `debug_assert!` at the call sites
//! that can cheaply afford it (debug builds only — these walk whole
//! columns/barrels and are too expensive for a release hot path). Every
//! check also has a standalone unit test below so the property is verified
//! even when debug assertions are compiled out.

use crate::config::Kernel;
use crate::document::DocId;
use crate::em::EmIteration;
use crate::heap_iter::HeapRowIterator;
use crate::row::Row;
use crate::sparse::{Column, SparseIndex};
use crate::svm::{self, BinaryModel};
use crate::vocab::WordId;

/// Column entries strictly increasing by document id.
pub fn column_is_sorted(col: &Column) -> bool {
    col.entries().windows(2).all(|w| w[0].doc < w[1].doc)
}

/// `Σ_c prior(c) = 1 ± 1e-6`, unless every prior is zero (no training
/// data at all, which is reported separately via a warning at train time).
pub fn vpc_priors_normalized(priors: &[f64], tolerance: f64) -> bool {
    let total: f64 = priors.iter().sum();
    if priors.iter().all(|&p| p == 0.0) {
        return true;
    }
    (total - 1.0).abs() <= tolerance
}

/// `Σ_w P(w|c) = 1 ± tolerance` for one class's word-probability row.
pub fn word_probs_normalized(probs: &[f64], tolerance: f64) -> bool {
    let total: f64 = probs.iter().sum();
    (total - 1.0).abs() <= tolerance
}

/// EM's per-iteration training log-likelihood is monotone non-decreasing,
/// except when deterministic annealing or `acceleration > 1` is active —
/// callers pass `allow_regression` for those configurations.
pub fn em_log_likelihood_monotone(history: &[EmIteration], allow_regression: bool) -> bool {
    if allow_regression {
        return true;
    }
    history
        .windows(2)
        .all(|w| w[1].log_likelihood + 1e-6 >= w[0].log_likelihood)
}

/// The heap iterator visits every document whose row is non-empty exactly
/// once, in ascending order — checked by comparing against the expected
/// doc-id set derived directly from the index's non-hidden columns.
pub fn heap_iterator_visits_each_once(index: &SparseIndex) -> bool {
    let mut expected: Vec<DocId> = index
        .non_hidden_columns()
        .flat_map(|(_, col)| col.entries().iter().map(|e| e.doc))
        .collect();
    expected.sort();
    expected.dedup();

    let visited: Vec<DocId> = HeapRowIterator::new(index, |_| true).map(|(d, _)| d).collect();
    visited == expected
}

/// `hide(wi); hide(wi)` is equivalent to one `hide`, and `hide(wi);
/// unhide(wi)` restores full visibility including per-entry weights.
pub fn hide_unhide_idempotent(index: &mut SparseIndex, wi: WordId) -> bool {
    let before: Option<Vec<_>> = index.column(wi).map(|c| c.entries().to_vec());
    index.hide(wi);
    index.hide(wi);
    let hidden_twice_is_hidden_once = index.column(wi).is_none() && index.is_hidden(wi);
    index.unhide(wi);
    let restored: Option<Vec<_>> = index.column(wi).map(|c| c.entries().to_vec());
    hidden_twice_is_hidden_once && restored == before
}

/// SMO's KKT stopping conditions: every example satisfies
/// `y_i f(x_i) >= 1 - tol` for `alpha_i = 0`, `y_i f(x_i) <= 1 + tol` for
/// `alpha_i = C`, and `|y_i f(x_i) - 1| <= tol` for `0 < alpha_i < C`; and
/// `Σ alpha_i y_i = 0 ± alpha_tol`.
pub fn smo_kkt_satisfied(
    model: &BinaryModel,
    examples: &[(Row, f64)],
    alphas: &[f64],
    cost: impl Fn(usize) -> f64,
    tol: f64,
    alpha_tol: f64,
) -> bool {
    let mut sum_alpha_y = 0.0;
    for (i, (row, y)) in examples.iter().enumerate() {
        let f = model.decision_value(row);
        let margin = y * f;
        let c = cost(i);
        let a = alphas[i];
        sum_alpha_y += a * y;
        let ok = if a <= alpha_tol {
            margin >= 1.0 - tol
        } else if a >= c - alpha_tol {
            margin <= 1.0 + tol
        } else {
            (margin - 1.0).abs() <= tol
        };
        if !ok {
            return false;
        }
    }
    sum_alpha_y.abs() <= alpha_tol.max(1e-6)
}

/// For a linear-kernel SVM, scoring via the folded `W, b` form and scoring
/// via the dual expansion over support vectors must agree to `1e-4`.
pub fn linear_kernel_equivalence(model: &BinaryModel, rows: &[Row], tol: f64) -> bool {
    if model.kernel != Kernel::Linear {
        return true;
    }
    let Some(linear) = svm::fold_linear(model) else { return false };
    rows.iter()
        .all(|row| (linear.decision_value(row) - model.decision_value(row)).abs() <= tol)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::DocId as Doc;
    use crate::row::WordEntry;
    use crate::svm::smo_train;

    #[test]
    fn sorted_column_passes_and_unsorted_would_fail() {
        let mut s = SparseIndex::default();
        s.add(WordId(0), Doc(5), 1, 1.0);
        s.add(WordId(0), Doc(1), 1, 1.0);
        let col = s.column(WordId(0)).unwrap();
        assert!(column_is_sorted(col));
    }

    #[test]
    fn priors_within_tolerance() {
        assert!(vpc_priors_normalized(&[0.3, 0.7], 1e-6));
        assert!(!vpc_priors_normalized(&[0.3, 0.3], 1e-6));
        assert!(vpc_priors_normalized(&[0.0, 0.0], 1e-6));
    }

    #[test]
    fn word_probs_within_tolerance() {
        assert!(word_probs_normalized(&[0.25, 0.25, 0.5], 1e-2));
        assert!(!word_probs_normalized(&[0.1, 0.1], 1e-2));
    }

    #[test]
    fn monotone_history_passes_regression_fails_without_exception() {
        let rising = vec![
            EmIteration { log_likelihood: -10.0, temperature: 1.0 },
            EmIteration { log_likelihood: -5.0, temperature: 1.0 },
        ];
        assert!(em_log_likelihood_monotone(&rising, false));
        let falling = vec![
            EmIteration { log_likelihood: -5.0, temperature: 1.0 },
            EmIteration { log_likelihood: -10.0, temperature: 1.0 },
        ];
        assert!(!em_log_likelihood_monotone(&falling, false));
        assert!(em_log_likelihood_monotone(&falling, true));
    }

    #[test]
    fn heap_iterator_matches_expected_doc_set() {
        let mut s = SparseIndex::default();
        s.add(WordId(0), Doc(0), 1, 1.0);
        s.add(WordId(1), Doc(2), 1, 1.0);
        s.add(WordId(0), Doc(1), 1, 1.0);
        assert!(heap_iterator_visits_each_once(&s));
    }

    #[test]
    fn hide_unhide_is_idempotent_and_restores_weights() {
        let mut s = SparseIndex::default();
        s.add(WordId(0), Doc(0), 3, 3.0);
        assert!(hide_unhide_idempotent(&mut s, WordId(0)));
    }

    fn row(pairs: &[(u32, f64)]) -> Row {
        Row::from_unsorted(
            pairs
                .iter()
                .map(|&(w, v)| WordEntry { wi: WordId(w), count: v as u32, weight: v })
                .collect(),
        )
    }

    #[test]
    fn linear_svm_satisfies_kkt_and_folded_form_matches_dual() {
        let examples = vec![
            (row(&[(0, 2.0)]), 1.0),
            (row(&[(0, 3.0)]), 1.0),
            (row(&[(1, 2.0)]), -1.0),
            (row(&[(1, 3.0)]), -1.0),
        ];
        let model = smo_train(&examples, |_| 1.0, Kernel::Linear, 1e-3);
        let rows: Vec<_> = examples.iter().map(|(r, _)| r.clone()).collect();
        assert!(linear_kernel_equivalence(&model, &rows, 1e-4));

        // `support` only lists examples with nonzero alpha; reconstruct the
        // full per-example alpha vector by matching entries back against it.
        let alphas: Vec<f64> = examples
            .iter()
            .map(|(row, y)| {
                model
                    .support
                    .iter()
                    .find(|(sv_row, sv_y, _)| sv_row.entries() == row.entries() && sv_y == y)
                    .map(|(_, _, a)| *a)
                    .unwrap_or(0.0)
            })
            .collect();
        assert!(smo_kkt_satisfied(&model, &examples, &alphas, |_| 1.0, 1e-2, 1e-6));
    }
}
