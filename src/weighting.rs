//! Term weighting schemes for rows and barrels (§4.4), orthogonal to the
//! learner that consumes them.

use crate::barrel::Barrel;
use crate::config::{Config, IdfVariant, Normalization, Weighting};
use crate::document::{Cdoc, ClassId, DocId, DocumentRegistry, Tag};
use crate::heap_iter::HeapRowIterator;
use crate::row::Row;
use crate::sparse::SparseIndex;
use crate::vocab::WordId;

/// Terms with document-frequency below this are given weight zero when an
/// IDF variant is in play.
const MIN_DOC_FREQ: usize = 3;

pub fn idf(variant: IdfVariant, n_docs: usize, doc_freq: usize) -> f64 {
    if doc_freq < MIN_DOC_FREQ || doc_freq == 0 {
        return 0.0;
    }
    let n = n_docs as f64;
    let df = doc_freq as f64;
    match variant {
        IdfVariant::Log => (n / df).ln(),
        IdfVariant::Sqrt => (n / df).sqrt(),
        IdfVariant::Ratio => n / df,
    }
}

/// Recomputes `idf` on every column of `index` using document-occurrence
/// frequency (the number of documents containing the term).
pub fn compute_idf(index: &mut SparseIndex, n_docs: usize, variant: IdfVariant) {
    let wis: Vec<WordId> = (0..index.len() as u32).map(WordId).collect();
    for wi in wis {
        let df = index
            .column_including_hidden(wi)
            .map(|c| c.len())
            .unwrap_or(0);
        let value = idf(variant, n_docs, df);
        // Safe: we only read the df above and now mutate through a fresh
        // lookup, matching `column_including_hidden`'s read-only contract.
        if let Some(col) = index.column_mut(wi) {
            col.idf = value;
        }
    }
}

/// Assigns a row's weights in place according to `scheme`, given the raw
/// per-term IDF the caller looked up (if any).
pub fn set_row_weights(row: &mut Row, scheme: Weighting, idf_of: impl Fn(WordId) -> f64) {
    for e in row.entries_mut() {
        e.weight = match scheme {
            Weighting::Count => e.count as f64,
            Weighting::CountIdf(_) => e.count as f64 * idf_of(e.wi),
            Weighting::LogCountIdf(_) => ((e.count as f64) + 1.0).ln() * idf_of(e.wi),
            Weighting::InfoGain => e.count as f64 * idf_of(e.wi),
        };
    }
}

pub fn normalize_row(row: &mut Row, scheme: Normalization) {
    match scheme {
        Normalization::Euclidean => row.normalize_euclidean(),
        Normalization::SumToOne => row.normalize_sum_to_one(),
        Normalization::None => row.normalizer = 1.0,
    }
}

/// Rescales a document-then-word row so the weights sum to
/// `target_length`, the event-model normalization of §4.4.
pub fn rescale_to_target_length(row: &mut Row, target_length: f64) {
    let sum = row.weight_sum();
    if sum > 0.0 {
        let scale = target_length / sum;
        for e in row.entries_mut() {
            e.weight *= scale;
        }
    }
}

/// Applies `config.weighting`'s scheme, then `config.normalization`, then
/// (when `config.target_document_length` is positive) the target-length
/// rescale to a single row, given the per-term scale (IDF or information
/// gain, depending on the scheme) looked up via `term_scale_of`.
pub fn weight_row(row: &mut Row, config: &Config, term_scale_of: impl Fn(WordId) -> f64) {
    set_row_weights(row, config.weighting, term_scale_of);
    normalize_row(row, config.normalization);
    if config.target_document_length > 0.0 {
        rescale_to_target_length(row, config.target_document_length);
    }
}

/// Looks up the per-term scale factor `apply_weighting` stored in each
/// column's `idf` slot (IDF for the idf variants, information gain for
/// `InfoGain`), for weighting a row built after training — e.g. a query —
/// consistently with the rows the VPC was trained on.
pub fn term_scale_lookup(index: &SparseIndex) -> impl Fn(WordId) -> f64 + '_ {
    move |wi| index.column_including_hidden(wi).map(|c| c.idf).unwrap_or(0.0)
}

/// An owned copy of every term's scale factor, for callers (like the query
/// server) that can't hold a borrow of `index` across the closure's
/// lifetime because the index they're weighting against is moved away.
pub fn term_scale_snapshot(index: &SparseIndex, n_terms: usize) -> Vec<f64> {
    (0..n_terms as u32)
        .map(|i| index.column_including_hidden(WordId(i)).map(|c| c.idf).unwrap_or(0.0))
        .collect()
}

/// Computes the per-term scale vector `config.weighting` needs: document
/// IDF for the idf variants (also written into each column's `idf` field
/// as a side effect, via `compute_idf`), or per-term information gain
/// against the `Tag::Train` labels for `InfoGain`. `Weighting::Count`
/// needs no per-term scale and returns a zero vector (never read by
/// `set_row_weights`'s `Count` arm).
fn term_scale_vector(barrel: &mut Barrel, config: &Config) -> Vec<f64> {
    let n_docs = barrel.docs.len();
    let n_terms = barrel.vocab.len();
    match config.weighting {
        Weighting::Count => vec![0.0; n_terms],
        Weighting::CountIdf(variant) | Weighting::LogCountIdf(variant) => {
            compute_idf(&mut barrel.index, n_docs, variant);
            (0..n_terms as u32)
                .map(|i| {
                    barrel
                        .index
                        .column_including_hidden(WordId(i))
                        .map(|c| c.idf)
                        .unwrap_or(0.0)
                })
                .collect()
        }
        Weighting::InfoGain => {
            let n_classes = barrel.classnames.len().max(1);
            let class_counts = class_doc_counts(&barrel.docs, n_classes);
            let index = &barrel.index;
            let docs = &barrel.docs;
            infogain(
                &class_counts,
                |wi| term_present_counts(index, docs, n_classes, wi),
                n_terms,
                n_docs as u64,
            )
        }
    }
}

/// Per-class count of `Tag::Train` documents containing `wi`, the
/// presence-count input `infogain` needs for one term.
fn term_present_counts(
    index: &SparseIndex,
    docs: &DocumentRegistry,
    n_classes: usize,
    wi: WordId,
) -> Vec<u64> {
    let mut counts = vec![0u64; n_classes];
    if let Some(col) = index.column_including_hidden(wi) {
        for e in col.entries() {
            if let Some(doc) = docs.get(e.doc) {
                if doc.tag == Tag::Train {
                    if let Some(ClassId(c)) = doc.class {
                        counts[c as usize] += 1;
                    }
                }
            }
        }
    }
    counts
}

/// Reweights every document's row in `barrel.index` in place, per
/// `config.weighting`/`config.normalization`/`config.target_document_length`.
/// Must run once, after the vocabulary is frozen and any vocab pruning is
/// done, and before training: downstream statistics accumulation
/// (`naive_bayes::accumulate_statistics` and friends) reads `Entry::weight`
/// directly rather than `Entry::count`. The per-term scale is left behind
/// in each column's `idf` field so it survives an archive round-trip and a
/// later query row can be weighted identically via `term_scale_lookup`.
pub fn apply_weighting(barrel: &mut Barrel, config: &Config) {
    let scale = term_scale_vector(barrel, config);
    for (i, &s) in scale.iter().enumerate() {
        if let Some(col) = barrel.index.column_mut(WordId(i as u32)) {
            col.idf = s;
        }
    }

    let rows: Vec<(DocId, Row)> = HeapRowIterator::new(&barrel.index, |_| true).collect();
    for (doc_id, mut row) in rows {
        weight_row(&mut row, config, |wi| {
            scale.get(wi.index()).copied().unwrap_or(0.0)
        });
        for e in row.entries() {
            barrel.index.set(e.wi, doc_id, e.count, e.weight * row.normalizer);
        }
    }
}

/// Information gain between the class label and word presence/absence,
/// for every term, given per-class document counts. `class_doc_counts[c]`
/// is the number of training documents of class `c`; `term_class_doc_counts`
/// maps `wi -> per-class count of documents containing wi`.
pub fn infogain(
    class_doc_counts: &[u64],
    term_present_counts: impl Fn(WordId) -> Vec<u64>,
    n_terms: usize,
    n_docs: u64,
) -> Vec<f64> {
    let total = n_docs as f64;
    let h_class = entropy(class_doc_counts, total);
    (0..n_terms)
        .map(|i| {
            let present = term_present_counts(WordId(i as u32));
            let n_present: u64 = present.iter().sum();
            let n_absent = n_docs.saturating_sub(n_present);
            let h_present = entropy(&present, n_present as f64);
            let absent_counts: Vec<u64> = class_doc_counts
                .iter()
                .zip(present.iter())
                .map(|(&c, &p)| c.saturating_sub(p))
                .collect();
            let h_absent = entropy(&absent_counts, n_absent as f64);
            let p_present = n_present as f64 / total.max(1.0);
            let p_absent = n_absent as f64 / total.max(1.0);
            (h_class - p_present * h_present - p_absent * h_absent).max(0.0)
        })
        .collect()
}

fn entropy(counts: &[u64], total: f64) -> f64 {
    if total <= 0.0 {
        return 0.0;
    }
    counts
        .iter()
        .map(|&c| {
            if c == 0 {
                0.0
            } else {
                let p = c as f64 / total;
                -p * p.log2()
            }
        })
        .sum()
}

/// Counts, per class, the number of documents in `docs` tagged `train`
/// under that class — the denominator infogain and priors both need.
pub fn class_doc_counts(docs: &DocumentRegistry, n_classes: usize) -> Vec<u64> {
    let mut counts = vec![0u64; n_classes];
    for (_, doc) in docs.iter() {
        if doc.tag == Tag::Train {
            if let Some(ClassId(c)) = doc.class {
                counts[c as usize] += 1;
            }
        }
    }
    counts
}

pub fn cdoc_class(doc: &Cdoc) -> Option<ClassId> {
    doc.class
}
