//! Row view R ("word vector"): for one document, the sorted list of
//! (term-id, count, weight) plus a scalar normalizer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::vocab::WordId;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WordEntry {
    pub wi: WordId,
    pub count: u32,
    pub weight: f64,
}

/// A document's word vector: `wi`-sorted entries plus a normalizer set by
/// the active method's `wv_normalize_weights`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Row {
    entries: Vec<WordEntry>,
    pub normalizer: f64,
}

impl Row {
    pub fn from_unsorted(mut entries: Vec<WordEntry>) -> Self {
        entries.sort_by_key(|e| e.wi);
        Row {
            entries,
            normalizer: 1.0,
        }
    }

    /// Builds a row by tokenizing already-counted (term, count) pairs —
    /// the external-lexer boundary of the data flow in the system
    /// overview: lexing itself is out of scope, this just accepts its
    /// output.
    pub fn from_counts(counts: &HashMap<WordId, u32>) -> Self {
        let entries = counts
            .iter()
            .map(|(&wi, &count)| WordEntry {
                wi,
                count,
                weight: count as f64,
            })
            .collect();
        Row::from_unsorted(entries)
    }

    pub fn entries(&self) -> &[WordEntry] {
        &self.entries
    }

    pub fn entries_mut(&mut self) -> &mut [WordEntry] {
        &mut self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn word_count(&self) -> u32 {
        self.entries.iter().map(|e| e.count).sum()
    }

    pub fn euclidean_length(&self) -> f64 {
        self.entries.iter().map(|e| e.weight * e.weight).sum::<f64>().sqrt()
    }

    pub fn weight_sum(&self) -> f64 {
        self.entries.iter().map(|e| e.weight).sum()
    }

    pub fn normalize_euclidean(&mut self) {
        let len = self.euclidean_length();
        self.normalizer = if len > 0.0 { 1.0 / len } else { 1.0 };
    }

    pub fn normalize_sum_to_one(&mut self) {
        let sum = self.weight_sum();
        self.normalizer = if sum > 0.0 { 1.0 / sum } else { 1.0 };
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_unsorted_sorts_by_wi() {
        let row = Row::from_unsorted(vec![
            WordEntry { wi: WordId(3), count: 1, weight: 1.0 },
            WordEntry { wi: WordId(1), count: 2, weight: 2.0 },
        ]);
        let ids: Vec<_> = row.entries().iter().map(|e| e.wi.0).collect();
        assert_eq!(ids, vec![1, 3]);
    }

    #[test]
    fn euclidean_normalizer_scales_to_unit_length() {
        let mut row = Row::from_unsorted(vec![
            WordEntry { wi: WordId(0), count: 3, weight: 3.0 },
            WordEntry { wi: WordId(1), count: 4, weight: 4.0 },
        ]);
        row.normalize_euclidean();
        assert!((row.normalizer - 0.2).abs() < 1e-9);
    }
}
