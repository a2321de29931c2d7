//! Sparse dual index S ("wi2dvf"): the word-id -> document-vector column
//! store.

use serde::{Deserialize, Serialize};

use crate::document::DocId;
use crate::vocab::WordId;

/// One (document-id, count, weight) entry within a column.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub doc: DocId,
    pub count: u32,
    pub weight: f64,
}

/// A single term's column: entries strictly increasing by `doc`, plus a
/// term-level IDF scalar.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Column {
    entries: Vec<Entry>,
    pub idf: f64,
}

impl Column {
    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entry(&self, doc: DocId) -> Option<&Entry> {
        self.entries
            .binary_search_by_key(&doc, |e| e.doc)
            .ok()
            .map(|i| &self.entries[i])
    }

    /// Inserts maintaining `doc`-sorted order; a repeated `doc` sums counts
    /// and adds weights rather than duplicating the entry.
    fn add(&mut self, doc: DocId, count: u32, weight: f64) {
        match self.entries.binary_search_by_key(&doc, |e| e.doc) {
            Ok(i) => {
                self.entries[i].count += count;
                self.entries[i].weight += weight;
            }
            Err(i) => self.entries.insert(
                i,
                Entry {
                    doc,
                    count,
                    weight,
                },
            ),
        }
    }

    fn set(&mut self, doc: DocId, count: u32, weight: f64) {
        match self.entries.binary_search_by_key(&doc, |e| e.doc) {
            Ok(i) => {
                self.entries[i].count = count;
                self.entries[i].weight = weight;
            }
            Err(i) => self.entries.insert(i, Entry { doc, count, weight }),
        }
    }

    pub fn total_count(&self) -> u64 {
        self.entries.iter().map(|e| e.count as u64).sum()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct Descriptor {
    column: Column,
    hidden: bool,
    present: bool,
}

/// The column store, one `Descriptor` slot per `WordId`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SparseIndex {
    columns: Vec<Descriptor>,
}

impl SparseIndex {
    pub fn with_capacity(vocab_size: usize) -> Self {
        SparseIndex {
            columns: (0..vocab_size).map(|_| Descriptor::default()).collect(),
        }
    }

    fn ensure_capacity(&mut self, wi: WordId) {
        if wi.index() >= self.columns.len() {
            self.columns.resize_with(wi.index() + 1, Descriptor::default);
        }
    }

    pub fn add(&mut self, wi: WordId, doc: DocId, count: u32, weight: f64) {
        self.ensure_capacity(wi);
        let d = &mut self.columns[wi.index()];
        d.present = true;
        d.column.add(doc, count, weight);
    }

    pub fn set(&mut self, wi: WordId, doc: DocId, count: u32, weight: f64) {
        self.ensure_capacity(wi);
        let d = &mut self.columns[wi.index()];
        d.present = true;
        d.column.set(doc, count, weight);
    }

    /// Returns the column, or `None` if absent or hidden.
    pub fn column(&self, wi: WordId) -> Option<&Column> {
        let d = self.columns.get(wi.index())?;
        if !d.present || d.hidden {
            return None;
        }
        Some(&d.column)
    }

    pub fn column_including_hidden(&self, wi: WordId) -> Option<&Column> {
        let d = self.columns.get(wi.index())?;
        d.present.then_some(&d.column)
    }

    /// Mutable access to a present column, for recomputing its stored IDF
    /// without disturbing entries. Returns `None` if the column is absent
    /// (but, unlike `column`, does not hide-filter — IDF recompute should
    /// still touch hidden columns so unhiding later sees a fresh value).
    pub fn column_mut(&mut self, wi: WordId) -> Option<&mut Column> {
        let d = self.columns.get_mut(wi.index())?;
        d.present.then_some(&mut d.column)
    }

    pub fn entry(&self, wi: WordId, doc: DocId) -> Option<&Entry> {
        self.column(wi)?.entry(doc)
    }

    pub fn hide(&mut self, wi: WordId) {
        if let Some(d) = self.columns.get_mut(wi.index()) {
            d.hidden = true;
        }
    }

    pub fn unhide(&mut self, wi: WordId) {
        if let Some(d) = self.columns.get_mut(wi.index()) {
            d.hidden = false;
        }
    }

    pub fn is_hidden(&self, wi: WordId) -> bool {
        self.columns.get(wi.index()).map(|d| d.hidden).unwrap_or(false)
    }

    pub fn hide_all(&mut self) {
        for d in &mut self.columns {
            d.hidden = true;
        }
    }

    pub fn unhide_all(&mut self) {
        for d in &mut self.columns {
            d.hidden = false;
        }
    }

    pub fn hide_words_by_doc_count(&mut self, n: usize) {
        for d in &mut self.columns {
            if d.present && d.column.len() <= n {
                d.hidden = true;
            }
        }
    }

    pub fn hide_words_by_occur_count(&mut self, n: u64) {
        for d in &mut self.columns {
            if d.present && d.column.total_count() <= n {
                d.hidden = true;
            }
        }
    }

    pub fn hide_by_predicate(&mut self, terms: &crate::vocab::Vocabulary, mut keep: impl FnMut(&str) -> bool) {
        for (wi, term) in terms.iter() {
            if let Some(d) = self.columns.get_mut(wi.index()) {
                if d.present && !keep(term) {
                    d.hidden = true;
                }
            }
        }
    }

    pub fn hide_by_prefix(&mut self, vocab: &crate::vocab::Vocabulary, prefix: &str) {
        self.hide_by_predicate(vocab, |t| !t.starts_with(prefix));
    }

    pub fn hide_without_prefix(&mut self, vocab: &crate::vocab::Vocabulary, prefix: &str) {
        self.hide_by_predicate(vocab, |t| t.starts_with(prefix));
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn non_hidden_columns(&self) -> impl Iterator<Item = (WordId, &Column)> {
        self.columns.iter().enumerate().filter_map(|(i, d)| {
            (d.present && !d.hidden).then(|| (WordId(i as u32), &d.column))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_maintains_sorted_order_and_sums_repeats() {
        let mut s = SparseIndex::default();
        let wi = WordId(0);
        s.add(wi, DocId(5), 1, 1.0);
        s.add(wi, DocId(1), 2, 2.0);
        s.add(wi, DocId(5), 3, 3.0);
        let col = s.column(wi).unwrap();
        let docs: Vec<_> = col.entries().iter().map(|e| e.doc.0).collect();
        assert_eq!(docs, vec![1, 5]);
        let e5 = col.entry(DocId(5)).unwrap();
        assert_eq!(e5.count, 4);
        assert_eq!(e5.weight, 4.0);
    }

    #[test]
    fn hide_hides_without_freeing() {
        let mut s = SparseIndex::default();
        let wi = WordId(0);
        s.add(wi, DocId(0), 1, 1.0);
        s.hide(wi);
        assert!(s.column(wi).is_none());
        assert!(s.column_including_hidden(wi).is_some());
        s.unhide(wi);
        assert!(s.column(wi).is_some());
    }

    #[test]
    fn hide_idempotent() {
        let mut s = SparseIndex::default();
        let wi = WordId(0);
        s.add(wi, DocId(0), 1, 1.0);
        s.hide(wi);
        s.hide(wi);
        assert!(s.is_hidden(wi));
        s.unhide(wi);
        assert!(!s.is_hidden(wi));
        let col = s.column(wi).unwrap();
        assert_eq!(col.entry(DocId(0)).unwrap().weight, 1.0);
    }

    #[test]
    fn hide_out_of_range_is_noop() {
        let mut s = SparseIndex::with_capacity(1);
        s.hide(WordId(50));
    }
}
