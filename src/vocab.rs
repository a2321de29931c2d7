//! Bidirectional mapping between term strings and dense term-ids (`wi`).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::errors::{CrossbowError, Result};

/// A dense, zero-based term id. Always `< Vocabulary::len()` for ids
/// obtained through the vocabulary's own API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct WordId(pub u32);

impl WordId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VocabMode {
    /// Unknown strings are assigned a fresh id.
    Open,
    /// Unknown strings are rejected.
    Closed,
    /// Unknown strings fold onto a reserved `<unknown>` id.
    ClosedWithUnknown,
}

const UNKNOWN_TERM: &str = "<unknown>";

/// Term string <-> `WordId` bijection.
///
/// Append-only while `mode == Open`; frozen (mode flips to `Closed`) before
/// training. `remove_occurrences_less_than` is the one operation that
/// rebuilds the mapping and invalidates any `SparseIndex` built against the
/// old ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vocabulary {
    terms: Vec<String>,
    ids: HashMap<String, WordId>,
    mode: VocabMode,
    unknown_id: Option<WordId>,
}

impl Default for Vocabulary {
    fn default() -> Self {
        Self::new(VocabMode::Open)
    }
}

impl Vocabulary {
    pub fn new(mode: VocabMode) -> Self {
        let mut v = Vocabulary {
            terms: Vec::new(),
            ids: HashMap::new(),
            mode,
            unknown_id: None,
        };
        if mode == VocabMode::ClosedWithUnknown {
            let id = v.force_add(UNKNOWN_TERM);
            v.unknown_id = Some(id);
        }
        v
    }

    pub fn len(&self) -> usize {
        self.terms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn mode(&self) -> VocabMode {
        self.mode
    }

    pub fn freeze(&mut self) {
        self.mode = VocabMode::Closed;
    }

    fn force_add(&mut self, term: &str) -> WordId {
        if let Some(&id) = self.ids.get(term) {
            return id;
        }
        let id = WordId(self.terms.len() as u32);
        self.terms.push(term.to_string());
        self.ids.insert(term.to_string(), id);
        id
    }

    /// `add(str)`: assigns the next free id if `str` is new and the
    /// vocabulary is open.
    pub fn add(&mut self, term: &str) -> Result<WordId> {
        if let Some(&id) = self.ids.get(term) {
            return Ok(id);
        }
        match self.mode {
            VocabMode::Open => Ok(self.force_add(term)),
            VocabMode::Closed => Err(CrossbowError::vocabulary(format!(
                "no such term: {term:?}"
            ))),
            VocabMode::ClosedWithUnknown => Ok(self.unknown_id.expect("unknown id always set")),
        }
    }

    /// `lookup_no_add`: returns the id or `None`, never mutating state.
    pub fn lookup_no_add(&self, term: &str) -> Option<WordId> {
        self.ids.get(term).copied()
    }

    /// `intern`: alias for `add`, honoring the vocabulary's mode. Kept as a
    /// distinct name because callers reach for "intern" when they mean "I
    /// don't care whether this is new", matching the source's naming.
    pub fn intern(&mut self, term: &str) -> Result<WordId> {
        self.add(term)
    }

    pub fn term(&self, id: WordId) -> Option<&str> {
        self.terms.get(id.index()).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (WordId, &str)> {
        self.terms
            .iter()
            .enumerate()
            .map(|(i, s)| (WordId(i as u32), s.as_str()))
    }

    /// Reconstructs a vocabulary from an exact term list and mode, as read
    /// back from an archive. Bypasses `add`'s fold-unknown behavior, which
    /// would be wrong here: every term in `terms` is already known, not a
    /// fresh lookup miss.
    pub fn restore(mode: VocabMode, terms: Vec<String>) -> Self {
        let mut ids = HashMap::with_capacity(terms.len());
        for (i, term) in terms.iter().enumerate() {
            ids.insert(term.clone(), WordId(i as u32));
        }
        let unknown_id = (mode == VocabMode::ClosedWithUnknown)
            .then(|| ids.get(UNKNOWN_TERM).copied())
            .flatten();
        Vocabulary {
            terms,
            ids,
            mode,
            unknown_id,
        }
    }

    /// Rebuilds the mapping keeping only terms whose occurrence count (as
    /// given by `counts`, indexed by the current id) is `> k`, remapping
    /// surviving terms to a dense `[0, n)` range. Returns the old->new id
    /// map so callers can migrate a `SparseIndex` in the same pass; ids not
    /// present in the map were dropped.
    pub fn remove_occurrences_less_than(
        &mut self,
        k: u64,
        counts: &[u64],
    ) -> HashMap<WordId, WordId> {
        let mut remap = HashMap::new();
        let mut new_terms = Vec::new();
        for (i, term) in self.terms.iter().enumerate() {
            let old_id = WordId(i as u32);
            let keep = counts.get(i).copied().unwrap_or(0) > k
                || self.unknown_id == Some(old_id);
            if keep {
                let new_id = WordId(new_terms.len() as u32);
                remap.insert(old_id, new_id);
                new_terms.push(term.clone());
            }
        }
        self.ids.clear();
        for (i, term) in new_terms.iter().enumerate() {
            self.ids.insert(term.clone(), WordId(i as u32));
        }
        self.unknown_id = self.unknown_id.and_then(|old| remap.get(&old).copied());
        self.terms = new_terms;
        remap
    }
}
