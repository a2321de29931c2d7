//! Command-line surface (§6): the essential subset of the flag catalog
//! needed to exercise indexing, training, querying, testing, and the
//! query server. Lexing/stemming/stoplists and file-format-specific
//! readers (HDB, mbox, SVMlight-style matrices) are out of scope (§1); the
//! two ingestion flags that would normally drive them accept a minimal
//! whitespace-tokenized stand-in instead, documented inline.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum MethodArg {
    Naivebayes,
    Em,
    Hem,
    Maxent,
    Svm,
    Active,
}

#[derive(Debug, Parser)]
#[command(name = "crossbow", about = "Sparse-matrix text classification toolkit")]
pub struct Cli {
    /// Directory holding (or to hold) the archived vocabulary/barrels.
    #[arg(short = 'd', long = "data-dir")]
    pub data_dir: PathBuf,

    /// Index one or more directories of one-class-per-subdirectory
    /// documents (the classic layout: `DIR/<classname>/<file>`).
    #[arg(long = "index", num_args = 1..)]
    pub index: Vec<PathBuf>,

    /// Index a simple matrix file: one document per line,
    /// `classname<TAB>wi:count wi:count ...`, `wi` into the existing
    /// vocabulary. `FORMAT` is accepted for source compatibility but only
    /// one format (`sparse`) is implemented.
    #[arg(long = "index-matrix", value_name = "FORMAT=FILE")]
    pub index_matrix: Option<String>,

    /// Index a simple line file: one document per line,
    /// `classname<TAB>already-tokenized word list`.
    #[arg(long = "index-lines")]
    pub index_lines: Option<PathBuf>,

    /// Train and/or query using this method.
    #[arg(long = "method", value_enum)]
    pub method: Option<MethodArg>,

    /// Score a query document (file, or stdin if omitted).
    #[arg(long = "query")]
    pub query: Option<Option<PathBuf>>,

    /// Evaluate accuracy on `Tag::Test` documents already in the barrel.
    #[arg(long = "test")]
    pub test: bool,

    /// Index `DIR` as class-per-subdirectory `Tag::Test` documents, then
    /// evaluate.
    #[arg(long = "test-files")]
    pub test_files: Option<PathBuf>,

    /// Run the query server on `PORT`, one connection at a time.
    #[arg(long = "query-server")]
    pub query_server: Option<u16>,

    /// Run the query server on `PORT`, one OS thread per connection.
    #[arg(long = "forking-query-server")]
    pub forking_query_server: Option<u16>,

    /// Restrict the vocabulary to exactly the terms listed in this file
    /// (one per line) before training.
    #[arg(long = "use-vocab-in-file")]
    pub use_vocab_in_file: Option<PathBuf>,

    /// Hide (but don't discard) the terms listed in this file.
    #[arg(long = "hide-vocab-in-file")]
    pub hide_vocab_in_file: Option<PathBuf>,

    /// Keep only the top-N terms by information gain against the training
    /// labels.
    #[arg(long = "prune-vocab-by-infogain")]
    pub prune_vocab_by_infogain: Option<usize>,

    /// Hide terms occurring at most this many times in total.
    #[arg(long = "prune-vocab-by-occur-count")]
    pub prune_vocab_by_occur_count: Option<u64>,

    /// Hide terms appearing in at most this many documents.
    #[arg(long = "prune-words-by-doc-count")]
    pub prune_words_by_doc_count: Option<usize>,

    /// Deterministic seed for any randomized training step (EM
    /// perturbation, tree growth noise, active-learning/SVM-committee
    /// sampling).
    #[arg(long = "seed", default_value_t = 0)]
    pub seed: u64,
}
