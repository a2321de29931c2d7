//! A sparse-matrix text classification and document clustering toolkit:
//! a dual-index term-document matrix (§2's `V`/`D`/`S`/`R`/`B`), Naive
//! Bayes with multiple smoothing schemes, EM over labeled and unlabeled
//! data, hierarchical shrinkage EM over a class tree, Maximum Entropy via
//! iterative scaling, an SMO-trained SVM, and a pool-based active learning
//! loop — plus the archive format, query server, and CLI that serve them.

pub mod active;
pub mod archive;
pub mod barrel;
pub mod cli;
pub mod config;
pub mod contracts;
pub mod document;
pub mod em;
pub mod errors;
pub mod heap_iter;
pub mod hem;
pub mod maxent;
pub mod method;
pub mod model;
pub mod naive_bayes;
pub mod row;
pub mod server;
pub mod sparse;
pub mod svm;
pub mod treenode;
pub mod vocab;
pub mod weighting;
