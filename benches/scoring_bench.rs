//! Benchmarks for NaiveBayes training and scoring throughput at a few
//! corpus sizes.
//!
//! Run with: cargo bench --bench scoring_bench

use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crossbow::barrel::Barrel;
use crossbow::config::{Config, Smoothing};
use crossbow::document::{Cdoc, ClassId, Tag};
use crossbow::heap_iter::HeapRowIterator;
use crossbow::method::Method;
use crossbow::naive_bayes;
use crossbow::row::Row;
use crossbow::vocab::{VocabMode, Vocabulary, WordId};

struct CorpusSize {
    name: &'static str,
    n_classes: usize,
    docs_per_class: usize,
}

const CORPUS_SIZES: &[CorpusSize] = &[
    CorpusSize { name: "small", n_classes: 4, docs_per_class: 50 },
    CorpusSize { name: "medium", n_classes: 10, docs_per_class: 200 },
];

fn build_corpus(size: &CorpusSize, vocab_size: usize, words_per_doc: usize) -> Barrel {
    let mut vocab = Vocabulary::new(VocabMode::Open);
    for i in 0..vocab_size {
        vocab.add(&format!("w{i}")).unwrap();
    }
    vocab.freeze();

    let mut barrel = Barrel::new_document_barrel(vocab, Method::NaiveBayes(Smoothing::Laplace));
    barrel.classnames = (0..size.n_classes).map(|c| format!("class{c}")).collect();

    let mut rng = StdRng::seed_from_u64(42);
    let sig_width = vocab_size / size.n_classes.max(1);
    for c in 0..size.n_classes {
        let sig_start = c * sig_width;
        for d in 0..size.docs_per_class {
            let mut counts: HashMap<WordId, u32> = HashMap::new();
            for _ in 0..words_per_doc {
                let wi = if rng.gen_bool(0.8) {
                    WordId((sig_start + rng.gen_range(0..sig_width)) as u32)
                } else {
                    WordId(rng.gen_range(0..vocab_size) as u32)
                };
                *counts.entry(wi).or_insert(0) += 1;
            }
            let mut cdoc = Cdoc::new(Tag::Train, format!("class{c}-doc{d}"));
            cdoc.class = Some(ClassId(c as u32));
            cdoc.word_count = counts.values().sum();
            let doc_id = barrel.docs.push(cdoc);
            for (wi, count) in counts {
                barrel.index.add(wi, doc_id, count, count as f64);
            }
        }
    }
    barrel
}

fn bench_train(c: &mut Criterion) {
    let mut group = c.benchmark_group("naive_bayes_train");
    for size in CORPUS_SIZES {
        let barrel = build_corpus(size, 500, 60);
        let config = Config::default();
        group.bench_with_input(BenchmarkId::from_parameter(size.name), &barrel, |b, barrel| {
            b.iter(|| naive_bayes::train(black_box(barrel), black_box(&config)).unwrap());
        });
    }
    group.finish();
}

fn bench_score(c: &mut Criterion) {
    let mut group = c.benchmark_group("naive_bayes_score");
    for size in CORPUS_SIZES {
        let barrel = build_corpus(size, 500, 60);
        let config = Config::default();
        let vpc = naive_bayes::train(&barrel, &config).unwrap();
        let rows: Vec<Row> = HeapRowIterator::new(&barrel.index, |_| true)
            .map(|(_, row)| row)
            .collect();
        group.bench_with_input(BenchmarkId::from_parameter(size.name), &rows, |b, rows| {
            b.iter(|| {
                for row in rows {
                    black_box(naive_bayes::score_row(&vpc, row, config.event_model, None));
                }
            });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_train, bench_score);
criterion_main!(benches);
