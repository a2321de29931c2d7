//! Benchmarks for EM iteration cost at a few labeled/unlabeled split
//! sizes.
//!
//! Run with: cargo bench --bench em_bench

use std::collections::HashMap;

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crossbow::barrel::Barrel;
use crossbow::config::{Config, Smoothing};
use crossbow::document::{Cdoc, ClassId, Tag};
use crossbow::method::Method;
use crossbow::vocab::{VocabMode, Vocabulary, WordId};

struct CorpusSize {
    name: &'static str,
    n_classes: usize,
    labeled_per_class: usize,
    unlabeled_per_class: usize,
}

const CORPUS_SIZES: &[CorpusSize] = &[
    CorpusSize { name: "small", n_classes: 4, labeled_per_class: 5, unlabeled_per_class: 45 },
    CorpusSize { name: "medium", n_classes: 10, labeled_per_class: 10, unlabeled_per_class: 190 },
];

fn build_corpus(size: &CorpusSize, vocab_size: usize, words_per_doc: usize) -> Barrel {
    let mut vocab = Vocabulary::new(VocabMode::Open);
    for i in 0..vocab_size {
        vocab.add(&format!("w{i}")).unwrap();
    }
    vocab.freeze();

    let mut barrel = Barrel::new_document_barrel(vocab, Method::NaiveBayes(Smoothing::Laplace));
    barrel.classnames = (0..size.n_classes).map(|c| format!("class{c}")).collect();

    let mut rng = StdRng::seed_from_u64(7);
    let sig_width = vocab_size / size.n_classes.max(1);
    for c in 0..size.n_classes {
        let sig_start = c * sig_width;
        let total_docs = size.labeled_per_class + size.unlabeled_per_class;
        for d in 0..total_docs {
            let tag = if d < size.labeled_per_class { Tag::Train } else { Tag::Unlabeled };
            let mut counts: HashMap<WordId, u32> = HashMap::new();
            for _ in 0..words_per_doc {
                let wi = if rng.gen_bool(0.8) {
                    WordId((sig_start + rng.gen_range(0..sig_width)) as u32)
                } else {
                    WordId(rng.gen_range(0..vocab_size) as u32)
                };
                *counts.entry(wi).or_insert(0) += 1;
            }
            let mut cdoc = Cdoc::new(tag, format!("class{c}-doc{d}"));
            cdoc.class = if tag == Tag::Train { Some(ClassId(c as u32)) } else { None };
            cdoc.word_count = counts.values().sum();
            let doc_id = barrel.docs.push(cdoc);
            for (wi, count) in counts {
                barrel.index.add(wi, doc_id, count, count as f64);
            }
        }
    }
    barrel
}

fn bench_em_run(c: &mut Criterion) {
    let mut group = c.benchmark_group("em_run");
    group.sample_size(20);
    for size in CORPUS_SIZES {
        let template = build_corpus(size, 400, 50);
        let mut config = Config::default();
        config.em.max_iterations = 5;
        group.bench_with_input(BenchmarkId::from_parameter(size.name), &template, |b, template| {
            b.iter_batched(
                || template.clone(),
                |mut barrel| black_box(crossbow::em::run(&mut barrel, &config).unwrap()),
                criterion::BatchSize::LargeInput,
            );
        });
    }
    group.finish();
}

criterion_group!(benches, bench_em_run);
criterion_main!(benches);
