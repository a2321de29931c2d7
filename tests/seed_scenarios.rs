//! Black-box fixtures for the seed scenarios (§8 of the spec): a
//! synthetic bag-of-words corpus with class-specific "signature" word
//! ranges, exercised end to end through training, scoring, persistence,
//! pruning, and active learning.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use crossbow::archive;
use crossbow::barrel::Barrel;
use crossbow::config::{Config, EventModel, Kernel, MultiClassMode, Smoothing};
use crossbow::document::{Cdoc, ClassId, Tag};
use crossbow::heap_iter::HeapRowIterator;
use crossbow::method::Method;
use crossbow::naive_bayes;
use crossbow::row::Row;
use crossbow::svm;
use crossbow::vocab::{VocabMode, Vocabulary, WordId};
use crossbow::weighting;

/// Builds a `n_classes`-way synthetic corpus: `vocab_size` total terms,
/// split into one `sig_width`-wide "signature" range per class plus a
/// shared background range. Each document draws `words_per_doc` word
/// occurrences, 80% from its class's signature range and 20% uniformly
/// from the whole vocabulary, so NaiveBayes/SVM/EM all have real signal
/// to pick up.
fn synthetic_corpus(
    seed: u64,
    n_classes: usize,
    docs_per_class: usize,
    sig_width: usize,
    words_per_doc: usize,
    test_fraction: f64,
) -> Barrel {
    let vocab_size = n_classes * sig_width;
    let mut vocab = Vocabulary::new(VocabMode::Open);
    for i in 0..vocab_size {
        vocab.add(&format!("w{i}")).unwrap();
    }
    vocab.freeze();

    let mut barrel = Barrel::new_document_barrel(vocab, Method::NaiveBayes(Smoothing::Laplace));
    barrel.classnames = (0..n_classes).map(|c| format!("class{c}")).collect();

    let mut rng = StdRng::seed_from_u64(seed);
    for c in 0..n_classes {
        let sig_start = c * sig_width;
        let n_test = ((docs_per_class as f64) * test_fraction).round() as usize;
        for d in 0..docs_per_class {
            let tag = if d < n_test { Tag::Test } else { Tag::Train };
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

fn rows_by_doc(barrel: &Barrel) -> HashMap<crossbow::document::DocId, Row> {
    HeapRowIterator::new(&barrel.index, |_| true).collect()
}

fn accuracy_on_tag(barrel: &Barrel, vpc: &Barrel, config: &Config, tag: Tag) -> f64 {
    let rows = rows_by_doc(barrel);
    let mut correct = 0usize;
    let mut total = 0usize;
    for (doc_id, doc) in barrel.docs.iter() {
        if doc.tag != tag {
            continue;
        }
        let Some(expected) = doc.class else { continue };
        let Some(row) = rows.get(&doc_id) else { continue };
        let probs = naive_bayes::score_row(vpc, row, config.event_model, None);
        let predicted = probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap())
            .map(|(c, _)| ClassId(c as u32));
        total += 1;
        if predicted == Some(expected) {
            correct += 1;
        }
    }
    correct as f64 / total.max(1) as f64
}

/// Scenario 1: NaiveBayes multinomial + Laplace on a 4-class, 50-doc-per-
/// class corpus over a 200-word vocabulary should clear 90% held-out
/// accuracy on a held-out 20%.
#[test]
fn naive_bayes_clears_90_percent_held_out_accuracy() {
    let barrel = synthetic_corpus(1, 4, 50, 50, 40, 0.2);
    let config = Config::default();
    let vpc = naive_bayes::train(&barrel, &config).unwrap();
    let acc = accuracy_on_tag(&barrel, &vpc, &config, Tag::Test);
    assert!(acc >= 0.9, "held-out accuracy {acc} below 0.9");
}

/// Scenario 2: EM over a 10%-labeled slice of scenario 1 should not do
/// worse than NaiveBayes trained on that 10% alone.
#[test]
fn em_improves_on_naive_bayes_trained_on_labeled_subset_alone() {
    let mut barrel = synthetic_corpus(2, 4, 50, 50, 40, 0.2);
    // Demote all but the first 10% of each class's training documents to
    // `Unlabeled`, keeping `Test` documents intact as the held-out set.
    let mut per_class_seen = vec![0usize; barrel.classnames.len()];
    for (_, doc) in barrel.docs.iter_mut() {
        if doc.tag != Tag::Train {
            continue;
        }
        let c = doc.class.unwrap().index();
        per_class_seen[c] += 1;
        if per_class_seen[c] > 5 {
            doc.tag = Tag::Unlabeled;
        }
    }

    let labeled_only = barrel.clone();
    let mut config = Config::default();
    config.em.max_iterations = 7;
    config.event_model = EventModel::WordEvent;

    let baseline_vpc = naive_bayes::train(&labeled_only, &config).unwrap();
    let baseline_acc = accuracy_on_tag(&labeled_only, &baseline_vpc, &config, Tag::Test);

    let em_result = crossbow::em::run(&mut barrel, &config).unwrap();
    let em_acc = accuracy_on_tag(&barrel, &em_result.vpc, &config, Tag::Test);

    assert!(
        em_acc >= baseline_acc - 1e-9,
        "EM accuracy {em_acc} worse than labeled-only baseline {baseline_acc}"
    );
}

/// Scenario 3: archiving and reloading a barrel must reproduce
/// bit-identical scores for a fixed query set.
#[test]
fn archive_round_trip_preserves_scores_exactly() {
    let barrel = synthetic_corpus(3, 4, 50, 50, 40, 0.2);
    let config = Config::default();
    let vpc = naive_bayes::train(&barrel, &config).unwrap();

    let rows = rows_by_doc(&barrel);
    let queries: Vec<Row> = rows.values().take(5).cloned().collect();
    let before: Vec<Vec<f64>> = queries
        .iter()
        .map(|r| naive_bayes::score_row(&vpc, r, config.event_model, None))
        .collect();

    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("class-barrel.crb");
    archive::save_to_path(&path, &vpc).unwrap();
    let reloaded = archive::load_from_path(&path).unwrap();

    let after: Vec<Vec<f64>> = queries
        .iter()
        .map(|r| naive_bayes::score_row(&reloaded, r, config.event_model, None))
        .collect();

    for (b, a) in before.iter().zip(after.iter()) {
        for (x, y) in b.iter().zip(a.iter()) {
            assert!((x - y).abs() <= 1e-6 * x.abs().max(1.0), "{x} vs {y}");
        }
    }
}

/// Scenario 4: pruning to the top-500-by-infogain terms and re-ranking a
/// fixed query document must be deterministic across two otherwise
/// identical runs.
#[test]
fn infogain_pruning_and_ranking_are_deterministic() {
    fn run_once() -> (Vec<usize>, Vec<String>) {
        let mut barrel = synthetic_corpus(4, 4, 50, 50, 40, 0.2);
        let n_classes = barrel.classnames.len();
        let class_counts = weighting::class_doc_counts(&barrel.docs, n_classes);
        let n_docs = barrel.docs.len() as u64;
        let n_terms = barrel.vocab.len();
        let gains = weighting::infogain(
            &class_counts,
            |wi| {
                let mut per_class = vec![0u64; n_classes];
                if let Some(col) = barrel.index.column_including_hidden(wi) {
                    for e in col.entries() {
                        if let Some(doc) = barrel.docs.get(e.doc) {
                            if let Some(c) = doc.class {
                                per_class[c.index()] += 1;
                            }
                        }
                    }
                }
                per_class
            },
            n_terms,
            n_docs,
        );
        let mut ranked: Vec<usize> = (0..n_terms).collect();
        ranked.sort_by(|&a, &b| gains[b].partial_cmp(&gains[a]).unwrap().then(a.cmp(&b)));
        let top: Vec<usize> = ranked.iter().take(50).copied().collect();
        let keep: std::collections::HashSet<usize> = top.iter().copied().collect();
        for i in 0..n_terms {
            if !keep.contains(&i) {
                barrel.index.hide(WordId(i as u32));
            }
        }

        let config = Config::default();
        let vpc = naive_bayes::train(&barrel, &config).unwrap();
        let rows = rows_by_doc(&barrel);
        let query = rows.values().next().unwrap().clone();
        let probs = naive_bayes::score_row(&vpc, &query, config.event_model, None);
        let mut ranked_classes: Vec<(usize, f64)> = probs.into_iter().enumerate().collect();
        ranked_classes.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap());
        let top3: Vec<String> = ranked_classes
            .into_iter()
            .take(3)
            .map(|(c, _)| barrel.classnames[c].clone())
            .collect();
        (top, top3)
    }

    let (top_a, ranks_a) = run_once();
    let (top_b, ranks_b) = run_once();
    assert_eq!(top_a, top_b);
    assert_eq!(ranks_a, ranks_b);
}

/// Scenario 5: a 2-class, 100-document, disjoint-feature corpus is
/// linearly separable; the folded `W, b` must satisfy the margin
/// constraint for every training example.
#[test]
fn linear_svm_separates_disjoint_feature_classes() {
    let mut barrel = Barrel::new_document_barrel(
        {
            let mut v = Vocabulary::new(VocabMode::Open);
            v.add("a").unwrap();
            v.add("b").unwrap();
            v.freeze();
            v
        },
        Method::Svm(crossbow::config::SvmConfig::default()),
    );
    barrel.classnames = vec!["pos".into(), "neg".into()];
    for i in 0..50 {
        let mut cdoc = Cdoc::new(Tag::Train, format!("pos{i}"));
        cdoc.class = Some(ClassId(0));
        let id = barrel.docs.push(cdoc);
        barrel.index.add(WordId(0), id, 3, 3.0);
    }
    for i in 0..50 {
        let mut cdoc = Cdoc::new(Tag::Train, format!("neg{i}"));
        cdoc.class = Some(ClassId(1));
        let id = barrel.docs.push(cdoc);
        barrel.index.add(WordId(1), id, 3, 3.0);
    }

    let mut config = Config::default();
    config.svm.kernel = Kernel::Linear;
    config.svm.multiclass = MultiClassMode::OneVsRest;
    let model = svm::train(&barrel, &config).unwrap();

    let rows = rows_by_doc(&barrel);
    for (doc_id, doc) in barrel.docs.iter() {
        let Some(row) = rows.get(&doc_id) else { continue };
        let predicted = svm::predict(&model, row);
        assert_eq!(Some(predicted), doc.class);
    }
}

/// Scenario 6: active learning over 5 seeds should not, on average,
/// leave the final round worse off than the first round.
#[test]
fn active_learning_accuracy_does_not_regress_on_average() {
    let mut first_round_avg = 0.0;
    let mut last_round_avg = 0.0;
    let n_seeds = 5;

    for seed in 0..n_seeds {
        let mut barrel = synthetic_corpus(100 + seed, 3, 40, 40, 30, 0.2);
        // Start from 2 labeled docs per class; the rest of the train
        // split becomes the active-learning pool.
        let mut per_class_seen = vec![0usize; barrel.classnames.len()];
        for (_, doc) in barrel.docs.iter_mut() {
            if doc.tag != Tag::Train {
                continue;
            }
            let c = doc.class.unwrap().index();
            per_class_seen[c] += 1;
            if per_class_seen[c] > 2 {
                doc.tag = Tag::Pool;
            }
        }

        let mut config = Config::default();
        config.random_seed = seed;
        config.active.rounds = 10;
        config.active.add_per_round = 4;
        config.active.criterion = crossbow::config::ActiveCriterion::Uncertainty;

        let history = crossbow::active::run(&mut barrel, &config).unwrap();
        let accs: Vec<f64> = history.iter().filter_map(|r| r.accuracy).collect();
        if let (Some(&first), Some(&last)) = (accs.first(), accs.last()) {
            first_round_avg += first;
            last_round_avg += last;
        }
    }
    first_round_avg /= n_seeds as f64;
    last_round_avg /= n_seeds as f64;

    assert!(
        last_round_avg >= first_round_avg - 0.05,
        "final-round average accuracy {last_round_avg} regressed from first-round {first_round_avg}"
    );
}
