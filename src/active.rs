//! Active learning (§4.10): round-based query selection from a pool of
//! unlabeled documents, scored by one of several criteria, with an
//! optional committee and a final EM pass.

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;

use crate::barrel::Barrel;
use crate::config::{ActiveCriterion, Config};
use crate::document::{DocId, Tag};
use crate::em;
use crate::errors::Result;
use crate::heap_iter::HeapRowIterator;
use crate::naive_bayes;
use crate::row::Row;

/// One round's outcome: which documents were moved from the pool into
/// `Tag::Train`, and the resulting model's held-out accuracy (if a
/// validation set is present via `Tag::Test`).
#[derive(Debug, Clone)]
pub struct ActiveRound {
    pub queried: Vec<DocId>,
    pub accuracy: Option<f64>,
}

fn entropy(probs: &[f64]) -> f64 {
    probs
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| -p * p.ln())
        .sum()
}

/// Committee of bootstrap-resampled NaiveBayes classifiers, used by the
/// `Qbc`/`VoteEntropy`/`WeightedKl` criteria. Diversity comes from
/// resampling `Tag::Train` documents with replacement per member.
fn train_committee(doc_barrel: &Barrel, config: &Config, size: usize, rng: &mut StdRng) -> Vec<Barrel> {
    let train_ids: Vec<DocId> = doc_barrel.docs.with_tag(Tag::Train).collect();
    if train_ids.is_empty() {
        return Vec::new();
    }
    (0..size.max(1))
        .map(|_| {
            let mut draws: HashMap<DocId, u32> = HashMap::new();
            for _ in 0..train_ids.len() {
                let id = *train_ids.choose(rng).expect("non-empty training set");
                *draws.entry(id).or_insert(0) += 1;
            }
            let n_classes = doc_barrel.n_classes();
            let mut counts = crate::sparse::SparseIndex::with_capacity(doc_barrel.vocab.len());
            let mut class_word_mass = vec![0.0; n_classes];
            let mut class_doc_mass = vec![0.0; n_classes];
            for (wi, col) in doc_barrel.index.non_hidden_columns() {
                for entry in col.entries() {
                    let Some(&mult) = draws.get(&entry.doc) else { continue };
                    let Some(doc) = doc_barrel.docs.get(entry.doc) else { continue };
                    let Some(class) = doc.class else { continue };
                    let mass = mult as f64 * entry.weight;
                    counts.add(wi, DocId(class.index() as u32), 0, mass);
                    class_word_mass[class.index()] += mass;
                }
            }
            for (&id, &mult) in &draws {
                if let Some(class) = doc_barrel.docs.get(id).and_then(|d| d.class) {
                    class_doc_mass[class.index()] += mult as f64;
                }
            }
            let stats = naive_bayes::ClassStatistics {
                counts,
                class_word_mass,
                class_doc_mass,
            };
            naive_bayes::build_vpc_from_statistics(doc_barrel, &stats, n_classes, config)
                .expect("bootstrap training with a nonempty class set cannot fail")
        })
        .collect()
}

fn criterion_score(
    config: &Config,
    vpc: &Barrel,
    row: &Row,
    committee: &[Barrel],
    rng: &mut StdRng,
) -> f64 {
    match config.active.criterion {
        ActiveCriterion::Uncertainty => {
            let probs = naive_bayes::score_row(vpc, row, config.event_model, None);
            let max = probs.iter().cloned().fold(0.0f64, f64::max);
            1.0 - max
        }
        ActiveCriterion::Relevance => {
            let probs = naive_bayes::score_row(vpc, row, config.event_model, None);
            let class_idx = config
                .active
                .positive_class
                .as_ref()
                .and_then(|name| vpc.classnames.iter().position(|c| c == name))
                .unwrap_or(0);
            probs.get(class_idx).copied().unwrap_or(0.0)
        }
        ActiveCriterion::Random => rand::Rng::gen_range(rng, 0.0..1.0),
        ActiveCriterion::Length => row.word_count() as f64,
        ActiveCriterion::Qbc | ActiveCriterion::VoteEntropy => {
            vote_entropy(config, committee, row)
        }
        ActiveCriterion::WeightedKl | ActiveCriterion::DensityWeightedKl => {
            weighted_kl(config, vpc, committee, row)
        }
        ActiveCriterion::StreamVoteEntropy { rate } => {
            if rand::Rng::gen_range(rng, 0.0..1.0) < rate {
                vote_entropy(config, committee, row)
            } else {
                f64::NEG_INFINITY
            }
        }
        ActiveCriterion::StreamKl { rate } => {
            if rand::Rng::gen_range(rng, 0.0..1.0) < rate {
                weighted_kl(config, vpc, committee, row)
            } else {
                f64::NEG_INFINITY
            }
        }
    }
}

fn vote_entropy(config: &Config, committee: &[Barrel], row: &Row) -> f64 {
    if committee.is_empty() {
        return 0.0;
    }
    let n_classes = committee[0].n_classes();
    let mut votes = vec![0u32; n_classes];
    for member in committee {
        let probs = naive_bayes::score_row(member, row, config.event_model, None);
        if let Some((idx, _)) = probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
        {
            votes[idx] += 1;
        }
    }
    let total = committee.len() as f64;
    let fracs: Vec<f64> = votes.iter().map(|&v| v as f64 / total).collect();
    entropy(&fracs)
}

/// Average pairwise KL divergence between the mean committee prediction
/// and each member, weighted by the main model's estimate of the
/// document's density (`Cdoc::prior`, where available) for the
/// density-weighted variant.
fn weighted_kl(config: &Config, vpc: &Barrel, committee: &[Barrel], row: &Row) -> f64 {
    if committee.is_empty() {
        return 0.0;
    }
    let n_classes = committee[0].n_classes();
    let member_probs: Vec<Vec<f64>> = committee
        .iter()
        .map(|m| naive_bayes::score_row(m, row, config.event_model, None))
        .collect();
    let mut mean = vec![0.0; n_classes];
    for probs in &member_probs {
        for (m, &p) in mean.iter_mut().zip(probs.iter()) {
            *m += p / member_probs.len() as f64;
        }
    }
    let avg_kl: f64 = member_probs
        .iter()
        .map(|probs| {
            probs
                .iter()
                .zip(mean.iter())
                .filter(|(&p, _)| p > 0.0)
                .map(|(&p, &q)| p * (p / q.max(1e-12)).ln())
                .sum::<f64>()
        })
        .sum::<f64>()
        / member_probs.len() as f64;

    let density = if matches!(config.active.criterion, ActiveCriterion::DensityWeightedKl) {
        density_proxy(vpc, row)
    } else {
        1.0
    };
    avg_kl * density
}

/// A cheap density proxy in the absence of a maintained kernel-density
/// model: the document's word count relative to the vocabulary size,
/// rewarding queries drawn from well-populated regions of the feature
/// space over outliers.
fn density_proxy(vpc: &Barrel, row: &Row) -> f64 {
    let v = vpc.vocab.len().max(1) as f64;
    (row.len() as f64 / v).min(1.0).max(1e-3)
}

/// Remaps `probs` (e.g. `Qbc`/`WeightedKl` raw scores across one round's
/// pool) onto the unit interval by rank, then sorts descending again — the
/// explicit resort after remapping the source's active-learning code
/// skipped, documented as a deliberate fix rather than a reproduced bug.
pub fn remap_and_resort(mut scored: Vec<(DocId, f64)>) -> Vec<(DocId, f64)> {
    scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
    let n = scored.len().max(1);
    for (rank, entry) in scored.iter_mut().enumerate() {
        entry.1 = rank as f64 / n as f64;
    }
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored
}

/// Runs the configured number of active-learning rounds. Each round trains
/// (or re-trains) a NaiveBayes model on the current `Tag::Train` set,
/// scores every `Tag::Pool` document by the configured criterion, moves
/// the top `add_per_round` into `Tag::Train`, and records held-out
/// accuracy against `Tag::Test` if present.
pub fn run(doc_barrel: &mut Barrel, config: &Config) -> Result<Vec<ActiveRound>> {
    let mut rng = StdRng::seed_from_u64(config.random_seed);
    let mut history = Vec::new();

    for _round in 0..config.active.rounds {
        let vpc = naive_bayes::train(doc_barrel, config)?;
        let committee = if matches!(
            config.active.criterion,
            ActiveCriterion::Qbc
                | ActiveCriterion::VoteEntropy
                | ActiveCriterion::WeightedKl
                | ActiveCriterion::DensityWeightedKl
                | ActiveCriterion::StreamVoteEntropy { .. }
                | ActiveCriterion::StreamKl { .. }
        ) {
            train_committee(doc_barrel, config, config.active.committee_size, &mut rng)
        } else {
            Vec::new()
        };

        let rows: HashMap<DocId, Row> = HeapRowIterator::new(&doc_barrel.index, |_| true).collect();
        let pool_ids: Vec<DocId> = doc_barrel.docs.with_tag(Tag::Pool).collect();
        if pool_ids.is_empty() {
            break;
        }

        let mut scored: Vec<(DocId, f64)> = pool_ids
            .iter()
            .map(|&id| {
                let empty = Row::default();
                let row = rows.get(&id).unwrap_or(&empty);
                let score = criterion_score(config, &vpc, row, &committee, &mut rng);
                (id, score)
            })
            .collect();

        if config.active.remap_probabilities {
            scored = remap_and_resort(scored);
        } else {
            scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        }

        let queried: Vec<DocId> = scored
            .into_iter()
            .take(config.active.add_per_round)
            .map(|(id, _)| id)
            .collect();
        for &id in &queried {
            if let Some(doc) = doc_barrel.docs.get_mut(id) {
                doc.tag = Tag::Train;
            }
        }

        let accuracy = evaluate_accuracy(doc_barrel, &vpc, config, &rows);
        history.push(ActiveRound { queried, accuracy });
    }

    if config.active.final_em_pass {
        em::run(doc_barrel, config)?;
    }

    Ok(history)
}

fn evaluate_accuracy(
    doc_barrel: &Barrel,
    vpc: &Barrel,
    config: &Config,
    rows: &HashMap<DocId, Row>,
) -> Option<f64> {
    let test_ids: Vec<DocId> = doc_barrel.docs.with_tag(Tag::Test).collect();
    if test_ids.is_empty() {
        return None;
    }
    let mut correct = 0usize;
    for id in &test_ids {
        let doc = doc_barrel.docs.get(*id)?;
        let empty = Row::default();
        let row = rows.get(id).unwrap_or(&empty);
        let probs = naive_bayes::score_row(vpc, row, config.event_model, None);
        let predicted = probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, _)| i);
        if predicted == doc.class.map(|c| c.index()) {
            correct += 1;
        }
    }
    Some(correct as f64 / test_ids.len() as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::barrel::BarrelKind;
    use crate::document::Cdoc;
    use crate::method::Method;
    use crate::row::WordEntry;
    use crate::vocab::{VocabMode, Vocabulary, WordId};

    fn pool_barrel() -> Barrel {
        let mut vocab = Vocabulary::new(VocabMode::Open);
        let w0 = vocab.add("cat").unwrap();
        let w1 = vocab.add("dog").unwrap();
        vocab.freeze();
        let mut barrel = Barrel::new_document_barrel(vocab, Method::Active(Default::default()));
        barrel.classnames = vec!["pets".into(), "other".into()];
        barrel.kind = BarrelKind::Document;

        let mut seed0 = Cdoc::new(Tag::Train, "seed0");
        seed0.class = Some(crate::document::ClassId(0));
        let id = barrel.docs.push(seed0);
        barrel.index.add(w0, id, 5, 5.0);

        let mut seed1 = Cdoc::new(Tag::Train, "seed1");
        seed1.class = Some(crate::document::ClassId(1));
        let id = barrel.docs.push(seed1);
        barrel.index.add(w1, id, 5, 5.0);

        for i in 0..6 {
            let mut d = Cdoc::new(Tag::Pool, format!("pool{i}"));
            d.class = Some(crate::document::ClassId(if i % 2 == 0 { 0 } else { 1 }));
            let id = barrel.docs.push(d);
            if i % 2 == 0 {
                barrel.index.add(w0, id, 4, 4.0);
            } else {
                barrel.index.add(w1, id, 4, 4.0);
            }
        }
        barrel
    }

    #[test]
    fn uncertainty_round_moves_documents_into_train() {
        let mut barrel = pool_barrel();
        let mut config = Config::default();
        config.active.rounds = 2;
        config.active.add_per_round = 2;
        config.active.criterion = ActiveCriterion::Uncertainty;
        let history = run(&mut barrel, &config).unwrap();
        assert_eq!(history.len(), 2);
        let train_count = barrel.docs.with_tag(Tag::Train).count();
        assert_eq!(train_count, 2 + 2 * 2);
    }

    #[test]
    fn remap_and_resort_preserves_rank_order() {
        let scored = vec![(DocId(0), 3.0), (DocId(1), 1.0), (DocId(2), 2.0)];
        let remapped = remap_and_resort(scored);
        assert_eq!(remapped[0].0, DocId(0));
        assert_eq!(remapped[2].0, DocId(1));
    }

    #[test]
    fn length_criterion_prefers_longer_documents() {
        let mut barrel = pool_barrel();
        let mut config = Config::default();
        config.active.rounds = 1;
        config.active.add_per_round = 1;
        config.active.criterion = ActiveCriterion::Length;
        let w2 = barrel.vocab.add("bird").unwrap();
        let mut long_doc = Cdoc::new(Tag::Pool, "long");
        long_doc.class = Some(crate::document::ClassId(0));
        let id = barrel.docs.push(long_doc);
        barrel.index.add(WordId(0), id, 20, 20.0);
        barrel.index.add(w2, id, 20, 20.0);
        let history = run(&mut barrel, &config).unwrap();
        assert_eq!(history[0].queried, vec![id]);
    }
}
