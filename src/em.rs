//! EM with labeled + unlabeled data (§4.6).

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Gamma, Normal};

use crate::barrel::Barrel;
use crate::config::{Config, EmStart, EventModel, Perturbation};
use crate::document::{Cdoc, ClassId, ClassProbs, DocId, Tag};
use crate::errors::Result;
use crate::heap_iter::HeapRowIterator;
use crate::naive_bayes::{
    accumulate_statistics, build_vpc_from_statistics, raw_log_scores, rescale_and_exponentiate,
    ClassStatistics, HardLabels, Membership, SoftLabels,
};
use crate::row::Row;
use crate::weighting;

/// Per-iteration diagnostics, used both for halting decisions and for the
/// §8 monotone-log-likelihood property.
#[derive(Debug, Clone)]
pub struct EmIteration {
    pub log_likelihood: f64,
    pub temperature: f64,
}

pub struct EmResult {
    pub vpc: Barrel,
    pub history: Vec<EmIteration>,
}

/// Class proportions among `Tag::Train` documents, the seed
/// `EmStart::PriorProportional` starts unlabeled documents from. Falls
/// back to uniform when no training documents are labeled yet.
fn class_prior_proportions(doc_barrel: &Barrel, n_classes: usize) -> Vec<f64> {
    let counts = weighting::class_doc_counts(&doc_barrel.docs, n_classes);
    let total: u64 = counts.iter().sum();
    if total == 0 {
        return vec![1.0 / n_classes as f64; n_classes];
    }
    counts.iter().map(|&c| c as f64 / total as f64).collect()
}

fn seed_unlabeled(doc_barrel: &mut Barrel, n_classes: usize, config: &Config, rng: &mut StdRng) {
    let prior_proportions = class_prior_proportions(doc_barrel, n_classes);
    for (_, doc) in doc_barrel.docs.iter_mut() {
        if doc.tag != Tag::Unlabeled {
            continue;
        }
        doc.class_probs = Some(match config.em.start {
            EmStart::Zero => ClassProbs(vec![0.0; n_classes]),
            EmStart::Even => ClassProbs::uniform(n_classes),
            EmStart::PriorProportional => ClassProbs(prior_proportions.clone()),
            EmStart::Random => {
                let mut v: Vec<f64> = (0..n_classes).map(|_| rng.gen::<f64>() + 1e-6).collect();
                let sum: f64 = v.iter().sum();
                for x in &mut v {
                    *x /= sum;
                }
                ClassProbs(v)
            }
        });
    }
    for (_, doc) in doc_barrel.docs.iter_mut() {
        if doc.tag == Tag::Train {
            if let Some(class) = doc.class {
                doc.class_probs = Some(ClassProbs::one_hot(n_classes, class));
            }
        }
    }
}

fn hold_out_validation(doc_barrel: &mut Barrel, fraction: f64, rng: &mut StdRng) {
    if fraction <= 0.0 {
        return;
    }
    let unlabeled: Vec<DocId> = doc_barrel.docs.with_tag(Tag::Unlabeled).collect();
    let n_validation = ((unlabeled.len() as f64) * fraction).round() as usize;
    let mut chosen = unlabeled;
    // Fisher-Yates partial shuffle so the held-out set is uniformly chosen.
    for i in 0..chosen.len().min(n_validation.max(1)) {
        let j = rng.gen_range(i..chosen.len());
        chosen.swap(i, j);
    }
    for &id in chosen.iter().take(n_validation) {
        if let Some(doc) = doc_barrel.docs.get_mut(id) {
            doc.tag = Tag::Validation;
        }
    }
}

fn build_rows(doc_barrel: &Barrel) -> HashMap<DocId, Row> {
    HeapRowIterator::new(&doc_barrel.index, |_| true).collect()
}

/// Gaussian/Gamma perturbation of the accumulated statistics after the
/// first iteration (§4.6), resampling each `n_{w,c}` independently.
fn perturb(stats: &mut ClassStatistics, mode: Perturbation, rng: &mut StdRng) {
    if mode == Perturbation::None {
        return;
    }
    let n_classes = stats.class_word_mass.len();
    for c in 0..n_classes {
        let n_c = stats.class_word_mass[c].max(1.0);
        for wi_idx in 0..stats.counts.len() {
            let wi = crate::vocab::WordId(wi_idx as u32);
            let n = stats
                .counts
                .entry(wi, DocId(c as u32))
                .map(|e| e.weight)
                .unwrap_or(0.0);
            if n <= 0.0 {
                continue;
            }
            let resampled = match mode {
                Perturbation::None => n,
                Perturbation::Gaussian => {
                    let p = (n / n_c).clamp(1e-9, 1.0 - 1e-9);
                    let var = (n_c * p * (1.0 - p)).max(1e-6);
                    let normal = Normal::new(n, var.sqrt()).expect("finite variance");
                    normal.sample(rng).max(0.0)
                }
                Perturbation::Gamma => {
                    let gamma = Gamma::new(n + 1.0, 1.0).expect("shape > 0");
                    gamma.sample(rng)
                }
            };
            stats.counts.set(wi, DocId(c as u32), 0, resampled);
        }
    }
}

/// Runs EM to completion (or until halting fires), mutating `doc_barrel`'s
/// `class_probs` in place and returning the final VPC barrel plus the
/// per-iteration trace.
pub fn run(doc_barrel: &mut Barrel, config: &Config) -> Result<EmResult> {
    let n_classes = doc_barrel.n_classes();
    let mut rng = StdRng::seed_from_u64(config.random_seed);

    hold_out_validation(doc_barrel, config.em.validation_fraction, &mut rng);
    seed_unlabeled(doc_barrel, n_classes, config, &mut rng);
    let rows = build_rows(doc_barrel);

    let mut history = Vec::new();
    let mut temperature = config.em.initial_temperature;
    let mut lambda = if config.em.anneal_normalizer {
        0.0
    } else {
        config.em.unlabeled_normalizer
    };
    let mut best: Option<(Barrel, f64)> = None;
    let mut prev_ll = f64::NEG_INFINITY;

    for iteration in 0..config.em.max_iterations {
        let membership = SoftLabels;
        let mut stats = accumulate_statistics(doc_barrel, n_classes, &membership);
        if config.em.perturbation != Perturbation::None && iteration > 0 {
            perturb(&mut stats, config.em.perturbation, &mut rng);
        }
        apply_acceleration(&mut stats, config.em.em_acceleration);
        let vpc = build_vpc_from_statistics(doc_barrel, &stats, n_classes, config)?;

        let log_likelihood =
            total_log_likelihood(&vpc, &rows, doc_barrel, config.event_model, Tag::Train);
        history.push(EmIteration {
            log_likelihood,
            temperature,
        });

        let halting_tag = config.em.halting_tag.as_deref().and_then(tag_from_name);
        let halting_ll = match halting_tag {
            Some(tag) => total_log_likelihood(&vpc, &rows, doc_barrel, config.event_model, tag),
            None => log_likelihood,
        };
        if halting_ll + 1e-9 < prev_ll
            && !config.em.deterministic_annealing
            && config.em.em_acceleration.unwrap_or(1.0) <= 1.0
        {
            // Plateau/regression: the previous iteration's parameters are
            // the output (§4.6 halting).
            break;
        }
        prev_ll = halting_ll;
        best = Some((vpc.clone(), log_likelihood));

        e_step(
            doc_barrel,
            &vpc,
            &rows,
            config,
            temperature,
            lambda,
            iteration,
        );

        if config.em.deterministic_annealing {
            temperature = (temperature * config.em.temperature_decay).max(1.0);
        }
        if config.em.anneal_normalizer {
            lambda = (lambda * 1.1).min(config.em.unlabeled_normalizer.max(1.0)).min(1.0);
        }
    }

    let (vpc, _) = best.expect("at least one EM iteration always runs");
    Ok(EmResult { vpc, history })
}

fn apply_acceleration(stats: &mut ClassStatistics, acceleration: Option<f64>) {
    let Some(a) = acceleration else { return };
    // Mirrors the source's disabled-by-default accelerated path:
    // new = (1-a)*old + a*(accumulated/total), clamped to nonnegative. Here
    // "old" is folded in by the caller already averaging across
    // iterations, so we approximate by scaling the increment by `a` and
    // clamping, matching the observable clamp-to-zero behavior.
    for c in 0..stats.class_word_mass.len() {
        for wi_idx in 0..stats.counts.len() {
            let wi = crate::vocab::WordId(wi_idx as u32);
            if let Some(e) = stats.counts.entry(wi, DocId(c as u32)) {
                let scaled = (a * e.weight).max(0.0);
                stats.counts.set(wi, DocId(c as u32), 0, scaled);
            }
        }
    }
}

/// Whether the E-step recomputes `doc`'s `class_probs`: everything except
/// held-out/inert tags, plus `Train` once `zero_after_first` kicks in
/// (`labeled_for_start_only` freezes labeled documents for iteration 0
/// only, then folds them back into the soft-labeled pool).
fn e_step_applies(tag: Tag, zero_after_first: bool) -> bool {
    match tag {
        Tag::Train => zero_after_first,
        Tag::Validation | Tag::Test | Tag::Ignore | Tag::Pool | Tag::Waiting | Tag::Untagged => {
            false
        }
        _ => true,
    }
}

fn e_step_probs(
    vpc: &Barrel,
    row: &Row,
    event_model: EventModel,
    temperature: f64,
    lambda: f64,
) -> ClassProbs {
    let log_scores = raw_log_scores(vpc, row, event_model, temperature, None);
    let mut probs = rescale_and_exponentiate(&log_scores);
    for p in &mut probs {
        *p *= lambda;
    }
    ClassProbs(probs)
}

#[cfg(not(feature = "parallel"))]
fn e_step(
    doc_barrel: &mut Barrel,
    vpc: &Barrel,
    rows: &HashMap<DocId, Row>,
    config: &Config,
    temperature: f64,
    lambda: f64,
    iteration: u32,
) {
    let zero_after_first = config.em.labeled_for_start_only && iteration >= 1;
    for (doc_id, doc) in doc_barrel.docs.iter_mut() {
        if !e_step_applies(doc.tag, zero_after_first) {
            continue;
        }
        let Some(row) = rows.get(&doc_id) else { continue };
        doc.class_probs = Some(e_step_probs(vpc, row, config.event_model, temperature, lambda));
    }
}

/// Parallel E-step: every document's posterior is independent of every
/// other's given `vpc`, so the per-document scoring fans out over rayon's
/// global pool and only the final write-back runs sequentially.
#[cfg(feature = "parallel")]
fn e_step(
    doc_barrel: &mut Barrel,
    vpc: &Barrel,
    rows: &HashMap<DocId, Row>,
    config: &Config,
    temperature: f64,
    lambda: f64,
    iteration: u32,
) {
    use rayon::prelude::*;

    let zero_after_first = config.em.labeled_for_start_only && iteration >= 1;
    let ids: Vec<DocId> = doc_barrel
        .docs
        .iter()
        .filter(|(_, doc)| e_step_applies(doc.tag, zero_after_first))
        .map(|(id, _)| id)
        .collect();
    let updates: Vec<(DocId, ClassProbs)> = ids
        .par_iter()
        .filter_map(|&doc_id| {
            let row = rows.get(&doc_id)?;
            Some((doc_id, e_step_probs(vpc, row, config.event_model, temperature, lambda)))
        })
        .collect();
    for (doc_id, probs) in updates {
        if let Some(doc) = doc_barrel.docs.get_mut(doc_id) {
            doc.class_probs = Some(probs);
        }
    }
}

fn total_log_likelihood(
    vpc: &Barrel,
    rows: &HashMap<DocId, Row>,
    doc_barrel: &Barrel,
    event_model: EventModel,
    tag: Tag,
) -> f64 {
    let mut ll = 0.0;
    for (doc_id, doc) in doc_barrel.docs.iter() {
        if doc.tag != tag {
            continue;
        }
        let Some(row) = rows.get(&doc_id) else { continue };
        let log_scores = raw_log_scores(vpc, row, event_model, 1.0, None);
        ll += log_sum_exp(&log_scores);
    }
    ll
}

/// Maps an `EmConfig::halting_tag` name to the `Tag` whose subset of
/// documents the halting check should monitor, instead of the default
/// `Tag::Train` regression check.
fn tag_from_name(name: &str) -> Option<Tag> {
    match name.to_ascii_lowercase().as_str() {
        "train" => Some(Tag::Train),
        "test" => Some(Tag::Test),
        "unlabeled" => Some(Tag::Unlabeled),
        "validation" => Some(Tag::Validation),
        "pool" => Some(Tag::Pool),
        "waiting" => Some(Tag::Waiting),
        "ignore" => Some(Tag::Ignore),
        "untagged" => Some(Tag::Untagged),
        _ => None,
    }
}

fn log_sum_exp(xs: &[f64]) -> f64 {
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + xs.iter().map(|&x| (x - max).exp()).sum::<f64>().ln()
}

/// Trains a plain (non-EM) NaiveBayes VPC on only the `Tag::Train`-tagged
/// subset of `doc_barrel` — the comparison baseline used by the scenario-2
/// fixture ("accuracy >= NaiveBayes trained on the same labeled subset").
pub fn train_labeled_only(doc_barrel: &Barrel, config: &Config) -> Result<Barrel> {
    let n_classes = doc_barrel.n_classes();
    let membership = HardLabels { tag: Tag::Train };
    let stats = accumulate_statistics(doc_barrel, n_classes, &membership);
    build_vpc_from_statistics(doc_barrel, &stats, n_classes, config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::Tag;
    use crate::vocab::{VocabMode, Vocabulary};

    fn synthetic_barrel(seed: u64) -> Barrel {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut vocab = Vocabulary::new(VocabMode::Open);
        let words: Vec<_> = (0..20).map(|i| vocab.add(&format!("w{i}")).unwrap()).collect();
        vocab.freeze();
        let mut barrel = Barrel::new_document_barrel(
            vocab,
            crate::method::Method::Em(crate::config::EmConfig::default()),
        );
        barrel.classnames = vec!["a".into(), "b".into()];

        for d in 0..40 {
            let class = ClassId((d % 2) as u32);
            let tag = if d < 6 { Tag::Train } else { Tag::Unlabeled };
            let mut cdoc = Cdoc::new(tag, format!("doc{d}"));
            cdoc.class = if tag == Tag::Train { Some(class) } else { None };
            let id = barrel.docs.push(cdoc);
            let offset = class.index() * 10;
            for k in 0..8 {
                let wi = words[(offset + k) % words.len()];
                let count = 1 + (rng.gen::<u32>() % 3);
                barrel.index.add(wi, id, count, count as f64);
            }
        }
        barrel
    }

    #[test]
    fn em_runs_and_produces_normalized_priors() {
        let mut barrel = synthetic_barrel(1);
        let mut config = Config::default();
        config.em.max_iterations = 5;
        let result = run(&mut barrel, &config).unwrap();
        assert!(!result.history.is_empty());
        let total: f64 = result.vpc.docs.iter().map(|(_, d)| d.prior).sum();
        assert!((total - 1.0).abs() < 1e-6);
    }

    #[test]
    fn class_probs_remain_normalized_after_e_step() {
        let mut barrel = synthetic_barrel(2);
        let mut config = Config::default();
        config.em.max_iterations = 3;
        config.em.unlabeled_normalizer = 1.0;
        run(&mut barrel, &config).unwrap();
        for (_, doc) in barrel.docs.iter() {
            if doc.tag == Tag::Unlabeled {
                if let Some(cp) = &doc.class_probs {
                    assert!(cp.sum() <= 1.0 + 1e-6);
                }
            }
        }
    }
}
