//! Hierarchical / shrinkage EM over a `Tree` (§4.7).

use std::collections::HashMap;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::document::DocId;
use crate::row::Row;
use crate::treenode::{NodeId, Tree};
use crate::vocab::WordId;

/// Per-document leaf responsibilities, keyed by `DocId`, reused across the
/// E/M steps of one iteration.
pub type LeafResponsibilities = HashMap<DocId, Vec<(NodeId, f64)>>;

fn log_sum_exp(xs: &[f64]) -> f64 {
    let max = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return max;
    }
    max + xs.iter().map(|&x| (x - max).exp()).sum::<f64>().ln()
}

/// E-step: leaf responsibility `γ_ℓ = softmax_ℓ(log π_ℓ + (Σ_w count·log
/// P(w|ℓ))/T)` for one document's row.
pub fn leaf_responsibilities(tree: &Tree, leaves: &[NodeId], row: &Row, temperature: f64) -> Vec<f64> {
    let t = if temperature > 0.0 { temperature } else { 1.0 };
    let log_scores: Vec<f64> = leaves
        .iter()
        .map(|&leaf| {
            let log_prior = tree.node(leaf).prior.max(1e-12).ln();
            let mut ll = 0.0;
            for e in row.entries() {
                let p = tree.leaf_word_prob(leaf, e.wi).max(1e-12);
                ll += e.weight * p.ln();
            }
            log_prior + ll / t
        })
        .collect();
    let lse = log_sum_exp(&log_scores);
    log_scores.iter().map(|&s| (s - lse).exp()).collect()
}

/// For one document's word occurrence at `wi` under `leaf`, the normalized
/// ancestor responsibilities `λ_{ℓ,i}·P(w|a_i) / Σ_j λ_{ℓ,j}·P(w|a_j)`.
pub fn ancestor_responsibilities(tree: &Tree, leaf: NodeId, wi: WordId) -> Vec<f64> {
    let ancestors = tree.ancestors(leaf);
    let node = tree.node(leaf);
    let mut weights: Vec<f64> = ancestors
        .iter()
        .enumerate()
        .map(|(i, &a)| node.lambdas.get(i).copied().unwrap_or(0.0) * tree.node(a).words[wi.index()])
        .collect();
    let uniform_lambda = node.lambdas.last().copied().unwrap_or(0.0);
    weights.push(uniform_lambda / tree.node(leaf).words.len() as f64);
    let sum: f64 = weights.iter().sum();
    if sum > 0.0 {
        for w in &mut weights {
            *w /= sum;
        }
    }
    weights
}

/// One full E-step + M-step accumulation pass over `rows`, followed by
/// `Tree::set_from_new`. Returns the leaf responsibilities computed (for
/// diagnostics / incremental-labeling callers).
pub fn em_iteration(
    tree: &mut Tree,
    rows: &HashMap<DocId, Row>,
    temperature: f64,
    dirichlet_alpha: f64,
) -> LeafResponsibilities {
    let leaves = tree.leaves();
    let mut responsibilities = LeafResponsibilities::new();

    for (&doc_id, row) in rows.iter() {
        let gammas = leaf_responsibilities(tree, &leaves, row, temperature);
        responsibilities.insert(
            doc_id,
            leaves.iter().copied().zip(gammas.iter().copied()).collect(),
        );

        for (&leaf, &gamma_leaf) in leaves.iter().zip(gammas.iter()) {
            if gamma_leaf <= 0.0 {
                continue;
            }
            let ancestors = tree.ancestors(leaf);
            tree.node_mut(leaf).new_prior += gamma_leaf;

            let mut doc_mass = 0.0;
            for e in row.entries() {
                let resp = ancestor_responsibilities(tree, leaf, e.wi);
                let leaf_depth_idx = ancestors.len();
                for (i, &a) in ancestors.iter().enumerate() {
                    let mass = gamma_leaf * resp[i] * e.weight;
                    tree.node_mut(a).new_words[e.wi.index()] += mass;
                    tree.node_mut(leaf).new_lambdas[i] += mass;
                    *tree
                        .node_mut(a)
                        .new_word_loo
                        .entry((doc_id.0, e.wi.index() as u32))
                        .or_insert(0.0) += mass;
                    doc_mass += mass;
                }
                let uniform_mass = gamma_leaf * resp.get(leaf_depth_idx).copied().unwrap_or(0.0)
                    * e.weight;
                if let Some(last) = tree.node_mut(leaf).new_lambdas.last_mut() {
                    *last += uniform_mass;
                }
                doc_mass += uniform_mass;
            }
            tree.node_mut(leaf)
                .new_doc_loo
                .insert(doc_id.0, doc_mass);
        }
    }

    tree.set_from_new(dirichlet_alpha);
    responsibilities
}

/// Fienberg closed-form shrinkage: per-node lambda balancing local ML
/// against a shrinkage target (the parent's mixture, or uniform if at
/// root), via a squared-error-derived weight `n / (n + k)` for a tunable
/// `k` — used instead of running full EM over the lambdas.
pub fn fienberg_shrink(tree: &mut Tree, k: f64) {
    let order = tree.preorder();
    for id in order {
        let n = tree.node(id).new_prior.max(tree.node(id).prior);
        let local_weight = n / (n + k);
        let node = tree.node_mut(id);
        let len = node.lambdas.len();
        for (i, l) in node.lambdas.iter_mut().enumerate() {
            *l = if i == 0 {
                local_weight
            } else {
                (1.0 - local_weight) / (len - 1).max(1) as f64
            };
        }
    }
}

/// KL divergence between two discrete distributions of equal length.
pub fn kl_divergence(p: &[f64], q: &[f64]) -> f64 {
    p.iter()
        .zip(q.iter())
        .map(|(&pi, &qi)| {
            if pi <= 0.0 {
                0.0
            } else {
                pi * (pi / qi.max(1e-12)).ln()
            }
        })
        .sum()
}

/// Tree growth: tests every grandparent's children pairwise for
/// KL-divergence above `threshold`; for each child still under `max_depth`,
/// spawns a perturbed grandchild copy when triggered.
pub fn grow_tree(tree: &mut Tree, threshold: f64, max_depth: u32, seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let candidates: Vec<NodeId> = tree
        .preorder()
        .into_iter()
        .filter(|&id| tree.node(id).depth + 1 < max_depth && !tree.node(id).children.is_empty())
        .collect();

    for parent in candidates {
        let children = tree.node(parent).children.clone();
        let mut triggered = false;
        for i in 0..children.len() {
            for j in (i + 1)..children.len() {
                let kl = kl_divergence(&tree.node(children[i]).words, &tree.node(children[j]).words);
                if kl > threshold {
                    triggered = true;
                }
            }
        }
        if !triggered {
            continue;
        }
        for &child in &children {
            let base_words = tree.node(child).words.clone();
            let name = format!("{}-split", tree.node(child).name);
            let grandchild = tree.add_child(child, name, false);
            let perturbed: Vec<f64> = base_words
                .iter()
                .map(|&w| (w + rng.gen::<f64>() * 1e-3).max(1e-9))
                .collect();
            let sum: f64 = perturbed.iter().sum();
            tree.node_mut(grandchild).words = perturbed.iter().map(|&w| w / sum).collect();
        }
    }
}

/// Multiclass extension (§4.7): a document may belong to a *set* of
/// classes. `CMixture` records the mixture over leaves + root + uniform
/// observed at training time for one such class-set.
#[derive(Debug, Clone)]
pub struct CMixture {
    pub class_set: Vec<usize>,
    pub mixture: Vec<f64>,
    pub log_prior: f64,
}

/// Greedily enumerates candidate class sets (singles, then pairs, then
/// triples, up to `max_set_size`) and scores each by
/// `log P(d|set) + log P(set)`, falling back to an average over the
/// class-set's singleton mixtures when the set itself was never observed
/// at training time ("backoff averaging").
pub fn score_class_sets(
    tree: &Tree,
    leaves: &[NodeId],
    row: &Row,
    known_sets: &[CMixture],
    n_classes: usize,
    max_set_size: usize,
) -> Vec<(Vec<usize>, f64)> {
    let mut candidates: Vec<Vec<usize>> = (0..n_classes).map(|c| vec![c]).collect();
    if max_set_size >= 2 {
        for i in 0..n_classes {
            for j in (i + 1)..n_classes {
                candidates.push(vec![i, j]);
            }
        }
    }
    if max_set_size >= 3 {
        for i in 0..n_classes {
            for j in (i + 1)..n_classes {
                for k in (j + 1)..n_classes {
                    candidates.push(vec![i, j, k]);
                }
            }
        }
    }

    candidates
        .into_iter()
        .map(|set| {
            let known = known_sets.iter().find(|cm| cm.class_set == set);
            let (mixture, log_prior) = match known {
                Some(cm) => (cm.mixture.clone(), cm.log_prior),
                None => {
                    // Backoff: average the singleton mixtures of each
                    // member class, weighted equally.
                    let singles: Vec<&CMixture> = set
                        .iter()
                        .filter_map(|&c| known_sets.iter().find(|cm| cm.class_set == vec![c]))
                        .collect();
                    if singles.is_empty() {
                        (vec![1.0 / leaves.len() as f64; leaves.len()], f64::NEG_INFINITY)
                    } else {
                        let len = singles[0].mixture.len();
                        let mut avg = vec![0.0; len];
                        for s in &singles {
                            for (a, &m) in avg.iter_mut().zip(s.mixture.iter()) {
                                *a += m / singles.len() as f64;
                            }
                        }
                        let avg_log_prior: f64 =
                            singles.iter().map(|s| s.log_prior).sum::<f64>() / singles.len() as f64;
                        (avg, avg_log_prior)
                    }
                }
            };
            let log_scores: Vec<f64> = leaves
                .iter()
                .zip(mixture.iter())
                .map(|(&leaf, &m)| {
                    let mut ll = 0.0;
                    for e in row.entries() {
                        ll += e.weight * tree.leaf_word_prob(leaf, e.wi).max(1e-12).ln();
                    }
                    m.max(1e-12).ln() + ll
                })
                .collect();
            let score = log_sum_exp(&log_scores) + log_prior;
            (set, score)
        })
        .collect()
}
