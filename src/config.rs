//! Explicit configuration threaded through training and scoring.
//!
//! The original tool kept these as process-wide globals set by argument
//! parsing (event-model switch, smoothing parameters, verbosity, random
//! seed) and read back anywhere in the call tree. Here they live in one
//! `Config` value that callers pass down explicitly; nothing in this crate
//! reaches for ambient global state.

use serde::{Deserialize, Serialize};

/// Whether a document is modeled as "bag of word events" (multinomial) or
/// as "one Bernoulli trial per vocabulary word" (multivariate Bernoulli).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventModel {
    WordEvent,
    DocumentEvent,
}

impl Default for EventModel {
    fn default() -> Self {
        EventModel::WordEvent
    }
}

/// Naive-Bayes smoothing scheme and its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Smoothing {
    Laplace,
    MEstimate { m: f64, p: f64 },
    WittenBell,
    GoodTuring { k: u32 },
    Dirichlet { alpha_file: Option<String>, weight: f64 },
}

impl Default for Smoothing {
    fn default() -> Self {
        Smoothing::Laplace
    }
}

/// Term weighting scheme applied when building a row or barrel.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum IdfVariant {
    Log,
    Sqrt,
    Ratio,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Weighting {
    Count,
    CountIdf(IdfVariant),
    LogCountIdf(IdfVariant),
    InfoGain,
}

impl Default for Weighting {
    fn default() -> Self {
        Weighting::Count
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Normalization {
    Euclidean,
    SumToOne,
    None,
}

impl Default for Normalization {
    fn default() -> Self {
        Normalization::Euclidean
    }
}

/// Starting point for unlabeled `class_probs` before the first M-step.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EmStart {
    Zero,
    Even,
    PriorProportional,
    Random,
}

impl Default for EmStart {
    fn default() -> Self {
        EmStart::Even
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Perturbation {
    None,
    Gaussian,
    Gamma,
}

impl Default for Perturbation {
    fn default() -> Self {
        Perturbation::None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmConfig {
    pub max_iterations: u32,
    pub start: EmStart,
    pub unlabeled_normalizer: f64,
    pub anneal_normalizer: bool,
    pub deterministic_annealing: bool,
    pub initial_temperature: f64,
    pub temperature_decay: f64,
    pub perturbation: Perturbation,
    pub labeled_for_start_only: bool,
    /// `EM_ACCELERATION`: `None` reproduces the standard always-on update
    /// (`a = 1.0`); `Some(a)` reproduces the source's disabled-by-default
    /// accelerated path for a given `a` (historically 1.8).
    pub em_acceleration: Option<f64>,
    pub halting_tag: Option<String>,
    pub validation_fraction: f64,
}

impl Default for EmConfig {
    fn default() -> Self {
        EmConfig {
            max_iterations: 10,
            start: EmStart::default(),
            unlabeled_normalizer: 1.0,
            anneal_normalizer: false,
            deterministic_annealing: false,
            initial_temperature: 1.0,
            temperature_decay: 0.9,
            perturbation: Perturbation::default(),
            labeled_for_start_only: false,
            em_acceleration: None,
            halting_tag: None,
            validation_fraction: 0.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeConfig {
    pub dirichlet_alpha: f64,
    pub kl_growth_threshold: f64,
    pub max_depth: u32,
    pub use_fienberg_shrinkage: bool,
    pub incremental_quota_per_iteration: usize,
}

impl Default for TreeConfig {
    fn default() -> Self {
        TreeConfig {
            dirichlet_alpha: 1e-3,
            kl_growth_threshold: 0.1,
            max_depth: 4,
            use_fienberg_shrinkage: false,
            incremental_quota_per_iteration: 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaxEntConfig {
    pub max_iterations: u32,
    pub gaussian_prior_variance: Option<f64>,
    pub variance_scales_with_count: bool,
    pub min_feature_count: u32,
    pub halting_tag: Option<String>,
}

impl Default for MaxEntConfig {
    fn default() -> Self {
        MaxEntConfig {
            max_iterations: 100,
            gaussian_prior_variance: None,
            variance_scales_with_count: false,
            min_feature_count: 0,
            halting_tag: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum Kernel {
    Linear,
    Polynomial { degree: u32, coef0: f64 },
    Rbf { gamma: f64 },
    Sigmoid { gamma: f64, coef0: f64 },
    Fisher,
}

impl Default for Kernel {
    fn default() -> Self {
        Kernel::Linear
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum MultiClassMode {
    OneVsRest,
    Pairwise,
}

impl Default for MultiClassMode {
    fn default() -> Self {
        MultiClassMode::OneVsRest
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvmConfig {
    pub kernel: Kernel,
    pub multiclass: MultiClassMode,
    pub cost: f64,
    pub transduction_cost: Option<f64>,
    pub working_set_size: usize,
    pub kkt_tolerance: f64,
    pub alpha_tolerance: f64,
    pub cache_capacity: usize,
    pub remove_misclassified: bool,
}

impl Default for SvmConfig {
    fn default() -> Self {
        SvmConfig {
            kernel: Kernel::default(),
            multiclass: MultiClassMode::default(),
            cost: 1.0,
            transduction_cost: None,
            working_set_size: 4,
            kkt_tolerance: 1e-3,
            alpha_tolerance: 1e-12,
            cache_capacity: 4096,
            remove_misclassified: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum ActiveCriterion {
    Uncertainty,
    Relevance,
    Random,
    Length,
    Qbc,
    VoteEntropy,
    WeightedKl,
    DensityWeightedKl,
    StreamVoteEntropy { rate: f64 },
    StreamKl { rate: f64 },
}

impl Default for ActiveCriterion {
    fn default() -> Self {
        ActiveCriterion::Uncertainty
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActiveConfig {
    pub criterion: ActiveCriterion,
    pub rounds: u32,
    pub add_per_round: usize,
    pub committee_size: usize,
    pub positive_class: Option<String>,
    pub remap_probabilities: bool,
    pub remap_window: usize,
    pub final_em_pass: bool,
}

impl Default for ActiveConfig {
    fn default() -> Self {
        ActiveConfig {
            criterion: ActiveCriterion::default(),
            rounds: 10,
            add_per_round: 4,
            committee_size: 1,
            positive_class: None,
            remap_probabilities: false,
            remap_window: 50,
            final_em_pass: false,
        }
    }
}

/// Top-level configuration object. Built by `Config::default()`, then
/// layered with CLI overrides or a deserialized config file; never mutated
/// as a global.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    pub event_model: EventModel,
    pub smoothing: Smoothing,
    pub weighting: Weighting,
    pub normalization: Normalization,
    pub uniform_class_priors: bool,
    pub target_document_length: f64,
    pub em: EmConfig,
    pub tree: TreeConfig,
    pub maxent: MaxEntConfig,
    pub svm: SvmConfig,
    pub active: ActiveConfig,
    pub random_seed: u64,
}
